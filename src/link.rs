// Object file linker
//
//  Copyright (C) 2014-2022 Ryan Specialty Group, LLC.
//
//  This file is part of t3make.
//
//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.
//
//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.
//
//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Object file linker.
//!
//! The linker combines the object files of every module of a program into
//!   a single [`StreamSet`] and writes it out as an image:
//!
//!   1. Each object file is loaded in module order
//!        (see [`Linker::load`]).
//!      Its streams are appended to the program's streams,
//!        its anchors are rebased and attached to the program's symbols,
//!        and its local object,
//!          property
//!          and enumerator ids are renumbered into program-wide ids by
//!          name.
//!   2. Symbols that are referenced but defined by no anchor are
//!        unresolved externals
//!        (see [`Linker::unresolved_externs`]).
//!   3. Every anchor is assigned its final address and its fixup list is
//!        applied
//!        (see [`Linker::resolve`]).
//!   4. The streams are written as the blocks of an image
//!        (see [`Linker::write_image`]).
//!
//! Addresses are offsets into the pool that holds the anchor's stream:
//!   the code pool for code,
//!     and the constant pool for data.
//! Static code is placed after all other code.

use crate::arena::Arena;
use crate::fixup::IdFixups;
use crate::image::ImageWriter;
use crate::io::{write_str16, write_u32, write_u8};
use crate::objfile::{IdNames, IdXlat, ObjFileError, ObjectFileReader};
use crate::stream::{set::StreamSet, set_anchor_addr, StreamError, StreamId};
use crate::sym::SymbolTable;
use fxhash::FxHashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::debug;

/// Program-wide numbering of one kind of id.
///
/// Ids are assigned from 1 in order of first appearance of each name.
#[derive(Debug, Default)]
struct IdSpace {
    ids: FxHashMap<String, u32>,
    count: u32,
}

impl IdSpace {
    fn id_of(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }

        self.count += 1;
        self.ids.insert(name.to_string(), self.count);
        self.count
    }

    /// Translation table for a file's local names,
    ///   indexed by local id.
    fn xlat(&mut self, local: &[String]) -> Vec<u32> {
        std::iter::once(0)
            .chain(local.iter().map(|name| self.id_of(name)))
            .collect()
    }
}

/// Linker state for one program.
pub struct Linker<'a> {
    streams: StreamSet,
    syms: SymbolTable<'a>,
    fixups: IdFixups,
    obj: IdSpace,
    prop: IdSpace,
    enm: IdSpace,
    resolved: bool,
}

impl<'a> Linker<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        let mut fixups = IdFixups::new();

        // A linked program is not itself relinked.
        fixups.set_keep(false);

        Self {
            streams: StreamSet::new(),
            syms: SymbolTable::new(arena),
            fixups,
            obj: Default::default(),
            prop: Default::default(),
            enm: Default::default(),
            resolved: false,
        }
    }

    /// Load the object file read from `r`.
    ///
    /// `path` is used only for error reporting.
    pub fn load<R: Read>(
        &mut self,
        path: PathBuf,
        r: R,
    ) -> Result<(), LinkError> {
        let wrap = |source| LinkError::ObjFile {
            path: path.clone(),
            source,
        };

        let mut reader = ObjectFileReader::new(r).map_err(wrap)?;
        let names = reader.read_names().map_err(wrap)?;
        let xlat = self.xlat(&names);

        reader
            .load_into(
                &mut self.streams,
                &mut self.syms,
                &mut self.fixups,
                &xlat,
            )
            .map_err(wrap)?;

        for (name, id) in names.obj.iter().zip(&xlat.obj[1..]) {
            let sym = self.syms.intern(name);
            self.syms.entry_mut(sym).obj_id = Some(*id);
        }

        debug!(
            path = %path.display(),
            objects = names.obj.len(),
            code = self.streams.code().ofs(),
            "loaded object file"
        );

        Ok(())
    }

    fn xlat(&mut self, names: &IdNames) -> IdXlat {
        IdXlat {
            obj: self.obj.xlat(&names.obj),
            prop: self.prop.xlat(&names.prop),
            enm: self.enm.xlat(&names.enm),
        }
    }

    /// Names of symbols that are referenced but never defined,
    ///   in order of first reference.
    pub fn unresolved_externs(&self) -> Vec<&'a str> {
        self.syms
            .iter()
            .filter(|(sym, _)| {
                let entry = self.syms.entry(*sym);
                entry.anchor.is_none() && !entry.fixups.is_empty()
            })
            .map(|(_, name)| name)
            .collect()
    }

    /// Assign every anchor its final address,
    ///   patch every reference to it,
    ///   and move static code after the main code.
    ///
    /// After this point symbols no longer refer to valid anchors of the
    ///   static code stream;
    ///     anchors must be found through their streams.
    pub fn resolve(&mut self) -> Result<(), LinkError> {
        let static_base = self.streams.code().ofs();

        for id in StreamId::PERSISTENT {
            let base = match id {
                StreamId::StaticCode => static_base,
                _ => 0,
            };

            let anchors: Vec<_> = self
                .streams
                .get(id)?
                .anchors()
                .map(|(handle, anchor)| (handle, anchor.ofs()))
                .collect();

            for (handle, ofs) in anchors {
                set_anchor_addr(
                    &mut self.streams,
                    id,
                    handle,
                    base + ofs,
                    &self.syms,
                )?;
            }
        }

        let merged = self.streams.merge_static_code();
        debug!(static_base = merged, "resolved anchors");

        self.resolved = true;
        Ok(())
    }

    /// Final id of an object by name.
    pub fn obj_id(&self, name: &str) -> Option<u32> {
        self.syms.lookup(name).and_then(|sym| self.syms.entry(sym).obj_id)
    }

    /// Final address of the anchor of the symbol `name`.
    pub fn addr_of(&self, name: &str) -> Option<(StreamId, u32)> {
        self.symbol_addrs()
            .find(|(sym, _, _)| *sym == name)
            .map(|(_, stream, addr)| (stream, addr))
    }

    fn symbol_addrs(
        &self,
    ) -> impl Iterator<Item = (&'a str, StreamId, u32)> + '_ {
        [StreamId::Code, StreamId::Data, StreamId::Object]
            .into_iter()
            .filter_map(move |id| self.streams.get(id).ok().map(|ds| (id, ds)))
            .flat_map(move |(id, ds)| {
                ds.anchors().filter_map(move |(_, anchor)| {
                    let sym = anchor.symbol()?;
                    Some((self.syms.name(sym), id, anchor.addr()?))
                })
            })
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    /// Write the linked program as an image.
    ///
    /// Debug images carry a table of symbol addresses.
    pub fn write_image<W: Write>(
        &self,
        w: W,
        crc: u32,
        timestamp: &str,
        debug: bool,
    ) -> Result<W, LinkError> {
        if !self.resolved {
            return Err(LinkError::NotResolved);
        }

        let mut img = ImageWriter::new(w, crc, timestamp)?;

        img.write_stream_block(b"CODE", self.streams.code().stream())?;
        img.write_stream_block(b"CNST", self.streams.get(StreamId::Data)?)?;
        img.write_stream_block(b"OBJS", self.streams.get(StreamId::Object)?)?;

        for (id, tag) in [
            (StreamId::IcMod, b"ICMD"),
            (StreamId::BigNum, b"BNUM"),
            (StreamId::RexPat, b"RXPT"),
            (StreamId::StaticInitId, b"SINI"),
            (StreamId::LocalVar, b"LCLV"),
        ] {
            let ds = self.streams.get(id)?;

            if !ds.is_empty() {
                img.write_stream_block(tag, ds)?;
            }
        }

        if debug {
            img.write_block(b"SYMD", 0, &self.symbol_block()?)?;
        }

        Ok(img.finish()?)
    }

    fn symbol_block(&self) -> io::Result<Vec<u8>> {
        let entries: Vec<_> = self.symbol_addrs().collect();
        let mut block = Vec::new();

        write_u32(&mut block, entries.len() as u32)?;

        for (name, stream, addr) in entries {
            write_str16(&mut block, name.as_bytes())?;
            write_u8(&mut block, stream as u8)?;
            write_u32(&mut block, addr)?;
        }

        Ok(block)
    }
}

#[derive(Debug)]
pub enum LinkError {
    /// An object file could not be loaded.
    ObjFile { path: PathBuf, source: ObjFileError },

    /// An image was requested before addresses were resolved.
    NotResolved,

    Stream(StreamError),

    Io(io::Error),
}

impl From<StreamError> for LinkError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ObjFile { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            Self::NotResolved => {
                write!(f, "image requested before link addresses were resolved")
            }
            Self::Stream(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ObjFile { source, .. } => Some(source),
            Self::NotResolved => None,
            Self::Stream(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod test;
