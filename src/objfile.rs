// Object file container
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

//! Object files.
//!
//! An object file holds the complete output of the code generator for a
//!   single module:
//!     the contents of every persistent stream,
//!     the anchors within them,
//!     and every fixup that cannot be resolved until link time.
//!
//! Symbolic ids are local to each object file.
//! The file therefore begins with a table of names for each class of id
//!   (local id _n_ is named by entry _n - 1_),
//!   which the linker uses to build a translation into the program-wide id
//!   space before the body is loaded.
//!
//! Layout
//! ======
//! ```text
//!   signature
//!   u4 count, (u2 len, name)*        object id names
//!   u4 count, (u2 len, name)*        property id names
//!   u4 count, (u2 len, name)*        enumerator id names
//!   stream*                          in `StreamId::PERSISTENT` order
//!   u4 count, (u2 len, name, abs)*   references to undefined symbols
//!   u4 count, idfix*                 object id fixups
//!   u4 count, idfix*                 property id fixups
//!   u4 count, idfix*                 enumerator id fixups
//!
//! stream: u4 len, bytes, u4 count, anchor*
//! anchor: u4 ofs, u2 len, name, abs     (empty name: internal anchor)
//! abs:    u2 count, (u1 stream, u4 ofs)*
//! idfix:  u1 stream, u4 ofs, u4 id
//! ```
//!
//! Every offset is relative to the start of this file's contribution to
//!   its stream;
//!     on load,
//!       each is rebased by the end of that stream as it stood before the
//!       file was loaded
//!         (see [`StreamSet::begin_object_file`]).

use crate::fixup::{AbsFixupList, IdFixup, IdFixups};
use crate::global::{self, StreamOfs};
use crate::io::{
    read_bytes, read_string16, read_u16, read_u32, read_u8, write_str16,
    write_u16, write_u32, write_u8,
};
use crate::stream::set::StreamSet;
use crate::stream::{AnchorOwner, DataStream, StreamError, StreamId};
use crate::sym::SymbolTable;
use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, Read, Write};
use tracing::debug;

/// Object file signature.
pub const OBJ_SIG: &[u8] = b"TADS3.Object.0001\n\r\x1a";

/// Names of the symbolic ids local to one object file.
///
/// Local id _n_ is `names[n - 1]`;
///   id 0 is never named.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdNames {
    pub obj: Vec<String>,
    pub prop: Vec<String>,
    pub enm: Vec<String>,
}

/// Translation of local ids into program-wide ids,
///   indexed by local id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdXlat {
    pub obj: Vec<u32>,
    pub prop: Vec<u32>,
    pub enm: Vec<u32>,
}

/// Write the object file for the code generated into `streams`.
pub fn write_object_file<W: Write>(
    w: &mut W,
    streams: &StreamSet,
    syms: &SymbolTable,
    fixups: &IdFixups,
    names: &IdNames,
) -> Result<(), ObjFileError> {
    w.write_all(OBJ_SIG)?;

    for table in [&names.obj, &names.prop, &names.enm] {
        write_u32(w, table.len() as u32)?;
        table
            .iter()
            .try_for_each(|name| write_str16(w, name.as_bytes()))?;
    }

    for ds in streams.iter() {
        write_stream(w, ds, syms)?;
    }

    let externs: Vec<_> = syms
        .iter()
        .filter(|(sym, _)| {
            let entry = syms.entry(*sym);
            entry.anchor.is_none() && !entry.fixups.is_empty()
        })
        .collect();

    write_u32(w, externs.len() as u32)?;
    for (sym, name) in externs {
        write_str16(w, name.as_bytes())?;
        write_abs_list(w, &syms.entry(sym).fixups)?;
    }

    // Self-references are ordinary object id fixups once the symbol's
    //   final id is a matter for the linker.
    let self_refs: Vec<IdFixup> = syms
        .iter()
        .flat_map(|(sym, _)| syms.entry(sym).self_refs.iter().copied())
        .collect();

    write_id_fixups(w, fixups.obj.entries().iter().chain(self_refs.iter()))?;
    write_id_fixups(w, fixups.prop.entries().iter())?;
    write_id_fixups(w, fixups.enm.entries().iter())?;

    Ok(())
}

fn write_stream<W: Write>(
    w: &mut W,
    ds: &DataStream,
    syms: &SymbolTable,
) -> Result<(), ObjFileError> {
    write_u32(w, ds.ofs())?;

    let mut ofs = 0;
    while ofs < ds.ofs() {
        let block = ds.get_block(ofs, global::PAGE_SIZE);
        w.write_all(block)?;
        ofs += block.len() as StreamOfs;
    }

    write_u32(w, ds.anchor_count() as u32)?;

    for (_, anchor) in ds.anchors() {
        write_u32(w, anchor.ofs())?;

        let name = anchor.symbol().map(|sym| syms.name(sym)).unwrap_or("");
        write_str16(w, name.as_bytes())?;
        write_abs_list(w, anchor.fixups(syms))?;
    }

    Ok(())
}

fn write_abs_list<W: Write>(
    w: &mut W,
    list: &AbsFixupList,
) -> Result<(), ObjFileError> {
    let count = u16::try_from(list.len())
        .map_err(|_| ObjFileError::TooManyFixups(list.len()))?;

    write_u16(w, count)?;

    for fixup in list.iter() {
        write_u8(w, fixup.stream as u8)?;
        write_u32(w, fixup.ofs)?;
    }

    Ok(())
}

fn write_id_fixups<'a, W: Write>(
    w: &mut W,
    entries: impl Iterator<Item = &'a IdFixup> + Clone,
) -> Result<(), ObjFileError> {
    write_u32(w, entries.clone().count() as u32)?;

    for fixup in entries {
        write_u8(w, fixup.stream as u8)?;
        write_u32(w, fixup.ofs)?;
        write_u32(w, fixup.id)?;
    }

    Ok(())
}

/// Reader for an object file,
///   loading it into a program-wide [`StreamSet`].
///
/// The id name tables are read first so that the caller can build an
///   [`IdXlat`] before the body is loaded.
pub struct ObjectFileReader<R: Read> {
    r: R,
}

impl<R: Read> ObjectFileReader<R> {
    /// Verify the signature and prepare to read.
    pub fn new(mut r: R) -> Result<Self, ObjFileError> {
        let sig = read_bytes(&mut r, OBJ_SIG.len())
            .map_err(|_| ObjFileError::BadSignature)?;

        if sig != OBJ_SIG {
            return Err(ObjFileError::BadSignature);
        }

        Ok(Self { r })
    }

    pub fn read_names(&mut self) -> Result<IdNames, ObjFileError> {
        let mut read_table = || -> Result<Vec<String>, ObjFileError> {
            let count = read_u32(&mut self.r)?;
            (0..count)
                .map(|_| read_string16(&mut self.r).map_err(Into::into))
                .collect()
        };

        Ok(IdNames {
            obj: read_table()?,
            prop: read_table()?,
            enm: read_table()?,
        })
    }

    /// Append the file's streams to `streams`,
    ///   attach its anchors and absolute fixups to `syms`,
    ///   and apply its id fixups through `xlat`.
    pub fn load_into(
        mut self,
        streams: &mut StreamSet,
        syms: &mut SymbolTable,
        fixups: &mut IdFixups,
        xlat: &IdXlat,
    ) -> Result<(), ObjFileError> {
        streams.begin_object_file();

        for id in StreamId::PERSISTENT {
            self.load_stream(id, streams, syms)?;
        }

        let extern_count = read_u32(&mut self.r)?;
        for _ in 0..extern_count {
            let name = read_string16(&mut self.r)?;
            let mut list = self.read_abs_list(streams)?;
            let sym = syms.intern(&name);

            syms.entry_mut(sym).fixups.append(&mut list);
        }

        let obj = self.read_id_fixups(streams)?;
        fixups.obj.apply_translated(streams, obj, &xlat.obj)?;

        let prop = self.read_id_fixups(streams)?;
        fixups.prop.apply_translated(streams, prop, &xlat.prop)?;

        let enm = self.read_id_fixups(streams)?;
        fixups.enm.apply_translated(streams, enm, &xlat.enm)?;

        Ok(())
    }

    fn load_stream(
        &mut self,
        id: StreamId,
        streams: &mut StreamSet,
        syms: &mut SymbolTable,
    ) -> Result<(), ObjFileError> {
        let len = read_u32(&mut self.r)?;
        let bytes = read_bytes(&mut self.r, len as usize)?;

        let base = {
            let ds = streams.get_mut(id)?;
            let base = ds.object_file_start_ofs();
            ds.try_write(&bytes)?;
            base
        };

        let anchor_count = read_u32(&mut self.r)?;

        for _ in 0..anchor_count {
            let ofs = rebase(read_u32(&mut self.r)?, base)?;
            let name = read_string16(&mut self.r)?;
            let mut list = self.read_abs_list(streams)?;

            let owner = if name.is_empty() {
                AnchorOwner::Internal(list)
            } else {
                let sym = syms.intern(&name);
                let entry = syms.entry_mut(sym);

                if entry.anchor.is_some() {
                    return Err(ObjFileError::DuplicateSymbol(name));
                }

                entry.fixups.append(&mut list);
                AnchorOwner::Symbol(sym)
            };

            let symbol = match &owner {
                AnchorOwner::Symbol(sym) => Some(*sym),
                AnchorOwner::Internal(_) => None,
            };

            let anchor = streams.get_mut(id)?.add_anchor(owner, ofs);

            if let Some(sym) = symbol {
                syms.entry_mut(sym).anchor = Some((id, anchor));
            }
        }

        debug!(
            stream = %id,
            len,
            base,
            anchors = anchor_count,
            "loaded stream"
        );

        Ok(())
    }

    fn read_abs_list(
        &mut self,
        streams: &StreamSet,
    ) -> Result<AbsFixupList, ObjFileError> {
        let count = read_u16(&mut self.r)?;
        let mut list = AbsFixupList::new();

        for _ in 0..count {
            let stream = StreamId::try_from(read_u8(&mut self.r)?)?;
            let ofs =
                rebase(read_u32(&mut self.r)?, streams.start_ofs(stream)?)?;

            list.add(stream, ofs);
        }

        Ok(list)
    }

    fn read_id_fixups(
        &mut self,
        streams: &StreamSet,
    ) -> Result<Vec<IdFixup>, ObjFileError> {
        let count = read_u32(&mut self.r)?;

        (0..count)
            .map(|_| -> Result<IdFixup, ObjFileError> {
                let stream = StreamId::try_from(read_u8(&mut self.r)?)?;
                let ofs = rebase(
                    read_u32(&mut self.r)?,
                    streams.start_ofs(stream)?,
                )?;
                let id = read_u32(&mut self.r)?;

                Ok(IdFixup::new(stream, ofs, id))
            })
            .collect()
    }
}

/// Offset `ofs` within this file's contribution to a stream that began at
///   `base`.
fn rebase(ofs: StreamOfs, base: StreamOfs) -> Result<StreamOfs, ObjFileError> {
    ofs.checked_add(base)
        .ok_or(ObjFileError::OffsetOutOfRange { ofs, base })
}

#[derive(Debug)]
pub enum ObjFileError {
    Io(io::Error),

    /// The file does not begin with [`OBJ_SIG`].
    BadSignature,

    Stream(StreamError),

    /// A symbol is defined by more than one anchor.
    DuplicateSymbol(String),

    /// An absolute fixup list exceeds its 2-byte count.
    TooManyFixups(usize),

    /// A persisted offset cannot be rebased onto its stream.
    OffsetOutOfRange { ofs: StreamOfs, base: StreamOfs },
}

impl From<io::Error> for ObjFileError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<StreamError> for ObjFileError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl Display for ObjFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::BadSignature => write!(f, "invalid object file signature"),
            Self::Stream(e) => write!(f, "internal error: {}", e),
            Self::DuplicateSymbol(name) => {
                write!(f, "symbol \"{}\" is defined more than once", name)
            }
            Self::TooManyFixups(n) => {
                write!(f, "too many fixups ({}) for one reference list", n)
            }
            Self::OffsetOutOfRange { ofs, base } => write!(
                f,
                "invalid object file offset {} (stream base {})",
                ofs, base
            ),
        }
    }
}

impl Error for ObjFileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Stream(e) => Some(e),
            _ => None,
        }
    }
}
