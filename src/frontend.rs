// Reference front end
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

//! Reference front end.
//!
//! [`Frontend`] implements [`Toolchain`] for a small declarative
//!   language of objects,
//!     their base objects,
//!     and their properties
//!   (see [`parse`]).
//! It is enough to drive every pass of the build:
//!   symbol export,
//!   code and data generation with fixups into other modules,
//!   linking,
//!   and the image.
//!
//! Symbol file payload
//! ===================
//! A count followed by one `[u1 kind][str16 name]` entry for each object
//!   (kind 1) and enumerator (kind 2) that the module defines.
//!
//! Generated code
//! ==============
//! Each object `NAME` gets a constructor method anchored by the symbol
//!   `NAME.construct` in the code stream.
//! The constructor calls the constructor of the base object,
//!   if any,
//!   sets each property assigned in the source,
//!   and returns.
//! When compiling for debugging,
//!   the method is followed by its line table:
//!
//! ```text
//! [u2 count]([u4 method offset][u4 source id][u4 line])*
//! ```
//!
//! Offsets are relative to the start of the method.
//!
//! The object itself is anchored by `NAME` in the object stream:
//!
//! ```text
//! [u4 id][u4 base id][u4 constructor][u2 nprops]
//!   ([u2 prop][u1 type][u4 value])*
//! ```
//!
//! A property value is an object id (type 1),
//!   the address of a string in the data stream (type 2),
//!   or an enumerator id (type 3).
//! Strings are stored as `[u2 len][bytes]`.
//!
//! Preinitialization is the identity transformation,
//!   since there is no VM to run the program in.

pub mod parse;
pub mod pp;


use crate::arena::Arena;
use crate::code::SourceId;
use crate::diagnose::{Location, Message, Reporter};
use crate::fixup::{AbsFixupList, IdFixups};
use crate::global::{self, EnumId, ObjId, PropId};
use crate::image;
use crate::io::{
    read_string16, read_u32, read_u8, write_str16, write_u32, write_u8,
};
use crate::link::{LinkError, Linker};
use crate::make::{CompileUnit, Exported, LinkOptions, SymbolFile, Toolchain};
use crate::objfile::{write_object_file, IdNames};
use crate::stream::set::StreamSet;
use crate::stream::{AnchorOwner, StreamId};
use crate::sym::SymbolTable;
use chrono::Local;
use fxhash::FxHashMap;
use parse::{Decl, Value};
use pp::{Preprocessed, Preprocessor};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Object file could not be opened for linking.
pub const ERR_OPEN_OBJ: u32 = 10604;

/// Symbol referenced by an object file is defined by none of them.
pub const ERR_UNRESOLVED_EXTERN: u32 = 11531;

const OP_RETNIL: u8 = 0x51;
const OP_CALL: u8 = 0x58;
const OP_SETPROPSELF: u8 = 0xBD;

const TYPE_OBJ: u8 = 1;
const TYPE_STR: u8 = 2;
const TYPE_ENUM: u8 = 3;

/// Kind of a name exported through a symbol file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Object = 1,
    Enum = 2,
}

impl TryFrom<u8> for SymKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Object),
            2 => Ok(Self::Enum),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub kind: SymKind,
    pub name: String,
}

pub fn write_exports<W: Write + ?Sized>(
    w: &mut W,
    exports: &[Export],
) -> io::Result<()> {
    write_u32(w, exports.len() as u32)?;

    for export in exports {
        write_u8(w, export.kind as u8)?;
        write_str16(w, export.name.as_bytes())?;
    }

    Ok(())
}

pub fn read_exports(mut payload: &[u8]) -> io::Result<Vec<Export>> {
    let r = &mut payload;
    let count = read_u32(r)?;

    (0..count)
        .map(|_| {
            let kind = SymKind::try_from(read_u8(r)?).map_err(|kind| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid symbol kind {}", kind),
                )
            })?;

            Ok(Export {
                kind,
                name: read_string16(r)?,
            })
        })
        .collect()
}

/// The reference compiler.
#[derive(Debug, Default)]
pub struct Frontend;

impl Frontend {
    pub fn new() -> Self {
        Self
    }

    fn read(
        &self,
        unit: &CompileUnit,
        reporter: &mut dyn Reporter,
    ) -> Preprocessed {
        let pp = Preprocessor::new(unit.include_paths, unit.defines)
            .run(unit.source, reporter);

        debug!(
            source = %unit.source.display(),
            lines = pp.lines.len(),
            included = pp.included.len(),
            "preprocessed"
        );

        pp
    }
}

impl Toolchain for Frontend {
    fn preprocess(
        &mut self,
        unit: &CompileUnit,
        out: &mut dyn Write,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<PathBuf>> {
        let pp = self.read(unit, reporter);

        writeln!(out, "#charset \"{}\"", unit.charset.unwrap_or("utf-8"))?;

        let mut prev = None;

        for line in &pp.lines {
            let expected = prev.map(|(file, n)| (file, n + 1));

            if expected != Some((line.file, line.line)) {
                writeln!(
                    out,
                    "#line {} \"{}\"",
                    line.line,
                    pp.files[line.file].display()
                )?;
            }

            writeln!(out, "{}", line.text)?;
            prev = Some((line.file, line.line));
        }

        Ok(pp.included)
    }

    fn export_symbols(
        &mut self,
        unit: &CompileUnit,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Exported> {
        let pp = self.read(unit, reporter);
        let decls = parse::parse(&pp, reporter);

        let mut exports: Vec<Export> = Vec::new();

        for decl in &decls {
            let (kind, name, loc) = match decl {
                Decl::Object { name, loc, .. } => (SymKind::Object, name, loc),
                Decl::Enum { name, loc } => (SymKind::Enum, name, loc),
                Decl::Assign { .. } => continue,
            };

            if exports.iter().any(|e| &e.name == name) {
                reporter.report(&Message::error(
                    Some(loc.clone()),
                    format!("symbol \"{}\" is already defined", name),
                ));
                continue;
            }

            exports.push(Export {
                kind,
                name: name.clone(),
            });
        }

        let mut payload = Vec::new();
        write_exports(&mut payload, &exports)?;

        Ok(Exported {
            included: pp.included,
            payload,
        })
    }

    fn compile(
        &mut self,
        unit: &CompileUnit,
        symbols: &[SymbolFile],
        mut strings: Option<&mut dyn Write>,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<u8>> {
        let mut known = FxHashMap::default();

        for sf in symbols {
            match read_exports(&sf.payload) {
                Ok(exports) => {
                    for export in exports {
                        known.entry(export.name).or_insert(export.kind);
                    }
                }
                Err(e) => reporter.report(&Message::error(
                    None,
                    format!(
                        "invalid symbol file \"{}\": {}",
                        sf.path.display(),
                        e
                    ),
                )),
            }
        }

        let pp = self.read(unit, reporter);
        let decls = parse::parse(&pp, reporter);
        let errors = reporter.error_count();
        let objects = check(&decls, &known, reporter);

        if reporter.error_count() > errors {
            return Ok(Vec::new());
        }

        let arena = Arena::new();
        let mut cg = Codegen::new(&arena, unit.debug);

        for obj in &objects {
            cg.object(obj, &mut strings, reporter)?;
        }

        debug!(
            source = %unit.source.display(),
            objects = objects.len(),
            "generated code"
        );

        cg.finish()
    }

    fn link(
        &mut self,
        objects: &[PathBuf],
        out: &mut dyn Write,
        opts: LinkOptions,
        reporter: &mut dyn Reporter,
    ) -> io::Result<()> {
        let arena = Arena::new();
        let mut linker = Linker::new(&arena);
        let errors = reporter.error_count();

        for path in objects {
            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    reporter.report(
                        &Message::error(
                            None,
                            format!(
                                "unable to open object file \"{}\": {}",
                                path.display(),
                                e
                            ),
                        )
                        .with_code(ERR_OPEN_OBJ),
                    );
                    continue;
                }
            };

            if let Err(e) = linker.load(path.clone(), BufReader::new(file)) {
                report_link_error(e, reporter)?;
            }
        }

        for name in linker.unresolved_externs() {
            reporter.report(
                &Message::error(
                    None,
                    format!("unresolved external reference \"{}\"", name),
                )
                .with_code(ERR_UNRESOLVED_EXTERN),
            );
        }

        if reporter.error_count() > errors {
            return Ok(());
        }

        if let Err(e) = linker.resolve() {
            return report_link_error(e, reporter);
        }

        let timestamp = image::timestamp(Local::now());

        match linker.write_image(out, opts.crc, &timestamp, opts.debug) {
            Ok(_) => Ok(()),
            Err(e) => report_link_error(e, reporter),
        }
    }

    fn preinit(
        &mut self,
        input: &[u8],
        out: &mut dyn Write,
        _reporter: &mut dyn Reporter,
    ) -> io::Result<()> {
        debug!(len = input.len(), "preinit");
        out.write_all(input)
    }
}

/// Report a link failure,
///   leaving only output failures as errors.
fn report_link_error(
    e: LinkError,
    reporter: &mut dyn Reporter,
) -> io::Result<()> {
    match e {
        LinkError::Io(e) => Err(e),
        e @ LinkError::ObjFile { .. } => {
            reporter.report(&Message::error(None, e.to_string()));
            Ok(())
        }
        e => {
            reporter.report(&Message::internal(e.to_string()));
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropValue<'d> {
    Object(&'d str),
    Str(&'d str),
    Enum(&'d str),
}

#[derive(Debug)]
struct PropDef<'d> {
    name: &'d str,
    value: PropValue<'d>,
    loc: &'d Location,
}

#[derive(Debug)]
struct ObjDef<'d> {
    name: &'d str,
    base: Option<&'d str>,
    props: Vec<PropDef<'d>>,
}

/// Resolve the names used by `decls` against the symbols `known` to the
///   build,
///     grouping property assignments by object.
///
/// Properties may only be assigned to objects defined by the same module.
fn check<'d>(
    decls: &'d [Decl],
    known: &FxHashMap<String, SymKind>,
    reporter: &mut dyn Reporter,
) -> Vec<ObjDef<'d>> {
    let mut objects: Vec<ObjDef> = Vec::new();
    let mut index = FxHashMap::default();

    for decl in decls {
        let Decl::Object { name, base, loc } = decl else {
            continue;
        };

        if index.contains_key(name.as_str()) {
            continue;
        }

        match base.as_deref().map(|base| (base, known.get(base))) {
            Some((base, None)) => undefined(reporter, base, loc),
            Some((base, Some(SymKind::Enum))) => {
                reporter.report(&Message::error(
                    Some(loc.clone()),
                    format!("\"{}\" is not an object", base),
                ));
            }
            _ => {}
        }

        index.insert(name.as_str(), objects.len());
        objects.push(ObjDef {
            name: name.as_str(),
            base: base.as_deref(),
            props: Vec::new(),
        });
    }

    for decl in decls {
        let Decl::Assign {
            obj,
            prop,
            value,
            loc,
        } = decl
        else {
            continue;
        };

        let Some(&i) = index.get(obj.as_str()) else {
            reporter.report(&Message::error(
                Some(loc.clone()),
                format!("object \"{}\" is not defined in this module", obj),
            ));
            continue;
        };

        let value = match value {
            Value::Str(s) if s.len() > u16::MAX as usize => {
                reporter.report(&Message::error(
                    Some(loc.clone()),
                    "string too long",
                ));
                continue;
            }
            Value::Str(s) => PropValue::Str(s.as_str()),
            Value::Name(name) => match known.get(name) {
                Some(SymKind::Object) => PropValue::Object(name),
                Some(SymKind::Enum) => PropValue::Enum(name),
                None => {
                    undefined(reporter, name, loc);
                    continue;
                }
            },
        };

        objects[i].props.push(PropDef {
            name: prop.as_str(),
            value,
            loc,
        });
    }

    objects
}

fn undefined(reporter: &mut dyn Reporter, name: &str, loc: &Location) {
    reporter.report(&Message::error(
        Some(loc.clone()),
        format!("undefined symbol \"{}\"", name),
    ));
}

/// Module-local numbering of names,
///   starting at 1.
#[derive(Debug, Default)]
struct NameTable {
    names: Vec<String>,
    ids: FxHashMap<String, u32>,
}

impl NameTable {
    fn id(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }

        self.names.push(name.to_string());
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        id
    }
}

#[derive(Debug, Default)]
struct Ids {
    obj: NameTable,
    prop: NameTable,
    enm: NameTable,
    sources: FxHashMap<PathBuf, SourceId>,
}

impl Ids {
    fn obj(&mut self, name: &str) -> ObjId {
        self.obj.id(name)
    }

    fn prop(&mut self, name: &str) -> PropId {
        self.prop.id(name) as PropId
    }

    fn enm(&mut self, name: &str) -> EnumId {
        self.enm.id(name)
    }

    fn source(&mut self, path: &Path) -> SourceId {
        let next = self.sources.len() as SourceId;
        *self.sources.entry(path.to_path_buf()).or_insert(next)
    }
}

/// Code and data generation for one module.
struct Codegen<'a> {
    streams: StreamSet,
    syms: SymbolTable<'a>,
    fixups: IdFixups,
    ids: Ids,

    /// Follow each method with its line table.
    debug: bool,
}

impl<'a> Codegen<'a> {
    fn new(arena: &'a Arena, debug: bool) -> Self {
        Self {
            streams: StreamSet::new(),
            syms: SymbolTable::new(arena),
            fixups: IdFixups::new(),
            ids: Ids::default(),
            debug,
        }
    }

    fn object(
        &mut self,
        obj: &ObjDef,
        strings: &mut Option<&mut dyn Write>,
        reporter: &mut dyn Reporter,
    ) -> io::Result<()> {
        let Self {
            streams,
            syms,
            fixups,
            ids,
            debug,
        } = self;

        let Ok(nprops) = u16::try_from(obj.props.len()) else {
            reporter.report(&Message::error(
                obj.props.last().map(|p| p.loc.clone()),
                format!("too many properties for object \"{}\"", obj.name),
            ));
            return Ok(());
        };

        let construct = syms.intern(&format!("{}.construct", obj.name));
        let code = streams.code_mut();
        let start = code.ofs();

        code.set_method_ofs(start);
        let anchor = code.add_anchor(AnchorOwner::Symbol(construct), start);
        syms.entry_mut(construct).anchor = Some((StreamId::Code, anchor));

        if let Some(base) = obj.base {
            let base_construct = syms.intern(&format!("{}.construct", base));

            code.write_byte(OP_CALL);
            code.add_abs_fixup(&mut syms.entry_mut(base_construct).fixups);
        }

        for prop in &obj.props {
            code.add_line_rec(Some(ids.source(&prop.loc.file)), prop.loc.line);
            code.write_byte(OP_SETPROPSELF);
            code.write_prop_id(&mut fixups.prop, ids.prop(prop.name));
        }

        code.write_byte(OP_RETNIL);

        let lines = code.end_method().map_err(internal)?;

        if *debug {
            // one record per property at most, so the count fits
            code.write_u2(lines.len() as u16);

            for rec in lines {
                code.write_u4(rec.ofs);
                code.write_u4(rec.source_id);
                code.write_u4(rec.line);
            }
        }

        let sym = syms.intern(obj.name);
        let objs = streams.get_mut(StreamId::Object).map_err(internal)?;
        let ofs = objs.ofs();
        let anchor = objs.add_anchor(AnchorOwner::Symbol(sym), ofs);
        syms.entry_mut(sym).anchor = Some((StreamId::Object, anchor));

        objs.write_obj_id_selfref(
            &mut syms.entry_mut(sym).self_refs,
            ids.obj(obj.name),
        );

        let base_id =
            obj.base.map_or(global::INVALID_OBJ, |base| ids.obj(base));
        objs.write_obj_id(&mut fixups.obj, base_id);
        objs.add_abs_fixup(&mut syms.entry_mut(construct).fixups);
        objs.write_u2(nprops);

        let mut pending = Vec::new();

        for prop in &obj.props {
            objs.write_prop_id(&mut fixups.prop, ids.prop(prop.name));

            match prop.value {
                PropValue::Object(name) => {
                    objs.write_byte(TYPE_OBJ);
                    objs.write_obj_id(&mut fixups.obj, ids.obj(name));
                }
                PropValue::Enum(name) => {
                    objs.write_byte(TYPE_ENUM);
                    objs.write_enum_id(&mut fixups.enm, ids.enm(name));
                }
                PropValue::Str(s) => {
                    let mut refs = AbsFixupList::new();

                    objs.write_byte(TYPE_STR);
                    objs.add_abs_fixup(&mut refs);
                    pending.push((refs, s));
                }
            }
        }

        let data = streams.get_mut(StreamId::Data).map_err(internal)?;

        for (refs, s) in pending {
            let ofs = data.ofs();
            data.add_anchor(AnchorOwner::Internal(refs), ofs);
            data.write_u2(s.len() as u16);
            data.write(s.as_bytes());

            if let Some(out) = strings.as_mut() {
                writeln!(out, "{}", s)?;
            }
        }

        Ok(())
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        let names = IdNames {
            obj: self.ids.obj.names,
            prop: self.ids.prop.names,
            enm: self.ids.enm.names,
        };

        let mut out = Vec::new();
        write_object_file(
            &mut out,
            &self.streams,
            &self.syms,
            &self.fixups,
            &names,
        )
        .map_err(internal)?;

        Ok(out)
    }
}

fn internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
