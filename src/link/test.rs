// Tests for the object file linker
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

use super::*;
use crate::image::{read_image_crc, CRC_OFS, SIG_LEN};
use crate::objfile::write_object_file;
use crate::stream::AnchorOwner;

/// Module `a`:
///   three bytes of padding and a string anchored by `greeting` in the
///     data stream,
///   and in the object stream a reference to `greeting`,
///     its own object id and the property `p`.
fn module_a() -> Vec<u8> {
    let arena = Arena::new();
    let mut syms = SymbolTable::new(&arena);
    let mut streams = StreamSet::new();
    let mut fixups = IdFixups::new();
    let greeting = syms.intern("greeting");

    let data = streams.get_mut(StreamId::Data).unwrap();
    data.write(&[0xAA; 3]);
    let anchor = data.add_anchor(AnchorOwner::Symbol(greeting), 3);
    data.write(b"hello");
    syms.entry_mut(greeting).anchor = Some((StreamId::Data, anchor));

    let objs = streams.get_mut(StreamId::Object).unwrap();
    objs.add_abs_fixup(&mut syms.entry_mut(greeting).fixups);
    objs.write_obj_id(&mut fixups.obj, 1);
    objs.write_prop_id(&mut fixups.prop, 1);

    let names = IdNames {
        obj: vec!["a".into()],
        prop: vec!["p".into()],
        enm: vec![],
    };

    let mut buf = Vec::new();
    write_object_file(&mut buf, &streams, &syms, &fixups, &names).unwrap();
    buf
}

/// Module `b`:
///   a reference to `greeting` from `a`,
///   its own id,
///   the id of `a`,
///   and the property `p`,
///     all local ids numbered in a different order than in `a`.
fn module_b(extern_name: &str) -> Vec<u8> {
    let arena = Arena::new();
    let mut syms = SymbolTable::new(&arena);
    let mut streams = StreamSet::new();
    let mut fixups = IdFixups::new();
    let ext = syms.intern(extern_name);

    let objs = streams.get_mut(StreamId::Object).unwrap();
    objs.add_abs_fixup(&mut syms.entry_mut(ext).fixups);
    objs.write_obj_id(&mut fixups.obj, 1);
    objs.write_obj_id(&mut fixups.obj, 2);
    objs.write_prop_id(&mut fixups.prop, 1);

    let names = IdNames {
        obj: vec!["b".into(), "a".into()],
        prop: vec!["p".into()],
        enm: vec![],
    };

    let mut buf = Vec::new();
    write_object_file(&mut buf, &streams, &syms, &fixups, &names).unwrap();
    buf
}

#[test]
fn links_two_modules() {
    let arena = Arena::new();
    let mut sut = Linker::new(&arena);

    sut.load("a.t3o".into(), &module_a()[..]).unwrap();
    sut.load("b.t3o".into(), &module_b("greeting")[..]).unwrap();

    assert!(sut.unresolved_externs().is_empty());
    sut.resolve().unwrap();

    assert_eq!(Some(1), sut.obj_id("a"));
    assert_eq!(Some(2), sut.obj_id("b"));
    assert_eq!(Some((StreamId::Data, 3)), sut.addr_of("greeting"));

    let objs = sut.streams().get(StreamId::Object).unwrap();

    // a: [greeting][a][p]
    assert_eq!(Ok(3), objs.read_u4_at(0));
    assert_eq!(Ok(1), objs.read_u4_at(4));
    assert_eq!(Ok(1), objs.read_u2_at(8));

    // b at 10: [greeting][b][a][p]
    assert_eq!(Ok(3), objs.read_u4_at(10));
    assert_eq!(Ok(2), objs.read_u4_at(14));
    assert_eq!(Ok(1), objs.read_u4_at(18));
    assert_eq!(Ok(1), objs.read_u2_at(22));
}

#[test]
fn reports_unresolved_externs() {
    let arena = Arena::new();
    let mut sut = Linker::new(&arena);

    sut.load("a.t3o".into(), &module_a()[..]).unwrap();
    sut.load("b.t3o".into(), &module_b("farewell")[..]).unwrap();

    assert_eq!(vec!["farewell"], sut.unresolved_externs());
}

#[test]
fn same_module_twice_is_duplicate_definition() {
    let arena = Arena::new();
    let mut sut = Linker::new(&arena);

    sut.load("a.t3o".into(), &module_a()[..]).unwrap();

    match sut.load("copy.t3o".into(), &module_a()[..]) {
        Err(LinkError::ObjFile {
            path,
            source: ObjFileError::DuplicateSymbol(name),
        }) => {
            assert_eq!(PathBuf::from("copy.t3o"), path);
            assert_eq!("greeting", name);
        }
        other => panic!("expected duplicate symbol, got {:?}", other.err()),
    }
}

#[test]
fn image_requires_resolution() {
    let arena = Arena::new();
    let sut = Linker::new(&arena);

    assert!(matches!(
        sut.write_image(Vec::new(), 0, "", false),
        Err(LinkError::NotResolved)
    ));
}

#[test]
fn writes_image_with_crc() {
    let arena = Arena::new();
    let mut sut = Linker::new(&arena);

    sut.load("a.t3o".into(), &module_a()[..]).unwrap();
    sut.resolve().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.t3");

    let release = sut
        .write_image(Vec::new(), 0x01020304, "Thu Jan  1 00:00:00 1970", false)
        .unwrap();
    let debug = sut
        .write_image(Vec::new(), 0x01020304, "Thu Jan  1 00:00:00 1970", true)
        .unwrap();

    std::fs::write(&path, &release).unwrap();
    assert_eq!(Some(0x01020304), read_image_crc(&path));
    assert_eq!([4u8, 3, 2, 1], release[CRC_OFS..SIG_LEN]);

    // CNST block carries the data stream verbatim
    let cnst = release
        .windows(4)
        .position(|w| w == b"CNST")
        .expect("missing CNST block");
    assert_eq!(b"hello", &release[cnst + 10 + 3..cnst + 10 + 8]);

    assert!(!release.windows(4).any(|w| w == b"SYMD"));
    assert!(debug.windows(4).any(|w| w == b"SYMD"));
    assert!(release.ends_with(b"EOF \0\0\0\0\0\0"));
}
