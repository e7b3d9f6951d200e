// TADS 3 compiler back end and build tool
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

//! TADS 3 compiler back end and build tool.
//!
//! The compiler writes the program being compiled into a set of paged byte
//!   [streams](stream),
//!     one per kind of output
//!       (code, constant data, object definitions and so on).
//! Since neither addresses nor ids are known until every module has been
//!   seen,
//!     each reference is written as a placeholder and recorded as a
//!     [fixup](fixup):
//!
//!   - an _absolute fixup_ awaits the final address of an [`Anchor`],
//!       a named or anonymous item in a stream;
//!   - an _id fixup_ awaits the program-wide number of an object,
//!       property or enumerator whose local number is meaningful only
//!       within one object file.
//!
//! Each module is compiled into an [object file](objfile) that preserves
//!   its streams,
//!   anchors and fixups,
//!     and the [linker](link) loads all object files into one set of
//!     streams,
//!   renumbers ids,
//!   resolves anchors,
//!   and writes the [image](image).
//!
//! The [`make`] driver decides which modules need to be recompiled and
//!   runs each pass through the [`make::Toolchain`] trait;
//!     [`frontend`] provides a small reference language for it.
//!
//! [`Anchor`]: stream::Anchor

// We build docs for private items.
#![allow(rustdoc::private_intra_doc_links)]

pub mod global;

#[macro_use]
extern crate static_assertions;

pub mod arena;
pub mod code;
pub mod diagnose;
pub mod fixup;
pub mod frontend;
pub mod fs;
pub mod image;
pub mod io;
pub mod library;
pub mod link;
pub mod make;
pub mod objfile;
pub mod optfile;
pub mod stream;
pub mod sym;
