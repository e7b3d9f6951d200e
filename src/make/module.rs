// Build modules
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

//! Build modules.
//!
//! A module is one source file together with the symbol file and object
//!   file derived from it.
//! Modules are built in the order in which they were added;
//!   that order is also the order in which their object files are linked
//!   and the order over which the module-list fingerprint is computed.

use crate::fs;
use std::path::{Path, PathBuf};

/// Where a module came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    /// Named directly by the user.
    #[default]
    Normal,

    /// A default module from the system library directory.
    SysLib,

    /// A member of a user library (`.tl`).
    UserLib,
}

/// One module of a build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    /// Name as given by the user or library,
    ///   used in diagnostics and recorded in the object file.
    orig_name: String,

    /// Source filename,
    ///   possibly relative to the working directory.
    source: PathBuf,

    /// Name searched for in the source path when `source` does not exist.
    search_source: PathBuf,

    symbol: PathBuf,
    object: PathBuf,

    /// Unique name of the module within its library.
    url: String,

    /// Containing library and that library's URL prefix.
    from_lib: Option<(PathBuf, String)>,

    source_type: SourceType,

    /// Members of a library may be excluded with `-x`.
    excluded: bool,

    /// 1-based position in the module list,
    ///   assigned before building.
    seqno: usize,

    needs_sym_recompile: bool,
    needs_obj_recompile: bool,
}

impl Module {
    /// New module for the source file `name`.
    ///
    /// The source receives the default extension `.t`;
    ///   the symbol and object files replace whatever extension `name` has
    ///   with `.t3s` and `.t3o` respectively.
    pub fn new<P: AsRef<Path>>(name: P) -> Self {
        let name = name.as_ref();
        let source = fs::default_ext(name, "t");

        Self {
            orig_name: name.to_string_lossy().into_owned(),
            search_source: source.clone(),
            source,
            symbol: fs::replace_ext(name, "t3s"),
            object: fs::replace_ext(name, "t3o"),
            ..Default::default()
        }
    }

    pub fn orig_name(&self) -> &str {
        &self.orig_name
    }

    pub fn set_orig_name<S: Into<String>>(&mut self, name: S) {
        self.orig_name = name.into();
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn search_source(&self) -> &Path {
        &self.search_source
    }

    pub fn set_search_source<P: Into<PathBuf>>(&mut self, name: P) {
        self.search_source = name.into();
    }

    pub fn symbol(&self) -> &Path {
        &self.symbol
    }

    pub fn set_symbol<P: Into<PathBuf>>(&mut self, name: P) {
        self.symbol = name.into();
    }

    pub fn object(&self) -> &Path {
        &self.object
    }

    pub fn set_object<P: Into<PathBuf>>(&mut self, name: P) {
        self.object = name.into();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url<S: Into<String>>(&mut self, url: S) {
        self.url = url.into();
    }

    /// Note that this module is a member of the library `lib`,
    ///   whose members' URLs begin with `lib_url`.
    pub fn set_from_lib<P: Into<PathBuf>, S: Into<String>>(
        &mut self,
        lib: P,
        lib_url: S,
    ) {
        self.from_lib = Some((lib.into(), lib_url.into()));
        self.source_type = SourceType::UserLib;
    }

    pub fn set_from_syslib(&mut self) {
        self.source_type = SourceType::SysLib;
    }

    pub fn from_lib(&self) -> Option<&Path> {
        self.from_lib.as_ref().map(|(lib, _)| lib.as_path())
    }

    pub fn lib_url(&self) -> Option<&str> {
        self.from_lib.as_ref().map(|(_, url)| url.as_str())
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    pub fn set_excluded(&mut self, excluded: bool) {
        self.excluded = excluded;
    }

    pub fn seqno(&self) -> usize {
        self.seqno
    }

    pub fn set_seqno(&mut self, seqno: usize) {
        self.seqno = seqno;
    }

    pub fn needs_sym_recompile(&self) -> bool {
        self.needs_sym_recompile
    }

    pub fn needs_obj_recompile(&self) -> bool {
        self.needs_obj_recompile
    }

    pub fn set_needs_recompile(&mut self, sym: bool, obj: bool) {
        self.needs_sym_recompile = sym;
        self.needs_obj_recompile = obj;
    }

    /// Root name that must be unique among all modules of a build.
    pub fn root_name(&self) -> String {
        fs::root_stem(&self.source)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type Sut = Module;

    #[test]
    fn derives_file_names() {
        let sut = Sut::new("src/game");

        assert_eq!("src/game", sut.orig_name());
        assert_eq!(Path::new("src/game.t"), sut.source());
        assert_eq!(Path::new("src/game.t3s"), sut.symbol());
        assert_eq!(Path::new("src/game.t3o"), sut.object());
        assert_eq!("game", sut.root_name());
    }

    #[test]
    fn keeps_existing_source_extension() {
        let sut = Sut::new("util.tc");

        assert_eq!(Path::new("util.tc"), sut.source());
        assert_eq!(Path::new("util.t3o"), sut.object());
    }

    #[test]
    fn library_membership() {
        let mut sut = Sut::new("lib/x");
        assert_eq!(SourceType::Normal, sut.source_type());
        assert_eq!(None, sut.from_lib());

        sut.set_from_lib("lib/adv.tl", "ext/");
        sut.set_url("ext/x");

        assert_eq!(SourceType::UserLib, sut.source_type());
        assert_eq!(Some(Path::new("lib/adv.tl")), sut.from_lib());
        assert_eq!(Some("ext/"), sut.lib_url());
        assert_eq!("ext/x", sut.url());
    }
}
