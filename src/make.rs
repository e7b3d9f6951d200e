// Make driver
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

//! Make driver.
//!
//! [`Make`] turns a list of [`Module`]s into an image file,
//!   recompiling only what is out of date.
//! Each module has three files:
//!   its source (`.t`),
//!   its symbol file (`.t3s`),
//!     which exports the names the module defines to every other module,
//!   and its object file (`.t3o`).
//! The dependencies between those files and the image are described in
//!   [`graph`];
//!     a symbol file is also out of date if it was produced under a
//!     different build configuration
//!       (see [`config`]).
//!
//! A build proceeds in passes:
//!
//!   1. Module root names are checked for collisions,
//!        since derived files of all modules may share a directory.
//!   2. The build is planned,
//!        out-of-date derived files are deleted,
//!        and the number of steps is reported.
//!   3. Symbol files are exported for every module that needs it.
//!   4. Object files are compiled for every module that needs it,
//!        each with access to the symbols of all modules.
//!   5. The object files are linked into the image,
//!        optionally by way of an intermediate file that is run through
//!        preinitialization.
//!   6. Resources are added to the image.
//!
//! A pass that produces errors ends the build;
//!   the output file of the failing step is deleted so that a later
//!   build cannot mistake it for current output.
//!
//! The compiler itself is reached through the [`Toolchain`] trait.
//! Diagnostics go to a [`Reporter`] and progress to a [`Status`].

pub mod config;
pub mod graph;
pub mod module;
pub mod status;

pub use config::PpDef;
pub use module::{Module, SourceType};
pub use status::Status;

use crate::diagnose::{Diagnostic, Reporter};
use crate::fs;
use crate::global;
use crate::image::{self, Resource};
use crate::library::{self, LibEntry};
use config::BuildConfig;
use graph::{DepGraph, ModuleFiles, Target};
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the operating system as seen by `__TADS_SYS_*`.
const SYSTEM_NAME: &str = if cfg!(windows) { "WIN32" } else { "UNIX" };

/// Version of the macro format recorded for preinit.
const MACRO_FORMAT_VERSION: u32 = 1;

/// What the compiler needs to know to process one module.
#[derive(Debug, Clone, Copy)]
pub struct CompileUnit<'a> {
    pub module: &'a Module,

    /// Resolved source file.
    pub source: &'a Path,

    pub include_paths: &'a [PathBuf],

    /// Predefined symbols followed by the user's definitions,
    ///   in the order they take effect.
    pub defines: &'a [PpDef],

    pub debug: bool,

    /// Source character set,
    ///   if other than the default.
    pub charset: Option<&'a str>,

    /// Generate a source text group object (`-Gstg`).
    pub source_text_group: bool,
}

/// Result of exporting the symbols of a module.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Exported {
    /// Files included while reading the source,
    ///   not counting the source itself.
    pub included: Vec<PathBuf>,

    /// Symbol file content following the configuration block.
    pub payload: Vec<u8>,
}

/// Symbols exported by one module,
///   as made available when compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFile {
    pub path: PathBuf,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Module-list CRC recorded in the image signature.
    pub crc: u32,

    pub debug: bool,
}

/// The compiler proper.
///
/// Errors in the program being compiled are reported to `reporter`;
///   the driver stops after any step that leaves errors behind.
/// An [`io::Error`] is reserved for failure of the output stream
///   itself.
pub trait Toolchain {
    /// Write the preprocessed text of a module to `out`,
    ///   returning the files it included.
    fn preprocess(
        &mut self,
        unit: &CompileUnit,
        out: &mut dyn Write,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<PathBuf>>;

    fn export_symbols(
        &mut self,
        unit: &CompileUnit,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Exported>;

    /// Produce the object file for a module.
    ///
    /// `symbols` holds the symbol files of every module in the build,
    ///   including this one.
    /// Strings encountered are listed in `strings` when present.
    fn compile(
        &mut self,
        unit: &CompileUnit,
        symbols: &[SymbolFile],
        strings: Option<&mut dyn Write>,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<u8>>;

    /// Link the object files into an image written to `out`.
    fn link(
        &mut self,
        objects: &[PathBuf],
        out: &mut dyn Write,
        opts: LinkOptions,
        reporter: &mut dyn Reporter,
    ) -> io::Result<()>;

    /// Run preinitialization over the linked image `input`,
    ///   writing the final image to `out`.
    fn preinit(
        &mut self,
        input: &[u8],
        out: &mut dyn Write,
        reporter: &mut dyn Reporter,
    ) -> io::Result<()>;
}

/// Ordered list of directories with a tail of system entries.
///
/// User entries are always searched before system entries regardless of
///   the order in which they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    paths: Vec<PathBuf>,
    sys_count: usize,
}

impl SearchPath {
    pub fn add<P: Into<PathBuf>>(&mut self, path: P) {
        let at = self.paths.len() - self.sys_count;
        self.paths.insert(at, path.into());
    }

    /// Add `path` unless it is already present.
    pub fn maybe_add<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();

        if !self.paths.contains(&path) {
            self.add(path);
        }
    }

    pub fn add_sys<P: Into<PathBuf>>(&mut self, path: P) {
        self.paths.push(path.into());
        self.sys_count += 1;
    }

    pub fn maybe_add_sys<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();

        if !self.paths.contains(&path) {
            self.add_sys(path);
        }
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Build configuration and module list.
#[derive(Debug, Default)]
pub struct Make {
    modules: Vec<Module>,
    include_paths: SearchPath,
    source_paths: SearchPath,
    defs: Vec<PpDef>,
    resources: Vec<Resource>,

    image: Option<PathBuf>,
    symdir: Option<PathBuf>,
    objdir: Option<PathBuf>,
    string_file: Option<PathBuf>,
    charset: Option<String>,

    debug: bool,

    /// Run preinit;
    ///   [`None`] runs it unless debugging.
    preinit: Option<bool>,

    /// Link after compiling (unset by `-c`).
    no_link: bool,

    force_build: bool,
    force_link: bool,
    create_dirs: bool,
    clean: bool,
    pp_only: bool,
    list_includes: bool,
    source_text_group: bool,
}

impl Make {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_module(&mut self, module: Module) {
        self.modules.push(module);
    }

    /// Add a module ahead of all others.
    pub fn add_module_first(&mut self, module: Module) {
        self.modules.insert(0, module);
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut [Module] {
        &mut self.modules
    }

    pub fn add_include_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.include_paths.add(path)
    }

    pub fn maybe_add_include_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.include_paths.maybe_add(path)
    }

    pub fn add_sys_include_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.include_paths.add_sys(path)
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        self.include_paths.as_slice()
    }

    pub fn add_source_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.source_paths.add(path)
    }

    pub fn maybe_add_source_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.source_paths.maybe_add(path)
    }

    pub fn add_sys_source_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.source_paths.add_sys(path)
    }

    pub fn maybe_add_sys_source_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.source_paths.maybe_add_sys(path)
    }

    pub fn source_paths(&self) -> &[PathBuf] {
        self.source_paths.as_slice()
    }

    /// Define a preprocessor symbol,
    ///   expanding to `1` if no expansion is given.
    pub fn def_pp_sym(&mut self, sym: &str, expan: Option<&str>) {
        self.defs.push(PpDef::define(sym, expan.unwrap_or("1")));
    }

    pub fn undef_pp_sym(&mut self, sym: &str) {
        self.defs.push(PpDef::undefine(sym));
    }

    /// Expansion of a symbol defined on the command line.
    ///
    /// The last definition or un-definition of `sym` wins.
    pub fn look_up_pp_sym(&self, sym: &str) -> Option<&str> {
        self.defs
            .iter()
            .rev()
            .find(|def| def.sym == sym)
            .and_then(|def| def.expan.as_deref())
    }

    pub fn pp_defs(&self) -> &[PpDef] {
        &self.defs
    }

    pub fn add_resource(&mut self, res: Resource) {
        self.resources.push(res);
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn set_image_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.image = Some(path.into());
    }

    pub fn image_file(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn set_symbol_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.symdir = Some(dir.into());
    }

    pub fn set_object_dir<P: Into<PathBuf>>(&mut self, dir: P) {
        self.objdir = Some(dir.into());
    }

    pub fn set_string_file<P: Into<PathBuf>>(&mut self, path: P) {
        self.string_file = Some(path.into());
    }

    pub fn set_source_charset<S: Into<String>>(&mut self, charset: S) {
        self.charset = Some(charset.into());
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn set_preinit(&mut self, preinit: bool) {
        self.preinit = Some(preinit);
    }

    pub fn runs_preinit(&self) -> bool {
        self.preinit.unwrap_or(!self.debug)
    }

    pub fn set_do_link(&mut self, link: bool) {
        self.no_link = !link;
    }

    pub fn set_force_build(&mut self, force: bool) {
        self.force_build = force;
    }

    pub fn set_force_link(&mut self, force: bool) {
        self.force_link = force;
    }

    pub fn set_create_dirs(&mut self, create: bool) {
        self.create_dirs = create;
    }

    pub fn set_clean_mode(&mut self, clean: bool) {
        self.clean = clean;
    }

    /// Preprocess only,
    ///   listing included files rather than their text if `list_includes`.
    pub fn set_pp_only(&mut self, pp_only: bool, list_includes: bool) {
        self.pp_only = pp_only;
        self.list_includes = list_includes;
    }

    pub fn set_source_text_group(&mut self, stg: bool) {
        self.source_text_group = stg;
    }

    /// Add the members of the library at `path`,
    ///   excluding those whose URL matches an entry of `exclude`.
    ///
    /// Libraries named by the library are expanded recursively.
    /// Returns whether any of the libraries asked that the default modules
    ///   be omitted.
    pub fn add_library(
        &mut self,
        path: &Path,
        exclude: &[String],
        reporter: &mut dyn Reporter,
    ) -> Result<bool, MakeError> {
        let first = self.modules.len();
        let nodef = self.expand_library(path, "", reporter)?;

        for url in exclude {
            match self.modules[first..]
                .iter_mut()
                .find(|m| m.url().eq_ignore_ascii_case(url))
            {
                Some(module) => module.set_excluded(true),
                None => warn!(
                    library = %path.display(),
                    url = %url,
                    "no library member to exclude"
                ),
            }
        }

        Ok(nodef)
    }

    fn expand_library(
        &mut self,
        path: &Path,
        url_prefix: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<bool, MakeError> {
        let lib = library::parse_file(path, |sym| {
            self.look_up_pp_sym(sym).map(str::to_string)
        });

        lib.errors.iter().for_each(|e| reporter.report(e));

        if lib.error_count() > 0 {
            return Err(MakeError::Library {
                path: path.to_path_buf(),
                errors: lib.error_count(),
            });
        }

        let dir = fs::dir_of(path);
        if !dir.as_os_str().is_empty() {
            self.maybe_add_include_path(dir);
        }

        let mut nodef = lib.nodef;

        for entry in lib.entries {
            match entry {
                LibEntry::Source { value, path: src } => {
                    let mut module = Module::new(&src);
                    module.set_url(format!("{}{}", url_prefix, value));
                    module.set_orig_name(value);
                    module.set_from_lib(path, url_prefix);

                    self.modules.push(module);
                }

                LibEntry::Library { value, path: sub } => {
                    let prefix = format!("{}{}/", url_prefix, value);
                    let sub = fs::default_ext(sub, "tl");

                    nodef |= self.expand_library(&sub, &prefix, reporter)?;
                }

                LibEntry::Resource { value, path: res } => {
                    self.resources.push(Resource {
                        path: res,
                        name: value,
                    });
                }
            }
        }

        debug!(
            library = %path.display(),
            modules = self.modules.len(),
            nodef,
            "expanded library"
        );

        Ok(nodef)
    }

    /// Source file of a module.
    ///
    /// Absolute names are used as given;
    ///   otherwise the name is used if the file exists,
    ///   and failing that each source path is searched in order.
    pub fn source_file(&self, module: &Module) -> PathBuf {
        let search = module.search_source();

        if search.is_absolute() || fs::exists(module.source()) {
            return module.source().to_path_buf();
        }

        self.source_paths
            .as_slice()
            .iter()
            .map(|dir| dir.join(search))
            .find(|path| fs::exists(path))
            .unwrap_or_else(|| module.source().to_path_buf())
    }

    pub fn symbol_file(&self, module: &Module) -> PathBuf {
        in_dir(self.symdir.as_deref(), module.symbol())
    }

    pub fn object_file(&self, module: &Module) -> PathBuf {
        in_dir(self.objdir.as_deref(), module.object())
    }

    fn active(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(|m| !m.is_excluded())
    }

    /// Symbols defined before any of the user's definitions.
    fn predefined(&self) -> Vec<PpDef> {
        let mut defs = Vec::new();

        if self.debug {
            defs.push(PpDef::define("__DEBUG", "1"));
        }

        let [major, minor, ..] = global::COMPILER_VERSION;

        defs.extend([
            PpDef::define(format!("__TADS_SYS_{}", SYSTEM_NAME), "1"),
            PpDef::define("__TADS_SYSTEM_NAME", format!("'{}'", SYSTEM_NAME)),
            PpDef::define("__TADS_VERSION_MAJOR", major.to_string()),
            PpDef::define("__TADS_VERSION_MINOR", minor.to_string()),
            PpDef::define(
                "__TADS_MACRO_FORMAT_VERSION",
                MACRO_FORMAT_VERSION.to_string(),
            ),
            PpDef::define("__TADS3", "1"),
        ]);

        defs.extend(self.defs.iter().cloned());
        defs
    }

    fn unit<'a>(
        &'a self,
        module: &'a Module,
        source: &'a Path,
        defines: &'a [PpDef],
    ) -> CompileUnit<'a> {
        CompileUnit {
            module,
            source,
            include_paths: self.include_paths.as_slice(),
            defines,
            debug: self.debug,
            charset: self.charset.as_deref(),
            source_text_group: self.source_text_group,
        }
    }

    /// Run the build.
    ///
    /// Returns [`MakeError::Aborted`] if the build stopped because of
    ///   errors already given to `reporter`.
    pub fn build<T, W>(
        &mut self,
        tc: &mut T,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
    ) -> Result<(), MakeError>
    where
        T: Toolchain + ?Sized,
        W: Write,
    {
        self.check_collisions()?;

        if self.pp_only {
            return self.preprocess(tc, reporter, status);
        }

        if self.clean {
            return self.clean(reporter, status);
        }

        if self.create_dirs {
            self.create_dirs(reporter, status)?;
        }

        let plan = self.plan(status)?;

        for (i, module) in self.modules.iter_mut().enumerate() {
            module.set_seqno(i + 1);
        }

        let steps = plan.step_count();
        let mut step = Step::new(steps);

        status.pct(0, steps).map_err(output)?;
        if steps != 0 {
            status
                .line(format_args!("Files to build: {}", steps))
                .map_err(output)?;
        }

        self.export_pass(tc, reporter, status, &mut step)?;
        self.compile_pass(tc, reporter, status, &mut step)?;

        if let Some(image) = &plan.link {
            self.link(tc, reporter, status, &mut step, image, plan.crc)?;
        }

        Ok(())
    }

    /// Root names of modules must be unique,
    ///   case-insensitively.
    fn check_collisions(&self) -> Result<(), MakeError> {
        let active: Vec<_> = self.active().collect();

        for (i, module) in active.iter().enumerate() {
            let root = module.root_name();

            if let Some(prev) = active[..i]
                .iter()
                .find(|prev| prev.root_name().eq_ignore_ascii_case(&root))
            {
                return Err(MakeError::Collision {
                    module: describe(module),
                    existing: describe(prev),
                    library: module.from_lib().is_some()
                        || prev.from_lib().is_some(),
                });
            }
        }

        Ok(())
    }

    fn preprocess<T, W>(
        &self,
        tc: &mut T,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
    ) -> Result<(), MakeError>
    where
        T: Toolchain + ?Sized,
        W: Write,
    {
        let defines = self.predefined();

        for module in self.active() {
            let source = self.source_file(module);
            let unit = self.unit(module, &source, &defines);

            if self.list_includes {
                let included = tc
                    .preprocess(&unit, &mut io::sink(), reporter)
                    .map_err(output)?;

                for path in included {
                    writeln!(status.raw(), "#include \"{}\"", path.display())
                        .map_err(output)?;
                }
            } else {
                tc.preprocess(&unit, status.raw(), reporter)
                    .map_err(output)?;
            }

            if reporter.has_errors() {
                return Err(MakeError::Aborted);
            }
        }

        Ok(())
    }

    /// Delete the derived files of every module and the image.
    fn clean<W: Write>(
        &self,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
    ) -> Result<(), MakeError> {
        let mut doomed = Vec::new();

        for module in self.active() {
            doomed.push(("symbol", self.symbol_file(module)));
            doomed.push(("object", self.object_file(module)));
        }

        if let Some(image) = &self.image {
            doomed.push(("image", image.clone()));
        }

        for (kind, path) in doomed {
            if !fs::exists(&path) {
                continue;
            }

            let name = status.fname(&path);
            status
                .line(format_args!("deleting {} file {}", kind, name))
                .map_err(output)?;

            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "delete failed");
                reporter.report(&MakeError::io(FileOp::Delete, &path, e));
            }
        }

        match reporter.error_count() {
            0 => Ok(()),
            _ => Err(MakeError::Aborted),
        }
    }

    fn create_dirs<W: Write>(
        &self,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
    ) -> Result<(), MakeError> {
        let image_dir = self.image.as_deref().map(fs::dir_of);
        let mut failed = false;

        let dirs = [
            self.symdir.as_deref(),
            self.objdir.as_deref(),
            image_dir.as_deref(),
        ];

        for dir in dirs.into_iter().flatten() {
            if dir.as_os_str().is_empty() || fs::exists(dir) {
                continue;
            }

            status
                .line(format_args!(
                    "creating output directory {}",
                    dir.display()
                ))
                .map_err(output)?;

            if let Err(e) = std::fs::create_dir_all(dir) {
                reporter.report(&MakeError::io(FileOp::CreateDir, dir, e));
                failed = true;
            }
        }

        match failed {
            true => Err(MakeError::Aborted),
            false => Ok(()),
        }
    }

    /// Decide what must be rebuilt and delete the files that will be
    ///   replaced.
    fn plan<W: Write>(
        &mut self,
        status: &mut Status<W>,
    ) -> Result<BuildPlan, MakeError> {
        let active: Vec<usize> = (0..self.modules.len())
            .filter(|i| !self.modules[*i].is_excluded())
            .collect();

        let files: Vec<(PathBuf, PathBuf, PathBuf)> = active
            .iter()
            .map(|i| {
                let m = &self.modules[*i];
                (self.source_file(m), self.symbol_file(m), self.object_file(m))
            })
            .collect();

        let crc =
            module_list_crc(files.iter().map(|(src, _, _)| src.as_path()));

        let image = match (&self.image, self.no_link) {
            (Some(image), false) => Some(image.clone()),
            (None, false) => {
                return Err(MakeError::Config("no image file specified".into()))
            }
            (_, true) => None,
        };

        let resource_paths: Vec<PathBuf> =
            self.resources.iter().map(|r| r.path.clone()).collect();

        let graph_files: Vec<_> = files
            .iter()
            .map(|(source, symbol, object)| ModuleFiles {
                source,
                symbol,
                object,
            })
            .collect();

        let graph = DepGraph::new(
            &graph_files,
            image.as_deref().map(|img| (img, &resource_paths[..])),
        );

        let include_paths = self.include_paths.as_slice().to_vec();
        let config = BuildConfig::new(self.debug, &self.defs, &include_paths);
        let (force_build, force_link) = (self.force_build, self.force_link);

        let plan = graph.plan(|target| match target {
            Target::Symbol(i) => {
                force_build || !symbol_file_current(&files[i].1, &config)
            }
            Target::Object(_) => force_build,
            Target::Image => {
                force_link
                    || image
                        .as_deref()
                        .and_then(image::read_image_crc)
                        .map_or(true, |found| found != crc)
            }
            Target::Source(_) | Target::Resource(_) => false,
        });

        let mut rebuild = 0;

        for (k, i) in active.iter().enumerate() {
            let (sym, obj) = (
                plan.is_dirty(Target::Symbol(k)),
                plan.is_dirty(Target::Object(k)),
            );

            self.modules[*i].set_needs_recompile(sym, obj);

            let (_, symbol, object) = &files[k];

            for (dirty, path) in [(sym, symbol), (obj, object)] {
                if dirty {
                    rebuild += 1;
                    fs::remove_if_exists(path)
                        .map_err(|e| MakeError::io(FileOp::Delete, path, e))?;
                } else {
                    let name = status.fname(path);
                    status
                        .detail(format_args!("{} is up to date", name))
                        .map_err(output)?;
                }
            }
        }

        let link = image.filter(|_| plan.is_dirty(Target::Image));

        debug!(rebuild, link = link.is_some(), crc, "planned build");

        Ok(BuildPlan {
            rebuild,
            link,
            preinit: self.runs_preinit(),
            resources: !self.resources.is_empty(),
            crc,
        })
    }

    fn export_pass<T, W>(
        &self,
        tc: &mut T,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
        step: &mut Step,
    ) -> Result<(), MakeError>
    where
        T: Toolchain + ?Sized,
        W: Write,
    {
        let config = BuildConfig::new(
            self.debug,
            &self.defs,
            self.include_paths.as_slice(),
        );
        let defines = self.predefined();

        for module in self.active().filter(|m| m.needs_sym_recompile()) {
            let source = self.source_file(module);
            let symbol = self.symbol_file(module);

            status
                .step("symbol_export", Some(&source), &symbol)
                .map_err(output)?;
            step.advance(status)?;

            let exported = tc
                .export_symbols(&self.unit(module, &source, &defines), reporter)
                .map_err(output)?;

            if reporter.has_errors() {
                return Err(MakeError::Aborted);
            }

            write_output(&symbol, FileOp::CreateSymbol, |w| {
                config.write(w, &exported.included)?;
                w.write_all(&exported.payload)
            })?;
        }

        Ok(())
    }

    fn compile_pass<T, W>(
        &self,
        tc: &mut T,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
        step: &mut Step,
    ) -> Result<(), MakeError>
    where
        T: Toolchain + ?Sized,
        W: Write,
    {
        let dirty: Vec<_> =
            self.active().filter(|m| m.needs_obj_recompile()).collect();

        if dirty.is_empty() {
            return Ok(());
        }

        let symbols = self
            .active()
            .map(|m| {
                let path = self.symbol_file(m);

                config::read_payload(&path)
                    .map(|payload| SymbolFile {
                        path: path.clone(),
                        payload,
                    })
                    .map_err(|e| MakeError::io(FileOp::OpenSymbol, &path, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut strings = match &self.string_file {
            Some(path) => Some(BufWriter::new(
                std::fs::File::create(path).map_err(|e| {
                    MakeError::io(FileOp::CreateStrings, path, e)
                })?,
            )),
            None => None,
        };

        let defines = self.predefined();

        for module in dirty {
            let source = self.source_file(module);
            let object = self.object_file(module);

            status
                .step("compile", Some(&source), &object)
                .map_err(output)?;
            step.advance(status)?;

            let bytes = tc
                .compile(
                    &self.unit(module, &source, &defines),
                    &symbols,
                    strings.as_mut().map(|w| w as &mut dyn Write),
                    reporter,
                )
                .map_err(output)?;

            if reporter.has_errors() {
                return Err(MakeError::Aborted);
            }

            write_output(&object, FileOp::CreateObject, |w| {
                w.write_all(&bytes)
            })?;
        }

        if let (Some(w), Some(path)) = (strings.as_mut(), &self.string_file) {
            w.flush()
                .map_err(|e| MakeError::io(FileOp::CreateStrings, path, e))?;
        }

        Ok(())
    }

    fn link<T, W>(
        &self,
        tc: &mut T,
        reporter: &mut dyn Reporter,
        status: &mut Status<W>,
        step: &mut Step,
        image: &Path,
        crc: u32,
    ) -> Result<(), MakeError>
    where
        T: Toolchain + ?Sized,
        W: Write,
    {
        let preinit = self.runs_preinit();
        let linked = match preinit {
            true => fs::replace_ext(image, "t3p"),
            false => image.to_path_buf(),
        };

        let objects: Vec<_> =
            self.active().map(|m| self.object_file(m)).collect();
        let opts = LinkOptions {
            crc,
            debug: self.debug,
        };

        status.step("link", None, &linked).map_err(output)?;
        step.advance(status)?;

        write_output(&linked, FileOp::CreateImage, |w| {
            tc.link(&objects, w, opts, reporter)
        })?;

        if reporter.has_errors() {
            fs::remove_if_exists(&linked).map_err(output)?;
            return Err(MakeError::Aborted);
        }

        if preinit {
            step.advance(status)?;
            status.step("preinit", None, image).map_err(output)?;

            let input = std::fs::read(&linked)
                .map_err(|e| MakeError::io(FileOp::OpenImage, &linked, e))?;

            let result = write_output(image, FileOp::CreateImage, |w| {
                tc.preinit(&input, w, reporter)
            });

            fs::remove_if_exists(&linked).map_err(output)?;
            result?;

            if reporter.has_errors() {
                fs::remove_if_exists(image).map_err(output)?;
                return Err(MakeError::Aborted);
            }
        }

        if !self.resources.is_empty() {
            step.advance(status)?;

            let verb = match self.debug {
                true => "add_resource links",
                false => "add_resources",
            };
            status.step(verb, None, image).map_err(output)?;

            if let Err(e) =
                image::append_resources(image, &self.resources, self.debug)
            {
                fs::remove_if_exists(image).map_err(output)?;
                return Err(MakeError::io(FileOp::AddResources, image, e));
            }
        }

        Ok(())
    }
}

/// Work decided by the planning pass.
#[derive(Debug)]
struct BuildPlan {
    /// Number of symbol and object files to rebuild.
    rebuild: usize,

    /// Image to relink,
    ///   if any.
    link: Option<PathBuf>,

    preinit: bool,
    resources: bool,
    crc: u32,
}

impl BuildPlan {
    fn step_count(&self) -> usize {
        match self.link {
            Some(_) => {
                self.rebuild
                    + 1
                    + self.preinit as usize
                    + self.resources as usize
            }
            None => self.rebuild,
        }
    }
}

/// Progress through the steps of a build.
struct Step {
    cur: usize,
    total: usize,
}

impl Step {
    fn new(total: usize) -> Self {
        Self { cur: 0, total }
    }

    /// Report the current step and move to the next.
    fn advance<W: Write>(
        &mut self,
        status: &mut Status<W>,
    ) -> Result<(), MakeError> {
        status.pct(self.cur, self.total).map_err(output)?;
        self.cur += 1;
        Ok(())
    }
}

/// CRC-32 of the list of source files in build order.
///
/// Any change to the list,
///   including its order,
///   changes the CRC and so forces a relink.
pub fn module_list_crc<'a, I>(sources: I) -> u32
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut hasher = crc32fast::Hasher::new();

    for src in sources {
        hasher.update(src.to_string_lossy().as_bytes());
    }

    hasher.finalize()
}

fn symbol_file_current(path: &Path, config: &BuildConfig) -> bool {
    let Some(written) = fs::mtime(path) else {
        return false;
    };

    match std::fs::File::open(path) {
        Ok(file) => config.matches(&mut io::BufReader::new(file), written),
        Err(_) => false,
    }
}

/// Create `path` and fill it using `f`,
///   deleting it again if anything fails.
fn write_output<F>(path: &Path, op: FileOp, f: F) -> Result<(), MakeError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let file = std::fs::File::create(path)
        .map_err(|e| MakeError::io(op, path, e))?;
    let mut w = BufWriter::new(file);

    let result = f(&mut w).and_then(|_| w.flush());

    result.map_err(|e| {
        let _ = std::fs::remove_file(path);
        MakeError::io(FileOp::Write, path, e)
    })
}

fn in_dir(dir: Option<&Path>, file: &Path) -> PathBuf {
    match (dir, file.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => file.to_path_buf(),
    }
}

/// Describe a module for a collision diagnostic.
fn describe(module: &Module) -> String {
    match module.from_lib() {
        Some(lib) => format!(
            "\"{}\" (from library \"{}\")",
            module.orig_name(),
            lib.display()
        ),
        None => format!("\"{}\"", module.orig_name()),
    }
}

fn output(e: io::Error) -> MakeError {
    MakeError::Output(e)
}

/// File operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    CreateSymbol,
    CreateObject,
    CreateImage,
    CreateStrings,
    CreateDir,
    OpenSymbol,
    OpenObject,
    OpenImage,
    Write,
    Delete,
    AddResources,
}

impl FileOp {
    fn code(self) -> Option<u32> {
        match self {
            Self::CreateSymbol => Some(10600),
            Self::CreateObject => Some(10601),
            Self::CreateImage => Some(10602),
            Self::OpenSymbol => Some(10603),
            Self::OpenObject => Some(10604),
            Self::CreateDir => Some(10610),
            _ => None,
        }
    }
}

impl Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::CreateSymbol => write!(f, "unable to create symbol file"),
            Self::CreateObject => write!(f, "unable to create object file"),
            Self::CreateImage => write!(f, "unable to create image file"),
            Self::CreateStrings => write!(f, "unable to create string file"),
            Self::CreateDir => write!(f, "unable to create directory"),
            Self::OpenSymbol => write!(f, "unable to open symbol file"),
            Self::OpenObject => write!(f, "unable to open object file"),
            Self::OpenImage => write!(f, "unable to open image file"),
            Self::Write => write!(f, "error writing file"),
            Self::Delete => write!(f, "cannot delete"),
            Self::AddResources => write!(f, "unable to add resources to"),
        }
    }
}

#[derive(Debug)]
pub enum MakeError {
    Io {
        op: FileOp,
        path: PathBuf,
        source: io::Error,
    },

    /// Two modules share a root name.
    Collision {
        module: String,
        existing: String,

        /// Either module came from a library.
        library: bool,
    },

    /// The build is not fully specified.
    Config(String),

    /// A library had errors,
    ///   each of which has been reported.
    Library { path: PathBuf, errors: usize },

    /// Status or preprocessor output could not be written.
    Output(io::Error),

    /// The build stopped after errors that have been reported.
    Aborted,
}

impl MakeError {
    pub fn io<P: Into<PathBuf>>(
        op: FileOp,
        path: P,
        source: io::Error,
    ) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the details of this error have already been reported,
    ///   leaving nothing to say but the error summary.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::Aborted | Self::Library { .. })
    }
}

impl Display for MakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io { op, path, source } => {
                write!(f, "{} \"{}\" ({})", op, path.display(), source)
            }
            Self::Collision {
                module, existing, ..
            } => write!(
                f,
                "module {} has the same name as existing module {}",
                module, existing
            ),
            Self::Config(msg) => write!(f, "{}", msg),
            Self::Library { path, errors } => write!(
                f,
                "{} error(s) in library \"{}\"",
                errors,
                path.display()
            ),
            Self::Output(e) => write!(f, "error writing output: {}", e),
            Self::Aborted => write!(f, "build stopped due to errors"),
        }
    }
}

impl Error for MakeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Output(source) => Some(source),
            _ => None,
        }
    }
}

impl Diagnostic for MakeError {
    fn code(&self) -> Option<u32> {
        match self {
            Self::Io { op, .. } => op.code(),
            Self::Collision { library: false, .. } => Some(10607),
            Self::Collision { library: true, .. } => Some(10608),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test;
