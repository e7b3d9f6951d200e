// Tests for the make driver
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
use crate::diagnose::{ConsoleReporter, Message};
use crate::image::{ImageWriter, CRC_OFS};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Toolchain that treats the contents of each file as its own output.
///
/// A source containing `ERROR` produces a source error.
#[derive(Default)]
struct MockToolchain {
    exported: Vec<PathBuf>,
    compiled: Vec<PathBuf>,
    seen_symbols: usize,
    links: usize,
    preinits: usize,
}

impl MockToolchain {
    fn read(&self, unit: &CompileUnit, reporter: &mut dyn Reporter) -> Vec<u8> {
        let text = std::fs::read(unit.source).unwrap_or_default();

        if String::from_utf8_lossy(&text).contains("ERROR") {
            reporter.report(&Message::error(None, "bad source"));
        }

        text
    }
}

impl Toolchain for MockToolchain {
    fn preprocess(
        &mut self,
        unit: &CompileUnit,
        out: &mut dyn Write,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<PathBuf>> {
        out.write_all(&self.read(unit, reporter))?;
        Ok(vec![unit.source.with_extension("h")])
    }

    fn export_symbols(
        &mut self,
        unit: &CompileUnit,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Exported> {
        self.exported.push(unit.source.to_path_buf());

        Ok(Exported {
            included: vec![],
            payload: self.read(unit, reporter),
        })
    }

    fn compile(
        &mut self,
        unit: &CompileUnit,
        symbols: &[SymbolFile],
        _strings: Option<&mut dyn Write>,
        reporter: &mut dyn Reporter,
    ) -> io::Result<Vec<u8>> {
        self.compiled.push(unit.source.to_path_buf());
        self.seen_symbols = symbols.len();

        Ok(self.read(unit, reporter))
    }

    fn link(
        &mut self,
        objects: &[PathBuf],
        out: &mut dyn Write,
        opts: LinkOptions,
        _reporter: &mut dyn Reporter,
    ) -> io::Result<()> {
        self.links += 1;

        let mut code = Vec::new();
        for obj in objects {
            code.extend(std::fs::read(obj)?);
        }

        let mut img = ImageWriter::new(out, opts.crc, "test")?;
        img.write_block(b"CODE", 0, &code)?;
        img.finish().map(|_| ())
    }

    fn preinit(
        &mut self,
        input: &[u8],
        out: &mut dyn Write,
        _reporter: &mut dyn Reporter,
    ) -> io::Result<()> {
        self.preinits += 1;
        out.write_all(input)
    }
}

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(sources: &[(&str, &str)]) -> Self {
        let sut = Self {
            dir: tempfile::tempdir().unwrap(),
        };

        for (name, text) in sources {
            sut.write(name, text);
        }

        sut
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    /// Move the modification time of `name` into the future,
    ///   as if it were edited after the last build.
    fn touch(&self, name: &str) {
        let later = SystemTime::now() + Duration::from_secs(60);

        std::fs::File::options()
            .write(true)
            .open(self.path(name))
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    fn make(&self, modules: &[&str]) -> Make {
        let mut make = Make::new();

        for name in modules {
            make.add_module(Module::new(self.path(name)));
        }

        make.set_image_file(self.path("game.t3"));
        make.set_preinit(false);
        make
    }
}

struct Run {
    result: Result<(), MakeError>,
    status: String,
    messages: String,
}

fn run(make: &mut Make, tc: &mut MockToolchain) -> Run {
    let mut reporter = ConsoleReporter::new(Vec::new(), Default::default());
    let mut status = Status::new(Vec::new(), Default::default());

    let result = make.build(tc, &mut reporter, &mut status);

    Run {
        result,
        status: String::from_utf8(status.into_inner()).unwrap(),
        messages: String::from_utf8(reporter.into_inner()).unwrap(),
    }
}

fn crc_bytes(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()[CRC_OFS..CRC_OFS + 4].to_vec()
}

#[test]
fn builds_everything_then_nothing() {
    let p = Project::new(&[("a.t", "A"), ("b.t", "B")]);
    let mut tc = MockToolchain::default();

    let first = run(&mut p.make(&["a", "b"]), &mut tc);
    assert!(first.result.is_ok(), "{}", first.messages);

    let a = p.path("a.t").to_string_lossy().into_owned();
    assert!(first.status.starts_with("Files to build: 5\n"));
    assert!(first.status.contains(&format!("symbol_export {} -> ", a)));
    assert!(first.status.contains(&format!("compile {} -> ", a)));
    assert!(first.status.contains("link -> "));

    assert_eq!(2, tc.seen_symbols);
    assert_eq!(1, tc.links);
    assert!(p.path("a.t3s").exists());
    assert!(p.path("b.t3o").exists());
    assert!(p.path("game.t3").exists());

    let mut tc = MockToolchain::default();
    let second = run(&mut p.make(&["a", "b"]), &mut tc);

    assert!(second.result.is_ok());
    assert_eq!("", second.status);
    assert!(tc.exported.is_empty());
    assert!(tc.compiled.is_empty());
    assert_eq!(0, tc.links);
}

#[test]
fn symbol_file_carries_fingerprint() {
    let p = Project::new(&[("a.t", "payload")]);
    let mut make = p.make(&["a"]);
    make.def_pp_sym("X", None);

    assert!(run(&mut make, &mut MockToolchain::default()).result.is_ok());

    let incs: [PathBuf; 0] = [];
    let defs = [PpDef::define("X", "1")];
    let mut expected = Vec::new();
    BuildConfig::new(false, &defs, &incs)
        .write(&mut expected, &[])
        .unwrap();
    expected.extend_from_slice(b"payload");

    assert_eq!(expected, std::fs::read(p.path("a.t3s")).unwrap());
}

#[test]
fn edited_source_recompiles_all_objects() {
    let p = Project::new(&[("a.t", "A"), ("b.t", "B")]);
    run(&mut p.make(&["a", "b"]), &mut MockToolchain::default());

    p.touch("a.t");

    let mut tc = MockToolchain::default();
    let out = run(&mut p.make(&["a", "b"]), &mut tc);

    assert!(out.result.is_ok());
    assert_eq!(vec![p.path("a.t")], tc.exported);
    assert_eq!(vec![p.path("a.t"), p.path("b.t")], tc.compiled);
    assert_eq!(1, tc.links);
}

#[test]
fn reordered_modules_relink() {
    let p = Project::new(&[("a.t", "A"), ("b.t", "B"), ("c.t", "C")]);
    run(&mut p.make(&["a", "b", "c"]), &mut MockToolchain::default());
    let before = crc_bytes(&p.path("game.t3"));

    let mut tc = MockToolchain::default();
    let out = run(&mut p.make(&["a", "c", "b"]), &mut tc);

    assert!(out.result.is_ok());
    assert!(tc.compiled.is_empty());
    assert_eq!(1, tc.links);
    assert!(out.status.starts_with("Files to build: 1\n"));
    assert_ne!(before, crc_bytes(&p.path("game.t3")));
}

#[test]
fn changed_define_reexports_symbols() {
    let p = Project::new(&[("a.t", "A")]);
    run(&mut p.make(&["a"]), &mut MockToolchain::default());

    let mut make = p.make(&["a"]);
    make.def_pp_sym("EXTRA", Some("1"));

    let mut tc = MockToolchain::default();
    assert!(run(&mut make, &mut tc).result.is_ok());
    assert_eq!(vec![p.path("a.t")], tc.exported);

    // same configuration again is current
    let mut make = p.make(&["a"]);
    make.def_pp_sym("EXTRA", Some("1"));

    let mut tc = MockToolchain::default();
    assert!(run(&mut make, &mut tc).result.is_ok());
    assert!(tc.exported.is_empty());
}

#[test]
fn forced_build_rebuilds_everything() {
    let p = Project::new(&[("a.t", "A")]);
    run(&mut p.make(&["a"]), &mut MockToolchain::default());

    let mut make = p.make(&["a"]);
    make.set_force_build(true);

    let mut tc = MockToolchain::default();
    let out = run(&mut make, &mut tc);

    assert!(out.status.starts_with("Files to build: 3\n"));
    assert_eq!(1, tc.exported.len());
    assert_eq!(1, tc.compiled.len());
}

#[test]
fn module_root_names_must_be_unique() {
    let p = Project::new(&[]);
    std::fs::create_dir(p.path("x")).unwrap();
    std::fs::create_dir(p.path("y")).unwrap();

    let mut make = p.make(&["x/util", "y/UTIL"]);

    match run(&mut make, &mut MockToolchain::default()).result {
        Err(e @ MakeError::Collision { library: false, .. }) => {
            assert_eq!(Some(10607), e.code());
            assert!(e.to_string().contains("y/UTIL"), "{}", e);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn excluded_modules_do_not_collide() {
    let p = Project::new(&[("a.t", "A")]);
    let mut make = p.make(&["a", "a"]);
    make.modules_mut()[1].set_excluded(true);

    assert!(run(&mut make, &mut MockToolchain::default()).result.is_ok());
}

#[test]
fn source_error_stops_build_without_output() {
    let p = Project::new(&[("a.t", "A"), ("b.t", "ERROR")]);
    let mut tc = MockToolchain::default();
    let out = run(&mut p.make(&["a", "b"]), &mut tc);

    assert!(matches!(out.result, Err(MakeError::Aborted)));
    assert!(out.messages.contains("bad source"));
    assert!(p.path("a.t3s").exists());
    assert!(!p.path("b.t3s").exists());
    assert!(tc.compiled.is_empty());
    assert!(!p.path("game.t3").exists());
}

#[test]
fn warnings_as_errors_stop_build() {
    let p = Project::new(&[("a.t", "A")]);
    let mut opts = crate::diagnose::ReportOptions::default();
    opts.warnings_as_errors = true;

    let mut reporter = ConsoleReporter::new(Vec::new(), opts);
    reporter.report(&Message::warning(None, 10001, "early warning"));

    let mut status = Status::new(Vec::new(), Default::default());
    let result = p
        .make(&["a"])
        .build(&mut MockToolchain::default(), &mut reporter, &mut status);

    assert!(matches!(result, Err(MakeError::Aborted)));
}

#[test]
fn clean_deletes_derived_files() {
    let p = Project::new(&[("a.t", "A")]);
    run(&mut p.make(&["a"]), &mut MockToolchain::default());

    let mut make = p.make(&["a"]);
    make.set_clean_mode(true);
    let out = run(&mut make, &mut MockToolchain::default());

    assert!(out.result.is_ok());
    assert!(out.status.contains("deleting symbol file"));
    assert!(out.status.contains("deleting object file"));
    assert!(out.status.contains("deleting image file"));
    assert!(p.path("a.t").exists());
    assert!(!p.path("a.t3s").exists());
    assert!(!p.path("a.t3o").exists());
    assert!(!p.path("game.t3").exists());
}

#[test]
fn preinit_goes_through_intermediate_file() {
    let p = Project::new(&[("a.t", "A")]);
    let mut make = p.make(&["a"]);
    make.set_preinit(true);

    let mut tc = MockToolchain::default();
    let out = run(&mut make, &mut tc);

    assert!(out.result.is_ok());
    assert!(out.status.starts_with("Files to build: 4\n"));
    assert!(out.status.contains("game.t3p\n"));
    assert!(out.status.contains("preinit -> "));
    assert_eq!(1, tc.preinits);
    assert!(p.path("game.t3").exists());
    assert!(!p.path("game.t3p").exists());
}

#[test]
fn preinit_defaults_off_when_debugging() {
    let mut sut = Make::new();
    assert!(sut.runs_preinit());

    sut.set_debug(true);
    assert!(!sut.runs_preinit());

    sut.set_preinit(true);
    assert!(sut.runs_preinit());
}

#[test]
fn resources_are_added_after_link() {
    let p = Project::new(&[("a.t", "A"), ("logo.png", "PNG")]);
    let mut make = p.make(&["a"]);
    make.add_resource(Resource {
        path: p.path("logo.png"),
        name: "logo.png".into(),
    });

    let out = run(&mut make, &mut MockToolchain::default());

    assert!(out.result.is_ok());
    assert!(out.status.contains("add_resources -> "));

    let img = std::fs::read(p.path("game.t3")).unwrap();
    assert!(img.windows(4).any(|w| w == b"MRES"));
    assert!(img.ends_with(&[b'E', b'O', b'F', b' ', 0, 0, 0, 0, 0, 0]));
}

#[test]
fn progress_lines() {
    let p = Project::new(&[("a.t", "A")]);
    let mut reporter = ConsoleReporter::new(Vec::new(), Default::default());
    let mut status = Status::new(Vec::new(), Default::default());
    status.set_pct(true);
    status.set_quiet(true);

    p.make(&["a"])
        .build(&mut MockToolchain::default(), &mut reporter, &mut status)
        .unwrap();

    assert_eq!(
        "%PCT:0/3\n%PCT:0/3\n%PCT:1/3\n%PCT:2/3\n",
        String::from_utf8(status.into_inner()).unwrap()
    );
}

#[test]
fn compile_only_skips_link() {
    let p = Project::new(&[("a.t", "A")]);
    let mut make = p.make(&["a"]);
    make.set_do_link(false);

    let mut tc = MockToolchain::default();
    let out = run(&mut make, &mut tc);

    assert!(out.status.starts_with("Files to build: 2\n"));
    assert_eq!(0, tc.links);
    assert!(p.path("a.t3o").exists());
}

#[test]
fn list_includes() {
    let p = Project::new(&[("a.t", "A")]);
    let mut make = p.make(&["a"]);
    make.set_pp_only(true, true);

    let out = run(&mut make, &mut MockToolchain::default());

    assert_eq!(
        format!("#include \"{}\"\n", p.path("a.h").display()),
        out.status
    );
    assert!(!p.path("a.t3s").exists());
}

#[test]
fn preprocess_only_writes_text() {
    let p = Project::new(&[("a.t", "text of a")]);
    let mut make = p.make(&["a"]);
    make.set_pp_only(true, false);

    let result = run(&mut make, &mut MockToolchain::default());
    assert_eq!("text of a", result.status);
}

#[test]
fn symbol_and_object_dirs() {
    let p = Project::new(&[("a.t", "A")]);
    let mut make = p.make(&["a"]);
    make.set_symbol_dir(p.path("sym"));
    make.set_object_dir(p.path("obj"));
    make.set_create_dirs(true);

    let out = run(&mut make, &mut MockToolchain::default());

    assert!(out.result.is_ok(), "{}", out.messages);
    assert!(out.status.contains("creating output directory"));
    assert!(p.path("sym/a.t3s").exists());
    assert!(p.path("obj/a.t3o").exists());
}

#[test]
fn missing_image_name_is_config_error() {
    let mut make = Make::new();
    make.add_module(Module::new("a"));

    assert!(matches!(
        run(&mut make, &mut MockToolchain::default()).result,
        Err(MakeError::Config(_))
    ));
}

#[test]
fn source_found_on_source_path() {
    let p = Project::new(&[]);
    std::fs::create_dir(p.path("src")).unwrap();
    p.write("src/game.t", "");

    let mut sut = Make::new();
    sut.add_source_path(p.path("src"));

    let module = Module::new("game");
    assert_eq!(p.path("src/game.t"), sut.source_file(&module));

    let missing = Module::new("nowhere");
    assert_eq!(Path::new("nowhere.t"), sut.source_file(&missing));
}

#[test]
fn user_paths_precede_system_paths() {
    let mut sut = Make::new();

    sut.add_sys_include_path("/sys");
    sut.add_include_path("one");
    sut.maybe_add_include_path("two");
    sut.maybe_add_include_path("one");

    let expected: Vec<PathBuf> =
        vec!["one".into(), "two".into(), "/sys".into()];
    assert_eq!(&expected[..], sut.include_paths());
}

#[test]
fn last_pp_definition_wins() {
    let mut sut = Make::new();

    sut.def_pp_sym("A", None);
    assert_eq!(Some("1"), sut.look_up_pp_sym("A"));

    sut.def_pp_sym("A", Some("two"));
    assert_eq!(Some("two"), sut.look_up_pp_sym("A"));

    sut.undef_pp_sym("A");
    assert_eq!(None, sut.look_up_pp_sym("A"));
    assert_eq!(None, sut.look_up_pp_sym("B"));
}

#[test]
fn predefined_symbols_precede_user_symbols() {
    let mut sut = Make::new();
    sut.set_debug(true);
    sut.def_pp_sym("USER", None);

    let defs = sut.predefined();

    assert_eq!(PpDef::define("__DEBUG", "1"), defs[0]);
    assert!(defs.contains(&PpDef::define("__TADS3", "1")));
    assert_eq!(Some(&PpDef::define("USER", "1")), defs.last());
}

#[test]
fn library_members_and_exclusions() {
    let p = Project::new(&[
        ("x.t", "X"),
        ("y.t", "Y"),
        ("L.tl", "name: test\nsource: x\nsource: y\nnodef\n"),
    ]);

    let mut sut = Make::new();
    let mut reporter = ConsoleReporter::new(Vec::new(), Default::default());

    let nodef = sut
        .add_library(&p.path("L.tl"), &["X".into()], &mut reporter)
        .unwrap();

    assert!(nodef);
    assert_eq!(2, sut.modules().len());

    let [x, y] = sut.modules() else {
        panic!("expected two modules");
    };

    assert!(x.is_excluded());
    assert!(!y.is_excluded());
    assert_eq!("y", y.url());
    assert_eq!(SourceType::UserLib, y.source_type());
    assert_eq!(Some(p.path("L.tl").as_path()), y.from_lib());
    assert_eq!(p.path("y.t"), y.source());
    assert_eq!(&[p.dir.path().to_path_buf()][..], sut.include_paths());
}

#[test]
fn nested_library_urls() {
    let p = Project::new(&[
        ("top.tl", "library: sub\n"),
        ("sub.tl", "source: m\n"),
    ]);

    let mut sut = Make::new();
    let mut reporter = ConsoleReporter::new(Vec::new(), Default::default());

    assert!(!sut.add_library(&p.path("top.tl"), &[], &mut reporter).unwrap());
    assert_eq!("sub/m", sut.modules()[0].url());
    assert_eq!(Some("sub/"), sut.modules()[0].lib_url());
}

#[test]
fn library_errors_are_reported() {
    let p = Project::new(&[("bad.tl", "bogus line\n")]);

    let mut sut = Make::new();
    let mut reporter = ConsoleReporter::new(Vec::new(), Default::default());

    let result = sut.add_library(&p.path("bad.tl"), &[], &mut reporter);

    match result {
        Err(e @ MakeError::Library { errors: 1, .. }) => {
            assert!(e.is_reported())
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(1, reporter.error_count());
}

#[test]
fn module_list_crc_depends_on_order() {
    let ab = module_list_crc([Path::new("a.t"), Path::new("b.t")]);
    let ba = module_list_crc([Path::new("b.t"), Path::new("a.t")]);

    assert_ne!(ab, ba);
    assert_eq!(ab, module_list_crc([Path::new("a.t"), Path::new("b.t")]));
}
