// TADS 3 build tool
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

//! TADS 3 build tool.
//!
//! `t3make` compiles the modules of a program and links them into an
//!   image,
//!     rebuilding only what changed since the last build
//!       (see [`t3make::make`]).
//!
//! The command line consists of options followed by the items to build:
//!   source modules,
//!   libraries (`.tl`),
//!     each optionally followed by `-x url` to exclude one of its members,
//!   and,
//!     after `-res`,
//!     resources.
//! The same can be read from an options file given with `-f`,
//!   or from the default project file when no module is named;
//!     relative paths in an options file are relative to the directory
//!     containing it.

extern crate t3make;

use getopts::{Fail, Matches, Options};
use std::{
    env,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process,
};
use t3make::{
    diagnose::{
        ConsoleReporter, Message, ReportOptions, Reporter, WarningLevel,
    },
    frontend::Frontend,
    fs::{default_ext, dir_of, exists, replace_ext, resolve},
    global,
    image::Resource,
    make::{Make, Module, Status},
    optfile,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_PROJ_FILE: &str = if cfg!(windows) {
    "makefile.t3m"
} else {
    "Makefile.t3m"
};

/// User library search path,
///   consulted after the paths given on the command line.
const LIB_PATH_VAR: &str = "TADSLIB";

const LOG_VAR: &str = "T3MAKE_LOG";

/// Options that stand alone.
const FLAG_OPTS: &[&str] = &[
    "d", "FC", "Gstg", "a", "al", "c", "clean", "P", "Pi", "pre", "nopre",
    "nobanner", "nodef", "q", "v", "quotefname", "statpct", "test",
    "errnum", "h", "help",
];

/// Options taking a value.
const VALUE_OPTS: &[&str] = &[
    "D", "U", "I", "Fs", "Fy", "Fo", "FI", "FL", "cs", "o", "Os",
    "statprefix", "w", "we", "f",
];

/// Options that may be written with the value glued to the name
///   (`-Ipath`, `-w-15`),
///     longer names ahead of their prefixes.
const GLUED_OPTS: &[&str] = &[
    "Fs", "Fy", "Fo", "FI", "FL", "Os", "cs", "we", "D", "U", "I", "o", "w",
];

/// Arguments that begin the list of items to build.
const ITEM_MARKERS: &[&str] = &["source", "lib", "res"];

/// Item arguments followed by a value.
const ITEM_VALUE_OPTS: &[&str] = &["source", "lib", "x"];

/// Types of commands
enum Command {
    Build(Pass),
    Usage,
}

/// One round of arguments,
///   from the command line or from an options file.
struct Pass {
    matches: Matches,
    items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Source(String),
    Library {
        name: String,
        exclude: Vec<String>,
    },
    Resource {
        name: String,
        alias: Option<String>,
        recurse: bool,
    },
}

/// Settings that are not held by [`Make`].
#[derive(Debug, Default)]
struct Config {
    report: ReportOptions,
    prefix: Option<String>,
    pct: bool,
    quiet: bool,
    verbose: bool,
    nobanner: bool,
    nodef: bool,
    compile_only: bool,
    pp_only: bool,
    list_includes: bool,
    image_set: bool,
    symdir_set: bool,
    objdir_set: bool,
    opt_file: Option<PathBuf>,
    sys_include: Option<PathBuf>,
    sys_lib: Option<PathBuf>,
}

/// Entrypoint for the build tool
pub fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("t3make");
    let opts = get_opts();
    let usage = opts.usage(&format!(
        "Usage: {} [OPTIONS] SOURCE... [-res RESOURCE...]",
        program
    ));

    init_logging();

    if args.len() <= 1 && !exists(DEFAULT_PROJ_FILE) {
        println!("{}", usage);
        process::exit(exitcode::USAGE);
    }

    let code = parse_options(&opts, &args[1..])
        .and_then(|cmd| match cmd {
            Command::Build(pass) => run(&opts, pass),
            Command::Usage => {
                println!("{}", usage);
                Ok(exitcode::OK)
            }
        })
        .unwrap_or_else(|e| {
            eprintln!("{}", e);
            println!("{}", usage);
            exitcode::USAGE
        });

    process::exit(code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_VAR)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn get_opts() -> Options {
    let mut opts = Options::new();
    opts.long_only(true);

    opts.optflag("d", "", "compile for debugging");
    opts.optmulti("D", "", "define preprocessor symbol", "SYM[=VAL]");
    opts.optmulti("U", "", "undefine preprocessor symbol", "SYM");
    opts.optmulti("I", "", "add include directory", "DIR");
    opts.optmulti("", "Fs", "add source directory", "DIR");
    opts.optopt("", "Fy", "set symbol file directory", "DIR");
    opts.optopt("", "Fo", "set object file directory", "DIR");
    opts.optopt("", "FI", "set system include directory", "DIR");
    opts.optopt("", "FL", "set system library directory", "DIR");
    opts.optflag("", "FC", "create output directories");
    opts.optflag("", "Gstg", "generate source text group");
    opts.optflag("a", "", "build all files");
    opts.optflag("", "al", "relink even if the image is current");
    opts.optflag("c", "", "compile only; do not link");
    opts.optflag("", "clean", "delete all derived files");
    opts.optopt("", "cs", "set source character set", "CHARSET");
    opts.optopt("o", "", "set image file name", "FILE");
    opts.optopt("", "Os", "write strings to file", "FILE");
    opts.optflag("P", "", "preprocess only");
    opts.optflag("", "Pi", "list included files only");
    opts.optflag("", "pre", "run preinit");
    opts.optflag("", "nopre", "do not run preinit");
    opts.optflag("", "nobanner", "suppress the banner");
    opts.optflag("", "nodef", "omit the default modules");
    opts.optflag("q", "", "quiet");
    opts.optflag("v", "", "verbose");
    opts.optflag("", "quotefname", "quote filenames in messages");
    opts.optopt("", "statprefix", "prefix status lines", "TEXT");
    opts.optflag("", "statpct", "report percentage complete");
    opts.optflag("", "test", "show filenames without paths");
    opts.optflag("", "errnum", "show error numbers");
    opts.optmulti("w", "", "warning level or suppression", "0|1|2|-N|+N");
    opts.optopt("", "we", "treat warnings as errors", "+|-");
    opts.optopt("f", "", "read options from file", "FILE");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn is_known(name: &str) -> bool {
    FLAG_OPTS.contains(&name)
        || VALUE_OPTS.contains(&name)
        || ITEM_MARKERS.contains(&name)
        || ITEM_VALUE_OPTS.contains(&name)
        || name == "recurse"
        || name == "norecurse"
}

/// Separate option values that are glued to their option names.
fn normalize<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    let mut out = Vec::new();
    let mut value_next = false;

    for arg in args {
        let name = match arg.strip_prefix('-') {
            Some(name) if !value_next => name,
            _ => {
                value_next = false;
                out.push(arg);
                continue;
            }
        };

        if name == "we" {
            out.extend(["-we".to_string(), "+".to_string()]);
        } else if is_known(name) {
            value_next = VALUE_OPTS.contains(&name)
                || ITEM_VALUE_OPTS.contains(&name);
            out.push(arg);
        } else {
            match GLUED_OPTS
                .iter()
                .find(|opt| name.len() > opt.len() && name.starts_with(*opt))
            {
                Some(opt) => {
                    out.push(format!("-{}", opt));
                    out.push(name[opt.len()..].to_string());
                }
                None => out.push(arg),
            }
        }
    }

    out
}

/// Index of the first argument that is not an option or option value.
fn items_start(args: &[String]) -> usize {
    let mut i = 0;

    while let Some(name) = args.get(i).and_then(|arg| arg.strip_prefix('-')) {
        if ITEM_MARKERS.contains(&name) {
            break;
        }

        i += if VALUE_OPTS.contains(&name) { 2 } else { 1 };
    }

    i.min(args.len())
}

/// Option parser
fn parse_options(opts: &Options, args: &[String]) -> Result<Command, Fail> {
    let pass = parse_pass(opts, args)?;

    if pass.matches.opt_present("h") {
        return Ok(Command::Usage);
    }

    Ok(Command::Build(pass))
}

fn parse_pass(opts: &Options, args: &[String]) -> Result<Pass, Fail> {
    let args = normalize(args.iter().cloned());
    let at = items_start(&args);
    let matches = opts.parse(&args[..at])?;

    Ok(Pass {
        matches,
        items: parse_items(&args[at..])?,
    })
}

fn parse_items(args: &[String]) -> Result<Vec<Item>, Fail> {
    let mut items = Vec::new();
    let mut args = args.iter();
    let mut in_res = false;
    let mut recurse = true;

    fn value(
        args: &mut std::slice::Iter<String>,
        opt: &str,
    ) -> Result<String, Fail> {
        args.next()
            .cloned()
            .ok_or_else(|| Fail::ArgumentMissing(opt.to_string()))
    }

    while let Some(arg) = args.next() {
        if in_res {
            match arg.as_str() {
                "-recurse" => recurse = true,
                "-norecurse" => recurse = false,
                opt if opt.starts_with('-') => {
                    return Err(Fail::UnrecognizedOption(opt.to_string()))
                }
                res => {
                    let (name, alias) = match res.split_once('=') {
                        Some((name, alias)) => (name, Some(alias.to_string())),
                        None => (res, None),
                    };

                    items.push(Item::Resource {
                        name: name.to_string(),
                        alias,
                        recurse,
                    });
                }
            }

            continue;
        }

        match arg.as_str() {
            "-res" => in_res = true,
            "-source" => items.push(Item::Source(value(&mut args, "source")?)),
            "-lib" => items.push(Item::Library {
                name: value(&mut args, "lib")?,
                exclude: vec![],
            }),
            "-x" => match items.last_mut() {
                Some(Item::Library { exclude, .. }) => {
                    exclude.push(value(&mut args, "x")?)
                }
                _ => return Err(Fail::UnexpectedArgument("-x".to_string())),
            },
            opt if opt.starts_with('-') => {
                return Err(Fail::UnrecognizedOption(opt.to_string()))
            }
            name if is_library(name) => items.push(Item::Library {
                name: name.to_string(),
                exclude: vec![],
            }),
            name => items.push(Item::Source(name.to_string())),
        }
    }

    Ok(items)
}

fn is_library(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("tl"))
}

/// Apply the options of one pass.
///
/// Paths are taken relative to `base` when given.
fn configure(
    m: &Matches,
    base: Option<&Path>,
    make: &mut Make,
    cfg: &mut Config,
) -> Result<(), Fail> {
    let path = |value: String| -> PathBuf {
        match base {
            Some(base) => resolve(base, value),
            None => value.into(),
        }
    };

    if m.opt_present("d") {
        make.set_debug(true);
    }

    // Definitions and undefinitions take effect in the order given.
    let mut defs: Vec<_> = m
        .opt_strs_pos("D")
        .into_iter()
        .map(|(pos, v)| (pos, true, v))
        .chain(m.opt_strs_pos("U").into_iter().map(|(pos, v)| (pos, false, v)))
        .collect();
    defs.sort_by_key(|(pos, ..)| *pos);

    for (_, define, value) in defs {
        match (define, value.split_once('=')) {
            (true, Some((sym, expan))) => make.def_pp_sym(sym, Some(expan)),
            (true, None) => make.def_pp_sym(&value, None),
            (false, _) => make.undef_pp_sym(&value),
        }
    }

    m.opt_strs("I")
        .into_iter()
        .for_each(|dir| make.add_include_path(path(dir)));
    m.opt_strs("Fs")
        .into_iter()
        .for_each(|dir| make.add_source_path(path(dir)));

    if let Some(dir) = m.opt_str("Fy") {
        make.set_symbol_dir(path(dir));
        cfg.symdir_set = true;
    }

    if let Some(dir) = m.opt_str("Fo") {
        make.set_object_dir(path(dir));
        cfg.objdir_set = true;
    }

    if let Some(dir) = m.opt_str("FI") {
        cfg.sys_include = Some(path(dir));
    }

    if let Some(dir) = m.opt_str("FL") {
        cfg.sys_lib = Some(path(dir));
    }

    if let Some(image) = m.opt_str("o") {
        make.set_image_file(path(image));
        cfg.image_set = true;
    }

    if let Some(file) = m.opt_str("Os") {
        make.set_string_file(path(file));
    }

    if let Some(charset) = m.opt_str("cs") {
        make.set_source_charset(charset);
    }

    if let Some(file) = m.opt_str("f") {
        cfg.opt_file = Some(path(file));
    }

    if let Some(prefix) = m.opt_str("statprefix") {
        cfg.prefix = Some(prefix);
    }

    if m.opt_present("FC") {
        make.set_create_dirs(true);
    }

    if m.opt_present("Gstg") {
        make.set_source_text_group(true);
    }

    if m.opt_present("a") {
        make.set_force_build(true);
    }

    if m.opt_present("al") {
        make.set_force_link(true);
    }

    if m.opt_present("clean") {
        make.set_clean_mode(true);
    }

    match (m.opt_positions("pre").last(), m.opt_positions("nopre").last()) {
        (Some(pre), Some(nopre)) => make.set_preinit(pre > nopre),
        (Some(_), None) => make.set_preinit(true),
        (None, Some(_)) => make.set_preinit(false),
        (None, None) => {}
    }

    if m.opt_present("c") {
        cfg.compile_only = true;
        make.set_do_link(false);
    }

    cfg.pp_only |= m.opt_present("P") || m.opt_present("Pi");
    cfg.list_includes |= m.opt_present("Pi");
    cfg.nobanner |= m.opt_present("nobanner");
    cfg.nodef |= m.opt_present("nodef");
    cfg.quiet |= m.opt_present("q");
    cfg.verbose |= m.opt_present("v");
    cfg.pct |= m.opt_present("statpct");
    cfg.report.filenames.quote |= m.opt_present("quotefname");
    cfg.report.filenames.root_only |= m.opt_present("test");
    cfg.report.show_errnum |= m.opt_present("errnum");

    for level in m.opt_strs("w") {
        warning_option(&level, &mut cfg.report)?;
    }

    if let Some(we) = m.opt_str("we") {
        cfg.report.warnings_as_errors = match we.as_str() {
            "+" => true,
            "-" => false,
            _ => return Err(Fail::UnrecognizedOption(format!("-we{}", we))),
        };
    }

    Ok(())
}

/// Apply `-wN`, `-w-N` or `-w+N`.
fn warning_option(value: &str, report: &mut ReportOptions) -> Result<(), Fail> {
    let bad = || Fail::UnrecognizedOption(format!("-w{}", value));

    match value {
        "0" => report.warning_level = WarningLevel::Silent,
        "1" => report.warning_level = WarningLevel::Standard,
        "2" => report.warning_level = WarningLevel::Pedantic,
        _ => {
            let mut chars = value.chars();
            let sign = chars.next();
            let code = chars.as_str().parse::<u32>().map_err(|_| bad())?;

            match sign {
                Some('-') if report.suppress(code) => {}
                Some('-') => {
                    return Err(Fail::UnexpectedArgument(format!(
                        "too many warnings suppressed (limit {})",
                        global::MAX_SUPPRESSED_WARNINGS
                    )))
                }
                Some('+') => report.unsuppress(code),
                _ => return Err(bad()),
            }
        }
    }

    Ok(())
}

/// Arguments read from an options file and the directory containing it.
fn read_opt_file(path: &Path) -> io::Result<(Vec<String>, PathBuf)> {
    let path = if exists(path) {
        path.to_path_buf()
    } else {
        default_ext(path, "t3m")
    };

    let mut text = String::new();
    File::open(&path)?.read_to_string(&mut text)?;

    debug!(path = %path.display(), "read options file");

    Ok((optfile::tokenize(&text), dir_of(&path)))
}

/// Build according to the command line and any options file.
fn run(opts: &Options, cmdline: Pass) -> Result<i32, Fail> {
    let mut make = Make::new();
    let mut cfg = Config::default();

    configure(&cmdline.matches, None, &mut make, &mut cfg)?;

    let opt_file = cfg.opt_file.clone().or_else(|| {
        Some(PathBuf::from(DEFAULT_PROJ_FILE))
            .filter(|file| cmdline.items.is_empty() && exists(file))
    });

    let mut passes = vec![(cmdline.items, None)];

    if let Some(file) = opt_file {
        let (args, dir) = match read_opt_file(&file) {
            Ok(read) => read,
            Err(e) => {
                println!(
                    "error: unable to read option file \"{}\" ({})",
                    file.display(),
                    e
                );
                return Ok(1);
            }
        };

        let pass = parse_pass(opts, &args)?;
        configure(&pass.matches, Some(&dir), &mut make, &mut cfg)?;
        passes.push((pass.items, Some(dir)));
    }

    if passes.iter().all(|(items, _)| items.is_empty()) {
        return Err(Fail::OptionMissing("SOURCE".to_string()));
    }

    let mut reporter = ConsoleReporter::new(io::stdout(), cfg.report.clone());
    let mut status = Status::new(io::stdout(), cfg.report.filenames);

    status.set_quiet(cfg.quiet);
    status.set_verbose(cfg.verbose);
    status.set_pct(cfg.pct);
    if let Some(prefix) = &cfg.prefix {
        status.set_prefix(prefix.as_str());
    }

    if !cfg.nobanner && !cfg.quiet {
        let [major, minor, rev, ..] = global::COMPILER_VERSION;
        let _ = writeln!(
            status.raw(),
            "t3make {} (TADS 3 compiler {}.{}.{})",
            env!("CARGO_PKG_VERSION"),
            major,
            minor,
            rev
        );
    }

    add_search_paths(&mut make, &mut cfg);

    let mut lib_errors = false;

    for (items, base) in passes {
        for item in items {
            let ok = add_item(
                item,
                base.as_deref(),
                &mut make,
                &mut cfg,
                &mut reporter,
            );
            lib_errors |= !ok;
        }
    }

    if !cfg.nodef && !cfg.compile_only && !cfg.pp_only {
        if let Some(lib) = &cfg.sys_lib {
            let mut main = Module::new(lib.join("_main"));
            main.set_orig_name("_main");
            main.set_from_syslib();
            make.add_module_first(main);
        }
    }

    if let Some(dir) = make.image_file().map(dir_of) {
        if !cfg.symdir_set {
            make.set_symbol_dir(dir.clone());
        }
        if !cfg.objdir_set {
            make.set_object_dir(dir);
        }
    }

    make.set_pp_only(cfg.pp_only, cfg.list_includes);

    if !lib_errors {
        let result =
            make.build(&mut Frontend::new(), &mut reporter, &mut status);

        if let Err(e) = result {
            if !e.is_reported() {
                reporter.report(&e);
            }
        }
    }

    let (errors, warnings) = (reporter.error_count(), reporter.warning_count());

    if errors != 0 || warnings != 0 {
        println!("Errors:   {}\nWarnings: {}", errors, warnings);
    }

    Ok(if reporter.has_errors() || lib_errors { 1 } else { exitcode::OK })
}

/// Add the library path from the environment and the system directories,
///   the latter defaulting to directories beside the executable.
fn add_search_paths(make: &mut Make, cfg: &mut Config) {
    if let Some(libpath) = env::var_os(LIB_PATH_VAR) {
        for dir in env::split_paths(&libpath) {
            make.maybe_add_source_path(dir.clone());
            make.maybe_add_include_path(dir);
        }
    }

    let exe_dir = env::current_exe().ok().map(dir_of);

    if cfg.sys_include.is_none() {
        cfg.sys_include = exe_dir.as_ref().map(|dir| dir.join("include"));
    }

    if cfg.sys_lib.is_none() {
        cfg.sys_lib = exe_dir.map(|dir| dir.join("lib"));
    }

    if let Some(dir) = &cfg.sys_include {
        make.add_sys_include_path(dir.clone());
    }

    if let Some(dir) = &cfg.sys_lib {
        make.maybe_add_sys_source_path(dir.clone());
    }
}

/// Add a module,
///   library or resource.
///
/// Returns `false` if a library could not be added.
fn add_item(
    item: Item,
    base: Option<&Path>,
    make: &mut Make,
    cfg: &mut Config,
    reporter: &mut dyn Reporter,
) -> bool {
    let path = |name: &str| -> PathBuf {
        match base {
            Some(base) => resolve(base, name),
            None => name.into(),
        }
    };

    match item {
        Item::Source(name) => {
            let source = path(&name);
            let mut module = Module::new(&source);

            module.set_orig_name(name.as_str());
            module.set_search_source(default_ext(&name, "t"));
            make.add_module(module);

            if !cfg.image_set {
                make.set_image_file(replace_ext(&source, "t3"));
                cfg.image_set = true;
            }
        }

        Item::Library { name, exclude } => {
            let mut lib = Module::new(default_ext(path(&name), "tl"));
            lib.set_search_source(default_ext(&name, "tl"));

            let file = make.source_file(&lib);

            match make.add_library(&file, &exclude, reporter) {
                Ok(nodef) => cfg.nodef |= nodef,
                Err(e) => {
                    if !e.is_reported() {
                        reporter.report(&e);
                    }
                    return false;
                }
            }
        }

        Item::Resource {
            name,
            alias,
            recurse,
        } => {
            let file = path(&name);
            let res_name = alias.unwrap_or_else(|| name.replace('\\', "/"));

            if !exists(&file) {
                reporter.report(&Message::error(
                    None,
                    format!("resource file \"{}\" not found", file.display()),
                ));
            } else if let Err(e) =
                add_resources(make, &file, &res_name, recurse)
            {
                reporter.report(&Message::error(
                    None,
                    format!(
                        "unable to read resource \"{}\" ({})",
                        file.display(),
                        e
                    ),
                ));
            }
        }
    }

    true
}

/// Add the resource `path`,
///   or every file in it if it is a directory.
///
/// Subdirectories are entered only when `recurse` is set.
fn add_resources(
    make: &mut Make,
    path: &Path,
    name: &str,
    recurse: bool,
) -> io::Result<()> {
    if !path.is_dir() {
        make.add_resource(Resource {
            path: path.to_path_buf(),
            name: name.to_string(),
        });
        return Ok(());
    }

    let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let child = entry.path();
        let child_name =
            format!("{}/{}", name, entry.file_name().to_string_lossy());

        if recurse || !child.is_dir() {
            add_resources(make, &child, &child_name, recurse)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_options_help() {
        let opts = get_opts();

        match parse_options(&opts, &args(&["-h"])) {
            Ok(Command::Usage) => {}
            _ => panic!("Help option did not parse"),
        }

        match parse_options(&opts, &args(&["-help"])) {
            Ok(Command::Usage) => {}
            _ => panic!("Long help option did not parse"),
        }
    }

    #[test]
    fn parse_options_invalid() {
        let opts = get_opts();

        match parse_options(&opts, &args(&["-bogus", "a.t"])) {
            Err(Fail::UnrecognizedOption(_)) => {}
            _ => panic!("Invalid option not caught"),
        }
    }

    #[test]
    fn every_option_is_registered() {
        let opts = get_opts();

        for name in FLAG_OPTS {
            assert!(
                opts.parse([format!("-{}", name)]).is_ok(),
                "flag {}",
                name
            );
        }

        for name in VALUE_OPTS {
            assert!(
                opts.parse([format!("-{}", name), "1".to_string()]).is_ok(),
                "option {}",
                name
            );
        }
    }

    #[test]
    fn glued_values_are_split() {
        assert_eq!(
            args(&[
                "-I", "inc", "-D", "X=1", "-w", "-15", "-w", "0", "-we", "+",
                "-we", "-", "-Fy", "sym", "-clean", "-cs", "latin1", "-I",
                "-odd"
            ]),
            normalize(args(&[
                "-Iinc", "-DX=1", "-w-15", "-w0", "-we", "-we-", "-Fysym",
                "-clean", "-cslatin1", "-I", "-odd"
            ]))
        );
    }

    #[test]
    fn items_follow_options() {
        let opts = get_opts();
        let pass = parse_pass(
            &opts,
            &args(&[
                "-d", "-o", "game.t3", "a.t", "-source", "b", "sys.tl", "-x",
                "sys/one", "-x", "sys/two", "-lib", "extra", "-res", "pic.png",
                "-norecurse", "dir=art",
            ]),
        )
        .unwrap();

        assert!(pass.matches.opt_present("d"));
        assert_eq!(Some("game.t3".to_string()), pass.matches.opt_str("o"));

        assert_eq!(
            vec![
                Item::Source("a.t".into()),
                Item::Source("b".into()),
                Item::Library {
                    name: "sys.tl".into(),
                    exclude: vec!["sys/one".into(), "sys/two".into()],
                },
                Item::Library {
                    name: "extra".into(),
                    exclude: vec![],
                },
                Item::Resource {
                    name: "pic.png".into(),
                    alias: None,
                    recurse: true,
                },
                Item::Resource {
                    name: "dir".into(),
                    alias: Some("art".into()),
                    recurse: false,
                },
            ],
            pass.items
        );
    }

    #[test]
    fn exclusion_without_library() {
        let opts = get_opts();

        match parse_pass(&opts, &args(&["a.t", "-x", "b"])) {
            Err(Fail::UnexpectedArgument(_)) => {}
            _ => panic!("-x without library not caught"),
        }
    }

    #[test]
    fn definitions_in_order() {
        let opts = get_opts();
        let argv = args(&["-DA=1", "-UA", "-DB", "-DA=2", "x"]);
        let pass = parse_pass(&opts, &argv).unwrap();

        let mut make = Make::new();
        let mut cfg = Config::default();
        configure(&pass.matches, None, &mut make, &mut cfg).unwrap();

        assert_eq!(Some("2"), make.look_up_pp_sym("A"));
        assert_eq!(Some("1"), make.look_up_pp_sym("B"));
    }

    #[test]
    fn warning_options() {
        let mut report = ReportOptions::default();

        warning_option("2", &mut report).unwrap();
        warning_option("-15", &mut report).unwrap();
        warning_option("-16", &mut report).unwrap();
        warning_option("+15", &mut report).unwrap();

        assert_eq!(WarningLevel::Pedantic, report.warning_level);
        assert_eq!(&[16], &report.suppressed[..]);
        assert!(warning_option("x", &mut report).is_err());
    }

    #[test]
    fn last_preinit_option_wins() {
        let opts = get_opts();
        let pass =
            parse_pass(&opts, &args(&["-nopre", "-pre", "-d", "a"])).unwrap();

        let mut make = Make::new();
        let mut cfg = Config::default();
        configure(&pass.matches, None, &mut make, &mut cfg).unwrap();

        assert!(make.runs_preinit());
    }

    #[test]
    fn option_file_paths_are_relative_to_file() {
        let opts = get_opts();
        let argv = args(&["-I", "inc", "-o", "out/game.t3"]);
        let pass = parse_pass(&opts, &argv).unwrap();

        let mut make = Make::new();
        let mut cfg = Config::default();
        configure(&pass.matches, Some(Path::new("proj")), &mut make, &mut cfg)
            .unwrap();

        assert_eq!(&[PathBuf::from("proj/inc")], make.include_paths());
        assert_eq!(Some(Path::new("proj/out/game.t3")), make.image_file());
        assert!(cfg.image_set);
    }
}
