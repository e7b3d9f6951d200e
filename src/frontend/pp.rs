// Preprocessor for the reference front end
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

//! Preprocessor for the reference front end.
//!
//! Supported directives:
//!
//!   - `#include "file"` and `#include <file>`;
//!   - `#define NAME [text]` and `#undef NAME`;
//!   - `#ifdef`, `#ifndef`, `#else` and `#endif`;
//!   - `#charset "name"`,
//!       which is accepted and ignored since sources are read as UTF-8;
//!   - `#error text` and `#warning text`.
//!
//! Quoted includes are searched for first in the directory of the
//!   including file and then along the include path;
//!     angle-bracket includes use the include path only.
//! Each file is read at most once,
//!   which also breaks include cycles;
//!     the files read are reported in order of first inclusion.
//!
//! Macros are object-like:
//!   an identifier outside of a string that names a macro is replaced by
//!   its text.

use crate::diagnose::{Location, Message, Reporter};
use crate::fs::{
    self, Filesystem, FsCanonicalizer, VisitOnceFile, VisitOnceFilesystem,
};
use crate::make::PpDef;
use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// `#include` file not found.
pub const ERR_INCLUDE_NOT_FOUND: u32 = 10006;

/// `#error` directive.
pub const ERR_DIRECTIVE: u32 = 10040;

/// `#warning` directive.
pub const WARN_DIRECTIVE: u32 = 10001;

/// A line of preprocessed text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Index into [`Preprocessed::files`].
    pub file: usize,
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Preprocessed {
    /// Files that contributed lines,
    ///   the main source first.
    pub files: Vec<PathBuf>,

    pub lines: Vec<SourceLine>,

    /// Canonical paths of included files in order of first inclusion,
    ///   not counting the main source.
    pub included: Vec<PathBuf>,
}

impl Preprocessed {
    pub fn location(&self, line: &SourceLine) -> Location {
        Location::new(&self.files[line.file], line.line)
    }
}

/// State of one `#if` group.
#[derive(Debug, Clone, Copy)]
struct Cond {
    taking: bool,
    seen_else: bool,
}

pub struct Preprocessor<'a> {
    include_paths: &'a [PathBuf],
    macros: FxHashMap<String, String>,
    fs: VisitOnceFilesystem<FsCanonicalizer>,
    conds: Vec<Cond>,
    out: Preprocessed,
}

impl<'a> Preprocessor<'a> {
    /// New preprocessor with `defines` applied in order.
    pub fn new(include_paths: &'a [PathBuf], defines: &[PpDef]) -> Self {
        let mut macros = FxHashMap::default();

        for def in defines {
            match &def.expan {
                Some(expan) => macros.insert(def.sym.clone(), expan.clone()),
                None => macros.remove(&def.sym),
            };
        }

        Self {
            include_paths,
            macros,
            fs: VisitOnceFilesystem::new(),
            conds: Vec::new(),
            out: Default::default(),
        }
    }

    /// Preprocess `source`.
    ///
    /// Problems are reported to `reporter`;
    ///   the text of everything that could be read is returned regardless.
    pub fn run(
        mut self,
        source: &Path,
        reporter: &mut dyn Reporter,
    ) -> Preprocessed {
        match self.open(source) {
            Ok(Some(text)) => self.process(source, &text, reporter),
            Ok(None) => {}
            Err(e) => reporter.report(&Message::error(
                None,
                format!(
                    "unable to open source file \"{}\": {}",
                    source.display(),
                    e
                ),
            )),
        }

        if !self.conds.is_empty() {
            reporter.report(&Message::error(
                Some(Location::new(source, 0)),
                "#ifdef or #ifndef without matching #endif",
            ));
        }

        self.out.included = self.fs.visited().iter().skip(1).cloned().collect();
        self.out
    }

    /// Read `path` unless it has been read before.
    fn open(&mut self, path: &Path) -> std::io::Result<Option<String>> {
        let file: VisitOnceFile<BufReader<File>> = self.fs.open(path)?;

        match file {
            VisitOnceFile::FirstVisit(mut f) => {
                let mut bytes = Vec::new();
                f.read_to_end(&mut bytes)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            VisitOnceFile::Visited => Ok(None),
        }
    }

    fn taking(&self) -> bool {
        self.conds.iter().all(|c| c.taking)
    }

    fn process(
        &mut self,
        path: &Path,
        text: &str,
        reporter: &mut dyn Reporter,
    ) {
        let file = self.out.files.len();
        self.out.files.push(path.to_path_buf());

        for (i, raw) in text.lines().enumerate() {
            let line = i as u32 + 1;
            let loc = || Location::new(path, line);
            let trimmed = raw.trim_start();

            let Some(directive) = trimmed.strip_prefix('#') else {
                if self.taking() {
                    let text = self.expand(raw);
                    self.out.lines.push(SourceLine { file, line, text });
                }
                continue;
            };

            let directive = directive.trim_start();
            let (name, arg) = directive
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((directive, ""));

            match name {
                "ifdef" | "ifndef" => {
                    let defined = self.macros.contains_key(arg);
                    self.conds.push(Cond {
                        taking: defined == (name == "ifdef"),
                        seen_else: false,
                    });
                }

                "else" => match self.conds.last_mut() {
                    Some(cond) if !cond.seen_else => {
                        cond.taking = !cond.taking;
                        cond.seen_else = true;
                    }
                    _ => reporter.report(&Message::error(
                        Some(loc()),
                        "#else without matching #ifdef",
                    )),
                },

                "endif" => {
                    if self.conds.pop().is_none() {
                        reporter.report(&Message::error(
                            Some(loc()),
                            "#endif without matching #ifdef",
                        ));
                    }
                }

                _ if !self.taking() => {}

                "define" => {
                    let (sym, expan) = arg
                        .split_once(char::is_whitespace)
                        .map(|(s, e)| (s, e.trim()))
                        .unwrap_or((arg, ""));

                    self.macros.insert(sym.to_string(), expan.to_string());
                }

                "undef" => {
                    self.macros.remove(arg);
                }

                "include" => self.include(path, arg, loc(), reporter),

                "charset" => {}

                "error" => reporter.report(
                    &Message::error(Some(loc()), arg).with_code(ERR_DIRECTIVE),
                ),

                "warning" => reporter.report(&Message::warning(
                    Some(loc()),
                    WARN_DIRECTIVE,
                    arg,
                )),

                _ => reporter.report(&Message::error(
                    Some(loc()),
                    format!("invalid preprocessor directive \"#{}\"", name),
                )),
            }
        }
    }

    fn include(
        &mut self,
        from: &Path,
        arg: &str,
        loc: Location,
        reporter: &mut dyn Reporter,
    ) {
        let (name, local) = match arg.as_bytes().first() {
            Some(b'"') => (arg.trim_matches('"'), true),
            Some(b'<') => {
                (arg.trim_start_matches('<').trim_end_matches('>'), false)
            }
            _ => {
                reporter.report(&Message::error(
                    Some(loc),
                    "#include requires a \"file\" or <file> name",
                ));
                return;
            }
        };

        let local_dir = local.then(|| fs::dir_of(from));

        let found = local_dir
            .iter()
            .chain(self.include_paths.iter())
            .map(|dir| fs::resolve(dir, name))
            .find(|path| path.is_file());

        let Some(path) = found else {
            reporter.report(
                &Message::error(
                    Some(loc),
                    format!("unable to open #include file \"{}\"", name),
                )
                .with_code(ERR_INCLUDE_NOT_FOUND),
            );
            return;
        };

        match self.open(&path) {
            Ok(Some(text)) => self.process(&path, &text, reporter),
            Ok(None) => {}
            Err(e) => reporter.report(
                &Message::error(
                    Some(loc),
                    format!("unable to open #include file \"{}\": {}", name, e),
                )
                .with_code(ERR_INCLUDE_NOT_FOUND),
            ),
        }
    }

    /// Substitute macros in a line of text.
    fn expand(&self, raw: &str) -> String {
        if self.macros.is_empty() {
            return raw.to_string();
        }

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(c) = rest.chars().next() {
            if c == '"' {
                let end = rest[1..].find('"').map_or(rest.len(), |i| i + 2);
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            } else if c == '_' || c.is_alphabetic() {
                let end = rest
                    .find(|c: char| c != '_' && !c.is_alphanumeric())
                    .unwrap_or(rest.len());
                let ident = &rest[..end];

                let expansion = self.macros.get(ident);
                out.push_str(expansion.map_or(ident, String::as_str));
                rest = &rest[end..];
            } else {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnose::ConsoleReporter;
    use tempfile::TempDir;

    fn reporter() -> ConsoleReporter<Vec<u8>> {
        ConsoleReporter::new(Vec::new(), Default::default())
    }

    fn messages(r: ConsoleReporter<Vec<u8>>) -> String {
        String::from_utf8(r.into_inner()).unwrap()
    }

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();

        for (name, text) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }

        dir
    }

    fn texts(pp: &Preprocessed) -> Vec<&str> {
        pp.lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn includes_each_file_once() {
        let dir = tree(&[
            ("main.t", "#include \"a.h\"\nmain\n#include \"a.h\"\n"),
            ("a.h", "#include \"b.h\"\na\n"),
            ("b.h", "#include \"a.h\"\nb\n"),
        ]);

        let mut r = reporter();
        let pp = Preprocessor::new(&[], &[])
            .run(&dir.path().join("main.t"), &mut r);

        assert_eq!(vec!["b", "a", "main"], texts(&pp));
        assert_eq!(0, r.error_count());

        let canon =
            |n: &str| std::fs::canonicalize(dir.path().join(n)).unwrap();
        assert_eq!(vec![canon("a.h"), canon("b.h")], pp.included);

        // location of "b" is line 2 of b.h
        assert_eq!(
            Location::new(dir.path().join("b.h"), 2),
            pp.location(&pp.lines[0])
        );
    }

    #[test]
    fn angle_includes_use_include_path_only() {
        let dir = tree(&[
            ("main.t", "#include <lib.h>\n"),
            ("lib.h", "local\n"),
            ("inc/lib.h", "system\n"),
        ]);

        let incs = [dir.path().join("inc")];
        let mut r = reporter();
        let pp = Preprocessor::new(&incs, &[])
            .run(&dir.path().join("main.t"), &mut r);

        assert_eq!(vec!["system"], texts(&pp));
    }

    #[test]
    fn missing_include_is_reported() {
        let dir = tree(&[("main.t", "#include \"nope.h\"\n")]);

        let mut r = reporter();
        Preprocessor::new(&[], &[]).run(&dir.path().join("main.t"), &mut r);

        assert_eq!(1, r.error_count());
        assert!(messages(r)
            .contains("unable to open #include file \"nope.h\""));
    }

    #[test]
    fn conditionals_and_defines() {
        let dir = tree(&[(
            "main.t",
            "#ifdef DEBUG\ndbg\n#else\nrel\n#endif\n\
             #define NAME thing\n#ifndef NAME\nhidden\n#endif\n\
             object NAME; \"NAME\"\n#undef NAME\nNAME\n",
        )]);

        let defs = [PpDef::define("DEBUG", "1")];
        let mut r = reporter();
        let pp = Preprocessor::new(&[], &defs)
            .run(&dir.path().join("main.t"), &mut r);

        assert_eq!(vec!["dbg", "object thing; \"NAME\"", "NAME"], texts(&pp));
        assert_eq!(0, r.error_count());
    }

    #[test]
    fn undefine_hides_earlier_define() {
        let dir = tree(&[("main.t", "#ifdef X\nx\n#endif\n")]);

        let defs = [PpDef::define("X", "1"), PpDef::undefine("X")];
        let mut r = reporter();
        let pp = Preprocessor::new(&[], &defs)
            .run(&dir.path().join("main.t"), &mut r);

        assert!(pp.lines.is_empty());
    }

    #[test]
    fn error_and_warning_directives() {
        let dir = tree(&[("main.t", "#warning careful\n#error stop\n")]);

        let mut r = reporter();
        Preprocessor::new(&[], &[]).run(&dir.path().join("main.t"), &mut r);

        assert_eq!(1, r.warning_count());
        assert_eq!(1, r.error_count());

        let out = messages(r);
        assert!(out.contains("(1): warning: careful"), "{}", out);
        assert!(out.contains("(2): error: stop"), "{}", out);
    }

    #[test]
    fn unbalanced_conditionals() {
        let dir = tree(&[("main.t", "#endif\n#ifdef X\n")]);

        let mut r = reporter();
        Preprocessor::new(&[], &[]).run(&dir.path().join("main.t"), &mut r);

        assert_eq!(2, r.error_count());
    }

    #[test]
    fn missing_source() {
        let dir = tree(&[]);

        let mut r = reporter();
        let pp = Preprocessor::new(&[], &[])
            .run(&dir.path().join("none.t"), &mut r);

        assert_eq!(1, r.error_count());
        assert!(pp.lines.is_empty());
        assert!(pp.included.is_empty());
    }
}
