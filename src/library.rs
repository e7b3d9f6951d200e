// Library (.tl) parser
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

//! Library (`.tl`) parser.
//!
//! A library is a text file naming a set of source files,
//!   resources and nested libraries that may be used on the command line
//!   as if it were a single source file.
//! Each non-blank line that does not begin with `#` is either the
//!   stand-alone flag `nodef` or a `name: value` record:
//!
//! ```text
//! # adv3 library
//! name: Adventure Library
//! needmacro: LANGUAGE the language module to use
//! source: misc
//! source: $(LANGUAGE)/$(LANGUAGE)
//! library: extensions/ext
//! resource: images/logo.png
//! nodef
//! ```
//!
//! Before a line is split,
//!   `$(NAME)` is replaced by the expansion of the preprocessor symbol
//!   `NAME` and `$$` by a single `$`;
//!     any other `$` is diagnosed and kept literally.
//! Values of `source`, `library` and `resource` are URL-style paths
//!   relative to the directory containing the library.
//!
//! Parsing does not stop at the first error;
//!   every malformed line is recorded in [`Library::errors`] with its line
//!   number so that all of them can be reported at once.

use crate::diagnose::Diagnostic;
use crate::fs;
use memchr::memchr;
use std::error::Error;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A parsed library.
#[derive(Debug, Default, PartialEq)]
pub struct Library {
    /// Path of the library file.
    pub path: PathBuf,

    /// Display name given by the `name` variable.
    pub name: Option<String>,

    /// Members in order of appearance.
    pub entries: Vec<LibEntry>,

    /// The library asked that the default system modules be omitted.
    pub nodef: bool,

    pub errors: Vec<LibError>,
}

impl Library {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// A member of a library.
///
/// `value` is the text exactly as it appeared after expansion;
///   it forms the member's URL.
/// `path` is that value resolved against the library's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibEntry {
    Source { value: String, path: PathBuf },
    Library { value: String, path: PathBuf },
    Resource { value: String, path: PathBuf },
}

/// An error on a line of a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibError {
    pub lib: PathBuf,
    pub line: usize,
    pub kind: LibErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibErrorKind {
    /// The library file could not be read.
    Open(String),

    /// `$` not followed by `(` or `$`,
    ///   or `$(` with no closing parenthesis.
    InvalidDollar,

    UndefinedSymbol(String),

    /// A line with no colon that is not a known flag.
    MissingColon,

    UnknownVariable(String, String),

    /// `needmacro` named a symbol that is not defined.
    NeedMacro { name: String, text: String },
}

impl Display for LibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}): ", self.lib.display(), self.line)?;

        match &self.kind {
            LibErrorKind::Open(e) => {
                write!(f, "unable to open library file: {}", e)
            }
            LibErrorKind::InvalidDollar => write!(
                f,
                "invalid '$' sequence; use '$$' for a literal dollar sign \
                 or '$(NAME)' to substitute a preprocessor symbol"
            ),
            LibErrorKind::UndefinedSymbol(name) => {
                write!(f, "undefined preprocessor symbol \"{}\"", name)
            }
            LibErrorKind::MissingColon => {
                write!(f, "missing ':' after variable name")
            }
            LibErrorKind::UnknownVariable(name, val) => {
                write!(f, "unknown variable \"{}\" (value \"{}\")", name, val)
            }
            LibErrorKind::NeedMacro { name, text } => write!(
                f,
                "library requires preprocessor symbol \"{}\" to be defined; \
                 use -D {}=value to define it ({})",
                name, name, text
            ),
        }
    }
}

impl Error for LibError {}

impl Diagnostic for LibError {}

/// Parse the library at `path`.
///
/// `pp_lookup` yields the expansion of a preprocessor symbol,
///   or [`None`] if it is undefined.
pub fn parse_file<F>(path: &Path, pp_lookup: F) -> Library
where
    F: Fn(&str) -> Option<String>,
{
    match std::fs::read(path) {
        Ok(bytes) => parse(path, &String::from_utf8_lossy(&bytes), pp_lookup),
        Err(e) => Library {
            path: path.to_path_buf(),
            errors: vec![LibError {
                lib: path.to_path_buf(),
                line: 0,
                kind: LibErrorKind::Open(e.to_string()),
            }],
            ..Default::default()
        },
    }
}

/// Parse library text as though it were read from `path`.
pub fn parse<F>(path: &Path, text: &str, pp_lookup: F) -> Library
where
    F: Fn(&str) -> Option<String>,
{
    let dir = fs::dir_of(path);
    let mut lib = Library {
        path: path.to_path_buf(),
        ..Default::default()
    };

    for (i, raw) in text.lines().enumerate() {
        let linenum = i + 1;
        let mut err = |kind| {
            lib.errors.push(LibError {
                lib: path.to_path_buf(),
                line: linenum,
                kind,
            })
        };

        let line = expand(raw, &pp_lookup, &mut err);
        let line = line.trim_start();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let name_end = line
            .find(|c: char| c == ':' || c.is_whitespace())
            .unwrap_or(line.len());
        let (name, rest) = line.split_at(name_end);
        let rest = rest.trim_start();

        let value = match rest.strip_prefix(':') {
            Some(value) => value.trim_start(),
            None if name.eq_ignore_ascii_case("nodef") => {
                lib.nodef = true;
                continue;
            }
            None => {
                err(LibErrorKind::MissingColon);
                continue;
            }
        };

        let member = || (value.to_string(), dir.join(fs::url_to_path(value)));

        match name.to_ascii_lowercase().as_str() {
            "name" => lib.name = Some(value.to_string()),
            "source" => {
                let (value, path) = member();
                lib.entries.push(LibEntry::Source { value, path })
            }
            "library" => {
                let (value, path) = member();
                lib.entries.push(LibEntry::Library { value, path })
            }
            "resource" => {
                let (value, path) = member();
                lib.entries.push(LibEntry::Resource { value, path })
            }
            "needmacro" => {
                let (macro_name, text) = value
                    .split_once(char::is_whitespace)
                    .map(|(m, t)| (m, t.trim_start()))
                    .unwrap_or((value, ""));

                if pp_lookup(macro_name).is_none() {
                    err(LibErrorKind::NeedMacro {
                        name: macro_name.to_string(),
                        text: text.to_string(),
                    });
                }
            }
            _ => err(LibErrorKind::UnknownVariable(
                name.to_string(),
                value.to_string(),
            )),
        }
    }

    debug!(
        lib = %path.display(),
        entries = lib.entries.len(),
        errors = lib.errors.len(),
        "parsed library"
    );

    lib
}

/// Perform `$` substitutions on a single line.
///
/// Undefined symbols expand to nothing.
/// An invalid `$` sequence is copied literally.
fn expand<F, E>(line: &str, pp_lookup: &F, err: &mut E) -> String
where
    F: Fn(&str) -> Option<String>,
    E: FnMut(LibErrorKind),
{
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut pos = 0;

    while let Some(rel) = memchr(b'$', &bytes[pos..]) {
        let dollar = pos + rel;
        out.push_str(&line[pos..dollar]);

        match bytes.get(dollar + 1) {
            Some(b'$') => {
                out.push('$');
                pos = dollar + 2;
            }
            Some(b'(') => {
                let start = dollar + 2;

                match memchr(b')', &bytes[start..]) {
                    Some(n) => {
                        let name = &line[start..start + n];

                        match pp_lookup(name) {
                            Some(val) => out.push_str(&val),
                            None => err(LibErrorKind::UndefinedSymbol(
                                name.to_string(),
                            )),
                        }

                        pos = start + n + 1;
                    }
                    None => {
                        err(LibErrorKind::InvalidDollar);
                        out.push('$');
                        pos = dollar + 1;
                    }
                }
            }
            _ => {
                err(LibErrorKind::InvalidDollar);
                out.push('$');
                pos = dollar + 1;
            }
        }
    }

    out.push_str(&line[pos..]);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "LANG" => Some("en_us".into()),
            _ => None,
        }
    }

    fn parse_str(text: &str) -> Library {
        parse(Path::new("lib/adv3.tl"), text, lookup)
    }

    #[test]
    fn members_resolve_against_library_dir() {
        let sut = parse_str(
            "# comment\n\
             name: Adv 3\n\
             \n\
             source: misc\n\
             SOURCE : sub/x\n\
             library: ext/e\n\
             resource: img/a.png\n",
        );

        assert_eq!(Vec::<LibError>::new(), sut.errors);
        assert_eq!(Some("Adv 3".into()), sut.name);
        assert!(!sut.nodef);
        assert_eq!(
            vec![
                LibEntry::Source {
                    value: "misc".into(),
                    path: ["lib", "misc"].iter().collect(),
                },
                LibEntry::Source {
                    value: "sub/x".into(),
                    path: ["lib", "sub", "x"].iter().collect(),
                },
                LibEntry::Library {
                    value: "ext/e".into(),
                    path: ["lib", "ext", "e"].iter().collect(),
                },
                LibEntry::Resource {
                    value: "img/a.png".into(),
                    path: ["lib", "img", "a.png"].iter().collect(),
                },
            ],
            sut.entries
        );
    }

    #[test]
    fn nodef_flag() {
        let sut = parse_str("  NoDef\nsource: x.t\n");

        assert!(sut.nodef);
        assert_eq!(0, sut.error_count());
    }

    #[test]
    fn dollar_substitution() {
        let sut = parse_str("source: $(LANG)/$(LANG)$$x\n");

        assert_eq!(0, sut.error_count());
        assert_eq!(
            LibEntry::Source {
                value: "en_us/en_us$x".into(),
                path: ["lib", "en_us", "en_us$x"].iter().collect(),
            },
            sut.entries[0]
        );
    }

    #[test]
    fn bad_lines_reported_with_line_numbers() {
        let sut = parse_str(
            "source: a\n\
             bogus\n\
             color: red\n\
             source: $(NOPE)b\n\
             source: $x\n\
             source: $(open\n",
        );

        let kinds = sut
            .errors
            .iter()
            .map(|e| (e.line, e.kind.clone()))
            .collect::<Vec<_>>();

        assert_eq!(
            vec![
                (2, LibErrorKind::MissingColon),
                (
                    3,
                    LibErrorKind::UnknownVariable("color".into(), "red".into())
                ),
                (4, LibErrorKind::UndefinedSymbol("NOPE".into())),
                (5, LibErrorKind::InvalidDollar),
                (6, LibErrorKind::InvalidDollar),
            ],
            kinds
        );

        // Lines with substitution errors still contribute their members.
        assert_eq!(4, sut.entries.len());
    }

    #[test]
    fn needmacro_requires_definition() {
        let sut = parse_str(
            "needmacro: LANG the language\n\
             needmacro: STYLE pick a style\n",
        );

        assert_eq!(1, sut.error_count());
        assert_eq!(
            "lib/adv3.tl (2): library requires preprocessor symbol \"STYLE\" \
             to be defined; use -D STYLE=value to define it (pick a style)",
            sut.errors[0].to_string()
        );
    }

    #[test]
    fn unreadable_library_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sut = parse_file(&dir.path().join("missing.tl"), lookup);

        assert_eq!(1, sut.error_count());
        assert!(matches!(sut.errors[0].kind, LibErrorKind::Open(_)));
    }
}
