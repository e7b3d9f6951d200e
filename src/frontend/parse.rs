// Parser for the reference source language
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

//! Parser for the reference source language.
//!
//! A program is a sequence of statements,
//!   each terminated by `;`:
//!
//! ```text
//! object lamp;                 // define an object
//! object brassLamp: lamp;      // define an object with a base
//! brassLamp.name = "lamp";     // set a property to a string
//! brassLamp.location = hall;   // set a property to an object or enum
//! enum lit;                    // define an enumerator
//! ```
//!
//! `//` starts a comment that runs to the end of the line.
//! A statement with a syntax error is reported and skipped up to the next
//!   `;`.

use super::pp::Preprocessed;
use crate::diagnose::{Location, Message, Reporter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An object or enumerator name.
    Name(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Object {
        name: String,
        base: Option<String>,
        loc: Location,
    },
    Assign {
        obj: String,
        prop: String,
        value: Value,
        loc: Location,
    },
    Enum {
        name: String,
        loc: Location,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Str(String),
    Punct(char),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("\"{}\"", name),
            Tok::Str(_) => "string".into(),
            Tok::Punct(c) => format!("'{}'", c),
        }
    }
}

/// Split preprocessed text into located tokens.
fn lex(pp: &Preprocessed, reporter: &mut dyn Reporter) -> Vec<(Tok, Location)> {
    let mut toks = Vec::new();

    for line in &pp.lines {
        let loc = pp.location(line);
        let mut rest = line.text.as_str();

        loop {
            rest = rest.trim_start();

            let Some(c) = rest.chars().next() else {
                break;
            };

            if rest.starts_with("//") {
                break;
            }

            if c == '"' {
                match rest[1..].find('"') {
                    Some(end) => {
                        let text = rest[1..end + 1].into();
                        toks.push((Tok::Str(text), loc.clone()));
                        rest = &rest[end + 2..];
                    }
                    None => {
                        reporter.report(&Message::error(
                            Some(loc.clone()),
                            "unterminated string",
                        ));
                        break;
                    }
                }
            } else if c == '_' || c.is_alphabetic() {
                let end = rest
                    .find(|c: char| c != '_' && !c.is_alphanumeric())
                    .unwrap_or(rest.len());

                toks.push((Tok::Ident(rest[..end].into()), loc.clone()));
                rest = &rest[end..];
            } else if ";:.=".contains(c) {
                toks.push((Tok::Punct(c), loc.clone()));
                rest = &rest[1..];
            } else {
                reporter.report(&Message::error(
                    Some(loc.clone()),
                    format!("invalid character '{}'", c),
                ));
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    toks
}

struct Parser<'r> {
    toks: std::vec::IntoIter<(Tok, Location)>,
    last: Option<Location>,
    reporter: &'r mut dyn Reporter,
}

/// A syntax error,
///   already reported.
struct Skip {
    /// The offending token was the `;` ending the statement.
    terminated: bool,
}

impl<'r> Parser<'r> {
    fn next(&mut self) -> Option<(Tok, Location)> {
        let next = self.toks.next();
        if let Some((_, loc)) = &next {
            self.last = Some(loc.clone());
        }
        next
    }

    fn fail(
        &mut self,
        loc: Option<Location>,
        expected: &str,
        found: Option<&Tok>,
    ) -> Skip {
        let terminated = found == Some(&Tok::Punct(';'));
        let found = found.map_or("end of file".into(), Tok::describe);

        self.reporter.report(&Message::error(
            loc.or_else(|| self.last.clone()),
            format!("syntax error: expected {}, found {}", expected, found),
        ));

        Skip { terminated }
    }

    fn ident(&mut self, what: &str) -> Result<(String, Location), Skip> {
        match self.next() {
            Some((Tok::Ident(name), loc)) => Ok((name, loc)),
            Some((tok, loc)) => Err(self.fail(Some(loc), what, Some(&tok))),
            None => Err(self.fail(None, what, None)),
        }
    }

    fn punct(&mut self, want: char) -> Result<(), Skip> {
        match self.next() {
            Some((Tok::Punct(c), _)) if c == want => Ok(()),
            Some((tok, loc)) => {
                Err(self.fail(Some(loc), &format!("'{}'", want), Some(&tok)))
            }
            None => Err(self.fail(None, &format!("'{}'", want), None)),
        }
    }

    fn statement(&mut self) -> Option<Result<Decl, Skip>> {
        let (tok, loc) = self.next()?;

        Some(match tok {
            Tok::Ident(kw) if kw == "object" => self.object(loc),
            Tok::Ident(kw) if kw == "enum" => self.enumerator(loc),
            Tok::Ident(obj) => self.assign(obj, loc),
            tok => Err(self.fail(Some(loc), "statement", Some(&tok))),
        })
    }

    fn object(&mut self, loc: Location) -> Result<Decl, Skip> {
        let (name, _) = self.ident("object name")?;

        let base = match self.next() {
            Some((Tok::Punct(';'), _)) => None,
            Some((Tok::Punct(':'), _)) => {
                let (base, _) = self.ident("base object name")?;
                self.punct(';')?;
                Some(base)
            }
            Some((tok, loc)) => {
                return Err(self.fail(Some(loc), "':' or ';'", Some(&tok)))
            }
            None => return Err(self.fail(None, "';'", None)),
        };

        Ok(Decl::Object { name, base, loc })
    }

    fn enumerator(&mut self, loc: Location) -> Result<Decl, Skip> {
        let (name, _) = self.ident("enumerator name")?;
        self.punct(';')?;

        Ok(Decl::Enum { name, loc })
    }

    fn assign(&mut self, obj: String, loc: Location) -> Result<Decl, Skip> {
        self.punct('.')?;
        let (prop, _) = self.ident("property name")?;
        self.punct('=')?;

        let value = match self.next() {
            Some((Tok::Ident(name), _)) => Value::Name(name),
            Some((Tok::Str(s), _)) => Value::Str(s),
            Some((tok, loc)) => {
                return Err(self.fail(Some(loc), "value", Some(&tok)))
            }
            None => return Err(self.fail(None, "value", None)),
        };

        self.punct(';')?;

        Ok(Decl::Assign {
            obj,
            prop,
            value,
            loc,
        })
    }

    /// Discard tokens through the next `;`.
    fn recover(&mut self) {
        while let Some((tok, _)) = self.next() {
            if tok == Tok::Punct(';') {
                break;
            }
        }
    }
}

/// Parse preprocessed text,
///   reporting and skipping statements with syntax errors.
pub fn parse(pp: &Preprocessed, reporter: &mut dyn Reporter) -> Vec<Decl> {
    let toks = lex(pp, reporter);
    let mut parser = Parser {
        toks: toks.into_iter(),
        last: None,
        reporter,
    };

    let mut decls = Vec::new();

    while let Some(result) = parser.statement() {
        match result {
            Ok(decl) => decls.push(decl),
            Err(Skip { terminated: false }) => parser.recover(),
            Err(Skip { terminated: true }) => (),
        }
    }

    decls
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnose::ConsoleReporter;
    use crate::frontend::pp::SourceLine;
    use std::path::PathBuf;

    fn source(lines: &[&str]) -> Preprocessed {
        Preprocessed {
            files: vec![PathBuf::from("test.t")],
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, text)| SourceLine {
                    file: 0,
                    line: i as u32 + 1,
                    text: text.to_string(),
                })
                .collect(),
            included: vec![],
        }
    }

    fn loc(line: u32) -> Location {
        Location::new("test.t", line)
    }

    #[test]
    fn statements() {
        let pp = source(&[
            "object lamp;  // a lamp",
            "object brass: lamp;",
            "brass.name = \"brass lamp\";",
            "brass.loc =",
            "  hall;",
            "enum lit;",
        ]);

        let mut r = ConsoleReporter::new(Vec::new(), Default::default());

        assert_eq!(
            vec![
                Decl::Object {
                    name: "lamp".into(),
                    base: None,
                    loc: loc(1)
                },
                Decl::Object {
                    name: "brass".into(),
                    base: Some("lamp".into()),
                    loc: loc(2)
                },
                Decl::Assign {
                    obj: "brass".into(),
                    prop: "name".into(),
                    value: Value::Str("brass lamp".into()),
                    loc: loc(3)
                },
                Decl::Assign {
                    obj: "brass".into(),
                    prop: "loc".into(),
                    value: Value::Name("hall".into()),
                    loc: loc(4)
                },
                Decl::Enum {
                    name: "lit".into(),
                    loc: loc(6)
                },
            ],
            parse(&pp, &mut r)
        );

        assert_eq!(0, r.error_count());
    }

    #[test]
    fn recovers_after_syntax_error() {
        let pp = source(&["object = x;", "object ok;", "ok.p = ;", "enum e;"]);
        let mut r = ConsoleReporter::new(Vec::new(), Default::default());

        let decls = parse(&pp, &mut r);

        assert_eq!(2, r.error_count());
        assert_eq!(2, decls.len());

        let out = String::from_utf8(r.into_inner()).unwrap();
        assert!(
            out.contains(
                "test.t(1): error: syntax error: \
                 expected object name, found '='"
            ),
            "{}",
            out
        );
    }

    #[test]
    fn missing_value_keeps_next_statement() {
        let pp = source(&["object ok;", "ok.p = ;", "ok.q = x;", "object ;"]);
        let mut r = ConsoleReporter::new(Vec::new(), Default::default());

        let decls = parse(&pp, &mut r);

        assert_eq!(2, r.error_count());
        assert_eq!(2, decls.len());
        assert!(matches!(
            &decls[1],
            Decl::Assign { prop, .. } if prop == "q"
        ));
    }

    #[test]
    fn unterminated_statement() {
        let pp = source(&["object x"]);
        let mut r = ConsoleReporter::new(Vec::new(), Default::default());

        assert!(parse(&pp, &mut r).is_empty());
        assert_eq!(1, r.error_count());
    }
}
