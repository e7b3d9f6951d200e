// Build status output
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

//! Build status output.
//!
//! Status lines report the steps of a build as they happen:
//!
//! ```text
//! Files to build: 4
//! symbol_export a.t -> a.t3s
//! compile a.t -> a.t3o
//! link -> game.t3
//! ```
//!
//! Every line carries the status prefix (`-statprefix`),
//!   which lets an IDE pick status lines out of the compiler's output.
//! With progress reporting (`-statpct`) enabled,
//!   `%PCT:cur/total` lines interleave with the steps.
//!
//! This is user-facing output,
//!   not logging;
//!     it is never filtered.

use crate::diagnose::FilenameStyle;
use std::fmt::Display;
use std::io::{self, Write};
use std::path::Path;

pub struct Status<W: Write> {
    out: W,
    prefix: String,
    pct: bool,
    quiet: bool,
    verbose: bool,
    names: FilenameStyle,
}

impl<W: Write> Status<W> {
    pub fn new(out: W, names: FilenameStyle) -> Self {
        Self {
            out,
            prefix: String::new(),
            pct: false,
            quiet: false,
            verbose: false,
            names,
        }
    }

    pub fn set_prefix<S: Into<String>>(&mut self, prefix: S) {
        self.prefix = prefix.into();
    }

    pub fn set_pct(&mut self, pct: bool) {
        self.pct = pct;
    }

    /// Suppress step lines.
    ///
    /// Progress lines are still produced.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Report planning decisions in addition to steps.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_pct(&self) -> bool {
        self.pct
    }

    /// Render a filename the way it appears in output.
    pub fn fname(&self, path: &Path) -> String {
        self.names.render(path)
    }

    /// Write a prefixed status line.
    pub fn line<D: Display>(&mut self, text: D) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        writeln!(self.out, "{}{}", self.prefix, text)
    }

    /// Write a line only in verbose mode.
    pub fn detail<D: Display>(&mut self, text: D) -> io::Result<()> {
        match self.verbose {
            true => self.line(text),
            false => Ok(()),
        }
    }

    /// Report a build step producing `dest`,
    ///   optionally from `src`.
    pub fn step(
        &mut self,
        verb: &str,
        src: Option<&Path>,
        dest: &Path,
    ) -> io::Result<()> {
        let dest = self.fname(dest);

        match src.map(|src| self.fname(src)) {
            Some(src) => {
                self.line(format_args!("{} {} -> {}", verb, src, dest))
            }
            None => self.line(format_args!("{} -> {}", verb, dest)),
        }
    }

    /// Report progress through the build.
    pub fn pct(&mut self, cur: usize, total: usize) -> io::Result<()> {
        if !self.pct {
            return Ok(());
        }

        writeln!(self.out, "{}%PCT:{}/{}", self.prefix, cur, total)
    }

    /// Output stream for unprefixed text,
    ///   such as preprocessor output.
    pub fn raw(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn output(sut: Status<Vec<u8>>) -> String {
        String::from_utf8(sut.into_inner()).unwrap()
    }

    #[test]
    fn steps_carry_prefix() {
        let mut sut = Status::new(Vec::new(), Default::default());
        sut.set_prefix("<@>");

        sut.step("compile", Some(Path::new("a.t")), Path::new("a.t3o"))
            .unwrap();
        sut.step("link", None, Path::new("game.t3")).unwrap();

        assert_eq!(
            "<@>compile a.t -> a.t3o\n<@>link -> game.t3\n",
            output(sut)
        );
    }

    #[test]
    fn pct_only_when_enabled() {
        let mut sut = Status::new(Vec::new(), Default::default());
        sut.pct(0, 3).unwrap();

        sut.set_pct(true);
        sut.pct(1, 3).unwrap();

        assert_eq!("%PCT:1/3\n", output(sut));
    }

    #[test]
    fn quiet_keeps_progress() {
        let mut sut = Status::new(Vec::new(), Default::default());
        sut.set_quiet(true);
        sut.set_pct(true);

        sut.line("Files to build: 2").unwrap();
        sut.pct(0, 2).unwrap();

        assert_eq!("%PCT:0/2\n", output(sut));
    }

    #[test]
    fn quoted_names() {
        let names = FilenameStyle {
            quote: true,
            root_only: false,
        };
        let mut sut = Status::new(Vec::new(), names);

        sut.step("symbol_export", Some(Path::new("a.t")), Path::new("a.t3s"))
            .unwrap();

        assert_eq!("symbol_export \"a.t\" -> \"a.t3s\"\n", output(sut));
    }

    #[test]
    fn detail_requires_verbose() {
        let mut sut = Status::new(Vec::new(), Default::default());
        sut.detail("hidden").unwrap();
        sut.set_verbose(true);
        sut.detail("shown").unwrap();

        assert_eq!("shown\n", output(sut));
    }
}
