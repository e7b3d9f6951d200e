// Diagnostic system
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

//! Diagnostic system for error reporting.
//!
//! Every error and warning that the user may see is a [`Diagnostic`]:
//!   an [`Error`] that additionally describes its severity [`Level`],
//!   an optional numeric code,
//!   and an optional source [`Location`].
//!
//! Diagnostics are rendered and counted by a [`Reporter`].
//! The counts decide the outcome of a build:
//!   any error stops the build at the end of the current pass,
//!   and warnings do the same when they are being treated as errors.
//!
//! Internal errors are errors in the compiler itself
//!   (an unresolved label fixup,
//!     a write past the end of a stream).
//! The user cannot correct them but may be able to work around them.

use crate::global;
use arrayvec::ArrayVec;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Diagnostic severity level.
///
/// Lower levels are more severe
///   (e.g. level 1 is the worst).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[repr(u8)]
pub enum Level {
    /// An error internal to the compiler that the user cannot resolve.
    InternalError = 1,

    /// A user-resolvable error.
    #[default]
    Error,

    /// A condition that is likely to be a mistake but does not prevent
    ///   the build.
    Warning,

    /// A warning that is reported only at the pedantic warning level.
    Pedantic,
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::InternalError => write!(f, "internal error"),
            Level::Error => write!(f, "error"),
            Level::Warning | Level::Pedantic => write!(f, "warning"),
        }
    }
}

/// Source position of a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
}

impl Location {
    pub fn new<P: Into<PathBuf>>(file: P, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// Diagnostic report.
pub trait Diagnostic: Error {
    fn level(&self) -> Level {
        Level::Error
    }

    /// Numeric code identifying the message,
    ///   by which warnings may be suppressed.
    fn code(&self) -> Option<u32> {
        None
    }

    fn location(&self) -> Option<&Location> {
        None
    }
}

/// A diagnostic carrying only a message.
///
/// This is what producers of source-level diagnostics emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: Level,
    pub code: Option<u32>,
    pub location: Option<Location>,
    pub text: String,
}

impl Message {
    pub fn error<S: Into<String>>(location: Option<Location>, text: S) -> Self {
        Self {
            level: Level::Error,
            code: None,
            location,
            text: text.into(),
        }
    }

    pub fn warning<S: Into<String>>(
        location: Option<Location>,
        code: u32,
        text: S,
    ) -> Self {
        Self {
            level: Level::Warning,
            code: Some(code),
            location,
            text: text.into(),
        }
    }

    pub fn internal<S: Into<String>>(text: S) -> Self {
        Self {
            level: Level::InternalError,
            code: None,
            location: None,
            text: text.into(),
        }
    }

    pub fn with_code(self, code: u32) -> Self {
        Self {
            code: Some(code),
            ..self
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl Error for Message {}

impl Diagnostic for Message {
    fn level(&self) -> Level {
        self.level
    }

    fn code(&self) -> Option<u32> {
        self.code
    }

    fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

/// How filenames appear in user-visible output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilenameStyle {
    /// Surround names with double quotes,
    ///   doubling any embedded quote.
    pub quote: bool,

    /// Show only the final path component,
    ///   so that output does not vary with the directory in which a build
    ///   runs.
    pub root_only: bool,
}

impl FilenameStyle {
    pub fn render(&self, path: &Path) -> String {
        let name = if self.root_only {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned())
        } else {
            path.to_string_lossy().into_owned()
        };

        if self.quote {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name
        }
    }
}

/// Warning verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum WarningLevel {
    /// No warnings.
    Silent = 0,

    #[default]
    Standard = 1,

    /// Standard warnings plus pedantic ones.
    Pedantic = 2,
}

/// Reporting options.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub warning_level: WarningLevel,

    /// Individually suppressed warning codes.
    pub suppressed: ArrayVec<u32, { global::MAX_SUPPRESSED_WARNINGS }>,

    pub warnings_as_errors: bool,

    /// Include numeric codes in messages.
    pub show_errnum: bool,

    pub filenames: FilenameStyle,
}

impl ReportOptions {
    /// Suppress a warning by code.
    ///
    /// Returns `false` if the suppression list is full.
    pub fn suppress(&mut self, code: u32) -> bool {
        if self.suppressed.contains(&code) {
            return true;
        }

        self.suppressed.try_push(code).is_ok()
    }

    /// Re-enable a previously suppressed warning.
    pub fn unsuppress(&mut self, code: u32) {
        self.suppressed.retain(|c| *c != code);
    }
}

/// Renders and counts diagnostics.
pub trait Reporter {
    /// Render and count a diagnostic,
    ///   unless it is filtered out by the reporting options.
    fn report(&mut self, diagnostic: &dyn Diagnostic);

    fn error_count(&self) -> usize;

    fn warning_count(&self) -> usize;

    fn options(&self) -> &ReportOptions;

    /// Whether the current pass must stop.
    fn has_errors(&self) -> bool {
        self.error_count() > 0
            || (self.options().warnings_as_errors && self.warning_count() > 0)
    }
}

/// Reporter writing one line per diagnostic.
///
/// Messages take the form `file(line): error N: text`,
///   with the location omitted when unknown and the code shown only when
///   requested.
pub struct ConsoleReporter<W: Write> {
    out: W,
    opts: ReportOptions,
    errors: usize,
    warnings: usize,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, opts: ReportOptions) -> Self {
        Self {
            out,
            opts,
            errors: 0,
            warnings: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render a diagnostic to a string without counting it.
    pub fn render(&self, diagnostic: &dyn Diagnostic) -> String {
        let mut line = String::new();

        if let Some(loc) = diagnostic.location() {
            line.push_str(&format!(
                "{}({}): ",
                self.opts.filenames.render(&loc.file),
                loc.line
            ));
        }

        line.push_str(&diagnostic.level().to_string());

        match diagnostic.code() {
            Some(code) if self.opts.show_errnum => {
                line.push_str(&format!(" {}", code))
            }
            _ => {}
        }

        line.push_str(&format!(": {}", diagnostic));
        line
    }

    fn is_filtered(&self, diagnostic: &dyn Diagnostic) -> bool {
        let required = match diagnostic.level() {
            Level::InternalError | Level::Error => return false,
            Level::Warning => WarningLevel::Standard,
            Level::Pedantic => WarningLevel::Pedantic,
        };

        self.opts.warning_level < required
            || diagnostic
                .code()
                .map(|code| self.opts.suppressed.contains(&code))
                .unwrap_or(false)
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, diagnostic: &dyn Diagnostic) {
        if self.is_filtered(diagnostic) {
            return;
        }

        match diagnostic.level() {
            Level::InternalError | Level::Error => self.errors += 1,
            Level::Warning | Level::Pedantic => self.warnings += 1,
        }

        let line = self.render(diagnostic);

        // A failure to write a diagnostic has nowhere left to be reported;
        //   the count still decides the outcome of the build.
        let _ = writeln!(self.out, "{}", line);
    }

    fn error_count(&self) -> usize {
        self.errors
    }

    fn warning_count(&self) -> usize {
        self.warnings
    }

    fn options(&self) -> &ReportOptions {
        &self.opts
    }
}
