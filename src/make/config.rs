// Build-configuration fingerprint
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

//! Build-configuration fingerprint.
//!
//! Every symbol file begins with a description of the configuration that
//!   produced it:
//!
//! ```text
//! u1[5]  compiler version: major, minor, rev, patch, devbuild
//! u1     debug flag
//! u2     N1, then N1 x (u2 len, symbol, u2 len, expansion, u1 is-define)
//! u2     N2, then N2 x (u2 len, include path)
//! u2     N3, then N3 x (u2 len, resolved path of an included file)
//! ```
//!
//! A symbol file is current only if the block it carries matches the
//!   current configuration exactly and none of the files it recorded as
//!   included has been modified since the symbol file was written.
//! Anything else
//!   (a truncated block,
//!     a different count,
//!     an included file that no longer exists)
//!   is a mismatch;
//!     the cost of a mismatch is only a recompile.
//!
//! Readers that want the symbol payload skip the block with [`skip`]
//!   without interpreting it.

use crate::fs;
use crate::global;
use crate::io::{
    read_bytes, read_str16, read_u16, read_u8, write_str16, write_u16,
    write_u8,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A preprocessor symbol definition or un-definition given on the command
///   line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpDef {
    pub sym: String,

    /// Expansion of a definition;
    ///   [`None`] for an un-definition.
    pub expan: Option<String>,
}

impl PpDef {
    pub fn define<S: Into<String>, E: Into<String>>(sym: S, expan: E) -> Self {
        Self {
            sym: sym.into(),
            expan: Some(expan.into()),
        }
    }

    pub fn undefine<S: Into<String>>(sym: S) -> Self {
        Self {
            sym: sym.into(),
            expan: None,
        }
    }

    pub fn is_def(&self) -> bool {
        self.expan.is_some()
    }
}

/// The configuration against which symbol files are checked.
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig<'a> {
    pub version: [u8; 5],
    pub debug: bool,
    pub defs: &'a [PpDef],
    pub include_paths: &'a [PathBuf],
}

impl<'a> BuildConfig<'a> {
    pub fn new(
        debug: bool,
        defs: &'a [PpDef],
        include_paths: &'a [PathBuf],
    ) -> Self {
        Self {
            version: global::COMPILER_VERSION,
            debug,
            defs,
            include_paths,
        }
    }

    /// Write the configuration block,
    ///   recording `included` as the files read while compiling.
    pub fn write<W: Write + ?Sized>(
        &self,
        w: &mut W,
        included: &[PathBuf],
    ) -> io::Result<()> {
        w.write_all(&self.version)?;
        write_u8(w, self.debug as u8)?;

        write_u16(w, count16(self.defs.len())?)?;
        for def in self.defs {
            write_str16(w, def.sym.as_bytes())?;
            write_str16(w, def.expan.as_deref().unwrap_or("").as_bytes())?;
            write_u8(w, def.is_def() as u8)?;
        }

        write_u16(w, count16(self.include_paths.len())?)?;
        for path in self.include_paths {
            write_str16(w, path_bytes(path).as_bytes())?;
        }

        write_u16(w, count16(included.len())?)?;
        for path in included {
            write_str16(w, path_bytes(path).as_bytes())?;
        }

        Ok(())
    }

    /// Whether the block read from `r` describes this configuration.
    ///
    /// `written` is the modification time of the symbol file;
    ///   included files newer than it invalidate the file.
    /// Read errors are mismatches.
    pub fn matches<R: Read>(&self, r: &mut R, written: SystemTime) -> bool {
        self.compare(r, written).unwrap_or(false)
    }

    fn compare<R: Read>(
        &self,
        r: &mut R,
        written: SystemTime,
    ) -> io::Result<bool> {
        if read_bytes(r, 5)? != self.version {
            return Ok(false);
        }

        if (read_u8(r)? != 0) != self.debug {
            return Ok(false);
        }

        if read_u16(r)? as usize != self.defs.len() {
            return Ok(false);
        }

        for def in self.defs {
            let sym = read_str16(r)?;
            let expan = read_str16(r)?;
            let is_def = read_u8(r)? != 0;

            if sym != def.sym.as_bytes()
                || expan != def.expan.as_deref().unwrap_or("").as_bytes()
                || is_def != def.is_def()
            {
                return Ok(false);
            }
        }

        if read_u16(r)? as usize != self.include_paths.len() {
            return Ok(false);
        }

        for path in self.include_paths {
            if read_str16(r)? != path_bytes(path).as_bytes() {
                return Ok(false);
            }
        }

        for _ in 0..read_u16(r)? {
            let included =
                String::from_utf8_lossy(&read_str16(r)?).into_owned();

            match fs::mtime(&included) {
                Some(t) if t <= written => {}
                _ => return Ok(false),
            }
        }

        Ok(true)
    }
}

/// Skip a configuration block without interpreting it.
pub fn skip<R: Read>(r: &mut R) -> io::Result<()> {
    read_bytes(r, 6)?;

    for _ in 0..read_u16(r)? {
        read_str16(r)?;
        read_str16(r)?;
        read_u8(r)?;
    }

    for _ in 0..2 {
        for _ in 0..read_u16(r)? {
            read_str16(r)?;
        }
    }

    Ok(())
}

/// Read the payload of the symbol file at `path`,
///   skipping its configuration block.
pub fn read_payload(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = io::BufReader::new(std::fs::File::open(path)?);
    let mut payload = Vec::new();

    skip(&mut file)?;
    file.read_to_end(&mut payload)?;

    Ok(payload)
}

fn path_bytes(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn count16(n: usize) -> io::Result<u16> {
    u16::try_from(n).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("too many configuration entries ({})", n),
        )
    })
}
