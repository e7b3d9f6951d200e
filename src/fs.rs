// Lightweight filesystem abstraction
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

//! Lightweight filesystem abstraction.
//!
//! This abstraction is intended to provide generics missing from Rust core,
//!   but makes no attempt to be comprehensive---it
//!     includes only what is needed by the build tool.
//!
//!   - [`File`] provides a trait for operating on files;
//!   - [`Filesystem`] provides a generic way to access files by path; and
//!   - the free functions at the bottom of this module answer the
//!       questions the make driver asks about paths
//!         (modification times,
//!           extensions,
//!           resolution against a base directory).
//!
//! This implements traits directly atop of Rust's core structs where
//!   possible.
//!
//!
//! Visiting Files Once
//! ===================
//! [`VisitOnceFilesystem`] produces [`VisitOnceFile::FirstVisit`] the first
//!   time it encounters a given path,
//!     and [`VisitOnceFile::Visited`] every time thereafter.
//! The preprocessor uses this both to break `#include` cycles and to
//!   produce the ordered list of included files recorded in a symbol
//!   file's configuration block.

use fxhash::FxHashSet;
use std::fs;
use std::io::{BufReader, Read, Result};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file.
pub trait File: Read
where
    Self: Sized,
{
    fn open<P: AsRef<Path>>(path: P) -> Result<Self>;
}

impl File for fs::File {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path)
    }
}

impl<F: File + Read> File for BufReader<F> {
    /// Open the file at `path` and construct a [`BufReader`] from it.
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(BufReader::new(F::open(path)?))
    }
}

/// A file paired with the path by which it was opened.
#[derive(Debug, PartialEq)]
pub struct PathFile<F: File>(pub PathBuf, pub F);

impl<F: File> File for PathFile<F> {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = path.as_ref().to_path_buf();
        let file = F::open(&buf)?;

        Ok(Self(buf, file))
    }
}

impl<F: File> Read for PathFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.1.read(buf)
    }
}

/// A filesystem.
///
/// Opening a file (using [`open`](Filesystem::open)) proxies to `F::open`.
/// The type of files opened by this abstraction can therefore be controlled
///   via generics.
pub trait Filesystem<F: File>
where
    Self: Sized,
{
    fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<F> {
        F::open(path)
    }
}

/// A potentially visited [`File`].
///
/// See [`VisitOnceFilesystem`] for more information.
#[derive(Debug, PartialEq)]
pub enum VisitOnceFile<F: File> {
    /// First time visiting file at requested path.
    FirstVisit(F),

    /// Requested path has already been visited.
    Visited,
}

impl<F: File> File for VisitOnceFile<F> {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        F::open(path).map(|file| Self::FirstVisit(file))
    }
}

impl<F: File> Read for VisitOnceFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::FirstVisit(file) => file.read(buf),
            Self::Visited => Ok(0),
        }
    }
}

/// Opens each path only once.
///
/// When a [`File`] is first opened,
///   it will be wrapped in [`VisitOnceFile::FirstVisit`]
/// Subsequent calls to `open` will yield
///   [`VisitOnceFile::Visited`] without attempting to open the file.
///
/// A file will not be marked as visited if it fails to be opened.
/// Visited paths are canonical and are retained in the order of their
///   first visit.
pub struct VisitOnceFilesystem<C: Canonicalizer> {
    seen: FxHashSet<PathBuf>,
    order: Vec<PathBuf>,
    _c: PhantomData<C>,
}

impl<C: Canonicalizer> VisitOnceFilesystem<C> {
    /// New filesystem with no recorded paths.
    pub fn new() -> Self {
        Self {
            seen: Default::default(),
            order: Vec::new(),
            _c: PhantomData,
        }
    }

    /// Number of visited paths.
    pub fn visit_len(&self) -> usize {
        self.order.len()
    }

    /// Canonical paths of visited files in order of first visit.
    pub fn visited(&self) -> &[PathBuf] {
        &self.order
    }
}

impl<C: Canonicalizer> Default for VisitOnceFilesystem<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, F> Filesystem<VisitOnceFile<F>> for VisitOnceFilesystem<C>
where
    C: Canonicalizer,
    F: File,
{
    /// Open a file, marking `path` as visited.
    ///
    /// The next time the same path is requested,
    ///   [`VisitOnceFile::Visited`] will be returned.
    ///
    /// `path` will not be marked as visited if opening fails.
    fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<VisitOnceFile<F>> {
        let cpath = C::canonicalize(path)?;

        if self.seen.contains(&cpath) {
            return Ok(VisitOnceFile::Visited);
        }

        VisitOnceFile::open(&cpath).map(|file| {
            self.seen.insert(cpath.clone());
            self.order.push(cpath);
            file
        })
    }
}

pub trait Canonicalizer {
    fn canonicalize<P: AsRef<Path>>(path: P) -> Result<PathBuf>;
}

pub struct FsCanonicalizer;

impl Canonicalizer for FsCanonicalizer {
    fn canonicalize<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

/// Modification time of `path`,
///   or [`None`] if it does not exist or cannot be queried.
pub fn mtime<P: AsRef<Path>>(path: P) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub fn exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Whether `a` exists and is strictly newer than `b`,
///   treating a missing `b` as infinitely old.
pub fn is_newer<A: AsRef<Path>, B: AsRef<Path>>(a: A, b: B) -> bool {
    match (mtime(a), mtime(b)) {
        (Some(ta), Some(tb)) => ta > tb,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Add `ext` to `path` if its final component has no extension.
pub fn default_ext<P: AsRef<Path>>(path: P, ext: &str) -> PathBuf {
    let path = path.as_ref();

    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => path.with_extension(ext),
    }
}

/// Replace the extension of `path` with `ext`,
///   adding one if there is none.
pub fn replace_ext<P: AsRef<Path>>(path: P, ext: &str) -> PathBuf {
    path.as_ref().with_extension(ext)
}

/// Final component of `path` with its extension removed.
///
/// This is the name that must be unique across all modules of a build,
///   since derived files for every module may share a directory.
pub fn root_stem<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve<B: AsRef<Path>, P: AsRef<Path>>(base: B, path: P) -> PathBuf {
    let path = path.as_ref();

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.as_ref().join(path)
    }
}

/// Directory containing `path`,
///   with the empty path standing for the working directory.
pub fn dir_of<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Convert a `/`-separated URL-style name into a native relative path.
pub fn url_to_path(url: &str) -> PathBuf {
    url.split('/').filter(|c| !c.is_empty()).collect()
}

/// Remove a file if it exists.
///
/// Failure to remove a file that is already absent is not an error.
pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    #[derive(Debug, PartialEq)]
    struct DummyFile(PathBuf);

    impl File for DummyFile {
        fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            Ok(Self(path.as_ref().to_path_buf()))
        }
    }

    impl Read for DummyFile {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn buf_reader_file() {
        let path: PathBuf = "buf/path".into();
        let result: BufReader<DummyFile> = File::open(path.clone()).unwrap();

        assert_eq!(DummyFile(path), result.into_inner());
    }

    #[test]
    fn path_file() {
        let path: PathBuf = "buf/path".into();
        let result: PathFile<DummyFile> = File::open(path.clone()).unwrap();

        assert_eq!(PathFile(path.clone(), DummyFile(path)), result);
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(PathBuf::from("a/b.t"), default_ext("a/b", "t"));
        assert_eq!(PathBuf::from("a/b.tl"), default_ext("a/b.tl", "t"));
        assert_eq!(PathBuf::from("obj/b.t3o"), replace_ext("obj/b.t", "t3o"));
        assert_eq!("b", root_stem("x/y/b.t"));
    }

    #[test]
    fn resolve_relative_only() {
        assert_eq!(PathBuf::from("lib/x.t"), resolve("lib", "x.t"));
        assert_eq!(PathBuf::from("/abs/x.t"), resolve("lib", "/abs/x.t"));
        assert_eq!(PathBuf::new(), dir_of("x.t"));
        assert_eq!(
            ["sub", "dir", "x"].iter().collect::<PathBuf>(),
            url_to_path("sub/dir/x")
        );
    }

    #[test]
    fn newer_treats_missing_as_old() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, b"a").unwrap();

        assert!(is_newer(&a, dir.path().join("missing")));
        assert!(!is_newer(dir.path().join("missing"), &a));
        assert!(remove_if_exists(&a).unwrap());
        assert!(!remove_if_exists(&a).unwrap());
    }

    mod canonicalizer {
        use super::*;

        struct StubCanonicalizer;

        impl Canonicalizer for StubCanonicalizer {
            fn canonicalize<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
                let mut buf = path.as_ref().to_path_buf();
                buf.push("CANONICALIZED");

                Ok(buf)
            }
        }

        #[test]
        fn vist_once() {
            let mut fs = VisitOnceFilesystem::<StubCanonicalizer>::new();
            let path: PathBuf = "foo/bar".into();
            let result = fs.open(path.clone()).unwrap();

            let mut expected_path = path.clone().to_path_buf();
            expected_path.push("CANONICALIZED");

            // First time, return file.
            assert_eq!(
                VisitOnceFile::FirstVisit(DummyFile(expected_path.clone())),
                result
            );

            // Second time, already visited.
            let result_2: VisitOnceFile<DummyFile> = fs.open(path).unwrap();
            assert_eq!(VisitOnceFile::Visited, result_2);

            assert_eq!(&[expected_path], fs.visited());
        }
    }
}
