// Image file writer
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

//! Image files.
//!
//! An image begins with a fixed 45-byte signature:
//!
//! ```text
//!   0  "T3-image\r\n\x1a"
//!  11  u2 format version
//!  13  28 reserved bytes (zero)
//!  41  u4 tool data: CRC-32 of the module list (little-endian)
//! ```
//!
//! followed by a 24-byte build timestamp in `asctime` layout and then a
//!   sequence of blocks,
//!     each `[4-byte id][u4 size][u2 flags]` followed by `size` bytes,
//!   terminated by an `EOF ` block.
//!
//! The build driver reads only the signature back,
//!   comparing the stored CRC against the current module list to decide
//!   whether the image must be relinked.

use crate::global::{self, StreamOfs};
use crate::io::{write_u16, write_u32, write_u8};
use crate::stream::DataStream;
use chrono::{DateTime, Local};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub const IMAGE_SIG: &[u8; 11] = b"T3-image\r\n\x1a";

/// Length of the signature.
pub const SIG_LEN: usize = 45;

/// Offset of the module-list CRC within the signature.
pub const CRC_OFS: usize = 41;

const_assert_eq!(IMAGE_SIG.len() + 2 + 28, CRC_OFS);
const_assert_eq!(CRC_OFS + 4, SIG_LEN);

/// Length of the build timestamp following the signature.
pub const TIMESTAMP_LEN: usize = 24;

/// Block flag indicating that a loader must understand the block.
pub const BLOCK_MANDATORY: u16 = 0x0001;

/// Build timestamp in `asctime` layout
///   (e.g. `Sun Sep 16 01:03:52 1973`).
pub fn timestamp(when: DateTime<Local>) -> String {
    when.format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Sequential writer of an image file.
pub struct ImageWriter<W: Write> {
    w: W,
}

impl<W: Write> ImageWriter<W> {
    /// Write the signature carrying `crc` and the build timestamp.
    pub fn new(mut w: W, crc: u32, timestamp: &str) -> io::Result<Self> {
        w.write_all(IMAGE_SIG)?;
        write_u16(&mut w, global::IMAGE_VERSION)?;
        w.write_all(&[0; 28])?;
        write_u32(&mut w, crc)?;

        let mut ts = [b' '; TIMESTAMP_LEN];
        let src = timestamp.as_bytes();
        let n = src.len().min(TIMESTAMP_LEN);
        ts[..n].copy_from_slice(&src[..n]);
        w.write_all(&ts)?;

        Ok(Self { w })
    }

    pub fn write_block(
        &mut self,
        id: &[u8; 4],
        flags: u16,
        data: &[u8],
    ) -> io::Result<()> {
        self.w.write_all(id)?;
        write_u32(&mut self.w, data.len() as u32)?;
        write_u16(&mut self.w, flags)?;
        self.w.write_all(data)
    }

    /// Write the contents of a stream as a single block.
    pub fn write_stream_block(
        &mut self,
        id: &[u8; 4],
        ds: &DataStream,
    ) -> io::Result<()> {
        self.w.write_all(id)?;
        write_u32(&mut self.w, ds.ofs())?;
        write_u16(&mut self.w, BLOCK_MANDATORY)?;

        let mut ofs: StreamOfs = 0;
        while ofs < ds.ofs() {
            let block = ds.get_block(ofs, global::PAGE_SIZE);
            self.w.write_all(block)?;
            ofs += block.len() as StreamOfs;
        }

        Ok(())
    }

    /// Write the terminating block and yield the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.write_block(b"EOF ", 0, &[])?;
        self.w.flush()?;
        Ok(self.w)
    }
}

/// Read the module-list CRC from the signature of an existing image.
///
/// Yields [`None`] if the file is missing,
///   too short,
///   or not an image.
pub fn read_image_crc(path: &Path) -> Option<u32> {
    let mut sig = [0; SIG_LEN];

    fs::File::open(path).ok()?.read_exact(&mut sig).ok()?;

    if &sig[..IMAGE_SIG.len()] != IMAGE_SIG {
        return None;
    }

    let mut crc = [0; 4];
    crc.copy_from_slice(&sig[CRC_OFS..SIG_LEN]);
    Some(u32::from_le_bytes(crc))
}

/// A file to be bundled into an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Location on disk.
    pub path: PathBuf,

    /// Name by which the program refers to the resource.
    pub name: String,
}

/// Write a multimedia resource block containing the contents of each
///   resource.
///
/// Entry names are stored with each byte XORed with `0xFF`.
pub fn write_resources<W: Write>(
    image: &mut ImageWriter<W>,
    resources: &[Resource],
) -> io::Result<()> {
    let contents = resources
        .iter()
        .map(|res| fs::read(&res.path))
        .collect::<io::Result<Vec<_>>>()?;

    let mut block = Vec::new();
    write_u16(&mut block, resources.len() as u16)?;

    let names: Vec<&[u8]> = resources
        .iter()
        .map(|res| &res.name.as_bytes()[..res.name.len().min(255)])
        .collect();

    // Data offsets are relative to the end of the table of contents.
    let mut ofs = 0u32;
    for (name, data) in names.iter().zip(&contents) {
        write_u32(&mut block, ofs)?;
        write_u32(&mut block, data.len() as u32)?;
        write_u8(&mut block, name.len() as u8)?;
        block.extend(name.iter().map(|b| b ^ 0xFF));

        ofs += data.len() as u32;
    }

    contents.iter().for_each(|data| block.extend_from_slice(data));

    image.write_block(b"MRES", 0, &block)
}

/// Write a block of resource links,
///   referring to each resource by its local path rather than embedding
///   its contents.
pub fn write_resource_links<W: Write>(
    image: &mut ImageWriter<W>,
    resources: &[Resource],
) -> io::Result<()> {
    let mut block = Vec::new();
    write_u16(&mut block, resources.len() as u16)?;

    for res in resources {
        let local = res.path.to_string_lossy();

        let name = &res.name.as_bytes()[..res.name.len().min(255)];
        write_u8(&mut block, name.len() as u8)?;
        block.extend_from_slice(name);
        write_u16(&mut block, local.len() as u16)?;
        block.extend_from_slice(local.as_bytes());
    }

    image.write_block(b"MREL", 0, &block)
}

/// Length of the terminating `EOF ` block.
const EOF_BLOCK_LEN: usize = 10;

/// Add resources to an existing image file,
///   inserting their block ahead of the terminating `EOF ` block.
///
/// When `links` is set only the resources' local paths are recorded;
///   this keeps debug builds fast while resources are being edited.
pub fn append_resources(
    path: &Path,
    resources: &[Resource],
    links: bool,
) -> io::Result<()> {
    let mut buf = fs::read(path)?;

    if buf.len() < SIG_LEN + TIMESTAMP_LEN + EOF_BLOCK_LEN
        || !buf[buf.len() - EOF_BLOCK_LEN..].starts_with(b"EOF ")
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a complete image file", path.display()),
        ));
    }

    buf.truncate(buf.len() - EOF_BLOCK_LEN);

    let mut img = ImageWriter { w: buf };

    if links {
        write_resource_links(&mut img, resources)?;
    } else {
        write_resources(&mut img, resources)?;
    }

    fs::write(path, img.finish()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::StreamId;

    #[test]
    fn signature_places_crc_at_41() {
        let sut =
            ImageWriter::new(Vec::new(), 0xAABBCCDD, "Thu Jan  1 00:00:00 1970")
                .unwrap();
        let buf = sut.finish().unwrap();

        assert_eq!(&IMAGE_SIG[..], &buf[..11]);
        assert_eq!([0xDDu8, 0xCC, 0xBB, 0xAA], buf[41..45]);
        assert_eq!(b"Thu Jan  1 00:00:00 1970", &buf[45..69]);
        assert_eq!(b"EOF ", &buf[69..73]);
        assert_eq!(SIG_LEN + TIMESTAMP_LEN + 10, buf.len());
    }

    #[test]
    fn timestamp_has_asctime_width() {
        assert_eq!(TIMESTAMP_LEN, timestamp(Local::now()).len());
    }

    #[test]
    fn stream_block_has_header_and_contents() {
        let mut ds = DataStream::new(StreamId::Code);
        ds.write(&[1, 2, 3]);

        let mut sut = ImageWriter::new(Vec::new(), 0, "").unwrap();
        sut.write_stream_block(b"CODE", &ds).unwrap();
        let buf = sut.finish().unwrap();

        let block = &buf[SIG_LEN + TIMESTAMP_LEN..];
        assert_eq!(b"CODE", &block[..4]);
        assert_eq!([3u8, 0, 0, 0], block[4..8]);
        assert_eq!([1u8, 0], block[8..10]);
        assert_eq!([1u8, 2, 3], block[10..13]);
    }

    #[test]
    fn crc_read_back_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.t3");

        let sut = ImageWriter::new(Vec::new(), 0x12345678, "").unwrap();
        fs::write(&path, sut.finish().unwrap()).unwrap();

        assert_eq!(Some(0x12345678), read_image_crc(&path));
        assert_eq!(None, read_image_crc(&dir.path().join("missing.t3")));

        fs::write(&path, b"not an image at all, but long enough to read ok")
            .unwrap();
        assert_eq!(None, read_image_crc(&path));
    }

    #[test]
    fn resource_names_are_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.jpg");
        fs::write(&path, b"JPEG").unwrap();

        let mut sut = ImageWriter::new(Vec::new(), 0, "").unwrap();
        write_resources(
            &mut sut,
            &[Resource {
                path,
                name: "a".into(),
            }],
        )
        .unwrap();
        let buf = sut.finish().unwrap();

        let block = &buf[SIG_LEN + TIMESTAMP_LEN + 10..];
        // count, ofs, size, name len, name
        assert_eq!([1u8, 0], block[..2]);
        assert_eq!([4u8, 0, 0, 0], block[6..10]);
        assert_eq!([1u8, b'a' ^ 0xFF], block[10..12]);
        assert_eq!(b"JPEG", &block[12..16]);
    }

    #[test]
    fn resources_appended_before_eof() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("game.t3");
        let res = dir.path().join("a.txt");
        fs::write(&res, b"xyz").unwrap();

        let sut = ImageWriter::new(Vec::new(), 7, "").unwrap();
        fs::write(&image, sut.finish().unwrap()).unwrap();

        let resources = [Resource {
            path: res,
            name: "a.txt".into(),
        }];

        append_resources(&image, &resources, false).unwrap();
        append_resources(&image, &resources, true).unwrap();

        let buf = fs::read(&image).unwrap();
        let mres = buf.windows(4).position(|w| w == b"MRES").unwrap();
        let mrel = buf.windows(4).position(|w| w == b"MREL").unwrap();

        assert_eq!(SIG_LEN + TIMESTAMP_LEN, mres);
        assert!(mrel > mres);
        assert!(buf.ends_with(b"EOF \0\0\0\0\0\0"));
        assert_eq!(Some(7), read_image_crc(&image));

        fs::write(&image, b"short").unwrap();
        assert!(append_resources(&image, &resources, false).is_err());
    }
}
