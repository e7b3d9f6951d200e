// Little-endian binary I/O
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

//! Little-endian integer and string I/O for the binary file formats.
//!
//! Symbol,
//!   object,
//!   and image files all use little-endian integers and strings prefixed
//!   by a 2-byte length.
//! These are read and written byte-exactly regardless of host
//!   endianness so that files remain portable across platforms.

use paste::paste;
use std::io::{self, Read, Write};

macro_rules! le_int {
    ($($ty:ident,)*) => {
        paste! {
            $(
                pub fn [<read_ $ty>]<R: Read + ?Sized>(
                    r: &mut R,
                ) -> io::Result<$ty> {
                    let mut buf = [0; std::mem::size_of::<$ty>()];
                    r.read_exact(&mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }

                pub fn [<write_ $ty>]<W: Write + ?Sized>(
                    w: &mut W,
                    value: $ty,
                ) -> io::Result<()> {
                    w.write_all(&value.to_le_bytes())
                }
            )*
        }
    };
}

le_int! {
    u8,
    u16,
    u32,
}

/// Read `n` bytes.
pub fn read_bytes<R: Read + ?Sized>(
    r: &mut R,
    n: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a byte string prefixed with its 2-byte length.
pub fn write_str16<W: Write + ?Sized>(w: &mut W, s: &[u8]) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "string too long")
    })?;

    write_u16(w, len)?;
    w.write_all(s)
}

/// Read a byte string prefixed with its 2-byte length.
pub fn read_str16<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u16(r)?;
    read_bytes(r, len as usize)
}

/// Read a UTF-8 string prefixed with its 2-byte length.
pub fn read_string16<R: Read + ?Sized>(r: &mut R) -> io::Result<String> {
    String::from_utf8(read_str16(r)?)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();

        write_u16(&mut buf, 0x0102).unwrap();
        write_u32(&mut buf, 0x03040506).unwrap();

        assert_eq!(vec![2u8, 1, 6, 5, 4, 3], buf);

        let mut r = &buf[..];
        assert_eq!(0x0102, read_u16(&mut r).unwrap());
        assert_eq!(0x03040506, read_u32(&mut r).unwrap());
    }

    #[test]
    fn str16_prefixes_length() {
        let mut buf = Vec::new();
        write_str16(&mut buf, b"abc").unwrap();

        assert_eq!(b"\x03\x00abc".to_vec(), buf);
        assert_eq!("abc", read_string16(&mut &buf[..]).unwrap());
    }

    #[test]
    fn truncated_input_is_eof() {
        let buf = [1u8];

        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            read_u32(&mut &buf[..]).unwrap_err().kind()
        );
    }
}
