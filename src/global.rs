// Global constants across the entire crate
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

//! System-wide static configuration.
//!
//! This module provides a system-wide configuration.
//! Subsystems should reference these values rather than defining their own
//!   and risk incompatibilities between the files that they write and the
//!   files that other subsystems read.
//!
//! By convention,
//!   import this entire module rather than individual members and reference
//!   them as `global::foo` to emphasize their nature and risk.

/// An offset into a byte stream.
///
/// Addresses are dense 32-bit byte offsets into the logical sequence of a
///   stream;
///     page boundaries are never visible at this level.
pub type StreamOfs = u32;

/// An object id as written into a stream (4 bytes).
pub type ObjId = u32;

/// A property id as written into a stream (2 bytes).
pub type PropId = u16;

/// An enumerator id as written into a stream (4 bytes).
pub type EnumId = u32;

/// Sentinel object id that never receives a fixup.
pub const INVALID_OBJ: ObjId = 0;

/// Size of each page backing a byte stream.
///
/// This must be a power of two so that the page index and in-page offset
///   of any stream offset can be derived by shifting and masking.
pub const PAGE_SIZE: usize = 1 << 16;

/// Number of line records held by each line record page.
pub const LINE_PAGE_SIZE: usize = 1024;

/// Line record pages are allocated in batches of this many page slots.
pub const LINE_PAGE_BATCH: usize = 5;

/// Compiler version as recorded in each symbol file:
///   major, minor, revision, patch, development build.
pub const COMPILER_VERSION: [u8; 5] = [3, 1, 3, 0, 0];

/// Version of the image file format written into the image signature.
pub const IMAGE_VERSION: u16 = 1;

/// Maximum number of warnings that may be individually suppressed.
pub const MAX_SUPPRESSED_WARNINGS: usize = 100;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(PAGE_SIZE <= StreamOfs::MAX as usize);
