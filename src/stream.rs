// Paged byte streams
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

//! Paged write-mostly byte streams.
//!
//! A [`DataStream`] is the container into which the code generator emits
//!   everything that will eventually land in an image:
//!     constant data,
//!     object records,
//!     and
//!       (through [`CodeStream`](crate::code::CodeStream))
//!       method bodies.
//! Bytes are appended at a monotonically increasing write offset `W`,
//!   and any byte in `[0, W)` may later be read back or patched in place.
//!
//! Storage is a list of fixed-size pages
//!   (see [`global::PAGE_SIZE`]).
//! Pages are allocated lazily and are never released until the stream
//!   itself is dropped,
//!     so [`DataStream::reset`] makes them available for reuse.
//! Page boundaries are invisible above this API with the exception of
//!   [`DataStream::get_block`],
//!     which yields a borrowed slice that never crosses a page.
//!
//!
//! Anchors
//! =======
//! An [`Anchor`] marks the start of a region of the stream that belongs to
//!   a symbol
//!     (or to the stream itself).
//! Anchors are kept in ascending offset order;
//!   the length of each anchored region is implied by the position of the
//!   next anchor.
//! When one stream is appended to another,
//!   its anchors move with its bytes.
//!
//!
//! Stream Identity
//! ===============
//! Every stream carries a [`StreamId`] that is persisted alongside any
//!   reference into it,
//!     allowing the linker to find the same stream again after the
//!     reference has been written to an object file.

mod anchor;
pub mod set;

pub use anchor::{set_anchor_addr, Anchor, AnchorId, AnchorOwner};

use crate::arena::Pool;
use crate::fixup::{AbsFixupList, IdFixup, IdFixupTable, IdKind};
use crate::global::{self, EnumId, ObjId, PropId, StreamOfs};
use paste::paste;
use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};
use tracing::{error, trace};

/// Identity tag of a stream.
///
/// The numeric values are persisted in object files and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StreamId {
    Data = 1,
    Code = 2,
    Object = 3,
    Dict = 4,
    GramProd = 5,
    BigNum = 6,
    IntClass = 7,
    IcMod = 8,
    StaticCode = 9,
    StaticInitId = 10,
    LocalVar = 11,
    RexPat = 12,
}

impl StreamId {
    /// Streams that are persisted in object files,
    ///   in the order in which they are written.
    pub const PERSISTENT: [StreamId; 9] = [
        StreamId::Code,
        StreamId::StaticCode,
        StreamId::Data,
        StreamId::Object,
        StreamId::IcMod,
        StreamId::BigNum,
        StreamId::RexPat,
        StreamId::StaticInitId,
        StreamId::LocalVar,
    ];

    pub fn is_code(self) -> bool {
        matches!(self, Self::Code | Self::StaticCode)
    }
}

impl TryFrom<u8> for StreamId {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use StreamId::*;

        Ok(match value {
            1 => Data,
            2 => Code,
            3 => Object,
            4 => Dict,
            5 => GramProd,
            6 => BigNum,
            7 => IntClass,
            8 => IcMod,
            9 => StaticCode,
            10 => StaticInitId,
            11 => LocalVar,
            12 => RexPat,
            _ => return Err(StreamError::InvalidStream(value)),
        })
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use StreamId::*;

        let name = match self {
            Data => "data",
            Code => "code",
            Object => "object",
            Dict => "dictionary",
            GramProd => "grammar",
            BigNum => "bignum",
            IntClass => "intrinsic-class",
            IcMod => "icmod",
            StaticCode => "static code",
            StaticInitId => "static-init-id",
            LocalVar => "local-var",
            RexPat => "regex",
        };

        write!(f, "{} stream", name)
    }
}

/// Lookup of streams by their identity tag.
///
/// Fixups record only the [`StreamId`] of the stream they patch;
///   this is how they find that stream again.
pub trait StreamTable {
    fn stream_mut(
        &mut self,
        id: StreamId,
    ) -> Result<&mut DataStream, StreamError>;
}

/// A lone stream is a table containing only itself.
impl StreamTable for DataStream {
    fn stream_mut(
        &mut self,
        id: StreamId,
    ) -> Result<&mut DataStream, StreamError> {
        if id == self.id {
            Ok(self)
        } else {
            Err(StreamError::InvalidStream(id as u8))
        }
    }
}

// Generate little-endian integer accessors,
//   signed and unsigned,
//   for each field width.
macro_rules! int_access {
    ($($name:tt: $ty:ident,)*) => {
        paste! {
            $(
                #[doc = "Append a little-endian `" $ty "`."]
                pub fn [<write $name>](&mut self, value: $ty) {
                    self.write(&value.to_le_bytes());
                }

                #[doc = "Patch a little-endian `" $ty "` at `ofs`."]
                pub fn [<write $name _at>](
                    &mut self,
                    ofs: StreamOfs,
                    value: $ty,
                ) -> Result<(), StreamError> {
                    self.write_at(ofs, &value.to_le_bytes())
                }

                #[doc = "Read a little-endian `" $ty "` at `ofs`."]
                pub fn [<read $name _at>](
                    &self,
                    ofs: StreamOfs,
                ) -> Result<$ty, StreamError> {
                    let mut buf = [0; std::mem::size_of::<$ty>()];
                    self.copy_to(ofs, &mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }
            )*
        }
    };
}

/// Paged byte stream.
///
/// See the [module-level documentation](self) for more information.
#[derive(Debug)]
pub struct DataStream {
    id: StreamId,

    /// Backing pages,
    ///   each exactly [`global::PAGE_SIZE`] bytes.
    pages: Vec<Box<[u8]>>,

    /// Write offset `W`.
    ofs: StreamOfs,

    /// Value of `W` when loading of the current object file began.
    obj_file_start_ofs: StreamOfs,

    /// Anchors in ascending offset order.
    anchors: Pool<Anchor>,
}

impl DataStream {
    pub fn new(id: StreamId) -> Self {
        Self {
            id,
            pages: Vec::new(),
            ofs: 0,
            obj_file_start_ofs: 0,
            anchors: Pool::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current write offset `W`.
    pub fn ofs(&self) -> StreamOfs {
        self.ofs
    }

    pub fn is_empty(&self) -> bool {
        self.ofs == 0
    }

    /// Number of pages allocated so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Index of the page holding the next byte to be written.
    ///
    /// This page may not yet be allocated if the last write exactly
    ///   filled the page before it.
    pub fn page_index(&self) -> usize {
        self.ofs as usize / global::PAGE_SIZE
    }

    /// Offset of the next byte to be written within its page.
    pub fn page_ofs(&self) -> usize {
        self.ofs as usize % global::PAGE_SIZE
    }

    /// Append bytes.
    ///
    /// A stream never grows past [`StreamOfs::MAX`];
    ///   bytes that would carry it past are dropped with an error logged.
    /// Use [`try_write`](Self::try_write) where the length is not bounded
    ///   by the caller.
    pub fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.try_write(bytes) {
            error!(error = %e, "stream write dropped");
        }
    }

    /// Append bytes,
    ///   failing if the stream would grow past [`StreamOfs::MAX`].
    pub fn try_write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let start = self.reserve(bytes.len())?;
        self.write_at(start, bytes)
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    int_access! {
        _u2: u16,
        2: i16,
        _u4: u32,
        4: i32,
    }

    /// Reserve `n` bytes at the end of the stream,
    ///   returning the offset of the first.
    ///
    /// The contents of the reserved range are unspecified until written.
    pub fn reserve(&mut self, n: usize) -> Result<StreamOfs, StreamError> {
        let start = self.ofs;
        let end = (start as usize)
            .checked_add(n)
            .and_then(|end| StreamOfs::try_from(end).ok())
            .ok_or(StreamError::Overflow {
                stream: self.id,
                ofs: start,
                len: n,
            })?;

        self.ensure_pages(end as usize);
        self.ofs = end;

        Ok(start)
    }

    /// Allocate pages until the first `end` bytes have storage.
    fn ensure_pages(&mut self, end: usize) {
        let needed = (end + global::PAGE_SIZE - 1) / global::PAGE_SIZE;

        while self.pages.len() < needed {
            trace!(
                stream = %self.id,
                page = self.pages.len(),
                "allocating page"
            );
            self.pages
                .push(vec![0; global::PAGE_SIZE].into_boxed_slice());
        }
    }

    /// Patch a previously written range.
    ///
    /// The range `[ofs, ofs + len)` must lie within `[0, W)`.
    pub fn write_at(
        &mut self,
        ofs: StreamOfs,
        bytes: &[u8],
    ) -> Result<(), StreamError> {
        self.check_range(ofs, bytes.len())
            .map_err(|_| StreamError::WritePastEnd {
                stream: self.id,
                ofs,
                len: bytes.len(),
                end: self.ofs,
            })?;

        let mut pos = ofs as usize;
        let mut rest = bytes;

        while !rest.is_empty() {
            let page = &mut self.pages[pos / global::PAGE_SIZE];
            let in_page = pos % global::PAGE_SIZE;
            let n = rest.len().min(global::PAGE_SIZE - in_page);

            page[in_page..in_page + n].copy_from_slice(&rest[..n]);

            pos += n;
            rest = &rest[n..];
        }

        Ok(())
    }

    /// Read back a previously written range into `dst`.
    pub fn copy_to(
        &self,
        ofs: StreamOfs,
        dst: &mut [u8],
    ) -> Result<(), StreamError> {
        self.check_range(ofs, dst.len())?;

        let mut pos = ofs as usize;
        let mut filled = 0;

        while filled < dst.len() {
            let block = self.get_block(pos as StreamOfs, dst.len() - filled);
            dst[filled..filled + block.len()].copy_from_slice(block);

            pos += block.len();
            filled += block.len();
        }

        Ok(())
    }

    /// Borrow up to `want` contiguous bytes starting at `ofs` without
    ///   copying.
    ///
    /// The returned slice is clamped to the remainder of the page containing
    ///   `ofs` and to the written region;
    ///     callers wanting more must call again at the following offset.
    pub fn get_block(&self, ofs: StreamOfs, want: usize) -> &[u8] {
        let pos = ofs as usize;

        if ofs >= self.ofs {
            return &[];
        }

        let in_page = pos % global::PAGE_SIZE;
        let got = want
            .min(global::PAGE_SIZE - in_page)
            .min((self.ofs - ofs) as usize);

        &self.pages[pos / global::PAGE_SIZE][in_page..in_page + got]
    }

    fn check_range(
        &self,
        ofs: StreamOfs,
        len: usize,
    ) -> Result<(), StreamError> {
        match (ofs as usize).checked_add(len) {
            Some(end) if end <= self.ofs as usize => Ok(()),
            _ => Err(StreamError::ReadPastEnd {
                stream: self.id,
                ofs,
                len,
                end: self.ofs,
            }),
        }
    }

    /// Rewind the write offset by `n` bytes.
    ///
    /// Used to retract speculatively generated output.
    /// Anchors beyond the new end are the caller's responsibility.
    pub fn dec_ofs(&mut self, n: usize) {
        debug_assert!(n <= self.ofs as usize, "dec_ofs past stream start");
        self.ofs = self.ofs.saturating_sub(n as StreamOfs);
    }

    /// Rewind to the start of the stream,
    ///   discarding all anchors but retaining pages.
    pub fn reset(&mut self) {
        self.ofs = 0;
        self.obj_file_start_ofs = 0;
        self.anchors.reset();
    }

    /// Concatenate `other` onto the end of this stream,
    ///   moving its anchors across.
    ///
    /// Each moved anchor is rebased by the offset at which concatenation
    ///   began,
    ///     which is returned.
    /// `other` is left empty.
    pub fn append_stream(&mut self, other: &mut DataStream) -> StreamOfs {
        let base = self.ofs;
        let mut ofs = 0;

        while ofs < other.ofs {
            let block = other.get_block(ofs, global::PAGE_SIZE);
            self.write(block);
            ofs += block.len() as StreamOfs;
        }

        let mut moved = Pool::new();
        std::mem::swap(&mut moved, &mut other.anchors);

        for (_, anchor) in moved.iter() {
            let mut anchor = anchor.clone();
            anchor.rebase(base);
            self.anchors.alloc(anchor);
        }

        trace!(
            to = %self.id,
            from = %other.id,
            base,
            anchors = moved.len(),
            "appended stream"
        );

        other.reset();
        base
    }

    /// Mark the start of the data loaded from the current object file.
    pub fn set_object_file_start_ofs(&mut self) {
        self.obj_file_start_ofs = self.ofs;
    }

    pub fn object_file_start_ofs(&self) -> StreamOfs {
        self.obj_file_start_ofs
    }

    /// Register an anchor at `ofs`.
    ///
    /// Anchors must be added in ascending offset order.
    pub fn add_anchor(
        &mut self,
        owner: AnchorOwner,
        ofs: StreamOfs,
    ) -> AnchorId {
        debug_assert!(
            self.anchors.iter().last().map_or(true, |(_, a)| a.ofs() <= ofs),
            "anchors must be added in ascending order"
        );

        self.anchors.alloc(Anchor::new(owner, ofs))
    }

    /// Find the anchor at exactly `ofs`.
    pub fn find_anchor(&self, ofs: StreamOfs) -> Option<AnchorId> {
        self.anchors
            .iter()
            .find(|(_, anchor)| anchor.ofs() == ofs)
            .map(|(id, _)| id)
    }

    pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    pub fn anchor_mut(&mut self, id: AnchorId) -> Option<&mut Anchor> {
        self.anchors.get_mut(id)
    }

    /// Anchors in ascending offset order.
    pub fn anchors(&self) -> impl Iterator<Item = (AnchorId, &Anchor)> {
        self.anchors.iter()
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Length of the region introduced by an anchor.
    ///
    /// This extends to the next anchor,
    ///   or to `W` for the last anchor.
    pub fn anchor_len(&self, id: AnchorId) -> Option<StreamOfs> {
        let anchor = self.anchors.get(id)?;

        let next = self
            .anchors
            .iter()
            .skip_while(|(other, _)| *other != id)
            .nth(1)
            .map(|(_, next)| next.ofs())
            .unwrap_or(self.ofs);

        Some(next - anchor.ofs())
    }

    /// Register an absolute fixup at `W` and emit its 4-byte placeholder.
    pub fn add_abs_fixup(&mut self, list: &mut AbsFixupList) {
        list.add(self.id, self.ofs);
        self.write_u4(0);
    }

    /// Emit an object id,
    ///   registering a fixup for it unless it is [`global::INVALID_OBJ`].
    pub fn write_obj_id(&mut self, table: &mut IdFixupTable, id: ObjId) {
        debug_assert_eq!(IdKind::Object, table.kind());

        if id != global::INVALID_OBJ {
            table.add(self.id, self.ofs, id);
        }

        self.write_u4(id);
    }

    /// Emit an object id that refers to the object being defined.
    ///
    /// The fixup is attached to the symbol's own list so that it can be
    ///   re-applied each time the symbol is renumbered.
    pub fn write_obj_id_selfref(
        &mut self,
        self_refs: &mut Vec<IdFixup>,
        id: ObjId,
    ) {
        self_refs.push(IdFixup::new(self.id, self.ofs, id));
        self.write_u4(id);
    }

    pub fn write_prop_id(&mut self, table: &mut IdFixupTable, id: PropId) {
        debug_assert_eq!(IdKind::Property, table.kind());

        table.add(self.id, self.ofs, id as u32);
        self.write_u2(id);
    }

    pub fn write_enum_id(&mut self, table: &mut IdFixupTable, id: EnumId) {
        debug_assert_eq!(IdKind::Enum, table.kind());

        table.add(self.id, self.ofs, id);
        self.write_u4(id);
    }
}

/// Internal error raised by stream operations.
///
/// These are errors in the code generator itself,
///   not in the user's program.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamError {
    /// Attempted to patch bytes that have not yet been written.
    WritePastEnd {
        stream: StreamId,
        ofs: StreamOfs,
        len: usize,
        end: StreamOfs,
    },

    /// Attempted to read bytes that have not yet been written.
    ReadPastEnd {
        stream: StreamId,
        ofs: StreamOfs,
        len: usize,
        end: StreamOfs,
    },

    /// A persisted stream tag does not name a stream that can be
    ///   referenced.
    InvalidStream(u8),

    /// An id fixup references an id outside of its translation table.
    InvalidId { kind: IdKind, id: u32, count: usize },

    /// A code label was bound a second time.
    LabelRedefined(StreamOfs),

    /// A branch displacement does not fit in the width reserved for it.
    BranchOutOfRange { ofs: StreamOfs, disp: i64 },

    /// A write would carry the stream past the largest representable
    ///   offset.
    Overflow {
        stream: StreamId,
        ofs: StreamOfs,
        len: usize,
    },

    /// Forward branches that were never resolved when labels were
    ///   released.
    UnresolvedFixups(usize),

    /// A handle outlived the phase in which it was allocated.
    StaleHandle,
}

impl Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::WritePastEnd {
                stream,
                ofs,
                len,
                end,
            } => write!(
                f,
                "write past end of {}: {} byte(s) at offset {} (end {})",
                stream, len, ofs, end
            ),
            Self::ReadPastEnd {
                stream,
                ofs,
                len,
                end,
            } => write!(
                f,
                "read past end of {}: {} byte(s) at offset {} (end {})",
                stream, len, ofs, end
            ),
            Self::InvalidStream(id) => write!(f, "invalid stream id {}", id),
            Self::InvalidId { kind, id, count } => write!(
                f,
                "invalid {} id {} in fixup (translation table holds {})",
                kind, id, count
            ),
            Self::LabelRedefined(ofs) => {
                write!(f, "code label redefined at offset {}", ofs)
            }
            Self::BranchOutOfRange { ofs, disp } => write!(
                f,
                "branch displacement {} at offset {} out of range",
                disp, ofs
            ),
            Self::Overflow { stream, ofs, len } => write!(
                f,
                "{} overflow: {} byte(s) at offset {}",
                stream, len, ofs
            ),
            Self::UnresolvedFixups(n) => {
                write!(f, "{} unresolved temporary label fixup(s)", n)
            }
            Self::StaleHandle => write!(f, "stale stream handle"),
        }
    }
}

impl Error for StreamError {}
