// Deferred stream patches
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

//! Deferred writes into streams.
//!
//! Two kinds of fixup exist:
//!
//!   - An [`AbsFixup`] is a 4-byte slot that will hold the final address
//!       of an [anchor](crate::stream::Anchor),
//!         which is not known until link time.
//!     Lists of them are owned by the symbol being referenced
//!       (or by an anonymous anchor).
//!   - An [`IdFixup`] is a slot holding a symbolic object,
//!       property,
//!       or enumerator id.
//!     Ids are local to each object file,
//!       so the linker renumbers them into a single id space and patches
//!       every recorded slot.
//!
//! Both record only a [`StreamId`] and an offset;
//!   the stream itself is found through a [`StreamTable`] at the time the
//!   fixup is applied.

use crate::global::StreamOfs;
use crate::stream::{StreamError, StreamId, StreamTable};
use std::fmt::{self, Display};

/// A deferred 32-bit absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsFixup {
    pub stream: StreamId,
    pub ofs: StreamOfs,
}

/// Absolute fixups referencing a single target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbsFixupList(Vec<AbsFixup>);

impl AbsFixupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stream: StreamId, ofs: StreamOfs) {
        self.0.push(AbsFixup { stream, ofs });
    }

    /// Write `final_ofs` as a little-endian `u32` at every recorded
    ///   location.
    ///
    /// Resolving the same list twice with the same value yields the same
    ///   bytes.
    pub fn resolve<T: StreamTable>(
        &self,
        streams: &mut T,
        final_ofs: StreamOfs,
    ) -> Result<(), StreamError> {
        self.0.iter().try_for_each(|fixup| {
            streams
                .stream_mut(fixup.stream)?
                .write_u4_at(fixup.ofs, final_ofs)
        })
    }

    /// Take every fixup of `other`.
    pub fn append(&mut self, other: &mut AbsFixupList) {
        self.0.append(&mut other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AbsFixup> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Class of symbolic id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Object,
    Property,
    Enum,
}

impl IdKind {
    /// Width of the id as written into a stream.
    pub fn width(self) -> usize {
        match self {
            Self::Object | Self::Enum => 4,
            Self::Property => 2,
        }
    }
}

impl Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Object => write!(f, "object"),
            Self::Property => write!(f, "property"),
            Self::Enum => write!(f, "enumerator"),
        }
    }
}

/// A deferred symbolic id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFixup {
    pub stream: StreamId,
    pub ofs: StreamOfs,

    /// Id currently stored at the location.
    pub id: u32,
}

impl IdFixup {
    pub fn new(stream: StreamId, ofs: StreamOfs, id: u32) -> Self {
        Self { stream, ofs, id }
    }

    /// Patch the location with `final_id` using `width` bytes
    ///   (2 or 4).
    pub fn apply<T: StreamTable>(
        &self,
        streams: &mut T,
        final_id: u32,
        width: usize,
    ) -> Result<(), StreamError> {
        let ds = streams.stream_mut(self.stream)?;

        match width {
            2 => ds.write_u2_at(self.ofs, final_id as u16),
            _ => ds.write_u4_at(self.ofs, final_id),
        }
    }
}

/// Global table of id fixups of a single [`IdKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFixupTable {
    kind: IdKind,

    /// Whether new fixups are recorded at all.
    ///
    /// Once it is known that the output will never be relinked,
    ///   there is no reason to keep them.
    keep: bool,

    entries: Vec<IdFixup>,
}

impl IdFixupTable {
    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            keep: true,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn keeps(&self) -> bool {
        self.keep
    }

    /// Record a fixup,
    ///   unless recording is disabled.
    pub fn add(&mut self, stream: StreamId, ofs: StreamOfs, id: u32) {
        if self.keep {
            self.entries.push(IdFixup::new(stream, ofs, id));
        }
    }

    pub fn entries(&self) -> &[IdFixup] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Renumber entries read from an object file and patch them.
    ///
    /// `xlat` maps each id local to the object file
    ///   (its index)
    ///   to its final id.
    /// The translated fixups are retained if recording is enabled,
    ///   so that the result can itself be relinked.
    pub fn apply_translated<T: StreamTable>(
        &mut self,
        streams: &mut T,
        loaded: impl IntoIterator<Item = IdFixup>,
        xlat: &[u32],
    ) -> Result<(), StreamError> {
        let width = self.kind.width();

        for fixup in loaded {
            let final_id = *xlat.get(fixup.id as usize).ok_or(
                StreamError::InvalidId {
                    kind: self.kind,
                    id: fixup.id,
                    count: xlat.len(),
                },
            )?;

            fixup.apply(streams, final_id, width)?;
            self.add(fixup.stream, fixup.ofs, final_id);
        }

        Ok(())
    }
}

/// The object,
///   property,
///   and enumerator id fixup tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdFixups {
    pub obj: IdFixupTable,
    pub prop: IdFixupTable,
    pub enm: IdFixupTable,
}

impl Default for IdFixups {
    fn default() -> Self {
        Self {
            obj: IdFixupTable::new(IdKind::Object),
            prop: IdFixupTable::new(IdKind::Property),
            enm: IdFixupTable::new(IdKind::Enum),
        }
    }
}

impl IdFixups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable recording in every table.
    pub fn set_keep(&mut self, keep: bool) {
        self.obj.set_keep(keep);
        self.prop.set_keep(keep);
        self.enm.set_keep(keep);
    }

    pub fn table_mut(&mut self, kind: IdKind) -> &mut IdFixupTable {
        match kind {
            IdKind::Object => &mut self.obj,
            IdKind::Property => &mut self.prop,
            IdKind::Enum => &mut self.enm,
        }
    }

    pub fn clear(&mut self) {
        self.obj.clear();
        self.prop.clear();
        self.enm.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::set::StreamSet;
    use crate::stream::DataStream;

    #[test]
    fn abs_resolve_is_idempotent() {
        let mut ds = DataStream::new(StreamId::Data);
        ds.write(&[0xFF; 12]);

        let mut sut = AbsFixupList::new();
        sut.add(StreamId::Data, 0);
        sut.add(StreamId::Data, 8);

        sut.resolve(&mut ds, 0x1234).unwrap();
        let first = ds.get_block(0, 12).to_vec();

        sut.resolve(&mut ds, 0x1234).unwrap();

        assert_eq!(first, ds.get_block(0, 12));
        assert_eq!(Ok(0x1234), ds.read_u4_at(8));
        assert_eq!([0xFF; 4], ds.get_block(4, 4), "untouched bytes");
    }

    #[test]
    fn abs_resolve_crosses_streams() {
        let mut streams = StreamSet::new();
        streams.code_mut().write(&[0; 4]);
        streams.get_mut(StreamId::Object).unwrap().write(&[0; 4]);

        let mut sut = AbsFixupList::new();
        sut.add(StreamId::Code, 0);
        sut.add(StreamId::Object, 0);

        sut.resolve(&mut streams, 99).unwrap();

        assert_eq!(Ok(99), streams.code().read_u4_at(0));
        assert_eq!(
            Ok(99),
            streams.get(StreamId::Object).unwrap().read_u4_at(0)
        );
    }

    #[test]
    fn abs_resolve_past_end_is_internal_error() {
        let mut ds = DataStream::new(StreamId::Data);
        ds.write(&[0; 2]);

        let mut sut = AbsFixupList::new();
        sut.add(StreamId::Data, 0);

        assert!(matches!(
            sut.resolve(&mut ds, 1),
            Err(StreamError::WritePastEnd { .. })
        ));
    }

    #[test]
    fn property_fixup_is_two_bytes() {
        let mut ds = DataStream::new(StreamId::Object);
        ds.write(&[0xEE; 4]);

        IdFixup::new(StreamId::Object, 1, 3)
            .apply(&mut ds, 0x0102, IdKind::Property.width())
            .unwrap();

        assert_eq!([0xEE, 0x02, 0x01, 0xEE], ds.get_block(0, 4));
    }

    #[test]
    fn translation_renumbers_and_retains() {
        let mut ds = DataStream::new(StreamId::Object);
        ds.write(&[0; 8]);

        let loaded = vec![
            IdFixup::new(StreamId::Object, 0, 1),
            IdFixup::new(StreamId::Object, 4, 2),
        ];

        let mut sut = IdFixupTable::new(IdKind::Object);
        sut.apply_translated(&mut ds, loaded, &[0, 100, 200]).unwrap();

        assert_eq!(Ok(100), ds.read_u4_at(0));
        assert_eq!(Ok(200), ds.read_u4_at(4));
        assert_eq!(
            vec![
                IdFixup::new(StreamId::Object, 0, 100),
                IdFixup::new(StreamId::Object, 4, 200),
            ],
            sut.entries()
        );
    }

    #[test]
    fn translation_rejects_out_of_range_id() {
        let mut ds = DataStream::new(StreamId::Object);
        ds.write(&[0; 4]);

        let mut sut = IdFixupTable::new(IdKind::Object);
        let result = sut.apply_translated(
            &mut ds,
            vec![IdFixup::new(StreamId::Object, 0, 5)],
            &[0, 1],
        );

        assert_eq!(
            Err(StreamError::InvalidId {
                kind: IdKind::Object,
                id: 5,
                count: 2
            }),
            result
        );
    }

    #[test]
    fn keep_flag_applies_to_all_tables() {
        let mut sut = IdFixups::new();
        sut.set_keep(false);

        sut.table_mut(IdKind::Enum).add(StreamId::Data, 0, 1);

        assert!(!sut.obj.keeps());
        assert!(sut.enm.is_empty());
    }
}
