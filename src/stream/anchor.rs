// Stream anchors
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

//! Named points within a stream.
//!
//! An anchor is created when a symbol begins emitting content into a
//!   stream.
//! It identifies the region for relocation at link time and is the target
//!   of the [absolute fixups](crate::fixup::AbsFixupList) that reference
//!   the symbol.
//!
//! The fixup list for a symbol-owned anchor lives on the symbol,
//!   not the anchor,
//!   since references to a symbol may be registered before the symbol
//!     is ever defined.
//! Anchors that have no symbol
//!   (e.g. anonymous constant data)
//!   own their list directly.

use super::{DataStream, StreamError, StreamId, StreamTable};
use crate::arena::Handle;
use crate::fixup::AbsFixupList;
use crate::global::StreamOfs;
use crate::sym::{SymbolId, SymbolTable};
use tracing::trace;

pub type AnchorId = Handle<Anchor>;

/// Owner of an anchor's fixup list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOwner {
    /// The list is held by the symbol.
    Symbol(SymbolId),

    /// The anchor has no symbol and holds its own list.
    Internal(AbsFixupList),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    ofs: StreamOfs,
    owner: AnchorOwner,
    addr: Option<u32>,
    replaced: bool,
}

impl Anchor {
    pub(super) fn new(owner: AnchorOwner, ofs: StreamOfs) -> Self {
        Self {
            ofs,
            owner,
            addr: None,
            replaced: false,
        }
    }

    pub fn ofs(&self) -> StreamOfs {
        self.ofs
    }

    pub(super) fn rebase(&mut self, base: StreamOfs) {
        self.ofs += base;
    }

    pub fn owner(&self) -> &AnchorOwner {
        &self.owner
    }

    pub fn symbol(&self) -> Option<SymbolId> {
        match self.owner {
            AnchorOwner::Symbol(sym) => Some(sym),
            AnchorOwner::Internal(_) => None,
        }
    }

    /// Fixup list owned by the anchor itself,
    ///   if it has no symbol.
    pub fn internal_fixups_mut(&mut self) -> Option<&mut AbsFixupList> {
        match &mut self.owner {
            AnchorOwner::Internal(list) => Some(list),
            AnchorOwner::Symbol(_) => None,
        }
    }

    /// The fixup list that receives this anchor's final address.
    pub fn fixups<'a>(&'a self, syms: &'a SymbolTable) -> &'a AbsFixupList {
        match &self.owner {
            AnchorOwner::Symbol(sym) => &syms.entry(*sym).fixups,
            AnchorOwner::Internal(list) => list,
        }
    }

    /// Final address,
    ///   once assigned by the linker.
    pub fn addr(&self) -> Option<u32> {
        self.addr
    }

    pub fn is_replaced(&self) -> bool {
        self.replaced
    }

    /// Mark the anchored region as superseded by a later definition.
    pub fn set_replaced(&mut self) {
        self.replaced = true;
    }

    /// Take ownership of the symbol's fixup list,
    ///   severing the anchor from its symbol.
    ///
    /// This is used when a symbol is redefined and the old definition must
    ///   keep resolving the references that were made to it.
    pub fn detach_from_symbol(&mut self, syms: &mut SymbolTable) {
        if let AnchorOwner::Symbol(sym) = self.owner {
            let list = std::mem::take(&mut syms.entry_mut(sym).fixups);
            self.owner = AnchorOwner::Internal(list);
        }
    }
}

/// Assign the final address of an anchor and write it to every location
///   recorded in the anchor's fixup list.
pub fn set_anchor_addr<T: StreamTable>(
    streams: &mut T,
    stream: StreamId,
    anchor: AnchorId,
    addr: u32,
    syms: &SymbolTable,
) -> Result<(), StreamError> {
    let ds: &mut DataStream = streams.stream_mut(stream)?;
    let entry = ds.anchor_mut(anchor).ok_or(StreamError::StaleHandle)?;

    entry.addr = Some(addr);
    let fixups = entry.fixups(syms).clone();

    trace!(%stream, addr, fixups = fixups.len(), "resolving anchor");

    fixups.resolve(streams, addr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn internal_anchor_resolves_own_fixups() {
        let arena = Arena::new();
        let syms = SymbolTable::new(&arena);
        let mut ds = DataStream::new(StreamId::Data);

        ds.write(&[0xAA; 8]);

        let mut list = AbsFixupList::new();
        list.add(StreamId::Data, 2);

        let anchor = ds.add_anchor(AnchorOwner::Internal(list), 4);

        set_anchor_addr(&mut ds, StreamId::Data, anchor, 0x01020304, &syms)
            .unwrap();

        assert_eq!(Some(0x01020304), ds.anchor(anchor).unwrap().addr());
        assert_eq!(0x01020304, ds.read_u4_at(2).unwrap());
    }

    #[test]
    fn symbol_anchor_resolves_symbol_fixups() {
        let arena = Arena::new();
        let mut syms = SymbolTable::new(&arena);
        let sym = syms.intern("foo");
        let mut ds = DataStream::new(StreamId::Data);

        ds.write(&[0; 4]);
        ds.add_abs_fixup(&mut syms.entry_mut(sym).fixups);

        let anchor = ds.add_anchor(AnchorOwner::Symbol(sym), 0);
        set_anchor_addr(&mut ds, StreamId::Data, anchor, 77, &syms).unwrap();

        assert_eq!(77, ds.read_u4_at(4).unwrap());
    }

    #[test]
    fn detach_moves_symbol_list_into_anchor() {
        let arena = Arena::new();
        let mut syms = SymbolTable::new(&arena);
        let sym = syms.intern("bar");
        syms.entry_mut(sym).fixups.add(StreamId::Code, 12);

        let mut sut = Anchor::new(AnchorOwner::Symbol(sym), 0);
        sut.detach_from_symbol(&mut syms);

        assert_eq!(None, sut.symbol());
        assert_eq!(1, sut.fixups(&syms).len());
        assert!(syms.entry(sym).fixups.is_empty());
    }
}
