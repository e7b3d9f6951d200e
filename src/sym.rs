// Symbol table
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

//! Interned symbols and the link-time state attached to them.
//!
//! Symbol names are interned into an [`Arena`] so that each distinct name
//!   is stored once and compared by [`SymbolId`].
//! The table holds the state that the code generator and linker hang off
//!   of a symbol:
//!
//!   - the [absolute fixups](AbsFixupList) awaiting the address of the
//!       symbol's anchor;
//!   - object self-reference [id fixups](IdFixup),
//!       re-applied each time the symbol is renumbered;
//!   - the object id currently assigned to the symbol; and
//!   - the anchor that defines it,
//!       if it has been defined.
//!
//! ```
//! use t3make::arena::Arena;
//! use t3make::sym::SymbolTable;
//!
//! let arena = Arena::new();
//! let mut syms = SymbolTable::new(&arena);
//!
//! let a = syms.intern("foo");
//! let b = syms.intern("foo");
//! let c = syms.intern("bar");
//!
//! assert_eq!(a, b);
//! assert_ne!(a, c);
//! assert_eq!("bar", syms.name(c));
//! ```

use crate::arena::Arena;
use crate::fixup::{AbsFixupList, IdFixup, IdKind};
use crate::global::ObjId;
use crate::stream::{AnchorId, StreamError, StreamId, StreamTable};
use fxhash::FxHashMap;
use std::num::NonZeroU32;

/// Interned symbol.
///
/// Identifiers begin at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(NonZeroU32);

assert_eq_size!(Option<SymbolId>, SymbolId);

impl SymbolId {
    fn from_index(index: usize) -> Self {
        // Index 0 maps to 1,
        //   which can never be zero.
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// State attached to a symbol.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Locations awaiting the final address of the symbol's anchor.
    pub fixups: AbsFixupList,

    /// Object self-references.
    pub self_refs: Vec<IdFixup>,

    pub obj_id: Option<ObjId>,

    /// Defining anchor and the stream holding it.
    pub anchor: Option<(StreamId, AnchorId)>,
}

/// Arena-backed symbol table.
pub struct SymbolTable<'a> {
    arena: &'a Arena,
    names: Vec<&'a str>,
    index: FxHashMap<&'a str, SymbolId>,
    entries: Vec<SymbolEntry>,
}

impl<'a> SymbolTable<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            names: Vec::new(),
            index: FxHashMap::default(),
            entries: Vec::new(),
        }
    }

    /// Intern `name`,
    ///   returning the existing symbol if it has been seen before.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }

        let id = SymbolId::from_index(self.names.len());
        let stored = self.arena.alloc_str(name);

        self.names.push(stored);
        self.index.insert(stored, id);
        self.entries.push(SymbolEntry::default());

        id
    }

    /// Look up a symbol without interning it.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: SymbolId) -> &'a str {
        self.names[id.index()]
    }

    pub fn entry(&self, id: SymbolId) -> &SymbolEntry {
        &self.entries[id.index()]
    }

    pub fn entry_mut(&mut self, id: SymbolId) -> &mut SymbolEntry {
        &mut self.entries[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Symbols in the order in which they were first interned.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &'a str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (SymbolId::from_index(i), *name))
    }

    /// Assign a new object id to a symbol and re-apply each of its
    ///   self-references.
    pub fn renumber_obj<T: StreamTable>(
        &mut self,
        id: SymbolId,
        new_id: ObjId,
        streams: &mut T,
    ) -> Result<(), StreamError> {
        let entry = &mut self.entries[id.index()];
        entry.obj_id = Some(new_id);

        for fixup in entry.self_refs.iter_mut() {
            fixup.apply(streams, new_id, IdKind::Object.width())?;
            fixup.id = new_id;
        }

        Ok(())
    }
}
