// Region allocation for short-lived compiler objects
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

//! Region allocation for objects that die together.
//!
//! Code generation produces a great many small objects
//!   (labels,
//!     fixups,
//!     stream anchors,
//!     interned symbol names)
//!   whose lifetimes all end at the same phase boundary.
//! Rather than tearing each of them down individually,
//!   they are allocated from a region that is discarded wholesale.
//!
//! Two flavors are provided:
//!
//!   - [`Arena`] is a bump allocator for strings.
//!     The borrow checker enforces the phase boundary:
//!       [`Arena::reset`] requires exclusive access,
//!         so no allocation can outlive it.
//!   - [`Pool`] is a typed region for objects that are referenced by
//!       [`Handle`] rather than by borrow,
//!         which is necessary when the objects are owned by the same
//!         structure that hands out references to them.
//!     Slots may be returned to a free list,
//!       and [`Pool::reset`] invalidates every outstanding handle at once.
//!
//! Allocation fails only when memory is exhausted,
//!   which aborts the process.

use bumpalo::Bump;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Bump-pointer region.
#[derive(Debug, Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bump: Bump::with_capacity(capacity),
        }
    }

    /// Copy a string into the arena.
    pub fn alloc_str(&self, value: &str) -> &str {
        self.bump.alloc_str(value)
    }

    /// Discard every allocation at once.
    ///
    /// Memory chunks are retained for reuse.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Number of bytes currently held by the arena,
    ///   including unused space in its chunks.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

/// Reference to an object held by a [`Pool`].
///
/// A handle becomes stale when its slot is released or when the pool is
///   reset;
///     stale handles resolve to [`None`] and never to another object.
pub struct Handle<T> {
    index: u32,
    gen: u32,
    epoch: u32,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Position of the referenced slot within its pool.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.gen == other.gen
            && self.epoch == other.epoch
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.index, self.gen, self.epoch).hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({}g{}e{})", self.index, self.gen, self.epoch)
    }
}

#[derive(Debug)]
struct Slot<T> {
    gen: u32,
    value: Option<T>,
}

/// Typed region with a free list.
#[derive(Debug)]
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    epoch: u32,
    live: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            epoch: 0,
            live: 0,
        }
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`,
    ///   reusing a released slot if one is available.
    pub fn alloc(&mut self, value: T) -> Handle<T> {
        self.live += 1;

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    gen: 0,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };

        Handle {
            index,
            gen: self.slots[index as usize].gen,
            epoch: self.epoch,
            _ty: PhantomData,
        }
    }

    /// Return a slot to the free list,
    ///   yielding its object.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_current(handle) {
            return None;
        }

        let slot = &mut self.slots[handle.index as usize];
        let value = slot.value.take();

        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;

        value
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if !self.is_current(handle) {
            return None;
        }

        self.slots[handle.index as usize].value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !self.is_current(handle) {
            return None;
        }

        self.slots[handle.index as usize].value.as_mut()
    }

    /// Invalidate every handle and discard every object.
    ///
    /// Slot storage is retained for reuse.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live objects in slot order.
    ///
    /// If no slot has ever been released,
    ///   this is allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        let epoch = self.epoch;

        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index: i as u32,
                        gen: slot.gen,
                        epoch,
                        _ty: PhantomData,
                    },
                    value,
                )
            })
        })
    }

    fn is_current(&self, handle: Handle<T>) -> bool {
        handle.epoch == self.epoch
            && self
                .slots
                .get(handle.index as usize)
                .map(|slot| slot.gen == handle.gen && slot.value.is_some())
                .unwrap_or(false)
    }
}
