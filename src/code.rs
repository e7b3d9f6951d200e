// Code stream
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

//! Byte stream specialized for method bodies.
//!
//! A [`CodeStream`] is a [`DataStream`] with the bookkeeping needed to
//!   generate code:
//!
//!   - Code labels,
//!       which may be bound immediately ([`CodeStream::new_label_here`])
//!       or later ([`CodeStream::new_label_fwd`]);
//!   - Label fixups,
//!       which hold branch displacements to labels that have not yet
//!       been bound;
//!   - Line records mapping method-relative code offsets to source
//!       locations for the debugger;
//!   - The list of local frames
//!       (lexical scopes)
//!       activated within the current method.
//!
//! Each method begins by recording its starting offset with
//!   [`CodeStream::set_method_ofs`],
//!     then interleaves writes,
//!     label binding,
//!     frame changes,
//!     and line records,
//!   and finally releases its labels with
//!     [`CodeStream::release_labels`].
//!
//!
//! Branch Displacements
//! ====================
//! A displacement is always relative to the offset of the displacement
//!   field plus a bias supplied by the caller
//!     (typically the size of the remainder of the instruction).
//! The 2-byte form is a signed two's-complement little-endian integer;
//!   the 4-byte form is likewise signed.
//!
//! ```
//! use t3make::code::{BranchWidth, CodeStream};
//! use t3make::stream::StreamId;
//!
//! let mut cs = CodeStream::new(StreamId::Code);
//!
//! cs.write_byte(0xF0);
//! let label = cs.new_label_fwd();
//! cs.write_ofs(label, 2, BranchWidth::Short).unwrap();
//! cs.write(&[0; 7]);
//! cs.def_label_pos(label).unwrap();
//!
//! // 10 - (1 + 2)
//! assert_eq!(Ok(7), cs.read2_at(1));
//! ```

use crate::arena::{Handle, Pool};
use crate::global::{self, StreamOfs};
use crate::stream::{DataStream, StreamError, StreamId};
use std::ops::{Deref, DerefMut};
use tracing::error;

pub type LabelId = Handle<Label>;
type FixupId = Handle<LabelFixup>;

/// Width of a branch displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchWidth {
    /// Signed 16-bit.
    Short,

    /// Signed 32-bit.
    Long,
}

impl BranchWidth {
    pub fn size(self) -> usize {
        match self {
            Self::Short => 2,
            Self::Long => 4,
        }
    }
}

/// A point in the code stream that branches may target.
#[derive(Debug)]
pub struct Label {
    /// Offset once bound.
    ofs: Option<StreamOfs>,

    /// Head of the chain of pending fixups.
    chain: Option<FixupId>,
}

/// A branch displacement awaiting its label.
#[derive(Debug)]
struct LabelFixup {
    ofs: StreamOfs,
    bias: i32,
    width: BranchWidth,
    next: Option<FixupId>,
}

/// Source file index as assigned by the front end.
pub type SourceId = u32;

/// Debugger record mapping code to source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRec {
    /// Offset from the start of the method.
    pub ofs: StreamOfs,
    pub source_id: SourceId,
    pub line: u32,
    pub frame: Option<FrameId>,
}

/// Two-level paged array of line records.
///
/// Pages are never reallocated,
///   so appending never copies existing records.
#[derive(Debug, Default)]
struct LineTable {
    pages: Vec<Vec<LineRec>>,
    count: usize,
}

impl LineTable {
    fn last_mut(&mut self) -> Option<&mut LineRec> {
        let i = self.count.checked_sub(1)?;
        self.pages
            .get_mut(i / global::LINE_PAGE_SIZE)?
            .get_mut(i % global::LINE_PAGE_SIZE)
    }

    fn push(&mut self, rec: LineRec) {
        let page = self.count / global::LINE_PAGE_SIZE;

        if page == self.pages.len() {
            if self.pages.len() == self.pages.capacity() {
                self.pages.reserve_exact(global::LINE_PAGE_BATCH);
            }
            self.pages.push(Vec::with_capacity(global::LINE_PAGE_SIZE));
        }

        let slot = self.count % global::LINE_PAGE_SIZE;
        let records = &mut self.pages[page];

        // Pages are retained across clears and overwritten in place.
        if slot < records.len() {
            records[slot] = rec;
        } else {
            records.push(rec);
        }

        self.count += 1;
    }

    fn get(&self, i: usize) -> Option<&LineRec> {
        if i >= self.count {
            return None;
        }

        self.pages
            .get(i / global::LINE_PAGE_SIZE)?
            .get(i % global::LINE_PAGE_SIZE)
    }

    fn clear(&mut self) {
        self.count = 0;
    }
}

/// Identifier of a local frame owned by a [`CodeStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

/// A lexical scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFrame {
    parent: Option<FrameId>,

    /// 1-based position in the method's frame list;
    ///   0 if not in the list.
    index: u32,

    /// Method-relative code range covered by the frame.
    range: Option<(StreamOfs, StreamOfs)>,
}

impl LocalFrame {
    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn range(&self) -> Option<(StreamOfs, StreamOfs)> {
        self.range
    }

    fn add_to_range(&mut self, ofs: StreamOfs) {
        self.range = Some(match self.range {
            None => (ofs, ofs),
            Some((lo, hi)) => (lo.min(ofs), hi.max(ofs)),
        });
    }
}

/// Byte stream for method bodies.
///
/// See the [module-level documentation](self) for more information.
#[derive(Debug)]
pub struct CodeStream {
    stream: DataStream,

    labels: Pool<Label>,

    /// Labels allocated since the last release.
    active: Vec<LabelId>,

    fixups: Pool<LabelFixup>,

    method_ofs: StreamOfs,

    lines: LineTable,

    frames: Vec<LocalFrame>,

    /// Frames activated within the current method,
    ///   in activation order.
    frame_list: Vec<FrameId>,

    cur_frame: Option<FrameId>,

    /// The global scope,
    ///   which is never added to a method's frame list.
    global_frame: FrameId,
}

impl CodeStream {
    pub fn new(id: StreamId) -> Self {
        let global = LocalFrame {
            parent: None,
            index: 0,
            range: None,
        };

        Self {
            stream: DataStream::new(id),
            labels: Pool::new(),
            active: Vec::new(),
            fixups: Pool::new(),
            method_ofs: 0,
            lines: LineTable::default(),
            frames: vec![global],
            frame_list: Vec::new(),
            cur_frame: None,
            global_frame: FrameId(0),
        }
    }

    pub fn stream(&self) -> &DataStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut DataStream {
        &mut self.stream
    }

    /// Allocate a label bound at the current offset.
    pub fn new_label_here(&mut self) -> LabelId {
        let label = self.labels.alloc(Label {
            ofs: Some(self.stream.ofs()),
            chain: None,
        });

        self.active.push(label);
        label
    }

    /// Allocate an unbound label for a forward branch.
    pub fn new_label_fwd(&mut self) -> LabelId {
        let label = self.labels.alloc(Label {
            ofs: None,
            chain: None,
        });

        self.active.push(label);
        label
    }

    /// Offset of a bound label.
    pub fn label_ofs(&self, label: LabelId) -> Option<StreamOfs> {
        self.labels.get(label).and_then(|l| l.ofs)
    }

    /// Emit a branch displacement to `label`.
    ///
    /// If the label is bound,
    ///   the displacement `label - (W + bias)` is written immediately.
    /// Otherwise a zero placeholder is written and a fixup is chained onto
    ///   the label.
    pub fn write_ofs(
        &mut self,
        label: LabelId,
        bias: i32,
        width: BranchWidth,
    ) -> Result<(), StreamError> {
        let here = self.stream.ofs();
        let lbl = self.labels.get(label).ok_or(StreamError::StaleHandle)?;

        match lbl.ofs {
            Some(target) => {
                let disp = target as i64 - (here as i64 + bias as i64);
                let bytes = encode_disp(here, disp, width)?;

                self.stream.write(&bytes[..width.size()]);
                Ok(())
            }

            None => {
                let next = lbl.chain;
                let fixup = self.fixups.alloc(LabelFixup {
                    ofs: here,
                    bias,
                    width,
                    next,
                });

                if let Some(lbl) = self.labels.get_mut(label) {
                    lbl.chain = Some(fixup);
                }

                self.stream.write(&[0; 4][..width.size()]);
                Ok(())
            }
        }
    }

    /// Bind `label` at the current offset and resolve its pending fixups.
    ///
    /// A label may be bound only once.
    pub fn def_label_pos(&mut self, label: LabelId) -> Result<(), StreamError> {
        let here = self.stream.ofs();
        let lbl = self
            .labels
            .get_mut(label)
            .ok_or(StreamError::StaleHandle)?;

        if lbl.ofs.is_some() {
            return Err(StreamError::LabelRedefined(here));
        }

        lbl.ofs = Some(here);
        let mut cur = lbl.chain.take();

        while let Some(id) = cur {
            let fixup =
                self.fixups.release(id).ok_or(StreamError::StaleHandle)?;
            let disp = here as i64 - (fixup.ofs as i64 + fixup.bias as i64);

            let bytes = encode_disp(fixup.ofs, disp, fixup.width)?;

            self.stream
                .write_at(fixup.ofs, &bytes[..fixup.width.size()])?;
            cur = fixup.next;
        }

        Ok(())
    }

    /// Whether any pending label fixup is recorded at `ofs`.
    pub fn has_fixup_at_ofs(&self, ofs: StreamOfs) -> bool {
        self.active.iter().any(|label| {
            let mut cur = self.labels.get(*label).and_then(|l| l.chain);

            while let Some(id) = cur {
                match self.fixups.get(id) {
                    Some(f) if f.ofs == ofs => return true,
                    Some(f) => cur = f.next,
                    None => break,
                }
            }

            false
        })
    }

    /// Remove the pending label fixup at `ofs`,
    ///   if any.
    ///
    /// This is used when an instruction containing a branch is retracted.
    pub fn remove_fixup_at_ofs(&mut self, ofs: StreamOfs) -> bool {
        for label in self.active.clone() {
            let mut prev: Option<FixupId> = None;
            let mut cur = self.labels.get(label).and_then(|l| l.chain);

            while let Some(id) = cur {
                let (fofs, next) = match self.fixups.get(id) {
                    Some(f) => (f.ofs, f.next),
                    None => break,
                };

                if fofs == ofs {
                    match prev.and_then(|p| self.fixups.get_mut(p)) {
                        Some(p) => p.next = next,
                        None => {
                            if let Some(l) = self.labels.get_mut(label) {
                                l.chain = next;
                            }
                        }
                    }

                    self.fixups.release(id);
                    return true;
                }

                prev = Some(id);
                cur = next;
            }
        }

        false
    }

    /// Release every label allocated since the last release.
    ///
    /// Pending fixups at this point are forward branches that were never
    ///   resolved;
    ///     they are counted and reported as a single internal error.
    pub fn release_labels(&mut self) -> Result<(), StreamError> {
        let mut unresolved = 0;

        for label in std::mem::take(&mut self.active) {
            if let Some(lbl) = self.labels.release(label) {
                let mut cur = lbl.chain;

                while let Some(fixup) =
                    cur.and_then(|id| self.fixups.release(id))
                {
                    unresolved += 1;
                    cur = fixup.next;
                }
            }
        }

        if unresolved != 0 {
            error!(unresolved, "unresolved label fixups at label release");
            return Err(StreamError::UnresolvedFixups(unresolved));
        }

        Ok(())
    }

    /// Record the start of a new method.
    pub fn set_method_ofs(&mut self, ofs: StreamOfs) {
        self.method_ofs = ofs;
    }

    /// Close the current method,
    ///   returning its line records.
    ///
    /// Line records and the local frame list start afresh for the next
    ///   method,
    ///     and labels are released
    ///       (see [`release_labels`](Self::release_labels)).
    pub fn end_method(&mut self) -> Result<Vec<LineRec>, StreamError> {
        let lines = self.line_recs().copied().collect();

        self.clear_line_recs();
        self.clear_local_frames();
        self.cur_frame = None;
        self.release_labels()?;

        Ok(lines)
    }

    pub fn method_ofs(&self) -> StreamOfs {
        self.method_ofs
    }

    fn method_rel_ofs(&self) -> StreamOfs {
        self.stream.ofs() - self.method_ofs
    }

    /// Record that code generated from this point corresponds to `line` of
    ///   `source`.
    ///
    /// If no code has been generated since the previous record,
    ///   that record is overwritten.
    /// If the previous record names the same source location,
    ///   nothing is recorded.
    pub fn add_line_rec(&mut self, source: Option<SourceId>, line: u32) {
        let source_id = match source {
            Some(id) => id,
            None => return,
        };

        let ofs = self.method_rel_ofs();
        let frame = self.cur_frame;

        let rec = LineRec {
            ofs,
            source_id,
            line,
            frame,
        };

        if let Some(last) = self.lines.last_mut() {
            if last.source_id == source_id && last.line == line {
                return;
            }

            if last.ofs == ofs {
                *last = rec;
                return;
            }
        }

        self.lines.push(rec);
    }

    pub fn line_rec_count(&self) -> usize {
        self.lines.count
    }

    pub fn line_rec(&self, i: usize) -> Option<&LineRec> {
        self.lines.get(i)
    }

    pub fn line_recs(&self) -> impl Iterator<Item = &LineRec> {
        (0..self.lines.count).filter_map(move |i| self.lines.get(i))
    }

    pub fn clear_line_recs(&mut self) {
        self.lines.clear();
    }

    /// The global scope.
    pub fn global_frame(&self) -> FrameId {
        self.global_frame
    }

    /// Create a new local scope nested within `parent`.
    pub fn new_frame(&mut self, parent: Option<FrameId>) -> FrameId {
        self.frames.push(LocalFrame {
            parent,
            index: 0,
            range: None,
        });

        FrameId((self.frames.len() - 1) as u32)
    }

    pub fn frame(&self, id: FrameId) -> Option<&LocalFrame> {
        self.frames.get(id.0 as usize)
    }

    /// Make `frame` the current scope,
    ///   returning the previous one.
    ///
    /// The current code offset is added to the code range of both the
    ///   outgoing and incoming frames,
    ///   and the incoming frame joins the method's frame list the first time
    ///   it is activated.
    pub fn set_local_frame(
        &mut self,
        frame: Option<FrameId>,
    ) -> Option<FrameId> {
        let ofs = self.method_rel_ofs();
        let old = self.cur_frame;

        if let Some(f) = old.and_then(|id| self.frames.get_mut(id.0 as usize))
        {
            f.add_to_range(ofs);
        }

        self.cur_frame = frame;
        self.add_local_frame(frame);

        if let Some(f) = frame.and_then(|id| self.frames.get_mut(id.0 as usize))
        {
            f.add_to_range(ofs);
        }

        old
    }

    pub fn cur_frame(&self) -> Option<FrameId> {
        self.cur_frame
    }

    fn add_local_frame(&mut self, frame: Option<FrameId>) {
        let id = match frame {
            Some(id) if id != self.global_frame => id,
            _ => return,
        };

        let next_index = self.frame_list.len() as u32 + 1;

        match self.frames.get_mut(id.0 as usize) {
            Some(f) if f.index == 0 => {
                f.index = next_index;
                self.frame_list.push(id);
            }
            _ => {}
        }
    }

    /// Frames activated in the current method,
    ///   in order of their 1-based indexes.
    pub fn local_frames(&self) -> &[FrameId] {
        &self.frame_list
    }

    /// Forget the current method's frame list.
    pub fn clear_local_frames(&mut self) {
        for id in self.frame_list.drain(..) {
            if let Some(f) = self.frames.get_mut(id.0 as usize) {
                f.index = 0;
            }
        }
    }

    /// Rewind to an empty stream,
    ///   discarding all labels,
    ///   fixups,
    ///   line records,
    ///   and frames.
    pub fn reset(&mut self) {
        self.stream.reset();
        self.labels.reset();
        self.active.clear();
        self.fixups.reset();
        self.lines.clear();
        self.frames.truncate(1);
        self.frame_list.clear();
        self.cur_frame = None;
        self.method_ofs = 0;
    }
}

impl Deref for CodeStream {
    type Target = DataStream;

    fn deref(&self) -> &DataStream {
        &self.stream
    }
}

impl DerefMut for CodeStream {
    fn deref_mut(&mut self) -> &mut DataStream {
        &mut self.stream
    }
}

/// Little-endian encoding of `disp` for a displacement field at `ofs`,
///   of which the first `width.size()` bytes are significant.
fn encode_disp(
    ofs: StreamOfs,
    disp: i64,
    width: BranchWidth,
) -> Result<[u8; 4], StreamError> {
    let out_of_range = || StreamError::BranchOutOfRange { ofs, disp };
    let mut bytes = [0; 4];

    match width {
        BranchWidth::Short => {
            let disp = i16::try_from(disp).map_err(|_| out_of_range())?;
            bytes[..2].copy_from_slice(&disp.to_le_bytes());
        }
        BranchWidth::Long => {
            let disp = i32::try_from(disp).map_err(|_| out_of_range())?;
            bytes.copy_from_slice(&disp.to_le_bytes());
        }
    }

    Ok(bytes)
}
