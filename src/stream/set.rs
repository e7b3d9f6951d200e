// Stream table
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

//! The complete set of streams written by the code generator.
//!
//! Each stream that can be referenced by a persisted fixup has a fixed
//!   slot here,
//!     keyed by its [`StreamId`].
//! A [`StreamSet`] is created at the start of a compilation or link and
//!   passed explicitly to everything that needs to find a stream by tag.
//!
//! The dictionary,
//!   grammar production
//!   and intrinsic class streams are never referenced by fixups;
//!     asking for them yields [`StreamError::InvalidStream`].

use super::{DataStream, StreamError, StreamId, StreamTable};
use crate::code::CodeStream;
use crate::global::StreamOfs;

#[derive(Debug)]
pub struct StreamSet {
    code: CodeStream,
    static_code: CodeStream,
    data: DataStream,
    object: DataStream,
    icmod: DataStream,
    bignum: DataStream,
    rexpat: DataStream,
    static_init_id: DataStream,
    local_var: DataStream,
}

impl Default for StreamSet {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSet {
    pub fn new() -> Self {
        Self {
            code: CodeStream::new(StreamId::Code),
            static_code: CodeStream::new(StreamId::StaticCode),
            data: DataStream::new(StreamId::Data),
            object: DataStream::new(StreamId::Object),
            icmod: DataStream::new(StreamId::IcMod),
            bignum: DataStream::new(StreamId::BigNum),
            rexpat: DataStream::new(StreamId::RexPat),
            static_init_id: DataStream::new(StreamId::StaticInitId),
            local_var: DataStream::new(StreamId::LocalVar),
        }
    }

    /// Main code stream.
    pub fn code(&self) -> &CodeStream {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut CodeStream {
        &mut self.code
    }

    pub fn static_code_mut(&mut self) -> &mut CodeStream {
        &mut self.static_code
    }

    pub fn get(&self, id: StreamId) -> Result<&DataStream, StreamError> {
        use StreamId::*;

        Ok(match id {
            Code => self.code.stream(),
            StaticCode => self.static_code.stream(),
            Data => &self.data,
            Object => &self.object,
            IcMod => &self.icmod,
            BigNum => &self.bignum,
            RexPat => &self.rexpat,
            StaticInitId => &self.static_init_id,
            LocalVar => &self.local_var,
            Dict | GramProd | IntClass => {
                return Err(StreamError::InvalidStream(id as u8))
            }
        })
    }

    pub fn get_mut(
        &mut self,
        id: StreamId,
    ) -> Result<&mut DataStream, StreamError> {
        use StreamId::*;

        Ok(match id {
            Code => self.code.stream_mut(),
            StaticCode => self.static_code.stream_mut(),
            Data => &mut self.data,
            Object => &mut self.object,
            IcMod => &mut self.icmod,
            BigNum => &mut self.bignum,
            RexPat => &mut self.rexpat,
            StaticInitId => &mut self.static_init_id,
            LocalVar => &mut self.local_var,
            Dict | GramProd | IntClass => {
                return Err(StreamError::InvalidStream(id as u8))
            }
        })
    }

    /// Record the current end of every stream as the base for offsets
    ///   read from the object file about to be loaded.
    ///
    /// This must happen before any stream of the file is read,
    ///   since a fixup stored with one stream may refer to another.
    pub fn begin_object_file(&mut self) {
        for id in StreamId::PERSISTENT {
            if let Ok(ds) = self.get_mut(id) {
                ds.set_object_file_start_ofs();
            }
        }
    }

    /// Base offset of the object file being loaded for stream `id`.
    pub fn start_ofs(&self, id: StreamId) -> Result<StreamOfs, StreamError> {
        self.get(id).map(DataStream::object_file_start_ofs)
    }

    /// Move the static code stream onto the end of the main code stream.
    ///
    /// Returns the base offset of the static code.
    pub fn merge_static_code(&mut self) -> StreamOfs {
        let base = self
            .code
            .stream_mut()
            .append_stream(self.static_code.stream_mut());

        self.static_code.reset();
        base
    }

    /// Persistent streams in object file order.
    pub fn iter(&self) -> impl Iterator<Item = &DataStream> {
        StreamId::PERSISTENT
            .into_iter()
            .filter_map(move |id| self.get(id).ok())
    }

    pub fn reset(&mut self) {
        self.code.reset();
        self.static_code.reset();

        for id in StreamId::PERSISTENT {
            if !id.is_code() {
                if let Ok(ds) = self.get_mut(id) {
                    ds.reset();
                }
            }
        }
    }
}

impl StreamTable for StreamSet {
    fn stream_mut(
        &mut self,
        id: StreamId,
    ) -> Result<&mut DataStream, StreamError> {
        self.get_mut(id)
    }
}
