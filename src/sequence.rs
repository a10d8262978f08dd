// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Sequence data: chunk lookup, a bounds-checked byte cursor and the store that
//! hands out resident sequence buffers.

use std::{
    collections::HashMap,
    fmt,
    ops::Range,
    path::Path,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::info;

pub mod reader;

pub use reader::{EventSink, Flow, StreamError};

/// Chunk tag of the header that every MIDI-layout buffer starts with.
pub const HEADER_TAG: &[u8; 4] = b"MThd";

/// Chunk tag of a track.
pub const TRACK_TAG: &[u8; 4] = b"MTrk";

/// Longest variable-length quantity accepted, in bytes.
const MAX_VLQ_BYTES: usize = 4;

/// Identifies a sequence in the store and the player that plays it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SoundId(pub u32);

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A read-and-advance cursor over a byte slice. Every read is bounds checked.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> ByteReader<'a> {
        ByteReader { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Result<u8, StreamError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(StreamError::Truncated { offset: self.pos })
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        let value = self.peek()?;
        self.pos += 1;
        Ok(value)
    }

    /// Reads `len` bytes and advances past them.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(StreamError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a big-endian base-128 integer whose last byte has the high bit
    /// clear.
    pub fn read_vlq(&mut self) -> Result<u32, StreamError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for _ in 0..MAX_VLQ_BYTES {
            let byte = self.read_u8()?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(StreamError::VlqOverflow { offset: start })
    }
}

/// Why a chunk could not be located.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("data does not start with a {} chunk", String::from_utf8_lossy(HEADER_TAG))]
    NotMidi,
    #[error("no {} chunk with index {index}", String::from_utf8_lossy(.tag))]
    Missing { tag: [u8; 4], index: usize },
    #[error("chunk at offset {offset} runs past the end of the data")]
    Truncated { offset: usize },
}

/// Summary of one chunk in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub tag: [u8; 4],
    pub payload: Range<usize>,
}

/// Walks every chunk header in the buffer.
pub fn chunks(data: &[u8]) -> Result<Vec<ChunkInfo>, ChunkError> {
    let mut result = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = data
            .get(offset..offset + 8)
            .ok_or(ChunkError::Truncated { offset })?;
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[..4]);
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = offset + 8;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(ChunkError::Truncated { offset })?;
        result.push(ChunkInfo {
            tag,
            payload: start..end,
        });
        offset = end;
    }
    Ok(result)
}

/// Locates the payload of the `index`th chunk (zero based) carrying `tag`.
pub fn find_chunk(data: &[u8], tag: &[u8; 4], index: usize) -> Result<Range<usize>, ChunkError> {
    if !data.starts_with(HEADER_TAG) {
        return Err(ChunkError::NotMidi);
    }
    chunks(data)?
        .into_iter()
        .filter(|chunk| &chunk.tag == tag)
        .nth(index)
        .map(|chunk| chunk.payload)
        .ok_or(ChunkError::Missing { tag: *tag, index })
}

/// Supplies resident sequence data by id. Loading from disk or archives happens
/// before playback; the service routine only ever reads from memory.
pub trait SequenceStore: Send + Sync {
    fn get(&self, id: SoundId) -> Option<Arc<[u8]>>;
}

/// An in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    sequences: RwLock<HashMap<SoundId, Arc<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn insert(&self, id: SoundId, data: impl Into<Arc<[u8]>>) {
        self.sequences.write().insert(id, data.into());
    }

    /// Reads a file fully into memory under the given id.
    pub fn load_file(&self, id: SoundId, path: &Path) -> std::io::Result<()> {
        let data = std::fs::read(path)?;
        info!(sound = %id, path = ?path, bytes = data.len(), "Loaded sequence");
        self.insert(id, data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sequences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.read().is_empty()
    }
}

impl SequenceStore for MemoryStore {
    fn get(&self, id: SoundId) -> Option<Arc<[u8]>> {
        self.sequences.read().get(&id).cloned()
    }
}
