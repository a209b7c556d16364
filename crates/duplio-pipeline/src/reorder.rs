// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded reorder buffer restoring delivery order across concurrent TTS jobs.
//!
//! Chunks are keyed `(unit_index, chunk_index)`. A cursor tracks the next
//! key to emit: the matching chunk is forwarded immediately, higher keys
//! wait. The cursor crosses a unit boundary only once the unit's total chunk
//! count is known (normal completion, truncation, or a skip tombstone), so a
//! failed unit can never wedge delivery.
//!
//! The buffer is pure data; the stall clock lives in the emitter that owns
//! it.

use std::collections::{BTreeMap, HashMap};

use duplio_core::error::DuplioError;
use duplio_core::types::{ChunkKey, MediaChunk};

/// Reorder buffer for one turn's outbound media.
#[derive(Debug)]
pub struct ReorderBuffer {
    pending: BTreeMap<ChunkKey, MediaChunk>,
    /// Known total chunk count per finished unit.
    unit_totals: HashMap<u32, u32>,
    cursor: ChunkKey,
    capacity: usize,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            unit_totals: HashMap::new(),
            cursor: ChunkKey::new(0, 0),
            capacity,
        }
    }

    /// Next key to emit.
    pub fn cursor(&self) -> ChunkKey {
        self.cursor
    }

    /// True when no chunks are waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when chunks are waiting but the cursor's chunk has not arrived:
    /// the ordering gap the stall timeout guards.
    pub fn has_gap(&self) -> bool {
        !self.pending.is_empty() && !self.pending.contains_key(&self.cursor)
    }

    /// Accepts one chunk and returns everything now ready to emit, in order.
    pub fn offer(&mut self, chunk: MediaChunk) -> Result<Vec<MediaChunk>, DuplioError> {
        if self.pending.len() >= self.capacity {
            return Err(DuplioError::Internal(format!(
                "reorder buffer overflow at {} chunks",
                self.capacity
            )));
        }
        self.pending.insert(chunk.key, chunk);
        Ok(self.drain_ready())
    }

    /// Records a unit's final chunk count and returns anything unblocked.
    pub fn complete_unit(&mut self, unit_index: u32, chunks: u32) -> Vec<MediaChunk> {
        self.unit_totals.insert(unit_index, chunks);
        self.drain_ready()
    }

    /// Marks a unit skipped (zero chunks) and returns anything unblocked.
    pub fn skip_unit(&mut self, unit_index: u32) -> Vec<MediaChunk> {
        self.complete_unit(unit_index, 0)
    }

    /// Drops all buffered chunks (interruption).
    pub fn discard_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.unit_totals.clear();
        dropped
    }

    fn drain_ready(&mut self) -> Vec<MediaChunk> {
        let mut ready = Vec::new();
        loop {
            if let Some(chunk) = self.pending.remove(&self.cursor) {
                self.cursor = ChunkKey::new(self.cursor.unit_index, self.cursor.chunk_index + 1);
                ready.push(chunk);
                continue;
            }
            // Advance across a finished unit boundary.
            if self.unit_totals.get(&self.cursor.unit_index) == Some(&self.cursor.chunk_index) {
                self.unit_totals.remove(&self.cursor.unit_index);
                self.cursor = ChunkKey::new(self.cursor.unit_index + 1, 0);
                continue;
            }
            break;
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use duplio_core::types::TurnId;

    use super::*;

    fn chunk(unit: u32, index: u32) -> MediaChunk {
        MediaChunk {
            turn_id: TurnId("turn".into()),
            key: ChunkKey::new(unit, index),
            audio: vec![unit as u8, index as u8],
            video: None,
            last_in_unit: false,
        }
    }

    fn keys(chunks: &[MediaChunk]) -> Vec<(u32, u32)> {
        chunks
            .iter()
            .map(|c| (c.key.unit_index, c.key.chunk_index))
            .collect()
    }

    #[test]
    fn in_order_chunks_pass_straight_through() {
        let mut buffer = ReorderBuffer::new(16);
        assert_eq!(keys(&buffer.offer(chunk(0, 0)).unwrap()), vec![(0, 0)]);
        assert_eq!(keys(&buffer.offer(chunk(0, 1)).unwrap()), vec![(0, 1)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn out_of_order_chunks_wait_for_the_cursor() {
        let mut buffer = ReorderBuffer::new(16);
        assert!(buffer.offer(chunk(0, 1)).unwrap().is_empty());
        assert!(buffer.has_gap());

        let ready = buffer.offer(chunk(0, 0)).unwrap();
        assert_eq!(keys(&ready), vec![(0, 0), (0, 1)]);
        assert!(!buffer.has_gap());
    }

    #[test]
    fn later_unit_waits_for_earlier_unit_completion() {
        let mut buffer = ReorderBuffer::new(16);
        // Unit 1 finished first (parallel TTS).
        assert!(buffer.offer(chunk(1, 0)).unwrap().is_empty());

        assert_eq!(keys(&buffer.offer(chunk(0, 0)).unwrap()), vec![(0, 0)]);
        // Unit 0 not yet marked complete: unit 1 still held.
        assert!(buffer.has_gap());

        let ready = buffer.complete_unit(0, 1);
        assert_eq!(keys(&ready), vec![(1, 0)]);
    }

    #[test]
    fn skipped_unit_unblocks_successors() {
        let mut buffer = ReorderBuffer::new(16);
        assert!(buffer.offer(chunk(1, 0)).unwrap().is_empty());
        assert!(buffer.offer(chunk(2, 0)).unwrap().is_empty());
        buffer.complete_unit(0, 0); // unit 0 produced nothing

        // Unit 1 chunks flow; unit 2 still waits for unit 1's count.
        assert_eq!(buffer.cursor(), ChunkKey::new(1, 1));

        let ready = buffer.complete_unit(1, 1);
        assert_eq!(keys(&ready), vec![(2, 0)]);
    }

    #[test]
    fn consecutive_empty_units_advance_the_cursor() {
        let mut buffer = ReorderBuffer::new(16);
        buffer.skip_unit(0);
        buffer.skip_unit(1);
        let ready = buffer.offer(chunk(2, 0)).unwrap();
        assert_eq!(keys(&ready), vec![(2, 0)]);
    }

    #[test]
    fn overflow_is_an_error() {
        let mut buffer = ReorderBuffer::new(2);
        buffer.offer(chunk(5, 0)).unwrap();
        buffer.offer(chunk(5, 1)).unwrap();
        assert!(buffer.offer(chunk(5, 2)).is_err());
    }

    #[test]
    fn discard_drops_everything() {
        let mut buffer = ReorderBuffer::new(16);
        buffer.offer(chunk(1, 0)).unwrap();
        buffer.offer(chunk(2, 3)).unwrap();
        assert_eq!(buffer.discard_all(), 2);
        assert!(buffer.is_empty());
    }
}
