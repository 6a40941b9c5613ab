//! Stream cursor: tracks the next unconsumed block within a range.

use crate::error::BackendError;
use crate::types::{BatchResponse, BlockRange};

/// The producer's position in the range being streamed.
///
/// The cursor only moves forward and never passes `range.end`.
#[derive(Debug, Clone)]
pub struct Cursor {
    range: BlockRange,
    position: u64,
    batches: u64,
}

impl Cursor {
    /// Create a cursor at the start of `range`.
    pub fn new(range: BlockRange) -> Self {
        Self {
            range,
            position: range.start,
            batches: 0,
        }
    }

    /// The next block to fetch.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of batches the cursor has advanced over.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn range(&self) -> BlockRange {
        self.range
    }

    /// Returns `true` once the whole range has been covered.
    pub fn is_done(&self) -> bool {
        self.position >= self.range.end
    }

    /// The sub-range the next fetch should cover.
    pub fn next_slice(&self, batch_size: u64) -> BlockRange {
        self.range.slice(self.position, batch_size)
    }

    /// Check that `batch` makes forward progress inside the range.
    pub fn check(&self, batch: &BatchResponse) -> Result<(), BackendError> {
        if batch.next_block <= self.position {
            return Err(BackendError::InvalidResponse(format!(
                "next_block {} does not advance past cursor {}",
                batch.next_block, self.position
            )));
        }
        if batch.next_block > self.range.end {
            return Err(BackendError::InvalidResponse(format!(
                "next_block {} is beyond range end {}",
                batch.next_block, self.range.end
            )));
        }
        Ok(())
    }

    /// Advance to `next_block`, after [`check`](Self::check) accepted it.
    pub fn advance(&mut self, next_block: u64) {
        debug_assert!(next_block > self.position && next_block <= self.range.end);
        self.position = next_block;
        self.batches += 1;
    }
}
