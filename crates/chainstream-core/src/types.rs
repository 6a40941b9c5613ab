//! Shared types for the streaming pipeline.

use serde::{Deserialize, Serialize};

/// Maximum number of indexed topic slots on an EVM log.
pub const MAX_TOPIC_SLOTS: usize = 4;

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// A half-open block range `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block of the range (inclusive).
    pub start: u64,
    /// End of the range (exclusive).
    pub end: u64,
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Returns `true` if `start <= end`.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Number of blocks covered by the range.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block < self.end
    }

    /// The sub-range of at most `batch_size` blocks starting at `cursor`.
    pub fn slice(&self, cursor: u64, batch_size: u64) -> BlockRange {
        let start = cursor.max(self.start).min(self.end);
        BlockRange {
            start,
            end: start.saturating_add(batch_size).min(self.end),
        }
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ─── LogSelection ─────────────────────────────────────────────────────────────

/// Server-side filter for which logs to return.
///
/// `topics[i]` constrains topic slot `i`; an empty slot (or a missing one)
/// matches anything. Values inside one slot are alternatives, so their order
/// does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSelection {
    /// Only logs emitted by these contracts (empty = any address).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    /// Topic alternatives per slot.
    #[serde(default)]
    pub topics: Vec<Vec<String>>,
}

impl LogSelection {
    /// A selection that matches every log.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to logs emitted by `addr` (may be called repeatedly).
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.addresses.push(addr.into());
        self
    }

    /// Add an accepted value for topic slot 0 (the event signature).
    pub fn topic0(self, topic: impl Into<String>) -> Self {
        self.topic(0, topic)
    }

    /// Add an accepted value for topic slot `slot`.
    ///
    /// Slots at or past [`MAX_TOPIC_SLOTS`] all land in one extra slot. No log
    /// can satisfy it, and backends reject it at validation.
    pub fn topic(mut self, slot: usize, topic: impl Into<String>) -> Self {
        let slot = slot.min(MAX_TOPIC_SLOTS);
        if self.topics.len() <= slot {
            self.topics.resize_with(slot + 1, Vec::new);
        }
        self.topics[slot].push(topic.into());
        self
    }

    /// Local evaluation of the filter, for in-memory backends.
    pub fn matches(&self, log: &LogRecord) -> bool {
        let address_ok = self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(&log.address));
        if !address_ok {
            return false;
        }
        self.topics.iter().enumerate().all(|(slot, accepted)| {
            accepted.is_empty()
                || log
                    .topics
                    .get(slot)
                    .is_some_and(|t| accepted.iter().any(|a| a.eq_ignore_ascii_case(t)))
        })
    }
}

/// Returns `true` if any selection in `selections` matches `log`.
///
/// An empty selection list matches nothing.
pub fn any_matches(selections: &[LogSelection], log: &LogRecord) -> bool {
    selections.iter().any(|s| s.matches(log))
}

// ─── LogRecord ────────────────────────────────────────────────────────────────

/// A single event log as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub block_number: u64,
    #[serde(default)]
    pub log_index: u64,
    #[serde(default)]
    pub transaction_index: u64,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub address: String,
    /// Indexed topics in slot order.
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    /// Set when the log was dropped by a reorg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl LogRecord {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// The event signature hash, if the log has one.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

// ─── BatchResponse ────────────────────────────────────────────────────────────

/// The result of one batch fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// The sub-range that was requested.
    pub range: BlockRange,
    /// Exclusive upper bound reached by this batch; the cursor to resume from.
    pub next_block: u64,
    /// Matching logs, in backend order.
    pub logs: Vec<LogRecord>,
    /// Highest block the backend has indexed, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_height: Option<u64>,
}

impl BatchResponse {
    pub fn new(range: BlockRange, next_block: u64, logs: Vec<LogRecord>) -> Self {
        Self {
            range,
            next_block,
            logs,
            archive_height: None,
        }
    }

    /// Number of blocks this batch advanced the cursor by.
    pub fn blocks_covered(&self) -> u64 {
        self.next_block.saturating_sub(self.range.start)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    fn log(address: &str, topics: &[&str]) -> LogRecord {
        LogRecord {
            block_number: 1,
            address: address.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn range_slices() {
        let range = BlockRange::new(100, 350);
        assert_eq!(range.slice(100, 100), BlockRange::new(100, 200));
        assert_eq!(range.slice(300, 100), BlockRange::new(300, 350));
        assert_eq!(range.slice(350, 100), BlockRange::new(350, 350));
        assert_eq!(range.slice(100, u64::MAX), BlockRange::new(100, 350));
        assert_eq!(range.len(), 250);
        assert!(range.contains(349));
        assert!(!range.contains(350));
    }

    #[test]
    fn out_of_range_topic_slot_is_bounded() {
        let sel = LogSelection::all().topic(usize::MAX, "0xaa").topic(9, "0xbb");
        assert_eq!(sel.topics.len(), MAX_TOPIC_SLOTS + 1);
        assert_eq!(sel.topics[MAX_TOPIC_SLOTS], vec!["0xaa", "0xbb"]);
        assert!(!sel.matches(&log("0x01", &["0xaa", "0xaa", "0xaa", "0xaa"])));
    }

    #[test]
    fn range_validity() {
        assert!(BlockRange::new(5, 5).is_valid());
        assert!(BlockRange::new(5, 5).is_empty());
        assert!(!BlockRange::new(6, 5).is_valid());
        assert_eq!(BlockRange::new(6, 5).len(), 0);
        assert_eq!(BlockRange::new(1, 9).to_string(), "[1, 9)");
    }

    #[test]
    fn selection_topic_slots() {
        let sel = LogSelection::all().topic(2, "0xcc");
        assert_eq!(sel.topics, vec![vec![], vec![], vec!["0xcc".to_string()]]);

        assert!(sel.matches(&log("0x1", &["0xaa", "0xbb", "0xCC"])));
        assert!(!sel.matches(&log("0x1", &["0xaa", "0xbb"])));
    }

    #[test]
    fn selection_slot_values_are_alternatives() {
        let sel = LogSelection::all().topic0("0xbb").topic0(TRANSFER);
        assert!(sel.matches(&log("0x1", &[TRANSFER])));
        assert!(sel.matches(&log("0x1", &["0xBB"])));
        assert!(!sel.matches(&log("0x1", &["0xdd"])));
    }

    #[test]
    fn selection_address_filter() {
        let sel = LogSelection::all().address("0xAbCdEf");
        assert!(sel.matches(&log("0xabcdef", &[])));
        assert!(!sel.matches(&log("0x111111", &[])));
        assert!(LogSelection::all().matches(&log("0xanything", &["0x1"])));
    }

    #[test]
    fn empty_selection_list_matches_nothing() {
        assert!(!any_matches(&[], &log("0x1", &[TRANSFER])));
        assert!(any_matches(&[LogSelection::all()], &log("0x1", &[TRANSFER])));
    }

    #[test]
    fn batch_blocks_covered() {
        let batch = BatchResponse::new(BlockRange::new(100, 200), 180, vec![]);
        assert_eq!(batch.blocks_covered(), 80);
    }
}
