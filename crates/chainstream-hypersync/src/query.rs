//! Wire types for the HyperSync JSON `/query` endpoint.

use serde::{Deserialize, Serialize};

use chainstream_core::{BatchResponse, BlockRange, LogRecord, LogSelection};

/// Log columns requested from the server.
pub const LOG_FIELDS: &[&str] = &[
    "block_number",
    "log_index",
    "transaction_index",
    "transaction_hash",
    "block_hash",
    "address",
    "data",
    "topic0",
    "topic1",
    "topic2",
    "topic3",
    "removed",
];

/// Request body for `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub from_block: u64,
    /// Exclusive.
    pub to_block: u64,
    pub logs: Vec<LogFilter>,
    pub field_selection: FieldSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_num_logs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFilter {
    pub address: Vec<String>,
    pub topics: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSelection {
    pub log: Vec<String>,
}

impl Query {
    /// Build the query for one sub-range. Each selection becomes one log
    /// filter; the server ORs them.
    pub fn for_range(
        subrange: BlockRange,
        selections: &[LogSelection],
        max_num_logs: Option<u64>,
    ) -> Self {
        Self {
            from_block: subrange.start,
            to_block: subrange.end,
            logs: selections
                .iter()
                .map(|s| LogFilter {
                    address: s.addresses.clone(),
                    topics: s.topics.clone(),
                })
                .collect(),
            field_selection: FieldSelection {
                log: LOG_FIELDS.iter().map(|f| f.to_string()).collect(),
            },
            max_num_logs,
        }
    }
}

/// Response body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub data: Vec<ResponseData>,
    pub next_block: u64,
    #[serde(default)]
    pub archive_height: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// A log as the server returns it, with topics in separate columns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLog {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_index: u64,
    pub transaction_hash: Option<String>,
    pub block_hash: Option<String>,
    pub address: Option<String>,
    pub data: Option<String>,
    pub topic0: Option<String>,
    pub topic1: Option<String>,
    pub topic2: Option<String>,
    pub topic3: Option<String>,
    pub removed: Option<bool>,
}

impl From<RawLog> for LogRecord {
    fn from(raw: RawLog) -> Self {
        let topics = [raw.topic0, raw.topic1, raw.topic2, raw.topic3]
            .into_iter()
            .map_while(|t| t)
            .collect();
        LogRecord {
            block_number: raw.block_number,
            log_index: raw.log_index,
            transaction_index: raw.transaction_index,
            transaction_hash: raw.transaction_hash.unwrap_or_default(),
            block_hash: raw.block_hash.unwrap_or_default(),
            address: raw.address.unwrap_or_default(),
            topics,
            data: raw.data.unwrap_or_default(),
            removed: raw.removed,
        }
    }
}

impl QueryResponse {
    /// Convert into a batch for `subrange`, clamping `next_block` to its end.
    pub fn into_batch(self, subrange: BlockRange) -> BatchResponse {
        let logs = self
            .data
            .into_iter()
            .flat_map(|d| d.logs)
            .map(LogRecord::from)
            .collect();
        BatchResponse {
            range: subrange,
            next_block: self.next_block.min(subrange.end),
            logs,
            archive_height: self.archive_height,
        }
    }
}
