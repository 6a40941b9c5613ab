//! `chainstream logs-in-range`: stream matching logs for a block range and
//! report totals.
//!
//! Batches are handled in order and acknowledged one at a time; Ctrl-C
//! cancels the stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use chainstream_core::{
    BatchHandler, BatchResponse, BlockRange, ConsumerConfig, LogSelection, LogTally, RetryConfig,
    RetryingFetcher, StreamConsumer, StreamController, StreamError, StreamOptions, TimeoutPolicy,
};
use chainstream_hypersync::{HyperSyncConfig, HyperSyncFetcher};

/// Parsed `logs-in-range` arguments.
#[derive(Debug, Clone)]
pub struct LogsArgs {
    pub url: Option<String>,
    pub from: u64,
    pub to: u64,
    pub batch_size: u64,
    pub window: usize,
    pub topics: Vec<String>,
    pub addresses: Vec<String>,
    pub timeout_secs: u64,
    pub on_timeout: TimeoutPolicy,
    pub retries: u32,
}

impl LogsArgs {
    fn selection(&self) -> LogSelection {
        let selection = self
            .addresses
            .iter()
            .fold(LogSelection::all(), |s, a| s.address(a.as_str()));
        self.topics
            .iter()
            .fold(selection, |s, t| s.topic0(t.as_str()))
    }

    fn hypersync_config(&self) -> HyperSyncConfig {
        let mut config = HyperSyncConfig::from_env();
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        config
    }
}

/// Counts logs and blocks, logging progress for every batch.
struct Progress {
    range: BlockRange,
    started: Instant,
    tally: LogTally,
}

#[async_trait]
impl BatchHandler for Progress {
    async fn handle(&mut self, batch: &BatchResponse) -> Result<(), StreamError> {
        self.tally.handle(batch).await?;
        tracing::info!(
            start_block = self.range.start,
            current_sync_block = batch.next_block,
            end_block = self.range.end,
            logs = batch.logs.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "stream logs batch received"
        );
        Ok(())
    }
}

pub async fn run(args: LogsArgs) -> Result<()> {
    let config = args.hypersync_config();
    let fetcher = HyperSyncFetcher::new(config.clone())
        .with_context(|| format!("failed to create hypersync client for {}", config.url))?;
    let retry = RetryConfig {
        max_retries: args.retries,
        ..RetryConfig::default()
    };
    let controller = StreamController::new(Arc::new(RetryingFetcher::new(fetcher, retry)));

    let range = BlockRange::new(args.from, args.to);
    let options = StreamOptions::with_batch_size(args.batch_size).window(args.window);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling stream");
            interrupt.cancel();
        }
    });

    let mut stream = controller
        .start(&cancel, range, vec![args.selection()], options)
        .with_context(|| format!("failed to start log stream for {range}"))?;

    let consumer = StreamConsumer::new(ConsumerConfig {
        inactivity_timeout: Duration::from_secs(args.timeout_secs),
        on_timeout: args.on_timeout,
    });
    let mut progress = Progress {
        range,
        started: Instant::now(),
        tally: LogTally::new(),
    };

    let outcome = consumer.run(&mut stream, &mut progress).await;
    cancel.cancel();

    match outcome {
        Ok(summary) => {
            tracing::info!(
                url = %config.url,
                duration_ms = summary.elapsed.as_millis() as u64,
                batches = summary.batches,
                total_blocks = progress.tally.distinct_blocks(),
                total_logs = progress.tally.logs,
                "stream request successfully completed"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                url = %config.url,
                start_block = range.start,
                end_block = range.end,
                latest_batch_block_received = ?progress.tally.latest_batch_block,
                error = %e,
                "log range stream did not complete"
            );
            Err(e).with_context(|| format!("logs-in-range {range} failed"))
        }
    }
}
