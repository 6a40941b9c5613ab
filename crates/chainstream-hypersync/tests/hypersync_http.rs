//! HTTP-level tests for the HyperSync fetcher against a mock server.

use std::sync::Arc;

use chainstream_core::{
    BackendError, BatchFetcher, BlockRange, ConsumerConfig, LogSelection, LogTally, NoopObserver,
    StreamConsumer, StreamController, StreamError, StreamOptions,
};
use chainstream_hypersync::{HyperSyncConfig, HyperSyncFetcher};
use mockito::{Matcher, Server};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

fn transfer(block: u64, log_index: u64) -> serde_json::Value {
    json!({
        "block_number": block,
        "log_index": log_index,
        "transaction_index": 0,
        "transaction_hash": "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
        "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "topic0": TRANSFER,
        "data": "0x00"
    })
}

#[tokio::test]
async fn fetch_posts_query_with_bearer_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/query")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "from_block": 20000000,
            "to_block": 20000050,
            "logs": [{"address": [], "topics": [[TRANSFER]]}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": [{"logs": [transfer(20000001, 0), transfer(20000001, 3)]}],
                "next_block": 20000050,
                "archive_height": 21000000
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let fetcher =
        HyperSyncFetcher::new(HyperSyncConfig::new(server.url()).with_api_token("test-token"))
            .unwrap();
    let batch = fetcher
        .fetch(
            BlockRange::new(20_000_000, 20_000_050),
            &[LogSelection::all().topic0(TRANSFER)],
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(batch.next_block, 20_000_050);
    assert_eq!(batch.logs.len(), 2);
    assert_eq!(batch.logs[1].log_index, 3);
    assert_eq!(batch.archive_height, Some(21_000_000));
}

#[tokio::test]
async fn server_errors_map_to_status() {
    let mut server = Server::new_async().await;
    let _unavailable = server
        .mock("POST", "/query")
        .match_body(Matcher::PartialJson(json!({"from_block": 0})))
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;
    let _bad_request = server
        .mock("POST", "/query")
        .match_body(Matcher::PartialJson(json!({"from_block": 10})))
        .with_status(400)
        .with_body("invalid query")
        .create_async()
        .await;

    let fetcher = HyperSyncFetcher::new(HyperSyncConfig::new(server.url())).unwrap();

    let err = fetcher.fetch(BlockRange::new(0, 10), &[]).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::Status {
            code: 503,
            body: "overloaded".into()
        }
    );
    assert!(err.is_retryable());

    let err = fetcher.fetch(BlockRange::new(10, 20), &[]).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { code: 400, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/query")
        .with_status(200)
        .with_body("{\"data\": [")
        .create_async()
        .await;

    let fetcher = HyperSyncFetcher::new(HyperSyncConfig::new(server.url())).unwrap();
    let err = fetcher.fetch(BlockRange::new(0, 10), &[]).await.unwrap_err();
    assert!(matches!(err, BackendError::Decode(_)));
}

#[tokio::test]
async fn streams_range_over_http() {
    let mut server = Server::new_async().await;
    let mut mocks = vec![];
    // The server stops the first request short; the stream resumes from 125.
    for (from, next, logs) in [
        (100, 125, vec![transfer(101, 0), transfer(124, 1)]),
        (125, 175, vec![transfer(150, 0)]),
        (175, 200, vec![]),
    ] {
        mocks.push(
            server
                .mock("POST", "/query")
                .match_body(Matcher::PartialJson(json!({"from_block": from})))
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(json!({"data": [{"logs": logs}], "next_block": next}).to_string())
                .expect(1)
                .create_async()
                .await,
        );
    }

    let fetcher = HyperSyncFetcher::new(HyperSyncConfig::new(server.url())).unwrap();
    let controller = StreamController::new(Arc::new(fetcher)).with_observer(Arc::new(NoopObserver));
    let mut stream = controller
        .start(
            &CancellationToken::new(),
            BlockRange::new(100, 200),
            vec![LogSelection::all().topic0(TRANSFER)],
            StreamOptions::with_batch_size(50),
        )
        .unwrap();

    let mut tally = LogTally::new();
    let summary = StreamConsumer::new(ConsumerConfig::default())
        .with_observer(Arc::new(NoopObserver))
        .run(&mut stream, &mut tally)
        .await
        .unwrap();

    for mock in &mocks {
        mock.assert_async().await;
    }
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.last_block, Some(200));
    assert_eq!(tally.logs, 3);
    assert_eq!(tally.distinct_blocks(), 3);
}

#[tokio::test]
async fn invalid_topic_fails_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/query").expect(0).create_async().await;

    let fetcher = HyperSyncFetcher::new(HyperSyncConfig::new(server.url())).unwrap();
    let err = StreamController::new(Arc::new(fetcher))
        .start(
            &CancellationToken::new(),
            BlockRange::new(0, 100),
            vec![LogSelection::all().topic0("0x1234")],
            StreamOptions::default(),
        )
        .unwrap_err();

    assert!(err.is_rejected_at_start());
    assert!(matches!(err, StreamError::InvalidSelection(BackendError::Rejected(_))));
    mock.assert_async().await;
}
