//! # Integration Tests
//!
//! End-to-end scenarios: `TelemetryChannel` against an in-process HTTP
//! ingestion endpoint, with real storage directories.

#[cfg(test)]
mod ingestion_stub;

#[cfg(test)]
mod contract_tests {
    use contracts::{ChannelConfig, SendOutcome};

    #[test]
    fn test_default_config_passes_validation() {
        assert!(config_loader::ConfigLoader::validate(&ChannelConfig::default()).is_ok());
    }

    #[test]
    fn test_throttling_statuses_are_retried() {
        for code in [408, 429, 500, 503] {
            assert!(SendOutcome::from_status(code).needs_retry());
            assert!(contracts::is_retriable_status(code));
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use channel::TelemetryChannel;
    use contracts::{ChannelConfig, PolicyState, TelemetryItem};
    use observability::TransmissionMetricsHandler;
    use tempfile::TempDir;

    use crate::ingestion_stub::{IngestionStub, StubReply};

    fn config(endpoint: String, storage: &Path) -> ChannelConfig {
        let mut config = ChannelConfig::default();
        config.network.endpoint_url = endpoint;
        config.network.request_timeout_ms = 5_000;
        config.storage.directory = Some(storage.to_path_buf());
        config.policy.default_throttle_ms = 50;
        config.policy.backoff_base_ms = 50;
        config.policy.backoff_max_ms = 200;
        config.loader.idle_interval_ms = 20;
        config.loader.dispatch_interval_ms = 5;
        config
    }

    fn item(n: usize) -> TelemetryItem {
        TelemetryItem::new("Event").with_property("n", n as u64)
    }

    async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    fn pending_files(channel: &TelemetryChannel) -> usize {
        channel
            .storage_status()
            .map(|status| status.pending_files + status.in_flight_files)
            .unwrap_or(0)
    }

    /// A full batch becomes exactly one gzip POST and leaves nothing on disk
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_batch_is_one_gzip_post() {
        let stub = IngestionStub::start(vec![]).await;
        let dir = TempDir::new().unwrap();
        let channel = TelemetryChannel::builder(config(stub.url(), dir.path()))
            .build()
            .unwrap();

        for n in 0..128 {
            channel.submit(item(n));
        }

        assert!(wait_until(Duration::from_secs(5), || stub.request_count() == 1).await);
        assert!(channel.stop(Duration::from_secs(2)).await);

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.path, "/v2/track");
        assert_eq!(request.headers["content-encoding"], "gzip");
        assert_eq!(request.headers["content-type"], "application/x-json-stream");

        let lines = request.lines();
        assert_eq!(lines.len(), 128);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["properties"]["n"], 0);
        let last: serde_json::Value = serde_json::from_str(&lines[127]).unwrap();
        assert_eq!(last["properties"]["n"], 127);

        assert_eq!(pending_files(&channel), 0);
    }

    /// Three throttling responses, then success: persisted and reloaded each
    /// time, delivered exactly once
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_failures_are_retried_from_disk() {
        let stub = IngestionStub::start(vec![
            StubReply::Status(503),
            StubReply::Status(503),
            StubReply::Status(503),
            StubReply::Status(200),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(TransmissionMetricsHandler::new());
        let channel = TelemetryChannel::builder(config(stub.url(), dir.path()))
            .with_handler(metrics.clone())
            .build()
            .unwrap();

        channel.submit(item(1));
        channel.submit(item(2));
        channel.flush();

        assert!(wait_until(Duration::from_secs(10), || stub.request_count() >= 4).await);
        assert!(wait_until(Duration::from_secs(2), || pending_files(&channel) == 0).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        channel.stop(Duration::from_secs(2)).await;

        let requests = stub.requests();
        assert_eq!(requests.len(), 4);
        // Every attempt carries the same batch
        for request in &requests {
            assert_eq!(request.lines(), requests[0].lines());
        }

        let summary = metrics.summary();
        assert_eq!(summary.attempts, 4);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.status_counts.get(&503), Some(&3));
    }

    /// While blocked, new batches go to disk and the endpoint is never called
    #[tokio::test]
    async fn test_blocked_policy_skips_network() {
        let stub = IngestionStub::start(vec![]).await;
        let dir = TempDir::new().unwrap();
        let channel = TelemetryChannel::builder(config(stub.url(), dir.path()))
            .build()
            .unwrap();

        assert!(channel
            .policy()
            .suspend(PolicyState::Blocked, Duration::from_secs(60)));
        channel.submit(item(1));
        channel.flush();

        assert!(wait_until(Duration::from_secs(2), || pending_files(&channel) == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stub.request_count(), 0);
        assert_eq!(channel.policy_state(), PolicyState::Blocked);

        channel.stop(Duration::from_secs(1)).await;
    }

    /// Quota errors block the channel and keep the batch on disk
    #[tokio::test]
    async fn test_quota_response_blocks_and_persists() {
        let stub = IngestionStub::start(vec![StubReply::Status(402)]).await;
        let dir = TempDir::new().unwrap();
        let channel = TelemetryChannel::builder(config(stub.url(), dir.path()))
            .build()
            .unwrap();

        channel.submit(item(1));
        channel.flush();

        assert!(
            wait_until(Duration::from_secs(2), || channel.policy_state()
                == PolicyState::Blocked)
            .await
        );
        assert!(wait_until(Duration::from_secs(2), || pending_files(&channel) == 1).await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(stub.request_count(), 1);

        channel.stop(Duration::from_secs(1)).await;
    }

    /// Transmissions left on disk by a previous run are sent by the next one
    #[tokio::test]
    async fn test_restart_sends_persisted_transmissions() {
        let dir = TempDir::new().unwrap();

        let offline = IngestionStub::start(vec![]).await;
        let first = TelemetryChannel::builder(config(offline.url(), dir.path()))
            .build()
            .unwrap();
        first
            .policy()
            .suspend(PolicyState::Blocked, Duration::from_secs(60));
        first.submit(item(7));
        first.flush();
        assert!(wait_until(Duration::from_secs(2), || pending_files(&first) == 1).await);
        first.stop(Duration::from_secs(1)).await;
        assert_eq!(offline.request_count(), 0);

        let online = IngestionStub::start(vec![]).await;
        let second = TelemetryChannel::builder(config(online.url(), dir.path()))
            .build()
            .unwrap();

        assert!(wait_until(Duration::from_secs(3), || online.request_count() == 1).await);
        assert!(wait_until(Duration::from_secs(2), || pending_files(&second) == 0).await);
        second.stop(Duration::from_secs(1)).await;

        let lines = online.requests()[0].lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"n\":7"));
    }

    /// Only retriable item rejections of a 206 are sent again
    #[tokio::test]
    async fn test_partial_response_resends_retriable_items() {
        let partial = r#"{"itemsReceived":3,"itemsAccepted":1,"errors":[
            {"index":1,"statusCode":500,"message":"try later"},
            {"index":2,"statusCode":400,"message":"invalid item"}]}"#;
        let stub = IngestionStub::start(vec![StubReply::Body(206, partial.to_string())]).await;
        let dir = TempDir::new().unwrap();
        let channel = TelemetryChannel::builder(config(stub.url(), dir.path()))
            .build()
            .unwrap();

        for n in 0..3 {
            channel.submit(item(n));
        }
        channel.flush();

        assert!(wait_until(Duration::from_secs(3), || stub.request_count() == 2).await);
        assert!(wait_until(Duration::from_secs(2), || pending_files(&channel) == 0).await);
        channel.stop(Duration::from_secs(1)).await;

        let requests = stub.requests();
        let first = requests[0].lines();
        let retry = requests[1].lines();
        assert_eq!(first.len(), 3);
        assert_eq!(retry, vec![first[1].clone()]);
    }

    /// Developer mode sends every item in its own request
    #[tokio::test]
    async fn test_developer_mode_sends_immediately() {
        let stub = IngestionStub::start(vec![]).await;
        let dir = TempDir::new().unwrap();
        let mut config = config(stub.url(), dir.path());
        config.developer_mode = true;
        let channel = TelemetryChannel::builder(config).build().unwrap();

        for n in 0..3 {
            channel.submit(item(n));
        }

        assert!(wait_until(Duration::from_secs(3), || stub.request_count() == 3).await);
        channel.stop(Duration::from_secs(1)).await;
        assert!(stub.requests().iter().all(|r| r.lines().len() == 1));
    }

    /// `stop` honors its deadline when the endpoint never answers
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_deadline_with_unresponsive_endpoint() {
        let stub = IngestionStub::start(vec![StubReply::Hang]).await;
        let dir = TempDir::new().unwrap();
        let mut config = config(stub.url(), dir.path());
        config.network.request_timeout_ms = 60_000;
        let channel = TelemetryChannel::builder(config).build().unwrap();

        channel.submit(item(1));
        channel.flush();
        assert!(wait_until(Duration::from_secs(2), || stub.request_count() == 1).await);

        let started = Instant::now();
        let drained = channel.stop(Duration::from_secs(1)).await;
        let elapsed = started.elapsed();

        assert!(!drained);
        assert!(elapsed >= Duration::from_millis(900), "stopped after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1800), "stopped after {elapsed:?}");
    }

    /// Storage that cannot be created leaves a network-only channel
    #[tokio::test]
    async fn test_unusable_storage_degrades_to_network_only() {
        let stub = IngestionStub::start(vec![]).await;
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let channel = TelemetryChannel::builder(config(stub.url(), &blocker.join("store")))
            .build()
            .unwrap();
        assert!(channel.storage_status().is_none());

        channel.submit(item(1));
        channel.flush();
        assert!(wait_until(Duration::from_secs(3), || stub.request_count() == 1).await);
        assert!(channel.stop(Duration::from_secs(1)).await);
    }
}
