mod common;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use common::{assert_invariants, config, memory_directory};
use tokdir_directory::{
    DirectoryError,
    notifier::{FanoutNotifier, FanoutReport, PushError, PushMessage, PushTransport},
};

/// Records every delivery; tokens prefixed `bad-` are reported as gone and
/// tokens prefixed `flaky-` fail transiently.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn delivered(&self) -> HashSet<String> {
        self.delivered.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(
        &self,
        token: &str,
        message: &PushMessage,
    ) -> Result<(), PushError> {
        assert_eq!(message.title, "Incident");
        if token.starts_with("bad-") {
            return Err(PushError::InvalidToken);
        }
        if token.starts_with("flaky-") {
            return Err(PushError::Transient("gateway busy".to_string()));
        }
        self.delivered.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

fn message() -> PushMessage {
    PushMessage {
        title: "Incident".to_string(),
        body: "Service degraded".to_string(),
        data: [("incident_id".to_string(), "42".to_string())].into(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_reaches_every_device() {
    let (dir, _store) = memory_directory(config(4));
    for i in 0..25 {
        dir.register_token(&format!("d{i}"), &format!("tok-{i}"))
            .await
            .unwrap();
    }
    let transport = Arc::new(RecordingTransport::default());
    let notifier =
        FanoutNotifier::new(dir.clone(), transport.clone(), 5).with_concurrency(3);

    let report = notifier.broadcast(message()).await.unwrap();
    assert_eq!(
        report,
        FanoutReport {
            sent: 25,
            pruned: 0,
            failed: 0
        }
    );
    let expected: HashSet<String> = (0..25).map(|i| format!("tok-{i}")).collect();
    assert_eq!(transport.delivered(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_tokens_are_pruned() {
    let (dir, store) = memory_directory(config(3).with_max_retry_attempts(1000));
    for i in 0..10 {
        let token = if i % 3 == 0 {
            format!("bad-{i}")
        } else {
            format!("ok-{i}")
        };
        dir.register_token(&format!("d{i}"), &token).await.unwrap();
    }
    let transport = Arc::new(RecordingTransport::default());
    let notifier = FanoutNotifier::new(dir.clone(), transport.clone(), 4);

    let report = notifier.broadcast(message()).await.unwrap();
    assert_eq!(report.sent, 6);
    assert_eq!(report.pruned, 4);
    assert_eq!(report.failed, 0);

    let map = assert_invariants(&store, 3).await;
    assert_eq!(map.len(), 6);
    assert!(map.values().all(|t| t.starts_with("ok-")));
    for i in [0, 3, 6, 9] {
        assert_eq!(dir.lookup_token(&format!("d{i}")).await.unwrap(), None);
    }
}

#[tokio::test]
async fn transient_failures_do_not_stop_the_batch() {
    let (dir, store) = memory_directory(config(5));
    dir.register_token("d1", "flaky-1").await.unwrap();
    dir.register_token("d2", "ok-2").await.unwrap();
    dir.register_token("d3", "flaky-3").await.unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let notifier = FanoutNotifier::new(dir.clone(), transport.clone(), 2);

    let report = notifier.broadcast(message()).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.pruned, 0);
    // transient failures keep the device registered
    assert_eq!(assert_invariants(&store, 5).await.len(), 3);
}

#[tokio::test]
async fn broadcast_on_empty_directory_sends_nothing() {
    let (dir, _store) = memory_directory(config(5));
    let transport = Arc::new(RecordingTransport::default());
    let notifier = FanoutNotifier::new(dir, transport.clone(), 10);

    let report = notifier.broadcast(message()).await.unwrap();
    assert_eq!(report, FanoutReport::default());
    assert!(transport.delivered().is_empty());
}

#[tokio::test]
async fn scan_failure_aborts_broadcast() {
    let (dir, store) = memory_directory(config(5));
    dir.register_token("d1", "ok-1").await.unwrap();
    store.set_available(false);
    let transport = Arc::new(RecordingTransport::default());
    let notifier = FanoutNotifier::new(dir, transport.clone(), 10);

    let err = notifier.broadcast(message()).await.unwrap_err();
    assert!(matches!(err, DirectoryError::StoreUnavailable(_)));
    assert!(transport.delivered().is_empty());
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let (dir, _store) = memory_directory(config(5));
    let notifier =
        FanoutNotifier::new(dir, Arc::new(RecordingTransport::default()), 0);
    assert!(matches!(
        notifier.broadcast(message()).await,
        Err(DirectoryError::InvalidArgument(_))
    ));
}

/// Panics on tokens prefixed `boom-`, like a transport with a bug.
struct PanickingTransport;

#[async_trait]
impl PushTransport for PanickingTransport {
    async fn send(
        &self,
        token: &str,
        _message: &PushMessage,
    ) -> Result<(), PushError> {
        if token.starts_with("boom-") {
            panic!("transport bug on {token}");
        }
        Ok(())
    }
}

#[tokio::test]
async fn dead_workers_fail_the_broadcast() {
    let (dir, store) = memory_directory(config(5));
    dir.register_token("d1", "boom-1").await.unwrap();
    for i in 2..8 {
        dir.register_token(&format!("d{i}"), &format!("ok-{i}"))
            .await
            .unwrap();
    }
    let notifier = FanoutNotifier::new(dir, Arc::new(PanickingTransport), 1)
        .with_concurrency(1);

    let err = notifier.broadcast(message()).await.unwrap_err();
    match err {
        DirectoryError::FanoutIncomplete {
            lost_workers,
            report,
        } => {
            assert_eq!(lost_workers, 1);
            assert!(report.sent < 7);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // nothing is pruned by a crashing transport
    assert_eq!(assert_invariants(&store, 5).await.len(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn surviving_workers_still_report_the_loss() {
    let (dir, _store) = memory_directory(config(4));
    dir.register_token("d0", "boom-0").await.unwrap();
    for i in 1..12 {
        dir.register_token(&format!("d{i}"), &format!("ok-{i}"))
            .await
            .unwrap();
    }
    let notifier = FanoutNotifier::new(dir, Arc::new(PanickingTransport), 3)
        .with_concurrency(4);

    assert!(matches!(
        notifier.broadcast(message()).await,
        Err(DirectoryError::FanoutIncomplete { lost_workers: 1, .. })
    ));
}
