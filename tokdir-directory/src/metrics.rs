use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

struct DirectoryMetrics {
    conflict_retries: Counter<u64>,
    budget_exhausted: Counter<u64>,
    consistency_faults: Counter<u64>,
    fanout_sent: Counter<u64>,
    fanout_pruned: Counter<u64>,
    fanout_failed: Counter<u64>,
}

static METRICS: OnceLock<DirectoryMetrics> = OnceLock::new();

fn get_metrics() -> &'static DirectoryMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = opentelemetry::global::meter("tokdir-directory");
        DirectoryMetrics {
            conflict_retries: meter
                .u64_counter("tokdir.txn.conflict_retries")
                .with_description("Transaction attempts lost to a conflict and retried")
                .build(),
            budget_exhausted: meter
                .u64_counter("tokdir.txn.budget_exhausted")
                .with_description("Operations that ran out of retry attempts")
                .build(),
            consistency_faults: meter
                .u64_counter("tokdir.directory.consistency_faults")
                .with_description("Corrupt or duplicated shard records observed")
                .build(),
            fanout_sent: meter
                .u64_counter("tokdir.fanout.sent")
                .with_description("Notifications handed to the push transport")
                .build(),
            fanout_pruned: meter
                .u64_counter("tokdir.fanout.pruned")
                .with_description("Stale tokens removed after an invalid-token reply")
                .build(),
            fanout_failed: meter
                .u64_counter("tokdir.fanout.failed")
                .with_description("Deliveries or prunes that failed")
                .build(),
        }
    })
}

pub(crate) fn inc_conflict_retry(op: &'static str) {
    get_metrics().conflict_retries.add(1, &[KeyValue::new("op", op)]);
}

pub(crate) fn inc_budget_exhausted(op: &'static str) {
    get_metrics().budget_exhausted.add(1, &[KeyValue::new("op", op)]);
}

pub(crate) fn inc_consistency_fault() {
    get_metrics().consistency_faults.add(1, &[]);
}

pub(crate) fn record_fanout(sent: usize, pruned: usize, failed: usize) {
    let m = get_metrics();
    m.fanout_sent.add(sent as u64, &[]);
    m.fanout_pruned.add(pruned as u64, &[]);
    m.fanout_failed.add(failed as u64, &[]);
}
