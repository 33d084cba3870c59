//! # Queue Metrics (OpenTelemetry)
//!
//! Instruments mirroring the in-process counters so an exporter installed on
//! the global meter provider sees the same numbers. Without an installed
//! provider the global no-op meter makes every call free.
//!
//! Labels:
//! - `priority`: HIGH, MEDIUM, LOW
//! - `task_type`: registered handler type

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

use crate::models::Priority;

static QUEUE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    QUEUE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("taskqueue-core"))
}

/// Instruments built once and shared by the metrics aggregator
#[derive(Clone)]
pub struct QueueInstruments {
    submitted: Counter<u64>,
    completed: Counter<u64>,
    failed: Counter<u64>,
    retried: Counter<u64>,
    cancelled: Counter<u64>,
    duration_ms: Histogram<f64>,
    channel_depth: Gauge<u64>,
}

impl std::fmt::Debug for QueueInstruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QueueInstruments")
    }
}

impl QueueInstruments {
    pub fn new() -> Self {
        let meter = meter();
        Self {
            submitted: meter
                .u64_counter("taskqueue.tasks.submitted.total")
                .with_description("Tasks accepted by the submission router")
                .build(),
            completed: meter
                .u64_counter("taskqueue.tasks.completed.total")
                .with_description("Tasks whose handler succeeded")
                .build(),
            failed: meter
                .u64_counter("taskqueue.tasks.failed.total")
                .with_description("Tasks that exhausted their retry budget")
                .build(),
            retried: meter
                .u64_counter("taskqueue.tasks.retried.total")
                .with_description("Failed attempts scheduled for another try")
                .build(),
            cancelled: meter
                .u64_counter("taskqueue.tasks.cancelled.total")
                .with_description("Tasks cancelled while pending")
                .build(),
            duration_ms: meter
                .f64_histogram("taskqueue.tasks.duration")
                .with_description("Handler execution time of completed tasks")
                .with_unit("ms")
                .build(),
            channel_depth: meter
                .u64_gauge("taskqueue.channel.depth.current")
                .with_description("Messages waiting in a tier channel")
                .build(),
        }
    }

    pub fn submitted(&self, priority: Priority) {
        self.submitted.add(1, &[KeyValue::new("priority", priority.as_str())]);
    }

    pub fn completed(&self, priority: Priority, duration_ms: f64) {
        let labels = [KeyValue::new("priority", priority.as_str())];
        self.completed.add(1, &labels);
        self.duration_ms.record(duration_ms, &labels);
    }

    pub fn failed(&self, task_type: &str) {
        self.failed.add(1, &[KeyValue::new("task_type", task_type.to_string())]);
    }

    pub fn retried(&self, task_type: &str) {
        self.retried.add(1, &[KeyValue::new("task_type", task_type.to_string())]);
    }

    pub fn cancelled(&self) {
        self.cancelled.add(1, &[]);
    }

    pub fn channel_depth(&self, priority: Priority, depth: u64) {
        self.channel_depth
            .record(depth, &[KeyValue::new("priority", priority.as_str())]);
    }
}

impl Default for QueueInstruments {
    fn default() -> Self {
        Self::new()
    }
}
