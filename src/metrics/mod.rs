//! # Metrics
//!
//! In-process counters and the snapshot view built from them, with
//! OpenTelemetry instruments mirroring the counters.

pub mod aggregator;
pub mod otel;

pub use aggregator::{success_rate, MetricsAggregator, MetricsSnapshot, ProcessingTimeTotals};
pub use otel::QueueInstruments;
