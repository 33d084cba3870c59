use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskqueue_core::events::{PublishError, StatusEvent, StatusSink};
use taskqueue_core::registry::{HandlerError, TaskHandler};

/// Plays back a fixed script of outcomes, then succeeds forever
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<(), String>>>,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedHandler {
    pub fn new(script: Vec<Result<(), String>>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(script: Vec<Result<(), String>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    /// Fails the first `failures` calls
    pub fn failing_times(failures: usize) -> Arc<Self> {
        Self::new((0..failures).map(|i| Err(format!("scripted failure {}", i + 1))).collect())
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn execute(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Err(message)) => Err(HandlerError::failed(message)),
            Some(Ok(())) | None => Ok(()),
        }
    }

    fn description(&self) -> &str {
        "scripted test handler"
    }
}

/// Fails every call
pub struct AlwaysFailHandler {
    calls: AtomicU32,
}

impl AlwaysFailHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for AlwaysFailHandler {
    async fn execute(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(HandlerError::failed(format!("permanent failure on call {call}")))
    }
}

/// Sleeps far longer than any test timeout
pub struct HangingHandler;

#[async_trait]
impl TaskHandler for HangingHandler {
    async fn execute(&self, _payload: &serde_json::Value) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(())
    }
}

/// Status sink that records events, or rejects them all
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    reject: bool,
    rejected: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            reject: false,
            rejected: AtomicU64::new(0),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            reject: true,
            rejected: AtomicU64::new(0),
        })
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl StatusSink for RecordingSink {
    fn name(&self) -> &str {
        "recording-sink"
    }

    fn deliver(&self, event: &StatusEvent) -> Result<(), PublishError> {
        if self.reject {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PublishError::SinkRejected("sink offline".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}
