//! # Tier Channels
//!
//! [`MessageChannel`] is the delivery contract a worker pool consumes from:
//! FIFO within the channel, at-least-once, explicit acknowledgement.
//!
//! [`InMemoryChannel`] implements it with pgmq-style visibility semantics.
//! A received message moves to an in-flight set with a visibility deadline;
//! if it is not acknowledged before the deadline it becomes visible again at
//! the head of the channel. Undelivered messages older than the TTL are moved
//! to the configured dead-letter channel instead of being handed out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::errors::{ChannelError, ChannelResult};
use super::message::{Delivery, TaskMessage};

/// Ordered, at-least-once delivery channel for one tier
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Enqueue at the tail. Returns the channel-local message id.
    async fn send(&self, message: TaskMessage) -> ChannelResult<u64>;

    /// Wait up to `wait` for the next visible message
    async fn receive(&self, wait: Duration) -> ChannelResult<Option<Delivery>>;

    /// Remove a delivered message for good. Returns `false` if it was not
    /// in flight (already acknowledged, or unknown).
    async fn ack(&self, message_id: u64) -> ChannelResult<bool>;

    /// Messages waiting to be received
    async fn depth(&self) -> ChannelResult<u64>;

    /// Stop accepting sends and wake every waiting receiver
    fn close(&self);
}

/// Timing knobs of an in-memory channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub message_ttl: Duration,
    pub visibility_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            message_ttl: Duration::from_secs(crate::constants::system::DEFAULT_MESSAGE_TTL_SECONDS),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    message_id: u64,
    message: TaskMessage,
    read_count: u32,
    enqueued_at: DateTime<Utc>,
    enqueued_instant: Instant,
}

#[derive(Debug)]
struct InFlight {
    envelope: Envelope,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct ChannelState {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<u64, InFlight>,
}

pub struct InMemoryChannel {
    name: String,
    settings: ChannelSettings,
    state: Mutex<ChannelState>,
    notify: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
    dead_letter: Option<Arc<dyn MessageChannel>>,
}

impl std::fmt::Debug for InMemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChannel")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("has_dead_letter", &self.dead_letter.is_some())
            .finish()
    }
}

impl InMemoryChannel {
    pub fn new(name: impl Into<String>, settings: ChannelSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(ChannelState::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            dead_letter: None,
        }
    }

    /// Route TTL-expired messages to `dead_letter`
    pub fn with_dead_letter(mut self, dead_letter: Arc<dyn MessageChannel>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Pop the next live message, reclaiming lapsed in-flight messages and
    /// collecting expired ones on the way.
    fn take_next(&self, now: Instant) -> (Option<Delivery>, Vec<Envelope>) {
        let mut state = self.state.lock();

        let mut lapsed: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        // Re-queue in original order at the head
        lapsed.sort_unstable_by(|a, b| b.cmp(a));
        for id in lapsed {
            if let Some(in_flight) = state.in_flight.remove(&id) {
                debug!(channel = %self.name, message_id = id, "Visibility timeout lapsed, message visible again");
                state.ready.push_front(in_flight.envelope);
            }
        }

        let mut expired = Vec::new();
        while let Some(mut envelope) = state.ready.pop_front() {
            if envelope.enqueued_instant + self.settings.message_ttl <= now {
                expired.push(envelope);
                continue;
            }

            envelope.read_count += 1;
            let delivery = Delivery {
                message_id: envelope.message_id,
                message: envelope.message.clone(),
                read_count: envelope.read_count,
                enqueued_at: envelope.enqueued_at,
            };
            state.in_flight.insert(
                envelope.message_id,
                InFlight {
                    envelope,
                    visible_at: now + self.settings.visibility_timeout,
                },
            );
            return (Some(delivery), expired);
        }

        (None, expired)
    }

    fn next_visibility_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .in_flight
            .values()
            .map(|in_flight| in_flight.visible_at)
            .min()
    }

    async fn dead_letter_expired(&self, expired: Vec<Envelope>) {
        for envelope in expired {
            warn!(
                channel = %self.name,
                task_id = %envelope.message.task_id,
                "Message TTL expired before delivery, routing to dead-letter channel"
            );
            let Some(dead_letter) = &self.dead_letter else {
                continue;
            };
            if let Err(e) = dead_letter.send(envelope.message).await {
                warn!(channel = %self.name, error = %e, "Failed to dead-letter expired message");
            }
        }
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: TaskMessage) -> ChannelResult<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::closed(&self.name));
        }

        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().ready.push_back(Envelope {
            message_id,
            message,
            read_count: 0,
            enqueued_at: Utc::now(),
            enqueued_instant: Instant::now(),
        });
        self.notify.notify_one();
        Ok(message_id)
    }

    async fn receive(&self, wait: Duration) -> ChannelResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ChannelError::closed(&self.name));
            }

            // Register interest before checking so a concurrent send is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let (delivery, expired) = self.take_next(now);
            if !expired.is_empty() {
                self.dead_letter_expired(expired).await;
            }
            if let Some(delivery) = delivery {
                return Ok(Some(delivery));
            }
            if now >= deadline {
                return Ok(None);
            }

            let wake_at = self
                .next_visibility_deadline()
                .map_or(deadline, |visible_at| visible_at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, message_id: u64) -> ChannelResult<bool> {
        let mut state = self.state.lock();
        if state.in_flight.remove(&message_id).is_some() {
            return Ok(true);
        }
        // Lapsed back into the ready queue before the ack arrived
        if let Some(position) = state.ready.iter().position(|e| e.message_id == message_id) {
            state.ready.remove(position);
            return Ok(true);
        }
        Ok(false)
    }

    async fn depth(&self) -> ChannelResult<u64> {
        Ok(self.state.lock().ready.len() as u64)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
