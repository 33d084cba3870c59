use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::channel::{ChannelSettings, InMemoryChannel, MessageChannel};
use super::errors::ChannelResult;
use super::message::TaskMessage;
use crate::constants::{queue_for_priority, queues};
use crate::models::Priority;

/// One channel per priority tier plus the shared dead-letter channel.
///
/// Channels are the serialization point for dispatch; the set itself holds
/// no lock and is cheap to clone.
#[derive(Clone)]
pub struct PriorityChannelSet {
    tiers: [Arc<dyn MessageChannel>; 3],
    dead_letter: Arc<dyn MessageChannel>,
}

impl std::fmt::Debug for PriorityChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityChannelSet")
            .field(
                "tiers",
                &self.tiers.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
            )
            .field("dead_letter", &self.dead_letter.name())
            .finish()
    }
}

impl PriorityChannelSet {
    /// Assemble from externally built channels, indexed HIGH, MEDIUM, LOW
    pub fn new(tiers: [Arc<dyn MessageChannel>; 3], dead_letter: Arc<dyn MessageChannel>) -> Self {
        Self { tiers, dead_letter }
    }

    /// In-process channels sharing one dead-letter destination
    pub fn in_memory(settings: ChannelSettings) -> Self {
        let dead_letter: Arc<dyn MessageChannel> =
            Arc::new(InMemoryChannel::new(queues::DEAD_LETTER_QUEUE, settings));
        let tier = |priority: Priority| -> Arc<dyn MessageChannel> {
            Arc::new(
                InMemoryChannel::new(queue_for_priority(priority), settings)
                    .with_dead_letter(Arc::clone(&dead_letter)),
            )
        };

        Self {
            tiers: [
                tier(Priority::High),
                tier(Priority::Medium),
                tier(Priority::Low),
            ],
            dead_letter,
        }
    }

    pub fn channel(&self, priority: Priority) -> &Arc<dyn MessageChannel> {
        &self.tiers[priority.index()]
    }

    pub fn dead_letter(&self) -> &Arc<dyn MessageChannel> {
        &self.dead_letter
    }

    /// Publish onto the channel of the message's tier
    pub async fn publish(&self, message: TaskMessage) -> ChannelResult<u64> {
        let priority = message.priority;
        let task_id = message.task_id.clone();
        let message_id = self.channel(priority).send(message).await?;
        debug!(
            task_id = %task_id,
            priority = %priority,
            message_id,
            "Published task message"
        );
        Ok(message_id)
    }

    pub async fn depth(&self, priority: Priority) -> ChannelResult<u64> {
        self.channel(priority).depth().await
    }

    pub async fn depths(&self) -> ChannelResult<HashMap<Priority, u64>> {
        let mut depths = HashMap::with_capacity(Priority::ALL.len());
        for priority in Priority::ALL {
            depths.insert(priority, self.depth(priority).await?);
        }
        Ok(depths)
    }

    pub fn close_all(&self) {
        for channel in &self.tiers {
            channel.close();
        }
        self.dead_letter.close();
    }
}
