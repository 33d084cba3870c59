//! # Messaging Module
//!
//! Priority-tiered delivery channels. Each tier has its own FIFO channel with
//! a message TTL and at-least-once semantics; all tiers share one dead-letter
//! channel that receives messages whose TTL lapsed before delivery.

pub mod channel;
pub mod channel_set;
pub mod errors;
pub mod message;

pub use channel::{ChannelSettings, InMemoryChannel, MessageChannel};
pub use channel_set::PriorityChannelSet;
pub use errors::{ChannelError, ChannelResult};
pub use message::{Delivery, TaskMessage};
