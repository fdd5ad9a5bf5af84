//! Live updates: head and gas-price polling turned into ordered, reorg-aware events.

pub mod events;
pub mod subscriber;
pub mod subscription;

pub use events::{ChainEvent, GasPriceTick};
pub use subscriber::{HeadUpdate, LiveConfig, LiveUpdateSubscriber};
pub use subscription::{Subscription, SubscriptionError, Topic};
