//! Event bus: in-process pub/sub + request/response.

pub mod bus;

pub use bus::{EventBus, SubscriptionId};
