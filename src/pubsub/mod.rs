//! Pub/sub: subscribe to channels and patterns, receive fanned-out
//! messages, and replay active subscriptions across reconnects.
//!
//! Ported from `original_source/include/qclient/pubsub/`.

pub mod base_subscriber;
pub mod message;
pub mod subscriber;
