//! A received pub/sub message, with per-`MessageType` fields filled in.
//!
//! Ported from `original_source/include/qclient/pubsub/Message.hh`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Subscribe,
    PatternSubscribe,
    Unsubscribe,
    PatternUnsubscribe,
    Message,
    PatternMessage,
}

/// - `Subscribe`/`Unsubscribe`: `message_type`, `active_subscriptions`, `channel`
/// - `PatternSubscribe`/`PatternUnsubscribe`: `message_type`, `active_subscriptions`, `pattern`
/// - `Message`: `message_type`, `channel`, `payload`
/// - `PatternMessage`: `message_type`, `channel`, `payload`, `pattern`
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub active_subscriptions: i32,
    pub pattern: String,
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn has_pattern(&self) -> bool {
        !self.pattern.is_empty()
    }

    pub fn new_message(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Message {
            message_type: MessageType::Message,
            active_subscriptions: 0,
            pattern: String::new(),
            channel: channel.into(),
            payload,
        }
    }

    pub fn new_pattern_message(
        channel: impl Into<String>,
        pattern: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Message {
            message_type: MessageType::PatternMessage,
            active_subscriptions: 0,
            pattern: pattern.into(),
            channel: channel.into(),
            payload,
        }
    }

    pub fn new_subscribe_ack(
        message_type: MessageType,
        channel_or_pattern: impl Into<String>,
        active_subscriptions: i32,
    ) -> Self {
        let name = channel_or_pattern.into();
        let (channel, pattern) = match message_type {
            MessageType::PatternSubscribe | MessageType::PatternUnsubscribe => {
                (String::new(), name)
            }
            _ => (name, String::new()),
        };

        Message {
            message_type,
            active_subscriptions,
            pattern,
            channel,
            payload: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_has_no_pattern_by_default() {
        let msg = Message::new_message("chan", b"hi".to_vec());
        assert!(!msg.has_pattern());
        assert_eq!(msg.channel, "chan");
    }

    #[test]
    fn pattern_message_carries_both_channel_and_pattern() {
        let msg = Message::new_pattern_message("chan.1", "chan.*", b"hi".to_vec());
        assert!(msg.has_pattern());
        assert_eq!(msg.pattern, "chan.*");
    }
}
