use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::models::InboundMessage;

/// Inbound traffic, already sorted by where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    GroupMessage(InboundMessage),
    AdminText {
        admin_id: String,
        text: String,
    },
    AdminButton {
        admin_id: String,
        callback_id: String,
        data: String,
        /// The alert carrying the button, when the platform still reports it.
        alert_message_id: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_target: i64,
    pub text: String,
    pub image_png: Option<Vec<u8>>,
    pub buttons: Vec<InlineButton>,
}

impl OutboundMessage {
    pub fn text(chat_target: i64, text: impl Into<String>) -> Self {
        Self {
            chat_target,
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;

    /// Answers a button press so the platform stops showing it as pending.
    async fn acknowledge(&self, _callback_id: &str, _text: &str) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Removes the inline keyboard from an answered alert.
    async fn clear_buttons(
        &self,
        _chat_target: i64,
        _message_id: i64,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every message; the first `failures` sends fail.
    #[derive(Default)]
    pub struct RecordingChat {
        pub sent: Mutex<Vec<OutboundMessage>>,
        pub attempts: AtomicU32,
        pub acknowledged: Mutex<Vec<(String, String)>>,
        pub cleared: Mutex<Vec<(i64, i64)>>,
        failures: AtomicU32,
    }

    impl RecordingChat {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }

        pub fn attempt_count(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Transport("connection reset".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.acknowledged
                .lock()
                .unwrap()
                .push((callback_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn clear_buttons(
            &self,
            chat_target: i64,
            message_id: i64,
        ) -> Result<(), DeliveryError> {
            self.cleared.lock().unwrap().push((chat_target, message_id));
            Ok(())
        }
    }
}
