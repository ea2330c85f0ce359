use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::chat::{ChatClient, ChatEvent, InlineButton, OutboundMessage};
use crate::db::Store;
use crate::error::{FeedbackError, StorageError};
use crate::feedback::{callback_data, AdminCommand, FeedbackHandler};
use crate::ingest::{needs_review, IngestHandler};
use crate::models::{MessageRecord, SentimentLabel};
use crate::report;
use crate::telegram::TelegramClient;

const POLL_SECS: u64 = 30;
const BACKOFF: Duration = Duration::from_secs(5);

struct Reply {
    text: String,
    accepted: bool,
}

impl Reply {
    fn rejected(text: String) -> Self {
        Self {
            text,
            accepted: false,
        }
    }
}

/// Routes chat events to ingestion and the correction protocol.
pub struct Bot {
    store: Store,
    ingest: IngestHandler,
    feedback: FeedbackHandler,
    chat: Arc<dyn ChatClient>,
    admin_chat: i64,
    alert_threshold: f64,
}

impl Bot {
    pub fn new(
        store: Store,
        ingest: IngestHandler,
        feedback: FeedbackHandler,
        chat: Arc<dyn ChatClient>,
        admin_chat: i64,
        alert_threshold: f64,
    ) -> Self {
        Self {
            store,
            ingest,
            feedback,
            chat,
            admin_chat,
            alert_threshold,
        }
    }

    /// Storage failures are returned so the caller can redeliver the event.
    pub async fn handle_event(&self, event: ChatEvent) -> Result<(), StorageError> {
        match event {
            ChatEvent::GroupMessage(inbound) => {
                let ingested = self.ingest.ingest(&inbound).await?;
                if ingested.created && needs_review(&ingested.record, self.alert_threshold) {
                    self.send_alert(&ingested.record).await;
                }
                Ok(())
            }
            ChatEvent::AdminText { admin_id, text } => match AdminCommand::parse_text(&text) {
                Some(Ok(command)) => {
                    let reply = self.run_command(command, &admin_id).await?;
                    self.reply(reply.text).await;
                    Ok(())
                }
                Some(Err(usage)) => {
                    self.reply(usage).await;
                    Ok(())
                }
                None => Ok(()),
            },
            ChatEvent::AdminButton {
                admin_id,
                callback_id,
                data,
                alert_message_id,
            } => {
                let reply = match AdminCommand::parse_callback(&data) {
                    Ok(command) => self.run_command(command, &admin_id).await?,
                    Err(rejection) => Reply::rejected(rejection),
                };
                if let Err(err) = self.chat.acknowledge(&callback_id, &reply.text).await {
                    warn!(error = %err, "could not acknowledge button press");
                }
                if let (true, Some(message_id)) = (reply.accepted, alert_message_id) {
                    if let Err(err) = self.chat.clear_buttons(self.admin_chat, message_id).await {
                        warn!(message_id, error = %err, "answered alert still shows its buttons");
                    }
                }
                Ok(())
            }
        }
    }

    async fn run_command(
        &self,
        command: AdminCommand,
        admin_id: &str,
    ) -> Result<Reply, StorageError> {
        let outcome = match command {
            AdminCommand::Correct { message_id, label } => self
                .feedback
                .apply_correction(message_id, &label, admin_id)
                .await
                .map(|correction| report::build_correction_reply(&correction)),
            AdminCommand::Audit { message_id } => {
                match self.feedback.audit_trail(message_id).await {
                    Ok(trail) => match self.store.get_message(message_id).await? {
                        Some(message) => Ok(report::build_audit_text(&message, &trail)),
                        None => Err(FeedbackError::NotFound(message_id)),
                    },
                    Err(err) => Err(err),
                }
            }
        };

        match outcome {
            Ok(text) => Ok(Reply {
                text,
                accepted: true,
            }),
            Err(FeedbackError::Storage(err)) => Err(err),
            Err(rejected) => {
                info!(admin_id, error = %rejected, "admin command rejected");
                Ok(Reply::rejected(format!("Rejected: {rejected}")))
            }
        }
    }

    async fn send_alert(&self, record: &MessageRecord) {
        let alert = OutboundMessage {
            chat_target: self.admin_chat,
            text: report::build_alert_text(record),
            image_png: None,
            buttons: vec![
                InlineButton {
                    text: "Negative".to_string(),
                    data: callback_data(record.id, SentimentLabel::Negative),
                },
                InlineButton {
                    text: "Not negative".to_string(),
                    data: callback_data(record.id, SentimentLabel::Positive),
                },
            ],
        };
        if let Err(err) = self.chat.send(&alert).await {
            warn!(message_id = %record.id, error = %err, "negative alert not delivered");
        }
    }

    async fn reply(&self, text: String) {
        if let Err(err) = self.chat.send(&OutboundMessage::text(self.admin_chat, text)).await {
            warn!(error = %err, "admin reply not delivered");
        }
    }

    /// Long-polls Telegram until the task is dropped. The offset only moves past
    /// an update once it has been handled, so storage outages cause redelivery.
    pub async fn poll(&self, telegram: &TelegramClient, group_chat: i64) {
        let mut offset = 0;
        loop {
            let updates = match telegram.get_updates(offset, POLL_SECS).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(error = %err, "polling failed");
                    tokio::time::sleep(BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                let update_id = update.update_id;
                if let Some(event) = update.into_event(group_chat, self.admin_chat) {
                    if let Err(err) = self.handle_event(event).await {
                        error!(
                            update_id,
                            error = %err,
                            "storage unavailable; update will be redelivered"
                        );
                        tokio::time::sleep(BACKOFF).await;
                        break;
                    }
                }
                offset = update_id + 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::classifier::fakes::ScriptedModel;
    use crate::classifier::ClassifierAdapter;
    use crate::chat::fakes::RecordingChat;
    use crate::db::test_store;
    use crate::models::{CorrectionStatus, InboundMessage};
    use crate::normalize::TextNormalizer;

    async fn bot(chat: Arc<RecordingChat>) -> (Bot, Store) {
        let store = test_store().await;
        let model = Arc::new(
            ScriptedModel::default()
                .answer("this is awful", "NEGATIVE", 0.92)
                .answer("nice work", "POSITIVE", 0.88),
        );
        let classifier = Arc::new(ClassifierAdapter::new(
            model,
            TextNormalizer::default(),
            Duration::from_millis(200),
        ));
        let bot = Bot::new(
            store.clone(),
            IngestHandler::new(store.clone(), classifier),
            FeedbackHandler::new(store.clone()),
            chat,
            -200,
            0.6,
        );
        (bot, store)
    }

    fn group_message(external_id: i64, text: &str) -> ChatEvent {
        ChatEvent::GroupMessage(InboundMessage {
            chat_id: -100,
            external_id,
            sender_id: Some(1),
            text: text.to_string(),
            sent_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn negative_message_alerts_once_and_button_corrects_it() {
        let chat = Arc::new(RecordingChat::default());
        let (bot, store) = bot(chat.clone()).await;

        bot.handle_event(group_message(1, "this is awful")).await.unwrap();
        bot.handle_event(group_message(1, "this is awful")).await.unwrap();
        bot.handle_event(group_message(2, "nice work")).await.unwrap();

        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_target, -200);
        assert!(sent[0].text.contains("92.00% negative"));
        let not_negative = sent[0].buttons[1].data.clone();

        bot.handle_event(ChatEvent::AdminButton {
            admin_id: "9:admin".to_string(),
            callback_id: "cb-1".to_string(),
            data: not_negative,
            alert_message_id: Some(41),
        })
        .await
        .unwrap();

        let record = store.find_by_external(-100, 1).await.unwrap().unwrap();
        assert_eq!(record.label, SentimentLabel::Positive);
        assert_eq!(record.status, CorrectionStatus::Overridden);
        let acknowledged = chat.acknowledged.lock().unwrap().clone();
        assert_eq!(acknowledged.len(), 1);
        assert!(acknowledged[0].1.starts_with("Recorded"));
        assert_eq!(*chat.cleared.lock().unwrap(), vec![(-200, 41)]);
    }

    #[tokio::test]
    async fn rejected_button_keeps_alert_buttons() {
        let chat = Arc::new(RecordingChat::default());
        let (bot, store) = bot(chat.clone()).await;

        bot.handle_event(ChatEvent::AdminButton {
            admin_id: "9".to_string(),
            callback_id: "cb-2".to_string(),
            data: callback_data(Uuid::new_v4(), SentimentLabel::Negative),
            alert_message_id: Some(42),
        })
        .await
        .unwrap();

        let acknowledged = chat.acknowledged.lock().unwrap().clone();
        assert!(acknowledged[0].1.starts_with("Rejected: no message with id"));
        assert!(chat.cleared.lock().unwrap().is_empty());
        assert!(store.all_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_commands_are_reported_to_admins() {
        let chat = Arc::new(RecordingChat::default());
        let (bot, _store) = bot(chat.clone()).await;

        let missing = Uuid::new_v4();
        bot.handle_event(ChatEvent::AdminText {
            admin_id: "9".to_string(),
            text: format!("/correct {missing} positive"),
        })
        .await
        .unwrap();
        bot.handle_event(ChatEvent::AdminText {
            admin_id: "9".to_string(),
            text: "/correct nonsense".to_string(),
        })
        .await
        .unwrap();
        bot.handle_event(ChatEvent::AdminText {
            admin_id: "9".to_string(),
            text: "just chatting".to_string(),
        })
        .await
        .unwrap();

        let sent = chat.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.starts_with("Rejected: no message with id"));
        assert!(sent[1].text.starts_with("usage: /correct"));
    }

    #[tokio::test]
    async fn audit_command_lists_history() {
        let chat = Arc::new(RecordingChat::default());
        let (bot, store) = bot(chat.clone()).await;
        bot.handle_event(group_message(2, "nice work")).await.unwrap();
        let record = store.find_by_external(-100, 2).await.unwrap().unwrap();

        bot.handle_event(ChatEvent::AdminText {
            admin_id: "9".to_string(),
            text: format!("/correct {} negative", record.id),
        })
        .await
        .unwrap();
        bot.handle_event(ChatEvent::AdminText {
            admin_id: "9".to_string(),
            text: format!("/audit {}", record.id),
        })
        .await
        .unwrap();

        let sent = chat.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].text.contains("POSITIVE → NEGATIVE (active)"));
    }
}
