use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::Store;
use crate::error::FeedbackError;
use crate::models::{CorrectionRecord, SentimentLabel};

const CALLBACK_PREFIX: &str = "fb";

pub struct FeedbackHandler {
    store: Store,
}

impl FeedbackHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn apply_correction(
        &self,
        message_id: Uuid,
        corrected_label: &str,
        admin_id: &str,
    ) -> Result<CorrectionRecord, FeedbackError> {
        self.apply_correction_at(message_id, corrected_label, admin_id, Utc::now())
            .await
    }

    #[instrument(skip(self))]
    pub async fn apply_correction_at(
        &self,
        message_id: Uuid,
        corrected_label: &str,
        admin_id: &str,
        corrected_at: DateTime<Utc>,
    ) -> Result<CorrectionRecord, FeedbackError> {
        let label = SentimentLabel::parse_correction(corrected_label)
            .ok_or_else(|| FeedbackError::InvalidLabel(corrected_label.to_string()))?;

        let correction = self
            .store
            .apply_correction(message_id, label, admin_id, corrected_at)
            .await?
            .ok_or(FeedbackError::NotFound(message_id))?;

        info!(
            correction_id = correction.id,
            previous = %correction.previous_label,
            corrected = %correction.corrected_label,
            active = correction.active,
            "correction recorded"
        );
        Ok(correction)
    }

    pub async fn audit_trail(
        &self,
        message_id: Uuid,
    ) -> Result<Vec<CorrectionRecord>, FeedbackError> {
        if self.store.get_message(message_id).await?.is_none() {
            return Err(FeedbackError::NotFound(message_id));
        }
        Ok(self.store.corrections_for(message_id).await?)
    }
}

/// A request arriving from the admin chat, either typed or from a button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Correct { message_id: Uuid, label: String },
    Audit { message_id: Uuid },
}

impl AdminCommand {
    /// Parses `/correct <id> <label>` and `/audit <id>`. Returns `None` for
    /// text that is not an admin command at all.
    pub fn parse_text(text: &str) -> Option<Result<AdminCommand, String>> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let command = head.strip_prefix('/')?;
        let command = command.split('@').next().unwrap_or(command);
        let args: Vec<&str> = parts.collect();

        match command {
            "correct" => Some(match args.as_slice() {
                [id, label] => parse_id(id).map(|message_id| AdminCommand::Correct {
                    message_id,
                    label: label.to_string(),
                }),
                _ => Err("usage: /correct <message-id> <positive|negative>".to_string()),
            }),
            "audit" => Some(match args.as_slice() {
                [id] => parse_id(id).map(|message_id| AdminCommand::Audit { message_id }),
                _ => Err("usage: /audit <message-id>".to_string()),
            }),
            _ => None,
        }
    }

    /// Parses inline-button data built by [`callback_data`].
    pub fn parse_callback(data: &str) -> Result<AdminCommand, String> {
        let mut parts = data.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(CALLBACK_PREFIX), Some(id), Some(label)) => {
                parse_id(id).map(|message_id| AdminCommand::Correct {
                    message_id,
                    label: label.to_string(),
                })
            }
            _ => Err(format!("unrecognized button data {data:?}")),
        }
    }
}

pub fn callback_data(message_id: Uuid, label: SentimentLabel) -> String {
    format!("{CALLBACK_PREFIX}:{message_id}:{}", label.as_str())
}

fn parse_id(raw: &str) -> Result<Uuid, String> {
    Uuid::parse_str(raw).map_err(|_| format!("{raw:?} is not a message id"))
}
