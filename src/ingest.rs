use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::classifier::{Classification, ClassifierAdapter};
use crate::db::{NewMessage, Store};
use crate::error::StorageError;
use crate::models::{InboundMessage, MessageRecord, SentimentLabel};

#[derive(Debug, Clone)]
pub struct Ingested {
    pub record: MessageRecord,
    /// False when the external id had already been stored.
    pub created: bool,
}

pub struct IngestHandler {
    store: Store,
    classifier: Arc<ClassifierAdapter>,
}

impl IngestHandler {
    pub fn new(store: Store, classifier: Arc<ClassifierAdapter>) -> Self {
        Self { store, classifier }
    }

    pub async fn ingest(&self, message: &InboundMessage) -> Result<Ingested, StorageError> {
        self.ingest_at(message, Utc::now()).await
    }

    #[instrument(
        skip(self, message),
        fields(chat = message.chat_id, external_id = message.external_id)
    )]
    pub async fn ingest_at(
        &self,
        message: &InboundMessage,
        received_at: DateTime<Utc>,
    ) -> Result<Ingested, StorageError> {
        if let Some(existing) = self
            .store
            .find_by_external(message.chat_id, message.external_id)
            .await?
        {
            debug!(message_id = %existing.id, "redelivered message ignored");
            return Ok(Ingested {
                record: existing,
                created: false,
            });
        }

        let (classifier_label, score, classification_error) =
            match self.classifier.classify(&message.text).await {
                Ok(Classification::Labeled { label, score }) => (label, Some(score), None),
                Ok(Classification::Unclassifiable) => (SentimentLabel::Unclassifiable, None, None),
                Err(err) => {
                    warn!(error = %err, "classification failed; storing degraded record");
                    (SentimentLabel::Unknown, None, Some(err.to_string()))
                }
            };

        let (record, created) = self
            .store
            .insert_message(NewMessage {
                source_chat: message.chat_id,
                external_id: message.external_id,
                sender_id: message.sender_id,
                text: message.text.clone(),
                received_at,
                classifier_label,
                score,
                classification_error,
            })
            .await?;

        if created {
            info!(
                message_id = %record.id,
                label = %record.classifier_label,
                degraded = record.is_degraded(),
                "message stored"
            );
        }
        Ok(Ingested { record, created })
    }
}

/// Confident negative messages are forwarded to admins for review.
pub fn needs_review(record: &MessageRecord, threshold: f64) -> bool {
    record.classifier_label == SentimentLabel::Negative
        && record.score.is_some_and(|score| score > threshold)
}
