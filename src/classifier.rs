use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ClassificationError;
use crate::models::SentimentLabel;
use crate::normalize::TextNormalizer;

/// Unvalidated model output.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPrediction {
    pub label: String,
    pub score: f64,
}

#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn predict(&self, text: &str) -> Result<RawPrediction, ClassificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Labeled { label: SentimentLabel, score: f64 },
    /// Nothing was left after normalization; the model was not called.
    Unclassifiable,
}

pub struct ClassifierAdapter {
    model: Arc<dyn SentimentModel>,
    normalizer: TextNormalizer,
    timeout: Duration,
}

impl ClassifierAdapter {
    pub fn new(
        model: Arc<dyn SentimentModel>,
        normalizer: TextNormalizer,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            normalizer,
            timeout,
        }
    }

    pub async fn classify(&self, text: &str) -> Result<Classification, ClassificationError> {
        let normalized = self.normalizer.normalize(text);
        if normalized.is_empty() {
            return Ok(Classification::Unclassifiable);
        }

        let raw = tokio::time::timeout(self.timeout, self.model.predict(&normalized))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))??;
        debug!(label = %raw.label, score = raw.score, "model prediction");

        let (label, score) = validate(&raw)?;
        Ok(Classification::Labeled { label, score })
    }
}

/// Maps the model's vocabulary onto the binary label set and checks the score.
pub fn validate(raw: &RawPrediction) -> Result<(SentimentLabel, f64), ClassificationError> {
    if !raw.score.is_finite() || !(0.0..=1.0).contains(&raw.score) {
        return Err(ClassificationError::ScoreOutOfRange(raw.score));
    }

    let label = match raw.label.trim().to_ascii_uppercase().as_str() {
        "POSITIVE" | "POS" | "HAPPY" | "LABEL_1" => SentimentLabel::Positive,
        "NEGATIVE" | "NEG" | "SAD" | "LABEL_0" => SentimentLabel::Negative,
        _ => return Err(ClassificationError::UnrecognizedLabel(raw.label.clone())),
    };

    Ok((label, raw.score))
}


#[cfg(test)]
mod tests {
    use super::fakes::{ScriptedModel, StalledModel};
    use super::*;

    fn adapter(model: Arc<dyn SentimentModel>) -> ClassifierAdapter {
        ClassifierAdapter::new(model, TextNormalizer::default(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn maps_model_vocabulary() {
        let model = Arc::new(
            ScriptedModel::default()
                .answer("lovely", "HAPPY", 0.93)
                .answer("awful", "sad", 0.71),
        );
        let adapter = adapter(model);

        assert_eq!(
            adapter.classify("lovely").await.unwrap(),
            Classification::Labeled {
                label: SentimentLabel::Positive,
                score: 0.93
            }
        );
        assert_eq!(
            adapter.classify("  awful 123 ").await.unwrap(),
            Classification::Labeled {
                label: SentimentLabel::Negative,
                score: 0.71
            }
        );
    }

    #[tokio::test]
    async fn blank_text_skips_the_model() {
        let model = Arc::new(ScriptedModel::default());
        let adapter = adapter(model.clone());

        assert_eq!(adapter.classify("   ").await.unwrap(), Classification::Unclassifiable);
        assert_eq!(
            adapter.classify("🎉 https://a.b").await.unwrap(),
            Classification::Unclassifiable
        );
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_output_is_rejected() {
        let model = Arc::new(
            ScriptedModel::default()
                .answer("meh", "NEUTRAL", 0.5)
                .answer("odd", "POSITIVE", 1.5),
        );
        let adapter = adapter(model);

        assert!(matches!(
            adapter.classify("meh").await,
            Err(ClassificationError::UnrecognizedLabel(label)) if label == "NEUTRAL"
        ));
        assert!(matches!(
            adapter.classify("odd").await,
            Err(ClassificationError::ScoreOutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn stalled_model_times_out() {
        let adapter = adapter(Arc::new(StalledModel));
        assert!(matches!(
            adapter.classify("hello").await,
            Err(ClassificationError::Timeout(_))
        ));
    }

    #[test]
    fn rejects_non_finite_scores() {
        let raw = RawPrediction {
            label: "POSITIVE".into(),
            score: f64::NAN,
        };
        assert!(validate(&raw).is_err());
    }
}
