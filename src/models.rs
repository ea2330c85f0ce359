use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    /// Classifier failed or returned malformed output.
    Unknown,
    /// Nothing left to classify after normalization.
    Unclassifiable,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "POSITIVE",
            SentimentLabel::Negative => "NEGATIVE",
            SentimentLabel::Unknown => "UNKNOWN",
            SentimentLabel::Unclassifiable => "UNCLASSIFIABLE",
        }
    }

    pub fn is_classified(self) -> bool {
        matches!(self, SentimentLabel::Positive | SentimentLabel::Negative)
    }

    /// Parses the spellings an admin may type or a button may carry. Only
    /// real sentiment values are accepted.
    pub fn parse_correction(input: &str) -> Option<SentimentLabel> {
        match input.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" | "not_negative" | "not-negative" => Some(SentimentLabel::Positive),
            "negative" | "neg" => Some(SentimentLabel::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "POSITIVE" => Ok(SentimentLabel::Positive),
            "NEGATIVE" => Ok(SentimentLabel::Negative),
            "UNKNOWN" => Ok(SentimentLabel::Unknown),
            "UNCLASSIFIABLE" => Ok(SentimentLabel::Unclassifiable),
            other => Err(format!("unknown sentiment label {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStatus {
    Unreviewed,
    Confirmed,
    Overridden,
}

impl CorrectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrectionStatus::Unreviewed => "UNREVIEWED",
            CorrectionStatus::Confirmed => "CONFIRMED",
            CorrectionStatus::Overridden => "OVERRIDDEN",
        }
    }

    pub fn for_correction(classifier: SentimentLabel, corrected: SentimentLabel) -> Self {
        if classifier == corrected {
            CorrectionStatus::Confirmed
        } else {
            CorrectionStatus::Overridden
        }
    }
}

impl fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "UNREVIEWED" => Ok(CorrectionStatus::Unreviewed),
            "CONFIRMED" => Ok(CorrectionStatus::Confirmed),
            "OVERRIDDEN" => Ok(CorrectionStatus::Overridden),
            other => Err(format!("unknown correction status {other:?}")),
        }
    }
}

/// A group message as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub external_id: i64,
    pub sender_id: Option<i64>,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub source_chat: i64,
    pub external_id: i64,
    pub sender_id: Option<i64>,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub classifier_label: SentimentLabel,
    pub label: SentimentLabel,
    pub score: Option<f64>,
    pub classification_error: Option<String>,
    pub status: CorrectionStatus,
    pub active_correction_id: Option<i64>,
}

impl MessageRecord {
    pub fn is_degraded(&self) -> bool {
        !self.classifier_label.is_classified()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionRecord {
    pub id: i64,
    pub message_id: Uuid,
    pub corrected_label: SentimentLabel,
    pub previous_label: SentimentLabel,
    pub admin_id: String,
    pub corrected_at: DateTime<Utc>,
    pub active: bool,
}

/// Half-open interval `[start, end)` over ingestion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub positive: i64,
    pub negative: i64,
    pub unclassified: i64,
    pub corrected: i64,
}

impl LabelCounts {
    pub fn total_classified(&self) -> i64 {
        self.positive + self.negative
    }

    /// Net sentiment ratio in [-1, 1]; zero when nothing was classified.
    pub fn trend(&self) -> f64 {
        let total = self.total_classified();
        if total == 0 {
            0.0
        } else {
            (self.positive - self.negative) as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct DailySummary {
    pub id: Option<i64>,
    pub window: Window,
    pub counts: LabelCounts,
    pub trend: f64,
    pub chart_png: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_spellings_map_to_binary_labels() {
        assert_eq!(
            SentimentLabel::parse_correction(" Positive "),
            Some(SentimentLabel::Positive)
        );
        assert_eq!(
            SentimentLabel::parse_correction("not_negative"),
            Some(SentimentLabel::Positive)
        );
        assert_eq!(
            SentimentLabel::parse_correction("NEG"),
            Some(SentimentLabel::Negative)
        );
        assert_eq!(SentimentLabel::parse_correction("unknown"), None);
        assert_eq!(SentimentLabel::parse_correction("neutral"), None);
    }

    #[test]
    fn stored_labels_parse_back() {
        for label in [
            SentimentLabel::Positive,
            SentimentLabel::Negative,
            SentimentLabel::Unknown,
            SentimentLabel::Unclassifiable,
        ] {
            assert_eq!(label.as_str().parse::<SentimentLabel>(), Ok(label));
        }
        assert!("positive".parse::<SentimentLabel>().is_err());
    }

    #[test]
    fn trend_defaults_to_zero_without_classified_messages() {
        let counts = LabelCounts {
            unclassified: 4,
            ..LabelCounts::default()
        };
        assert_eq!(counts.trend(), 0.0);
    }

    #[test]
    fn trend_is_net_ratio() {
        let counts = LabelCounts {
            positive: 2,
            negative: 1,
            unclassified: 5,
            corrected: 0,
        };
        assert!((counts.trend() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn status_follows_agreement_with_classifier() {
        assert_eq!(
            CorrectionStatus::for_correction(SentimentLabel::Negative, SentimentLabel::Negative),
            CorrectionStatus::Confirmed
        );
        assert_eq!(
            CorrectionStatus::for_correction(SentimentLabel::Negative, SentimentLabel::Positive),
            CorrectionStatus::Overridden
        );
        assert_eq!(
            CorrectionStatus::for_correction(SentimentLabel::Unknown, SentimentLabel::Positive),
            CorrectionStatus::Overridden
        );
    }
}
