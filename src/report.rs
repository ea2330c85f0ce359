use std::fmt::Write;

use crate::models::{CorrectionRecord, DailySummary, MessageRecord};

const HISTORY_DAYS: usize = 7;

/// Admin-channel text for a daily summary. `history` is newest first and may
/// include the summary itself.
pub fn build_summary_text(summary: &DailySummary, history: &[DailySummary]) -> String {
    let mut output = String::new();
    let counts = &summary.counts;

    let _ = writeln!(output, "📊 Mood summary for {}", summary.window.label);

    if counts.total_classified() == 0 && counts.unclassified == 0 {
        let _ = writeln!(output, "No messages recorded for this day.");
    } else {
        let _ = writeln!(output, "Positive: {}", counts.positive);
        let _ = writeln!(output, "Negative: {}", counts.negative);
        let _ = writeln!(output, "Unclassified: {}", counts.unclassified);
        if counts.corrected > 0 {
            let _ = writeln!(output, "Reviewed by admins: {}", counts.corrected);
        }
        let _ = writeln!(output, "Trend: {:+.2}", summary.trend);
    }

    let mut earlier: Vec<&DailySummary> = history
        .iter()
        .filter(|past| past.window.start < summary.window.start)
        .take(HISTORY_DAYS - 1)
        .collect();
    if !earlier.is_empty() {
        earlier.reverse();
        let _ = writeln!(output);
        let _ = writeln!(output, "Recent trend:");
        for past in earlier {
            let _ = writeln!(output, "- {}: {:+.2}", past.window.label, past.trend);
        }
        let _ = writeln!(output, "- {}: {:+.2}", summary.window.label, summary.trend);
    }

    output
}

pub fn build_alert_text(record: &MessageRecord) -> String {
    let mut output = String::new();
    let score = record.score.unwrap_or_default() * 100.0;
    let _ = writeln!(output, "⚠️ Negative message detected ({score:.2}% negative):");
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", record.text);
    let _ = writeln!(output);
    let _ = write!(output, "Message id: {}", record.id);
    output
}

pub fn build_correction_reply(correction: &CorrectionRecord) -> String {
    if correction.active {
        format!(
            "Recorded: {} is now {} (was {}).",
            correction.message_id, correction.corrected_label, correction.previous_label
        )
    } else {
        format!(
            "Recorded for audit, but a newer correction for {} is still in effect.",
            correction.message_id
        )
    }
}

pub fn build_audit_text(message: &MessageRecord, trail: &[CorrectionRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Message {}", message.id);
    let _ = writeln!(
        output,
        "Classifier: {}{}",
        message.classifier_label,
        message
            .score
            .map(|score| format!(" ({score:.2})"))
            .unwrap_or_default()
    );
    let _ = writeln!(output, "Effective: {} [{}]", message.label, message.status);

    if trail.is_empty() {
        let _ = write!(output, "No corrections.");
    } else {
        for correction in trail {
            let _ = writeln!(
                output,
                "- {} by {}: {} → {}{}",
                correction.corrected_at.format("%Y-%m-%d %H:%M:%S UTC"),
                correction.admin_id,
                correction.previous_label,
                correction.corrected_label,
                if correction.active { " (active)" } else { "" }
            );
        }
    }

    output
}
