use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::chart::{ChartInput, ChartRenderer};
use crate::db::Store;
use crate::error::{RenderError, StorageError};
use crate::models::{
    CorrectionStatus, DailySummary, LabelCounts, MessageRecord, SentimentLabel, Window,
};

pub struct Aggregator {
    store: Store,
    renderer: Arc<dyn ChartRenderer>,
    render_timeout: Duration,
}

/// Counts effective labels. Degraded records only feed `unclassified`.
pub fn tally(records: &[MessageRecord]) -> LabelCounts {
    let mut counts = LabelCounts::default();
    for record in records {
        match record.label {
            SentimentLabel::Positive => counts.positive += 1,
            SentimentLabel::Negative => counts.negative += 1,
            SentimentLabel::Unknown | SentimentLabel::Unclassifiable => counts.unclassified += 1,
        }
        if record.status != CorrectionStatus::Unreviewed {
            counts.corrected += 1;
        }
    }
    counts
}

impl Aggregator {
    pub fn new(store: Store, renderer: Arc<dyn ChartRenderer>, render_timeout: Duration) -> Self {
        Self {
            store,
            renderer,
            render_timeout,
        }
    }

    pub async fn summarize(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DailySummary, StorageError> {
        let window = Window {
            start,
            end,
            label: start.date_naive().to_string(),
        };
        self.summarize_window(&window).await
    }

    #[instrument(skip(self), fields(window = %window.label))]
    pub async fn summarize_window(&self, window: &Window) -> Result<DailySummary, StorageError> {
        let records = self.store.fetch_window(window.start, window.end).await?;
        let counts = tally(&records);

        let chart_png = match self
            .render_chart(ChartInput {
                counts,
                window_label: window.label.clone(),
            })
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, "summary will be sent without a chart");
                None
            }
        };

        info!(
            positive = counts.positive,
            negative = counts.negative,
            unclassified = counts.unclassified,
            trend = counts.trend(),
            "window summarized"
        );

        Ok(DailySummary {
            id: None,
            window: window.clone(),
            counts,
            trend: counts.trend(),
            chart_png,
            created_at: Utc::now(),
            delivered_at: None,
        })
    }

    async fn render_chart(&self, input: ChartInput) -> Result<Vec<u8>, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let task = tokio::task::spawn_blocking(move || renderer.render(&input));

        match tokio::time::timeout(self.render_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RenderError::Failed(join_err.to_string())),
            Err(_) => Err(RenderError::Timeout(self.render_timeout)),
        }
    }
}


#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};

    use super::fakes::{FixedRenderer, SlowRenderer};
    use super::*;
    use crate::db::{sample_message, test_store};
    use crate::feedback::FeedbackHandler;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 0, 0, 0).unwrap()
    }

    fn aggregator(store: Store) -> Aggregator {
        Aggregator::new(store, Arc::new(FixedRenderer), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn correction_changes_effective_counts() {
        let store = test_store().await;
        let labels = [
            SentimentLabel::Positive,
            SentimentLabel::Positive,
            SentimentLabel::Negative,
        ];
        let mut ids = Vec::new();
        for (offset, label) in labels.into_iter().enumerate() {
            let (record, _) = store
                .insert_message(sample_message(
                    offset as i64,
                    label,
                    day(14) + ChronoDuration::hours(offset as i64 + 1),
                ))
                .await
                .unwrap();
            ids.push(record.id);
        }
        let aggregator = aggregator(store.clone());

        let before = aggregator.summarize(day(14), day(15)).await.unwrap();
        assert_eq!((before.counts.positive, before.counts.negative), (2, 1));
        assert!((before.trend - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(before.chart_png.as_deref(), Some(&b"png"[..]));

        FeedbackHandler::new(store.clone())
            .apply_correction(ids[2], "positive", "admin-1")
            .await
            .unwrap();

        let after = aggregator.summarize(day(14), day(15)).await.unwrap();
        assert_eq!((after.counts.positive, after.counts.negative), (3, 0));
        assert_eq!(after.counts.corrected, 1);
        assert_eq!(after.trend, 1.0);
    }

    #[tokio::test]
    async fn adjacent_windows_partition_boundary_message() {
        let store = test_store().await;
        store
            .insert_message(sample_message(1, SentimentLabel::Positive, day(15)))
            .await
            .unwrap();
        let aggregator = aggregator(store);

        let first = aggregator.summarize(day(14), day(15)).await.unwrap();
        let second = aggregator.summarize(day(15), day(16)).await.unwrap();
        assert_eq!(first.counts.positive, 0);
        assert_eq!(second.counts.positive, 1);
    }

    #[tokio::test]
    async fn degraded_records_are_reported_separately() {
        let store = test_store().await;
        for (id, label) in [
            (1, SentimentLabel::Unknown),
            (2, SentimentLabel::Unclassifiable),
        ] {
            store
                .insert_message(sample_message(id, label, day(14) + ChronoDuration::hours(1)))
                .await
                .unwrap();
        }
        let summary = aggregator(store).summarize(day(14), day(15)).await.unwrap();

        assert_eq!(summary.counts.total_classified(), 0);
        assert_eq!(summary.counts.unclassified, 2);
        assert_eq!(summary.trend, 0.0);
    }

    #[tokio::test]
    async fn empty_window_has_zero_trend() {
        let store = test_store().await;
        let summary = aggregator(store).summarize(day(1), day(2)).await.unwrap();
        assert_eq!(summary.counts, LabelCounts::default());
        assert_eq!(summary.trend, 0.0);
    }

    #[tokio::test]
    async fn slow_renderer_degrades_to_no_chart() {
        let store = test_store().await;
        let aggregator = Aggregator::new(store, Arc::new(SlowRenderer), Duration::from_millis(50));
        let summary = aggregator.summarize(day(14), day(15)).await.unwrap();
        assert!(summary.chart_png.is_none());
    }
}
