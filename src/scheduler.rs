use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, instrument, warn};

use crate::aggregate::Aggregator;
use crate::chat::{ChatClient, OutboundMessage};
use crate::db::Store;
use crate::error::StorageError;
use crate::models::{DailySummary, Window};
use crate::report;
use crate::retry::RetryPolicy;

const HISTORY_LIMIT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Delivered { summary_id: i64 },
    AlreadyDelivered { summary_id: i64 },
    DeliveryFailed { summary_id: i64 },
    /// The window has not ended yet; nothing was stored or sent.
    WindowOpen { window_end: DateTime<Utc> },
}

pub struct Scheduler {
    store: Store,
    aggregator: Aggregator,
    chat: Arc<dyn ChatClient>,
    admin_chat: i64,
    timezone: Tz,
    summary_hour: u32,
    retry: RetryPolicy,
}

/// First instant of `date` in `tz`, skipping forward over a DST gap at midnight.
fn local_day_start(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    local_instant(tz, date, 0)
}

fn local_instant(tz: Tz, date: NaiveDate, hour: u32) -> DateTime<Utc> {
    for candidate in hour..24 {
        if let Some(naive) = date.and_hms_opt(candidate, 0, 0) {
            if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                return local.with_timezone(&Utc);
            }
        }
    }
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// The full local day before the one containing `tick`.
pub fn window_for_tick(tick: DateTime<Utc>, tz: Tz) -> Window {
    let today = tick.with_timezone(&tz).date_naive();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    Window {
        start: local_day_start(tz, yesterday),
        end: local_day_start(tz, today),
        label: yesterday.to_string(),
    }
}

/// A tick whose window is exactly `date`, for manual runs.
pub fn tick_for_date(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    local_day_start(tz, next)
}

/// Next `hour:00` local time strictly after `after`.
pub fn next_tick_after(after: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let mut date = after.with_timezone(&tz).date_naive();
    loop {
        let candidate = local_instant(tz, date, hour);
        if candidate > after {
            return candidate;
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return candidate,
        };
    }
}

impl Scheduler {
    pub fn new(
        store: Store,
        aggregator: Aggregator,
        chat: Arc<dyn ChatClient>,
        admin_chat: i64,
        timezone: Tz,
        summary_hour: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            aggregator,
            chat,
            admin_chat,
            timezone,
            summary_hour,
            retry,
        }
    }

    /// Summarizes the day before `tick` (once) and delivers it if not yet delivered.
    #[instrument(skip(self))]
    pub async fn on_tick(&self, tick: DateTime<Utc>) -> Result<TickOutcome, StorageError> {
        let window = window_for_tick(tick, self.timezone);
        if window.end > Utc::now() {
            warn!(window = %window.label, end = %window.end, "window still open; not summarizing");
            return Ok(TickOutcome::WindowOpen {
                window_end: window.end,
            });
        }

        let summary = match self.store.find_summary(window.start, window.end).await? {
            Some(existing) => {
                if let (Some(id), Some(_)) = (existing.id, existing.delivered_at) {
                    info!(window = %window.label, "summary already delivered");
                    return Ok(TickOutcome::AlreadyDelivered { summary_id: id });
                }
                existing
            }
            None => {
                let mut summary = self.aggregator.summarize_window(&window).await?;
                summary.id = Some(self.store.insert_summary(&summary).await?);
                summary
            }
        };

        self.deliver(summary).await
    }

    async fn deliver(&self, summary: DailySummary) -> Result<TickOutcome, StorageError> {
        let summary_id = summary.id.ok_or_else(|| {
            StorageError::corrupt("id", summary.window.label.as_str(), "summary was not persisted")
        })?;
        let history = self.store.recent_summaries(HISTORY_LIMIT).await?;
        let message = OutboundMessage {
            chat_target: self.admin_chat,
            text: report::build_summary_text(&summary, &history),
            image_png: summary.chart_png.clone(),
            buttons: Vec::new(),
        };

        let chat = Arc::clone(&self.chat);
        let sent = self
            .retry
            .run("deliver summary", |_| {
                let chat = Arc::clone(&chat);
                let message = message.clone();
                async move { chat.send(&message).await }
            })
            .await;

        match sent {
            Ok(()) => {
                self.store.mark_delivered(summary_id, Utc::now()).await?;
                info!(summary_id, window = %summary.window.label, "summary delivered");
                Ok(TickOutcome::Delivered { summary_id })
            }
            Err(err) => {
                error!(
                    summary_id,
                    window = %summary.window.label,
                    error = %err,
                    "summary delivery failed; giving up for this tick"
                );
                Ok(TickOutcome::DeliveryFailed { summary_id })
            }
        }
    }

    async fn tick_and_maintain(&self, tick: DateTime<Utc>) {
        if let Err(err) = self.on_tick(tick).await {
            error!(error = %err, %tick, "scheduled summary failed");
        }
        if let Err(err) = self.store.maintenance().await {
            warn!(error = %err, "storage maintenance failed");
        }
    }

    /// Runs forever: one catch-up tick now, then one per day at the configured
    /// local hour. A tick that overruns delays the next one instead of overlapping.
    pub async fn run(&self) {
        self.tick_and_maintain(Utc::now()).await;

        let mut next = next_tick_after(Utc::now(), self.timezone, self.summary_hour);
        loop {
            info!(%next, "next summary scheduled");
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            self.tick_and_maintain(next).await;
            next = next_tick_after(next, self.timezone, self.summary_hour);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::aggregate::fakes::FixedRenderer;
    use crate::chat::fakes::RecordingChat;
    use crate::db::{sample_message, test_store};
    use crate::feedback::FeedbackHandler;
    use crate::models::SentimentLabel;

    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    fn scheduler(store: Store, chat: Arc<RecordingChat>) -> Scheduler {
        let aggregator =
            Aggregator::new(store.clone(), Arc::new(FixedRenderer), Duration::from_secs(2));
        Scheduler::new(
            store,
            aggregator,
            chat,
            -200,
            chrono_tz::UTC,
            0,
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::ZERO,
            },
        )
    }

    #[test]
    fn window_is_previous_utc_day() {
        let window = window_for_tick(utc(15, 0, 5), chrono_tz::UTC);
        assert_eq!(window.start, utc(14, 0, 0));
        assert_eq!(window.end, utc(15, 0, 0));
        assert_eq!(window.label, "2026-03-14");
    }

    #[test]
    fn window_follows_reference_timezone() {
        // 2026-03-14 22:00 UTC is already 2026-03-15 in Tehran (+03:30).
        let window = window_for_tick(utc(14, 22, 0), chrono_tz::Asia::Tehran);
        assert_eq!(window.label, "2026-03-14");
        assert_eq!(window.start, utc(13, 20, 30));
        assert_eq!(window.end, utc(14, 20, 30));
    }

    #[test]
    fn dst_day_is_shorter() {
        // US clocks spring forward on 2026-03-08.
        let window = window_for_tick(utc(9, 12, 0), chrono_tz::America::New_York);
        assert_eq!(window.label, "2026-03-08");
        assert_eq!(window.end - window.start, ChronoDuration::hours(23));
    }

    #[test]
    fn manual_tick_targets_requested_day() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let tick = tick_for_date(date, chrono_tz::Asia::Tehran);
        let window = window_for_tick(tick, chrono_tz::Asia::Tehran);
        assert_eq!(window.label, "2026-03-14");
        assert_eq!(window.start, utc(13, 20, 30));
    }

    #[test]
    fn consecutive_windows_are_contiguous() {
        let first = window_for_tick(utc(15, 6, 0), chrono_tz::Europe::Berlin);
        let second = window_for_tick(utc(16, 6, 0), chrono_tz::Europe::Berlin);
        assert_eq!(first.end, second.start);
    }

    #[test]
    fn next_tick_is_strictly_later() {
        assert_eq!(next_tick_after(utc(14, 10, 0), chrono_tz::UTC, 0), utc(15, 0, 0));
        assert_eq!(next_tick_after(utc(15, 0, 0), chrono_tz::UTC, 0), utc(16, 0, 0));
        assert_eq!(next_tick_after(utc(14, 7, 59), chrono_tz::UTC, 8), utc(14, 8, 0));
    }

    #[tokio::test]
    async fn tick_summarizes_and_delivers_once() {
        let store = test_store().await;
        for (id, label) in [
            (1, SentimentLabel::Positive),
            (2, SentimentLabel::Positive),
            (3, SentimentLabel::Negative),
        ] {
            store
                .insert_message(sample_message(id, label, utc(14, 9, id as u32)))
                .await
                .unwrap();
        }
        let chat = Arc::new(RecordingChat::default());
        let scheduler = scheduler(store.clone(), chat.clone());

        let outcome = scheduler.on_tick(utc(15, 0, 0)).await.unwrap();
        let TickOutcome::Delivered { summary_id } = outcome else {
            panic!("expected delivery, got {outcome:?}");
        };

        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_target, -200);
        assert!(sent[0].text.contains("Positive: 2"));
        assert_eq!(sent[0].image_png.as_deref(), Some(&b"png"[..]));

        assert_eq!(
            scheduler.on_tick(utc(15, 0, 0)).await.unwrap(),
            TickOutcome::AlreadyDelivered { summary_id }
        );
        assert_eq!(chat.sent().len(), 1);
    }

    #[tokio::test]
    async fn late_corrections_do_not_rewrite_stored_summary() {
        let store = test_store().await;
        let (negative, _) = store
            .insert_message(sample_message(1, SentimentLabel::Negative, utc(14, 9, 0)))
            .await
            .unwrap();
        let chat = Arc::new(RecordingChat::default());
        let scheduler = scheduler(store.clone(), chat);
        scheduler.on_tick(utc(15, 0, 0)).await.unwrap();

        FeedbackHandler::new(store.clone())
            .apply_correction(negative.id, "positive", "admin-1")
            .await
            .unwrap();
        scheduler.on_tick(utc(15, 0, 0)).await.unwrap();

        let stored = store.find_summary(utc(14, 0, 0), utc(15, 0, 0)).await.unwrap().unwrap();
        assert_eq!(stored.counts.negative, 1);
        assert_eq!(stored.counts.positive, 0);
    }

    #[tokio::test]
    async fn failed_delivery_does_not_block_next_tick() {
        let store = test_store().await;
        let chat = Arc::new(RecordingChat::failing(3));
        let scheduler = scheduler(store.clone(), chat.clone());

        let outcome = scheduler.on_tick(utc(15, 0, 0)).await.unwrap();
        assert!(matches!(outcome, TickOutcome::DeliveryFailed { .. }));
        assert_eq!(chat.attempt_count(), 3);
        let stored = store.find_summary(utc(14, 0, 0), utc(15, 0, 0)).await.unwrap().unwrap();
        assert!(stored.delivered_at.is_none());

        let outcome = scheduler.on_tick(utc(16, 0, 0)).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
        assert_eq!(chat.sent().len(), 1);
        assert!(chat.sent()[0].text.contains("2026-03-15"));
    }

    #[tokio::test]
    async fn undelivered_summary_is_resent_without_recomputing() {
        let store = test_store().await;
        let chat = Arc::new(RecordingChat::failing(3));
        let scheduler = scheduler(store.clone(), chat.clone());
        scheduler.on_tick(utc(15, 0, 0)).await.unwrap();

        store
            .insert_message(sample_message(9, SentimentLabel::Positive, utc(14, 12, 0)))
            .await
            .unwrap();
        let outcome = scheduler.on_tick(utc(15, 0, 30)).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Delivered { .. }));
        assert!(chat.sent()[0].text.contains("No messages recorded"));
    }

    #[tokio::test]
    async fn unfinished_day_is_not_frozen() {
        let store = test_store().await;
        let chat = Arc::new(RecordingChat::default());
        let scheduler = scheduler(store.clone(), chat.clone());
        let today = Utc::now().date_naive();
        let window = window_for_tick(tick_for_date(today, chrono_tz::UTC), chrono_tz::UTC);
        store
            .insert_message(sample_message(1, SentimentLabel::Positive, window.start))
            .await
            .unwrap();

        let outcome = scheduler.on_tick(tick_for_date(today, chrono_tz::UTC)).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::WindowOpen {
                window_end: window.end
            }
        );
        assert!(store.find_summary(window.start, window.end).await.unwrap().is_none());
        assert_eq!(chat.attempt_count(), 0);
    }
}
