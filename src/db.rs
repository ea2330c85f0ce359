use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    CorrectionRecord, CorrectionStatus, DailySummary, LabelCounts, MessageRecord, SentimentLabel,
    Window,
};

const MESSAGE_COLUMNS: &str = "id, source_chat, external_id, sender_id, text, received_at_ms, \
     classifier_label, label, score, classification_error, status, active_correction_id";

const SUMMARY_COLUMNS: &str = "id, window_start_ms, window_end_ms, window_label, positive_count, \
     negative_count, unclassified_count, corrected_count, trend, chart_png, created_at_ms, \
     delivered_at_ms";

/// Handle to the mood database. Cloning shares the pool and the write lock.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// A classified message that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub source_chat: i64,
    pub external_id: i64,
    pub sender_id: Option<i64>,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub classifier_label: SentimentLabel,
    pub score: Option<f64>,
    pub classification_error: Option<String>,
}

pub async fn connect(database_url: &str) -> Result<Store, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    // Every connection to `:memory:` opens its own database, so pin a single one.
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    Ok(Store {
        pool,
        write_lock: Arc::new(Mutex::new(())),
    })
}

pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(
    column: &'static str,
    row: &str,
    millis: i64,
) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::corrupt(column, row, format!("timestamp {millis} out of range"))
    })
}

fn parse_column<T: FromStr<Err = String>>(
    column: &'static str,
    row: &str,
    value: &str,
) -> Result<T, StorageError> {
    value.parse().map_err(|err: String| StorageError::corrupt(column, row, err))
}

fn map_message_row(row: &SqliteRow) -> Result<MessageRecord, StorageError> {
    let id: String = row.try_get("id")?;
    let classifier_label: String = row.try_get("classifier_label")?;
    let label: String = row.try_get("label")?;
    let status: String = row.try_get("status")?;

    Ok(MessageRecord {
        id: Uuid::parse_str(&id).map_err(|err| StorageError::corrupt("id", id.as_str(), err))?,
        source_chat: row.try_get("source_chat")?,
        external_id: row.try_get("external_id")?,
        sender_id: row.try_get("sender_id")?,
        text: row.try_get("text")?,
        received_at: from_millis("received_at_ms", &id, row.try_get("received_at_ms")?)?,
        classifier_label: parse_column("classifier_label", &id, &classifier_label)?,
        label: parse_column("label", &id, &label)?,
        score: row.try_get("score")?,
        classification_error: row.try_get("classification_error")?,
        status: parse_column("status", &id, &status)?,
        active_correction_id: row.try_get("active_correction_id")?,
    })
}

fn map_correction_row(row: &SqliteRow) -> Result<CorrectionRecord, StorageError> {
    let id: i64 = row.try_get("id")?;
    let key = id.to_string();
    let message_id: String = row.try_get("message_id")?;
    let corrected_label: String = row.try_get("corrected_label")?;
    let previous_label: String = row.try_get("previous_label")?;
    let active_correction_id: Option<i64> = row.try_get("active_correction_id")?;

    Ok(CorrectionRecord {
        id,
        message_id: Uuid::parse_str(&message_id)
            .map_err(|err| StorageError::corrupt("message_id", key.as_str(), err))?,
        corrected_label: parse_column("corrected_label", &key, &corrected_label)?,
        previous_label: parse_column("previous_label", &key, &previous_label)?,
        admin_id: row.try_get("admin_id")?,
        corrected_at: from_millis("corrected_at_ms", &key, row.try_get("corrected_at_ms")?)?,
        active: active_correction_id == Some(id),
    })
}

fn map_summary_row(row: &SqliteRow) -> Result<DailySummary, StorageError> {
    let id: i64 = row.try_get("id")?;
    let key = id.to_string();
    let delivered_at: Option<i64> = row.try_get("delivered_at_ms")?;

    Ok(DailySummary {
        id: Some(id),
        window: Window {
            start: from_millis("window_start_ms", &key, row.try_get("window_start_ms")?)?,
            end: from_millis("window_end_ms", &key, row.try_get("window_end_ms")?)?,
            label: row.try_get("window_label")?,
        },
        counts: LabelCounts {
            positive: row.try_get("positive_count")?,
            negative: row.try_get("negative_count")?,
            unclassified: row.try_get("unclassified_count")?,
            corrected: row.try_get("corrected_count")?,
        },
        trend: row.try_get("trend")?,
        chart_png: row.try_get("chart_png")?,
        created_at: from_millis("created_at_ms", &key, row.try_get("created_at_ms")?)?,
        delivered_at: delivered_at
            .map(|millis| from_millis("delivered_at_ms", &key, millis))
            .transpose()?,
    })
}

impl Store {
    pub async fn init_db(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_external(
        &self,
        source_chat: i64,
        external_id: i64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE source_chat = ? AND external_id = ?"
        );
        let row = sqlx::query(&query)
            .bind(source_chat)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_message_row).transpose()
    }

    pub async fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StorageError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_message_row).transpose()
    }

    /// Inserts the message unless its external id is already stored. Returns the
    /// stored record and whether this call created it.
    #[instrument(
        skip(self, message),
        fields(source_chat = message.source_chat, external_id = message.external_id)
    )]
    pub async fn insert_message(
        &self,
        message: NewMessage,
    ) -> Result<(MessageRecord, bool), StorageError> {
        let id = Uuid::new_v4();
        let received_at = message.received_at.trunc_subsecs(3);
        let result = sqlx::query(
            r#"
            INSERT INTO messages
            (id, source_chat, external_id, sender_id, text, received_at_ms,
             classifier_label, label, score, classification_error, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_chat, external_id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(message.source_chat)
        .bind(message.external_id)
        .bind(message.sender_id)
        .bind(&message.text)
        .bind(to_millis(received_at))
        .bind(message.classifier_label.as_str())
        .bind(message.classifier_label.as_str())
        .bind(message.score)
        .bind(&message.classification_error)
        .bind(CorrectionStatus::Unreviewed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok((
                MessageRecord {
                    id,
                    source_chat: message.source_chat,
                    external_id: message.external_id,
                    sender_id: message.sender_id,
                    text: message.text,
                    received_at,
                    classifier_label: message.classifier_label,
                    label: message.classifier_label,
                    score: message.score,
                    classification_error: message.classification_error,
                    status: CorrectionStatus::Unreviewed,
                    active_correction_id: None,
                },
                true,
            ));
        }

        let existing = self
            .find_by_external(message.source_chat, message.external_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok((existing, false))
    }

    /// Appends a correction and moves the message's active pointer to the newest
    /// correction by timestamp. Returns `None` when the message does not exist.
    #[instrument(skip(self))]
    pub async fn apply_correction(
        &self,
        message_id: Uuid,
        corrected_label: SentimentLabel,
        admin_id: &str,
        corrected_at: DateTime<Utc>,
    ) -> Result<Option<CorrectionRecord>, StorageError> {
        let corrected_at = corrected_at.trunc_subsecs(3);
        let _guard = self.write_lock.lock().await;
        let key = message_id.to_string();
        // A deferred read-then-write fails with SQLITE_BUSY_SNAPSHOT when an
        // ingest commits between the read and the first write.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let row = sqlx::query("SELECT classifier_label, label FROM messages WHERE id = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let classifier_label: SentimentLabel =
            parse_column("classifier_label", &key, row.try_get::<&str, _>("classifier_label")?)?;
        let previous_label: SentimentLabel =
            parse_column("label", &key, row.try_get::<&str, _>("label")?)?;

        let correction_id = sqlx::query(
            r#"
            INSERT INTO corrections
            (message_id, corrected_label, previous_label, admin_id, corrected_at_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key)
        .bind(corrected_label.as_str())
        .bind(previous_label.as_str())
        .bind(admin_id)
        .bind(to_millis(corrected_at))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let (active_id, active_label): (i64, String) = sqlx::query_as(
            r#"
            SELECT id, corrected_label FROM corrections
            WHERE message_id = ?
            ORDER BY corrected_at_ms DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;
        let active_label: SentimentLabel = parse_column("corrected_label", &key, &active_label)?;
        let status = CorrectionStatus::for_correction(classifier_label, active_label);

        sqlx::query(
            "UPDATE messages SET label = ?, status = ?, active_correction_id = ? WHERE id = ?",
        )
        .bind(active_label.as_str())
        .bind(status.as_str())
        .bind(active_id)
        .bind(&key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(CorrectionRecord {
            id: correction_id,
            message_id,
            corrected_label,
            previous_label,
            admin_id: admin_id.to_string(),
            corrected_at,
            active: active_id == correction_id,
        }))
    }

    /// Every correction ever applied to the message, oldest first.
    pub async fn corrections_for(
        &self,
        message_id: Uuid,
    ) -> Result<Vec<CorrectionRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.message_id, c.corrected_label, c.previous_label, c.admin_id,
                   c.corrected_at_ms, m.active_correction_id
            FROM corrections c
            JOIN messages m ON m.id = c.message_id
            WHERE c.message_id = ?
            ORDER BY c.corrected_at_ms ASC, c.id ASC
            "#,
        )
        .bind(message_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_correction_row).collect()
    }

    /// Messages received in `[start, end)`, read in one statement.
    #[instrument(skip(self))]
    pub async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE received_at_ms >= ? AND received_at_ms < ? \
             ORDER BY received_at_ms ASC"
        );
        let rows = sqlx::query(&query)
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_message_row).collect()
    }

    pub async fn all_messages(&self) -> Result<Vec<MessageRecord>, StorageError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY received_at_ms ASC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(map_message_row).collect()
    }

    pub async fn find_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<DailySummary>, StorageError> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM daily_summaries \
             WHERE window_start_ms = ? AND window_end_ms = ?"
        );
        let row = sqlx::query(&query)
            .bind(to_millis(start))
            .bind(to_millis(end))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_summary_row).transpose()
    }

    /// Persists a summary once per window. A second insert for the same window
    /// leaves the first one untouched and returns its id.
    #[instrument(skip(self, summary), fields(window = %summary.window.label))]
    pub async fn insert_summary(&self, summary: &DailySummary) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO daily_summaries
            (window_start_ms, window_end_ms, window_label, positive_count, negative_count,
             unclassified_count, corrected_count, trend, chart_png, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (window_start_ms, window_end_ms) DO NOTHING
            "#,
        )
        .bind(to_millis(summary.window.start))
        .bind(to_millis(summary.window.end))
        .bind(&summary.window.label)
        .bind(summary.counts.positive)
        .bind(summary.counts.negative)
        .bind(summary.counts.unclassified)
        .bind(summary.counts.corrected)
        .bind(summary.trend)
        .bind(&summary.chart_png)
        .bind(to_millis(summary.created_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(result.last_insert_rowid());
        }

        let (id,): (i64,) = sqlx::query_as(
            "SELECT id FROM daily_summaries WHERE window_start_ms = ? AND window_end_ms = ?",
        )
        .bind(to_millis(summary.window.start))
        .bind(to_millis(summary.window.end))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_delivered(
        &self,
        summary_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE daily_summaries SET delivered_at_ms = ? \
             WHERE id = ? AND delivered_at_ms IS NULL",
        )
        .bind(to_millis(at))
        .bind(summary_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent summaries, newest first.
    pub async fn recent_summaries(&self, limit: usize) -> Result<Vec<DailySummary>, StorageError> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM daily_summaries ORDER BY window_start_ms DESC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_summary_row).collect()
    }

    pub async fn maintenance(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .fetch_all(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let store = connect("sqlite::memory:").await.expect("open in-memory database");
    store.init_db().await.expect("apply migrations");
    store
}

#[cfg(test)]
pub(crate) fn sample_message(
    external_id: i64,
    label: SentimentLabel,
    received_at: DateTime<Utc>,
) -> NewMessage {
    NewMessage {
        source_chat: -100,
        external_id,
        sender_id: Some(7),
        text: format!("message {external_id}"),
        received_at,
        classifier_label: label,
        score: label.is_classified().then_some(0.9),
        classification_error: None,
    }
}
