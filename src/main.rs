use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

mod aggregate;
mod bot;
mod chart;
mod chat;
mod classifier;
mod config;
mod db;
mod error;
mod feedback;
mod ingest;
mod logging;
mod model_client;
mod models;
mod normalize;
mod report;
mod retry;
mod scheduler;
mod telegram;

use crate::aggregate::Aggregator;
use crate::bot::Bot;
use crate::chart::BarChartRenderer;
use crate::chat::ChatClient;
use crate::classifier::ClassifierAdapter;
use crate::config::{ChatConfig, Config, ModelConfig};
use crate::feedback::FeedbackHandler;
use crate::ingest::IngestHandler;
use crate::model_client::HttpSentimentModel;
use crate::models::{CorrectionStatus, SentimentLabel};
use crate::normalize::TextNormalizer;
use crate::scheduler::{tick_for_date, window_for_tick, Scheduler, TickOutcome};
use crate::telegram::TelegramClient;

#[derive(Parser)]
#[command(name = "group-mood")]
#[command(about = "Daily sentiment tracker for a Telegram group", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Ingest group messages, handle admin feedback and post daily summaries
    Run,
    /// Print the summary for one local day, optionally delivering it
    Summarize {
        /// Local date (YYYY-MM-DD); defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        deliver: bool,
    },
    /// Record an admin correction for a stored message
    Correct {
        message_id: Uuid,
        label: String,
        #[arg(long, default_value = "cli")]
        admin: String,
    },
    /// Show a message with its full correction history
    Audit { message_id: Uuid },
    /// Write every message with its labels to a CSV dataset
    Export {
        #[arg(long, default_value = "labeled_messages.csv")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct LabeledRow<'a> {
    message_id: Uuid,
    received_at: String,
    text: &'a str,
    classifier_label: SentimentLabel,
    label: SentimentLabel,
    score: Option<f64>,
    status: CorrectionStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing("group-mood");

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = db::connect(&config.database_url)
        .await
        .context("failed to open the SQLite database")?;

    match cli.command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Run => {
            let chat_config = ChatConfig::from_env()?;
            let model_config = ModelConfig::from_env()?;
            store.init_db().await.context("failed to apply migrations")?;

            let telegram = Arc::new(
                TelegramClient::new(&chat_config.telegram_token)
                    .context("failed to build the Telegram client")?,
            );
            let chat: Arc<dyn ChatClient> = telegram.clone();
            let model = Arc::new(
                HttpSentimentModel::new(model_config.url, model_config.token)
                    .context("failed to build the model client")?,
            );
            let classifier = Arc::new(ClassifierAdapter::new(
                model,
                TextNormalizer::new(config.arabic_script_only),
                config.classifier_timeout,
            ));

            let bot = Bot::new(
                store.clone(),
                IngestHandler::new(store.clone(), classifier),
                FeedbackHandler::new(store.clone()),
                Arc::clone(&chat),
                chat_config.admin_chat_id,
                config.alert_threshold,
            );
            let aggregator = Aggregator::new(
                store.clone(),
                Arc::new(BarChartRenderer::default()),
                config.render_timeout,
            );
            let scheduler = Scheduler::new(
                store.clone(),
                aggregator,
                chat,
                chat_config.admin_chat_id,
                config.timezone,
                config.summary_hour,
                config.delivery,
            );

            info!(
                timezone = %config.timezone,
                summary_hour = config.summary_hour,
                group_chat = chat_config.group_chat_id,
                "group-mood running"
            );
            tokio::select! {
                _ = bot.poll(&telegram, chat_config.group_chat_id) => {}
                _ = scheduler.run() => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for shutdown signal")?;
                    info!("shutting down");
                }
            }
        }
        Commands::Summarize { date, deliver } => {
            let tick = date
                .map(|date| tick_for_date(date, config.timezone))
                .unwrap_or_else(Utc::now);
            let aggregator = Aggregator::new(
                store.clone(),
                Arc::new(BarChartRenderer::default()),
                config.render_timeout,
            );

            if deliver {
                let chat_config = ChatConfig::from_env()?;
                let telegram = TelegramClient::new(&chat_config.telegram_token)
                    .context("failed to build the Telegram client")?;
                let scheduler = Scheduler::new(
                    store.clone(),
                    aggregator,
                    Arc::new(telegram),
                    chat_config.admin_chat_id,
                    config.timezone,
                    config.summary_hour,
                    config.delivery,
                );
                match scheduler.on_tick(tick).await? {
                    TickOutcome::Delivered { summary_id } => {
                        println!("Summary {summary_id} delivered.")
                    }
                    TickOutcome::AlreadyDelivered { summary_id } => {
                        println!("Summary {summary_id} was already delivered.")
                    }
                    TickOutcome::DeliveryFailed { summary_id } => {
                        anyhow::bail!("summary {summary_id} is stored but could not be delivered")
                    }
                    TickOutcome::WindowOpen { window_end } => {
                        anyhow::bail!("that day is not over until {window_end}; nothing was stored")
                    }
                }
                return Ok(());
            }

            let window = window_for_tick(tick, config.timezone);
            let summary = match store.find_summary(window.start, window.end).await? {
                Some(stored) => stored,
                None => {
                    println!("(preview: no stored summary for {})", window.label);
                    aggregator.summarize_window(&window).await?
                }
            };
            let history = store.recent_summaries(7).await?;
            print!("{}", report::build_summary_text(&summary, &history));
        }
        Commands::Correct {
            message_id,
            label,
            admin,
        } => {
            let correction = FeedbackHandler::new(store.clone())
                .apply_correction(message_id, &label, &admin)
                .await?;
            println!("{}", report::build_correction_reply(&correction));
        }
        Commands::Audit { message_id } => {
            let trail = FeedbackHandler::new(store.clone())
                .audit_trail(message_id)
                .await?;
            let message = store
                .get_message(message_id)
                .await?
                .with_context(|| format!("message {message_id} disappeared during audit"))?;
            println!("{}", report::build_audit_text(&message, &trail));
        }
        Commands::Export { out } => {
            let messages = store.all_messages().await?;
            let mut writer = csv::Writer::from_path(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            for message in &messages {
                writer.serialize(LabeledRow {
                    message_id: message.id,
                    received_at: message.received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    text: &message.text,
                    classifier_label: message.classifier_label,
                    label: message.label,
                    score: message.score,
                    status: message.status,
                })?;
            }
            writer.flush()?;
            println!("Exported {} messages to {}.", messages.len(), out.display());
        }
    }

    Ok(())
}
