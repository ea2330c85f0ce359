use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat::{ChatClient, ChatEvent, InlineButton, OutboundMessage};
use crate::error::DeliveryError;
use crate::models::InboundMessage;

const API_BASE: &str = "https://api.telegram.org";
const CAPTION_LIMIT: usize = 1024;

/// Telegram Bot API over HTTPS with long polling.
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

impl User {
    fn admin_id(&self) -> String {
        match &self.username {
            Some(name) => format!("{}:{name}", self.id),
            None => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
    pub message: Option<Message>,
}

impl Update {
    /// Sorts an update into group traffic or admin traffic. Anything else
    /// (other chats, non-text messages) is dropped.
    pub fn into_event(self, group_chat: i64, admin_chat: i64) -> Option<ChatEvent> {
        if let Some(query) = self.callback_query {
            let in_admin_chat = query
                .message
                .as_ref()
                .is_some_and(|message| message.chat.id == admin_chat);
            return match (in_admin_chat, query.data) {
                (true, Some(data)) => Some(ChatEvent::AdminButton {
                    admin_id: query.from.admin_id(),
                    callback_id: query.id,
                    data,
                    alert_message_id: query.message.map(|message| message.message_id),
                }),
                _ => None,
            };
        }

        let message = self.message?;
        let text = message.text.or(message.caption)?;
        if message.chat.id == group_chat {
            Some(ChatEvent::GroupMessage(InboundMessage {
                chat_id: message.chat.id,
                external_id: message.message_id,
                sender_id: message.from.map(|user| user.id),
                text,
                sent_at: DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
            }))
        } else if message.chat.id == admin_chat {
            Some(ChatEvent::AdminText {
                admin_id: message.from.map(|user| user.admin_id()).unwrap_or_default(),
                text,
            })
        } else {
            None
        }
    }
}

fn inline_keyboard(buttons: &[InlineButton]) -> Value {
    let row: Vec<Value> = buttons
        .iter()
        .map(|button| json!({ "text": button.text, "callback_data": button.data }))
        .collect();
    json!({ "inline_keyboard": [row] })
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .user_agent(concat!("group-mood/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{API_BASE}/bot{token}"),
        })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, DeliveryError> {
        let body: ApiResponse<T> = response.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(DeliveryError::Rejected(
                body.description.unwrap_or_else(|| "no description".to_string()),
            )),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<T, DeliveryError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .timeout(timeout)
            .json(payload)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        poll_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": poll_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
            Duration::from_secs(poll_secs + 10),
        )
        .await
    }

    async fn send_text(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let mut payload = json!({ "chat_id": message.chat_target, "text": message.text });
        if !message.buttons.is_empty() {
            payload["reply_markup"] = inline_keyboard(&message.buttons);
        }
        self.call::<Value>("sendMessage", &payload, Duration::from_secs(30))
            .await
            .map(|_| ())
    }

    async fn send_photo(&self, message: &OutboundMessage, png: &[u8]) -> Result<(), DeliveryError> {
        let photo = Part::bytes(png.to_vec())
            .file_name("mood.png")
            .mime_str("image/png")?;
        let mut form = Form::new()
            .text("chat_id", message.chat_target.to_string())
            .part("photo", photo);
        let caption_fits = message.text.chars().count() <= CAPTION_LIMIT;
        if caption_fits {
            form = form.text("caption", message.text.clone());
        }

        let response = self
            .client
            .post(format!("{}/sendPhoto", self.base_url))
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await?;
        Self::decode::<Value>(response).await?;

        if caption_fits {
            Ok(())
        } else {
            self.send_text(message).await
        }
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        match &message.image_png {
            Some(png) => self.send_photo(message, png).await,
            None => self.send_text(message).await,
        }
    }

    async fn acknowledge(&self, callback_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.call::<Value>(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_id, "text": text }),
            Duration::from_secs(30),
        )
        .await
        .map(|_| ())
    }

    async fn clear_buttons(&self, chat_target: i64, message_id: i64) -> Result<(), DeliveryError> {
        self.call::<Value>(
            "editMessageReplyMarkup",
            &json!({
                "chat_id": chat_target,
                "message_id": message_id,
                "reply_markup": { "inline_keyboard": [] },
            }),
            Duration::from_secs(30),
        )
        .await
        .map(|_| ())
    }
}
