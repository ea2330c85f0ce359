use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::classifier::{RawPrediction, SentimentModel};
use crate::error::ClassificationError;

/// Text-classification endpoint speaking the common `{"inputs": text}` protocol.
pub struct HttpSentimentModel {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<RawPrediction>>),
    Flat(Vec<RawPrediction>),
    Single(RawPrediction),
}

impl InferenceResponse {
    fn best(self) -> Option<RawPrediction> {
        let candidates = match self {
            InferenceResponse::Nested(batches) => batches.into_iter().next().unwrap_or_default(),
            InferenceResponse::Flat(predictions) => predictions,
            InferenceResponse::Single(prediction) => vec![prediction],
        };
        candidates
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
    }
}

impl HttpSentimentModel {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, ClassificationError> {
        let client = Client::builder()
            .user_agent(concat!("group-mood/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ClassificationError::Unavailable(format!("http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }
}

#[async_trait]
impl SentimentModel for HttpSentimentModel {
    async fn predict(&self, text: &str) -> Result<RawPrediction, ClassificationError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({ "inputs": text }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ClassificationError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Unavailable(format!("HTTP {status}: {body}")));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|err| ClassificationError::Unavailable(format!("malformed response: {err}")))?;
        parsed.best().ok_or(ClassificationError::EmptyPrediction)
    }
}
