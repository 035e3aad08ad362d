//! EasyNMT translation adapter.
//!
//! EasyNMT is not a chat model: `chat` is implemented by extracting the last
//! user message as the text to translate. `POST /translate` is tried first;
//! on any 4xx, falls back to `GET /translate?...` (some EasyNMT deployments
//! only expose the GET form). The response body is either
//! `{"translation": "..."}` or a bare JSON string.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::RouterError;
use crate::request::ChatRequest;
use crate::response::Response;

use super::Adapter;

pub struct EasyNmtAdapter {
    config: BackendConfig,
    client: Client,
}

impl EasyNmtAdapter {
    pub fn new(config: BackendConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn target_lang(&self) -> &str {
        // The neutral config has no dedicated "target language" field;
        // model_name doubles as it for this adapter (e.g. "en", "de").
        &self.config.model_name
    }

    async fn translate(&self, text: &str) -> Result<String, RouterError> {
        let url = format!("{}/translate", self.config.base_url.trim_end_matches('/'));
        let body = PostBody { text: vec![text.to_string()], target_lang: self.target_lang().to_string() };

        let post_resp = self.client.post(&url).json(&body).send().await?;
        if post_resp.status().is_success() {
            return parse_translation_body(post_resp).await;
        }
        if !post_resp.status().is_client_error() {
            return Err(super::error_for_status(post_resp).await);
        }

        debug!(backend = %self.config.name, "easynmt POST /translate rejected, falling back to GET");
        let get_resp = self
            .client
            .get(&url)
            .query(&[("text", text), ("target_lang", self.target_lang())])
            .send()
            .await?;
        if !get_resp.status().is_success() {
            return Err(super::error_for_status(get_resp).await);
        }
        parse_translation_body(get_resp).await
    }

    /// Query the supported source/target language pairs this deployment
    /// serves. Not part of the `Adapter` trait — adapter-specific
    /// capability, called directly by callers that hold a concrete
    /// `EasyNmtAdapter`.
    pub async fn get_language_pairs(&self) -> Result<Vec<(String, String)>, RouterError> {
        let url = format!("{}/language_pairs", self.config.base_url.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(super::error_for_status(resp).await);
        }
        let pairs: LanguagePairsResponse = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
        Ok(pairs.into_tuples())
    }
}

#[async_trait]
impl Adapter for EasyNmtAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/language_pairs", self.config.base_url.trim_end_matches('/')))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
        let text = request
            .last_user_message()
            .ok_or_else(|| RouterError::BadRequest("No user message".to_string()))?
            .content
            .clone();

        let start = Instant::now();
        let translated = self.translate(&text).await.map_err(|e| {
            warn!(backend = %self.config.name, error = %e, "easynmt translation failed");
            e
        })?;
        let elapsed = start.elapsed();

        debug!(backend = %self.config.name, "easynmt translation succeeded");

        Ok(Response::success(&self.config.name, &self.config.model_name, translated)
            .with_duration_ms(elapsed.as_millis() as u64))
    }
}

async fn parse_translation_body(resp: reqwest::Response) -> Result<String, RouterError> {
    let value: serde_json::Value = resp.json().await.map_err(|e| RouterError::Deserialization(e.to_string()))?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Object(_) => {
            let parsed: TranslationBody = serde_json::from_value(value).map_err(|e| RouterError::Deserialization(e.to_string()))?;
            Ok(parsed.translation)
        }
        other => Err(RouterError::Deserialization(format!("unexpected easynmt response shape: {other}"))),
    }
}

#[derive(Debug, Serialize)]
struct PostBody {
    text: Vec<String>,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
struct TranslationBody {
    translation: String,
}

#[derive(Debug, Deserialize)]
struct LanguagePairsResponse(std::collections::HashMap<String, Vec<String>>);

impl LanguagePairsResponse {
    fn into_tuples(self) -> Vec<(String, String)> {
        self.0
            .into_iter()
            .flat_map(|(src, targets)| targets.into_iter().map(move |tgt| (src.clone(), tgt)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendType;
    use crate::request::ChatMessage;

    #[tokio::test]
    async fn missing_user_message_is_bad_request() {
        let config = BackendConfig::new("easynmt", BackendType::EasyNmt, "http://localhost:24080", "de");
        let adapter = EasyNmtAdapter::new(config, Client::new());
        let req = ChatRequest::new(vec![ChatMessage::system("only system")]);
        let err = adapter.chat(&req).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }
}
