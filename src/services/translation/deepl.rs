use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::middleware::CircuitBreaker;
use crate::services::translation::backend::TranslationBackend;
use crate::utils::Metrics;

const FREE_API_URL: &str = "https://api-free.deepl.com";
const PRO_API_URL: &str = "https://api.deepl.com";

/// DeepL accepts at most this many `text` entries per request
pub const MAX_TEXTS_PER_REQUEST: usize = 50;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    target_lang: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

/// Free-tier keys carry a `:fx` suffix and must use the free endpoint
pub fn base_url_for_key(api_key: &str) -> &'static str {
    if api_key.trim_end().ends_with(":fx") {
        FREE_API_URL
    } else {
        PRO_API_URL
    }
}

/// DeepL REST client (`POST /v2/translate`)
pub struct DeepLBackend {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl DeepLBackend {
    pub fn new(
        api_key: String,
        config: &TranslationConfig,
        metrics: Option<Metrics>,
    ) -> TranslationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let base_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| base_url_for_key(&api_key).to_string());

        Ok(Self {
            http_client,
            api_key,
            base_url,
            max_retries: config.max_retries,
            circuit_breaker: CircuitBreaker::new(),
            metrics,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn translate_chunk(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> TranslationResult<Vec<String>> {
        let url = format!("{}/v2/translate", self.base_url);
        let body = TranslateRequest {
            text: texts,
            target_lang,
        };

        let response: TranslateResponse = self.send_with_retries(&url, &body).await?;

        if response.translations.len() != texts.len() {
            return Err(TranslationError::LengthMismatch {
                expected: texts.len(),
                got: response.translations.len(),
            });
        }

        Ok(response.translations.into_iter().map(|t| t.text).collect())
    }

    async fn send_with_retries(
        &self,
        url: &str,
        body: &TranslateRequest<'_>,
    ) -> TranslationResult<TranslateResponse> {
        let mut attempt = 0;

        loop {
            let result = self
                .http_client
                .post(url)
                .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
                .json(body)
                .send()
                .await;

            let error = match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<TranslateResponse>()
                        .await
                        .map_err(|e| TranslationError::InvalidResponse(e.to_string()));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    TranslationError::ApiStatus { status, body }
                }
                Err(e) => TranslationError::ApiRequestFailed(e),
            };

            // 4xx other than 429 is final
            let retryable = match &error {
                TranslationError::ApiStatus { status, .. } => {
                    *status == 429 || *status >= 500
                }
                _ => true,
            };

            if !retryable || attempt >= self.max_retries {
                return Err(error);
            }

            let delay = match &error {
                TranslationError::ApiStatus { status: 429 | 503, .. } => Duration::from_secs(5),
                _ => Duration::from_millis(500 * 2_u64.pow(attempt)),
            };
            debug!(
                "DeepL request failed: {}. Retrying in {:?} ({}/{})",
                error,
                delay,
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl TranslationBackend for DeepLBackend {
    #[instrument(skip(self, texts), fields(texts = texts.len()))]
    async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> TranslationResult<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if !self.circuit_breaker.allow_request() {
            warn!("DeepL circuit breaker open, skipping request");
            return Err(TranslationError::CircuitOpen);
        }

        let start = Instant::now();
        let mut translated = Vec::with_capacity(texts.len());
        let mut outcome = Ok(());
        for chunk in texts.chunks(MAX_TEXTS_PER_REQUEST) {
            match self.translate_chunk(chunk, target_lang).await {
                Ok(part) => translated.extend(part),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let success = outcome.is_ok();
        if success {
            self.circuit_breaker.record_success();
        } else if self.circuit_breaker.record_failure() {
            warn!("DeepL circuit breaker tripped open");
            if let Some(ref m) = self.metrics {
                m.record_circuit_breaker_trip();
            }
        }
        if let Some(ref m) = self.metrics {
            m.record_backend_call(success, start.elapsed(), texts.len());
        }

        outcome.map(|()| translated)
    }

    fn name(&self) -> &str {
        "DeepL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CredentialSource;
    use crate::services::credentials::Provider;

    fn config(api_url: Option<&str>) -> TranslationConfig {
        TranslationConfig {
            provider: Provider::DeepL,
            target_lang: "EN-US".to_string(),
            credential_source: CredentialSource::Env,
            api_url: api_url.map(str::to_string),
            timeout_seconds: 2,
            max_retries: 0,
            cache_max_entries: 0,
        }
    }

    #[test]
    fn test_endpoint_from_key_suffix() {
        assert_eq!(base_url_for_key("abc-123:fx"), FREE_API_URL);
        assert_eq!(base_url_for_key("abc-123"), PRO_API_URL);
    }

    #[test]
    fn test_configured_url_overrides_key_suffix() {
        let backend =
            DeepLBackend::new("k:fx".to_string(), &config(Some("http://localhost:9")), None)
                .unwrap();
        assert_eq!(backend.base_url(), "http://localhost:9");
    }

    #[test]
    fn test_request_body_shape() {
        let texts = vec!["一".to_string(), "二".to_string()];
        let body = serde_json::to_value(TranslateRequest {
            text: &texts,
            target_lang: "EN-US",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "text": ["一", "二"], "target_lang": "EN-US" })
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"translations":[{"detected_source_language":"JA","text":"One"}]}"#;
        let parsed: TranslateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.translations[0].text, "One");
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let backend =
            DeepLBackend::new("k".to_string(), &config(Some("http://127.0.0.1:9")), None).unwrap();
        let out = backend.translate_batch(&[], "EN-US").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_failure();
        }
        let backend = DeepLBackend::new("k".to_string(), &config(Some("http://127.0.0.1:9")), None)
            .unwrap()
            .with_circuit_breaker(breaker);
        let err = backend
            .translate_batch(&["a".to_string()], "EN-US")
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::CircuitOpen));
    }
}
