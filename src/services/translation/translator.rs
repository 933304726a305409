use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::config::TranslationConfig;
use crate::core::errors::TranslationResult;
use crate::services::credentials::CredentialStore;
use crate::services::translation::backend::TranslationBackend;
use crate::services::translation::cache::TranslationCache;
use crate::services::translation::deepl::DeepLBackend;
use crate::utils::Metrics;

/// Caching, order-preserving front for a [`TranslationBackend`].
///
/// Without a backend (no API key configured) the translator runs in
/// pass-through mode: every text comes back unchanged and nothing is cached.
pub struct Translator {
    backend: Option<Arc<dyn TranslationBackend>>,
    cache: TranslationCache,
}

impl Translator {
    pub fn new(backend: Arc<dyn TranslationBackend>, cache: TranslationCache) -> Self {
        Self {
            backend: Some(backend),
            cache,
        }
    }

    pub fn pass_through() -> Self {
        Self {
            backend: None,
            cache: TranslationCache::unbounded(),
        }
    }

    /// Build the configured backend from a stored credential, or fall back to
    /// pass-through when no key is available.
    pub fn from_credentials(
        store: &dyn CredentialStore,
        config: &TranslationConfig,
        metrics: Option<Metrics>,
    ) -> TranslationResult<Self> {
        let provider = config.provider.to_string();
        let Some(api_key) = store.get_key(&provider) else {
            warn!(
                "No {} API key found, translations will pass source text through",
                provider
            );
            return Ok(Self::pass_through());
        };

        let backend = DeepLBackend::new(api_key, config, metrics.clone())?;
        info!("Translation backend: {} ({})", provider, backend.base_url());

        let mut cache = TranslationCache::with_capacity(config.cache_max_entries);
        if let Some(m) = metrics {
            cache = cache.with_metrics(m);
        }
        Ok(Self::new(Arc::new(backend), cache))
    }

    pub fn is_pass_through(&self) -> bool {
        self.backend.is_none()
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Translate `texts`, one output per input in the same order.
    ///
    /// Texts missing from the cache are sent to the backend in a single
    /// batch (deduplicated, first-occurrence order, empty strings skipped).
    /// A failed batch leaves its texts untranslated. Outputs come from this
    /// call's own hits and fetches, so a bounded cache evicting mid-call
    /// cannot lose a translation.
    #[instrument(skip(self, texts), fields(texts = texts.len()))]
    pub async fn translate_many(&mut self, texts: &[String], target_lang: &str) -> Vec<String> {
        let Some(backend) = self.backend.clone() else {
            return texts.to_vec();
        };

        let mut resolved: HashMap<String, String> = HashMap::new();
        let mut uncached: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for text in texts {
            if text.is_empty() || !seen.insert(text.as_str()) {
                continue;
            }
            match self.cache.get(text, target_lang) {
                Some(hit) => {
                    resolved.insert(text.clone(), hit.clone());
                }
                None => uncached.push(text.clone()),
            }
        }
        self.cache.record_lookups(resolved.len(), uncached.len());

        if !uncached.is_empty() {
            debug!(
                "Translating {} uncached of {} texts via {}",
                uncached.len(),
                texts.len(),
                backend.name()
            );
            let fetched = self
                .fetch_into_cache(backend.as_ref(), uncached, target_lang)
                .await;
            resolved.extend(fetched);
        }

        texts
            .iter()
            .map(|t| resolved.get(t).cloned().unwrap_or_else(|| t.clone()))
            .collect()
    }

    /// Translate one text, consulting the cache first
    pub async fn translate(&mut self, text: &str, target_lang: &str) -> String {
        let Some(backend) = self.backend.clone() else {
            return text.to_string();
        };
        if text.is_empty() {
            return String::new();
        }

        if let Some(hit) = self.cache.get(text, target_lang) {
            let hit = hit.clone();
            self.cache.record_lookups(1, 0);
            return hit;
        }
        self.cache.record_lookups(0, 1);

        self.fetch_into_cache(backend.as_ref(), vec![text.to_string()], target_lang)
            .await
            .pop()
            .map(|(_, translated)| translated)
            .unwrap_or_else(|| text.to_string())
    }

    /// One backend call. Returns the `(source, translation)` pairs it
    /// cached, or nothing when the call failed.
    async fn fetch_into_cache(
        &mut self,
        backend: &dyn TranslationBackend,
        texts: Vec<String>,
        target_lang: &str,
    ) -> Vec<(String, String)> {
        match backend.translate_batch(&texts, target_lang).await {
            Ok(translated) if translated.len() == texts.len() => {
                let pairs: Vec<(String, String)> = texts.into_iter().zip(translated).collect();
                for (source, target) in &pairs {
                    self.cache.insert(source.clone(), target_lang, target.clone());
                }
                pairs
            }
            Ok(translated) => {
                warn!(
                    "{} returned {} translations for {} texts, keeping source text",
                    backend.name(),
                    translated.len(),
                    texts.len()
                );
                Vec::new()
            }
            Err(e) => {
                warn!(
                    "{} translation failed, keeping source text for {} strings: {}",
                    backend.name(),
                    texts.len(),
                    e
                );
                Vec::new()
            }
        }
    }
}
