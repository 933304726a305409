use lru::LruCache;
use std::num::NonZeroUsize;

use crate::utils::Metrics;

/// Memo of source text -> translated text, scoped by target language.
///
/// Owned by a single [`Translator`](super::Translator); all access goes
/// through `&mut self`, so no locking. Unbounded unless a capacity is given,
/// in which case least-recently-used entries are evicted. An existing entry is
/// never overwritten.
pub struct TranslationCache {
    entries: LruCache<(String, String), String>,
    metrics: Option<Metrics>,
}

impl TranslationCache {
    /// Cache that only grows
    pub fn unbounded() -> Self {
        Self {
            entries: LruCache::unbounded(),
            metrics: None,
        }
    }

    /// `max_entries == 0` means unbounded
    pub fn with_capacity(max_entries: usize) -> Self {
        let entries = match NonZeroUsize::new(max_entries) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        metrics.update_cache_size(self.entries.len());
        self.metrics = Some(metrics);
        self
    }

    pub fn get(&mut self, text: &str, target_lang: &str) -> Option<&String> {
        self.entries
            .get(&(target_lang.to_string(), text.to_string()))
    }

    pub fn contains(&self, text: &str, target_lang: &str) -> bool {
        self.entries
            .contains(&(target_lang.to_string(), text.to_string()))
    }

    /// Store a translation unless one is already cached for this text
    pub fn insert(&mut self, text: String, target_lang: &str, translated: String) {
        let key = (target_lang.to_string(), text);
        if self.entries.contains(&key) {
            return;
        }
        self.entries.put(key, translated);
        if let Some(ref m) = self.metrics {
            m.update_cache_size(self.entries.len());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn record_lookups(&self, hits: usize, misses: usize) {
        if let Some(ref m) = self.metrics {
            m.record_cache_hits(hits);
            m.record_cache_misses(misses);
        }
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = TranslationCache::unbounded();
        cache.insert("こんにちは".to_string(), "EN-US", "Hello".to_string());
        assert_eq!(cache.get("こんにちは", "EN-US").map(String::as_str), Some("Hello"));
        assert_eq!(cache.get("こんにちは", "DE"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_existing_entry_not_overwritten() {
        let mut cache = TranslationCache::unbounded();
        cache.insert("a".to_string(), "EN-US", "first".to_string());
        cache.insert("a".to_string(), "EN-US", "second".to_string());
        assert_eq!(cache.get("a", "EN-US").map(String::as_str), Some("first"));
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut cache = TranslationCache::with_capacity(2);
        cache.insert("a".to_string(), "EN-US", "A".to_string());
        cache.insert("b".to_string(), "EN-US", "B".to_string());
        cache.get("a", "EN-US");
        cache.insert("c".to_string(), "EN-US", "C".to_string());

        assert!(cache.contains("a", "EN-US"));
        assert!(!cache.contains("b", "EN-US"));
        assert!(cache.contains("c", "EN-US"));
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let mut cache = TranslationCache::with_capacity(0);
        for i in 0..1000 {
            cache.insert(i.to_string(), "EN-US", i.to_string());
        }
        assert_eq!(cache.len(), 1000);
    }

    #[test]
    fn test_cache_size_metric() {
        let metrics = Metrics::new();
        let mut cache = TranslationCache::unbounded().with_metrics(metrics.clone());
        cache.insert("a".to_string(), "EN-US", "A".to_string());
        cache.record_lookups(2, 1);

        let s = metrics.snapshot();
        assert_eq!(s.cache_size, 1);
        assert_eq!(s.cache_hits, 2);
        assert_eq!(s.cache_misses, 1);
    }
}
