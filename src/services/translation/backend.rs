use async_trait::async_trait;

use crate::core::errors::TranslationResult;

/// Batch translation service.
///
/// Implementations return exactly one translation per input text, in input
/// order. A call may fail as a whole; partial results are not a thing.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> TranslationResult<Vec<String>>;

    /// Short name for logs
    fn name(&self) -> &str;
}
