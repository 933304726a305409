pub mod backend;
pub mod cache;
pub mod deepl;
pub mod translator;

pub use backend::TranslationBackend;
pub use cache::TranslationCache;
pub use deepl::DeepLBackend;
pub use translator::Translator;
