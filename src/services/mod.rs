pub mod credentials;
pub mod detection;
pub mod fusion;
pub mod rendering;
pub mod translation;

// Re-export commonly used services
pub use credentials::{CredentialStore, EnvCredentialStore, KeyringStore, Provider};
pub use detection::{OnnxTextDetector, TextDetector};
pub use fusion::RegionFuser;
pub use rendering::{CosmicTextEngine, OverlayRenderer};
pub use translation::{DeepLBackend, TranslationBackend, TranslationCache, Translator};
