use crate::core::errors::{ConfigError, ConfigResult};
use crate::core::types::DetectParams;
use crate::services::credentials::Provider;
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    /// Requests allowed to wait behind the in-flight run
    pub worker_queue_depth: usize,
}

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub detector_model_path: String,
    pub recognizer_model_path: String,
    pub recognizer_vocab_path: String,
    pub confidence_threshold: f32,
    pub batch_size: usize,
    pub target_size: u32,
    pub inference_backend: Option<String>,
}

/// Region fusion configuration
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub confidence_floor: f32,
    pub iou_threshold: f32,
}

/// Where the translation API key comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Keyring,
    Env,
}

/// Translation configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub provider: Provider,
    pub target_lang: String,
    pub credential_source: CredentialSource,
    /// Overrides the endpoint chosen from the key suffix
    pub api_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    /// 0 keeps the cache unbounded
    pub cache_max_entries: usize,
}

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    /// Ordered font preference, first available wins
    pub font_families: Vec<String>,
    pub font_size: u32,
    pub fonts_dir: String,
    pub load_system_fonts: bool,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub fusion: FusionConfig,
    pub translation: TranslationConfig,
    pub rendering: RenderingConfig,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_log_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> ConfigResult<Self> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_log_level(&s))
            .unwrap_or(Level::INFO);

        let provider_name =
            env::var("TRANSLATION_PROVIDER").unwrap_or_else(|_| "DeepL".to_string());
        let provider = provider_name.parse::<Provider>().map_err(|_| {
            ConfigError::InvalidTranslationConfig(format!(
                "unknown TRANSLATION_PROVIDER '{}'",
                provider_name
            ))
        })?;

        let credential_source = match env::var("CREDENTIAL_SOURCE")
            .unwrap_or_else(|_| "keyring".to_string())
            .to_lowercase()
            .as_str()
        {
            "keyring" => CredentialSource::Keyring,
            "env" => CredentialSource::Env,
            other => {
                return Err(ConfigError::InvalidTranslationConfig(format!(
                    "CREDENTIAL_SOURCE must be 'keyring' or 'env', got '{}'",
                    other
                )))
            }
        };

        let font_families = env::var("FONT_FAMILIES")
            .unwrap_or_else(|_| "Noto Sans JP,Meiryo".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server: ServerConfig {
                port: parse_env("SERVER_PORT", 1421),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                log_level,
                worker_queue_depth: parse_env("WORKER_QUEUE_DEPTH", 1),
            },
            detection: DetectionConfig {
                detector_model_path: env::var("DETECTOR_MODEL_PATH")
                    .unwrap_or_else(|_| "models/text_detector.onnx".to_string()),
                recognizer_model_path: env::var("RECOGNIZER_MODEL_PATH")
                    .unwrap_or_else(|_| "models/text_recognizer.onnx".to_string()),
                recognizer_vocab_path: env::var("RECOGNIZER_VOCAB_PATH")
                    .unwrap_or_else(|_| "models/vocab.txt".to_string()),
                confidence_threshold: parse_env("DETECTOR_CONFIDENCE_THRESHOLD", 0.5),
                batch_size: parse_env("DETECTOR_BATCH_SIZE", 16),
                target_size: parse_env("DETECTOR_TARGET_SIZE", 640),
                inference_backend: env::var("INFERENCE_BACKEND")
                    .ok()
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty()),
            },
            fusion: FusionConfig {
                confidence_floor: parse_env("FUSION_CONFIDENCE_FLOOR", 0.4),
                iou_threshold: parse_env("FUSION_IOU_THRESHOLD", 0.5),
            },
            translation: TranslationConfig {
                provider,
                target_lang: env::var("TARGET_LANG").unwrap_or_else(|_| "EN-US".to_string()),
                credential_source,
                api_url: env::var("DEEPL_API_URL")
                    .ok()
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty()),
                timeout_seconds: parse_env("API_TIMEOUT_SECONDS", 30),
                max_retries: parse_env("MAX_RETRIES", 2),
                cache_max_entries: parse_env("CACHE_MAX_ENTRIES", 0),
            },
            rendering: RenderingConfig {
                font_families,
                font_size: parse_env("FONT_SIZE", 14),
                fonts_dir: env::var("FONTS_DIR").unwrap_or_else(|_| "fonts".to_string()),
                load_system_fonts: parse_env("LOAD_SYSTEM_FONTS", true),
            },
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&self.fusion.confidence_floor) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.fusion.confidence_floor,
            ));
        }

        if !(0.0..=1.0).contains(&self.fusion.iou_threshold) {
            return Err(ConfigError::InvalidIoUThreshold(self.fusion.iou_threshold));
        }

        if self.detection.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.detection.batch_size));
        }

        if self.server.worker_queue_depth == 0 {
            return Err(ConfigError::InvalidBatchSize(self.server.worker_queue_depth));
        }

        if !(320..=2048).contains(&self.detection.target_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "target_size must be between 320 and 2048, got {}",
                self.detection.target_size
            )));
        }

        if !self.translation.provider.has_backend() {
            return Err(ConfigError::InvalidTranslationConfig(format!(
                "no translation backend for provider {}",
                self.translation.provider
            )));
        }

        if self.translation.target_lang.trim().is_empty() {
            return Err(ConfigError::InvalidTranslationConfig(
                "TARGET_LANG must not be empty".to_string(),
            ));
        }

        if self.rendering.font_families.is_empty() {
            return Err(ConfigError::InvalidRenderingConfig(
                "FONT_FAMILIES must name at least one family".to_string(),
            ));
        }

        if self.rendering.font_size == 0 {
            return Err(ConfigError::InvalidRenderingConfig(
                "FONT_SIZE must be >= 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn target_lang(&self) -> &str {
        &self.translation.target_lang
    }

    /// Detector parameters used for both passes of every run
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence_threshold: self.detection.confidence_threshold,
            batch_size: self.detection.batch_size,
            ..DetectParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            server: ServerConfig {
                port: 1421,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
                worker_queue_depth: 1,
            },
            detection: DetectionConfig {
                detector_model_path: "d.onnx".to_string(),
                recognizer_model_path: "r.onnx".to_string(),
                recognizer_vocab_path: "v.txt".to_string(),
                confidence_threshold: 0.5,
                batch_size: 16,
                target_size: 640,
                inference_backend: None,
            },
            fusion: FusionConfig {
                confidence_floor: 0.4,
                iou_threshold: 0.5,
            },
            translation: TranslationConfig {
                provider: Provider::DeepL,
                target_lang: "EN-US".to_string(),
                credential_source: CredentialSource::Env,
                api_url: None,
                timeout_seconds: 30,
                max_retries: 2,
                cache_max_entries: 0,
            },
            rendering: RenderingConfig {
                font_families: vec!["Noto Sans JP".to_string(), "Meiryo".to_string()],
                font_size: 14,
                fonts_dir: "fonts".to_string(),
                load_system_fonts: true,
            },
        }
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_floor() {
        let mut config = sample();
        config.fusion.confidence_floor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));
    }

    #[test]
    fn test_rejects_provider_without_backend() {
        let mut config = sample();
        config.translation.provider = Provider::Azure;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTranslationConfig(_))
        ));
    }

    #[test]
    fn test_rejects_empty_font_list() {
        let mut config = sample();
        config.rendering.font_families.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detect_params_follow_config() {
        let mut config = sample();
        config.detection.batch_size = 4;
        let params = config.detect_params();
        assert_eq!(params.batch_size, 4);
        assert_eq!(params.confidence_threshold, 0.5);
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("Warning"), Some(Level::WARN));
        assert_eq!(parse_log_level("loud"), None);
    }
}
