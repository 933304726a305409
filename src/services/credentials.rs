//! API key lookup for translation providers.
//!
//! Keys live in the OS keychain (GNOME Keyring / KWallet, macOS Keychain,
//! Windows Credential Manager) under one service name with a fixed account
//! per provider, or come from environment variables for headless setups.

use crate::core::errors::{CredentialError, CredentialResult};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const SERVICE_NAME: &str = "OCRApp";

/// Translation providers a key can be stored for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    DeepL,
    Azure,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::DeepL, Provider::Azure, Provider::Google];

    /// Keychain account name for this provider
    pub fn account(&self) -> &'static str {
        match self {
            Provider::DeepL => "deepl_api_key",
            Provider::Azure => "azure_translator_key",
            Provider::Google => "google_translate_key",
        }
    }

    /// Environment variable consulted by [`EnvCredentialStore`]
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::DeepL => "DEEPL_API_KEY",
            Provider::Azure => "AZURE_TRANSLATOR_KEY",
            Provider::Google => "GOOGLE_TRANSLATE_KEY",
        }
    }

    pub fn has_backend(&self) -> bool {
        matches!(self, Provider::DeepL)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::DeepL => "DeepL",
            Provider::Azure => "Azure",
            Provider::Google => "Google",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CredentialError::UnknownProvider(s.to_string()))
    }
}

/// Read side of a credential store. Absence of a key is `None`, not an error.
pub trait CredentialStore: Send + Sync {
    fn get_key(&self, provider: &str) -> Option<String>;
}

/// OS keychain backed store
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, provider: Provider) -> CredentialResult<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, provider.account())?)
    }

    pub fn set_key(&self, provider: &str, key: &str) -> CredentialResult<()> {
        let provider = provider.parse::<Provider>()?;
        self.entry(provider)?.set_password(key)?;
        debug!("Stored API key for {}", provider);
        Ok(())
    }

    /// Remove a stored key. Removing a key that was never stored succeeds.
    pub fn delete_key(&self, provider: &str) -> CredentialResult<()> {
        let provider = provider.parse::<Provider>()?;
        match self.entry(provider)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn lookup(&self, provider: &str) -> CredentialResult<Option<String>> {
        let provider = provider.parse::<Provider>()?;
        match self.entry(provider)?.get_password() {
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStore for KeyringStore {
    fn get_key(&self, provider: &str) -> Option<String> {
        match self.lookup(provider) {
            Ok(key) => key.filter(|k| !k.trim().is_empty()),
            Err(CredentialError::UnknownProvider(_)) => None,
            Err(e) => {
                warn!("Keychain lookup for {} failed: {}", provider, e);
                None
            }
        }
    }
}

/// Reads keys from `DEEPL_API_KEY`, `AZURE_TRANSLATOR_KEY`, `GOOGLE_TRANSLATE_KEY`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get_key(&self, provider: &str) -> Option<String> {
        let provider = provider.parse::<Provider>().ok()?;
        std::env::var(provider.env_var())
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_accounts() {
        assert_eq!(Provider::DeepL.account(), "deepl_api_key");
        assert_eq!(Provider::Azure.account(), "azure_translator_key");
        assert_eq!(Provider::Google.account(), "google_translate_key");
    }

    #[test]
    fn test_provider_parse_is_case_insensitive() {
        assert_eq!("deepl".parse::<Provider>().unwrap(), Provider::DeepL);
        assert_eq!(" Google ".parse::<Provider>().unwrap(), Provider::Google);
        assert!(matches!(
            "Yandex".parse::<Provider>(),
            Err(CredentialError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_only_deepl_has_backend() {
        let with_backend: Vec<_> = Provider::ALL.iter().filter(|p| p.has_backend()).collect();
        assert_eq!(with_backend, [&Provider::DeepL]);
    }

    #[test]
    fn test_env_store_unknown_provider_is_none() {
        assert_eq!(EnvCredentialStore.get_key("Yandex"), None);
    }

    #[test]
    fn test_keyring_unknown_provider_is_error() {
        let store = KeyringStore::default();
        assert!(matches!(
            store.set_key("Yandex", "k"),
            Err(CredentialError::UnknownProvider(_))
        ));
        assert_eq!(store.get_key("Yandex"), None);
    }
}
