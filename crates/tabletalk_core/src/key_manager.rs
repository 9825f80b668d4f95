use crate::error::{Error, Result};
use crate::util::app_dirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolves the single API credential at startup: environment variables
/// first, then a cached key file under the platform config dir. A missing
/// key is a hard error before any remote call is attempted.
#[derive(Debug, Clone)]
pub struct KeyManager {
    cache_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedKey {
    api_key: String,
    cached_at: chrono::DateTime<chrono::Utc>,
}

impl KeyManager {
    pub fn new() -> Result<Self> {
        let config_dir = app_dirs()?.config_dir().to_path_buf();
        std::fs::create_dir_all(&config_dir)?;
        Ok(Self { cache_path: config_dir.join("api_key.json") })
    }

    #[cfg(test)]
    fn with_cache_path(cache_path: PathBuf) -> Self {
        Self { cache_path }
    }

    pub fn resolve(&self) -> Result<String> {
        for var in ["TABLETALK_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if Self::looks_like_key(&key) {
                    tracing::debug!(source = var, fingerprint = %Self::fingerprint(&key), "using API key from environment");
                    return Ok(key);
                }
            }
        }
        if let Ok(cached) = self.read_cached() {
            tracing::debug!(fingerprint = %Self::fingerprint(&cached.api_key), "using cached API key");
            return Ok(cached.api_key);
        }
        Err(Error::Config(format!(
            "no API key found; set TABLETALK_API_KEY (or OPENAI_API_KEY), or store one at {}",
            self.cache_path.display()
        )))
    }

    /// Write the key to the cache file so later sessions need no env var.
    pub fn store(&self, api_key: &str) -> Result<()> {
        if !Self::looks_like_key(api_key) {
            return Err(Error::Config("refusing to store a key that does not look valid".into()));
        }
        let cached = CachedKey { api_key: api_key.to_string(), cached_at: chrono::Utc::now() };
        std::fs::write(&self.cache_path, serde_json::to_string_pretty(&cached)?)?;
        Ok(())
    }

    fn read_cached(&self) -> Result<CachedKey> {
        if !self.cache_path.exists() {
            return Err(Error::Config("no cached key".into()));
        }
        let content = std::fs::read_to_string(&self.cache_path)?;
        let cached: CachedKey = serde_json::from_str(&content)?;
        if !Self::looks_like_key(&cached.api_key) {
            return Err(Error::Config("cached key is invalid".into()));
        }
        Ok(cached)
    }

    fn looks_like_key(key: &str) -> bool {
        key.len() >= 20 && !key.chars().any(|c| c.is_whitespace())
    }

    /// Log-safe form: first 6 and last 4 characters. Counts characters, not
    /// bytes, so keys with non-ASCII content never split mid-character.
    pub fn fingerprint(key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() >= 10 {
            let head: String = chars[..6].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        } else {
            "invalid".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(KeyManager::looks_like_key("sk-abc123def456ghi789jkl012"));
        assert!(!KeyManager::looks_like_key("short"));
        assert!(!KeyManager::looks_like_key("has a space in it somewhere"));
        assert!(!KeyManager::looks_like_key(""));
    }

    #[test]
    fn key_fingerprint() {
        assert_eq!(KeyManager::fingerprint("sk-abc123def456ghi789jkl012"), "sk-abc...l012");
        assert_eq!(KeyManager::fingerprint("tiny"), "invalid");
    }

    #[test]
    fn fingerprint_handles_multibyte_characters() {
        assert_eq!(KeyManager::fingerprint("sk-é123abc456def789ghi"), "sk-é12...9ghi");
        assert_eq!(KeyManager::fingerprint("ключключключключ"), "ключкл...ключ");
    }

    #[test]
    fn store_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let km = KeyManager::with_cache_path(dir.path().join("api_key.json"));
        km.store("sk-abc123def456ghi789jkl012").unwrap();
        let cached = km.read_cached().unwrap();
        assert_eq!(cached.api_key, "sk-abc123def456ghi789jkl012");
    }

    #[test]
    fn store_rejects_invalid_key() {
        let dir = tempfile::tempdir().unwrap();
        let km = KeyManager::with_cache_path(dir.path().join("api_key.json"));
        assert!(km.store("nope").is_err());
    }
}
