//! Secret resolution and at-rest token encryption.
//!
//! A [`SecretSource`] names where a config secret lives. An inline `value`
//! wins over a `file`, which wins over an `env` variable; empty entries are
//! skipped.
//!
//! OAuth tokens are sealed by [`TokenEncryptor`] before they reach SQLite.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret source is empty (set one of value, file, env)")]
    NoSourceProvided,

    #[error("cannot read secret file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{name}' is not set")]
    EnvVarNotSet { name: String },

    #[error("environment variable '{name}' is not valid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("token sealing failed: {0}")]
    Seal(String),

    #[error("token unsealing failed: {0}")]
    Unseal(String),

    #[error("invalid token key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a secret comes from, as written in the config file.
///
/// ```json
/// { "env": "MAILPULSE_CLIENT_SECRET" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl SecretSource {
    /// A source reading the named environment variable.
    pub fn env(name: &str) -> Self {
        Self {
            env: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Whether at least one non-empty source is configured.
    pub fn is_configured(&self) -> bool {
        self.value.as_deref().is_some_and(|s| !s.is_empty())
            || self.file.as_deref().is_some_and(|s| !s.is_empty())
            || self.env.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Resolves the secret, failing if no source yields a value.
    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    /// Resolves the secret, returning `None` when nothing is configured.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolves a secret from the first non-empty source in priority order.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|source| SecretError::FileRead {
            path: expanded.clone(),
            source,
        })?;
        return Ok(SecretString::from(content.trim().to_string()));
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// `~` and `~/rest` resolve against the home directory; anything else is
/// returned as given.
fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}

pub const TOKEN_KEY_ENV_VAR: &str = "MAILPULSE_TOKEN_KEY";

const NONCE_LEN: usize = 12;

/// Seals OAuth tokens with AES-256-GCM.
///
/// Each ciphertext is bound to the account it belongs to (the account id is
/// the associated data), so a row copied onto another account fails to open.
/// Stored form is base64 of `nonce || ciphertext`.
pub struct TokenEncryptor {
    cipher: Aes256Gcm,
}

impl TokenEncryptor {
    /// Reads a 64-hex-char key from `MAILPULSE_TOKEN_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(TOKEN_KEY_ENV_VAR)
            .map_err(|_| SecretError::InvalidKey(format!("{} is not set", TOKEN_KEY_ENV_VAR)))?;
        Self::from_hex_key(&key)
    }

    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key = parse_key(key_hex.trim())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, account_id: &str, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|e| SecretError::Seal(e.to_string()))?;

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: account_id.as_bytes(),
                },
            )
            .map_err(|e| SecretError::Seal(e.to_string()))?;

        let mut stored = Vec::with_capacity(NONCE_LEN + sealed.len());
        stored.extend_from_slice(&nonce);
        stored.extend_from_slice(&sealed);
        Ok(STANDARD.encode(stored))
    }

    pub fn decrypt(&self, account_id: &str, stored: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(stored)
            .map_err(|e| SecretError::Unseal(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(SecretError::Unseal("ciphertext truncated".to_string()));
        }

        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let opened = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: account_id.as_bytes(),
                },
            )
            .map_err(|e| SecretError::Unseal(e.to_string()))?;
        String::from_utf8(opened).map_err(|e| SecretError::Unseal(e.to_string()))
    }
}

fn parse_key(hex: &str) -> Result<[u8; 32]> {
    if hex.len() != 64 || !hex.is_ascii() {
        return Err(SecretError::InvalidKey(format!(
            "expected 64 hex characters, got {}",
            hex.len()
        )));
    }
    let mut key = [0u8; 32];
    for (slot, pair) in key.iter_mut().zip(hex.as_bytes().chunks(2)) {
        let digits = std::str::from_utf8(pair).map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        *slot = u8::from_str_radix(digits, 16)
            .map_err(|_| SecretError::InvalidKey(format!("'{}' is not hex", digits)))?;
    }
    Ok(key)
}
