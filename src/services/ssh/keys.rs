//! Private key loading with a passphrase fallback.
//!
//! A key file is first parsed as an unencrypted key. If that fails the file is
//! treated as passphrase protected: the passphrase is asked for once per
//! process and the key is decoded again. A failure at that point is final.

use crate::error::TunnelError;
use russh_keys::key::KeyPair;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Something that can supply the passphrase for an encrypted key.
pub trait PassphraseSource: Send + Sync {
    fn passphrase(&self, key_path: &Path) -> Result<String, TunnelError>;
}

/// Prompts on the controlling terminal without echoing input.
pub struct TerminalPrompt;

impl PassphraseSource for TerminalPrompt {
    fn passphrase(&self, key_path: &Path) -> Result<String, TunnelError> {
        dialoguer::Password::new()
            .with_prompt(format!("Enter ssh key password for {}", key_path.display()))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| TunnelError::Prompt(e.to_string()))
    }
}

/// Asks the wrapped source at most once and reuses the answer afterwards.
pub struct PassphraseCache {
    source: Box<dyn PassphraseSource>,
    cached: Mutex<Option<String>>,
}

impl PassphraseCache {
    pub fn new(source: impl PassphraseSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self, key_path: &Path) -> Result<String, TunnelError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(passphrase) = cached.as_ref() {
            return Ok(passphrase.clone());
        }
        let passphrase = self.source.passphrase(key_path)?;
        *cached = Some(passphrase.clone());
        Ok(passphrase)
    }
}

/// Outcome of the first, passphrase-less parse of a key file.
pub enum PrivateKeySource {
    Plain(KeyPair),
    Encrypted {
        path: PathBuf,
        pem: String,
        plain_error: russh_keys::Error,
    },
}

impl PrivateKeySource {
    pub fn parse(path: impl Into<PathBuf>, pem: String) -> Self {
        match russh_keys::decode_secret_key(&pem, None) {
            Ok(key) => PrivateKeySource::Plain(key),
            Err(plain_error) => PrivateKeySource::Encrypted {
                path: path.into(),
                pem,
                plain_error,
            },
        }
    }

    /// Resolve to a usable key, asking for a passphrase only when encrypted.
    pub fn unlock(self, passphrases: &PassphraseCache) -> Result<KeyPair, TunnelError> {
        match self {
            PrivateKeySource::Plain(key) => Ok(key),
            PrivateKeySource::Encrypted {
                path,
                pem,
                plain_error,
            } => {
                tracing::debug!(
                    path = %path.display(),
                    error = %plain_error,
                    "private key needs a passphrase"
                );
                let passphrase = passphrases.get(&path)?;
                russh_keys::decode_secret_key(&pem, Some(passphrase.as_str()))
                    .map_err(|source| TunnelError::KeyDecryption { path, source })
            }
        }
    }
}

/// Read and unlock the key at `path`. A missing file yields `None` so other
/// authentication methods can still be tried.
pub fn load_private_key(
    path: &Path,
    passphrases: &PassphraseCache,
) -> Result<Option<KeyPair>, TunnelError> {
    let pem = match std::fs::read_to_string(path) {
        Ok(pem) => pem,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No private key at {}, skipping", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(TunnelError::KeyRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    PrivateKeySource::parse(path, pem).unlock(passphrases).map(Some)
}
