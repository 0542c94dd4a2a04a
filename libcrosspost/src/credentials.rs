//! Encryption of platform tokens at rest
//!
//! Access and refresh tokens are encrypted with an age X25519 identity
//! before they reach the database and stored as base64 text. Decryption
//! yields a [`SecretString`] that only adapters expose when building an
//! upstream request.
//!
//! ```
//! use libcrosspost::credentials::TokenCipher;
//! use secrecy::ExposeSecret;
//!
//! let cipher = TokenCipher::generate();
//! let sealed = cipher.encrypt("EAAB-page-token").unwrap();
//! assert_ne!(sealed, "EAAB-page-token");
//! assert_eq!(cipher.decrypt(&sealed).unwrap().expose_secret(), "EAAB-page-token");
//! ```

use age::secrecy::ExposeSecret as _;
use base64::Engine;
use secrecy::SecretString;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{CredentialError, Result};

#[derive(Clone)]
pub struct TokenCipher {
    identity: Arc<age::x25519::Identity>,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("recipient", &self.identity.to_public().to_string())
            .finish()
    }
}

impl TokenCipher {
    /// Load a cipher from an `AGE-SECRET-KEY-1...` identity string
    pub fn from_key(key: &str) -> Result<Self> {
        let identity = age::x25519::Identity::from_str(key.trim())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        Ok(Self {
            identity: Arc::new(identity),
        })
    }

    /// Create a cipher with a freshly generated identity
    pub fn generate() -> Self {
        Self {
            identity: Arc::new(age::x25519::Identity::generate()),
        }
    }

    /// The identity string, for persisting a generated key
    pub fn export_key(&self) -> SecretString {
        SecretString::from(self.identity.to_string().expose_secret().to_string())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let recipient: Box<dyn age::Recipient + Send> = Box::new(self.identity.to_public());
        let encryptor = age::Encryptor::with_recipients(vec![recipient])
            .ok_or_else(|| CredentialError::Encrypt("no recipients".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encrypt(e.to_string()))?;

        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| CredentialError::Encrypt(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| CredentialError::Encrypt(e.to_string()))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<SecretString> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(sealed.trim())
            .map_err(|e| CredentialError::Decrypt(format!("invalid base64: {}", e)))?;

        let decryptor = match age::Decryptor::new(&data[..]) {
            Ok(age::Decryptor::Recipients(d)) => d,
            Ok(_) => {
                return Err(CredentialError::Decrypt(
                    "Invalid encryption format (expected recipient-encrypted token)".to_string(),
                )
                .into())
            }
            Err(e) => return Err(CredentialError::Decrypt(e.to_string()).into()),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(&*self.identity as &dyn age::Identity))
            .map_err(|e| CredentialError::Decrypt(e.to_string()))?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| CredentialError::Decrypt(e.to_string()))?;

        let plaintext = String::from_utf8(decrypted)
            .map_err(|e| CredentialError::Decrypt(format!("Invalid UTF-8: {}", e)))?;

        Ok(SecretString::from(plaintext))
    }
}

/// A stored token that stays encrypted until an adapter needs it
#[derive(Clone)]
pub struct SealedToken {
    sealed: String,
    cipher: TokenCipher,
}

impl SealedToken {
    pub fn new(sealed: String, cipher: TokenCipher) -> Self {
        Self { sealed, cipher }
    }

    pub fn reveal(&self) -> Result<SecretString> {
        self.cipher.decrypt(&self.sealed)
    }
}
