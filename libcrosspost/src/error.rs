//! Error types for Crosspost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate request: {0}")]
    Duplicate(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl CrosspostError {
    /// Process exit code for the binaries: 2 for setup problems the
    /// operator must fix (config file, token key), 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::Config(_) => 2,
            CrosspostError::Credential(CredentialError::InvalidKey(_)) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stored value could not be decoded: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not supported: {0}")]
    NotImplemented(String),
}

impl PlatformError {
    /// True when the upstream rejected the stored credential itself.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, PlatformError::Authentication(_))
    }

    /// The call never got an answer about the credential: unreachable,
    /// timed out, throttled or a 5xx
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_) | PlatformError::RateLimit(_))
    }
}

const EXPIRED_CREDENTIAL_MARKERS: [&str; 4] =
    ["expired", "unauthorized", "token", "validating access token"];

/// Heuristic for upstream error text that signals a dead credential.
///
/// Used alongside [`PlatformError::is_credential_failure`] for platforms
/// that report auth problems with a generic status.
pub fn looks_like_expired_credential(message: &str) -> bool {
    let message = message.to_lowercase();
    EXPIRED_CREDENTIAL_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("Invalid state parameter")]
    InvalidState,

    #[error("State parameter expired")]
    ExpiredState,

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("OAuth client for {0} is not configured")]
    NotConfigured(String),

    #[error("Failed to exchange code for token: {0}")]
    TokenExchange(String),

    #[error("Failed to get user profile: {0}")]
    Profile(String),

    #[error("{0}")]
    NoPages(String),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid token encryption key: {0}")]
    InvalidKey(String),

    #[error("Failed to encrypt token: {0}")]
    Encrypt(String),

    #[error("Failed to decrypt token: {0}")]
    Decrypt(String),
}
