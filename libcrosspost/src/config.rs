//! Configuration management for Crosspost
//!
//! Settings come from a TOML file (see [`resolve_config_path`]) with every
//! section optional, then environment variables override individual keys.
//! OAuth client credentials are usually supplied only through the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::types::PlatformKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
    pub publishing: PublishingConfig,
    pub endpoints: Endpoints,
    pub linkedin: Option<OAuthClientConfig>,
    pub facebook: Option<OAuthClientConfig>,
    pub instagram: Option<OAuthClientConfig>,
    pub twitter: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosspost/crosspost.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Public base URL of this service; relative image paths resolve against it
    pub backend_url: String,
    pub frontend_url: String,
    /// Frontend route the OAuth callback redirects to
    pub frontend_return_path: String,
    pub uploads_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            backend_url: "http://localhost:5000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            frontend_return_path: "/hr/settings/company".to_string(),
            uploads_dir: "~/.local/share/crosspost/uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// age X25519 identity (`AGE-SECRET-KEY-1...`) used to seal tokens
    pub token_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Upper bound on concurrently running background publish tasks
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Wait between creating an Instagram container and publishing it
    pub instagram_processing_delay_ms: u64,
    pub duplicate_window_secs: u64,
    pub max_images: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            instagram_processing_delay_ms: 3000,
            duplicate_window_secs: 60,
            max_images: 10,
        }
    }
}

/// Upstream base URLs, overridable for staging and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub linkedin_api: String,
    pub graph_api: String,
    pub twitter_api: String,
    pub linkedin_authorize_url: String,
    pub linkedin_token_url: String,
    pub facebook_authorize_url: String,
    pub twitter_authorize_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            linkedin_api: "https://api.linkedin.com".to_string(),
            graph_api: "https://graph.facebook.com/v19.0".to_string(),
            twitter_api: "https://api.twitter.com".to_string(),
            linkedin_authorize_url: "https://www.linkedin.com/oauth/v2/authorization".to_string(),
            linkedin_token_url: "https://www.linkedin.com/oauth/v2/accessToken".to_string(),
            facebook_authorize_url: "https://www.facebook.com/v19.0/dialog/oauth".to_string(),
            twitter_authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
        }
    }
}

impl Endpoints {
    /// Every upstream pointed at one base URL (local stand-in servers)
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            linkedin_api: base.to_string(),
            graph_api: base.to_string(),
            twitter_api: base.to_string(),
            linkedin_authorize_url: format!("{}/oauth/v2/authorization", base),
            linkedin_token_url: format!("{}/oauth/v2/accessToken", base),
            facebook_authorize_url: format!("{}/dialog/oauth", base),
            twitter_authorize_url: format!("{}/i/oauth2/authorize", base),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

impl Config {
    /// Load configuration from the default location, then apply env overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = env_value("CROSSPOST_DATABASE") {
            self.database.path = path;
        }
        if let Some(bind) = env_value("CROSSPOST_BIND") {
            self.server.bind = bind;
        }
        if let Some(url) = env_value("BACKEND_URL") {
            self.server.backend_url = url;
        }
        if let Some(url) = env_value("FRONTEND_URL") {
            self.server.frontend_url = url;
        }
        if let Some(key) = env_value("CROSSPOST_TOKEN_KEY") {
            self.security.token_key = Some(key);
        }

        overlay_client(&mut self.linkedin, "LINKEDIN_CLIENT_ID", "LINKEDIN_CLIENT_SECRET", "LINKEDIN_REDIRECT_URI");
        overlay_client(&mut self.facebook, "FACEBOOK_APP_ID", "FACEBOOK_APP_SECRET", "FACEBOOK_REDIRECT_URI");
        overlay_client(&mut self.twitter, "TWITTER_CLIENT_ID", "TWITTER_CLIENT_SECRET", "TWITTER_REDIRECT_URI");
        if let Some(uri) = env_value("INSTAGRAM_REDIRECT_URI") {
            self.instagram.get_or_insert_with(Default::default).redirect_uri = Some(uri);
        }
    }

    /// Resolved OAuth client for a platform, with its redirect URI filled in.
    ///
    /// Instagram authorizes through the Facebook app, so missing Instagram
    /// credentials fall back to the Facebook ones.
    pub fn oauth_client(&self, platform: PlatformKind) -> Option<OAuthClientConfig> {
        let configured = match platform {
            PlatformKind::Linkedin => self.linkedin.clone(),
            PlatformKind::Facebook => self.facebook.clone(),
            PlatformKind::Twitter => self.twitter.clone(),
            PlatformKind::Instagram => {
                let own = self.instagram.clone().unwrap_or_default();
                let app = self.facebook.clone().unwrap_or_default();
                Some(OAuthClientConfig {
                    client_id: non_empty(own.client_id).unwrap_or(app.client_id),
                    client_secret: non_empty(own.client_secret).unwrap_or(app.client_secret),
                    redirect_uri: own.redirect_uri,
                })
            }
        }?;

        if configured.client_id.is_empty() || configured.client_secret.is_empty() {
            return None;
        }

        let redirect_uri = configured.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/oauth/{}/callback",
                self.server.backend_url.trim_end_matches('/'),
                platform
            )
        });

        Some(OAuthClientConfig {
            redirect_uri: Some(redirect_uri),
            ..configured
        })
    }

    pub fn expanded_database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }

    pub fn expanded_uploads_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.server.uploads_dir).to_string())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn overlay_client(slot: &mut Option<OAuthClientConfig>, id: &str, secret: &str, redirect: &str) {
    let id = env_value(id);
    let secret = env_value(secret);
    let redirect = env_value(redirect);
    if id.is_none() && secret.is_none() && redirect.is_none() {
        return;
    }

    let client = slot.get_or_insert_with(Default::default);
    if let Some(id) = id {
        client.client_id = id;
    }
    if let Some(secret) = secret {
        client.client_secret = secret;
    }
    if redirect.is_some() {
        client.redirect_uri = redirect;
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.publishing.duplicate_window_secs, 60);
        assert_eq!(config.endpoints.graph_api, "https://graph.facebook.com/v19.0");
        assert!(config.linkedin.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/crosspost-test.db"

[server]
backend_url = "https://api.acme.example"

[scheduler]
interval_secs = 30

[linkedin]
client_id = "li-id"
client_secret = "li-secret"
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.database.path, "/tmp/crosspost-test.db");
        assert_eq!(config.scheduler.interval_secs, 30);
        assert_eq!(config.server.frontend_return_path, "/hr/settings/company");

        let client = config.oauth_client(PlatformKind::Linkedin).unwrap();
        assert_eq!(
            client.redirect_uri.as_deref(),
            Some("https://api.acme.example/oauth/linkedin/callback")
        );
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler\ninterval_secs = ").unwrap();
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_instagram_reuses_facebook_app() {
        let config = Config {
            facebook: Some(OAuthClientConfig {
                client_id: "fb-app".into(),
                client_secret: "fb-secret".into(),
                redirect_uri: None,
            }),
            ..Default::default()
        };

        let client = config.oauth_client(PlatformKind::Instagram).unwrap();
        assert_eq!(client.client_id, "fb-app");
        assert!(client
            .redirect_uri
            .unwrap()
            .ends_with("/oauth/instagram/callback"));
        assert!(config.oauth_client(PlatformKind::Twitter).is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("TWITTER_CLIENT_ID", "tw-id");
        std::env::set_var("TWITTER_CLIENT_SECRET", "tw-secret");
        std::env::set_var("FRONTEND_URL", "https://hr.acme.example");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("TWITTER_CLIENT_ID");
        std::env::remove_var("TWITTER_CLIENT_SECRET");
        std::env::remove_var("FRONTEND_URL");

        assert_eq!(config.server.frontend_url, "https://hr.acme.example");
        let client = config.oauth_client(PlatformKind::Twitter).unwrap();
        assert_eq!(client.client_id, "tw-id");
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("CROSSPOST_CONFIG", "/etc/crosspost/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("CROSSPOST_CONFIG");
        assert_eq!(path, PathBuf::from("/etc/crosspost/config.toml"));
    }
}
