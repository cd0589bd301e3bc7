use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use content_loader::auth::DEFAULT_IDENTITY_URL;
use content_loader::loader::DEFAULT_MAX_PAGES;
use content_loader::{AuthConfigError, ContentTypeDefinition, Credentials, default_definitions};
use serde::{Deserialize, Serialize};

/// Application configuration, after every layer has been applied.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub identity_url: String,
    pub identity_username: Option<String>,
    pub identity_password: Option<String>,
    pub identity_apikey: Option<String>,
    pub admin_url: Option<String>,
    pub debug: bool,
    pub timeout_secs: u64,
    pub max_pages: usize,
    /// Replaces the built-in registry when non-empty.
    pub definitions: Vec<ContentTypeDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.into(),
            identity_username: None,
            identity_password: None,
            identity_apikey: None,
            admin_url: None,
            debug: false,
            timeout_secs: 60,
            max_pages: DEFAULT_MAX_PAGES,
            definitions: Vec::new(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("identity_url", &self.identity_url)
            .field("identity_username", &self.identity_username)
            .field("identity_password", &redacted(&self.identity_password))
            .field("identity_apikey", &redacted(&self.identity_apikey))
            .field("admin_url", &self.admin_url)
            .field("debug", &self.debug)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_pages", &self.max_pages)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

/// Values taken from command-line flags or their environment variables.
/// `None` leaves the file/default value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub identity_url: Option<String>,
    pub identity_username: Option<String>,
    pub identity_password: Option<String>,
    pub identity_apikey: Option<String>,
    pub admin_url: Option<String>,
    pub debug: bool,
}

impl Config {
    /// Apply flag/env values on top of this config.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.identity_url {
            self.identity_url = url;
        }
        if overrides.identity_username.is_some() {
            self.identity_username = overrides.identity_username;
        }
        if overrides.identity_password.is_some() {
            self.identity_password = overrides.identity_password;
        }
        if overrides.identity_apikey.is_some() {
            self.identity_apikey = overrides.identity_apikey;
        }
        if overrides.admin_url.is_some() {
            self.admin_url = overrides.admin_url;
        }
        self.debug |= overrides.debug;
    }

    pub fn admin_url(&self) -> Result<&str> {
        self.admin_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .context("admin URL is required (--admin-url or ADMIN_URL)")
    }

    /// Identity credentials, or `None` when authentication is not configured.
    pub fn credentials(&self) -> Result<Option<Credentials>, AuthConfigError> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        let username = present(&self.identity_username);
        let password = present(&self.identity_password);
        let api_key = present(&self.identity_apikey);

        match username {
            None if password.is_none() && api_key.is_none() => Ok(None),
            None => Err(AuthConfigError::MissingUsername),
            Some(username) => Credentials::from_parts(username, password, api_key).map(Some),
        }
    }

    /// Per-exchange timeout. Zero would fail every request, so it is refused.
    pub fn timeout(&self) -> Result<Duration> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        Ok(Duration::from_secs(self.timeout_secs))
    }

    pub fn definitions(&self) -> Vec<ContentTypeDefinition> {
        if self.definitions.is_empty() {
            default_definitions()
        } else {
            self.definitions.clone()
        }
    }
}

/// Config file path: `~/.config/data-loader/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("data-loader").join("config.toml"))
}

/// Load config from `explicit` if given, else from the default location when
/// a file exists there, else defaults.
///
/// An explicitly named file must exist and parse; a broken file at the
/// default location is also an error rather than silently ignored.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(Config::default()),
        },
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config = toml::from_str::<Config>(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;

    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.identity_url, "https://identity.api.rackspacecloud.com");
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(60));
        assert_eq!(config.max_pages, 1000);
        assert!(!config.debug);
        assert_eq!(config.definitions(), default_definitions());
    }

    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let toml_str = r#"
admin_url = "http://localhost:8888"
identity_username = "loader"
identity_apikey = "abc"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.admin_url().unwrap(), "http://localhost:8888");
        assert_eq!(config.identity_url, DEFAULT_IDENTITY_URL);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config: Config = toml::from_str("timeout_secs = 0").unwrap();
        let err = config.timeout().unwrap_err();
        assert!(err.to_string().contains("timeout_secs"), "{err}");
    }

    #[test]
    fn blank_credentials_count_as_unset() {
        let config = Config {
            identity_username: Some(String::new()),
            identity_apikey: Some(String::new()),
            ..Config::default()
        };
        assert!(config.credentials().unwrap().is_none());
    }

    #[test]
    fn parse_definitions_from_toml() {
        let toml_str = r#"
[[definitions]]
name = "custom"
api_path = "/api/custom"
unique_field_paths = ["$.id", "$.labels['os']"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.definitions(),
            vec![ContentTypeDefinition::new(
                "custom",
                "/api/custom",
                ["$.id", "$.labels['os']"]
            )]
        );
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config: Config = toml::from_str(
            r#"
admin_url = "http://from-file"
identity_url = "http://identity-from-file"
"#,
        )
        .unwrap();

        config.apply(Overrides {
            admin_url: Some("http://from-flag".into()),
            debug: true,
            ..Default::default()
        });

        assert_eq!(config.admin_url().unwrap(), "http://from-flag");
        assert_eq!(config.identity_url, "http://identity-from-file");
        assert!(config.debug);
    }

    #[test]
    fn debug_from_file_survives_absent_flag() {
        let mut config = Config {
            debug: true,
            ..Default::default()
        };
        config.apply(Overrides::default());
        assert!(config.debug);
    }

    #[test]
    fn missing_admin_url_is_an_error() {
        assert!(Config::default().admin_url().is_err());
        let config = Config {
            admin_url: Some(String::new()),
            ..Default::default()
        };
        assert!(config.admin_url().is_err());
    }

    #[test]
    fn no_identity_settings_disable_auth() {
        assert!(Config::default().credentials().unwrap().is_none());
    }

    #[test]
    fn secret_without_username_is_an_error() {
        let config = Config {
            identity_password: Some("secret".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(AuthConfigError::MissingUsername)
        ));
    }

    #[test]
    fn username_without_secret_is_an_error() {
        let config = Config {
            identity_username: Some("loader".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(AuthConfigError::MissingSecret)
        ));
    }

    #[test]
    fn both_secrets_is_an_error() {
        let config = Config {
            identity_username: Some("loader".into()),
            identity_password: Some("secret".into()),
            identity_apikey: Some("key".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials(),
            Err(AuthConfigError::ConflictingSecrets)
        ));
    }

    #[test]
    fn api_key_credentials() {
        let config = Config {
            identity_username: Some("loader".into()),
            identity_apikey: Some("key".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.credentials().unwrap(),
            Some(Credentials::ApiKey { .. })
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = Config {
            identity_username: Some("loader".into()),
            identity_password: Some("hunter2".into()),
            ..Default::default()
        };
        let shown = format!("{config:?}");
        assert!(shown.contains("loader"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "admin_url = \"http://admin\"\nmax_pages = 5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.admin_url().unwrap(), "http://admin");
        assert_eq!(config.max_pages, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_pages = \"many\"").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
