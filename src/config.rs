use crate::auth::config::{JwtConfig, OAuthConfig, OidcConfig, PasskeyConfig};
use crate::cache::config::CacheConfig;
use crate::database::config::DatabaseConfig;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "FEDAUTH";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub passkey: PasskeyConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Outbound calls to identity providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
        }
    }
}

impl HttpConfig {
    /// Provider calls never hang a request for long, nor fail on a slow handshake.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.clamp(5, 10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(config::Config::try_from(&Config::default())?);

        if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(env_source());
        builder.build()?.try_deserialize()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(config::Config::try_from(&Config::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder = builder.add_source(env_source());
        builder.build()?.try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::ProviderKind;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.jwt.expires, 86400);
        assert_eq!(config.passkey.session_ttl, 300);
        assert_eq!(config.oidc.jwks_cache_ttl, 300);
        assert_eq!(config.oauth.failure_redirect, "/");
        assert_eq!(config.cache.backend, "memory");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_http_timeout_is_clamped() {
        let short = HttpConfig { timeout_seconds: 1 };
        let long = HttpConfig {
            timeout_seconds: 60,
        };
        assert_eq!(short.timeout(), Duration::from_secs(5));
        assert_eq!(long.timeout(), Duration::from_secs(10));
        assert_eq!(HttpConfig::default().timeout(), Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_config_load_from_yaml_file() {
        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 4000
jwt:
  secret: "file-secret"
  issuer: "blog"
oauth:
  failure_redirect: "/login?error=oauth"
  providers:
    github:
      client_id: "gh-id"
      client_secret: "gh-secret"
      redirect_uri: "https://blog.example/auth/oauth/github/callback"
    corp:
      kind: custom
      is_oidc: true
      client_id: "corp-id"
      client_secret: "corp-secret"
      issuer: "https://sso.corp.example"
      jwks_url: "https://sso.corp.example/jwks"
passkey:
  rp_name: "My Blog"
logging:
  level: "warn"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = Config::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.jwt.secret, "file-secret");
        assert_eq!(config.jwt.issuer, "blog");
        assert_eq!(config.jwt.expires, 86400);
        assert_eq!(config.oauth.failure_redirect, "/login?error=oauth");
        assert_eq!(config.oauth.providers.len(), 2);
        assert_eq!(config.oauth.providers["github"].client_id, "gh-id");
        assert!(config.oauth.providers["github"].enabled);
        assert_eq!(
            config.oauth.providers["corp"].kind,
            Some(ProviderKind::Custom)
        );
        assert!(config.oauth.providers["corp"].is_oidc);
        assert_eq!(config.passkey.rp_name, "My Blog");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let yaml_content = r#"
jwt:
  secret: "file-secret"
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        std::env::set_var("FEDAUTH_JWT__SECRET", "env-secret");
        let config = Config::load_from_file(temp_file.path());
        std::env::remove_var("FEDAUTH_JWT__SECRET");

        assert_eq!(config.unwrap().jwt.secret, "env-secret");
    }

    #[test]
    #[serial]
    fn test_config_load_nonexistent_file() {
        let config = Config::load_from_file("nonexistent.yaml").unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
    }
}
