//! Service configuration sourced from environment variables with an optional
//! YAML override file.
//!
//! # Notes
//! Variable names for the Dex and admin-login settings keep the names existing
//! deployments already set (`DEX_*`, `ACD_*`, `CExpirationTime`, ...).
use anyhow::{Context, Result, bail};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Dex / session settings.
#[derive(Debug, Clone)]
pub struct DexConfig {
    /// Redirect URL registered with the identity provider.
    pub redirect_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Base URL of the Dex server the `/api/dex` proxy forwards to.
    pub url: String,
    pub jwt_key: String,
    pub cookie_store_key: String,
    /// Cookie lifetime in seconds.
    pub cookie_expiration_secs: i64,
    /// Issued JWT lifetime in seconds.
    pub jwt_expiration_secs: i64,
}

/// Local admin login settings.
#[derive(Debug, Clone)]
pub struct AdminLoginConfig {
    pub username: String,
    pub password: Option<String>,
    pub config_map: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    pub cache_enabled: bool,
    pub cache_expiration_secs: u64,
    pub max_batch_size: usize,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_expiration_secs: 86_400,
            max_batch_size: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub dex: DexConfig,
    pub admin: AdminLoginConfig,
    pub enforcer: EnforcerConfig,
    pub webhook_token: Option<String>,
    pub oidc_allowed_algorithms: Vec<Algorithm>,
}

#[derive(Debug, Deserialize)]
struct AuthConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres: Option<PostgresConfig>,
    webhook_token: Option<String>,
    enforcer_cache: Option<bool>,
    oidc_allowed_algorithms: Option<Vec<String>>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("parse {name}")),
        None => Ok(default),
    }
}

/// Parse a list of JOSE algorithm names; unknown names are rejected.
pub fn parse_algorithms<S: AsRef<str>>(names: &[S]) -> Result<Vec<Algorithm>> {
    let mut algorithms = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        let alg = Algorithm::from_str(name).with_context(|| format!("unknown algorithm {name}"))?;
        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }
    if algorithms.is_empty() {
        bail!("no OIDC algorithms configured");
    }
    Ok(algorithms)
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("AUTH_BIND", "0.0.0.0:8080")
            .parse()
            .with_context(|| "parse AUTH_BIND")?;
        let metrics_bind = env_or("AUTH_METRICS_BIND", "0.0.0.0:9090")
            .parse()
            .with_context(|| "parse AUTH_METRICS_BIND")?;
        let storage: StorageBackend = env_or("AUTH_STORAGE", "memory").parse()?;
        let postgres = match env_opt("AUTH_POSTGRES_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("AUTH_POSTGRES_MAX_CONNECTIONS", 10)?,
                connect_timeout_ms: env_parse("AUTH_POSTGRES_CONNECT_TIMEOUT_MS", 5000)?,
                acquire_timeout_ms: env_parse("AUTH_POSTGRES_ACQUIRE_TIMEOUT_MS", 5000)?,
            }),
            None => None,
        };
        let dex = DexConfig {
            redirect_url: env_or("DEX_RURL", "http://127.0.0.1:8080/callback"),
            client_id: env_or("DEX_CID", "example-app"),
            client_secret: env_or("DEX_SECRET", ""),
            url: env_or("DEX_URL", ""),
            jwt_key: env_or("DEX_JWTKEY", ""),
            cookie_store_key: env_or("DEX_CSTOREKEY", ""),
            cookie_expiration_secs: env_parse("CExpirationTime", 600)?,
            jwt_expiration_secs: env_parse("JwtExpirationTime", 120)?,
        };
        let admin = AdminLoginConfig {
            username: env_or("ACD_USERNAME", "admin"),
            password: env_opt("ACD_PASSWORD"),
            config_map: env_or("ACD_CM", "argocd-cm"),
            namespace: env_or("ACD_NAMESPACE", "devtroncd"),
        };
        let enforcer = EnforcerConfig {
            cache_enabled: env_parse("ENFORCER_CACHE", false)?,
            cache_expiration_secs: env_parse("ENFORCER_CACHE_EXPIRATION_IN_SEC", 86_400)?,
            max_batch_size: env_parse("ENFORCER_MAX_BATCH_SIZE", 1)?,
        };
        let algorithms: Vec<String> = env_or("OIDC_ALLOWED_ALGORITHMS", "RS256,ES256")
            .split(',')
            .map(str::to_string)
            .collect();
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            dex,
            admin,
            enforcer,
            webhook_token: env_opt("WEBHOOK_TOKEN"),
            oidc_allowed_algorithms: parse_algorithms(&algorithms)?,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("AUTH_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read AUTH_CONFIG: {path}"))?;
            let override_cfg: AuthConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse auth config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: AuthConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value.parse()?;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.webhook_token {
            self.webhook_token = Some(value);
        }
        if let Some(value) = override_cfg.enforcer_cache {
            self.enforcer.cache_enabled = value;
        }
        if let Some(value) = override_cfg.oidc_allowed_algorithms {
            self.oidc_allowed_algorithms = parse_algorithms(&value)?;
        }
        Ok(())
    }

    /// Configuration for in-process tests: memory storage, loopback binds,
    /// no external services.
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            metrics_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage: StorageBackend::Memory,
            postgres: None,
            dex: DexConfig {
                redirect_url: "http://127.0.0.1:8080/callback".to_string(),
                client_id: "example-app".to_string(),
                client_secret: String::new(),
                url: String::new(),
                jwt_key: String::new(),
                cookie_store_key: String::new(),
                cookie_expiration_secs: 600,
                jwt_expiration_secs: 120,
            },
            admin: AdminLoginConfig {
                username: "admin".to_string(),
                password: Some("password".to_string()),
                config_map: "argocd-cm".to_string(),
                namespace: "devtroncd".to_string(),
            },
            enforcer: EnforcerConfig {
                cache_enabled: false,
                cache_expiration_secs: 86_400,
                max_batch_size: 1,
            },
            webhook_token: None,
            oidc_allowed_algorithms: vec![Algorithm::RS256, Algorithm::ES256],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "AUTH_BIND",
        "AUTH_METRICS_BIND",
        "AUTH_STORAGE",
        "AUTH_POSTGRES_URL",
        "AUTH_CONFIG",
        "CExpirationTime",
        "ENFORCER_CACHE",
        "OIDC_ALLOWED_ALGORITHMS",
        "WEBHOOK_TOKEN",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment run serially.
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn defaults_without_env() {
        clear_env();
        let config = AuthConfig::from_env().expect("config");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.metrics_bind.port(), 9090);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.dex.cookie_expiration_secs, 600);
        assert_eq!(config.dex.client_id, "example-app");
        assert_eq!(config.admin.username, "admin");
        assert!(!config.enforcer.cache_enabled);
        assert_eq!(
            config.oidc_allowed_algorithms,
            vec![Algorithm::RS256, Algorithm::ES256]
        );
    }

    #[test]
    #[serial]
    fn env_overrides_are_parsed() {
        clear_env();
        unsafe {
            std::env::set_var("AUTH_STORAGE", "postgres");
            std::env::set_var("AUTH_POSTGRES_URL", "postgres://u:p@localhost/db");
            std::env::set_var("CExpirationTime", "30");
            std::env::set_var("ENFORCER_CACHE", "true");
            std::env::set_var("WEBHOOK_TOKEN", "hook");
        }
        let config = AuthConfig::from_env().expect("config");
        clear_env();
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, 10);
        assert_eq!(config.dex.cookie_expiration_secs, 30);
        assert!(config.enforcer.cache_enabled);
        assert_eq!(config.webhook_token.as_deref(), Some("hook"));
    }

    #[test]
    #[serial]
    fn invalid_bind_is_an_error() {
        clear_env();
        unsafe { std::env::set_var("AUTH_BIND", "not-an-addr") };
        let err = AuthConfig::from_env().expect_err("invalid bind");
        clear_env();
        assert!(err.to_string().contains("AUTH_BIND"));
    }

    #[test]
    #[serial]
    fn yaml_override_replaces_fields() {
        clear_env();
        let dir = std::env::temp_dir().join(format!("auth-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "bind_addr: 127.0.0.1:18080\nenforcer_cache: true\noidc_allowed_algorithms: [ES256]\n",
        )
        .expect("write");
        unsafe { std::env::set_var("AUTH_CONFIG", &path) };
        let config = AuthConfig::from_env_or_yaml().expect("config");
        clear_env();
        assert_eq!(config.bind_addr.port(), 18080);
        assert!(config.enforcer.cache_enabled);
        assert_eq!(config.oidc_allowed_algorithms, vec![Algorithm::ES256]);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(parse_algorithms(&["HS999"]).is_err());
        assert!(parse_algorithms::<&str>(&[]).is_err());
    }

    #[test]
    fn unknown_storage_is_rejected() {
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }
}
