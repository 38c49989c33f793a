use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub token_ttl: chrono::Duration,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("DEVTALK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DEVTALK_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let port: u16 = var("DEVTALK_PORT", "3000")
            .parse()
            .context("DEVTALK_PORT must be a port number")?;
        let ttl_minutes: i64 = var("DEVTALK_TOKEN_TTL_MINUTES", "30")
            .parse()
            .context("DEVTALK_TOKEN_TTL_MINUTES must be a whole number of minutes")?;
        if ttl_minutes <= 0 {
            bail!("DEVTALK_TOKEN_TTL_MINUTES must be positive");
        }

        Ok(Self {
            jwt_secret,
            db_path: var("DEVTALK_DB_PATH", "devtalk.db").into(),
            host: var("DEVTALK_HOST", "0.0.0.0"),
            port,
            uploads_dir: var("DEVTALK_UPLOADS_DIR", "./uploads").into(),
            token_ttl: chrono::Duration::minutes(ttl_minutes),
            admin_username: var("DEVTALK_ADMIN_USERNAME", "Admin"),
            admin_password: get("DEVTALK_ADMIN_PASSWORD").filter(|p| !p.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_once_a_secret_is_set() {
        let config = load(&[("DEVTALK_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("devtalk.db"));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.uploads_dir, PathBuf::from("./uploads"));
        assert_eq!(config.token_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.admin_username, "Admin");
        assert!(config.admin_password.is_none());
    }

    #[test]
    fn missing_or_placeholder_secrets_abort() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DEVTALK_JWT_SECRET", "")]).is_err());
        assert!(load(&[("DEVTALK_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DEVTALK_JWT_SECRET", "s3cret"),
            ("DEVTALK_PORT", "8080"),
            ("DEVTALK_TOKEN_TTL_MINUTES", "5"),
            ("DEVTALK_ADMIN_PASSWORD", "hunter22"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl, chrono::Duration::minutes(5));
        assert_eq!(config.admin_password.as_deref(), Some("hunter22"));

        assert!(load(&[("DEVTALK_JWT_SECRET", "s3cret"), ("DEVTALK_PORT", "http")]).is_err());
        assert!(load(&[("DEVTALK_JWT_SECRET", "s3cret"), ("DEVTALK_TOKEN_TTL_MINUTES", "0")]).is_err());
    }
}
