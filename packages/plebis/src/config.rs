use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// A voting booth server elections can be attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingServer {
    pub url: String,
    pub shared_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Secret mixed into voter ids and access tokens.
    pub secret_key_base: String,
    /// Working directory for report raw/rank files.
    pub reports_dir: PathBuf,
    /// Booth servers keyed by name (`agora`, `beta`, ...).
    pub voting_servers: HashMap<String, VotingServer>,
    pub default_voting_server: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let default_voting_server =
            env::var("VOTING_DEFAULT_SERVER").unwrap_or_else(|_| "agora".to_string());

        let mut voting_servers = HashMap::new();
        if let Ok(url) = env::var("VOTING_SERVER_URL") {
            voting_servers.insert(
                default_voting_server.clone(),
                VotingServer {
                    url,
                    shared_key: env::var("VOTING_SERVER_SHARED_KEY")
                        .context("VOTING_SERVER_SHARED_KEY must be set when VOTING_SERVER_URL is")?,
                },
            );
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            secret_key_base: env::var("SECRET_KEY_BASE").context("SECRET_KEY_BASE must be set")?,
            reports_dir: env::var("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tmp/report")),
            voting_servers,
            default_voting_server,
        })
    }

    /// Server for `key`, falling back to the default server.
    pub fn voting_server(&self, key: Option<&str>) -> Option<&VotingServer> {
        key.and_then(|k| self.voting_servers.get(k))
            .or_else(|| self.voting_servers.get(&self.default_voting_server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(servers: &[(&str, &str)]) -> Config {
        Config {
            database_url: "postgres://localhost/plebis".to_string(),
            secret_key_base: "secret".to_string(),
            reports_dir: PathBuf::from("tmp/report"),
            voting_servers: servers
                .iter()
                .map(|(name, url)| {
                    (
                        name.to_string(),
                        VotingServer {
                            url: url.to_string(),
                            shared_key: format!("{}-key", name),
                        },
                    )
                })
                .collect(),
            default_voting_server: "agora".to_string(),
        }
    }

    #[test]
    fn voting_server_prefers_named_server() {
        let config = config_with(&[("agora", "https://agora/"), ("beta", "https://beta/")]);
        assert_eq!(config.voting_server(Some("beta")).unwrap().url, "https://beta/");
    }

    #[test]
    fn voting_server_falls_back_to_default() {
        let config = config_with(&[("agora", "https://agora/")]);
        assert_eq!(config.voting_server(Some("missing")).unwrap().url, "https://agora/");
        assert_eq!(config.voting_server(None).unwrap().shared_key, "agora-key");
    }

    #[test]
    fn voting_server_is_none_without_servers() {
        assert!(config_with(&[]).voting_server(None).is_none());
    }
}
