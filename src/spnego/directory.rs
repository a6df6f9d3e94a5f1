use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, ldap_escape};
use serde::Deserialize;
use tracing::{debug, error};

use crate::secret::Secret;

/// Attributes of one directory entry.
pub type Entry = HashMap<String, Vec<String>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Unavailable(String),
    TimedOut(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Unavailable(msg) => write!(f, "Directory unavailable: {msg}"),
            Error::TimedOut(msg) => write!(f, "Directory timed out: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub url: String,
    pub base_dn: String,
    /// LDAP filter, `{key}` is replaced by the escaped lookup key.
    pub search_filter: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<Secret<String>>,
    #[serde(default = "Config::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Config {
    fn default_timeout_ms() -> u64 {
        5000
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySearch: Send + Sync {
    /// Entries matching the configured filter for `key`, restricted to `attributes`.
    async fn search(&self, key: &str, attributes: &[String]) -> Result<Vec<Entry>, Error>;
}

pub struct LdapDirectory {
    config: Config,
}

pub fn build_filter(template: &str, key: &str) -> String {
    template.replace("{key}", &ldap_escape(key))
}

impl LdapDirectory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn run_search(&self, filter: &str, attributes: &[String]) -> Result<Vec<Entry>, Error> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_millis(self.config.timeout_ms));

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(|e| Error::Unavailable(format!("{}: {e}", self.config.url)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                error!("LDAP connection error: {e}");
            }
        });

        if let Some(bind_dn) = &self.config.bind_dn {
            let password = self
                .config
                .bind_password
                .as_ref()
                .map(|p| p.expose().as_str())
                .unwrap_or_default();

            ldap.simple_bind(bind_dn, password)
                .await
                .and_then(|result| result.success())
                .map_err(|e| Error::Unavailable(format!("bind as {bind_dn} failed: {e}")))?;
        }

        let (entries, _) = ldap
            .search(&self.config.base_dn, Scope::Subtree, filter, attributes)
            .await
            .and_then(|result| result.success())
            .map_err(|e| Error::Unavailable(format!("search failed: {e}")))?;

        let _ = ldap.unbind().await;

        Ok(entries
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).attrs)
            .collect())
    }
}

#[async_trait]
impl DirectorySearch for LdapDirectory {
    async fn search(&self, key: &str, attributes: &[String]) -> Result<Vec<Entry>, Error> {
        let filter = build_filter(&self.config.search_filter, key);
        debug!("LDAP search under {} with {filter}", self.config.base_dn);

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, self.run_search(&filter, attributes)).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimedOut(format!("no answer within {timeout:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_escapes_key() {
        assert_eq!(
            build_filter("(&(objectClass=computer)(dNSHostName={key}))", "ws1.example.com"),
            "(&(objectClass=computer)(dNSHostName=ws1.example.com))"
        );
        assert_eq!(
            build_filter("(cn={key})", "a*)(uid=*"),
            "(cn=a\\2a\\29\\28uid=\\2a)"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str(
            r#"
            url = "ldap://ldap.example.com"
            base_dn = "dc=example,dc=com"
            search_filter = "(cn={key})"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout_ms, 5000);
        assert!(config.bind_dn.is_none());
        assert!(config.bind_password.is_none());
    }

    #[tokio::test]
    async fn test_search_unreachable_directory() {
        let directory = LdapDirectory::new(Config {
            url: "ldap://127.0.0.1:1".to_string(),
            base_dn: "dc=example,dc=com".to_string(),
            search_filter: "(cn={key})".to_string(),
            bind_dn: None,
            bind_password: None,
            timeout_ms: 2000,
        });

        let result = directory.search("alice", &[]).await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }
}
