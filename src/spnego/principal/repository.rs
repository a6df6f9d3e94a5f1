use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::spnego::Error;
use crate::spnego::directory::{self, DirectorySearch, LdapDirectory};

pub type Attributes = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Config {
    #[default]
    None,
    Static(BTreeMap<String, Attributes>),
    Ldap(LdapRepositoryConfig),
}

#[derive(Clone, Debug, Deserialize)]
pub struct LdapRepositoryConfig {
    #[serde(flatten)]
    pub directory: directory::Config,
    /// Attributes to release; empty means every attribute of the entry.
    #[serde(default)]
    pub attributes: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttributeRepository: Send + Sync {
    async fn attributes(&self, principal: &str) -> Result<Attributes, Error>;
}

pub fn from_config(config: &Config) -> Arc<dyn AttributeRepository> {
    match config {
        Config::None => Arc::new(StaticAttributeRepository::default()),
        Config::Static(table) => Arc::new(StaticAttributeRepository::new(table.clone())),
        Config::Ldap(ldap) => Arc::new(DirectoryAttributeRepository::new(
            Arc::new(LdapDirectory::new(ldap.directory.clone())),
            ldap.attributes.clone(),
        )),
    }
}

/// Attributes listed in the configuration, keyed by principal id.
#[derive(Debug, Default)]
pub struct StaticAttributeRepository {
    table: BTreeMap<String, Attributes>,
}

impl StaticAttributeRepository {
    pub fn new(table: BTreeMap<String, Attributes>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl AttributeRepository for StaticAttributeRepository {
    async fn attributes(&self, principal: &str) -> Result<Attributes, Error> {
        Ok(self.table.get(principal).cloned().unwrap_or_default())
    }
}

pub struct DirectoryAttributeRepository {
    directory: Arc<dyn DirectorySearch>,
    attributes: Vec<String>,
}

impl DirectoryAttributeRepository {
    pub fn new(directory: Arc<dyn DirectorySearch>, attributes: Vec<String>) -> Self {
        Self {
            directory,
            attributes,
        }
    }
}

#[async_trait]
impl AttributeRepository for DirectoryAttributeRepository {
    async fn attributes(&self, principal: &str) -> Result<Attributes, Error> {
        let entries = self
            .directory
            .search(principal, &self.attributes)
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        let Some(entry) = entries.into_iter().next() else {
            return Ok(Attributes::new());
        };

        Ok(entry
            .into_iter()
            .filter(|(name, values)| {
                !values.is_empty() && (self.attributes.is_empty() || self.attributes.contains(name))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::spnego::directory::MockDirectorySearch;

    #[test]
    fn test_config_variants() {
        #[derive(Deserialize)]
        struct Section {
            repository: Config,
        }

        let section: Section = toml::from_str(r#"repository = "none""#).unwrap();
        assert!(matches!(section.repository, Config::None));

        let config: Config = toml::from_str(
            r#"
            [static.alice]
            mail = ["alice@example.com"]
            memberOf = ["staff", "admins"]
            "#,
        )
        .unwrap();
        let Config::Static(table) = config else {
            panic!("expected a static repository");
        };
        assert_eq!(table["alice"]["memberOf"], vec!["staff", "admins"]);
    }

    #[tokio::test]
    async fn test_static_repository() {
        let table = BTreeMap::from([(
            "alice".to_string(),
            Attributes::from([("mail".to_string(), vec!["alice@example.com".to_string()])]),
        )]);
        let repository = StaticAttributeRepository::new(table);

        let attributes = repository.attributes("alice").await.unwrap();
        assert_eq!(attributes["mail"], vec!["alice@example.com"]);
        assert!(repository.attributes("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_repository_keeps_configured_attributes() {
        let mut directory = MockDirectorySearch::new();
        directory
            .expect_search()
            .withf(|key, _| key == "alice")
            .times(1)
            .returning(|_, _| {
                Ok(vec![HashMap::from([
                    ("mail".to_string(), vec!["alice@example.com".to_string()]),
                    ("objectClass".to_string(), vec!["person".to_string()]),
                    ("uid".to_string(), Vec::new()),
                ])])
            });

        let repository = DirectoryAttributeRepository::new(
            Arc::new(directory),
            vec!["mail".to_string(), "uid".to_string()],
        );
        let attributes = repository.attributes("alice").await.unwrap();

        assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["mail"]);
    }

    #[tokio::test]
    async fn test_directory_repository_failure() {
        let mut directory = MockDirectorySearch::new();
        directory
            .expect_search()
            .returning(|_, _| Err(directory::Error::Unavailable("refused".to_string())));

        let repository = DirectoryAttributeRepository::new(Arc::new(directory), Vec::new());
        let result = repository.attributes("alice").await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }
}
