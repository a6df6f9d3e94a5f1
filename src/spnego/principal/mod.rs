pub mod repository;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub use repository::{AttributeRepository, Attributes};

use crate::spnego::Error;
use crate::spnego::handler::{VerifiedIdentity, strip_domain};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub principal_attribute: Option<String>,
    #[serde(default)]
    pub return_null: bool,
    #[serde(default)]
    pub transformation: TransformationConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseConversion {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransformationConfig {
    #[serde(default)]
    pub case_conversion: CaseConversion,
    #[serde(default)]
    pub strip_domain: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

#[derive(Clone, Debug, Default)]
pub struct PrincipalNameTransformer {
    config: TransformationConfig,
}

impl PrincipalNameTransformer {
    pub fn new(config: TransformationConfig) -> Self {
        Self { config }
    }

    pub fn transform(&self, name: &str) -> String {
        let name = if self.config.strip_domain {
            strip_domain(name)
        } else {
            name
        };

        let name = match self.config.case_conversion {
            CaseConversion::None => name.to_string(),
            CaseConversion::Uppercase => name.to_uppercase(),
            CaseConversion::Lowercase => name.to_lowercase(),
        };

        format!("{}{name}{}", self.config.prefix, self.config.suffix)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedPrincipal {
    pub id: String,
    pub attributes: Attributes,
}

/// Maps a verified identity to the principal handed to the rest of the login flow.
pub struct PrincipalResolver {
    transformer: PrincipalNameTransformer,
    repository: Arc<dyn AttributeRepository>,
    principal_attribute: Option<String>,
    return_null: bool,
}

impl PrincipalResolver {
    pub fn new(config: &Config, repository: Arc<dyn AttributeRepository>) -> Self {
        Self {
            transformer: PrincipalNameTransformer::new(config.transformation.clone()),
            repository,
            principal_attribute: config.principal_attribute.clone(),
            return_null: config.return_null,
        }
    }

    #[instrument(skip(self, identity), fields(principal = identity.principal()))]
    pub async fn resolve(&self, identity: &VerifiedIdentity) -> Result<ResolvedPrincipal, Error> {
        let name = self.transformer.transform(identity.principal());

        let attributes = match self.repository.attributes(&name).await {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!("Attribute lookup for {name} failed: {e}");
                Attributes::new()
            }
        };

        if attributes.is_empty() && self.return_null {
            return Err(Error::AttributeResolutionEmpty(name));
        }

        let id = match &self.principal_attribute {
            Some(attribute) => match attributes.get(attribute).and_then(|v| v.first()) {
                Some(value) => value.clone(),
                None => {
                    debug!("Principal attribute {attribute} not found for {name}");
                    name
                }
            },
            None => name,
        };

        Ok(ResolvedPrincipal { id, attributes })
    }
}
