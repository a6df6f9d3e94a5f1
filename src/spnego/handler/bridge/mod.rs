
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use hyper::Uri;
use reqwest::header::AUTHORIZATION;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AcceptedContext, KerberosValidator, Mechanism, NtlmValidator, ServerIdentity};
use crate::command::server::Error as ServerError;
use crate::secret::Secret;
use crate::spnego::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub url: String,
    pub bearer_token: Option<Secret<String>>,
    #[serde(default = "Config::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Config {
    fn default_timeout_ms() -> u64 {
        10_000
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if let Err(e) = Uri::try_from(&self.url) {
            let msg = format!("Invalid validation bridge URL: {e}");
            return Err(ServerError::Initialization(msg));
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ValidationRequest<'a> {
    mechanism: Mechanism,
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_principal: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realm: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kdc: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain_controller: Option<&'a str>,
}

impl<'a> ValidationRequest<'a> {
    fn new(mechanism: Mechanism, token: &[u8]) -> Self {
        Self {
            mechanism,
            token: BASE64_STANDARD.encode(token),
            service_principal: None,
            realm: None,
            kdc: None,
            domain: None,
            domain_controller: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    principal: String,
    response_token: Option<String>,
}

/// HTTP sidecar performing the actual GSS-API / NTLM exchanges.
///
/// One bridge can serve both mechanisms: the request carries the mechanism, the token and
/// the server-side parameters; the answer carries the accepted principal.
pub struct ValidationBridge {
    url: String,
    bearer_token: Option<Secret<String>>,
    domain: Option<String>,
    client: Client,
}

impl ValidationBridge {
    pub fn new(config: &Config, domain: Option<String>) -> Result<Self, ServerError> {
        config.validate()?;

        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                ServerError::Initialization(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            url: config.url.clone(),
            bearer_token: config.bearer_token.clone(),
            domain,
            client,
        })
    }

    async fn submit(&self, body: &ValidationRequest<'_>) -> Result<AcceptedContext, Error> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose()));
        }

        let response = request.send().await.map_err(|e| {
            warn!("Validation bridge request failed: {e}");
            Error::BackendUnavailable(format!("validation bridge unreachable: {e}"))
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let detail = response.text().await.unwrap_or_default();
            debug!("Validation bridge answered {status}: {detail}");
            return Err(status_to_error(status, detail));
        }

        let answer: ValidationResponse = response.json().await.map_err(|e| {
            warn!("Invalid validation bridge response: {e}");
            Error::BackendUnavailable(format!("invalid validation bridge response: {e}"))
        })?;

        let response_token = match answer.response_token {
            Some(token) => Some(BASE64_STANDARD.decode(token).map_err(|e| {
                Error::BackendUnavailable(format!("invalid response token from bridge: {e}"))
            })?),
            None => None,
        };

        Ok(AcceptedContext {
            principal: answer.principal,
            response_token,
        })
    }
}

fn status_to_error(status: StatusCode, detail: String) -> Error {
    let detail = if detail.is_empty() {
        status.to_string()
    } else {
        detail
    };

    match status {
        StatusCode::BAD_REQUEST => Error::MalformedToken(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::CredentialsRejected(detail),
        StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::NOT_IMPLEMENTED => {
            Error::MechanismNotSupported(detail)
        }
        _ => Error::BackendUnavailable(detail),
    }
}

#[async_trait]
impl KerberosValidator for ValidationBridge {
    async fn accept(
        &self,
        token: &[u8],
        server: &ServerIdentity,
    ) -> Result<AcceptedContext, Error> {
        let mut body = ValidationRequest::new(Mechanism::Kerberos, token);
        body.service_principal = server.service_principal.as_deref();
        body.realm = server.realm.as_deref();
        body.kdc = server.kdc.as_deref();

        self.submit(&body).await
    }
}

#[async_trait]
impl NtlmValidator for ValidationBridge {
    async fn accept(&self, token: &[u8], controller: &str) -> Result<AcceptedContext, Error> {
        let mut body = ValidationRequest::new(Mechanism::Ntlm, token);
        body.domain = self.domain.as_deref();
        body.domain_controller = Some(controller);

        self.submit(&body).await
    }
}
