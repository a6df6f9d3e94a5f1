use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, warn};

use super::{AcceptedContext, Mechanism, VerifiedIdentity, principal_name};
use crate::metrics_provider::NTLM_FAILOVERS;
use crate::spnego::{Error, NegotiationToken};

/// NTLM pass-through authentication against a domain controller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NtlmValidator: Send + Sync {
    /// Returns the `DOMAIN\user` principal accepted by `controller`.
    async fn accept(&self, token: &[u8], controller: &str) -> Result<AcceptedContext, Error>;
}

pub struct NtlmAuthenticationHandler {
    validator: Arc<dyn NtlmValidator>,
    candidates: Vec<String>,
    include_pattern: Option<Regex>,
    timeout: Duration,
    principal_with_domain_name: bool,
}

impl NtlmAuthenticationHandler {
    /// Without `load_balance`, only the first domain controller is ever contacted.
    pub fn new(
        validator: Arc<dyn NtlmValidator>,
        mut domain_controllers: Vec<String>,
        load_balance: bool,
        include_pattern: Option<Regex>,
        timeout: Duration,
        principal_with_domain_name: bool,
    ) -> Self {
        if !load_balance {
            domain_controllers.truncate(1);
        }

        Self {
            validator,
            candidates: domain_controllers,
            include_pattern,
            timeout,
            principal_with_domain_name,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &NegotiationToken) -> Result<VerifiedIdentity, Error> {
        let context = self.accept_with_failover(token.as_bytes()).await?;

        if context.principal.trim().is_empty() {
            let msg = "domain controller accepted the token without a principal".to_string();
            return Err(Error::CredentialsRejected(msg));
        }

        if let Some(pattern) = &self.include_pattern {
            if !pattern.is_match(&context.principal) {
                debug!("NTLM principal {} rejected by include pattern", context.principal);
                let msg = format!("{} is not an allowed NTLM principal", context.principal);
                return Err(Error::CredentialsRejected(msg));
            }
        }

        let principal = principal_name(&context.principal, self.principal_with_domain_name);
        Ok(VerifiedIdentity::verified(
            principal,
            Mechanism::Ntlm,
            context.response_token,
        ))
    }

    async fn accept_with_failover(&self, token: &[u8]) -> Result<AcceptedContext, Error> {
        let mut last_error = None;

        for controller in &self.candidates {
            let result =
                tokio::time::timeout(self.timeout, self.validator.accept(token, controller)).await;

            let error = match result {
                Ok(Ok(context)) => {
                    debug!("NTLM validation succeeded at {controller}");
                    return Ok(context);
                }
                Ok(Err(error)) if !error.is_backend_unavailable() => return Err(error),
                Ok(Err(error)) => error,
                Err(_) => {
                    let msg = format!("{controller} did not answer within {:?}", self.timeout);
                    Error::BackendUnavailable(msg)
                }
            };

            warn!("Domain controller {controller} unavailable: {error}");
            NTLM_FAILOVERS.with_label_values(&[controller.as_str()]).inc();
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            Error::BackendUnavailable("no domain controller configured".to_string())
        }))
    }
}
