pub mod bridge;
#[cfg(feature = "gssapi")]
pub mod gssapi;
pub mod ntlm;
pub mod spnego;

use serde::Serialize;
use tracing::{debug, instrument};

pub use ntlm::{NtlmAuthenticationHandler, NtlmValidator};
pub use spnego::{KerberosValidator, ServerIdentity, SpnegoAuthenticationHandler};

use crate::spnego::{Error, NegotiationToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    Kerberos,
    Ntlm,
}

/// What a validation backend hands back once it accepted a token.
///
/// Validation is single-leg: `response_token` is only the final mutual-authentication
/// token. Continuation tokens of multi-leg exchanges are never relayed to the client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptedContext {
    pub principal: String,
    pub response_token: Option<Vec<u8>>,
}

/// Remote principal proven by a successful token validation.
///
/// Only the handlers in this module can build one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    principal: String,
    mechanism: Mechanism,
    response_token: Option<Vec<u8>>,
}

impl VerifiedIdentity {
    fn verified(principal: String, mechanism: Mechanism, response_token: Option<Vec<u8>>) -> Self {
        Self {
            principal,
            mechanism,
            response_token,
        }
    }

    #[cfg(test)]
    pub fn for_tests(principal: &str, mechanism: Mechanism) -> Self {
        Self::verified(principal.to_string(), mechanism, None)
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn response_token(&self) -> Option<&[u8]> {
        self.response_token.as_deref()
    }
}

/// Removes the realm (`user@REALM`) or the domain (`DOMAIN\user`) from a principal name.
pub fn strip_domain(principal: &str) -> &str {
    if let Some((user, _realm)) = principal.rsplit_once('@') {
        return user;
    }

    match principal.split_once('\\') {
        Some((_domain, user)) => user,
        None => principal,
    }
}

fn principal_name(principal: &str, with_domain_name: bool) -> String {
    if with_domain_name {
        principal.to_string()
    } else {
        strip_domain(principal).to_string()
    }
}

/// Validates negotiation tokens: Kerberos first, then NTLM for NTLM-shaped tokens.
pub struct AuthenticationHandler {
    spnego: SpnegoAuthenticationHandler,
    ntlm: Option<NtlmAuthenticationHandler>,
    ntlm_allowed: bool,
}

impl AuthenticationHandler {
    pub fn new(
        spnego: SpnegoAuthenticationHandler,
        ntlm: Option<NtlmAuthenticationHandler>,
        ntlm_allowed: bool,
    ) -> Self {
        Self {
            spnego,
            ntlm,
            ntlm_allowed,
        }
    }

    #[instrument(skip(self, token), fields(ntlm_shaped = token.is_ntlm()))]
    pub async fn validate(&self, token: &NegotiationToken) -> Result<VerifiedIdentity, Error> {
        let error = match self.spnego.validate(token).await {
            Ok(identity) => return Ok(identity),
            Err(error) => error,
        };

        if !token.is_ntlm() {
            return Err(error);
        }

        if !self.ntlm_allowed {
            debug!("NTLM token received but NTLM is not allowed: {error}");
            let msg = "NTLM tokens are not allowed".to_string();
            return Err(Error::MechanismNotSupported(msg));
        }

        let Some(ntlm) = &self.ntlm else {
            let msg = "no NTLM domain controller configured".to_string();
            return Err(Error::MechanismNotSupported(msg));
        };

        debug!("Kerberos validation failed ({error}), trying NTLM");
        ntlm.validate(token).await
    }
}
