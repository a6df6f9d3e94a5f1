use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{AcceptedContext, Mechanism, VerifiedIdentity, principal_name};
use crate::spnego::{Error, NegotiationToken};

/// Server-side Kerberos identity handed to the validation capability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerIdentity {
    pub service_principal: Option<String>,
    pub realm: Option<String>,
    pub kdc: Option<String>,
    pub keytab: Option<PathBuf>,
    pub kerberos_conf: Option<PathBuf>,
    pub login_conf: Option<PathBuf>,
}

/// Kerberos (SPNEGO) token validation capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KerberosValidator: Send + Sync {
    /// Accepts a client token on behalf of `server`.
    ///
    /// Returns the client principal (with realm) and, for mutual authentication, the token
    /// to send back to the client.
    async fn accept(&self, token: &[u8], server: &ServerIdentity)
    -> Result<AcceptedContext, Error>;
}

pub struct SpnegoAuthenticationHandler {
    validator: Arc<dyn KerberosValidator>,
    server: ServerIdentity,
    timeout: Duration,
    principal_with_domain_name: bool,
}

impl SpnegoAuthenticationHandler {
    pub fn new(
        validator: Arc<dyn KerberosValidator>,
        server: ServerIdentity,
        timeout: Duration,
        principal_with_domain_name: bool,
    ) -> Self {
        Self {
            validator,
            server,
            timeout,
            principal_with_domain_name,
        }
    }

    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &NegotiationToken) -> Result<VerifiedIdentity, Error> {
        let accepted = tokio::time::timeout(
            self.timeout,
            self.validator.accept(token.as_bytes(), &self.server),
        )
        .await;

        let context = match accepted {
            Ok(Ok(context)) => context,
            Ok(Err(error)) => {
                debug!("Kerberos validation failed: {error}");
                return Err(error);
            }
            Err(_) => {
                warn!("Kerberos validation timed out after {:?}", self.timeout);
                let msg = format!("no answer from KDC within {:?}", self.timeout);
                return Err(Error::BackendUnavailable(msg));
            }
        };

        if context.principal.trim().is_empty() {
            let msg = "validator accepted the token without a principal".to_string();
            return Err(Error::CredentialsRejected(msg));
        }

        debug!("Kerberos validation succeeded for {}", context.principal);
        let principal = principal_name(&context.principal, self.principal_with_domain_name);
        Ok(VerifiedIdentity::verified(
            principal,
            Mechanism::Kerberos,
            context.response_token,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spnego::token::AuthScheme;

    struct SlowValidator;

    #[async_trait]
    impl KerberosValidator for SlowValidator {
        async fn accept(
            &self,
            _token: &[u8],
            _server: &ServerIdentity,
        ) -> Result<AcceptedContext, Error> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(AcceptedContext::default())
        }
    }

    fn token() -> NegotiationToken {
        NegotiationToken::new(AuthScheme::Negotiate, vec![0x60, 0x01])
    }

    fn accepting(principal: &'static str) -> MockKerberosValidator {
        let mut validator = MockKerberosValidator::new();
        validator.expect_accept().returning(move |_, _| {
            Ok(AcceptedContext {
                principal: principal.to_string(),
                response_token: None,
            })
        });
        validator
    }

    #[tokio::test]
    async fn test_validate_strips_realm() {
        let handler = SpnegoAuthenticationHandler::new(
            Arc::new(accepting("alice@EXAMPLE.COM")),
            ServerIdentity::default(),
            Duration::from_secs(1),
            false,
        );

        let identity = handler.validate(&token()).await.unwrap();
        assert_eq!(identity.principal(), "alice");
        assert_eq!(identity.mechanism(), Mechanism::Kerberos);
    }

    #[tokio::test]
    async fn test_validate_keeps_realm_when_configured() {
        let handler = SpnegoAuthenticationHandler::new(
            Arc::new(accepting("alice@EXAMPLE.COM")),
            ServerIdentity::default(),
            Duration::from_secs(1),
            true,
        );

        let identity = handler.validate(&token()).await.unwrap();
        assert_eq!(identity.principal(), "alice@EXAMPLE.COM");
    }

    #[tokio::test]
    async fn test_validate_empty_principal_is_rejected() {
        let handler = SpnegoAuthenticationHandler::new(
            Arc::new(accepting("  ")),
            ServerIdentity::default(),
            Duration::from_secs(1),
            false,
        );

        let result = handler.validate(&token()).await;
        assert!(matches!(result, Err(Error::CredentialsRejected(_))));
    }

    #[tokio::test]
    async fn test_validate_passes_server_identity() {
        let server = ServerIdentity {
            service_principal: Some("HTTP/sso.example.com@EXAMPLE.COM".to_string()),
            realm: Some("EXAMPLE.COM".to_string()),
            ..ServerIdentity::default()
        };
        let expected = server.clone();

        let mut validator = MockKerberosValidator::new();
        validator
            .expect_accept()
            .withf(move |_, server| *server == expected)
            .times(1)
            .returning(|_, _| {
                Ok(AcceptedContext {
                    principal: "alice@EXAMPLE.COM".to_string(),
                    response_token: None,
                })
            });

        let handler = SpnegoAuthenticationHandler::new(
            Arc::new(validator),
            server,
            Duration::from_secs(1),
            false,
        );

        assert!(handler.validate(&token()).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_timeout_is_backend_unavailable() {
        let handler = SpnegoAuthenticationHandler::new(
            Arc::new(SlowValidator),
            ServerIdentity::default(),
            Duration::from_millis(100),
            false,
        );

        let result = handler.validate(&token()).await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }
}
