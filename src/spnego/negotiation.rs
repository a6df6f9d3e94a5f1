use std::sync::Arc;

use tracing::{debug, instrument};

use crate::spnego::handler::{AuthenticationHandler, VerifiedIdentity};
use crate::spnego::token::{NEGOTIATE, NTLM};
use crate::spnego::{Error, NegotiationToken};

/// States of one negotiation exchange.
#[derive(Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Start,
    TokenPresent(NegotiationToken),
    Validating(NegotiationToken),
    Authenticated(VerifiedIdentity),
    Rejected(Error),
    ChallengeIssued,
    Bypassed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Authenticated(_)
                | NegotiationState::Rejected(_)
                | NegotiationState::ChallengeIssued
                | NegotiationState::Bypassed
        )
    }
}

pub struct NegotiationAction {
    handler: Arc<AuthenticationHandler>,
    supported_browsers: Vec<String>,
    ntlm: bool,
    mixed_mode: bool,
}

impl NegotiationAction {
    pub fn new(
        handler: Arc<AuthenticationHandler>,
        supported_browsers: Vec<String>,
        ntlm: bool,
        mixed_mode: bool,
    ) -> Self {
        Self {
            handler,
            supported_browsers,
            ntlm,
            mixed_mode,
        }
    }

    pub fn mixed_mode(&self) -> bool {
        self.mixed_mode
    }

    /// `WWW-Authenticate` values offered to a client without a token.
    pub fn challenge(&self) -> Vec<&'static str> {
        if self.ntlm {
            vec![NEGOTIATE, NTLM]
        } else {
            vec![NEGOTIATE]
        }
    }

    fn is_supported_browser(&self, user_agent: Option<&str>) -> bool {
        let Some(user_agent) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
            return false;
        };

        self.supported_browsers
            .iter()
            .any(|browser| user_agent.contains(browser.as_str()))
    }

    /// Runs the exchange to a terminal state.
    #[instrument(skip(self, authorization))]
    pub async fn run(
        &self,
        user_agent: Option<&str>,
        authorization: Option<&str>,
    ) -> NegotiationState {
        let mut state = NegotiationState::Start;
        while !state.is_terminal() {
            state = self.step(state, user_agent, authorization).await;
        }

        debug!("Negotiation ended in {state:?}");
        state
    }

    async fn step(
        &self,
        state: NegotiationState,
        user_agent: Option<&str>,
        authorization: Option<&str>,
    ) -> NegotiationState {
        match state {
            NegotiationState::Start => self.start(user_agent, authorization),
            NegotiationState::TokenPresent(token) => NegotiationState::Validating(token),
            NegotiationState::Validating(token) => match self.handler.validate(&token).await {
                Ok(identity) => NegotiationState::Authenticated(identity),
                Err(error) => NegotiationState::Rejected(error),
            },
            terminal => terminal,
        }
    }

    fn start(&self, user_agent: Option<&str>, authorization: Option<&str>) -> NegotiationState {
        if !self.is_supported_browser(user_agent) {
            debug!("Unsupported user agent {user_agent:?}");
            return NegotiationState::Bypassed;
        }

        let Some(authorization) = authorization else {
            return NegotiationState::ChallengeIssued;
        };

        match NegotiationToken::from_authorization(authorization) {
            Ok(Some(token)) => NegotiationState::TokenPresent(token),
            Ok(None) => NegotiationState::ChallengeIssued,
            Err(error) if self.mixed_mode => {
                debug!("Ignoring unusable authorization header in mixed mode: {error}");
                NegotiationState::Bypassed
            }
            Err(error) => NegotiationState::Rejected(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine;
    use base64::prelude::BASE64_STANDARD;

    use super::*;
    use crate::spnego::handler::spnego::MockKerberosValidator;
    use crate::spnego::handler::{
        AcceptedContext, Mechanism, ServerIdentity, SpnegoAuthenticationHandler,
    };

    static FIREFOX: &str = "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

    fn browsers() -> Vec<String> {
        ["MSIE", "Trident", "Firefox", "AppleWebKit"]
            .iter()
            .map(|b| b.to_string())
            .collect()
    }

    fn action(validator: MockKerberosValidator, ntlm: bool, mixed_mode: bool) -> NegotiationAction {
        let spnego = SpnegoAuthenticationHandler::new(
            Arc::new(validator),
            ServerIdentity::default(),
            Duration::from_secs(1),
            false,
        );
        let handler = AuthenticationHandler::new(spnego, None, true);
        NegotiationAction::new(Arc::new(handler), browsers(), ntlm, mixed_mode)
    }

    fn unused_validator() -> MockKerberosValidator {
        let mut validator = MockKerberosValidator::new();
        validator.expect_accept().never();
        validator
    }

    fn negotiate_header() -> String {
        format!("Negotiate {}", BASE64_STANDARD.encode([0x60, 0x82, 0x01]))
    }

    #[test]
    fn test_challenge_headers() {
        assert_eq!(action(unused_validator(), false, false).challenge(), vec!["Negotiate"]);
        assert_eq!(
            action(unused_validator(), true, false).challenge(),
            vec!["Negotiate", "NTLM"]
        );
    }

    #[test]
    fn test_is_terminal() {
        assert!(!NegotiationState::Start.is_terminal());
        assert!(NegotiationState::ChallengeIssued.is_terminal());
        assert!(NegotiationState::Rejected(Error::MalformedToken(String::new())).is_terminal());
    }

    #[tokio::test]
    async fn test_no_authorization_issues_challenge() {
        let action = action(unused_validator(), false, false);
        let state = action.run(Some(FIREFOX), None).await;
        assert_eq!(state, NegotiationState::ChallengeIssued);
    }

    #[tokio::test]
    async fn test_other_scheme_issues_challenge() {
        let action = action(unused_validator(), false, false);
        let state = action.run(Some(FIREFOX), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(state, NegotiationState::ChallengeIssued);
    }

    #[tokio::test]
    async fn test_unsupported_browser_is_bypassed() {
        let action = action(unused_validator(), false, false);

        let state = action.run(Some("curl/8.5.0"), Some(&negotiate_header())).await;
        assert_eq!(state, NegotiationState::Bypassed);

        let state = action.run(None, None).await;
        assert_eq!(state, NegotiationState::Bypassed);
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected() {
        let action = action(unused_validator(), false, false);
        let state = action.run(Some(FIREFOX), Some("Negotiate %%%")).await;
        assert!(matches!(
            state,
            NegotiationState::Rejected(Error::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_token_in_mixed_mode_is_bypassed() {
        let action = action(unused_validator(), false, true);
        let state = action.run(Some(FIREFOX), Some("Negotiate %%%")).await;
        assert_eq!(state, NegotiationState::Bypassed);
    }

    #[tokio::test]
    async fn test_valid_token_is_authenticated() {
        let mut validator = MockKerberosValidator::new();
        validator.expect_accept().times(1).returning(|_, _| {
            Ok(AcceptedContext {
                principal: "alice@EXAMPLE.COM".to_string(),
                response_token: None,
            })
        });

        let action = action(validator, false, false);
        let state = action.run(Some(FIREFOX), Some(&negotiate_header())).await;

        let NegotiationState::Authenticated(identity) = state else {
            panic!("expected an authenticated state, got {state:?}");
        };
        assert_eq!(identity.principal(), "alice");
        assert_eq!(identity.mechanism(), Mechanism::Kerberos);
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let mut validator = MockKerberosValidator::new();
        validator
            .expect_accept()
            .returning(|_, _| Err(Error::CredentialsRejected("expired ticket".to_string())));

        let action = action(validator, false, false);
        let state = action.run(Some(FIREFOX), Some(&negotiate_header())).await;

        assert_eq!(
            state,
            NegotiationState::Rejected(Error::CredentialsRejected("expired ticket".to_string()))
        );
    }
}
