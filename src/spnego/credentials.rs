use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::metrics_provider::NEGOTIATION_OUTCOMES;
use crate::spnego::Error;
use crate::spnego::client_trust::ClientTrustFilter;
use crate::spnego::negotiation::{NegotiationAction, NegotiationState};
use crate::spnego::principal::{PrincipalResolver, ResolvedPrincipal};

/// What the login endpoint knows about an incoming request.
#[derive(Clone, Debug, Default)]
pub struct NegotiationRequest {
    pub remote_address: Option<IpAddr>,
    pub alternative_host: Option<String>,
    pub user_agent: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum NegotiationOutcome {
    ChallengeIssued,
    Success {
        principal: ResolvedPrincipal,
        response_token: Option<Vec<u8>>,
    },
    Failure(Error),
    Bypassed,
}

impl NegotiationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            NegotiationOutcome::ChallengeIssued => "challenge",
            NegotiationOutcome::Success { .. } => "success",
            NegotiationOutcome::Failure(_) => "failure",
            NegotiationOutcome::Bypassed => "bypassed",
        }
    }
}

pub struct CredentialsAction {
    trust_filter: ClientTrustFilter,
    negotiation: NegotiationAction,
    resolver: PrincipalResolver,
}

impl CredentialsAction {
    pub fn new(
        trust_filter: ClientTrustFilter,
        negotiation: NegotiationAction,
        resolver: PrincipalResolver,
    ) -> Self {
        Self {
            trust_filter,
            negotiation,
            resolver,
        }
    }

    pub fn trust_filter(&self) -> &ClientTrustFilter {
        &self.trust_filter
    }

    pub fn negotiation(&self) -> &NegotiationAction {
        &self.negotiation
    }

    #[instrument(skip(self, request), fields(remote_address = ?request.remote_address))]
    pub async fn execute(&self, request: &NegotiationRequest) -> NegotiationOutcome {
        let outcome = self.negotiate(request).await;

        match &outcome {
            NegotiationOutcome::Success { principal, .. } => {
                info!("Negotiation succeeded for {}", principal.id);
            }
            NegotiationOutcome::Failure(error) => info!("Negotiation failed: {error}"),
            other => info!("Negotiation outcome: {}", other.label()),
        }

        let reason = match &outcome {
            NegotiationOutcome::Failure(error) => error.kind(),
            _ => "",
        };
        NEGOTIATION_OUTCOMES
            .with_label_values(&[outcome.label(), reason])
            .inc();

        outcome
    }

    async fn negotiate(&self, request: &NegotiationRequest) -> NegotiationOutcome {
        let Some(remote_address) = request.remote_address else {
            return NegotiationOutcome::Bypassed;
        };

        let decision = self
            .trust_filter
            .evaluate(remote_address, request.alternative_host.as_deref())
            .await;
        if !decision.is_known() {
            return NegotiationOutcome::Bypassed;
        }

        let state = self
            .negotiation
            .run(
                request.user_agent.as_deref(),
                request.authorization.as_deref(),
            )
            .await;

        let identity = match state {
            NegotiationState::Authenticated(identity) => identity,
            NegotiationState::Rejected(error) => return NegotiationOutcome::Failure(error),
            NegotiationState::Bypassed => return NegotiationOutcome::Bypassed,
            _ => return NegotiationOutcome::ChallengeIssued,
        };

        match self.resolver.resolve(&identity).await {
            Ok(principal) => NegotiationOutcome::Success {
                principal,
                response_token: identity.response_token().map(<[u8]>::to_vec),
            },
            Err(error) => NegotiationOutcome::Failure(error),
        }
    }
}
