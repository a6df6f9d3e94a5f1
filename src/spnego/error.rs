use std::fmt;

/// Failures of the negotiation core.
///
/// The first four variants are produced by token validation, the trust check variants by
/// the client trust filter and `AttributeResolutionEmpty` by the principal resolver. None
/// of them escapes as an HTTP error: they are folded into a `NegotiationOutcome`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    MalformedToken(String),
    MechanismNotSupported(String),
    CredentialsRejected(String),
    BackendUnavailable(String),
    TrustCheckTimedOut(String),
    TrustCheckUnavailable(String),
    AttributeResolutionEmpty(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedToken(_) => "malformed_token",
            Error::MechanismNotSupported(_) => "mechanism_not_supported",
            Error::CredentialsRejected(_) => "credentials_rejected",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::TrustCheckTimedOut(_) => "trust_check_timed_out",
            Error::TrustCheckUnavailable(_) => "trust_check_unavailable",
            Error::AttributeResolutionEmpty(_) => "attribute_resolution_empty",
        }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedToken(msg) => write!(f, "Malformed negotiation token: {msg}"),
            Error::MechanismNotSupported(msg) => write!(f, "Mechanism not supported: {msg}"),
            Error::CredentialsRejected(msg) => write!(f, "Credentials rejected: {msg}"),
            Error::BackendUnavailable(msg) => write!(f, "Backend unavailable: {msg}"),
            Error::TrustCheckTimedOut(msg) => write!(f, "Trust check timed out: {msg}"),
            Error::TrustCheckUnavailable(msg) => write!(f, "Trust check unavailable: {msg}"),
            Error::AttributeResolutionEmpty(msg) => {
                write!(f, "No attributes resolved: {msg}")
            }
        }
    }
}

impl std::error::Error for Error {}
