//! SPNEGO negotiation core: client trust, token validation and principal resolution.

pub mod client_trust;
pub mod credentials;
pub mod directory;
mod error;
pub mod handler;
pub mod negotiation;
pub mod principal;
pub mod token;

pub use credentials::{CredentialsAction, NegotiationOutcome, NegotiationRequest};
pub use error::Error;
pub use token::NegotiationToken;
