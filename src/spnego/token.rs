use base64::Engine;
use base64::prelude::BASE64_STANDARD;

use crate::spnego::Error;

pub static NEGOTIATE: &str = "Negotiate";
pub static NTLM: &str = "NTLM";

static NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";
// GSS-API InitialContextToken and SPNEGO NegTokenResp tags
const SPNEGO_INIT_TAG: u8 = 0x60;
const SPNEGO_RESP_TAG: u8 = 0xa1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    Negotiate,
    Ntlm,
}

impl AuthScheme {
    fn parse(scheme: &str) -> Option<Self> {
        if scheme.eq_ignore_ascii_case(NEGOTIATE) {
            Some(AuthScheme::Negotiate)
        } else if scheme.eq_ignore_ascii_case(NTLM) {
            Some(AuthScheme::Ntlm)
        } else {
            None
        }
    }
}

/// Opaque token supplied by the client in the `Authorization` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationToken {
    scheme: AuthScheme,
    bytes: Vec<u8>,
}

impl NegotiationToken {
    pub fn new(scheme: AuthScheme, bytes: Vec<u8>) -> Self {
        Self { scheme, bytes }
    }

    /// Decodes an `Authorization` header value.
    ///
    /// Returns `Ok(None)` when the header uses another scheme (e.g. `Basic`): such a request
    /// carries no negotiation token at all.
    pub fn from_authorization(value: &str) -> Result<Option<Self>, Error> {
        let value = value.trim();
        let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));

        let Some(scheme) = AuthScheme::parse(scheme) else {
            return Ok(None);
        };

        let token = token.trim();
        if token.is_empty() {
            let msg = format!("empty {scheme:?} token");
            return Err(Error::MalformedToken(msg));
        }

        match BASE64_STANDARD.decode(token) {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(Self::new(scheme, bytes))),
            Ok(_) => Err(Error::MalformedToken("token decodes to nothing".to_string())),
            Err(e) => Err(Error::MalformedToken(format!("invalid base64: {e}"))),
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw NTLMSSP messages and SPNEGO wrappers carrying one are NTLM-shaped.
    pub fn is_ntlm(&self) -> bool {
        if self.bytes.starts_with(NTLMSSP_SIGNATURE) {
            return true;
        }

        let wrapped = matches!(self.bytes.first(), Some(&(SPNEGO_INIT_TAG | SPNEGO_RESP_TAG)));
        wrapped
            && self
                .bytes
                .windows(NTLMSSP_SIGNATURE.len())
                .any(|window| window == NTLMSSP_SIGNATURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntlm_type1() -> Vec<u8> {
        let mut msg = NTLMSSP_SIGNATURE.to_vec();
        msg.extend_from_slice(&[1, 0, 0, 0, 0x07, 0x82, 0x08, 0xa2]);
        msg
    }

    #[test]
    fn test_from_authorization_negotiate() {
        let header = format!("Negotiate {}", BASE64_STANDARD.encode([0x60, 0x01, 0x02]));
        let token = NegotiationToken::from_authorization(&header)
            .unwrap()
            .unwrap();

        assert_eq!(token.scheme(), AuthScheme::Negotiate);
        assert_eq!(token.as_bytes(), &[0x60, 0x01, 0x02]);
        assert!(!token.is_ntlm());
    }

    #[test]
    fn test_from_authorization_scheme_is_case_insensitive() {
        let header = format!("ntlm {}", BASE64_STANDARD.encode(ntlm_type1()));
        let token = NegotiationToken::from_authorization(&header)
            .unwrap()
            .unwrap();

        assert_eq!(token.scheme(), AuthScheme::Ntlm);
        assert!(token.is_ntlm());
    }

    #[test]
    fn test_from_authorization_other_scheme() {
        let token = NegotiationToken::from_authorization("Basic dXNlcjpwYXNz").unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_from_authorization_empty_token() {
        let result = NegotiationToken::from_authorization("Negotiate");
        assert!(matches!(result, Err(Error::MalformedToken(_))));

        let result = NegotiationToken::from_authorization("Negotiate    ");
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_from_authorization_invalid_base64() {
        let result = NegotiationToken::from_authorization("Negotiate !!not-base64!!");
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_is_ntlm_wrapped_in_spnego() {
        let mut wrapped = vec![SPNEGO_INIT_TAG, 0x40, 0x06, 0x06, 0x2b];
        wrapped.extend_from_slice(&ntlm_type1());
        let token = NegotiationToken::new(AuthScheme::Negotiate, wrapped);

        assert!(token.is_ntlm());
    }

    #[test]
    fn test_is_ntlm_signature_outside_wrapper_is_ignored() {
        let mut bytes = vec![0x30, 0x00];
        bytes.extend_from_slice(&ntlm_type1());
        let token = NegotiationToken::new(AuthScheme::Negotiate, bytes);

        assert!(!token.is_ntlm());
    }
}
