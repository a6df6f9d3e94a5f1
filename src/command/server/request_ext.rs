use std::net::SocketAddr;

use hyper::header::{AUTHORIZATION, AsHeaderName, USER_AGENT};
use hyper::http::request::Parts;

use crate::spnego::NegotiationRequest;

pub trait HeaderExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
    fn negotiation_request(&self, alternative_host_header: Option<&str>) -> NegotiationRequest;
}

impl HeaderExt for Parts {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    /// Collects what the negotiation needs from the request head.
    ///
    /// The alternative host is only read when a header name is configured.
    fn negotiation_request(&self, alternative_host_header: Option<&str>) -> NegotiationRequest {
        let remote_address = self.extensions.get::<SocketAddr>().map(SocketAddr::ip);
        let alternative_host = alternative_host_header.and_then(|name| self.get_header(name));

        NegotiationRequest {
            remote_address,
            alternative_host,
            user_agent: self.get_header(USER_AGENT),
            authorization: self.get_header(AUTHORIZATION),
        }
    }
}
