use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::{Resolver, TokioResolver};
use tracing::debug;

use crate::command::server::Error as ServerError;
use crate::spnego::Error;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReverseResolver: Send + Sync {
    /// Host name of the PTR record for `address`, `None` when there is none.
    async fn reverse(&self, address: IpAddr) -> Result<Option<String>, Error>;
}

/// Reverse DNS with the system resolver configuration.
pub struct SystemResolver {
    resolver: TokioResolver,
}

impl SystemResolver {
    pub fn new() -> Result<Self, ServerError> {
        let resolver = Resolver::builder_tokio()
            .map_err(|e| {
                ServerError::Initialization(format!("Unable to read resolver configuration: {e}"))
            })?
            .build();

        Ok(Self { resolver })
    }
}

pub fn normalize_host_name(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

#[async_trait]
impl ReverseResolver for SystemResolver {
    async fn reverse(&self, address: IpAddr) -> Result<Option<String>, Error> {
        match self.resolver.reverse_lookup(address).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .next()
                .map(|ptr| normalize_host_name(&ptr.to_utf8()))),
            Err(e) if e.is_no_records_found() => {
                debug!("No PTR record for {address}");
                Ok(None)
            }
            Err(e) => Err(Error::TrustCheckUnavailable(format!(
                "reverse lookup of {address} failed: {e}"
            ))),
        }
    }
}
