use std::path::Path;

use async_trait::async_trait;
use libgssapi::context::{SecurityContext, ServerCtx};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::name::Name;
use libgssapi::oid::{GSS_MECH_SPNEGO, GSS_NT_KRB5_PRINCIPAL, OidSet};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AcceptedContext, KerberosValidator, ServerIdentity};
use crate::spnego::Error;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {}

/// Accepts SPNEGO tokens in-process with the system GSS-API library.
///
/// The keytab and krb5 configuration are taken from the process environment
/// (`KRB5_KTNAME`, `KRB5_CONFIG`); configured paths that disagree are reported at startup.
pub struct GssapiValidator;

impl GssapiValidator {
    pub fn new(_config: &Config, server: &ServerIdentity) -> Self {
        check_environment("KRB5_KTNAME", server.keytab.as_deref());
        check_environment("KRB5_CONFIG", server.kerberos_conf.as_deref());
        Self
    }
}

fn check_environment(variable: &str, configured: Option<&Path>) {
    let Some(configured) = configured else {
        return;
    };

    match std::env::var_os(variable) {
        Some(value) if Path::new(&value) == configured => {}
        _ => warn!(
            "{} is configured but {variable} does not point to it",
            configured.display()
        ),
    }
}

fn gss_error(error: libgssapi::error::Error) -> Error {
    Error::CredentialsRejected(format!("GSS-API: {error}"))
}

fn new_server_ctx(principal: Option<&str>) -> Result<ServerCtx, Error> {
    let name = match principal {
        Some(principal) => Some(
            Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))
                .and_then(|name| name.canonicalize(Some(&GSS_MECH_SPNEGO)))
                .map_err(|e| Error::BackendUnavailable(format!("invalid service principal: {e}")))?,
        ),
        None => None,
    };

    let mut mechanisms =
        OidSet::new().map_err(|e| Error::BackendUnavailable(format!("GSS-API: {e}")))?;
    mechanisms
        .add(&GSS_MECH_SPNEGO)
        .map_err(|e| Error::BackendUnavailable(format!("GSS-API: {e}")))?;

    let cred = Cred::acquire(name.as_ref(), None, CredUsage::Accept, Some(&mechanisms))
        .map_err(|e| Error::BackendUnavailable(format!("no acceptor credentials: {e}")))?;

    Ok(ServerCtx::new(cred.into()))
}

fn accept_blocking(token: &[u8], principal: Option<&str>) -> Result<AcceptedContext, Error> {
    let mut ctx = new_server_ctx(principal)?;
    let response_token = ctx.step(token).map_err(gss_error)?;

    if !ctx.is_complete() {
        let msg = "multi-pass negotiation is not supported".to_string();
        return Err(Error::MechanismNotSupported(msg));
    }

    let principal = ctx.source_name().map_err(gss_error)?.to_string();
    debug!("GSS-API context established for {principal}");

    Ok(AcceptedContext {
        principal,
        response_token: response_token.map(|buf| buf.to_vec()),
    })
}

#[async_trait]
impl KerberosValidator for GssapiValidator {
    async fn accept(
        &self,
        token: &[u8],
        server: &ServerIdentity,
    ) -> Result<AcceptedContext, Error> {
        let token = token.to_vec();
        let principal = server.service_principal.clone();

        tokio::task::spawn_blocking(move || accept_blocking(&token, principal.as_deref()))
            .await
            .map_err(|e| Error::BackendUnavailable(format!("GSS-API task failed: {e}")))?
    }
}
