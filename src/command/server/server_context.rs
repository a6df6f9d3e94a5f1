use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::command::server::error::Error;
use crate::configuration::{Configuration, NtlmConfig, SpnegoConfig, ValidatorConfig};
#[cfg(feature = "gssapi")]
use crate::spnego::handler::gssapi::GssapiValidator;
use crate::spnego::handler::bridge::ValidationBridge;
use crate::spnego::handler::{
    AuthenticationHandler, KerberosValidator, NtlmAuthenticationHandler,
    SpnegoAuthenticationHandler,
};
use crate::spnego::client_trust::ClientTrustFilter;
use crate::spnego::negotiation::NegotiationAction;
use crate::spnego::principal::{PrincipalResolver, repository};
use crate::spnego::CredentialsAction;

/// Everything a request needs, built from one configuration snapshot.
pub struct ServerContext {
    pub credentials: CredentialsAction,
    pub login_path: String,
    pub interactive_login_url: String,
    pub send_401_on_failure: bool,
}

fn build_kerberos_validator(spnego: &SpnegoConfig) -> Result<Arc<dyn KerberosValidator>, Error> {
    match &spnego.validator {
        Some(ValidatorConfig::Bridge(bridge)) => Ok(Arc::new(ValidationBridge::new(bridge, None)?)),
        #[cfg(feature = "gssapi")]
        Some(ValidatorConfig::Gssapi(gssapi)) => Ok(Arc::new(GssapiValidator::new(
            gssapi,
            &spnego.server_identity(),
        ))),
        None => Err(Error::Initialization(
            "No Kerberos validator configured".to_string(),
        )),
    }
}

fn build_ntlm_handler(
    ntlm: &NtlmConfig,
    spnego: &SpnegoConfig,
) -> Result<NtlmAuthenticationHandler, Error> {
    let bridge_config = match (&ntlm.bridge, &spnego.validator) {
        (Some(bridge), _) | (None, Some(ValidatorConfig::Bridge(bridge))) => bridge,
        _ => {
            let msg = "NTLM validation requires a validation bridge".to_string();
            return Err(Error::Initialization(msg));
        }
    };
    let bridge = ValidationBridge::new(bridge_config, ntlm.domain.clone())?;

    let include_pattern = ntlm
        .include_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| Error::Initialization(format!("Invalid ntlm.include_pattern: {e}")))?;

    Ok(NtlmAuthenticationHandler::new(
        Arc::new(bridge),
        ntlm.domain_controllers.clone(),
        ntlm.load_balance,
        include_pattern,
        Duration::from_millis(spnego.timeout_ms),
        spnego.principal_with_domain_name,
    ))
}

fn build_negotiation(config: &Configuration) -> Result<NegotiationAction, Error> {
    let spnego = &config.spnego;

    let kerberos = SpnegoAuthenticationHandler::new(
        build_kerberos_validator(spnego)?,
        spnego.server_identity(),
        Duration::from_millis(spnego.timeout_ms),
        spnego.principal_with_domain_name,
    );

    let ntlm = config
        .ntlm
        .as_ref()
        .map(|ntlm| build_ntlm_handler(ntlm, spnego))
        .transpose()?;
    if let Some(ntlm) = &ntlm {
        info!("NTLM fallback enabled with controllers {:?}", ntlm.candidates());
    }

    let handler = AuthenticationHandler::new(kerberos, ntlm, spnego.ntlm_allowed);

    Ok(NegotiationAction::new(
        Arc::new(handler),
        spnego.supported_browsers.clone(),
        spnego.ntlm,
        spnego.mixed_mode_authentication,
    ))
}

impl ServerContext {
    pub fn new(config: &Configuration) -> Result<Self, Error> {
        let trust_filter = ClientTrustFilter::from_config(&config.client_trust)?;
        let negotiation = build_negotiation(config)?;
        let repository = repository::from_config(&config.attribute_repository);
        let resolver = PrincipalResolver::new(&config.principal, repository);

        Ok(Self {
            credentials: CredentialsAction::new(trust_filter, negotiation, resolver),
            login_path: config.server.login_path.clone(),
            interactive_login_url: config.server.interactive_login_url.clone(),
            send_401_on_failure: config.spnego.send_401_on_authentication_failure,
        })
    }

    #[cfg(test)]
    pub fn with_credentials(credentials: CredentialsAction) -> Self {
        Self {
            credentials,
            login_path: "/login".to_string(),
            interactive_login_url: "/login/form".to_string(),
            send_401_on_failure: true,
        }
    }
}
