use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

mod error;

pub use error::Error;

use crate::spnego::client_trust::{self, StrategyConfig};
#[cfg(feature = "gssapi")]
use crate::spnego::handler::gssapi;
use crate::spnego::handler::{ServerIdentity, bridge};
use crate::spnego::principal::{self, repository};

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub server: ServerConfig,
    pub spnego: SpnegoConfig,
    #[serde(default)]
    pub ntlm: Option<NtlmConfig>,
    #[serde(default)]
    pub client_trust: client_trust::Config,
    #[serde(default)]
    pub principal: principal::Config,
    #[serde(default)]
    pub attribute_repository: repository::Config,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    #[serde(default = "ServerConfig::default_login_path")]
    pub login_path: String,
    #[serde(default = "ServerConfig::default_interactive_login_url")]
    pub interactive_login_url: String,
}

impl ServerConfig {
    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }

    fn default_login_path() -> String {
        "/login".to_string()
    }

    fn default_interactive_login_url() -> String {
        "/login/form".to_string()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpnegoConfig {
    pub service_principal: Option<String>,
    pub realm: Option<String>,
    pub kdc: Option<String>,
    pub keytab: Option<PathBuf>,
    pub kerberos_conf: Option<PathBuf>,
    pub login_conf: Option<PathBuf>,
    #[serde(default = "SpnegoConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub principal_with_domain_name: bool,
    #[serde(default = "SpnegoConfig::default_true")]
    pub ntlm_allowed: bool,
    #[serde(default)]
    pub ntlm: bool,
    #[serde(default)]
    pub mixed_mode_authentication: bool,
    #[serde(default = "SpnegoConfig::default_true")]
    pub send_401_on_authentication_failure: bool,
    #[serde(default = "SpnegoConfig::default_supported_browsers")]
    pub supported_browsers: Vec<String>,
    pub validator: Option<ValidatorConfig>,
}

impl SpnegoConfig {
    fn default_timeout_ms() -> u64 {
        300_000
    }

    fn default_true() -> bool {
        true
    }

    fn default_supported_browsers() -> Vec<String> {
        ["MSIE", "Trident", "Firefox", "AppleWebKit"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn server_identity(&self) -> ServerIdentity {
        ServerIdentity {
            service_principal: self.service_principal.clone(),
            realm: self.realm.clone(),
            kdc: self.kdc.clone(),
            keytab: self.keytab.clone(),
            kerberos_conf: self.kerberos_conf.clone(),
            login_conf: self.login_conf.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorConfig {
    Bridge(bridge::Config),
    #[cfg(feature = "gssapi")]
    Gssapi(gssapi::Config),
}

#[derive(Clone, Debug, Deserialize)]
pub struct NtlmConfig {
    pub domain: Option<String>,
    #[serde(default)]
    pub domain_controllers: Vec<String>,
    #[serde(default = "NtlmConfig::default_load_balance")]
    pub load_balance: bool,
    pub include_pattern: Option<String>,
    pub bridge: Option<bridge::Config>,
}

impl NtlmConfig {
    fn default_load_balance() -> bool {
        true
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    #[serde(default = "TracingConfig::default_sampling_rate")]
    pub sampling_rate: f64,
}

impl TracingConfig {
    fn default_sampling_rate() -> f64 {
        1.0
    }
}

fn check_pattern(setting: &str, pattern: Option<&str>) -> Result<(), Error> {
    let Some(pattern) = pattern else {
        return Ok(());
    };

    match Regex::new(pattern) {
        Ok(_) => Ok(()),
        Err(e) => Err(Error::InvalidPattern(format!("{setting}: {e}"))),
    }
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice)?;
        config.validate()?;
        Ok(config)
    }

    /// Files the running server depends on besides the configuration itself.
    pub fn watched_files(&self) -> Vec<&Path> {
        [
            self.spnego.keytab.as_deref(),
            self.spnego.kerberos_conf.as_deref(),
            self.spnego.login_conf.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.server.login_path.starts_with('/') {
            let msg = format!(
                "server.login_path must start with '/': {}",
                self.server.login_path
            );
            return Err(Error::InvalidSetting(msg));
        }

        if self.spnego.validator.is_none() {
            let msg = "a [spnego.validator] section is required".to_string();
            return Err(Error::InvalidSetting(msg));
        }

        check_pattern(
            "client_trust.ips_to_check_pattern",
            self.client_trust.ips_to_check_pattern.as_deref(),
        )?;

        if let StrategyConfig::Hostname { host_name_pattern } = &self.client_trust.strategy {
            check_pattern(
                "client_trust.strategy.hostname.host_name_pattern",
                Some(host_name_pattern),
            )?;
        }

        if let Some(ntlm) = &self.ntlm {
            check_pattern("ntlm.include_pattern", ntlm.include_pattern.as_deref())?;

            if ntlm.domain_controllers.is_empty() {
                let msg = "ntlm.domain_controllers must not be empty".to_string();
                return Err(Error::InvalidSetting(msg));
            }

            let has_bridge = ntlm.bridge.is_some()
                || matches!(self.spnego.validator, Some(ValidatorConfig::Bridge(_)));
            if !has_bridge {
                let msg = "NTLM validation requires a validation bridge".to_string();
                return Err(Error::InvalidSetting(msg));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spnego::principal::CaseConversion;

    pub const MINIMAL_CONFIG: &str = r#"
    [server]
    bind_address = "0.0.0.0"

    [spnego.validator.bridge]
    url = "http://127.0.0.1:8089/validate"
    "#;

    const FULL_CONFIG: &str = r#"
    [server]
    bind_address = "127.0.0.1"
    port = 8443
    login_path = "/cas/login"
    interactive_login_url = "https://sso.example.com/cas/login?renew=true"

    [spnego]
    service_principal = "HTTP/sso.example.com@EXAMPLE.COM"
    realm = "EXAMPLE.COM"
    kdc = "kdc.example.com"
    keytab = "/etc/sso/http.keytab"
    kerberos_conf = "/etc/krb5.conf"
    timeout_ms = 5000
    ntlm = true
    mixed_mode_authentication = true
    send_401_on_authentication_failure = false
    supported_browsers = ["Firefox"]

    [spnego.validator.bridge]
    url = "http://127.0.0.1:8089/validate"
    bearer_token = "s3cr3t"

    [ntlm]
    domain = "EXAMPLE"
    domain_controllers = ["dc1.example.com", "dc2.example.com"]
    load_balance = false
    include_pattern = "^EXAMPLE\\\\.+$"

    [client_trust]
    ips_to_check_pattern = "^10\\."
    alternative_remote_host_attribute = "X-Forwarded-For"

    [client_trust.strategy.hostname]
    host_name_pattern = ".+\\.example\\.com$"

    [principal]
    principal_attribute = "uid"
    return_null = true

    [principal.transformation]
    case_conversion = "lowercase"
    strip_domain = true

    [attribute_repository.static.alice]
    mail = ["alice@example.com"]

    [observability.tracing]
    endpoint = "http://otel-collector:4317"
    "#;

    fn with_minimal(extra: &str) -> String {
        format!("{MINIMAL_CONFIG}\n{extra}")
    }

    #[test]
    fn test_load_minimal_config() {
        let config = Configuration::load_from_str(MINIMAL_CONFIG).unwrap();

        assert_eq!(config.server.bind_address.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.query_timeout, 3600);
        assert_eq!(config.server.query_timeout_grace_period, 60);
        assert_eq!(config.server.login_path, "/login");
        assert_eq!(config.server.interactive_login_url, "/login/form");

        assert_eq!(config.spnego.timeout_ms, 300_000);
        assert!(!config.spnego.principal_with_domain_name);
        assert!(config.spnego.ntlm_allowed);
        assert!(!config.spnego.ntlm);
        assert!(!config.spnego.mixed_mode_authentication);
        assert!(config.spnego.send_401_on_authentication_failure);
        assert_eq!(
            config.spnego.supported_browsers,
            vec!["MSIE", "Trident", "Firefox", "AppleWebKit"]
        );

        assert!(config.ntlm.is_none());
        assert!(matches!(config.client_trust.strategy, StrategyConfig::Base));
        assert!(matches!(config.attribute_repository, repository::Config::None));
        assert!(config.observability.is_none());
        assert!(config.watched_files().is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let config = Configuration::load_from_str(FULL_CONFIG).unwrap();

        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.login_path, "/cas/login");
        assert!(config.spnego.ntlm);
        assert!(!config.spnego.send_401_on_authentication_failure);

        let identity = config.spnego.server_identity();
        assert_eq!(identity.realm.as_deref(), Some("EXAMPLE.COM"));
        assert_eq!(identity.keytab, Some(PathBuf::from("/etc/sso/http.keytab")));

        let Some(ValidatorConfig::Bridge(bridge)) = &config.spnego.validator else {
            panic!("expected a bridge validator");
        };
        assert_eq!(bridge.bearer_token.as_ref().unwrap().expose(), "s3cr3t");

        let ntlm = config.ntlm.as_ref().unwrap();
        assert!(!ntlm.load_balance);
        assert_eq!(ntlm.include_pattern.as_deref(), Some("^EXAMPLE\\\\.+$"));

        assert_eq!(
            config.principal.transformation.case_conversion,
            CaseConversion::Lowercase
        );
        assert!(matches!(
            config.attribute_repository,
            repository::Config::Static(_)
        ));

        let tracing = config.observability.unwrap().tracing.unwrap();
        assert!((tracing.sampling_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            config.spnego.keytab.as_deref(),
            Some(Path::new("/etc/sso/http.keytab"))
        );
    }

    #[test]
    fn test_watched_files() {
        let config = Configuration::load_from_str(FULL_CONFIG).unwrap();
        assert_eq!(
            config.watched_files(),
            vec![
                Path::new("/etc/sso/http.keytab"),
                Path::new("/etc/krb5.conf")
            ]
        );
    }

    #[test]
    fn test_missing_validator() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"

        [spnego]
        realm = "EXAMPLE.COM"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::InvalidSetting(_))));
    }

    #[test]
    fn test_invalid_login_path() {
        let config = r#"
        [server]
        bind_address = "0.0.0.0"
        login_path = "login"

        [spnego.validator.bridge]
        url = "http://127.0.0.1:8089/validate"
        "#;

        let result = Configuration::load_from_str(config);
        assert!(matches!(result, Err(Error::InvalidSetting(_))));
    }

    #[test]
    fn test_invalid_patterns() {
        let config = with_minimal(
            r#"
            [client_trust]
            ips_to_check_pattern = "^10\\.(("
            "#,
        );
        let result = Configuration::load_from_str(&config);
        assert!(matches!(result, Err(Error::InvalidPattern(_))));

        let config = with_minimal(
            r#"
            [client_trust.strategy.hostname]
            host_name_pattern = "[a-z"
            "#,
        );
        let result = Configuration::load_from_str(&config);
        assert!(matches!(result, Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_ntlm_requires_domain_controllers() {
        let config = with_minimal(
            r#"
            [ntlm]
            domain = "EXAMPLE"
            "#,
        );

        let result = Configuration::load_from_str(&config);
        assert!(matches!(result, Err(Error::InvalidSetting(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = Configuration::load_from_str("invalid toml [[[");
        assert!(matches!(result, Err(Error::ConfigurationFileFormat(_))));
    }
}
