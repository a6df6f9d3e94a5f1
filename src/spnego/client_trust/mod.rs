
mod resolver;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, instrument};

pub use resolver::{ReverseResolver, SystemResolver};

use crate::command::server::Error as ServerError;
use crate::metrics_provider::CLIENT_TRUST_DECISIONS;
use crate::spnego::Error;
use crate::spnego::directory::{self, DirectorySearch, LdapDirectory};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub ips_to_check_pattern: Option<String>,
    pub alternative_remote_host_attribute: Option<String>,
    #[serde(default = "Config::default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Config {
    fn default_dns_timeout_ms() -> u64 {
        2000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ips_to_check_pattern: None,
            alternative_remote_host_attribute: None,
            dns_timeout_ms: Self::default_dns_timeout_ms(),
            strategy: StrategyConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyConfig {
    #[default]
    Base,
    Hostname {
        host_name_pattern: String,
    },
    Ldap(LdapStrategyConfig),
}

#[derive(Clone, Debug, Deserialize)]
pub struct LdapStrategyConfig {
    #[serde(flatten)]
    pub directory: directory::Config,
    pub attribute_name: String,
    pub attribute_value: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    Known,
    Unknown,
    IndeterminateTimedOut,
}

impl TrustDecision {
    /// Only a known client may negotiate.
    pub fn is_known(self) -> bool {
        self == TrustDecision::Known
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrustDecision::Known => "known",
            TrustDecision::Unknown => "unknown",
            TrustDecision::IndeterminateTimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientAddress {
    Ip(IpAddr),
    Host(String),
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientAddress::Ip(ip) => write!(f, "{ip}"),
            ClientAddress::Host(host) => f.write_str(host),
        }
    }
}

/// Where a request comes from: the socket peer, possibly overridden by a proxy header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSystemIdentity {
    pub remote_address: IpAddr,
    pub alternative_host: Option<String>,
}

impl ClientSystemIdentity {
    /// `alternative_host` is a raw header value. Only its last non-empty comma-separated
    /// entry counts: that is the one appended by the proxy nearest to the gate, earlier
    /// entries come from the client.
    pub fn new(remote_address: IpAddr, alternative_host: Option<&str>) -> Self {
        let alternative_host = alternative_host
            .and_then(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .rfind(|host| !host.is_empty())
            })
            .map(str::to_string);

        Self {
            remote_address,
            alternative_host,
        }
    }

    pub fn effective_address(&self) -> ClientAddress {
        match &self.alternative_host {
            Some(host) => match host.parse::<IpAddr>() {
                Ok(ip) => ClientAddress::Ip(ip),
                Err(_) => ClientAddress::Host(host.clone()),
            },
            None => ClientAddress::Ip(self.remote_address),
        }
    }
}

pub enum TrustStrategy {
    Base,
    Hostname {
        resolver: Arc<dyn ReverseResolver>,
        pattern: Regex,
    },
    Ldap {
        resolver: Arc<dyn ReverseResolver>,
        directory: Arc<dyn DirectorySearch>,
        directory_timeout: Duration,
        attribute_name: String,
        attribute_value: Option<String>,
    },
}

impl TrustStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            TrustStrategy::Base => "base",
            TrustStrategy::Hostname { .. } => "hostname",
            TrustStrategy::Ldap { .. } => "ldap",
        }
    }
}

/// Decides whether a client system is eligible for transparent negotiation.
pub struct ClientTrustFilter {
    ips_to_check: Option<Regex>,
    alternative_host_header: Option<String>,
    dns_timeout: Duration,
    strategy: TrustStrategy,
}

fn compile(pattern: &str, setting: &str) -> Result<Regex, ServerError> {
    Regex::new(pattern).map_err(|e| {
        ServerError::Initialization(format!("Invalid {setting} pattern '{pattern}': {e}"))
    })
}

impl ClientTrustFilter {
    pub fn new(
        ips_to_check: Option<Regex>,
        alternative_host_header: Option<String>,
        dns_timeout: Duration,
        strategy: TrustStrategy,
    ) -> Self {
        Self {
            ips_to_check,
            alternative_host_header,
            dns_timeout,
            strategy,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let ips_to_check = config
            .ips_to_check_pattern
            .as_deref()
            .map(|pattern| compile(pattern, "ips_to_check"))
            .transpose()?;

        let strategy = match &config.strategy {
            StrategyConfig::Base => TrustStrategy::Base,
            StrategyConfig::Hostname { host_name_pattern } => TrustStrategy::Hostname {
                resolver: Arc::new(SystemResolver::new()?),
                pattern: compile(host_name_pattern, "host_name")?,
            },
            StrategyConfig::Ldap(ldap) => TrustStrategy::Ldap {
                resolver: Arc::new(SystemResolver::new()?),
                directory: Arc::new(LdapDirectory::new(ldap.directory.clone())),
                directory_timeout: Duration::from_millis(ldap.directory.timeout_ms),
                attribute_name: ldap.attribute_name.clone(),
                attribute_value: ldap.attribute_value.clone(),
            },
        };

        Ok(Self::new(
            ips_to_check,
            config.alternative_remote_host_attribute.clone(),
            Duration::from_millis(config.dns_timeout_ms),
            strategy,
        ))
    }

    /// Request header holding the client address when a proxy sits in front of the server.
    pub fn alternative_host_header(&self) -> Option<&str> {
        self.alternative_host_header.as_deref()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    fn budget(&self) -> Duration {
        match &self.strategy {
            TrustStrategy::Ldap {
                directory_timeout, ..
            } => self.dns_timeout + *directory_timeout,
            _ => self.dns_timeout,
        }
    }

    #[instrument(skip(self), fields(strategy = self.strategy.name()))]
    pub async fn evaluate(
        &self,
        remote_address: IpAddr,
        alternative_host: Option<&str>,
    ) -> TrustDecision {
        let alternative_host = self.alternative_host_header.as_ref().and(alternative_host);
        let client = ClientSystemIdentity::new(remote_address, alternative_host);

        let deadline = Instant::now() + self.budget();
        let decision = timeout_at(deadline, self.decide(&client))
            .await
            .unwrap_or(TrustDecision::IndeterminateTimedOut);

        debug!(
            "Client {} ({}) is {decision}",
            client.effective_address(),
            client.remote_address
        );
        CLIENT_TRUST_DECISIONS
            .with_label_values(&[self.strategy.name(), decision.as_str()])
            .inc();

        decision
    }

    async fn decide(&self, client: &ClientSystemIdentity) -> TrustDecision {
        let address = client.effective_address();

        if let Some(pattern) = &self.ips_to_check {
            if !pattern.is_match(&address.to_string()) {
                debug!("{address} does not match the addresses to check");
                return TrustDecision::Unknown;
            }
        }

        match &self.strategy {
            TrustStrategy::Base => TrustDecision::Known,
            TrustStrategy::Hostname { resolver, pattern } => {
                let host = match address {
                    ClientAddress::Host(host) => host,
                    ClientAddress::Ip(ip) => match self.reverse_lookup(resolver.as_ref(), ip).await {
                        Ok(Some(host)) => host,
                        Ok(None) => return TrustDecision::Unknown,
                        Err(Error::TrustCheckTimedOut(msg)) => {
                            debug!("{msg}");
                            return TrustDecision::IndeterminateTimedOut;
                        }
                        Err(e) => {
                            debug!("{e}");
                            return TrustDecision::Unknown;
                        }
                    },
                };

                if pattern.is_match(&host) {
                    TrustDecision::Known
                } else {
                    debug!("{host} does not match the host name pattern");
                    TrustDecision::Unknown
                }
            }
            TrustStrategy::Ldap {
                resolver,
                directory,
                attribute_name,
                attribute_value,
                ..
            } => {
                let key = match address {
                    ClientAddress::Host(host) => host,
                    ClientAddress::Ip(ip) => self.resolve_or_address(resolver.as_ref(), ip).await,
                };

                let attributes = [attribute_name.clone()];
                let entries = match directory.search(&key, &attributes).await {
                    Ok(entries) => entries,
                    Err(directory::Error::TimedOut(msg)) => {
                        debug!("Directory lookup of {key} timed out: {msg}");
                        return TrustDecision::IndeterminateTimedOut;
                    }
                    Err(e) => {
                        debug!("Directory lookup of {key} failed: {e}");
                        return TrustDecision::Unknown;
                    }
                };

                let Some(values) = entries.first().and_then(|entry| entry.get(attribute_name))
                else {
                    return TrustDecision::Unknown;
                };

                let matches = match attribute_value {
                    Some(expected) => values.iter().any(|value| value == expected),
                    None => !values.is_empty(),
                };

                if matches {
                    TrustDecision::Known
                } else {
                    TrustDecision::Unknown
                }
            }
        }
    }

    /// Reverse lookup bounded by the DNS timeout.
    async fn reverse_lookup(
        &self,
        resolver: &dyn ReverseResolver,
        ip: IpAddr,
    ) -> Result<Option<String>, Error> {
        timeout(self.dns_timeout, resolver.reverse(ip))
            .await
            .unwrap_or_else(|_| {
                Err(Error::TrustCheckTimedOut(format!(
                    "Reverse lookup of {ip} exceeded {:?}",
                    self.dns_timeout
                )))
            })
    }

    async fn resolve_or_address(&self, resolver: &dyn ReverseResolver, ip: IpAddr) -> String {
        match self.reverse_lookup(resolver, ip).await {
            Ok(Some(host)) => host,
            Ok(None) => ip.to_string(),
            Err(e) => {
                debug!("{e}, using the address as key");
                ip.to_string()
            }
        }
    }
}
