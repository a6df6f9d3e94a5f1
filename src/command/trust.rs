use std::net::IpAddr;

use argh::FromArgs;
use serde_json::json;

use crate::command;
use crate::configuration::Configuration;
use crate::spnego::client_trust::{ClientTrustFilter, TrustDecision};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "trust",
    description = "Evaluate the configured client trust filter for one address"
)]
pub struct Options {
    #[argh(option)]
    /// socket address of the client
    address: IpAddr,

    #[argh(option)]
    /// value of the alternative host header, used only when one is configured
    forwarded_host: Option<String>,
}

pub struct Command {
    filter: ClientTrustFilter,
    address: IpAddr,
    forwarded_host: Option<String>,
}

impl Command {
    pub fn new(options: &Options, config: &Configuration) -> Result<Self, command::Error> {
        let filter = ClientTrustFilter::from_config(&config.client_trust)?;

        Ok(Self {
            filter,
            address: options.address,
            forwarded_host: options.forwarded_host.clone(),
        })
    }

    pub async fn evaluate(&self) -> TrustDecision {
        self.filter
            .evaluate(self.address, self.forwarded_host.as_deref())
            .await
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        let decision = self.evaluate().await;

        let report = json!({
            "address": self.address.to_string(),
            "forwarded_host": self.forwarded_host,
            "strategy": self.filter.strategy_name(),
            "decision": decision.as_str(),
        });
        println!("{report}");

        Ok(())
    }
}
