use argh::FromArgs;
use tracing::error;

mod error;
mod http_server;
mod listener;
mod request_ext;
mod router;
mod server_context;

pub use error::Error;
pub use http_server::serve_request;
pub use listener::Listener;
pub use server_context::ServerContext;

use crate::configuration::Configuration;
use crate::watcher::ConfigNotifier;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the SPNEGO negotiation endpoint"
)]
pub struct Options {}

pub struct Command {
    listener: Listener,
}

impl Command {
    pub fn new(config: &Configuration) -> Result<Command, Error> {
        let context = ServerContext::new(config)?;
        let listener = Listener::new(&config.server, context);

        Ok(Command { listener })
    }

    pub fn reload(&self, config: &Configuration) -> Result<(), Error> {
        let context = ServerContext::new(config)?;
        self.listener.notify_config_change(&config.server, context);
        Ok(())
    }

    pub async fn run(&self) -> Result<(), Error> {
        self.listener.serve().await
    }
}

impl ConfigNotifier for Command {
    fn notify_config_change(&self, config: &Configuration) {
        if let Err(e) = self.reload(config) {
            error!("Keeping previous server context, failed to apply configuration: {e}");
        }
    }
}
