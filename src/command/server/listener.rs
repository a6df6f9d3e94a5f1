use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::command::server::error::Error;
use crate::command::server::{ServerContext, serve_request};
use crate::configuration::ServerConfig;

/// Plain HTTP listener; TLS is expected to terminate in front of the gate.
///
/// The context is swapped as a whole on reload. Every request, including later requests
/// on a keep-alive connection, loads the current snapshot.
pub struct Listener {
    binding_address: SocketAddr,
    context: Arc<ArcSwap<ServerContext>>,
    timeouts: ArcSwap<[Duration; 2]>,
}

fn timeouts(server_config: &ServerConfig) -> [Duration; 2] {
    [
        Duration::from_secs(server_config.query_timeout),
        Duration::from_secs(server_config.query_timeout_grace_period),
    ]
}

async fn bind(binding_address: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(binding_address).await.map_err(|err| {
        let msg = format!("Failed to bind to {binding_address}: {err}");
        Error::Initialization(msg)
    })
}

async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), Error> {
    listener.accept().await.map_err(|err| {
        let msg = format!("Failed to accept incoming connection: {err}");
        Error::Execution(msg)
    })
}

impl Listener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);

        Self {
            binding_address,
            context: Arc::new(ArcSwap::from_pointee(context)),
            timeouts: ArcSwap::from_pointee(timeouts(server_config)),
        }
    }

    /// Binding address changes need a restart; everything else applies to new connections.
    pub fn notify_config_change(&self, server_config: &ServerConfig, context: ServerContext) {
        let binding_address = SocketAddr::new(server_config.bind_address, server_config.port);
        if binding_address != self.binding_address {
            info!(
                "Binding address changed to {binding_address}, still listening on {} until restart",
                self.binding_address
            );
        }

        self.context.store(Arc::new(context));
        self.timeouts.store(Arc::new(timeouts(server_config)));
    }

    pub async fn serve(&self) -> Result<(), Error> {
        let listener = bind(self.binding_address).await?;
        info!("Listening on {}", self.binding_address);

        loop {
            let (tcp, remote_address) = accept(&listener).await?;
            debug!("Accepted connection from {remote_address}");

            let stream = TokioIo::new(tcp);
            let context = Arc::clone(&self.context);
            let timeouts = Arc::clone(&self.timeouts.load());

            tokio::spawn(Box::pin(serve_request(
                stream,
                context,
                timeouts,
                remote_address,
            )));
        }
    }
}
