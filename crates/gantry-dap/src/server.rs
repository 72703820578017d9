//! TCP listener and per-connection session loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::builder::Builder;
use crate::context::SessionContext;
use crate::dispatcher::{Dispatcher, Flow};
use crate::engine::Backend;
use crate::error::DapError;
use crate::launch::{LaunchOrchestrator, DEFAULT_OUTPUT};
use crate::outbound::Outbound;
use crate::protocol::Request;
use crate::sequencer::SeqMode;
use crate::teardown::{wait_true, Teardown};
use crate::transport::FrameReader;

/// Per-session behaviour.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub seq_mode: SeqMode,
    /// Delay between debuggee exit and automatic teardown.
    pub terminate_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            seq_mode: SeqMode::Monotonic,
            terminate_grace: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub session: SessionOptions,
    /// Where debug and test builds are written when a launch names no output.
    pub default_output: PathBuf,
    /// Keep accepting after the first session ends.
    pub accept_multi_client: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            default_output: PathBuf::from(DEFAULT_OUTPUT),
            accept_multi_client: true,
        }
    }
}

/// Everything a session needs that outlives it.
#[derive(Clone)]
pub struct SessionEnv {
    pub options: SessionOptions,
    pub orchestrator: Arc<LaunchOrchestrator>,
    /// Turns `true` when the server is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

pub struct Server {
    listener: TcpListener,
    options: ServerOptions,
    orchestrator: Arc<LaunchOrchestrator>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Stops a running [`Server`] and every session it owns.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        options: ServerOptions,
        backend: Arc<dyn Backend>,
        builder: Arc<dyn Builder>,
    ) -> Result<Self, DapError> {
        let listener = TcpListener::bind(addr).await?;
        let orchestrator = Arc::new(
            LaunchOrchestrator::new(backend, builder)
                .with_default_output(options.default_output.clone()),
        );
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener,
            options,
            orchestrator,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DapError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    fn env(&self) -> SessionEnv {
        SessionEnv {
            options: self.options.session.clone(),
            orchestrator: Arc::clone(&self.orchestrator),
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Accept connections until stopped. In single-client mode, returns
    /// once the first session ends.
    pub async fn run(self) -> Result<(), DapError> {
        info!(addr = %self.local_addr()?, "DAP server listening");
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = wait_true(&mut shutdown) => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            };
            info!(%peer, "client connected");
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay: {e}");
            }
            let (reader, writer) = stream.into_split();
            let session = serve_connection(reader, writer, self.env())
                .instrument(tracing::info_span!("session", %peer));

            if self.options.accept_multi_client {
                tokio::spawn(session);
            } else {
                session.await;
                break;
            }
        }
        info!("DAP server stopped");
        Ok(())
    }
}

/// Run one session over a byte stream pair until it is torn down.
pub async fn serve_connection<R, W>(reader: R, writer: W, env: SessionEnv)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let SessionEnv {
        options,
        orchestrator,
        mut shutdown,
    } = env;
    let context = Arc::new(SessionContext::new(Outbound::new(
        Box::new(writer),
        options.seq_mode,
    )));
    let teardown = Arc::new(Teardown::new(Arc::clone(&context)));
    let mut closed = teardown.subscribe();
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&context),
        Arc::clone(&teardown),
        orchestrator,
        options.terminate_grace,
    );
    let mut frames = FrameReader::new(reader);

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_true(&mut closed) => break,
            _ = wait_true(&mut shutdown) => {
                info!("server shutting down");
                break;
            }
            frame = frames.read_frame() => frame,
        };
        match frame.and_then(|value| value.map(Request::from_value).transpose()) {
            Ok(Some(request)) => {
                if dispatcher.dispatch(request).await == Flow::Close {
                    break;
                }
            }
            Ok(None) => {
                info!("client closed the connection");
                break;
            }
            Err(e) => {
                warn!("closing connection: {e}");
                break;
            }
        }
    }
    teardown.stop().await;
    debug!("session finished");
}
