//! XMPP transport adapter for the session core.
//!
//! A single connection task owns the `tokio-xmpp` client. The adapter talks to
//! it over a command queue, and the task delivers received message stanzas to
//! the session's [`InboundHandler`] from its own context.

mod router;
pub mod stanza;

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use session_core::{
    ContactId, InboundHandler, OutgoingChat, SessionError, SessionErrorCategory, Transport,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_xmpp::{AsyncClient as Client, AsyncConfig, AsyncServerConfig, Event};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use xmpp_parsers::{BareJid, Element, Jid};

use crate::{
    router::{QueryReply, StanzaRouter},
    stanza::{
        available_presence, chat_message, parse_raw_payload, parse_roster_result, roster_query,
    },
};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Client-to-server port used when the server host is given explicitly.
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

#[derive(Debug, Clone)]
pub struct XmppTransportConfig {
    /// Bare address used to log in, for example `alice@example.com`.
    pub identity: String,
    pub password: String,
    /// Host to connect to. Empty or equal to the identity's domain means the
    /// host is looked up through DNS SRV records of that domain.
    pub server_host: String,
    pub connect_timeout: Duration,
}

impl XmppTransportConfig {
    pub fn new(
        identity: impl Into<String>,
        password: impl Into<String>,
        server_host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            password: password.into(),
            server_host: server_host.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum TransportCommand {
    Send {
        element: Element,
        reply: Reply<()>,
    },
    Query {
        id: String,
        element: Element,
        reply: QueryReply,
    },
    Disconnect {
        reply: Reply<()>,
    },
}

impl TransportCommand {
    fn kind(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Query { .. } => "query",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// Live XMPP connection exposed through the [`Transport`] primitives.
#[derive(Debug)]
pub struct XmppTransport {
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl XmppTransport {
    /// Log in, bind a resource and announce availability.
    ///
    /// Returns once the session is online; `handler` receives every inbound
    /// message stanza from then on.
    pub async fn connect(
        config: XmppTransportConfig,
        handler: InboundHandler,
    ) -> Result<Self, SessionError> {
        let jid = parse_identity(&config.identity)?;
        let server = server_config(identity_domain(&config.identity), &config.server_host);
        match &server {
            AsyncServerConfig::Manual { host, port } => {
                info!(identity = %jid, host, port, "connecting to explicit host")
            }
            AsyncServerConfig::UseSrv => info!(identity = %jid, "connecting via SRV lookup"),
        }

        let mut client = Client::new_with_config(AsyncConfig {
            jid: Jid::Bare(jid),
            password: config.password,
            server,
        });
        client.set_reconnect(false);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (online_tx, online_rx) = oneshot::channel();
        let connection = ConnectionTask {
            client,
            command_rx,
            router: StanzaRouter::new(handler),
            online_tx: Some(online_tx),
        };
        let task = tokio::spawn(connection.run());

        let online = match tokio::time::timeout(config.connect_timeout, online_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(connect_failed("connection task exited before going online")),
            Err(_) => Err(connect_failed(format!(
                "not online after {}s",
                config.connect_timeout.as_secs()
            ))),
        };
        if let Err(err) = online {
            task.abort();
            return Err(err);
        }

        Ok(Self {
            command_tx,
            task: Mutex::new(Some(task)),
        })
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> TransportCommand,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .map_err(|_| transport_closed())?;
        reply_rx.await.map_err(|_| transport_closed())?
    }
}

#[async_trait]
impl Transport for XmppTransport {
    async fn send(&self, message: OutgoingChat) -> Result<(), SessionError> {
        let element = chat_message(&message, &Uuid::new_v4().to_string());
        self.request(|reply| TransportCommand::Send { element, reply })
            .await
    }

    async fn send_raw(&self, payload: &str) -> Result<(), SessionError> {
        let element = parse_raw_payload(payload)?;
        self.request(|reply| TransportCommand::Send { element, reply })
            .await
    }

    async fn query_roster(&self, timeout: Duration) -> Result<Vec<ContactId>, SessionError> {
        let id = Uuid::new_v4().to_string();
        let element = roster_query(&id);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(TransportCommand::Query {
                id,
                element,
                reply: reply_tx,
            })
            .map_err(|_| transport_closed())?;

        let response = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(transport_closed()),
            Err(_) => return Err(SessionError::roster_timeout(timeout)),
        };
        parse_roster_result(&response)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let result = self
            .request(|reply| TransportCommand::Disconnect { reply })
            .await;

        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "connection task ended abnormally");
        }
        result
    }
}

struct ConnectionTask {
    client: Client,
    command_rx: mpsc::UnboundedReceiver<TransportCommand>,
    router: StanzaRouter,
    online_tx: Option<oneshot::Sender<Result<(), SessionError>>>,
}

enum Step {
    Continue,
    Stop,
}

impl ConnectionTask {
    async fn run(mut self) {
        debug!("connection task started");
        loop {
            let step = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("transport handle dropped; closing stream");
                        if let Err(err) = self.client.send_end().await {
                            debug!(error = %err, "closing stream failed");
                        }
                        Step::Stop
                    }
                },
                event = self.client.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.report_failure(transport_closed());
                        Step::Stop
                    }
                },
            };
            if matches!(step, Step::Stop) {
                break;
            }
        }
        debug!(
            pending_queries = self.router.pending_queries(),
            "connection task exiting"
        );
    }

    async fn handle_command(&mut self, command: TransportCommand) -> Step {
        trace!(command = command.kind(), "transport command");
        match command {
            TransportCommand::Send { element, reply } => {
                let result = self
                    .client
                    .send_stanza(element)
                    .await
                    .map_err(|err| SessionError::send_failed(err.to_string()));
                let _ = reply.send(result);
                Step::Continue
            }
            TransportCommand::Query { id, element, reply } => {
                match self.client.send_stanza(element).await {
                    Ok(()) => self.router.track(id, reply),
                    Err(err) => {
                        let _ = reply.send(Err(SessionError::send_failed(err.to_string())));
                    }
                }
                Step::Continue
            }
            TransportCommand::Disconnect { reply } => {
                info!("closing session");
                let result = self.client.send_end().await.map_err(|err| {
                    SessionError::new(
                        SessionErrorCategory::Transport,
                        "disconnect_failed",
                        err.to_string(),
                    )
                });
                let _ = reply.send(result);
                Step::Stop
            }
        }
    }

    async fn handle_event(&mut self, event: Event) -> Step {
        match event {
            Event::Online { bound_jid, .. } => {
                info!(jid = %bound_jid, "session online");
                let announced = self
                    .client
                    .send_stanza(available_presence())
                    .await
                    .map_err(|err| connect_failed(format!("sending initial presence: {err}")));
                let failed = announced.is_err();
                match self.online_tx.take() {
                    Some(online_tx) => {
                        let _ = online_tx.send(announced);
                    }
                    None => warn!("unexpected second online event"),
                }
                if failed { Step::Stop } else { Step::Continue }
            }
            Event::Disconnected(err) => {
                let message = err.to_string();
                match self.online_tx.take() {
                    Some(online_tx) => {
                        let _ = online_tx.send(Err(connect_failed(message)));
                    }
                    None => self.report_failure(SessionError::new(
                        SessionErrorCategory::Transport,
                        "transport_closed",
                        message,
                    )),
                }
                Step::Stop
            }
            Event::Stanza(element) => {
                if let Some(answer) = self.router.route(element)
                    && let Err(err) = self.client.send_stanza(answer).await
                {
                    warn!(error = %err, "failed answering server request");
                }
                Step::Continue
            }
        }
    }

    fn report_failure(&mut self, err: SessionError) {
        match self.online_tx.take() {
            Some(online_tx) => {
                let _ = online_tx.send(Err(connect_failed(err.message)));
            }
            None => {
                error!(error = %err, "connection lost");
                self.router.handler().on_transport_failure(err);
            }
        }
    }
}

fn parse_identity(identity: &str) -> Result<BareJid, SessionError> {
    identity.trim().parse::<BareJid>().map_err(|err| {
        SessionError::new(
            SessionErrorCategory::Setup,
            "invalid_identity",
            format!("invalid address '{identity}': {err}"),
        )
    })
}

/// Explicit host when the user named one other than the identity's domain,
/// SRV lookup otherwise.
fn server_config(domain: &str, server_host: &str) -> AsyncServerConfig {
    let host = server_host.trim();
    if host.is_empty() || host.eq_ignore_ascii_case(domain) {
        AsyncServerConfig::UseSrv
    } else {
        AsyncServerConfig::Manual {
            host: host.to_owned(),
            port: DEFAULT_CLIENT_PORT,
        }
    }
}

fn identity_domain(identity: &str) -> &str {
    let bare = identity
        .split_once('/')
        .map_or(identity, |(bare, _resource)| bare);
    bare.rsplit_once('@').map_or(bare, |(_local, domain)| domain)
}

fn connect_failed(message: impl Into<String>) -> SessionError {
    SessionError::new(SessionErrorCategory::Setup, "connect_failed", message)
}

fn transport_closed() -> SessionError {
    SessionError::new(
        SessionErrorCategory::Transport,
        "transport_closed",
        "connection task is not running",
    )
}
