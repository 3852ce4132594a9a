//! Connection management for AMI
//!
//! One background task owns the socket, the in-flight action table and the
//! listener registry. [`AmiClient`] handles talk to it through a mailbox, so
//! every state change happens on that task, one message at a time.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::Action,
    config::AmiConfig,
    constants::{BANNER_PREFIX, INBOUND_QUEUE_SIZE, OUTBOUND_QUEUE_SIZE},
    correlation::{Correlated, CorrelationTable},
    error::{AmiError, AmiResult},
    event::{Event, Response},
    listener::{ListenerCallback, ListenerFilter, ListenerId, ListenerOptions, ListenerRegistry},
    protocol::{classify, LineFramer},
    transport::{self, LineReader, TransportWriter},
};

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No socket; a reconnect is scheduled.
    Disconnected,
    /// Looking up the host.
    Resolving,
    /// TCP (and TLS) handshake in progress.
    Connecting,
    /// Connected, waiting for the `Asterisk Call Manager/x.y` banner.
    AwaitingSalutation,
    /// Login sent, waiting for its response.
    AwaitingLoginReply,
    /// Logged in; actions are accepted.
    Ready,
    /// [`AmiClient::close`] was called. Terminal.
    Closed,
}

impl ConnectionState {
    /// Actions are only accepted in this state.
    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingSalutation => "awaiting salutation",
            ConnectionState::AwaitingLoginReply => "awaiting login reply",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Reason for a dropped connection
#[derive(Debug, Clone, PartialEq, Eq)]
enum DisconnectReason {
    /// Clean EOF on the socket
    ConnectionClosed,
    /// Socket I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// The peer sent something that is not AMI
    ProtocolError(String),
    /// The outbound queue filled up because the peer stopped reading
    WriteStalled,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::WriteStalled => write!(f, "peer stopped reading"),
        }
    }
}

/// Requests from client handles to the connection task.
enum Command {
    Send {
        action: Action,
        reply: oneshot::Sender<AmiResult<Response>>,
    },
    AddListener {
        filter: ListenerFilter,
        callback: ListenerCallback,
        options: ListenerOptions,
        reply: oneshot::Sender<ListenerId>,
    },
    DelListener {
        id: ListenerId,
        reply: oneshot::Sender<bool>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Progress reported by the connect, reader and writer tasks.
enum LinkEvent {
    Resolved,
    Connected {
        reader: LineReader,
        writer: TransportWriter,
    },
    Failed(AmiError),
    Line(String),
    Closed(DisconnectReason),
}

/// Tagged with the connection attempt it belongs to, so events from a
/// torn-down socket are recognisable.
type LinkMessage = (u64, LinkEvent);

/// AMI client handle (Clone + Send)
///
/// Created by [`AmiClient::start`], which spawns the connection task. The
/// task connects, logs in and reconnects on its own; the handle only sends
/// actions and manages listeners. Dropping every handle closes the
/// connection.
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{Action, AmiClient, AmiConfig, ListenerOptions};
///
/// # async fn example() -> Result<(), asterisk_ami_tokio::AmiError> {
/// let client = AmiClient::start(AmiConfig::new("127.0.0.1", "admin", "secret"))?;
/// client.wait_ready().await?;
///
/// let pong = client.send(Action::ping()).await?;
/// assert_eq!(pong.key("Ping"), Some("Pong"));
///
/// client
///     .add_listener(
///         |_, _, event| event.is("Hangup"),
///         |source, _, event| println!("[{}] hangup on {:?}", source, event.key("Channel")),
///         ListenerOptions::default(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AmiClient {
    mailbox: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    source: Arc<str>,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

impl AmiClient {
    /// Spawn the connection task and return a handle to it.
    ///
    /// Resolution starts immediately. Fails with [`AmiError::InvalidConfig`]
    /// for settings that could never log in (see [`AmiConfig::validate`]).
    /// Must be called from within a tokio runtime.
    pub fn start(config: AmiConfig) -> AmiResult<Self> {
        config.validate()?;
        let source: Arc<str> = config
            .source()
            .into();
        let (mailbox, mailbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, link_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let (retired_tx, retired_rx) = mpsc::unbounded_channel();

        let actor = ConnectionActor {
            source: source.to_string(),
            config,
            state: ConnectionState::Disconnected,
            state_tx,
            generation: 0,
            link_task: None,
            outbound: None,
            writer_task: None,
            framer: LineFramer::new(),
            correlation: CorrelationTable::new(),
            listeners: ListenerRegistry::new(),
            login_action_id: None,
            reconnect_at: None,
            link_tx,
            retired_tx,
        };
        tokio::spawn(actor.run(mailbox_rx, link_rx, retired_rx));

        Ok(Self {
            mailbox,
            state_rx,
            source,
        })
    }

    /// Connection identifier stamped on every event and response.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self
            .state_rx
            .borrow()
    }

    /// Whether the connection is logged in and accepting actions.
    pub fn is_ready(&self) -> bool {
        self.state()
            .is_ready()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx
            .clone()
    }

    /// Wait until the connection reaches [`ConnectionState::Ready`].
    ///
    /// Returns [`AmiError::Closed`] if the client is closed first. There is
    /// no timeout; wrap in [`tokio::time::timeout`] if needed.
    pub async fn wait_ready(&self) -> AmiResult<()> {
        let mut rx = self
            .state_rx
            .clone();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Closed))
            .await
            .map_err(|_| AmiError::Closed)?;
        match state {
            ConnectionState::Ready => Ok(()),
            _ => Err(AmiError::Closed),
        }
    }

    /// Send an action and wait for its complete response.
    ///
    /// Fails with [`AmiError::NotReady`] unless logged in; nothing is
    /// queued. If the connection drops first the result is
    /// [`AmiError::ConnectionLost`]. There is no timeout on the wait.
    pub async fn send(&self, action: Action) -> AmiResult<Response> {
        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Closed => return Err(AmiError::Closed),
            _ => return Err(AmiError::NotReady),
        }
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Command::Send { action, reply })
            .map_err(|_| AmiError::Closed)?;
        rx.await
            .map_err(|_| AmiError::Closed)?
    }

    /// Register a listener for events that no in-flight action claims.
    ///
    /// `filter` and `callback` receive `(source, listener id, event)` and
    /// run on a spawned task per event, concurrently with other listeners
    /// and with message processing. A panic in either is logged and
    /// contained. Blocking work belongs in `spawn_blocking`.
    pub async fn add_listener<F, C>(
        &self,
        filter: F,
        callback: C,
        options: ListenerOptions,
    ) -> AmiResult<ListenerId>
    where
        F: Fn(&str, &ListenerId, &Event) -> bool + Send + Sync + 'static,
        C: Fn(&str, &ListenerId, &Event) + Send + Sync + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Command::AddListener {
                filter: Arc::new(filter),
                callback: Arc::new(callback),
                options,
                reply,
            })
            .map_err(|_| AmiError::Closed)?;
        rx.await
            .map_err(|_| AmiError::Closed)
    }

    /// Remove a listener. Returns `false` if it was not registered (a `once`
    /// listener that already fired, for example).
    pub async fn del_listener(&self, id: &ListenerId) -> AmiResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Command::DelListener {
                id: id.clone(),
                reply,
            })
            .map_err(|_| AmiError::Closed)?;
        rx.await
            .map_err(|_| AmiError::Closed)
    }

    /// Close the socket and stop the connection task. No further reconnects.
    ///
    /// In-flight actions fail with [`AmiError::Closed`]. Closing twice is
    /// not an error.
    pub async fn close(&self) -> AmiResult<()> {
        info!("Client requested close");
        let (reply, rx) = oneshot::channel();
        if self
            .mailbox
            .send(Command::Close { reply })
            .is_err()
        {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// State owned by the connection task.
struct ConnectionActor {
    config: AmiConfig,
    source: String,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped per connection attempt; link events carrying an older value
    /// are dropped.
    generation: u64,
    /// The connect task, then the reader task, of the current attempt.
    link_task: Option<JoinHandle<()>>,
    /// Serialized actions waiting for the writer task.
    outbound: Option<mpsc::Sender<String>>,
    writer_task: Option<JoinHandle<()>>,
    framer: LineFramer,
    correlation: CorrelationTable,
    listeners: ListenerRegistry,
    login_action_id: Option<String>,
    reconnect_at: Option<Pin<Box<Sleep>>>,
    link_tx: mpsc::Sender<LinkMessage>,
    retired_tx: mpsc::UnboundedSender<ListenerId>,
}

async fn reconnect_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => {
            sleep
                .as_mut()
                .await
        }
        None => pending().await,
    }
}

impl ConnectionActor {
    async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<Command>,
        mut link_rx: mpsc::Receiver<LinkMessage>,
        mut retired_rx: mpsc::UnboundedReceiver<ListenerId>,
    ) {
        self.begin_connect();

        loop {
            tokio::select! {
                command = mailbox.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.shutdown()
                            .await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All client handles dropped, closing");
                        self.shutdown()
                            .await;
                        return;
                    }
                },
                Some((generation, event)) = link_rx.recv() => {
                    if generation != self.generation {
                        trace!("Dropping event from stale connection attempt {}", generation);
                        continue;
                    }
                    self.handle_link_event(event);
                }
                Some(id) = retired_rx.recv() => {
                    if self.listeners.remove(&id) {
                        trace!("[LISTENER] Removed once-listener {}", id);
                    }
                }
                _ = reconnect_timer(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("[STATE] {} -> {}", self.state, state);
        self.state = state;
        self.state_tx
            .send_replace(state);
    }

    /// Start a resolve + connect attempt in the background.
    fn begin_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Resolving);
        info!(
            "[CONNECT] Connecting to {}:{}",
            self.config.host, self.config.port
        );

        let host = self
            .config
            .host
            .clone();
        let port = self.config.port;
        let limit = self
            .config
            .connect_timeout();
        let tls = self
            .config
            .tls
            .clone();
        let tx = self
            .link_tx
            .clone();

        self.link_task = Some(tokio::spawn(async move {
            let addrs = match transport::resolve(&host, port, limit).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    let _ = tx
                        .send((generation, LinkEvent::Failed(e)))
                        .await;
                    return;
                }
            };
            if tx
                .send((generation, LinkEvent::Resolved))
                .await
                .is_err()
            {
                return;
            }
            let event = match transport::connect(&host, &addrs, limit, tls.as_ref()).await {
                Ok((reader, writer)) => LinkEvent::Connected { reader, writer },
                Err(e) => LinkEvent::Failed(e),
            };
            let _ = tx
                .send((generation, event))
                .await;
        }));
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Resolved => self.set_state(ConnectionState::Connecting),
            LinkEvent::Failed(e) => {
                warn!("[CONNECT] Connection attempt failed: {}", e);
                self.link_task = None;
                self.schedule_reconnect();
            }
            LinkEvent::Connected { reader, writer } => {
                debug!("[CONNECT] Connected, waiting for banner");
                let (outbound, frames) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
                self.outbound = Some(outbound);
                self.writer_task = Some(tokio::spawn(write_frames(
                    writer,
                    frames,
                    self.link_tx
                        .clone(),
                    self.generation,
                )));
                self.framer
                    .reset();
                self.link_task = Some(tokio::spawn(read_lines(
                    reader,
                    self.link_tx
                        .clone(),
                    self.generation,
                )));
                self.set_state(ConnectionState::AwaitingSalutation);
            }
            LinkEvent::Line(line) => self.on_line(line),
            LinkEvent::Closed(reason) => self.on_disconnect(reason),
        }
    }

    fn on_line(&mut self, line: String) {
        match self.state {
            ConnectionState::AwaitingSalutation => {
                let banner = line.trim_end();
                if !banner.starts_with(BANNER_PREFIX) {
                    self.on_disconnect(DisconnectReason::ProtocolError(format!(
                        "unexpected banner '{}'",
                        banner
                    )));
                    return;
                }
                info!("[LOGIN] Connected to {}", banner);
                self.login();
            }
            ConnectionState::AwaitingLoginReply | ConnectionState::Ready => {
                match self
                    .framer
                    .feed(&line)
                {
                    Ok(Some(lines)) => self.on_message(lines),
                    Ok(None) => {}
                    Err(e) => warn!("[RECV] Skipping malformed line: {}", e),
                }
            }
            state => trace!("[RECV] Ignoring line while {}", state),
        }
    }

    /// Auto-login: queued straight to the writer, bypassing the Ready gate
    /// that applies to caller actions.
    fn login(&mut self) {
        let action = Action::login(
            &self.config.username,
            &self.config.secret,
            self.config.events,
        );
        let action_id = action
            .id()
            .to_string();
        let wire = match action.to_wire_format() {
            Ok(wire) => wire,
            Err(e) => {
                // Credentials are checked in `AmiClient::start`.
                error!("[LOGIN] Cannot encode login for {}: {}", self.config.username, e);
                self.on_disconnect(DisconnectReason::ProtocolError(e.to_string()));
                return;
            }
        };

        if let Err(e) = self
            .correlation
            .register_internal(&action_id)
        {
            warn!("[LOGIN] Could not track login action: {}", e);
        }
        debug!("[LOGIN] Logging in as {}", self.config.username);

        match self.queue_frame(wire) {
            Ok(()) => {
                self.login_action_id = Some(action_id);
                self.set_state(ConnectionState::AwaitingLoginReply);
            }
            Err(reason) => {
                self.correlation
                    .forget(&action_id);
                self.on_disconnect(reason);
            }
        }
    }

    /// Hand a serialized action to the writer task. Never waits on the
    /// socket; a full queue means the peer stopped reading.
    fn queue_frame(&mut self, frame: String) -> Result<(), DisconnectReason> {
        let Some(outbound) = self
            .outbound
            .as_ref()
        else {
            return Err(DisconnectReason::IoError("not connected".to_string()));
        };
        match outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DisconnectReason::WriteStalled),
            Err(TrySendError::Closed(_)) => {
                Err(DisconnectReason::IoError("writer stopped".to_string()))
            }
        }
    }

    fn on_message(&mut self, lines: Vec<String>) {
        let message = classify(&self.source, &lines);
        trace!(
            "[RECV] Message for action {:?}, {} in flight",
            message.action_id(),
            self.correlation
                .len()
        );

        match self
            .correlation
            .on_message(message)
        {
            Correlated::Completed(response) => {
                if self.login_action_id.as_deref() == Some(response.action_id()) {
                    self.on_login_reply(response);
                }
            }
            Correlated::Delivered { action_id } => {
                trace!("[RECV] Delivered response for {}", action_id)
            }
            Correlated::Unclaimed(event) => {
                let spawned = self
                    .listeners
                    .dispatch(event, &self.retired_tx);
                trace!("[RECV] Event dispatched to {} listeners", spawned);
            }
            Correlated::Pending | Correlated::Orphan => {}
        }
    }

    /// The connection becomes Ready whether or not the login succeeded.
    fn on_login_reply(&mut self, response: Response) {
        self.login_action_id = None;
        if response.is_success() {
            info!("[LOGIN] Logged in as {}", self.config.username);
        } else {
            warn!(
                "[LOGIN] Login rejected for {}: {}",
                self.config.username,
                response
                    .message()
                    .unwrap_or("no message")
            );
        }
        self.set_state(ConnectionState::Ready);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { action, reply } => self.send_action(action, reply),
            Command::AddListener {
                filter,
                callback,
                options,
                reply,
            } => {
                let id = self
                    .listeners
                    .add(filter, callback, options);
                debug!(
                    "[LISTENER] Added {}, {} registered",
                    id,
                    self.listeners
                        .len()
                );
                let _ = reply.send(id);
            }
            Command::DelListener { id, reply } => {
                let removed = self
                    .listeners
                    .remove(&id);
                let _ = reply.send(removed);
            }
            Command::Close { reply } => {
                // Handled by the run loop; kept exhaustive.
                let _ = reply.send(());
            }
        }
    }

    fn send_action(&mut self, action: Action, reply: oneshot::Sender<AmiResult<Response>>) {
        if !self.state.is_ready() {
            let _ = reply.send(Err(AmiError::NotReady));
            return;
        }
        let wire = match action.to_wire_format() {
            Ok(wire) => wire,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        if self
            .correlation
            .contains(action.id())
        {
            let _ = reply.send(Err(AmiError::DuplicateActionId {
                action_id: action
                    .id()
                    .to_string(),
            }));
            return;
        }

        debug!("[SEND] {} ({})", action.name(), action.id());
        if let Err(e) = self
            .correlation
            .register(action.id(), reply)
        {
            warn!("[SEND] Could not track action: {}", e);
            return;
        }
        if let Err(reason) = self.queue_frame(wire) {
            // Fails the action just registered along with every other one.
            self.on_disconnect(reason);
        }
    }

    /// Drop the socket, fail in-flight actions and schedule a reconnect.
    fn on_disconnect(&mut self, reason: DisconnectReason) {
        match &reason {
            DisconnectReason::ConnectionClosed => info!("[CONNECT] Connection closed by peer"),
            _ => warn!("[CONNECT] Connection lost: {}", reason),
        }
        self.teardown_link();
        self.correlation
            .fail_all(|| AmiError::ConnectionLost);
        self.schedule_reconnect();
    }

    fn teardown_link(&mut self) {
        // Invalidate anything the old tasks already queued.
        self.generation += 1;
        if let Some(task) = self
            .link_task
            .take()
        {
            task.abort();
        }
        if let Some(task) = self
            .writer_task
            .take()
        {
            task.abort();
        }
        self.outbound = None;
        self.framer
            .reset();
        self.login_action_id = None;
    }

    fn schedule_reconnect(&mut self) {
        let delay = self
            .config
            .reconnect_delay();
        info!("[CONNECT] Reconnecting in {}ms", delay.as_millis());
        self.set_state(ConnectionState::Disconnected);
        self.reconnect_at = Some(Box::pin(sleep(delay)));
    }

    async fn shutdown(&mut self) {
        // Dropping the queue lets the writer flush and shut the socket down.
        self.outbound = None;
        let writer_task = self
            .writer_task
            .take();
        self.teardown_link();
        if let Some(mut task) = writer_task {
            let limit = self
                .config
                .connect_timeout();
            if timeout(limit, &mut task)
                .await
                .is_err()
            {
                debug!("Timed out flushing the socket, dropping it");
                task.abort();
            }
        }
        self.correlation
            .fail_all(|| AmiError::Closed);
        self.reconnect_at = None;
        self.set_state(ConnectionState::Closed);
        info!("Connection to {} closed", self.source);
    }
}

/// Drain queued frames onto the socket, off the connection task.
async fn write_frames(
    mut writer: TransportWriter,
    mut frames: mpsc::Receiver<String>,
    link: mpsc::Sender<LinkMessage>,
    generation: u64,
) {
    while let Some(frame) = frames
        .recv()
        .await
    {
        if let Err(e) = writer
            .send(frame.as_bytes())
            .await
        {
            let reason = DisconnectReason::IoError(e.to_string());
            let _ = link
                .send((generation, LinkEvent::Closed(reason)))
                .await;
            return;
        }
    }
    writer
        .close()
        .await;
}

/// Forward lines from the socket one at a time. The bounded link channel
/// holds the next read until the connection task has taken the previous line.
async fn read_lines(mut reader: LineReader, tx: mpsc::Sender<LinkMessage>, generation: u64) {
    loop {
        let event = match reader
            .next_line()
            .await
        {
            Ok(Some(line)) => {
                trace!("[RECV] {:?}", line);
                LinkEvent::Line(line)
            }
            Ok(None) => LinkEvent::Closed(DisconnectReason::ConnectionClosed),
            Err(AmiError::ProtocolError { message }) => {
                LinkEvent::Closed(DisconnectReason::ProtocolError(message))
            }
            Err(e) => LinkEvent::Closed(DisconnectReason::IoError(e.to_string())),
        };
        let done = matches!(event, LinkEvent::Closed(_));
        if tx
            .send((generation, event))
            .await
            .is_err()
            || done
        {
            return;
        }
    }
}
