//! # Connection Engine
//!
//! Owns one transport and drives the session state machine:
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHandshake -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! All decoding, dispatch and world-state mutation for a connection happens
//! on a single driver task, so frames are processed strictly in arrival order
//! and the receive keystream never skips a byte. The driver multiplexes the
//! transport, the keep-alive timer, the handshake deadline and the outbound
//! command queue with a biased `select!`; a stop request is always checked
//! first, so no frame read after it reaches the session or the dispatcher.
//!
//! Every failure that ends a connection is reported exactly once through
//! [`EventKind::Error`](crate::protocol::dispatcher::EventKind::Error) and
//! returned from [`Connection::closed`]. Nothing is retried: a terminal
//! `Disconnected` state needs an explicit new [`Connection::start`].

use crate::config::ClientConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::{
    ClanChatMessage, Control, Disconnect, GameChatMessage, GameData, KeepAlive, Packet,
};
use crate::core::registry::Registry;
use crate::core::rng::JavaRandom;
use crate::core::transform::{KeystreamFactory, TransformFactory};
use crate::error::{constants, ErrorKind, ErrorReport, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Event, PlayerReady};
use crate::protocol::handshake::{Established, Handshake, Verdict};
use crate::session::{
    EntityId, EntityKind, Session, SnapshotPublisher, SnapshotReader, WorldSnapshot,
};
use crate::transport::udp::UdpConnector;
use crate::transport::{Connector, Transport};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::utils::timeout::with_timeout_named;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, instrument, trace, warn};

/// Outbound requests that may wait for the driver.
const COMMAND_QUEUE: usize = 64;

/// Account id sent by clients without a profile.
const GUEST_ACCOUNT_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the last run ended.
#[derive(Debug, Clone)]
pub enum Termination {
    /// `stop()`, or the connection handle was dropped.
    Stopped,
    /// The server sent a disconnect.
    ServerDisconnect,
    Failed(ProtocolError),
}

impl Termination {
    pub fn error(&self) -> Option<&ProtocolError> {
        match self {
            Termination::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Steering input for [`Connection::send_control`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Steering {
    /// Radians.
    pub angle: f32,
    /// `0.0..=1.0`.
    pub speed: f32,
    pub flags: u8,
    pub aspect_ratio: f32,
}

impl Default for Steering {
    fn default() -> Self {
        Self {
            angle: 0.0,
            speed: 0.0,
            flags: 0,
            aspect_ratio: 1.0,
        }
    }
}

enum Outbound {
    Packet(Packet),
    Control(Steering),
    GameChat(String),
    ClanChat(String),
}

struct Command {
    outbound: Outbound,
    reply: oneshot::Sender<Result<()>>,
}

/// Everything a run needs that outlives it.
struct Shared {
    config: ClientConfig,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    connector: Box<dyn Connector>,
    transforms: Box<dyn TransformFactory>,
    metrics: Arc<Metrics>,
    state: watch::Sender<ConnectionState>,
    termination: watch::Sender<Option<Termination>>,
    snapshots: SnapshotPublisher,
}

impl Shared {
    async fn set_state(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(%from, %to, "Connection state changed");
            self.dispatcher
                .dispatch(Event::StateChanged { from, to })
                .await;
        }
    }

    async fn dispatch(&self, event: Event) -> Event {
        self.dispatcher.dispatch(event).await
    }
}

struct RunHandle {
    commands: mpsc::Sender<Command>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct Runner {
    rng: JavaRandom,
    active: Option<RunHandle>,
}

/// Builder for [`Connection`].
pub struct ConnectionBuilder {
    config: ClientConfig,
    dispatcher: Dispatcher,
    connector: Option<Box<dyn Connector>>,
    registry: Option<Registry>,
    transforms: Box<dyn TransformFactory>,
    seed: Option<i64>,
}

impl ConnectionBuilder {
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Replace the standard packet set.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the session transform scheme (keystream by default).
    pub fn transforms(mut self, factory: impl TransformFactory + 'static) -> Self {
        self.transforms = Box::new(factory);
        self
    }

    /// Fix the seed of the generator behind client ids, handshake seeds and
    /// aliases. Random by default.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Connection> {
        self.config.validate_strict()?;
        let connector = self
            .connector
            .ok_or_else(|| ProtocolError::ConfigError("No connector configured".into()))?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => Registry::standard()?,
        };
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (termination, _) = watch::channel(Some(Termination::Stopped));

        Ok(Connection {
            shared: Arc::new(Shared {
                config: self.config,
                registry: Arc::new(registry),
                dispatcher: self.dispatcher,
                connector,
                transforms: self.transforms,
                metrics: Arc::new(Metrics::new()),
                state,
                termination,
                snapshots: crate::session::publisher(),
            }),
            runner: Mutex::new(Runner {
                rng: JavaRandom::new(self.seed.unwrap_or_else(rand::random)),
                active: None,
            }),
        })
    }
}

/// One logical game client.
pub struct Connection {
    shared: Arc<Shared>,
    runner: Mutex<Runner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.shared.config.server.address)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub fn builder(config: ClientConfig) -> ConnectionBuilder {
        ConnectionBuilder {
            config,
            dispatcher: Dispatcher::new(),
            connector: None,
            registry: None,
            transforms: Box::new(KeystreamFactory),
            seed: None,
        }
    }

    pub fn new(
        config: ClientConfig,
        dispatcher: Dispatcher,
        connector: impl Connector,
    ) -> Result<Self> {
        Self::builder(config)
            .dispatcher(dispatcher)
            .connector(connector)
            .build()
    }

    /// A connection over UDP to the configured server.
    pub fn udp(config: ClientConfig, dispatcher: Dispatcher) -> Result<Self> {
        Self::new(config, dispatcher, UdpConnector::new())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Open the transport and send the connect request.
    ///
    /// Returns once the request is on the wire (`AwaitingHandshake`); the
    /// handshake result arrives asynchronously. Fails with `InvalidState`
    /// unless the connection is `Disconnected`, and with `ConnectionClosed`
    /// when `stop()` cuts the connect short.
    #[instrument(skip(self), fields(address = %self.shared.config.server.address))]
    pub async fn start(&self) -> Result<()> {
        let ready = {
            let mut runner = self.runner.lock().await;
            let state = self.state();
            // A run that has not published its termination is still live,
            // even before its first state change.
            let live = runner.active.is_some() && self.shared.termination.borrow().is_none();
            if state != ConnectionState::Disconnected || live {
                warn!(%state, "{}", constants::ERR_ALREADY_RUNNING);
                return Err(ProtocolError::invalid_state(
                    ConnectionState::Disconnected,
                    state,
                ));
            }
            if let Some(previous) = runner.active.take() {
                if let Err(err) = previous.task.await {
                    warn!(error = %err, "Previous connection task failed");
                }
            }

            let handshake = Handshake::generate(&mut runner.rng);
            self.shared.termination.send_replace(None);

            let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
            let (stop_tx, stop_rx) = oneshot::channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let driver = Driver::new(self.shared.clone(), handshake);
            let task = tokio::spawn(driver.drive(commands_rx, stop_rx, ready_tx));
            runner.active = Some(RunHandle {
                commands: commands_tx,
                stop: Some(stop_tx),
                task,
            });
            ready_rx
        };

        // Not under the lock: `stop()` may interrupt the connect.
        ready.await.map_err(|_| ProtocolError::ConnectionClosed)?
    }

    /// Leave the session: best-effort disconnect frame, keep-alive cancelled,
    /// transport closed. Returns after the driver has finished. A no-op when
    /// nothing is running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut runner = self.runner.lock().await;
        let Some(mut run) = runner.active.take() else {
            return Ok(());
        };
        if let Some(stop) = run.stop.take() {
            let _ = stop.send(());
        }
        run.task
            .await
            .map_err(|e| ProtocolError::TransportError(format!("Connection task failed: {e}")))
    }

    /// Wait until the current run ends. Yields the error that ended it, if any.
    pub async fn closed(&self) -> Result<()> {
        let mut rx = self.shared.termination.subscribe();
        let termination = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?
            .clone();
        match termination {
            Some(Termination::Failed(err)) => Err(err),
            _ => Ok(()),
        }
    }

    /// How the last run ended; `None` while one is in progress.
    pub fn termination(&self) -> Option<Termination> {
        self.shared.termination.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// State changes as a stream, starting with the current state.
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.shared.state.subscribe())
    }

    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        self.shared.snapshots.borrow().clone()
    }

    /// A reader that stays valid across restarts.
    pub fn snapshot_reader(&self) -> SnapshotReader {
        SnapshotReader::new(&self.shared.snapshots)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Queue a packet through the outbound hooks. Requires `Connected`.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.submit(Outbound::Packet(packet)).await
    }

    /// Steer the local player. Ids, tick counter and player index are filled in.
    pub async fn send_control(&self, steering: Steering) -> Result<()> {
        self.submit(Outbound::Control(steering)).await
    }

    pub async fn send_game_chat(&self, message: impl Into<String>) -> Result<()> {
        self.submit(Outbound::GameChat(message.into())).await
    }

    pub async fn send_clan_chat(&self, message: impl Into<String>) -> Result<()> {
        self.submit(Outbound::ClanChat(message.into())).await
    }

    async fn submit(&self, outbound: Outbound) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ProtocolError::invalid_state(ConnectionState::Connected, state));
        }
        let commands = {
            let runner = self.runner.lock().await;
            runner.active.as_ref().map(|run| run.commands.clone())
        }
        .ok_or(ProtocolError::ConnectionClosed)?;

        let (reply, response) = oneshot::channel();
        commands
            .send(Command { outbound, reply })
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        response.await.map_err(|_| ProtocolError::ConnectionClosed)?
    }
}

enum Flow {
    Continue,
    ServerDisconnect,
}

/// Per-run state, owned by the driver task.
struct Driver {
    shared: Arc<Shared>,
    handshake: Handshake,
    codec: PacketCodec,
    transport: Option<Box<dyn Transport>>,
    session: Session,
    ids: Option<Established>,
    server_ip: [u8; 4],
    player_index: Option<u8>,
    steering: Steering,
    control_tick: u8,
    keepalive: Option<Interval>,
    outstanding: u32,
}

async fn recv_frame(transport: &mut Option<Box<dyn Transport>>) -> Result<Option<Bytes>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => Ok(None),
    }
}

/// The game's control counter runs `0..=254`.
fn next_control_tick(tick: u8) -> u8 {
    ((u16::from(tick) + 1) % 0xff) as u8
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Driver {
    fn new(shared: Arc<Shared>, handshake: Handshake) -> Self {
        Self {
            codec: PacketCodec::client(shared.registry.clone()),
            session: Session::with_publisher(shared.snapshots.clone()),
            shared,
            handshake,
            transport: None,
            ids: None,
            server_ip: [0; 4],
            player_index: None,
            steering: Steering::default(),
            control_tick: 0,
            keepalive: None,
            outstanding: 0,
        }
    }

    async fn drive(
        mut self,
        commands: mpsc::Receiver<Command>,
        mut stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let established = tokio::select! {
            biased;
            _ = &mut stop => None,
            result = self.establish() => Some(result),
        };
        let termination = match established {
            None => {
                debug!("Stopped before the connect request was sent");
                let _ = ready.send(Err(ProtocolError::ConnectionClosed));
                Termination::Stopped
            }
            Some(Ok(())) => {
                let _ = ready.send(Ok(()));
                self.run(commands, stop).await
            }
            Some(Err(err)) => {
                let _ = ready.send(Err(err.clone()));
                Termination::Failed(err)
            }
        };
        self.finish(termination).await;
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Open the transport and put the connect request on the wire.
    async fn establish(&mut self) -> Result<()> {
        let _timer = Timer::start("establish");
        let shared = self.shared.clone();
        shared.metrics.handshake_attempt();
        self.shared.set_state(ConnectionState::Connecting).await;

        let server = &shared.config.server;
        let transport =
            with_timeout_named(server.connect_timeout, shared.connector.connect(server), "connect")
                .await?;
        self.server_ip = transport
            .peer_ip()
            .map(KeepAlive::encode_ip)
            .unwrap_or_default();
        self.transport = Some(transport);

        let request = self.handshake.request(&shared.config.session)?;
        debug!(client_id = request.client_id, "Sending connect request");
        self.send_packet(Packet::ConnectRequest(request)).await?;

        self.shared.set_state(ConnectionState::AwaitingHandshake).await;
        Ok(())
    }

    async fn run(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        mut stop: oneshot::Receiver<()>,
    ) -> Termination {
        let deadline = tokio::time::sleep(self.shared.config.server.handshake_timeout);
        tokio::pin!(deadline);

        loop {
            let awaiting = self.state() == ConnectionState::AwaitingHandshake;
            let step = tokio::select! {
                biased;

                _ = &mut stop => return Termination::Stopped,

                frame = recv_frame(&mut self.transport) => match frame {
                    Ok(Some(frame)) => self.on_frame(frame).await,
                    Ok(None) => Err(ProtocolError::TransportError(
                        constants::ERR_TRANSPORT_CLOSED.into(),
                    )),
                    Err(err) => Err(err),
                },

                () = &mut deadline, if awaiting => Err(ProtocolError::TransportError(
                    constants::ERR_HANDSHAKE_TIMEOUT.into(),
                )),

                () = next_tick(&mut self.keepalive) => self.on_keepalive().await,

                Some(command) = commands.recv(), if !awaiting => self.on_command(command).await,
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::ServerDisconnect) => return Termination::ServerDisconnect,
                Err(err) => return Termination::Failed(err),
            }
        }
    }

    async fn on_frame(&mut self, frame: Bytes) -> Result<Flow> {
        self.shared.metrics.frame_received(frame.len());

        let packet = match self.codec.decode_frame(&frame) {
            Ok(packet) => packet,
            Err(ProtocolError::UnknownOpcode { opcode, direction })
                if self.state() == ConnectionState::Connected =>
            {
                self.shared.metrics.unknown_dropped();
                debug!(opcode, %direction, len = frame.len(), "Dropped frame with unknown opcode");
                return Ok(Flow::Continue);
            }
            Err(err) => return Err(err),
        };
        trace!(packet = packet.name(), len = frame.len(), "Received packet");

        match self.state() {
            ConnectionState::AwaitingHandshake => self.on_handshake_packet(packet).await,
            ConnectionState::Connected => self.on_session_packet(packet).await,
            state => {
                debug!(%state, packet = packet.name(), "Ignoring packet");
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_handshake_packet(&mut self, packet: Packet) -> Result<Flow> {
        match packet {
            Packet::ConnectResult(result) => {
                let event = self.shared.dispatch(Event::ConnectResult(result)).await;
                let Event::ConnectResult(result) = event else {
                    return Ok(Flow::Continue);
                };
                match self.handshake.verify(&result)? {
                    Verdict::Accepted(established) => self.on_established(established).await,
                    Verdict::Stale { .. } => Ok(Flow::Continue),
                }
            }
            Packet::Disconnect(disconnect) => {
                self.shared.dispatch(Event::Disconnect(disconnect)).await;
                info!("Server closed the session during handshake");
                Ok(Flow::ServerDisconnect)
            }
            other => {
                debug!(packet = other.name(), "Ignoring packet before handshake result");
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_established(&mut self, established: Established) -> Result<Flow> {
        let (send, recv) = self.shared.transforms.session(established.session_seed);
        self.codec.set_transforms(send, recv);
        self.ids = Some(established);
        self.session = Session::with_publisher(self.shared.snapshots.clone());
        self.outstanding = 0;

        // First ping one interval after the handshake, not immediately.
        let period = self.shared.config.keepalive.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(ticker);

        self.shared.metrics.handshake_success();
        info!(
            public_id = established.public_id,
            game_id = established.game_id,
            seeded = established.session_seed.is_some(),
            "Handshake complete"
        );
        self.shared.set_state(ConnectionState::Connected).await;
        Ok(Flow::Continue)
    }

    async fn on_session_packet(&mut self, packet: Packet) -> Result<Flow> {
        let event = self.shared.dispatch(Event::from_packet(packet)).await;
        let Some(packet) = event.into_packet() else {
            return Ok(Flow::Continue);
        };

        match packet {
            Packet::KeepAliveAck(_) => {
                trace!(outstanding = self.outstanding, "Keep-alive acknowledged");
                self.outstanding = 0;
                self.shared.metrics.keepalive_acked();
            }
            Packet::Disconnect(_) => {
                info!("Server closed the session");
                return Ok(Flow::ServerDisconnect);
            }
            Packet::GameData(data) => self.apply_game_data(&data).await,
            Packet::WorldUpdate(update) => {
                self.session.apply_batch(&update.deltas);
                self.shared.metrics.deltas_applied(update.deltas.len());
            }
            Packet::ConnectResult(_) => debug!("Ignoring repeated handshake result"),
            _ => {}
        }
        Ok(Flow::Continue)
    }

    async fn apply_game_data(&mut self, data: &GameData) {
        let deltas = data.to_deltas();
        self.session.set_map_size(data.map_size);
        self.session.apply_batch(&deltas);
        self.shared.metrics.deltas_applied(deltas.len());

        let Some(player) = data.players.iter().find(|p| p.alias == self.handshake.alias) else {
            debug!(players = data.players.len(), "Local player not in world description");
            return;
        };
        let id = EntityId::namespaced(EntityKind::Player, u32::from(player.player_id));
        let player_index = player.player_id;
        self.session.set_local_player(id);
        self.player_index = Some(player_index);
        info!(player_index, "Local player ready");
        self.shared
            .dispatch(Event::PlayerReady(PlayerReady { id, player_index }))
            .await;
    }

    async fn on_keepalive(&mut self) -> Result<Flow> {
        let threshold = self.shared.config.keepalive.missed_ack_threshold;
        if self.outstanding >= threshold {
            warn!(outstanding = self.outstanding, threshold, "Keep-alive acknowledgements missing");
            return Err(ProtocolError::Timeout);
        }
        let Some(ids) = self.ids else {
            return Ok(Flow::Continue);
        };

        let ping = KeepAlive {
            public_id: ids.public_id,
            private_id: ids.private_id,
            server_ip: self.server_ip,
            client_id: ids.client_id,
            sequence: None,
        };
        self.send_packet(Packet::KeepAlive(ping)).await?;
        self.outstanding += 1;
        self.shared.metrics.keepalive_sent();

        // The game refreshes steering with every ping once it has a player.
        if self.player_index.is_some() {
            let control = self.control(self.steering);
            self.send_packet(Packet::Control(control)).await?;
        }
        Ok(Flow::Continue)
    }

    async fn on_command(&mut self, command: Command) -> Result<Flow> {
        let Command { outbound, reply } = command;
        let result = match self.outbound_packet(outbound) {
            Ok(packet) => self.send_packet(packet).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                let _ = reply.send(Ok(()));
                Ok(Flow::Continue)
            }
            // Rejected before anything reached the wire.
            Err(
                err @ (ProtocolError::InvalidField(_)
                | ProtocolError::UnknownOpcode { .. }
                | ProtocolError::InvalidState { .. }),
            ) => {
                debug!(error = %err, "Outbound packet rejected");
                let _ = reply.send(Err(err));
                Ok(Flow::Continue)
            }
            Err(err) => {
                let _ = reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn outbound_packet(&mut self, outbound: Outbound) -> Result<Packet> {
        let ids = self
            .ids
            .ok_or_else(|| ProtocolError::invalid_state(ConnectionState::Connected, self.state()))?;
        let shared = self.shared.clone();
        let session = &shared.config.session;

        Ok(match outbound {
            Outbound::Packet(packet) => packet,
            Outbound::Control(steering) => {
                self.steering = steering;
                Packet::Control(self.control(steering))
            }
            Outbound::GameChat(message) => Packet::GameChat(GameChatMessage {
                public_id: ids.public_id,
                alias: session.alias.clone(),
                message,
                account_id: GUEST_ACCOUNT_ID,
                unknown: false,
                message_id: 0,
                alias_colors: session.alias_colors.clone(),
                show_broadcast_bubble: false,
                alias_font: session.alias_font,
                client_id: Some(ids.client_id),
                reserved: [false; 2],
            }),
            Outbound::ClanChat(message) => Packet::ClanChat(ClanChatMessage {
                public_id: ids.public_id,
                alias: session.alias.clone(),
                message,
                clan_role: 0,
                account_id: GUEST_ACCOUNT_ID,
                message_id: 0,
                alias_colors: session.alias_colors.clone(),
                client_id: Some(ids.client_id),
                reserved: false,
            }),
        })
    }

    fn control(&mut self, steering: Steering) -> Control {
        self.control_tick = next_control_tick(self.control_tick);
        let ids = self.ids.map_or((0, 0), |ids| (ids.public_id, ids.client_id));
        Control {
            public_id: ids.0,
            angle: steering.angle,
            speed: steering.speed.clamp(0.0, 1.0),
            tick: self.control_tick,
            flags: steering.flags,
            player_index: self.player_index.unwrap_or_default(),
            client_id: ids.1,
            aspect_ratio: steering.aspect_ratio.clamp(0.0, Control::MAX_ASPECT_RATIO),
        }
    }

    /// Run the outbound hooks, encode and write one packet.
    async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        let event = self.shared.dispatch(Event::from_packet(packet)).await;
        let Some(packet) = event.into_packet() else {
            return Ok(());
        };
        let frame = self.codec.encode_packet(&packet)?;
        let len = frame.len();

        let transport = self
            .transport
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;
        with_timeout_named(
            self.shared.config.server.send_timeout,
            transport.send(frame),
            "send",
        )
        .await?;

        self.shared.metrics.frame_sent(len);
        trace!(packet = packet.name(), len, "Sent packet");
        Ok(())
    }

    async fn finish(mut self, termination: Termination) {
        let was = self.state();
        let handshaking = matches!(
            was,
            ConnectionState::Connecting | ConnectionState::AwaitingHandshake
        );
        // The server already ended these sessions; go straight to Disconnected.
        let server_ended = matches!(
            termination,
            Termination::ServerDisconnect
                | Termination::Failed(ProtocolError::HandshakeRejected(_))
        );
        let notify_server = self.transport.is_some()
            && was != ConnectionState::Disconnected
            && !server_ended
            && match &termination {
                Termination::Failed(err) => err.kind() != ErrorKind::Transport,
                _ => true,
            };

        if !server_ended {
            self.shared.set_state(ConnectionState::Disconnecting).await;
        }

        if notify_server {
            let (public_id, private_id, client_id) = self.ids.map_or(
                (0, 0, self.handshake.client_id),
                |ids| (ids.public_id, ids.private_id, ids.client_id),
            );
            let goodbye = Disconnect {
                public_id,
                private_id,
                client_id,
            };
            if let Err(err) = self.send_packet(Packet::Disconnect(goodbye)).await {
                debug!(error = %err, "Best-effort disconnect not sent");
            }
        }

        self.keepalive = None;
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                debug!(error = %err, "Transport close failed");
            }
        }
        self.codec.reset_transforms();
        self.session.clear();

        if let Termination::Failed(err) = &termination {
            if handshaking {
                self.shared.metrics.handshake_failed();
            }
            self.shared.metrics.fatal_error();
            error!(error = %err, kind = %err.kind(), "Connection failed");
            self.shared.dispatch(Event::Error(ErrorReport::from(err))).await;
        }

        self.shared.set_state(ConnectionState::Disconnected).await;
        self.shared.metrics.log_metrics();
        self.shared.termination.send_replace(Some(termination));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_tick_skips_255() {
        assert_eq!(next_control_tick(0), 1);
        assert_eq!(next_control_tick(253), 254);
        assert_eq!(next_control_tick(254), 0);

        let mut tick = 0;
        for _ in 0..600 {
            tick = next_control_tick(tick);
            assert_ne!(tick, 0xff);
        }
    }
}
