//! libp2p gossipsub swarm for SSV subnet topics.
//!
//! Messages are validated by the node before gossipsub forwards them, and
//! every peer is scored with parameters derived from the validator
//! population. The swarm runs on its own task and is driven through
//! [`GossipHandle`], so the rest of the node does not touch libp2p types
//! beyond peer ids and addresses.

use crate::delivery::DeliveryBook;
use crate::inspector::{PeerScoreSource, TopicParamsRefresh};
use crate::topics::params::{peer_score_thresholds, ScoringConfig, DEFAULT_MESH_D};
use crate::topics::scoring::PeerScoreSnapshot;
use crate::topics::tracer::{PubsubTracer, TraceEventKind};
use crate::topics::{subnet_topic_name, TopicScoreFactory, DEFAULT_SUBNETS};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, MessageAcceptance, PeerScoreParams};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::{identify, identity, noise, ping, tcp, yamux, Multiaddr, PeerId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_P2P_PORT: u16 = 13001;

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Addresses to listen on; defaults to all interfaces on [`DEFAULT_P2P_PORT`].
    pub listen_addresses: Vec<Multiaddr>,
    pub bootstrap_peers: Vec<Multiaddr>,
    /// Topics subscribed at startup.
    pub topics: Vec<String>,
    /// Optional deterministic identity. If `None`, a new Ed25519 keypair is generated.
    pub identity_keypair: Option<identity::Keypair>,
    pub protocol_version: String,
    pub agent_version: String,
    pub heartbeat_interval: Duration,
    /// How often topic score parameters are re-derived from validator statistics.
    pub topic_params_refresh: Duration,
    pub scoring: ScoringConfig,
}

impl Default for GossipConfig {
    fn default() -> Self {
        let scoring = ScoringConfig::default();
        Self {
            listen_addresses: vec![tcp_listen_address(Ipv4Addr::UNSPECIFIED, DEFAULT_P2P_PORT)],
            bootstrap_peers: Vec::new(),
            topics: (0..DEFAULT_SUBNETS).map(subnet_topic_name).collect(),
            identity_keypair: None,
            protocol_version: "/ssv/1.0.0".to_string(),
            agent_version: format!("ssv-network/{}", env!("CARGO_PKG_VERSION")),
            heartbeat_interval: Duration::from_millis(700),
            topic_params_refresh: scoring.one_epoch_duration,
            scoring,
        }
    }
}

pub fn tcp_listen_address(ip: Ipv4Addr, port: u16) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4(ip))
        .with(Protocol::Tcp(port))
}

/// Verdict on an incoming gossip message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// Deliver and forward.
    Accept,
    /// Drop and penalise the propagating peer.
    Reject,
    /// Drop without penalty.
    Ignore,
}

impl From<ValidationResult> for MessageAcceptance {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::Accept => MessageAcceptance::Accept,
            ValidationResult::Reject => MessageAcceptance::Reject,
            ValidationResult::Ignore => MessageAcceptance::Ignore,
        }
    }
}

/// Decides whether a received message may be forwarded.
pub trait GossipValidator: Send + Sync {
    fn validate(&self, source: &PeerId, topic: &str, data: &[u8]) -> ValidationResult;
}

/// Commands used to control the background swarm task.
#[derive(Debug)]
pub enum GossipCommand {
    Publish { topic: String, data: Vec<u8> },
    Dial { address: Multiaddr },
    /// Snapshot the score of every known peer.
    PeerScores {
        reply: oneshot::Sender<HashMap<PeerId, PeerScoreSnapshot>>,
    },
    /// Re-derive topic score parameters now.
    RefreshTopicParams,
    Shutdown,
}

/// Events produced by the gossip network.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    /// Accepted gossip payload.
    Message {
        peer: PeerId,
        topic: String,
        data: Vec<u8>,
    },
    PeerConnected { peer: PeerId },
    PeerDisconnected { peer: PeerId },
    NewListenAddr { address: Multiaddr },
}

#[derive(NetworkBehaviour)]
struct ComposedBehaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

impl ComposedBehaviour {
    fn new(
        local_key: &identity::Keypair,
        config: &GossipConfig,
        score_params: PeerScoreParams,
    ) -> Result<Self> {
        let message_id_fn = |message: &gossipsub::Message| {
            let digest = blake3::hash(&message.data);
            gossipsub::MessageId::from(&digest.as_bytes()[..20])
        };

        let gossip_config = gossipsub::ConfigBuilder::default()
            .message_id_fn(message_id_fn)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .validate_messages()
            .heartbeat_interval(config.heartbeat_interval)
            .mesh_n(DEFAULT_MESH_D)
            .mesh_n_low(DEFAULT_MESH_D - 2)
            .mesh_n_high(DEFAULT_MESH_D + 4)
            .build()
            .map_err(|err| anyhow!("failed to build gossipsub config: {err}"))?;

        let mut gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(local_key.clone()),
            gossip_config,
        )
        .map_err(|err| anyhow!("failed to construct gossipsub behaviour: {err}"))?;
        gossipsub
            .with_peer_score(score_params, peer_score_thresholds(&config.scoring))
            .map_err(|err| anyhow!("failed to enable peer scoring: {err}"))?;

        let identify = identify::Behaviour::new(
            identify::Config::new(config.protocol_version.clone(), local_key.public())
                .with_agent_version(config.agent_version.clone()),
        );

        Ok(Self {
            gossipsub,
            identify,
            ping: ping::Behaviour::default(),
        })
    }
}

/// Cloneable access to the running swarm.
#[derive(Clone)]
pub struct GossipHandle {
    command_tx: mpsc::UnboundedSender<GossipCommand>,
    connected: Arc<RwLock<HashSet<PeerId>>>,
    score_params: Arc<RwLock<PeerScoreParams>>,
}

impl GossipHandle {
    fn send(&self, command: GossipCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| anyhow!("gossip swarm command channel closed"))
    }

    pub fn publish<T: Into<String>>(&self, topic: T, data: Vec<u8>) -> Result<()> {
        self.send(GossipCommand::Publish {
            topic: topic.into(),
            data,
        })
    }

    pub fn dial(&self, address: Multiaddr) -> Result<()> {
        self.send(GossipCommand::Dial { address })
    }

    pub fn refresh_topic_params(&self) -> Result<()> {
        self.send(GossipCommand::RefreshTopicParams)
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected.read().contains(peer)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.read().iter().copied().collect()
    }

    /// Predicate suitable for the score inspector.
    pub fn connection_checker(&self) -> impl Fn(&PeerId) -> bool + Send + Sync + 'static {
        let connected = self.connected.clone();
        move |peer| connected.read().contains(peer)
    }

    /// Score parameters currently installed in the engine.
    pub fn score_params(&self) -> Arc<RwLock<PeerScoreParams>> {
        self.score_params.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(GossipCommand::Shutdown);
    }
}

impl TopicParamsRefresh for GossipHandle {
    fn refresh_topic_params(&self) -> Result<()> {
        GossipHandle::refresh_topic_params(self)
    }
}

#[async_trait]
impl PeerScoreSource for GossipHandle {
    async fn peer_scores(&self) -> Result<HashMap<PeerId, PeerScoreSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(GossipCommand::PeerScores { reply })?;
        rx.await
            .map_err(|_| anyhow!("gossip swarm dropped peer score request"))
    }
}

/// Owner of the swarm task.
pub struct GossipNetwork {
    peer_id: PeerId,
    handle: GossipHandle,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<GossipEvent>>>>,
    listen_addresses: Arc<RwLock<HashSet<Multiaddr>>>,
    _task: JoinHandle<()>,
}

impl GossipNetwork {
    /// Build the swarm, subscribe to the configured topics and spawn the
    /// background task.
    pub fn new(
        config: GossipConfig,
        validator: Arc<dyn GossipValidator>,
        factory: TopicScoreFactory,
        tracer: Arc<PubsubTracer>,
    ) -> Result<Self> {
        let keypair = config
            .identity_keypair
            .clone()
            .unwrap_or_else(identity::Keypair::generate_ed25519);
        let peer_id = PeerId::from(keypair.public());
        info!(%peer_id, "initialising gossip network");

        let initial_params = factory.peer_score_params(&config.scoring, &config.topics);
        info!(
            scored_topics = initial_params.topics.len(),
            topics = config.topics.len(),
            "derived topic score params"
        );
        let score_params = Arc::new(RwLock::new(initial_params.clone()));

        let behaviour_config = config.clone();
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key| {
                ComposedBehaviour::new(key, &behaviour_config, initial_params)
                    .map_err(Box::<dyn std::error::Error + Send + Sync>::from)
            })?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let mut topics = HashMap::new();
        for name in &config.topics {
            let topic = IdentTopic::new(name.as_str());
            if let Err(err) = swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                warn!(topic = %name, error = %err, "failed to subscribe to gossip topic");
                continue;
            }
            tracer.trace(TraceEventKind::Join);
            topics.insert(name.clone(), topic);
        }

        let listen_addresses = Arc::new(RwLock::new(HashSet::new()));
        let listen_addrs = if config.listen_addresses.is_empty() {
            vec![tcp_listen_address(Ipv4Addr::UNSPECIFIED, DEFAULT_P2P_PORT)]
        } else {
            config.listen_addresses.clone()
        };
        for addr in listen_addrs {
            match swarm.listen_on(addr.clone()) {
                Ok(_) => {
                    listen_addresses.write().insert(addr);
                }
                Err(err) => warn!(%addr, error = %err, "failed to listen"),
            }
        }

        for address in &config.bootstrap_peers {
            if let Err(err) = swarm.dial(address.clone()) {
                warn!(%address, error = %err, "failed to dial bootstrap peer");
            }
        }

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<GossipCommand>();
        let (event_tx, events_rx) = mpsc::unbounded_channel::<GossipEvent>();
        let connected = Arc::new(RwLock::new(HashSet::new()));

        let handle = GossipHandle {
            command_tx,
            connected: connected.clone(),
            score_params: score_params.clone(),
        };

        let decay_interval = score_params.read().decay_interval;
        let mut state = SwarmState {
            swarm,
            topics,
            book: DeliveryBook::new(),
            score_params,
            factory,
            scoring: config.scoring.clone(),
            validator,
            tracer,
            event_tx,
            connected,
            listen_addresses: listen_addresses.clone(),
        };

        let refresh_period = config.topic_params_refresh;
        let task = tokio::spawn(async move {
            let mut decay_ticker = interval(decay_interval);
            decay_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut refresh_ticker = interval(refresh_period);
            refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    swarm_event = state.swarm.select_next_some() => {
                        state.handle_swarm_event(swarm_event);
                    }
                    _ = decay_ticker.tick() => state.decay(),
                    _ = refresh_ticker.tick() => state.refresh_topic_params(),
                    cmd = command_rx.recv() => {
                        match cmd {
                            Some(GossipCommand::Shutdown) | None => {
                                debug!("shutting down gossip swarm");
                                break;
                            }
                            Some(command) => state.handle_command(command),
                        }
                    }
                }
            }
            info!("gossip swarm task terminated");
        });

        Ok(Self {
            peer_id,
            handle,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
            listen_addresses,
            _task: task,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn handle(&self) -> GossipHandle {
        self.handle.clone()
    }

    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen_addresses.read().iter().cloned().collect()
    }

    /// Acquire the event receiver stream. Subsequent calls return `None`.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<GossipEvent>> {
        self.events_rx.lock().take()
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl Drop for GossipNetwork {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

struct SwarmState {
    swarm: Swarm<ComposedBehaviour>,
    topics: HashMap<String, IdentTopic>,
    book: DeliveryBook,
    score_params: Arc<RwLock<PeerScoreParams>>,
    factory: TopicScoreFactory,
    scoring: ScoringConfig,
    validator: Arc<dyn GossipValidator>,
    tracer: Arc<PubsubTracer>,
    event_tx: mpsc::UnboundedSender<GossipEvent>,
    connected: Arc<RwLock<HashSet<PeerId>>>,
    listen_addresses: Arc<RwLock<HashSet<Multiaddr>>>,
}

impl SwarmState {
    fn handle_swarm_event(&mut self, event: SwarmEvent<ComposedBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(ComposedBehaviourEvent::Gossipsub(event)) => {
                self.handle_gossipsub_event(event)
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                if num_established.get() == 1 {
                    self.connected.write().insert(peer_id);
                    self.book.peer_connected(&peer_id);
                    self.tracer.trace(TraceEventKind::AddPeer);
                    let _ = self.event_tx.send(GossipEvent::PeerConnected { peer: peer_id });
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    self.connected.write().remove(&peer_id);
                    self.book.peer_disconnected(peer_id);
                    self.tracer.trace(TraceEventKind::RemovePeer);
                    let _ = self
                        .event_tx
                        .send(GossipEvent::PeerDisconnected { peer: peer_id });
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "gossip listening");
                self.listen_addresses.write().insert(address.clone());
                let _ = self.event_tx.send(GossipEvent::NewListenAddr { address });
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(peer = ?peer_id, error = %error, "outgoing connection failed");
            }
            _ => {}
        }
    }

    fn handle_gossipsub_event(&mut self, event: gossipsub::Event) {
        match event {
            gossipsub::Event::Message {
                propagation_source,
                message_id,
                message,
            } => {
                self.tracer.trace(TraceEventKind::RecvRpc);
                let topic = message.topic.as_str().to_string();
                let result = self
                    .validator
                    .validate(&propagation_source, &topic, &message.data);

                let _ = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .report_message_validation_result(
                        &message_id,
                        &propagation_source,
                        result.into(),
                    );

                match result {
                    ValidationResult::Accept => {
                        self.book.record_delivery(propagation_source, &topic);
                        self.tracer.trace(TraceEventKind::DeliverMessage);
                        let _ = self.event_tx.send(GossipEvent::Message {
                            peer: propagation_source,
                            topic,
                            data: message.data,
                        });
                    }
                    ValidationResult::Reject => {
                        self.book.record_invalid(propagation_source, &topic);
                        self.tracer.trace(TraceEventKind::RejectMessage);
                    }
                    ValidationResult::Ignore => {
                        debug!(peer = %propagation_source, %topic, "ignored gossip message");
                    }
                }
            }
            other => self.tracer.trace_gossipsub(&other),
        }
    }

    fn handle_command(&mut self, command: GossipCommand) {
        match command {
            GossipCommand::Publish { topic, data } => {
                let ident = match self.topics.get(&topic) {
                    Some(ident) => ident.clone(),
                    None => {
                        let ident = IdentTopic::new(topic.as_str());
                        if let Err(err) = self.swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                            warn!(%topic, error = %err, "failed to subscribe to dynamic topic");
                        }
                        self.topics.insert(topic.clone(), ident.clone());
                        ident
                    }
                };
                match self.swarm.behaviour_mut().gossipsub.publish(ident, data) {
                    Ok(_) => self.tracer.trace(TraceEventKind::PublishMessage),
                    Err(err) => warn!(%topic, error = %err, "failed to publish gossip"),
                }
            }
            GossipCommand::Dial { address } => {
                if let Err(err) = self.swarm.dial(address.clone()) {
                    warn!(%address, error = %err, "failed to dial");
                }
            }
            GossipCommand::PeerScores { reply } => {
                let _ = reply.send(self.peer_scores());
            }
            GossipCommand::RefreshTopicParams => self.refresh_topic_params(),
            GossipCommand::Shutdown => {}
        }
    }

    fn peer_scores(&self) -> HashMap<PeerId, PeerScoreSnapshot> {
        let gossipsub = &self.swarm.behaviour().gossipsub;
        let mut peers = self.book.peers();
        peers.extend(self.connected.read().iter().copied());

        peers
            .into_iter()
            .map(|peer| {
                let score = gossipsub.peer_score(&peer).unwrap_or_default();
                (peer, self.book.snapshot(&peer, score))
            })
            .collect()
    }

    fn decay(&mut self) {
        for (name, topic) in &self.topics {
            let mesh: HashSet<PeerId> = self
                .swarm
                .behaviour()
                .gossipsub
                .mesh_peers(&topic.hash())
                .copied()
                .collect();
            let changes = self.book.update_mesh(name, &mesh);
            for _ in &changes.grafted {
                self.tracer.trace(TraceEventKind::Graft);
            }
            for _ in &changes.pruned {
                self.tracer.trace(TraceEventKind::Prune);
            }
        }
        self.book.decay(&self.score_params.read());
    }

    fn refresh_topic_params(&mut self) {
        let mut refreshed = 0;
        for (name, topic) in &self.topics {
            let Some(params) = self.factory.topic_score_params(name) else {
                continue;
            };
            if let Err(err) = self
                .swarm
                .behaviour_mut()
                .gossipsub
                .set_topic_params(topic.clone(), params.clone())
            {
                warn!(topic = %name, error = %err, "failed to set topic score params");
                continue;
            }
            self.score_params.write().topics.insert(topic.hash(), params);
            refreshed += 1;
        }
        debug!(
            refreshed,
            topics = self.topics.len(),
            topic_score_cap = self.scoring.topic_score_cap,
            "refreshed topic score params"
        );
    }
}
