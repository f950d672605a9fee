//! Kademlia-backed record store

use crate::transport::{build_transport, AddressFilter};
use crate::{BootstrapNodes, DhtConfig, DhtIdentity, NetworkError, NetworkResult, RecordStore};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::kad::{self, store::MemoryStore, store::MemoryStoreConfig, QueryId, QueryResult};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{dial_opts::DialOpts, ConnectionId, NetworkBehaviour, SwarmEvent};
use libp2p::{identify, identity::Keypair, Multiaddr, PeerId, StreamProtocol, Swarm};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Kademlia protocol name used by blockswap nodes
pub const KAD_PROTOCOL: &str = "/blockswap/kad/1.0.0";

/// Identify protocol version advertised by blockswap nodes
pub const IDENTIFY_PROTOCOL: &str = "/blockswap/id/1.0.0";

#[derive(NetworkBehaviour)]
pub struct DhtBehaviour {
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

impl DhtBehaviour {
    fn new(keypair: &Keypair, config: &DhtConfig) -> Self {
        let peer_id = keypair.public().to_peer_id();

        let mut kad_config = kad::Config::new(StreamProtocol::new(KAD_PROTOCOL));
        kad_config.set_query_timeout(config.query_timeout);
        kad_config.set_record_ttl(config.record_ttl);

        let store = MemoryStore::with_config(
            peer_id,
            MemoryStoreConfig {
                max_records: 64 * 1024,
                max_value_bytes: 256 * 1024,
                ..Default::default()
            },
        );
        let mut kademlia = kad::Behaviour::with_config(peer_id, store, kad_config);
        // Every node answers queries, including ones behind NAT on a LAN
        kademlia.set_mode(Some(kad::Mode::Server));

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            keypair.public(),
        ));

        Self { kademlia, identify }
    }
}

#[derive(Debug)]
enum DhtCommand {
    Get {
        key: kad::RecordKey,
        reply: oneshot::Sender<NetworkResult<Option<Vec<u8>>>>,
    },
    GetCopies {
        key: kad::RecordKey,
        reply: oneshot::Sender<NetworkResult<Vec<Vec<u8>>>>,
    },
    Put {
        key: kad::RecordKey,
        value: Vec<u8>,
        reply: oneshot::Sender<NetworkResult<()>>,
    },
    Bootstrap {
        reply: oneshot::Sender<NetworkResult<()>>,
    },
    Shutdown,
}

/// Record store backed by a libp2p Kademlia DHT.
///
/// The swarm lives in its own task; this handle talks to it over a
/// command channel. Dropping every handle stops the task.
#[derive(Debug, Clone)]
pub struct KademliaStore {
    command_tx: mpsc::UnboundedSender<DhtCommand>,
    peer_id: PeerId,
    listen_addrs: Vec<Multiaddr>,
    config: DhtConfig,
}

impl KademliaStore {
    /// Start a DHT node listening on `config.listen_address`.
    ///
    /// Returns once the listener is bound. Joining the network is a
    /// separate step, see [`RecordStore::bootstrap`].
    pub async fn spawn(identity: DhtIdentity, config: DhtConfig) -> NetworkResult<Self> {
        let peer_id = identity.peer_id();
        let transport = build_transport(identity.keypair(), &config)?;
        let behaviour = DhtBehaviour::new(identity.keypair(), &config);

        let mut swarm = Swarm::new(
            transport,
            behaviour,
            peer_id,
            libp2p::swarm::Config::with_tokio_executor()
                .with_idle_connection_timeout(config.idle_connection_timeout),
        );

        swarm.listen_on(config.listen_address.clone())?;
        let listen_addr = wait_for_listen_addr(&mut swarm).await?;
        info!(%peer_id, address = %listen_addr, "DHT node listening");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let event_loop = DhtEventLoop {
            swarm,
            command_rx,
            bootstrap_nodes: config.bootstrap_nodes.clone(),
            pending_gets: HashMap::new(),
            pending_copies: HashMap::new(),
            pending_puts: HashMap::new(),
            pending_bootstrap: None,
        };
        tokio::spawn(event_loop.run());

        Ok(Self {
            command_tx,
            peer_id,
            listen_addrs: vec![listen_addr],
            config,
        })
    }

    /// Addresses the DHT listener was bound to
    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    /// First listen address with this node's `/p2p/` suffix, for handing to other nodes
    pub fn bootstrap_address(&self) -> Option<Multiaddr> {
        self.listen_addrs
            .first()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<NetworkResult<T>>) -> DhtCommand,
    ) -> NetworkResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .map_err(|_| NetworkError::RecordStore("DHT node is not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| NetworkError::RecordStore("DHT node dropped the request".to_string()))?
    }
}

#[async_trait]
impl RecordStore for KademliaStore {
    async fn get(&self, key: &str) -> NetworkResult<Option<Vec<u8>>> {
        let key = kad::RecordKey::new(&key);
        self.request(|reply| DhtCommand::Get { key, reply }).await
    }

    /// Collects the local copy and every copy remote peers return until
    /// the lookup finishes
    async fn get_copies(&self, key: &str) -> NetworkResult<Vec<Vec<u8>>> {
        let key = kad::RecordKey::new(&key);
        self.request(|reply| DhtCommand::GetCopies { key, reply })
            .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> NetworkResult<()> {
        let key = kad::RecordKey::new(&key);
        self.request(|reply| DhtCommand::Put { key, value, reply })
            .await
    }

    async fn bootstrap(&self) -> NetworkResult<()> {
        let timeout = self.config.bootstrap_timeout;
        tokio::time::timeout(timeout, self.request(|reply| DhtCommand::Bootstrap { reply }))
            .await
            .map_err(|_| {
                NetworkError::Bootstrap(format!("Bootstrap did not finish within {:?}", timeout))
            })?
    }

    async fn shutdown(&self) {
        // The loop may already be gone
        let _ = self.command_tx.send(DhtCommand::Shutdown);
    }
}

async fn wait_for_listen_addr(swarm: &mut Swarm<DhtBehaviour>) -> NetworkResult<Multiaddr> {
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr { address, .. } => return Ok(address),
            SwarmEvent::ListenerError { error, .. } => return Err(NetworkError::Io(error)),
            SwarmEvent::ListenerClosed { reason, .. } => {
                return Err(NetworkError::Config(format!(
                    "DHT listener closed before it was ready: {:?}",
                    reason
                )))
            }
            _ => {}
        }
    }
}

struct PendingBootstrap {
    reply: oneshot::Sender<NetworkResult<()>>,
    dials: HashSet<ConnectionId>,
    connected: usize,
    query: Option<QueryId>,
}

struct PendingCopies {
    reply: oneshot::Sender<NetworkResult<Vec<Vec<u8>>>>,
    copies: Vec<Vec<u8>>,
}

impl PendingCopies {
    fn add(&mut self, value: Vec<u8>) {
        if !self.copies.contains(&value) {
            self.copies.push(value);
        }
    }
}

struct DhtEventLoop {
    swarm: Swarm<DhtBehaviour>,
    command_rx: mpsc::UnboundedReceiver<DhtCommand>,
    bootstrap_nodes: Vec<Multiaddr>,
    pending_gets: HashMap<QueryId, oneshot::Sender<NetworkResult<Option<Vec<u8>>>>>,
    pending_copies: HashMap<QueryId, PendingCopies>,
    pending_puts: HashMap<QueryId, oneshot::Sender<NetworkResult<()>>>,
    pending_bootstrap: Option<PendingBootstrap>,
}

impl DhtEventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.command_rx.recv() => match command {
                    Some(DhtCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        info!("DHT node stopped");
    }

    fn handle_command(&mut self, command: DhtCommand) {
        match command {
            DhtCommand::Get { key, reply } => {
                let query_id = self.swarm.behaviour_mut().kademlia.get_record(key);
                self.pending_gets.insert(query_id, reply);
            }
            DhtCommand::GetCopies { key, reply } => {
                let query_id = self.swarm.behaviour_mut().kademlia.get_record(key);
                self.pending_copies.insert(
                    query_id,
                    PendingCopies {
                        reply,
                        copies: Vec::new(),
                    },
                );
            }
            DhtCommand::Put { key, value, reply } => {
                let record = kad::Record::new(key, value);
                match self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .put_record(record, kad::Quorum::One)
                {
                    Ok(query_id) => {
                        self.pending_puts.insert(query_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(NetworkError::RecordStore(format!(
                            "Failed to store record locally: {:?}",
                            e
                        ))));
                    }
                }
            }
            DhtCommand::Bootstrap { reply } => self.start_bootstrap(reply),
            DhtCommand::Shutdown => {}
        }
    }

    fn start_bootstrap(&mut self, reply: oneshot::Sender<NetworkResult<()>>) {
        if self.bootstrap_nodes.is_empty() {
            info!("No bootstrap nodes configured, starting a new DHT network");
            let _ = reply.send(Ok(()));
            return;
        }

        let mut dials = HashSet::new();
        for addr in &self.bootstrap_nodes {
            let opts = match BootstrapNodes::peer_id(addr) {
                Some(peer_id) => {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                    DialOpts::peer_id(peer_id)
                        .addresses(vec![addr.clone()])
                        .build()
                }
                None => DialOpts::unknown_peer_id().address(addr.clone()).build(),
            };
            let connection_id = opts.connection_id();
            match self.swarm.dial(opts) {
                Ok(()) => {
                    debug!(address = %addr, "Dialing bootstrap node");
                    dials.insert(connection_id);
                }
                Err(e) => warn!(address = %addr, error = %e, "Failed to dial bootstrap node"),
            }
        }

        if dials.is_empty() {
            let _ = reply.send(Err(NetworkError::Bootstrap(
                "No bootstrap node could be dialed".to_string(),
            )));
            return;
        }

        self.pending_bootstrap = Some(PendingBootstrap {
            reply,
            dials,
            connected: 0,
            query: None,
        });
    }

    /// Move the bootstrap forward once every dial has resolved
    fn advance_bootstrap(&mut self) {
        let ready = matches!(
            &self.pending_bootstrap,
            Some(pending) if pending.dials.is_empty() && pending.query.is_none()
        );
        if !ready {
            return;
        }

        let Some(mut pending) = self.pending_bootstrap.take() else {
            return;
        };

        if pending.connected == 0 {
            let _ = pending.reply.send(Err(NetworkError::Bootstrap(format!(
                "None of the {} bootstrap nodes is reachable",
                self.bootstrap_nodes.len()
            ))));
            return;
        }

        match self.swarm.behaviour_mut().kademlia.bootstrap() {
            Ok(query_id) => {
                pending.query = Some(query_id);
                self.pending_bootstrap = Some(pending);
            }
            Err(e) => {
                let _ = pending
                    .reply
                    .send(Err(NetworkError::Bootstrap(e.to_string())));
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<DhtBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(DhtBehaviourEvent::Kademlia(event)) => {
                self.handle_kad_event(event)
            }
            SwarmEvent::Behaviour(DhtBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in AddressFilter::filter_addresses(info.listen_addrs) {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "DHT node listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                debug!(%peer_id, address = %endpoint.get_remote_address(), "DHT connection established");
                if endpoint.is_dialer() {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, endpoint.get_remote_address().clone());
                }

                if let Some(pending) = self.pending_bootstrap.as_mut() {
                    if pending.dials.remove(&connection_id) {
                        info!(%peer_id, "Connected to bootstrap node");
                        pending.connected += 1;
                    }
                }
                self.advance_bootstrap();
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                error,
                ..
            } => {
                if let Some(pending) = self.pending_bootstrap.as_mut() {
                    if pending.dials.remove(&connection_id) {
                        warn!(error = %error, "Bootstrap node unreachable");
                    }
                }
                self.advance_bootstrap();
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "DHT connection closed");
            }
            _ => {}
        }
    }

    fn handle_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed { id, result, .. } => match result {
                QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(peer_record))) => {
                    if let Some(reply) = self.pending_gets.remove(&id) {
                        let _ = reply.send(Ok(Some(peer_record.record.value)));
                        // First answer wins
                        if let Some(mut query) = self.swarm.behaviour_mut().kademlia.query_mut(&id)
                        {
                            query.finish();
                        }
                    } else if let Some(pending) = self.pending_copies.get_mut(&id) {
                        debug!(query = ?id, from = ?peer_record.peer, "Found a record copy");
                        pending.add(peer_record.record.value);
                    }
                }
                QueryResult::GetRecord(Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord {
                    ..
                })) => {
                    if let Some(reply) = self.pending_gets.remove(&id) {
                        let _ = reply.send(Ok(None));
                    }
                    if let Some(pending) = self.pending_copies.remove(&id) {
                        let _ = pending.reply.send(Ok(pending.copies));
                    }
                }
                QueryResult::GetRecord(Err(e)) => {
                    let timed_out = matches!(e, kad::GetRecordError::Timeout { .. });
                    if !timed_out {
                        debug!(error = %e, "Record lookup found nothing");
                    }

                    if let Some(reply) = self.pending_gets.remove(&id) {
                        let result = if timed_out {
                            Err(NetworkError::Timeout)
                        } else {
                            Ok(None)
                        };
                        let _ = reply.send(result);
                    }
                    if let Some(pending) = self.pending_copies.remove(&id) {
                        // Copies gathered before the deadline still count
                        let result = if timed_out && pending.copies.is_empty() {
                            Err(NetworkError::Timeout)
                        } else {
                            Ok(pending.copies)
                        };
                        let _ = pending.reply.send(result);
                    }
                }
                QueryResult::PutRecord(result) => {
                    if let Some(reply) = self.pending_puts.remove(&id) {
                        if let Err(e) = result {
                            // The record stays in the local store and is republished later
                            warn!(error = %e, "Record not replicated to any peer");
                        }
                        let _ = reply.send(Ok(()));
                    }
                }
                QueryResult::Bootstrap(result) => {
                    let finished = match &result {
                        Ok(ok) => ok.num_remaining == 0,
                        Err(_) => true,
                    };
                    let is_ours = matches!(
                        &self.pending_bootstrap,
                        Some(pending) if pending.query == Some(id)
                    );

                    if finished && is_ours {
                        if let Err(e) = &result {
                            warn!(error = %e, "Kademlia bootstrap query ended early");
                        }
                        if let Some(pending) = self.pending_bootstrap.take() {
                            info!(peers = pending.connected, "DHT bootstrap complete");
                            let _ = pending.reply.send(Ok(()));
                        }
                    }
                }
                other => debug!(query = ?id, result = ?other, "Unhandled query result"),
            },
            kad::Event::RoutingUpdated { peer, .. } => {
                debug!(%peer, "Routing table updated");
            }
            _ => {}
        }
    }
}
