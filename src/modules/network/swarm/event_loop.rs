//! Event loop owning the Swarm: routes commands from the node handle and
//! events from the network to the pending-query bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use libp2p::kad::{self, QueryId, RecordKey};
use libp2p::request_response::{self, OutboundRequestId};
use libp2p::swarm::SwarmEvent;
use libp2p::{Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::modules::network::error::PeerError;
use crate::modules::storage::block::{ContentId, ObjectStore};

use super::{NodeBehaviour, NodeBehaviourEvent};

/// Commands sent from the node handle into the event loop.
pub(crate) enum Command {
    /// Publish a provider record; reply when the query settles.
    StartProviding {
        id: ContentId,
        reply: oneshot::Sender<Result<(), String>>,
    },

    /// Stream providers into `found` until the query finishes or `limit`
    /// providers were delivered.
    FindProviders {
        id: ContentId,
        limit: usize,
        found: mpsc::Sender<PeerId>,
    },

    /// Request one block from a peer over the read protocol.
    FetchBlock {
        peer: PeerId,
        id: ContentId,
        reply: oneshot::Sender<Result<Vec<u8>, PeerError>>,
    },

    /// Install the store serving inbound read-protocol requests.
    RegisterBlockSource {
        store: Arc<dyn ObjectStore>,
        ack: oneshot::Sender<()>,
    },

    /// Dial an address; reply once the connection is established.
    Dial {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), String>>,
    },

    /// Feed an address into the DHT routing table.
    AddAddress {
        peer: PeerId,
        addr: Multiaddr,
        ack: oneshot::Sender<()>,
    },

    /// Stop the event loop.
    Shutdown,
}

/// In-flight provider discovery query.
struct ProviderQuery {
    cid: ContentId,
    found: mpsc::Sender<PeerId>,
    sent: HashSet<PeerId>,
    limit: usize,
}

/// The event loop state.
pub(crate) struct SwarmDriver {
    swarm: Swarm<NodeBehaviour>,
    command_rx: mpsc::UnboundedReceiver<Command>,

    /// Store serving inbound read-protocol requests; absent until
    /// registration.
    block_source: Option<Arc<dyn ObjectStore>>,

    /// Pending provider announcements (QueryId → reply).
    pending_provides: HashMap<QueryId, oneshot::Sender<Result<(), String>>>,

    /// Pending provider discoveries (QueryId → streaming state).
    provider_queries: HashMap<QueryId, ProviderQuery>,

    /// Pending outbound block requests.
    pending_fetches: HashMap<OutboundRequestId, oneshot::Sender<Result<Vec<u8>, PeerError>>>,

    /// Dials waiting for an established connection, keyed by peer id.
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), String>>>>,
}

impl SwarmDriver {
    pub(crate) fn new(swarm: Swarm<NodeBehaviour>, command_rx: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            swarm,
            command_rx,
            block_source: None,
            pending_provides: HashMap::new(),
            provider_queries: HashMap::new(),
            pending_fetches: HashMap::new(),
            pending_dials: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Network event loop started");

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            break;
                        }
                    }
                    // All handles dropped; nothing can reach us any more.
                    None => break,
                },
            }
        }

        info!("Network event loop stopped");
    }

    /// Returns `true` when the loop should exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartProviding { id, reply } => {
                let key = RecordKey::new(&id.to_bytes());
                match self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    Ok(query_id) => {
                        debug!(cid = %id, ?query_id, "Provider announcement query started");
                        self.pending_provides.insert(query_id, reply);
                    }
                    Err(e) => {
                        warn!(cid = %id, error = ?e, "Starting provider announcement failed");
                        let _ = reply.send(Err(format!("start providing: {:?}", e)));
                    }
                }
            }

            Command::FindProviders { id, limit, found } => {
                let key = RecordKey::new(&id.to_bytes());
                let query_id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                debug!(cid = %id, ?query_id, limit, "Provider discovery query started");

                self.provider_queries.insert(
                    query_id,
                    ProviderQuery {
                        cid: id,
                        found,
                        sent: HashSet::new(),
                        limit,
                    },
                );
            }

            Command::FetchBlock { peer, id, reply } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .block_read
                    .send_request(&peer, id.clone());
                debug!(cid = %id, %peer, ?request_id, "Block request sent");
                self.pending_fetches.insert(request_id, reply);
            }

            Command::RegisterBlockSource { store, ack } => {
                info!("Block source registered for inbound reads");
                self.block_source = Some(store);
                let _ = ack.send(());
            }

            Command::Dial { addr, reply } => {
                let peer_id = addr.iter().find_map(|p| match p {
                    libp2p::multiaddr::Protocol::P2p(peer_id) => Some(peer_id),
                    _ => None,
                });

                match self.swarm.dial(addr.clone()) {
                    Ok(()) => match peer_id {
                        // Settle once the connection is established.
                        Some(peer) => {
                            self.pending_dials.entry(peer).or_default().push(reply);
                        }
                        None => {
                            let _ = reply.send(Ok(()));
                        }
                    },
                    Err(e) => {
                        warn!(address = %addr, error = %e, "Dial failed");
                        let _ = reply.send(Err(e.to_string()));
                    }
                }
            }

            Command::AddAddress { peer, addr, ack } => {
                self.swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer, addr);
                let _ = ack.send(());
            }

            Command::Shutdown => {
                info!("Shutdown command received");
                return true;
            }
        }

        false
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(NodeBehaviourEvent::Kademlia(event)) => {
                self.handle_kad_event(event);
            }

            SwarmEvent::Behaviour(NodeBehaviourEvent::BlockRead(event)) => {
                self.handle_block_read_event(event).await;
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "Connection established");
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    for reply in waiters {
                        let _ = reply.send(Ok(()));
                    }
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(peer = ?peer_id, error = %error, "Outgoing connection failed");
                if let Some(peer_id) = peer_id {
                    if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                        for reply in waiters {
                            let _ = reply.send(Err(error.to_string()));
                        }
                    }
                }
            }

            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(address = %address, "New listen address");
            }

            other => {
                trace!(event = ?other, "Unhandled swarm event");
            }
        }
    }

    fn handle_kad_event(&mut self, event: kad::Event) {
        use kad::{Event, GetProvidersError, GetProvidersOk, QueryResult};

        match event {
            Event::OutboundQueryProgressed { id, result, .. } => match result {
                QueryResult::StartProviding(Ok(ok)) => {
                    debug!(?id, key = ?ok.key, "Provider announcement settled");
                    if let Some(reply) = self.pending_provides.remove(&id) {
                        let _ = reply.send(Ok(()));
                    }
                }

                QueryResult::StartProviding(Err(err)) => {
                    warn!(?id, key = ?err.key(), "Provider announcement failed");
                    if let Some(reply) = self.pending_provides.remove(&id) {
                        let _ = reply.send(Err(format!("announce failed: {:?}", err)));
                    }
                }

                QueryResult::GetProviders(Ok(GetProvidersOk::FoundProviders {
                    providers, ..
                })) => {
                    let mut reached_limit = false;

                    if let Some(pending) = self.provider_queries.get_mut(&id) {
                        for provider in providers {
                            if pending.sent.len() >= pending.limit {
                                break;
                            }
                            if pending.sent.insert(provider) {
                                trace!(cid = %pending.cid, peer = %provider, "Provider found");
                                // Receiver may already have hung up; the
                                // query completion below cleans us up.
                                let _ = pending.found.try_send(provider);
                            }
                        }
                        reached_limit = pending.sent.len() >= pending.limit;
                    }

                    if reached_limit {
                        debug!(?id, "Provider limit reached, finishing query");
                        if let Some(mut query) =
                            self.swarm.behaviour_mut().kademlia.query_mut(&id)
                        {
                            query.finish();
                        }
                    }
                }

                QueryResult::GetProviders(Ok(
                    GetProvidersOk::FinishedWithNoAdditionalRecord { .. },
                )) => {
                    if let Some(pending) = self.provider_queries.remove(&id) {
                        debug!(
                            cid = %pending.cid,
                            provider_count = pending.sent.len(),
                            "Provider discovery completed"
                        );
                        // Dropping the sender closes the stream.
                    }
                }

                QueryResult::GetProviders(Err(GetProvidersError::Timeout { .. })) => {
                    if let Some(pending) = self.provider_queries.remove(&id) {
                        debug!(
                            cid = %pending.cid,
                            provider_count = pending.sent.len(),
                            "Provider discovery timed out"
                        );
                    }
                }

                QueryResult::Bootstrap(result) => {
                    trace!(?result, "Bootstrap progressed");
                }

                other => {
                    trace!(?other, "Unhandled kademlia query result");
                }
            },

            Event::RoutingUpdated { peer, .. } => {
                trace!(%peer, "Routing table updated");
            }

            other => {
                trace!(?other, "Unhandled kademlia event");
            }
        }
    }

    async fn handle_block_read_event(
        &mut self,
        event: request_response::Event<ContentId, Vec<u8>>,
    ) {
        use request_response::{Event, Message};

        match event {
            Event::Message {
                peer,
                message: Message::Request {
                    request, channel, ..
                },
                ..
            } => {
                debug!(%peer, cid = %request, "Inbound block request");
                self.serve_block(peer, request, channel).await;
            }

            Event::Message {
                message:
                    Message::Response {
                        request_id,
                        response,
                    },
                ..
            } => {
                if let Some(reply) = self.pending_fetches.remove(&request_id) {
                    let _ = reply.send(Ok(response));
                }
            }

            Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                warn!(%peer, ?request_id, error = %error, "Block request failed");
                if let Some(reply) = self.pending_fetches.remove(&request_id) {
                    let _ = reply.send(Err(PeerError::TransportFailed(error.to_string())));
                }
            }

            Event::InboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                warn!(%peer, ?request_id, error = %error, "Serving block request failed");
            }

            Event::ResponseSent {
                peer, request_id, ..
            } => {
                debug!(%peer, ?request_id, "Block response sent");
            }
        }
    }

    /// Serve one inbound read-protocol request from the registered store.
    ///
    /// Dropping the response channel resets the stream, which is how a
    /// store failure is signalled to the requester.
    async fn serve_block(
        &mut self,
        peer: PeerId,
        id: ContentId,
        channel: request_response::ResponseChannel<Vec<u8>>,
    ) {
        let store = match &self.block_source {
            Some(store) => Arc::clone(store),
            None => {
                warn!(%peer, cid = %id, "No block source registered, resetting stream");
                return;
            }
        };

        let data = match store.read(&id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(%peer, cid = %id, error = %e, "Reading block for stream failed");
                return;
            }
        };

        // Consistency check between the stored bytes and the requested id;
        // a mismatch is logged but the bytes are served regardless.
        let recomputed = ContentId::digest(&data);
        info!(
            requested = %id,
            recomputed = %recomputed,
            matches = recomputed == id,
            "Digest consistency check"
        );

        let size = data.len();
        if self
            .swarm
            .behaviour_mut()
            .block_read
            .send_response(channel, data)
            .is_err()
        {
            warn!(%peer, cid = %id, "Writing block to stream failed");
        } else {
            debug!(%peer, cid = %id, bytes = size, "Served block");
        }
    }
}
