//! The ledger node aggregate
//!
//! [`LedgerNode`] owns everything a node mutates: the ledger (chain, entity
//! projection, mempool), the leader schedule and the active consensus
//! engine. It is driven by one caller at a time. Inbound peer messages go
//! through [`LedgerNode::handle_message`], client submissions through
//! [`LedgerNode::submit_request`], and timers through
//! [`LedgerNode::rotate_leader`] and [`LedgerNode::produce_block`]. Nothing
//! here touches a socket: outgoing messages collect in an outbox that the
//! caller drains into a [`PeerChannel`].

use crate::config::{Config, DEFAULT_BLOCK_SIZE};
use crate::consensus::{
    ConsensusEngine, ConsensusKind, EngineContext, EngineStats, LeaderSchedule, Ledger, Outbound,
    QuorumEngine, RollbackRecord, VoteEngine, VoteRules,
};
use crate::core::{
    offload_large_record, Block, BlobStore, MemoryBlobStore, Role, Transaction,
    TransactionRequest, OFFLOAD_THRESHOLD_BYTES,
};
use crate::error::{LedgerError, RejectionReason, Result};
use crate::network::{
    BlockResponse, GossipEnvelope, Hello, MessageKind, MessageRouter, PeerChannel, PeerMessage,
    RollbackNotice, SyncRequest, SyncResponse, DEFAULT_GOSSIP_TTL,
};
use crate::storage::{EntityRecord, MemoryPool, MempoolStats};
use crate::utils::RecentSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Gossip ids remembered for duplicate suppression
const SEEN_GOSSIP_HISTORY: usize = 4096;

/// Reply to a client submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    #[serde(rename_all = "camelCase")]
    Accepted { transaction_id: String },
    Rejected {
        reason: RejectionReason,
        message: String,
    },
}

impl SubmitResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitResponse::Accepted { .. })
    }
}

impl From<Result<String>> for SubmitResponse {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(transaction_id) => SubmitResponse::Accepted { transaction_id },
            Err(e) => SubmitResponse::Rejected {
                reason: e.rejection_reason().unwrap_or(RejectionReason::Malformed),
                message: e.to_string(),
            },
        }
    }
}

/// Ordered blocks plus derived counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExport {
    pub node_id: String,
    pub blocks: Vec<Block>,
    pub chain_length: usize,
    pub mempool_size: usize,
    pub mempool: MempoolStats,
    pub current_leader: Option<Role>,
    pub consensus: EngineStats,
    pub rollback_count: usize,
}

/// The full entity projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    pub node_id: String,
    pub records: Vec<EntityRecord>,
}

pub struct LedgerNode {
    node_id: String,
    role: Role,
    address: String,
    ledger: Ledger,
    schedule: LeaderSchedule,
    engine: Box<dyn ConsensusEngine>,
    router: Arc<MessageRouter<LedgerNode>>,
    outbox: Vec<Outbound>,
    seen_gossip: RecentSet,
    known_peers: BTreeMap<String, Role>,
    blob_store: Option<Arc<dyn BlobStore>>,
    offload_threshold: usize,
    block_size: usize,
    gossip_ttl: u32,
    // in-flight round seen at the previous rotation tick
    stalled_round: Option<String>,
}

impl LedgerNode {
    pub fn new(
        node_id: &str,
        role: Role,
        address: &str,
        ledger: Ledger,
        engine: Box<dyn ConsensusEngine>,
    ) -> LedgerNode {
        let mut schedule = LeaderSchedule::new();
        schedule.select_leader();
        info!(
            "Node {node_id} ({role}) using {} consensus",
            engine.kind()
        );
        LedgerNode {
            node_id: node_id.to_string(),
            role,
            address: address.to_string(),
            ledger,
            schedule,
            engine,
            router: Arc::new(Self::build_router()),
            outbox: Vec::new(),
            seen_gossip: RecentSet::new(SEEN_GOSSIP_HISTORY),
            known_peers: BTreeMap::new(),
            blob_store: None,
            offload_threshold: OFFLOAD_THRESHOLD_BYTES,
            block_size: DEFAULT_BLOCK_SIZE,
            gossip_ttl: DEFAULT_GOSSIP_TTL,
            stalled_round: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<LedgerNode> {
        config.validate()?;
        let ledger = Ledger::new(
            MemoryPool::new(config.mempool_capacity),
            config.max_rollback_depth,
        );
        let engine: Box<dyn ConsensusEngine> = match config.consensus {
            ConsensusKind::Vote => Box::new(VoteEngine::new(VoteRules {
                threshold: config.consensus_threshold,
                min_votes: config.min_votes,
            })),
            ConsensusKind::Quorum => Box::new(QuorumEngine::new(
                config.participants.clone(),
                &config.node_id,
            )),
        };

        let mut node = LedgerNode::new(
            &config.node_id,
            config.role,
            &config.listen_address,
            ledger,
            engine,
        )
        .with_block_size(config.block_size);
        if let Some(base_url) = &config.blob_base_url {
            node = node.with_blob_store(
                Arc::new(MemoryBlobStore::new(base_url)),
                config.offload_threshold,
            );
        }
        Ok(node)
    }

    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>, threshold: usize) -> LedgerNode {
        self.blob_store = Some(store);
        self.offload_threshold = threshold;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> LedgerNode {
        self.block_size = block_size;
        self
    }

    fn build_router() -> MessageRouter<LedgerNode> {
        let mut router = MessageRouter::new();
        router
            .on_message_type(MessageKind::Hello, Self::on_hello)
            .on_message_type(MessageKind::NewTransaction, Self::on_new_transaction)
            .on_message_type(MessageKind::NewBlock, Self::on_finalized_block)
            .on_message_type(MessageKind::BlockResponse, Self::on_finalized_block)
            .on_message_type(MessageKind::BlockPropagation, Self::on_consensus)
            .on_message_type(MessageKind::ConsensusVote, Self::on_consensus)
            .on_message_type(MessageKind::Preprepare, Self::on_consensus)
            .on_message_type(MessageKind::Prepare, Self::on_consensus)
            .on_message_type(MessageKind::Commit, Self::on_consensus)
            .on_message_type(MessageKind::RollbackNotification, Self::on_rollback)
            .on_message_type(MessageKind::SyncRequest, Self::on_sync_request)
            .on_message_type(MessageKind::SyncResponse, Self::on_sync_response)
            .on_message_type(MessageKind::BlockRequest, Self::on_block_request)
            .on_message_type(MessageKind::Gossip, Self::on_gossip);
        router
    }

    pub fn get_node_id(&self) -> &str {
        self.node_id.as_str()
    }

    pub fn get_role(&self) -> Role {
        self.role
    }

    pub fn get_address(&self) -> &str {
        self.address.as_str()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn current_leader(&self) -> Option<Role> {
        self.schedule.current()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn known_peers(&self) -> &BTreeMap<String, Role> {
        &self.known_peers
    }

    /// Our handshake frame
    pub fn hello(&self) -> PeerMessage {
        PeerMessage::Hello(Hello {
            node_id: self.node_id.clone(),
            role: self.role,
            address: self.address.clone(),
        })
    }

    pub fn peer_disconnected(&mut self, peer: &str) {
        if self.known_peers.remove(peer).is_some() {
            info!("Peer {peer} disconnected");
        }
    }

    /// Routes one inbound peer message. Returns false when it was rejected.
    pub fn handle_message(&mut self, peer: &str, message: PeerMessage) -> bool {
        let router = Arc::clone(&self.router);
        router.dispatch(self, peer, message)
    }

    /// Everything queued for peers since the last drain
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Drains the outbox into `channel`, returning how many messages went out
    pub fn flush(&mut self, channel: &dyn PeerChannel) -> usize {
        let mut sent = 0;
        for outbound in self.drain_outbox() {
            match outbound {
                Outbound::Broadcast(message) => {
                    channel.broadcast(&message);
                    sent += 1;
                }
                Outbound::Send { peer, message } => {
                    if channel.send(&peer, &message) {
                        sent += 1;
                    } else {
                        debug!(
                            "{}",
                            LedgerError::PeerUnreachable(format!("{peer} ({})", message.kind()))
                        );
                    }
                }
                Outbound::Gossip { message, ttl } => {
                    channel.gossip(message, ttl, &self.node_id);
                    sent += 1;
                }
            }
        }
        sent
    }

    fn send_to(&mut self, peer: &str, message: PeerMessage) {
        self.outbox.push(Outbound::Send {
            peer: peer.to_string(),
            message,
        });
    }

    pub fn broadcast(&mut self, message: PeerMessage) {
        self.outbox.push(Outbound::Broadcast(message));
    }

    pub fn gossip(&mut self, message: PeerMessage, ttl: u32) {
        self.outbox.push(Outbound::Gossip { message, ttl });
    }

    fn with_engine<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn ConsensusEngine, &mut EngineContext<'_>) -> Result<Vec<Outbound>>,
    {
        let mut ctx = EngineContext {
            node_id: &self.node_id,
            role: self.role,
            leader: self.schedule.current(),
            ledger: &mut self.ledger,
        };
        let outbound = f(self.engine.as_mut(), &mut ctx)?;
        self.outbox.extend(outbound);
        Ok(())
    }

    /// Whether the active engine lets this node build the next block
    pub fn is_proposer(&mut self) -> bool {
        let ctx = EngineContext {
            node_id: &self.node_id,
            role: self.role,
            leader: self.schedule.current(),
            ledger: &mut self.ledger,
        };
        self.engine.is_proposer(&ctx)
    }

    // ---- client intake ----

    /// Admits a signed transaction to the mempool and gossips it
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<String> {
        let txid = tx.get_id().to_string();
        self.admit(tx.clone())?;
        info!("Accepted transaction {txid} ({})", tx.get_action());
        self.gossip(PeerMessage::NewTransaction(tx), self.gossip_ttl);
        Ok(txid)
    }

    /// Builds, offloads and signs a transaction from a client descriptor
    pub fn submit_request(&mut self, request: TransactionRequest) -> SubmitResponse {
        let result = self.prepare_request(request).and_then(|tx| self.submit_transaction(tx));
        if let Err(e) = &result {
            warn!("Rejected client submission: {e}");
        }
        SubmitResponse::from(result)
    }

    fn prepare_request(&self, mut request: TransactionRequest) -> Result<Transaction> {
        match &self.blob_store {
            Some(store) => {
                offload_large_record(&mut request.data, self.offload_threshold, store.as_ref())?;
            }
            None => {
                if request.data.has_record() {
                    debug!("No blob store configured, records stay inline");
                }
            }
        }
        let mut tx = request.into_transaction()?;
        tx.sign()?;
        Ok(tx)
    }

    // an id the chain already holds is a duplicate even after eviction
    fn admit(&mut self, tx: Transaction) -> Result<()> {
        if self.ledger.chain().contains_transaction(tx.get_id()) {
            return Err(LedgerError::Duplicate(tx.get_id().to_string()));
        }
        self.ledger.mempool_mut().submit(tx)
    }

    // ---- block production and leadership ----

    /// Candidate block over `transactions` on top of the current tip.
    /// Only a node allowed to propose signs it.
    pub fn create_block(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        let signs = self.is_proposer();
        let mut block = Block::new_block(
            self.ledger.chain().len() as u64,
            transactions,
            self.ledger.chain().get_tip_hash(),
            self.role,
        )?;
        if signs {
            block.sign(&self.node_id);
        }
        Ok(block)
    }

    /// Proposes a block from pending transactions when this node is the
    /// proposer and no round of its own is in flight. Returns the proposed hash.
    pub fn produce_block(&mut self) -> Result<Option<String>> {
        if !self.is_proposer() {
            return Ok(None);
        }
        if let Some(hash) = self.engine.in_flight() {
            debug!("Block {hash} still in flight, not proposing");
            return Ok(None);
        }
        let transactions = self.ledger.mempool().take(self.block_size);
        if transactions.is_empty() {
            return Ok(None);
        }

        let block = self.create_block(transactions)?;
        let hash = block.get_hash().to_string();
        self.with_engine(|engine, ctx| engine.propose(ctx, block))?;
        Ok(Some(hash))
    }

    /// Rotation tick. A round still in flight since the previous tick is
    /// treated as a failed leader.
    pub fn rotate_leader(&mut self) -> Role {
        let in_flight = self.engine.in_flight();
        if in_flight.is_some() && in_flight == self.stalled_round {
            self.stalled_round = None;
            return self.handle_leader_failure();
        }
        self.stalled_round = in_flight;
        self.schedule.select_leader()
    }

    pub fn handle_leader_failure(&mut self) -> Role {
        self.engine.on_leader_failure();
        self.schedule.handle_leader_failure()
    }

    /// Truncates the chain at `block_hash` and tells peers to do the same.
    /// An unknown hash changes nothing and sends nothing.
    pub fn rollback(&mut self, block_hash: &str) -> Result<Option<RollbackRecord>> {
        let Some(record) = self.ledger.rollback(block_hash)? else {
            return Ok(None);
        };
        self.broadcast(PeerMessage::RollbackNotification(RollbackNotice {
            invalid_block_hash: record.invalid_block_hash.clone(),
            rollback_depth: record.rollback_depth,
            new_blockchain_length: self.ledger.chain().len(),
            timestamp: record.timestamp,
            initiator: self.node_id.clone(),
        }));
        Ok(Some(record))
    }

    /// Asks every peer for its chain
    pub fn request_sync(&mut self) {
        let request = self.sync_request();
        self.broadcast(request);
    }

    fn sync_request(&self) -> PeerMessage {
        PeerMessage::SyncRequest(SyncRequest {
            requester: self.node_id.clone(),
            chain_length: self.ledger.chain().len(),
        })
    }

    // ---- exports ----

    pub fn export_chain(&self) -> ChainExport {
        let mempool = self.ledger.mempool().stats();
        ChainExport {
            node_id: self.node_id.clone(),
            blocks: self.ledger.chain().get_blocks().to_vec(),
            chain_length: self.ledger.chain().len(),
            mempool_size: mempool.total,
            mempool,
            current_leader: self.schedule.current(),
            consensus: self.engine.stats(),
            rollback_count: self.ledger.rollback_history().len(),
        }
    }

    pub fn export_ledger(&self) -> LedgerExport {
        LedgerExport {
            node_id: self.node_id.clone(),
            records: self.ledger.state().get_all(),
        }
    }

    /// Writes `chain.json` and `ledger.json` into `dir`
    pub fn write_exports(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join("chain.json"),
            serde_json::to_vec_pretty(&self.export_chain())?,
        )?;
        fs::write(
            dir.join("ledger.json"),
            serde_json::to_vec_pretty(&self.export_ledger())?,
        )?;
        debug!("Exports written to {}", dir.display());
        Ok(())
    }

    // ---- message handlers ----

    fn on_hello(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::Hello(hello) = message else {
            return Ok(());
        };
        info!("Peer {} ({}) at {}", hello.node_id, hello.role, hello.address);
        node.known_peers.insert(hello.node_id, hello.role);
        let request = node.sync_request();
        node.send_to(peer, request);
        Ok(())
    }

    fn on_new_transaction(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::NewTransaction(tx) = message else {
            return Ok(());
        };
        let txid = tx.get_id().to_string();
        node.admit(tx)?;
        debug!("Added transaction {txid} from {peer} to mempool");
        Ok(())
    }

    fn on_finalized_block(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let block = match message {
            PeerMessage::NewBlock(block) => block,
            PeerMessage::BlockResponse(BlockResponse { block, .. }) => block,
            _ => return Ok(()),
        };
        if node.ledger.chain().block_exists(block.get_hash()) {
            debug!("Block {} from {peer} is already on our chain", block.get_index());
            return Ok(());
        }
        // blocks join the chain only through consensus or a validated sync
        info!(
            "Block {} from {peer} is not on our chain ({} blocks), requesting sync",
            block.get_index(),
            node.ledger.chain().len()
        );
        let request = node.sync_request();
        node.send_to(peer, request);
        Ok(())
    }

    fn on_consensus(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        node.with_engine(|engine, ctx| engine.on_message(ctx, peer, message))
    }

    fn on_rollback(node: &mut LedgerNode, _peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::RollbackNotification(notice) = message else {
            return Ok(());
        };
        node.ledger.apply_rollback_notice(&notice)?;
        Ok(())
    }

    fn on_sync_request(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::SyncRequest(request) = message else {
            return Ok(());
        };
        if request.chain_length >= node.ledger.chain().len() {
            debug!("{} is not behind us, no sync needed", request.requester);
            return Ok(());
        }
        let response = PeerMessage::SyncResponse(SyncResponse {
            blockchain: node.ledger.chain().get_blocks().to_vec(),
            sender: node.node_id.clone(),
        });
        node.send_to(peer, response);
        Ok(())
    }

    fn on_sync_response(node: &mut LedgerNode, _peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::SyncResponse(response) = message else {
            return Ok(());
        };
        if node.ledger.sync_with_peer(&response.blockchain)? {
            info!("Adopted chain from {}", response.sender);
        }
        Ok(())
    }

    fn on_block_request(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::BlockRequest(request) = message else {
            return Ok(());
        };
        let block = node
            .ledger
            .chain()
            .get_blocks()
            .get(request.block_index as usize)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Block {}", request.block_index)))?;
        let response = PeerMessage::BlockResponse(BlockResponse {
            block,
            sender: node.node_id.clone(),
        });
        node.send_to(peer, response);
        Ok(())
    }

    /// Only transactions travel by gossip; consensus traffic must come
    /// straight from the peer that produced it.
    fn on_gossip(node: &mut LedgerNode, peer: &str, message: PeerMessage) -> Result<()> {
        let PeerMessage::Gossip(envelope) = message else {
            return Ok(());
        };
        if envelope.sender == node.node_id || !node.seen_gossip.remember(&envelope.id) {
            return Ok(());
        }
        if !matches!(*envelope.message, PeerMessage::NewTransaction(_)) {
            warn!(
                "Dropping gossiped {} from {peer} (origin {})",
                envelope.message.kind(),
                envelope.sender
            );
            return Ok(());
        }
        if let Some(forwarded) = envelope.forwarded() {
            node.broadcast(PeerMessage::Gossip(forwarded));
        }
        let GossipEnvelope { message, .. } = envelope;
        node.handle_message(peer, *message);
        Ok(())
    }
}
