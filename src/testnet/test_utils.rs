//! Test utilities for running several ledger nodes in one process

use crate::consensus::{ConsensusEngine, Ledger, QuorumEngine, VoteEngine};
use crate::core::{Action, Role, TransactionRequest, TxPayload};
use crate::error::{LedgerError, Result};
use crate::network::{PeerChannel, PeerMessage};
use crate::node::LedgerNode;
use crate::storage::MemoryPool;
use serde_json::json;
use std::sync::Mutex;

const MAX_DELIVERY_ROUNDS: usize = 1000;

/// Records frames instead of writing them to sockets
struct Mailbox {
    sender: String,
    peers: Vec<String>,
    frames: Mutex<Vec<(String, PeerMessage)>>,
}

impl Mailbox {
    fn new(sender: &str, peers: Vec<String>) -> Mailbox {
        Mailbox {
            sender: sender.to_string(),
            peers,
            frames: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, target: &str, message: &PeerMessage) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push((target.to_string(), message.clone()));
        }
    }

    fn into_frames(self) -> Vec<(String, PeerMessage)> {
        self.frames.into_inner().unwrap_or_default()
    }
}

impl PeerChannel for Mailbox {
    fn broadcast(&self, message: &PeerMessage) -> usize {
        for peer in self.peers.iter().filter(|p| **p != self.sender) {
            self.push(peer, message);
        }
        self.peers.len().saturating_sub(1)
    }

    fn send(&self, peer_id: &str, message: &PeerMessage) -> bool {
        if !self.peers.iter().any(|p| p == peer_id) {
            return false;
        }
        self.push(peer_id, message);
        true
    }

    fn peer_ids(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| **p != self.sender)
            .cloned()
            .collect()
    }
}

/// A fully connected set of nodes with synchronous delivery
pub struct TestNetwork {
    pub nodes: Vec<LedgerNode>,
    /// Nodes that currently neither send nor receive
    offline: Vec<String>,
}

impl TestNetwork {
    pub fn new(nodes: Vec<LedgerNode>) -> TestNetwork {
        TestNetwork {
            nodes,
            offline: Vec::new(),
        }
    }

    /// One node per role, `node_0` being the NGO, all using vote consensus
    pub fn vote(count: usize) -> TestNetwork {
        let nodes = (0..count)
            .map(|i| {
                test_node(
                    &format!("node_{i}"),
                    Role::ALL[i % Role::ALL.len()],
                    Box::new(VoteEngine::default()),
                )
            })
            .collect();
        TestNetwork::new(nodes)
    }

    /// `count` quorum participants; `node_0` is primary in view 0
    pub fn quorum(count: usize) -> TestNetwork {
        let ids: Vec<String> = (0..count).map(|i| format!("node_{i}")).collect();
        let nodes = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                test_node(
                    id,
                    Role::ALL[i % Role::ALL.len()],
                    Box::new(QuorumEngine::new(ids.clone(), id)),
                )
            })
            .collect();
        TestNetwork::new(nodes)
    }

    pub fn node(&self, node_id: &str) -> Result<&LedgerNode> {
        self.nodes
            .iter()
            .find(|n| n.get_node_id() == node_id)
            .ok_or_else(|| LedgerError::NotFound(format!("Node {node_id}")))
    }

    pub fn node_mut(&mut self, node_id: &str) -> Result<&mut LedgerNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.get_node_id() == node_id)
            .ok_or_else(|| LedgerError::NotFound(format!("Node {node_id}")))
    }

    pub fn set_offline(&mut self, node_id: &str, offline: bool) {
        self.offline.retain(|id| id != node_id);
        if offline {
            self.offline.push(node_id.to_string());
        }
    }

    fn online_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|n| n.get_node_id().to_string())
            .filter(|id| !self.offline.contains(id))
            .collect()
    }

    /// Every online node greets every other online node
    pub fn connect_all(&mut self) -> usize {
        let ids = self.online_ids();
        let hellos: Vec<(String, PeerMessage)> = self
            .nodes
            .iter()
            .filter(|n| ids.iter().any(|id| id == n.get_node_id()))
            .map(|n| (n.get_node_id().to_string(), n.hello()))
            .collect();
        for node in self.nodes.iter_mut() {
            if !ids.iter().any(|id| id == node.get_node_id()) {
                continue;
            }
            for (from, hello) in &hellos {
                if from != node.get_node_id() {
                    node.handle_message(from, hello.clone());
                }
            }
        }
        self.deliver_all()
    }

    /// Flushes and delivers until the network is quiet. Returns the number
    /// of frames delivered.
    pub fn deliver_all(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let ids = self.online_ids();
            let mut frames = Vec::new();
            for node in self.nodes.iter_mut() {
                let sender = node.get_node_id().to_string();
                if !ids.contains(&sender) {
                    node.drain_outbox();
                    continue;
                }
                let mailbox = Mailbox::new(&sender, ids.clone());
                node.flush(&mailbox);
                frames.extend(
                    mailbox
                        .into_frames()
                        .into_iter()
                        .map(|(target, message)| (sender.clone(), target, message)),
                );
            }
            if frames.is_empty() {
                return delivered;
            }
            for (sender, target, message) in frames {
                if let Some(node) = self.nodes.iter_mut().find(|n| n.get_node_id() == target) {
                    node.handle_message(&sender, message);
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn chain_lengths(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.ledger().chain().len()).collect()
    }
}

pub fn test_node(node_id: &str, role: Role, engine: Box<dyn ConsensusEngine>) -> LedgerNode {
    LedgerNode::new(
        node_id,
        role,
        "127.0.0.1:0",
        Ledger::new(MemoryPool::new(100), 10),
        engine,
    )
}

pub fn open_case_request(from: &str, entity_id: &str) -> TransactionRequest {
    TransactionRequest {
        id: None,
        from: from.to_string(),
        to: "Registry".to_string(),
        amount: 1,
        action: Action::OpenCase,
        entity_id: entity_id.to_string(),
        data: TxPayload::with_record(json!({"name": "child", "age": 7})),
    }
}

pub fn validate_case_request(from: &str, entity_id: &str, decision: &str) -> TransactionRequest {
    TransactionRequest {
        id: None,
        from: from.to_string(),
        to: "Registry".to_string(),
        amount: 1,
        action: Action::ValidateCase,
        entity_id: entity_id.to_string(),
        data: TxPayload::with_decision(decision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CaseStatus;

    fn submit_and_produce(net: &mut TestNetwork, proposer: &str, request: TransactionRequest) {
        let response = net.node_mut(proposer).unwrap().submit_request(request);
        assert!(response.is_accepted(), "{response:?}");
        net.deliver_all();
        let proposed = net.node_mut(proposer).unwrap().produce_block().unwrap();
        assert!(proposed.is_some());
        net.deliver_all();
    }

    fn assert_case_lifecycle(mut net: TestNetwork) {
        net.connect_all();
        submit_and_produce(&mut net, "node_0", open_case_request("NGO_A", "case-1"));
        assert!(net.chain_lengths().iter().all(|len| *len == 1));
        for node in &net.nodes {
            let record = node.ledger().state().get("case-1").unwrap();
            assert_eq!(record.status, CaseStatus::Open);
            assert_eq!(record.created.by, "NGO_A");
            assert!(node.ledger().mempool().is_empty());
        }

        submit_and_produce(
            &mut net,
            "node_0",
            validate_case_request("Government_B", "case-1", "REJECT"),
        );
        assert!(net.chain_lengths().iter().all(|len| *len == 2));
        for node in &net.nodes {
            let record = node.ledger().state().get("case-1").unwrap();
            assert_eq!(record.status, CaseStatus::Rejected);
            assert_eq!(record.validated.as_ref().unwrap().by, "Government_B");
        }
    }

    #[test]
    fn test_vote_network_case_lifecycle() {
        assert_case_lifecycle(TestNetwork::vote(5));
    }

    #[test]
    fn test_quorum_network_case_lifecycle() {
        assert_case_lifecycle(TestNetwork::quorum(4));
    }

    #[test]
    fn test_quorum_tolerates_one_silent_replica() {
        let mut net = TestNetwork::quorum(4);
        net.connect_all();
        net.set_offline("node_3", true);
        submit_and_produce(&mut net, "node_0", open_case_request("NGO_A", "case-1"));
        assert_eq!(net.chain_lengths(), vec![1, 1, 1, 0]);

        // the silent replica catches up on reconnect
        net.set_offline("node_3", false);
        net.connect_all();
        assert_eq!(net.chain_lengths(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_quorum_stalls_without_quorum() {
        let mut net = TestNetwork::quorum(4);
        net.connect_all();
        net.set_offline("node_2", true);
        net.set_offline("node_3", true);
        submit_and_produce(&mut net, "node_0", open_case_request("NGO_A", "case-1"));
        assert_eq!(net.chain_lengths(), vec![0, 0, 0, 0]);
        assert!(net.node("node_0").unwrap().engine_stats().finalized_blocks == 0);
    }

    #[test]
    fn test_rollback_propagates() {
        let mut net = TestNetwork::vote(5);
        net.connect_all();
        submit_and_produce(&mut net, "node_0", open_case_request("NGO_A", "case-1"));
        submit_and_produce(&mut net, "node_0", open_case_request("NGO_A", "case-2"));
        assert!(net.chain_lengths().iter().all(|len| *len == 2));

        let hash = net.node("node_0").unwrap().ledger().chain().get_blocks()[1]
            .get_hash()
            .to_string();
        assert!(net.node_mut("node_0").unwrap().rollback(&hash).unwrap().is_some());
        net.deliver_all();
        assert!(net.chain_lengths().iter().all(|len| *len == 1));
        for node in &net.nodes {
            assert!(node.ledger().state().get("case-2").is_none());
        }
    }

    #[test]
    fn test_gossiped_transaction_reaches_every_mempool() {
        let mut net = TestNetwork::vote(5);
        net.connect_all();
        let response = net
            .node_mut("node_3")
            .unwrap()
            .submit_request(open_case_request("NGO_A", "case-9"));
        assert!(response.is_accepted());
        net.deliver_all();
        for node in &net.nodes {
            assert_eq!(node.ledger().mempool().size(), 1);
        }
    }
}
