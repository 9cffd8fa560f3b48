//! Peer-to-peer networking
//!
//! Typed peer messages, the handler table they are routed through, the live
//! peer registry with its broadcast/unicast/gossip channel, and the TCP
//! runtime that feeds a node from its sockets and timers.

pub mod message;
pub mod node;
pub mod peer_channel;
pub mod router;
pub mod server;

pub use message::{
    BlockProposal, BlockRequest, BlockResponse, GossipEnvelope, Hello, MessageKind, PeerMessage,
    PhaseVote, Preprepare, RollbackNotice, SyncRequest, SyncResponse, VoteChoice, VoteMessage,
    DEFAULT_GOSSIP_TTL,
};
pub use node::{Peer, Peers};
pub use peer_channel::{spawn_writer, write_frame, PeerChannel};
pub use router::{Handler, MessageRouter};
pub use server::{process_inbound, send_request, send_transaction, Inbound, Server, Tick};
