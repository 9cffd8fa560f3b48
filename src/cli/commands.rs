use crate::consensus::ConsensusKind;
use crate::core::{Action, Role};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "welfare-chain")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Start a ledger node")]
    StartNode {
        #[arg(long, help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long = "node-id", help = "Identifier announced to peers")]
        node_id: Option<String>,
        #[arg(long, help = "Role of this node (NGO, Government, Hospital, Auditor, Admin)")]
        role: Option<Role>,
        #[arg(long, help = "Consensus engine (vote or quorum)")]
        consensus: Option<ConsensusKind>,
        #[arg(long, help = "Address to listen on, e.g. 127.0.0.1:2001")]
        listen: Option<String>,
        #[arg(long = "peer", help = "Peer address to dial, may be repeated")]
        peers: Vec<String>,
        #[arg(long = "participant", help = "Quorum participant id, may be repeated")]
        participants: Vec<String>,
    },
    #[command(name = "submit", about = "Submit a transaction to a running node")]
    Submit {
        #[arg(help = "Address of the node to submit to")]
        node: String,
        #[arg(help = "Role-tagged submitter, e.g. NGO_Alpha")]
        from: String,
        #[arg(help = "Action to perform, e.g. OpenCase")]
        action: Action,
        #[arg(help = "Case or record the action applies to")]
        entity_id: String,
        #[arg(long, default_value = "Registry")]
        to: String,
        #[arg(long, default_value_t = 1)]
        amount: i64,
        #[arg(long, help = "Record JSON carried by the transaction")]
        record: Option<String>,
        #[arg(long, help = "APPROVE or REJECT for ValidateCase")]
        decision: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, help = "Complete payload JSON, overriding the other data flags")]
        data: Option<String>,
        #[arg(long, help = "Sign locally and send the finished transaction")]
        sign: bool,
    },
    #[command(name = "printconfig", about = "Print the effective configuration")]
    PrintConfig {
        #[arg(long, help = "TOML configuration file")]
        config: Option<PathBuf>,
    },
}
