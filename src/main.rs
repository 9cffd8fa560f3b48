// Entry point for the welfare-chain node and client
use clap::Parser;
use env_logger::Env;
use log::error;
use serde_json::Value;
use std::process;
use welfare_chain::{
    send_request, send_transaction, Command, Config, LedgerError, Opt, Result, Server,
    TransactionRequest, TxPayload,
};

fn main() {
    let opt = Opt::parse();

    // RUST_LOG wins over the configured level
    let level = match &opt.command {
        Command::StartNode { config, .. } | Command::PrintConfig { config } => {
            Config::load(config.as_deref())
                .map(|c| c.log_level)
                .unwrap_or_else(|_| "info".to_string())
        }
        Command::Submit { .. } => "info".to_string(),
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<()> {
    match command {
        Command::StartNode {
            config,
            node_id,
            role,
            consensus,
            listen,
            peers,
            participants,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(node_id) = node_id {
                config.node_id = node_id;
            }
            if let Some(role) = role {
                config.role = role;
            }
            if let Some(consensus) = consensus {
                config.consensus = consensus;
            }
            if let Some(listen) = listen {
                config.listen_address = listen;
            }
            if !peers.is_empty() {
                config.peers = peers;
            }
            if !participants.is_empty() {
                config.participants = participants;
            }
            config.validate()?;
            Server::new(config).run()?;
        }
        Command::Submit {
            node,
            from,
            action,
            entity_id,
            to,
            amount,
            record,
            decision,
            reason,
            data,
            sign,
        } => {
            let data = match data {
                Some(raw) => serde_json::from_str::<TxPayload>(&raw)?,
                None => {
                    let mut payload = match record {
                        Some(raw) => TxPayload::with_record(serde_json::from_str::<Value>(&raw)?),
                        None => TxPayload::default(),
                    };
                    payload.decision = decision;
                    payload.reason = reason;
                    payload
                }
            };
            let request = TransactionRequest {
                id: None,
                from,
                to,
                amount,
                action,
                entity_id,
                data,
            };

            // a locally signed transaction skips the node's offload step
            let response = if sign {
                let mut tx = request.into_transaction()?;
                tx.sign()?;
                send_transaction(&node, &tx)?
            } else {
                send_request(&node, &request)?
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_accepted() {
                return Err(LedgerError::MalformedInput(format!(
                    "{node} rejected the transaction"
                )));
            }
        }
        Command::PrintConfig { config } => {
            let config = Config::load(config.as_deref())?;
            println!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
