use crate::config::Config;
use crate::core::{Transaction, TransactionRequest};
use crate::error::{LedgerError, Result};
use crate::network::{spawn_writer, write_frame, Peer, PeerMessage, Peers};
use crate::node::{LedgerNode, SubmitResponse};
use crate::utils::{decode, encode_line};
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TCP_WRITE_TIMEOUT: u64 = 5000;
const CLIENT_REPLY_TIMEOUT: u64 = 5000;
const DIAL_RETRY_INTERVAL: u64 = 3000;

/// Timer events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    RotateLeader,
    ProduceBlock,
}

/// Work for the single consumer that owns the node
#[derive(Debug)]
pub enum Inbound {
    /// A frame from a peer that completed the hello handshake
    Message { peer: String, message: PeerMessage },
    /// A signed transaction from a connection that never said hello
    Submit {
        tx: Transaction,
        reply: Sender<Vec<u8>>,
    },
    /// A client descriptor to build, sign and admit
    Request {
        request: TransactionRequest,
        reply: Sender<Vec<u8>>,
    },
    Disconnected { peer: String },
    Tick(Tick),
}

/// TCP runtime around a [`LedgerNode`].
///
/// Reader, dialer and ticker threads only enqueue [`Inbound`] work; the
/// thread inside [`Server::run`] is the only one that touches the node.
pub struct Server {
    config: Config,
    peers: Arc<Peers>,
}

impl Server {
    pub fn new(config: Config) -> Server {
        Server {
            config,
            peers: Arc::new(Peers::new()),
        }
    }

    pub fn peers(&self) -> Arc<Peers> {
        Arc::clone(&self.peers)
    }

    /// Runs until the work queue closes
    pub fn run(&self) -> Result<()> {
        let mut node = LedgerNode::from_config(&self.config)?;
        let addr = self.config.listen_address.as_str();
        let listener = TcpListener::bind(addr)
            .map_err(|e| LedgerError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!(
            "Server listening on {addr} as {} ({})",
            node.get_node_id(),
            node.get_role()
        );

        let hello = encode_line(&node.hello())?;
        let (queue, work) = mpsc::channel::<Inbound>();

        self.spawn_listener(listener, queue.clone(), hello.clone());
        for peer_addr in &self.config.peers {
            self.spawn_dialer(peer_addr.clone(), queue.clone(), hello.clone());
        }
        spawn_ticker(
            Duration::from_secs(self.config.rotation_interval_secs),
            Tick::RotateLeader,
            queue.clone(),
        );
        spawn_ticker(
            Duration::from_secs(self.config.block_interval_secs),
            Tick::ProduceBlock,
            queue.clone(),
        );
        drop(queue);

        let mut exported_length = None;
        for inbound in work {
            process_inbound(&mut node, inbound);
            node.flush(self.peers.as_ref());

            if let Some(dir) = &self.config.export_dir {
                let length = node.ledger().chain().len();
                if exported_length != Some(length) {
                    if let Err(e) = node.write_exports(dir) {
                        warn!("Failed to write exports: {e}");
                    }
                    exported_length = Some(length);
                }
            }
        }
        Ok(())
    }

    fn spawn_listener(&self, listener: TcpListener, queue: Sender<Inbound>, hello: Vec<u8>) {
        let peers = Arc::clone(&self.peers);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        continue;
                    }
                };
                let peers = Arc::clone(&peers);
                let queue = queue.clone();
                let hello = hello.clone();
                thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, false, &peers, &queue, &hello) {
                        warn!("Connection ended with error: {e}");
                    }
                });
            }
        });
    }

    fn spawn_dialer(&self, addr: String, queue: Sender<Inbound>, hello: Vec<u8>) {
        let peers = Arc::clone(&self.peers);
        thread::spawn(move || loop {
            match dial(&addr) {
                Ok(stream) => {
                    info!("Connected to peer at {addr}");
                    if let Err(e) = serve_connection(stream, true, &peers, &queue, &hello) {
                        warn!("Connection to {addr} ended with error: {e}");
                    }
                }
                Err(e) => debug!("Dial {addr} failed: {e}"),
            }
            thread::sleep(Duration::from_millis(DIAL_RETRY_INTERVAL));
        });
    }
}

fn spawn_ticker(interval: Duration, tick: Tick, queue: Sender<Inbound>) {
    thread::spawn(move || loop {
        thread::sleep(interval);
        if queue.send(Inbound::Tick(tick)).is_err() {
            break;
        }
    });
}

/// Applies one unit of work to the node
pub fn process_inbound(node: &mut LedgerNode, inbound: Inbound) {
    match inbound {
        Inbound::Message { peer, message } => {
            node.handle_message(&peer, message);
        }
        Inbound::Submit { tx, reply } => {
            let response = SubmitResponse::from(node.submit_transaction(tx));
            send_reply(&reply, &response);
        }
        Inbound::Request { request, reply } => {
            let response = node.submit_request(request);
            send_reply(&reply, &response);
        }
        Inbound::Disconnected { peer } => node.peer_disconnected(&peer),
        Inbound::Tick(Tick::RotateLeader) => {
            node.rotate_leader();
        }
        Inbound::Tick(Tick::ProduceBlock) => match node.produce_block() {
            Ok(Some(hash)) => info!("Proposed block {hash}"),
            Ok(None) => {}
            Err(e) => warn!("Block production failed: {e}"),
        },
    }
}

fn send_reply(reply: &Sender<Vec<u8>>, response: &SubmitResponse) {
    match encode_line(response) {
        Ok(frame) => {
            if reply.send(frame).is_err() {
                debug!("Client went away before its reply");
            }
        }
        Err(e) => warn!("Failed to encode reply: {e}"),
    }
}

fn dial(addr: &str) -> Result<TcpStream> {
    let socket_addr = addr
        .parse::<SocketAddr>()
        .map_err(|e| LedgerError::Network(format!("Invalid address {addr}: {e}")))?;
    let stream = TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
        .map_err(|e| LedgerError::Network(format!("Failed to connect to {addr}: {e}")))?;
    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;
    Ok(stream)
}

/// Reads newline-delimited frames until the connection closes.
///
/// The first frame decides what the connection is: `hello` makes it a peer,
/// anything else makes it a client whose submissions get a reply line.
/// The dialing side sends its hello first; the accepting side answers it.
fn serve_connection(
    stream: TcpStream,
    dialed: bool,
    peers: &Peers,
    queue: &Sender<Inbound>,
    hello: &[u8],
) -> Result<()> {
    let addr = stream.peer_addr()?.to_string();
    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;
    let writer = spawn_writer(stream.try_clone()?, addr.clone());
    if dialed {
        writer
            .send(hello.to_vec())
            .map_err(|_| LedgerError::PeerUnreachable(addr.clone()))?;
    }

    let mut peer_id: Option<String> = None;
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("Read from {addr} failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound = match decode::<PeerMessage>(line.as_bytes()) {
            Ok(message) => match (peer_id.clone(), message) {
                (Some(peer), message) => Inbound::Message { peer, message },
                (None, PeerMessage::Hello(hello_msg)) => {
                    peers.add_peer(Peer::new(
                        &hello_msg.node_id,
                        &addr,
                        Some(hello_msg.role),
                        writer.clone(),
                    ));
                    if !dialed && writer.send(hello.to_vec()).is_err() {
                        peers.evict_connection(&hello_msg.node_id, &addr);
                        break;
                    }
                    peer_id = Some(hello_msg.node_id.clone());
                    Inbound::Message {
                        peer: hello_msg.node_id.clone(),
                        message: PeerMessage::Hello(hello_msg),
                    }
                }
                (None, PeerMessage::NewTransaction(tx)) => Inbound::Submit {
                    tx,
                    reply: writer.clone(),
                },
                (None, other) => {
                    warn!("Ignoring {} from {addr} before hello", other.kind());
                    continue;
                }
            },
            Err(e) => match decode::<TransactionRequest>(line.as_bytes()) {
                Ok(request) if peer_id.is_none() => Inbound::Request {
                    request,
                    reply: writer.clone(),
                },
                _ => {
                    warn!("Dropping malformed frame from {addr}: {e}");
                    continue;
                }
            },
        };

        if queue.send(inbound).is_err() {
            break;
        }
    }

    if let Some(peer) = peer_id {
        if peers.evict_connection(&peer, &addr) {
            let _ = queue.send(Inbound::Disconnected { peer });
        }
    }
    Ok(())
}

fn exchange<T: serde::Serialize>(addr: &str, frame: &T) -> Result<SubmitResponse> {
    let mut stream = dial(addr)?;
    stream
        .set_read_timeout(Some(Duration::from_millis(CLIENT_REPLY_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set read timeout: {e}")))?;
    write_frame(&mut stream, frame)?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .map_err(|e| LedgerError::Network(format!("No reply from {addr}: {e}")))?;
    if line.trim().is_empty() {
        return Err(LedgerError::Network(format!(
            "{addr} closed the connection without a reply"
        )));
    }
    decode(line.as_bytes())
}

/// Sends an already signed transaction as a client and waits for the verdict
pub fn send_transaction(addr: &str, tx: &Transaction) -> Result<SubmitResponse> {
    exchange(addr, &PeerMessage::NewTransaction(tx.clone()))
}

/// Sends a transaction descriptor for the node to build and sign
pub fn send_request(addr: &str, request: &TransactionRequest) -> Result<SubmitResponse> {
    exchange(addr, request)
}
