use crate::error::Result;
use crate::network::{MessageKind, PeerMessage};
use log::{debug, warn};
use std::collections::HashMap;

/// Handler for one message kind: `(state, peer id, message)`
pub type Handler<S> = fn(&mut S, &str, PeerMessage) -> Result<()>;

/// Typed table from message kind to handler.
///
/// Dispatch never fails: a handler error rejects that one message and is logged.
pub struct MessageRouter<S> {
    handlers: HashMap<MessageKind, Handler<S>>,
}

impl<S> Default for MessageRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MessageRouter<S> {
    pub fn new() -> MessageRouter<S> {
        MessageRouter {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `kind`, replacing any earlier one
    pub fn on_message_type(&mut self, kind: MessageKind, handler: Handler<S>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Returns true when a handler ran and succeeded
    pub fn dispatch(&self, state: &mut S, peer: &str, message: PeerMessage) -> bool {
        let kind = message.kind();
        let handler = match self.handlers.get(&kind) {
            Some(handler) => handler,
            None => {
                debug!("No handler registered for {kind} from {peer}");
                return false;
            }
        };

        debug!("Dispatching {kind} from {peer}");
        match handler(state, peer, message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Rejected {kind} from {peer}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::network::SyncRequest;

    #[derive(Default)]
    struct Counter {
        seen: Vec<String>,
    }

    fn record(state: &mut Counter, peer: &str, _message: PeerMessage) -> Result<()> {
        state.seen.push(peer.to_string());
        Ok(())
    }

    fn fail(_state: &mut Counter, _peer: &str, _message: PeerMessage) -> Result<()> {
        Err(LedgerError::MalformedInput("nope".to_string()))
    }

    fn sync_request() -> PeerMessage {
        PeerMessage::SyncRequest(SyncRequest {
            requester: "x".to_string(),
            chain_length: 0,
        })
    }

    #[test]
    fn test_dispatch_to_registered_handler() {
        let mut router = MessageRouter::new();
        router.on_message_type(MessageKind::SyncRequest, record);
        let mut state = Counter::default();

        assert!(router.dispatch(&mut state, "peer-1", sync_request()));
        assert_eq!(state.seen, vec!["peer-1".to_string()]);
        assert!(router.handles(MessageKind::SyncRequest));
        assert!(!router.handles(MessageKind::Commit));
    }

    #[test]
    fn test_unregistered_and_failing_handlers_are_absorbed() {
        let mut router: MessageRouter<Counter> = MessageRouter::new();
        let mut state = Counter::default();
        assert!(!router.dispatch(&mut state, "p", sync_request()));

        router.on_message_type(MessageKind::SyncRequest, fail);
        assert!(!router.dispatch(&mut state, "p", sync_request()));
        assert!(state.seen.is_empty());
    }
}
