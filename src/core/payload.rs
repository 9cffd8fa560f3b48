//! Transaction payloads and large-record offload
//!
//! A record larger than the offload threshold is not carried inline. The
//! caller hands it to a [`BlobStore`] (an external content-addressed store)
//! and embeds the returned `{blobRef, blobUrl}` pair instead. The node never
//! uploads anything on its own.

use crate::error::{LedgerError, Result};
use crate::utils::{canonical_bytes, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

/// Inline payloads above this many bytes are offloaded
pub const OFFLOAD_THRESHOLD_BYTES: usize = 2048;

/// Reference to a payload held by the external blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlobRef {
    pub blob_ref: String,
    pub blob_url: String,
}

/// A record either travels inline or by reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordPayload {
    Offloaded(BlobRef),
    Inline(Value),
}

impl RecordPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            RecordPayload::Offloaded(blob) => blob.blob_ref.is_empty(),
            RecordPayload::Inline(Value::Null) => true,
            RecordPayload::Inline(Value::String(s)) => s.is_empty(),
            RecordPayload::Inline(Value::Object(map)) => map.is_empty(),
            RecordPayload::Inline(Value::Array(items)) => items.is_empty(),
            RecordPayload::Inline(_) => false,
        }
    }
}

/// Structured `data` section of a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordPayload>,
    /// `APPROVE` or `REJECT` for case validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_from: Option<String>,
    /// Signature produced by an external wallet over the payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_signature: Option<String>,
    /// Free-form fields merged into the entity by update actions
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl TxPayload {
    pub fn with_record(record: Value) -> TxPayload {
        TxPayload {
            record: Some(RecordPayload::Inline(record)),
            ..TxPayload::default()
        }
    }

    pub fn with_decision(decision: &str) -> TxPayload {
        TxPayload {
            decision: Some(decision.to_string()),
            ..TxPayload::default()
        }
    }

    pub fn has_record(&self) -> bool {
        self.record.as_ref().map(|r| !r.is_empty()).unwrap_or(false)
    }

    pub fn has_wallet_signature(&self) -> bool {
        self.wallet_signature
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }
}

/// External content-addressed store for large records
pub trait BlobStore: Send + Sync {
    fn put(&self, content: &[u8]) -> Result<BlobRef>;
}

/// Replaces an oversized inline record with a blob reference.
///
/// Returns `true` when the record was offloaded.
pub fn offload_large_record(
    payload: &mut TxPayload,
    threshold: usize,
    store: &dyn BlobStore,
) -> Result<bool> {
    let inline = match &payload.record {
        Some(RecordPayload::Inline(value)) => value,
        _ => return Ok(false),
    };

    let bytes = canonical_bytes(inline)?;
    if bytes.len() <= threshold {
        return Ok(false);
    }

    let blob = store.put(&bytes)?;
    if blob.blob_ref.is_empty() {
        return Err(LedgerError::MalformedInput(
            "Blob store returned an empty reference".to_string(),
        ));
    }
    log::info!(
        "Offloaded {} byte record to blob store as {}",
        bytes.len(),
        blob.blob_ref
    );
    payload.record = Some(RecordPayload::Offloaded(blob));
    Ok(true)
}

/// In-process blob store keyed by content hash, for single-machine setups and tests
pub struct MemoryBlobStore {
    base_url: String,
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: &str) -> MemoryBlobStore {
        MemoryBlobStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, blob_ref: &str) -> Option<Vec<u8>> {
        match self.inner.read() {
            Ok(inner) => inner.get(blob_ref).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on blob store");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, content: &[u8]) -> Result<BlobRef> {
        let blob_ref = sha256_hex(content);
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LedgerError::Io(format!("Failed to acquire blob store lock: {e}")))?;
        inner.insert(blob_ref.clone(), content.to_vec());
        Ok(BlobRef {
            blob_url: format!("{}/{}", self.base_url, blob_ref),
            blob_ref,
        })
    }
}
