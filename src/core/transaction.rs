// This file implements the transaction record - one role-scoped action against one entity
// Every transaction names who acts (from), the counterpart (to), the domain verb (action)
// and the case it targets (entity_id). Once signed, only its status may change.

use crate::core::{Action, TxPayload};
use crate::error::{LedgerError, Result};
use crate::utils::{canonical_bytes, current_timestamp, sha256_hex};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a transaction as seen by the local node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "pending"),
            TxStatus::Confirmed => write!(f, "confirmed"),
            TxStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: String,
    from: String,
    to: String,
    amount: i64, // informational only, but must be positive
    action: Action,
    entity_id: String,
    #[serde(default)]
    data: TxPayload,
    timestamp: i64,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    status: TxStatus,
}

// The fields covered by the signature. Status is deliberately absent
// because it is the one field allowed to change after signing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningView<'a> {
    id: &'a str,
    from: &'a str,
    to: &'a str,
    amount: i64,
    action: Action,
    entity_id: &'a str,
    data: &'a TxPayload,
    timestamp: i64,
}

/// What a block hash commits to for each of its transactions
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHashView<'a> {
    #[serde(flatten)]
    body: SigningView<'a>,
    signature: Option<&'a str>,
}

impl Transaction {
    // When I build a fresh transaction, I give it a random id and the current time
    pub fn new(
        from: &str,
        to: &str,
        amount: i64,
        action: Action,
        entity_id: &str,
        data: TxPayload,
    ) -> Result<Transaction> {
        Ok(Transaction {
            id: Uuid::new_v4().simple().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
            action,
            entity_id: entity_id.to_string(),
            data,
            timestamp: current_timestamp()?,
            signature: None,
            status: TxStatus::Pending,
        })
    }

    /// Same as [`Transaction::new`] but with a caller-chosen id
    pub fn with_id(
        id: &str,
        from: &str,
        to: &str,
        amount: i64,
        action: Action,
        entity_id: &str,
        data: TxPayload,
    ) -> Result<Transaction> {
        let mut tx = Transaction::new(from, to, amount, action, entity_id, data)?;
        tx.id = id.to_string();
        Ok(tx)
    }

    fn signing_view(&self) -> SigningView<'_> {
        SigningView {
            id: &self.id,
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            action: self.action,
            entity_id: &self.entity_id,
            data: &self.data,
            timestamp: self.timestamp,
        }
    }

    pub fn hash_view(&self) -> TxHashView<'_> {
        TxHashView {
            body: self.signing_view(),
            signature: self.signature.as_deref(),
        }
    }

    fn expected_signature(&self) -> Result<String> {
        let bytes = canonical_bytes(&self.signing_view())?;
        Ok(sha256_hex(&bytes))
    }

    // I sign with a one-way hash of the signed fields. This is a stand-in for a
    // real key signature: anyone can produce it, it only detects tampering.
    pub fn sign(&mut self) -> Result<&str> {
        let signature = self.expected_signature()?;
        Ok(self.signature.insert(signature).as_str())
    }

    /// True when the hash stand-in signature matches the signed fields
    pub fn verify(&self) -> bool {
        match (&self.signature, self.expected_signature()) {
            (Some(signature), Ok(expected)) => *signature == expected,
            _ => false,
        }
    }

    /// Shape checks: identifiers present and a positive amount
    pub fn validate_structure(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LedgerError::MalformedInput("missing id".to_string()));
        }
        if self.from.trim().is_empty() {
            return Err(LedgerError::MalformedInput("missing from".to_string()));
        }
        if self.to.trim().is_empty() {
            return Err(LedgerError::MalformedInput("missing to".to_string()));
        }
        if self.amount <= 0 {
            return Err(LedgerError::MalformedInput(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }

    /// Accepts either the built-in hash signature or a wallet signature on the payload
    pub fn is_authentic(&self) -> bool {
        self.data.has_wallet_signature() || self.verify()
    }

    /// Leaf value used when this transaction is committed to a Merkle root
    pub fn merkle_leaf(&self) -> &str {
        self.signature.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_from(&self) -> &str {
        self.from.as_str()
    }

    pub fn get_to(&self) -> &str {
        self.to.as_str()
    }

    pub fn get_amount(&self) -> i64 {
        self.amount
    }

    pub fn get_action(&self) -> Action {
        self.action
    }

    pub fn get_entity_id(&self) -> &str {
        self.entity_id.as_str()
    }

    pub fn get_data(&self) -> &TxPayload {
        &self.data
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn get_status(&self) -> TxStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TxStatus) {
        self.status = status;
    }
}

/// Transaction descriptor accepted from clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub action: Action,
    pub entity_id: String,
    #[serde(default)]
    pub data: TxPayload,
}

impl TransactionRequest {
    /// Builds the unsigned transaction this request describes
    pub fn into_transaction(self) -> Result<Transaction> {
        match self.id {
            Some(id) => Transaction::with_id(
                &id,
                &self.from,
                &self.to,
                self.amount,
                self.action,
                &self.entity_id,
                self.data,
            ),
            None => Transaction::new(
                &self.from,
                &self.to,
                self.amount,
                self.action,
                &self.entity_id,
                self.data,
            ),
        }
    }
}
