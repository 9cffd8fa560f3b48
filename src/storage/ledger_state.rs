//! Per-entity projection of the committed chain
//!
//! Each committed transaction is folded into the record named by its
//! `entityId`. The fold is pure: every timestamp it writes comes from the
//! transaction, so rebuilding from the same blocks always yields the same
//! records.

use crate::core::{Action, Block, RecordPayload, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Approved,
    Rejected,
    Closed,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubRecordKind {
    Welfare,
    Medical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRecord {
    pub kind: SubRecordKind,
    pub data: RecordPayload,
    pub added_by: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFlag {
    pub reason: Option<String>,
    pub flagged_by: String,
    pub timestamp: i64,
}

/// Who performed an action and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub by: String,
    pub at: i64,
}

impl Provenance {
    fn of(tx: &Transaction) -> Provenance {
        Provenance {
            by: tx.get_from().to_string(),
            at: tx.get_timestamp(),
        }
    }
}

/// Exported with flat `<action>By` / `<action>At` keys, e.g. `createdBy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EntityRecordWire", from = "EntityRecordWire")]
pub struct EntityRecord {
    pub id: String,
    pub status: CaseStatus,
    pub records: Vec<SubRecord>,
    pub flags: Vec<CaseFlag>,
    pub access_control: BTreeSet<String>,
    pub guardian: Option<String>,
    pub fields: Map<String, Value>,
    pub created: Provenance,
    pub updated: Option<Provenance>,
    pub validated: Option<Provenance>,
    pub closed: Option<Provenance>,
    pub frozen: Option<Provenance>,
    pub unfrozen: Option<Provenance>,
    pub transferred: Option<Provenance>,
    pub audited: Option<Provenance>,
    /// Index of the block that last touched this record
    pub block_index: Option<u64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityRecordWire {
    id: String,
    status: CaseStatus,
    records: Vec<SubRecord>,
    flags: Vec<CaseFlag>,
    access_control: BTreeSet<String>,
    guardian: Option<String>,
    fields: Map<String, Value>,
    created_by: String,
    created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frozen_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frozen_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfrozen_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfrozen_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transferred_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transferred_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audited_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audited_at: Option<i64>,
    block_index: Option<u64>,
}

fn split(provenance: Option<Provenance>) -> (Option<String>, Option<i64>) {
    match provenance {
        Some(Provenance { by, at }) => (Some(by), Some(at)),
        None => (None, None),
    }
}

fn join(by: Option<String>, at: Option<i64>) -> Option<Provenance> {
    Some(Provenance { by: by?, at: at? })
}

impl From<EntityRecord> for EntityRecordWire {
    fn from(record: EntityRecord) -> Self {
        let (updated_by, updated_at) = split(record.updated);
        let (validated_by, validated_at) = split(record.validated);
        let (closed_by, closed_at) = split(record.closed);
        let (frozen_by, frozen_at) = split(record.frozen);
        let (unfrozen_by, unfrozen_at) = split(record.unfrozen);
        let (transferred_by, transferred_at) = split(record.transferred);
        let (audited_by, audited_at) = split(record.audited);
        EntityRecordWire {
            id: record.id,
            status: record.status,
            records: record.records,
            flags: record.flags,
            access_control: record.access_control,
            guardian: record.guardian,
            fields: record.fields,
            created_by: record.created.by,
            created_at: record.created.at,
            updated_by,
            updated_at,
            validated_by,
            validated_at,
            closed_by,
            closed_at,
            frozen_by,
            frozen_at,
            unfrozen_by,
            unfrozen_at,
            transferred_by,
            transferred_at,
            audited_by,
            audited_at,
            block_index: record.block_index,
        }
    }
}

impl From<EntityRecordWire> for EntityRecord {
    fn from(wire: EntityRecordWire) -> Self {
        EntityRecord {
            id: wire.id,
            status: wire.status,
            records: wire.records,
            flags: wire.flags,
            access_control: wire.access_control,
            guardian: wire.guardian,
            fields: wire.fields,
            created: Provenance {
                by: wire.created_by,
                at: wire.created_at,
            },
            updated: join(wire.updated_by, wire.updated_at),
            validated: join(wire.validated_by, wire.validated_at),
            closed: join(wire.closed_by, wire.closed_at),
            frozen: join(wire.frozen_by, wire.frozen_at),
            unfrozen: join(wire.unfrozen_by, wire.unfrozen_at),
            transferred: join(wire.transferred_by, wire.transferred_at),
            audited: join(wire.audited_by, wire.audited_at),
            block_index: wire.block_index,
        }
    }
}

impl EntityRecord {
    fn open(tx: &Transaction) -> EntityRecord {
        let mut access_control = BTreeSet::new();
        access_control.insert(tx.get_from().to_string());
        EntityRecord {
            id: tx.get_entity_id().to_string(),
            status: CaseStatus::Open,
            records: Vec::new(),
            flags: Vec::new(),
            access_control,
            guardian: None,
            fields: tx.get_data().fields.clone(),
            created: Provenance::of(tx),
            updated: None,
            validated: None,
            closed: None,
            frozen: None,
            unfrozen: None,
            transferred: None,
            audited: None,
            block_index: None,
        }
    }

    fn push_sub_record(&mut self, kind: SubRecordKind, tx: &Transaction) {
        if let Some(data) = tx.get_data().record.clone() {
            self.records.push(SubRecord {
                kind,
                data,
                added_by: tx.get_from().to_string(),
                timestamp: tx.get_timestamp(),
            });
        }
    }
}

/// Applies one transaction to the current record for its entity.
///
/// Returns the new record, or `None` when the transaction changes nothing
/// (an action against an unknown entity, or a create for one that exists).
pub fn apply(existing: Option<&EntityRecord>, tx: &Transaction) -> Option<EntityRecord> {
    let action = tx.get_action();
    let mut record = match (existing, action) {
        (None, Action::OpenCase | Action::CreateRecord) => {
            let mut record = EntityRecord::open(tx);
            if action == Action::OpenCase {
                record.push_sub_record(SubRecordKind::Welfare, tx);
            }
            return Some(record);
        }
        (Some(_), Action::OpenCase | Action::CreateRecord) => return None,
        (None, _) => return None,
        (Some(record), _) => record.clone(),
    };

    let data = tx.get_data();
    let stamp = Provenance::of(tx);
    match action {
        Action::OpenCase | Action::CreateRecord => return None,
        Action::UploadWelfareRecord => record.push_sub_record(SubRecordKind::Welfare, tx),
        Action::AddMedicalRecord => record.push_sub_record(SubRecordKind::Medical, tx),
        Action::UpdateRecord | Action::OverrideRecord => {
            for (key, value) in &data.fields {
                record.fields.insert(key.clone(), value.clone());
            }
        }
        Action::ValidateCase => {
            record.status = match data.decision.as_deref() {
                Some("APPROVE") => CaseStatus::Approved,
                _ => CaseStatus::Rejected,
            };
            record.validated = Some(stamp.clone());
        }
        Action::CloseCase => {
            record.status = CaseStatus::Closed;
            record.closed = Some(stamp.clone());
        }
        Action::FlagCase => record.flags.push(CaseFlag {
            reason: data.reason.clone(),
            flagged_by: stamp.by.clone(),
            timestamp: stamp.at,
        }),
        Action::FreezeCase => {
            record.status = CaseStatus::Frozen;
            record.frozen = Some(stamp.clone());
        }
        Action::UnfreezeCase => {
            record.status = CaseStatus::Open;
            record.unfrozen = Some(stamp.clone());
        }
        Action::GrantRole => {
            if let Some(grantee) = &data.grant_to {
                record.access_control.insert(grantee.clone());
            }
        }
        Action::RevokeRole => {
            if let Some(revoked) = &data.revoke_from {
                record.access_control.remove(revoked);
            }
        }
        Action::TransferGuardianship => {
            record.guardian = Some(tx.get_to().to_string());
            record.transferred = Some(stamp.clone());
        }
        Action::AuditCheck => record.audited = Some(stamp.clone()),
    }
    record.updated = Some(stamp);
    Some(record)
}

/// Entity records keyed by entity id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    records: BTreeMap<String, EntityRecord>,
}

impl LedgerState {
    pub fn new() -> LedgerState {
        LedgerState::default()
    }

    /// Returns true when the transaction changed a record
    pub fn apply_transaction(&mut self, tx: &Transaction, block_index: Option<u64>) -> bool {
        let entity_id = tx.get_entity_id();
        match apply(self.records.get(entity_id), tx) {
            Some(mut record) => {
                record.block_index = block_index;
                self.records.insert(entity_id.to_string(), record);
                true
            }
            None => {
                log::debug!(
                    "{} on {} left the projection unchanged",
                    tx.get_action(),
                    entity_id
                );
                false
            }
        }
    }

    pub fn apply_block(&mut self, block: &Block) {
        for tx in block.get_transactions() {
            self.apply_transaction(tx, Some(block.get_index()));
        }
    }

    /// Clears the projection and folds every block again in order
    pub fn rebuild_from_chain(&mut self, blocks: &[Block]) {
        self.records.clear();
        for block in blocks {
            self.apply_block(block);
        }
        log::info!(
            "Ledger state rebuilt from {} blocks ({} records)",
            blocks.len(),
            self.records.len()
        );
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.records.get(entity_id)
    }

    pub fn get_all(&self) -> Vec<EntityRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
