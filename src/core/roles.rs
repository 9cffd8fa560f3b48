//! Participant roles, domain actions and the role-rule gate
//!
//! A transaction's role is the token before the first `_` in its `from`
//! field (`"NGO_Alpha"` is an NGO). Each role may only perform the actions
//! listed in [`ROLE_ACTIONS`].

use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Fixed participant categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "NGO")]
    Ngo,
    Government,
    Hospital,
    Auditor,
    Admin,
}

impl Role {
    /// Rotation order used by the round-robin leader schedule
    pub const ALL: [Role; 5] = [
        Role::Ngo,
        Role::Government,
        Role::Hospital,
        Role::Auditor,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Ngo => "NGO",
            Role::Government => "Government",
            Role::Hospital => "Hospital",
            Role::Auditor => "Auditor",
            Role::Admin => "Admin",
        }
    }

    /// Role of a role-tagged identifier such as `"Government_B"`
    pub fn from_identifier(identifier: &str) -> Option<Role> {
        let token = identifier.split('_').next()?;
        token.parse().ok()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NGO" => Ok(Role::Ngo),
            "Government" => Ok(Role::Government),
            "Hospital" => Ok(Role::Hospital),
            "Auditor" => Ok(Role::Auditor),
            "Admin" => Ok(Role::Admin),
            _ => Err(LedgerError::MalformedInput(format!("Unknown role: {s}"))),
        }
    }
}

/// Domain verbs a transaction can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    OpenCase,
    UploadWelfareRecord,
    AddMedicalRecord,
    ValidateCase,
    CloseCase,
    FlagCase,
    AuditCheck,
    FreezeCase,
    UnfreezeCase,
    GrantRole,
    RevokeRole,
    #[serde(rename = "create_record")]
    CreateRecord,
    #[serde(rename = "update_record")]
    UpdateRecord,
    #[serde(rename = "override_record")]
    OverrideRecord,
    #[serde(rename = "transfer_guardianship")]
    TransferGuardianship,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenCase => "OpenCase",
            Action::UploadWelfareRecord => "UploadWelfareRecord",
            Action::AddMedicalRecord => "AddMedicalRecord",
            Action::ValidateCase => "ValidateCase",
            Action::CloseCase => "CloseCase",
            Action::FlagCase => "FlagCase",
            Action::AuditCheck => "AuditCheck",
            Action::FreezeCase => "FreezeCase",
            Action::UnfreezeCase => "UnfreezeCase",
            Action::GrantRole => "GrantRole",
            Action::RevokeRole => "RevokeRole",
            Action::CreateRecord => "create_record",
            Action::UpdateRecord => "update_record",
            Action::OverrideRecord => "override_record",
            Action::TransferGuardianship => "transfer_guardianship",
        }
    }

    /// Actions that must carry a non-empty `record` payload
    pub fn requires_record(&self) -> bool {
        matches!(
            self,
            Action::OpenCase | Action::UploadWelfareRecord | Action::AddMedicalRecord
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| LedgerError::MalformedInput(format!("Unknown action: {s}")))
    }
}

/// Closed set of case-validation outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl FromStr for Decision {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "APPROVE" => Ok(Decision::Approve),
            "REJECT" => Ok(Decision::Reject),
            _ => Err(LedgerError::Unauthorized(format!(
                "ValidateCase requires decision APPROVE/REJECT, got {s}"
            ))),
        }
    }
}

/// Static role -> allowed actions table
pub static ROLE_ACTIONS: Lazy<HashMap<Role, Vec<Action>>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        Role::Ngo,
        vec![
            Action::OpenCase,
            Action::UploadWelfareRecord,
            Action::CreateRecord,
            Action::UpdateRecord,
        ],
    );
    table.insert(
        Role::Government,
        vec![
            Action::ValidateCase,
            Action::CloseCase,
            Action::FlagCase,
            Action::UpdateRecord,
            Action::TransferGuardianship,
        ],
    );
    table.insert(
        Role::Hospital,
        vec![Action::AddMedicalRecord, Action::UpdateRecord],
    );
    table.insert(Role::Auditor, vec![Action::AuditCheck, Action::FlagCase]);
    table.insert(
        Role::Admin,
        vec![
            Action::GrantRole,
            Action::RevokeRole,
            Action::FreezeCase,
            Action::UnfreezeCase,
            Action::UpdateRecord,
            Action::TransferGuardianship,
            Action::OverrideRecord,
        ],
    );
    table
});

pub fn is_action_allowed(role: Role, action: Action) -> bool {
    ROLE_ACTIONS
        .get(&role)
        .map(|actions| actions.contains(&action))
        .unwrap_or(false)
}

/// Domain-rule check applied at mempool intake and by quorum replicas
pub trait DomainRules: Send + Sync {
    fn check(&self, tx: &Transaction) -> Result<()>;
}

/// Role table plus per-action preconditions
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleRules;

impl DomainRules for RoleRules {
    fn check(&self, tx: &Transaction) -> Result<()> {
        let action = tx.get_action();
        let role = Role::from_identifier(tx.get_from()).ok_or_else(|| {
            LedgerError::Unauthorized(format!(
                "{} does not carry a known role prefix",
                tx.get_from()
            ))
        })?;

        if !is_action_allowed(role, action) {
            return Err(LedgerError::Unauthorized(format!(
                "Role {role} cannot perform {action}"
            )));
        }

        let data = tx.get_data();
        if action == Action::ValidateCase {
            match data.decision.as_deref() {
                Some(decision) => {
                    decision.parse::<Decision>()?;
                }
                None => {
                    return Err(LedgerError::Unauthorized(
                        "ValidateCase requires decision APPROVE/REJECT".to_string(),
                    ))
                }
            }
        }

        if action.requires_record() && !data.has_record() {
            return Err(LedgerError::Unauthorized(format!(
                "{action} requires a record payload"
            )));
        }

        if action == Action::GrantRole && data.grant_to.as_deref().unwrap_or("").is_empty() {
            return Err(LedgerError::Unauthorized(
                "GrantRole requires grantTo".to_string(),
            ));
        }
        if action == Action::RevokeRole && data.revoke_from.as_deref().unwrap_or("").is_empty() {
            return Err(LedgerError::Unauthorized(
                "RevokeRole requires revokeFrom".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxPayload;
    use serde_json::json;

    fn tx(from: &str, action: Action, data: TxPayload) -> Transaction {
        Transaction::new(from, "Registry", 1, action, "case-1", data).unwrap()
    }

    #[test]
    fn test_role_from_identifier() {
        assert_eq!(Role::from_identifier("NGO_Alpha"), Some(Role::Ngo));
        assert_eq!(
            Role::from_identifier("Government_B"),
            Some(Role::Government)
        );
        assert_eq!(Role::from_identifier("Admin"), Some(Role::Admin));
        assert_eq!(Role::from_identifier("Pirate_X"), None);
        assert_eq!(Role::from_identifier(""), None);
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_string(&Action::TransferGuardianship).unwrap(),
            "\"transfer_guardianship\""
        );
        assert_eq!("OpenCase".parse::<Action>().unwrap(), Action::OpenCase);
        assert!("DeleteEverything".parse::<Action>().is_err());
        assert_eq!(serde_json::to_string(&Role::Ngo).unwrap(), "\"NGO\"");
    }

    #[test]
    fn test_role_table_gates_actions() {
        let rules = RoleRules;
        let record = TxPayload::with_record(json!({"name": "child"}));

        assert!(rules
            .check(&tx("NGO_A", Action::OpenCase, record.clone()))
            .is_ok());
        let err = rules
            .check(&tx("Hospital_A", Action::OpenCase, record))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));

        assert!(rules
            .check(&tx("Auditor_Z", Action::FlagCase, TxPayload::default()))
            .is_ok());
        assert!(rules
            .check(&tx("NGO_A", Action::FreezeCase, TxPayload::default()))
            .is_err());
    }

    #[test]
    fn test_validate_case_requires_closed_decision() {
        let rules = RoleRules;
        let mut data = TxPayload::default();
        assert!(rules
            .check(&tx("Government_B", Action::ValidateCase, data.clone()))
            .is_err());

        data.decision = Some("MAYBE".to_string());
        assert!(rules
            .check(&tx("Government_B", Action::ValidateCase, data.clone()))
            .is_err());

        data.decision = Some("REJECT".to_string());
        assert!(rules
            .check(&tx("Government_B", Action::ValidateCase, data))
            .is_ok());
    }

    #[test]
    fn test_record_upload_requires_payload() {
        let rules = RoleRules;
        assert!(rules
            .check(&tx(
                "Hospital_H",
                Action::AddMedicalRecord,
                TxPayload::default()
            ))
            .is_err());
        assert!(rules
            .check(&tx(
                "Hospital_H",
                Action::AddMedicalRecord,
                TxPayload::with_record(json!({"bloodType": "O+"}))
            ))
            .is_ok());
    }
}
