//! Inbound action requests and the typed actions they parse into.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::collection::CollectionKind;
use super::record::{Record, ID};
use crate::errors::AppError;

/// Field toggled by `toggleTrending` when the request names no flag.
pub const DEFAULT_TOGGLE_FLAG: &str = "isTrending";

/// Side of a live-link match poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    A,
    B,
}

impl Team {
    /// Counter field on the link's `poll` object.
    pub fn votes_field(&self) -> &'static str {
        match self {
            Team::A => "votesA",
            Team::B => "votesB",
        }
    }
}

/// A mutation understood by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create(Record),
    Update { id: String, patch: Record },
    Delete { id: String },
    /// Match by id or by `url`, update if found, else create
    Upsert(Record),
    Vote {
        id: String,
        option_id: String,
        voter_id: Option<String>,
    },
    UpdateStatus { id: String, status: Value },
    SetDefault { id: String },
    ToggleFlag { id: String, flag: String },
    TeamVote {
        id: String,
        team: Team,
        voter_id: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create(_) => "create",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Upsert(_) => "upsert",
            Action::Vote { .. } => "vote",
            Action::UpdateStatus { .. } => "updateStatus",
            Action::SetDefault { .. } => "setDefault",
            Action::ToggleFlag { .. } => "toggleTrending",
            Action::TeamVote { .. } => "vote",
        }
    }

    /// Target record id, for actions that address an existing record.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Action::Create(record) | Action::Upsert(record) => record.id(),
            Action::Update { id, .. }
            | Action::Delete { id }
            | Action::Vote { id, .. }
            | Action::UpdateStatus { id, .. }
            | Action::SetDefault { id }
            | Action::ToggleFlag { id, .. }
            | Action::TeamVote { id, .. } => Some(id),
        }
    }
}

/// Request body: `{action, id?, <entity or entity fields>}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ActionRequest {
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        serde_json::from_value(value)
            .map_err(|e| AppError::InvalidAction(format!("Malformed action request: {}", e)))
    }

    /// Parse into a typed action for `kind`.
    pub fn into_action(self, kind: CollectionKind) -> Result<Action, AppError> {
        let action = match self.action.as_str() {
            "create" => Action::Create(self.entity(kind)?),
            "upsert" => Action::Upsert(self.entity(kind)?),
            "update" => {
                let id = self.require_id()?;
                Action::Update {
                    patch: self.entity(kind)?,
                    id,
                }
            }
            "delete" => Action::Delete {
                id: self.require_id()?,
            },
            "vote" if kind == CollectionKind::LiveLinks => Action::TeamVote {
                id: self.require_id()?,
                team: match self.str_field("team") {
                    Some("A") => Team::A,
                    Some("B") => Team::B,
                    _ => return Err(AppError::Validation("team must be \"A\" or \"B\"".into())),
                },
                voter_id: self
                    .str_field("userId")
                    .ok_or_else(|| AppError::Validation("userId is required".into()))?
                    .to_string(),
            },
            "vote" => Action::Vote {
                id: self.require_id()?,
                option_id: self
                    .str_field("optionId")
                    .ok_or_else(|| AppError::Validation("optionId is required".into()))?
                    .to_string(),
                voter_id: self.str_field("userId").map(str::to_string),
            },
            "updateStatus" | "update-status" => Action::UpdateStatus {
                id: self.require_id()?,
                status: self
                    .fields
                    .get("status")
                    .cloned()
                    .ok_or_else(|| AppError::Validation("status is required".into()))?,
            },
            "setDefault" | "set-default" => Action::SetDefault {
                id: self.require_id()?,
            },
            "toggleTrending" | "toggle-flag" => {
                let flag = self.str_field("flag").unwrap_or(DEFAULT_TOGGLE_FLAG);
                if flag == ID {
                    return Err(AppError::Validation("id cannot be toggled".into()));
                }
                Action::ToggleFlag {
                    flag: flag.to_string(),
                    id: self.require_id()?,
                }
            }
            other => return Err(AppError::InvalidAction(format!("Invalid action: {}", other))),
        };

        if !kind.supports(&action) {
            return Err(AppError::InvalidAction(format!(
                "Invalid action for {}: {}",
                kind, self.action
            )));
        }

        Ok(action)
    }

    fn require_id(&self) -> Result<String, AppError> {
        self.id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("id is required".into()))
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Entity fields: the kind's payload field, or the remaining top-level fields.
    fn entity(&self, kind: CollectionKind) -> Result<Record, AppError> {
        let field = kind.payload_field();
        let mut record = match self.fields.get(field) {
            Some(Value::Object(map)) => Record::from(map.clone()),
            Some(Value::String(text)) => {
                let mut record = Record::new();
                record.set(field, text.as_str());
                record
            }
            Some(_) => {
                return Err(AppError::Validation(format!(
                    "{} must be an object",
                    field
                )))
            }
            None => Record::from(self.fields.clone()),
        };

        if !record.contains(ID) {
            if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
                record.set(ID, id);
            }
        }

        Ok(record)
    }
}
