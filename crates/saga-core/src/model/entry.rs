//! Log de auditoría append-only.
//!
//! Rol en el flujo:
//! - Cada transición de un step emite una `Entry`; nunca se modifican ni
//!   borran.
//! - El replay guard del runner consulta el log: un `succeeded` previo para
//!   un step evita volver a ejecutarlo.
//! - Los plugins registran acciones propias con el formato
//!   `<keyword>/<accion>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Acción registrada por una `Entry`. Se persiste como texto.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntryAction {
    Started,
    Succeeded,
    Errored,
    Halted,
    Repeated,
    /// Acción emitida por un plugin bajo su keyword.
    Plugin { keyword: String, action: String },
}

impl EntryAction {
    pub fn plugin(keyword: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Plugin { keyword: keyword.into(),
                       action: action.into() }
    }
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryAction::Started => f.write_str("started"),
            EntryAction::Succeeded => f.write_str("succeeded"),
            EntryAction::Errored => f.write_str("errored"),
            EntryAction::Halted => f.write_str("halted"),
            EntryAction::Repeated => f.write_str("repeated"),
            EntryAction::Plugin { keyword, action } => write!(f, "{keyword}/{action}"),
        }
    }
}

impl FromStr for EntryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "succeeded" => Ok(Self::Succeeded),
            "errored" => Ok(Self::Errored),
            "halted" => Ok(Self::Halted),
            "repeated" => Ok(Self::Repeated),
            other => match other.split_once('/') {
                Some((keyword, action)) if !keyword.is_empty() && !action.is_empty() => Ok(Self::plugin(keyword, action)),
                _ => Err(format!("unknown entry action `{other}`")),
            },
        }
    }
}

impl From<EntryAction> for String {
    fn from(action: EntryAction) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for EntryAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Entry aún no persistida (sin `seq` ni `timestamp`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub execution_id: Uuid,
    pub step: String,
    pub action: EntryAction,
    pub data: Option<Value>,
}

impl NewEntry {
    pub fn new(execution_id: Uuid, step: impl Into<String>, action: EntryAction) -> Self {
        Self { execution_id,
               step: step.into(),
               action,
               data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub seq: u64, // asignado por el store (orden append)
    pub execution_id: Uuid,
    pub step: String,
    pub action: EntryAction,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Value>,
}
