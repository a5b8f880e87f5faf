//! Core row types for the Trellis graph.
//!
//! Objects and edges are stored as raw rows; privacy-aware wrappers live in
//! [`crate::entity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorContext, Result, TrellisError};

// ── Type Codes ────────────────────────────────────────────────────

/// Integer type code of an object or edge.
pub type TypeCode = u16;

/// Largest type code available to application-defined types.
pub const MAX_APP_TYPE: TypeCode = 65533;

/// Reserved for the root object type and the root-linkage edge.
pub const ROOT_TYPE: TypeCode = 65534;

/// Reserved for the identity-linkage edge.
pub const IDENTITY_EDGE: TypeCode = 65535;

/// Largest valid object type code.
pub const MAX_OBJECT: TypeCode = ROOT_TYPE;

/// Largest valid edge type code.
pub const MAX_EDGE: TypeCode = IDENTITY_EDGE;

/// Payload key holding the id of the viewer that created an object.
pub const CREATOR_FIELD: &str = "creator_id";

/// System-managed payload key linking an object to an external identity.
pub const IDENTITY_SUBJECT_FIELD: &str = "identity_subject";

/// Open JSON record stored as an object's payload.
pub type Data = serde_json::Map<String, serde_json::Value>;

// ── Status ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Visible,
    Deleted,
}

impl Status {
    pub fn code(self) -> i64 {
        match self {
            Status::Visible => 0,
            Status::Deleted => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Status::Visible),
            1 => Ok(Status::Deleted),
            other => Err(TrellisError::invariant(
                "Unknown status code in row",
                ErrorContext::new().with("status", other),
            )),
        }
    }
}

// ── Rows ──────────────────────────────────────────────────────────

/// A node in the graph, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectRow {
    pub id: Uuid,
    pub object_type: TypeCode,
    pub data: Data,
    pub status: Status,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl ObjectRow {
    /// A not-yet-persisted visible row.
    pub fn provisional(id: Uuid, object_type: TypeCode, data: Data) -> Self {
        let now = Utc::now();
        Self {
            id,
            object_type,
            data,
            status: Status::Visible,
            time_created: now,
            time_updated: now,
        }
    }
}

/// A typed, directed arc between two ids, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeRow {
    pub from_id: Uuid,
    pub edge_type: TypeCode,
    pub to_id: Uuid,
    pub data: String,
    pub status: Status,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
}

impl EdgeRow {
    pub fn new(from_id: Uuid, edge_type: TypeCode, to_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            from_id,
            edge_type,
            to_id,
            data: String::new(),
            status: Status::Visible,
            time_created: now,
            time_updated: now,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// The mirror arc `(to, reverse_type, from)` carrying the same payload.
    pub fn mirrored(&self, reverse_type: TypeCode) -> Self {
        Self {
            from_id: self.to_id,
            edge_type: reverse_type,
            to_id: self.from_id,
            data: self.data.clone(),
            status: self.status,
            time_created: self.time_created,
            time_updated: self.time_updated,
        }
    }
}

// ── Geo ───────────────────────────────────────────────────────────

/// A WGS84 point, read from `{"lat": .., "lng": ..}` payload values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let lat = value.get("lat")?.as_f64()?;
        let lng = value.get("lng")?.as_f64()?;
        if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
            return None;
        }
        Some(Self { lat, lng })
    }
}

// ── Id helpers ────────────────────────────────────────────────────

/// Parse an externally supplied object id.
pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| TrellisError::Validation {
        message: "Invalid id provided, expecting a uuid".to_string(),
        context: ErrorContext::new().with("id", raw),
    })
}

/// Generate a new time-ordered object id.
pub fn new_object_id() -> Uuid {
    Uuid::now_v7()
}
