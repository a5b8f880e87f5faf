//! Privacy-aware wrappers around persisted rows.
//!
//! An [`Object`] or [`Edge`] answers `can_see`/`can_create`/`can_modify` by
//! looking up its type in the [`Schema`](crate::registry::Schema) and walking
//! the registered rule list.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::reader::RuleContext;
use crate::registry::FieldAccess;
use crate::rules::evaluate;
use crate::types::{Data, EdgeRow, ObjectRow, Status, TypeCode, CREATOR_FIELD};

/// The three gated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    See,
    Create,
    Modify,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operation::See => "see",
            Operation::Create => "create",
            Operation::Modify => "modify",
        })
    }
}

// ── Object ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    row: ObjectRow,
}

impl Object {
    pub fn new(row: ObjectRow) -> Self {
        Self { row }
    }

    pub fn id(&self) -> Uuid {
        self.row.id
    }

    pub fn object_type(&self) -> TypeCode {
        self.row.object_type
    }

    pub fn data(&self) -> &Data {
        &self.row.data
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.row.data.get(key)
    }

    pub fn status(&self) -> Status {
        self.row.status
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.row.time_created
    }

    pub fn time_updated(&self) -> DateTime<Utc> {
        self.row.time_updated
    }

    /// Id of the viewer recorded as this object's creator, if any.
    pub fn creator_id(&self) -> Option<Uuid> {
        self.field(CREATOR_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn row(&self) -> &ObjectRow {
        &self.row
    }

    pub fn into_row(self) -> ObjectRow {
        self.row
    }

    /// Same row with a replaced payload.
    pub fn with_data(&self, data: Data) -> Self {
        let mut row = self.row.clone();
        row.data = data;
        Self { row }
    }

    pub async fn can_see(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::See).await
    }

    pub async fn can_create(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::Create).await
    }

    pub async fn can_modify(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::Modify).await
    }

    /// Entity-level check against the type's registered rule list.
    pub async fn can(&self, ctx: &RuleContext<'_>, op: Operation) -> Result<bool> {
        let config = ctx.schema().object(self.object_type())?;
        evaluate(config.privacy.rules(op), self, ctx).await
    }

    /// Per-field check; unlisted fields are allowed.
    pub async fn can_field(&self, ctx: &RuleContext<'_>, key: &str, op: Operation) -> Result<bool> {
        let config = ctx.schema().object(self.object_type())?;
        match config.field_access(key, op) {
            FieldAccess::Allow => Ok(true),
            FieldAccess::Entity => self.can(ctx, op).await,
            FieldAccess::Rules(rules) => evaluate(rules, self, ctx).await,
        }
    }

    /// The payload restricted to the keys `op` is allowed on.
    pub async fn filter_fields(&self, ctx: &RuleContext<'_>, op: Operation) -> Result<Data> {
        let checks = self.data().keys().map(|key| async move {
            let allowed = self.can_field(ctx, key, op).await?;
            Ok::<_, crate::error::TrellisError>((key, allowed))
        });
        let verdicts = try_join_all(checks).await?;

        let mut filtered = Data::new();
        for (key, allowed) in verdicts {
            if allowed {
                if let Some(value) = self.data().get(key) {
                    filtered.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(filtered)
    }
}

// ── Edge ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    row: EdgeRow,
}

impl Edge {
    pub fn new(row: EdgeRow) -> Self {
        Self { row }
    }

    pub fn from_id(&self) -> Uuid {
        self.row.from_id
    }

    pub fn edge_type(&self) -> TypeCode {
        self.row.edge_type
    }

    pub fn to_id(&self) -> Uuid {
        self.row.to_id
    }

    pub fn data(&self) -> &str {
        &self.row.data
    }

    pub fn status(&self) -> Status {
        self.row.status
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.row.time_created
    }

    pub fn time_updated(&self) -> DateTime<Utc> {
        self.row.time_updated
    }

    pub fn row(&self) -> &EdgeRow {
        &self.row
    }

    pub fn into_row(self) -> EdgeRow {
        self.row
    }

    pub async fn can_see(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::See).await
    }

    pub async fn can_create(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::Create).await
    }

    pub async fn can_modify(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        self.can(ctx, Operation::Modify).await
    }

    pub async fn can(&self, ctx: &RuleContext<'_>, op: Operation) -> Result<bool> {
        let config = ctx.schema().edge(self.edge_type())?;
        evaluate(config.privacy.rules(op), self, ctx).await
    }
}
