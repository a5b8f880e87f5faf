//! Multi-step writes with best-effort compensation.
//!
//! There are no multi-row transactions: when a later step fails, the steps
//! that already landed are soft-deleted again with a fresh all-writing
//! viewer. Rollback failures are logged and never raised, so the error that
//! started the rollback is the one the caller sees.

use futures::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::types::{Data, EdgeRow, Status, TypeCode, CREATOR_FIELD};
use trellis_core::viewer::Viewer;

use crate::store::GraphStore;

/// One end of an edge requested together with a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    /// The object being created.
    New,
    Id(Uuid),
}

impl EdgeEnd {
    fn resolve(self, new_id: Uuid) -> Uuid {
        match self {
            EdgeEnd::New => new_id,
            EdgeEnd::Id(id) => id,
        }
    }
}

/// An edge to create alongside a new object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdge {
    pub from: EdgeEnd,
    pub edge_type: TypeCode,
    pub to: EdgeEnd,
    pub data: String,
}

impl NewEdge {
    /// Edge from the new object to `to_id`.
    pub fn outgoing(edge_type: TypeCode, to_id: Uuid) -> Self {
        Self {
            from: EdgeEnd::New,
            edge_type,
            to: EdgeEnd::Id(to_id),
            data: String::new(),
        }
    }

    /// Edge from `from_id` to the new object.
    pub fn incoming(from_id: Uuid, edge_type: TypeCode) -> Self {
        Self {
            from: EdgeEnd::Id(from_id),
            edge_type,
            to: EdgeEnd::New,
            data: String::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    fn row(&self, new_id: Uuid) -> EdgeRow {
        EdgeRow::new(self.from.resolve(new_id), self.edge_type, self.to.resolve(new_id))
            .with_data(self.data.clone())
    }
}

impl GraphStore {
    // ── Rollback ─────────────────────────────────────────────────

    /// Soft-delete an object created earlier in a failing operation.
    pub async fn rollback_object(&self, id: Uuid) {
        let writer = Viewer::write_all();
        match self.set_object_status(&writer, id, Status::Deleted).await {
            Ok(true) => tracing::debug!(object_id = %id, "Rolled back object"),
            Ok(false) => tracing::error!(object_id = %id, "Rollback failed: object was not deleted"),
            Err(e) => tracing::error!(object_id = %id, error = %e, "Rollback failed"),
        }
    }

    /// Soft-delete an edge (and its mirror) created earlier in a failing operation.
    pub async fn rollback_edge(&self, row: &EdgeRow) {
        let writer = Viewer::write_all();
        match self.delete_edge(&writer, row).await {
            Ok(true) => tracing::debug!(
                from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id,
                "Rolled back edge"
            ),
            Ok(false) => tracing::error!(
                from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id,
                "Rollback failed: edge was not deleted"
            ),
            Err(e) => tracing::error!(
                from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id,
                error = %e, "Rollback failed"
            ),
        }
    }

    pub async fn rollback_edges(&self, rows: &[EdgeRow]) {
        join_all(rows.iter().map(|row| self.rollback_edge(row))).await;
    }

    // ── Compound writes ──────────────────────────────────────────

    /// Create an object stamped with its creator, then every requested edge.
    ///
    /// If any edge fails, the object and the edges that did land are rolled
    /// back and the first failure is returned.
    pub async fn create_object_with_edges(
        &self,
        viewer: &Viewer,
        object_type: TypeCode,
        mut data: Data,
        edges: &[NewEdge],
    ) -> Result<Uuid> {
        if !viewer.is_logged_out() {
            data.insert(
                CREATOR_FIELD.to_string(),
                Value::String(viewer.id().to_string()),
            );
        }
        let Some(id) = self.create_object(viewer, object_type, data).await? else {
            return Err(TrellisError::storage("Object was not stored", None));
        };

        let rows: Vec<EdgeRow> = edges.iter().map(|edge| edge.row(id)).collect();
        let results = join_all(rows.iter().map(|row| self.create_edge(viewer, row))).await;

        let mut created = Vec::new();
        let mut first_error = None;
        for (row, result) in rows.iter().zip(results) {
            let failure = match result {
                Ok(true) => {
                    created.push(row.clone());
                    continue;
                }
                Ok(false) => TrellisError::conflict(
                    "Edge was not created",
                    ErrorContext::new()
                        .with("from_id", row.from_id.to_string())
                        .with("type", row.edge_type)
                        .with("to_id", row.to_id.to_string()),
                ),
                Err(e) => e,
            };
            if first_error.is_none() {
                first_error = Some(failure);
            } else {
                tracing::warn!(object_id = %id, edge_type = row.edge_type, error = %failure, "Additional edge failure");
            }
        }

        match first_error {
            None => Ok(id),
            Some(err) => {
                self.rollback_edges(&created).await;
                self.rollback_object(id).await;
                Err(err)
            }
        }
    }

    /// Soft-delete an object, then every edge touching it.
    pub async fn delete_object_and_edges(&self, viewer: &Viewer, id: Uuid) -> Result<bool> {
        if !self.set_object_status(viewer, id, Status::Deleted).await? {
            return Ok(false);
        }
        let writer = Viewer::write_all();
        self.cascade_edge_status(&writer, viewer, id, Status::Deleted, Status::Visible)
            .await?;
        Ok(true)
    }
}
