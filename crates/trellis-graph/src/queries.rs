//! Privacy-filtered reads, coalesced per viewer.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::{join_all, try_join_all};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::types::{Data, EdgeRow, ObjectRow, Status, TypeCode, ROOT_TYPE};
use trellis_core::viewer::{CacheEntry, CacheKey, Claim, Viewer};
use trellis_core::{Edge, Object, Operation};

use crate::client::{column, Statement};
use crate::store::GraphStore;

const OBJECT_COLUMNS: &str = "id, type, data, status, time_created, time_updated";
const EDGE_COLUMNS: &str = "from_id, type, to_id, data, status, time_created, time_updated";

impl GraphStore {
    // ── Objects ──────────────────────────────────────────────────

    /// Load an object as `viewer` sees it.
    ///
    /// Hidden and absent objects both come back as `None`, and both are
    /// cached for the rest of the viewer's lifetime.
    pub async fn get_object(&self, viewer: &Viewer, id: Uuid) -> Result<Option<Object>> {
        let (attempts, wait) = self.coalesce();
        let guard = match viewer.claim(CacheKey::Object(id), attempts, wait).await {
            Claim::Cached(CacheEntry::Object(object)) => return Ok(object),
            Claim::Cached(_) => return Err(cache_shape(CacheKey::Object(id))),
            Claim::Load(guard) => guard,
        };

        let object = self.load_object(viewer, id).await?;
        guard.finish(CacheEntry::Object(object.clone()));
        Ok(object)
    }

    async fn load_object(&self, viewer: &Viewer, id: Uuid) -> Result<Option<Object>> {
        let stmt = Statement::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ? AND status = ?"
        ))
        .bind(id)
        .bind(Status::Visible.code());
        let rows = self.client().query_rows(&stmt).await?;
        viewer.record_query();

        let row = match rows.as_slice() {
            [] => return Ok(None),
            [row] => object_row(row)?,
            _ => {
                tracing::error!(object_id = %id, rows = rows.len(), "Duplicate object rows");
                return Err(TrellisError::invariant(
                    "Duplicate rows for object id",
                    ErrorContext::new().with("id", id.to_string()),
                ));
            }
        };

        let object = Object::new(row);
        if viewer.is_read_all() {
            return Ok(Some(object));
        }
        let ctx = self.context(viewer);
        if !object.can_see(&ctx).await? {
            return Ok(None);
        }
        let visible = object.filter_fields(&ctx, Operation::See).await?;
        Ok(Some(object.with_data(visible)))
    }

    /// Every visible object of `object_type` reachable from its root object.
    pub async fn get_root_objects(
        &self,
        viewer: &Viewer,
        object_type: TypeCode,
    ) -> Result<Vec<Object>> {
        let Some(root_id) = self.schema().object(object_type)?.root_id else {
            return Err(TrellisError::validation(
                "Object type is not linked to a root object",
            ));
        };
        let edges = self.get_edge(viewer, root_id, ROOT_TYPE).await?;
        let loads = edges.iter().map(|edge| self.get_object(viewer, edge.to_id()));
        Ok(try_join_all(loads).await?.into_iter().flatten().collect())
    }

    // ── Edges ────────────────────────────────────────────────────

    /// Load the visible edge `(from_id, edge_type, to_id)` as `viewer` sees it.
    pub async fn get_single_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
        to_id: Uuid,
    ) -> Result<Option<Edge>> {
        self.schema().edge(edge_type)?;
        let key = CacheKey::Edge {
            from_id,
            edge_type,
            to_id,
        };
        let (attempts, wait) = self.coalesce();
        let guard = match viewer.claim(key, attempts, wait).await {
            Claim::Cached(CacheEntry::Edge(edge)) => return Ok(edge),
            Claim::Cached(_) => return Err(cache_shape(key)),
            Claim::Load(guard) => guard,
        };

        let stmt = Statement::new(format!(
            "SELECT {EDGE_COLUMNS} FROM edges
             WHERE from_id = ? AND type = ? AND to_id = ? AND status = ?"
        ))
        .bind(from_id)
        .bind(edge_type)
        .bind(to_id)
        .bind(Status::Visible.code());
        let rows = self.client().query_rows(&stmt).await?;
        viewer.record_query();

        let edge = match rows.as_slice() {
            [] => None,
            [row] => Some(Edge::new(edge_row(row)?)),
            _ => {
                tracing::error!(from_id = %from_id, edge_type, to_id = %to_id, "Duplicate edge rows");
                return Err(TrellisError::invariant(
                    "Duplicate rows for edge",
                    ErrorContext::new().with("edge", key.to_string()),
                ));
            }
        };
        let edge = match edge {
            Some(edge) if self.visible_edge(viewer, &edge).await? => Some(edge),
            _ => None,
        };
        guard.finish(CacheEntry::Edge(edge.clone()));
        Ok(edge)
    }

    /// All visible edges of `edge_type` leaving `from_id`, oldest first.
    pub async fn get_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
    ) -> Result<Vec<Edge>> {
        self.schema().edge(edge_type)?;
        let key = CacheKey::EdgeList { from_id, edge_type };
        let (attempts, wait) = self.coalesce();
        let guard = match viewer.claim(key, attempts, wait).await {
            Claim::Cached(CacheEntry::Edges(edges)) => return Ok(edges),
            Claim::Cached(_) => return Err(cache_shape(key)),
            Claim::Load(guard) => guard,
        };

        let stmt = Statement::new(format!(
            "SELECT {EDGE_COLUMNS} FROM edges
             WHERE from_id = ? AND type = ? AND status = ?
             ORDER BY time_created, rowid"
        ))
        .bind(from_id)
        .bind(edge_type)
        .bind(Status::Visible.code());
        let rows = self.client().query_rows(&stmt).await?;
        viewer.record_query();

        let edges = rows
            .iter()
            .map(|row| edge_row(row).map(Edge::new))
            .collect::<Result<Vec<_>>>()?;
        let verdicts = join_all(edges.iter().map(|edge| self.visible_edge(viewer, edge))).await;
        let mut visible = Vec::with_capacity(edges.len());
        for (edge, verdict) in edges.into_iter().zip(verdicts) {
            if verdict? {
                visible.push(edge);
            }
        }

        guard.finish(CacheEntry::Edges(visible.clone()));
        Ok(visible)
    }

    async fn visible_edge(&self, viewer: &Viewer, edge: &Edge) -> Result<bool> {
        if viewer.is_read_all() {
            return Ok(true);
        }
        edge.can_see(&self.context(viewer)).await
    }
}

fn cache_shape(key: CacheKey) -> TrellisError {
    TrellisError::invariant(
        "Cached value has the wrong shape for its key",
        ErrorContext::new().with("key", key.to_string()),
    )
}

// ── Row decoding ──────────────────────────────────────────────────

pub(crate) fn millis_to_time(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        TrellisError::invariant(
            "Timestamp out of range",
            ErrorContext::new().with("millis", millis),
        )
    })
}

fn type_code(raw: i64) -> Result<TypeCode> {
    TypeCode::try_from(raw).map_err(|_| {
        TrellisError::invariant(
            "Type code out of range",
            ErrorContext::new().with("type", raw),
        )
    })
}

pub(crate) fn object_row(row: &SqliteRow) -> Result<ObjectRow> {
    let data: String = column(row, "data")?;
    let data: Data = serde_json::from_str(&data)?;
    Ok(ObjectRow {
        id: column(row, "id")?,
        object_type: type_code(column(row, "type")?)?,
        data,
        status: Status::from_code(column(row, "status")?)?,
        time_created: millis_to_time(column(row, "time_created")?)?,
        time_updated: millis_to_time(column(row, "time_updated")?)?,
    })
}

pub(crate) fn edge_row(row: &SqliteRow) -> Result<EdgeRow> {
    Ok(EdgeRow {
        from_id: column(row, "from_id")?,
        edge_type: type_code(column(row, "type")?)?,
        to_id: column(row, "to_id")?,
        data: column(row, "data")?,
        status: Status::from_code(column(row, "status")?)?,
        time_created: millis_to_time(column(row, "time_created")?)?,
        time_updated: millis_to_time(column(row, "time_updated")?)?,
    })
}
