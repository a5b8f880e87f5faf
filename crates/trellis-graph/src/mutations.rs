//! Write operations for the graph.
//!
//! The authoritative row is always written before its index rows. Edge types
//! with a declared reverse are written as a pair in a single statement, so
//! either both directions change or neither does.

use chrono::Utc;
use futures::future::try_join_all;
use uuid::Uuid;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::types::{
    new_object_id, Data, EdgeRow, ObjectRow, Status, TypeCode, ROOT_TYPE,
};
use trellis_core::viewer::{CacheKey, Viewer};
use trellis_core::{Object, Operation};

use crate::client::{column, Statement};
use crate::queries::object_row;
use crate::store::GraphStore;
use crate::validate::edge_context;

impl GraphStore {
    // ── Objects ──────────────────────────────────────────────────

    /// Create an object of `object_type` and return its id.
    ///
    /// `None` means the insert affected no row.
    pub async fn create_object(
        &self,
        viewer: &Viewer,
        object_type: TypeCode,
        data: Data,
    ) -> Result<Option<Uuid>> {
        let id = new_object_id();
        let config = self.check_object_shape(viewer, object_type, &data)?;

        let mut object = Object::new(ObjectRow::provisional(id, object_type, data));
        if !viewer.is_write_all() {
            let ctx = self.context(viewer);
            if !object.can_create(&ctx).await? {
                return Err(TrellisError::denied(
                    "Viewer does not have permission to create object",
                ));
            }
            let allowed = object.filter_fields(&ctx, Operation::Create).await?;
            if allowed.is_empty() {
                return Err(TrellisError::validation(
                    "Cannot mutate an object using an empty data object",
                ));
            }
            object = object.with_data(allowed);
        }

        let mut row = object.into_row();
        row.data = self.check_object_types(viewer, config, row.data).await?;

        for field in &config.unique_index {
            if let Some(value) = row.data.get(field) {
                self.check_unique(object_type, field, value, id).await?;
            }
        }

        let stmt = Statement::new(
            "INSERT INTO objects (id, type, data, status, time_created, time_updated)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(object_type)
        .bind(serde_json::to_string(&row.data)?)
        .bind(Status::Visible.code())
        .bind(row.time_created.timestamp_millis())
        .bind(row.time_updated.timestamp_millis());
        if self.client().run(&stmt).await? != 1 {
            return Ok(None);
        }

        self.index_object(config, &row).await?;
        if let Some(root_id) = config.root_id {
            let writer = Viewer::write_all();
            self.create_edge(&writer, &EdgeRow::new(root_id, ROOT_TYPE, id))
                .await?;
        }

        viewer.delete_cache(&CacheKey::Object(id));
        tracing::debug!(object_id = %id, object_type, "Created object");
        Ok(Some(id))
    }

    /// Merge `fields` into the object's payload.
    ///
    /// Keys absent from `fields` keep their stored values. Returns `false`
    /// when the row was gone by the time of the update.
    pub async fn modify_object_data(&self, viewer: &Viewer, id: Uuid, fields: Data) -> Result<bool> {
        if fields.is_empty() {
            return Err(TrellisError::validation(
                "Cannot mutate an object using an empty data object",
            ));
        }
        let (master, current) = futures::try_join!(
            self.get_object(viewer.read_all_viewer(), id),
            self.get_object(viewer, id)
        )?;
        let (Some(master), Some(current)) = (master, current) else {
            return Err(TrellisError::Validation {
                message: "Cannot modify an object that does not exist".to_string(),
                context: ErrorContext::new().with("id", id.to_string()),
            });
        };
        let config = self.check_object_shape(viewer, master.object_type(), &fields)?;

        let ctx = self.context(viewer);
        if !viewer.is_write_all() && !current.can_modify(&ctx).await? {
            return Err(TrellisError::denied(
                "Viewer does not have permission to modify object",
            ));
        }

        let mut fields = self.check_object_types(viewer, config, fields).await?;
        if !viewer.is_write_all() {
            let checks = fields.keys().map(|key| {
                let current = &current;
                let ctx = &ctx;
                async move {
                    let allowed = current.can_field(ctx, key, Operation::Modify).await?;
                    Ok::<_, TrellisError>((key.clone(), allowed))
                }
            });
            let denied: Vec<String> = try_join_all(checks)
                .await?
                .into_iter()
                .filter_map(|(key, allowed)| (!allowed).then_some(key))
                .collect();
            for key in denied {
                fields.remove(&key);
            }
        }

        let mut data = master.data().clone();
        for (key, value) in fields {
            if config.is_preserved(&key) {
                continue;
            }
            data.insert(key, value);
        }

        for field in &config.unique_index {
            match data.get(field) {
                Some(value) if master.field(field) != Some(value) => {
                    self.check_unique(master.object_type(), field, value, id)
                        .await?;
                }
                _ => {}
            }
        }

        let now = Utc::now();
        let stmt = Statement::new(
            "UPDATE objects SET data = ?, time_updated = ? WHERE id = ? AND status = ?",
        )
        .bind(serde_json::to_string(&data)?)
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(Status::Visible.code());
        let updated = self.client().run(&stmt).await?;
        viewer.delete_cache(&CacheKey::Object(id));
        if updated == 0 {
            tracing::debug!(object_id = %id, "Object vanished before update");
            return Ok(false);
        }

        let old = master.row();
        let new = ObjectRow {
            data,
            time_updated: now,
            ..old.clone()
        };
        self.reindex_object(config, old, &new).await?;
        tracing::debug!(object_id = %id, "Modified object");
        Ok(true)
    }

    /// Move an object between visible and deleted.
    ///
    /// Deleting drops every index row first and then flips the status.
    /// Restoring re-checks unique values, flips the status and rebuilds the
    /// index rows. Returns `false` when the object already has `status`.
    pub async fn set_object_status(&self, viewer: &Viewer, id: Uuid, status: Status) -> Result<bool> {
        let Some(row) = self.load_any_object_row(id).await? else {
            return Err(TrellisError::Validation {
                message: "Cannot change the status of an object that does not exist".to_string(),
                context: ErrorContext::new().with("id", id.to_string()),
            });
        };
        if row.status == status {
            return Ok(false);
        }
        let config = self.schema().object(row.object_type)?;

        if !viewer.is_write_all() {
            let object = Object::new(row.clone());
            if !object.can_modify(&self.context(viewer)).await? {
                return Err(TrellisError::denied(
                    "Viewer does not have permission to modify object",
                ));
            }
        }

        match status {
            Status::Deleted => self.unindex_object(id).await?,
            Status::Visible => {
                for field in &config.unique_index {
                    if let Some(value) = row.data.get(field) {
                        self.check_unique(row.object_type, field, value, id).await?;
                    }
                }
            }
        }

        let now = Utc::now();
        let stmt = Statement::new(
            "UPDATE objects SET status = ?, time_updated = ? WHERE id = ? AND status = ?",
        )
        .bind(status.code())
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(row.status.code());
        let updated = self.client().run(&stmt).await?;
        viewer.delete_cache(&CacheKey::Object(id));
        if updated == 0 {
            return Ok(false);
        }

        if status == Status::Visible {
            let restored = ObjectRow {
                status,
                time_updated: now,
                ..row
            };
            self.index_object(config, &restored).await?;
        }
        tracing::debug!(object_id = %id, status = ?status, "Changed object status");
        Ok(true)
    }

    /// Flip every edge touching `id` from `old_status` to `new_status`.
    ///
    /// Only an all-writing viewer may cascade, and only once the object
    /// itself already carries `new_status`. Returns the number of rows moved.
    pub async fn set_adjacent_edge_status(
        &self,
        viewer: &Viewer,
        id: Uuid,
        new_status: Status,
        old_status: Status,
    ) -> Result<u64> {
        self.cascade_edge_status(viewer, viewer, id, new_status, old_status)
            .await
    }

    /// Cascade on behalf of `writer`, clearing both directions of every moved
    /// edge from the caches of `writer` and `caller`.
    pub(crate) async fn cascade_edge_status(
        &self,
        writer: &Viewer,
        caller: &Viewer,
        id: Uuid,
        new_status: Status,
        old_status: Status,
    ) -> Result<u64> {
        if !writer.is_write_all() {
            return Err(TrellisError::denied(
                "Viewer cannot change the status of all adjacent edges",
            ));
        }
        match self.load_any_object_row(id).await? {
            Some(row) if row.status == new_status => {}
            _ => {
                return Err(TrellisError::Validation {
                    message: "Can only cascade edges of an object that already has the new status"
                        .to_string(),
                    context: ErrorContext::new().with("id", id.to_string()),
                })
            }
        }

        let select = Statement::new(
            "SELECT from_id, type, to_id FROM edges
             WHERE (from_id = ? OR to_id = ?) AND status = ?",
        )
        .bind(id)
        .bind(id)
        .bind(old_status.code());
        let touched = self.client().query_rows(&select).await?;

        let update = Statement::new(
            "UPDATE edges SET status = ?, time_updated = ?
             WHERE (from_id = ? OR to_id = ?) AND status = ?",
        )
        .bind(new_status.code())
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(id)
        .bind(old_status.code());
        let moved = self.client().run(&update).await?;

        for row in &touched {
            let from_id: Uuid = column(row, "from_id")?;
            let to_id: Uuid = column(row, "to_id")?;
            let edge_type: i64 = column(row, "type")?;
            let Ok(edge_type) = TypeCode::try_from(edge_type) else {
                continue;
            };
            let reverse = self.schema().reverse_edge_type(edge_type)?;
            self.invalidate_edge(writer, from_id, edge_type, to_id, reverse);
            self.invalidate_edge(caller, from_id, edge_type, to_id, reverse);
        }
        tracing::debug!(object_id = %id, moved, "Cascaded edge status");
        Ok(moved)
    }

    async fn load_any_object_row(&self, id: Uuid) -> Result<Option<ObjectRow>> {
        let stmt = Statement::new(
            "SELECT id, type, data, status, time_created, time_updated FROM objects WHERE id = ?",
        )
        .bind(id);
        match self.client().query_one(&stmt).await? {
            Some(row) => Ok(Some(object_row(&row)?)),
            None => Ok(None),
        }
    }

    // ── Edges ────────────────────────────────────────────────────

    /// Create `row`, and its mirror when the type declares a reverse.
    pub async fn create_edge(&self, viewer: &Viewer, row: &EdgeRow) -> Result<bool> {
        let reverse = self.schema().reverse_edge_type(row.edge_type)?;
        self.invalidate_edge(viewer, row.from_id, row.edge_type, row.to_id, reverse);

        let now = Utc::now().timestamp_millis();
        let pair = mirror(row, reverse);
        match &pair {
            Some(mirror) => {
                futures::try_join!(
                    self.check_edge_create(viewer, row),
                    self.check_edge_create(viewer, mirror)
                )?;
            }
            None => self.check_edge_create(viewer, row).await?,
        }

        let rows: Vec<&EdgeRow> = std::iter::once(row).chain(pair.as_ref()).collect();
        let values = vec!["(?, ?, ?, ?, ?, ?, ?)"; rows.len()].join(", ");
        let mut stmt = Statement::new(format!(
            "INSERT INTO edges (from_id, type, to_id, data, status, time_created, time_updated)
             VALUES {values}"
        ));
        for r in &rows {
            stmt = stmt
                .bind(r.from_id)
                .bind(r.edge_type)
                .bind(r.to_id)
                .bind(r.data.as_str())
                .bind(Status::Visible.code())
                .bind(now)
                .bind(now);
        }
        let written = self
            .client()
            .run(&stmt)
            .await
            .map_err(|e| e.with_context(edge_context(row)))?;

        self.invalidate_edge(viewer, row.from_id, row.edge_type, row.to_id, reverse);
        tracing::debug!(from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id, "Created edge");
        Ok(written == rows.len() as u64)
    }

    /// Replace the payload of a visible edge (and its mirror) with `row.data`.
    pub async fn modify_edge_data(&self, viewer: &Viewer, row: &EdgeRow) -> Result<bool> {
        let stmt = Statement::new("UPDATE edges SET data = ?, time_updated = ?")
            .bind(row.data.as_str())
            .bind(Utc::now().timestamp_millis());
        let (written, expected) = self.update_edge_pair(viewer, row, stmt).await?;
        tracing::debug!(from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id, "Modified edge");
        Ok(written == expected)
    }

    /// Soft-delete a visible edge (and its mirror).
    pub async fn delete_edge(&self, viewer: &Viewer, row: &EdgeRow) -> Result<bool> {
        let stmt = Statement::new("UPDATE edges SET status = ?, time_updated = ?")
            .bind(Status::Deleted.code())
            .bind(Utc::now().timestamp_millis());
        let (written, expected) = self.update_edge_pair(viewer, row, stmt).await?;
        tracing::debug!(from_id = %row.from_id, edge_type = row.edge_type, to_id = %row.to_id, "Deleted edge");
        Ok(written == expected)
    }

    /// Authorize both directions, then apply `update` to the visible rows of
    /// the pair in one statement. Returns rows written and rows expected.
    async fn update_edge_pair(
        &self,
        viewer: &Viewer,
        row: &EdgeRow,
        update: Statement,
    ) -> Result<(u64, u64)> {
        let reverse = self.schema().reverse_edge_type(row.edge_type)?;
        self.invalidate_edge(viewer, row.from_id, row.edge_type, row.to_id, reverse);

        let pair = mirror(row, reverse);
        match &pair {
            Some(mirror) => {
                futures::try_join!(
                    self.check_edge_modify(viewer, row),
                    self.check_edge_modify(viewer, mirror)
                )?;
            }
            None => self.check_edge_modify(viewer, row).await?,
        }

        let rows: Vec<&EdgeRow> = std::iter::once(row).chain(pair.as_ref()).collect();
        let expected = rows.len() as u64;
        let clauses =
            vec!["(from_id = ? AND type = ? AND to_id = ? AND status = ?)"; rows.len()].join(" OR ");
        let bind_rows = |mut stmt: Statement| {
            for r in &rows {
                stmt = stmt
                    .bind(r.from_id)
                    .bind(r.edge_type)
                    .bind(r.to_id)
                    .bind(Status::Visible.code());
            }
            stmt
        };

        // A pair missing one direction is left untouched.
        let present = bind_rows(Statement::new(format!(
            "SELECT COUNT(*) AS n FROM edges WHERE {clauses}"
        )));
        let visible: i64 = match self.client().query_one(&present).await? {
            Some(found) => column(&found, "n")?,
            None => 0,
        };
        if visible != expected as i64 {
            tracing::warn!(
                from_id = %row.from_id,
                edge_type = row.edge_type,
                to_id = %row.to_id,
                visible,
                "Edge pair is incomplete, not updated"
            );
            return Ok((0, expected));
        }

        let stmt = bind_rows(
            Statement::new(format!("{} WHERE {clauses}", update.sql()))
                .bind_all(update.params().iter().cloned()),
        );
        let written = self.client().run(&stmt).await?;

        self.invalidate_edge(viewer, row.from_id, row.edge_type, row.to_id, reverse);
        Ok((written, expected))
    }
}

/// The mirror row written alongside `row`; `None` when the type has no
/// reverse or when a self-reverse edge loops back onto its own triple.
fn mirror(row: &EdgeRow, reverse: Option<TypeCode>) -> Option<EdgeRow> {
    let reverse = reverse?;
    if reverse == row.edge_type && row.from_id == row.to_id {
        return None;
    }
    Some(row.mirrored(reverse))
}
