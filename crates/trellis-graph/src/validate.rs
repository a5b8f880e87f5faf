//! Shape, type and referential checks run before any write.
//!
//! Nothing here mutates state; every failure is raised before the first
//! statement of the write it guards.

use futures::future::try_join_all;
use serde_json::Value;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::registry::ObjectTypeConfig;
use trellis_core::types::{
    Data, EdgeRow, TypeCode, CREATOR_FIELD, IDENTITY_EDGE, IDENTITY_SUBJECT_FIELD, ROOT_TYPE,
};
use trellis_core::viewer::Viewer;
use trellis_core::Edge;

use crate::store::GraphStore;

/// Payload keys the store itself writes; accepted even under strict typing.
fn is_system_field(key: &str) -> bool {
    key == CREATOR_FIELD || key == IDENTITY_SUBJECT_FIELD
}

impl GraphStore {
    // ── Objects ──────────────────────────────────────────────────

    /// Type and payload checks shared by every object write.
    ///
    /// The reserved root type may only be written by an all-writing viewer.
    pub(crate) fn check_object_shape(
        &self,
        viewer: &Viewer,
        object_type: TypeCode,
        data: &Data,
    ) -> Result<&ObjectTypeConfig> {
        let config = self.schema().object(object_type)?;
        if object_type == ROOT_TYPE && !viewer.is_write_all() {
            return Err(TrellisError::Validation {
                message: "Invalid or unknown object type provided".to_string(),
                context: ErrorContext::new().with("type", object_type),
            });
        }
        if data.is_empty() {
            return Err(TrellisError::validation(
                "Cannot mutate an object using an empty data object",
            ));
        }
        Ok(config)
    }

    /// Check and normalize every declared field present in `data`.
    ///
    /// Undeclared keys pass through unless the type is strictly typed.
    pub(crate) async fn check_object_types(
        &self,
        viewer: &Viewer,
        config: &ObjectTypeConfig,
        data: Data,
    ) -> Result<Data> {
        if config.strict_types {
            if let Some(key) = data
                .keys()
                .find(|key| !config.fields.contains_key(*key) && !is_system_field(key))
            {
                return Err(TrellisError::schema_mismatch(
                    "Object has unexpected field",
                    ErrorContext::new()
                        .with("type", config.name.as_str())
                        .with("field", key.as_str()),
                ));
            }
        }

        let checks = data.iter().map(|(key, value)| async move {
            let ok = match config.fields.get(key) {
                Some(field_type) => field_type.check(self, viewer, value).await?,
                None => true,
            };
            Ok::<_, TrellisError>((key, ok))
        });
        for (key, ok) in try_join_all(checks).await? {
            if !ok {
                return Err(TrellisError::schema_mismatch(
                    "Object invalid type for field",
                    ErrorContext::new()
                        .with("type", config.name.as_str())
                        .with("field", key.as_str()),
                ));
            }
        }

        Ok(data
            .into_iter()
            .map(|(key, value)| {
                let value: Value = match config.fields.get(&key) {
                    Some(field_type) => field_type.normalize(value),
                    None => value,
                };
                (key, value)
            })
            .collect())
    }

    // ── Edges ────────────────────────────────────────────────────

    /// Referential, authorization and duplicate checks before an edge insert.
    pub(crate) async fn check_edge_create(&self, viewer: &Viewer, row: &EdgeRow) -> Result<()> {
        let config = self.schema().edge(row.edge_type)?;
        let reader = Viewer::read_all();

        match row.edge_type {
            IDENTITY_EDGE => {}
            ROOT_TYPE => {
                let linked = match self.get_object(&reader, row.to_id).await? {
                    Some(object) => {
                        self.schema().object(object.object_type())?.root_id == Some(row.from_id)
                    }
                    None => false,
                };
                if !linked {
                    return Err(TrellisError::Validation {
                        message: "Cannot make a root edge where the from id is not a root id"
                            .to_string(),
                        context: edge_context(row),
                    });
                }
            }
            _ => {
                let (from, to) = futures::try_join!(
                    self.get_object(&reader, row.from_id),
                    self.get_object(&reader, row.to_id)
                )?;
                let Some(from) = from else {
                    return Err(TrellisError::Validation {
                        message: "Cannot load from object for edge".to_string(),
                        context: edge_context(row),
                    });
                };
                let Some(to) = to else {
                    return Err(TrellisError::Validation {
                        message: "Cannot load to object for edge".to_string(),
                        context: edge_context(row),
                    });
                };
                if !config.from_types.is_empty() && !config.from_types.contains(&from.object_type())
                {
                    return Err(TrellisError::Validation {
                        message: "Invalid from type for edge".to_string(),
                        context: edge_context(row).with("from_type", from.object_type()),
                    });
                }
                if !config.to_types.is_empty() && !config.to_types.contains(&to.object_type()) {
                    return Err(TrellisError::Validation {
                        message: "Invalid to type for edge".to_string(),
                        context: edge_context(row).with("to_type", to.object_type()),
                    });
                }
            }
        }

        if !viewer.is_write_all() {
            let edge = Edge::new(row.clone());
            if !edge.can_create(&self.context(viewer)).await? {
                return Err(TrellisError::denied(
                    "Viewer does not have permission to create edge",
                ));
            }
        }

        if self
            .get_single_edge(&reader, row.from_id, row.edge_type, row.to_id)
            .await?
            .is_some()
        {
            return Err(TrellisError::conflict(
                "Attempting to create an edge that already exists",
                edge_context(row),
            ));
        }
        Ok(())
    }

    /// Authorization check before an edge update or delete.
    pub(crate) async fn check_edge_modify(&self, viewer: &Viewer, row: &EdgeRow) -> Result<()> {
        self.schema().edge(row.edge_type)?;
        if viewer.is_write_all() {
            return Ok(());
        }
        let edge = Edge::new(row.clone());
        if !edge.can_modify(&self.context(viewer)).await? {
            return Err(TrellisError::denied(
                "Viewer does not have permission to modify edge",
            ));
        }
        Ok(())
    }
}

pub(crate) fn edge_context(row: &EdgeRow) -> ErrorContext {
    ErrorContext::new()
        .with("from_id", row.from_id.to_string())
        .with("type", row.edge_type)
        .with("to_id", row.to_id.to_string())
}
