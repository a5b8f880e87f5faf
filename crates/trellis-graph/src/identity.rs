//! Root objects and external-identity linkage.

use serde_json::Value;
use uuid::Uuid;

use trellis_core::error::{ErrorContext, Result, TrellisError};
use trellis_core::types::{Data, EdgeRow, TypeCode, IDENTITY_EDGE, IDENTITY_SUBJECT_FIELD, ROOT_TYPE};
use trellis_core::viewer::Viewer;

use crate::store::GraphStore;

impl GraphStore {
    /// Create a root object named `name`; object types list its id as their
    /// `root_id` to become enumerable.
    pub async fn generate_root_id(&self, name: &str) -> Result<Uuid> {
        let writer = Viewer::write_all();
        let mut data = Data::new();
        data.insert("name".to_string(), Value::String(name.to_string()));
        match self.create_object(&writer, ROOT_TYPE, data).await? {
            Some(id) => {
                tracing::info!(root_id = %id, name, "Generated root object");
                Ok(id)
            }
            None => Err(TrellisError::storage("Root object was not stored", None)),
        }
    }

    /// Create the account object for an external subject and link the
    /// subject to it.
    pub async fn provision_identity(
        &self,
        subject: Uuid,
        object_type: TypeCode,
        mut data: Data,
    ) -> Result<Uuid> {
        if self.viewer_for_subject(subject).await?.is_some() {
            return Err(TrellisError::conflict(
                "Identity is already linked to an object",
                ErrorContext::new().with("subject", subject.to_string()),
            ));
        }

        data.insert(
            IDENTITY_SUBJECT_FIELD.to_string(),
            Value::String(subject.to_string()),
        );
        let writer = Viewer::write_all();
        let Some(id) = self.create_object(&writer, object_type, data).await? else {
            return Err(TrellisError::storage("Account object was not stored", None));
        };

        let link = EdgeRow::new(subject, IDENTITY_EDGE, id);
        match self.create_edge(&writer, &link).await {
            Ok(true) => {
                tracing::info!(object_id = %id, "Provisioned identity");
                Ok(id)
            }
            Ok(false) => {
                self.rollback_object(id).await;
                Err(TrellisError::storage("Identity edge was not stored", None))
            }
            Err(e) => {
                self.rollback_object(id).await;
                Err(e)
            }
        }
    }

    /// Viewer for the object linked to `subject`, if the link and the object
    /// both still exist.
    pub async fn viewer_for_subject(&self, subject: Uuid) -> Result<Option<Viewer>> {
        let reader = Viewer::read_all();
        let links = self.get_edge(&reader, subject, IDENTITY_EDGE).await?;
        if links.len() > 1 {
            tracing::warn!(links = links.len(), "Subject linked to several objects, using the oldest");
        }
        for link in links {
            if self.get_object(&reader, link.to_id()).await?.is_some() {
                return Ok(Some(Viewer::new(link.to_id())));
            }
        }
        Ok(None)
    }
}
