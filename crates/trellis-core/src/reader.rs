use async_trait::async_trait;
use uuid::Uuid;

use crate::entity::{Edge, Object};
use crate::error::Result;
use crate::registry::Schema;
use crate::types::TypeCode;
use crate::viewer::Viewer;

/// Privacy-filtered read access to the graph, as seen by rules and field types.
///
/// Implemented by the store; kept here so the rule engine can resolve
/// referenced entities without depending on storage.
#[async_trait]
pub trait GraphReader: Send + Sync {
    fn schema(&self) -> &Schema;

    async fn get_object(&self, viewer: &Viewer, id: Uuid) -> Result<Option<Object>>;

    async fn get_single_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
        to_id: Uuid,
    ) -> Result<Option<Edge>>;

    async fn get_edge(&self, viewer: &Viewer, from_id: Uuid, edge_type: TypeCode)
        -> Result<Vec<Edge>>;
}

/// Everything a rule needs besides its candidate.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub graph: &'a dyn GraphReader,
    pub viewer: &'a Viewer,
}

impl<'a> RuleContext<'a> {
    pub fn new(graph: &'a dyn GraphReader, viewer: &'a Viewer) -> Self {
        Self { graph, viewer }
    }

    pub fn viewer_id(&self) -> Uuid {
        self.viewer.id()
    }

    /// The caller's all-seeing companion, for connectivity lookups.
    pub fn all_seeing(&self) -> &'a Viewer {
        self.viewer.read_all_viewer()
    }

    pub fn schema(&self) -> &'a Schema {
        self.graph.schema()
    }
}
