use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use trellis_core::config::{CacheConfig, StoreConfig};
use trellis_core::error::Result;
use trellis_core::reader::GraphReader;
use trellis_core::registry::Schema;
use trellis_core::types::TypeCode;
use trellis_core::viewer::{CacheKey, Viewer};
use trellis_core::{Edge, Object, RuleContext};

use crate::client::StoreClient;

/// The graph store: the only component that mutates durable state.
///
/// Clone is cheap; the schema is shared and immutable.
#[derive(Clone)]
pub struct GraphStore {
    client: StoreClient,
    schema: Arc<Schema>,
    cache: CacheConfig,
}

impl GraphStore {
    /// Open the configured database and apply migrations.
    pub async fn connect(config: &StoreConfig, schema: Arc<Schema>) -> Result<Self> {
        let client = StoreClient::connect(&config.database, config.retry.clone()).await?;
        client.migrate().await?;
        Ok(Self::new(client, schema, config.cache.clone()))
    }

    pub fn new(client: StoreClient, schema: Arc<Schema>, cache: CacheConfig) -> Self {
        Self {
            client,
            schema,
            cache,
        }
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Attempts and per-attempt wait for coalescing reads on one viewer.
    pub(crate) fn coalesce(&self) -> (u32, Duration) {
        (
            self.cache.coalesce_attempts,
            Duration::from_millis(self.cache.coalesce_wait_ms),
        )
    }

    pub(crate) fn context<'a>(&'a self, viewer: &'a Viewer) -> RuleContext<'a> {
        RuleContext::new(self, viewer)
    }

    /// Drop every cached key an edge write can affect, in both directions.
    pub(crate) fn invalidate_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
        to_id: Uuid,
        reverse_type: Option<TypeCode>,
    ) {
        let mut keys = vec![
            CacheKey::Edge {
                from_id,
                edge_type,
                to_id,
            },
            CacheKey::EdgeList { from_id, edge_type },
        ];
        if let Some(reverse_type) = reverse_type {
            keys.push(CacheKey::Edge {
                from_id: to_id,
                edge_type: reverse_type,
                to_id: from_id,
            });
            keys.push(CacheKey::EdgeList {
                from_id: to_id,
                edge_type: reverse_type,
            });
        }
        for key in &keys {
            viewer.delete_cache(key);
        }
    }
}

#[async_trait]
impl GraphReader for GraphStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn get_object(&self, viewer: &Viewer, id: Uuid) -> Result<Option<Object>> {
        GraphStore::get_object(self, viewer, id).await
    }

    async fn get_single_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
        to_id: Uuid,
    ) -> Result<Option<Edge>> {
        GraphStore::get_single_edge(self, viewer, from_id, edge_type, to_id).await
    }

    async fn get_edge(
        &self,
        viewer: &Viewer,
        from_id: Uuid,
        edge_type: TypeCode,
    ) -> Result<Vec<Edge>> {
        GraphStore::get_edge(self, viewer, from_id, edge_type).await
    }
}
