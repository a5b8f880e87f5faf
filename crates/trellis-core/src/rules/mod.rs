//! Tri-state privacy rules and the ordered-list evaluator.
//!
//! A rule inspects one candidate (an [`Object`](crate::entity::Object) or an
//! [`Edge`](crate::entity::Edge)) and returns a [`Verdict`]. A rule list is
//! walked in order: the first `Pass` grants, the first `Fail` denies, and a
//! list in which every rule skips (or an empty list) denies.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::Operation;
use crate::error::Result;
use crate::reader::RuleContext;

pub mod edge;
pub mod object;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Skip,
}

#[async_trait]
pub trait Rule<T: Sync>: Send + Sync + fmt::Debug {
    async fn evaluate(&self, candidate: &T, ctx: &RuleContext<'_>) -> Result<Verdict>;
}

pub type RuleList<T> = Vec<Arc<dyn Rule<T>>>;

/// Walk `rules` in order; see the module docs for the decision table.
pub async fn evaluate<T: Sync>(
    rules: &[Arc<dyn Rule<T>>],
    candidate: &T,
    ctx: &RuleContext<'_>,
) -> Result<bool> {
    for rule in rules {
        match rule.evaluate(candidate, ctx).await? {
            Verdict::Pass => {
                tracing::trace!(rule = ?rule, "rule passed");
                return Ok(true);
            }
            Verdict::Fail => {
                tracing::trace!(rule = ?rule, "rule failed");
                return Ok(false);
            }
            Verdict::Skip => {}
        }
    }
    Ok(false)
}

/// Shorthand for wrapping a rule into a list entry.
pub fn rule<T: Sync, R: Rule<T> + 'static>(r: R) -> Arc<dyn Rule<T>> {
    Arc::new(r)
}

// ── Catch-all rules ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllow;

#[async_trait]
impl<T: Sync> Rule<T> for AlwaysAllow {
    async fn evaluate(&self, _: &T, _: &RuleContext<'_>) -> Result<Verdict> {
        Ok(Verdict::Pass)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDeny;

#[async_trait]
impl<T: Sync> Rule<T> for AlwaysDeny {
    async fn evaluate(&self, _: &T, _: &RuleContext<'_>) -> Result<Verdict> {
        Ok(Verdict::Fail)
    }
}

// ── Privacy ───────────────────────────────────────────────────────

/// Entity-level rule lists, one per operation.
pub struct Privacy<T: Sync> {
    pub cansee: RuleList<T>,
    pub cancreate: RuleList<T>,
    pub canmodify: RuleList<T>,
}

impl<T: Sync> Privacy<T> {
    pub fn new(cansee: RuleList<T>, cancreate: RuleList<T>, canmodify: RuleList<T>) -> Self {
        Self {
            cansee,
            cancreate,
            canmodify,
        }
    }

    /// Empty lists everywhere, which denies every operation.
    pub fn deny_all() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn rules(&self, op: Operation) -> &[Arc<dyn Rule<T>>] {
        match op {
            Operation::See => &self.cansee,
            Operation::Create => &self.cancreate,
            Operation::Modify => &self.canmodify,
        }
    }
}

impl<T: Sync> Clone for Privacy<T> {
    fn clone(&self) -> Self {
        Self {
            cansee: self.cansee.clone(),
            cancreate: self.cancreate.clone(),
            canmodify: self.canmodify.clone(),
        }
    }
}

impl<T: Sync> Default for Privacy<T> {
    fn default() -> Self {
        Self::deny_all()
    }
}

impl<T: Sync> fmt::Debug for Privacy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Privacy")
            .field("cansee", &self.cansee)
            .field("cancreate", &self.cancreate)
            .field("canmodify", &self.canmodify)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory `GraphReader` used by the core unit tests.

    use std::collections::HashMap;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::entity::{Edge, Object};
    use crate::error::Result;
    use crate::reader::GraphReader;
    use crate::registry::Schema;
    use crate::types::{Data, EdgeRow, ObjectRow, TypeCode};
    use crate::viewer::Viewer;

    /// Objects and edges held in maps; reads ignore privacy.
    pub struct FakeGraph {
        pub schema: Schema,
        pub objects: HashMap<Uuid, Object>,
        pub edges: Vec<Edge>,
    }

    impl FakeGraph {
        pub fn new(schema: Schema) -> Self {
            Self {
                schema,
                objects: HashMap::new(),
                edges: Vec::new(),
            }
        }

        pub fn add_object(&mut self, object_type: TypeCode, data: serde_json::Value) -> Object {
            let data: Data = match data {
                serde_json::Value::Object(map) => map,
                _ => Data::new(),
            };
            let object = Object::new(ObjectRow::provisional(Uuid::new_v4(), object_type, data));
            self.objects.insert(object.id(), object.clone());
            object
        }

        pub fn add_edge(&mut self, from_id: Uuid, edge_type: TypeCode, to_id: Uuid) -> Edge {
            let edge = Edge::new(EdgeRow::new(from_id, edge_type, to_id));
            self.edges.push(edge.clone());
            edge
        }
    }

    #[async_trait]
    impl GraphReader for FakeGraph {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        async fn get_object(&self, _viewer: &Viewer, id: Uuid) -> Result<Option<Object>> {
            Ok(self.objects.get(&id).cloned())
        }

        async fn get_single_edge(
            &self,
            _viewer: &Viewer,
            from_id: Uuid,
            edge_type: TypeCode,
            to_id: Uuid,
        ) -> Result<Option<Edge>> {
            Ok(self
                .edges
                .iter()
                .find(|e| e.from_id() == from_id && e.edge_type() == edge_type && e.to_id() == to_id)
                .cloned())
        }

        async fn get_edge(
            &self,
            _viewer: &Viewer,
            from_id: Uuid,
            edge_type: TypeCode,
        ) -> Result<Vec<Edge>> {
            Ok(self
                .edges
                .iter()
                .filter(|e| e.from_id() == from_id && e.edge_type() == edge_type)
                .cloned()
                .collect())
        }
    }
}
