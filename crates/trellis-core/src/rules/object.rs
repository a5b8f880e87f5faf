//! Canned rules over object candidates.

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{Rule, Verdict};
use crate::entity::{Object, Operation};
use crate::error::Result;
use crate::reader::RuleContext;
use crate::types::TypeCode;

/// Pass when the viewer is the object itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowViewerIsSelf;

#[async_trait]
impl Rule<Object> for AllowViewerIsSelf {
    async fn evaluate(&self, object: &Object, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if !ctx.viewer.is_logged_out() && object.id() == ctx.viewer_id() {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}

/// Pass when the object's `creator_id` is the viewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowViewerIsCreator;

#[async_trait]
impl Rule<Object> for AllowViewerIsCreator {
    async fn evaluate(&self, object: &Object, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        match object.creator_id() {
            Some(creator) if creator == ctx.viewer_id() => Ok(Verdict::Pass),
            _ => Ok(Verdict::Skip),
        }
    }
}

/// Pass when an edge of one of `edge_types` runs from the object to the viewer.
#[derive(Debug, Clone)]
pub struct AllowViewerEdge {
    pub edge_types: Vec<TypeCode>,
}

impl AllowViewerEdge {
    pub fn new(edge_types: impl Into<Vec<TypeCode>>) -> Self {
        Self {
            edge_types: edge_types.into(),
        }
    }
}

#[async_trait]
impl Rule<Object> for AllowViewerEdge {
    async fn evaluate(&self, object: &Object, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        let lookups = self.edge_types.iter().map(|&edge_type| {
            ctx.graph
                .get_single_edge(ctx.all_seeing(), object.id(), edge_type, ctx.viewer_id())
        });
        let found = try_join_all(lookups).await?;
        if found.iter().any(Option::is_some) {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}

/// Pass when some edge of `edge_types` leads from the object to an object the
/// viewer can load.
#[derive(Debug, Clone)]
pub struct AllowVisibleEdgeDestination {
    pub edge_types: Vec<TypeCode>,
}

impl AllowVisibleEdgeDestination {
    pub fn new(edge_types: impl Into<Vec<TypeCode>>) -> Self {
        Self {
            edge_types: edge_types.into(),
        }
    }
}

#[async_trait]
impl Rule<Object> for AllowVisibleEdgeDestination {
    async fn evaluate(&self, object: &Object, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        for &edge_type in &self.edge_types {
            let edges = ctx
                .graph
                .get_edge(ctx.all_seeing(), object.id(), edge_type)
                .await?;
            let loads = edges
                .iter()
                .map(|edge| ctx.graph.get_object(ctx.viewer, edge.to_id()));
            if try_join_all(loads).await?.iter().any(Option::is_some) {
                return Ok(Verdict::Pass);
            }
        }
        Ok(Verdict::Skip)
    }
}

/// Pass when the viewer may see the object; used for write lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowIfCanSee;

#[async_trait]
impl Rule<Object> for AllowIfCanSee {
    async fn evaluate(&self, object: &Object, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if object.can(ctx, Operation::See).await? {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}
