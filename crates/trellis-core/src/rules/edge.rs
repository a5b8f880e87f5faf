//! Canned rules over edge candidates.
//!
//! Endpoint objects are loaded with the caller's own viewer, so an endpoint
//! the caller cannot see counts as missing. Missing endpoints never raise.

use async_trait::async_trait;
use uuid::Uuid;

use super::{Rule, Verdict};
use crate::entity::{Edge, Object, Operation};
use crate::error::Result;
use crate::reader::RuleContext;
use crate::types::TypeCode;

/// Which endpoint of an edge a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Dest,
    Either,
}

/// How endpoint presence is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMatch {
    Source,
    Dest,
    Both,
    Either,
}

impl EndpointMatch {
    fn holds(self, source: bool, dest: bool) -> bool {
        match self {
            EndpointMatch::Source => source,
            EndpointMatch::Dest => dest,
            EndpointMatch::Both => source && dest,
            EndpointMatch::Either => source || dest,
        }
    }
}

/// A single endpoint side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Dest,
}

impl Side {
    fn of(self, edge: &Edge) -> Uuid {
        match self {
            Side::Source => edge.from_id(),
            Side::Dest => edge.to_id(),
        }
    }
}

async fn load_endpoints(
    edge: &Edge,
    ctx: &RuleContext<'_>,
) -> Result<(Option<Object>, Option<Object>)> {
    futures::try_join!(
        ctx.graph.get_object(ctx.viewer, edge.from_id()),
        ctx.graph.get_object(ctx.viewer, edge.to_id()),
    )
}

fn is_endpoint(edge: &Edge, endpoint: Endpoint, id: Uuid) -> bool {
    match endpoint {
        Endpoint::Source => edge.from_id() == id,
        Endpoint::Dest => edge.to_id() == id,
        Endpoint::Either => edge.from_id() == id || edge.to_id() == id,
    }
}

/// Pass when the viewer is the chosen endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AllowViewerEndpoint(pub Endpoint);

#[async_trait]
impl Rule<Edge> for AllowViewerEndpoint {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if !ctx.viewer.is_logged_out() && is_endpoint(edge, self.0, ctx.viewer_id()) {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}

/// Fail unless the viewer is one of the two endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyNotViewerEndpoint;

#[async_trait]
impl Rule<Edge> for DenyNotViewerEndpoint {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if !ctx.viewer.is_logged_out() && is_endpoint(edge, Endpoint::Either, ctx.viewer_id()) {
            return Ok(Verdict::Skip);
        }
        Ok(Verdict::Fail)
    }
}

/// Pass when the chosen endpoint objects can be loaded by the viewer.
#[derive(Debug, Clone, Copy)]
pub struct AllowEndpointObjects(pub EndpointMatch);

#[async_trait]
impl Rule<Edge> for AllowEndpointObjects {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        let (source, dest) = load_endpoints(edge, ctx).await?;
        if self.0.holds(source.is_some(), dest.is_some()) {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}

/// Fail when the chosen endpoint objects cannot be loaded by the viewer.
#[derive(Debug, Clone, Copy)]
pub struct DenyMissingEndpoint(pub EndpointMatch);

#[async_trait]
impl Rule<Edge> for DenyMissingEndpoint {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        let (source, dest) = load_endpoints(edge, ctx).await?;
        if self.0.holds(source.is_some(), dest.is_some()) {
            return Ok(Verdict::Skip);
        }
        Ok(Verdict::Fail)
    }
}

/// Pass when both endpoints load and the viewer created either of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowEndpointCreator;

#[async_trait]
impl Rule<Edge> for AllowEndpointCreator {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        let (Some(source), Some(dest)) = load_endpoints(edge, ctx).await? else {
            return Ok(Verdict::Skip);
        };
        let viewer_id = ctx.viewer_id();
        let created = [source, dest]
            .iter()
            .any(|object| object.creator_id() == Some(viewer_id));
        if created {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}

/// Pass when an edge of `edge_types` runs from the chosen endpoint to the viewer.
#[derive(Debug, Clone)]
pub struct AllowViewerEdgeOnEndpoint {
    pub side: Side,
    pub edge_types: Vec<TypeCode>,
}

impl AllowViewerEdgeOnEndpoint {
    pub fn new(side: Side, edge_types: impl Into<Vec<TypeCode>>) -> Self {
        Self {
            side,
            edge_types: edge_types.into(),
        }
    }
}

#[async_trait]
impl Rule<Edge> for AllowViewerEdgeOnEndpoint {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        let endpoint = self.side.of(edge);
        for &edge_type in &self.edge_types {
            let found = ctx
                .graph
                .get_single_edge(ctx.all_seeing(), endpoint, edge_type, ctx.viewer_id())
                .await?;
            if found.is_some() {
                return Ok(Verdict::Pass);
            }
        }
        Ok(Verdict::Skip)
    }
}

/// Fail when an edge of `edge_type` already joins the same two endpoints.
#[derive(Debug, Clone, Copy)]
pub struct DenyExistsOtherEdge {
    pub edge_type: TypeCode,
}

#[async_trait]
impl Rule<Edge> for DenyExistsOtherEdge {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if ctx.viewer.is_logged_out() {
            return Ok(Verdict::Skip);
        }
        let other = ctx
            .graph
            .get_single_edge(ctx.all_seeing(), edge.from_id(), self.edge_type, edge.to_id())
            .await?;
        if other.is_some() {
            return Ok(Verdict::Fail);
        }
        Ok(Verdict::Skip)
    }
}

/// Pass when the viewer may see the edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowIfCanSee;

#[async_trait]
impl Rule<Edge> for AllowIfCanSee {
    async fn evaluate(&self, edge: &Edge, ctx: &RuleContext<'_>) -> Result<Verdict> {
        if edge.can(ctx, Operation::See).await? {
            return Ok(Verdict::Pass);
        }
        Ok(Verdict::Skip)
    }
}
