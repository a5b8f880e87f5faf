//! Trellis Graph: relational store for the object/edge graph.
//!
//! This crate is the single mutation point for durable graph state. Every
//! read is privacy-filtered for its viewer and every write is authorized,
//! validated and followed by index maintenance.

pub mod batch;
pub mod client;
pub mod identity;
pub mod indices;
pub mod mutations;
pub mod queries;
pub mod store;
mod validate;

pub use batch::{EdgeEnd, NewEdge};
pub use client::{Param, Statement, StoreClient};
pub use store::GraphStore;
