//! trellis-core: Viewer, privacy engine and type registry for the Trellis graph store.
//!
//! This crate provides everything the store needs besides storage itself:
//! - Entity rows and reserved type codes
//! - The per-request `Viewer` and its coalescing cache
//! - Tri-state privacy rules, canned policies and the schema registry
//! - Declared field types
//! - Configuration and the shared error type

pub mod config;
pub mod entity;
pub mod error;
pub mod fieldtype;
pub mod policy;
pub mod reader;
pub mod registry;
pub mod rules;
pub mod types;
pub mod viewer;

pub use entity::{Edge, Object, Operation};
pub use error::{ErrorContext, Result, Severity, TrellisError};
pub use reader::{GraphReader, RuleContext};
pub use registry::{Schema, SchemaBuilder};
pub use viewer::Viewer;
