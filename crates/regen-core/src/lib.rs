//! Incremental generation-pipeline engine.
//!
//! Tracks input resources by content digest, models the legal conversions
//! between artifact kinds as a DAG, and memoizes per-step build outputs so
//! unchanged work is skipped on rebuild.
//!
//! # Modules
//!
//! - [`id`]: ResourceId, KindId, EntryId newtypes
//! - [`error`]: CoreError for infrastructure failures
//! - [`resource`]: ResourceTracker, digest-based change classification
//! - [`kind`]: KindGraph, kinds and acyclic transform edges
//! - [`topology`]: per-query snapshot of the kind graph
//! - [`cache`]: BuildCache, per-step memoization and invalidation
//! - [`pipeline`]: Pipeline, cascading invalidation across all three
//!
//! Every component is constructed over a [`SharedStore`]; components that
//! share a store see each other's records, and their read-modify-write
//! sequences run as exclusive sections of that store.

pub mod cache;
pub mod convert;
pub mod error;
pub mod id;
pub mod kind;
pub mod pipeline;
pub mod resource;
pub mod topology;

// Re-export commonly used types
pub use cache::{BuildCache, CacheConfig, CacheEntry, CheckOutcome, EntryStatus, InvalidateOutcome, StepRecord};
pub use convert::SharedStore;
pub use error::{CoreError, CoreResult};
pub use id::{EntryId, KindId, ResourceId};
pub use kind::{
    ConnectOutcome, Consumer, DefineOutcome, GraphSnapshot, Kind, KindGraph, Producer, RouteHop,
    RouteOutcome, TransformEdge, ValidateOutcome,
};
pub use pipeline::{Candidate, ForgetReport, KindChangeReport, ObserveReport, Pipeline, Plan};
pub use resource::{
    DiffOutcome, GetOutcome, RemoveOutcome, Resource, ResourceTracker, ResourceUpdate,
    UpsertOutcome,
};
pub use topology::Topology;
