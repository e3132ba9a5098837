//! Workflow definition and lifecycle engine for conduit.
//!
//! This crate owns the workflow aggregate and everything needed to change it
//! safely:
//!
//! - **Graph Model**: a rooted tree of nodes plus join nodes, stored in petgraph
//! - **Classification**: every node gets an explicit kind before anything else
//! - **Resolution & Validation**: node references are checked against the project
//! - **Naming**: deterministic names and refs for unnamed nodes
//! - **Hook Lifecycle**: hooks are diffed by identity and (un)registered
//! - **Mutations**: insert, update, delete and as-code push as storage transactions

pub mod classify;
pub mod definition;
pub mod entity;
pub mod error;
pub mod graph;
pub mod hook;
pub mod lifecycle;
pub mod mutation;
pub mod namer;
pub mod node;
pub mod notification;
pub mod payload;
pub mod push;
pub mod resolver;
pub mod store;
pub mod validator;

#[cfg(test)]
mod testing;

pub use definition::Workflow;
pub use entity::{
    Application, Environment, GroupPermission, Label, Permission, Pipeline, Project,
    ProjectIntegration,
};
pub use error::{EntityKind, ErrorKind, WorkflowError};
pub use graph::WorkflowData;
pub use hook::{HookConfig, HookConfigValue, HookModel, NodeHook};
pub use lifecycle::{HookDefinition, HookReference, HookService, HookServiceError};
pub use mutation::{Mutation, UpdateOptions, WorkflowService};
pub use node::{Node, NodeContext, NodeId, NodeKind, NodeType};
pub use notification::{Notification, NotificationKind};
pub use push::{AsCodeBundle, PushOptions, PushOutcome};
pub use resolver::ResolvedEntities;
pub use store::{Catalog, ImportOutcome, StoreError, StoreTx, WorkflowLookup, WorkflowStore};
