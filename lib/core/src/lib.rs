//! Core domain types and utilities for conduit.
//!
//! This crate provides the foundational types shared by the workflow engine and
//! its storage and hook-service adapters: strongly-typed identifiers, the
//! informational messages collected by mutations, the principal performing a
//! change, and the rootcause-based `Result` alias.

pub mod error;
pub mod id;
pub mod message;
pub mod principal;

pub use error::Result;
pub use id::{
    ApplicationId, EnvironmentId, HookId, HookModelId, IntegrationId, ParseIdError, PipelineId,
    ProjectId, UserId, WorkflowId,
};
pub use message::{Message, MessageLevel};
pub use principal::Principal;
