//! Gateway HTTP API.
//!
//! # Purpose
//! The small route table behind the request pipeline: health and system
//! info, the signed-in user's own record, and operator endpoints for policy
//! reload and on-demand directory sync. Every route is reached only after
//! the pipeline has authorized the request.
pub mod admin;
pub mod error;
pub mod me;
pub mod system;
pub mod types;
