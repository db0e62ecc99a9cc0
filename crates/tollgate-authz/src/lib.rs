//! Tollgate policy engine shared by the gateway and its tooling.
//!
//! # Purpose
//! Evaluates `(subject, domain, object, action)` requests against a compiled,
//! tenant-scoped rule set with role inheritance and deny-overrides.
//!
//! # How it fits
//! The gateway's authorization stage owns an [`PolicyEngine`] handle. Policy
//! data arrives through a [`PolicySource`] (YAML file, in-memory store) and is
//! compiled into an immutable [`PolicySnapshot`] that is swapped atomically.
//!
//! # Key invariants
//! - Domains are isolated; roles granted in one domain never apply in another.
//! - Deny overrides allow, and the absence of a matching rule is a deny.
//! - Role traversal terminates on cyclic bindings.
//! - Malformed policy data is rejected at load time, never at request time.
//!
//! # Important configuration
//! - [`PolicyModel`] selects object/action matchers and the anonymous subject.
//!
//! # Examples
//! ```rust
//! use tollgate_authz::{ObjectMatcher, ObjectPattern, wildcard_match};
//!
//! assert!(wildcard_match("/data/*", "/data/report"));
//! let users = ObjectPattern::compile(ObjectMatcher::KeyMatch2, "/users/:id").unwrap();
//! assert!(users.matches("/users/42"));
//! ```
//!
//! # Common pitfalls
//! - Granting with domain `*`; rules must name a concrete tenant.
//! - Under `key_match2`, `*` only expands after `/`: use `/v1/me/*`, not
//!   `/v1/me*`.

mod engine;
mod errors;
mod matcher;
mod model;
mod roles;
mod snapshot;
mod source;
mod types;

pub use engine::PolicyEngine;
pub use errors::{AuthzError, AuthzResult};
pub use matcher::{
    ActionMatcher, ActionPattern, ObjectMatcher, ObjectPattern, validate_key_match2, wildcard_match,
};
pub use model::{DEFAULT_ANONYMOUS_SUBJECT, PolicyModel};
pub use roles::RoleGraph;
pub use snapshot::PolicySnapshot;
pub use source::{PolicyDocument, PolicySource};
pub use types::{AccessRequest, Decision, DecisionReason, Effect, PolicyRule, RoleBinding};
