//! Identity resolution for the request pipeline.
//!
//! # Purpose
//! Groups the subject model, session issuance, and bearer verification used
//! by the auto sign-in stage.
pub mod idp_registry;
pub mod oidc;
pub mod session;
pub mod subject;
pub mod verifier;
