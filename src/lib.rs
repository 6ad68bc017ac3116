//! SOPS Secret Controller Library
//!
//! Materializes SOPS-encrypted `SopsSecret` declarations into Kubernetes
//! Secrets and manages the key material the decryption tool needs through
//! `SopsKey` declarations.
//!
//! ## Quick Start
//!
//! ```rust
//! use sops_secret_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
