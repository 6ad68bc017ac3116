//! # Controller
//!
//! Core controller modules for the SOPS Secret Controller.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `finalizer`: finalizer token helpers
//! - `gateway`: sops and gpg process adapters
//! - `index`: derived Secret lookup by owning declaration
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `store`: persistence seam over the Kubernetes API

pub mod backoff;
pub mod finalizer;
pub mod gateway;
pub mod index;
pub mod reconciler;
pub mod server;
pub mod store;
