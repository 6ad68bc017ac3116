//! # Runtime
//!
//! Process bootstrap and the controller watch loops.
//!
//! - `initialization`: crypto provider, logging, metrics, probe server and context
//! - `watch_loop`: the `SopsSecret` and `SopsKey` controllers
//! - `error_policy`: requeue decisions for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
