//! # Gateways
//!
//! Narrow interfaces to the external tools the reconcilers depend on:
//!
//! - [`Decryptor`] turns an encrypted SOPS document into plaintext
//! - [`Keyring`] imports, fingerprints and deletes PGP secret keys
//!
//! The reconcilers never assume how a gateway is implemented. The shipped
//! adapters spawn `sops` and `gpg`, piping every payload through stdin so
//! neither key material nor plaintext touches disk. No gateway retries on its
//! own; a failed call surfaces as an error and the reconciliation is
//! redelivered.

mod decrypt;
mod keyring;

pub use decrypt::SopsDecryptor;
pub use keyring::{parse_fingerprint, GpgKeyring};

use crate::observability::metrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Longest stderr excerpt carried in an error
const MAX_STDERR_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{tool} binary not found: {message}")]
    ToolNotFound { tool: &'static str, message: String },

    #[error("{tool} {operation} could not be run: {source}")]
    Io {
        tool: &'static str,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} {operation} failed (exit code: {code:?}): {stderr}")]
    Failed {
        tool: &'static str,
        operation: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} {operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        tool: &'static str,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{tool} {operation} produced invalid output: {message}")]
    InvalidOutput {
        tool: &'static str,
        operation: &'static str,
        message: String,
    },

    #[error("fingerprint not found in gpg output")]
    FingerprintNotFound,
}

/// Options for a decryption call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Skip MAC verification
    pub ignore_mac: bool,
    /// Ask the tool for verbose diagnostics on stderr
    pub verbose: bool,
}

/// Decryption engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt a YAML document, returning the same document in plaintext
    async fn decrypt(&self, document: &str, options: &DecryptOptions)
        -> Result<String, GatewayError>;
}

/// Trust-material store for PGP secret keys
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Import an ASCII-armored secret key
    async fn import(&self, key: &[u8]) -> Result<(), GatewayError>;

    /// Compute the fingerprint of a key without importing it
    async fn fingerprint(&self, key: &[u8]) -> Result<String, GatewayError>;

    /// Delete a secret key by fingerprint
    async fn delete(&self, fingerprint: &str) -> Result<(), GatewayError>;
}

/// How a tool adapter locates and runs its binary
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Explicit binary path, resolved from PATH when unset
    pub binary: Option<PathBuf>,
    /// GnuPG home exported to the tool
    pub gnupg_home: Option<PathBuf>,
    /// Upper bound for a single invocation
    pub timeout: Duration,
}

impl ToolSettings {
    fn resolve(&self, tool: &'static str) -> Result<PathBuf, GatewayError> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => which::which(tool).map_err(|e| GatewayError::ToolNotFound {
                tool,
                message: e.to_string(),
            }),
        }
    }
}

/// Run a tool to completion, feeding `stdin` and enforcing the timeout
///
/// A non-zero exit status is a [`GatewayError::Failed`].
async fn run_tool(
    tool: &'static str,
    operation: &'static str,
    settings: &ToolSettings,
    args: &[&str],
    stdin: Option<&[u8]>,
) -> Result<Output, GatewayError> {
    let binary = settings.resolve(tool)?;
    let start = Instant::now();
    let result = tokio::time::timeout(
        settings.timeout,
        spawn_and_wait(tool, operation, &binary, settings, args, stdin),
    )
    .await
    .unwrap_or(Err(GatewayError::Timeout {
        tool,
        operation,
        timeout: settings.timeout,
    }));

    let outcome = match &result {
        Ok(_) => "success",
        Err(GatewayError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    };
    metrics::observe_gateway_operation(operation, outcome, start.elapsed().as_secs_f64());
    result
}

async fn spawn_and_wait(
    tool: &'static str,
    operation: &'static str,
    binary: &Path,
    settings: &ToolSettings,
    args: &[&str],
    stdin: Option<&[u8]>,
) -> Result<Output, GatewayError> {
    let io_error = |source| GatewayError::Io {
        tool,
        operation,
        source,
    };

    debug!("Running {} {}", binary.display(), args.join(" "));
    let mut cmd = tokio::process::Command::new(binary);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // A timed out call must not leave the tool running
        .kill_on_drop(true);
    if let Some(home) = &settings.gnupg_home {
        cmd.env("GNUPGHOME", home);
    }

    let mut child = cmd.spawn().map_err(io_error)?;

    if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(payload).await.map_err(io_error)?;
        pipe.shutdown().await.map_err(io_error)?;
    }

    let output = child.wait_with_output().await.map_err(io_error)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(GatewayError::Failed {
            tool,
            operation,
            code: output.status.code(),
            stderr: truncate_stderr(&output.stderr),
        })
    }
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() > MAX_STDERR_CHARS {
        let excerpt: String = text.chars().take(MAX_STDERR_CHARS).collect();
        format!("{excerpt}... (truncated)")
    } else {
        text.to_string()
    }
}
