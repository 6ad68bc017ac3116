//! # GPG Keyring
//!
//! [`Keyring`] backed by the `gpg` binary. Keys are passed on stdin and the
//! keyring location follows `GNUPGHOME`, which the decryption tool shares.

use super::{run_tool, GatewayError, Keyring, ToolSettings};
use crate::constants::FINGERPRINT_LENGTH;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

const TOOL: &str = "gpg";

static FINGERPRINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^[A-Z0-9]{{{FINGERPRINT_LENGTH}}}$"))
        .expect("fingerprint pattern is a valid regex")
});

/// Find the key fingerprint in `gpg --import-options show-only` output
///
/// The fingerprint is the first line that, once trimmed, is exactly 40
/// uppercase alphanumeric characters.
///
/// # Errors
///
/// Returns [`GatewayError::FingerprintNotFound`] when no line matches.
pub fn parse_fingerprint(output: &str) -> Result<String, GatewayError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| FINGERPRINT.is_match(line))
        .map(str::to_string)
        .ok_or(GatewayError::FingerprintNotFound)
}

/// Whether a failed `gpg --list-secret-keys` means the key is not in the keyring
///
/// Any other failure, a locked trustdb for instance, leaves the key's
/// presence unknown.
fn is_missing_key(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no secret key") || stderr.contains("error reading key: not found")
}

/// Whether gpg rejected the payload because it contains no key at all
fn holds_no_key(stderr: &str) -> bool {
    stderr
        .to_ascii_lowercase()
        .contains("no valid openpgp data found")
}

#[derive(Debug, Clone)]
pub struct GpgKeyring {
    settings: ToolSettings,
}

impl GpgKeyring {
    #[must_use]
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Keyring for GpgKeyring {
    async fn import(&self, key: &[u8]) -> Result<(), GatewayError> {
        run_tool(
            TOOL,
            "import",
            &self.settings,
            &["--batch", "--import"],
            Some(key),
        )
        .await?;
        info!("Imported PGP secret key");
        Ok(())
    }

    async fn fingerprint(&self, key: &[u8]) -> Result<String, GatewayError> {
        let output = match run_tool(
            TOOL,
            "fingerprint",
            &self.settings,
            &["--batch", "--import", "--import-options", "show-only"],
            Some(key),
        )
        .await
        {
            Ok(output) => output,
            Err(GatewayError::Failed { stderr, .. }) if holds_no_key(&stderr) => {
                return Err(GatewayError::FingerprintNotFound);
            }
            Err(e) => return Err(e),
        };
        parse_fingerprint(&String::from_utf8_lossy(&output.stdout))
    }

    async fn delete(&self, fingerprint: &str) -> Result<(), GatewayError> {
        // gpg refuses to delete a missing key; a repeated cleanup must still succeed
        match run_tool(
            TOOL,
            "lookup",
            &self.settings,
            &["--batch", "--list-secret-keys", fingerprint],
            None,
        )
        .await
        {
            Ok(_) => {}
            Err(GatewayError::Failed { stderr, .. }) if is_missing_key(&stderr) => {
                info!(fingerprint, "PGP secret key already absent");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        run_tool(
            TOOL,
            "delete",
            &self.settings,
            &["--batch", "--yes", "--delete-secret-keys", fingerprint],
            None,
        )
        .await?;
        info!(fingerprint, "Deleted PGP secret key");
        Ok(())
    }
}
