//! # SOPS Decryption
//!
//! [`Decryptor`] backed by the `sops` binary.
//!
//! The document is piped to `sops --decrypt ... /dev/stdin` and the plaintext
//! is read back from stdout, so neither side is ever written to disk.

use super::{run_tool, DecryptOptions, Decryptor, GatewayError, ToolSettings};
use async_trait::async_trait;
use tracing::{debug, info_span, Instrument};

const TOOL: &str = "sops";

#[derive(Debug, Clone)]
pub struct SopsDecryptor {
    settings: ToolSettings,
}

impl SopsDecryptor {
    #[must_use]
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }
}

fn decrypt_args(options: &DecryptOptions) -> Vec<&'static str> {
    let mut args = vec!["--decrypt"];
    if options.ignore_mac {
        args.push("--ignore-mac");
    }
    if options.verbose {
        args.push("--verbose");
    }
    args.extend(["--input-type", "yaml", "--output-type", "yaml", "/dev/stdin"]);
    args
}

#[async_trait]
impl Decryptor for SopsDecryptor {
    async fn decrypt(
        &self,
        document: &str,
        options: &DecryptOptions,
    ) -> Result<String, GatewayError> {
        let span = info_span!("sops.decrypt", document.size = document.len());
        async move {
            let output = run_tool(
                TOOL,
                "decrypt",
                &self.settings,
                &decrypt_args(options),
                Some(document.as_bytes()),
            )
            .await?;

            let plaintext =
                String::from_utf8(output.stdout).map_err(|e| GatewayError::InvalidOutput {
                    tool: TOOL,
                    operation: "decrypt",
                    message: e.to_string(),
                })?;
            debug!("SOPS decryption succeeded ({} bytes)", plaintext.len());
            Ok(plaintext)
        }
        .instrument(span)
        .await
    }
}
