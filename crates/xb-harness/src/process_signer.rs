use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use xb_core::credentials::TransactionBootstrap;

use crate::signing::{Result, SignerConcurrency, SigningError, TransactionSigner};

/// Delegates token derivation to an external helper program.
///
/// The helper is started once per call with `<method> <path>` appended to
/// the configured argv. A JSON document carrying the method, the path and
/// both bootstrap documents is written to its stdin; the first line of its
/// stdout is the token. Each call is an independent process, so calls may
/// overlap.
pub struct ProcessSigner {
    program: String,
    args: Vec<String>,
    bootstrap: Arc<TransactionBootstrap>,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    method: &'a str,
    path: &'a str,
    home_document: &'a str,
    on_demand_script: &'a str,
}

impl ProcessSigner {
    pub fn new(
        command: &[String],
        bootstrap: TransactionBootstrap,
        timeout: Duration,
    ) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SigningError::Signer("no signer command configured".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            bootstrap: Arc::new(bootstrap),
            timeout,
        })
    }

    async fn run(&self, method: &str, path: &str) -> Result<String> {
        let payload = serde_json::to_vec(&SignRequest {
            method,
            path,
            home_document: &self.bootstrap.home_document,
            on_demand_script: &self.bootstrap.on_demand_script,
        })
        .map_err(|e| SigningError::Signer(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(method)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SigningError::Signer(format!("failed to start {}: {e}", self.program)))?;

        // Fed from its own task while the output pipes drain, so a helper
        // that writes before reading cannot deadlock against us.
        let feeder = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // A helper that ignores stdin may exit before reading it.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "signer helper did not consume stdin");
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SigningError::Signer(e.to_string()))?;
        if let Some(feeder) = feeder {
            if let Err(e) = feeder.await {
                debug!(error = %e, "stdin feeder task failed");
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "signer helper failed");
            return Err(SigningError::Signer(format!(
                "helper exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.lines().next().unwrap_or_default().trim().to_string();
        if token.is_empty() {
            return Err(SigningError::EmptyToken);
        }
        Ok(token)
    }
}

#[async_trait]
impl TransactionSigner for ProcessSigner {
    async fn sign(&self, method: &str, path: &str) -> Result<String> {
        tokio::time::timeout(self.timeout, self.run(method, path))
            .await
            .map_err(|_| SigningError::Timeout(self.timeout))?
    }

    fn concurrency(&self) -> SignerConcurrency {
        SignerConcurrency::Reentrant
    }
}
