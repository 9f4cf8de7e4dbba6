//! # Envelope encryption
//!
//! Invokes an external CLI tool to envelope-encrypt sensitive object bodies
//! before they reach the working tree. The tool itself (key management,
//! envelope format) is an external collaborator's concern; this module only
//! knows how to hand it bytes and get bytes back, fail-closed on anything
//! other than a clean exit, and leave no plaintext scratch file behind.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::constants::DEFAULT_ENCRYPTION_ALLOWLIST;
use crate::model::ResourceIdentifier;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("failed to write plaintext scratch file: {0}")]
    ScratchWrite(#[source] std::io::Error),

    #[error("failed to invoke encryption tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("encryption tool exited with status {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("failed to read ciphertext output: {0}")]
    OutputRead(#[source] std::io::Error),
}

/// Returns whether `identifier`'s GVR is on the encryption allow-list.
/// Objects that don't match are written as plain sanitized YAML.
#[must_use]
pub fn should_encrypt(identifier: &ResourceIdentifier) -> bool {
    DEFAULT_ENCRYPTION_ALLOWLIST
        .iter()
        .any(|(group, version, resource)| {
            *group == identifier.group && *version == identifier.version && *resource == identifier.resource
        })
}

/// A handle to the external encryption tool, scoped to one worker's private
/// scratch directory so concurrent workers never share scratch files.
#[derive(Debug, Clone)]
pub struct EncryptionTool {
    binary_path: PathBuf,
    scratch_dir: PathBuf,
}

impl EncryptionTool {
    #[must_use]
    pub fn new(binary_path: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            binary_path,
            scratch_dir,
        }
    }

    /// Envelope-encrypts `plaintext`, returning the ciphertext bytes to
    /// write in its place. Fails closed: a non-zero exit or any I/O error
    /// returns `Err`, never the plaintext.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(EncryptError::ScratchWrite)?;

        let token = uuid::Uuid::new_v4();
        let input_path = self.scratch_dir.join(format!("{token}.in"));
        let output_path = self.scratch_dir.join(format!("{token}.out"));
        let _cleanup = ScratchCleanup {
            paths: vec![input_path.clone(), output_path.clone()],
        };

        write_scratch_file(&input_path, plaintext).await?;

        let output = Command::new(&self.binary_path)
            .arg("encrypt")
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .output()
            .await
            .map_err(EncryptError::Spawn)?;

        if !output.status.success() {
            return Err(EncryptError::ToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        tokio::fs::read(&output_path).await.map_err(EncryptError::OutputRead)
    }
}

async fn write_scratch_file(path: &Path, contents: &[u8]) -> Result<(), EncryptError> {
    let mut file = tokio::fs::File::create(path).await.map_err(EncryptError::ScratchWrite)?;
    file.write_all(contents).await.map_err(EncryptError::ScratchWrite)?;
    file.flush().await.map_err(EncryptError::ScratchWrite)?;
    Ok(())
}

/// Removes the scratch files on drop regardless of whether `encrypt`
/// succeeded, so a failed invocation never leaves plaintext on disk.
struct ScratchCleanup {
    paths: Vec<PathBuf>,
}

impl Drop for ScratchCleanup {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlisted_secrets_are_flagged_for_encryption() {
        let id = ResourceIdentifier::new("", "v1", "secrets", Some("app-a".into()), "db-creds");
        assert!(should_encrypt(&id));
    }

    #[test]
    fn non_allowlisted_resources_are_not_encrypted() {
        let id = ResourceIdentifier::new("", "v1", "configmaps", Some("app-a".into()), "settings");
        assert!(!should_encrypt(&id));
    }
}
