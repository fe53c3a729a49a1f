//! Validator
//!
//! Pre-ingest gating (declared type/extension/size allow-lists) and
//! post-assembly checks (digest verification, JSON/JSONL structural
//! validation). Digest hashing reuses the teacher's own `sha2`/`hex`
//! pairing from its chunk store's `compute_hash`; structural checks lean
//! on `serde_json::Value`, the same crate the teacher already pulls in
//! for every wire type.

use sha2::{Digest, Sha256};

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};

pub struct Validator<'a> {
    config: &'a UploadConfig,
}

impl<'a> Validator<'a> {
    pub fn new(config: &'a UploadConfig) -> Self {
        Self { config }
    }

    /// Type and size gating performed before a session is created.
    pub fn validate_init(&self, file_name: &str, declared_size: u64, declared_type: &str) -> Result<()> {
        let mut failures = Vec::new();

        if declared_size == 0 || declared_size > self.config.max_file_size {
            failures.push(format!(
                "declared_size {} must be > 0 and <= {}",
                declared_size, self.config.max_file_size
            ));
        }

        if !self.config.allowed_types.iter().any(|t| t == declared_type) {
            failures.push(format!("file type {declared_type} is not allowed"));
        }

        let extension = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
        if !self.config.allowed_extensions.iter().any(|e| *e == extension) {
            failures.push(format!("file extension {extension} is not allowed"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UploadError::Validation(failures.join("; ")))
        }
    }

    /// Byte-for-byte digest verification over the assembled object, if the
    /// session declared an `expected_digest` of the form `"<algo>:<hex>"`.
    pub fn verify_digest(&self, expected_digest: Option<&str>, data: &[u8]) -> Result<()> {
        let Some(expected) = expected_digest else {
            tracing::warn!("no expected_digest supplied, skipping digest verification");
            return Ok(());
        };

        let (algo, expected_hex) = expected.split_once(':').unwrap_or(("sha256", expected));
        if algo != self.config.digest_algorithm {
            return Err(UploadError::Validation(format!(
                "unsupported digest algorithm: {algo}"
            )));
        }

        let actual_hex = sha256_hex(data);
        if actual_hex != expected_hex.to_lowercase() {
            return Err(UploadError::DigestMismatch {
                expected: expected_hex.to_string(),
                actual: actual_hex,
            });
        }

        Ok(())
    }

    /// Best-effort structural validation for `.json`/`.jsonl` files.
    /// Any other extension is left unchecked.
    pub fn verify_structure(&self, file_name: &str, data: &[u8]) -> Result<()> {
        let extension = file_name.rsplit('.').next().unwrap_or("").to_lowercase();

        match extension.as_str() {
            "json" => {
                serde_json::from_slice::<serde_json::Value>(data)
                    .map_err(|e| UploadError::Structural(format!("invalid JSON: {e}")))?;
                Ok(())
            }
            "jsonl" => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| UploadError::Structural(format!("invalid UTF-8: {e}")))?;

                for (line_no, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
                        return Err(UploadError::Structural(format!(
                            "invalid JSON on line {}: {e}",
                            line_no + 1
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
