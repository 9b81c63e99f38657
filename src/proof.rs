//! Proof backend boundary.
//!
//! The zero-knowledge circuit is an external collaborator referenced by a
//! fixed circuit name. This module only hands it witness data and observes
//! accept/reject (plus the proof blob when one is produced).
//!
//! - `WitnessOnlyBackend`: accepts every witness and records its digest.
//! - `NargoBackend`: writes `Prover.toml` into the circuit directory, runs the
//!   prove command there and reads `proofs/<circuit>.proof` together with the
//!   public inputs in `Verifier.toml`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{CaptureError, Result};
use crate::witness::WitnessPayload;

pub const DEFAULT_CIRCUIT: &str = "zkpa";

/// Result of handing a witness to the proof backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ProofHandle {
    pub circuit: String,
    /// SHA-256 over the canonical witness JSON.
    pub witness_digest: [u8; 32],
    pub proof: Option<Vec<u8>>,
    /// Public inputs the prover wrote to `Verifier.toml`.
    pub public_inputs: Option<toml::Table>,
}

impl ProofHandle {
    pub fn witness_digest_hex(&self) -> String {
        hex::encode(self.witness_digest)
    }

    /// Public inputs with the proof text added under `zkp`, the record a
    /// verifier needs. `None` until a proof was produced.
    pub fn verifier_record(&self) -> Option<toml::Table> {
        let proof = self.proof.as_ref()?;
        let mut record = self.public_inputs.clone().unwrap_or_default();
        record.insert(
            "zkp".to_string(),
            toml::Value::String(String::from_utf8_lossy(proof).trim().to_string()),
        );
        Some(record)
    }
}

pub trait ProofBackend: Send + Sync {
    fn submit_witness(&self, witness: &WitnessPayload) -> Result<ProofHandle>;
}

pub fn witness_digest(witness: &WitnessPayload) -> [u8; 32] {
    Sha256::digest(witness.to_canonical_bytes()).into()
}

pub struct WitnessOnlyBackend {
    circuit: String,
}

impl WitnessOnlyBackend {
    pub fn new(circuit: impl Into<String>) -> Self {
        Self {
            circuit: circuit.into(),
        }
    }
}

impl Default for WitnessOnlyBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCUIT)
    }
}

impl ProofBackend for WitnessOnlyBackend {
    fn submit_witness(&self, witness: &WitnessPayload) -> Result<ProofHandle> {
        if !witness.value().is_object() {
            return Err(CaptureError::Proof(
                "witness payload must be a JSON object".to_string(),
            ));
        }
        Ok(ProofHandle {
            circuit: self.circuit.clone(),
            witness_digest: witness_digest(witness),
            proof: None,
            public_inputs: None,
        })
    }
}

pub struct NargoBackend {
    circuit_dir: PathBuf,
    circuit: String,
    command: Vec<String>,
    // Prover.toml is a single shared file; overlapping jobs must not interleave.
    run_lock: Mutex<()>,
}

impl NargoBackend {
    pub fn new(circuit_dir: impl Into<PathBuf>, circuit: impl Into<String>) -> Self {
        Self {
            circuit_dir: circuit_dir.into(),
            circuit: circuit.into(),
            command: vec!["nargo".to_string(), "prove".to_string()],
            run_lock: Mutex::new(()),
        }
    }

    /// Replace the prove command (program followed by its arguments).
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn prover_toml_path(&self) -> PathBuf {
        self.circuit_dir.join("Prover.toml")
    }

    pub fn verifier_toml_path(&self) -> PathBuf {
        self.circuit_dir.join("Verifier.toml")
    }

    pub fn proof_path(&self) -> PathBuf {
        self.circuit_dir
            .join("proofs")
            .join(format!("{}.proof", self.circuit))
    }

    // A missing Verifier.toml is not an error; some prove commands skip it.
    fn read_public_inputs(&self) -> Result<Option<toml::Table>> {
        let path = self.verifier_toml_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CaptureError::Proof(format!(
                    "read {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| CaptureError::Proof(format!("parse {}: {}", path.display(), e)))
    }

    fn run_prover(&self) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| CaptureError::Proof("prove command is empty".to_string()))?;
        let status = Command::new(program)
            .args(args)
            .current_dir(&self.circuit_dir)
            .status()
            .map_err(|e| CaptureError::Proof(format!("spawn {}: {}", program, e)))?;
        if !status.success() {
            return Err(CaptureError::Proof(format!(
                "{} exited with {}",
                program, status
            )));
        }
        Ok(())
    }
}

impl ProofBackend for NargoBackend {
    fn submit_witness(&self, witness: &WitnessPayload) -> Result<ProofHandle> {
        let _guard = self
            .run_lock
            .lock()
            .map_err(|_| CaptureError::Proof("prover lock poisoned".to_string()))?;

        let prover_toml = witness_to_prover_toml(witness)?;
        write_file(&self.prover_toml_path(), prover_toml.as_bytes())?;
        self.run_prover()?;

        let proof_path = self.proof_path();
        let proof = std::fs::read(&proof_path).map_err(|e| {
            CaptureError::Proof(format!("read proof {}: {}", proof_path.display(), e))
        })?;
        log::info!(
            "proof for circuit {} written to {} ({} bytes)",
            self.circuit,
            proof_path.display(),
            proof.len()
        );
        Ok(ProofHandle {
            circuit: self.circuit.clone(),
            witness_digest: witness_digest(witness),
            proof: Some(proof),
            public_inputs: self.read_public_inputs()?,
        })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
        .map_err(|e| CaptureError::Proof(format!("write {}: {}", path.display(), e)))
}

/// Render a witness object as `Prover.toml` input.
///
/// Integers that fit in i64 stay integers; larger numbers become strings,
/// which Noir accepts for field elements.
pub fn witness_to_prover_toml(witness: &WitnessPayload) -> Result<String> {
    let serde_json::Value::Object(map) = witness.value() else {
        return Err(CaptureError::Proof(
            "witness payload must be a JSON object".to_string(),
        ));
    };
    let mut table = toml::map::Map::new();
    for (key, value) in map {
        table.insert(key.clone(), json_to_toml(value)?);
    }
    toml::to_string(&toml::Value::Table(table))
        .map_err(|e| CaptureError::Proof(format!("encode Prover.toml: {}", e)))
}

fn json_to_toml(value: &serde_json::Value) -> Result<toml::Value> {
    use serde_json::Value as J;
    Ok(match value {
        J::Bool(b) => toml::Value::Boolean(*b),
        J::Number(n) => match n.as_i64() {
            Some(i) => toml::Value::Integer(i),
            None => toml::Value::String(n.to_string()),
        },
        J::String(s) => toml::Value::String(s.clone()),
        J::Array(items) => toml::Value::Array(
            items
                .iter()
                .map(json_to_toml)
                .collect::<Result<Vec<_>>>()?,
        ),
        J::Object(map) => {
            let mut table = toml::map::Map::new();
            for (key, item) in map {
                table.insert(key.clone(), json_to_toml(item)?);
            }
            toml::Value::Table(table)
        }
        J::Null => {
            return Err(CaptureError::Proof(
                "witness contains null, which Prover.toml cannot express".to_string(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_witness() -> WitnessPayload {
        WitnessPayload::new(serde_json::json!({
            "image_hash": [1, 2, 3],
            "random_nonce": [9, 8],
            "ecdh_scalar": 18446744073709551615u64,
        }))
    }

    #[test]
    fn witness_only_backend_records_digest() -> Result<()> {
        let backend = WitnessOnlyBackend::default();
        let handle = backend.submit_witness(&sample_witness())?;
        assert_eq!(handle.circuit, DEFAULT_CIRCUIT);
        assert_eq!(handle.witness_digest, witness_digest(&sample_witness()));
        assert_eq!(handle.witness_digest_hex().len(), 64);
        assert!(handle.proof.is_none());
        assert!(handle.verifier_record().is_none());

        let err = backend
            .submit_witness(&WitnessPayload::new(serde_json::json!([1, 2])))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Proof(_)));
        Ok(())
    }

    #[test]
    fn prover_toml_keeps_arrays_and_stringifies_big_numbers() -> Result<()> {
        let rendered = witness_to_prover_toml(&sample_witness())?;
        let parsed: toml::Value = toml::from_str(&rendered).expect("valid toml");
        assert_eq!(
            parsed.get("image_hash").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(3)
        );
        assert_eq!(
            parsed.get("ecdh_scalar").and_then(|v| v.as_str()),
            Some("18446744073709551615")
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn nargo_backend_reads_proof_after_command() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("proofs")).expect("proofs dir");
        let backend = NargoBackend::new(dir.path(), "zkpa").with_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            "test -f Prover.toml && printf deadbeef > proofs/zkpa.proof".to_string(),
        ]);
        let handle = backend.submit_witness(&sample_witness())?;
        assert_eq!(handle.proof.as_deref(), Some(&b"deadbeef"[..]));
        assert!(handle.public_inputs.is_none());
        let record = handle.verifier_record().expect("record");
        assert_eq!(record.get("zkp").and_then(|v| v.as_str()), Some("deadbeef"));
        assert_eq!(record.len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn nargo_backend_keeps_public_inputs_beside_proof() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("proofs")).expect("proofs dir");
        let backend = NargoBackend::new(dir.path(), "zkpa").with_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf 'image_hash = [1, 2, 3]\\n' > Verifier.toml && printf 'cafe\\n' > proofs/zkpa.proof"
                .to_string(),
        ]);
        let handle = backend.submit_witness(&sample_witness())?;
        let inputs = handle.public_inputs.clone().expect("public inputs");
        assert_eq!(
            inputs.get("image_hash").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(3)
        );

        let record = handle.verifier_record().expect("record");
        assert_eq!(record.get("zkp").and_then(|v| v.as_str()), Some("cafe"));
        assert!(record.contains_key("image_hash"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn nargo_backend_rejects_on_failed_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = NargoBackend::new(dir.path(), "zkpa")
            .with_command(vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()]);
        let err = backend.submit_witness(&sample_witness()).unwrap_err();
        assert!(matches!(err, CaptureError::Proof(_)));
    }
}
