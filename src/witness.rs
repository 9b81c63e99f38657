//! Witness requests.
//!
//! The witness endpoint (`POST {base_url}/get_witness`, multipart field
//! `image`, PNG) derives the auxiliary data the proof backend needs. Its JSON
//! payload is opaque here: success is "2xx with a JSON body", everything else
//! is a failure.

use crate::artifact::ImageArtifact;
use crate::error::{CaptureError, Result};
use crate::transport::{FilePart, HttpClient};

pub const WITNESS_PATH: &str = "/get_witness";

/// Opaque witness payload, forwarded as-is to the proof backend.
#[derive(Clone, Debug, PartialEq)]
pub struct WitnessPayload {
    value: serde_json::Value,
}

impl WitnessPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Canonical serialization (object keys sorted).
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.value).unwrap_or_default()
    }
}

pub trait WitnessService: Send + Sync {
    fn submit_witness(&self, artifact: &ImageArtifact) -> Result<WitnessPayload>;
}

/// `WitnessService` backed by the HTTP witness endpoint.
pub struct HttpWitnessService {
    client: HttpClient,
    url: String,
}

impl HttpWitnessService {
    pub fn new(client: HttpClient, base_url: &str) -> Self {
        Self {
            client,
            url: witness_url(base_url),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `{base_url}/get_witness`, tolerating a trailing slash on the base.
pub fn witness_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), WITNESS_PATH)
}

impl WitnessService for HttpWitnessService {
    fn submit_witness(&self, artifact: &ImageArtifact) -> Result<WitnessPayload> {
        let png = artifact
            .to_png()
            .map_err(|e| CaptureError::validation(format!("transcode to PNG: {}", e)))?;
        let body = self.client.post_image(
            &self.url,
            FilePart {
                field: "image",
                file_name: "image.png",
                content_type: "image/png",
                bytes: &png,
            },
        )?;
        let value = serde_json::from_str(&body).map_err(|e| CaptureError::Service {
            status: 200,
            body: format!("witness response is not JSON ({}): {}", e, body),
        })?;
        Ok(WitnessPayload::new(value))
    }
}
