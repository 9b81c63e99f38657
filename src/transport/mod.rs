//! HTTP transport for the hashing, witness and URL-import calls.
//!
//! Blocking `ureq` calls; the pipeline runs them on worker jobs. Status
//! errors become `CaptureError::Service` with the body preserved, transport
//! failures become `CaptureError::Network`.

pub mod multipart;

use std::io::Read;
use std::time::Duration;

use crate::error::{CaptureError, Result};

pub use multipart::{FilePart, MultipartBody};

/// Response of a bounded GET.
#[derive(Debug)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { agent }
    }

    /// POST a single image part and return the response body.
    pub fn post_image(&self, url: &str, part: FilePart<'_>) -> Result<String> {
        let form = multipart::encode(&[part]);
        let response = self
            .agent
            .post(url)
            .set("Content-Type", &form.content_type)
            .send_bytes(&form.body)?;
        response
            .into_string()
            .map_err(|e| CaptureError::network(format!("read response from {}: {}", url, e)))
    }

    /// GET `url`, refusing bodies larger than `max_bytes`.
    pub fn get_bounded(&self, url: &str, max_bytes: usize) -> Result<Fetched> {
        let response = self.agent.get(url).call()?;
        if let Some(declared) = response
            .header("Content-Length")
            .and_then(|len| len.trim().parse::<usize>().ok())
        {
            if declared > max_bytes {
                return Err(CaptureError::validation(format!(
                    "remote image is {} bytes; maximum is {} bytes",
                    declared, max_bytes
                )));
            }
        }
        let content_type = response.header("Content-Type").map(str::to_string);
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(max_bytes as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| CaptureError::network(format!("read body from {}: {}", url, e)))?;
        if bytes.len() > max_bytes {
            return Err(CaptureError::validation(format!(
                "remote image exceeds {} bytes",
                max_bytes
            )));
        }
        Ok(Fetched {
            bytes,
            content_type,
        })
    }
}
