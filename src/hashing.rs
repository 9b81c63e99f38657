//! Content hash requests.
//!
//! The hash itself is computed by an external endpoint (`POST /hash_image`,
//! multipart field `image`). Identical bytes are expected to hash identically;
//! this is the service's contract and is not re-checked locally.

use serde::Deserialize;

use crate::artifact::ImageArtifact;
use crate::error::{CaptureError, Result};
use crate::transport::{FilePart, HttpClient};

/// Characters kept on each side of a truncated display hash.
pub const DISPLAY_EDGE_CHARS: usize = 15;

/// Digest of an artifact as reported by the hashing service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentHash {
    hex: String,
    bytes: Vec<u8>,
}

impl ContentHash {
    pub fn new(hex: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            hex: hex.into(),
            bytes,
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// First and last 15 characters joined by `...`; short hashes are shown whole.
    pub fn display(&self) -> String {
        let chars: Vec<char> = self.hex.chars().collect();
        if chars.len() <= DISPLAY_EDGE_CHARS * 2 {
            return self.hex.clone();
        }
        let head: String = chars[..DISPLAY_EDGE_CHARS].iter().collect();
        let tail: String = chars[chars.len() - DISPLAY_EDGE_CHARS..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Anything that can turn artifact bytes into a content hash.
pub trait HashService: Send + Sync {
    fn submit(&self, artifact: &ImageArtifact) -> Result<ContentHash>;
}

/// `HashService` backed by the HTTP hashing endpoint.
pub struct HttpHashService {
    client: HttpClient,
    url: String,
}

impl HttpHashService {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl HashService for HttpHashService {
    fn submit(&self, artifact: &ImageArtifact) -> Result<ContentHash> {
        let body = self.client.post_image(
            &self.url,
            FilePart {
                field: "image",
                file_name: artifact.file_name(),
                content_type: artifact.mime_type(),
                bytes: artifact.bytes(),
            },
        )?;
        parse_hash_response(&body)
    }
}

#[derive(Deserialize)]
struct HashResponse {
    hash_hex: String,
    hash_byte_array: ByteArrayField,
}

/// Reference services send the byte array as a `"[0xAB, 0x12]"` string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ByteArrayField {
    List(Vec<u8>),
    Text(String),
}

/// Decode and cross-check a hashing endpoint response body.
pub fn parse_hash_response(body: &str) -> Result<ContentHash> {
    let malformed = |reason: String| CaptureError::Service {
        status: 200,
        body: format!("{}: {}", reason, body),
    };
    let response: HashResponse = serde_json::from_str(body)
        .map_err(|e| malformed(format!("malformed hash response ({})", e)))?;
    let bytes = match response.hash_byte_array {
        ByteArrayField::List(bytes) => bytes,
        ByteArrayField::Text(text) => parse_byte_list(&text).map_err(malformed)?,
    };
    let hex = response.hash_hex.trim().to_ascii_lowercase();
    let decoded =
        hex::decode(&hex).map_err(|e| malformed(format!("hash_hex is not hex ({})", e)))?;
    if decoded != bytes {
        return Err(malformed(
            "hash_byte_array does not match hash_hex".to_string(),
        ));
    }
    Ok(ContentHash::new(hex, bytes))
}

fn parse_byte_list(text: &str) -> std::result::Result<Vec<u8>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| "hash_byte_array string is not bracketed".to_string())?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let parsed = match item.strip_prefix("0x").or_else(|| item.strip_prefix("0X")) {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => item.parse::<u8>(),
            };
            parsed.map_err(|_| format!("invalid byte '{}' in hash_byte_array", item))
        })
        .collect()
}
