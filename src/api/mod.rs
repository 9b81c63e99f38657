//! Local hashing and witness service.
//!
//! A development stand-in for the remote endpoints the pipeline talks to:
//! - `GET /health`
//! - `POST /hash_image`: BLAKE3 over the uploaded bytes
//! - `POST /get_witness`: BLAKE3 over the decoded image's RGB PPM
//!   serialization plus a fresh nonce
//!
//! Both POST routes expect a multipart form with an `image` file field.
//!
//! The witness is hash-only. It carries no camera or authority
//! attestations, so it only feeds the witness-only proof backend.

use anyhow::{anyhow, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::artifact::MAX_IMAGE_BYTES;
use crate::transport::multipart;

const MAX_HEADER_BYTES: usize = 8192;
// Form framing on top of the largest accepted image.
const MAX_BODY_BYTES: usize = MAX_IMAGE_BYTES + 64 * 1024;
const NONCE_BYTES: usize = 31;
const CAMERA_IDENTIFIER_BYTES: usize = 64;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ServiceHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Base URL for clients, e.g. `http://127.0.0.1:8000`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("service thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ServiceServer {
    cfg: ServiceConfig,
}

impl ServiceServer {
    pub fn new(cfg: ServiceConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<ServiceHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_service(listener, shutdown_thread) {
                log::error!("local service stopped: {}", err);
            }
        });

        Ok(ServiceHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_service(listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream) {
                    log::warn!("service request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, r#"{"error":"payload_too_large"}"#)?;
            return Ok(());
        }
        Err(RequestError::Malformed(err)) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", "/hash_image") => match request.image_field() {
            Some(image) => {
                let body = hash_image_body(image);
                write_response(&mut stream, 200, "application/json", body.to_string().as_bytes())
            }
            None => write_missing_image(&mut stream),
        },
        ("POST", "/get_witness") => match request.image_field() {
            Some(image) => match witness_body(image) {
                Ok(body) => {
                    write_response(&mut stream, 200, "application/json", body.to_string().as_bytes())
                }
                Err(err) => {
                    log::warn!("witness generation failed: {}", err);
                    let body = serde_json::json!({ "error": err.to_string() });
                    write_response(&mut stream, 422, "application/json", body.to_string().as_bytes())
                }
            },
            None => write_missing_image(&mut stream),
        },
        (_, "/health" | "/hash_image" | "/get_witness") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn write_missing_image(stream: &mut TcpStream) -> Result<()> {
    write_json_response(stream, 400, r#"{"error":"No image file provided"}"#)
}

/// `/hash_image` response for `image`.
///
/// The byte array is sent as a `"[0xAB, 0x12, ...]"` string, matching the
/// hosted service.
pub fn hash_image_body(image: &[u8]) -> serde_json::Value {
    let digest = blake3::hash(image);
    let byte_array = digest
        .as_bytes()
        .iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(", ");
    serde_json::json!({
        "hash_hex": digest.to_hex().to_string(),
        "hash_byte_array": format!("[{}]", byte_array),
    })
}

/// `/get_witness` response for `image`.
pub fn witness_body(image: &[u8]) -> Result<serde_json::Value> {
    let image_hash = blake3::hash(&ppm_bytes(image)?);
    let mut rng = rand::thread_rng();
    let mut nonce = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce);
    let mut camera_identifier = [0u8; CAMERA_IDENTIFIER_BYTES];
    rng.fill_bytes(&mut camera_identifier);
    Ok(serde_json::json!({
        "image_hash": image_hash.as_bytes().to_vec(),
        "random_nonce": nonce.to_vec(),
        "camera_identifier": camera_identifier.to_vec(),
    }))
}

/// Binary PPM (P6) serialization of the decoded image's RGB pixels.
pub fn ppm_bytes(image: &[u8]) -> Result<Vec<u8>> {
    let rgb = image::load_from_memory(image)
        .map_err(|e| anyhow!("image could not be decoded: {}", e))?
        .to_rgb8();
    let header = format!("P6\n{} {}\n255\n", rgb.width(), rgb.height());
    let mut out = Vec::with_capacity(header.len() + rgb.as_raw().len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(rgb.as_raw());
    Ok(out)
}

enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        RequestError::Malformed(err)
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers").into());
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large").into());
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data.split_off(header_end + 4);
    if body.len() < content_length {
        let missing = content_length - body.len();
        let mut rest = Vec::with_capacity(missing);
        Read::by_ref(stream)
            .take(missing as u64)
            .read_to_end(&mut rest)?;
        body.extend_from_slice(&rest);
    }
    if body.len() < content_length {
        return Err(anyhow!("request body truncated").into());
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn image_field(&self) -> Option<&[u8]> {
        let boundary = self
            .headers
            .get("content-type")
            .and_then(|ct| multipart::boundary_from_content_type(ct))?;
        multipart::find_field(&self.body, &boundary, "image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let surface = image::RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30]));
        crate::camera::raster::encode_png(&surface).expect("encode")
    }

    #[test]
    fn hash_body_matches_the_client_parser() {
        let body = hash_image_body(b"hello");
        let parsed = crate::hashing::parse_hash_response(&body.to_string()).expect("parse");
        assert_eq!(parsed.hex(), blake3::hash(b"hello").to_hex().as_str());
        assert_eq!(parsed.bytes().len(), 32);
    }

    #[test]
    fn ppm_serialization_has_p6_header() -> Result<()> {
        let ppm = ppm_bytes(&tiny_png())?;
        assert!(ppm.starts_with(b"P6\n2 1\n255\n"));
        assert_eq!(&ppm[ppm.len() - 6..], &[10, 20, 30, 10, 20, 30]);
        Ok(())
    }

    #[test]
    fn witness_hashes_pixels_not_container() -> Result<()> {
        let png = tiny_png();
        let body = witness_body(&png)?;
        let expected = blake3::hash(&ppm_bytes(&png)?).as_bytes().to_vec();
        let image_hash: Vec<u8> = serde_json::from_value(body["image_hash"].clone())?;
        assert_eq!(image_hash, expected);
        let nonce: Vec<u8> = serde_json::from_value(body["random_nonce"].clone())?;
        assert_eq!(nonce.len(), NONCE_BYTES);
        assert!(witness_body(b"not an image").is_err());
        Ok(())
    }

    #[test]
    fn witness_carries_only_hash_fields() -> Result<()> {
        let body = witness_body(&tiny_png())?;
        let mut keys: Vec<&str> = body
            .as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        assert_eq!(keys, ["camera_identifier", "image_hash", "random_nonce"]);
        assert_eq!(
            body["camera_identifier"].as_array().map(Vec::len),
            Some(CAMERA_IDENTIFIER_BYTES)
        );
        Ok(())
    }
}
