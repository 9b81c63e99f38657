use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::export::DEFAULT_EXPORT_FILE_NAME;
use crate::proof::DEFAULT_CIRCUIT;

const DEFAULT_HASH_URL: &str = "http://127.0.0.1:8000/hash_image";
const DEFAULT_WITNESS_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SERVICE_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_SUCCESS_DELAY_MS: u64 = 1500;
const DEFAULT_EXPORT_DELAY_MS: u64 = 500;
const DEFAULT_CIRCUIT_DIR: &str = "circuits/zkpa";

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    auto_hash: Option<bool>,
    http: Option<HttpConfigFile>,
    service: Option<ServiceConfigFile>,
    camera: Option<CameraConfigFile>,
    export: Option<ExportConfigFile>,
    timing: Option<TimingConfigFile>,
    prover: Option<ProverConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    hash_url: Option<String>,
    witness_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportConfigFile {
    dir: Option<PathBuf>,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    success_delay_ms: Option<u64>,
    export_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProverConfigFile {
    backend: Option<ProverKind>,
    circuit: Option<String>,
    circuit_dir: Option<PathBuf>,
    command: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub hash_url: String,
    pub witness_base_url: String,
    pub http_timeout: Duration,
    pub auto_hash: bool,
    pub service_addr: String,
    pub camera: CameraSettings,
    pub export: ExportSettings,
    pub timing: TimingSettings,
    pub prover: ProverSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub dir: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingSettings {
    pub success_delay: Duration,
    pub export_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProverKind {
    /// Record the witness digest only.
    WitnessOnly,
    /// Run `nargo prove` in the circuit directory.
    Nargo,
}

#[derive(Debug, Clone)]
pub struct ProverSettings {
    pub backend: ProverKind,
    pub circuit: String,
    pub circuit_dir: PathBuf,
    pub command: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_file(CaptureConfigFile::default())
    }
}

impl CaptureConfig {
    /// Defaults, then the TOML file named by `ZKPA_CONFIG`, then `ZKPA_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZKPA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let http = file.http.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let export = file.export.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let prover = file.prover.unwrap_or_default();
        Self {
            hash_url: http
                .hash_url
                .unwrap_or_else(|| DEFAULT_HASH_URL.to_string()),
            witness_base_url: http
                .witness_url
                .unwrap_or_else(|| DEFAULT_WITNESS_BASE_URL.to_string()),
            http_timeout: Duration::from_secs(
                http.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            auto_hash: file.auto_hash.unwrap_or(false),
            service_addr: file
                .service
                .and_then(|service| service.addr)
                .unwrap_or_else(|| DEFAULT_SERVICE_ADDR.to_string()),
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            export: ExportSettings {
                dir: export.dir.unwrap_or_else(|| PathBuf::from(".")),
                file_name: export
                    .file_name
                    .unwrap_or_else(|| DEFAULT_EXPORT_FILE_NAME.to_string()),
            },
            timing: TimingSettings {
                success_delay: Duration::from_millis(
                    timing.success_delay_ms.unwrap_or(DEFAULT_SUCCESS_DELAY_MS),
                ),
                export_delay: Duration::from_millis(
                    timing.export_delay_ms.unwrap_or(DEFAULT_EXPORT_DELAY_MS),
                ),
            },
            prover: ProverSettings {
                backend: prover.backend.unwrap_or(ProverKind::WitnessOnly),
                circuit: prover
                    .circuit
                    .unwrap_or_else(|| DEFAULT_CIRCUIT.to_string()),
                circuit_dir: prover
                    .circuit_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CIRCUIT_DIR)),
                command: prover
                    .command
                    .unwrap_or_else(|| split_args("nargo prove")),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("ZKPA_HASH_URL") {
            self.hash_url = url;
        }
        if let Some(url) = non_empty_env("ZKPA_WITNESS_URL") {
            self.witness_base_url = url;
        }
        if let Some(device) = non_empty_env("ZKPA_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(dir) = non_empty_env("ZKPA_EXPORT_DIR") {
            self.export.dir = PathBuf::from(dir);
        }
        if let Some(addr) = non_empty_env("ZKPA_SERVICE_ADDR") {
            self.service_addr = addr;
        }
        if let Some(secs) = non_empty_env("ZKPA_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("ZKPA_HTTP_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = non_empty_env("ZKPA_SUCCESS_DELAY_MS") {
            self.timing.success_delay = parse_millis("ZKPA_SUCCESS_DELAY_MS", &ms)?;
        }
        if let Some(ms) = non_empty_env("ZKPA_EXPORT_DELAY_MS") {
            self.timing.export_delay = parse_millis("ZKPA_EXPORT_DELAY_MS", &ms)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, raw) in [
            ("hash URL", &self.hash_url),
            ("witness URL", &self.witness_base_url),
        ] {
            let url = url::Url::parse(raw).map_err(|e| anyhow!("invalid {} {}: {}", name, raw, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!("{} must be http or https, got {}", name, raw));
            }
        }
        if self.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        let name = self.export.file_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(anyhow!(
                "export file name must be a bare file name, got '{}'",
                self.export.file_name
            ));
        }
        if !name.to_ascii_lowercase().ends_with(".png") {
            return Err(anyhow!("export file name must end in .png"));
        }
        if self.prover.backend == ProverKind::Nargo && self.prover.command.is_empty() {
            return Err(anyhow!("prover command must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
    Ok(Duration::from_millis(ms))
}

fn split_args(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|entry| entry.to_string())
        .collect()
}
