//! Capture-Hash-Prove pipeline.
//!
//! `Pipeline` owns the session, the camera controller, the preview store,
//! the exporter and the notifier. Every mutation happens on the owner's
//! thread. Network work (URL fetch, hashing, witness + proof) runs as a
//! worker job that reports a `Completion` tagged with the generation it was
//! started under; `poll` drains completions and fires due timers.
//!
//! Stale completions and timers (older generation) are dropped. That is the
//! only cancellation mechanism: in-flight requests are never aborted.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::acquire::{self, AcquireInput, ImageFetcher};
use crate::artifact::{ImageArtifact, ImageBlob, PreviewStore};
use crate::camera::{self, CameraController, CameraState, StreamConstraints};
use crate::config::{CaptureConfig, ProverKind};
use crate::error::{CaptureError, Result};
use crate::export::{Exporter, PngFileExporter};
use crate::hashing::{ContentHash, HashService, HttpHashService};
use crate::notify::{Notification, Notifier};
use crate::proof::{NargoBackend, ProofBackend, ProofHandle, WitnessOnlyBackend};
use crate::session::{CaptureSession, Generation, PipelineState, TimerKind};
use crate::transport::HttpClient;
use crate::witness::{HttpWitnessService, WitnessService};

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Delay between a successful witness round trip and the Success state.
    pub success_delay: Duration,
    /// Delay between Success and the export.
    pub export_delay: Duration,
    /// Request a content hash automatically after every acquisition.
    pub auto_hash: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_millis(1500),
            export_delay: Duration::from_millis(500),
            auto_hash: false,
        }
    }
}

/// External collaborators reached from worker jobs.
#[derive(Clone)]
pub struct Services {
    pub hasher: Arc<dyn HashService>,
    pub witness: Arc<dyn WitnessService>,
    pub prover: Arc<dyn ProofBackend>,
    pub fetcher: Arc<dyn ImageFetcher>,
}

impl Services {
    /// HTTP services and the configured proof backend.
    pub fn from_config(config: &CaptureConfig) -> Self {
        let client = HttpClient::new(config.http_timeout);
        let prover: Arc<dyn ProofBackend> = match config.prover.backend {
            ProverKind::WitnessOnly => Arc::new(WitnessOnlyBackend::new(&config.prover.circuit)),
            ProverKind::Nargo => Arc::new(
                NargoBackend::new(&config.prover.circuit_dir, &config.prover.circuit)
                    .with_command(config.prover.command.clone()),
            ),
        };
        Self {
            hasher: Arc::new(HttpHashService::new(client.clone(), &config.hash_url)),
            witness: Arc::new(HttpWitnessService::new(
                client.clone(),
                &config.witness_base_url,
            )),
            prover,
            fetcher: Arc::new(client),
        }
    }
}

enum JobOutput {
    Imported(Result<ImageBlob>),
    Hashed(Result<ContentHash>),
    Witnessed(Result<ProofHandle>),
}

struct Completion {
    generation: Generation,
    output: JobOutput,
}

pub struct Pipeline {
    config: PipelineConfig,
    services: Services,
    session: CaptureSession,
    previews: PreviewStore,
    camera: CameraController,
    exporter: Box<dyn Exporter>,
    notifier: Box<dyn Notifier>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: usize,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        services: Services,
        camera: CameraController,
        exporter: Box<dyn Exporter>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            services,
            session: CaptureSession::new(),
            previews: PreviewStore::new(),
            camera,
            exporter,
            notifier,
            tx,
            rx,
            in_flight: 0,
        }
    }

    /// Wire a pipeline from loaded configuration.
    pub fn from_config(config: &CaptureConfig, notifier: Box<dyn Notifier>) -> Result<Self> {
        let backend = camera::open_backend(&config.camera)?;
        let camera = CameraController::with_constraints(
            backend,
            StreamConstraints {
                width: config.camera.width,
                height: config.camera.height,
            },
        );
        let exporter = PngFileExporter::new(&config.export.dir, &config.export.file_name);
        Ok(Self::new(
            PipelineConfig {
                success_delay: config.timing.success_delay,
                export_delay: config.timing.export_delay,
                auto_hash: config.auto_hash,
            },
            Services::from_config(config),
            camera,
            Box::new(exporter),
            notifier,
        ))
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> PipelineState {
        self.session.state()
    }

    pub fn generation(&self) -> Generation {
        self.session.generation()
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn artifact(&self) -> Option<&ImageArtifact> {
        self.session.artifact()
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.session.content_hash()
    }

    /// Truncated hash as shown next to the preview.
    pub fn displayed_hash(&self) -> Option<String> {
        self.session.content_hash().map(ContentHash::display)
    }

    pub fn proof(&self) -> Option<&ProofHandle> {
        self.session.proof()
    }

    pub fn exported_path(&self) -> Option<&std::path::Path> {
        self.session.exported_to()
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.state()
    }

    pub fn camera_tracks(&self) -> usize {
        self.camera.active_tracks()
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    /// Worker jobs whose completion has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// No jobs in flight and no timers pending.
    pub fn is_settled(&self) -> bool {
        self.in_flight == 0 && !self.session.has_pending_timers()
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Install a local upload, drop or camera blob.
    ///
    /// Validation failures leave the pipeline untouched. Otherwise the
    /// current session is superseded and the new artifact is previewed.
    pub fn acquire(&mut self, input: AcquireInput) -> Result<Generation> {
        let blob = acquire::normalize(input)?;
        let generation = self.supersede();
        self.install(blob);
        self.auto_hash();
        Ok(generation)
    }

    /// Start a URL import. The pipeline sits in `Acquiring` until the
    /// download completes.
    pub fn import_url(&mut self, raw: &str) -> Result<Generation> {
        let url = acquire::parse_import_url(raw)?;
        let generation = self.supersede();
        self.clear_artifact();
        self.session.set_state(PipelineState::Acquiring);
        log::info!("importing image from {}", url);

        let fetcher = Arc::clone(&self.services.fetcher);
        self.spawn_job("import", move || {
            JobOutput::Imported(acquire::import_url(fetcher.as_ref(), &url))
        });
        Ok(generation)
    }

    // ------------------------------------------------------------------
    // Camera
    // ------------------------------------------------------------------

    pub fn start_camera(&mut self) -> Result<()> {
        let state = self.session.state();
        if matches!(
            state,
            PipelineState::Acquiring | PipelineState::Hashing | PipelineState::AwaitingWitness
        ) {
            return Err(CaptureError::State {
                action: "start camera",
                state,
            });
        }
        self.camera.start().map_err(|err| {
            self.notifier
                .notify(Notification::error("Camera unavailable", err.to_string()));
            err
        })
    }

    pub fn stop_camera(&mut self) {
        self.camera.stop();
    }

    /// Snapshot the running camera and submit it as a witness.
    ///
    /// The stream is stopped whether or not the snapshot succeeds. The
    /// snapshot goes straight to the witness service, so `auto_hash` does
    /// not apply here.
    pub fn capture_photo(&mut self) -> Result<Generation> {
        if !self.camera.is_running() {
            return Err(CaptureError::State {
                action: "capture photo",
                state: self.session.state(),
            });
        }
        let blob = self.camera.capture().map_err(|err| {
            self.notifier
                .notify(Notification::error("Capture failed", err.to_string()));
            err
        })?;
        let generation = self.supersede();
        self.install(blob);
        self.begin_witness()?;
        Ok(generation)
    }

    // ------------------------------------------------------------------
    // Hash and witness
    // ------------------------------------------------------------------

    /// Ask the hashing service for the current artifact's content hash.
    pub fn request_hash(&mut self) -> Result<()> {
        let artifact = self.previewed_artifact("request hash")?;
        self.session.set_state(PipelineState::Hashing);
        let hasher = Arc::clone(&self.services.hasher);
        self.spawn_job("hash", move || JobOutput::Hashed(hasher.submit(&artifact)));
        Ok(())
    }

    /// Submit the previewed artifact to the witness service.
    pub fn submit_witness(&mut self) -> Result<()> {
        self.previewed_artifact("submit witness")?;
        self.begin_witness()
    }

    fn begin_witness(&mut self) -> Result<()> {
        let artifact = self.previewed_artifact("submit witness")?;
        self.session.set_state(PipelineState::AwaitingWitness);
        let witness = Arc::clone(&self.services.witness);
        let prover = Arc::clone(&self.services.prover);
        self.spawn_job("witness", move || {
            let proof = witness
                .submit_witness(&artifact)
                .and_then(|payload| prover.submit_witness(&payload));
            JobOutput::Witnessed(proof)
        });
        Ok(())
    }

    fn previewed_artifact(&self, action: &'static str) -> Result<ImageArtifact> {
        let state = self.session.state();
        match (state, self.session.artifact()) {
            (PipelineState::Previewing, Some(artifact)) => Ok(artifact.clone()),
            _ => Err(CaptureError::State { action, state }),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop the camera, revoke the preview, cancel timers and return to Idle.
    pub fn reset(&mut self) -> Generation {
        self.camera.stop();
        let generation = self.session.advance();
        self.clear_artifact();
        self.session.set_state(PipelineState::Idle);
        generation
    }

    /// Reset, then reopen the camera for a new capture.
    pub fn retake(&mut self) -> Result<Generation> {
        self.camera.retake();
        let generation = self.reset();
        self.start_camera()?;
        Ok(generation)
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Drain finished jobs and fire due timers. Returns how many events ran.
    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// `poll` against an explicit clock. Timers are scheduled relative to `now`.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.rx.try_recv() {
            self.complete(completion, now);
            handled += 1;
        }
        while let Some(kind) = self.session.pop_due(now) {
            self.fire(kind, now);
            handled += 1;
        }
        handled
    }

    /// Run the event loop until nothing is in flight or pending, or until
    /// `timeout` elapses. Returns whether the pipeline settled.
    pub fn run_until_settled(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            self.poll();
            if self.is_settled() {
                return true;
            }
            let now = Instant::now();
            let remaining = match timeout.checked_sub(now.duration_since(started)) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return false,
            };
            let wait = self
                .session
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(remaining)
                .min(remaining);
            if self.in_flight > 0 {
                match self.rx.recv_timeout(wait) {
                    Ok(completion) => self.complete(completion, Instant::now()),
                    Err(RecvTimeoutError::Timeout) => {}
                    // The pipeline holds a sender, so the channel cannot close.
                    Err(RecvTimeoutError::Disconnected) => return false,
                }
            } else {
                std::thread::sleep(wait);
            }
        }
    }

    fn spawn_job<F>(&mut self, name: &'static str, job: F)
    where
        F: FnOnce() -> JobOutput + Send + 'static,
    {
        let generation = self.session.generation();
        let tx = self.tx.clone();
        self.in_flight += 1;
        std::thread::spawn(move || {
            let output = job();
            if tx.send(Completion { generation, output }).is_err() {
                log::debug!("{} job gen={} finished after pipeline shutdown", name, generation.value());
            }
        });
    }

    fn complete(&mut self, completion: Completion, now: Instant) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if !self.session.is_live(completion.generation) {
            log::debug!(
                "discarding stale completion gen={} (live gen={})",
                completion.generation.value(),
                self.session.generation().value()
            );
            return;
        }
        match completion.output {
            JobOutput::Imported(result) => self.on_imported(result),
            JobOutput::Hashed(result) => self.on_hashed(result),
            JobOutput::Witnessed(result) => self.on_witnessed(result, now),
        }
    }

    fn on_imported(&mut self, result: Result<ImageBlob>) {
        if self.session.state() != PipelineState::Acquiring {
            return;
        }
        match result {
            Ok(blob) => {
                self.install(blob);
                self.auto_hash();
            }
            Err(err) => {
                log::warn!("URL import failed: {}", err);
                self.notifier
                    .notify(Notification::error("Import failed", err.to_string()));
                self.session.set_state(PipelineState::Idle);
            }
        }
    }

    fn on_hashed(&mut self, result: Result<ContentHash>) {
        if self.session.state() != PipelineState::Hashing {
            return;
        }
        match result {
            Ok(hash) => {
                log::info!("content hash {}", hash.display());
                self.session.set_hash(hash);
            }
            // Non-fatal: the preview stays usable without a hash.
            Err(err) => log::warn!("hash request failed: {}", err),
        }
        self.session.set_state(PipelineState::Previewing);
    }

    fn on_witnessed(&mut self, result: Result<ProofHandle>, now: Instant) {
        if self.session.state() != PipelineState::AwaitingWitness {
            return;
        }
        match result {
            Ok(proof) => {
                log::info!(
                    "witness accepted by circuit {} (digest {})",
                    proof.circuit,
                    proof.witness_digest_hex()
                );
                self.session.set_proof(proof);
                self.session
                    .schedule(TimerKind::PresentSuccess, now + self.config.success_delay);
            }
            Err(err) => self.fail_session(err),
        }
    }

    fn fire(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::PresentSuccess => {
                if self.session.state() != PipelineState::AwaitingWitness {
                    return;
                }
                self.session.set_state(PipelineState::Success);
                self.notifier.notify(Notification::success(
                    "Verified",
                    "witness accepted; saving image",
                ));
                self.session
                    .schedule(TimerKind::Export, now + self.config.export_delay);
            }
            TimerKind::Export => self.export_once(),
        }
    }

    fn export_once(&mut self) {
        if self.session.state() != PipelineState::Success || !self.session.claim_export() {
            return;
        }
        let Some(artifact) = self.session.artifact() else {
            return;
        };
        match self.exporter.export(artifact) {
            Ok(path) => {
                log::info!("exported verified image to {}", path.display());
                self.notifier
                    .notify(Notification::info("Saved", path.display().to_string()));
                self.session.record_export(path);
            }
            Err(err) => {
                log::error!("{}", err);
                self.notifier
                    .notify(Notification::error("Export failed", err.to_string()));
            }
        }
    }

    fn fail_session(&mut self, err: CaptureError) {
        log::error!("witness round trip failed: {}", err);
        self.camera.stop();
        self.session.set_error(err.to_string());
        self.session.set_state(PipelineState::Error);
        self.notifier
            .notify(Notification::error("Verification failed", err.to_string()));
    }

    // ------------------------------------------------------------------
    // Session helpers
    // ------------------------------------------------------------------

    // New generation; a running camera is released since it belongs to the
    // superseded session.
    fn supersede(&mut self) -> Generation {
        if self.camera.is_running() {
            self.camera.stop();
        }
        self.session.advance()
    }

    fn install(&mut self, blob: ImageBlob) {
        let previous = self.session.replace_artifact(None);
        let artifact = ImageArtifact::install(&mut self.previews, previous.as_ref(), blob);
        log::info!(
            "acquired {} ({}, {} bytes) from {}",
            artifact.file_name(),
            artifact.mime_type(),
            artifact.len(),
            artifact.source()
        );
        self.session.replace_artifact(Some(artifact));
        self.session.set_state(PipelineState::Previewing);
    }

    fn auto_hash(&mut self) {
        if !self.config.auto_hash {
            return;
        }
        if let Err(err) = self.request_hash() {
            log::warn!("automatic hash request skipped: {}", err);
        }
    }

    fn clear_artifact(&mut self) {
        if let Some(previous) = self.session.replace_artifact(None) {
            self.previews.revoke(previous.preview());
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.camera.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::AcquireInput;
    use crate::artifact::SourceKind;
    use crate::camera::SyntheticCamera;
    use crate::transport::Fetched;
    use crate::witness::WitnessPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    #[derive(Default)]
    struct Fakes {
        hash_calls: AtomicUsize,
        witness_calls: AtomicUsize,
        witness_fails: bool,
        gate: Mutex<()>,
    }

    struct FakeHasher(Arc<Fakes>);

    impl HashService for FakeHasher {
        fn submit(&self, artifact: &ImageArtifact) -> Result<ContentHash> {
            let _gate = self.0.gate.lock().map_err(|_| CaptureError::network("gate"))?;
            self.0.hash_calls.fetch_add(1, Ordering::SeqCst);
            let hex = hex::encode(artifact.bytes());
            Ok(ContentHash::new(hex, artifact.bytes().to_vec()))
        }
    }

    struct FakeWitness(Arc<Fakes>);

    impl WitnessService for FakeWitness {
        fn submit_witness(&self, _artifact: &ImageArtifact) -> Result<WitnessPayload> {
            let _gate = self.0.gate.lock().map_err(|_| CaptureError::network("gate"))?;
            self.0.witness_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.witness_fails {
                return Err(CaptureError::Service {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(WitnessPayload::new(serde_json::json!({ "image_hash": [1, 2] })))
        }
    }

    struct NoFetch;

    impl ImageFetcher for NoFetch {
        fn fetch(&self, _url: &str, _max: usize) -> Result<Fetched> {
            Err(CaptureError::network("offline"))
        }
    }

    #[derive(Clone, Default)]
    struct CountingExporter(Arc<AtomicUsize>);

    impl Exporter for CountingExporter {
        fn export(&mut self, _artifact: &ImageArtifact) -> Result<std::path::PathBuf> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(std::path::PathBuf::from("zkpa-verified.png"))
        }
    }

    struct Quiet;

    impl Notifier for Quiet {
        fn notify(&mut self, _notification: Notification) {}
    }

    fn pipeline(device: &str, fakes: Arc<Fakes>, exporter: CountingExporter) -> Pipeline {
        pipeline_with(SyntheticCamera::new(device), fakes, exporter, false)
    }

    fn pipeline_with(
        camera: SyntheticCamera,
        fakes: Arc<Fakes>,
        exporter: CountingExporter,
        auto_hash: bool,
    ) -> Pipeline {
        let services = Services {
            hasher: Arc::new(FakeHasher(fakes.clone())),
            witness: Arc::new(FakeWitness(fakes)),
            prover: Arc::new(WitnessOnlyBackend::default()),
            fetcher: Arc::new(NoFetch),
        };
        Pipeline::new(
            PipelineConfig {
                success_delay: Duration::from_millis(10),
                export_delay: Duration::from_millis(10),
                auto_hash,
            },
            services,
            CameraController::new(Box::new(camera)),
            Box::new(exporter),
            Box::new(Quiet),
        )
    }

    fn upload(tag: u8) -> AcquireInput {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.push(tag);
        AcquireInput::Upload {
            file_name: "photo.png".to_string(),
            mime_type: Some("image/png".to_string()),
            bytes,
        }
    }

    #[test]
    fn acquisition_previews_and_revokes_previous_handle() -> Result<()> {
        let mut p = pipeline("stub://pipe-acquire", Arc::default(), CountingExporter::default());
        p.acquire(upload(1))?;
        let first = p.artifact().map(|a| a.preview().clone()).expect("artifact");
        p.acquire(upload(2))?;
        assert_eq!(p.state(), PipelineState::Previewing);
        assert!(!p.previews().is_live(&first));
        assert_eq!(p.previews().live_count(), 1);
        Ok(())
    }

    #[test]
    fn validation_failure_changes_nothing() -> Result<()> {
        let mut p = pipeline("stub://pipe-validate", Arc::default(), CountingExporter::default());
        let generation = p.acquire(upload(1))?;
        let err = p
            .acquire(AcquireInput::Drop {
                file_name: "notes.txt".to_string(),
                mime_type: Some("text/plain".to_string()),
                bytes: b"hello".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, CaptureError::Validation(_)));
        assert_eq!(p.generation(), generation);
        assert_eq!(p.state(), PipelineState::Previewing);
        Ok(())
    }

    #[test]
    fn stale_hash_does_not_overwrite_newer_session() -> Result<()> {
        let fakes = Arc::new(Fakes::default());
        let mut p = pipeline("stub://pipe-stale", fakes.clone(), CountingExporter::default());

        let gate = fakes.gate.lock().expect("gate");
        p.acquire(upload(1))?;
        p.request_hash()?;
        p.acquire(upload(2))?;
        p.request_hash()?;
        drop(gate);

        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(fakes.hash_calls.load(Ordering::SeqCst), 2);
        let shown = p.content_hash().expect("hash").hex().to_string();
        assert_eq!(shown, hex::encode(p.artifact().expect("artifact").bytes()));
        assert_eq!(p.state(), PipelineState::Previewing);
        Ok(())
    }

    #[test]
    fn witness_success_exports_once_after_delays() -> Result<()> {
        let _guard = camera::stream_test_guard();
        let exporter = CountingExporter::default();
        let mut p = pipeline("stub://pipe-success", Arc::default(), exporter.clone());
        p.start_camera()?;
        p.capture_photo()?;
        assert_eq!(p.state(), PipelineState::AwaitingWitness);
        assert_eq!(p.camera_tracks(), 0);
        assert_eq!(p.artifact().map(|a| a.source()), Some(SourceKind::Camera));

        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Success);
        assert_eq!(exporter.0.load(Ordering::SeqCst), 1);
        assert!(p.proof().is_some());

        // Nothing left to fire a second export.
        p.poll_at(Instant::now() + Duration::from_secs(60));
        assert_eq!(exporter.0.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn witness_failure_is_terminal_without_export() -> Result<()> {
        let fakes = Arc::new(Fakes {
            witness_fails: true,
            ..Fakes::default()
        });
        let exporter = CountingExporter::default();
        let mut p = pipeline("stub://pipe-failure", fakes, exporter.clone());
        p.acquire(upload(3))?;
        p.submit_witness()?;
        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Error);
        assert!(p.session().last_error().is_some());
        assert_eq!(exporter.0.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn reset_during_witness_discards_result_and_timers() -> Result<()> {
        let exporter = CountingExporter::default();
        let mut p = pipeline("stub://pipe-reset", Arc::default(), exporter.clone());
        p.acquire(upload(4))?;
        p.submit_witness()?;
        p.reset();
        assert_eq!(p.state(), PipelineState::Idle);
        assert_eq!(p.previews().live_count(), 0);

        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Idle);
        assert_eq!(exporter.0.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn late_witness_result_does_not_move_newer_session() -> Result<()> {
        let fakes = Arc::new(Fakes::default());
        let exporter = CountingExporter::default();
        let mut p = pipeline("stub://pipe-late-witness", fakes.clone(), exporter.clone());

        let gate = fakes.gate.lock().expect("gate");
        let first = p.acquire(upload(6))?;
        p.submit_witness()?;
        let second = p.acquire(upload(7))?;
        assert!(second > first);
        drop(gate);

        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(fakes.witness_calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.generation(), second);
        assert_eq!(p.state(), PipelineState::Previewing);
        assert!(p.proof().is_none());
        assert_eq!(exporter.0.load(Ordering::SeqCst), 0);
        assert_eq!(p.artifact().map(|a| a.bytes().last().copied()), Some(Some(7)));
        Ok(())
    }

    #[test]
    fn auto_hash_applies_to_uploads_but_not_captures() -> Result<()> {
        let _guard = camera::stream_test_guard();
        let fakes = Arc::new(Fakes::default());
        let exporter = CountingExporter::default();
        let mut p = pipeline_with(
            SyntheticCamera::new("stub://pipe-auto-hash"),
            fakes.clone(),
            exporter.clone(),
            true,
        );

        p.acquire(upload(5))?;
        assert_eq!(p.state(), PipelineState::Hashing);
        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Previewing);
        assert!(p.content_hash().is_some());

        p.start_camera()?;
        p.capture_photo()?;
        assert_eq!(p.state(), PipelineState::AwaitingWitness);
        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Success);
        assert_eq!(fakes.hash_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fakes.witness_calls.load(Ordering::SeqCst), 1);
        assert_eq!(exporter.0.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn retake_with_unavailable_camera_still_resets() -> Result<()> {
        let _guard = camera::stream_test_guard();
        let mut p = pipeline_with(
            SyntheticCamera::new("stub://pipe-retake-denied").deny_permission(),
            Arc::default(),
            CountingExporter::default(),
            false,
        );
        let before = p.acquire(upload(8))?;

        let err = p.retake().unwrap_err();
        assert!(matches!(err, CaptureError::Permission(_)));
        assert!(p.generation() > before);
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.artifact().is_none());
        assert_eq!(p.previews().live_count(), 0);
        assert_eq!(p.camera_state(), CameraState::Stopped);
        assert_eq!(p.camera_tracks(), 0);
        Ok(())
    }

    #[test]
    fn actions_outside_the_table_are_state_errors() {
        let mut p = pipeline("stub://pipe-state", Arc::default(), CountingExporter::default());
        assert!(matches!(
            p.request_hash(),
            Err(CaptureError::State { action: "request hash", state: PipelineState::Idle })
        ));
        assert!(matches!(p.capture_photo(), Err(CaptureError::State { .. })));
        assert!(matches!(p.submit_witness(), Err(CaptureError::State { .. })));
        assert_eq!(p.generation(), Generation::default());
    }

    #[test]
    fn failed_import_returns_to_idle() -> Result<()> {
        let mut p = pipeline("stub://pipe-import", Arc::default(), CountingExporter::default());
        p.import_url("https://example.invalid/cat.png")?;
        assert_eq!(p.state(), PipelineState::Acquiring);
        assert!(p.run_until_settled(Duration::from_secs(5)));
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.artifact().is_none());
        Ok(())
    }
}
