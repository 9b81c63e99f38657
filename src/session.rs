//! Capture session state.
//!
//! A `CaptureSession` is the single authoritative record of the pipeline:
//! current artifact, hash, proof, state, pending delayed transitions and the
//! generation token. Every acquisition and every reset advances the
//! generation; async results and timers tagged with an older generation are
//! ignored.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifact::ImageArtifact;
use crate::hashing::ContentHash;
use crate::proof::ProofHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Acquiring,
    Previewing,
    Hashing,
    AwaitingWitness,
    Success,
    Error,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Success | PipelineState::Error)
    }
}

/// Monotonic session token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// AwaitingWitness -> Success after the presentation delay.
    PresentSuccess,
    /// Export after Success.
    Export,
}

#[derive(Clone, Copy, Debug)]
struct Timer {
    generation: Generation,
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug)]
pub struct CaptureSession {
    generation: Generation,
    state: PipelineState,
    artifact: Option<ImageArtifact>,
    hash: Option<ContentHash>,
    proof: Option<ProofHandle>,
    last_error: Option<String>,
    export_fired: bool,
    exported_to: Option<PathBuf>,
    timers: Vec<Timer>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            generation: Generation::default(),
            state: PipelineState::Idle,
            artifact: None,
            hash: None,
            proof: None,
            last_error: None,
            export_fired: false,
            exported_to: None,
            timers: Vec::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn artifact(&self) -> Option<&ImageArtifact> {
        self.artifact.as_ref()
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    pub fn proof(&self) -> Option<&ProofHandle> {
        self.proof.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn exported_to(&self) -> Option<&Path> {
        self.exported_to.as_deref()
    }

    pub fn is_live(&self, generation: Generation) -> bool {
        self.generation == generation
    }

    // ------------------------------------------------------------------
    // Mutation (pipeline only)
    // ------------------------------------------------------------------

    /// Start a new generation: drops per-session results and pending timers.
    /// The artifact is kept so the caller can revoke its preview.
    pub(crate) fn advance(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.hash = None;
        self.proof = None;
        self.last_error = None;
        self.export_fired = false;
        self.exported_to = None;
        self.timers.clear();
        self.generation
    }

    pub(crate) fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            log::debug!(
                "pipeline gen={} {:?} -> {:?}",
                self.generation.0,
                self.state,
                state
            );
            self.state = state;
        }
    }

    pub(crate) fn replace_artifact(&mut self, artifact: Option<ImageArtifact>) -> Option<ImageArtifact> {
        std::mem::replace(&mut self.artifact, artifact)
    }

    pub(crate) fn set_hash(&mut self, hash: ContentHash) {
        self.hash = Some(hash);
    }

    pub(crate) fn set_proof(&mut self, proof: ProofHandle) {
        self.proof = Some(proof);
    }

    pub(crate) fn set_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    /// Claim the export for this Success transition. True exactly once.
    pub(crate) fn claim_export(&mut self) -> bool {
        !std::mem::replace(&mut self.export_fired, true)
    }

    pub(crate) fn record_export(&mut self, path: PathBuf) {
        self.exported_to = Some(path);
    }

    /// Schedule a delayed transition for the live generation.
    ///
    /// A timer of the same kind already pending for this generation is kept
    /// and the new one dropped, so overlapping triggers collapse to one.
    pub(crate) fn schedule(&mut self, kind: TimerKind, deadline: Instant) -> bool {
        let generation = self.generation;
        if self
            .timers
            .iter()
            .any(|t| t.kind == kind && t.generation == generation)
        {
            return false;
        }
        self.timers.push(Timer {
            generation,
            deadline,
            kind,
        });
        true
    }

    /// Remove and return the earliest due timer of the live generation.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        let generation = self.generation;
        self.timers.retain(|t| t.generation == generation);
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| t.deadline)
            .map(|(i, _)| i)?;
        Some(self.timers.swap_remove(index).kind)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}
