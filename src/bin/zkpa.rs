//! zkpa - acquire an image, hash it and run the witness round trip

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use zkpa_capture::ui::{self, Ui, UiMode};
use zkpa_capture::{AcquireInput, CaptureConfig, Pipeline, PipelineState};

// Event loop slice between Ctrl-C checks.
const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    source: Source,
    /// Submit the image to the witness service and export on success.
    #[arg(long)]
    verify: bool,
    /// Skip the content hash request.
    #[arg(long)]
    no_hash: bool,
    /// Give up waiting on the services after this many seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
    /// Output mode for stage progress.
    #[arg(long, value_enum, default_value = "auto")]
    ui: UiMode,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Upload a local image file.
    Upload {
        path: PathBuf,
        /// Treat the file as a drag-and-drop payload.
        #[arg(long)]
        dropped: bool,
    },
    /// Import an image from an http(s) URL.
    Import { url: String },
    /// Capture a snapshot from the configured camera and verify it.
    Camera,
}

fn main() -> Result<()> {
    ui::init_logging();
    let args = Args::parse();
    let cfg = CaptureConfig::load()?;
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());
    let timeout = Duration::from_secs(args.timeout_secs);

    let mut pipeline = Pipeline::from_config(&cfg, Box::new(ui.notifier()))
        .context("failed to set up capture pipeline")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    match &args.source {
        Source::Upload { path, dropped } => {
            let input = if *dropped {
                AcquireInput::drop_file(path)?
            } else {
                AcquireInput::upload_file(path)?
            };
            pipeline.acquire(input)?;
        }
        Source::Import { url } => {
            let stage = ui.stage(ui::stage_label(PipelineState::Acquiring));
            pipeline.import_url(url)?;
            drive(&mut pipeline, &interrupted, timeout)?;
            if pipeline.state() != PipelineState::Previewing {
                stage.fail();
                return Err(anyhow!("import of {} failed", url));
            }
        }
        Source::Camera => {
            {
                let _stage = ui.stage("starting camera");
                pipeline.start_camera()?;
            }
            pipeline.capture_photo()?;
        }
    }
    report_artifact(&pipeline);

    if !args.no_hash && pipeline.state() == PipelineState::Previewing {
        pipeline.request_hash()?;
    }
    if pipeline.state() == PipelineState::Hashing {
        let _stage = ui.stage(ui::stage_label(PipelineState::Hashing));
        wait_while(&mut pipeline, &interrupted, timeout, PipelineState::Hashing)?;
    }
    if let Some(hash) = pipeline.displayed_hash() {
        println!("hash: {}", hash);
    }

    if args.verify && pipeline.state() == PipelineState::Previewing {
        pipeline.submit_witness()?;
    }
    if pipeline.state() == PipelineState::AwaitingWitness {
        let stage = ui.stage(ui::stage_label(PipelineState::AwaitingWitness));
        drive(&mut pipeline, &interrupted, timeout)?;
        if pipeline.state() != PipelineState::Success {
            stage.fail();
        }
        return finish(&pipeline);
    }
    Ok(())
}

fn report_artifact(pipeline: &Pipeline) {
    if let Some(artifact) = pipeline.artifact() {
        println!(
            "acquired: {} ({}, {} bytes) preview={}",
            artifact.file_name(),
            artifact.mime_type(),
            artifact.len(),
            artifact.preview().uri()
        );
    }
}

fn finish(pipeline: &Pipeline) -> Result<()> {
    match pipeline.state() {
        PipelineState::Success => {
            if let Some(proof) = pipeline.proof() {
                println!("witness digest: {}", proof.witness_digest_hex());
                if let Some(record) = proof.verifier_record() {
                    println!("{}", toml::to_string(&record)?);
                }
            }
            if let Some(path) = pipeline.exported_path() {
                println!("exported: {}", path.display());
            }
            Ok(())
        }
        PipelineState::Error => Err(anyhow!(
            "verification failed: {}",
            pipeline.session().last_error().unwrap_or("unknown error")
        )),
        other => Err(anyhow!("pipeline stopped in state {:?}", other)),
    }
}

/// Run the event loop until settled. Ctrl-C resets the pipeline, which
/// releases the camera.
fn drive(pipeline: &mut Pipeline, interrupted: &AtomicBool, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            pipeline.reset();
            return Err(anyhow!("interrupted"));
        }
        if pipeline.run_until_settled(POLL_SLICE) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            pipeline.reset();
            return Err(anyhow!("timed out after {}s", timeout.as_secs()));
        }
    }
}

fn wait_while(
    pipeline: &mut Pipeline,
    interrupted: &AtomicBool,
    timeout: Duration,
    state: PipelineState,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while pipeline.state() == state {
        if interrupted.load(Ordering::SeqCst) {
            pipeline.reset();
            return Err(anyhow!("interrupted"));
        }
        if Instant::now() >= deadline {
            pipeline.reset();
            return Err(anyhow!("timed out after {}s", timeout.as_secs()));
        }
        pipeline.run_until_settled(POLL_SLICE);
    }
    Ok(())
}
