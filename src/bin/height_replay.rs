//! height_replay - run recorded detector output through the height engine
//!
//! Reads an anchor file and a JSON-lines detections file, then writes one JSON
//! frame report per line. With `--calibrate-first` the detections are read
//! twice: once to collect per-object histories and fit the scale model, then
//! again to estimate with the calibrated model.

use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::PathBuf;

use depth_height::detect::ReplaySource;
use depth_height::ui::Ui;
use depth_height::{AnchorSet, DetectionSource, EngineConfig, HeightEngine, RetrainOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON anchor file (measured anchors or drawn reference lines).
    #[arg(long)]
    anchors: PathBuf,
    /// JSON-lines detections file, one frame per line.
    #[arg(long)]
    detections: PathBuf,
    /// Engine config (JSON or TOML). Defaults to HEIGHT_CONFIG.
    #[arg(long, env = "HEIGHT_CONFIG")]
    config: Option<PathBuf>,
    /// Fit the scale model on a first pass before estimating.
    #[arg(long)]
    calibrate_first: bool,
    /// Output file for frame reports (stdout if omitted).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Progress display: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_flag(args.ui.as_deref(), std::io::stderr().is_terminal());

    let config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let anchors = {
        let _stage = ui.stage("load anchors");
        AnchorSet::load(&args.anchors)?
    };
    log::info!("{} anchors loaded", anchors.len());

    let mut engine = HeightEngine::new(config.clone(), anchors.clone())?;

    if args.calibrate_first {
        let _stage = ui.stage("calibration pass");
        let mut source = ReplaySource::open(&args.detections)?;
        while let Some(frame) = source.next_frame()? {
            engine.process_frame(&frame)?;
        }
        engine.wait_for_retrain()?;
        match engine.retrain()? {
            RetrainOutcome::Swapped(summary) => log::info!(
                "calibrated on {} pairs from {} objects (rms {:.5})",
                summary.pairs,
                engine.history().object_count(),
                summary.rms
            ),
            RetrainOutcome::Skipped { pairs } => log::warn!(
                "only {} training pairs; estimating without depth compensation",
                pairs
            ),
        }
        let model = engine.model().current();
        engine = HeightEngine::with_model(config, anchors, model)?;
    }

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    {
        let _stage = ui.stage("estimate heights");
        let progress = ui.frames(None);
        let mut source = ReplaySource::open(&args.detections)?;
        log::info!("replaying detections from {} source", source.name());
        while let Some(frame) = source.next_frame()? {
            let report = engine.process_frame(&frame)?;
            serde_json::to_writer(&mut out, &report)?;
            writeln!(out)?;
            progress.tick(report.objects.len());
        }
        progress.finish();
    }

    engine.wait_for_retrain()?;
    out.flush()?;
    log::info!("{} frames processed", engine.frames_processed());
    Ok(())
}
