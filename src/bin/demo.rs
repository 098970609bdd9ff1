//! demo - end-to-end synthetic run of the height engine
//!
//! Two people walk toward and away from a pinhole camera. The engine first
//! tracks them without depth compensation, calibrates on their histories,
//! then tracks them walking back and reports the error against ground truth.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::io::IsTerminal;

use depth_height::detect::{SceneConfig, SyntheticSource, Walker};
use depth_height::ui::Ui;
use depth_height::{
    AnchorSet, DetectionSource, EngineConfig, FrameReport, HeightEngine, ObjectId, RetrainOutcome,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames per walking pass.
    #[arg(long, default_value_t = 40)]
    frames: u64,
    /// Uniform depth noise amplitude (m).
    #[arg(long, default_value_t = 0.0)]
    depth_noise: f64,
    /// Polynomial degree of the scale model.
    #[arg(long, default_value_t = 3)]
    degree: u32,
    /// Seed for depth noise.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Progress display: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
}

const ANCHOR_HEIGHT_CM: f64 = 200.0;
const ANCHOR_DEPTH: f64 = 8.0;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.frames < 2 {
        return Err(anyhow!("frames must be >= 2"));
    }
    let ui = Ui::from_flag(args.ui.as_deref(), std::io::stderr().is_terminal());

    let outbound = SceneConfig {
        frames: args.frames,
        depth_noise: args.depth_noise,
        seed: args.seed,
        ..SceneConfig::default()
    };
    let inbound = SceneConfig {
        first_frame: args.frames,
        walkers: outbound.walkers.iter().map(reversed).collect(),
        seed: args.seed.wrapping_add(1),
        ..outbound.clone()
    };
    let truth: Vec<f64> = outbound.walkers.iter().map(|w| w.height_cm).collect();

    let mut config = EngineConfig::default();
    config.calibration.degree = args.degree;
    let anchor = SyntheticSource::new(outbound.clone()).anchor(ANCHOR_HEIGHT_CM, ANCHOR_DEPTH);
    let anchors = AnchorSet::new(vec![anchor])?;
    let mut engine = HeightEngine::new(config, anchors)?;

    let uncalibrated = {
        let _stage = ui.stage("track without calibration");
        run_pass(&mut engine, SyntheticSource::new(outbound), &ui)?
    };

    {
        let _stage = ui.stage("fit scale model");
        match engine.retrain()? {
            RetrainOutcome::Swapped(summary) => log::info!(
                "scale model fitted on {} pairs (rms {:.5})",
                summary.pairs,
                summary.rms
            ),
            RetrainOutcome::Skipped { pairs } => {
                return Err(anyhow!("calibration needs more data ({} pairs)", pairs))
            }
        }
    }

    let calibrated = {
        let _stage = ui.stage("track with calibration");
        run_pass(&mut engine, SyntheticSource::new(inbound), &ui)?
    };

    println!("{:<8} {:>10} {:>14} {:>14}", "object", "truth", "uncalibrated", "calibrated");
    for (idx, height) in truth.iter().enumerate() {
        let id = ObjectId(idx as u64);
        let before = mean_abs_error(uncalibrated.get(&id), *height);
        let after = mean_abs_error(calibrated.get(&id), *height);
        println!(
            "{:<8} {:>10.1} {:>13.1}% {:>13.1}%",
            id.to_string(),
            height,
            before * 100.0,
            after * 100.0
        );
    }
    Ok(())
}

fn reversed(walker: &Walker) -> Walker {
    Walker {
        start_depth: walker.end_depth,
        end_depth: walker.start_depth,
        ..walker.clone()
    }
}

/// Stable heights per object over one pass.
fn run_pass(
    engine: &mut HeightEngine,
    mut source: SyntheticSource,
    ui: &Ui,
) -> Result<BTreeMap<ObjectId, Vec<f64>>> {
    let progress = ui.frames(Some(source.scene().frames));
    let mut heights: BTreeMap<ObjectId, Vec<f64>> = BTreeMap::new();
    while let Some(frame) = source.next_frame()? {
        let report: FrameReport = engine.process_frame(&frame)?;
        for object in &report.objects {
            heights.entry(object.id).or_default().push(object.stable_height);
        }
        progress.tick(report.objects.len());
    }
    progress.finish();
    Ok(heights)
}

fn mean_abs_error(estimates: Option<&Vec<f64>>, truth: f64) -> f64 {
    match estimates {
        Some(values) if !values.is_empty() => {
            values.iter().map(|v| (v - truth).abs() / truth).sum::<f64>() / values.len() as f64
        }
        _ => f64::NAN,
    }
}
