// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use traffic_counter::config::{parse_line_arg, Overrides, RunRecord};
use traffic_counter::counting::{reconstruct, run_counter, RunOutput, StatsSummary};
use traffic_counter::report;
use traffic_counter::source::JsonlTrackerSource;
use traffic_counter::types::{Config, TrackerKind};

#[derive(Parser)]
#[command(name = "traffic-counter", version, about = "Counts vehicles crossing a stop line under a simulated traffic signal")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect, track and count vehicles in a video file or a directory of videos
    #[cfg(feature = "video")]
    Process {
        input: PathBuf,
        /// Result directory name, defaults to the video file stem
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Draw the count line on a random frame of a video
    #[cfg(feature = "video")]
    Preview {
        video: PathBuf,
        #[arg(short, long, default_value = "preview.jpg")]
        output: PathBuf,
        #[arg(long, value_parser = parse_line_arg)]
        line: Option<[f64; 4]>,
    },
    /// Count from pre-computed tracker output (one JSON frame per line)
    Count {
        #[arg(long)]
        tracks: PathBuf,
        #[arg(long)]
        fps: f64,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Rebuild stats.csv from a detections.csv
    Stats {
        detections: PathBuf,
        /// Defaults to stats.csv next to the detections file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Count line as x1,y1,x2,y2 (values in [0, 1] are frame-relative)
    #[arg(long, value_parser = parse_line_arg)]
    line: Option<[f64; 4]>,
    /// Green phase length in seconds
    #[arg(long)]
    green: Option<i64>,
    /// Red phase length in seconds
    #[arg(long)]
    red: Option<i64>,
    #[arg(long)]
    conf: Option<f32>,
    #[arg(long)]
    iou: Option<f32>,
    #[arg(long, value_enum)]
    tracker: Option<TrackerKind>,
}

impl From<&OverrideArgs> for Overrides {
    fn from(args: &OverrideArgs) -> Self {
        Overrides {
            line: args.line,
            green_duration_s: args.green,
            red_duration_s: args.red,
            confidence_threshold: args.conf,
            iou_threshold: args.iou,
            tracker: args.tracker,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = if config_found {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("traffic_counter={},ort=warn", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Traffic Counter Starting");
    if config_found {
        info!("✓ Configuration loaded from {}", cli.config.display());
    } else {
        warn!("Config {} not found, using defaults", cli.config.display());
    }

    match cli.command {
        #[cfg(feature = "video")]
        Command::Process {
            input,
            name,
            overrides,
        } => {
            config.apply_overrides(&Overrides::from(&overrides));
            config.validate()?;
            video::process_input(&input, name.as_deref(), &config)
        }
        #[cfg(feature = "video")]
        Command::Preview {
            video: video_path,
            output,
            line,
        } => {
            config.apply_overrides(&Overrides {
                line,
                ..Overrides::default()
            });
            video::preview(&video_path, &output, &config)
        }
        Command::Count {
            tracks,
            fps,
            width,
            height,
            name,
            overrides,
        } => {
            config.apply_overrides(&Overrides::from(&overrides));
            config.validate()?;
            count_tracks(&tracks, fps, (width, height), name.as_deref(), &config)
        }
        Command::Stats { detections, output } => rebuild_stats(&detections, output),
    }
}

fn run_name(path: &Path, name: Option<&str>) -> String {
    name.map(str::to_string).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "run".to_string())
    })
}

fn count_tracks(
    tracks: &Path,
    fps: f64,
    frame_size: (u32, u32),
    name: Option<&str>,
    config: &Config,
) -> Result<()> {
    let mut source = JsonlTrackerSource::open(tracks, fps, frame_size)?;
    let output = run_counter(
        &mut source,
        &config.line_points(),
        config.signal_timing()?,
        |_, _, _| Ok(()),
    )?;

    let dir = report::next_result_dir(Path::new(&config.video.output_dir), &run_name(tracks, name))?;
    let record = RunRecord::from_config(config, &tracks.to_string_lossy());
    report::fill_result_dir(&dir, |dir| {
        report::save_run(dir, &output.log, &output.stats, &record)
    })?;
    log_summary(&output);
    Ok(())
}

fn rebuild_stats(detections: &Path, output: Option<PathBuf>) -> Result<()> {
    let log = report::read_detections_file(detections)
        .with_context(|| format!("Failed to read {}", detections.display()))?;
    let stats = reconstruct(&log);

    let output = output.unwrap_or_else(|| detections.with_file_name(report::STATS_FILE));
    report::write_stats_file(&output, &stats)?;

    let summary = StatsSummary::from_rows(&stats);
    info!(
        "✓ {} log entries → {} stats rows written to {}",
        log.len(),
        stats.len(),
        output.display()
    );
    info!(
        "  Vehicles: {} | passed: {} (🟢 {} / 🔴 {})",
        summary.detected_total, summary.passed_total, summary.green_total, summary.red_total
    );
    Ok(())
}

/// Runs `process` on every input in turn. A failing input is logged and the
/// rest still run; the first failure is returned once all are done.
#[cfg(any(feature = "video", test))]
fn process_each<T>(
    inputs: &[PathBuf],
    mut process: impl FnMut(&Path) -> Result<T>,
) -> Result<Vec<T>> {
    let mut outputs = Vec::with_capacity(inputs.len());
    let mut failures: Vec<(PathBuf, anyhow::Error)> = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        info!("\n========================================");
        info!("Processing {}/{}: {}", idx + 1, inputs.len(), input.display());
        info!("========================================\n");

        match process(input) {
            Ok(output) => outputs.push(output),
            Err(e) => {
                error!("Failed to process {}: {:#}", input.display(), e);
                failures.push((input.clone(), e));
            }
        }
    }

    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(outputs),
        Some((path, e)) => Err(e.context(format!(
            "{} of {} inputs failed, first: {}",
            failed,
            inputs.len(),
            path.display()
        ))),
    }
}

fn log_summary(output: &RunOutput) {
    let summary = &output.summary;
    info!("\n✓ Run complete!");
    info!("  Frames processed: {}", output.frames);
    info!("  Duration covered: {:.1}s", summary.duration_s);
    info!("  🚙 Unique vehicles: {}", summary.detected_total);
    info!("  Peak vehicles in one frame: {}", summary.peak_detected);
    info!("  🟢 Passed on green: {}", summary.green_total);
    if summary.red_total > 0 {
        warn!(
            "  🔴 Passed on red: {} ({:.1}% of crossings)",
            summary.red_total,
            100.0 * summary.red_ratio()
        );
    } else {
        info!("  🔴 Passed on red: 0");
    }
    if !output.totals_agree() {
        error!("  Live and reconstructed totals differ, see log above");
    }
    info!("  Processing speed: {:.1} FPS", output.processing_fps());
}

#[cfg(feature = "video")]
mod video {
    use super::*;
    use opencv::{core::Mat, prelude::*, videoio::VideoWriter};
    use traffic_counter::video_processor::{
        draw_counting_overlay, find_video_files, save_line_preview, select_random_frame,
        VideoProcessor, VideoTrackerSource,
    };
    use traffic_counter::vehicle_detection::YoloDetector;
    use traffic_counter::CounterError;

    pub fn process_input(input: &Path, name: Option<&str>, config: &Config) -> Result<()> {
        let processor = VideoProcessor::new(config.clone());
        let videos = find_video_files(input)?;
        if videos.is_empty() {
            error!("No video files found in {}", input.display());
            return Ok(());
        }

        // An explicit name only applies to a single input file
        let name = if videos.len() == 1 { name } else { None };
        process_each(&videos, |video_path| {
            let output = process_video(video_path, name, &processor, config)?;
            log_summary(&output);
            Ok(())
        })?;
        Ok(())
    }

    fn process_video(
        video_path: &Path,
        name: Option<&str>,
        processor: &VideoProcessor,
        config: &Config,
    ) -> Result<RunOutput> {
        let reader = processor.open_video(video_path)?;
        let dir = report::next_result_dir(
            Path::new(&config.video.output_dir),
            &run_name(video_path, name),
        )?;

        let detector = YoloDetector::new(&config.model)?;
        info!(
            "✓ {} tracker ready (conf={:.2}, iou={:.2})",
            config.tracking.tracker.as_str(),
            config.tracking.confidence_threshold,
            config.tracking.iou_threshold
        );

        report::fill_result_dir(&dir, |dir| -> Result<RunOutput> {
            let mut writer: Option<VideoWriter> = if config.video.save_annotated {
                Some(processor.create_writer(
                    &dir.join(report::VIDEO_FILE),
                    reader.width,
                    reader.height,
                    reader.fps,
                )?)
            } else {
                None
            };
            let mut source = VideoTrackerSource::new(reader, detector, config);

            let output = run_counter(
                &mut source,
                &config.line_points(),
                config.signal_timing()?,
                |frame, outcome, aggregator| {
                    if let Some(writer) = writer.as_mut() {
                        let annotated: Mat = draw_counting_overlay(frame, outcome, aggregator)?;
                        writer
                            .write(&annotated)
                            .map_err(|e| CounterError::Render(e.to_string()))?;
                    }
                    Ok(())
                },
            )?;

            if let Some(mut writer) = writer {
                writer.release()?;
            }

            report::save_run(
                dir,
                &output.log,
                &output.stats,
                &RunRecord::from_config(config, &video_path.to_string_lossy()),
            )?;
            Ok(output)
        })
    }

    pub fn preview(video_path: &Path, output: &Path, config: &Config) -> Result<()> {
        let frame = select_random_frame(video_path, config.video.fallback_fps)?;
        let line = config
            .line_points()
            .to_pixels(frame.cols().max(0) as u32, frame.rows().max(0) as u32);
        info!(
            "Line ({},{})→({},{}) on {}x{} frame",
            line.p1.x,
            line.p1.y,
            line.p2.x,
            line.p2.y,
            frame.cols(),
            frame.rows()
        );
        save_line_preview(&frame, &line, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Vec<PathBuf> {
        vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4"), PathBuf::from("c.mp4")]
    }

    #[test]
    fn test_process_each_runs_all_and_reports_failure() {
        let mut seen = Vec::new();
        let result = process_each(&inputs(), |path| {
            seen.push(path.to_path_buf());
            if path == Path::new("b.mp4") {
                anyhow::bail!("cannot open video");
            }
            Ok(())
        });

        assert_eq!(seen, inputs());
        let err = result.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("1 of 3 inputs failed"));
        assert!(message.contains("b.mp4"));
        assert!(message.contains("cannot open video"));
    }

    #[test]
    fn test_process_each_collects_outputs() {
        let outputs = process_each(&inputs(), |path| Ok(path.to_string_lossy().len())).unwrap();
        assert_eq!(outputs, vec![5, 5, 5]);
    }

    #[test]
    fn test_run_name_defaults_to_file_stem() {
        assert_eq!(run_name(Path::new("/videos/cross 1.mp4"), None), "cross 1");
        assert_eq!(run_name(Path::new("tracks.jsonl"), Some("north")), "north");
    }
}
