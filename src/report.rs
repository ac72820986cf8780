// src/report.rs
//
// Run artifacts on disk:
//
//   <output_dir>/<NN> <name>/
//       video.mp4        annotated video (video runs only)
//       detections.csv   time,id,x1,y1,pass
//       stats.csv        time,detected,detected_total,green,green_total,red,red_total,passed,passed_total
//       config.json      run configuration record

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::RunRecord;
use crate::error::Result;
use crate::types::{DetectionLogEntry, StatsRow};

pub const DETECTIONS_FILE: &str = "detections.csv";
pub const STATS_FILE: &str = "stats.csv";
pub const CONFIG_FILE: &str = "config.json";
pub const VIDEO_FILE: &str = "video.mp4";

pub fn write_detections<W: Write>(writer: W, log: &[DetectionLogEntry]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for entry in log {
        wtr.serialize(entry)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_detections<R: Read>(reader: R) -> Result<Vec<DetectionLogEntry>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut log = Vec::new();
    for row in rdr.deserialize() {
        log.push(row?);
    }
    Ok(log)
}

pub fn write_stats<W: Write>(writer: W, stats: &[StatsRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in stats {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_stats<R: Read>(reader: R) -> Result<Vec<StatsRow>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut stats = Vec::new();
    for row in rdr.deserialize() {
        stats.push(row?);
    }
    Ok(stats)
}

pub fn read_detections_file(path: &Path) -> Result<Vec<DetectionLogEntry>> {
    read_detections(fs::File::open(path)?)
}

pub fn write_stats_file(path: &Path, stats: &[StatsRow]) -> Result<()> {
    write_stats(fs::File::create(path)?, stats)
}

/// Directory for the next run: `"{NN} {name}"` where `NN` is the number of
/// entries already under `output_dir` plus one, zero-padded to two digits.
pub fn next_result_dir(output_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let existing = fs::read_dir(output_dir)?.count();
    Ok(output_dir.join(format!("{:02} {}", existing + 1, name)))
}

/// Runs `fill` against the result directory `dir`. When it fails, whatever
/// it left in `dir` is removed so the next run keeps its number.
pub fn fill_result_dir<T, E>(
    dir: &Path,
    fill: impl FnOnce(&Path) -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let existed = dir.exists();
    let result = fill(dir);
    if result.is_err() && !existed && dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Could not remove incomplete run {}: {}", dir.display(), e);
        } else {
            info!("🧹 Removed incomplete run {}", dir.display());
        }
    }
    result
}

/// Writes the log, the stats table and the run record into `dir`.
pub fn save_run(
    dir: &Path,
    log: &[DetectionLogEntry],
    stats: &[StatsRow],
    record: &RunRecord,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_detections(fs::File::create(dir.join(DETECTIONS_FILE))?, log)?;
    write_stats(fs::File::create(dir.join(STATS_FILE))?, stats)?;
    fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(record)?)?;
    info!(
        "💾 Saved {} detections and {} stats rows to {}",
        log.len(),
        stats.len(),
        dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::{reconstruct, CrossingState};
    use crate::error::CounterError;

    fn sample_log() -> Vec<DetectionLogEntry> {
        vec![
            DetectionLogEntry {
                time: 0.0,
                id: 7,
                x: 50,
                y: 50,
                pass: CrossingState::Uncrossed,
            },
            DetectionLogEntry {
                time: 0.5,
                id: 7,
                x: 50,
                y: 100,
                pass: CrossingState::CrossedGreen,
            },
            DetectionLogEntry {
                time: 0.5,
                id: 8,
                x: 10,
                y: 99,
                pass: CrossingState::CrossedRed,
            },
        ]
    }

    #[test]
    fn test_detections_csv_layout() {
        let mut buf = Vec::new();
        write_detections(&mut buf, &sample_log()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,id,x1,y1,pass");
        assert_eq!(lines[1], "0.0,7,50,50,0");
        assert_eq!(lines[2], "0.5,7,50,100,1");
        assert_eq!(lines[3], "0.5,8,10,99,-1");
    }

    #[test]
    fn test_stats_csv_header() {
        let mut buf = Vec::new();
        write_stats(&mut buf, &reconstruct(&sample_log())).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "time,detected,detected_total,green,green_total,red,red_total,passed,passed_total"
        );
        assert_eq!(text.lines().nth(2).unwrap(), "0.5,2,2,1,1,1,1,2,2");
    }

    #[test]
    fn test_read_detections_back() {
        let data = "time,id,x1,y1,pass\n0.0,3,1,2,0\n0.04,3,1,3,-1\n";
        let log = read_detections(data.as_bytes()).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].time, 0.04);
        assert_eq!(log[1].pass, CrossingState::CrossedRed);
        assert_eq!((log[1].x, log[1].y), (1, 3));
    }

    #[test]
    fn test_read_detections_rejects_bad_pass() {
        let data = "time,id,x1,y1,pass\n0.0,3,1,2,5\n";
        let err = read_detections(data.as_bytes()).unwrap_err();
        assert!(matches!(err, CounterError::Csv(_)));
        assert!(err.to_string().contains("invalid pass value 5"));
    }

    #[test]
    fn test_stats_round_trip_through_reader() {
        let stats = reconstruct(&sample_log());
        let mut buf = Vec::new();
        write_stats(&mut buf, &stats).unwrap();
        assert_eq!(read_stats(buf.as_slice()).unwrap(), stats);
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("traffic-counter-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_failed_run_leaves_no_directory() {
        let output_dir = scratch_dir("failed-run");
        let dir = next_result_dir(&output_dir, "clip").unwrap();
        assert!(dir.ends_with("01 clip"));

        let result: std::result::Result<(), CounterError> = fill_result_dir(&dir, |dir| {
            fs::create_dir_all(dir)?;
            fs::write(dir.join(VIDEO_FILE), b"partial")?;
            Err(CounterError::Render("writer closed".to_string()))
        });
        assert!(matches!(result, Err(CounterError::Render(_))));
        assert!(!dir.exists());

        // Numbering is unaffected by the failed attempt
        let next = next_result_dir(&output_dir, "clip").unwrap();
        assert_eq!(next, dir);

        fs::remove_dir_all(&output_dir).unwrap();
    }

    #[test]
    fn test_successful_run_keeps_directory() {
        let output_dir = scratch_dir("good-run");
        let dir = next_result_dir(&output_dir, "clip").unwrap();
        let record = RunRecord::from_config(&crate::types::Config::default(), "clip.mp4");

        let log = sample_log();
        fill_result_dir(&dir, |dir| save_run(dir, &log, &reconstruct(&log), &record)).unwrap();
        assert!(dir.join(DETECTIONS_FILE).is_file());
        assert!(dir.join(STATS_FILE).is_file());
        assert!(dir.join(CONFIG_FILE).is_file());
        assert!(next_result_dir(&output_dir, "other").unwrap().ends_with("02 other"));

        fs::remove_dir_all(&output_dir).unwrap();
    }
}
