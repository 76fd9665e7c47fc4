use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{Result, config::TransferConfig};

pub const RUN_FILE: &str = "run.json";
pub const LOSSES_FILE: &str = "losses.jsonl";

/// The metadata describing a run, written once when tracking starts.
#[derive(Serialize)]
struct RunMetadata<'a> {
    config: &'a TransferConfig,
    extractor: &'a str,
    started_at: u64,
}

/// The losses of one objective evaluation, each term already multiplied by its weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub iteration: usize,
    pub total: f32,
    pub content: f32,
    pub style: f32,
    pub tv: f32,
}

/// Records a run on the local filesystem.
///
/// Tracking never fails a run: any write error is logged and the record is dropped. The totals
/// are always kept in memory.
pub struct Tracker {
    dir: PathBuf,
    losses: Option<BufWriter<File>>,
    totals: Vec<f32>,
}

impl Tracker {
    /// Starts tracking a run inside `dir`.
    ///
    /// # Arguments
    /// * `dir` - The directory `run.json` and `losses.jsonl` are written to.
    /// * `config` - The configuration of the run.
    /// * `extractor` - A description of the feature extractor.
    ///
    /// # Returns
    /// A new `Tracker` instance.
    pub fn start<P: AsRef<Path>>(dir: P, config: &TransferConfig, extractor: &str) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let metadata = RunMetadata {
            config,
            extractor,
            started_at,
        };

        if let Err(e) = write_metadata(&dir, &metadata) {
            warn!(dir:? = dir; "couldn't write the run metadata: {e}");
        }

        let losses = match File::create(dir.join(LOSSES_FILE)) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!(dir:? = dir; "couldn't create the loss log: {e}");
                None
            }
        };

        Self {
            dir,
            losses,
            totals: Vec::new(),
        }
    }

    /// Appends one evaluation to the loss log.
    pub fn record(&mut self, record: LossRecord) {
        self.totals.push(record.total);

        let Some(losses) = self.losses.as_mut() else {
            return;
        };

        let written = serde_json::to_writer(&mut *losses, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| losses.write_all(b"\n"));

        if let Err(e) = written {
            warn!(iteration = record.iteration; "couldn't record losses: {e}");
        }
    }

    /// The total loss of every recorded evaluation, in order.
    pub fn totals(&self) -> &[f32] {
        &self.totals
    }

    /// Flushes the loss log and returns the recorded totals.
    pub fn finish(mut self) -> Vec<f32> {
        if let Some(Err(e)) = self.losses.as_mut().map(Write::flush) {
            warn!(dir:? = self.dir; "couldn't flush the loss log: {e}");
        }

        self.totals
    }
}

fn write_metadata(dir: &Path, metadata: &RunMetadata) -> Result<()> {
    fs::create_dir_all(dir)?;
    let file = BufWriter::new(File::create(dir.join(RUN_FILE))?);
    serde_json::to_writer_pretty(file, metadata)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: usize, total: f32) -> LossRecord {
        LossRecord {
            iteration,
            total,
            content: total / 2.,
            style: total / 4.,
            tv: total / 4.,
        }
    }

    #[test]
    fn writes_metadata_and_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = Tracker::start(dir.path(), &TransferConfig::default(), "vgg19");

        tracker.record(record(0, 8.));
        tracker.record(record(1, 4.));
        assert_eq!(tracker.finish(), vec![8., 4.]);

        let run: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(RUN_FILE)).unwrap()).unwrap();
        assert_eq!(run["extractor"], "vgg19");
        assert_eq!(run["config"]["height"], 128);

        let lines = fs::read_to_string(dir.path().join(LOSSES_FILE)).unwrap();
        let records: Vec<LossRecord> = lines
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records, vec![record(0, 8.), record(1, 4.)]);
    }

    #[test]
    fn unwritable_directories_only_warn() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();

        // a directory can't be created below a regular file
        let mut tracker = Tracker::start(blocker.join("run"), &TransferConfig::default(), "vgg16");
        tracker.record(record(0, 1.));

        assert_eq!(tracker.totals(), &[1.]);
    }
}
