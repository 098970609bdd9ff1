use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectionSource;
use crate::detect::result::{FrameDetections, ParallelDetections};

/// Replays recorded detector output, one JSON object per line.
///
/// Each line holds parallel `boxes`, `polygons` and `depths` arrays for one
/// frame. Blank lines are skipped.
pub struct ReplaySource<R: BufRead> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open detections file {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> DetectionSource for ReplaySource<R> {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn next_frame(&mut self) -> Result<Option<FrameDetections>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_line(&mut self.buf)
                .with_context(|| format!("failed to read detections line {}", self.line_no + 1))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            let parallel: ParallelDetections = serde_json::from_str(line)
                .map_err(|e| anyhow!("invalid detections line {}: {}", self.line_no, e))?;
            let frame = FrameDetections::from_parallel(parallel)
                .with_context(|| format!("detections line {}", self.line_no))?;
            return Ok(Some(frame));
        }
    }
}
