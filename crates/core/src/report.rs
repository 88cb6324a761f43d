//! SRT report files.
//!
//! Every analyzer emits its metrics as SubRip subtitle blocks so the
//! reports can be played back alongside the recorded stream:
//!
//! ```text
//! 1
//! 00:00:01,500 --> 00:00:02,000
//! Track:video, Delay: 12.34 ms, Jitter: 1.02 ms, Loss_rate: 0.00 %, Total_loss_rate: 0.00 %
//!
//! ```
//!
//! Timestamps are media PTS divided by the track's clock rate. Writes are
//! best-effort: a failed append is logged and the next block is attempted
//! anyway.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only SRT block writer for one report file.
///
/// Created per analyzer task; the index and clock rate are task-private so
/// block numbers and PTS conversions never interleave between tracks.
pub struct SrtWriter {
    path: PathBuf,
    index: u64,
    clock_rate: u32,
}

impl SrtWriter {
    /// Create `<dir>/<name>.srt`, truncating any previous run's file.
    ///
    /// The directory is created if missing. Creation failures are returned
    /// so the caller can decide whether to run without a report.
    pub fn create(dir: &Path, name: &str, clock_rate: u32) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.srt"));
        File::create(&path)?;
        tracing::debug!(path = %path.display(), clock_rate, "report file created");
        Ok(SrtWriter {
            path,
            index: 1,
            clock_rate,
        })
    }

    /// Convert a PTS in clock-rate units to `HH:MM:SS,mmm`.
    fn format_pts(&self, pts: i64) -> String {
        let play_time = pts as f64 / self.clock_rate as f64;
        let hours = (play_time / 3600.0) as u64;
        let minutes = ((play_time % 3600.0) / 60.0) as u64;
        let seconds = (play_time % 60.0) as u64;
        let millis = ((play_time - play_time.floor()) * 1000.0) as u64;
        format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
    }

    /// Append one subtitle block covering `[start, end]` in PTS units.
    pub fn write(&mut self, text: &str, start: i64, end: i64) {
        let block = format!(
            "{}\n{} --> {}\n{}\n\n",
            self.index,
            self.format_pts(start),
            self.format_pts(end),
            text
        );
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(block.as_bytes()) {
                    tracing::warn!(path = %self.path.display(), error = %e, "report append failed");
                } else {
                    self.index += 1;
                }
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "report open failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_time_format() {
        let dir = tempfile::tempdir().unwrap();
        let w = SrtWriter::create(dir.path(), "t", 90000).unwrap();
        assert_eq!(w.format_pts(0), "00:00:00,000");
        assert_eq!(w.format_pts(45000), "00:00:00,500");
        assert_eq!(w.format_pts(90000), "00:00:01,000");
        // 1 h 2 min 3.25 s
        assert_eq!(w.format_pts((3723 * 90000) + 22500), "01:02:03,250");
    }

    #[test]
    fn writes_numbered_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SrtWriter::create(dir.path(), "blocks", 1000).unwrap();
        w.write("first", 0, 500);
        w.write("second", 500, 1000);

        let text = fs::read_to_string(dir.path().join("blocks.srt")).unwrap();
        assert_eq!(
            text,
            "1\n00:00:00,000 --> 00:00:00,500\nfirst\n\n\
             2\n00:00:00,500 --> 00:00:01,000\nsecond\n\n"
        );
    }

    #[test]
    fn create_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SrtWriter::create(dir.path(), "again", 1000).unwrap();
        w.write("old", 0, 1);
        let w2 = SrtWriter::create(dir.path(), "again", 1000).unwrap();
        drop(w2);
        let text = fs::read_to_string(dir.path().join("again.srt")).unwrap();
        assert!(text.is_empty());
    }
}
