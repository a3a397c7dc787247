use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Per-session text log with one line per processed frame:
/// `Frame <n> timestamp: <epoch_ms>`.
pub struct TimestampLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TimestampLog {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("timestamp log: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, frame: u64) -> std::io::Result<()> {
        self.record_at(frame, chrono::Utc::now().timestamp_millis())
    }

    pub fn record_at(&mut self, frame: u64, epoch_ms: i64) -> std::io::Result<()> {
        writeln!(self.writer, "Frame {} timestamp: {}", frame, epoch_ms)?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_flushed_as_written() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("ts_0.txt");
        let mut log = TimestampLog::create(&path)?;
        log.record_at(0, 1_700_000_000_000)?;
        log.record_at(1, 1_700_000_000_033)?;

        // readable before the log is dropped
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "Frame 0 timestamp: 1700000000000\nFrame 1 timestamp: 1700000000033\n"
        );

        let before = chrono::Utc::now().timestamp_millis();
        log.record(2)?;
        let text = std::fs::read_to_string(log.path())?;
        let last = text.lines().last().unwrap_or_default();
        let stamp: i64 = last.trim_start_matches("Frame 2 timestamp: ").parse()?;
        assert!(stamp >= before);
        Ok(())
    }
}
