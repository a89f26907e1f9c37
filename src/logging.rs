// Logging setup
//
// env_logger on stderr, optionally mirrored into a log file so validation
// messages survive after the window closes.

use crate::config::Config;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writes every record to stderr and to a second sink
pub struct TeeWriter<W: Write> {
    sink: W,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.sink.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.sink.flush()
    }
}

/// Initialize logging with optional file output for validation errors
pub fn init_logging(config: &Config) {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    // RUST_LOG still wins over the default level
    builder.parse_env("RUST_LOG");

    let mut file_error = None;
    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(TeeWriter::new(file))));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Could not open log file {}: {}", config.debug.log_file, e);
    }
}

/// Create/truncate the log file and write its header
fn open_log_file<P: AsRef<Path>>(path: P) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "=== Hello Triangle Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writer_copies_into_sink() {
        let mut tee = TeeWriter::new(Vec::new());
        write!(tee, "[Vulkan] hello").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.sink, b"[Vulkan] hello");
    }

    #[test]
    fn test_log_file_truncated_with_header() {
        let path = std::env::temp_dir().join(format!("hello-triangle-{}.log", std::process::id()));
        std::fs::write(&path, "stale line from a previous run\n").unwrap();

        drop(open_log_file(&path).unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(content.starts_with("=== Hello Triangle Log ===\n"));
        assert!(!content.contains("stale line"));
    }

    #[test]
    fn test_tee_writer_reports_full_length() {
        let mut tee = TeeWriter::new(Vec::new());
        assert_eq!(tee.write(b"abc").unwrap(), 3);
    }
}
