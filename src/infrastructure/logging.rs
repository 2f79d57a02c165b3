use crate::domain::fallback::{FallbackChain, Resolved};
use crate::domain::settings::LogSettings;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub struct LoggingGuard {
    // We need to keep this guard alive for logs to be flushed
    _guards: Vec<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Directory the file layer writes to, `None` when file logging is off.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Install the global subscriber. May only succeed once per process.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        anyhow::bail!("Logging is already initialized");
    }

    let mut guards = Vec::new();

    // Parse log level
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Console layer
    let console_layer = if settings.console_logging_enabled {
        Some(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target)
                .with_ansi(settings.ansi_colors),
        )
    } else {
        None
    };

    // File layer, only when some directory in the chain is usable
    let resolved = if settings.file_logging_enabled {
        resolve_log_dir(settings)
    } else {
        None
    };

    let file_layer = resolved.as_ref().map(|Resolved { value: dir, .. }| {
        let (non_blocking, guard) = match settings.rotation.to_lowercase().as_str() {
            "size" => tracing_appender::non_blocking(SizeRotatingWriter::new(
                dir,
                &settings.file_name_prefix,
                settings.max_file_size_bytes,
                settings.max_archive_files,
            )),
            other => {
                let rotation = match other {
                    "hourly" => tracing_appender::rolling::Rotation::HOURLY,
                    "minutely" => tracing_appender::rolling::Rotation::MINUTELY,
                    "never" => tracing_appender::rolling::Rotation::NEVER,
                    _ => tracing_appender::rolling::Rotation::DAILY,
                };
                tracing_appender::non_blocking(tracing_appender::rolling::RollingFileAppender::new(
                    rotation,
                    dir,
                    &settings.file_name_prefix,
                ))
            }
        };
        guards.push(guard);
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false) // File logs shouldn't have ANSI colors
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        INITIALIZED.store(false, Ordering::SeqCst);
        anyhow::bail!("Failed to install log subscriber: {}", e);
    }

    match &resolved {
        Some(Resolved { source, value }) => {
            tracing::info!("Logging initialized ({} log directory {})", source, value.display())
        }
        None if settings.file_logging_enabled => {
            tracing::warn!("No writable log directory, file logging disabled")
        }
        None => tracing::info!("Logging initialized (console only)"),
    }

    Ok(LoggingGuard {
        _guards: guards,
        log_dir: resolved.map(|r| r.value),
    })
}

/// Configured or platform log directory, then the temp directory.
pub fn resolve_log_dir(settings: &LogSettings) -> Option<Resolved<PathBuf>> {
    let primary = settings.primary_log_dir();
    let temp = settings.temp_log_dir();

    FallbackChain::new()
        .attempt("primary", move || primary.filter(|dir| ensure_dir(dir)))
        .attempt("temporary", move || Some(temp).filter(|dir| ensure_dir(dir)))
        .resolve()
}

fn ensure_dir(dir: &Path) -> bool {
    match fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Cannot use log directory {}: {}", dir.display(), e);
            false
        }
    }
}

/// Size-capped log file: `<prefix>.log`, rotated into `<prefix>.1.log` ..
/// `<prefix>.<max_archives>.log`, oldest dropped. The file is opened on the
/// first write.
pub struct SizeRotatingWriter {
    dir: PathBuf,
    prefix: String,
    max_size: u64,
    max_archives: usize,
    file: Option<File>,
    written: u64,
}

impl SizeRotatingWriter {
    pub fn new(dir: &Path, prefix: &str, max_size: u64, max_archives: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_size: max_size.max(1),
            max_archives,
            file: None,
            written: 0,
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.prefix))
    }

    fn archive_path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("{}.{}.log", self.prefix, n))
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.current_path())?;
            self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file not open"))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        if self.max_archives == 0 {
            return fs::remove_file(self.current_path());
        }

        let oldest = self.archive_path(self.max_archives);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_archives).rev() {
            let from = self.archive_path(n);
            if from.exists() {
                fs::rename(&from, self.archive_path(n + 1))?;
            }
        }
        fs::rename(self.current_path(), self.archive_path(1))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.open()?;
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let file = self.open()?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("bt-logs-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_is_created_lazily() {
        let dir = scratch_dir();
        let mut writer = SizeRotatingWriter::new(&dir, "debug", 1024, 5);
        assert!(!dir.exists());

        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(dir.join("debug.log")).unwrap(), "hello\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rotation_shifts_archives() {
        let dir = scratch_dir();
        let mut writer = SizeRotatingWriter::new(&dir, "debug", 10, 2);

        writer.write_all(b"first-line").unwrap();
        writer.write_all(b"second-lin").unwrap();
        writer.write_all(b"third-line").unwrap();
        writer.write_all(b"fourth-lin").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(dir.join("debug.log")).unwrap(), "fourth-lin");
        assert_eq!(fs::read_to_string(dir.join("debug.1.log")).unwrap(), "third-line");
        assert_eq!(fs::read_to_string(dir.join("debug.2.log")).unwrap(), "second-lin");
        assert!(!dir.join("debug.3.log").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_log_dir_prefers_configured_directory() {
        let dir = scratch_dir();
        let settings = LogSettings {
            log_dir: Some(dir.to_string_lossy().into_owned()),
            ..Default::default()
        };

        let resolved = resolve_log_dir(&settings).unwrap();

        assert_eq!(resolved.source, "primary");
        assert_eq!(resolved.value, dir);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_log_dir_falls_back_to_temp() {
        // A regular file cannot be used as a directory.
        let blocker = std::env::temp_dir().join(format!("bt-blocker-{}", uuid::Uuid::new_v4()));
        fs::write(&blocker, b"").unwrap();
        let settings = LogSettings {
            log_dir: Some(blocker.join("logs").to_string_lossy().into_owned()),
            ..Default::default()
        };

        let resolved = resolve_log_dir(&settings).unwrap();

        assert_eq!(resolved.source, "temporary");
        assert_eq!(resolved.value, settings.temp_log_dir());
        let _ = fs::remove_file(blocker);
    }
}
