// src/instrument.rs

use log::{info, warn};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Append-only run log.
///
/// Every [`LogSink::append`] opens the file, writes a single line, flushes and
/// closes it again. No handle is held between messages, so a crash loses no
/// line that was already appended.
#[derive(Clone, Debug)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line` and a newline, creating the file if needed.
    pub fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()
    }
}

/// The timed stages of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// CSV ingestion and dense matrix construction.
    IngestBuild,
    Factorize,
    Serialize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::IngestBuild => "CSV reading & matrix fill",
            Phase::Factorize => "SVD computation",
            Phase::Serialize => "Saving U, S, V",
        };
        f.write_str(label)
    }
}

/// Per-phase wall-clock timings of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseTimings {
    pub ingest_build: Option<Duration>,
    pub factorize: Option<Duration>,
    pub serialize: Option<Duration>,
    pub total: Option<Duration>,
}

impl PhaseTimings {
    fn slot(&mut self, phase: Phase) -> &mut Option<Duration> {
        match phase {
            Phase::IngestBuild => &mut self.ingest_build,
            Phase::Factorize => &mut self.factorize,
            Phase::Serialize => &mut self.serialize,
        }
    }
}

/// Times the phases of a run with a monotonic clock and reports each one to
/// the run log.
///
/// Sink write failures are reported through `log` and never abort the run.
pub struct Instrumentation {
    sink: LogSink,
    started: Instant,
    timings: PhaseTimings,
}

impl Instrumentation {
    /// Starts the run clock.
    pub fn start(sink: LogSink) -> Self {
        Self {
            sink,
            started: Instant::now(),
            timings: PhaseTimings::default(),
        }
    }

    /// Runs `body` as `phase`. The phase line is appended only if `body` succeeds.
    pub fn time_phase<T, E, F>(&mut self, phase: Phase, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let phase_start = Instant::now();
        let value = body()?;
        let elapsed = phase_start.elapsed();
        *self.timings.slot(phase) = Some(elapsed);
        self.note(&format!("{} took {:.6} sec.", phase, elapsed.as_secs_f64()));
        Ok(value)
    }

    /// Appends one free-form line to the run log.
    pub fn note(&self, line: &str) {
        info!("{}", line);
        if let Err(e) = self.sink.append(line) {
            warn!("Could not append to run log {:?}: {}", self.sink.path(), e);
        }
    }

    /// Records a failure as a single `error:` line.
    pub fn error(&self, message: &dyn fmt::Display) {
        self.note(&format!("error: {}", message));
    }

    /// Appends the total elapsed time and returns all timings.
    pub fn finish(mut self) -> PhaseTimings {
        let total = self.started.elapsed();
        self.timings.total = Some(total);
        self.note(&format!("Total program time: {:.6} sec.", total.as_secs_f64()));
        self.timings
    }
}

/// Environment variable holding the stderr log filter of the command-line tools.
pub const LOG_FILTER_VAR: &str = "RATING_SVD_LOG";

/// Installs `env_logger` on stderr as the global `log` backend.
///
/// The filter is read from the environment variable `var` in `env_logger`
/// directive syntax (`debug`, `rating_svd::ingest=trace`, ...) and defaults
/// to `info`.
pub fn init_stderr_logging(var: &str) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(var, "info"))
        .target(env_logger::Target::Stderr)
        .try_init()
}
