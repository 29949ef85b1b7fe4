// src/pipeline.rs

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::factorize::{check_rank, FactorizationDriver};
use crate::ingest::{CsvIngestor, IngestStats};
use crate::instrument::{Instrumentation, LogSink, Phase, PhaseTimings};
use crate::linalg_backends::BackendSvds;
use crate::matrix::{BuildStats, DenseMatrix, DenseMatrixBuilder};
use crate::profile::{ExecutionProfile, Role};
use crate::serialize::save_factorization;
use log::{debug, info};
use std::path::PathBuf;

/// What a leader run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub ingest: IngestStats,
    pub build: BuildStats,
    pub k: usize,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub timings: PhaseTimings,
}

/// How a run ended for this process.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// This process ran the pipeline to completion.
    Completed(RunSummary),
    /// This process is not the leader and did nothing.
    Idle { rank: usize, size: usize },
}

/// Streams the ratings file of `ctx` into a freshly allocated dense matrix.
///
/// The input is opened before the matrix is allocated, so a missing file
/// costs no allocation.
pub fn build_matrix(ctx: &ExecutionContext) -> Result<(DenseMatrix, IngestStats, BuildStats), PipelineError> {
    let ingestor = CsvIngestor::open(ctx.csv_path())?;
    let mut builder = DenseMatrixBuilder::new(ctx.rows(), ctx.cols())?.with_index_base(ctx.index_base());
    let ingest = ingestor.for_each_triple(|triple| builder.accept(triple))?;
    let (matrix, build) = builder.finish();
    info!(
        "Built {}x{} matrix: {} ratings applied, {} out of bounds, {} malformed lines skipped.",
        matrix.rows(),
        matrix.cols(),
        build.applied,
        build.dropped,
        ingest.lines_skipped
    );
    Ok((matrix, ingest, build))
}

/// Runs the pipeline under `profile`: ingest and build, factorize, serialize,
/// release.
///
/// Non-leader participants return [`RunOutcome::Idle`] without touching the
/// input, the output or the run log. On the leader every completed phase and
/// the total time are appended to the run log; a failure appends one
/// `error:` line instead and no output file is left behind.
pub fn run<B: BackendSvds>(
    ctx: &ExecutionContext,
    profile: ExecutionProfile,
    backend: B,
) -> Result<RunOutcome, PipelineError> {
    if let Role::Idle { rank, size } = profile.role() {
        info!("Participant {} of {} has no work in this profile; exiting.", rank, size);
        return Ok(RunOutcome::Idle { rank, size });
    }

    info!(
        "Reading {:?}, building {}x{} matrix, K={}, {} profile.",
        ctx.csv_path(),
        ctx.rows(),
        ctx.cols(),
        ctx.k(),
        profile
    );

    let mut instrumentation = Instrumentation::start(LogSink::new(ctx.log_path()));
    let driver = FactorizationDriver::new(backend);
    match run_leader(ctx, &profile, &driver, &mut instrumentation) {
        Ok((ingest, build, bytes_written)) => {
            let timings = instrumentation.finish();
            Ok(RunOutcome::Completed(RunSummary {
                ingest,
                build,
                k: ctx.k(),
                output_path: ctx.output_path().to_path_buf(),
                bytes_written,
                timings,
            }))
        }
        Err(e) => {
            instrumentation.error(&e);
            Err(e)
        }
    }
}

fn run_leader<B: BackendSvds>(
    ctx: &ExecutionContext,
    profile: &ExecutionProfile,
    driver: &FactorizationDriver<B>,
    instrumentation: &mut Instrumentation,
) -> Result<(IngestStats, BuildStats, u64), PipelineError> {
    // The driver checks again; failing here avoids reading the whole input first.
    check_rank(ctx.rows(), ctx.cols(), ctx.k())?;
    let pool = profile.build_pool(ctx.rows(), ctx.cols())?;

    let (matrix, ingest, build) = instrumentation.time_phase(Phase::IngestBuild, || build_matrix(ctx))?;

    let k = ctx.k();
    let factorization =
        instrumentation.time_phase(Phase::Factorize, || pool.install(|| driver.factorize(matrix, k)))?;

    let saved = instrumentation.time_phase(Phase::Serialize, || save_factorization(ctx.output_path(), &factorization));
    let released = factorization.release();
    debug!("Released {} bytes of factor storage.", released);

    Ok((ingest, build, saved?))
}
