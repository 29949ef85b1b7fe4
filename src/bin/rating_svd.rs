// src/bin/rating_svd.rs

use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use rating_svd::context::{DEFAULT_LOG_PATH, DEFAULT_OUTPUT_PATH};
use rating_svd::instrument::{init_stderr_logging, LOG_FILTER_VAR};
use rating_svd::{ExecutionContext, ExecutionProfile, LinAlgBackendProvider, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProfileKind {
    /// One process, factorization on a thread pool
    Shared,
    /// Started by an MPI-style launcher; only rank 0 works
    Mpi,
}

/// Build a dense rating matrix from a CSV file and persist its rank-K truncated SVD.
#[derive(Parser, Debug)]
#[command(name = "rating_svd", version)]
struct Cli {
    /// Ratings file: a header line, then `user,item,rating` lines
    csv_path: PathBuf,

    /// Number of matrix rows (users)
    rows: usize,

    /// Number of matrix columns (items)
    cols: usize,

    /// Target rank of the truncated SVD
    #[arg(value_name = "K")]
    k: usize,

    /// Where to write the U, S, V result file
    #[arg(long, env = "RATING_SVD_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Run log, appended to one line per event
    #[arg(long, env = "RATING_SVD_LOG_FILE", default_value = DEFAULT_LOG_PATH)]
    log: PathBuf,

    /// Execution profile
    #[arg(long, value_enum, env = "RATING_SVD_PROFILE", default_value_t = ProfileKind::Shared)]
    profile: ProfileKind,

    /// Factorization threads for the shared profile (0 = one per core)
    #[arg(long, env = "OMP_NUM_THREADS", default_value_t = 0)]
    threads: usize,

    /// Index of the first user and item in the CSV
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    index_base: i64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_stderr_logging(LOG_FILTER_VAR) {
        eprintln!("Could not install logger: {}", e);
    }

    let profile = match cli.profile {
        ProfileKind::Shared => ExecutionProfile::SharedMemory { threads: cli.threads },
        ProfileKind::Mpi => {
            if cli.threads > 1 {
                debug!("--threads is ignored by the mpi profile.");
            }
            ExecutionProfile::message_passing_from_env()
        }
    };
    if let ExecutionProfile::MessagePassing(participant) = profile {
        if participant.is_leader() {
            info!("MPI size={} (only rank 0 computes the SVD).", participant.size);
        }
    }

    let ctx = ExecutionContext::new(cli.csv_path, cli.rows, cli.cols, cli.k)
        .with_output_path(cli.output)
        .with_log_path(cli.log)
        .with_index_base(cli.index_base);

    match rating_svd::run(&ctx, profile, LinAlgBackendProvider::new()) {
        Ok(RunOutcome::Completed(summary)) => {
            info!(
                "Rank-{} factorization of {} ratings written to {:?} ({} bytes).",
                summary.k, summary.build.applied, summary.output_path, summary.bytes_written
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Idle { .. }) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
