// src/profile.rs

use crate::error::PipelineError;
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;

/// Environment variables that carry this process's rank and the participant
/// count, per launcher, in lookup order.
const LAUNCHER_RANK_VARS: [(&str, &str); 3] = [
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
    ("SLURM_PROCID", "SLURM_NTASKS"),
];

/// This process's place among the cooperating participants of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Participant {
    pub rank: usize,
    pub size: usize,
}

impl Participant {
    /// The only participant of a one-process job.
    pub const SOLO: Participant = Participant { rank: 0, size: 1 };

    /// Resolves the rank from the launcher's environment, or [`Participant::SOLO`]
    /// when the process was not started by a known launcher.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Participant::from_env`] with an explicit variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for (rank_var, size_var) in LAUNCHER_RANK_VARS {
            let Some(rank) = lookup(rank_var).and_then(|v| v.trim().parse::<usize>().ok()) else {
                continue;
            };
            let size = lookup(size_var)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(rank + 1)
                .max(rank + 1);
            debug!("Participant rank {} of {} (from {}).", rank, size, rank_var);
            return Participant { rank, size };
        }
        Participant::SOLO
    }

    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

/// What this process does in the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Runs the whole pipeline.
    Leader,
    /// Does no work and exits successfully.
    Idle { rank: usize, size: usize },
}

/// Process topology of a run. Both profiles run the same pipeline; the profile
/// only decides who runs it and how many threads the factorization may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionProfile {
    /// One of several participants; only rank 0 works and it factorizes on one thread.
    MessagePassing(Participant),
    /// A single process whose factorization runs on a pool of `threads`
    /// (0 lets the pool pick one thread per core).
    SharedMemory { threads: usize },
}

impl ExecutionProfile {
    /// Message-passing profile for the rank found in the environment.
    pub fn message_passing_from_env() -> Self {
        ExecutionProfile::MessagePassing(Participant::from_env())
    }

    pub fn role(&self) -> Role {
        match self {
            ExecutionProfile::MessagePassing(p) if !p.is_leader() => Role::Idle { rank: p.rank, size: p.size },
            _ => Role::Leader,
        }
    }

    /// Thread count requested for the factorization call (0 = one per core).
    pub fn factorization_threads(&self) -> usize {
        match self {
            ExecutionProfile::MessagePassing(_) => 1,
            ExecutionProfile::SharedMemory { threads } => *threads,
        }
    }

    /// Builds the pool the factorization call runs in.
    ///
    /// # Errors
    /// [`PipelineError::Allocation`] if the worker threads cannot be spawned.
    pub fn build_pool(&self, rows: usize, cols: usize) -> Result<ThreadPool, PipelineError> {
        ThreadPoolBuilder::new()
            .num_threads(self.factorization_threads())
            .thread_name(|i| format!("svds-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Allocation {
                rows,
                cols,
                reason: format!("factorization thread pool: {}", e),
            })
    }
}

impl fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProfile::MessagePassing(p) => {
                write!(f, "message-passing (rank {} of {})", p.rank, p.size)
            }
            ExecutionProfile::SharedMemory { threads: 0 } => f.write_str("shared-memory (all cores)"),
            ExecutionProfile::SharedMemory { threads } => write!(f, "shared-memory ({} threads)", threads),
        }
    }
}
