use thiserror::Error;

/// Errors raised by graph construction and mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("core group size must be a positive integer, got {0}")]
    InvalidCoreGroupSize(u32),

    #[error("node `{id}` does not exist in the graph")]
    UnknownNode { id: String },
}

/// Returned when a declared allocation could not be fully satisfied.
///
/// The cores and GPUs that were assigned stay assigned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error(
        "insufficient capacity for {workload}: requested {cores_needed} cores / {gpus_needed} GPUs, \
         allocated {cores_allocated} cores / {gpus_allocated} GPUs"
    )]
    Shortfall {
        workload: String,
        cores_needed: usize,
        cores_allocated: usize,
        gpus_needed: usize,
        gpus_allocated: usize,
    },
}
