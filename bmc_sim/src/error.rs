use thiserror::Error;

/// Errors reported before any propagation work starts. A singular system
/// matrix during propagation is a precondition violation, not an error
/// variant; see [`crate::solver::BlochSolver::propagate`].
#[derive(Debug, Error)]
pub enum SimError {
    #[error("magnetization vector has {found} components but the pool configuration requires {required}")]
    MagnetizationSize {
        required:usize,
        found:usize,
    },
    #[error("sequence contains no ADC events")]
    NoAdcEvents,
    #[error("no sequence loaded")]
    SequenceNotLoaded,
    #[error(transparent)]
    Sequence(#[from] seq_blocks::SeqError),
}
