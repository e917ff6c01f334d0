use thiserror::Error;

use crate::event::ParameterId;

/// Errors surfaced by the filtering engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Caller passed a value outside its contract (zero group id,
    /// verdict or wish mask, malformed predicate literals).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A hard capacity limit was hit while registering a filter.
    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(&'static str),

    /// Lookup miss on the filter-set index.
    #[error("no filter set registered for this operation")]
    NotFound,

    /// The event could not resolve a parameter a predicate depends on.
    /// This is a data-contract breach, not a policy non-match.
    #[error("event has no value for parameter {0:?}")]
    ParameterNotFound(ParameterId),

    /// The target filter set is mid-teardown and no longer accepts
    /// references.
    #[error("filter set is shutting down")]
    Unavailable,
}
