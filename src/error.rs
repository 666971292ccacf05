use thiserror::Error;

/// Errors surfaced to the caller before any allocation logic runs.
///
/// Solver infeasibility is deliberately absent: it degrades to the fallback
/// allocator and is reported on the result via [`crate::FallbackReason`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("total budget must be finite and > 0, got {0}")]
    InvalidBudget(f64),

    #[error("candidate {index}: `{field}` out of range ({value})")]
    CandidateFieldOutOfRange {
        index: usize,
        field: &'static str,
        value: f64,
    },

    #[error("candidate {index}: `{field}` must be non-empty")]
    MissingIdentifier { index: usize, field: &'static str },

    #[error("experiment reserve fraction must be in [0, 1), got {0}")]
    InvalidReserveFraction(f64),

    #[error("stock risk threshold must be in [0, 1], got {0}")]
    InvalidStockRiskThreshold(f64),

    #[error("minimum blended return must be finite and >= 0, got {0}")]
    InvalidReturnFloor(f64),

    #[error("maximum acquisition cost must be finite and > 0, got {0}")]
    InvalidAcquisitionCost(f64),

    #[error("scope cap {index}: max budget must be finite and >= 0, got {max_budget}")]
    InvalidScopeCap { index: usize, max_budget: f64 },

    #[error("unknown objective: {0:?}")]
    UnknownObjective(String),

    #[error("unknown allocation method: {0:?}")]
    UnknownMethod(String),

    #[error("scope kind must be `channel` or `placement`, got {0:?}")]
    UnknownScopeKind(String),

    #[error("reward must be finite and in [0, 1], got {0}")]
    InvalidReward(f64),
}

impl Error {
    /// Whether this error rejects malformed caller input.
    ///
    /// Every variant currently does; the method exists so callers can map the
    /// whole taxonomy onto a "bad request" response without matching variants.
    pub fn is_invalid_request(&self) -> bool {
        match self {
            Error::InvalidBudget(_)
            | Error::CandidateFieldOutOfRange { .. }
            | Error::MissingIdentifier { .. }
            | Error::InvalidReserveFraction(_)
            | Error::InvalidStockRiskThreshold(_)
            | Error::InvalidReturnFloor(_)
            | Error::InvalidAcquisitionCost(_)
            | Error::InvalidScopeCap { .. }
            | Error::UnknownObjective(_)
            | Error::UnknownMethod(_)
            | Error::UnknownScopeKind(_)
            | Error::InvalidReward(_) => true,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
