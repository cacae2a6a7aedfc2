// ==============================================================================
// error.rs - RACE CORE ERRORS
// ------------------------------------------------------------------------------
// Every fallible operation of the library returns RaceError. Nothing here is
// retried: all failures are argument errors detected before any state change.
// ==============================================================================

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RaceError {
    #[error("invalid physics model: {0} (expected \"arcade\" or \"realistic\")")]
    InvalidPhysicsModel(String),

    #[error("invalid car physics config: {0}")]
    InvalidConfig(String),

    #[error("control scheme '{name}' not found. Available: {available}")]
    UnknownControlScheme { name: String, available: String },

    #[error("unknown car: {0}")]
    UnknownCar(String),

    #[error("car id already in use: {0}")]
    DuplicateCar(String),

    #[error("no free starting slot for car {0}")]
    GridFull(String),

    #[error("failed to load world config: {0}")]
    WorldConfig(String),
}

pub type RaceResult<T> = Result<T, RaceError>;
