//! Error kinds for the trust/score engine (spec §7).
//!
//! Boundary validation errors are returned to the caller; invariant
//! violations are logged at `error` severity by the call site, which is
//! also responsible for aborting the current transaction and scheduling a
//! full verification (see `score_engine::ScoreEngine::schedule_verification`).

use crate::ids::IdentityId;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum WotError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),

    #[error("unknown trust ({0} -> {1})")]
    UnknownTrust(IdentityId, IdentityId),

    #[error("unknown edition hint ({0} -> {1})")]
    UnknownEditionHint(IdentityId, IdentityId),

    #[error("duplicate object: {0}")]
    DuplicateObject(String),

    #[error("malformed fetch key/URI: {0}")]
    MalformedUrl(String),

    #[error("transaction conflict after {0} retries")]
    TransactionConflict(u32),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("interrupted")]
    Interrupted,
}

pub type WotResult<T> = Result<T, WotError>;
