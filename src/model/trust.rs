//! Signed trust edge between two identities (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WotError;
use crate::ids::IdentityId;

pub const TRUST_MIN: i32 = -100;
pub const TRUST_MAX: i32 = 100;
pub const MAX_COMMENT_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trust {
    pub truster_id: IdentityId,
    pub trustee_id: IdentityId,
    pub value: i32,
    pub comment: String,
    pub truster_trust_list_edition: u64,
    pub created_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
}

impl Trust {
    pub fn new(
        truster_id: IdentityId,
        trustee_id: IdentityId,
        value: i32,
        comment: String,
        truster_trust_list_edition: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, WotError> {
        validate_value(value)?;
        validate_comment(&comment)?;
        Ok(Trust {
            truster_id,
            trustee_id,
            value,
            comment,
            truster_trust_list_edition,
            created_at: now,
            last_changed_at: now,
        })
    }

    pub fn key(&self) -> (IdentityId, IdentityId) {
        (self.truster_id.clone(), self.trustee_id.clone())
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }
}

pub fn validate_value(value: i32) -> Result<(), WotError> {
    if !(TRUST_MIN..=TRUST_MAX).contains(&value) {
        return Err(WotError::InvalidParameter(format!(
            "trust value {value} out of range [{TRUST_MIN}, {TRUST_MAX}]"
        )));
    }
    Ok(())
}

pub fn validate_comment(comment: &str) -> Result<(), WotError> {
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(WotError::InvalidParameter(format!(
            "trust comment exceeds {MAX_COMMENT_CHARS} chars"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_value() {
        assert!(validate_value(101).is_err());
        assert!(validate_value(-101).is_err());
        assert!(validate_value(100).is_ok());
        assert!(validate_value(-100).is_ok());
    }

    #[test]
    fn rejects_long_comment() {
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        assert!(validate_comment(&long).is_err());
    }
}
