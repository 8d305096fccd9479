//! Identity and OwnIdentity (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::WotError;
use crate::ids::IdentityId;

pub const MAX_NICKNAME_CHARS: usize = 50;
pub const MAX_CONTEXTS: usize = 32;
pub const MAX_CONTEXT_CHARS: usize = 32;
pub const MAX_PROPERTY_NAME_CHARS: usize = 256;
pub const MAX_PROPERTY_VALUE_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchState {
    NotFetched,
    Fetched,
    ParsingFailed,
}

/// `kind` in Design Note §9: a tagged variant on the shared `Identity`
/// record rather than a runtime class change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdentityKind {
    Remote,
    Own {
        insert_key: String,
        last_inserted_edition: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub request_key: String,
    pub current_edition: u64,
    pub last_fetched_maybe_valid_edition: u64,
    pub fetch_state: FetchState,
    pub latest_edition_hint: u64,
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: HashSet<String>,
    pub properties: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    pub last_fetched_at: DateTime<Utc>,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn new_remote(
        id: IdentityId,
        request_key: String,
        nickname: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, WotError> {
        validate_nickname(nickname.as_deref())?;
        Ok(Identity {
            id,
            request_key,
            current_edition: 0,
            last_fetched_maybe_valid_edition: 0,
            fetch_state: FetchState::NotFetched,
            latest_edition_hint: 0,
            nickname,
            publishes_trust_list: false,
            contexts: HashSet::new(),
            properties: HashMap::new(),
            created_at: now,
            last_changed_at: now,
            last_fetched_at: now,
            kind: IdentityKind::Remote,
        })
    }

    pub fn is_own(&self) -> bool {
        matches!(self.kind, IdentityKind::Own { .. })
    }

    pub fn add_context(&mut self, ctx: &str) -> Result<(), WotError> {
        if ctx.chars().count() > MAX_CONTEXT_CHARS {
            return Err(WotError::InvalidParameter(format!(
                "context {ctx:?} exceeds {MAX_CONTEXT_CHARS} chars"
            )));
        }
        if self.contexts.len() >= MAX_CONTEXTS && !self.contexts.contains(ctx) {
            return Err(WotError::InvalidParameter(format!(
                "identity {} already has {MAX_CONTEXTS} contexts",
                self.id
            )));
        }
        self.contexts.insert(ctx.to_string());
        Ok(())
    }

    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), WotError> {
        if name.chars().count() > MAX_PROPERTY_NAME_CHARS {
            return Err(WotError::InvalidParameter(format!(
                "property name {name:?} exceeds {MAX_PROPERTY_NAME_CHARS} chars"
            )));
        }
        if value.chars().count() > MAX_PROPERTY_VALUE_CHARS {
            return Err(WotError::InvalidParameter(format!(
                "property value for {name:?} exceeds {MAX_PROPERTY_VALUE_CHARS} chars"
            )));
        }
        self.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

pub fn validate_nickname(nickname: Option<&str>) -> Result<(), WotError> {
    let Some(nickname) = nickname else {
        return Ok(());
    };
    if nickname.chars().count() > MAX_NICKNAME_CHARS {
        return Err(WotError::InvalidParameter(format!(
            "nickname {nickname:?} exceeds {MAX_NICKNAME_CHARS} chars"
        )));
    }
    if nickname.contains('@') {
        return Err(WotError::InvalidParameter(
            "nickname may not contain '@' (reserved for disambiguation display)".into(),
        ));
    }
    if !nickname.chars().all(|c| c.is_alphanumeric()) {
        return Err(WotError::InvalidParameter(format!(
            "nickname {nickname:?} must be letters/digits only"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: &str) -> IdentityId {
        IdentityId::from_public_bytes(seed.as_bytes())
    }

    #[test]
    fn rejects_at_sign_in_nickname() {
        assert!(validate_nickname(Some("alice@example")).is_err());
    }

    #[test]
    fn rejects_too_long_nickname() {
        let long: String = "a".repeat(MAX_NICKNAME_CHARS + 1);
        assert!(validate_nickname(Some(&long)).is_err());
    }

    #[test]
    fn accepts_plain_nickname() {
        assert!(validate_nickname(Some("alice123")).is_ok());
    }

    #[test]
    fn context_limit_enforced() {
        let mut identity =
            Identity::new_remote(id("a"), "USK@.../a/0".into(), None, Utc::now()).unwrap();
        for i in 0..MAX_CONTEXTS {
            identity.add_context(&format!("ctx{i}")).unwrap();
        }
        assert!(identity.add_context("one-too-many").is_err());
    }
}
