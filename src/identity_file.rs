//! `IdentityFile` codec (spec §6): the out-of-scope XML marshalling is named
//! here as a trait plus the parsed shape C2 consumes, with a null stub for
//! tests.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::WotError;
use crate::ids::IdentityId;

/// One entry of a publisher's own trust list (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrustEntry {
    pub trustee_id: IdentityId,
    pub value: i32,
    pub comment: String,
}

/// The fields a successfully parsed identity file carries (spec §6, §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIdentityFile {
    pub id: IdentityId,
    pub edition: u64,
    pub publishes_trust_list: bool,
    pub contexts: HashSet<String>,
    pub properties: HashMap<String, String>,
    pub trust_list: Vec<ParsedTrustEntry>,
}

pub trait IdentityFileCodec: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedIdentityFile, WotError>;
}

/// Stub used by tests and by callers that feed `ParsedIdentityFile` values
/// directly without going through a real XML document.
pub struct NullIdentityFileCodec;

impl IdentityFileCodec for NullIdentityFileCodec {
    fn parse(&self, _bytes: &[u8]) -> Result<ParsedIdentityFile, WotError> {
        Err(WotError::MalformedUrl(
            "NullIdentityFileCodec never parses real documents".into(),
        ))
    }
}
