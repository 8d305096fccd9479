//! Advisory pointer to a newer edition, plus its priority sort key (spec §3, §4.6).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::IdentityId;

/// `storeNewEditionHint` default `MIN_CAPACITY` (spec §4.6 step 3 / §9 Open Question:
/// the reimplementation takes the stricter, non-legacy rule as default).
pub const DEFAULT_MIN_SOURCE_CAPACITY: u32 = 1;
pub const LEGACY_MIN_SOURCE_CAPACITY: u32 = 0;

const EDITION_DIGITS: u64 = 19;
const EDITION_MODULUS: u64 = 10_u64.pow(EDITION_DIGITS as u32 - 1) * 10 - 1; // 10^19 - 1

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditionHint {
    pub source_id: IdentityId,
    pub subject_id: IdentityId,
    pub edition: u64,
    pub date: NaiveDate,
    pub source_capacity: u32,
    pub source_score_sign: i8,
    pub priority: String,
}

impl EditionHint {
    pub fn new(
        source_id: IdentityId,
        subject_id: IdentityId,
        edition: u64,
        date: NaiveDate,
        source_capacity: u32,
        source_score_sign: i8,
        obfuscation_pad: &[u8],
    ) -> Self {
        let priority = priority_key(
            date,
            source_capacity,
            source_score_sign,
            &subject_id,
            edition,
            obfuscation_pad,
        );
        EditionHint {
            source_id,
            subject_id,
            edition,
            date,
            source_capacity,
            source_score_sign,
            priority,
        }
    }

    pub fn key(&self) -> (IdentityId, IdentityId) {
        (self.source_id.clone(), self.subject_id.clone())
    }
}

/// `date_rounded_to_day DESC, sourceCapacity DESC, sourceScoreSign DESC,
/// obfuscated(subjectId) ASC, edition DESC` (spec §4.6), materialized as a
/// fixed-width string so plain lexicographic ordering on the raw bytes
/// matches the intended order exactly.
pub fn priority_key(
    date: NaiveDate,
    source_capacity: u32,
    source_score_sign: i8,
    subject_id: &IdentityId,
    edition: u64,
    obfuscation_pad: &[u8],
) -> String {
    let date_num: u32 = date.format("%Y%m%d").to_string().parse().unwrap_or(0);
    let date_inv = 99_999_999u32.saturating_sub(date_num);

    let capacity_inv = 999u32.saturating_sub(source_capacity.min(999));

    // sourceScoreSign DESC: +1 sorts before -1, so map +1 -> 0, -1 -> 1.
    let sign_digit = if source_score_sign >= 0 { 0 } else { 1 };

    let obfuscated = obfuscate_id(subject_id, obfuscation_pad);

    let edition_inv = EDITION_MODULUS.saturating_sub(edition.min(EDITION_MODULUS));

    format!(
        "{date_inv:08}{capacity_inv:03}{sign_digit:01}{obfuscated}{edition_inv:019}",
    )
}

/// XOR the id's underlying 32 bytes with a repeating pad and re-encode, so
/// the obfuscated key stays the same 43-char width as the id itself (spec
/// §4.6: "obfuscation need not be cryptographic").
fn obfuscate_id(id: &IdentityId, pad: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    if pad.is_empty() {
        return id.as_str().to_string();
    }
    let Ok(raw) = URL_SAFE_NO_PAD.decode(id.as_str()) else {
        return id.as_str().to_string();
    };
    let obfuscated: Vec<u8> = raw
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ pad[i % pad.len()])
        .collect();
    URL_SAFE_NO_PAD.encode(obfuscated)
}

pub fn day_of(instant: DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}
