//! Deploy-ID minter (C4): unique, time-sortable deployment identifiers.
//!
//! Format: `dep_<YYYYMMDD'T'HHMMSS'Z'>_<8-hex>`. The 8-hex suffix comes from
//! a CSPRNG (via `uuid`'s v4 generator, not the raw UUID itself) so
//! concurrent minters cannot collide; the timestamp prefix alone makes IDs
//! chronologically sortable as strings.

use crate::error::DeployError;
use chrono::{DateTime, Utc};

const PREFIX: &str = "dep_";
const TIMESTAMP_FMT: &str = "%Y%m%dT%H%M%SZ";

/// Mint a fresh deployment ID using the current UTC time.
pub fn mint() -> String {
	mint_at(Utc::now())
}

/// Mint a deployment ID for a specific instant. Exposed separately from
/// [`mint`] so tests can pin the timestamp without faking the clock.
pub fn mint_at(now: DateTime<Utc>) -> String {
	let ts = now.format(TIMESTAMP_FMT);
	let rand = uuid::Uuid::new_v4();
	let suffix = hex::encode(&rand.as_bytes()[..4]);
	format!("{PREFIX}{ts}_{suffix}")
}

/// A successfully parsed deployment ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDeployId {
	pub timestamp: DateTime<Utc>,
	pub suffix: String,
}

/// Parse a deployment ID, validating its shape: `dep_` prefix, a
/// `YYYYMMDD'T'HHMMSS'Z'` timestamp, an underscore, and an 8-char lowercase
/// hex suffix.
pub fn parse(id: &str) -> Result<ParsedDeployId, DeployError> {
	let rest = id
		.strip_prefix(PREFIX)
		.ok_or_else(|| DeployError::fatal(format!("deploy id {id:?} missing {PREFIX:?} prefix")))?;

	let (ts_part, suffix) = rest
		.rsplit_once('_')
		.ok_or_else(|| DeployError::fatal(format!("deploy id {id:?} missing underscore separator")))?;

	if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
		return Err(DeployError::fatal(format!(
			"deploy id {id:?} suffix must be 8 lowercase hex characters, got {suffix:?}"
		)));
	}

	let timestamp = DateTime::parse_from_str(&format!("{ts_part}+0000"), "%Y%m%dT%H%M%SZ%z")
		.map_err(|e| DeployError::fatal(format!("deploy id {id:?} has invalid timestamp: {e}")))?
		.with_timezone(&Utc);

	Ok(ParsedDeployId { timestamp, suffix: suffix.to_string() })
}

/// `true` iff `parse(id)` succeeds.
pub fn valid(id: &str) -> bool {
	parse(id).is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration as ChronoDuration;

	#[test]
	fn mint_round_trips_within_a_second() {
		let before = Utc::now();
		let id = mint();
		let parsed = parse(&id).expect("minted id must parse");
		let after = Utc::now();
		assert!(parsed.timestamp >= before - ChronoDuration::seconds(1));
		assert!(parsed.timestamp <= after + ChronoDuration::seconds(1));
	}

	#[test]
	fn mint_never_collides_across_many_calls() {
		let ids: std::collections::HashSet<String> = (0..1000).map(|_| mint()).collect();
		assert_eq!(ids.len(), 1000);
	}

	#[test]
	fn parse_rejects_missing_prefix() {
		assert!(parse("20260101T000000Z_deadbeef").is_err());
	}

	#[test]
	fn parse_rejects_wrong_length_suffix() {
		assert!(parse("dep_20260101T000000Z_dead").is_err());
	}

	#[test]
	fn parse_rejects_uppercase_suffix() {
		assert!(parse("dep_20260101T000000Z_DEADBEEF").is_err());
	}

	#[test]
	fn parse_rejects_non_hex_suffix() {
		assert!(parse("dep_20260101T000000Z_zzzzzzzz").is_err());
	}

	#[test]
	fn parse_accepts_literal_example_from_spec() {
		let parsed = parse("dep_20260101T000000Z_deadbeef").unwrap();
		assert_eq!(parsed.suffix, "deadbeef");
		assert_eq!(parsed.timestamp.format("%Y%m%dT%H%M%SZ").to_string(), "20260101T000000Z");
	}

	#[test]
	fn valid_matches_parse() {
		assert!(valid("dep_20260101T000000Z_deadbeef"));
		assert!(!valid("not-a-deploy-id"));
	}
}

// vim: ts=4
