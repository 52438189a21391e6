#![allow(dead_code)]

//! Engine configuration (§6): a single consolidated struct covering every
//! recognized option, mirroring the teacher's `Config` in spirit - one
//! struct, grouped fields, a full `Default` impl.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which side supplies the bytes that land on targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CanonicalStoreMode {
	#[default]
	Source,
	Registry,
}

/// Backoff shape for the object-store retry decorator (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffKindOption {
	#[default]
	Exponential,
	Linear,
}

/// Engine-wide configuration, covering exactly the recognized options from
/// spec.md §6 plus the retry tuning needed to drive §4.5/§5's retry and
/// cancellation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
	// ========================================================================
	// BUNDLE SOURCE
	// ========================================================================
	/// Whether a deploy's bytes come from the local source directory or a
	/// downloaded registry version.
	pub canonical_store: CanonicalStoreMode,

	// ========================================================================
	// CONCURRENCY
	// ========================================================================
	/// Size of the shared semaphore bounding concurrent remote file
	/// operations across the whole engine (§5).
	pub max_concurrency: usize,

	// ========================================================================
	// RETENTION
	// ========================================================================
	/// Number of most-recent deployments (besides the active one) to keep
	/// when pruning.
	pub retain_deployments: usize,

	/// Whether `deploy()` runs a prune pass after a successful promotion.
	pub prune_deployments: bool,

	// ========================================================================
	// SCANNER SAFETY
	// ========================================================================
	/// Permit symlinks whose target resolves outside the source root
	/// instead of failing the scan (§4.1.2).
	pub allow_external_symlinks: bool,

	// ========================================================================
	// DESTROY SAFETY
	// ========================================================================
	/// Required before `destroy()` will run in `ScopedWipe`/`FullWipe` mode.
	pub force_destroy: bool,

	/// Required before `destroy(FullWipe)` will run against a prefix shared
	/// with other skills.
	pub force_destroy_shared_prefix: bool,

	// ========================================================================
	// DRIFT DETECTION
	// ========================================================================
	/// Whether `refresh()` Heads every file the manifest lists, not just the
	/// manifest and ACTIVE pointer.
	pub deep_drift_check: bool,

	/// Run scan/plan only; never write to a target.
	pub validate_only: bool,

	// ========================================================================
	// RETRY TUNING
	// ========================================================================
	/// Maximum retry attempts per remote call before the retry decorator
	/// surfaces the last `Transient` error.
	pub max_retries: usize,

	/// Exponential or linear backoff growth between retries.
	pub backoff_kind: BackoffKindOption,

	/// Timeout applied to a single attempt of a remote call.
	#[serde(with = "duration_secs")]
	pub per_attempt_timeout: Duration,

	/// Timeout applied to the whole retrying call, across all attempts.
	#[serde(with = "duration_secs")]
	pub per_request_lifetime_timeout: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			canonical_store: CanonicalStoreMode::Source,

			max_concurrency: 16,

			retain_deployments: 5,
			prune_deployments: true,

			allow_external_symlinks: false,

			force_destroy: false,
			force_destroy_shared_prefix: false,

			deep_drift_check: false,
			validate_only: false,

			max_retries: 5,
			backoff_kind: BackoffKindOption::Exponential,
			per_attempt_timeout: Duration::from_secs(30),
			per_request_lifetime_timeout: Duration::from_secs(300),
		}
	}
}

mod duration_secs {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		let secs = u64::deserialize(deserializer)?;
		Ok(Duration::from_secs(secs))
	}
}


// vim: ts=4
