//! Shared data-model types that do not belong to a single component (§3).

use std::path::PathBuf;

/// A single file inside a [`crate::bundle::Bundle`]. `rel_path` is always
/// forward-slash normalized and never contains `..` or absolute segments;
/// `abs_path` is empty when the entry was sourced from memory (e.g. via
/// `Bundle::from_bytes`) rather than a real directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
	pub rel_path: String,
	pub abs_path: PathBuf,
}

impl FileEntry {
	pub fn new(rel_path: impl Into<String>, abs_path: PathBuf) -> Self {
		Self { rel_path: rel_path.into(), abs_path }
	}

	pub fn in_memory(rel_path: impl Into<String>) -> Self {
		Self { rel_path: rel_path.into(), abs_path: PathBuf::new() }
	}
}

/// Which side supplies the bytes that land on targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalStore {
	Source,
	Registry,
}

impl CanonicalStore {
	pub fn as_str(&self) -> &'static str {
		match self {
			CanonicalStore::Source => "source",
			CanonicalStore::Registry => "registry",
		}
	}
}

/// Origin metadata recorded in the manifest when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
	pub origin_type: CanonicalStore,
	pub source_dir: Option<String>,
}

/// Registry provenance recorded in the manifest when the bundle mirrors a
/// registry version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOrigin {
	pub registry_type: String,
	pub skill_id: String,
	pub version: String,
	pub bundle_hash: String,
}

/// Everything the engine needs to perform one deploy to one target (§3).
#[derive(Debug, Clone)]
pub struct DeployInput {
	pub skill_name: String,
	pub canonical_store: String,
	pub provider_version: String,
	pub resource_name: String,
	pub source_dir: Option<String>,
	pub registry_origin: Option<RegistryOrigin>,
	/// Non-empty to request a conditional (compare-and-set) ACTIVE update
	/// against this previously-active deployment; empty requests a
	/// create-only promotion.
	pub previous_deploy_id: String,
	/// A deployment ID from a prior aborted run whose staged objects must be
	/// reclaimed (deleted) before this deploy proceeds.
	pub staged_deploy_id: String,
}

/// Observable state of one target for one skill (§3).
#[derive(Debug, Clone, Default)]
pub struct TargetState {
	pub active_deploy_id: String,
	pub staged_deploy_id: String,
	pub deployed_bundle_hash: String,
	pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
	pub managed_deploy_ids: Vec<String>,
}

/// Result of a successful [`crate::engine::DeployEngine::deploy`] call.
#[derive(Debug, Clone)]
pub struct DeployResult {
	pub deployment_id: String,
	pub bundle_hash: String,
	pub manifest_json: String,
}

/// Result of [`crate::engine::DeployEngine::refresh`].
#[derive(Debug, Clone, Default)]
pub struct RefreshResult {
	pub active_deployment_id: String,
	pub missing_manifest: bool,
	pub drifted: bool,
	pub healthy: bool,
	pub missing_files: Vec<String>,
}

/// Result of [`crate::engine::DeployEngine::prune`].
#[derive(Debug, Clone, Default)]
pub struct PruneResult {
	pub pruned_deploy_ids: Vec<String>,
}

/// Mode selector for [`crate::engine::DeployEngine::destroy`] (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyMode {
	/// Delete only the prefixes of deployment IDs in the caller's managed
	/// list; delete ACTIVE if it points at one of them.
	Graceful,
	/// Delete everything under `<prefix>/<skill>/.agentctx/`.
	ScopedWipe,
	/// Delete everything under `<prefix>/<skill>/`.
	FullWipe,
}

// vim: ts=4
