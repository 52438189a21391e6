//! Deploy engine (C6): stage→manifest→activate commit protocol, drift
//! detection/repair, retention pruning, and destroy.

use crate::bundle::Bundle;
use crate::deploy_id;
use crate::error::{DeployError, ErrorKind};
use crate::manifest::Manifest;
use crate::store::{Condition, ObjectStoreDriver, PutOpts};
use crate::types::{DeployInput, DeployResult, DestroyMode, PruneResult, RefreshResult};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const AGENTCTX_DIR: &str = ".agentctx";
const ACTIVE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// Maps a file extension (case-insensitive) to a content type per §4.6.
/// Anything unrecognized is `application/octet-stream`.
pub fn infer_content_type(rel_path: &str) -> &'static str {
	let ext = rel_path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
	match ext.as_str() {
		"md" => "text/markdown; charset=utf-8",
		"json" => "application/json",
		"py" => "text/x-python; charset=utf-8",
		"yaml" | "yml" => "application/yaml",
		"txt" => "text/plain; charset=utf-8",
		"html" => "text/html; charset=utf-8",
		_ => "application/octet-stream",
	}
}

/// Deploy engine, bound to one target via its [`ObjectStoreDriver`]. Every
/// remote file-level operation acquires a permit from the shared semaphore
/// before running (§5).
pub struct DeployEngine {
	driver: Arc<dyn ObjectStoreDriver>,
	semaphore: Arc<Semaphore>,
	prefix: String,
}

impl DeployEngine {
	pub fn new(driver: Arc<dyn ObjectStoreDriver>, max_concurrency: usize, prefix: impl Into<String>) -> Self {
		Self { driver, semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))), prefix: prefix.into() }
	}

	fn skill_root(&self, skill: &str) -> String {
		if self.prefix.is_empty() {
			format!("{skill}/{AGENTCTX_DIR}")
		} else {
			format!("{}/{skill}/{AGENTCTX_DIR}", self.prefix.trim_end_matches('/'))
		}
	}

	fn active_key(&self, skill: &str) -> String {
		format!("{}/ACTIVE", self.skill_root(skill))
	}

	fn deployment_prefix(&self, skill: &str, deployment_id: &str) -> String {
		format!("{}/deployments/{deployment_id}/", self.skill_root(skill))
	}

	fn manifest_key(&self, skill: &str, deployment_id: &str) -> String {
		format!("{}manifest.json", self.deployment_prefix(skill, deployment_id))
	}

	fn file_key(&self, skill: &str, deployment_id: &str, rel_path: &str) -> String {
		format!("{}files/{rel_path}", self.deployment_prefix(skill, deployment_id))
	}

	/// List every object under `prefix` and delete them, bounded by the
	/// shared semaphore. Missing prefix is success.
	async fn delete_prefix(&self, prefix: &str) -> Result<usize, DeployError> {
		let entries = self.driver.list(prefix).await?;
		let mut handles = Vec::with_capacity(entries.len());
		for entry in entries {
			let driver = self.driver.clone();
			let semaphore = self.semaphore.clone();
			handles.push(tokio::spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
				driver.delete(&entry.key).await
			}));
		}
		let count = handles.len();
		for handle in handles {
			handle.await.map_err(|e| DeployError::fatal(format!("delete task panicked: {e}")))??;
		}
		Ok(count)
	}

	/// Step 3 of the deploy protocol: upload every file in the bundle,
	/// bounded by the semaphore, aborting on the first error.
	async fn upload_bundle_files(&self, bundle: &Bundle, skill: &str, deployment_id: &str) -> Result<(), DeployError> {
		let mut handles = Vec::with_capacity(bundle.files.len());
		for entry in &bundle.files {
			let driver = self.driver.clone();
			let semaphore = self.semaphore.clone();
			let key = self.file_key(skill, deployment_id, &entry.rel_path);
			let content_type = infer_content_type(&entry.rel_path).to_string();
			let abs_path = entry.abs_path.clone();
			let rel_path = entry.rel_path.clone();
			handles.push(tokio::spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
				let body = tokio::fs::read(&abs_path)
					.await
					.map_err(|e| DeployError::from(e).context(format!("reading {rel_path} for upload")))?;
				driver.put(&key, body, PutOpts { content_type, ..Default::default() }).await
			}));
		}
		for handle in handles {
			handle.await.map_err(|e| DeployError::fatal(format!("upload task panicked: {e}")))??;
		}
		Ok(())
	}

	/// Deploy protocol per target (§4.6).
	pub async fn deploy(&self, bundle: &Bundle, input: &DeployInput) -> Result<DeployResult, DeployError> {
		if !input.staged_deploy_id.is_empty() {
			let staged_prefix = self.deployment_prefix(&input.skill_name, &input.staged_deploy_id);
			info!(skill = %input.skill_name, staged = %input.staged_deploy_id, "reclaiming orphaned staged deployment");
			self.delete_prefix(&staged_prefix).await?;
		}

		let deployment_id = deploy_id::mint();
		debug!(skill = %input.skill_name, deployment_id, "staging files");
		self.upload_bundle_files(bundle, &input.skill_name, &deployment_id).await?;

		let mut manifest = Manifest::new(
			input.provider_version.clone(),
			input.resource_name.clone(),
			input.canonical_store.clone(),
			deployment_id.clone(),
			Utc::now(),
			bundle.bundle_hash.clone(),
			bundle.bundle_hash.clone(),
			bundle.file_hashes.clone().into_iter().collect(),
		);
		if let Some(ref source_dir) = input.source_dir {
			manifest.origin = Some(crate::types::Origin {
				origin_type: crate::types::CanonicalStore::Source,
				source_dir: Some(source_dir.clone()),
			});
		}
		if let Some(ref registry) = input.registry_origin {
			manifest.registry = Some(registry.clone());
		}
		let manifest_json = manifest.to_json()?;

		let manifest_key = self.manifest_key(&input.skill_name, &deployment_id);
		self.driver
			.put(&manifest_key, manifest_json.clone().into_bytes(), PutOpts {
				content_type: MANIFEST_CONTENT_TYPE.to_string(),
				..Default::default()
			})
			.await?;

		let active_key = self.active_key(&input.skill_name);
		let condition = if input.previous_deploy_id.is_empty() {
			Condition::create_only()
		} else {
			let meta = self.driver.head(&active_key).await?;
			Condition::IfMatch(meta.etag.unwrap_or_default())
		};

		let promote = self
			.driver
			.conditional_put(&active_key, deployment_id.clone().into_bytes(), condition, PutOpts {
				content_type: ACTIVE_CONTENT_TYPE.to_string(),
				..Default::default()
			})
			.await;

		if let Err(err) = promote {
			if *err.kind() == ErrorKind::PreconditionFailed {
				return Err(err.context("another writer mutated ACTIVE concurrently; this deploy's files remain staged"));
			}
			return Err(err);
		}

		info!(skill = %input.skill_name, deployment_id, "promoted to ACTIVE");
		Ok(DeployResult { deployment_id, bundle_hash: bundle.bundle_hash.clone(), manifest_json })
	}

	/// Refresh (drift detection), §4.6.
	pub async fn refresh(&self, skill: &str, expected_bundle_hash: &str, deep_check: bool) -> Result<RefreshResult, DeployError> {
		let active_key = self.active_key(skill);
		let active_id = match self.driver.get(&active_key).await {
			Ok((body, _)) => String::from_utf8_lossy(&body).trim().to_string(),
			Err(e) if *e.kind() == ErrorKind::NotFound => {
				return Ok(RefreshResult { active_deployment_id: String::new(), healthy: false, ..Default::default() })
			}
			Err(e) => return Err(e),
		};

		let manifest_key = self.manifest_key(skill, &active_id);
		let manifest = match self.driver.get(&manifest_key).await {
			Ok((body, _)) => Some(Manifest::from_json(&String::from_utf8_lossy(&body))?),
			Err(e) if *e.kind() == ErrorKind::NotFound => None,
			Err(e) => return Err(e),
		};

		let Some(manifest) = manifest else {
			return Ok(RefreshResult {
				active_deployment_id: active_id,
				missing_manifest: true,
				healthy: false,
				..Default::default()
			});
		};

		let drifted = !expected_bundle_hash.is_empty() && manifest.bundle_hash != expected_bundle_hash;

		let mut missing_files = Vec::new();
		if deep_check {
			let mut handles = Vec::with_capacity(manifest.files.len());
			for rel_path in manifest.files.keys() {
				let driver = self.driver.clone();
				let semaphore = self.semaphore.clone();
				let key = self.file_key(skill, &active_id, rel_path);
				let rel_path = rel_path.clone();
				handles.push(tokio::spawn(async move {
					let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
					match driver.head(&key).await {
						Ok(_) => None,
						Err(e) if *e.kind() == ErrorKind::NotFound => Some(rel_path),
						Err(_) => Some(rel_path),
					}
				}));
			}
			for handle in handles {
				if let Some(rel_path) = handle.await.map_err(|e| DeployError::fatal(format!("head task panicked: {e}")))? {
					missing_files.push(rel_path);
				}
			}
			missing_files.sort();
		}

		let healthy = missing_files.is_empty();
		Ok(RefreshResult {
			active_deployment_id: active_id,
			missing_manifest: false,
			drifted,
			healthy,
			missing_files,
		})
	}

	/// Repair: re-upload any file the manifest lists but that Head reports
	/// missing; re-upload the manifest itself if missing. ACTIVE is never
	/// touched (§4.6).
	pub async fn repair(&self, bundle: &Bundle, skill: &str, deployment_id: &str) -> Result<Vec<String>, DeployError> {
		let manifest_key = self.manifest_key(skill, deployment_id);
		let manifest = match self.driver.get(&manifest_key).await {
			Ok((body, _)) => Manifest::from_json(&String::from_utf8_lossy(&body))?,
			Err(e) if *e.kind() == ErrorKind::NotFound => {
				let manifest = rebuild_manifest_for_repair(bundle, skill, deployment_id)?;
				let json = manifest.to_json()?;
				self.driver
					.put(&manifest_key, json.into_bytes(), PutOpts { content_type: MANIFEST_CONTENT_TYPE.to_string(), ..Default::default() })
					.await?;
				manifest
			}
			Err(e) => return Err(e),
		};

		let mut repaired = Vec::new();
		for rel_path in manifest.files.keys() {
			let key = self.file_key(skill, deployment_id, rel_path);
			match self.driver.head(&key).await {
				Ok(_) => continue,
				Err(e) if *e.kind() == ErrorKind::NotFound => {}
				Err(e) => return Err(e),
			}

			let entry = bundle.files.iter().find(|f| &f.rel_path == rel_path);
			let body = match entry {
				Some(entry) if !entry.abs_path.as_os_str().is_empty() => tokio::fs::read(&entry.abs_path).await?,
				_ => return Err(DeployError::fatal(format!("repair needs {rel_path} but no source bytes are available"))),
			};

			self.driver
				.put(&key, body, PutOpts { content_type: infer_content_type(rel_path).to_string(), ..Default::default() })
				.await?;
			repaired.push(rel_path.clone());
		}
		Ok(repaired)
	}

	/// Prune (retention), §4.6. Runs on every successful deploy, not only teardown.
	pub async fn prune(
		&self,
		skill: &str,
		active_deploy_id: &str,
		managed: &[String],
		retain: usize,
	) -> Result<PruneResult, DeployError> {
		let candidates: Vec<&String> = managed.iter().filter(|id| id.as_str() != active_deploy_id).collect();
		if candidates.len() <= retain {
			return Ok(PruneResult::default());
		}

		let mut parseable: Vec<(chrono::DateTime<Utc>, String)> = Vec::new();
		for id in candidates {
			match deploy_id::parse(id) {
				Ok(parsed) => parseable.push((parsed.timestamp, id.clone())),
				Err(_) => warn!(skill, id, "skipping unparseable deployment id during prune"),
			}
		}
		parseable.sort_by_key(|(ts, _)| *ts);

		if parseable.len() <= retain {
			return Ok(PruneResult::default());
		}
		let prune_count = parseable.len() - retain;
		let targets: Vec<String> = parseable.into_iter().take(prune_count).map(|(_, id)| id).collect();

		for id in &targets {
			let prefix = self.deployment_prefix(skill, id);
			self.delete_prefix(&prefix).await?;
		}

		Ok(PruneResult { pruned_deploy_ids: targets })
	}

	/// Destroy, §4.6. See [`DestroyMode`] for the three modes.
	pub async fn destroy(&self, skill: &str, mode: DestroyMode, managed: &[String]) -> Result<(), DeployError> {
		match mode {
			DestroyMode::Graceful => {
				let active_key = self.active_key(skill);
				if let Ok((body, _)) = self.driver.get(&active_key).await {
					let active_id = String::from_utf8_lossy(&body).trim().to_string();
					if managed.iter().any(|id| id == &active_id) {
						self.driver.delete(&active_key).await?;
					}
				}
				for id in managed {
					let prefix = self.deployment_prefix(skill, id);
					self.delete_prefix(&prefix).await?;
				}
			}
			DestroyMode::ScopedWipe => {
				self.delete_prefix(&format!("{}/", self.skill_root(skill))).await?;
			}
			DestroyMode::FullWipe => {
				let skill_prefix = if self.prefix.is_empty() {
					format!("{skill}/")
				} else {
					format!("{}/{skill}/", self.prefix.trim_end_matches('/'))
				};
				self.delete_prefix(&skill_prefix).await?;
			}
		}
		Ok(())
	}

	/// `CleanupStaged(skill, stagedID)`: lists and deletes every object
	/// under the staged prefix; missing prefix is success.
	pub async fn cleanup_staged(&self, skill: &str, staged_deploy_id: &str) -> Result<(), DeployError> {
		let prefix = self.deployment_prefix(skill, staged_deploy_id);
		self.delete_prefix(&prefix).await?;
		Ok(())
	}
}

fn rebuild_manifest_for_repair(bundle: &Bundle, skill: &str, deployment_id: &str) -> Result<Manifest, DeployError> {
	Ok(Manifest::new(
		"unknown",
		skill,
		"source",
		deployment_id,
		Utc::now(),
		bundle.bundle_hash.clone(),
		bundle.bundle_hash.clone(),
		bundle.file_hashes.clone().into_iter().collect(),
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::exclusion::ExclusionEngine;
	use crate::store::InMemoryDriver;
	use tempfile::TempDir;

	fn input(skill: &str, previous: &str, staged: &str) -> DeployInput {
		DeployInput {
			skill_name: skill.to_string(),
			canonical_store: "source".to_string(),
			provider_version: "1.0.0".to_string(),
			resource_name: skill.to_string(),
			source_dir: None,
			registry_origin: None,
			previous_deploy_id: previous.to_string(),
			staged_deploy_id: staged.to_string(),
		}
	}

	fn make_bundle(dir: &TempDir, files: &[(&str, &str)]) -> Bundle {
		for (name, contents) in files {
			std::fs::write(dir.path().join(name), contents).unwrap();
		}
		Bundle::scan(dir.path(), &ExclusionEngine::new(&[]).unwrap(), false).unwrap()
	}

	// S1 Basic deploy.
	#[tokio::test]
	async fn s1_basic_deploy() {
		let dir = TempDir::new().unwrap();
		let bundle = make_bundle(&dir, &[("README.md", "# Hello\n"), ("main.py", "print('hello')\n")]);

		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");
		let result = engine.deploy(&bundle, &input("my-skill", "", "")).await.unwrap();

		let (active_body, _) = driver.get("my-skill/.agentctx/ACTIVE").await.unwrap();
		assert_eq!(String::from_utf8(active_body).unwrap(), result.deployment_id);

		let manifest_key = format!("my-skill/.agentctx/deployments/{}/manifest.json", result.deployment_id);
		let (manifest_body, _) = driver.get(&manifest_key).await.unwrap();
		let manifest = Manifest::from_json(&String::from_utf8_lossy(&manifest_body)).unwrap();
		assert_eq!(manifest.resource_type, "skill");
		assert_eq!(manifest.files.len(), 2);

		let readme_key = format!("my-skill/.agentctx/deployments/{}/files/README.md", result.deployment_id);
		let (readme_body, _) = driver.get(&readme_key).await.unwrap();
		assert_eq!(readme_body, b"# Hello\n");
	}

	// S2 Drift detection.
	#[tokio::test]
	async fn s2_drift_detection() {
		let dir = TempDir::new().unwrap();
		let bundle = make_bundle(&dir, &[("README.md", "# Hello\n"), ("main.py", "print('hello')\n")]);
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");
		engine.deploy(&bundle, &input("my-skill", "", "")).await.unwrap();

		let refresh = engine.refresh("my-skill", "sha256:0000000000000000000000000000000000000000000000000000000000000000", false).await.unwrap();
		assert!(refresh.drifted);
		assert!(refresh.healthy);
		assert!(!refresh.active_deployment_id.is_empty());
		assert!(refresh.missing_files.is_empty());
	}

	// S3 Deep check on missing file.
	#[tokio::test]
	async fn s3_deep_check_missing_file() {
		let dir = TempDir::new().unwrap();
		let bundle = make_bundle(&dir, &[("README.md", "# Hello\n"), ("main.py", "print('hello')\n")]);
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");
		let result = engine.deploy(&bundle, &input("my-skill", "", "")).await.unwrap();

		let main_key = format!("my-skill/.agentctx/deployments/{}/files/main.py", result.deployment_id);
		driver.delete(&main_key).await.unwrap();

		let refresh = engine.refresh("my-skill", "", true).await.unwrap();
		assert_eq!(refresh.missing_files, vec!["main.py".to_string()]);
		assert!(!refresh.healthy);
		assert!(!refresh.missing_manifest);
	}

	// S4 Staged cleanup.
	#[tokio::test]
	async fn s4_staged_cleanup() {
		let dir = TempDir::new().unwrap();
		let bundle = make_bundle(&dir, &[("new.txt", "fresh")]);
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");

		let staged_id = "dep_20260101T000000Z_deadbeef";
		driver
			.put(&format!("my-skill/.agentctx/deployments/{staged_id}/files/leftover.txt"), b"stale".to_vec(), PutOpts::default())
			.await
			.unwrap();
		driver
			.put(&format!("my-skill/.agentctx/deployments/{staged_id}/manifest.json"), b"{}".to_vec(), PutOpts::default())
			.await
			.unwrap();

		let result = engine.deploy(&bundle, &input("my-skill", "", staged_id)).await.unwrap();
		assert_ne!(result.deployment_id, staged_id);

		let leftover = driver.list(&format!("my-skill/.agentctx/deployments/{staged_id}/")).await.unwrap();
		assert!(leftover.is_empty());

		let (active_body, _) = driver.get("my-skill/.agentctx/ACTIVE").await.unwrap();
		assert_eq!(String::from_utf8(active_body).unwrap(), result.deployment_id);
	}

	// S5 Prune retention=2 over 5 deploys.
	#[tokio::test]
	async fn s5_prune_retention_over_five_deploys() {
		let dir = TempDir::new().unwrap();
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");

		let mut ids = Vec::new();
		let mut previous = String::new();
		for i in 0..5 {
			std::fs::write(dir.path().join("content.txt"), format!("version-{i}")).unwrap();
			let bundle = Bundle::scan(dir.path(), &ExclusionEngine::new(&[]).unwrap(), false).unwrap();
			let result = engine.deploy(&bundle, &input("my-skill", &previous, "")).await.unwrap();
			previous = result.deployment_id.clone();
			ids.push(result.deployment_id);
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		}

		let prune_result = engine.prune("my-skill", ids.last().unwrap(), &ids, 2).await.unwrap();
		assert_eq!(prune_result.pruned_deploy_ids, vec![ids[0].clone(), ids[1].clone()]);

		for pruned in &prune_result.pruned_deploy_ids {
			let objects = driver.list(&format!("my-skill/.agentctx/deployments/{pruned}/")).await.unwrap();
			assert!(objects.is_empty());
		}
		for kept in &ids[2..] {
			let objects = driver.list(&format!("my-skill/.agentctx/deployments/{kept}/")).await.unwrap();
			assert!(!objects.is_empty());
		}

		let (active_body, _) = driver.get("my-skill/.agentctx/ACTIVE").await.unwrap();
		assert_eq!(String::from_utf8(active_body).unwrap(), *ids.last().unwrap());
	}

	#[tokio::test]
	async fn second_promotion_with_empty_previous_fails_precondition() {
		let dir = TempDir::new().unwrap();
		let bundle = make_bundle(&dir, &[("a.txt", "a")]);
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");
		engine.deploy(&bundle, &input("my-skill", "", "")).await.unwrap();

		let result = engine.deploy(&bundle, &input("my-skill", "", "")).await;
		assert!(result.is_err());
		assert_eq!(result.unwrap_err().kind(), &ErrorKind::PreconditionFailed);
	}

	#[tokio::test]
	async fn destroy_graceful_preserves_unmanaged_deployments() {
		let dir = TempDir::new().unwrap();
		let driver = Arc::new(InMemoryDriver::new());
		let engine = DeployEngine::new(driver.clone(), 16, "");

		let bundle1 = make_bundle(&dir, &[("a.txt", "a")]);
		let r1 = engine.deploy(&bundle1, &input("my-skill", "", "")).await.unwrap();
		std::fs::write(dir.path().join("b.txt"), "b").unwrap();
		let bundle2 = Bundle::scan(dir.path(), &ExclusionEngine::new(&[]).unwrap(), false).unwrap();
		let r2 = engine.deploy(&bundle2, &input("my-skill", &r1.deployment_id, "")).await.unwrap();

		// Only r1 is "managed" by this caller; r2 (active) is left alone.
		engine.destroy("my-skill", DestroyMode::Graceful, &[r1.deployment_id.clone()]).await.unwrap();

		let r1_objects = driver.list(&format!("my-skill/.agentctx/deployments/{}/", r1.deployment_id)).await.unwrap();
		assert!(r1_objects.is_empty());
		let r2_objects = driver.list(&format!("my-skill/.agentctx/deployments/{}/", r2.deployment_id)).await.unwrap();
		assert!(!r2_objects.is_empty());
		// ACTIVE still points at r2 since r2 is not in the managed set.
		let (active_body, _) = driver.get("my-skill/.agentctx/ACTIVE").await.unwrap();
		assert_eq!(String::from_utf8(active_body).unwrap(), r2.deployment_id);
	}

	#[test]
	fn content_type_inference_matches_known_extensions() {
		assert_eq!(infer_content_type("SKILL.md"), "text/markdown; charset=utf-8");
		assert_eq!(infer_content_type("manifest.JSON"), "application/json");
		assert_eq!(infer_content_type("run.py"), "text/x-python; charset=utf-8");
		assert_eq!(infer_content_type("config.yaml"), "application/yaml");
		assert_eq!(infer_content_type("config.yml"), "application/yaml");
		assert_eq!(infer_content_type("notes.txt"), "text/plain; charset=utf-8");
		assert_eq!(infer_content_type("page.html"), "text/html; charset=utf-8");
		assert_eq!(infer_content_type("data.bin"), "application/octet-stream");
		assert_eq!(infer_content_type("no_extension"), "application/octet-stream");
	}
}

// vim: ts=4
