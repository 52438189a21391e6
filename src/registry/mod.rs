//! Registry mirror client (C7): talks to a skill registry over HTTP,
//! multipart-uploads bundle contents as versions, and downloads/verifies
//! bundles for registry-sourced deploys.

use crate::bundle::Bundle;
use crate::error::DeployError;
use crate::hash::bundle_hash;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

const RETRY_BASE_MS: u64 = 1_000;
const RETRY_CAP_MS: u64 = 30_000;
const MAX_RETRIES: u32 = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct SkillRecord {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionRecord {
	pub skill_id: String,
	pub version: String,
	pub bundle_hash: String,
	pub created_at: String,
}

/// Client for the skill registry's HTTP API. `bearer_token` and
/// `api_version` are sent on every request; minting/refreshing the token is
/// the caller's responsibility.
pub struct RegistryMirrorClient {
	client: reqwest::Client,
	base_url: String,
	api_version: String,
	bearer_token: String,
}

impl RegistryMirrorClient {
	pub fn new(client: reqwest::Client, base_url: String, api_version: String, bearer_token: String) -> Self {
		Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_version, bearer_token }
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.bearer_auth(&self.bearer_token).header("X-Api-Version", self.api_version.clone())
	}

	/// Sends a request, retrying on 429/5xx with exponential backoff
	/// (base 1s, capped at 30s), identically to the object-store retry
	/// decorator's policy but scoped to this client rather than shared.
	async fn send_with_retry(
		&self,
		build: impl Fn() -> reqwest::RequestBuilder,
	) -> Result<reqwest::Response, DeployError> {
		let mut attempt = 0u32;
		loop {
			let response = build()
				.send()
				.await
				.map_err(|e| DeployError::transient(format!("registry request failed: {e}")))?;
			let status = response.status();
			if status.is_success() {
				return Ok(response);
			}
			let retryable = status.as_u16() == 429 || status.as_u16() >= 500;
			if !retryable || attempt >= MAX_RETRIES {
				let body = response.text().await.unwrap_or_default();
				return Err(map_registry_status(status.as_u16(), &body));
			}
			attempt += 1;
			let backoff_ms = (RETRY_BASE_MS * 2u64.pow(attempt)).min(RETRY_CAP_MS);
			tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
		}
	}

	/// Creates a skill by uploading every file under `bundle`'s source
	/// directory via multipart, mirroring [`Self::create_version`]'s
	/// `files[]` shape (filenames nested under the source directory's
	/// basename), plus a `display_title` field carrying `title`.
	pub async fn create_skill(&self, bundle: &Bundle, title: &str) -> Result<SkillRecord, DeployError> {
		let basename = bundle
			.source_dir
			.as_ref()
			.and_then(|p| p.file_name())
			.and_then(|n| n.to_str())
			.unwrap_or("bundle")
			.to_string();

		let mut form = reqwest::multipart::Form::new().text("display_title", title.to_string());
		for entry in &bundle.files {
			let data = std::fs::read(&entry.abs_path)?;
			let file_name = format!("{basename}/{}", entry.rel_path);
			let part = reqwest::multipart::Part::bytes(data).file_name(file_name);
			form = form.part("files[]", part);
		}

		let response = self
			.client
			.post(self.url("skills"))
			.bearer_auth(&self.bearer_token)
			.header("X-Api-Version", self.api_version.clone())
			.multipart(form)
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("registry upload failed: {e}")))?;

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			return Err(map_registry_status(status, &body));
		}
		decode_json(response).await
	}

	pub async fn get_skill(&self, skill_id: &str) -> Result<SkillRecord, DeployError> {
		let response =
			self.send_with_retry(|| self.authed(self.client.get(self.url(&format!("skills/{skill_id}"))))).await?;
		decode_json(response).await
	}

	pub async fn update_skill(&self, skill_id: &str, metadata: serde_json::Value) -> Result<SkillRecord, DeployError> {
		let body = serde_json::json!({ "metadata": metadata });
		let response = self
			.send_with_retry(|| self.authed(self.client.patch(self.url(&format!("skills/{skill_id}")))).json(&body))
			.await?;
		decode_json(response).await
	}

	pub async fn delete_skill(&self, skill_id: &str) -> Result<(), DeployError> {
		self.send_with_retry(|| self.authed(self.client.delete(self.url(&format!("skills/{skill_id}"))))).await?;
		Ok(())
	}

	/// Uploads `bundle` as a new version via multipart, one `files[]` part
	/// per file, each part's filename nested under the source directory's
	/// basename so the registry can reconstruct a recognizable tree.
	pub async fn create_version(&self, skill_id: &str, version: &str, bundle: &Bundle) -> Result<VersionRecord, DeployError> {
		let basename = bundle
			.source_dir
			.as_ref()
			.and_then(|p| p.file_name())
			.and_then(|n| n.to_str())
			.unwrap_or("bundle")
			.to_string();

		let mut form = reqwest::multipart::Form::new().text("version", version.to_string());
		for entry in &bundle.files {
			let data = std::fs::read(&entry.abs_path)?;
			let file_name = format!("{basename}/{}", entry.rel_path);
			let part = reqwest::multipart::Part::bytes(data).file_name(file_name);
			form = form.part("files[]", part);
		}

		let response = self
			.client
			.post(self.url(&format!("skills/{skill_id}/versions")))
			.bearer_auth(&self.bearer_token)
			.header("X-Api-Version", self.api_version.clone())
			.multipart(form)
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("registry upload failed: {e}")))?;

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			return Err(map_registry_status(status, &body));
		}
		decode_json(response).await
	}

	pub async fn list_versions(&self, skill_id: &str) -> Result<Vec<VersionRecord>, DeployError> {
		let response = self
			.send_with_retry(|| self.authed(self.client.get(self.url(&format!("skills/{skill_id}/versions")))))
			.await?;
		decode_json(response).await
	}

	pub async fn get_version(&self, skill_id: &str, version: &str) -> Result<VersionRecord, DeployError> {
		let response = self
			.send_with_retry(|| self.authed(self.client.get(self.url(&format!("skills/{skill_id}/versions/{version}")))))
			.await?;
		decode_json(response).await
	}

	pub async fn delete_version(&self, skill_id: &str, version: &str) -> Result<(), DeployError> {
		self.send_with_retry(|| {
			self.authed(self.client.delete(self.url(&format!("skills/{skill_id}/versions/{version}"))))
		})
		.await?;
		Ok(())
	}

	/// Deletes every version of a skill oldest-first (by `created_at`), then
	/// the skill record itself. A registry that rejects deleting a skill
	/// while versions remain needs this ordering; deleting newest-first
	/// would leave an interrupted run with the skill pointing at versions
	/// already gone.
	pub async fn delete_skill_cascade(&self, skill_id: &str) -> Result<(), DeployError> {
		let mut versions = self.list_versions(skill_id).await?;
		versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		for version in versions {
			self.delete_version(skill_id, &version.version).await?;
		}
		self.delete_skill(skill_id).await
	}

	/// Downloads a version's bundle as a tar.gz and extracts it into a
	/// RelPath→bytes mapping suitable for [`Bundle::from_bytes`].
	pub async fn download_bundle(&self, skill_id: &str, version: &str) -> Result<BTreeMap<String, Vec<u8>>, DeployError> {
		let response = self
			.send_with_retry(|| {
				self.authed(self.client.get(self.url(&format!("skills/{skill_id}/versions/{version}/bundle"))))
			})
			.await?;
		let archive_bytes = response.bytes().await.map_err(|e| DeployError::transient(format!("bundle download failed: {e}")))?;

		let decoder = flate2::read::GzDecoder::new(&archive_bytes[..]);
		let mut archive = tar::Archive::new(decoder);
		let mut contents = BTreeMap::new();
		for entry in archive.entries().map_err(|e| DeployError::fatal(format!("bundle tar read failed: {e}")))? {
			let mut entry = entry.map_err(|e| DeployError::fatal(format!("bundle tar entry read failed: {e}")))?;
			if !entry.header().entry_type().is_file() {
				continue;
			}
			let path = entry
				.path()
				.map_err(|e| DeployError::fatal(format!("bundle tar entry has invalid path: {e}")))?
				.to_string_lossy()
				.into_owned();
			let mut data = Vec::new();
			entry.read_to_end(&mut data)?;
			contents.insert(path, data);
		}
		Ok(contents)
	}

	/// Verifies downloaded bundle contents against the expected aggregate
	/// hash recorded for the version, returning `DeployError::integrity`
	/// naming every mismatched path if verification fails (§4.2, §7).
	pub fn verify_bundle(contents: &BTreeMap<String, Vec<u8>>, expected_bundle_hash: &str) -> Result<(), DeployError> {
		let hashes: BTreeMap<String, String> =
			contents.iter().map(|(path, data)| (path.clone(), crate::hash::hash_bytes(data))).collect();
		let actual = bundle_hash(hashes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
		if actual == expected_bundle_hash {
			return Ok(());
		}
		Err(DeployError::integrity(expected_bundle_hash, actual, hashes.keys().cloned().collect()))
	}
}

fn map_registry_status(status: u16, body: &str) -> DeployError {
	match status {
		404 => DeployError::not_found(format!("registry object not found (HTTP {status}): {body}")),
		409 | 412 => DeployError::precondition_failed(format!("registry precondition failed (HTTP {status}): {body}")),
		429 => DeployError::transient(format!("registry rate limited (HTTP {status}): {body}")),
		s if s >= 500 => DeployError::transient(format!("registry server error (HTTP {status}): {body}")),
		s => DeployError::fatal(format!("unexpected registry HTTP {s}: {body}")),
	}
}

async fn decode_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, DeployError> {
	response.json().await.map_err(|e| DeployError::fatal(format!("registry response decode failed: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verify_bundle_accepts_matching_hash() {
		let mut contents = BTreeMap::new();
		contents.insert("README.md".to_string(), b"# Hello\n".to_vec());
		contents.insert("main.py".to_string(), b"print('hi')\n".to_vec());
		let bundle = Bundle::from_bytes(&contents);
		assert!(RegistryMirrorClient::verify_bundle(&contents, &bundle.bundle_hash).is_ok());
	}

	#[test]
	fn verify_bundle_rejects_tampered_content() {
		let mut contents = BTreeMap::new();
		contents.insert("README.md".to_string(), b"# Hello\n".to_vec());
		let bundle = Bundle::from_bytes(&contents);
		contents.insert("README.md".to_string(), b"# Tampered\n".to_vec());
		let err = RegistryMirrorClient::verify_bundle(&contents, &bundle.bundle_hash).unwrap_err();
		assert_eq!(err.kind(), &crate::error::ErrorKind::Integrity);
	}

	#[test]
	fn map_registry_status_matches_taxonomy() {
		assert_eq!(map_registry_status(404, "").kind(), &crate::error::ErrorKind::NotFound);
		assert_eq!(map_registry_status(409, "").kind(), &crate::error::ErrorKind::PreconditionFailed);
		assert_eq!(map_registry_status(429, "").kind(), &crate::error::ErrorKind::Transient);
		assert_eq!(map_registry_status(503, "").kind(), &crate::error::ErrorKind::Transient);
		assert_eq!(map_registry_status(400, "").kind(), &crate::error::ErrorKind::Fatal);
	}
}

// vim: ts=4
