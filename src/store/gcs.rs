//! GCS backend (§4.5): JSON API over HTTPS, `ifGenerationMatch` for
//! conditional writes (`=0` for create-only), optional customer-managed
//! encryption key on writes.

use super::{map_http_status, Condition, ListEntry, ObjectMeta, ObjectStoreDriver, PutOpts};
use crate::error::DeployError;
use async_trait::async_trait;
use serde::Deserialize;

/// Talks to a single GCS bucket via the JSON API. `access_token` is an
/// OAuth2 bearer token supplied by the caller's credentials provider - this
/// driver does not itself perform the token-minting dance.
pub struct GcsDriver {
	client: reqwest::Client,
	bucket: String,
	access_token: String,
}

impl GcsDriver {
	pub fn new(client: reqwest::Client, bucket: String, access_token: String) -> Self {
		Self { client, bucket, access_token }
	}

	fn object_url(&self, key: &str) -> String {
		format!(
			"https://storage.googleapis.com/storage/v1/b/{}/o/{}",
			self.bucket,
			urlencode(key)
		)
	}

	fn upload_url(&self, key: &str) -> String {
		format!(
			"https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
			self.bucket,
			urlencode(key)
		)
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.bearer_auth(&self.access_token)
	}
}

fn urlencode(s: &str) -> String {
	s.chars()
		.map(|c| match c {
			'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => c.to_string(),
			other => format!("%{:02X}", other as u32),
		})
		.collect()
}

#[derive(Deserialize)]
struct GcsObjectMeta {
	generation: Option<String>,
	etag: Option<String>,
	size: Option<String>,
	#[serde(rename = "contentType")]
	content_type: Option<String>,
}

impl From<GcsObjectMeta> for ObjectMeta {
	fn from(m: GcsObjectMeta) -> Self {
		ObjectMeta {
			etag: m.etag,
			generation: m.generation.and_then(|g| g.parse().ok()),
			size: m.size.and_then(|s| s.parse().ok()).unwrap_or(0),
			content_type: m.content_type,
		}
	}
}

#[derive(Deserialize)]
struct GcsListResponse {
	items: Option<Vec<GcsListItem>>,
}

#[derive(Deserialize)]
struct GcsListItem {
	name: String,
	size: Option<String>,
	etag: Option<String>,
}

#[async_trait]
impl ObjectStoreDriver for GcsDriver {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
		let mut req = self
			.authed(self.client.post(self.upload_url(key)))
			.header("Content-Type", opts.content_type.clone())
			.body(body);
		if let Some(ref kms) = opts.kms_key {
			req = req.query(&[("kmsKeyName", kms.as_str())]);
		}
		let response = req.send().await.map_err(|e| DeployError::transient(format!("GCS put failed: {e}")))?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(map_http_status(status, &body))
		}
	}

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
		let url = format!("{}?alt=media", self.object_url(key));
		let response = self
			.authed(self.client.get(&url))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("GCS get failed: {e}")))?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
		}
		let meta = self.head(key).await?;
		let body = response.bytes().await.map_err(|e| DeployError::transient(format!("GCS read failed: {e}")))?;
		Ok((body.to_vec(), meta))
	}

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
		let response = self
			.authed(self.client.get(self.object_url(key)))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("GCS head failed: {e}")))?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
		}
		let parsed: GcsObjectMeta =
			response.json().await.map_err(|e| DeployError::fatal(format!("GCS metadata decode failed: {e}")))?;
		Ok(parsed.into())
	}

	async fn delete(&self, key: &str) -> Result<(), DeployError> {
		let response = self
			.authed(self.client.delete(self.object_url(key)))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("GCS delete failed: {e}")))?;
		if response.status().is_success() || response.status().as_u16() == 404 {
			Ok(())
		} else {
			Err(map_http_status(response.status().as_u16(), ""))
		}
	}

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
		let url = format!("https://storage.googleapis.com/storage/v1/b/{}/o", self.bucket);
		let response = self
			.authed(self.client.get(&url))
			.query(&[("prefix", prefix)])
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("GCS list failed: {e}")))?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
		}
		let parsed: GcsListResponse =
			response.json().await.map_err(|e| DeployError::fatal(format!("GCS list decode failed: {e}")))?;
		Ok(parsed
			.items
			.unwrap_or_default()
			.into_iter()
			.map(|item| ListEntry {
				key: item.name,
				size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
				etag: item.etag,
			})
			.collect())
	}

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError> {
		let generation = match &condition {
			Condition::IfMatch(etag) if etag == "*" => 0,
			Condition::Generation(g) => *g,
			Condition::IfMatch(_) => {
				return Err(DeployError::fatal("GCS conditional writes use generation, not etag; resolve the current generation first"))
			}
			Condition::LeaseId(_) => return Err(DeployError::fatal("GCS does not support lease-based conditions")),
		};

		let mut req = self
			.authed(self.client.post(self.upload_url(key)))
			.query(&[("ifGenerationMatch", generation.to_string())])
			.header("Content-Type", opts.content_type.clone())
			.body(body);
		if let Some(ref kms) = opts.kms_key {
			req = req.query(&[("kmsKeyName", kms.as_str())]);
		}
		let response = req.send().await.map_err(|e| DeployError::transient(format!("GCS conditional put failed: {e}")))?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(map_http_status(status, &body))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn urlencode_preserves_path_unsafe_characters_as_percent_escapes() {
		assert_eq!(urlencode("skill/file.json"), "skill%2Ffile.json");
		assert_eq!(urlencode("a-b_c.d~e"), "a-b_c.d~e");
	}
}

// vim: ts=4
