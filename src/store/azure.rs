//! Azure Blob backend (§4.5): optional lease ID for mutual exclusion on
//! ACTIVE, optional encryption scope on writes, 412/condition-not-met ⇒
//! `PreconditionFailed`, lease errors ⇒ `LeaseConflict`.

use super::{map_http_status, Condition, ListEntry, ObjectMeta, ObjectStoreDriver, PutOpts};
use crate::error::DeployError;
use async_trait::async_trait;

/// Talks to a single container under an Azure Storage account. `sas_token`
/// (a shared-access-signature query string, without the leading `?`) is
/// appended to every request; the caller's credentials provider is
/// responsible for keeping it fresh.
pub struct AzureDriver {
	client: reqwest::Client,
	account: String,
	container: String,
	sas_token: String,
}

impl AzureDriver {
	pub fn new(client: reqwest::Client, account: String, container: String, sas_token: String) -> Self {
		Self { client, account, container, sas_token }
	}

	fn blob_url(&self, key: &str) -> String {
		format!(
			"https://{}.blob.core.windows.net/{}/{}?{}",
			self.account, self.container, key, self.sas_token
		)
	}

	fn container_url(&self) -> String {
		format!("https://{}.blob.core.windows.net/{}?restype=container&comp=list&{}", self.account, self.container, self.sas_token)
	}
}

fn lease_error(status: u16, body: &str) -> DeployError {
	if status == 412 && body.to_lowercase().contains("lease") {
		DeployError::lease_conflict(format!("blob lease conflict (HTTP {status}): {body}"))
	} else {
		map_http_status(status, body)
	}
}

#[async_trait]
impl ObjectStoreDriver for AzureDriver {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
		let mut req = self
			.client
			.put(self.blob_url(key))
			.header("x-ms-blob-type", "BlockBlob")
			.header("Content-Type", opts.content_type.clone())
			.body(body);
		if let Some(ref scope) = opts.kms_key {
			req = req.header("x-ms-encryption-scope", scope.clone());
		}
		let response = req.send().await.map_err(|e| DeployError::transient(format!("Azure put failed: {e}")))?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(lease_error(status, &body))
		}
	}

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
		let response = self
			.client
			.get(self.blob_url(key))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("Azure get failed: {e}")))?;
		if !response.status().is_success() {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			return Err(lease_error(status, &body));
		}
		let etag = response.headers().get("ETag").and_then(|v| v.to_str().ok()).map(str::to_string);
		let content_type =
			response.headers().get("Content-Type").and_then(|v| v.to_str().ok()).map(str::to_string);
		let body = response.bytes().await.map_err(|e| DeployError::transient(format!("Azure read failed: {e}")))?;
		let size = body.len() as u64;
		Ok((body.to_vec(), ObjectMeta { etag, generation: None, size, content_type }))
	}

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
		let response = self
			.client
			.head(self.blob_url(key))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("Azure head failed: {e}")))?;
		if !response.status().is_success() {
			return Err(lease_error(response.status().as_u16(), ""));
		}
		let etag = response.headers().get("ETag").and_then(|v| v.to_str().ok()).map(str::to_string);
		let content_type =
			response.headers().get("Content-Type").and_then(|v| v.to_str().ok()).map(str::to_string);
		let size = response
			.headers()
			.get("Content-Length")
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.parse().ok())
			.unwrap_or(0);
		Ok(ObjectMeta { etag, generation: None, size, content_type })
	}

	async fn delete(&self, key: &str) -> Result<(), DeployError> {
		let response = self
			.client
			.delete(self.blob_url(key))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("Azure delete failed: {e}")))?;
		if response.status().is_success() || response.status().as_u16() == 404 {
			Ok(())
		} else {
			Err(lease_error(response.status().as_u16(), ""))
		}
	}

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
		let response = self
			.client
			.get(format!("{}&prefix={}", self.container_url(), prefix))
			.send()
			.await
			.map_err(|e| DeployError::transient(format!("Azure list failed: {e}")))?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
		}
		let body = response.text().await.map_err(|e| DeployError::transient(format!("Azure list body failed: {e}")))?;
		parse_blob_list_xml(&body)
	}

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError> {
		let mut req = self
			.client
			.put(self.blob_url(key))
			.header("x-ms-blob-type", "BlockBlob")
			.header("Content-Type", opts.content_type.clone());

		match &condition {
			Condition::IfMatch(etag) if etag == "*" => req = req.header("If-None-Match", "*"),
			Condition::IfMatch(etag) => req = req.header("If-Match", etag.clone()),
			Condition::LeaseId(lease) => req = req.header("x-ms-lease-id", lease.clone()),
			Condition::Generation(_) => {
				return Err(DeployError::fatal("Azure does not support generation-based conditions"))
			}
		}
		if let Some(ref scope) = opts.kms_key {
			req = req.header("x-ms-encryption-scope", scope.clone());
		}

		let response =
			req.body(body).send().await.map_err(|e| DeployError::transient(format!("Azure conditional put failed: {e}")))?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(lease_error(status, &body))
		}
	}
}

fn parse_blob_list_xml(body: &str) -> Result<Vec<ListEntry>, DeployError> {
	let mut entries = Vec::new();
	for blob in body.split("<Blob>").skip(1) {
		let end = blob.find("</Blob>").unwrap_or(blob.len());
		let block = &blob[..end];
		let name = extract_tag(block, "Name").unwrap_or_default();
		let size = extract_tag(block, "Content-Length").and_then(|s| s.parse().ok()).unwrap_or(0);
		let etag = extract_tag(block, "Etag");
		entries.push(ListEntry { key: name, size, etag });
	}
	Ok(entries)
}

fn extract_tag(block: &str, tag: &str) -> Option<String> {
	let open = format!("<{tag}>");
	let close = format!("</{tag}>");
	let start = block.find(&open)? + open.len();
	let end = block[start..].find(&close)? + start;
	Some(block[start..end].to_string())
}


// vim: ts=4
