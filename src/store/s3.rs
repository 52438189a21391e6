//! S3 backend (§4.5): `If-None-Match: *` for create-only, `If-Match:
//! <etag>` for compare-and-set, optional SSE-KMS on writes, 412 ⇒
//! `PreconditionFailed`.

use super::{map_http_status, Condition, ListEntry, ObjectMeta, ObjectStoreDriver, PutOpts};
use crate::error::DeployError;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct S3Credentials {
	pub access_key_id: String,
	pub secret_access_key: String,
	pub session_token: Option<String>,
	pub region: String,
}

/// Talks to a single bucket over virtual-hosted-style HTTPS, signing every
/// request with SigV4. `endpoint` is the scheme+host, e.g.
/// `https://s3.us-east-1.amazonaws.com`; the bucket name is sent as the
/// first path segment rather than as a subdomain, which also works against
/// S3-compatible stores that don't support virtual-hosted addressing.
pub struct S3Driver {
	client: reqwest::Client,
	endpoint: String,
	bucket: String,
	credentials: S3Credentials,
}

impl S3Driver {
	pub fn new(client: reqwest::Client, endpoint: String, bucket: String, credentials: S3Credentials) -> Self {
		Self { client, endpoint, bucket, credentials }
	}

	fn object_url(&self, key: &str) -> String {
		format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
	}

	fn host(&self) -> String {
		self.endpoint
			.trim_start_matches("https://")
			.trim_start_matches("http://")
			.trim_end_matches('/')
			.to_string()
	}

	/// Builds the `Authorization` header and accompanying `x-amz-date` /
	/// `x-amz-content-sha256` headers for one request, per the AWS SigV4
	/// algorithm. Payload hashing uses the literal `UNSIGNED-PAYLOAD`
	/// sentinel rather than hashing the body up front, which AWS permits
	/// for streaming uploads and keeps this signer independent of body size.
	fn sign(
		&self,
		method: &str,
		canonical_uri: &str,
		canonical_query: &str,
	) -> (String, String, String) {
		let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
		let date_stamp = Utc::now().format("%Y%m%d").to_string();
		let host = self.host();
		let payload_hash = "UNSIGNED-PAYLOAD";

		let canonical_headers =
			format!("host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n");
		let signed_headers = "host;x-amz-content-sha256;x-amz-date";

		let canonical_request =
			format!("{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

		let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.credentials.region);
		let string_to_sign = format!(
			"AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
			hex::encode(Sha256::digest(canonical_request.as_bytes()))
		);

		let signing_key = self.derive_signing_key(&date_stamp);
		let mut mac = HmacSha256::new_from_slice(&signing_key).expect("hmac accepts any key length");
		mac.update(string_to_sign.as_bytes());
		let signature = hex::encode(mac.finalize().into_bytes());

		let authorization = format!(
			"AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
			self.credentials.access_key_id
		);

		(authorization, amz_date, payload_hash.to_string())
	}

	fn derive_signing_key(&self, date_stamp: &str) -> Vec<u8> {
		let mut mac = HmacSha256::new_from_slice(format!("AWS4{}", self.credentials.secret_access_key).as_bytes())
			.expect("hmac accepts any key length");
		mac.update(date_stamp.as_bytes());
		let k_date = mac.finalize().into_bytes();

		let mut mac = HmacSha256::new_from_slice(&k_date).expect("hmac accepts any key length");
		mac.update(self.credentials.region.as_bytes());
		let k_region = mac.finalize().into_bytes();

		let mut mac = HmacSha256::new_from_slice(&k_region).expect("hmac accepts any key length");
		mac.update(b"s3");
		let k_service = mac.finalize().into_bytes();

		let mut mac = HmacSha256::new_from_slice(&k_service).expect("hmac accepts any key length");
		mac.update(b"aws4_request");
		mac.finalize().into_bytes().to_vec()
	}

	fn canonical_uri(&self, key: &str) -> String {
		format!("/{}/{}", self.bucket, key)
	}

	async fn request(
		&self,
		method: reqwest::Method,
		key: &str,
		query: &str,
		body: Option<Vec<u8>>,
		extra_headers: Vec<(&'static str, String)>,
	) -> Result<reqwest::Response, DeployError> {
		let canonical_uri = self.canonical_uri(key);
		let (authorization, amz_date, payload_hash) = self.sign(method.as_str(), &canonical_uri, query);

		let url = if query.is_empty() {
			self.object_url(key)
		} else {
			format!("{}?{query}", self.object_url(key))
		};

		let mut req = self
			.client
			.request(method, &url)
			.header("x-amz-date", amz_date)
			.header("x-amz-content-sha256", payload_hash)
			.header("Authorization", authorization);

		if let Some(ref token) = self.credentials.session_token {
			req = req.header("x-amz-security-token", token.clone());
		}
		for (name, value) in extra_headers {
			req = req.header(name, value);
		}
		if let Some(body) = body {
			req = req.body(body);
		}

		req.send().await.map_err(|e| DeployError::transient(format!("S3 request failed: {e}")))
	}
}

#[async_trait]
impl ObjectStoreDriver for S3Driver {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
		let mut headers = vec![("Content-Type", opts.content_type.clone())];
		if let Some(ref kms) = opts.kms_key {
			headers.push(("x-amz-server-side-encryption", "aws:kms".to_string()));
			headers.push(("x-amz-server-side-encryption-aws-kms-key-id", kms.clone()));
		}
		let response = self.request(reqwest::Method::PUT, key, "", Some(body), headers).await?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(map_http_status(status, &body))
		}
	}

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
		let response = self.request(reqwest::Method::GET, key, "", None, vec![]).await?;
		if !response.status().is_success() {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			return Err(map_http_status(status, &body));
		}
		let etag = response.headers().get("ETag").and_then(|v| v.to_str().ok()).map(str::to_string);
		let content_type =
			response.headers().get("Content-Type").and_then(|v| v.to_str().ok()).map(str::to_string);
		let body = response.bytes().await.map_err(|e| DeployError::transient(format!("S3 read failed: {e}")))?;
		let size = body.len() as u64;
		Ok((body.to_vec(), ObjectMeta { etag, generation: None, size, content_type }))
	}

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
		let response = self.request(reqwest::Method::HEAD, key, "", None, vec![]).await?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
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
		let response = self.request(reqwest::Method::DELETE, key, "", None, vec![]).await?;
		// S3 DELETE is idempotent: 204 for existing objects, 404 is still success.
		if response.status().is_success() || response.status().as_u16() == 404 {
			Ok(())
		} else {
			Err(map_http_status(response.status().as_u16(), ""))
		}
	}

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
		let query = format!("list-type=2&prefix={}", urlencoding_minimal(prefix));
		let response = self.request(reqwest::Method::GET, "", &query, None, vec![]).await?;
		if !response.status().is_success() {
			return Err(map_http_status(response.status().as_u16(), ""));
		}
		let body = response.text().await.map_err(|e| DeployError::transient(format!("S3 list failed: {e}")))?;
		parse_list_objects_xml(&body)
	}

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError> {
		let mut headers = vec![("Content-Type", opts.content_type.clone())];
		match &condition {
			Condition::IfMatch(etag) if etag == "*" => headers.push(("If-None-Match", "*".to_string())),
			Condition::IfMatch(etag) => headers.push(("If-Match", etag.clone())),
			Condition::Generation(_) => {
				return Err(DeployError::fatal("S3 does not support generation-based conditions"))
			}
			Condition::LeaseId(_) => return Err(DeployError::fatal("S3 does not support lease-based conditions")),
		}
		if let Some(ref kms) = opts.kms_key {
			headers.push(("x-amz-server-side-encryption", "aws:kms".to_string()));
			headers.push(("x-amz-server-side-encryption-aws-kms-key-id", kms.clone()));
		}

		let response = self.request(reqwest::Method::PUT, key, "", Some(body), headers).await?;
		if response.status().is_success() {
			Ok(())
		} else {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			Err(map_http_status(status, &body))
		}
	}
}

fn urlencoding_minimal(s: &str) -> String {
	s.chars()
		.map(|c| match c {
			'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' | '/' => c.to_string(),
			other => format!("%{:02X}", other as u32),
		})
		.collect()
}

/// Extracts `<Key>`/`<Size>`/`<ETag>` triples from a ListObjectsV2 response
/// without pulling in a full XML parser - the response shape is narrow and
/// stable enough that a targeted scan is simpler than a dependency.
fn parse_list_objects_xml(body: &str) -> Result<Vec<ListEntry>, DeployError> {
	let mut entries = Vec::new();
	for contents in body.split("<Contents>").skip(1) {
		let end = contents.find("</Contents>").unwrap_or(contents.len());
		let block = &contents[..end];
		let key = extract_tag(block, "Key").unwrap_or_default();
		let size = extract_tag(block, "Size").and_then(|s| s.parse().ok()).unwrap_or(0);
		let etag = extract_tag(block, "ETag");
		entries.push(ListEntry { key, size, etag });
	}
	Ok(entries)
}

fn extract_tag(block: &str, tag: &str) -> Option<String> {
	let open = format!("<{tag}>");
	let close = format!("</{tag}>");
	let start = block.find(&open)? + open.len();
	let end = block[start..].find(&close)? + start;
	Some(block[start..end].trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn signing_key_derivation_is_deterministic() {
		let driver = S3Driver::new(
			reqwest::Client::new(),
			"https://s3.us-east-1.amazonaws.com".to_string(),
			"my-bucket".to_string(),
			S3Credentials {
				access_key_id: "AKIDEXAMPLE".to_string(),
				secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
				session_token: None,
				region: "us-east-1".to_string(),
			},
		);
		let a = driver.derive_signing_key("20260101");
		let b = driver.derive_signing_key("20260101");
		assert_eq!(a, b);
	}

	#[test]
	fn parses_list_objects_v2_response() {
		let xml = r#"<ListBucketResult>
			<Contents><Key>skill/.agentctx/ACTIVE</Key><Size>20</Size><ETag>"abc123"</ETag></Contents>
			<Contents><Key>skill/.agentctx/deployments/dep_1/manifest.json</Key><Size>512</Size><ETag>"def456"</ETag></Contents>
		</ListBucketResult>"#;
		let entries = parse_list_objects_xml(xml).unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].key, "skill/.agentctx/ACTIVE");
		assert_eq!(entries[0].size, 20);
		assert_eq!(entries[1].etag.as_deref(), Some("def456"));
	}
}

// vim: ts=4
