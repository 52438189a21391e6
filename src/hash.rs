//! Content hashing (C2): per-file SHA-256 and the deterministic aggregate
//! bundle hash.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash raw bytes, no normalization, rendered `sha256:<lowercase-hex>`.
pub fn hash_bytes(data: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data);
	format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Strip the `sha256:` prefix a hash string carries, for feeding into the
/// bundle-hash accumulator which wants the bare hex digest.
fn strip_prefix(hash: &str) -> &str {
	hash.strip_prefix("sha256:").unwrap_or(hash)
}

/// Aggregate bundle hash over a RelPath→hash mapping (§4.2).
///
/// Sorts keys byte-lexicographically, then feeds `path || 0x00 || hex_digest
/// || 0x0A` for each into a single SHA-256 accumulator. The `0x00` separator
/// prevents two different (path,hash) splits from producing the same
/// concatenation; `0x0A` terminates each record. Pure function of the
/// mapping - insertion order never matters.
pub fn bundle_hash<'a, I>(file_hashes: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let sorted: BTreeMap<&str, &str> = file_hashes.into_iter().collect();

	let mut hasher = Sha256::new();
	for (path, hash) in sorted {
		hasher.update(path.as_bytes());
		hasher.update([0x00]);
		hasher.update(strip_prefix(hash).as_bytes());
		hasher.update([0x0A]);
	}
	format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn hash_bytes_is_lowercase_hex_sha256() {
		let h = hash_bytes(b"hello");
		assert!(h.starts_with("sha256:"));
		assert_eq!(h.len(), "sha256:".len() + 64);
		assert!(h["sha256:".len()..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
	}

	#[test]
	fn bundle_hash_is_insertion_order_independent() {
		let a = vec![("a.txt", "sha256:aaa"), ("b.txt", "sha256:bbb"), ("c.txt", "sha256:ccc")];
		let b = vec![("c.txt", "sha256:ccc"), ("a.txt", "sha256:aaa"), ("b.txt", "sha256:bbb")];
		assert_eq!(bundle_hash(a), bundle_hash(b));
	}

	#[test]
	fn bundle_hash_separator_prevents_split_collision() {
		// Without the 0x00 separator, {"ab":"c"} and {"a":"bc"} could collide
		// under naive string concatenation. Confirm they differ here.
		let h1 = bundle_hash(vec![("ab", "c")]);
		let h2 = bundle_hash(vec![("a", "bc")]);
		assert_ne!(h1, h2);
	}

	proptest! {
		#[test]
		fn bundle_hash_determinism(
			mut pairs in proptest::collection::vec(("[a-z/]{1,10}", "[0-9a-f]{8}"), 0..12)
		) {
			pairs.sort();
			pairs.dedup_by(|a, b| a.0 == b.0);
			let refs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
			let mut shuffled = refs.clone();
			shuffled.reverse();
			prop_assert_eq!(bundle_hash(refs), bundle_hash(shuffled));
		}
	}
}

// vim: ts=4
