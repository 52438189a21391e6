//! Bundle scanner (C1): enumerate, exclude, validate symlinks, hash files.

use crate::error::DeployError;
use crate::exclusion::ExclusionEngine;
use crate::hash::{bundle_hash, hash_bytes};
use crate::types::FileEntry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A sorted, hashed, in-memory snapshot of a source directory (or an
/// in-memory byte map) plus its aggregate hash (§3).
#[derive(Debug, Clone)]
pub struct Bundle {
	pub source_dir: Option<PathBuf>,
	pub files: Vec<FileEntry>,
	pub file_hashes: BTreeMap<String, String>,
	pub bundle_hash: String,
}

impl Bundle {
	/// Scan depth-first from `root`, applying `exclusions`, and hash every
	/// retained file. Symlinks are validated not to escape the root unless
	/// `allow_external_symlinks` is set (§4.1.2).
	pub fn scan(
		root: &Path,
		exclusions: &ExclusionEngine,
		allow_external_symlinks: bool,
	) -> Result<Self, DeployError> {
		let canonical_root = std::fs::canonicalize(root)?;

		let mut files: Vec<FileEntry> = Vec::new();
		// Manual stack-based traversal rather than a recursive walk, so a
		// directory excluded by a rule short-circuits its entire subtree
		// without ever being pushed.
		let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

		while let Some(dir) = stack.pop() {
			let entries = std::fs::read_dir(&dir)?;
			for entry in entries {
				let entry = entry?;
				let abs_path = entry.path();
				let rel_path = relative_slash_path(root, &abs_path)?;
				let file_type = entry.file_type()?;

				if file_type.is_dir() {
					if exclusions.should_exclude_dir(&rel_path) {
						continue;
					}
					stack.push(abs_path);
					continue;
				}

				if exclusions.should_exclude(&rel_path) {
					continue;
				}

				if file_type.is_symlink() {
					validate_symlink_target(&canonical_root, &abs_path, allow_external_symlinks)?;
				}

				files.push(FileEntry::new(rel_path, abs_path));
			}
		}

		files.sort_by(|a, b| a.rel_path.as_bytes().cmp(b.rel_path.as_bytes()));

		let mut file_hashes = BTreeMap::new();
		for entry in &files {
			let data = std::fs::read(&entry.abs_path)?;
			file_hashes.insert(entry.rel_path.clone(), hash_bytes(&data));
		}

		let aggregate =
			bundle_hash(file_hashes.iter().map(|(k, v)| (k.as_str(), v.as_str())));

		Ok(Self { source_dir: Some(root.to_path_buf()), files, file_hashes, bundle_hash: aggregate })
	}

	/// Build a bundle directly from an in-memory RelPath→bytes mapping
	/// (e.g. the output of [`crate::registry::RegistryMirrorClient::download_bundle`]).
	/// FileEntries carry empty on-disk paths.
	pub fn from_bytes(contents: &BTreeMap<String, Vec<u8>>) -> Self {
		let mut files = Vec::with_capacity(contents.len());
		let mut file_hashes = BTreeMap::new();

		for (rel_path, data) in contents {
			files.push(FileEntry::in_memory(rel_path.clone()));
			file_hashes.insert(rel_path.clone(), hash_bytes(data));
		}
		files.sort_by(|a, b| a.rel_path.as_bytes().cmp(b.rel_path.as_bytes()));

		let aggregate = bundle_hash(file_hashes.iter().map(|(k, v)| (k.as_str(), v.as_str())));

		Self { source_dir: None, files, file_hashes, bundle_hash: aggregate }
	}
}

fn relative_slash_path(root: &Path, abs_path: &Path) -> Result<String, DeployError> {
	let rel = abs_path
		.strip_prefix(root)
		.map_err(|_| DeployError::fatal(format!("{} is not under {}", abs_path.display(), root.display())))?;
	let mut parts = Vec::new();
	for component in rel.components() {
		parts.push(component.as_os_str().to_string_lossy().into_owned());
	}
	Ok(parts.join("/"))
}

fn validate_symlink_target(
	canonical_root: &Path,
	abs_path: &Path,
	allow_external_symlinks: bool,
) -> Result<(), DeployError> {
	if allow_external_symlinks {
		return Ok(());
	}
	let target = std::fs::canonicalize(abs_path)?;
	if target != canonical_root && !target.starts_with(canonical_root) {
		return Err(DeployError::symlink_escape(abs_path.display().to_string(), target.display().to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap as StdBTreeMap;
	use tempfile::TempDir;

	fn no_exclusions() -> ExclusionEngine {
		ExclusionEngine::new(&[]).unwrap()
	}

	#[test]
	fn scan_sorts_files_byte_lexicographically() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("b.txt"), "b").unwrap();
		std::fs::write(dir.path().join("a.txt"), "a").unwrap();
		std::fs::create_dir(dir.path().join("sub")).unwrap();
		std::fs::write(dir.path().join("sub/c.txt"), "c").unwrap();

		let bundle = Bundle::scan(dir.path(), &no_exclusions(), false).unwrap();
		let rel_paths: Vec<&str> = bundle.files.iter().map(|f| f.rel_path.as_str()).collect();
		assert_eq!(rel_paths, vec!["a.txt", "b.txt", "sub/c.txt"]);
	}

	#[test]
	fn scan_excludes_security_sensitive_paths() {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir(dir.path().join(".git")).unwrap();
		std::fs::write(dir.path().join(".git/config"), "x").unwrap();
		std::fs::write(dir.path().join("README.md"), "hi").unwrap();

		let bundle = Bundle::scan(dir.path(), &no_exclusions(), false).unwrap();
		let rel_paths: Vec<&str> = bundle.files.iter().map(|f| f.rel_path.as_str()).collect();
		assert_eq!(rel_paths, vec!["README.md"]);
	}

	#[test]
	fn scan_rejects_symlink_escaping_root() {
		let dir = TempDir::new().unwrap();
		let outside = TempDir::new().unwrap();
		std::fs::write(outside.path().join("secret.txt"), "s").unwrap();

		#[cfg(unix)]
		{
			std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
			let result = Bundle::scan(dir.path(), &no_exclusions(), false);
			assert!(result.is_err());
		}
	}

	#[test]
	fn scan_allows_external_symlink_when_flag_set() {
		let dir = TempDir::new().unwrap();
		let outside = TempDir::new().unwrap();
		std::fs::write(outside.path().join("secret.txt"), "s").unwrap();

		#[cfg(unix)]
		{
			std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
			let result = Bundle::scan(dir.path(), &no_exclusions(), true);
			assert!(result.is_ok());
		}
	}

	#[test]
	fn from_bytes_matches_scan_hash_for_identical_content() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("main.py"), "print('hello')\n").unwrap();
		let scanned = Bundle::scan(dir.path(), &no_exclusions(), false).unwrap();

		let mut memory: StdBTreeMap<String, Vec<u8>> = StdBTreeMap::new();
		memory.insert("main.py".to_string(), b"print('hello')\n".to_vec());
		let from_memory = Bundle::from_bytes(&memory);

		assert_eq!(scanned.bundle_hash, from_memory.bundle_hash);
	}
}

// vim: ts=4
