//! Layer 2: convenience exclusions (§4.8.2) - dependency caches, OS
//! metadata, and this engine's own working directory.

use globset::{Glob, GlobSet, GlobSetBuilder};

fn patterns() -> &'static [&'static str] {
	&[
		"**/node_modules/**",
		"node_modules/**",
		"**/.venv/**",
		".venv/**",
		"**/venv/**",
		"venv/**",
		"**/__pycache__/**",
		"__pycache__/**",
		"**/*.pyc",
		"**/.DS_Store",
		".DS_Store",
		"**/Thumbs.db",
		"Thumbs.db",
		"**/desktop.ini",
		"**/.agentctx/**",
		".agentctx/**",
	]
}

pub struct ConvenienceMatcher {
	set: GlobSet,
}

impl ConvenienceMatcher {
	pub fn new() -> Self {
		let mut builder = GlobSetBuilder::new();
		for p in patterns() {
			builder.add(Glob::new(p).expect("built-in convenience glob must compile"));
		}
		Self { set: builder.build().expect("built-in convenience globset must build") }
	}

	pub fn is_excluded(&self, rel_path: &str) -> bool {
		self.set.is_match(rel_path)
	}
}

impl Default for ConvenienceMatcher {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn excludes_dependency_caches() {
		let m = ConvenienceMatcher::new();
		assert!(m.is_excluded("node_modules/left-pad/index.js"));
		assert!(m.is_excluded("src/__pycache__/mod.pyc"));
	}

	#[test]
	fn excludes_own_working_directory() {
		let m = ConvenienceMatcher::new();
		assert!(m.is_excluded(".agentctx/ACTIVE"));
	}

	#[test]
	fn does_not_exclude_ordinary_source() {
		let m = ConvenienceMatcher::new();
		assert!(!m.is_excluded("src/main.rs"));
	}
}

// vim: ts=4
