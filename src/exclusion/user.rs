//! Layer 3: user-supplied gitignore-style patterns (§4.8.3), additive on
//! top of the two hardcoded layers. Patterns are fed in-memory - there is
//! no implicit `.gitignore`-file reading here, unlike the teacher's
//! file-backed `IgnoreFileMatcher` this module descends from; callers
//! decide where their pattern strings come from.

use crate::error::DeployError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

pub struct UserPatternMatcher {
	gitignore: Gitignore,
}

impl UserPatternMatcher {
	/// Build a matcher from a list of pattern lines. Blank lines and
	/// `#`-prefixed lines are skipped by the underlying gitignore parser;
	/// trailing-slash patterns match only directories and their
	/// descendants; separator-free patterns also match by basename.
	pub fn new<'a, I: IntoIterator<Item = &'a str>>(patterns: I) -> Result<Self, DeployError> {
		let mut builder = GitignoreBuilder::new(".");
		for (i, line) in patterns.into_iter().enumerate() {
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			builder
				.add_line(None, trimmed)
				.map_err(|e| DeployError::fatal(format!("invalid exclusion pattern at line {i}: {e}")))?;
		}
		let gitignore =
			builder.build().map_err(|e| DeployError::fatal(format!("failed to build exclusion matcher: {e}")))?;
		Ok(Self { gitignore })
	}

	pub fn is_excluded(&self, rel_path: &str, is_dir: bool) -> bool {
		self.gitignore.matched(Path::new(rel_path), is_dir).is_ignore()
	}
}


// vim: ts=4
