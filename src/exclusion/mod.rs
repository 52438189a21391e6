//! Exclusion matcher (C8): three layered rule sets applied in order with
//! short-circuit on first match (§4.8).

mod convenience;
mod security;
mod user;

pub use convenience::ConvenienceMatcher;
pub use security::SecurityMatcher;
pub use user::UserPatternMatcher;

use crate::error::DeployError;

/// Combines the security, convenience, and user-pattern layers into a
/// single `should_exclude`/`should_exclude_dir` surface for the scanner.
pub struct ExclusionEngine {
	security: SecurityMatcher,
	convenience: ConvenienceMatcher,
	user: UserPatternMatcher,
}

impl ExclusionEngine {
	pub fn new(user_patterns: &[String]) -> Result<Self, DeployError> {
		Ok(Self {
			security: SecurityMatcher::new(),
			convenience: ConvenienceMatcher::new(),
			user: UserPatternMatcher::new(user_patterns.iter().map(String::as_str))?,
		})
	}

	/// Should this file (not directory) be excluded from the bundle?
	pub fn should_exclude(&self, rel_path: &str) -> bool {
		self.security.is_excluded(rel_path)
			|| self.convenience.is_excluded(rel_path)
			|| self.user.is_excluded(rel_path, false)
	}

	/// Should this directory be pruned from traversal entirely? A directory
	/// matches when either its RelPath or `RelPath + "/"` matches any rule,
	/// so subtree pruning is efficient and trailing-slash-only user
	/// patterns still short-circuit the walk.
	pub fn should_exclude_dir(&self, rel_path: &str) -> bool {
		let with_slash = format!("{rel_path}/");
		self.security.is_excluded(rel_path)
			|| self.security.is_excluded(&with_slash)
			|| self.convenience.is_excluded(rel_path)
			|| self.convenience.is_excluded(&with_slash)
			|| self.user.is_excluded(rel_path, true)
	}
}


// vim: ts=4
