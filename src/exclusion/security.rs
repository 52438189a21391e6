//! Layer 1: security exclusions that cannot be disabled (§4.8.1).

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Patterns that are never deployed, regardless of user configuration.
fn patterns() -> &'static [&'static str] {
	&[
		"**/.git/**",
		".git/**",
		"**/.svn/**",
		".svn/**",
		"**/.hg/**",
		".hg/**",
		"**/.aws/**",
		".aws/**",
		"**/.azure/**",
		".azure/**",
		"**/.gcloud/**",
		".gcloud/**",
		"**/.ssh/**",
		".ssh/**",
		"**/*.pem",
		"**/*.key",
		"**/*.p12",
		"**/*.pfx",
		"**/*.jks",
		"**/id_rsa",
		"**/id_dsa",
		"**/id_ecdsa",
		"**/id_ed25519",
		"**/.env",
		"**/.env.*",
	]
}

/// Dotenv variants that must pass through despite matching `.env.*` above - /// these carry no real secrets and are routinely committed as templates.
fn exceptions() -> &'static [&'static str] {
	&["**/.env.example", ".env.example", "**/.env.template", ".env.template"]
}

pub struct SecurityMatcher {
	excluded: GlobSet,
	exceptions: GlobSet,
}

impl SecurityMatcher {
	pub fn new() -> Self {
		let mut excluded = GlobSetBuilder::new();
		for p in patterns() {
			excluded.add(Glob::new(p).expect("built-in security glob must compile"));
		}
		let mut exceptions = GlobSetBuilder::new();
		for p in exceptions() {
			exceptions.add(Glob::new(p).expect("built-in exception glob must compile"));
		}
		Self {
			excluded: excluded.build().expect("built-in security globset must build"),
			exceptions: exceptions.build().expect("built-in exception globset must build"),
		}
	}

	pub fn is_excluded(&self, rel_path: &str) -> bool {
		self.excluded.is_match(rel_path) && !self.exceptions.is_match(rel_path)
	}
}

impl Default for SecurityMatcher {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn excludes_vcs_and_credential_directories() {
		let m = SecurityMatcher::new();
		assert!(m.is_excluded(".git/config"));
		assert!(m.is_excluded("nested/.ssh/id_rsa"));
		assert!(m.is_excluded(".aws/credentials"));
	}

	#[test]
	fn excludes_private_key_extensions() {
		let m = SecurityMatcher::new();
		assert!(m.is_excluded("certs/server.pem"));
		assert!(m.is_excluded("server.key"));
		assert!(m.is_excluded("identity.p12"));
	}

	#[test]
	fn excludes_dotenv_but_passes_through_templates() {
		let m = SecurityMatcher::new();
		assert!(m.is_excluded(".env"));
		assert!(m.is_excluded(".env.local"));
		assert!(!m.is_excluded(".env.example"));
		assert!(!m.is_excluded(".env.template"));
	}
}

// vim: ts=4
