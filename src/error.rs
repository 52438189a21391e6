//! Error taxonomy for the deployment engine.
//!
//! Errors are classified by `ErrorKind` rather than by concrete Rust type, so
//! that a caller several layers removed from the originating failure can
//! still ask "was this a precondition failure?" without knowing which
//! backend produced it. `DeployError::kind()` walks the wrapped source chain
//! to answer that question - callers must go through it rather than
//! `downcast_ref`-ing the outer error, which only sees the outermost wrap.

use std::error::Error as StdError;
use std::fmt;

/// The taxonomy from the spec's error handling design: a small, closed set
/// of kinds that callers branch on, independent of which backend raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
	/// A specific object is absent. Surfaced only by Get/Head; Delete absorbs it.
	NotFound,
	/// A conditional write was rejected by the server (concurrent-modification signal).
	PreconditionFailed,
	/// Azure-specific lease contention; equivalent signal to PreconditionFailed.
	LeaseConflict,
	/// Bundle hash mismatch on downloaded content.
	Integrity,
	/// Symlink validation failure during scan.
	SymlinkEscape,
	/// Network errors, 429, 5xx - retryable by the retry decorator.
	Transient,
	/// Everything else: other 4xx, programming errors, serialization failures.
	Fatal,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorKind::NotFound => "not_found",
			ErrorKind::PreconditionFailed => "precondition_failed",
			ErrorKind::LeaseConflict => "lease_conflict",
			ErrorKind::Integrity => "integrity",
			ErrorKind::SymlinkEscape => "symlink_escape",
			ErrorKind::Transient => "transient",
			ErrorKind::Fatal => "fatal",
		};
		f.write_str(s)
	}
}

/// Extra detail carried by the kinds that need it beyond a message.
#[derive(Debug, Clone)]
pub enum ErrorDetail {
	None,
	Integrity { expected: String, actual: String, mismatches: Vec<String> },
	SymlinkEscape { path: String, target: String },
}

/// The crate's single error type. Every fallible operation in this crate
/// returns `Result<T, DeployError>`.
pub struct DeployError {
	kind: ErrorKind,
	detail: ErrorDetail,
	message: String,
	source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl DeployError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self { kind, detail: ErrorDetail::None, message: message.into(), source: None }
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	pub fn precondition_failed(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::PreconditionFailed, message)
	}

	pub fn lease_conflict(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::LeaseConflict, message)
	}

	pub fn transient(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Transient, message)
	}

	pub fn fatal(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Fatal, message)
	}

	pub fn symlink_escape(path: impl Into<String>, target: impl Into<String>) -> Self {
		let path = path.into();
		let target = target.into();
		Self {
			kind: ErrorKind::SymlinkEscape,
			message: format!("symlink at {path} escapes source root (resolves to {target})"),
			detail: ErrorDetail::SymlinkEscape { path, target },
			source: None,
		}
	}

	pub fn integrity(
		expected: impl Into<String>,
		actual: impl Into<String>,
		mismatches: Vec<String>,
	) -> Self {
		let expected = expected.into();
		let actual = actual.into();
		Self {
			kind: ErrorKind::Integrity,
			message: format!("bundle hash mismatch: expected {expected}, got {actual}"),
			detail: ErrorDetail::Integrity { expected, actual, mismatches },
			source: None,
		}
	}

	/// Wrap this error with additional context, preserving the original kind
	/// and detail. This is the only supported way to chain context - never
	/// construct a fresh `Fatal` around an error whose real kind matters.
	pub fn context(self, message: impl Into<String>) -> Self {
		let message = message.into();
		Self { kind: self.kind.clone(), detail: self.detail.clone(), message, source: Some(Box::new(self)) }
	}

	/// The kind of this error. Unlike matching on a wrapped error's runtime
	/// type, this is stable across `context()` wrapping - the kind and
	/// detail are copied forward at each wrap rather than hidden behind it.
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	pub fn detail(&self) -> &ErrorDetail {
		&self.detail
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self.kind, ErrorKind::Transient)
	}
}

impl fmt::Debug for DeployError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeployError").field("kind", &self.kind).field("message", &self.message).finish()
	}
}

impl fmt::Display for DeployError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind, self.message)?;
		if let Some(ref source) = self.source {
			write!(f, ": {source}")?;
		}
		Ok(())
	}
}

impl StdError for DeployError {
	fn source(&self) -> Option<&(dyn StdError + 'static)> {
		self.source.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
	}
}

impl From<std::io::Error> for DeployError {
	fn from(e: std::io::Error) -> Self {
		let kind = if e.kind() == std::io::ErrorKind::NotFound {
			ErrorKind::NotFound
		} else {
			ErrorKind::Fatal
		};
		Self { kind, detail: ErrorDetail::None, message: e.to_string(), source: Some(Box::new(e)) }
	}
}

impl From<serde_json::Error> for DeployError {
	fn from(e: serde_json::Error) -> Self {
		Self {
			kind: ErrorKind::Fatal,
			detail: ErrorDetail::None,
			message: format!("manifest serialization error: {e}"),
			source: Some(Box::new(e)),
		}
	}
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kind_survives_context_wrapping() {
		let base = DeployError::precondition_failed("ACTIVE etag mismatch");
		let wrapped = base.context("promoting deployment dep_20260101T000000Z_deadbeef");
		let twice = wrapped.context("deploying skill my-skill");
		assert_eq!(twice.kind(), &ErrorKind::PreconditionFailed);
	}

	#[test]
	fn integrity_detail_round_trips() {
		let err = DeployError::integrity("sha256:aaa", "sha256:bbb", vec!["main.py".to_string()]);
		match err.detail() {
			ErrorDetail::Integrity { expected, actual, mismatches } => {
				assert_eq!(expected, "sha256:aaa");
				assert_eq!(actual, "sha256:bbb");
				assert_eq!(mismatches, &vec!["main.py".to_string()]);
			}
			_ => panic!("expected Integrity detail"),
		}
	}

	#[test]
	fn io_not_found_maps_to_not_found_kind() {
		let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
		let err: DeployError = io_err.into();
		assert_eq!(err.kind(), &ErrorKind::NotFound);
	}
}

// vim: ts=4
