//! # skilldeploy - content-addressable skill bundle deployment engine
//!
//! Deploys a directory of skill files to one or more object-store targets
//! (S3, Azure Blob, GCS) under a staged-commit protocol: files are uploaded
//! under a fresh deployment ID, a manifest is written describing them, and
//! only then is an `ACTIVE` pointer promoted to that deployment ID via a
//! conditional write. Readers only ever see a fully-staged deployment.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skilldeploy::bundle::Bundle;
//! use skilldeploy::engine::DeployEngine;
//! use skilldeploy::exclusion::ExclusionEngine;
//! use skilldeploy::store::InMemoryDriver;
//! use skilldeploy::types::DeployInput;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let exclusions = ExclusionEngine::new(&[])?;
//!     let bundle = Bundle::scan("./my-skill".as_ref(), &exclusions, false)?;
//!
//!     let driver = Arc::new(InMemoryDriver::new());
//!     let engine = DeployEngine::new(driver, 16, "");
//!     let input = DeployInput {
//!         skill_name: "my-skill".to_string(),
//!         canonical_store: "source".to_string(),
//!         provider_version: "1.0.0".to_string(),
//!         resource_name: "my-skill".to_string(),
//!         source_dir: Some("./my-skill".to_string()),
//!         registry_origin: None,
//!         previous_deploy_id: String::new(),
//!         staged_deploy_id: String::new(),
//!     };
//!     let result = engine.deploy(&bundle, &input).await?;
//!     println!("deployed {}", result.deployment_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuring the engine
//!
//! ```rust,ignore
//! use skilldeploy::config::EngineConfig;
//!
//! let config = EngineConfig { max_concurrency: 32, retain_deployments: 10, ..Default::default() };
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod bundle;
pub mod config;
pub mod deploy_id;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod hash;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod store;
pub mod types;

// Re-export commonly used types and functions
pub use bundle::Bundle;
pub use config::EngineConfig;
pub use deploy_id::ParsedDeployId;
pub use engine::DeployEngine;
pub use error::{DeployError, ErrorDetail, ErrorKind};
pub use exclusion::ExclusionEngine;
pub use manifest::Manifest;
pub use registry::RegistryMirrorClient;
pub use store::{ObjectStoreDriver, RetryingDriver};
pub use types::{DeployInput, DeployResult, DestroyMode, PruneResult, RefreshResult, TargetState};

// vim: ts=4
