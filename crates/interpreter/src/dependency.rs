//! Dependency artifacts and the resolver capability.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A library artifact declared by an interpreter setting.
///
/// Two dependencies are equal only when both the coordinate and the
/// exclusion list match; the same coordinate with different exclusions is
/// a distinct dependency and survives dedup on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
	/// Artifact coordinate in `group:artifact:version` form.
	#[serde(rename = "groupArtifactVersion")]
	pub artifact: String,
	/// Transitive coordinates excluded from resolution.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exclusions: Vec<String>,
}

impl Dependency {
	/// Declare a dependency with no exclusions.
	pub fn new(artifact: impl Into<String>) -> Self {
		Self {
			artifact: artifact.into(),
			exclusions: Vec::new(),
		}
	}

	/// Exclude transitive coordinates from resolution.
	pub fn exclusions(mut self, exclusions: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.exclusions = exclusions.into_iter().map(Into::into).collect();
		self
	}
}

/// Capability resolving artifact coordinates into a local directory.
///
/// Implemented by the (external) artifact-resolution layer; this crate only
/// drives it from the provisioning task.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
	/// Resolve `coordinate` (honoring `exclusions`) into `dest`.
	async fn resolve(&self, coordinate: &str, exclusions: &[String], dest: &Path) -> Result<()>;
}
