//! Asynchronous dependency provisioning.
//!
//! Whenever a setting's dependency list is replaced or appended to, its
//! declared artifacts are re-resolved into the setting-local repository in
//! the background. The caller that mutated the list is never blocked; the
//! outcome is observable by polling or subscribing to the setting status.
//!
//! Each reload supersedes any in-flight predecessor: the predecessor's
//! cancellation token is cancelled, and terminal status is only published
//! by the load that is still the registered one, so the status that sticks
//! always corresponds to the most recent request.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dependency::{ArtifactResolver, Dependency};
use crate::Result;

/// Lifecycle status of an interpreter setting.
///
/// `Error` always carries its reason; transitioning back to `Ready` clears
/// it by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingStatus {
	/// Dependencies are provisioned; the setting is usable.
	Ready,
	/// A provisioning task is running.
	DownloadingDependencies,
	/// The last provisioning task failed.
	Error {
		/// Failure message from the resolver or filesystem.
		reason: String,
	},
}

/// Newest registered load. The generation is compared under the lock
/// before any terminal publish, so a superseded load can never overwrite
/// the status of the one that replaced it.
#[derive(Default)]
struct LoadSlot {
	generation: u64,
	token: Option<CancellationToken>,
}

/// Single-slot supervisor for dependency-provisioning tasks.
pub(crate) struct Provisioner {
	resolver: Arc<dyn ArtifactResolver>,
	/// Setting-scoped destination for resolved artifacts.
	local_repo: PathBuf,
	status_tx: watch::Sender<SettingStatus>,
	current: Mutex<LoadSlot>,
}

impl Provisioner {
	pub(crate) fn new(
		resolver: Arc<dyn ArtifactResolver>,
		local_repo: PathBuf,
		status_tx: watch::Sender<SettingStatus>,
	) -> Self {
		Self {
			resolver,
			local_repo,
			status_tx,
			current: Mutex::new(LoadSlot::default()),
		}
	}

	/// Resolver this provisioner was built with.
	pub(crate) fn resolver(&self) -> Arc<dyn ArtifactResolver> {
		Arc::clone(&self.resolver)
	}

	/// Kick off a background load of `dependencies`, superseding any load
	/// still in flight. Returns immediately.
	///
	/// Must be called from within a Tokio runtime; the load runs as a
	/// spawned task on it.
	pub(crate) fn reload(self: &Arc<Self>, dependencies: Vec<Dependency>) {
		let token = CancellationToken::new();
		let generation = {
			let mut current = self.current.lock();
			if let Some(predecessor) = current.token.take() {
				predecessor.cancel();
			}
			current.generation += 1;
			current.token = Some(token.clone());
			current.generation
		};

		let _ = self.status_tx.send(SettingStatus::DownloadingDependencies);

		let this = Arc::clone(self);
		tokio::spawn(async move {
			let outcome = this.load(&dependencies, &token).await;
			// Publish under the slot lock so a load that was superseded
			// after its last cancellation check still drops its status.
			let current = this.current.lock();
			if current.generation != generation {
				return;
			}
			match outcome {
				Ok(()) => {
					info!(repo = %this.local_repo.display(), count = dependencies.len(),
						"interpreter dependencies provisioned");
					let _ = this.status_tx.send(SettingStatus::Ready);
				}
				Err(e) => {
					error!(repo = %this.local_repo.display(), error = %e,
						"interpreter dependency provisioning failed");
					let _ = this.status_tx.send(SettingStatus::Error {
						reason: e.to_string(),
					});
				}
			}
		});
	}

	async fn load(&self, dependencies: &[Dependency], token: &CancellationToken) -> Result<()> {
		// Stale artifacts from a previous list must not linger; a missing
		// directory is not an error.
		match tokio::fs::remove_dir_all(&self.local_repo).await {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
		tokio::fs::create_dir_all(&self.local_repo).await?;

		for dependency in dependencies {
			if token.is_cancelled() {
				return Ok(());
			}
			self.resolver
				.resolve(&dependency.artifact, &dependency.exclusions, &self.local_repo)
				.await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests;
