use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::Error;

struct OkResolver {
	calls: AtomicUsize,
}

#[async_trait]
impl ArtifactResolver for OkResolver {
	async fn resolve(&self, _coordinate: &str, _exclusions: &[String], _dest: &Path) -> Result<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

struct FailingResolver;

#[async_trait]
impl ArtifactResolver for FailingResolver {
	async fn resolve(&self, coordinate: &str, _exclusions: &[String], _dest: &Path) -> Result<()> {
		Err(Error::Resolve(format!("no such artifact {coordinate}")))
	}
}

/// Blocks until released, then succeeds.
struct GatedResolver {
	entered: Arc<Notify>,
	release: Arc<Notify>,
}

#[async_trait]
impl ArtifactResolver for GatedResolver {
	async fn resolve(&self, _coordinate: &str, _exclusions: &[String], _dest: &Path) -> Result<()> {
		self.entered.notify_one();
		self.release.notified().await;
		Ok(())
	}
}

fn provisioner(
	resolver: Arc<dyn ArtifactResolver>,
	repo: &Path,
) -> (Arc<Provisioner>, watch::Receiver<SettingStatus>) {
	let (tx, rx) = watch::channel(SettingStatus::Ready);
	(
		Arc::new(Provisioner::new(resolver, repo.to_path_buf(), tx)),
		rx,
	)
}

async fn wait_terminal(rx: &mut watch::Receiver<SettingStatus>) -> SettingStatus {
	loop {
		let status = rx.borrow_and_update().clone();
		if status != SettingStatus::DownloadingDependencies {
			return status;
		}
		rx.changed().await.unwrap();
	}
}

#[tokio::test]
async fn test_reload_transitions_to_ready() {
	let dir = tempfile::tempdir().unwrap();
	let resolver = Arc::new(OkResolver {
		calls: AtomicUsize::new(0),
	});
	let (provisioner, mut rx) = provisioner(resolver.clone(), &dir.path().join("repo"));

	provisioner.reload(vec![
		Dependency::new("org.example:lib:1.0"),
		Dependency::new("org.example:other:2.0"),
	]);
	assert_eq!(*rx.borrow(), SettingStatus::DownloadingDependencies);

	assert_eq!(wait_terminal(&mut rx).await, SettingStatus::Ready);
	assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
	assert!(dir.path().join("repo").is_dir());
}

#[tokio::test]
async fn test_resolver_failure_surfaces_as_error_status() {
	let dir = tempfile::tempdir().unwrap();
	let (provisioner, mut rx) = provisioner(Arc::new(FailingResolver), dir.path());

	provisioner.reload(vec![Dependency::new("org.example:missing:1.0")]);

	match wait_terminal(&mut rx).await {
		SettingStatus::Error { reason } => {
			assert!(reason.contains("org.example:missing:1.0"), "{reason}");
		}
		other => panic!("expected error status, got {other:?}"),
	}
}

#[tokio::test]
async fn test_newer_reload_supersedes_inflight_one() {
	let dir = tempfile::tempdir().unwrap();
	let entered = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	let gated = Arc::new(GatedResolver {
		entered: entered.clone(),
		release: release.clone(),
	});
	let (provisioner, mut rx) = provisioner(gated, dir.path().join("repo").as_path());

	provisioner.reload(vec![Dependency::new("org.example:slow:1.0")]);
	entered.notified().await;

	// Second reload cancels the first; both resolve after release.
	provisioner.reload(vec![Dependency::new("org.example:fresh:1.0")]);
	release.notify_one();
	release.notify_one();

	assert_eq!(wait_terminal(&mut rx).await, SettingStatus::Ready);

	// Give the superseded task a chance to (incorrectly) publish.
	tokio::task::yield_now().await;
	assert_eq!(*rx.borrow(), SettingStatus::Ready);
}

/// Fails for the gated coordinate once released; succeeds immediately
/// otherwise.
struct GatedFailingResolver {
	entered: Arc<Notify>,
	release: Arc<Notify>,
}

#[async_trait]
impl ArtifactResolver for GatedFailingResolver {
	async fn resolve(&self, coordinate: &str, _exclusions: &[String], _dest: &Path) -> Result<()> {
		if coordinate.contains("slow-fail") {
			self.entered.notify_one();
			self.release.notified().await;
			return Err(Error::Resolve(format!("no such artifact {coordinate}")));
		}
		Ok(())
	}
}

#[tokio::test]
async fn test_superseded_failure_does_not_overwrite_newer_ready() {
	let dir = tempfile::tempdir().unwrap();
	let entered = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	let resolver = Arc::new(GatedFailingResolver {
		entered: entered.clone(),
		release: release.clone(),
	});
	let (provisioner, mut rx) = provisioner(resolver, dir.path().join("repo").as_path());

	provisioner.reload(vec![Dependency::new("org.example:slow-fail:1.0")]);
	entered.notified().await;

	provisioner.reload(vec![Dependency::new("org.example:fresh:1.0")]);
	assert_eq!(wait_terminal(&mut rx).await, SettingStatus::Ready);

	// The stale load now completes with an error; its publish must be
	// dropped rather than overwrite the newer outcome.
	release.notify_one();
	for _ in 0..8 {
		tokio::task::yield_now().await;
	}
	assert_eq!(*rx.borrow(), SettingStatus::Ready);
}

#[tokio::test]
async fn test_empty_dependency_list_still_clears_repo() {
	let dir = tempfile::tempdir().unwrap();
	let repo = dir.path().join("repo");
	tokio::fs::create_dir_all(&repo).await.unwrap();
	tokio::fs::write(repo.join("stale.jar"), b"old").await.unwrap();

	let resolver = Arc::new(OkResolver {
		calls: AtomicUsize::new(0),
	});
	let (provisioner, mut rx) = provisioner(resolver.clone(), &repo);

	provisioner.reload(Vec::new());
	assert_eq!(wait_terminal(&mut rx).await, SettingStatus::Ready);
	assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
	assert!(!repo.join("stale.jar").exists());
}
