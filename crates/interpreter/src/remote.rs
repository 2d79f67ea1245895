//! Remote execution: worker processes and interpreter proxies.
//!
//! Spawning, attaching and the wire protocol all live outside this crate.
//! The [`ProcessSupervisor`] capability yields a [`RemoteExecutor`] — an
//! opaque, possibly not-yet-connected handle to the worker's interpreter
//! pool — and [`RemoteInterpreter`] narrows it to one (session, class)
//! pair behind the [`Interpreter`] trait.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::interpreter::{ExecutionOutcome, Interpreter};
use crate::Result;

/// Configuration for spawning a worker process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
	/// Launcher script to run.
	pub runner_path: PathBuf,
	/// Environment handed to the launcher, derived from the flattened
	/// property set (see [`crate::spawn_environment`]).
	pub env: HashMap<String, String>,
	/// Working directory, normally the setting's interpreter directory.
	pub work_dir: PathBuf,
	/// Setting-scoped local artifact repository made visible to the worker.
	pub local_repo: PathBuf,
	/// Inclusive port range the worker may use to call back.
	pub callback_port_range: (u16, u16),
	/// Connect timeout, passed through to the supervisor unmodified.
	pub connect_timeout: Duration,
	/// Template family of the owning setting, for diagnostics.
	pub family: String,
}

impl SpawnConfig {
	/// Create a spawn configuration for a launcher.
	pub fn new(runner_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
		Self {
			runner_path: runner_path.into(),
			env: HashMap::new(),
			work_dir: work_dir.into(),
			local_repo: PathBuf::new(),
			callback_port_range: (0, 0),
			connect_timeout: Duration::from_secs(30),
			family: String::new(),
		}
	}

	/// Set the spawn environment.
	pub fn env(mut self, env: HashMap<String, String>) -> Self {
		self.env = env;
		self
	}

	/// Set the setting-scoped local artifact repository.
	pub fn local_repo(mut self, local_repo: impl Into<PathBuf>) -> Self {
		self.local_repo = local_repo.into();
		self
	}

	/// Set the callback port range.
	pub fn callback_port_range(mut self, range: (u16, u16)) -> Self {
		self.callback_port_range = range;
		self
	}

	/// Set the connect timeout.
	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	/// Set the owning setting's template family.
	pub fn family(mut self, family: impl Into<String>) -> Self {
		self.family = family.into();
		self
	}
}

/// Capability supervising external worker processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
	/// Spawn a new worker process.
	async fn spawn(&self, config: SpawnConfig) -> Result<Arc<dyn RemoteExecutor>>;

	/// Attach to a pre-existing worker at `host:port`.
	async fn attach(
		&self,
		host: &str,
		port: u16,
		connect_timeout: Duration,
	) -> Result<Arc<dyn RemoteExecutor>>;
}

/// Opaque handle to a worker's interpreter pool.
///
/// Connection and handshake timing are the implementor's concern; the
/// handle may be returned before the worker is reachable.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
	/// Initialize the interpreter for (session, class) on the worker.
	async fn open(
		&self,
		session_id: &str,
		class_name: &str,
		properties: &HashMap<String, String>,
	) -> Result<()>;

	/// Execute code in the interpreter for (session, class).
	async fn execute(
		&self,
		session_id: &str,
		class_name: &str,
		code: &str,
	) -> Result<ExecutionOutcome>;

	/// Cancel the running execution for (session, class).
	async fn cancel(&self, session_id: &str, class_name: &str) -> Result<()>;

	/// Close the interpreter for (session, class).
	async fn close(&self, session_id: &str, class_name: &str) -> Result<()>;

	/// Shut the worker process down. Called when the owning group closes.
	async fn shutdown(&self) -> Result<()>;
}

/// Proxy to one (session, class) pair on a remote worker.
pub struct RemoteInterpreter {
	executor: Arc<dyn RemoteExecutor>,
	session_id: String,
	class_name: String,
	user: String,
	properties: HashMap<String, String>,
}

impl RemoteInterpreter {
	/// Create a proxy bound to an executor.
	pub fn new(
		executor: Arc<dyn RemoteExecutor>,
		session_id: impl Into<String>,
		class_name: impl Into<String>,
		user: impl Into<String>,
		properties: HashMap<String, String>,
	) -> Self {
		Self {
			executor,
			session_id: session_id.into(),
			class_name: class_name.into(),
			user: user.into(),
			properties,
		}
	}

	/// User this proxy was created for.
	pub fn user(&self) -> &str {
		&self.user
	}
}

#[async_trait]
impl Interpreter for RemoteInterpreter {
	fn class_name(&self) -> &str {
		&self.class_name
	}

	async fn open(&self) -> Result<()> {
		self.executor
			.open(&self.session_id, &self.class_name, &self.properties)
			.await
	}

	async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
		self.executor
			.execute(&self.session_id, &self.class_name, code)
			.await
	}

	async fn cancel(&self) -> Result<()> {
		self.executor.cancel(&self.session_id, &self.class_name).await
	}

	async fn close(&self) -> Result<()> {
		self.executor.close(&self.session_id, &self.class_name).await
	}
}
