//! Interpreter groups: the process-level execution boundary.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::interpreter::LazyInterpreter;
use crate::objects::ObjectRegistry;
use crate::remote::RemoteExecutor;
use crate::Result;

/// A live execution-context boundary for one group key.
///
/// Owns the session map and, for remote settings, the worker process every
/// session in the group shares. Created on first access by the owning
/// [`InterpreterSetting`](crate::InterpreterSetting); destroyed when
/// explicitly closed or when its last session closes.
pub struct InterpreterGroup {
	id: String,
	/// Session key → ordered interpreter list. The lock is held across
	/// session construction so concurrent callers for the same unseen key
	/// never construct twice; construction may include a process spawn,
	/// trading spawn-time concurrency for correctness.
	sessions: Mutex<HashMap<String, Vec<Arc<LazyInterpreter>>>>,
	/// Worker process shared by the group's sessions, initialized on the
	/// first remote session construction.
	process: OnceCell<Arc<dyn RemoteExecutor>>,
	object_registry: Arc<dyn ObjectRegistry>,
}

impl InterpreterGroup {
	pub(crate) fn new(id: impl Into<String>, object_registry: Arc<dyn ObjectRegistry>) -> Self {
		Self {
			id: id.into(),
			sessions: Mutex::new(HashMap::new()),
			process: OnceCell::new(),
			object_registry,
		}
	}

	/// Group key this group was created for.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// The group-scoped registry of shared UI-bound objects.
	pub fn object_registry(&self) -> &Arc<dyn ObjectRegistry> {
		&self.object_registry
	}

	/// Return the session for `session_id`, constructing it with `build`
	/// if unseen. At most one construction runs per session key; a failed
	/// construction leaves no visible state behind.
	pub(crate) async fn get_or_create_session_with<F, Fut>(
		&self,
		session_id: &str,
		build: F,
	) -> Result<Vec<Arc<LazyInterpreter>>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Vec<Arc<LazyInterpreter>>>>,
	{
		let mut sessions = self.sessions.lock().await;
		if let Some(existing) = sessions.get(session_id) {
			return Ok(existing.clone());
		}
		let interpreters = build().await?;
		sessions.insert(session_id.to_string(), interpreters.clone());
		Ok(interpreters)
	}

	/// Look up a session without creating it.
	pub async fn session(&self, session_id: &str) -> Option<Vec<Arc<LazyInterpreter>>> {
		self.sessions.lock().await.get(session_id).cloned()
	}

	/// Number of live sessions.
	pub async fn session_count(&self) -> usize {
		self.sessions.lock().await.len()
	}

	/// The group's worker process, initializing it with `init` on first
	/// use. Only called during remote session construction, i.e. with the
	/// session lock held.
	pub(crate) async fn ensure_process<F, Fut>(&self, init: F) -> Result<Arc<dyn RemoteExecutor>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Arc<dyn RemoteExecutor>>>,
	{
		self.process.get_or_try_init(init).await.cloned()
	}

	/// Close one session, leaving siblings untouched. Returns the number
	/// of sessions remaining.
	pub(crate) async fn close_session(&self, session_id: &str) -> usize {
		let (closed, remaining) = {
			let mut sessions = self.sessions.lock().await;
			let closed = sessions.remove(session_id);
			(closed, sessions.len())
		};
		if let Some(interpreters) = closed {
			info!(group = %self.id, session = %session_id, "closing interpreter session");
			close_all(&interpreters).await;
		}
		remaining
	}

	/// Close every session and shut down the worker process, if any.
	pub(crate) async fn close(&self) {
		let drained: Vec<_> = {
			let mut sessions = self.sessions.lock().await;
			sessions.drain().collect()
		};
		for (session_id, interpreters) in drained {
			info!(group = %self.id, session = %session_id, "closing interpreter session");
			close_all(&interpreters).await;
		}
		if let Some(process) = self.process.get() {
			if let Err(e) = process.shutdown().await {
				warn!(group = %self.id, error = %e, "worker shutdown failed");
			}
		}
	}
}

async fn close_all(interpreters: &[Arc<LazyInterpreter>]) {
	for interpreter in interpreters {
		if let Err(e) = interpreter.close().await {
			warn!(class = %interpreter.class_name(), error = %e, "interpreter close failed");
		}
	}
}

impl std::fmt::Debug for InterpreterGroup {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InterpreterGroup")
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}
