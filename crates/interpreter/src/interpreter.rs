//! The interpreter capability and its lazy-open wrapper.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::Result;

/// Outcome classification of one code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
	/// Execution completed normally.
	Success,
	/// Execution failed; output carries the message.
	Error,
	/// The submitted code is incomplete and more input is expected.
	Incomplete,
}

/// Result of one code execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
	/// Outcome classification.
	pub status: ExecutionStatus,
	/// Captured output (possibly truncated by the worker).
	pub output: String,
}

impl ExecutionOutcome {
	/// A successful outcome with the given output.
	pub fn success(output: impl Into<String>) -> Self {
		Self {
			status: ExecutionStatus::Success,
			output: output.into(),
		}
	}

	/// A failed outcome with the given message.
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			status: ExecutionStatus::Error,
			output: message.into(),
		}
	}
}

/// One executable capability bound to a declared class.
///
/// Implemented by local plugin instances and by [`RemoteInterpreter`]
/// proxies alike; session construction wraps every instance in a
/// [`LazyInterpreter`] so `open` is deferred to first use.
///
/// [`RemoteInterpreter`]: crate::RemoteInterpreter
#[async_trait]
pub trait Interpreter: Send + Sync {
	/// Declared class identifier this instance was constructed for.
	fn class_name(&self) -> &str;

	/// Initialize the interpreter. Called at most once before the first
	/// execution (and again after a `close`/reuse cycle).
	async fn open(&self) -> Result<()>;

	/// Execute a snippet of code.
	async fn execute(&self, code: &str) -> Result<ExecutionOutcome>;

	/// Cancel the running execution, if any.
	async fn cancel(&self) -> Result<()>;

	/// Release the interpreter's resources.
	async fn close(&self) -> Result<()>;
}

/// Wrapper deferring initialization until first use.
///
/// Multiple callers may hold the wrapper before it is opened; the open
/// call runs at most once. `close` resets the wrapper so a later use
/// reopens, and `cancel`/`close` before the first open are no-ops.
pub struct LazyInterpreter {
	inner: Box<dyn Interpreter>,
	opened: Mutex<bool>,
}

impl LazyInterpreter {
	/// Wrap an interpreter instance.
	pub fn new(inner: Box<dyn Interpreter>) -> Self {
		Self {
			inner,
			opened: Mutex::new(false),
		}
	}

	/// Declared class identifier of the wrapped instance.
	pub fn class_name(&self) -> &str {
		self.inner.class_name()
	}

	/// True once the wrapped instance has been opened and not yet closed.
	pub async fn is_open(&self) -> bool {
		*self.opened.lock().await
	}

	async fn ensure_open(&self) -> Result<()> {
		let mut opened = self.opened.lock().await;
		if !*opened {
			self.inner.open().await?;
			*opened = true;
		}
		Ok(())
	}

	/// Execute a snippet, opening the interpreter first if needed.
	pub async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
		self.ensure_open().await?;
		self.inner.execute(code).await
	}

	/// Cancel the running execution. A no-op before the first open.
	pub async fn cancel(&self) -> Result<()> {
		if !self.is_open().await {
			return Ok(());
		}
		self.inner.cancel().await
	}

	/// Close the wrapped instance if it was opened.
	pub async fn close(&self) -> Result<()> {
		let mut opened = self.opened.lock().await;
		if *opened {
			self.inner.close().await?;
			*opened = false;
		}
		Ok(())
	}
}

impl std::fmt::Debug for LazyInterpreter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LazyInterpreter")
			.field("class_name", &self.class_name())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[derive(Default)]
	struct CountingInterpreter {
		opens: AtomicUsize,
		closes: AtomicUsize,
		cancels: AtomicUsize,
	}

	#[async_trait]
	impl Interpreter for Arc<CountingInterpreter> {
		fn class_name(&self) -> &str {
			"test.Counting"
		}

		async fn open(&self) -> Result<()> {
			self.opens.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
			Ok(ExecutionOutcome::success(code))
		}

		async fn cancel(&self) -> Result<()> {
			self.cancels.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn close(&self) -> Result<()> {
			self.closes.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_open_runs_at_most_once() {
		let counter = Arc::new(CountingInterpreter::default());
		let lazy = Arc::new(LazyInterpreter::new(Box::new(counter.clone())));

		let mut tasks = Vec::new();
		for _ in 0..16 {
			let lazy = lazy.clone();
			tasks.push(tokio::spawn(async move { lazy.execute("1 + 1").await }));
		}
		for task in tasks {
			assert!(task.await.unwrap().is_ok());
		}
		assert_eq!(counter.opens.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_cancel_and_close_before_open_are_noops() {
		let counter = Arc::new(CountingInterpreter::default());
		let lazy = LazyInterpreter::new(Box::new(counter.clone()));

		lazy.cancel().await.unwrap();
		lazy.close().await.unwrap();
		assert_eq!(counter.cancels.load(Ordering::SeqCst), 0);
		assert_eq!(counter.closes.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_close_resets_for_reopen() {
		let counter = Arc::new(CountingInterpreter::default());
		let lazy = LazyInterpreter::new(Box::new(counter.clone()));

		lazy.execute("a").await.unwrap();
		lazy.close().await.unwrap();
		assert!(!lazy.is_open().await);

		lazy.execute("b").await.unwrap();
		assert_eq!(counter.opens.load(Ordering::SeqCst), 2);
		assert_eq!(counter.closes.load(Ordering::SeqCst), 1);
	}
}
