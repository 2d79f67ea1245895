//! Isolation policy for an interpreter setting.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Granularity of a process or session boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationScope {
	/// One boundary shared by every user and note.
	#[default]
	Shared,
	/// One boundary per user.
	PerUser,
	/// One boundary per note.
	PerNote,
	/// One boundary per (user, note) pair.
	PerUserAndNote,
}

impl IsolationScope {
	/// True when the scope keys on the user component.
	pub fn per_user(self) -> bool {
		matches!(self, Self::PerUser | Self::PerUserAndNote)
	}

	/// True when the scope keys on the note component.
	pub fn per_note(self) -> bool {
		matches!(self, Self::PerNote | Self::PerUserAndNote)
	}

	/// True when any isolation is requested at all.
	pub fn isolated(self) -> bool {
		self != Self::Shared
	}
}

/// Connection descriptor for attaching to a pre-existing worker process
/// instead of spawning one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingProcess {
	/// Worker host.
	pub host: String,
	/// Worker port.
	pub port: u16,
}

/// Isolation policy of an interpreter setting.
///
/// Process scope and session scope are evaluated independently when
/// computing keys (see [`crate::keys`]). Every combination is accepted:
///
/// - process `Shared`, session `Shared` — one process, one session;
/// - process `Shared`, session finer — one process, scoped sessions
///   inside it (the classic "scoped" mode);
/// - process finer, session `Shared` — isolated processes, each holding
///   its single session;
/// - both finer — isolated processes with scoped sessions, keyed
///   independently.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterpreterOption {
	/// Execute in an external worker process instead of in-process.
	#[serde(default)]
	pub remote: bool,
	/// Attach to a fixed external worker instead of spawning one. Only
	/// meaningful when `remote` is set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub existing_process: Option<ExistingProcess>,
	/// Process-isolation granularity.
	#[serde(default)]
	pub process_scope: IsolationScope,
	/// Session-isolation granularity.
	#[serde(default)]
	pub session_scope: IsolationScope,
	/// Users allowed to manage this setting. Carried as data for the
	/// (external) permission layer.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub owners: Vec<String>,
}

impl InterpreterOption {
	/// Validate the option at configuration time.
	pub fn validate(&self) -> Result<()> {
		if let Some(existing) = &self.existing_process {
			if !self.remote {
				return Err(Error::Config(
					"existing-process attach requires remote execution".into(),
				));
			}
			if existing.host.is_empty() {
				return Err(Error::Config(
					"existing-process attach requires a host".into(),
				));
			}
			if existing.port == 0 {
				return Err(Error::Config(
					"existing-process attach requires a port".into(),
				));
			}
		}
		Ok(())
	}

	/// True when this setting funnels all traffic into one pre-existing
	/// worker.
	pub fn is_existing_process(&self) -> bool {
		self.existing_process.is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_scope_components() {
		assert!(!IsolationScope::Shared.per_user());
		assert!(IsolationScope::PerUser.per_user());
		assert!(!IsolationScope::PerUser.per_note());
		assert!(IsolationScope::PerUserAndNote.per_user());
		assert!(IsolationScope::PerUserAndNote.per_note());
		assert!(IsolationScope::PerNote.isolated());
	}

	#[test]
	fn test_existing_process_requires_remote_and_endpoint() {
		let mut option = InterpreterOption {
			existing_process: Some(ExistingProcess {
				host: "worker1".into(),
				port: 30_000,
			}),
			..Default::default()
		};
		assert!(option.validate().is_err());

		option.remote = true;
		assert!(option.validate().is_ok());

		option.existing_process = Some(ExistingProcess {
			host: String::new(),
			port: 30_000,
		});
		assert!(option.validate().is_err());
	}

	#[test]
	fn test_all_scope_combinations_accepted() {
		let scopes = [
			IsolationScope::Shared,
			IsolationScope::PerUser,
			IsolationScope::PerNote,
			IsolationScope::PerUserAndNote,
		];
		for process_scope in scopes {
			for session_scope in scopes {
				let option = InterpreterOption {
					process_scope,
					session_scope,
					..Default::default()
				};
				assert!(option.validate().is_ok());
			}
		}
	}
}
