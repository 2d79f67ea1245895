//! Interpreter setting, group and session lifecycle management.
//!
//! A notebook node owns a small set of [`InterpreterSetting`] definitions
//! (e.g. "spark", "python"). Each setting multiplexes into many live,
//! isolated execution contexts, one or more per (user, note) combination,
//! according to a configurable [isolation policy](InterpreterOption):
//!
//! - a **group** is the coarsest boundary, corresponding to one worker
//!   process (remote mode) or one shared plugin context (local mode);
//! - a **session** is an ordered list of interpreter instances inside a
//!   group, one per declared [`InterpreterInfo`], with the default-flagged
//!   entry always first.
//!
//! Execution is offloaded either to a locally constructed plugin instance
//! (see [`plugin`]) or to an external worker process spawned or attached
//! through a [`ProcessSupervisor`] (see [`remote`]). Declared library
//! dependencies are provisioned asynchronously into a setting-local
//! directory before the setting is usable (see [`provision`]).
//!
//! External collaborators (artifact resolution, the remote wire protocol,
//! plugin loading, UI object registries) are consumed as capability traits
//! and never implemented here.

use std::io;

mod config;
mod dependency;
mod group;
mod interpreter;
mod keys;
mod objects;
mod option;
mod plugin;
mod property;
mod provision;
mod remote;
mod setting;
mod spawn_env;

pub use config::EngineConfig;
pub use dependency::{ArtifactResolver, Dependency};
pub use group::InterpreterGroup;
pub use interpreter::{ExecutionOutcome, ExecutionStatus, Interpreter, LazyInterpreter};
pub use keys::{group_key, session_key};
pub use objects::{
	LocalObjectRegistry, LocalRegistryFactory, NoOpListener, ObjectRegistry,
	ObjectRegistryFactory, ObjectRegistryListener,
};
pub use option::{ExistingProcess, InterpreterOption, IsolationScope};
pub use plugin::{InterpreterCtor, PluginContext, PluginLoader, StaticPluginLoader};
pub use property::{Properties, PropertyValue, flatten, properties_from_json};
pub use provision::SettingStatus;
pub use remote::{ProcessSupervisor, RemoteExecutor, RemoteInterpreter, SpawnConfig};
pub use setting::{InterpreterInfo, InterpreterSetting, SettingBuilder};
pub use spawn_env::{spawn_environment, to_shell_format};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Constructing a local interpreter instance failed. Covers missing
	/// plugin classes, constructor failures and context-load failures as a
	/// single kind; the underlying cause is carried in `reason`.
	#[error("failed to construct interpreter `{class}`: {reason}")]
	Construction {
		/// Declared class identifier of the interpreter.
		class: String,
		/// Underlying cause.
		reason: String,
	},
	/// A required derived property is missing or contradictory.
	#[error("configuration error: {0}")]
	Config(String),
	/// Spawning or attaching to a worker process failed.
	#[error("failed to launch interpreter process: {0}")]
	Launch(String),
	/// A remote worker call failed.
	#[error("remote interpreter call failed: {0}")]
	Remote(String),
	/// A dependency artifact could not be resolved.
	#[error("dependency resolution failed: {0}")]
	Resolve(String),
	/// Input/output errors from the local filesystem.
	#[error(transparent)]
	Io(#[from] io::Error),
}
