//! Node-level configuration consumed by interpreter settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration shared by every interpreter setting on this node.
///
/// Loaded by the (external) configuration layer and handed to
/// [`SettingBuilder`](crate::SettingBuilder); every field has a default so
/// partial definitions deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
	/// Installation root, used as the fallback base for bundled runtimes.
	#[serde(default = "default_home")]
	pub home: PathBuf,
	/// Directory holding node configuration files shipped to workers.
	#[serde(default = "default_conf_dir")]
	pub conf_dir: PathBuf,
	/// Root of the per-setting local artifact repositories. Setting `id`
	/// is appended to scope downloads per setting.
	#[serde(default = "default_local_repo")]
	pub local_repo: PathBuf,
	/// Default launcher script for spawned worker processes, used when a
	/// setting does not declare its own runner.
	#[serde(default = "default_runner_path")]
	pub remote_runner_path: PathBuf,
	/// Inclusive port range workers may use to call back into this node.
	/// `(0, 0)` lets the OS pick.
	#[serde(default)]
	pub callback_port_range: (u16, u16),
	/// Timeout for connecting to a worker process, in milliseconds.
	#[serde(default = "default_connect_timeout_ms")]
	pub connect_timeout_ms: u64,
	/// Output truncation limit injected into launch properties.
	#[serde(default = "default_output_limit")]
	pub output_limit: u64,
	/// Scheduler pool size injected into launch properties.
	#[serde(default = "default_max_pool_size")]
	pub max_pool_size: u32,
}

fn default_home() -> PathBuf {
	PathBuf::from(".")
}

fn default_conf_dir() -> PathBuf {
	PathBuf::from("conf")
}

fn default_local_repo() -> PathBuf {
	PathBuf::from("local-repo")
}

fn default_runner_path() -> PathBuf {
	PathBuf::from("bin/interpreter.sh")
}

/// Returns the default worker connect timeout in milliseconds.
fn default_connect_timeout_ms() -> u64 {
	30_000
}

fn default_output_limit() -> u64 {
	102_400
}

fn default_max_pool_size() -> u32 {
	10
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			home: default_home(),
			conf_dir: default_conf_dir(),
			local_repo: default_local_repo(),
			remote_runner_path: default_runner_path(),
			callback_port_range: (0, 0),
			connect_timeout_ms: default_connect_timeout_ms(),
			output_limit: default_output_limit(),
			max_pool_size: default_max_pool_size(),
		}
	}
}
