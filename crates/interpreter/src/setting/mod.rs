//! Interpreter settings: the top-level lifecycle entity.
//!
//! A setting owns its group registry and fans (user, note) execution
//! requests out to concrete interpreter instances according to its
//! isolation policy. Group-registry membership is guarded by a
//! reader/writer lock — lookups share, creation and removal exclude —
//! while each group synchronizes its own session map independently, so
//! work inside two different groups never contends.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::info;

use crate::config::EngineConfig;
use crate::dependency::{ArtifactResolver, Dependency};
use crate::group::InterpreterGroup;
use crate::interpreter::{Interpreter, LazyInterpreter};
use crate::keys::{group_key, session_key};
use crate::objects::{ObjectRegistryFactory, ObjectRegistryListener};
use crate::option::InterpreterOption;
use crate::plugin::{PluginContext, PluginLoader};
use crate::property::{self, Properties, PropertyValue};
use crate::provision::{Provisioner, SettingStatus};
use crate::remote::{ProcessSupervisor, RemoteExecutor, RemoteInterpreter, SpawnConfig};
use crate::spawn_env::spawn_environment;
use crate::{Error, Result};

/// One interpreter declared by a setting: a binding name as typed in
/// notes (e.g. `%sql`), the class identifier constructed for it, and UI
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterInfo {
	/// Binding name used in notes.
	pub name: String,
	/// Declared class identifier.
	pub class_name: String,
	/// Place this interpreter first in constructed sessions.
	#[serde(default)]
	pub default_interpreter: bool,
	/// Editor hints for the UI.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub editor: Option<Value>,
}

impl InterpreterInfo {
	/// Declare an interpreter binding.
	pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			class_name: class_name.into(),
			default_interpreter: false,
			editor: None,
		}
	}

	/// Mark as the session default.
	pub fn default_interpreter(mut self, default: bool) -> Self {
		self.default_interpreter = default;
		self
	}

	/// Attach editor hints.
	pub fn editor(mut self, editor: Value) -> Self {
		self.editor = Some(editor);
		self
	}
}

/// Editor hints used when an interpreter declares none.
fn default_editor() -> Value {
	json!({"language": "text", "editOnDblClick": false})
}

/// Generated setting identity. Never reused, even across copies derived
/// from a template.
fn generate_id() -> String {
	let hex = uuid::Uuid::new_v4().simple().to_string();
	hex[..9].to_ascii_uppercase()
}

/// A named, configured template for producing execution contexts.
///
/// Constructed through [`InterpreterSetting::builder`]; shared as
/// `Arc<InterpreterSetting>` between the request paths and the UI layer.
pub struct InterpreterSetting {
	id: String,
	name: String,
	/// Template family this setting was created from (e.g. "spark").
	family: String,
	interpreter_dir: PathBuf,
	/// Setting-specific launcher, overriding the configured default.
	runner_path: Option<PathBuf>,
	config: EngineConfig,

	properties: RwLock<Properties>,
	dependencies: RwLock<Vec<Dependency>>,
	option: RwLock<InterpreterOption>,
	infos: RwLock<Vec<InterpreterInfo>>,

	/// Group key → live group. Membership only; group internals have
	/// their own synchronization.
	groups: RwLock<HashMap<String, Arc<InterpreterGroup>>>,
	/// Plugin contexts cached per interpreter directory. Append-only for
	/// the setting's lifetime; contexts are never evicted while instances
	/// may reference them.
	plugin_contexts: RwLock<HashMap<PathBuf, Arc<dyn PluginContext>>>,
	/// Note id → paragraph ids with runtime annotations to clear on
	/// restart.
	runtime_infos: Mutex<HashMap<String, HashSet<String>>>,

	status_rx: watch::Receiver<SettingStatus>,
	provisioner: Arc<Provisioner>,
	loader: Option<Arc<dyn PluginLoader>>,
	supervisor: Option<Arc<dyn ProcessSupervisor>>,
	registry_factory: Arc<dyn ObjectRegistryFactory>,
	registry_listener: Arc<dyn ObjectRegistryListener>,
}

impl InterpreterSetting {
	/// Start building a setting for a template family.
	pub fn builder(name: impl Into<String>, family: impl Into<String>) -> SettingBuilder {
		SettingBuilder::new(name, family)
	}

	/// Unique identity of this setting.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Display name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Template family this setting derives from.
	pub fn family(&self) -> &str {
		&self.family
	}

	/// Directory holding this setting's interpreter plugin.
	pub fn interpreter_dir(&self) -> &Path {
		&self.interpreter_dir
	}

	/// Node configuration this setting operates under.
	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Current isolation policy.
	pub fn option(&self) -> InterpreterOption {
		self.option.read().clone()
	}

	/// Replace the isolation policy. Takes effect for groups and sessions
	/// created afterwards.
	pub fn set_option(&self, option: InterpreterOption) -> Result<()> {
		option.validate()?;
		*self.option.write() = option;
		Ok(())
	}

	/// Snapshot of the normalized properties.
	pub fn properties(&self) -> Properties {
		self.properties.read().clone()
	}

	/// Replace the property set.
	pub fn set_properties(&self, properties: Properties) {
		*self.properties.write() = properties;
	}

	/// Set one property.
	pub fn set_property(&self, name: impl Into<String>, value: PropertyValue) {
		self.properties.write().insert(name.into(), value);
	}

	/// Snapshot of the declared dependencies.
	pub fn dependencies(&self) -> Vec<Dependency> {
		self.dependencies.read().clone()
	}

	/// Replace the dependency list and provision it in the background.
	///
	/// Must be called from within a Tokio runtime; provisioning runs as a
	/// spawned task on it.
	pub fn set_dependencies(&self, dependencies: Vec<Dependency>) {
		*self.dependencies.write() = dependencies.clone();
		self.provisioner.reload(dependencies);
	}

	/// Append dependencies (skipping structurally equal duplicates) and
	/// provision the resulting list in the background.
	///
	/// Must be called from within a Tokio runtime; provisioning runs as a
	/// spawned task on it.
	pub fn append_dependencies(&self, dependencies: Vec<Dependency>) {
		let merged = {
			let mut current = self.dependencies.write();
			for dependency in dependencies {
				if !current.contains(&dependency) {
					current.push(dependency);
				}
			}
			current.clone()
		};
		self.provisioner.reload(merged);
	}

	/// Declared interpreter bindings.
	pub fn infos(&self) -> Vec<InterpreterInfo> {
		self.infos.read().clone()
	}

	/// Replace the declared interpreter bindings. Affects sessions
	/// constructed afterwards.
	pub fn set_infos(&self, infos: Vec<InterpreterInfo>) {
		*self.infos.write() = infos;
	}

	/// Current lifecycle status.
	pub fn status(&self) -> SettingStatus {
		self.status_rx.borrow().clone()
	}

	/// Reason of the last provisioning failure, if the setting is in the
	/// error state.
	pub fn error_reason(&self) -> Option<String> {
		match self.status() {
			SettingStatus::Error { reason } => Some(reason),
			_ => None,
		}
	}

	/// Subscribe to status transitions.
	pub fn subscribe_status(&self) -> watch::Receiver<SettingStatus> {
		self.status_rx.clone()
	}

	/// Editor hints for a declared class, falling back to the default
	/// editor when the class declares none (or is unknown).
	pub fn editor_for_class(&self, class_name: &str) -> Value {
		for info in self.infos.read().iter() {
			if info.class_name == class_name {
				if let Some(editor) = &info.editor {
					return editor.clone();
				}
				break;
			}
		}
		default_editor()
	}

	/// Setting-scoped local artifact repository.
	pub fn local_repo(&self) -> PathBuf {
		self.config.local_repo.join(&self.id)
	}

	/// Flattened properties handed to constructed interpreters and spawn
	/// environments, with node-level defaults injected when absent.
	pub fn launch_properties(&self) -> HashMap<String, String> {
		let mut flat = property::flatten(&self.properties.read());
		flat.entry("folio.interpreter.output.limit".into())
			.or_insert_with(|| self.config.output_limit.to_string());
		flat.entry("folio.interpreter.max.poolsize".into())
			.or_insert_with(|| self.config.max_pool_size.to_string());
		flat.insert(
			"folio.interpreter.local.repo".into(),
			self.local_repo().display().to_string(),
		);
		flat
	}

	fn interpreter_group_id(&self, user: &str, note: &str) -> String {
		group_key(&self.id, user, note, &self.option.read())
	}

	fn interpreter_session_id(&self, user: &str, note: &str) -> String {
		session_key(user, note, &self.option.read())
	}

	/// Return the group for (user, note), creating it if absent.
	///
	/// The fast path is a shared-mode lookup; creation takes the
	/// exclusive lock and re-checks before inserting, so concurrent
	/// callers for the same key observe exactly one group.
	pub fn get_or_create_interpreter_group(
		&self,
		user: &str,
		note: &str,
	) -> Result<Arc<InterpreterGroup>> {
		let group_id = self.interpreter_group_id(user, note);
		if let Some(group) = self.groups.read().get(&group_id) {
			return Ok(group.clone());
		}

		let mut groups = self.groups.write();
		if let Some(group) = groups.get(&group_id) {
			return Ok(group.clone());
		}
		info!(group = %group_id, %user, %note, "creating interpreter group");
		let group = self.create_interpreter_group(&group_id)?;
		groups.insert(group_id, group.clone());
		Ok(group)
	}

	fn create_interpreter_group(&self, group_id: &str) -> Result<Arc<InterpreterGroup>> {
		let listener = Arc::clone(&self.registry_listener);
		let object_registry = if self.option.read().remote {
			self.registry_factory.create_remote(group_id, listener)?
		} else {
			self.registry_factory.create_local(&self.id, listener)?
		};
		Ok(Arc::new(InterpreterGroup::new(group_id, object_registry)))
	}

	/// Look up the group for (user, note) without creating it.
	pub fn interpreter_group(&self, user: &str, note: &str) -> Option<Arc<InterpreterGroup>> {
		let group_id = self.interpreter_group_id(user, note);
		self.groups.read().get(&group_id).cloned()
	}

	/// Look up a group by its key without creating it.
	pub fn interpreter_group_by_id(&self, group_id: &str) -> Option<Arc<InterpreterGroup>> {
		self.groups.read().get(group_id).cloned()
	}

	/// Snapshot of every live group.
	pub fn all_interpreter_groups(&self) -> Vec<Arc<InterpreterGroup>> {
		self.groups.read().values().cloned().collect()
	}

	async fn get_or_create_session(
		&self,
		user: &str,
		note: &str,
	) -> Result<Vec<Arc<LazyInterpreter>>> {
		let group = self.get_or_create_interpreter_group(user, note)?;
		let session_id = self.interpreter_session_id(user, note);
		group
			.get_or_create_session_with(&session_id, || {
				self.create_interpreters(&group, user, &session_id)
			})
			.await
	}

	/// The session's default interpreter for (user, note), creating the
	/// group and session as needed.
	pub async fn get_default_interpreter(
		&self,
		user: &str,
		note: &str,
	) -> Result<Arc<LazyInterpreter>> {
		let session = self.get_or_create_session(user, note).await?;
		session.into_iter().next().ok_or_else(|| {
			Error::Config(format!(
				"interpreter setting `{}` declares no interpreters",
				self.name
			))
		})
	}

	/// The interpreter bound to `repl_name` for (user, note), or `None`
	/// when the name is not declared by this setting.
	pub async fn get_interpreter(
		&self,
		user: &str,
		note: &str,
		repl_name: &str,
	) -> Result<Option<Arc<LazyInterpreter>>> {
		let Some(class_name) = self.interpreter_class_for(repl_name) else {
			return Ok(None);
		};
		let session = self.get_or_create_session(user, note).await?;
		Ok(session
			.into_iter()
			.find(|interpreter| interpreter.class_name() == class_name))
	}

	/// Resolve a binding name to its declared class identifier.
	pub fn interpreter_class_for(&self, repl_name: &str) -> Option<String> {
		self.infos
			.read()
			.iter()
			.find(|info| info.name == repl_name)
			.map(|info| info.class_name.clone())
	}

	// The only place interpreters are created. One session is always
	// created whole: one instance per declared binding, default first.
	async fn create_interpreters(
		&self,
		group: &InterpreterGroup,
		user: &str,
		session_id: &str,
	) -> Result<Vec<Arc<LazyInterpreter>>> {
		let infos = self.infos.read().clone();
		let remote = self.option.read().remote;
		let properties = self.launch_properties();

		let mut session: Vec<Arc<LazyInterpreter>> = Vec::with_capacity(infos.len());
		for info in &infos {
			let interpreter: Box<dyn Interpreter> = if remote {
				let executor = group.ensure_process(|| self.create_worker()).await?;
				Box::new(RemoteInterpreter::new(
					executor,
					session_id,
					&info.class_name,
					user,
					properties.clone(),
				))
			} else {
				self.create_local_interpreter(&info.class_name, &properties)?
			};
			let wrapped = Arc::new(LazyInterpreter::new(interpreter));
			if info.default_interpreter {
				session.insert(0, wrapped);
			} else {
				session.push(wrapped);
			}
			info!(class = %info.class_name, %user, session = %session_id, "interpreter created");
		}
		Ok(session)
	}

	fn create_local_interpreter(
		&self,
		class_name: &str,
		properties: &HashMap<String, String>,
	) -> Result<Box<dyn Interpreter>> {
		let loader = self
			.loader
			.as_ref()
			.ok_or_else(|| Error::Config("no plugin loader configured".into()))?;

		// A class visible in the process-wide set is constructed directly;
		// opening a directory context for it would duplicate the plugin.
		if let Some(ctor) = loader.for_name(class_name) {
			return ctor(properties).map_err(|e| as_construction_failure(class_name, e));
		}

		let context = self.plugin_context(loader.as_ref(), class_name)?;
		context
			.construct(class_name, properties)
			.map_err(|e| as_construction_failure(class_name, e))
	}

	fn plugin_context(
		&self,
		loader: &dyn PluginLoader,
		class_name: &str,
	) -> Result<Arc<dyn PluginContext>> {
		if let Some(context) = self.plugin_contexts.read().get(&self.interpreter_dir) {
			return Ok(context.clone());
		}
		let mut contexts = self.plugin_contexts.write();
		if let Some(context) = contexts.get(&self.interpreter_dir) {
			return Ok(context.clone());
		}
		let context = loader
			.open_context(&self.interpreter_dir)
			.map_err(|e| as_construction_failure(class_name, e))?;
		contexts.insert(self.interpreter_dir.clone(), context.clone());
		Ok(context)
	}

	async fn create_worker(&self) -> Result<Arc<dyn RemoteExecutor>> {
		let option = self.option.read().clone();
		let supervisor = self
			.supervisor
			.clone()
			.ok_or_else(|| Error::Config("no process supervisor configured".into()))?;
		let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

		if let Some(existing) = option.existing_process {
			return supervisor
				.attach(&existing.host, existing.port, connect_timeout)
				.await;
		}

		let properties = self.launch_properties();
		let spark_home = std::env::var_os("SPARK_HOME").map(PathBuf::from);
		let env = spawn_environment(
			&properties,
			&self.config.conf_dir,
			&self.config.home,
			spark_home.as_deref(),
		)?;
		let runner = self
			.runner_path
			.clone()
			.unwrap_or_else(|| self.config.remote_runner_path.clone());
		let spawn = SpawnConfig::new(runner, &self.interpreter_dir)
			.env(env)
			.local_repo(self.local_repo())
			.callback_port_range(self.config.callback_port_range)
			.connect_timeout(connect_timeout)
			.family(&self.family);
		supervisor.spawn(spawn).await
	}

	/// Close the session for (user, note), leaving sibling sessions
	/// untouched. The group is removed from the registry and fully closed
	/// when its last session goes.
	pub async fn close_interpreters(&self, user: &str, note: &str) {
		let Some(group) = self.interpreter_group(user, note) else {
			return;
		};
		let session_id = self.interpreter_session_id(user, note);
		let remaining = group.close_session(&session_id).await;
		if remaining == 0 {
			self.groups.write().remove(group.id());
			group.close().await;
		}
	}

	/// Close every group and clear the registry and runtime-annotation
	/// bookkeeping.
	pub async fn close(&self) {
		info!(name = %self.name, "closing interpreter setting");
		let groups: Vec<_> = {
			let mut groups = self.groups.write();
			groups.drain().map(|(_, group)| group).collect()
		};
		for group in groups {
			group.close().await;
		}
		self.runtime_infos.lock().clear();
	}

	/// Record that a paragraph carries runtime annotations produced by
	/// this setting, to be cleared when the setting restarts.
	pub fn add_note_paragraph(&self, note: impl Into<String>, paragraph: impl Into<String>) {
		self.runtime_infos
			.lock()
			.entry(note.into())
			.or_default()
			.insert(paragraph.into());
	}

	/// Drain the runtime-annotation bookkeeping.
	pub fn take_runtime_infos(&self) -> HashMap<String, HashSet<String>> {
		std::mem::take(&mut *self.runtime_infos.lock())
	}

	/// Derive a new setting from this one as a template. The copy shares
	/// configuration and declarations but receives a fresh identity and
	/// empty runtime state.
	pub fn from_template(&self, name: impl Into<String>) -> Result<Arc<Self>> {
		let mut builder = Self::builder(name, self.family.clone())
			.config(self.config.clone())
			.interpreter_dir(self.interpreter_dir.clone())
			.properties(self.properties())
			.dependencies(self.dependencies())
			.option(self.option())
			.infos(self.infos())
			.resolver(self.provisioner.resolver())
			.registry_factory(Arc::clone(&self.registry_factory))
			.registry_listener(Arc::clone(&self.registry_listener));
		if let Some(runner) = &self.runner_path {
			builder = builder.runner_path(runner.clone());
		}
		if let Some(loader) = &self.loader {
			builder = builder.plugin_loader(Arc::clone(loader));
		}
		if let Some(supervisor) = &self.supervisor {
			builder = builder.process_supervisor(Arc::clone(supervisor));
		}
		builder.build()
	}
}

impl std::fmt::Debug for InterpreterSetting {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InterpreterSetting")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("family", &self.family)
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}

fn as_construction_failure(class_name: &str, error: Error) -> Error {
	match error {
		already @ Error::Construction { .. } => already,
		other => Error::Construction {
			class: class_name.to_string(),
			reason: other.to_string(),
		},
	}
}

/// Builder for [`InterpreterSetting`].
pub struct SettingBuilder {
	name: String,
	family: String,
	interpreter_dir: Option<PathBuf>,
	runner_path: Option<PathBuf>,
	config: EngineConfig,
	properties: Properties,
	dependencies: Vec<Dependency>,
	option: InterpreterOption,
	infos: Vec<InterpreterInfo>,
	resolver: Option<Arc<dyn ArtifactResolver>>,
	loader: Option<Arc<dyn PluginLoader>>,
	supervisor: Option<Arc<dyn ProcessSupervisor>>,
	registry_factory: Option<Arc<dyn ObjectRegistryFactory>>,
	registry_listener: Option<Arc<dyn ObjectRegistryListener>>,
}

impl SettingBuilder {
	fn new(name: impl Into<String>, family: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			family: family.into(),
			interpreter_dir: None,
			runner_path: None,
			config: EngineConfig::default(),
			properties: Properties::new(),
			dependencies: Vec::new(),
			option: InterpreterOption::default(),
			infos: Vec::new(),
			resolver: None,
			loader: None,
			supervisor: None,
			registry_factory: None,
			registry_listener: None,
		}
	}

	/// Node configuration. Defaults to [`EngineConfig::default`].
	pub fn config(mut self, config: EngineConfig) -> Self {
		self.config = config;
		self
	}

	/// Directory holding the interpreter plugin. Defaults to
	/// `interpreter/<family>`.
	pub fn interpreter_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.interpreter_dir = Some(dir.into());
		self
	}

	/// Setting-specific launcher script for spawned workers.
	pub fn runner_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.runner_path = Some(path.into());
		self
	}

	/// Initial normalized properties.
	pub fn properties(mut self, properties: Properties) -> Self {
		self.properties = properties;
		self
	}

	/// Initial dependency list. Provisioning is not triggered at build;
	/// call [`InterpreterSetting::set_dependencies`] to provision.
	pub fn dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
		self.dependencies = dependencies;
		self
	}

	/// Isolation policy.
	pub fn option(mut self, option: InterpreterOption) -> Self {
		self.option = option;
		self
	}

	/// Declared interpreter bindings.
	pub fn infos(mut self, infos: Vec<InterpreterInfo>) -> Self {
		self.infos = infos;
		self
	}

	/// Artifact resolver capability (required).
	pub fn resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
		self.resolver = Some(resolver);
		self
	}

	/// Plugin loader capability, required for local execution.
	pub fn plugin_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
		self.loader = Some(loader);
		self
	}

	/// Process supervisor capability, required for remote execution.
	pub fn process_supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
		self.supervisor = Some(supervisor);
		self
	}

	/// Object-registry factory. Defaults to the in-process
	/// [`LocalRegistryFactory`](crate::LocalRegistryFactory).
	pub fn registry_factory(mut self, factory: Arc<dyn ObjectRegistryFactory>) -> Self {
		self.registry_factory = Some(factory);
		self
	}

	/// Object-registry listener. Defaults to a listener discarding all
	/// events.
	pub fn registry_listener(mut self, listener: Arc<dyn ObjectRegistryListener>) -> Self {
		self.registry_listener = Some(listener);
		self
	}

	/// Validate the configuration and build the setting.
	pub fn build(self) -> Result<Arc<InterpreterSetting>> {
		self.option.validate()?;
		let resolver = self
			.resolver
			.ok_or_else(|| Error::Config("an artifact resolver is required".into()))?;

		let id = generate_id();
		let interpreter_dir = self
			.interpreter_dir
			.unwrap_or_else(|| Path::new("interpreter").join(&self.family));
		let local_repo = self.config.local_repo.join(&id);

		let (status_tx, status_rx) = watch::channel(SettingStatus::Ready);
		let provisioner = Arc::new(Provisioner::new(resolver, local_repo, status_tx));

		Ok(Arc::new(InterpreterSetting {
			id,
			name: self.name,
			family: self.family,
			interpreter_dir,
			runner_path: self.runner_path,
			config: self.config,
			properties: RwLock::new(self.properties),
			dependencies: RwLock::new(self.dependencies),
			option: RwLock::new(self.option),
			infos: RwLock::new(self.infos),
			groups: RwLock::new(HashMap::new()),
			plugin_contexts: RwLock::new(HashMap::new()),
			runtime_infos: Mutex::new(HashMap::new()),
			status_rx,
			provisioner,
			loader: self.loader,
			supervisor: self.supervisor,
			registry_factory: self
				.registry_factory
				.unwrap_or_else(|| Arc::new(crate::objects::LocalRegistryFactory)),
			registry_listener: self
				.registry_listener
				.unwrap_or_else(|| Arc::new(crate::objects::NoOpListener)),
		}))
	}
}
