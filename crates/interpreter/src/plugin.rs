//! Plugin loading for local interpreter construction.
//!
//! Local (in-process) interpreters are constructed through an explicit
//! constructor registry rather than by reflective class lookup: a declared
//! class identifier maps to a constructor function over the flattened
//! property set. [`StaticPluginLoader`] is the registry populated at
//! process start from the interpreter plugins known to the build; genuine
//! dynamic loading plugs in behind the same [`PluginLoader`] trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::interpreter::Interpreter;
use crate::{Error, Result};

/// Constructor for one interpreter class, taking the flattened launch
/// properties.
pub type InterpreterCtor =
	Arc<dyn Fn(&HashMap<String, String>) -> Result<Box<dyn Interpreter>> + Send + Sync>;

/// Capability providing interpreter constructors.
///
/// `for_name` consults the process-wide plugin set; when a class is
/// visible there, construction uses it directly and no directory-scoped
/// context is opened (avoiding duplicate instances of the same plugin).
/// Otherwise `open_context` loads a context scoped to the setting's
/// interpreter directory; contexts are cached per directory by the caller
/// and never evicted while instances reference them.
pub trait PluginLoader: Send + Sync {
	/// Look up a constructor in the process-wide plugin set.
	fn for_name(&self, class_name: &str) -> Option<InterpreterCtor>;

	/// Open (or load) a plugin context for an interpreter directory.
	fn open_context(&self, context_dir: &Path) -> Result<Arc<dyn PluginContext>>;
}

/// A directory-scoped plugin context able to construct interpreters.
pub trait PluginContext: Send + Sync {
	/// Construct an instance of `class_name` from the given properties.
	fn construct(
		&self,
		class_name: &str,
		properties: &HashMap<String, String>,
	) -> Result<Box<dyn Interpreter>>;
}

/// Constructor registry populated at process start.
///
/// Registration is append-only; later registrations for the same class
/// replace earlier ones, which only matters during startup wiring.
#[derive(Default, Clone)]
pub struct StaticPluginLoader {
	ctors: Arc<RwLock<HashMap<String, InterpreterCtor>>>,
}

impl StaticPluginLoader {
	/// Create an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a constructor for a class identifier.
	pub fn register(
		&self,
		class_name: impl Into<String>,
		ctor: impl Fn(&HashMap<String, String>) -> Result<Box<dyn Interpreter>>
			+ Send
			+ Sync
			+ 'static,
	) {
		self.ctors.write().insert(class_name.into(), Arc::new(ctor));
	}
}

impl PluginLoader for StaticPluginLoader {
	fn for_name(&self, class_name: &str) -> Option<InterpreterCtor> {
		self.ctors.read().get(class_name).cloned()
	}

	fn open_context(&self, _context_dir: &Path) -> Result<Arc<dyn PluginContext>> {
		Ok(Arc::new(StaticContext {
			ctors: Arc::clone(&self.ctors),
		}))
	}
}

/// Context over the static registry; directory-scoped loading is not
/// supported by the static loader, so unknown classes fail construction.
struct StaticContext {
	ctors: Arc<RwLock<HashMap<String, InterpreterCtor>>>,
}

impl PluginContext for StaticContext {
	fn construct(
		&self,
		class_name: &str,
		properties: &HashMap<String, String>,
	) -> Result<Box<dyn Interpreter>> {
		let ctor = self
			.ctors
			.read()
			.get(class_name)
			.cloned()
			.ok_or_else(|| Error::Construction {
				class: class_name.to_string(),
				reason: "class is not registered with any plugin".into(),
			})?;
		ctor(properties)
	}
}
