//! Shared mutable UI-bound objects scoped to an interpreter group.
//!
//! Paragraph output can bind named objects (tables, forms, widgets) that
//! the UI observes and mutates. Each group carries one registry for them;
//! local settings use the in-process implementation, remote settings use a
//! remote-backed one keyed by the group id (provided by the collaborator
//! implementing [`ObjectRegistryFactory::create_remote`]).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::Result;

/// Observer of registry mutations, normally the UI push channel.
pub trait ObjectRegistryListener: Send + Sync {
	/// An object was added or updated.
	fn on_update(&self, owner: &str, name: &str, value: &Value);
	/// An object was removed.
	fn on_remove(&self, owner: &str, name: &str);
}

/// Registry of shared mutable objects scoped to one group.
pub trait ObjectRegistry: Send + Sync {
	/// Owner id the registry was created for (setting id or group key).
	fn owner(&self) -> &str;

	/// Add or update an object.
	fn put(&self, name: &str, value: Value);

	/// Look up an object by name.
	fn get(&self, name: &str) -> Option<Value>;

	/// Remove an object by name.
	fn remove(&self, name: &str) -> Option<Value>;
}

/// Capability producing object registries during group wiring.
pub trait ObjectRegistryFactory: Send + Sync {
	/// Registry for a local (in-process) group.
	fn create_local(
		&self,
		owner_id: &str,
		listener: Arc<dyn ObjectRegistryListener>,
	) -> Result<Arc<dyn ObjectRegistry>>;

	/// Remote-backed registry for a group owning a worker process.
	///
	/// `group_key` is the correlation handle: it is the same setting-id
	/// prefixed key the group is registered under (see
	/// [`group_key`](crate::group_key)), and the worker process for that
	/// group is addressable by it in the process-manager namespace.
	/// Implementations look the worker up by key; the group itself is
	/// not passed because the registry is wired before any worker is
	/// spawned.
	fn create_remote(
		&self,
		group_key: &str,
		listener: Arc<dyn ObjectRegistryListener>,
	) -> Result<Arc<dyn ObjectRegistry>>;
}

/// In-process object registry.
pub struct LocalObjectRegistry {
	owner: String,
	listener: Arc<dyn ObjectRegistryListener>,
	objects: RwLock<HashMap<String, Value>>,
}

impl LocalObjectRegistry {
	/// Create an empty registry for `owner`.
	pub fn new(owner: impl Into<String>, listener: Arc<dyn ObjectRegistryListener>) -> Self {
		Self {
			owner: owner.into(),
			listener,
			objects: RwLock::new(HashMap::new()),
		}
	}
}

impl ObjectRegistry for LocalObjectRegistry {
	fn owner(&self) -> &str {
		&self.owner
	}

	fn put(&self, name: &str, value: Value) {
		self.objects.write().insert(name.to_string(), value.clone());
		self.listener.on_update(&self.owner, name, &value);
	}

	fn get(&self, name: &str) -> Option<Value> {
		self.objects.read().get(name).cloned()
	}

	fn remove(&self, name: &str) -> Option<Value> {
		let removed = self.objects.write().remove(name);
		if removed.is_some() {
			self.listener.on_remove(&self.owner, name);
		}
		removed
	}
}

/// Factory producing in-process registries for both modes.
///
/// Suitable for single-node deployments and tests; deployments with
/// remote workers install a factory whose `create_remote` talks to the
/// worker-side registry.
#[derive(Default)]
pub struct LocalRegistryFactory;

impl ObjectRegistryFactory for LocalRegistryFactory {
	fn create_local(
		&self,
		owner_id: &str,
		listener: Arc<dyn ObjectRegistryListener>,
	) -> Result<Arc<dyn ObjectRegistry>> {
		Ok(Arc::new(LocalObjectRegistry::new(owner_id, listener)))
	}

	fn create_remote(
		&self,
		group_key: &str,
		listener: Arc<dyn ObjectRegistryListener>,
	) -> Result<Arc<dyn ObjectRegistry>> {
		Ok(Arc::new(LocalObjectRegistry::new(group_key, listener)))
	}
}

/// Listener discarding all events.
#[derive(Default)]
pub struct NoOpListener;

impl ObjectRegistryListener for NoOpListener {
	fn on_update(&self, _owner: &str, _name: &str, _value: &Value) {}
	fn on_remove(&self, _owner: &str, _name: &str) {}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_put_get_remove() {
		let registry = LocalObjectRegistry::new("g1", Arc::new(NoOpListener));
		registry.put("table", json!({"rows": 3}));
		assert_eq!(registry.get("table"), Some(json!({"rows": 3})));
		assert_eq!(registry.remove("table"), Some(json!({"rows": 3})));
		assert_eq!(registry.get("table"), None);
		assert_eq!(registry.remove("table"), None);
	}
}
