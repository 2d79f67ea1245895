//! Typed interpreter properties.
//!
//! Setting definitions arrive from the configuration layer in several
//! historical JSON shapes: a plain string-to-string map, or a map of
//! `{ "value": ..., "type": ... }` objects. Normalization happens exactly
//! once, at load time, via [`properties_from_json`]; everything downstream
//! works on the single [`PropertyValue`] representation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Normalized property map of an interpreter setting.
pub type Properties = HashMap<String, PropertyValue>;

/// A typed property value with its declared type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
	/// Free-form text.
	String(String),
	/// Numeric value.
	Number(f64),
	/// Boolean flag.
	Boolean(bool),
	/// URL, carried as text but rendered as a link by the UI.
	Url(String),
}

impl PropertyValue {
	/// Render the value as the string handed to spawn environments and
	/// local constructors.
	pub fn as_launch_string(&self) -> String {
		match self {
			Self::String(s) | Self::Url(s) => s.clone(),
			Self::Number(n) => {
				if n.fract() == 0.0 && n.is_finite() {
					format!("{}", *n as i64)
				} else {
					n.to_string()
				}
			}
			Self::Boolean(b) => b.to_string(),
		}
	}
}

/// Normalize a raw JSON property map into typed [`Properties`].
///
/// Accepts the two shapes produced by the configuration layer:
///
/// - `{ "k": "v" }` — plain strings, tagged as `string`;
/// - `{ "k": { "value": ..., "type": "number" } }` — typed entries; a
///   missing `type` falls back to `string`.
///
/// Any other shape is a configuration error.
pub fn properties_from_json(raw: &Value) -> Result<Properties> {
	let Value::Object(map) = raw else {
		return Err(Error::Config(format!(
			"properties must be a JSON object, got {raw}"
		)));
	};

	let mut properties = Properties::with_capacity(map.len());
	for (name, entry) in map {
		let value = match entry {
			Value::String(s) => PropertyValue::String(s.clone()),
			Value::Bool(b) => PropertyValue::Boolean(*b),
			Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(0.0)),
			Value::Object(fields) => typed_entry(name, fields)?,
			other => {
				return Err(Error::Config(format!(
					"property `{name}` has unsupported value {other}"
				)));
			}
		};
		properties.insert(name.clone(), value);
	}
	Ok(properties)
}

fn typed_entry(name: &str, fields: &serde_json::Map<String, Value>) -> Result<PropertyValue> {
	let value = fields
		.get("value")
		.ok_or_else(|| Error::Config(format!("property `{name}` is missing `value`")))?;
	let type_tag = fields.get("type").and_then(Value::as_str).unwrap_or("string");

	match (type_tag, value) {
		("string" | "text" | "textarea" | "password", Value::String(s)) => {
			Ok(PropertyValue::String(s.clone()))
		}
		("url", Value::String(s)) => Ok(PropertyValue::Url(s.clone())),
		("number", Value::Number(n)) => Ok(PropertyValue::Number(n.as_f64().unwrap_or(0.0))),
		("number", Value::String(s)) => s
			.parse::<f64>()
			.map(PropertyValue::Number)
			.map_err(|_| Error::Config(format!("property `{name}` is not a number: `{s}`"))),
		("checkbox" | "boolean", Value::Bool(b)) => Ok(PropertyValue::Boolean(*b)),
		("checkbox" | "boolean", Value::String(s)) => Ok(PropertyValue::Boolean(s == "true")),
		// Untyped legacy entries carry whatever JSON value was saved.
		("string", Value::Bool(b)) => Ok(PropertyValue::Boolean(*b)),
		("string", Value::Number(n)) => Ok(PropertyValue::Number(n.as_f64().unwrap_or(0.0))),
		(tag, other) => Err(Error::Config(format!(
			"property `{name}` has type `{tag}` but value {other}"
		))),
	}
}

/// Flatten typed properties into plain strings for spawn environments and
/// local construction.
pub fn flatten(properties: &Properties) -> HashMap<String, String> {
	properties
		.iter()
		.map(|(name, value)| (name.clone(), value.as_launch_string()))
		.collect()
}
