//! Spawn-environment derivation for worker processes.
//!
//! Builds the environment map handed to a spawned worker from the
//! flattened property set. Environment-convention keys are copied
//! verbatim; `spark.*` properties are accumulated into a single
//! shell-formatted submit-options string; a handful of auxiliary
//! properties are derived from the `master` and deploy-mode properties.
//!
//! The derivation is pure apart from one file-existence probe (the SparkR
//! archive); the `SPARK_HOME` environment variable is read by the caller
//! and passed in.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable carrying the accumulated submit options.
const SPARK_CONF_ENV: &str = "FOLIO_SPARK_CONF";

/// True for keys copied verbatim into the spawn environment.
fn is_env_key(key: &str) -> bool {
	!key.is_empty()
		&& key
			.chars()
			.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// True for properties folded into the submit-options string.
fn is_spark_conf(key: &str, value: &str) -> bool {
	key.starts_with("spark.") && !value.is_empty()
}

/// Quote a property value for inclusion in a shell command line.
///
/// A value containing only single quotes is wrapped in double quotes and
/// vice versa; a value containing both kinds is invalid.
pub fn to_shell_format(value: &str) -> Result<String> {
	let has_single = value.contains('\'');
	let has_double = value.contains('"');
	match (has_single, has_double) {
		(true, true) => Err(Error::Config(format!(
			"property value cannot contain both \" and ': `{value}`"
		))),
		(true, false) => Ok(format!("\"{value}\"")),
		_ => Ok(format!("'{value}'")),
	}
}

fn spark_master(properties: &HashMap<String, String>) -> &str {
	properties
		.get("master")
		.or_else(|| properties.get("spark.master"))
		.map(String::as_str)
		.unwrap_or("local[*]")
}

fn is_yarn_mode(master: &str) -> bool {
	master.starts_with("yarn")
}

fn deploy_mode(master: &str, properties: &HashMap<String, String>) -> Result<&'static str> {
	if master == "yarn-client" {
		return Ok("client");
	}
	if master == "yarn-cluster" {
		return Ok("cluster");
	}
	if master.starts_with("local") {
		return Ok("client");
	}
	match properties.get("spark.submit.deployMode").map(String::as_str) {
		Some("client") => Ok("client"),
		Some("cluster") => Ok("cluster"),
		Some(other) => Err(Error::Config(format!(
			"invalid value for spark.submit.deployMode: `{other}`"
		))),
		None => Err(Error::Config(
			"master is set as yarn, but spark.submit.deployMode is not specified".into(),
		)),
	}
}

fn merge_spark_property(
	spark_properties: &mut BTreeMap<String, String>,
	name: &str,
	value: String,
) {
	match spark_properties.get_mut(name) {
		Some(existing) => {
			existing.push(',');
			existing.push_str(&value);
		}
		None => {
			spark_properties.insert(name.to_string(), value);
		}
	}
}

/// Locate the SparkR archive and fold it into the distributed archives.
fn setup_sparkr(
	spark_properties: &mut BTreeMap<String, String>,
	master: &str,
	home: &Path,
	spark_home: Option<&Path>,
) -> Result<()> {
	let base = match spark_home {
		Some(spark_home) => spark_home.join("R").join("lib"),
		None => {
			if !master.starts_with("local") {
				return Err(Error::Config(
					"SPARK_HOME is not specified for non-local mode".into(),
				));
			}
			home.join("interpreter").join("spark").join("R")
		}
	};

	let archive = base.join("sparkr.zip");
	if archive.is_file() {
		merge_spark_property(
			spark_properties,
			"spark.yarn.dist.archives",
			archive.display().to_string(),
		);
	} else {
		warn!(path = %archive.display(), "sparkr.zip is not found, SparkR may not work");
	}
	Ok(())
}

/// Derive the environment for a spawned worker from the flattened
/// property set.
///
/// `spark_home` is the caller-read `SPARK_HOME` process variable. Fails
/// when a required companion property is missing in a non-local mode or a
/// property value cannot be shell-quoted.
pub fn spawn_environment(
	properties: &HashMap<String, String>,
	conf_dir: &Path,
	home: &Path,
	spark_home: Option<&Path>,
) -> Result<HashMap<String, String>> {
	let master = spark_master(properties);
	let mut env = HashMap::new();
	// BTreeMap keeps the submit-options string deterministic.
	let mut spark_properties = BTreeMap::new();

	for (key, value) in properties {
		if is_env_key(key) {
			env.insert(key.clone(), value.clone());
		}
		if is_spark_conf(key, value) {
			spark_properties.insert(key.clone(), to_shell_format(value)?);
		}
	}

	if is_yarn_mode(master) {
		spark_properties.insert("spark.yarn.isPython".into(), "true".into());
	}
	setup_sparkr(&mut spark_properties, master, home, spark_home)?;

	let yarn_cluster = is_yarn_mode(master) && deploy_mode(master, properties)? == "cluster";
	if yarn_cluster {
		env.insert("SPARK_YARN_CLUSTER".into(), "true".into());
	}

	let mut submit_options = format!(" --master {master}");
	if yarn_cluster {
		submit_options.push_str(&format!(
			" --files {}",
			conf_dir.join("log4j_yarn_cluster.properties").display()
		));
	}
	for (name, value) in &spark_properties {
		submit_options.push_str(&format!(" --conf {name}={value}"));
	}
	env.insert(SPARK_CONF_ENV.into(), submit_options);

	debug!(?env, "derived spawn environment");
	Ok(env)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn props(entries: &[(&str, &str)]) -> HashMap<String, String> {
		entries
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn test_shell_format_quote_rules() {
		assert_eq!(to_shell_format("plain").unwrap(), "'plain'");
		assert_eq!(to_shell_format("it's").unwrap(), "\"it's\"");
		assert_eq!(to_shell_format("say \"hi\"").unwrap(), "'say \"hi\"'");
		assert!(to_shell_format("both ' and \"").is_err());
	}

	#[test]
	fn test_env_convention_keys_copied_verbatim() {
		let env = spawn_environment(
			&props(&[
				("SPARK_DRIVER_MEMORY", "2g"),
				("HADOOP_CONF_DIR_2", "/etc/hadoop"),
				("lowercase", "skipped"),
				("MIXED_case", "skipped"),
			]),
			Path::new("conf"),
			Path::new("."),
			None,
		)
		.unwrap();
		assert_eq!(env.get("SPARK_DRIVER_MEMORY").unwrap(), "2g");
		assert_eq!(env.get("HADOOP_CONF_DIR_2").unwrap(), "/etc/hadoop");
		assert!(!env.contains_key("lowercase"));
		assert!(!env.contains_key("MIXED_case"));
	}

	#[test]
	fn test_submit_options_accumulate_spark_properties() {
		let env = spawn_environment(
			&props(&[
				("spark.cores.max", "4"),
				("spark.executor.memory", "1g"),
				("spark.empty", ""),
				("other.prop", "ignored"),
			]),
			Path::new("conf"),
			Path::new("."),
			None,
		)
		.unwrap();
		let options = env.get(SPARK_CONF_ENV).unwrap();
		assert!(options.starts_with(" --master local[*]"), "{options}");
		assert!(options.contains(" --conf spark.cores.max='4'"));
		assert!(options.contains(" --conf spark.executor.memory='1g'"));
		assert!(!options.contains("spark.empty"));
		assert!(!options.contains("other.prop"));
	}

	#[test]
	fn test_master_property_fallback_chain() {
		let env = spawn_environment(
			&props(&[("spark.master", "spark://host:7077")]),
			Path::new("conf"),
			Path::new("."),
			Some(Path::new("/opt/spark")),
		)
		.unwrap();
		assert!(
			env.get(SPARK_CONF_ENV)
				.unwrap()
				.starts_with(" --master spark://host:7077")
		);
	}

	#[test]
	fn test_yarn_cluster_flags() {
		let env = spawn_environment(
			&props(&[("master", "yarn-cluster")]),
			Path::new("/etc/folio"),
			Path::new("."),
			Some(Path::new("/opt/spark")),
		)
		.unwrap();
		assert_eq!(env.get("SPARK_YARN_CLUSTER").unwrap(), "true");
		let options = env.get(SPARK_CONF_ENV).unwrap();
		assert!(options.contains("--files /etc/folio/log4j_yarn_cluster.properties"));
		assert!(options.contains(" --conf spark.yarn.isPython=true"));
	}

	#[test]
	fn test_yarn_master_requires_deploy_mode() {
		let err = spawn_environment(
			&props(&[("master", "yarn")]),
			Path::new("conf"),
			Path::new("."),
			Some(Path::new("/opt/spark")),
		)
		.unwrap_err();
		assert!(err.to_string().contains("spark.submit.deployMode"));

		let err = spawn_environment(
			&props(&[("master", "yarn"), ("spark.submit.deployMode", "edge")]),
			Path::new("conf"),
			Path::new("."),
			Some(Path::new("/opt/spark")),
		)
		.unwrap_err();
		assert!(err.to_string().contains("invalid value"));

		let env = spawn_environment(
			&props(&[("master", "yarn"), ("spark.submit.deployMode", "client")]),
			Path::new("conf"),
			Path::new("."),
			Some(Path::new("/opt/spark")),
		)
		.unwrap();
		assert!(!env.contains_key("SPARK_YARN_CLUSTER"));
	}

	#[test]
	fn test_non_local_master_requires_spark_home() {
		let err = spawn_environment(
			&props(&[("master", "spark://host:7077")]),
			Path::new("conf"),
			Path::new("."),
			None,
		)
		.unwrap_err();
		assert!(err.to_string().contains("SPARK_HOME"));
	}

	#[test]
	fn test_sparkr_archive_distributed_when_present() {
		let dir = tempfile::tempdir().unwrap();
		let lib = dir.path().join("R").join("lib");
		std::fs::create_dir_all(&lib).unwrap();
		std::fs::write(lib.join("sparkr.zip"), b"zip").unwrap();

		let env = spawn_environment(
			&props(&[("master", "yarn-client")]),
			Path::new("conf"),
			Path::new("."),
			Some(dir.path()),
		)
		.unwrap();
		let options = env.get(SPARK_CONF_ENV).unwrap();
		assert!(options.contains("spark.yarn.dist.archives"));
		assert!(options.contains("sparkr.zip"));
	}

	#[test]
	fn test_quote_failure_propagates() {
		let err = spawn_environment(
			&props(&[("spark.extra", "has ' and \" both")]),
			Path::new("conf"),
			Path::new("."),
			None,
		)
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}
}
