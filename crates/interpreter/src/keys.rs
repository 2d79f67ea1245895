//! Isolation key derivation.
//!
//! Pure, total functions mapping (user, note, policy) to the group and
//! session keys the registries are indexed by. Equal inputs always produce
//! equal keys; that determinism is the property the lookup paths rely on.

use crate::option::InterpreterOption;

/// Marker for settings attached to a fixed pre-existing worker.
const EXISTING_PROCESS: &str = "existing_process";
/// Marker for the single process shared by all users and notes.
const SHARED_PROCESS: &str = "shared_process";
/// Marker for the single session shared by all users and notes.
const SHARED_SESSION: &str = "shared_session";

/// Compute the group key for a (user, note) pair.
///
/// The key is prefixed with the setting id so groups of different settings
/// never collide in a shared process-manager namespace. When attaching to
/// a pre-existing worker all traffic funnels into one group regardless of
/// user and note.
pub fn group_key(setting_id: &str, user: &str, note: &str, option: &InterpreterOption) -> String {
	let key = if option.is_existing_process() {
		EXISTING_PROCESS.to_string()
	} else if option.process_scope.isolated() {
		format!(
			"{}:{}",
			if option.process_scope.per_user() { user } else { "" },
			if option.process_scope.per_note() { note } else { "" },
		)
	} else {
		SHARED_PROCESS.to_string()
	};
	format!("{setting_id}:{key}")
}

/// Compute the session key for a (user, note) pair.
///
/// Evaluated against the session scope independently of the group key's
/// granularity; see [`InterpreterOption`] for the accepted combinations.
pub fn session_key(user: &str, note: &str, option: &InterpreterOption) -> String {
	if option.is_existing_process() {
		EXISTING_PROCESS.to_string()
	} else if option.session_scope.per_user() && option.session_scope.per_note() {
		format!("{user}:{note}")
	} else if option.session_scope.per_user() {
		user.to_string()
	} else if option.session_scope.per_note() {
		note.to_string()
	} else {
		SHARED_SESSION.to_string()
	}
}
