//! Defaulting applied by the mutating webhook

use serde_json::{Map, Value};
use tenant_common::crd::{TenantSpec, TenantTier, DEFAULT_CPU, DEFAULT_MEMORY};

use crate::AdmissionError;

/// Fill in defaults on `spec`, returning true if anything changed
///
/// - absent tier becomes Silver
/// - owner is lower-cased
/// - absent or empty cpu/memory take the quota defaults
/// - an absent whitelist becomes an explicit empty list
pub fn apply_defaults(spec: &mut TenantSpec) -> bool {
    let mut changed = false;

    if spec.tier.is_none() {
        spec.tier = Some(TenantTier::Silver);
        changed = true;
    }

    let owner = spec.owner.to_lowercase();
    if owner != spec.owner {
        spec.owner = owner;
        changed = true;
    }

    if spec.resources.cpu.as_deref().map_or(true, str::is_empty) {
        spec.resources.cpu = Some(DEFAULT_CPU.to_string());
        changed = true;
    }
    if spec.resources.memory.as_deref().map_or(true, str::is_empty) {
        spec.resources.memory = Some(DEFAULT_MEMORY.to_string());
        changed = true;
    }

    if spec.network.whitelisted_services.is_none() {
        spec.network.whitelisted_services = Some(Vec::new());
        changed = true;
    }

    changed
}

/// JSON patch that turns the submitted object into its defaulted form
///
/// `raw` is the object exactly as submitted. Only `/spec` is compared, so the
/// patch never touches metadata or status.
pub fn default_patch(raw: &Value, spec: &TenantSpec) -> Result<json_patch::Patch, AdmissionError> {
    let mut before = Map::new();
    if let Some(submitted) = raw.get("spec") {
        before.insert("spec".to_string(), submitted.clone());
    }

    let defaulted = serde_json::to_value(spec)
        .map_err(|e| AdmissionError::Malformed(format!("failed to encode defaulted spec: {e}")))?;
    let mut after = Map::new();
    after.insert("spec".to_string(), defaulted);

    Ok(json_patch::diff(&Value::Object(before), &Value::Object(after)))
}
