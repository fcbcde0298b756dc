//! Validation applied by the validating webhook
//!
//! Validation runs after defaulting, so an absent tier here means the
//! mutating webhook was bypassed and is reported like any unsupported value.

use once_cell::sync::Lazy;
use regex::Regex;
use tenant_common::crd::{is_valid_cpu, is_valid_memory, TenantSpec, TenantTier};
use tenant_common::tenant_namespace;

use crate::{AdmissionError, FieldError};

// RFC 5322 dot-atom: no leading, trailing or doubled dots
static DOT_ATOM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*$")
        .expect("dot-atom pattern is a valid regex")
});

// DNS-1123 label, as required of namespace names
static DNS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label pattern is a valid regex")
});

/// Longest DNS-1123 label
pub const DNS_LABEL_MAX_LEN: usize = 63;

/// Validate a Tenant being created
///
/// Names are immutable, so only creation checks that the tenant's namespace
/// name will be accepted.
pub fn validate_create(name: &str, spec: &TenantSpec) -> Result<(), AdmissionError> {
    let mut errors: Vec<FieldError> = validate_name(name).into_iter().collect();
    errors.extend(validate_spec(spec));
    into_result(errors)
}

/// Field error if `tenant-<name>` is not a valid namespace name
///
/// An empty name is left to the API server, which fills in `generateName`.
pub fn validate_name(name: &str) -> Option<FieldError> {
    if name.is_empty() {
        return None;
    }
    let namespace = tenant_namespace(name);
    if namespace.len() > DNS_LABEL_MAX_LEN {
        return Some(FieldError::invalid(
            "metadata.name",
            name,
            format!(
                "namespace {namespace:?} must be no more than {DNS_LABEL_MAX_LEN} characters"
            ),
        ));
    }
    if !DNS_LABEL.is_match(&namespace) {
        return Some(FieldError::invalid(
            "metadata.name",
            name,
            format!(
                "namespace {namespace:?} must consist of lower case alphanumeric characters or '-', \
                 and start and end with an alphanumeric character"
            ),
        ));
    }
    None
}

/// Validate a Tenant being updated from `old` to `new`
///
/// The downgrade guard runs first; a forbidden transition is reported on its
/// own, without the field errors of the new spec.
pub fn validate_update(old: &TenantSpec, new: &TenantSpec) -> Result<(), AdmissionError> {
    check_tier_transition(old, new)?;
    into_result(validate_spec(new))
}

/// Reject a move to a lower tier unless `allowTierMigration` is set on the new spec
pub fn check_tier_transition(old: &TenantSpec, new: &TenantSpec) -> Result<(), AdmissionError> {
    let (Some(old_tier), Some(new_tier)) = (&old.tier, &new.tier) else {
        return Ok(());
    };
    if !new_tier.is_downgrade_from(old_tier) || new.allow_tier_migration {
        return Ok(());
    }
    Err(AdmissionError::Forbidden {
        field: "spec.tier".to_string(),
        message: format!(
            "unsafe tier downgrade: {old_tier} -> {new_tier}. \
             Set spec.allowTierMigration=true to proceed (DATA MAY BE LOST)"
        ),
    })
}

/// Every field error in `spec`, in field order
pub fn validate_spec(spec: &TenantSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    match &spec.tier {
        Some(TenantTier::Unrecognized(raw)) => errors.push(unsupported_tier(raw)),
        None => errors.push(unsupported_tier("")),
        Some(_) => {}
    }

    if spec.owner.is_empty() {
        errors.push(FieldError::required("spec.owner", "owner must be specified"));
    } else if !is_valid_email(&spec.owner) {
        errors.push(FieldError::invalid(
            "spec.owner",
            &spec.owner,
            "invalid email format",
        ));
    }

    if let Some(cpu) = spec.resources.cpu.as_deref().filter(|c| !c.is_empty()) {
        if !is_valid_cpu(cpu) {
            errors.push(FieldError::invalid(
                "spec.resources.cpu",
                cpu,
                "invalid quantity: expected cores or millicores, e.g. 500m or 2",
            ));
        }
    }
    if let Some(memory) = spec.resources.memory.as_deref().filter(|m| !m.is_empty()) {
        if !is_valid_memory(memory) {
            errors.push(FieldError::invalid(
                "spec.resources.memory",
                memory,
                "invalid quantity: expected Mi, Gi or Ti, e.g. 512Mi",
            ));
        }
    }

    errors
}

/// Accepts `local@domain` or `Display Name <local@domain>`
pub fn is_valid_email(value: &str) -> bool {
    let value = value.trim();
    let addr = match (value.rfind('<'), value.strip_suffix('>')) {
        (Some(open), Some(inner)) => &inner[open + 1..],
        (None, None) => value,
        _ => return false,
    };
    match addr.rsplit_once('@') {
        Some((local, domain)) => DOT_ATOM.is_match(local) && DOT_ATOM.is_match(domain),
        None => false,
    }
}

fn unsupported_tier(raw: &str) -> FieldError {
    let known = TenantTier::KNOWN;
    let supported: Vec<&str> = known.iter().map(TenantTier::as_str).collect();
    FieldError::not_supported("spec.tier", raw, &supported)
}

fn into_result(errors: Vec<FieldError>) -> Result<(), AdmissionError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AdmissionError::Invalid(errors))
    }
}
