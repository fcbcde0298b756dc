//! Resource quantity grammar accepted in `Tenant.spec.resources`
//!
//! This is deliberately narrower than the full Kubernetes quantity syntax:
//! CPU is an integer or decimal core count, optionally in millicores, and
//! memory is an integer with a binary `Mi`/`Gi`/`Ti` suffix.

use once_cell::sync::Lazy;
use regex::Regex;

/// CPU applied when the spec leaves it unset or unparseable
pub const DEFAULT_CPU: &str = "1000m";

/// Memory applied when the spec leaves it unset or unparseable
pub const DEFAULT_MEMORY: &str = "1Gi";

pub(crate) const CPU_PATTERN: &str = r"^(\d+m|\d+\.?\d*|\d*\.?\d+)$";
pub(crate) const MEMORY_PATTERN: &str = r"^(\d+Mi|\d+Gi|\d+Ti)$";

static CPU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(CPU_PATTERN).expect("cpu quantity pattern is a valid regex"));
static MEMORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(MEMORY_PATTERN).expect("memory quantity pattern is a valid regex"));

/// Returns true if `value` is a CPU quantity such as `500m`, `2` or `0.5`
pub fn is_valid_cpu(value: &str) -> bool {
    CPU_RE.is_match(value)
}

/// Returns true if `value` is a memory quantity such as `512Mi` or `4Gi`
pub fn is_valid_memory(value: &str) -> bool {
    MEMORY_RE.is_match(value)
}
