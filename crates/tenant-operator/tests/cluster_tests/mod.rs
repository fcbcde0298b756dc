//! Integration tests for the tenant operator
//!
//! Tests are organized by the story they tell:
//!
//! - `tenant_lifecycle`: a platform operator creates tenants of each tier,
//!   watches them become Ready, and deletes them again
//!
//! - `network_drift`: someone edits a tenant's network policy by hand and
//!   the operator puts it back

mod helpers;
mod network_drift;
mod tenant_lifecycle;
