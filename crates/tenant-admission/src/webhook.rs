//! Tenant admission webhooks
//!
//! Handles AdmissionReview requests for Tenant resources. The mutating
//! endpoint answers with a JSON patch of defaults, the validating endpoint
//! allows or denies with an apiserver-style `Status`.

use axum::{
    routing::{get, post},
    Json, Router,
};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    ResourceExt,
};
use serde_json::Value;
use tenant_common::crd::Tenant;
use tracing::{debug, error, info, warn};

use crate::{apply_defaults, default_patch, validate_create, validate_update, AdmissionError};

/// Path of the mutating webhook
pub const MUTATE_PATH: &str = "/mutate-tenant";
/// Path of the validating webhook
pub const VALIDATE_PATH: &str = "/validate-tenant";
/// Path of the liveness probe
pub const HEALTH_PATH: &str = "/healthz";

/// Router serving both Tenant webhooks and a health probe
pub fn webhook_router() -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_handler))
        .route(VALIDATE_PATH, post(validate_handler))
        .route(HEALTH_PATH, get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate(&req).into_review())
}

async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&req).into_review())
}

/// Apply defaults to the submitted Tenant
///
/// Returns an allowing response, with a patch when any default was applied.
pub fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    if matches!(req.operation, Operation::Delete | Operation::Connect) {
        return AdmissionResponse::from(req);
    }
    let Some(object) = &req.object else {
        return reject(req, "", &AdmissionError::Malformed("request has no object".to_string()));
    };
    let (raw, tenant) = match decode(object) {
        Ok(decoded) => decoded,
        Err(e) => return reject(req, &req.name, &e),
    };
    let name = request_name(req, &tenant);

    let mut spec = tenant.spec.clone();
    if !apply_defaults(&mut spec) {
        debug!(uid = %req.uid, tenant = %name, "No defaults to apply");
        return AdmissionResponse::from(req);
    }

    let patch = match default_patch(&raw, &spec) {
        Ok(patch) => patch,
        Err(e) => return reject(req, &name, &e),
    };
    info!(
        uid = %req.uid,
        tenant = %name,
        tier = %spec.tier.as_ref().map(|t| t.as_str()).unwrap_or_default(),
        patch_ops = patch.len(),
        "Defaulting tenant"
    );

    match AdmissionResponse::from(req).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Validate the submitted Tenant, and on update the tier transition
///
/// Deletion is always allowed; cleanup is the finalizer's job.
pub fn validate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    if matches!(req.operation, Operation::Delete | Operation::Connect) {
        return AdmissionResponse::from(req);
    }
    let Some(object) = &req.object else {
        return reject(req, "", &AdmissionError::Malformed("request has no object".to_string()));
    };
    let tenant = match decode(object) {
        Ok((_, tenant)) => tenant,
        Err(e) => return reject(req, &req.name, &e),
    };
    let name = request_name(req, &tenant);

    let result = match (&req.operation, &req.old_object) {
        (Operation::Update, Some(old)) => decode(old)
            .and_then(|(_, old)| validate_update(&old.spec, &tenant.spec)),
        _ => validate_create(&tenant.name_any(), &tenant.spec),
    };

    match result {
        Ok(()) => {
            debug!(uid = %req.uid, tenant = %name, operation = ?req.operation, "Tenant admitted");
            AdmissionResponse::from(req)
        }
        Err(e) => {
            warn!(uid = %req.uid, tenant = %name, error = %e, "Tenant rejected");
            reject(req, &name, &e)
        }
    }
}

/// Decode an admission object into its raw JSON and a typed Tenant
fn decode(object: &DynamicObject) -> Result<(Value, Tenant), AdmissionError> {
    let raw = serde_json::to_value(object)
        .map_err(|e| AdmissionError::Malformed(format!("failed to encode object: {e}")))?;
    let tenant = serde_json::from_value(raw.clone())
        .map_err(|e| AdmissionError::Malformed(format!("object is not a Tenant: {e}")))?;
    Ok((raw, tenant))
}

fn request_name(req: &AdmissionRequest<DynamicObject>, tenant: &Tenant) -> String {
    if req.name.is_empty() {
        tenant.name_any()
    } else {
        req.name.clone()
    }
}

fn reject(req: &AdmissionRequest<DynamicObject>, name: &str, err: &AdmissionError) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(req).deny(err.to_string());
    response.result = err.to_status(name);
    response
}
