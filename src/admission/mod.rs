//! # Admission webhook receiver
//!
//! A validating webhook that never rejects anything — `failurePolicy:
//! Ignore` on the `ValidatingWebhookConfiguration` means the API server
//! proceeds even if this endpoint is unreachable. Its only job is to
//! observe the admitting user's identity and the object body early enough
//! to correlate it with the watch event the same change produces moments
//! later.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, warn};

use crate::correlation::{CorrelationKey, CorrelationStore};
use crate::model::{ActorIdentity, Operation};
use crate::sanitize;

#[derive(Clone)]
pub struct AdmissionState {
    pub correlation_store: Arc<CorrelationStore>,
}

pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route("/process-validating-webhook", post(admit))
        .with_state(state)
}

async fn admit(
    State(state): State<AdmissionState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(%err, "received malformed admission review, allowing unconditionally");
            return Json(AdmissionResponse::invalid(err).into_review());
        }
    };

    observe(&state, &request);

    Json(AdmissionResponse::from(&request).into_review())
}

/// Extracts identity and object coordinates from the request and records
/// them in the correlation store. Never fails the admission request: an
/// object this receiver cannot make sense of (no body, unsanitizable,
/// unmapped operation) is simply not correlated, falling back to the
/// system actor identity on the watch side.
fn observe(state: &AdmissionState, request: &AdmissionRequest<DynamicObject>) {
    let Some(operation) = map_operation(request.operation) else {
        debug!(?request.operation, "admission operation not tracked for correlation");
        return;
    };

    if operation == Operation::Delete {
        // Deletes carry no meaningful body to fingerprint; the watch side
        // never looks them up by content, only live events do.
        return;
    }

    let Some(object) = request.object.as_ref() else {
        debug!("admission request carried no object body");
        return;
    };

    let identifier = crate::model::ResourceIdentifier::new(
        request.resource.group.clone(),
        request.resource.version.clone(),
        request.resource.resource.clone(),
        request.namespace.clone(),
        request.name.clone(),
    );

    let value = match serde_json::to_value(object) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "failed to serialize admitted object for sanitization");
            return;
        }
    };
    let Ok(canonical) = sanitize::canonical_bytes(&value) else {
        debug!("failed to sanitize admitted object, skipping correlation");
        return;
    };
    let fingerprint = crate::fingerprint::content_fingerprint(&canonical);
    let key = CorrelationKey::new(&identifier, operation, fingerprint);

    let username = request.user_info.username.clone().unwrap_or_default();
    state.correlation_store.put(key, ActorIdentity::new(username, Utc::now()));
}

fn map_operation(op: kube::core::admission::Operation) -> Option<Operation> {
    match op {
        kube::core::admission::Operation::Create => Some(Operation::Create),
        kube::core::admission::Operation::Update => Some(Operation::Update),
        kube::core::admission::Operation::Delete => Some(Operation::Delete),
        kube::core::admission::Operation::Connect => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_is_mapped_and_connect_is_not() {
        assert_eq!(map_operation(kube::core::admission::Operation::Delete), Some(Operation::Delete));
        assert_eq!(map_operation(kube::core::admission::Operation::Connect), None);
    }
}
