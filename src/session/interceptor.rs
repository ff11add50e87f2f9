//! Outgoing request decoration.

use super::{credential::Credential, transport::ApiRequest};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::warn;

/// Attaches `Authorization: Bearer <credential>` when a credential is held.
///
/// Total: without a credential (or with one that is not a valid header value)
/// the request goes out unauthenticated and the server decides.
#[must_use]
pub fn authorize(mut request: ApiRequest, credential: Option<&Credential>) -> ApiRequest {
    let Some(credential) = credential else {
        return request;
    };

    match bearer_value(credential) {
        Some(value) => {
            request.headers.insert(AUTHORIZATION, value);
        }
        None => warn!("Access token is not a valid header value; sending unauthenticated"),
    }
    request
}

fn bearer_value(credential: &Credential) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose())).ok()?;
    value.set_sensitive(true);
    Some(value)
}
