use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

/// Shared secret guarding the staff routes. Supplied via `LARDER_STAFF_KEY`
/// and presented by the desk frontend in the `X-Staff-Key` header.
#[derive(Clone)]
pub struct StaffKey(pub String);

pub async fn staff_auth(
    State(key): State<StaffKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    match request.headers().get("x-staff-key") {
        Some(presented) if presented.as_bytes() == key.0.as_bytes() => Ok(next.run(request).await),
        Some(_) => Err(StatusCode::UNAUTHORIZED),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
