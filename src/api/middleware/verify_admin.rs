use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::util::constant_time_cmp;
use crate::util::env::Var;
use crate::var;

/// Gates the refresh trigger behind the shared admin secret. The presented
/// header is compared in constant time; a missing header and a wrong secret
/// both come back 401 so probes learn nothing.
pub async fn verify_admin_ident(req: Request, next: Next) -> Result<Response, StatusCode> {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?
        .to_owned();

    let admin_token = var!(Var::AdminToken)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if !constant_time_cmp(&presented, admin_token) {
        Err(StatusCode::UNAUTHORIZED)
    } else {
        Ok(next.run(req).await)
    }
}
