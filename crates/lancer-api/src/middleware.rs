use axum::{
    extract::Request,
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use lancer_types::api::Claims;

/// Extract and validate the identity provider's JWT from the Authorization
/// header. The core trusts the verified claims opaquely; it never issues
/// tokens itself.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_token(token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Shared with the WebSocket upgrade path, which carries the token as a
/// query parameter instead of a header.
pub fn decode_token(token: &str) -> Option<Claims> {
    let secret =
        std::env::var("LANCER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
