// middleware.rs
use axum::{extract::Request, middleware::Next, response::IntoResponse};
use uuid::Uuid;

use crate::{
    error::{ErrorMessage, HttpError},
    models::lifecyclemodel::{Actor, Role},
};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Puts the acting party into the request extensions. Identity is asserted
/// by the caller; authenticating it happens upstream.
pub async fn actor_context(mut req: Request, next: Next) -> Result<impl IntoResponse, HttpError> {
    let headers = req.headers();

    let raw_id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::ActorNotProvided.to_string()))?;
    let id = Uuid::parse_str(raw_id.trim())
        .map_err(|_| HttpError::bad_request(ErrorMessage::InvalidActorId.to_string()))?;

    let raw_role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::ActorNotProvided.to_string()))?;
    let role = Role::parse(raw_role)
        .ok_or_else(|| HttpError::bad_request(ErrorMessage::InvalidActorRole.to_string()))?;

    req.extensions_mut().insert(Actor { id, role });

    Ok(next.run(req).await)
}
