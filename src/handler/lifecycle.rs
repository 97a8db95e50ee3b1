// handler/lifecycle.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::lifecycledtos::*,
    error::HttpError,
    models::lifecyclemodel::{Actor, Proposal, UnitRef},
    service::transitions::Action,
    AppState,
};

pub fn lifecycle_handler() -> Router {
    Router::new()
        // Service requests and their quotes
        .route("/requests", post(create_request))
        .route("/requests/:request_id", get(get_request))
        .route("/requests/:request_id/cancel", post(cancel_request))
        .route("/requests/:request_id/quotes", post(submit_quote))
        .route("/requests/:request_id/contract", post(form_request_contract))
        .route("/requests/:request_id/progress", get(request_progress))
        .route("/requests/:request_id/on-way", post(request_on_way))
        .route("/requests/:request_id/start", post(request_start))
        .route("/requests/:request_id/seller-complete", post(request_seller_complete))
        .route("/requests/:request_id/buyer-complete", post(request_buyer_complete))
        .route("/quotes/:quote_id", put(edit_quote))
        .route("/quotes/:quote_id/revision", post(quote_revision))
        .route("/quotes/:quote_id/counter", post(quote_counter))
        .route("/quotes/:quote_id/accept", post(accept_quote))
        .route("/quotes/:quote_id/reject", post(reject_quote))
        // Direct bookings
        .route("/bookings", post(create_booking))
        .route("/bookings/:booking_id", get(get_booking))
        .route(
            "/bookings/:booking_id/response",
            post(respond_to_booking)
                .put(edit_booking_response)
                .delete(delete_booking_response),
        )
        .route("/bookings/:booking_id/revision", post(booking_revision))
        .route("/bookings/:booking_id/counter", post(booking_counter))
        .route("/bookings/:booking_id/accept", post(accept_booking))
        .route("/bookings/:booking_id/decline", post(decline_booking))
        .route("/bookings/:booking_id/cancel", post(cancel_booking))
        .route("/bookings/:booking_id/contract", post(form_booking_contract))
        .route("/bookings/:booking_id/progress", get(booking_progress))
        .route("/bookings/:booking_id/on-way", post(booking_on_way))
        .route("/bookings/:booking_id/start", post(booking_start))
        .route("/bookings/:booking_id/seller-complete", post(booking_seller_complete))
        .route("/bookings/:booking_id/buyer-complete", post(booking_buyer_complete))
        // Contracts
        .route("/contracts/:contract_id", get(get_contract))
        .route("/contracts/:contract_id/sign", post(sign_contract))
        .route("/contracts/:contract_id/reject", post(reject_contract))
        .route("/contracts/:contract_id/renegotiate", post(renegotiate_contract))
}

fn validated<T: Validate>(body: &T) -> Result<(), HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))
}

fn proposal_action(body: ProposalDto, to_action: fn(Proposal) -> Action) -> Result<Action, HttpError> {
    validated(&body)?;
    let proposal = body.into_proposal().map_err(HttpError::bad_request)?;
    Ok(to_action(proposal))
}

async fn run_booking(
    app_state: &AppState,
    booking_id: Uuid,
    action: Action,
    actor: &Actor,
    message: &str,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .lifecycle
        .booking_action(booking_id, action, actor)
        .await?;

    Ok(Json(ApiResponse::success(message, outcome)))
}

async fn run_quote(
    app_state: &AppState,
    quote_id: Uuid,
    action: Action,
    actor: &Actor,
    message: &str,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .lifecycle
        .quote_action(quote_id, action, actor)
        .await?;

    Ok(Json(ApiResponse::success(message, outcome)))
}

async fn run_request(
    app_state: &AppState,
    request_id: Uuid,
    action: Action,
    actor: &Actor,
    message: &str,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .lifecycle
        .request_action(request_id, action, actor)
        .await?;

    Ok(Json(ApiResponse::success(message, outcome)))
}

// ─── Service requests ────────────────────────────────────────────────

pub async fn create_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateServiceRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let input = body.into_new().map_err(HttpError::bad_request)?;

    let request = app_state
        .lifecycle
        .create_service_request(&actor, input)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Service request created successfully", request)),
    ))
}

pub async fn get_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let view = app_state.lifecycle.get_request(request_id, &actor).await?;

    Ok(Json(ApiResponse::success("Service request retrieved successfully", view)))
}

pub async fn cancel_request(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_request(&app_state, request_id, Action::Cancel, &actor, "Service request closed").await
}

pub async fn submit_quote(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<SubmitQuoteDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let input = body.into_new().map_err(HttpError::bad_request)?;

    let quote = app_state
        .lifecycle
        .submit_quote(&actor, request_id, input)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Quote submitted successfully", quote)),
    ))
}

pub async fn form_request_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let formed = app_state
        .lifecycle
        .form_contract(UnitRef::Request(request_id), &actor)
        .await?;

    Ok(Json(ApiResponse::success("Contract ready for review", formed.contract)))
}

pub async fn request_progress(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let progress = app_state
        .lifecycle
        .progress(UnitRef::Request(request_id), &actor)
        .await?;

    Ok(Json(ApiResponse::success("Progress retrieved successfully", progress)))
}

pub async fn request_on_way(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_request(&app_state, request_id, Action::MarkOnWay, &actor, "Marked on the way").await
}

pub async fn request_start(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_request(&app_state, request_id, Action::StartWork, &actor, "Work started").await
}

pub async fn request_seller_complete(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<CompletionDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = Action::MarkSellerComplete { photos: body.photos };
    run_request(&app_state, request_id, action, &actor, "Marked complete, awaiting the customer").await
}

pub async fn request_buyer_complete(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_request(&app_state, request_id, Action::MarkBuyerComplete, &actor, "Job completed").await
}

// ─── Quotes ──────────────────────────────────────────────────────────

pub async fn edit_quote(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = proposal_action(body, Action::EditResponse)?;
    run_quote(&app_state, quote_id, action, &actor, "Quote updated successfully").await
}

pub async fn quote_revision(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
    Json(body): Json<RevisionDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let action = Action::RequestRevision { message: body.message };
    run_quote(&app_state, quote_id, action, &actor, "Revision requested").await
}

pub async fn quote_counter(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = proposal_action(body, Action::CounterPropose)?;
    run_quote(&app_state, quote_id, action, &actor, "Counter offer sent").await
}

pub async fn accept_quote(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_quote(&app_state, quote_id, Action::Accept, &actor, "Quote accepted, contract ready for signature").await
}

pub async fn reject_quote(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(quote_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_quote(&app_state, quote_id, Action::Reject, &actor, "Quote rejected").await
}

// ─── Bookings ────────────────────────────────────────────────────────

pub async fn create_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<CreateBookingDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let input = body.into_new().map_err(HttpError::bad_request)?;

    let booking = app_state.lifecycle.create_booking(&actor, input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Booking created successfully", booking)),
    ))
}

pub async fn get_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let booking = app_state.lifecycle.get_booking(booking_id, &actor).await?;

    Ok(Json(ApiResponse::success("Booking retrieved successfully", booking)))
}

pub async fn respond_to_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = proposal_action(body, Action::Respond)?;
    run_booking(&app_state, booking_id, action, &actor, "Offer sent to the customer").await
}

pub async fn edit_booking_response(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = proposal_action(body, Action::EditResponse)?;
    run_booking(&app_state, booking_id, action, &actor, "Offer updated").await
}

pub async fn delete_booking_response(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::DeleteResponse, &actor, "Offer withdrawn, booking is pending again").await
}

pub async fn booking_revision(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<RevisionDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let action = Action::RequestRevision { message: body.message };
    run_booking(&app_state, booking_id, action, &actor, "Revision requested").await
}

pub async fn booking_counter(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = proposal_action(body, Action::CounterPropose)?;
    run_booking(&app_state, booking_id, action, &actor, "Counter offer sent").await
}

pub async fn accept_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::Accept, &actor, "Booking accepted, contract ready for signature").await
}

pub async fn decline_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::Decline, &actor, "Booking declined").await
}

pub async fn cancel_booking(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::Cancel, &actor, "Booking cancelled").await
}

pub async fn form_booking_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let formed = app_state
        .lifecycle
        .form_contract(UnitRef::Booking(booking_id), &actor)
        .await?;

    Ok(Json(ApiResponse::success("Contract ready for review", formed.contract)))
}

pub async fn booking_progress(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let progress = app_state
        .lifecycle
        .progress(UnitRef::Booking(booking_id), &actor)
        .await?;

    Ok(Json(ApiResponse::success("Progress retrieved successfully", progress)))
}

pub async fn booking_on_way(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::MarkOnWay, &actor, "Marked on the way").await
}

pub async fn booking_start(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::StartWork, &actor, "Work started").await
}

pub async fn booking_seller_complete(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<CompletionDto>,
) -> Result<impl IntoResponse, HttpError> {
    let action = Action::MarkSellerComplete { photos: body.photos };
    run_booking(&app_state, booking_id, action, &actor, "Marked complete, awaiting the customer").await
}

pub async fn booking_buyer_complete(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    run_booking(&app_state, booking_id, Action::MarkBuyerComplete, &actor, "Job completed").await
}

// ─── Contracts ───────────────────────────────────────────────────────

pub async fn get_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let view = app_state.lifecycle.get_contract(contract_id, &actor).await?;

    Ok(Json(ApiResponse::success("Contract retrieved successfully", view)))
}

pub async fn sign_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<SignContractDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;

    let view = app_state
        .lifecycle
        .sign_contract(contract_id, &actor, body.version)
        .await?;

    let message = if view.fully_signed {
        "Contract signed by both parties"
    } else {
        "Contract signed, awaiting the other party"
    };
    Ok(Json(ApiResponse::success(message, view)))
}

pub async fn reject_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(contract_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let contract = app_state.lifecycle.reject_contract(contract_id, &actor).await?;

    Ok(Json(ApiResponse::success("Contract rejected", contract)))
}

pub async fn renegotiate_contract(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<ProposalDto>,
) -> Result<impl IntoResponse, HttpError> {
    validated(&body)?;
    let proposal = body.into_proposal().map_err(HttpError::bad_request)?;

    let view = app_state
        .lifecycle
        .renegotiate_contract(contract_id, &actor, proposal)
        .await?;

    Ok(Json(ApiResponse::success("New terms sent for signature", view)))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Method, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER},
        routes::create_router,
        testing::memory_state,
    };

    use super::*;

    async fn call(app: &Router, method: Method, uri: &str, actor: Option<(Uuid, &str)>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some((id, role)) = actor {
            builder = builder
                .header(ACTOR_ID_HEADER, id.to_string())
                .header(ACTOR_ROLE_HEADER, role);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn booking_flow_over_http() {
        let app = create_router(Arc::new(memory_state()));
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/bookings",
            Some((buyer, "buyer")),
            json!({ "seller_id": seller, "category": "plumbing", "description": "Leak [Flexible Date]", "budget": "₦450" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["schedule"]["flexible_date"], true);
        let booking_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/bookings/{}/response", booking_id),
            Some((seller, "seller")),
            json!({ "price": 500, "duration": "2 days" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "seller_responded");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/bookings/{}/accept", booking_id),
            Some((buyer, "buyer")),
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "accepted");
        assert_eq!(body["data"]["contract"]["status"], "pending_buyer");
        let contract_id = body["data"]["contract"]["id"].as_str().unwrap().to_string();

        // Seller cannot sign before the buyer.
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/contracts/{}/sign", contract_id),
            Some((seller, "seller")),
            json!({ "version": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["code"], "invalid_transition");

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/bookings/{}/progress", booking_id),
            Some((buyer, "buyer")),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step_number"], 1);
    }

    #[tokio::test]
    async fn conflicting_accept_carries_contract_id() {
        let app = create_router(Arc::new(memory_state()));
        let buyer = Uuid::new_v4();

        let (_, body) = call(
            &app,
            Method::POST,
            "/api/v1/requests",
            Some((buyer, "buyer")),
            json!({ "category": "painting", "budget_max": 900 }),
        )
        .await;
        let request_id = body["data"]["id"].as_str().unwrap().to_string();

        let mut quote_ids = Vec::new();
        for price in ["500", "450"] {
            let (status, body) = call(
                &app,
                Method::POST,
                &format!("/api/v1/requests/{}/quotes", request_id),
                Some((Uuid::new_v4(), "seller")),
                json!({ "price": price, "estimated_duration": "3 days", "proposal_text": "Two coats" }),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            quote_ids.push(body["data"]["id"].as_str().unwrap().to_string());
        }

        let (_, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/quotes/{}/accept", quote_ids[0]),
            Some((buyer, "buyer")),
            json!({}),
        )
        .await;
        let contract_id = body["data"]["contract"]["id"].clone();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/quotes/{}/accept", quote_ids[1]),
            Some((buyer, "buyer")),
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflicting_contract");
        assert_eq!(body["conflict_id"], contract_id);
    }

    #[tokio::test]
    async fn missing_or_bad_actor_headers_are_refused() {
        let app = create_router(Arc::new(memory_state()));

        let (status, body) = call(&app, Method::POST, "/api/v1/bookings", None, json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/v1/bookings/{}", Uuid::new_v4()),
            Some((Uuid::new_v4(), "landlord")),
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, Method::GET, "/health", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
