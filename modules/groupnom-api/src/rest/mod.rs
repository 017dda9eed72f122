pub mod error;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

use groupnom_common::{FoodMethod, GeoPoint, SelectionFilters};

use crate::AppState;
use error::{bad_body, error_body, session_error};

// --- Request structs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    filters: SelectionFilters,
    location: GeoPoint,
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    code: String,
    user_id: String,
}

/// Body of activate and reconfigure.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRequest {
    user_id: String,
    #[serde(default)]
    filters: SelectionFilters,
    location: GeoPoint,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    user_id: String,
    restaurant_id: String,
    liked: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodMethodRequest {
    user_id: String,
    method: FoodMethod,
    /// Host override that fixes the group's method.
    #[serde(default, alias = "final")]
    final_decision: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerQuery {
    user_id: Option<String>,
}

impl ViewerQuery {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

// --- Helpers ---

async fn view_response(state: &AppState, code: &str, viewer: Option<&str>) -> Response {
    match state.sessions.session_view(code, viewer).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => session_error(e),
    }
}

// --- Handlers ---

pub async fn api_create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let created = match state
        .sessions
        .create_session(body.user_id, body.filters, body.location)
        .await
    {
        Ok(created) => created,
        Err(e) => return session_error(e),
    };

    match state
        .sessions
        .session_view(&created.code, Some(&created.host_id))
        .await
    {
        Ok(view) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "code": created.code,
                "hostId": created.host_id,
                "session": view,
            })),
        )
            .into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_init_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InitRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if body.code.trim().is_empty() || body.user_id.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "code and userId are required");
    }

    match state
        .sessions
        .init_pending_session(&body.code, &body.user_id)
        .await
    {
        Ok(session) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "code": session.code,
                "hostId": session.host_id,
                "status": session.status,
            })),
        )
            .into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_activate(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<RoundRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state
        .sessions
        .activate(&code, &body.user_id, body.filters, body.location)
        .await
    {
        Ok(_) => view_response(&state, &code, Some(&body.user_id)).await,
        Err(e) => session_error(e),
    }
}

/// Session view. A `userId` in the query joins that user first, which is how
/// guests enter a session from a shared link.
pub async fn api_session(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(q): Query<ViewerQuery>,
) -> Response {
    let viewer = q.user_id();
    if let Some(user_id) = viewer {
        if let Err(e) = state.sessions.join(&code, user_id).await {
            return session_error(e);
        }
    }
    view_response(&state, &code, viewer).await
}

pub async fn api_status(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(q): Query<ViewerQuery>,
) -> Response {
    match state.sessions.status(&code, q.user_id()).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_vote(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state
        .sessions
        .vote(&code, &body.user_id, &body.restaurant_id, body.liked)
        .await
    {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_close_voting(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<HostRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.sessions.close_voting(&code, &body.user_id).await {
        Ok(_) => view_response(&state, &code, Some(&body.user_id)).await,
        Err(e) => session_error(e),
    }
}

pub async fn api_set_reconfiguring(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<HostRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.sessions.request_reconfigure(&code, &body.user_id).await {
        Ok(session) => Json(serde_json::json!({
            "code": session.code,
            "status": session.status,
        }))
        .into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_reconfigure(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<RoundRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state
        .sessions
        .reconfigure(&code, &body.user_id, body.filters, body.location)
        .await
    {
        Ok(_) => view_response(&state, &code, Some(&body.user_id)).await,
        Err(e) => session_error(e),
    }
}

pub async fn api_results(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match state.sessions.results(&code).await {
        Ok(Some(results)) => Json(serde_json::json!({ "results": results })).into_response(),
        Ok(None) => Json(serde_json::json!({
            "results": null,
            "message": "No votes have been cast yet",
        }))
        .into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_food_method(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match state.sessions.food_method_tallies(&code).await {
        Ok(tallies) => Json(tallies).into_response(),
        Err(e) => session_error(e),
    }
}

pub async fn api_food_method_vote(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: Result<Json<FoodMethodRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let outcome = if body.final_decision {
        state
            .sessions
            .set_food_method_result(&code, &body.user_id, body.method)
            .await
    } else {
        state
            .sessions
            .vote_food_method(&code, &body.user_id, body.method)
            .await
    };

    match outcome {
        Ok(tallies) => Json(tallies).into_response(),
        Err(e) => session_error(e),
    }
}
