use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::adapters::http::state::HttpState;
use crate::application::dto::{FrameQuery, OkResponse, SettingsPayload};
use crate::domain::errors::{ErrorKind, PipelineError};
use crate::domain::settings::Receiver;

fn error_response(e: PipelineError) -> Response {
    let status = match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "petición fallida");
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

pub async fn get_status(State(st): State<HttpState>) -> impl IntoResponse {
    Json(st.pipeline.status())
}

pub async fn get_frame(State(st): State<HttpState>, Query(q): Query<FrameQuery>) -> Response {
    match st.pipeline.latest_frame_jpeg(q.kind).await {
        Ok(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn request_reconnect(State(st): State<HttpState>) -> impl IntoResponse {
    st.pipeline.request_reconnect();
    Json(OkResponse { ok: true })
}

pub async fn get_settings(State(st): State<HttpState>, Path(receiver): Path<String>) -> Response {
    let Some(receiver) = Receiver::parse(&receiver) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": format!("receptor desconocido '{receiver}' (camera | model)") })),
        )
            .into_response();
    };
    match st.settings.get(receiver).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn update_settings(State(st): State<HttpState>, Json(payload): Json<SettingsPayload>) -> Response {
    match st.settings.update(payload).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_object(State(st): State<HttpState>, Path(name): Path<String>) -> Response {
    match st.records.object(name).await {
        Ok(object) => Json(object).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_objects(State(st): State<HttpState>) -> Response {
    match st.records.objects().await {
        Ok(photo) => Json(photo).into_response(),
        Err(e) => error_response(e),
    }
}
