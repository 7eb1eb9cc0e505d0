//! Paid image generation

use axum::{extract::State, Extension, Json};

use crate::{
    auth::AuthUser,
    error::ApiResult,
    generation::{GenerateResponse, GenerationRequest},
    state::AppState,
};

/// POST /api/generate
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let response = state
        .generation
        .run(&auth_user.identity(), &request)
        .await?;
    Ok(Json(response))
}
