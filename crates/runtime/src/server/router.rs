use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use mesh_memory::{
    CleanupReport, ConversationTurn, FeedbackOutcome, MemoryStats, Profile, Recommendations,
    UserStats,
};
use mesh_skills::SkillStats;

use super::ApiError;
use crate::bot::{BotReply, MeshBot};

/// Channel recorded when the client does not name one.
pub const DEFAULT_CHANNEL: &str = "api";
const DEFAULT_HISTORY_LIMIT: usize = 10;

pub fn build_router(bot: Arc<MeshBot>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .nest("/api", api_router())
        .layer(Extension(bot))
}

fn api_router() -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .route("/feedback", post(post_feedback))
        .route("/users/{user_id}/profile", get(get_profile))
        .route("/users/{user_id}/history", get(get_history))
        .route("/users/{user_id}/stats", get(get_user_stats))
        .route("/users/{user_id}/recommendations", get(get_recommendations))
        .route("/memory/stats", get(get_memory_stats))
        .route("/memory/cleanup", post(run_cleanup))
        .route("/skills", get(list_skills))
}

async fn health_check(Extension(bot): Extension<Arc<MeshBot>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "service": bot.config().bot.name,
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    channel_id: Option<String>,
}

async fn post_message(
    Extension(bot): Extension<Arc<MeshBot>>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<BotReply>), ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    // Dropped with the handler future when the client goes away.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let channel = req.channel_id.as_deref().unwrap_or(DEFAULT_CHANNEL);
    let reply = bot
        .handle_message(&req.user_id, &req.text, channel, &cancel)
        .await;

    let status = if reply.timed_out() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(reply)))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    satisfaction: Option<i64>,
    #[serde(default)]
    feedback: String,
}

async fn post_feedback(
    Extension(bot): Extension<Arc<MeshBot>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackOutcome>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    let rating = match req.satisfaction {
        None => None,
        Some(value @ 1..=5) => Some(value as u8),
        Some(value) => {
            return Err(ApiError::bad_request(format!(
                "satisfaction must be between 1 and 5, got {value}"
            )));
        }
    };
    if rating.is_none() && req.feedback.trim().is_empty() {
        return Err(ApiError::bad_request("satisfaction or feedback is required"));
    }

    let outcome = bot.submit_feedback(&req.user_id, rating, &req.feedback).await;
    Ok(Json(outcome))
}

async fn get_profile(
    Extension(bot): Extension<Arc<MeshBot>>,
    Path(user_id): Path<String>,
) -> Json<Profile> {
    Json(bot.memory().get_profile(&user_id))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(
    Extension(bot): Extension<Arc<MeshBot>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ConversationTurn>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(bot.memory().get_history(&user_id, limit))
}

async fn get_user_stats(
    Extension(bot): Extension<Arc<MeshBot>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserStats>, ApiError> {
    bot.memory()
        .user_stats(&user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user"))
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    /// Message the user is about to send, if any.
    message: Option<String>,
}

async fn get_recommendations(
    Extension(bot): Extension<Arc<MeshBot>>,
    Path(user_id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<Recommendations>, ApiError> {
    bot.memory()
        .recommendations(&user_id, Utc::now(), query.message.as_deref())
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user"))
}

async fn get_memory_stats(Extension(bot): Extension<Arc<MeshBot>>) -> Json<MemoryStats> {
    Json(bot.memory().stats())
}

async fn run_cleanup(
    Extension(bot): Extension<Arc<MeshBot>>,
) -> Result<Json<CleanupReport>, ApiError> {
    let report = bot.memory().cleanup(Utc::now()).await?;
    Ok(Json(report))
}

async fn list_skills(Extension(bot): Extension<Arc<MeshBot>>) -> Json<Vec<SkillStats>> {
    Json(bot.skills().stats())
}
