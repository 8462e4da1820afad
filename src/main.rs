use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use hybridrec::algorithms::RecommendationSections;
use hybridrec::utils::metrics::OnlineMetrics;
use hybridrec::utils::validation::validate_rating;
use hybridrec::{
    init_tracing, AppState, Config, EventRecord, EventStats, EventType, ItemId, MatrixStats,
    Neighbor, NewEvent, RaterId, Rating, RecError, RecommendationResponse,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn reject(context: &str, e: RecError) -> ApiError {
    let status = if e.is_invalid_input() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!("{}: {}", context, e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(message.to_string())))
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    limit: Option<usize>,
    min_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct NeighborQuery {
    k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LatestEventsQuery {
    event_type: Option<EventType>,
    days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PredictedItem {
    item_id: ItemId,
    predicted_rating: f32,
}

#[derive(Debug, Serialize)]
struct CollaborativeResponse {
    rater_id: RaterId,
    recommendations: Vec<PredictedItem>,
    generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SubmitRatingRequest {
    rater_id: Option<RaterId>,
    item_id: ItemId,
    score: u8,
}

#[derive(Debug, Deserialize)]
struct ApproveRatingRequest {
    rater_id: RaterId,
    item_id: ItemId,
}

#[derive(Debug, Deserialize)]
struct LogEventRequest {
    rater_id: RaterId,
    item_id: ItemId,
    event_type: EventType,
    scope_key: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct LogEventResponse {
    created: bool,
    record: Option<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    item_id: ItemId,
    #[serde(default)]
    purchased: bool,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    serving: HashMap<String, u64>,
    engagement: OnlineMetrics,
    matrix: Option<MatrixStats>,
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HashMap<String, serde_json::Value>>> {
    let mut status = state.serving_service.health_check().await;
    status.insert("status".to_string(), "healthy".into());
    status.insert("service".to_string(), "hybridrec".into());
    status.insert("version".to_string(), env!("CARGO_PKG_VERSION").into());

    Json(ApiResponse::success(status))
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<CollaborativeResponse> {
    let defaults = &state.config.recommendation;
    let response = state
        .serving_service
        .serve_collaborative(
            rater_id,
            params.limit.unwrap_or(defaults.default_limit),
            params.min_score.unwrap_or(defaults.min_predicted_rating),
        )
        .await
        .map_err(|e| reject("Failed to get recommendations", e))?;

    Ok(Json(ApiResponse::success(CollaborativeResponse {
        rater_id,
        recommendations: response
            .recommendations
            .into_iter()
            .map(|item| PredictedItem {
                item_id: item.item_id,
                predicted_rating: item.score,
            })
            .collect(),
        generated_at: response.generated_at,
    })))
}

async fn get_hybrid_recommendations(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<RecommendationResponse> {
    let limit = params.limit.unwrap_or(state.config.recommendation.default_limit);
    let response = state
        .serving_service
        .serve_hybrid(rater_id, limit)
        .await
        .map_err(|e| reject("Failed to get hybrid recommendations", e))?;

    Ok(Json(ApiResponse::success(response)))
}

async fn get_recommendation_sections(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<RecommendationQuery>,
) -> ApiResult<RecommendationSections> {
    let limit = params.limit.unwrap_or(state.config.recommendation.default_limit);
    let sections = state
        .recommendation_service
        .recommendation_sections(rater_id, limit)
        .await
        .map_err(|e| reject("Failed to build recommendation sections", e))?;

    Ok(Json(ApiResponse::success(sections)))
}

async fn get_neighbors(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<NeighborQuery>,
) -> ApiResult<Vec<Neighbor>> {
    let k = params.k.unwrap_or(state.config.recommendation.k_neighbors);
    let neighbors = state
        .recommendation_service
        .find_neighbors(rater_id, k)
        .await
        .map_err(|e| reject("Failed to find neighbors", e))?;

    Ok(Json(ApiResponse::success(neighbors)))
}

async fn submit_rating(
    State(state): State<AppState>,
    Json(request): Json<SubmitRatingRequest>,
) -> ApiResult<Rating> {
    let rating = Rating {
        rater_id: request.rater_id,
        item_id: request.item_id,
        score: request.score,
        approved: false,
        created_at: Utc::now(),
    };
    validate_rating(&rating).map_err(|e| reject("Rejected rating", e))?;

    let stored = state
        .recommendation_service
        .submit_rating(rating)
        .await
        .map_err(|e| reject("Failed to store rating", e))?;

    Ok(Json(ApiResponse::success(stored)))
}

async fn approve_rating(
    State(state): State<AppState>,
    Json(request): Json<ApproveRatingRequest>,
) -> ApiResult<String> {
    let approved = state
        .recommendation_service
        .approve_rating(request.rater_id, request.item_id)
        .await
        .map_err(|e| reject("Failed to approve rating", e))?;

    if !approved {
        return Err(not_found("No rating for this rater and item"));
    }

    Ok(Json(ApiResponse::success("Rating approved".to_string())))
}

async fn rebuild_matrix(State(state): State<AppState>) -> ApiResult<MatrixStats> {
    let stats = state
        .recommendation_service
        .rebuild()
        .await
        .map_err(|e| reject("Failed to rebuild rating matrix", e))?;

    Ok(Json(ApiResponse::success(stats)))
}

async fn log_event(
    State(state): State<AppState>,
    Json(request): Json<LogEventRequest>,
) -> ApiResult<LogEventResponse> {
    let record = state
        .events
        .log_event_if_new(
            request.rater_id,
            request.item_id,
            request.event_type,
            &request.scope_key,
            request.metadata,
        )
        .await
        .map_err(|e| reject("Failed to log event", e))?;

    Ok(Json(ApiResponse::success(LogEventResponse {
        created: record.is_some(),
        record,
    })))
}

async fn bulk_log_events(
    State(state): State<AppState>,
    Json(batch): Json<Vec<NewEvent>>,
) -> ApiResult<Vec<EventRecord>> {
    let created = state
        .events
        .bulk_log_events(batch)
        .await
        .map_err(|e| reject("Failed to bulk log events", e))?;

    Ok(Json(ApiResponse::success(created)))
}

async fn get_latest_events(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<LatestEventsQuery>,
) -> ApiResult<Vec<EventRecord>> {
    let result = match params.event_type {
        Some(event_type) => state.events.latest_per_item(rater_id, event_type, params.days).await,
        None => state.events.latest_per_item_and_type(rater_id, params.days).await,
    };
    let events = result.map_err(|e| reject("Failed to read events", e))?;

    Ok(Json(ApiResponse::success(events)))
}

async fn get_event_stats(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Query(params): Query<DaysQuery>,
) -> ApiResult<EventStats> {
    let stats = state
        .events
        .event_stats(rater_id, params.days)
        .await
        .map_err(|e| reject("Failed to compute event stats", e))?;

    Ok(Json(ApiResponse::success(stats)))
}

async fn record_feedback(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<String> {
    if !state
        .serving_service
        .record_feedback(rater_id, request.item_id, request.purchased)
    {
        return Err(not_found("Item was not recommended to this rater"));
    }

    Ok(Json(ApiResponse::success("Feedback recorded".to_string())))
}

async fn clear_history(
    State(state): State<AppState>,
    Path(rater_id): Path<RaterId>,
) -> Json<ApiResponse<usize>> {
    let cleared = state.serving_service.tracker().clear(rater_id);
    info!(rater_id, cleared, "Cleared recommendation history");
    Json(ApiResponse::success(cleared))
}

async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsResponse>> {
    Json(ApiResponse::success(StatsResponse {
        serving: state.serving_service.get_serving_stats(),
        engagement: state.serving_service.online_metrics(None),
        matrix: state.recommendation_service.matrix_stats(),
    }))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/recommendations/:rater_id", get(get_recommendations))
        .route("/recommendations/:rater_id/hybrid", get(get_hybrid_recommendations))
        .route("/recommendations/:rater_id/sections", get(get_recommendation_sections))
        .route("/recommendations/:rater_id/feedback", post(record_feedback))
        .route("/recommendations/:rater_id/history", delete(clear_history))
        .route("/raters/:rater_id/neighbors", get(get_neighbors))
        .route("/ratings", post(submit_rating))
        .route("/ratings/approve", post(approve_rating))
        .route("/matrix/rebuild", post(rebuild_matrix))
        .route("/events", post(log_event))
        .route("/events/bulk", post(bulk_log_events))
        .route("/events/:rater_id/latest", get(get_latest_events))
        .route("/events/:rater_id/stats", get(get_event_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::var("HYBRIDREC_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::from_env()?,
    };
    info!("Starting hybridrec server with config: {:?}", config.server);

    let addr = config.server.socket_addr();
    let state = AppState::new(config).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
