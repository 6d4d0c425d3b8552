use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, Path, Query, Request, State, rejection::JsonRejection,
    },
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bite_core::day::local_day;
use bite_core::error::CoreError;
use bite_core::models::{DailyCalorie, FoodLogEntry, LoggedFood, NewUser, UpdateUser, UserProfile};
use bite_core::recognition::FoodRecognition;
use bite_core::service::CalorieService;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::ai::{AiError, FoodAnalyzer, RetryPolicy, transcribe_with_retry};

const BODY_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

#[derive(Clone)]
pub struct AppState {
    service: CalorieService,
    analyzer: Option<Arc<dyn FoodAnalyzer>>,
    retry: RetryPolicy,
}

impl AppState {
    pub fn new(
        service: CalorieService,
        analyzer: Option<Arc<dyn FoodAnalyzer>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            analyzer,
            retry,
        }
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    id: i64,
    username: String,
    daily_calorie_goal: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFoodLogRequest {
    food_name: String,
    calories: i64,
}

#[derive(Deserialize)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoodRecognitionRequest {
    #[serde(default)]
    base64_audio: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeFoodRequest {
    #[serde(default)]
    food_text: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    /// 400 with a short machine-readable reason alongside the message.
    Rejected {
        message: &'static str,
        error: String,
    },
    Unauthorized,
    NotFound(String),
    MethodNotAllowed,
    PayloadTooLarge,
    AiNotConfigured,
    Upstream {
        message: &'static str,
        source: AiError,
    },
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::Rejected { message, error } => {
                (StatusCode::BAD_REQUEST, message.to_string(), Some(error))
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid credentials".to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed".to_string(),
                None,
            ),
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large".to_string(),
                None,
            ),
            Self::AiNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OpenAI API key not configured".to_string(),
                Some("Missing API key".to_string()),
            ),
            Self::Upstream { message, source } => {
                tracing::warn!(error = %source, "{message}");
                (
                    StatusCode::BAD_GATEWAY,
                    message.to_string(),
                    Some(source.to_string()),
                )
            }
            Self::Internal(err) => {
                tracing::error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };
        (status, Json(ErrorResponse { message, error })).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            CoreError::Validation(msg) | CoreError::Conflict(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.into()),
        }
    }
}

/// `Json` whose rejections use the API's error body.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(ApiError::PayloadTooLarge)
            }
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what} id '{raw}'")))
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp reduced to its local day.
fn parse_query_date(raw: &str) -> Result<NaiveDate, ApiError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| local_day(dt.with_timezone(&Utc)))
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{raw}'. Use YYYY-MM-DD")))
}

fn parse_optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(parse_query_date)
        .transpose()
}

/// Accepts bare base64 or a `data:<mime>;base64,` URL.
fn decode_audio(raw: &str) -> Result<Vec<u8>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::Rejected {
            message: "No audio recorded",
            error: "Empty audio data".to_string(),
        });
    }
    let payload = raw
        .split_once("base64,")
        .map_or(raw, |(_, data)| data);
    let audio = BASE64.decode(payload).map_err(|e| ApiError::Rejected {
        message: "Invalid audio data",
        error: e.to_string(),
    })?;
    if audio.is_empty() {
        return Err(ApiError::Rejected {
            message: "No audio recorded",
            error: "Empty buffer".to_string(),
        });
    }
    Ok(audio)
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers: users ---

async fn create_user(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let user = state.service.create_user(&req)?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let id = parse_id(&id, "user")?;
    let user = state
        .service
        .get_user(id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(Json(user.into()))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateUser>,
) -> Result<Json<UserProfile>, ApiError> {
    let id = parse_id(&id, "user")?;
    let user = state.service.update_user(id, &req)?;
    Ok(Json(user.into()))
}

async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .service
        .authenticate(&req.username, &req.password)?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(LoginResponse {
        id: user.id,
        username: user.username,
        daily_calorie_goal: user.daily_calorie_goal,
    }))
}

// --- Handlers: food log ---

async fn list_food_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<FoodLogEntry>>, ApiError> {
    let user_id = parse_id(&id, "user")?;
    let today = state.service.today();
    let start = parse_optional_date(range.start.as_deref())?.unwrap_or(today);
    let end = parse_optional_date(range.end.as_deref())?.unwrap_or(today);
    Ok(Json(state.service.food_logs_between(user_id, start, end)?))
}

async fn todays_food_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FoodLogEntry>>, ApiError> {
    let user_id = parse_id(&id, "user")?;
    Ok(Json(state.service.food_logs_today(user_id)?))
}

async fn create_food_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CreateFoodLogRequest>,
) -> Result<Json<LoggedFood>, ApiError> {
    let user_id = parse_id(&id, "user")?;
    let logged = state
        .service
        .log_food(user_id, &req.food_name, req.calories)?;
    Ok(Json(logged))
}

async fn list_daily_calories(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<DailyCalorie>>, ApiError> {
    let user_id = parse_id(&id, "user")?;
    let start = parse_optional_date(range.start.as_deref())?;
    let end = parse_optional_date(range.end.as_deref())?;
    Ok(Json(
        state.service.daily_calories_between(user_id, start, end)?,
    ))
}

// --- Handlers: AI ---

fn analyzer(state: &AppState) -> Result<&dyn FoodAnalyzer, ApiError> {
    state.analyzer.as_deref().ok_or(ApiError::AiNotConfigured)
}

async fn food_recognition(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FoodRecognitionRequest>,
) -> Result<Json<FoodRecognition>, ApiError> {
    let analyzer = analyzer(&state)?;
    let audio = decode_audio(&req.base64_audio)?;

    let transcript = transcribe_with_retry(analyzer, &audio, state.retry)
        .await
        .map_err(|source| ApiError::Upstream {
            message: "Failed to transcribe audio",
            source,
        })?;
    if transcript.trim().is_empty() {
        return Err(ApiError::Rejected {
            message: "No speech detected in the recording",
            error: "Empty transcription".to_string(),
        });
    }

    let mut recognition =
        analyzer
            .analyze(&transcript)
            .await
            .map_err(|source| ApiError::Upstream {
                message: "Failed to analyze food",
                source,
            })?;
    recognition.transcript = Some(transcript);
    Ok(Json(recognition))
}

async fn analyze_food(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AnalyzeFoodRequest>,
) -> Result<Json<FoodRecognition>, ApiError> {
    let analyzer = analyzer(&state)?;
    let text = req.food_text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Please enter what you ate".to_string()));
    }

    let mut recognition = analyzer
        .analyze(text)
        .await
        .map_err(|source| ApiError::Upstream {
            message: "Failed to analyze food description",
            source,
        })?;
    recognition.transcript = Some(text.to_string());
    Ok(Json(recognition))
}

// --- Fallbacks ---

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user).patch(update_user))
        .route("/api/login", post(login))
        .route(
            "/api/users/{id}/food-logs",
            get(list_food_logs).post(create_food_log),
        )
        .route("/api/users/{id}/food-logs/today", get(todays_food_logs))
        .route("/api/users/{id}/daily-calories", get(list_daily_calories))
        .route("/api/food-recognition", post(food_recognition))
        .route("/api/analyze-food", post(analyze_food))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(state: AppState, bind: &str, port: u16) -> anyhow::Result<()> {
    if state.analyzer.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; AI routes will answer 500");
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!("Listening on http://{bind}:{port}");
    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!("Listening on {bind}. Any device on your network can reach this API.");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ai::tests::ScriptedAnalyzer;
    use axum::body::Body;
    use bite_core::memory::MemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(analyzer: Option<Arc<dyn FoodAnalyzer>>) -> AppState {
        let service = CalorieService::new(Arc::new(MemoryStore::new()));
        service.ensure_demo_user().unwrap();
        AppState::new(
            service,
            analyzer,
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    fn test_app() -> Router {
        build_router(test_state(None))
    }

    async fn send(app: Router, request: axum::http::Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn logging_food_updates_daily_total() {
        let app = test_app();

        let (status, first) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/1/food-logs",
                &serde_json::json!({"foodName": "Apple", "calories": 95}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["log"]["foodName"], "Apple");
        assert_eq!(first["dailyCalorie"]["totalCalories"], 95);

        let (_, second) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/1/food-logs",
                &serde_json::json!({"foodName": "Toast", "calories": 120}),
            ),
        )
        .await;
        assert_eq!(second["dailyCalorie"]["totalCalories"], 215);
        assert_eq!(second["dailyCalorie"]["id"], first["dailyCalorie"]["id"]);

        let (status, today) = send(app.clone(), get("/api/users/1/food-logs/today")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = today
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["foodName"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Apple", "Toast"]);

        let (status, totals) = send(app, get("/api/users/1/daily-calories")).await;
        assert_eq!(status, StatusCode::OK);
        let totals = totals.as_array().unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0]["totalCalories"], 215);
    }

    #[tokio::test]
    async fn food_log_validation_and_missing_user() {
        let app = test_app();

        let (status, body) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/1/food-logs",
                &serde_json::json!({"foodName": "  ", "calories": 95}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());

        let (status, _) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/1/food-logs",
                &serde_json::json!({"foodName": "Apple", "calories": -3}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/42/food-logs",
                &serde_json::json!({"foodName": "Apple", "calories": 95}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, totals) = send(app, get("/api/users/1/daily-calories")).await;
        assert!(totals.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_returns_400() {
        let response = test_app()
            .oneshot(
                axum::http::Request::post("/api/users/1/food-logs")
                    .header("content-type", "application/json")
                    .body(Body::from("{ not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_numeric_id_returns_400() {
        let (status, body) = send(test_app(), get("/api/users/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid user id 'abc'");
    }

    #[tokio::test]
    async fn invalid_query_date_returns_400() {
        let (status, _) = send(
            test_app(),
            get("/api/users/1/food-logs?start=yesterday-ish"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn food_log_range_query() {
        let app = test_app();
        send(
            app.clone(),
            json_request(
                "POST",
                "/api/users/1/food-logs",
                &serde_json::json!({"foodName": "Apple", "calories": 95}),
            ),
        )
        .await;

        let (status, logs) = send(
            app.clone(),
            get("/api/users/1/food-logs?start=2001-01-01&end=2001-01-31"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(logs.as_array().unwrap().is_empty());

        let (_, logs) = send(app, get("/api/users/1/food-logs")).await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_lifecycle_hides_password() {
        let app = test_app();

        let (status, created) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/users",
                &serde_json::json!({"username": "sam", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created.get("password").is_none());
        assert_eq!(created["dailyCalorieGoal"], 2000);
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = send(
            app.clone(),
            json_request(
                "PATCH",
                &format!("/api/users/{id}"),
                &serde_json::json!({"dailyCalorieGoal": 1800, "darkMode": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["dailyCalorieGoal"], 1800);
        assert_eq!(updated["darkMode"], true);

        let (status, fetched) = send(app.clone(), get(&format!("/api/users/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["username"], "sam");

        let (status, body) = send(app.clone(), get("/api/users/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found");

        let (status, _) = send(
            app,
            json_request(
                "PATCH",
                "/api/users/999",
                &serde_json::json!({"darkMode": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_username_returns_400() {
        let (status, _) = send(
            test_app(),
            json_request(
                "POST",
                "/api/users",
                &serde_json::json!({"username": "demo", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn login_checks_credentials() {
        let app = test_app();

        let (status, body) = send(
            app.clone(),
            json_request(
                "POST",
                "/api/login",
                &serde_json::json!({"username": "demo", "password": "password"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "demo");
        assert_eq!(body["dailyCalorieGoal"], 2000);
        assert!(body.get("password").is_none());

        let (status, body) = send(
            app,
            json_request(
                "POST",
                "/api/login",
                &serde_json::json!({"username": "demo", "password": "nope"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn wrong_method_returns_405() {
        let (status, body) = send(
            test_app(),
            axum::http::Request::delete("/api/users/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["message"], "Method not allowed");
    }

    #[tokio::test]
    async fn unknown_path_returns_404() {
        let (status, _) = send(test_app(), get("/api/nothing-here")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let response = test_app()
            .oneshot(get("/api/users/1"))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let big_body = vec![b' '; BODY_LIMIT + 1];
        let response = test_app()
            .oneshot(
                axum::http::Request::post("/api/food-recognition")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/.bite/db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Internal server error");
        assert!(!json.to_string().contains("secret"));
    }

    // --- AI routes ---

    fn recognition_request(audio: &str) -> axum::http::Request<Body> {
        json_request(
            "POST",
            "/api/food-recognition",
            &serde_json::json!({ "base64Audio": audio }),
        )
    }

    fn with_analyzer(analyzer: Arc<ScriptedAnalyzer>) -> Router {
        build_router(test_state(Some(analyzer)))
    }

    #[tokio::test]
    async fn ai_routes_without_key_return_500() {
        let (status, body) = send(test_app(), recognition_request("UklGRg==")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "OpenAI API key not configured");
        assert_eq!(body["error"], "Missing API key");

        let (status, _) = send(
            test_app(),
            json_request(
                "POST",
                "/api/analyze-food",
                &serde_json::json!({"foodText": "an apple"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn food_recognition_retries_transcription() {
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
            Err(AiError::Empty),
            Ok("apple and toast".to_string()),
        ]));
        let (status, body) = send(
            with_analyzer(analyzer.clone()),
            recognition_request(&BASE64.encode(b"RIFF....WAVE")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(analyzer.calls(), 2);
        assert_eq!(body["transcript"], "apple and toast");
        assert_eq!(body["foodItems"].as_array().unwrap().len(), 2);
        assert_eq!(body["totalCalories"], 200.0);
    }

    #[tokio::test]
    async fn food_recognition_gives_up_with_502() {
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
            Err(AiError::Empty),
            Err(AiError::Empty),
            Err(AiError::Empty),
        ]));
        let (status, body) = send(
            with_analyzer(analyzer.clone()),
            recognition_request(&BASE64.encode(b"RIFF")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(analyzer.calls(), 3);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn food_recognition_rejects_empty_audio() {
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
        let (status, body) = send(with_analyzer(analyzer.clone()), recognition_request("  ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No audio recorded");
        assert_eq!(body["error"], "Empty audio data");

        let (status, _) = send(
            with_analyzer(analyzer.clone()),
            recognition_request("!!not base64!!"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(analyzer.calls(), 0);
    }

    #[tokio::test]
    async fn food_recognition_reports_silence() {
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Ok(String::new())]));
        let (status, body) = send(
            with_analyzer(analyzer),
            recognition_request("data:audio/wav;base64,UklGRg=="),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No speech detected in the recording");
        assert_eq!(body["error"], "Empty transcription");
    }

    #[tokio::test]
    async fn analyze_food_returns_items() {
        let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
        let (status, body) = send(
            with_analyzer(analyzer.clone()),
            json_request(
                "POST",
                "/api/analyze-food",
                &serde_json::json!({"foodText": "rice and beans"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transcript"], "rice and beans");
        assert_eq!(body["foodItems"][1]["name"], "beans");
        // Text analysis never goes through transcription.
        assert_eq!(analyzer.calls(), 0);

        let (status, body) = send(
            with_analyzer(analyzer),
            json_request("POST", "/api/analyze-food", &serde_json::json!({"foodText": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please enter what you ate");
    }

    #[test]
    fn query_dates_accept_timestamps() {
        assert_eq!(
            parse_query_date("2024-06-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        let instant = "2024-06-15T12:00:00Z";
        let expected = local_day(DateTime::parse_from_rfc3339(instant).unwrap().with_timezone(&Utc));
        assert_eq!(parse_query_date(instant).unwrap(), expected);
        assert!(parse_query_date("15/06/2024").is_err());
    }
}
