use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Extension, Json, Router,
    extract::{
        FromRequest, FromRequestParts, Path, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tower_http::limit::RequestBodyLimitLayer;

use crate::auth::IdentityProvider;
use mealplan_core::error::PlanError;
use mealplan_core::models::{GroceryItem, MealEntry, MealPlan, MealPlanDetail, NewRecipe, Recipe};
use mealplan_core::service::MealPlanService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
pub(crate) struct AppState {
    service: Arc<Mutex<MealPlanService>>,
    identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub(crate) fn new(service: MealPlanService, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            identity,
        }
    }

    fn service(&self) -> MutexGuard<'_, MealPlanService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner id resolved by [`require_auth`] for the current request.
#[derive(Clone)]
struct Caller(String);

// --- Request / Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePlanRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    end_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMealRequest {
    #[serde(default)]
    date: String,
    #[serde(default)]
    meal_type: String,
    #[serde(default)]
    recipe_id: String,
}

#[derive(Deserialize)]
struct CheckRequest {
    checked: bool,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct ReconcileResponse {
    appended: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Unauthorized(msg) => Self::Unauthorized(msg),
            PlanError::Validation(msg) => Self::BadRequest(msg),
            PlanError::NotFound(msg) => Self::NotFound(msg),
            PlanError::Storage(err) => Self::Internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge("Request body too large".to_string())
        } else {
            Self::BadRequest(rejection.body_text())
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// --- Extractors ---

/// `Json` whose rejections use the API's `{"error"}` body.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

/// `Path` whose rejections use the API's `{"error"}` body.
struct ApiPath<T>(T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let credential = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match state.identity.resolve_caller(credential) {
        Ok(owner_id) => {
            request.extensions_mut().insert(Caller(owner_id));
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

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

// --- Meal plan handlers ---

async fn create_plan(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiJson(req): ApiJson<CreatePlanRequest>,
) -> Result<(StatusCode, Json<MealPlan>), ApiError> {
    let plan = state
        .service()
        .create_plan(&owner, &req.name, &req.start_date, &req.end_date)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn list_plans(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let plans = state.service().list_plans(&owner)?;
    Ok(Json(plans))
}

async fn get_plan(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<MealPlanDetail>, ApiError> {
    let plan = state.service().get_plan(&owner, &id)?;
    Ok(Json(plan))
}

async fn add_meal(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<AddMealRequest>,
) -> Result<(StatusCode, Json<MealEntry>), ApiError> {
    let meal = state
        .service()
        .add_meal(&owner, &id, &req.date, &req.meal_type, &req.recipe_id)?;
    Ok((StatusCode::CREATED, Json(meal)))
}

// --- Grocery list handlers ---

async fn check_grocery_item(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath((id, index)): ApiPath<(String, usize)>,
    ApiJson(req): ApiJson<CheckRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .service()
        .set_grocery_item_checked(&owner, &id, index, req.checked)?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn check_grocery_item_by_id(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath((id, item_id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<CheckRequest>,
) -> Result<Json<GroceryItem>, ApiError> {
    let item = state
        .service()
        .set_grocery_item_checked_by_id(&owner, &id, &item_id, req.checked)?;
    Ok(Json(item))
}

async fn reconcile_grocery_list(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let appended = state.service().reconcile_grocery_list(&owner, &id)?;
    Ok(Json(ReconcileResponse { appended }))
}

async fn export_grocery_csv(
    State(state): State<AppState>,
    Extension(Caller(owner)): Extension<Caller>,
    ApiPath(id): ApiPath<String>,
) -> Result<Response, ApiError> {
    let csv = state.service().grocery_list_csv(&owner, &id)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"grocery-{id}.csv\""),
            ),
        ],
        csv,
    )
        .into_response())
}

// --- Recipe handlers ---

async fn create_recipe(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewRecipe>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let recipe = state.service().create_recipe(&req)?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state.service().list_recipes()?;
    Ok(Json(recipes))
}

async fn get_recipe(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = state.service().get_recipe(&id)?;
    Ok(Json(recipe))
}

// --- Router ---

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/meal-plans", post(create_plan).get(list_plans))
        .route("/api/meal-plans/{id}", get(get_plan))
        .route("/api/meal-plans/{id}/meals", post(add_meal))
        .route(
            "/api/meal-plans/{id}/grocery/{index}",
            patch(check_grocery_item),
        )
        .route(
            "/api/meal-plans/{id}/grocery/items/{item_id}",
            patch(check_grocery_item_by_id),
        )
        .route(
            "/api/meal-plans/{id}/grocery/reconcile",
            post(reconcile_grocery_list),
        )
        .route("/api/meal-plans/{id}/grocery.csv", get(export_grocery_csv))
        .route("/api/recipes", post(create_recipe).get(list_recipes))
        .route("/api/recipes/{id}", get(get_recipe))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub(crate) async fn start_server(
    state: AppState,
    port: u16,
    bind: &str,
    auth: bool,
) -> anyhow::Result<()> {
    if !auth {
        tracing::warn!("authentication disabled (--no-auth); every request acts as the local user");
        if bind != "127.0.0.1" && bind != "localhost" {
            tracing::warn!(
                bind,
                "listening beyond localhost with no authentication; any device on your network can edit plans"
            );
        }
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::sign;
    use crate::auth::{JwtIdentity, StaticIdentity};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn test_app() -> Router {
        let service = MealPlanService::new_in_memory().unwrap();
        build_router(AppState::new(service, Arc::new(JwtIdentity::new(SECRET))))
    }

    fn bearer(user: &str) -> String {
        format!("Bearer {}", sign(SECRET, user, 3600))
    }

    fn json_request(method: &str, uri: &str, user: &str, body: &serde_json::Value) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", bearer(user))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, user: &str) -> Request {
        axum::http::Request::get(uri)
            .header("Authorization", bearer(user))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn create_recipe_via_api(app: &Router, user: &str) -> String {
        let (status, recipe) = send(
            app,
            json_request(
                "POST",
                "/api/recipes",
                user,
                &serde_json::json!({
                    "title": "Tomato Salad",
                    "ingredients": [
                        {"name": "Tomato", "amount": "2", "unit": "pcs"},
                        {"name": "Olive oil", "amount": "1", "unit": "tbsp"}
                    ]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        recipe["id"].as_str().unwrap().to_string()
    }

    async fn create_plan_via_api(app: &Router, user: &str) -> String {
        let (status, plan) = send(
            app,
            json_request(
                "POST",
                "/api/meal-plans",
                user,
                &serde_json::json!({
                    "name": "Week 1",
                    "startDate": "2024-01-01",
                    "endDate": "2024-01-07"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        plan["id"].as_str().unwrap().to_string()
    }

    async fn add_meal_via_api(app: &Router, user: &str, plan_id: &str, recipe_id: &str) -> StatusCode {
        let (status, _) = send(
            app,
            json_request(
                "POST",
                &format!("/api/meal-plans/{plan_id}/meals"),
                user,
                &serde_json::json!({
                    "date": "2024-01-02",
                    "mealType": "dinner",
                    "recipeId": recipe_id
                }),
            ),
        )
        .await;
        status
    }

    #[tokio::test]
    async fn auth_missing_token_returns_401() {
        let app = test_app();
        let (status, json) = send(
            &app,
            axum::http::Request::get("/api/meal-plans")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Missing bearer token");
    }

    #[tokio::test]
    async fn auth_bad_token_returns_401() {
        let app = test_app();
        let forged = sign("not-the-secret", "alice", 3600);
        let (status, json) = send(
            &app,
            axum::http::Request::get("/api/meal-plans")
                .header("Authorization", format!("Bearer {forged}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn no_auth_mode_allows_requests() {
        let service = MealPlanService::new_in_memory().unwrap();
        let app = build_router(AppState::new(service, Arc::new(StaticIdentity::new("local"))));
        let (status, json) = send(
            &app,
            axum::http::Request::get("/api/meal-plans")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app();
        let response = app
            .oneshot(
                axum::http::Request::get("/api/meal-plans")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
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
    async fn create_plan_returns_201_with_camel_case() {
        let app = test_app();
        let (status, plan) = send(
            &app,
            json_request(
                "POST",
                "/api/meal-plans",
                "alice",
                &serde_json::json!({
                    "name": "Week 1",
                    "startDate": "2024-01-01",
                    "endDate": "2024-01-07"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(plan["name"], "Week 1");
        assert_eq!(plan["ownerId"], "alice");
        assert_eq!(plan["startDate"], "2024-01-01");
        assert_eq!(plan["meals"], serde_json::json!([]));
        assert_eq!(plan["groceryList"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_plan_missing_fields_returns_400() {
        let app = test_app();
        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/meal-plans",
                "alice",
                &serde_json::json!({"startDate": "2024-01-01", "endDate": "2024-01-07"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "name is required");

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/meal-plans",
                "alice",
                &serde_json::json!({"name": "Week 1", "startDate": "2024-01-01"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_plans_is_scoped_to_caller() {
        let app = test_app();
        create_plan_via_api(&app, "alice").await;

        let (status, mine) = send(&app, get_request("/api/meal-plans", "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let (_, theirs) = send(&app, get_request("/api/meal-plans", "bob")).await;
        assert!(theirs.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_and_unknown_plan_both_404() {
        let app = test_app();
        let plan_id = create_plan_via_api(&app, "alice").await;

        let (foreign_status, foreign) =
            send(&app, get_request(&format!("/api/meal-plans/{plan_id}"), "bob")).await;
        let (unknown_status, unknown) =
            send(&app, get_request("/api/meal-plans/no-such-plan", "bob")).await;

        assert_eq!(foreign_status, StatusCode::NOT_FOUND);
        assert_eq!(unknown_status, StatusCode::NOT_FOUND);
        assert_eq!(foreign, unknown);
        assert_eq!(foreign["error"], "Meal plan not found");
    }

    #[tokio::test]
    async fn add_meal_then_get_hydrated_plan() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;

        assert_eq!(
            add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await,
            StatusCode::CREATED
        );

        let (status, plan) =
            send(&app, get_request(&format!("/api/meal-plans/{plan_id}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plan["meals"][0]["recipeName"], "Tomato Salad");
        assert_eq!(plan["meals"][0]["mealType"], "dinner");
        assert_eq!(plan["meals"][0]["recipe"]["id"], recipe_id);
        assert_eq!(plan["groceryList"].as_array().unwrap().len(), 2);
        assert_eq!(plan["groceryList"][0]["ingredient"], "Tomato");
        assert_eq!(plan["groceryList"][0]["checked"], false);
    }

    #[tokio::test]
    async fn add_meal_unknown_recipe_returns_404() {
        let app = test_app();
        let plan_id = create_plan_via_api(&app, "alice").await;
        assert_eq!(
            add_meal_via_api(&app, "alice", &plan_id, "missing").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn add_meal_missing_type_returns_400() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        let (status, json) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/meal-plans/{plan_id}/meals"),
                "alice",
                &serde_json::json!({"date": "2024-01-02", "recipeId": recipe_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "mealType is required");
    }

    #[tokio::test]
    async fn check_grocery_item_by_index() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (status, json) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/1"),
                "alice",
                &serde_json::json!({"checked": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"success": true}));

        let (_, plan) =
            send(&app, get_request(&format!("/api/meal-plans/{plan_id}"), "alice")).await;
        assert_eq!(plan["groceryList"][0]["checked"], false);
        assert_eq!(plan["groceryList"][1]["checked"], true);
    }

    #[tokio::test]
    async fn check_out_of_range_index_returns_400() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (status, _) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/2"),
                "alice",
                &serde_json::json!({"checked": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Negative indexes never reach the engine
        let (status, json) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/-1"),
                "alice",
                &serde_json::json!({"checked": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    fn raw_request(method: &str, uri: &str, user: &str, body: impl Into<Body>) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", bearer(user))
            .header("Content-Type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn malformed_json_returns_400_with_error_body() {
        let app = test_app();
        let (status, json) = send(
            &app,
            raw_request("POST", "/api/meal-plans", "alice", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn missing_checked_field_returns_400_with_error_body() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (status, json) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/0"),
                "alice",
                &serde_json::json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("checked"));

        let (_, plan) =
            send(&app, get_request(&format!("/api/meal-plans/{plan_id}"), "alice")).await;
        assert_eq!(plan["groceryList"][0]["checked"], false);
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app();
        let big_title = "a".repeat(BODY_LIMIT);
        let body = serde_json::json!({"title": big_title, "ingredients": []}).to_string();

        let (status, json) = send(&app, raw_request("POST", "/api/recipes", "alice", body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"], "Request body too large");

        let (_, recipes) = send(&app, get_request("/api/recipes", "alice")).await;
        assert!(recipes.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_foreign_plan_returns_404() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (status, _) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/0"),
                "bob",
                &serde_json::json!({"checked": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn check_grocery_item_by_stable_id() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (_, plan) =
            send(&app, get_request(&format!("/api/meal-plans/{plan_id}"), "alice")).await;
        let item_id = plan["groceryList"][1]["id"].as_str().unwrap().to_string();

        let (status, item) = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/meal-plans/{plan_id}/grocery/items/{item_id}"),
                "alice",
                &serde_json::json!({"checked": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["id"], item_id);
        assert_eq!(item["ingredient"], "Olive oil");
        assert_eq!(item["checked"], true);
    }

    #[tokio::test]
    async fn reconcile_on_complete_plan_appends_nothing() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                &format!("/api/meal-plans/{plan_id}/grocery/reconcile"),
                "alice",
                &serde_json::json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"appended": 0}));
    }

    #[tokio::test]
    async fn grocery_csv_export() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;
        let plan_id = create_plan_via_api(&app, "alice").await;
        add_meal_via_api(&app, "alice", &plan_id, &recipe_id).await;

        let response = app
            .clone()
            .oneshot(get_request(
                &format!("/api/meal-plans/{plan_id}/grocery.csv"),
                "alice",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/csv; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("position,ingredient,amount,unit,checked"));
        assert!(text.contains("0,Tomato,2,pcs,false"));
    }

    #[tokio::test]
    async fn recipe_get_and_list() {
        let app = test_app();
        let recipe_id = create_recipe_via_api(&app, "alice").await;

        let (status, recipe) =
            send(&app, get_request(&format!("/api/recipes/{recipe_id}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(recipe["title"], "Tomato Salad");
        assert_eq!(recipe["ingredients"].as_array().unwrap().len(), 2);

        let (status, recipes) = send(&app, get_request("/api/recipes", "bob")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(recipes.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get_request("/api/recipes/missing", "alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_recipe_blank_title_returns_400() {
        let app = test_app();
        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/recipes",
                "alice",
                &serde_json::json!({"title": "  ", "ingredients": []}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Recipe title must not be empty");
    }

    #[test]
    fn storage_errors_do_not_leak() {
        let response =
            ApiError::from(PlanError::Storage(anyhow::anyhow!("disk on fire"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
