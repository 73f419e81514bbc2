use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use iotauth_policy::PolicyEngineClient;
use iotauth_types::error::{ApiError, ErrorKind};
use iotauth_types::methods::policy::{
    AddPoliciesParams, AddPoliciesResponse, DeletePoliciesParams, DeletePoliciesResponse,
};
use iotauth_types::methods::token::{
    CreateApiKeyParams, CreateApiKeyResponse, RetrieveKeyResponse, RevokeResponse,
};
use iotauth_types::policy::{EntityType, PolicyReq, SubjectKind};
use iotauth_types::token::Token;
use serde::Serialize;

use crate::layer::RequestMetrics;
use crate::system::AuthService;

/// Shared handler state: the orchestrator plus the request counters `GET
/// /metrics` reports, mirroring the teacher's `Extension<Context>` handlers
/// (`covert-server::system::status::handle_status`) generalized to axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState<C: PolicyEngineClient> {
    service: AuthService<C>,
    metrics: RequestMetrics,
}

impl<C: PolicyEngineClient> AppState<C> {
    #[must_use]
    pub fn new(service: AuthService<C>, metrics: RequestMetrics) -> Self {
        Self { service, metrics }
    }
}

/// Adapts [`ApiError`] onto axum's response machinery; neither type lives in
/// this crate so a thin wrapper carries it across the orphan-rule boundary.
pub struct HttpError(ApiError);

impl From<ErrorKind> for HttpError {
    fn from(err: ErrorKind) -> Self {
        Self(ApiError::from(err))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.0.status_code;
        (status, Json(self.0)).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<Token> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .and_then(|raw| Token::from_str(raw).ok())
}

fn require_bearer_token(headers: &HeaderMap) -> Result<Token, HttpError> {
    bearer_token(headers).ok_or_else(|| {
        ErrorKind::AuthenticationError("missing Authorization: Bearer <token> header".into()).into()
    })
}

fn parse_key_id(id: &str) -> Result<ulid::Ulid, HttpError> {
    id.parse()
        .map_err(|_| ErrorKind::MalformedEntity(format!("`{id}` is not a valid key id")).into())
}

/// `POST /keys` (§6).
async fn create_api_key<C: PolicyEngineClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Json(params): Json<CreateApiKeyParams>,
) -> Result<Json<CreateApiKeyResponse>, HttpError> {
    let caller = require_bearer_token(&headers)?;
    let resp = state.service.create_api_key(&caller, params).await?;
    Ok(Json(resp))
}

/// `GET /keys/{id}` (§6).
async fn retrieve_key<C: PolicyEngineClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RetrieveKeyResponse>, HttpError> {
    let caller = require_bearer_token(&headers)?;
    let key_id = parse_key_id(&id)?;
    let resp = state.service.retrieve_key(&caller, key_id).await?;
    Ok(Json(resp))
}

/// `DELETE /keys/{id}` (§6).
async fn revoke_key<C: PolicyEngineClient>(
    State(state): State<AppState<C>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RevokeResponse>, HttpError> {
    let caller = require_bearer_token(&headers)?;
    let key_id = parse_key_id(&id)?;
    let resp = state.service.revoke(&caller, key_id).await?;
    Ok(Json(resp))
}

/// `POST /policies` (§6). Unauthenticated per §6's recognized-options table:
/// policy writes are gated inside `PolicyAgent`'s preconditions, not here.
async fn add_policies<C: PolicyEngineClient>(
    State(state): State<AppState<C>>,
    Json(params): Json<AddPoliciesParams>,
) -> Result<Json<AddPoliciesResponse>, HttpError> {
    let resp = state.service.add_policies(params).await?;
    Ok(Json(resp))
}

/// `PUT /policies` (§6).
async fn delete_policies<C: PolicyEngineClient>(
    State(state): State<AppState<C>>,
    Json(params): Json<DeletePoliciesParams>,
) -> Result<Json<DeletePoliciesResponse>, HttpError> {
    let resp = state.service.delete_policies(params).await?;
    Ok(Json(resp))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    storage: &'static str,
    policy_engine: &'static str,
}

/// `GET /health` — a cheap liveness read of both subsystems, grounded in the
/// teacher's `system::status::handle_status` (a cheap read reporting
/// subsystem state), generalized from a single storage pool to storage plus
/// the external policy engine.
async fn health<C: PolicyEngineClient>(State(state): State<AppState<C>>) -> Json<HealthResponse> {
    let storage_ok = sqlx::query("SELECT 1")
        .execute(state.service.ctx().repos.pool.as_ref())
        .await
        .is_ok();

    let probe = PolicyReq {
        subject_type: EntityType::Platform,
        subject_kind: SubjectKind::Id,
        subject: "health-probe".into(),
        permission: "view".into(),
        object_type: EntityType::Platform,
        object: state.service.ctx().config.platform_id.clone(),
    };
    let policy_engine_ok = state.service.ctx().policy_agent.check_policy(&probe).await.is_ok();

    Json(HealthResponse {
        ok: storage_ok && policy_engine_ok,
        storage: if storage_ok { "up" } else { "down" },
        policy_engine: if policy_engine_ok { "up" } else { "down" },
    })
}

/// `GET /metrics` — the minimal counter registry SPEC_FULL's ambient stack
/// calls for (request totals only; no histogram/gauge crate is introduced).
async fn metrics<C: PolicyEngineClient>(State(state): State<AppState<C>>) -> String {
    format!(
        "# TYPE iotauth_http_requests_total counter\niotauth_http_requests_total {}\n",
        state.metrics.total()
    )
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Builds the `/keys`, `/policies`, `/health`, `/metrics` surface of §6,
/// wrapped in the same `tower::ServiceBuilder` stack (body limit, CORS,
/// tracing, request counting) the teacher assembles in `layer::mod`'s
/// `ServiceBuilder::new()...service(RouterService::new(router))` pipeline.
pub fn router<C: PolicyEngineClient + 'static>(state: AppState<C>) -> Router {
    let metrics_layer = crate::layer::MetricsLayer::new(state.metrics.clone());

    Router::new()
        .route("/keys", post(create_api_key::<C>))
        .route("/keys/:id", get(retrieve_key::<C>).delete(revoke_key::<C>))
        .route("/policies", post(add_policies::<C>).put(delete_policies::<C>))
        .route("/health", get(health::<C>))
        .route("/metrics", get(metrics::<C>))
        .fallback(not_found)
        .layer(tower::ServiceBuilder::new()
            .layer(tower_http::cors::CorsLayer::permissive())
            .layer(tower_http::limit::RequestBodyLimitLayer::new(1024 * 1024))
            .layer(metrics_layer))
        .with_state(state)
}

/// Drives the real router (repos + tokenizer + policy agent all wired up,
/// only the policy engine faked) through `tower::ServiceExt::oneshot`
/// instead of a bound socket, in the teacher's `covert-server/tests/*.rs`
/// spirit but without the network round trip.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use axum::body::Body;
    use iotauth_policy::FakePolicyEngine;
    use iotauth_types::methods::token::IssueParams;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    async fn test_service() -> AuthService<FakePolicyEngine> {
        let pool = Arc::new(iotauth_storage::connect_tmp().await);
        crate::migrations::migrate(&pool).await.unwrap();
        let repos = crate::repos::Repos::new(pool);
        let config = Arc::new(crate::Config {
            log_level: "info".into(),
            secret_key: crate::SecretKey(b"test-secret".to_vec()),
            access_duration: std::time::Duration::from_secs(3600),
            refresh_duration: std::time::Duration::from_secs(86400),
            database_url: "sqlite::memory:".into(),
            policy_engine_addr: "127.0.0.1:0".into(),
            tracing_endpoint: None,
            trace_sample_ratio: None,
            instance_id: "test".into(),
            port: 0,
            issuer: "iotauth".into(),
            platform_id: "iotauth".into(),
        });
        let tokenizer = Arc::new(crate::tokenizer::Tokenizer::new(
            &config.secret_key.0,
            config.issuer.clone(),
        ));
        let policy_agent = Arc::new(iotauth_policy::PolicyAgent::new(Arc::new(
            FakePolicyEngine::new(),
        )));
        let (stop_tx, _) = broadcast::channel(1);
        AuthService::new(Context {
            config,
            repos,
            tokenizer,
            policy_agent,
            stop_tx,
        })
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// §8 scenario 5: issue an API key, revoke it, then a further lookup 404s.
    #[tokio::test]
    async fn issue_retrieve_revoke_api_key_over_http() {
        let service = test_service().await;
        let app = router(AppState::new(service.clone(), RequestMetrics::new()));

        let login = service
            .issue(
                None,
                IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: iotauth_types::key::KeyType::Access,
                },
            )
            .await
            .unwrap();
        let bearer = format!("Bearer {}", login.access_token);

        let create_resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/keys")
                    .header("authorization", &bearer)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "subject": null, "duration_secs": 600 }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_resp.status(), StatusCode::OK);
        let created = body_json(create_resp).await;
        let key_id = created["id"].as_str().unwrap().to_string();

        let get_resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri(format!("/keys/{key_id}"))
                    .header("authorization", &bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_resp.status(), StatusCode::OK);

        let delete_resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri(format!("/keys/{key_id}"))
                    .header("authorization", &bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete_resp.status(), StatusCode::OK);

        let missing_resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("GET")
                    .uri(format!("/keys/{key_id}"))
                    .header("authorization", &bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing_resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn keys_endpoint_rejects_missing_bearer_token() {
        let service = test_service().await;
        let app = router(AppState::new(service, RequestMetrics::new()));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/keys")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn policies_round_trip_over_http() {
        let service = test_service().await;
        let app = router(AppState::new(service, RequestMetrics::new()));

        let tuple = json!({
            "subject_type": "user",
            "subject": "u1",
            "relation": "administrator",
            "object_type": "domain",
            "object": "d1",
        });

        let add_resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/policies")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "tuples": [tuple] }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(add_resp.status(), StatusCode::OK);

        let delete_resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("PUT")
                    .uri("/policies")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "tuples": [tuple] }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(delete_resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_and_metrics_report_up() {
        let service = test_service().await;
        let app = router(AppState::new(service, RequestMetrics::new()));

        let health_resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(health_resp.status(), StatusCode::OK);
        let health = body_json(health_resp).await;
        assert_eq!(health["storage"], "up");

        let metrics_resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(metrics_resp.status(), StatusCode::OK);
    }
}
