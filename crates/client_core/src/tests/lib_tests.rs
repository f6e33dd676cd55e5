use super::*;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::{
    domain::{PostalCode, Step, SubscriptionToken},
    protocol::{QueueSubscriptionRequest, TokenQuery},
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct ServiceState {
    queued: Arc<Mutex<Vec<QueueSubscriptionRequest>>>,
    validated: Arc<Mutex<Vec<String>>>,
    removed: Arc<Mutex<Vec<String>>>,
    postal_fetches: Arc<Mutex<u32>>,
}

async fn handle_postal(State(state): State<ServiceState>) -> Json<Value> {
    *state.postal_fetches.lock().expect("lock") += 1;
    Json(json!([{ "code": "08001" }, { "code": "28001" }]))
}

async fn handle_queue(
    State(state): State<ServiceState>,
    Json(request): Json<QueueSubscriptionRequest>,
) -> impl IntoResponse {
    if request.user_email == "taken@example.com" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "User taken@example.com is already subscribed" })),
        );
    }
    let detail = format!(
        "User {} queued to subscribe to postal_code {}",
        request.user_email, request.postal_code
    );
    state.queued.lock().expect("lock").push(request);
    (
        StatusCode::CREATED,
        Json(json!({ "detail": detail, "validation_token": "gAAAA+token/=" })),
    )
}

async fn handle_validate(
    State(state): State<ServiceState>,
    Query(query): Query<TokenQuery>,
) -> impl IntoResponse {
    if query.token == "expired" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Invalid token" })),
        );
    }
    state.validated.lock().expect("lock").push(query.token);
    (
        StatusCode::OK,
        Json(json!({ "detail": "User a@b.com subscribed to postal_code 28001" })),
    )
}

async fn handle_remove(
    State(state): State<ServiceState>,
    Query(query): Query<TokenQuery>,
) -> Json<Value> {
    state.removed.lock().expect("lock").push(query.token);
    Json(json!({ "detail": "User a@b.com unsubscribed from postal_code 28001" }))
}

async fn spawn_service() -> (ApiBase, ServiceState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServiceState::default();
    let app = Router::new()
        .route("/postal", get(handle_postal))
        .route("/subscription/queue", post(handle_queue))
        .route("/subscription/validate", get(handle_validate))
        .route("/subscription/remove", get(handle_remove))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    // A base path must be ignored: endpoints are resolved from the host root.
    let base = ApiBase::parse(&format!("http://{addr}/ignored/prefix")).expect("base");
    (base, state)
}

async fn spawn_raw_service(status: StatusCode, body: &'static str) -> ApiBase {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let respond = move || async move { (status, body) };
    let app = Router::new()
        .route("/postal", get(respond))
        .route("/subscription/queue", post(respond))
        .route("/subscription/validate", get(respond))
        .route("/subscription/remove", get(respond));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    ApiBase::parse(&format!("http://{addr}")).expect("base")
}

async fn unreachable_base() -> ApiBase {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    ApiBase::parse(&format!("http://{addr}")).expect("base")
}

#[tokio::test]
async fn directory_lists_postal_codes() {
    let (base, state) = spawn_service().await;
    let directory = HttpPostalDirectory::new(&base).expect("client");

    let codes = directory.list().await.expect("list");

    assert_eq!(codes, vec![PostalCode::new("08001"), PostalCode::new("28001")]);
    assert_eq!(*state.postal_fetches.lock().expect("lock"), 1);
}

#[tokio::test]
async fn queue_posts_json_body_and_returns_token() {
    let (base, state) = spawn_service().await;
    let client = HttpSubscriptionClient::new(&base).expect("client");

    let receipt = client.queue("28001", "a@b.com").await.expect("queue");

    assert_eq!(receipt.token, SubscriptionToken::new("gAAAA+token/="));
    assert_eq!(
        receipt.detail,
        "User a@b.com queued to subscribe to postal_code 28001"
    );
    let queued = state.queued.lock().expect("lock");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].postal_code, "28001");
    assert_eq!(queued[0].user_email, "a@b.com");
}

#[tokio::test]
async fn validate_and_remove_pass_token_as_query_parameter() {
    let (base, state) = spawn_service().await;
    let client = HttpSubscriptionClient::new(&base).expect("client");
    let token = SubscriptionToken::new("gAAAA+token/=");

    let validated = client.validate(&token).await.expect("validate");
    let removed = client.remove(&token).await.expect("remove");

    assert_eq!(
        validated.detail,
        "User a@b.com subscribed to postal_code 28001"
    );
    assert_eq!(
        removed.detail,
        "User a@b.com unsubscribed from postal_code 28001"
    );
    assert_eq!(
        *state.validated.lock().expect("lock"),
        vec!["gAAAA+token/=".to_string()]
    );
    assert_eq!(
        *state.removed.lock().expect("lock"),
        vec!["gAAAA+token/=".to_string()]
    );
}

#[tokio::test]
async fn service_rejection_carries_detail_message() {
    let (base, _state) = spawn_service().await;
    let client = HttpSubscriptionClient::new(&base).expect("client");

    let err = client
        .validate(&SubscriptionToken::new("expired"))
        .await
        .expect_err("expired token must fail");

    match err {
        ApiError::Service {
            status,
            ref detail,
            ref endpoint,
        } => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Invalid token");
            assert_eq!(endpoint, "/subscription/validate");
        }
        other => panic!("expected service error, got {other:?}"),
    }

    let err = client
        .queue("28001", "taken@example.com")
        .await
        .expect_err("duplicate subscriber must fail");
    assert_eq!(
        err.service_detail(),
        Some("User taken@example.com is already subscribed")
    );
}

#[tokio::test]
async fn validation_failure_list_is_flattened_into_detail() {
    let base = spawn_raw_service(
        StatusCode::UNPROCESSABLE_ENTITY,
        r#"{"detail":[{"loc":["body","user_email"],"msg":"Value error, Invalid email address","type":"value_error"}]}"#,
    )
    .await;
    let client = HttpSubscriptionClient::new(&base).expect("client");

    let err = client.queue("28001", "nope").await.expect_err("must fail");

    assert_eq!(err.service_detail(), Some("Value error, Invalid email address"));
}

#[tokio::test]
async fn non_envelope_error_body_falls_back_to_status_reason() {
    let base = spawn_raw_service(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let directory = HttpPostalDirectory::new(&base).expect("client");

    let err = directory.list().await.expect_err("must fail");

    match err {
        ApiError::Service { status, detail, .. } => {
            assert_eq!(status, 500);
            assert_eq!(detail, "Internal Server Error");
        }
        other => panic!("expected service error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_success_body_is_a_decode_error() {
    let base = spawn_raw_service(StatusCode::OK, "<html>not json</html>").await;
    let directory = HttpPostalDirectory::new(&base).expect("client");
    let client = HttpSubscriptionClient::new(&base).expect("client");

    assert!(matches!(
        directory.list().await,
        Err(ApiError::Decode { .. })
    ));
    assert!(matches!(
        client.remove(&SubscriptionToken::new("t")).await,
        Err(ApiError::Decode { .. })
    ));
}

#[tokio::test]
async fn wrong_shape_and_empty_token_are_decode_errors() {
    let base = spawn_raw_service(StatusCode::OK, r#"{"detail":"queued"}"#).await;
    let client = HttpSubscriptionClient::new(&base).expect("client");
    assert!(matches!(
        client.queue("28001", "a@b.com").await,
        Err(ApiError::Decode { .. })
    ));

    let base = spawn_raw_service(
        StatusCode::OK,
        r#"{"detail":"queued","validation_token":""}"#,
    )
    .await;
    let client = HttpSubscriptionClient::new(&base).expect("client");
    assert!(matches!(
        client.queue("28001", "a@b.com").await,
        Err(ApiError::Decode { .. })
    ));
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() {
    let base = unreachable_base().await;
    let directory = HttpPostalDirectory::new(&base).expect("client");

    let err = directory.list().await.expect_err("must fail");

    assert!(matches!(err, ApiError::Network { .. }), "got {err:?}");
}

#[tokio::test]
async fn controller_runs_full_workflow_over_http() {
    let (base, state) = spawn_service().await;
    let controller = WorkflowController::connect(&base).expect("controller");

    controller.load_postal_codes().await.expect("load");
    controller.load_postal_codes().await.expect("cached load");
    controller.select_postal("28001").expect("select postal");
    controller.select_email("a@b.com").expect("select email");
    controller.submit().await.expect("submit");
    assert_eq!(controller.state().step, Step::PendingValidation);

    controller.validate().await.expect("validate");
    assert_eq!(controller.state().step, Step::Active);

    controller.remove().await.expect("remove");
    let snapshot = controller.state();
    assert_eq!(snapshot.step, Step::Request);
    assert_eq!(snapshot.token, None);

    assert_eq!(*state.postal_fetches.lock().expect("lock"), 1);
    assert_eq!(state.queued.lock().expect("lock").len(), 1);
    assert_eq!(state.validated.lock().expect("lock").len(), 1);
    assert_eq!(state.removed.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn queue_network_failure_leaves_request_step_untouched() {
    let (base, _state) = spawn_service().await;
    let directory = Arc::new(HttpPostalDirectory::new(&base).expect("directory"));
    let unreachable = unreachable_base().await;
    let subscriptions = Arc::new(HttpSubscriptionClient::new(&unreachable).expect("client"));
    let controller = WorkflowController::new(directory, subscriptions);

    controller.load_postal_codes().await.expect("load");
    controller.select_postal("28001").expect("select postal");
    controller.select_email("a@b.com").expect("select email");

    let err = controller.submit().await.expect_err("must fail");

    assert!(matches!(err, WorkflowError::Api(ApiError::Network { .. })));
    assert!(err.is_retryable());
    let snapshot = controller.state();
    assert_eq!(snapshot.step, Step::Request);
    assert_eq!(snapshot.token, None);
    assert!(!snapshot.is_submitting);
}

#[test]
fn connect_requires_a_configured_base() {
    let settings = Settings { api_url: None };
    let err = settings
        .api_base()
        .and_then(|base| WorkflowController::connect(&base))
        .err()
        .expect("missing base url must fail");
    assert!(matches!(err, ConfigError::MissingApiUrl));
}
