use axum::http::StatusCode;
use std::sync::Arc;
use tempfile::TempDir;
use tierline::api;
use tierline::db::init_db;
use tierline::domain::CompensationPlan;
use tierline::orchestration::CompensationEngine;
use tierline::Repository;
use tower::util::ServiceExt;

const T0: i64 = 1_705_276_800_000;

struct TestApp {
    app: axum::Router,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let plan = CompensationPlan::reference();
    repo.register_plan(&plan).await.unwrap();

    let engine = Arc::new(CompensationEngine::new(repo, plan, 5));
    let app = api::create_router(api::AppState::new(engine));

    TestApp {
        app,
        _temp: temp_dir,
    }
}

async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn register(app: &axum::Router, member: &str, sponsor: Option<&str>) -> serde_json::Value {
    let (status, body) = request(
        app,
        "POST",
        "/v1/members",
        Some(serde_json::json!({
            "memberId": member,
            "sponsorId": sponsor,
            "registeredAtMs": T0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

async fn buy(app: &axum::Router, member: &str, tier: &str) -> String {
    let (status, body) = request(
        app,
        "POST",
        "/v1/packages",
        Some(serde_json::json!({
            "memberId": member,
            "tier": tier,
            "packageId": format!("pkg-{}", member),
            "purchasedAtMs": T0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["packageId"].as_str().unwrap().to_string()
}

async fn pay(app: &axum::Router, package: &str, amount: &str, reference: &str) -> (StatusCode, serde_json::Value) {
    request(
        app,
        "POST",
        &format!("/v1/packages/{}/installments", package),
        Some(serde_json::json!({
            "amount": amount,
            "paidAtMs": T0,
            "paymentRef": reference,
        })),
    )
    .await
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app().await;
    let (status, body) = request(&test_app.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(&test_app.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["planVersion"], "v1");
}

#[tokio::test]
async fn test_registration_reports_placement() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "a", None).await;
    let b = register(&test_app.app, "b", Some("a")).await;
    assert_eq!(b["parentId"], "a");
    assert_eq!(b["side"], "left");
    assert_eq!(b["depth"], 1);
    assert_eq!(b["outcome"], "applied");

    let (status, again) = request(
        &test_app.app,
        "POST",
        "/v1/members",
        Some(serde_json::json!({ "memberId": "b", "sponsorId": "a" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["outcome"], "duplicate");

    let (status, body) = request(
        &test_app.app,
        "POST",
        "/v1/members",
        Some(serde_json::json!({ "memberId": "x", "sponsorId": "nobody" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_installment_flow_and_member_summary() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "a", None).await;
    register(&test_app.app, "b", Some("a")).await;
    register(&test_app.app, "c", Some("a")).await;
    let pb = buy(&test_app.app, "b", "silver").await;
    let pc = buy(&test_app.app, "c", "gold").await;

    let (status, first) = pay(&test_app.app, &pb, "2000", "b-1").await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["outcome"], "applied");
    assert_eq!(first["installmentSeq"], 1);
    assert_eq!(first["packageStatus"], "partially_paid");
    assert!(first["earnings"][0]["amount"].is_string());

    let (_, replay) = pay(&test_app.app, &pb, "2000", "b-1").await;
    assert_eq!(replay["outcome"], "duplicate");

    pay(&test_app.app, &pc, "3000", "c-1").await;

    let (status, summary) = request(&test_app.app, "GET", "/v1/members/a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["totalEarnings"], "250");
    assert_eq!(summary["directReferralCount"], 2);
    assert_eq!(summary["unlockedLevels"], 4);
    assert_eq!(summary["leftTeamCount"], 1);
    assert_eq!(summary["rightTeamCount"], 1);
    assert_eq!(summary["earningsByType"]["direct"], "250");
    assert_eq!(summary["earningsByType"]["binary"], "0");

    let (status, statement) = request(
        &test_app.app,
        "GET",
        "/v1/members/a/earnings?type=direct",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(statement["earnings"].as_array().unwrap().len(), 2);
    assert_eq!(statement["total"], "250");
    assert_eq!(statement["earnings"][0]["type"], "direct");

    let (status, package) = request(&test_app.app, "GET", &format!("/v1/packages/{}", pb), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(package["paidMonths"], 1);
    assert_eq!(package["installments"].as_array().unwrap().len(), 11);
    assert_eq!(package["installments"][0]["status"], "paid");
    assert_eq!(package["installments"][1]["status"], "pending");
}

#[tokio::test]
async fn test_invalid_requests_map_to_client_errors() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "a", None).await;
    let pa = buy(&test_app.app, "a", "bronze").await;

    let (status, body) = pay(&test_app.app, &pa, "999", "short").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("payment could not be recorded"));

    let (status, _) = pay(&test_app.app, &pa, "lots", "bad").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = pay(&test_app.app, "pkg-missing", "1000", "x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &test_app.app,
        "POST",
        "/v1/packages",
        Some(serde_json::json!({ "memberId": "a", "tier": "diamond" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &test_app.app,
        "POST",
        "/v1/packages",
        Some(serde_json::json!({ "memberId": "a", "tier": "gold", "purchasedAtMs": i64::MAX })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    let (status, _) = request(&test_app.app, "GET", "/v1/members/a/earnings?type=salary", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(&test_app.app, "GET", "/v1/members/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_autopool_endpoints_and_admin_recompute() {
    let test_app = setup_test_app().await;
    register(&test_app.app, "a", None).await;
    register(&test_app.app, "b", Some("a")).await;
    let pb = buy(&test_app.app, "b", "platinum").await;
    pay(&test_app.app, &pb, "5000", "b-1").await;

    let (status, pool) = request(&test_app.app, "GET", "/v1/autopool", None).await;
    assert_eq!(status, StatusCode::OK);
    // 5% direct of 5000 = 250, 2.5% of that funds the pool.
    assert_eq!(pool["fundBalance"], "6.25");
    assert_eq!(pool["occupied"], 0);

    let (status, dist) = request(
        &test_app.app,
        "POST",
        "/v1/autopool/distribute",
        Some(serde_json::json!({ "distributionKey": "2024-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dist["outcome"], "no_op");
    assert_eq!(dist["distributed"], "0");

    let (status, recomputed) = request(&test_app.app, "POST", "/v1/admin/members/a/recompute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recomputed["totalEarnings"], "250");

    let (status, all) = request(&test_app.app, "POST", "/v1/admin/recompute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["recomputed"], 2);
}
