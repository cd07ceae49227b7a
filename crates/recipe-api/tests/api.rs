//! API integration tests.
//!
//! Each test drives the full router against an in-memory database, the
//! in-memory queue and a temporary media root.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use recipe_api::{create_router, ApiConfig, AppState};
use recipe_db::Database;
use recipe_queue::{InMemoryQueue, QueueJob};
use recipe_storage::{MediaConfig, MediaStorage};

const PASSWORD: &str = "Tandoori#Night42";
const BOUNDARY: &str = "recipe-test-boundary";

struct TestApp {
    router: Router,
    db: Database,
    queue: Arc<InMemoryQueue>,
    _media: TempDir,
}

async fn test_app() -> TestApp {
    test_app_with(ApiConfig::default()).await
}

async fn test_app_with(base: ApiConfig) -> TestApp {
    let media = tempfile::tempdir().unwrap();
    let storage = MediaStorage::new(MediaConfig {
        root: media.path().to_path_buf(),
        base_url: "/media".to_string(),
    })
    .await
    .unwrap();
    let db = Database::in_memory().await.unwrap();
    let queue = Arc::new(InMemoryQueue::default());

    let config = ApiConfig {
        rate_limit_rps: 1000,
        rate_limit_customer_rps: 1000,
        rate_limit_seller_rps: 1000,
        rate_limit_burst: 1000,
        bcrypt_cost: 4,
        jwt_secret: "integration-test-secret".to_string(),
        ..base
    };
    let state = AppState::from_parts(config, db.clone(), storage, queue.clone());

    TestApp {
        router: create_router(state, None),
        db,
        queue,
        _media: media,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    /// Register an account and return its `(access, refresh)` tokens.
    async fn signup(&self, username: &str, role: &str, gst: Option<&str>) -> (String, String) {
        let email = format!("{username}@example.com");
        let mut body = json!({
            "username": username,
            "email": email,
            "role": role,
            "password": PASSWORD,
            "confirm_password": PASSWORD,
        });
        if let Some(gst) = gst {
            body["gst_number"] = json!(gst);
            body["business_name"] = json!(format!("{username} Kitchens"));
        }
        let (status, created) = self.post("/api/v1/auth/register/", None, body).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {created}");

        let (status, login) = self
            .post(
                "/api/v1/auth/login/",
                None,
                json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {login}");
        (
            login["access"].as_str().unwrap().to_string(),
            login["refresh"].as_str().unwrap().to_string(),
        )
    }

    async fn customer(&self, username: &str) -> String {
        self.signup(username, "customer", None).await.0
    }

    async fn seller(&self, username: &str, gst: &str) -> String {
        self.signup(username, "seller", Some(gst)).await.0
    }

    async fn create_recipe(&self, token: &str, title: &str, published: bool) -> String {
        let (status, body) = self
            .post(
                "/api/v1/recipes/create/",
                Some(token),
                recipe_body(title, published),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

fn recipe_body(title: &str, published: bool) -> Value {
    json!({
        "title": title,
        "description": "A weeknight favourite",
        "ingredients": "rice\nlentils\nghee",
        "instructions": "Rinse, simmer, temper.",
        "prep_time": 10,
        "cook_time": 25,
        "servings": 4,
        "difficulty": "easy",
        "is_published": published,
        "tags": [" Comfort ", "quick"]
    })
}

fn png_bytes() -> Vec<u8> {
    let mut png = Vec::new();
    image::DynamicImage::new_rgb8(16, 12)
        .write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .unwrap();
    png
}

fn upload_request(token: &str, recipe_id: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"recipe_id\"\r\n\r\n{recipe_id}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"is_primary\"\r\n\r\ntrue\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/recipes/images/upload/")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_and_api_info() {
    let app = test_app().await;

    let (status, body) = app.get("/health/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "v1");

    let (status, body) = app.get("/api/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_name"], "Recipe API");

    let (status, body) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK, "ready: {body}");
}

#[tokio::test]
async fn security_headers_are_set() {
    let app = test_app().await;
    let response = tokio_test::assert_ok!(
        app.router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
    );
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn registration_rejects_bad_input() {
    let app = test_app().await;

    let (status, body) = app
        .post(
            "/api/v1/auth/register/",
            None,
            json!({
                "username": "meera",
                "email": "meera@example.com",
                "role": "seller",
                "password": PASSWORD,
                "confirm_password": "something-else",
                "gst_number": "SHORT"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["password"].is_array());
    assert!(body["errors"]["gst_number"].is_array());
    assert!(body["errors"]["business_name"].is_array());

    app.customer("ravi").await;
    let (status, body) = app
        .post(
            "/api/v1/auth/register/",
            None,
            json!({
                "username": "ravi2",
                "email": "ravi@example.com",
                "role": "customer",
                "password": PASSWORD,
                "confirm_password": PASSWORD
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["email"].is_array());
}

#[tokio::test]
async fn malformed_json_bodies_get_json_errors() {
    let app = test_app().await;

    let (status, body) = app
        .post(
            "/api/v1/auth/register/",
            None,
            json!({
                "username": "kiran",
                "email": "kiran@example.com",
                "role": "customer",
                "confirm_password": PASSWORD
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("password"), "{body}");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string(), "{body}");
}

#[tokio::test]
async fn stalled_requests_time_out() {
    let app = test_app_with(ApiConfig {
        request_timeout: Duration::from_millis(50),
        ..ApiConfig::default()
    })
    .await;

    let stalled = futures_util::stream::pending::<Result<Bytes, std::io::Error>>();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(stalled))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let (status, _) = app.get("/health/", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_wrong_password_and_profile_needs_token() {
    let app = test_app().await;
    app.customer("asha").await;

    let (status, body) = app
        .post(
            "/api/v1/auth/login/",
            None,
            json!({ "email": "asha@example.com", "password": "not-it-at-all" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, _) = app.get("/api/v1/auth/profile/", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/v1/auth/profile/", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_issues_working_access_and_logout_revokes() {
    let app = test_app().await;
    let (access, refresh) = app.signup("kiran", "customer", None).await;

    let (status, body) = app
        .post("/api/v1/auth/token/refresh/", None, json!({ "refresh": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["access"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/v1/auth/profile/", Some(&fresh)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "kiran@example.com");

    // An access token is not a refresh token
    let (status, _) = app
        .post("/api/v1/auth/token/refresh/", None, json!({ "refresh": access }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/api/v1/auth/logout/", Some(&access), json!({ "refresh": refresh }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post("/api/v1/auth/token/refresh/", None, json!({ "refresh": refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customers_cannot_author_recipes() {
    let app = test_app().await;
    let customer = app.customer("neha").await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let recipe_id = app.create_recipe(&seller, "Masala Dosa", true).await;

    let (status, _) = app
        .post(
            "/api/v1/recipes/create/",
            Some(&customer),
            recipe_body("Sneaky Dosa", true),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/v1/recipes/{recipe_id}/update/"),
            Some(&customer),
            Some(json!({ "title": "Hijacked" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/recipes/{recipe_id}/delete/"),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(upload_request(&customer, &recipe_id, "dosa.png", &png_bytes()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn recipe_validation_reports_each_field() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;

    let mut body = recipe_body("ab", true);
    body["prep_time"] = json!(-5);
    body["servings"] = json!(0);
    let (status, body) = app
        .post("/api/v1/recipes/create/", Some(&seller), body)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["title"][0], "Title must be at least 3 characters long.");
    assert_eq!(body["errors"]["prep_time"][0], "Preparation time cannot be negative.");
    assert_eq!(body["errors"]["servings"][0], "Servings must be at least 1.");
}

#[tokio::test]
async fn recipe_lifecycle_for_owner() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let recipe_id = app.create_recipe(&seller, "Palak Paneer", true).await;

    let (status, list) = app.get("/api/v1/recipes/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
    assert_eq!(list["results"][0]["total_time"], 35);

    let (status, detail) = app
        .get(&format!("/api/v1/recipes/{recipe_id}/"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["view_count"], 1);
    let tags: Vec<&str> = detail["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(tags.contains(&"comfort"));
    assert!(tags.contains(&"quick"));

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/api/v1/recipes/{recipe_id}/update/"),
            Some(&seller),
            Some(json!({ "servings": 6, "tags": ["dinner"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["servings"], 6);
    assert_eq!(updated["title"], "Palak Paneer");
    assert_eq!(updated["tags"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/recipes/{recipe_id}/delete/"),
            Some(&seller),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .get(&format!("/api/v1/recipes/{recipe_id}/"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_sellers_get_not_found() {
    let app = test_app().await;
    let owner = app.seller("owner", "27AAPFU0939F1ZV").await;
    let rival = app.seller("rival", "29ABCDE1234F1Z5").await;
    let recipe_id = app.create_recipe(&owner, "Rajma Chawal", true).await;

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/v1/recipes/{recipe_id}/update/"),
            Some(&rival),
            Some(json!({ "title": "Stolen Rajma" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/recipes/{recipe_id}/delete/"),
            Some(&rival),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mine) = app.get("/api/v1/recipes/my-recipes/", Some(&rival)).await;
    assert_eq!(mine["count"], 0);
}

#[tokio::test]
async fn drafts_are_hidden_from_public_views() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let draft = app.create_recipe(&seller, "Secret Biryani", false).await;

    let (status, _) = app.get(&format!("/api/v1/recipes/{draft}/"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.get("/api/v1/recipes/", None).await;
    assert_eq!(list["count"], 0);

    let (_, mine) = app.get("/api/v1/recipes/my-recipes/", Some(&seller)).await;
    assert_eq!(mine["count"], 1);

    let (status, _) = app.get("/api/v1/recipes/not-a-uuid/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rating_twice_updates_single_row() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let customer = app.customer("foodie").await;
    let recipe_id = app.create_recipe(&seller, "Chole Bhature", true).await;

    let (status, _) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&seller),
            json!({ "recipe_id": recipe_id, "rating": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "rating": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, first) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "recipe_id": recipe_id, "rating": 4, "review": "Lovely" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{first}");

    let (status, second) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "recipe_id": recipe_id, "rating": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"]);

    let (_, detail) = app
        .get(&format!("/api/v1/recipes/{recipe_id}/"), Some(&customer))
        .await;
    assert_eq!(detail["rating_count"], 1);
    assert_eq!(detail["average_rating"], 2.0);
    assert_eq!(detail["user_rating"]["rating"], 2);
    assert_eq!(app.db.ratings().count().await.unwrap(), 1);

    let (status, _) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "recipe_id": recipe_id, "rating": 9 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "recipe_id": recipe_id, "rating": 3, "review": "x".repeat(1001) }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["review"].is_array(), "{body}");

    let (status, _) = app
        .post(
            "/api/v1/recipes/ratings/create/",
            Some(&customer),
            json!({ "recipe_id": recipe_id, "rating": 3, "review": "x".repeat(1000) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn favorite_toggle_round_trips() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let customer = app.customer("foodie").await;
    let recipe_id = app.create_recipe(&seller, "Pav Bhaji", true).await;
    let uri = format!("/api/v1/recipes/{recipe_id}/favorite/");

    let (status, _) = app.post(&uri, Some(&seller), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post(&uri, Some(&customer), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_favorited"], true);
    assert_eq!(body["message"], "Recipe added to favorites");

    let (_, favorites) = app.get("/api/v1/recipes/favorites/", Some(&customer)).await;
    assert_eq!(favorites["count"], 1);
    assert_eq!(favorites["results"][0]["recipe"]["id"], recipe_id.as_str());

    let (_, body) = app.post(&uri, Some(&customer), json!({})).await;
    assert_eq!(body["is_favorited"], false);

    let (_, favorites) = app.get("/api/v1/recipes/favorites/", Some(&customer)).await;
    assert_eq!(favorites["count"], 0);
}

#[tokio::test]
async fn image_upload_stores_file_and_enqueues_processing() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    let rival = app.seller("rival", "29ABCDE1234F1Z5").await;
    let recipe_id = app.create_recipe(&seller, "Gulab Jamun", true).await;

    let (status, body) = app
        .send(upload_request(&seller, &recipe_id, "jamun.png", &png_bytes()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["is_primary"], true);
    assert!(body["image_url"].as_str().unwrap().starts_with("/media/recipes/images/"));

    let queued = app.queue.queued_jobs().await;
    assert!(queued
        .iter()
        .any(|job| matches!(job, QueueJob::ProcessRecipeImage(j) if j.recipe_id.to_string() == recipe_id)));

    let (status, _) = app
        .send(upload_request(&seller, &recipe_id, "notes.txt", b"hello"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(upload_request(&seller, &recipe_id, "fake.png", b"not really a png"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(upload_request(&rival, &recipe_id, "jamun.png", &png_bytes()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_and_featured_listing() {
    let app = test_app().await;
    let seller = app.seller("chef", "27AAPFU0939F1ZV").await;
    app.create_recipe(&seller, "Idli Sambar", true).await;
    let mut featured = recipe_body("Hyderabadi Biryani", true);
    featured["is_featured"] = json!(true);
    let (status, _) = app
        .post("/api/v1/recipes/create/", Some(&seller), featured)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, stats) = app.get("/api/v1/recipes/stats/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_recipes"], 2);
    assert_eq!(stats["featured_recipes"], 1);

    let (_, featured) = app.get("/api/v1/recipes/featured/", None).await;
    assert_eq!(featured.as_array().unwrap().len(), 1);
    assert_eq!(featured[0]["title"], "Hyderabadi Biryani");

    let (_, popular) = app.get("/api/v1/recipes/popular/", None).await;
    assert_eq!(popular.as_array().unwrap().len(), 2);

    let (_, searched) = app.get("/api/v1/recipes/?search=idli", None).await;
    assert_eq!(searched["count"], 1);

    let (status, _) = app.get("/api/v1/recipes/?difficulty=impossible", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
