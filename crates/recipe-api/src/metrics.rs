//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "recipe_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "recipe_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "recipe_http_requests_in_flight";

    // Domain events
    pub const LOGINS_TOTAL: &str = "recipe_logins_total";
    pub const RECIPES_CREATED_TOTAL: &str = "recipe_recipes_created_total";
    pub const RATINGS_SUBMITTED_TOTAL: &str = "recipe_ratings_submitted_total";
    pub const IMAGES_UPLOADED_TOTAL: &str = "recipe_images_uploaded_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "recipe_rate_limit_hits_total";
}

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid uuid regex")
});

static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[0-9]+(/|$)").expect("valid numeric regex"));

static MEDIA_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/media/.*$").expect("valid media regex"));

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a successful login.
pub fn record_login(role: &str) {
    counter!(names::LOGINS_TOTAL, "role" => role.to_string()).increment(1);
}

pub fn record_recipe_created() {
    counter!(names::RECIPES_CREATED_TOTAL).increment(1);
}

/// Record a rating, labelled by whether it was new or an update.
pub fn record_rating(created: bool) {
    let outcome = if created { "created" } else { "updated" };
    counter!(names::RATINGS_SUBMITTED_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_image_uploaded(bytes: usize) {
    counter!(names::IMAGES_UPLOADED_TOTAL).increment(1);
    histogram!("recipe_image_upload_bytes").record(bytes as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(bucket: &str) {
    counter!(names::RATE_LIMIT_HITS_TOTAL, "bucket" => bucket.to_string()).increment(1);
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    if MEDIA_PATH.is_match(path) {
        return "/media/:file".to_string();
    }
    let path = UUID_SEGMENT.replace_all(path, ":id");
    let path = NUMERIC_SEGMENT.replace_all(&path, "/:id$1");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
