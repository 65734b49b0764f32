#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use image::{GrayImage, ImageFormat, Luma};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use async_trait::async_trait;

use carupload::catalog::{Fleet, ImageSlot, Listing, ListingKey, StoredImage};
use carupload::config::{CloudinaryConfig, Config, SqlAuth, SqlConfig, StoreKind};
use carupload::media::cloudinary::CloudinaryClient;
use carupload::media::fetch::ImageFetcher;
use carupload::store::memory::MemoryStore;
use carupload::store::{AppState, CatalogStore, StoreError};

pub const CLOUD_NAME: &str = "demo";
pub const HOSTED_URL: &str = "https://res.cloudinary.com/demo/image/upload/v1/new.png";

/// Build a test `AppState` backed by an in-memory catalog.
///
/// - The image host points at `cloudinary` (a wiremock server)
/// - Private URLs are allowed so wiremock image URLs pass validation
pub fn test_state(cloudinary: &MockServer) -> (AppState, Arc<MemoryStore>) {
    let config = Config {
        listen: "127.0.0.1:0".into(),
        store: StoreKind::Memory,
        sql: SqlConfig {
            server: "localhost".into(),
            port: 1433,
            database: "test".into(),
            user: String::new(),
            password: String::new(),
            auth: SqlAuth::Password,
            trust_cert: true,
        },
        cloudinary: CloudinaryConfig {
            cloud_name: CLOUD_NAME.into(),
            api_key: "123456".into(),
            api_secret: "secret".into(),
            api_base: cloudinary.uri(),
            folder: None,
        },
        cors_origins: vec![],
        max_image_bytes: 5 * 1024 * 1024,
        body_limit: 20 * 1024 * 1024,
        allow_private_urls: true,
        dev_mode: true,
    };

    let store = Arc::new(MemoryStore::default());
    let images = CloudinaryClient::new(config.cloudinary.clone()).expect("cloudinary client");
    let fetcher = ImageFetcher::new(config.max_image_bytes, config.allow_private_urls)
        .expect("image fetcher");

    let state = AppState {
        catalog: store.clone(),
        images: Arc::new(images),
        fetcher,
        config: Arc::new(config),
    };
    (state, store)
}

/// Build the full service with the given state.
pub fn test_router(state: AppState) -> Router {
    carupload::api::app(state)
}

/// Mount a Cloudinary upload endpoint that always answers with [`HOSTED_URL`].
pub async fn mock_cloudinary_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/v1_1/{CLOUD_NAME}/image/upload")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "secure_url": HOSTED_URL })),
        )
        .mount(server)
        .await;
}

/// Serve `bytes` as a PNG at `route` (GET and HEAD).
pub async fn serve_image(server: &MockServer, route: &str, bytes: Vec<u8>) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes),
        )
        .mount(server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    format!("{}{route}", server.uri())
}

// ---------------------------------------------------------------------------
// Test images
// ---------------------------------------------------------------------------

const SIZE: u32 = 500;

/// Smooth diagonal gradient.
pub fn base_image() -> GrayImage {
    GrayImage::from_fn(SIZE, SIZE, |x, y| {
        let v = 60 + x * 80 / SIZE + y * 40 / SIZE;
        Luma([u8::try_from(v).unwrap()])
    })
}

/// `base_image()` with a thin dark streak across the middle.
pub fn scratched_image() -> GrayImage {
    let mut img = base_image();
    for (x, y, p) in img.enumerate_pixels_mut() {
        let dx = (f64::from(x) - 250.0) / 30.0;
        let dy = (f64::from(y) - 250.0) / 8.0;
        if dx * dx + dy * dy <= 1.0 {
            *p = Luma([p[0].saturating_sub(100)]);
        }
    }
    img
}

pub fn inverted_image() -> GrayImage {
    let mut img = base_image();
    image::imageops::invert(&mut img);
    img
}

pub fn png(img: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

// ---------------------------------------------------------------------------
// Catalog fixtures
// ---------------------------------------------------------------------------

pub fn listing(fleet: Fleet, model_type: &str, images: &[(ImageSlot, &str)]) -> Listing {
    let powertrain = match fleet {
        Fleet::Car => ["k12".to_owned(), "petrol".to_owned()],
        Fleet::Scooter => ["pmsm".to_owned(), "li-ion".to_owned()],
    };
    Listing {
        name: "Demo".into(),
        segment_id: 3,
        segment_name: "city".into(),
        model_type: model_type.into(),
        year: 2023,
        powertrain,
        price: 1000.0,
        images: images
            .iter()
            .map(|(slot, url)| (*slot, (*url).to_owned()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Insert a listing for segment 3 and return its id.
pub async fn seed(store: &MemoryStore, fleet: Fleet, listing: &Listing) -> i32 {
    store.ensure_schema(fleet).await.unwrap();
    store.insert(fleet, listing).await.unwrap()
}

/// Catalog that reads from a [`MemoryStore`] but fails every image update.
pub struct FailingUpdates(pub Arc<MemoryStore>);

#[async_trait]
impl CatalogStore for FailingUpdates {
    async fn ensure_schema(&self, fleet: Fleet) -> Result<(), StoreError> {
        self.0.ensure_schema(fleet).await
    }

    async fn exists(&self, fleet: Fleet, key: &ListingKey) -> Result<bool, StoreError> {
        self.0.exists(fleet, key).await
    }

    async fn insert(&self, fleet: Fleet, listing: &Listing) -> Result<i32, StoreError> {
        self.0.insert(fleet, listing).await
    }

    async fn image_urls(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
    ) -> Result<Vec<StoredImage>, StoreError> {
        self.0.image_urls(fleet, segment_id, model_type, slot).await
    }

    async fn update_image(
        &self,
        _fleet: Fleet,
        _segment_id: i32,
        _model_type: &str,
        _slot: ImageSlot,
        _url: &str,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Timeout)
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "----carupload-test-boundary";

/// A multipart form: text fields and `(field, file_name, bytes)` files.
#[derive(Default)]
pub struct Form {
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(app, req).await
}

pub async fn post_form(app: &Router, path: &str, form: Form) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(form.finish()))
        .unwrap();
    send(app, req).await
}

pub async fn get(app: &Router, path: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}
