#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;

use mastery_backend::mastery::{
    EngineOptions, MasteryConfig, MasteryEngine, MasteryStore, PersistMode,
};
use mastery_backend::services::cf::{CfEstimator, StaticCfTable};

pub const EPSILON: f64 = 1e-6;

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<MasteryEngine>,
    pub dir: TempDir,
}

pub fn store_path(dir: &Path) -> std::path::PathBuf {
    dir.join("bkt_mastery.json")
}

pub fn create_engine(
    dir: &Path,
    cf: Arc<dyn CfEstimator>,
    persist_mode: PersistMode,
) -> MasteryEngine {
    let store = MasteryStore::open(store_path(dir), EPSILON).expect("open store");
    MasteryEngine::new(
        MasteryConfig::default(),
        Arc::new(store),
        cf,
        EngineOptions {
            persist_mode,
            ..EngineOptions::default()
        },
    )
}

pub fn create_test_app(cf: StaticCfTable) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(create_engine(dir.path(), Arc::new(cf), PersistMode::PerAttempt));
    let router = mastery_backend::create_app(Arc::clone(&engine));
    TestApp {
        router,
        engine,
        dir,
    }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
