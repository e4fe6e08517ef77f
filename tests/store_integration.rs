//! Recommendation store driving a real crop facade.

mod common;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crop_advisor::crop::CropService;
use crop_advisor::models::{FeatureName, ModelType};
use crop_advisor::store::{CropStore, Outcome, StoreStatus};

/// Recommends "rice" when humidity is high and "chickpea" otherwise. Slow
/// when nitrogen is 0, so an older request can finish after a newer one.
fn recommend_router() -> Router {
    Router::new().route(
        "/crops/recommend",
        post(
            |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| async move {
                if body["N"].as_f64() == Some(0.0) {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                let crop = if body["humidity"].as_f64().unwrap_or(0.0) > 60.0 {
                    "rice"
                } else {
                    "chickpea"
                };
                let k: usize = q["top_k"].parse().unwrap();
                let top: Vec<Value> = (0..k)
                    .map(|i| json!({"crop": crop, "probability": 0.9 / (i as f64 + 1.0)}))
                    .collect();
                Json(json!({
                    "input_conditions": body,
                    "recommended_crop": crop,
                    "confidence": 0.9,
                    "top_recommendations": top,
                    "model_type": q["model_type"]
                }))
            },
        ),
    )
}

async fn store_for(router: Router) -> CropStore {
    let base = common::serve(router).await;
    let service = CropService::new(common::dispatcher(&base));
    CropStore::new(Arc::new(service))
}

#[tokio::test]
async fn test_request_commits_report() {
    let store = store_for(recommend_router()).await;
    store.set_model_type(ModelType::NeuralNetwork);
    store.set_top_k(NonZeroU32::new(2).unwrap());

    assert_eq!(store.request_recommendation().await, Outcome::Committed);

    let state = store.snapshot();
    assert_eq!(state.status, StoreStatus::Success);
    let report = state.prediction.unwrap();
    assert_eq!(report.recommended_crop, "rice");
    assert_eq!(report.model_type, ModelType::NeuralNetwork);
    assert_eq!(report.top_recommendations.len(), 2);
    assert_eq!(report.input_conditions, state.features);
}

#[tokio::test]
async fn test_failure_sets_error_summary() {
    let router = Router::new().route(
        "/crops/recommend",
        post(|| async {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": "rainfall must be positive"})),
            )
        }),
    );
    let store = store_for(router).await;

    assert_eq!(store.request_recommendation().await, Outcome::Committed);
    let state = store.snapshot();
    assert_eq!(state.status, StoreStatus::Error);
    assert_eq!(state.error.as_deref(), Some("rainfall must be positive"));
    assert!(state.prediction.is_none());
}

#[tokio::test]
async fn test_slow_older_request_does_not_overwrite() {
    let store = Arc::new(store_for(recommend_router()).await);

    // Slow request for dry conditions.
    store.set_feature(FeatureName::Nitrogen, 0.0).unwrap();
    store.set_feature(FeatureName::Humidity, 20.0).unwrap();
    let slow = {
        let store = store.clone();
        tokio::spawn(async move { store.request_recommendation().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Fast request for humid conditions.
    store.set_feature(FeatureName::Nitrogen, 80.0).unwrap();
    store.set_feature(FeatureName::Humidity, 85.0).unwrap();
    assert_eq!(store.request_recommendation().await, Outcome::Committed);
    assert_eq!(slow.await.unwrap(), Outcome::Superseded);

    let state = store.snapshot();
    assert_eq!(state.status, StoreStatus::Success);
    let report = state.prediction.unwrap();
    assert_eq!(report.recommended_crop, "rice");
    assert_eq!(report.input_conditions.humidity, 85.0);
}

#[tokio::test]
async fn test_unreachable_service_sets_error() {
    let base = common::closed_address().await;
    let service = CropService::new(common::dispatcher(&base));
    let store = CropStore::new(Arc::new(service));

    store.request_recommendation().await;
    let state = store.snapshot();
    assert_eq!(state.status, StoreStatus::Error);
    assert_eq!(state.error.as_deref(), Some("Could not reach the service"));
}
