//! Crop-prediction service facade.
//!
//! Each method maps one domain operation onto one dispatched call, shaping
//! only the path and payload. The facade holds no state beyond its
//! dispatcher.
//!
//! | Method | Call |
//! |--------|------|
//! | [`health`](CropService::health) | `GET /health` |
//! | [`ping`](CropService::ping) | `GET /ping` |
//! | [`model_info`](CropService::model_info) | `GET /models/info` |
//! | [`predict`](CropService::predict) | `POST /crops/predict?model_type=M` |
//! | [`predict_top_k`](CropService::predict_top_k) | `POST /crops/predict/top-k?k=K&model_type=M` |
//! | [`recommend`](CropService::recommend) | `POST /crops/recommend?top_k=K&model_type=M` |
//! | [`predict_batch`](CropService::predict_batch) | `POST /crops/predict/batch` |

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialProvider;
use crate::config::CropServiceConfig;
use crate::dispatch::{CallOptions, RequestDispatcher};
use crate::error::DispatchError;
use crate::models::{
    default_top_k, BatchRequest, BatchResult, FeatureVector, HealthReport, ModelInfo, ModelType,
    Ping, Prediction, RecommendationItem, RecommendationReport, TopKPrediction,
};
use crate::routes;

/// Per-call options for prediction endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub requires_auth: bool,
    pub model_type: ModelType,
    pub top_k: NonZeroU32,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            requires_auth: false,
            model_type: ModelType::default(),
            top_k: default_top_k(),
        }
    }
}

impl PredictOptions {
    pub fn with_model(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn with_top_k(mut self, top_k: NonZeroU32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn call(&self) -> CallOptions {
        CallOptions {
            requires_auth: self.requires_auth,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CropService {
    dispatcher: RequestDispatcher,
    requires_auth: bool,
}

impl CropService {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self {
            dispatcher,
            requires_auth: false,
        }
    }

    pub fn from_config(
        config: &CropServiceConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DispatchError> {
        let dispatcher = RequestDispatcher::new(
            "crop",
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            credentials,
        )?;
        Ok(Self {
            dispatcher,
            requires_auth: config.requires_auth,
        })
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Options pre-filled with this service's authentication setting.
    pub fn options(&self) -> PredictOptions {
        PredictOptions::default().with_auth(self.requires_auth)
    }

    // Health, ping and model info stay public even when predictions
    // require a credential.

    pub async fn health(&self) -> Result<HealthReport, DispatchError> {
        self.dispatcher
            .get(routes::crop::HEALTH, CallOptions::PUBLIC)
            .await
    }

    pub async fn ping(&self) -> Result<Ping, DispatchError> {
        self.dispatcher
            .get(routes::crop::PING, CallOptions::PUBLIC)
            .await
    }

    pub async fn model_info(&self) -> Result<ModelInfo, DispatchError> {
        self.dispatcher
            .get(routes::crop::MODEL_INFO, CallOptions::PUBLIC)
            .await
    }

    /// Predict the single best crop.
    pub async fn predict(
        &self,
        features: &FeatureVector,
        options: &PredictOptions,
    ) -> Result<Prediction, DispatchError> {
        self.dispatcher
            .post(&routes::crop::predict(options.model_type), features, options.call())
            .await
    }

    /// Predict the `options.top_k` most likely crops, best first.
    pub async fn predict_top_k(
        &self,
        features: &FeatureVector,
        options: &PredictOptions,
    ) -> Result<TopKPrediction, DispatchError> {
        let path = routes::crop::predict_top_k(options.top_k.get(), options.model_type);
        let result: TopKPrediction = self.dispatcher.post(&path, features, options.call()).await?;
        check_probabilities(&result.recommendations)?;
        Ok(result)
    }

    /// Full recommendation report with confidence and ranked alternatives.
    pub async fn recommend(
        &self,
        features: &FeatureVector,
        options: &PredictOptions,
    ) -> Result<RecommendationReport, DispatchError> {
        let path = routes::crop::recommend(options.top_k.get(), options.model_type);
        let report: RecommendationReport =
            self.dispatcher.post(&path, features, options.call()).await?;
        check_probabilities(&report.top_recommendations)?;
        if !(0.0..=1.0).contains(&report.confidence) {
            return Err(DispatchError::Decode(format!(
                "confidence {} outside [0, 1]",
                report.confidence
            )));
        }
        Ok(report)
    }

    /// Predict one crop per sample, in sample order.
    ///
    /// An empty request yields an empty result without a network call.
    pub async fn predict_batch(
        &self,
        request: &BatchRequest,
        options: CallOptions,
    ) -> Result<BatchResult, DispatchError> {
        if request.samples.is_empty() {
            return Ok(BatchResult {
                predictions: Vec::new(),
                model_type: request.model_type.unwrap_or_default(),
                count: 0,
            });
        }

        let result: BatchResult = self
            .dispatcher
            .post(routes::crop::PREDICT_BATCH, request, options)
            .await?;
        if result.predictions.len() != request.samples.len() {
            return Err(DispatchError::Decode(format!(
                "batch returned {} predictions for {} samples",
                result.predictions.len(),
                request.samples.len()
            )));
        }
        Ok(result)
    }
}

fn check_probabilities(items: &[RecommendationItem]) -> Result<(), DispatchError> {
    match items
        .iter()
        .find(|i| !(0.0..=1.0).contains(&i.probability))
    {
        Some(item) => Err(DispatchError::Decode(format!(
            "probability {} for '{}' outside [0, 1]",
            item.probability, item.crop
        ))),
        None => Ok(()),
    }
}
