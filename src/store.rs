//! Reactive state for the crop recommendation screen.
//!
//! [`CropStore`] holds the current inputs, the latest results, and a single
//! [`StoreStatus`]. State changes only through named actions, and every
//! change is one atomic update of a [`tokio::sync::watch`] channel, so
//! subscribers never observe a half-applied commit.
//!
//! # Staleness guard
//!
//! Requests may resolve in any order. Each request action advances a
//! [`RequestGeneration`] when it starts and captures the new value; when the
//! backend answers, the result is committed only if the captured generation
//! is still the live one. Otherwise it is dropped silently.
//!
//! ```text
//!   request A (gen 1) ──────────────────────────────▶ answer A: gen 1 ≠ 2, dropped
//!          request B (gen 2) ─────▶ answer B: committed
//! ```
//!
//! Predictions, health checks, and model info each have their own
//! generation lane, so refreshing the health report never invalidates an
//! in-flight prediction. Only the prediction lane drives `status`.
//!
//! # Status transitions
//!
//! | From | Event | To |
//! |------|-------|----|
//! | any | `request_recommendation` | `loading` |
//! | `loading` | current answer, success | `success` |
//! | `loading` | current answer, failure | `error` |
//! | `loading` | current request abandoned | `idle` |
//! | any | `reset_all` | `idle` |

use async_trait::async_trait;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::watch;

use crate::crop::{CropService, PredictOptions};
use crate::error::DispatchError;
use crate::models::{
    default_top_k, FeatureError, FeatureName, FeaturePatch, FeatureVector, HealthReport,
    ModelInfo, ModelType, RecommendationReport,
};

/// The calls the store makes. Implemented by [`CropService`].
#[async_trait]
pub trait PredictionBackend: Send + Sync {
    async fn recommend(
        &self,
        features: &FeatureVector,
        options: &PredictOptions,
    ) -> Result<RecommendationReport, DispatchError>;

    async fn health(&self) -> Result<HealthReport, DispatchError>;

    async fn model_info(&self) -> Result<ModelInfo, DispatchError>;
}

#[async_trait]
impl PredictionBackend for CropService {
    async fn recommend(
        &self,
        features: &FeatureVector,
        options: &PredictOptions,
    ) -> Result<RecommendationReport, DispatchError> {
        CropService::recommend(self, features, options).await
    }

    async fn health(&self) -> Result<HealthReport, DispatchError> {
        CropService::health(self).await
    }

    async fn model_info(&self) -> Result<ModelInfo, DispatchError> {
        CropService::model_info(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveTab {
    #[default]
    Single,
    Batch,
    Insights,
}

/// Marker assigned when a request starts. Only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestGeneration(u64);

impl RequestGeneration {
    fn next(self) -> Self {
        RequestGeneration(self.0 + 1)
    }
}

/// What happened to a request's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The answer was written to the store.
    Committed,
    /// A newer request (or a reset) started first; the answer was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Prediction,
    Health,
    ModelInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Generations {
    prediction: RequestGeneration,
    health: RequestGeneration,
    model_info: RequestGeneration,
}

impl Generations {
    fn slot(&mut self, lane: Lane) -> &mut RequestGeneration {
        match lane {
            Lane::Prediction => &mut self.prediction,
            Lane::Health => &mut self.health,
            Lane::ModelInfo => &mut self.model_info,
        }
    }

    fn advance(&mut self, lane: Lane) -> RequestGeneration {
        let slot = self.slot(lane);
        *slot = slot.next();
        *slot
    }

    fn current(&self, lane: Lane) -> RequestGeneration {
        match lane {
            Lane::Prediction => self.prediction,
            Lane::Health => self.health,
            Lane::ModelInfo => self.model_info,
        }
    }
}

/// Snapshot of everything the screen displays.
#[derive(Debug, Clone, PartialEq)]
pub struct CropState {
    pub features: FeatureVector,
    pub model_type: ModelType,
    pub top_k: NonZeroU32,
    pub prediction: Option<RecommendationReport>,
    pub model_info: Option<ModelInfo>,
    pub health: Option<HealthReport>,
    pub status: StoreStatus,
    pub error: Option<String>,
    pub active_tab: ActiveTab,
    generations: Generations,
}

impl Default for CropState {
    fn default() -> Self {
        Self {
            features: FeatureVector::default(),
            model_type: ModelType::default(),
            top_k: default_top_k(),
            prediction: None,
            model_info: None,
            health: None,
            status: StoreStatus::Idle,
            error: None,
            active_tab: ActiveTab::default(),
            generations: Generations::default(),
        }
    }
}

impl CropState {
    /// Generation of the most recently started prediction.
    pub fn generation(&self) -> RequestGeneration {
        self.generations.prediction
    }

    pub fn is_loading(&self) -> bool {
        self.status == StoreStatus::Loading
    }
}

/// Inputs captured when a prediction starts.
#[derive(Default)]
struct Ticket {
    generation: RequestGeneration,
    features: FeatureVector,
    options: PredictOptions,
}

/// Returns the store to `idle` if a prediction is abandoned before its
/// answer is committed and no newer request has started.
struct InFlight<'a> {
    state: &'a watch::Sender<CropState>,
    generation: RequestGeneration,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let generation = self.generation;
        let abandoned = self.state.send_if_modified(|s| {
            if s.generations.current(Lane::Prediction) != generation
                || s.status != StoreStatus::Loading
            {
                return false;
            }
            s.status = StoreStatus::Idle;
            true
        });
        if abandoned {
            tracing::debug!(generation = generation.0, "recommendation request abandoned");
        }
    }
}

pub struct CropStore {
    state: watch::Sender<CropState>,
    backend: Arc<dyn PredictionBackend>,
    requires_auth: bool,
}

impl CropStore {
    /// Create a store with default inputs and no results.
    pub fn new(backend: Arc<dyn PredictionBackend>) -> Self {
        let (state, _) = watch::channel(CropState::default());
        Self {
            state,
            backend,
            requires_auth: false,
        }
    }

    /// Mark prediction calls made by this store as requiring authentication.
    pub fn with_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn snapshot(&self) -> CropState {
        self.state.borrow().clone()
    }

    /// Receive a notification after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<CropState> {
        self.state.subscribe()
    }

    // ============ Input edits ============

    /// Change one feature. A non-finite value is rejected and the state is
    /// left as it was.
    pub fn set_feature(&self, name: FeatureName, value: f64) -> Result<(), FeatureError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| {
            result = s.features.set(name, value);
            result.is_ok()
        });
        result
    }

    /// Change every feature present in `patch`, all at once.
    pub fn set_features(&self, patch: &FeaturePatch) -> Result<(), FeatureError> {
        let mut result = Ok(());
        self.state.send_if_modified(|s| {
            result = s.features.apply(patch);
            result.is_ok()
        });
        result
    }

    pub fn set_model_type(&self, model_type: ModelType) {
        self.state.send_modify(|s| s.model_type = model_type);
    }

    pub fn set_top_k(&self, top_k: NonZeroU32) {
        self.state.send_modify(|s| s.top_k = top_k);
    }

    pub fn set_active_tab(&self, tab: ActiveTab) {
        self.state.send_modify(|s| s.active_tab = tab);
    }

    pub fn set_model_info(&self, info: Option<ModelInfo>) {
        self.state.send_modify(|s| s.model_info = info);
    }

    pub fn set_health(&self, health: Option<HealthReport>) {
        self.state.send_modify(|s| s.health = health);
    }

    pub fn reset_features(&self) {
        self.state.send_modify(|s| s.features = FeatureVector::default());
    }

    /// Return inputs to their defaults and clear the prediction, error, and
    /// status. Any prediction still in flight is invalidated.
    pub fn reset_all(&self) {
        self.state.send_modify(|s| {
            s.features = FeatureVector::default();
            s.model_type = ModelType::default();
            s.top_k = default_top_k();
            s.prediction = None;
            s.error = None;
            s.status = StoreStatus::Idle;
            s.active_tab = ActiveTab::Single;
            s.generations.advance(Lane::Prediction);
        });
    }

    // ============ Requests ============

    /// Request a recommendation report for the current inputs.
    ///
    /// Sets `status = loading` immediately. When the backend answers and no
    /// newer request or reset has started meanwhile, commits either the
    /// report (`success`) or the error summary (`error`). If the returned
    /// future is dropped before the answer arrives, a still-current request
    /// puts the store back to `idle`.
    pub async fn request_recommendation(&self) -> Outcome {
        let mut ticket = Ticket::default();
        let requires_auth = self.requires_auth;
        self.state.send_modify(|s| {
            ticket = Ticket {
                generation: s.generations.advance(Lane::Prediction),
                features: s.features,
                options: PredictOptions {
                    requires_auth,
                    model_type: s.model_type,
                    top_k: s.top_k,
                },
            };
            s.status = StoreStatus::Loading;
            s.error = None;
        });
        tracing::debug!(generation = ticket.generation.0, "recommendation requested");
        let in_flight = InFlight {
            state: &self.state,
            generation: ticket.generation,
            settled: false,
        };

        let result = self
            .backend
            .recommend(&ticket.features, &ticket.options)
            .await;

        in_flight.settle();
        self.commit(Lane::Prediction, ticket.generation, move |s| match result {
            Ok(report) => {
                s.prediction = Some(report);
                s.error = None;
                s.status = StoreStatus::Success;
            }
            Err(e) => {
                s.prediction = None;
                s.error = Some(e.summary());
                s.status = StoreStatus::Error;
            }
        })
    }

    /// Fetch the service health report.
    ///
    /// Failures are returned to the caller (and do not touch `status`)
    /// unless a newer refresh has started, in which case they are dropped.
    pub async fn refresh_health(&self) -> Result<Outcome, DispatchError> {
        let generation = self.begin(Lane::Health);
        match self.backend.health().await {
            Ok(report) => Ok(self.commit(Lane::Health, generation, |s| s.health = Some(report))),
            Err(e) => self.stale_or(Lane::Health, generation, e),
        }
    }

    /// Fetch model metadata. Same staleness rules as [`refresh_health`](Self::refresh_health).
    pub async fn refresh_model_info(&self) -> Result<Outcome, DispatchError> {
        let generation = self.begin(Lane::ModelInfo);
        match self.backend.model_info().await {
            Ok(info) => Ok(self.commit(Lane::ModelInfo, generation, |s| s.model_info = Some(info))),
            Err(e) => self.stale_or(Lane::ModelInfo, generation, e),
        }
    }

    // ============ Internals ============

    fn begin(&self, lane: Lane) -> RequestGeneration {
        let mut generation = RequestGeneration::default();
        // Advancing a lane changes nothing a subscriber can see.
        self.state.send_if_modified(|s| {
            generation = s.generations.advance(lane);
            false
        });
        generation
    }

    fn commit<F>(&self, lane: Lane, generation: RequestGeneration, apply: F) -> Outcome
    where
        F: FnOnce(&mut CropState),
    {
        let committed = self.state.send_if_modified(|s| {
            if s.generations.current(lane) != generation {
                return false;
            }
            apply(s);
            true
        });
        if committed {
            Outcome::Committed
        } else {
            tracing::debug!(?lane, generation = generation.0, "dropping superseded result");
            Outcome::Superseded
        }
    }

    fn stale_or(
        &self,
        lane: Lane,
        generation: RequestGeneration,
        err: DispatchError,
    ) -> Result<Outcome, DispatchError> {
        let current = self.state.borrow().generations.current(lane);
        if current == generation {
            Err(err)
        } else {
            tracing::debug!(
                ?lane,
                generation = generation.0,
                error = %err,
                "dropping superseded failure"
            );
            Ok(Outcome::Superseded)
        }
    }
}
