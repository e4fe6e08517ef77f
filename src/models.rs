//! Data types exchanged with the crop-prediction and expert services.
//!
//! Wire names follow the services' JSON (`N`, `P`, `K` for the nutrient
//! fields, snake_case model names, camelCase for the AI insight payloads).

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

// ============ Feature vector ============

/// Seven soil and climate measurements describing one growing condition.
///
/// Every field must be finite. Serialization refuses NaN and infinities
/// instead of letting them degrade to `null` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "N", serialize_with = "finite")]
    pub nitrogen: f64,
    #[serde(rename = "P", serialize_with = "finite")]
    pub phosphorus: f64,
    #[serde(rename = "K", serialize_with = "finite")]
    pub potassium: f64,
    #[serde(serialize_with = "finite")]
    pub temperature: f64,
    #[serde(serialize_with = "finite")]
    pub humidity: f64,
    #[serde(serialize_with = "finite")]
    pub ph: f64,
    #[serde(serialize_with = "finite")]
    pub rainfall: f64,
}

fn finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        Err(serde::ser::Error::custom(format!(
            "non-finite feature value {}",
            value
        )))
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            nitrogen: 90.0,
            phosphorus: 42.0,
            potassium: 43.0,
            temperature: 25.0,
            humidity: 70.0,
            ph: 6.5,
            rainfall: 200.0,
        }
    }
}

impl FeatureVector {
    pub fn get(&self, name: FeatureName) -> f64 {
        match name {
            FeatureName::Nitrogen => self.nitrogen,
            FeatureName::Phosphorus => self.phosphorus,
            FeatureName::Potassium => self.potassium,
            FeatureName::Temperature => self.temperature,
            FeatureName::Humidity => self.humidity,
            FeatureName::Ph => self.ph,
            FeatureName::Rainfall => self.rainfall,
        }
    }

    /// Set one field. Non-finite values are rejected and leave the vector
    /// unchanged.
    pub fn set(&mut self, name: FeatureName, value: f64) -> Result<(), FeatureError> {
        check_finite(name, value)?;
        *self.field_mut(name) = value;
        Ok(())
    }

    /// Apply every field present in `patch`. Either all fields are applied
    /// or, if any value is non-finite, none are.
    pub fn apply(&mut self, patch: &FeaturePatch) -> Result<(), FeatureError> {
        let updates = patch.entries();
        for (name, value) in &updates {
            check_finite(*name, *value)?;
        }
        for (name, value) in updates {
            *self.field_mut(name) = value;
        }
        Ok(())
    }

    /// Check that every field is finite.
    pub fn validate(&self) -> Result<(), FeatureError> {
        FeatureName::ALL
            .iter()
            .try_for_each(|name| check_finite(*name, self.get(*name)))
    }

    fn field_mut(&mut self, name: FeatureName) -> &mut f64 {
        match name {
            FeatureName::Nitrogen => &mut self.nitrogen,
            FeatureName::Phosphorus => &mut self.phosphorus,
            FeatureName::Potassium => &mut self.potassium,
            FeatureName::Temperature => &mut self.temperature,
            FeatureName::Humidity => &mut self.humidity,
            FeatureName::Ph => &mut self.ph,
            FeatureName::Rainfall => &mut self.rainfall,
        }
    }
}

fn check_finite(name: FeatureName, value: f64) -> Result<(), FeatureError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FeatureError::NonFinite { name, value })
    }
}

/// Identifies one field of a [`FeatureVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureName {
    Nitrogen,
    Phosphorus,
    Potassium,
    Temperature,
    Humidity,
    Ph,
    Rainfall,
}

impl FeatureName {
    pub const ALL: [FeatureName; 7] = [
        FeatureName::Nitrogen,
        FeatureName::Phosphorus,
        FeatureName::Potassium,
        FeatureName::Temperature,
        FeatureName::Humidity,
        FeatureName::Ph,
        FeatureName::Rainfall,
    ];

    /// The key used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::Nitrogen => "N",
            FeatureName::Phosphorus => "P",
            FeatureName::Potassium => "K",
            FeatureName::Temperature => "temperature",
            FeatureName::Humidity => "humidity",
            FeatureName::Ph => "ph",
            FeatureName::Rainfall => "rainfall",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureName {
    type Err = FeatureError;

    /// Accepts the wire key or the long name, case-insensitively
    /// (`"N"`, `"nitrogen"`, `"ph"`, `"acidity"`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "nitrogen" => Ok(FeatureName::Nitrogen),
            "p" | "phosphorus" => Ok(FeatureName::Phosphorus),
            "k" | "potassium" => Ok(FeatureName::Potassium),
            "temperature" => Ok(FeatureName::Temperature),
            "humidity" => Ok(FeatureName::Humidity),
            "ph" | "acidity" => Ok(FeatureName::Ph),
            "rainfall" => Ok(FeatureName::Rainfall),
            _ => Err(FeatureError::UnknownName(s.to_string())),
        }
    }
}

/// A partial update of a [`FeatureVector`]; `None` fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeaturePatch {
    pub nitrogen: Option<f64>,
    pub phosphorus: Option<f64>,
    pub potassium: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub ph: Option<f64>,
    pub rainfall: Option<f64>,
}

impl FeaturePatch {
    fn entries(&self) -> Vec<(FeatureName, f64)> {
        [
            (FeatureName::Nitrogen, self.nitrogen),
            (FeatureName::Phosphorus, self.phosphorus),
            (FeatureName::Potassium, self.potassium),
            (FeatureName::Temperature, self.temperature),
            (FeatureName::Humidity, self.humidity),
            (FeatureName::Ph, self.ph),
            (FeatureName::Rainfall, self.rainfall),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("unknown feature '{0}'. Must be one of N, P, K, temperature, humidity, ph, rainfall")]
    UnknownName(String),
    #[error("feature {name} must be a finite number, got {value}")]
    NonFinite { name: FeatureName, value: f64 },
}

// ============ Model selection ============

/// Which prediction backend variant serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    RandomForest,
    NeuralNetwork,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::RandomForest => "random_forest",
            ModelType::NeuralNetwork => "neural_network",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random_forest" | "rf" => Ok(ModelType::RandomForest),
            "neural_network" | "nn" => Ok(ModelType::NeuralNetwork),
            other => Err(format!(
                "unknown model type '{}'. Must be random_forest or neural_network",
                other
            )),
        }
    }
}

/// Default number of ranked recommendations.
pub fn default_top_k() -> NonZeroU32 {
    NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN)
}

// ============ Service metadata ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub models: BTreeMap<String, String>,
}

/// `GET /models/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub available_models: Vec<String>,
    pub feature_names: Vec<String>,
    /// Feature name to `(min, max)`.
    pub feature_ranges: BTreeMap<String, (f64, f64)>,
}

/// `GET /ping`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub message: String,
}

// ============ Predictions ============

/// Single best crop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub crop: String,
    pub model_type: ModelType,
}

/// One entry of a ranked list. `probability` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub crop: String,
    pub probability: f64,
}

/// Ranked top-K crops, most likely first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKPrediction {
    pub recommendations: Vec<RecommendationItem>,
    pub model_type: ModelType,
}

/// Detailed recommendation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub input_conditions: FeatureVector,
    pub recommended_crop: String,
    pub confidence: f64,
    pub top_recommendations: Vec<RecommendationItem>,
    pub model_type: ModelType,
}

/// Any of the three prediction shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionResult {
    Single(Prediction),
    Ranked(TopKPrediction),
    Report(RecommendationReport),
}

impl PredictionResult {
    pub fn model_type(&self) -> ModelType {
        match self {
            PredictionResult::Single(p) => p.model_type,
            PredictionResult::Ranked(r) => r.model_type,
            PredictionResult::Report(r) => r.model_type,
        }
    }

    /// The highest ranked crop, if the result names one.
    pub fn best_crop(&self) -> Option<&str> {
        match self {
            PredictionResult::Single(p) => Some(&p.crop),
            PredictionResult::Ranked(r) => r.recommendations.first().map(|i| i.crop.as_str()),
            PredictionResult::Report(r) => Some(&r.recommended_crop),
        }
    }
}

impl From<Prediction> for PredictionResult {
    fn from(p: Prediction) -> Self {
        PredictionResult::Single(p)
    }
}

impl From<TopKPrediction> for PredictionResult {
    fn from(r: TopKPrediction) -> Self {
        PredictionResult::Ranked(r)
    }
}

impl From<RecommendationReport> for PredictionResult {
    fn from(r: RecommendationReport) -> Self {
        PredictionResult::Report(r)
    }
}

// ============ Batch ============

/// `POST /crops/predict/batch` body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchRequest {
    pub samples: Vec<FeatureVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,
}

/// Crop identifiers in the same order as the request samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub predictions: Vec<String>,
    pub model_type: ModelType,
    pub count: usize,
}

// ============ Chat ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Optional grounding sent along with a conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendationReport>,
}

/// Non-streaming chat reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
}

// ============ AI insights ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropInsight {
    pub summary: String,
    pub planting_tips: Vec<String>,
    pub expected_yield: String,
    pub seasonal_advice: String,
    pub risk_factors: Vec<String>,
    pub market_insights: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilHealth {
    Excellent,
    Good,
    Moderate,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoilAnalysis {
    pub overall_health: SoilHealth,
    pub nutrient_balance: String,
    pub ph_assessment: String,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_vector_wire_names() {
        let value = serde_json::to_value(FeatureVector::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "N": 90.0, "P": 42.0, "K": 43.0,
                "temperature": 25.0, "humidity": 70.0, "ph": 6.5, "rainfall": 200.0
            })
        );
    }

    #[test]
    fn test_non_finite_refuses_to_serialize() {
        let mut fv = FeatureVector::default();
        fv.rainfall = f64::NAN;
        assert!(serde_json::to_vec(&fv).is_err());

        fv.rainfall = f64::INFINITY;
        assert!(serde_json::to_vec(&fv).is_err());
    }

    #[test]
    fn test_set_touches_only_addressed_field() {
        let mut fv = FeatureVector::default();
        fv.set(FeatureName::Ph, 7.0).unwrap();

        let defaults = FeatureVector::default();
        for name in FeatureName::ALL {
            if name == FeatureName::Ph {
                assert_eq!(fv.get(name), 7.0);
            } else {
                assert_eq!(fv.get(name), defaults.get(name), "{} changed", name);
            }
        }
    }

    #[test]
    fn test_set_rejects_nan() {
        let mut fv = FeatureVector::default();
        let err = fv.set(FeatureName::Humidity, f64::NAN).unwrap_err();
        assert!(matches!(err, FeatureError::NonFinite { name: FeatureName::Humidity, .. }));
        assert_eq!(fv, FeatureVector::default());
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let mut fv = FeatureVector::default();
        let patch = FeaturePatch {
            nitrogen: Some(10.0),
            rainfall: Some(f64::NEG_INFINITY),
            ..Default::default()
        };
        assert!(fv.apply(&patch).is_err());
        assert_eq!(fv, FeatureVector::default());

        let patch = FeaturePatch {
            nitrogen: Some(10.0),
            rainfall: Some(120.0),
            ..Default::default()
        };
        fv.apply(&patch).unwrap();
        assert_eq!(fv.nitrogen, 10.0);
        assert_eq!(fv.rainfall, 120.0);
        assert_eq!(fv.ph, 6.5);
    }

    #[test]
    fn test_feature_name_parsing() {
        assert_eq!("N".parse::<FeatureName>().unwrap(), FeatureName::Nitrogen);
        assert_eq!("ph".parse::<FeatureName>().unwrap(), FeatureName::Ph);
        assert_eq!("Acidity".parse::<FeatureName>().unwrap(), FeatureName::Ph);
        assert_eq!("potassium".parse::<FeatureName>().unwrap(), FeatureName::Potassium);
        assert!("salinity".parse::<FeatureName>().is_err());
    }

    #[test]
    fn test_model_type_wire_format() {
        assert_eq!(
            serde_json::to_value(ModelType::NeuralNetwork).unwrap(),
            json!("neural_network")
        );
        assert_eq!("rf".parse::<ModelType>().unwrap(), ModelType::RandomForest);
        assert!("svm".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_model_info_ranges_decode_from_pairs() {
        let info: ModelInfo = serde_json::from_value(json!({
            "available_models": ["random_forest", "neural_network"],
            "feature_names": ["N", "P"],
            "feature_ranges": {"N": [0, 140], "P": [5.0, 145.0]}
        }))
        .unwrap();
        assert_eq!(info.feature_ranges["N"], (0.0, 140.0));
        assert_eq!(info.available_models.len(), 2);
    }

    #[test]
    fn test_batch_request_omits_missing_model() {
        let req = BatchRequest {
            samples: vec![],
            model_type: None,
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"samples": []}));
    }

    #[test]
    fn test_prediction_result_accessors() {
        let ranked = PredictionResult::from(TopKPrediction {
            recommendations: vec![
                RecommendationItem { crop: "rice".into(), probability: 0.7 },
                RecommendationItem { crop: "jute".into(), probability: 0.2 },
            ],
            model_type: ModelType::NeuralNetwork,
        });
        assert_eq!(ranked.best_crop(), Some("rice"));
        assert_eq!(ranked.model_type(), ModelType::NeuralNetwork);

        let empty = PredictionResult::from(TopKPrediction {
            recommendations: vec![],
            model_type: ModelType::RandomForest,
        });
        assert_eq!(empty.best_crop(), None);
    }

    #[test]
    fn test_soil_analysis_camel_case() {
        let analysis: SoilAnalysis = serde_json::from_value(json!({
            "overallHealth": "good",
            "nutrientBalance": "balanced",
            "phAssessment": "slightly acidic",
            "recommendations": ["add lime"]
        }))
        .unwrap();
        assert_eq!(analysis.overall_health, SoilHealth::Good);
    }
}
