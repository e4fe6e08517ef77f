//! Endpoint paths, relative to each service's base address.

/// Crop-prediction service.
pub mod crop {
    use crate::models::ModelType;

    pub const HEALTH: &str = "/health";
    pub const PING: &str = "/ping";
    pub const MODEL_INFO: &str = "/models/info";
    pub const PREDICT_BATCH: &str = "/crops/predict/batch";

    pub fn predict(model_type: ModelType) -> String {
        format!("/crops/predict?model_type={}", model_type)
    }

    pub fn predict_top_k(k: u32, model_type: ModelType) -> String {
        format!("/crops/predict/top-k?k={}&model_type={}", k, model_type)
    }

    pub fn recommend(top_k: u32, model_type: ModelType) -> String {
        format!("/crops/recommend?top_k={}&model_type={}", top_k, model_type)
    }
}

/// Chat and expert-system service.
pub mod expert {
    pub const ROOT: &str = "/";
    pub const PING: &str = "/ping";
    pub const DIAGNOSE: &str = "/expert/diagnose";
    pub const SYMPTOMS: &str = "/expert/symptoms";
    pub const DISEASES: &str = "/expert/diseases";
    pub const CHAT_MESSAGE: &str = "/chat/message";
    pub const CHAT_MODELS: &str = "/chat/models";
    pub const VALIDATE_MODEL: &str = "/chat/validate-model";
    pub const CHAT: &str = "/ai/chat";
    pub const CROP_INSIGHTS: &str = "/ai/crop-insights";
    pub const SOIL_ANALYSIS: &str = "/ai/soil-analysis";

    pub fn disease(name: &str) -> String {
        format!("{}/{}", DISEASES, urlencoding::encode(name))
    }
}
