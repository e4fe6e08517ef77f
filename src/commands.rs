//! CLI command implementations.
//!
//! Each `run_*` function builds the facade it needs from the loaded
//! [`Config`], performs one operation, and prints the result to stdout.
//! Failures are returned to `main`, which prints `Error: <summary>`.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde::Serialize;
use std::io::Write;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use crate::auth::{CredentialProvider, EnvCredentials};
use crate::config::Config;
use crate::crop::{CropService, PredictOptions};
use crate::expert::ExpertService;
use crate::models::{
    BatchRequest, ChatMessage, FeaturePatch, FeatureName, FeatureVector, ModelType,
    RecommendationItem, RecommendationReport,
};
use crate::store::{CropStore, StoreStatus};

/// Output shape for `crop predict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PredictMode {
    /// Single best crop.
    Single,
    /// Ranked list of the most likely crops.
    TopK,
    /// Full report with confidence, run through the recommendation store.
    #[default]
    Report,
}

fn credentials(config: &Config) -> Arc<dyn CredentialProvider> {
    Arc::new(EnvCredentials::new(config.auth.token_env.clone()))
}

fn crop_service(config: &Config) -> Result<CropService> {
    Ok(CropService::from_config(&config.crop, credentials(config))?)
}

fn expert_service(config: &Config) -> Result<ExpertService> {
    Ok(ExpertService::from_config(&config.expert, credentials(config))?)
}

/// Defaults with `patch` applied.
pub fn features_from(patch: &FeaturePatch) -> Result<FeatureVector> {
    let mut features = FeatureVector::default();
    features.apply(patch)?;
    Ok(features)
}

pub async fn run_health(config: &Config) -> Result<()> {
    let report = crop_service(config)?.health().await?;
    println!("status: {:?}", report.status);
    if !report.models.is_empty() {
        println!("{:<20} STATUS", "MODEL");
        for (model, status) in &report.models {
            println!("{:<20} {}", model, status);
        }
    }
    Ok(())
}

/// Ping both services; fails if either is unreachable.
pub async fn run_ping(config: &Config) -> Result<()> {
    let crop = crop_service(config)?.ping().await?;
    println!("{:<8} {}", "crop", crop.message);
    let expert = expert_service(config)?.ping().await?;
    println!("{:<8} {}", "expert", expert.message);
    Ok(())
}

pub async fn run_models(config: &Config) -> Result<()> {
    let info = crop_service(config)?.model_info().await?;
    println!("models: {}", info.available_models.join(", "));
    println!("{:<12} {:>10} {:>10}", "FEATURE", "MIN", "MAX");
    for name in &info.feature_names {
        match info.feature_ranges.get(name) {
            Some((min, max)) => println!("{:<12} {:>10} {:>10}", name, min, max),
            None => println!("{:<12} {:>10} {:>10}", name, "-", "-"),
        }
    }
    Ok(())
}

pub async fn run_predict(
    config: &Config,
    patch: &FeaturePatch,
    model_type: ModelType,
    top_k: NonZeroU32,
    mode: PredictMode,
) -> Result<()> {
    let service = crop_service(config)?;
    let options = service.options().with_model(model_type).with_top_k(top_k);

    match mode {
        PredictMode::Single => {
            let features = features_from(patch)?;
            let prediction = service.predict(&features, &options).await?;
            println!("crop:  {}", prediction.crop);
            println!("model: {}", prediction.model_type);
        }
        PredictMode::TopK => {
            let features = features_from(patch)?;
            let ranked = service.predict_top_k(&features, &options).await?;
            println!("model: {}", ranked.model_type);
            print_ranking(&ranked.recommendations);
        }
        PredictMode::Report => {
            let report = recommend_via_store(service, patch, &options).await?;
            print_report(&report);
        }
    }
    Ok(())
}

async fn recommend_via_store(
    service: CropService,
    patch: &FeaturePatch,
    options: &PredictOptions,
) -> Result<RecommendationReport> {
    let store = CropStore::new(Arc::new(service)).with_auth(options.requires_auth);
    store.set_features(patch)?;
    store.set_model_type(options.model_type);
    store.set_top_k(options.top_k);
    store.request_recommendation().await;

    let state = store.snapshot();
    match (state.status, state.prediction, state.error) {
        (StoreStatus::Success, Some(report), _) => Ok(report),
        (_, _, Some(error)) => bail!(error),
        (status, _, None) => bail!("recommendation finished in state {:?}", status),
    }
}

fn print_ranking(items: &[RecommendationItem]) {
    println!("{:<4} {:<16} PROBABILITY", "#", "CROP");
    for (i, item) in items.iter().enumerate() {
        println!("{:<4} {:<16} {:.3}", i + 1, item.crop, item.probability);
    }
}

fn print_report(report: &RecommendationReport) {
    println!("--- Recommendation ---");
    println!("crop:       {}", report.recommended_crop);
    println!("confidence: {:.1}%", report.confidence * 100.0);
    println!("model:      {}", report.model_type);
    println!();
    println!("--- Conditions ---");
    for name in FeatureName::ALL {
        println!("{:<12} {}", name, report.input_conditions.get(name));
    }
    println!();
    println!("--- Alternatives ({}) ---", report.top_recommendations.len());
    print_ranking(&report.top_recommendations);
}

/// Predict one crop per sample in a JSON file holding an array of
/// feature objects.
pub async fn run_batch(config: &Config, path: &Path, model_type: Option<ModelType>) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    let samples: Vec<FeatureVector> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse samples file: {}", path.display()))?;

    let service = crop_service(config)?;
    let request = BatchRequest {
        samples,
        model_type,
    };
    let result = service
        .predict_batch(&request, service.options().call())
        .await?;

    println!("batch predict ({})", result.model_type);
    println!("  samples: {}", result.count);
    for (i, crop) in result.predictions.iter().enumerate() {
        println!("  [{}] {}", i, crop);
    }
    Ok(())
}

pub async fn run_chat(
    config: &Config,
    message: &str,
    system: Option<&str>,
    stream: bool,
) -> Result<()> {
    let expert = expert_service(config)?;
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(message));

    if !stream {
        let reply = expert.chat(&messages, None).await?;
        println!("{}", reply);
        return Ok(());
    }

    let mut chunks = expert.chat_stream(&messages, None).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if chunk.done {
            break;
        }
        write!(stdout, "{}", chunk.text)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

pub async fn run_soil(config: &Config, patch: &FeaturePatch) -> Result<()> {
    let features = features_from(patch)?;
    let analysis = expert_service(config)?.soil_analysis(&features).await?;
    println!("overall health:   {:?}", analysis.overall_health);
    println!("nutrient balance: {}", analysis.nutrient_balance);
    println!("ph assessment:    {}", analysis.ph_assessment);
    print_list("Recommendations", &analysis.recommendations);
    Ok(())
}

/// Recommend a crop for the given conditions, then ask the assistant for
/// insights about it.
pub async fn run_insights(
    config: &Config,
    patch: &FeaturePatch,
    model_type: ModelType,
    top_k: NonZeroU32,
) -> Result<()> {
    let features = features_from(patch)?;
    let crop = crop_service(config)?;
    let options = crop.options().with_model(model_type).with_top_k(top_k);
    let report = crop.recommend(&features, &options).await?;

    let insight = expert_service(config)?
        .crop_insights(&report, &features)
        .await?;
    println!("--- {} ---", report.recommended_crop);
    println!("{}", insight.summary);
    println!();
    println!("expected yield:  {}", insight.expected_yield);
    println!("seasonal advice: {}", insight.seasonal_advice);
    println!("market:          {}", insight.market_insights);
    print_list("Planting tips", &insight.planting_tips);
    print_list("Risk factors", &insight.risk_factors);
    Ok(())
}

fn print_list(title: &str, items: &[String]) {
    println!();
    println!("--- {} ({}) ---", title, items.len());
    for item in items {
        println!("  - {}", item);
    }
}

pub async fn run_diagnose(config: &Config, symptoms: &[String]) -> Result<()> {
    if symptoms.is_empty() {
        bail!("at least one symptom is required");
    }
    let result = expert_service(config)?.diagnose(symptoms).await?;
    print_json(&result)
}

pub async fn run_symptoms(config: &Config) -> Result<()> {
    print_json(&expert_service(config)?.symptoms().await?)
}

pub async fn run_diseases(config: &Config) -> Result<()> {
    print_json(&expert_service(config)?.diseases().await?)
}

pub async fn run_disease(config: &Config, name: &str) -> Result<()> {
    print_json(&expert_service(config)?.disease(name).await?)
}

pub async fn run_chat_models(config: &Config) -> Result<()> {
    print_json(&expert_service(config)?.chat_models().await?)
}

pub async fn run_validate_model(config: &Config, model: &str) -> Result<()> {
    print_json(&expert_service(config)?.validate_model(model).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
