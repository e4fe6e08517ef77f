//! Chat and expert-system service facade.
//!
//! Covers the farming assistant (plain and streamed chat, crop insights,
//! soil analysis) and the rule-based expert system. The expert-system
//! lookups return the service's JSON unchanged since their shape belongs to
//! the diagnosis model, not to this client.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialProvider;
use crate::config::ExpertServiceConfig;
use crate::dispatch::{CallOptions, RequestDispatcher};
use crate::error::DispatchError;
use crate::models::{
    ChatContext, ChatMessage, ChatReply, CropInsight, FeatureVector, Ping, RecommendationReport,
    SoilAnalysis,
};
use crate::routes;
use crate::stream::{open_stream, ChunkStream, StreamFraming};

#[derive(Serialize)]
struct ChatBody<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a ChatContext>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct InsightBody<'a> {
    recommendation: &'a RecommendationReport,
    features: &'a FeatureVector,
}

#[derive(Serialize)]
struct SoilBody<'a> {
    features: &'a FeatureVector,
}

#[derive(Serialize)]
struct DiagnoseBody<'a> {
    symptoms: &'a [String],
}

#[derive(Serialize)]
struct ValidateModelBody<'a> {
    model: &'a str,
}

#[derive(Debug, Clone)]
pub struct ExpertService {
    dispatcher: RequestDispatcher,
    options: CallOptions,
    framing: StreamFraming,
}

impl ExpertService {
    pub fn new(dispatcher: RequestDispatcher, framing: StreamFraming) -> Self {
        Self {
            dispatcher,
            options: CallOptions::PUBLIC,
            framing,
        }
    }

    pub fn from_config(
        config: &ExpertServiceConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, DispatchError> {
        let dispatcher = RequestDispatcher::new(
            "expert",
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            credentials,
        )?;
        Ok(Self {
            dispatcher,
            options: CallOptions {
                requires_auth: config.requires_auth,
            },
            framing: config.stream_framing,
        })
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Service banner.
    pub async fn root(&self) -> Result<Value, DispatchError> {
        self.dispatcher.get(routes::expert::ROOT, self.options).await
    }

    pub async fn ping(&self) -> Result<Ping, DispatchError> {
        self.dispatcher.get(routes::expert::PING, self.options).await
    }

    /// Send a conversation (oldest message first) and return the reply text.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        context: Option<&ChatContext>,
    ) -> Result<String, DispatchError> {
        let body = ChatBody {
            messages,
            context,
            stream: false,
        };
        let reply: ChatReply = self
            .dispatcher
            .post(routes::expert::CHAT, &body, self.options)
            .await?;
        Ok(reply.message)
    }

    /// Like [`chat`](Self::chat), but the reply arrives incrementally.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        context: Option<&ChatContext>,
    ) -> Result<ChunkStream, DispatchError> {
        let body = ChatBody {
            messages,
            context,
            stream: true,
        };
        open_stream(
            &self.dispatcher,
            routes::expert::CHAT,
            &body,
            self.options,
            self.framing,
        )
        .await
    }

    /// Post a message to the expert system's own chat endpoint. The body
    /// and reply are passed through unchanged.
    pub async fn chat_message(&self, body: &Value) -> Result<Value, DispatchError> {
        self.dispatcher
            .post(routes::expert::CHAT_MESSAGE, body, self.options)
            .await
    }

    /// Language models the expert system can chat with.
    pub async fn chat_models(&self) -> Result<Value, DispatchError> {
        self.dispatcher
            .get(routes::expert::CHAT_MODELS, self.options)
            .await
    }

    pub async fn validate_model(&self, model: &str) -> Result<Value, DispatchError> {
        self.dispatcher
            .post(
                routes::expert::VALIDATE_MODEL,
                &ValidateModelBody { model },
                self.options,
            )
            .await
    }

    pub async fn crop_insights(
        &self,
        recommendation: &RecommendationReport,
        features: &FeatureVector,
    ) -> Result<CropInsight, DispatchError> {
        let body = InsightBody {
            recommendation,
            features,
        };
        self.dispatcher
            .post(routes::expert::CROP_INSIGHTS, &body, self.options)
            .await
    }

    pub async fn soil_analysis(
        &self,
        features: &FeatureVector,
    ) -> Result<SoilAnalysis, DispatchError> {
        self.dispatcher
            .post(
                routes::expert::SOIL_ANALYSIS,
                &SoilBody { features },
                self.options,
            )
            .await
    }

    pub async fn diagnose(&self, symptoms: &[String]) -> Result<Value, DispatchError> {
        self.dispatcher
            .post(
                routes::expert::DIAGNOSE,
                &DiagnoseBody { symptoms },
                self.options,
            )
            .await
    }

    pub async fn symptoms(&self) -> Result<Value, DispatchError> {
        self.dispatcher.get(routes::expert::SYMPTOMS, self.options).await
    }

    pub async fn diseases(&self) -> Result<Value, DispatchError> {
        self.dispatcher.get(routes::expert::DISEASES, self.options).await
    }

    pub async fn disease(&self, name: &str) -> Result<Value, DispatchError> {
        self.dispatcher
            .get(&routes::expert::disease(name), self.options)
            .await
    }
}
