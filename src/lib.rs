//! # Crop Advisor
//!
//! Client-side integration layer for a crop recommendation service and a
//! farming chat/expert service.
//!
//! Every outbound call goes through one [`dispatch::RequestDispatcher`],
//! which attaches credentials and turns transport and status failures into
//! a single [`error::DispatchError`] taxonomy. Two facades map domain
//! operations onto calls, and a reactive store keeps the recommendation
//! screen's state consistent when answers arrive out of order.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  CropStore   │  staleness guard, status
//!                 └──────┬───────┘
//!                        ▼
//! ┌─────────────┐  ┌─────────────┐   ┌──────────────┐
//! │ CropService │  │ExpertService│──▶│ ChunkStream  │
//! └──────┬──────┘  └──────┬──────┘   └──────┬───────┘
//!        └───────┬────────┘                 │
//!                ▼                          │
//!       ┌──────────────────┐                │
//!       │RequestDispatcher │◀───────────────┘
//!       │ auth + classify  │
//!       └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Dispatch error taxonomy |
//! | [`auth`] | Bearer credentials and providers |
//! | [`models`] | Wire data types |
//! | [`routes`] | Endpoint paths |
//! | [`dispatch`] | Request construction, authentication, classification |
//! | [`stream`] | Incremental decoding of streamed replies |
//! | [`crop`] | Crop-prediction facade |
//! | [`expert`] | Chat and expert-system facade |
//! | [`store`] | Reactive recommendation state |
//! | [`commands`] | CLI command implementations |

pub mod auth;
pub mod commands;
pub mod config;
pub mod crop;
pub mod dispatch;
pub mod error;
pub mod expert;
pub mod models;
pub mod routes;
pub mod store;
pub mod stream;
