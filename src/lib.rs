//! # Crawl Admission
//!
//! Job scheduling and admission control for multi-tenant crawl and
//! page-analysis workloads.
//!
//! Crawling is expensive and tenants pay for different service levels. This
//! crate arbitrates access to crawling capacity: named queues hold crawl and
//! analysis jobs, a plan-tier scheduler orders and preempts them, a rate
//! limiter and a tenant ledger gate admission, and a memory monitor sheds load
//! when the process runs hot.
//!
//! ## Key Features
//!
//! - **Named queues**: bounded waiting lists with `maxWorkers × concurrency`
//!   active slots, retries with backoff, pause/resume/clear/cancel
//! - **Plan-tier priority**: tier 1 first, FIFO within a tier, one-shot
//!   preemption of lower tiers, a reserved slot and a starvation bound for
//!   the lowest tier
//! - **Cooperative cancellation**: every unit of work receives a
//!   [`core::JobSignal`] it must poll; nothing is ever killed
//! - **Admission control**: per-tenant, per-route fixed window plus burst
//!   window; per-tenant usage ceilings from the subscription plan
//! - **Memory backpressure**: classification against warning/critical
//!   thresholds and progressive admission throttling
//! - **Admin HTTP surface**: axum routes for stats, control, configuration,
//!   memory and performance
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crawl_admission::builders::SchedulerContext;
//! use crawl_admission::config::SchedulerConfig;
//! use crawl_admission::core::SubmitRequest;
//! use crawl_admission::runtime::{serve, ControlPlane};
//!
//! let ctx = SchedulerContext::builder(SchedulerConfig::from_env()?)
//!     .default_executor(Arc::new(MyCrawler::new()))
//!     .build()?;
//! ctx.start_background_tasks();
//!
//! let admission = ctx
//!     .scheduler
//!     .submit(SubmitRequest {
//!         queue_name: "web-scraping".into(),
//!         tenant_id: "acme".into(),
//!         payload: serde_json::json!({ "url": "https://example.com" }),
//!     })
//!     .await?;
//!
//! serve(ControlPlane::new(ctx), "0.0.0.0:8080").await?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_scenarios.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, admission control and backpressure.
pub mod core;
/// Configuration models for queues, rate limits, memory and plans.
pub mod config;
/// Builders to construct the scheduler context from configuration.
pub mod builders;
/// Infrastructure adapters for plan lookup and memory sampling.
pub mod infra;
/// Runtime adapters and the admin HTTP surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
