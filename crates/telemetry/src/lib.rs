//! Vantage telemetry: periodic query scheduling and dashboard state.
//!
//! The pieces compose in dependency order: [`prom`] and [`health`] are thin
//! decoded clients, [`poll`] reissues any of them on a fixed timer with a
//! first-class cancellation ticket, [`store`] keeps the latest result per
//! [`vantage_core::MetricKey`] with a monotonic-sequence guard, [`storage`]
//! runs the one-shot ceph capability probe, and [`session`] wires the whole
//! overview query set together for the lifetime of one view.

#![forbid(unsafe_code)]

pub mod health;
pub mod overview;
pub mod poll;
pub mod prom;
pub mod queries;
pub mod session;
pub mod storage;
pub mod store;

pub use health::{HealthClient, HealthResult, KubeHealth};
pub use overview::{overview_resource_map, OverviewModel};
pub use poll::{schedule, PollTicket};
pub use prom::{capacity_stat, HttpPromClient, PromClient, PromResponse};
pub use session::{DashboardSession, MetricReader, MetricSnapshot, SessionOpts};
pub use storage::{resolve_storage_queries, StorageQueries};
pub use store::{Completion, MetricStore, MetricValue};
