//! # jobforge-database
//!
//! Durable state of the job engine. [`store`] defines the contract the
//! engine programs against; [`repositories`] implements it on PostgreSQL
//! and [`memory`] implements it in process for tests and single-process
//! deployments.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use store::{JobStore, MetricStore, ScheduleStore, Stores};
