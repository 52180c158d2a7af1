//! Integration tests for the job engine, run against the in-memory store.
//! `postgres_test` covers the PostgreSQL statements and is ignored unless
//! asked for.

mod helpers;

mod claim_test;
mod lifecycle_test;
mod metrics_test;
mod postgres_test;
mod priority_test;
mod retry_test;
