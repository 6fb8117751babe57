// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod feed;
pub mod gateway;
pub mod grid;
pub mod metrics;
pub mod orders;
pub mod positions;
pub mod posttrade;
pub mod recorder;
pub mod selector;
pub mod snapshot;
pub mod stop;
pub mod zone;
