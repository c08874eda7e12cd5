//! Commodity price resolution and caching engine.
//!
//! [`resolver::PriceResolver`] answers every price request by walking an
//! ordered chain of [`sources::PriceTier`]s, and [`scheduler::RefreshScheduler`]
//! keeps the SQLite-backed cache warm in the background.

pub mod config;
pub mod db;
pub mod monitoring;
pub mod pricing;
pub mod resolver;
pub mod scheduler;
pub mod sources;
