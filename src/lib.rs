//! Vehicle listing annotation
//!
//! Rate-limited, parallel classification of scraped vehicle listings with a
//! pool of Gemini API keys: per-key RPM ledger with smart swapping, staged
//! recovery when every key is gone, and checkpointed results in input order.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
