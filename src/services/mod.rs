pub mod annotate;
pub mod checkpoint;
pub mod classifier;
pub mod credentials;
pub mod dispatcher;
pub mod gemini;
pub mod images;
pub mod input;
pub mod ledger;
pub mod phoenix;
pub mod progress;
pub mod queue;
pub mod rate_limiter;
pub mod session;
pub mod worker;
