pub mod credential;
pub mod job;
pub mod progress;
pub mod status;
