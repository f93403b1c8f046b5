use std::future::Future;

use crate::models::credential::Credential;

/// One logical call to the vision model. The retry session treats every
/// variant identically; only the payload differs.
#[derive(Debug, Clone, Copy)]
pub enum ClassifyRequest<'a> {
    /// Rank the listing's body type from its breadcrumb and images.
    Primary {
        breadcrumb: &'a str,
        images: &'a [Vec<u8>],
    },
    /// Choose between close candidates.
    Refine {
        options: &'a [String],
        image: &'a [u8],
    },
    /// Yes/no check for dual rear wheels on a predicted category.
    Verify { category: &'a str, image: &'a [u8] },
    /// Minimal text call used to test a key.
    Probe,
}

impl ClassifyRequest<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Primary { .. } => "primary",
            Self::Refine { .. } => "refine",
            Self::Verify { .. } => "verify",
            Self::Probe => "probe",
        }
    }
}

/// Raw model answer plus token usage for costing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    RateLimited,
    Upstream(u16),
    Timeout,
    Connection,
}

/// Failure of a single call, already classified for the retry session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("Key rejected by provider: {0}")]
    InvalidCredential(String),

    #[error("Transient provider failure: {0:?}")]
    Transient(TransientKind),

    #[error("Unexpected provider error: {0}")]
    Fatal(String),
}

/// The vision model as seen by a worker.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        request: ClassifyRequest<'_>,
        key: &Credential,
    ) -> impl Future<Output = Result<Classification, CallError>> + Send;
}
