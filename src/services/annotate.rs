use std::collections::HashSet;

use super::classifier::{Classifier, ClassifyRequest};
use super::images::ImageFetcher;
use super::session::{CallSession, SessionError};
use crate::config::AnnotationPolicy;
use crate::models::job::{Candidate, Job, ListingResult, ListingStatus};
use crate::models::status::WorkerState;

const IMAGE_NOT_CLEAR: &str = "Image Not Clear";
const DUALLY: &str = "Dually";
const MAX_CANDIDATES: usize = 3;

/// Turns one job into one result, issuing every model call through the
/// worker's [`CallSession`].
#[derive(Debug, Clone)]
pub struct Annotator {
    policy: AnnotationPolicy,
}

impl Annotator {
    pub fn new(policy: AnnotationPolicy) -> Self {
        Self { policy }
    }

    /// Annotate a listing.
    ///
    /// Performs:
    /// - Inactive and image-less short circuits (no model call)
    /// - Primary ranking of up to three categories
    /// - Refinement between the top two when confidence is low
    /// - Dual-rear-wheel verification for commonly dually body types
    /// - Status and cost computation
    pub async fn annotate<C, F>(
        &self,
        job: &Job,
        session: &mut CallSession<C>,
        images: &F,
    ) -> Result<ListingResult, SessionError>
    where
        C: Classifier,
        F: ImageFetcher,
    {
        if job.is_inactive() {
            return Ok(ListingResult::for_job(job, ListingStatus::Inactive));
        }

        let limit = if self.policy.high_accuracy { 2 } else { 1 };
        let images = images.fetch(&job.image_urls, limit).await;
        let Some(first_image) = images.first() else {
            return Ok(ListingResult::for_job(job, ListingStatus::NoImages));
        };

        let mut tokens = TokenTally::default();

        // ── Primary classification ───────────────────────────────────────
        let breadcrumb = job.breadcrumb_text();
        let primary = session
            .call(ClassifyRequest::Primary {
                breadcrumb: &breadcrumb,
                images: &images,
            })
            .await?;
        tokens.add(primary.input_tokens, primary.output_tokens);

        let mut candidates = parse_candidates(&primary.text);
        if candidates.is_empty() {
            let mut result = ListingResult::for_job(job, ListingStatus::AiError);
            result.cost_cents = tokens.cost_cents(&self.policy.model);
            return Ok(result);
        }
        demote_attribute(&mut candidates);

        if candidates[0].category != IMAGE_NOT_CLEAR {
            // ── Refinement between close candidates ──────────────────────
            if candidates.len() > 1 && candidates[0].score < self.policy.high_confidence_threshold {
                let options = vec![
                    candidates[0].category.clone(),
                    candidates[1].category.clone(),
                ];
                let refined = session
                    .call(ClassifyRequest::Refine {
                        options: &options,
                        image: first_image,
                    })
                    .await?;
                tokens.add(refined.input_tokens, refined.output_tokens);
                apply_refinement(&mut candidates, &refined.text);
                demote_attribute(&mut candidates);
            }

            // ── Dual rear wheel verification ─────────────────────────────
            let has_dually = candidates.iter().any(|c| c.category.eq_ignore_ascii_case(DUALLY));
            let top = candidates[0].category.clone();
            if !has_dually && self.needs_verification(&top) {
                session.status().publish(WorkerState::Verifying);
                let verdict = session
                    .call(ClassifyRequest::Verify {
                        category: &top,
                        image: first_image,
                    })
                    .await?;
                session.status().publish(WorkerState::Processing);
                tokens.add(verdict.input_tokens, verdict.output_tokens);
                if let Some(confidence) = parse_verdict(&verdict.text) {
                    append_attribute(&mut candidates, Candidate::new(DUALLY, confidence));
                }
            }
        }

        let mut result = ListingResult::for_job(job, determine_status(&job.breadcrumbs, &candidates));
        result.annotations = candidates;
        result.cost_cents = tokens.cost_cents(&self.policy.model);
        Ok(result)
    }

    fn needs_verification(&self, category: &str) -> bool {
        let category = category.to_lowercase();
        self.policy
            .verify_categories
            .iter()
            .any(|c| category.contains(&c.to_lowercase()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TokenTally {
    input: u64,
    output: u64,
}

impl TokenTally {
    fn add(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
    }

    fn cost_cents(&self, model: &str) -> f64 {
        cost_cents(self.input, self.output, model)
    }
}

/// API cost in cents. Prices are USD per million tokens.
pub fn cost_cents(input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
    let model = model.to_lowercase();
    let (input_price, output_price) = if model.contains("lite") || model.contains("8b") {
        (0.10, 0.40)
    } else {
        (0.30, 2.50)
    };
    let usd = input_tokens as f64 / 1_000_000.0 * input_price
        + output_tokens as f64 / 1_000_000.0 * output_price;
    (usd * 100.0 * 10_000.0).round() / 10_000.0
}

/// Parse `1. Category Name (NN%)` lines, keeping at most three.
/// Short unscored lines count with a zero score.
pub fn parse_candidates(raw: &str) -> Vec<Candidate> {
    let cleaned = raw
        .replace("**", "")
        .replace("Category:", "")
        .replace("Classification:", "");

    let mut candidates = Vec::new();
    for entry in cleaned.split(['\n', ';']).map(str::trim).filter(|e| !e.is_empty()) {
        let entry = strip_rank(entry);
        if let Some(candidate) = parse_scored(entry) {
            candidates.push(candidate);
        } else if entry.chars().count() < 50
            && !entry.starts_with("Analyze")
            && !entry.starts_with("Step")
            && !entry.is_empty()
        {
            candidates.push(Candidate::new(entry, 0.0));
        }
        if candidates.len() >= MAX_CANDIDATES {
            break;
        }
    }
    candidates
}

fn strip_rank(entry: &str) -> &str {
    let rest = entry.trim_start_matches(|c: char| c.is_ascii_digit());
    match rest.strip_prefix('.') {
        Some(stripped) if rest.len() != entry.len() => stripped.trim_start(),
        _ => entry,
    }
}

fn parse_scored(entry: &str) -> Option<Candidate> {
    let body = entry.strip_suffix("%)")?;
    let open = body.rfind('(')?;
    let digits = &body[open + 1..];
    if digits.is_empty() || digits.len() > 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let name = body[..open].trim();
    if name.is_empty() {
        return None;
    }
    Some(Candidate::new(name, digits.parse().ok()?))
}

/// `YES - 85%` yields the confidence, anything else `None`.
pub fn parse_verdict(raw: &str) -> Option<f64> {
    let answer = raw.trim().to_uppercase();
    if !answer.starts_with("YES") {
        return None;
    }
    let confidence = answer
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| !part.is_empty())
        .and_then(|digits| digits.parse::<f64>().ok())
        .filter(|v| *v <= 100.0)
        .unwrap_or(90.0);
    Some(confidence)
}

/// Promote the refinement's pick to rank one.
fn apply_refinement(candidates: &mut [Candidate], answer: &str) {
    let answer = answer.trim().to_lowercase();
    if answer.is_empty() {
        return;
    }
    let pick = candidates
        .iter()
        .take(2)
        .position(|c| c.category.to_lowercase() == answer)
        .or_else(|| {
            candidates
                .iter()
                .take(2)
                .position(|c| answer.contains(&c.category.to_lowercase()))
        });
    if pick == Some(1) {
        candidates.swap(0, 1);
    }
}

/// "Dually" describes wheels, not a body type, so it never ranks first
/// when another candidate exists.
fn demote_attribute(candidates: &mut [Candidate]) {
    if candidates.len() >= 2 && candidates[0].category.eq_ignore_ascii_case(DUALLY) {
        candidates.swap(0, 1);
    }
}

fn append_attribute(candidates: &mut Vec<Candidate>, attribute: Candidate) {
    if candidates.len() >= MAX_CANDIDATES {
        candidates.truncate(MAX_CANDIDATES - 1);
    }
    candidates.push(attribute);
}

pub fn determine_status(breadcrumbs: &[String], candidates: &[Candidate]) -> ListingStatus {
    if candidates
        .first()
        .is_some_and(|c| c.category == IMAGE_NOT_CLEAR)
    {
        return ListingStatus::ImageNotClear;
    }
    let crumbs: HashSet<String> = breadcrumbs
        .iter()
        .take(MAX_CANDIDATES)
        .filter(|b| !b.trim().is_empty())
        .map(|b| b.trim().to_lowercase())
        .collect();
    let annotated: HashSet<String> = candidates
        .iter()
        .take(MAX_CANDIDATES)
        .map(|c| c.category.trim().to_lowercase())
        .collect();
    if crumbs == annotated {
        ListingStatus::NoChange
    } else {
        ListingStatus::RequireUpdate
    }
}
