//! Listing fixtures shared by the integration tests.

#![allow(dead_code)]

use listing_annotator::models::job::Job;

/// Model answer that matches [`flatbed`] listings exactly.
pub const FLATBED_REPLY: &str = "1. Flatbed Truck (98%)";

pub fn listing(id: &str, breadcrumbs: &[&str], images: usize) -> Job {
    Job {
        id: id.to_string(),
        breadcrumbs: breadcrumbs.iter().map(|b| b.to_string()).collect(),
        image_urls: (1..=images)
            .map(|n| format!("https://img.example.com/{id}/{n}.jpg"))
            .collect(),
    }
}

pub fn flatbed(id: &str) -> Job {
    listing(id, &["Flatbed Truck"], 2)
}

pub fn batch(count: usize) -> Vec<Job> {
    (1..=count).map(|n| flatbed(&format!("L{n:04}"))).collect()
}
