//! Random identifiers and management tokens
//!
//! IDs are sampled from an alphanumeric alphabet and probed against the
//! caller's notion of "taken" (catalog, active sessions) a bounded number
//! of times before giving up.

use std::future::Future;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::catalog::CatalogError;

/// ID generation errors
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("No free identifier after {0} attempts")]
    Exhausted(u32),

    #[error("Collision probe failed: {0}")]
    Probe(#[from] CatalogError),
}

/// Generates collision-checked random identifiers
#[derive(Debug, Clone, Copy)]
pub struct IdGenerator {
    length: usize,
    max_attempts: u32,
}

impl IdGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self {
            length: length.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Sample one candidate without any collision check
    pub fn sample(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }

    /// Sample candidates until `is_taken` reports a free one
    pub async fn generate<F, Fut>(&self, mut is_taken: F) -> Result<String, IdError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool, CatalogError>>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.sample();
            if !is_taken(candidate.clone()).await? {
                return Ok(candidate);
            }
            tracing::debug!(attempt = attempt, "Identifier collision, retrying");
        }

        tracing::warn!(attempts = self.max_attempts, "Identifier space exhausted");
        Err(IdError::Exhausted(self.max_attempts))
    }
}

/// Whether `id` is a well-formed identifier (safe to join onto a path)
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric())
}
