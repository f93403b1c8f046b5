use rand::seq::IndexedRandom;
use std::time::Duration;

use crate::config::PhoenixPolicy;
use crate::models::credential::Credential;

/// The key supply stayed empty through every cool-down stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("No keys available after {cycles} recovery cycles")]
pub struct PhoenixExhausted {
    pub cycles: usize,
}

/// Per-worker recovery from an empty key supply.
///
/// Each collapse advances one stage: sleep the stage's cool-down, then pick
/// a random key from the full list. Once every stage is used up the next
/// collapse fails immediately. Workers never share this counter.
#[derive(Debug, Clone)]
pub struct Phoenix {
    policy: PhoenixPolicy,
    cycle_count: usize,
}

impl Phoenix {
    pub fn new(policy: PhoenixPolicy) -> Self {
        Self {
            policy,
            cycle_count: 0,
        }
    }

    pub fn cycle_count(&self) -> usize {
        self.cycle_count
    }

    /// Cool-down the next collapse would sleep, `None` when it would be fatal.
    pub fn next_cooldown(&self) -> Option<Duration> {
        self.policy.cooldowns.get(self.cycle_count).copied()
    }

    pub async fn resurrect(
        &mut self,
        worker_id: usize,
        keys: &[Credential],
    ) -> Result<Credential, PhoenixExhausted> {
        let exhausted = PhoenixExhausted {
            cycles: self.cycle_count,
        };
        let Some(cooldown) = self.next_cooldown() else {
            tracing::error!(worker_id, cycles = self.cycle_count, "Key supply collapsed again, giving up");
            return Err(exhausted);
        };
        if keys.is_empty() {
            return Err(exhausted);
        }

        tracing::warn!(
            worker_id,
            stage = self.cycle_count + 1,
            cooldown_secs = cooldown.as_secs(),
            "Key supply empty, cooling down before resurrection"
        );
        tokio::time::sleep(cooldown).await;
        self.cycle_count += 1;
        metrics::counter!("phoenix_cycles_total").increment(1);

        let key = keys.choose(&mut rand::rng()).cloned().ok_or(exhausted)?;
        tracing::info!(worker_id, key = key.index, cycle = self.cycle_count, "Resurrected key");
        Ok(key)
    }
}
