use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 4;
pub const MAX_REFINEMENT_ROUNDS: u32 = 5;
pub const MAX_COLLABORATION_ROUNDS: u32 = 3;
pub const MAX_ARGUMENT_ROUNDS: u32 = 3;

/// Mode parameters fixed at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(default)]
pub struct SessionConfig {
    pub worker_count: usize,
    pub refinement_rounds: u32,
    pub collaboration_rounds: u32,
    pub argument_rounds: u32,
    /// Generation budget for a single worker call
    pub worker_max_tokens: u32,
    /// Generation budget for a single synthesizer call
    pub synthesizer_max_tokens: u32,
    /// Consecutive refinements at or above this similarity end the refinement stage early
    pub similarity_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            refinement_rounds: 2,
            collaboration_rounds: 1,
            argument_rounds: 1,
            worker_max_tokens: 512,
            synthesizer_max_tokens: 1024,
            similarity_threshold: 0.92,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> CoreResult<()> {
        check_range("worker_count", self.worker_count, MIN_WORKERS, MAX_WORKERS)?;
        check_range(
            "refinement_rounds",
            self.refinement_rounds,
            1,
            MAX_REFINEMENT_ROUNDS,
        )?;
        check_range(
            "collaboration_rounds",
            self.collaboration_rounds,
            1,
            MAX_COLLABORATION_ROUNDS,
        )?;
        check_range("argument_rounds", self.argument_rounds, 1, MAX_ARGUMENT_ROUNDS)?;

        if self.worker_max_tokens == 0 || self.synthesizer_max_tokens == 0 {
            return Err(CoreError::Configuration(
                "token budgets must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(CoreError::Configuration(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    pub fn slot_ids(&self) -> Vec<String> {
        (1..=self.worker_count).map(slot_id).collect()
    }
}

pub fn slot_id(index: usize) -> String {
    format!("worker_{}", index)
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> CoreResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(CoreError::Configuration(format!(
            "{} must be within [{}, {}], got {}",
            name, min, max, value
        )));
    }
    Ok(())
}
