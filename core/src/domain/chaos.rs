// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Chaos Engine
//!
//! Deterministic fault injection for the proxy boundary. Given a config
//! (optional global rule plus per-tool overrides) and a seed, the engine
//! yields perturbation decisions — delay, error substitution, response
//! corruption — from a seeded PRNG that advances exactly once per decision.
//!
//! For a fixed (config, seed, query order) the decision sequence is identical
//! across runs and platforms. The seed is stamped into every [`ChaosApplied`]
//! descriptor; replaying a trace reproduces the same decisions only when the
//! requests are replayed in the original order.

use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

/// A probabilistic magnitude: with probability `p` the effect fires, and its
/// size is either the fixed `value` or a uniform integer in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilistic {
    pub p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// Perturbations for one tool (or the global default). Missing fields mean
/// "no effect".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<Probabilistic>,
    /// Probability in `[0, 1]` that the response is replaced with an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_rate: Option<f64>,
    /// Probability in `[0, 1]` that the result payload is corrupted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrupt_rate: Option<f64>,
}

impl ChaosRule {
    /// Per-tool fields win over the global rule; absent fields fall through.
    fn merged_over(&self, global: Option<&ChaosRule>) -> ChaosRule {
        let global = global.cloned().unwrap_or_default();
        ChaosRule {
            delay_ms: self.delay_ms.or(global.delay_ms),
            fail_rate: self.fail_rate.or(global.fail_rate),
            corrupt_rate: self.corrupt_rate.or(global.corrupt_rate),
        }
    }
}

/// Top-level chaos configuration, normally loaded from a JSON file and
/// snapshotted into the run at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub seed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<ChaosRule>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub tools: std::collections::BTreeMap<String, ChaosRule>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChaosConfigError {
    #[error("failed to read chaos config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("chaos config {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl ChaosConfig {
    pub fn from_file(path: &str) -> Result<Self, ChaosConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ChaosConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ChaosConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn rule_for(&self, tool: &str) -> ChaosRule {
        match self.tools.get(tool) {
            Some(rule) => rule.merged_over(self.global.as_ref()),
            None => self.global.clone().unwrap_or_default(),
        }
    }
}

/// Record of the chaos decisions made for one request. Stamped onto the
/// matching `rpc_response` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosApplied {
    pub seed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error_injected: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub corrupted: bool,
}

impl ChaosApplied {
    pub fn is_noop(&self) -> bool {
        self.delay_ms.is_none() && !self.error_injected && !self.corrupted
    }
}

/// Seeded decision engine. PRNG state is private to one run; queries mutate
/// it, so the engine is held behind `&mut` by the single correlator task.
pub struct ChaosEngine {
    config: ChaosConfig,
    rng: ChaCha8Rng,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed as u64);
        Self { config, rng }
    }

    pub fn seed(&self) -> u32 {
        self.config.seed
    }

    /// One uniform draw in `[0, 1)`; advances the PRNG exactly once.
    fn draw(&mut self) -> f64 {
        self.rng.next_u32() as f64 / (u32::MAX as f64 + 1.0)
    }

    fn sample(&mut self, prob: &Probabilistic) -> Option<u64> {
        if self.draw() >= prob.p {
            return None;
        }
        if let Some(value) = prob.value {
            return Some(value);
        }
        let min = prob.min.unwrap_or(0);
        let max = prob.max.unwrap_or(min);
        if max <= min {
            return Some(min);
        }
        let span = max - min + 1;
        Some(min + (self.rng.next_u64() % span))
    }

    /// Delay in milliseconds to apply before forwarding a call to `tool`.
    pub fn delay(&mut self, tool: &str) -> u64 {
        let rule = self.config.rule_for(tool);
        match rule.delay_ms {
            Some(prob) => self.sample(&prob).unwrap_or(0),
            None => 0,
        }
    }

    /// Whether the response for this call should be replaced with an error.
    pub fn should_fail(&mut self, tool: &str) -> bool {
        let rule = self.config.rule_for(tool);
        match rule.fail_rate {
            Some(rate) => self.draw() < rate,
            None => false,
        }
    }

    /// Whether the result payload for this call should be corrupted.
    pub fn should_corrupt(&mut self, tool: &str) -> bool {
        let rule = self.config.rule_for(tool);
        match rule.corrupt_rate {
            Some(rate) => self.draw() < rate,
            None => false,
        }
    }

    /// Make all three decisions for one call, in fixed order.
    pub fn apply(&mut self, tool: &str) -> ChaosApplied {
        let delay = self.delay(tool);
        let error_injected = self.should_fail(tool);
        let corrupted = self.should_corrupt(tool);
        ChaosApplied {
            seed: self.config.seed,
            delay_ms: if delay > 0 { Some(delay) } else { None },
            error_injected,
            corrupted,
        }
    }
}
