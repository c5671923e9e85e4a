//! Interprets inference outputs and logs hand presence.

use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::nn::Outputs;

/// Default threshold applied to the model's presence score output.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// How the observer decides whether a hand is present in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceRule {
    /// A hand is present when the landmark output holds any values at all.
    ///
    /// Only meaningful for models that emit a variable number of landmarks.
    NonEmpty,
    /// A hand is present when the scalar at `output` is at least `threshold`.
    Score { output: usize, threshold: f32 },
}

/// The per-frame result reported by the observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub present: bool,
    /// The raw presence score, when the rule uses one.
    pub score: Option<f32>,
}

/// Consumes inference outputs, derives an [`Observation`] per frame, and logs
/// presence transitions plus a periodic summary.
pub struct Observer {
    rule: Option<PresenceRule>,
    summary_interval: Duration,
    window_start: Instant,
    window_frames: u64,
    window_present: u64,
    last_present: Option<bool>,
    missing_warned: bool,
}

impl Observer {
    /// Creates an observer that picks a rule from the model's output count.
    ///
    /// Models with a second output treat it as a `[1, 1]` presence score;
    /// single-output models fall back to [`PresenceRule::NonEmpty`].
    pub fn auto() -> Self {
        Self::new(None)
    }

    /// Creates an observer with a fixed rule.
    pub fn with_rule(rule: PresenceRule) -> Self {
        Self::new(Some(rule))
    }

    fn new(rule: Option<PresenceRule>) -> Self {
        Self {
            rule,
            summary_interval: Duration::from_secs(1),
            window_start: Instant::now(),
            window_frames: 0,
            window_present: 0,
            last_present: None,
            missing_warned: false,
        }
    }

    fn resolve_rule(&self, outputs: &Outputs) -> PresenceRule {
        match self.rule {
            Some(rule) => rule,
            None if outputs.len() >= 2 => PresenceRule::Score {
                output: 1,
                threshold: DEFAULT_SCORE_THRESHOLD,
            },
            None => PresenceRule::NonEmpty,
        }
    }

    /// Derives an observation for one frame's outputs and logs it.
    pub fn observe(&mut self, outputs: &Outputs) -> Observation {
        let rule = self.resolve_rule(outputs);
        let obs = match rule {
            PresenceRule::NonEmpty => Observation {
                present: outputs.iter().any(|t| !t.is_empty()),
                score: None,
            },
            PresenceRule::Score { output, threshold } => {
                // The score is accepted in any rank as long as it holds
                // exactly one element ([1, 1], [1], or a plain scalar).
                let score = outputs
                    .get(output)
                    .filter(|t| t.len() == 1)
                    .and_then(|t| t.first());
                match score {
                    Some(score) => Observation {
                        present: score >= threshold,
                        score: Some(score),
                    },
                    None => {
                        if !self.missing_warned {
                            warn!(
                                "presence rule expects a single-element score at output {output}, \
                                 model provides {:?}; treating hand as absent",
                                outputs.get(output).map(|t| t.shape().to_vec()),
                            );
                            self.missing_warned = true;
                        }
                        Observation {
                            present: false,
                            score: None,
                        }
                    }
                }
            }
        };

        match obs.score {
            Some(score) => trace!("hand present: {} (score {score:.3})", obs.present),
            None => trace!("hand present: {}", obs.present),
        }
        if self.last_present != Some(obs.present) {
            if obs.present {
                info!("hand detected");
            } else if self.last_present.is_some() {
                info!("hand lost");
            }
            self.last_present = Some(obs.present);
        }

        self.window_frames += 1;
        if obs.present {
            self.window_present += 1;
        }
        if self.window_start.elapsed() >= self.summary_interval {
            debug!(
                "presence: {}/{} frames in the last {:.1?}",
                self.window_present,
                self.window_frames,
                self.window_start.elapsed(),
            );
            self.window_start = Instant::now();
            self.window_frames = 0;
            self.window_present = 0;
        }

        obs
    }
}
