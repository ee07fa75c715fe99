//! Decision envelope for engine outputs.
//!
//! `select` returns a bare arm id; `decide` returns a [`Decision`] that can be
//! logged or replayed: the chosen arm, every candidate's score breakdown, and
//! typed notes describing why the choice happened.

/// Score breakdown for one candidate arm under one context.
#[derive(Debug, Clone, Copy, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ArmScore {
    /// `mean + alpha * confidence`.
    pub ucb: f64,
    /// `theta^T x`, the ridge point estimate of the reward.
    pub mean: f64,
    /// `sqrt(x^T A^{-1} x)`, before scaling by alpha.
    pub confidence: f64,
}

/// Which path produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum DecisionPolicy {
    /// Deterministic argmax over UCB scores.
    LinUcb,
    /// Sample from a softmax over UCB scores.
    LinUcbSoftmax,
    /// Contextual scoring disabled; first candidate returned.
    PassThrough,
}

/// Audit notes attached to a decision.
///
/// Prefer adding variants over changing the meaning of existing ones.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum DecisionNote {
    /// Argmax with caller-order tie-breaking.
    DeterministicChoice,

    /// Other candidates scored exactly the same as the winner; the earliest one was kept.
    TieKeptFirstSeen { tied_with: Vec<String> },

    /// The chosen arm has never received an update, so its score is pure exploration bonus.
    UnseenArm,

    /// Chosen by sampling from a probability distribution.
    SampledFromDistribution,

    /// CDF walk fell through (rounding); the last candidate was chosen.
    NumericalFallbackToLastArm,

    /// Contextual scoring is disabled in config; no scoring or learning happened.
    DisabledPassThrough,
}

/// One engine decision.
#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Decision {
    pub policy: DecisionPolicy,
    /// The selected arm id.
    pub chosen: String,
    /// The chosen arm's UCB score (absent on pass-through).
    pub score: Option<f64>,
    /// Per-candidate score breakdown, in caller order (empty on pass-through).
    pub scores: Vec<(String, ArmScore)>,
    /// Selection probabilities in caller order, for sampled decisions.
    pub probs: Option<Vec<(String, f64)>>,
    pub notes: Vec<DecisionNote>,
}

/// Index of the strictly greatest finite `ucb`, keeping the first on exact ties.
///
/// Non-finite scores never win unless nothing is finite, in which case the
/// first candidate is returned. `None` only for an empty slice.
pub(crate) fn argmax_first(scores: &[(String, ArmScore)]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, (_, s)) in scores.iter().enumerate() {
        if !s.ucb.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if s.ucb <= b => {}
            _ => best = Some((i, s.ucb)),
        }
    }
    Some(best.map_or(0, |(i, _)| i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc(ucb: f64) -> ArmScore {
        ArmScore {
            ucb,
            mean: 0.0,
            confidence: ucb,
        }
    }

    #[test]
    fn argmax_keeps_first_on_ties() {
        let s = vec![
            ("x".to_string(), sc(1.0)),
            ("y".to_string(), sc(2.0)),
            ("z".to_string(), sc(2.0)),
        ];
        assert_eq!(argmax_first(&s), Some(1));
        assert_eq!(argmax_first(&[]), None);
    }

    #[test]
    fn argmax_never_picks_nan() {
        let s = vec![("x".to_string(), sc(0.5)), ("y".to_string(), sc(f64::NAN))];
        assert_eq!(argmax_first(&s), Some(0));
        let s = vec![("x".to_string(), sc(f64::NAN)), ("y".to_string(), sc(0.5))];
        assert_eq!(argmax_first(&s), Some(1));
        let s = vec![
            ("x".to_string(), sc(f64::INFINITY)),
            ("y".to_string(), sc(f64::NAN)),
            ("z".to_string(), sc(-3.0)),
        ];
        assert_eq!(argmax_first(&s), Some(2));
    }

    #[test]
    fn argmax_falls_back_to_first_when_nothing_is_finite() {
        let s = vec![
            ("x".to_string(), sc(f64::NAN)),
            ("y".to_string(), sc(f64::NEG_INFINITY)),
        ];
        assert_eq!(argmax_first(&s), Some(0));
    }

    #[test]
    fn decision_serializes() {
        let d = Decision {
            policy: DecisionPolicy::LinUcb,
            chosen: "a".to_string(),
            score: Some(1.5),
            scores: vec![("a".to_string(), sc(1.5))],
            probs: None,
            notes: vec![
                DecisionNote::DeterministicChoice,
                DecisionNote::TieKeptFirstSeen {
                    tied_with: vec!["b".to_string()],
                },
            ],
        };
        let json = serde_json::to_string(&d).unwrap();
        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
