//! Thread-safe LinUCB decision engine.
//!
//! ```text
//! let arm = engine.select(&candidates, &x)?;   // pick an arm
//! run_request(&arm);                           // your code
//! engine.update(&arm, reward, &x)?;            // feed back the outcome
//! ```
//!
//! Every arm owns an independent (disjoint) ridge regression model:
//!
//! ```text
//!   A_a = I + sum(x x^T)
//!   b_a = sum(r x)
//!   theta_a = A_a^{-1} b_a
//!   UCB_a(x) = theta_a^T x + alpha * sqrt(x^T A_a^{-1} x)
//! ```
//!
//! `A^{-1}` is cached per arm and maintained with Sherman–Morrison rank-one
//! updates. Repeated rank-one updates accumulate rounding error, so the engine
//! rebuilds the inverse from `A` on a fixed schedule (`recompute_interval`),
//! when a cheap condition estimate crosses `condition_threshold`, and whenever
//! the rank-one update is numerically degenerate. None of this is visible to
//! callers: the only error `update` returns is a wrong-length context.
//!
//! ## Concurrency
//!
//! One mutex guards the whole arm map for the duration of each call. With
//! `d` in the tens every call is a few microseconds, so per-arm locking buys
//! nothing. Calls are atomic with respect to each other, and updates apply in
//! arrival order. Metrics are emitted after the lock is released, and
//! [`LinUcbEngine::persist`] does its file I/O outside the lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

#[cfg(feature = "stochastic")]
use rand::rngs::StdRng;
#[cfg(feature = "stochastic")]
use rand::{Rng, SeedableRng};

use crate::arm::{ArmState, ArmStore};
use crate::decision::argmax_first;
use crate::linalg;
use crate::persist::{self, EngineSnapshot, RestoreReport, SkipReason, SnapshotStore};
use crate::{
    softmax, ArmScore, Decision, DecisionNote, DecisionPolicy, EngineConfig, EngineMetrics, Error,
    NoopMetrics, RecomputeCause, Result,
};

/// Clamp a reward into `[0, 1]`; non-finite rewards count as 0.
fn clamp01(r: f64) -> f64 {
    if !r.is_finite() {
        return 0.0;
    }
    r.clamp(0.0, 1.0)
}

struct EngineState {
    arms: ArmStore,
    #[cfg(feature = "stochastic")]
    rng: StdRng,
}

/// One scored candidate, collected under the lock.
struct Scored {
    arm: String,
    score: ArmScore,
    updates: u64,
}

/// Side effects of one update, reported to metrics after unlocking.
#[derive(Default)]
struct UpdateEffects {
    recomputes: Vec<RecomputeCause>,
    condition: Option<f64>,
}

/// Contextual linear bandit (disjoint LinUCB) shared across threads.
///
/// Construct once per feature dimension and share behind an `Arc`; all
/// methods take `&self`.
pub struct LinUcbEngine {
    cfg: EngineConfig,
    state: Mutex<EngineState>,
    metrics: Arc<dyn EngineMetrics>,
}

impl std::fmt::Debug for LinUcbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinUcbEngine")
            .field("cfg", &self.cfg)
            .field("arms", &self.state.lock().arms.len())
            .finish_non_exhaustive()
    }
}

impl LinUcbEngine {
    /// Build an engine that discards metrics.
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        Self::with_metrics(cfg, Arc::new(NoopMetrics))
    }

    /// Build an engine reporting to `metrics`.
    pub fn with_metrics(cfg: EngineConfig, metrics: Arc<dyn EngineMetrics>) -> Result<Self> {
        cfg.validate()?;
        let state = EngineState {
            arms: ArmStore::new(cfg.dim),
            #[cfg(feature = "stochastic")]
            rng: StdRng::seed_from_u64(cfg.seed),
        };
        Ok(Self {
            cfg,
            state: Mutex::new(state),
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn dim(&self) -> usize {
        self.cfg.dim
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Length-check `context` and zero out non-finite entries.
    fn check_context(&self, context: &[f64]) -> Result<Vec<f64>> {
        if context.len() != self.cfg.dim {
            return Err(Error::dimension_mismatch(
                "context",
                self.cfg.dim,
                context.len(),
            ));
        }
        Ok(context
            .iter()
            .map(|&v| if v.is_finite() { v } else { 0.0 })
            .collect())
    }

    fn check_candidates<S: AsRef<str>>(candidates: &[S]) -> Result<()> {
        if candidates.is_empty() {
            return Err(Error::InvalidInput("candidate arm list is empty".into()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Decision core
    // ------------------------------------------------------------------

    /// Score every candidate in caller order, creating unseen arms on the way.
    fn score_candidates<S: AsRef<str>>(&self, candidates: &[S], x: &[f64]) -> Result<Vec<Scored>> {
        let dim = self.cfg.dim;
        let alpha = self.cfg.alpha;
        let mut st = self.state.lock();
        let mut out = Vec::with_capacity(candidates.len());
        for c in candidates {
            let arm = c.as_ref();
            let s = st.arms.ensure_arm(arm);
            let score = s.score(dim, alpha, x).map_err(|e| {
                warn!(arm, error = %e, "cannot score arm");
                Error::SingularMatrix {
                    arm: arm.to_string(),
                }
            })?;
            out.push(Scored {
                arm: arm.to_string(),
                score,
                updates: s.updates(),
            });
        }
        Ok(out)
    }

    /// Per-candidate score breakdown for `context`, in caller order.
    ///
    /// Does not count as a selection.
    pub fn scores<S: AsRef<str>>(
        &self,
        candidates: &[S],
        context: &[f64],
    ) -> Result<Vec<(String, ArmScore)>> {
        Self::check_candidates(candidates)?;
        let x = self.check_context(context)?;
        Ok(self
            .score_candidates(candidates, &x)?
            .into_iter()
            .map(|s| (s.arm, s.score))
            .collect())
    }

    /// Choose the candidate with the highest UCB score for `context`.
    ///
    /// Ties go to the earliest candidate in `candidates`.
    pub fn select<S: AsRef<str>>(&self, candidates: &[S], context: &[f64]) -> Result<String> {
        self.select_with_score(candidates, context).map(|(arm, _)| arm)
    }

    /// Like [`LinUcbEngine::select`], also returning the winning UCB score.
    ///
    /// With contextual scoring disabled the score is `0.0`.
    pub fn select_with_score<S: AsRef<str>>(
        &self,
        candidates: &[S],
        context: &[f64],
    ) -> Result<(String, f64)> {
        let d = self.decide(candidates, context)?;
        Ok((d.chosen, d.score.unwrap_or(0.0)))
    }

    /// Select and return the full [`Decision`] envelope.
    pub fn decide<S: AsRef<str>>(&self, candidates: &[S], context: &[f64]) -> Result<Decision> {
        Self::check_candidates(candidates)?;
        if !self.cfg.enabled {
            return Ok(self.pass_through(candidates));
        }
        let x = self.check_context(context)?;
        let scored = self.score_candidates(candidates, &x)?;

        let scores: Vec<(String, ArmScore)> =
            scored.iter().map(|s| (s.arm.clone(), s.score)).collect();
        let Some(best) = argmax_first(&scores) else {
            return Err(Error::InvalidInput("candidate arm list is empty".into()));
        };
        let winner = &scored[best];
        let mut notes = vec![DecisionNote::DeterministicChoice];
        let tied_with: Vec<String> = scored
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != best && s.score.ucb == winner.score.ucb && s.arm != winner.arm)
            .map(|(_, s)| s.arm.clone())
            .collect();
        if !tied_with.is_empty() {
            notes.push(DecisionNote::TieKeptFirstSeen { tied_with });
        }
        if winner.updates == 0 {
            notes.push(DecisionNote::UnseenArm);
        }

        let decision = Decision {
            policy: DecisionPolicy::LinUcb,
            chosen: winner.arm.clone(),
            score: Some(winner.score.ucb),
            scores,
            probs: None,
            notes,
        };
        self.metrics.record_selection(&decision.chosen);
        Ok(decision)
    }

    fn pass_through<S: AsRef<str>>(&self, candidates: &[S]) -> Decision {
        let chosen = candidates[0].as_ref().to_string();
        Decision {
            policy: DecisionPolicy::PassThrough,
            chosen,
            score: None,
            scores: Vec::new(),
            probs: None,
            notes: vec![DecisionNote::DisabledPassThrough],
        }
    }

    /// Softmax distribution over the candidates' UCB scores, in caller order.
    ///
    /// Useful for traffic splitting and for logging propensities. Does not
    /// count as a selection.
    pub fn probabilities<S: AsRef<str>>(
        &self,
        candidates: &[S],
        context: &[f64],
        temperature: f64,
    ) -> Result<Vec<(String, f64)>> {
        let scores = self.scores(candidates, context)?;
        let ucb: Vec<f64> = scores.iter().map(|(_, s)| s.ucb).collect();
        Ok(scores
            .into_iter()
            .map(|(arm, _)| arm)
            .zip(softmax(&ucb, temperature))
            .collect())
    }

    /// Sample an arm from [`LinUcbEngine::probabilities`] with the engine's seeded RNG.
    #[cfg(feature = "stochastic")]
    pub fn select_softmax<S: AsRef<str>>(
        &self,
        candidates: &[S],
        context: &[f64],
        temperature: f64,
    ) -> Result<String> {
        self.decide_softmax(candidates, context, temperature)
            .map(|d| d.chosen)
    }

    /// Softmax-sampled selection returning the full [`Decision`], probabilities included.
    ///
    /// Deterministic for a fixed `EngineConfig::seed` and call sequence.
    #[cfg(feature = "stochastic")]
    pub fn decide_softmax<S: AsRef<str>>(
        &self,
        candidates: &[S],
        context: &[f64],
        temperature: f64,
    ) -> Result<Decision> {
        Self::check_candidates(candidates)?;
        if !self.cfg.enabled {
            return Ok(self.pass_through(candidates));
        }
        let x = self.check_context(context)?;
        let scored = self.score_candidates(candidates, &x)?;
        let ucb: Vec<f64> = scored.iter().map(|s| s.score.ucb).collect();
        let probs = softmax(&ucb, temperature);

        let r: f64 = self.state.lock().rng.random();
        let mut cdf = 0.0;
        let mut pick = None;
        for (i, p) in probs.iter().enumerate() {
            cdf += p;
            if r < cdf {
                pick = Some(i);
                break;
            }
        }
        let mut notes = vec![DecisionNote::SampledFromDistribution];
        let idx = match pick {
            Some(i) => i,
            None => {
                notes.push(DecisionNote::NumericalFallbackToLastArm);
                scored.len() - 1
            }
        };
        if scored[idx].updates == 0 {
            notes.push(DecisionNote::UnseenArm);
        }

        let decision = Decision {
            policy: DecisionPolicy::LinUcbSoftmax,
            chosen: scored[idx].arm.clone(),
            score: Some(scored[idx].score.ucb),
            probs: Some(
                scored
                    .iter()
                    .map(|s| s.arm.clone())
                    .zip(probs.iter().copied())
                    .collect(),
            ),
            scores: scored.into_iter().map(|s| (s.arm, s.score)).collect(),
            notes,
        };
        self.metrics.record_selection(&decision.chosen);
        Ok(decision)
    }

    // ------------------------------------------------------------------
    // Update core
    // ------------------------------------------------------------------

    /// Fold an observed `reward` for `arm` under `context` into the model.
    ///
    /// Rewards are clamped into `[0, 1]`. Numerical trouble is repaired
    /// internally; the only error is a wrong-length context. An observation
    /// whose magnitude would overflow `A` or `b` is dropped with a warning and
    /// leaves the arm unchanged.
    pub fn update(&self, arm: &str, reward: f64, context: &[f64]) -> Result<()> {
        if !self.cfg.enabled {
            return Ok(());
        }
        let x = self.check_context(context)?;
        let r = clamp01(reward);

        let effects = {
            let mut st = self.state.lock();
            let s = st.arms.ensure_arm(arm);
            if !s.admits(self.cfg.dim, &x, r) {
                warn!(arm, "observation would overflow arm state; dropped");
                return Ok(());
            }
            self.apply_update(arm, s, &x, r)
        };

        self.metrics.record_update(arm);
        for cause in effects.recomputes {
            self.metrics.record_recompute(arm, cause);
        }
        if let Some(cond) = effects.condition {
            self.metrics.record_condition_number(arm, cond);
        }
        Ok(())
    }

    fn apply_update(&self, arm: &str, s: &mut ArmState, x: &[f64], r: f64) -> UpdateEffects {
        let dim = self.cfg.dim;
        let mut fx = UpdateEffects::default();

        if let Err(e) = s.ensure_inverse(dim) {
            warn!(arm, error = %e, "inverse unavailable before update");
        }

        linalg::outer_add(s.a_mut(), dim, x);

        match s.a_inv_mut().map(|inv| linalg::rank_one_update_inverse(inv, dim, x)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(arm, error = %e, "rank-one update degenerate; recomputing inverse");
                full_recompute(arm, s, dim);
                fx.recomputes.push(RecomputeCause::DegenerateUpdate);
            }
            None => full_recompute(arm, s, dim),
        }

        for (bi, xi) in s.b_mut().iter_mut().zip(x) {
            *bi += r * xi;
        }
        let n = s.bump_updates();

        let mut periodic = false;
        if let Some(every) = self.cfg.recompute_schedule() {
            if n % every == 0 {
                debug!(arm, updates = n, "periodic inverse recompute");
                full_recompute(arm, s, dim);
                fx.recomputes.push(RecomputeCause::Periodic);
                periodic = true;
            }
        }

        if let Some(threshold) = self.cfg.condition_guard() {
            if let Some(inv) = s.a_inv() {
                let cond = linalg::condition_estimate(s.a(), inv, dim);
                fx.condition = Some(cond);
                // A periodic rebuild in this same update already produced a fresh inverse.
                if cond > threshold && !periodic {
                    debug!(arm, cond, threshold, "condition estimate over threshold; recomputing inverse");
                    full_recompute(arm, s, dim);
                    fx.recomputes.push(RecomputeCause::ConditionNumber);
                }
            }
        }
        fx
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// All arm ids seen so far, in lexicographic order.
    pub fn list_arms(&self) -> Vec<String> {
        self.state.lock().arms.ids()
    }

    /// Accepted updates for `arm`, or `None` if it has never been referenced.
    pub fn arm_updates(&self, arm: &str) -> Option<u64> {
        self.state.lock().arms.get(arm).map(ArmState::updates)
    }

    /// Row-major copy of `arm`'s design matrix `A`.
    pub fn design_matrix(&self, arm: &str) -> Option<Vec<f64>> {
        self.state.lock().arms.get(arm).map(|s| s.a().to_vec())
    }

    /// Ridge point estimate `A^{-1} b` for an already-known arm.
    pub fn theta(&self, arm: &str) -> Option<Vec<f64>> {
        let dim = self.cfg.dim;
        let mut st = self.state.lock();
        st.arms.get_mut(arm)?.theta(dim).ok()
    }

    /// Drop every arm's state.
    pub fn reset(&self) {
        self.state.lock().arms.clear();
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Point-in-time copy of every arm's `(A, b)`; inverses are not included.
    pub fn snapshot(&self) -> EngineSnapshot {
        persist::capture(&self.state.lock().arms)
    }

    /// Load arm state from `snap`, replacing any arms it names.
    ///
    /// Malformed or undecodable records are skipped with a warning; the rest
    /// still load. Skips are reported in arm id order.
    /// Inverses are rebuilt eagerly, outside the lock, before the arms are
    /// published.
    pub fn restore(&self, snap: EngineSnapshot) -> RestoreReport {
        let dim = self.cfg.dim;
        if snap.dim != dim {
            warn!(snapshot_dim = snap.dim, dim, "snapshot taken at a different dimension");
        }
        let mut report = RestoreReport::default();
        let mut ready = Vec::with_capacity(snap.arms.len());
        let rebuilt = snap
            .arms
            .into_iter()
            .map(|(arm, rec)| (arm, persist::rebuild(dim, rec)))
            .chain(
                snap.unreadable
                    .into_iter()
                    .map(|arm| (arm, Err(SkipReason::Unreadable))),
            );
        for (arm, outcome) in rebuilt {
            match outcome {
                Ok(state) => ready.push((arm, state)),
                Err(reason) => {
                    warn!(arm = %arm, %reason, "skipping persisted arm");
                    self.metrics.record_restore_skip(&arm, reason);
                    report.skipped.push((arm, reason));
                }
            }
        }
        report.skipped.sort_by(|a, b| a.0.cmp(&b.0));

        {
            let mut st = self.state.lock();
            for (arm, state) in ready {
                report.restored.push(arm.clone());
                st.arms.insert(arm, state);
            }
        }
        debug!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            "restore finished"
        );
        report
    }

    fn configured_store(&self) -> Result<SnapshotStore> {
        let p = &self.cfg.persistence;
        if !p.enabled {
            return Err(Error::InvalidConfig("persistence is disabled".into()));
        }
        Ok(SnapshotStore::new(&p.dir, self.cfg.dim))
    }

    /// Snapshot under the lock, then write it atomically to the configured store.
    pub fn persist(&self) -> Result<()> {
        let store = self.configured_store()?;
        self.persist_to(&store)
    }

    /// Snapshot under the lock, then write it atomically to `store`.
    pub fn persist_to(&self, store: &SnapshotStore) -> Result<()> {
        let snap = self.snapshot();
        store.save(&snap)
    }

    /// Restore from the configured store; `Ok(None)` if no snapshot exists yet.
    pub fn load(&self) -> Result<Option<RestoreReport>> {
        let store = self.configured_store()?;
        self.load_from(&store)
    }

    /// Restore from `store`; `Ok(None)` if no snapshot exists yet.
    pub fn load_from(&self, store: &SnapshotStore) -> Result<Option<RestoreReport>> {
        Ok(store.load()?.map(|snap| self.restore(snap)))
    }
}

fn full_recompute(arm: &str, s: &mut ArmState, dim: usize) {
    if let Err(e) = s.recompute_inverse(dim) {
        warn!(arm, error = %e, "full inversion failed; inverse will be retried on next use");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryMetrics;

    fn engine(dim: usize) -> LinUcbEngine {
        LinUcbEngine::new(EngineConfig::with_dim(dim)).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            LinUcbEngine::new(EngineConfig::with_dim(0)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn rewarded_arm_beats_untouched_arm() {
        let e = LinUcbEngine::new(EngineConfig::with_dim(2).alpha(1.0)).unwrap();
        e.update("A", 1.0, &[1.0, 0.0]).unwrap();
        let (arm, score) = e.select_with_score(&["A", "B"], &[1.0, 0.0]).unwrap();
        assert_eq!(arm, "A");
        // A = diag(2, 1), b = (1, 0): mean = 0.5, conf = sqrt(0.5).
        assert!((score - (0.5 + 0.5f64.sqrt())).abs() < 1e-12);
        let s = e.scores(&["B"], &[1.0, 0.0]).unwrap();
        assert!((s[0].1.ucb - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_candidates_fail_without_side_effects() {
        let m = Arc::new(InMemoryMetrics::new());
        let e = LinUcbEngine::with_metrics(EngineConfig::with_dim(2), m.clone()).unwrap();
        let none: [&str; 0] = [];
        assert!(matches!(
            e.select(&none, &[1.0, 0.0]),
            Err(Error::InvalidInput(_))
        ));
        assert!(e.list_arms().is_empty());
        assert_eq!(m.snapshot().total_selections(), 0);
    }

    #[test]
    fn dimension_mismatch_is_rejected_everywhere() {
        let e = engine(3);
        assert!(matches!(e.select(&["a"], &[1.0]), Err(Error::InvalidInput(_))));
        assert!(matches!(e.update("a", 1.0, &[1.0; 4]), Err(Error::InvalidInput(_))));
        assert!(matches!(e.scores(&["a"], &[]), Err(Error::InvalidInput(_))));
        assert!(e.list_arms().is_empty());
    }

    #[test]
    fn ties_keep_first_candidate() {
        let e = engine(2);
        let d = e.decide(&["z", "y", "x"], &[0.3, 0.4]).unwrap();
        assert_eq!(d.chosen, "z");
        assert!(d.notes.contains(&DecisionNote::UnseenArm));
        assert!(d.notes.contains(&DecisionNote::TieKeptFirstSeen {
            tied_with: vec!["y".to_string(), "x".to_string()],
        }));
    }

    #[test]
    fn new_arm_score_is_pure_exploration() {
        let e = LinUcbEngine::new(EngineConfig::with_dim(2).alpha(0.5)).unwrap();
        let s = e.scores(&["fresh"], &[3.0, 4.0]).unwrap();
        assert_eq!(s[0].1.mean, 0.0);
        assert!((s[0].1.confidence - 5.0).abs() < 1e-12);
        assert!((s[0].1.ucb - 2.5).abs() < 1e-12);
    }

    #[test]
    fn non_finite_context_entries_are_zeroed() {
        let e = engine(2);
        e.update("a", 1.0, &[f64::NAN, 1.0]).unwrap();
        let a = e.design_matrix("a").unwrap();
        assert_eq!(a, vec![1.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn non_finite_reward_counts_as_zero() {
        let e = engine(1);
        e.update("a", f64::NAN, &[1.0]).unwrap();
        assert_eq!(e.theta("a").unwrap(), vec![0.0]);
        assert_eq!(e.arm_updates("a"), Some(1));
    }

    #[test]
    fn overflowing_context_is_dropped_and_arm_stays_usable() {
        let m = Arc::new(InMemoryMetrics::new());
        let e = LinUcbEngine::with_metrics(EngineConfig::with_dim(1), m.clone()).unwrap();
        e.update("good", 1.0, &[1.0]).unwrap();

        e.update("bad", 1.0, &[1e160]).unwrap();
        assert_eq!(e.design_matrix("bad"), Some(vec![1.0]));
        assert_eq!(e.arm_updates("bad"), Some(0));
        assert_eq!(e.theta("bad").unwrap(), vec![0.0]);

        // Accepted once, then the accumulated diagonal would overflow.
        e.update("big", 1.0, &[1e154]).unwrap();
        e.update("big", 1.0, &[1e154]).unwrap();
        assert_eq!(e.arm_updates("big"), Some(1));
        assert!(e.design_matrix("big").unwrap()[0].is_finite());

        assert_eq!(e.select(&["bad", "good"], &[1.0]).unwrap(), "good");
        assert!(e.select(&["big", "bad", "good"], &[1.0]).is_ok());
        let updates = m.snapshot().updates;
        assert_eq!(updates.get("bad"), None);
        assert_eq!(updates.get("big"), Some(&1));
    }

    #[test]
    fn disabled_engine_passes_through() {
        let m = Arc::new(InMemoryMetrics::new());
        let mut cfg = EngineConfig::with_dim(2);
        cfg.enabled = false;
        let e = LinUcbEngine::with_metrics(cfg, m.clone()).unwrap();

        let d = e.decide(&["first", "second"], &[]).unwrap();
        assert_eq!(d.chosen, "first");
        assert_eq!(d.policy, DecisionPolicy::PassThrough);
        assert_eq!(d.notes, vec![DecisionNote::DisabledPassThrough]);
        assert_eq!(e.select_with_score(&["b", "a"], &[1.0, 1.0]).unwrap(), ("b".to_string(), 0.0));

        e.update("first", 1.0, &[1.0, 0.0]).unwrap();
        assert!(e.list_arms().is_empty());
        assert_eq!(m.snapshot(), Default::default());

        let none: [&str; 0] = [];
        assert!(e.select(&none, &[]).is_err());
    }

    #[test]
    fn periodic_recompute_fires_on_schedule() {
        let m = Arc::new(InMemoryMetrics::new());
        let e = LinUcbEngine::with_metrics(EngineConfig::with_dim(2).recompute_every(5), m.clone())
            .unwrap();
        for i in 0..4 {
            e.update("a", 0.5, &[1.0, i as f64]).unwrap();
        }
        assert_eq!(m.snapshot().total_recomputes(), 0);
        e.update("a", 0.5, &[1.0, 1.0]).unwrap();
        assert_eq!(m.recomputes(RecomputeCause::Periodic), 1);
        assert_eq!(m.snapshot().total_recomputes(), 1);
        assert_eq!(m.snapshot().updates["a"], 5);
    }

    #[test]
    fn condition_threshold_forces_recompute_and_reports_gauge() {
        let m = Arc::new(InMemoryMetrics::new());
        let cfg = EngineConfig::with_dim(2).condition_threshold(2.5);
        let e = LinUcbEngine::with_metrics(cfg, m.clone()).unwrap();

        // A = diag(2, 1): ||A|| = 2, ||A^{-1}|| = 1, cond = 2.
        e.update("a", 1.0, &[1.0, 0.0]).unwrap();
        assert_eq!(m.snapshot().condition["a"], 2.0);
        assert_eq!(m.recomputes(RecomputeCause::ConditionNumber), 0);

        // A = diag(3, 1): cond = 3 > 2.5.
        e.update("a", 1.0, &[1.0, 0.0]).unwrap();
        assert!((m.snapshot().condition["a"] - 3.0).abs() < 1e-12);
        assert_eq!(m.recomputes(RecomputeCause::ConditionNumber), 1);
    }

    #[test]
    fn degenerate_rank_one_update_falls_back_to_full_inverse() {
        let m = Arc::new(InMemoryMetrics::new());
        let e = LinUcbEngine::with_metrics(EngineConfig::with_dim(1), m.clone()).unwrap();
        // Plant an inverse that makes 1 + x^T A^{-1} x negative.
        {
            let mut st = e.state.lock();
            let s = st.arms.ensure_arm("a");
            s.ensure_inverse(1).unwrap();
            if let Some(inv) = s.a_inv_mut() {
                inv[0] = -1.0;
            }
        }
        e.update("a", 1.0, &[2.0]).unwrap();
        assert_eq!(m.recomputes(RecomputeCause::DegenerateUpdate), 1);
        // Healed: A = 1 + 4 = 5, A^{-1} = 0.2, theta = 2 / 5.
        let theta = e.theta("a").unwrap();
        assert!((theta[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn reset_forgets_arms() {
        let e = engine(1);
        e.update("a", 1.0, &[1.0]).unwrap();
        assert_eq!(e.list_arms(), vec!["a".to_string()]);
        e.reset();
        assert!(e.list_arms().is_empty());
        assert!(e.theta("a").is_none());
    }

    #[test]
    fn restore_skips_malformed_records_and_reports_them() {
        let m = Arc::new(InMemoryMetrics::new());
        let e = LinUcbEngine::with_metrics(EngineConfig::with_dim(2), m.clone()).unwrap();
        let mut arms = std::collections::BTreeMap::new();
        arms.insert(
            "good".to_string(),
            persist::ArmRecord {
                a: vec![vec![2.0, 0.0], vec![0.0, 1.0]],
                b: vec![1.0, 0.0],
                updates: 1,
            },
        );
        arms.insert(
            "short".to_string(),
            persist::ArmRecord {
                a: vec![vec![1.0]],
                b: vec![0.0],
                updates: 0,
            },
        );
        let report = e.restore(EngineSnapshot::new(2, arms));
        assert_eq!(report.restored, vec!["good".to_string()]);
        assert_eq!(
            report.skipped,
            vec![("short".to_string(), crate::SkipReason::ShapeMismatch)]
        );
        assert!(!report.is_clean());
        assert_eq!(m.snapshot().restore_skips, 1);
        assert_eq!(e.list_arms(), vec!["good".to_string()]);
        assert_eq!(e.arm_updates("good"), Some(1));
        assert_eq!(e.theta("good").unwrap(), vec![0.5, 0.0]);
    }

    #[test]
    fn persist_requires_enabled_persistence() {
        let e = engine(2);
        assert!(matches!(e.persist(), Err(Error::InvalidConfig(_))));
        assert!(matches!(e.load(), Err(Error::InvalidConfig(_))));
    }

    #[cfg(feature = "stochastic")]
    #[test]
    fn softmax_selection_is_seeded() {
        let arms = ["a", "b", "c"];
        let run = |seed: u64| {
            let mut cfg = EngineConfig::with_dim(2);
            cfg.seed = seed;
            let e = LinUcbEngine::new(cfg).unwrap();
            (0..20)
                .map(|i| {
                    let x = [1.0, (i % 3) as f64];
                    let arm = e.select_softmax(&arms, &x, 0.5).unwrap();
                    e.update(&arm, if arm == "b" { 1.0 } else { 0.2 }, &x).unwrap();
                    arm
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[cfg(feature = "stochastic")]
    #[test]
    fn softmax_decision_carries_probabilities() {
        let e = engine(2);
        let d = e.decide_softmax(&["a", "b"], &[0.1, 0.9], 1.0).unwrap();
        let probs = d.probs.unwrap();
        assert_eq!(probs.len(), 2);
        let sum: f64 = probs.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(d.policy, DecisionPolicy::LinUcbSoftmax);
        assert!(d.notes.contains(&DecisionNote::SampledFromDistribution));
    }
}
