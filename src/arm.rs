//! Per-arm ridge regression state and the lazily-grown arm map.

use std::collections::BTreeMap;

use tracing::debug;

use crate::linalg::{self, LinalgError};
use crate::ArmScore;

/// Sufficient statistics for one arm's disjoint linear model.
///
/// - `a = I + sum(x x^T)` (d x d, row-major)
/// - `b = sum(r x)` (d)
/// - `a_inv`: cached inverse of `a`, built on first use and then maintained
///   by rank-one updates
#[derive(Debug, Clone, PartialEq)]
pub struct ArmState {
    a: Vec<f64>,
    a_inv: Option<Vec<f64>>,
    b: Vec<f64>,
    updates: u64,
}

impl ArmState {
    /// Fresh state: identity `A`, zero `b`, no cached inverse.
    pub fn new(dim: usize) -> Self {
        Self {
            a: linalg::identity(dim),
            a_inv: None,
            b: vec![0.0; dim],
            updates: 0,
        }
    }

    /// Rebuild state from persisted `(A, b)`; the inverse is left for the caller to derive.
    pub(crate) fn from_parts(a: Vec<f64>, b: Vec<f64>, updates: u64) -> Self {
        Self {
            a,
            a_inv: None,
            b,
            updates,
        }
    }

    /// Design matrix `A` (row-major).
    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Cached `A^{-1}`, if it has been computed.
    pub fn a_inv(&self) -> Option<&[f64]> {
        self.a_inv.as_deref()
    }

    /// Reward-weighted feature accumulator `b`.
    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Number of accepted reward observations.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Return the cached inverse, computing it by full inversion when absent.
    pub fn ensure_inverse(&mut self, dim: usize) -> Result<&[f64], LinalgError> {
        cached_inverse(&self.a, &mut self.a_inv, dim)
    }

    /// Ridge point estimate `theta = A^{-1} b`.
    pub fn theta(&mut self, dim: usize) -> Result<Vec<f64>, LinalgError> {
        let inv = cached_inverse(&self.a, &mut self.a_inv, dim)?;
        Ok(linalg::matrix_vector(inv, dim, &self.b))
    }

    /// LinUCB score of context `x`: `theta^T x + alpha * sqrt(x^T A^{-1} x)`.
    pub fn score(&mut self, dim: usize, alpha: f64, x: &[f64]) -> Result<ArmScore, LinalgError> {
        let inv = cached_inverse(&self.a, &mut self.a_inv, dim)?;
        let theta = linalg::matrix_vector(inv, dim, &self.b);
        let mean = linalg::dot(&theta, x);
        let ax = linalg::matrix_vector(inv, dim, x);
        let confidence = linalg::dot(x, &ax).max(0.0).sqrt();
        Ok(ArmScore {
            ucb: mean + alpha * confidence,
            mean,
            confidence,
        })
    }

    /// Discard the cached inverse and rebuild it from `A`.
    ///
    /// On failure the cache stays empty so the next access retries.
    pub fn recompute_inverse(&mut self, dim: usize) -> Result<(), LinalgError> {
        self.a_inv = None;
        self.a_inv = Some(linalg::invert(&self.a, dim)?);
        Ok(())
    }

    /// Whether folding `(x, r)` in keeps `A` and `b` finite.
    ///
    /// Checking the diagonal is enough for `A`: it is a sum of outer products,
    /// so every off-diagonal entry is bounded by its row and column diagonals.
    pub(crate) fn admits(&self, dim: usize, x: &[f64], r: f64) -> bool {
        linalg::dot(x, x).is_finite()
            && x.iter()
                .enumerate()
                .all(|(i, xi)| (self.a[i * dim + i] + xi * xi).is_finite())
            && self.b.iter().zip(x).all(|(bi, xi)| (bi + r * xi).is_finite())
    }

    pub(crate) fn a_mut(&mut self) -> &mut Vec<f64> {
        &mut self.a
    }

    pub(crate) fn a_inv_mut(&mut self) -> Option<&mut Vec<f64>> {
        self.a_inv.as_mut()
    }

    pub(crate) fn b_mut(&mut self) -> &mut Vec<f64> {
        &mut self.b
    }

    pub(crate) fn bump_updates(&mut self) -> u64 {
        self.updates = self.updates.saturating_add(1);
        self.updates
    }
}

fn cached_inverse<'a>(
    a: &[f64],
    slot: &'a mut Option<Vec<f64>>,
    dim: usize,
) -> Result<&'a [f64], LinalgError> {
    if slot.is_none() {
        *slot = Some(linalg::invert(a, dim)?);
    }
    let inv: &'a [f64] = slot.get_or_insert_with(Vec::new);
    Ok(inv)
}

/// Map from arm id to [`ArmState`], grown lazily as new ids are seen.
///
/// Entries are never evicted while the store is alive; callers that need a
/// bounded arm space should enforce it outside the engine. The store assumes
/// exclusive access during each call (the engine holds it behind a lock).
#[derive(Debug, Clone)]
pub struct ArmStore {
    dim: usize,
    arms: BTreeMap<String, ArmState>,
}

impl ArmStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            arms: BTreeMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Existing state for `id`, or a freshly initialized one.
    pub fn ensure_arm(&mut self, id: &str) -> &mut ArmState {
        let dim = self.dim;
        self.arms.entry(id.to_string()).or_insert_with(|| {
            debug!(arm = id, dim, "initializing arm state");
            ArmState::new(dim)
        })
    }

    pub fn get(&self, id: &str) -> Option<&ArmState> {
        self.arms.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ArmState> {
        self.arms.get_mut(id)
    }

    /// Replace (or create) the state for `id`.
    pub fn insert(&mut self, id: String, state: ArmState) {
        self.arms.insert(id, state);
    }

    /// Known arm ids, in lexicographic order.
    pub fn ids(&self) -> Vec<String> {
        self.arms.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArmState)> {
        self.arms.iter()
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Drop every arm (explicit reset).
    pub fn clear(&mut self) {
        self.arms.clear();
    }
}
