//! Snapshot format and durable storage.
//!
//! Only `(A, b)` (plus the update counter) is persisted. Inverses are always
//! re-derived on restore: one `O(d^3)` inversion per arm is cheap next to the
//! risk of loading a stale or drifted inverse.
//!
//! On disk, a snapshot is a JSON document:
//!
//! ```text
//! { "dim": 2,
//!   "arms": { "gpt-small": { "A": [[2.0, 0.0], [0.0, 1.0]], "b": [1.0, 0.0], "updates": 1 } } }
//! ```
//!
//! Each feature dimension gets its own file (`linmux-d{dim}.json`), so engines
//! with different dimensions never share a namespace.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::arm::{ArmState, ArmStore};
use crate::{Error, Result};

/// Persisted state of one arm.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArmRecord {
    /// Design matrix, one inner array per row.
    #[serde(rename = "A")]
    pub a: Vec<Vec<f64>>,
    /// Reward-weighted feature accumulator.
    pub b: Vec<f64>,
    /// Accepted updates so far; older snapshots without it load as 0.
    #[serde(default)]
    pub updates: u64,
}

/// Point-in-time copy of every arm's durable state.
///
/// Deserialization is tolerant per arm: a record that does not decode (a
/// `null` where a number belongs, a missing field) lands in `unreadable`
/// instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "RawSnapshot")]
pub struct EngineSnapshot {
    /// Feature dimension the snapshot was taken at.
    pub dim: usize,
    pub arms: BTreeMap<String, ArmRecord>,
    /// Arm ids whose records could not be decoded. Never written out.
    #[serde(skip)]
    pub unreadable: Vec<String>,
}

impl EngineSnapshot {
    pub fn new(dim: usize, arms: BTreeMap<String, ArmRecord>) -> Self {
        Self {
            dim,
            arms,
            unreadable: Vec::new(),
        }
    }
}

#[derive(serde::Deserialize)]
struct RawSnapshot {
    dim: usize,
    arms: BTreeMap<String, serde_json::Value>,
}

impl From<RawSnapshot> for EngineSnapshot {
    fn from(raw: RawSnapshot) -> Self {
        let mut snap = EngineSnapshot::new(raw.dim, BTreeMap::new());
        for (id, value) in raw.arms {
            match serde_json::from_value::<ArmRecord>(value) {
                Ok(rec) => {
                    snap.arms.insert(id, rec);
                }
                Err(e) => {
                    debug!(arm = %id, error = %e, "undecodable arm record");
                    snap.unreadable.push(id);
                }
            }
        }
        snap
    }
}

/// Why a persisted arm record was not restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SkipReason {
    /// `A` is not `d x d` or `b` is not length `d`.
    ShapeMismatch,
    /// NaN or infinite entries.
    NonFinite,
    /// `A` could not be inverted.
    Singular,
    /// The stored record could not be decoded.
    Unreadable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::ShapeMismatch => "shape mismatch",
            SkipReason::NonFinite => "non-finite entries",
            SkipReason::Singular => "singular design matrix",
            SkipReason::Unreadable => "undecodable record",
        };
        f.write_str(s)
    }
}

/// Outcome of [`crate::LinUcbEngine::restore`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Arms loaded, in lexicographic order.
    pub restored: Vec<String>,
    /// Arms skipped, with the reason, in arm id order.
    pub skipped: Vec<(String, SkipReason)>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

pub(crate) fn capture(store: &ArmStore) -> EngineSnapshot {
    let dim = store.dim();
    let arms = store
        .iter()
        .map(|(id, st)| {
            let a = st.a().chunks(dim).map(<[f64]>::to_vec).collect();
            let rec = ArmRecord {
                a,
                b: st.b().to_vec(),
                updates: st.updates(),
            };
            (id.clone(), rec)
        })
        .collect();
    EngineSnapshot::new(dim, arms)
}

/// Validate a record and rebuild its state, inverse included.
pub(crate) fn rebuild(dim: usize, rec: ArmRecord) -> std::result::Result<ArmState, SkipReason> {
    if rec.b.len() != dim || rec.a.len() != dim || rec.a.iter().any(|row| row.len() != dim) {
        return Err(SkipReason::ShapeMismatch);
    }
    let finite = rec.b.iter().all(|v| v.is_finite())
        && rec.a.iter().flatten().all(|v| v.is_finite());
    if !finite {
        return Err(SkipReason::NonFinite);
    }
    let a: Vec<f64> = rec.a.into_iter().flatten().collect();
    let mut st = ArmState::from_parts(a, rec.b, rec.updates);
    st.recompute_inverse(dim)
        .map_err(|_| SkipReason::Singular)?;
    Ok(st)
}

/// File-backed snapshot storage for one feature dimension.
///
/// Writes are atomic: the snapshot goes to `*.json.tmp`, is fsynced, and is
/// then renamed over the live file, so a crash mid-write leaves the previous
/// snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dim: usize,
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>, dim: usize) -> Self {
        Self {
            dim,
            path: dir.as_ref().join(format!("linmux-d{dim}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn save(&self, snap: &EngineSnapshot) -> Result<()> {
        if snap.dim != self.dim {
            return Err(Error::dimension_mismatch("snapshot", self.dim, snap.dim));
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = self.write_then_rename(&tmp, snap) {
            if tmp.is_file() {
                let _ = fs::remove_file(&tmp);
            }
            return Err(e);
        }
        debug!(path = %self.path.display(), arms = snap.arms.len(), "snapshot saved");
        Ok(())
    }

    fn write_then_rename(&self, tmp: &Path, snap: &EngineSnapshot) -> Result<()> {
        {
            let f = File::create(tmp)?;
            let mut w = BufWriter::new(f);
            serde_json::to_writer(&mut w, snap)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(tmp, &self.path)?;
        Ok(())
    }

    /// Load the stored snapshot; `Ok(None)` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<EngineSnapshot>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snap: EngineSnapshot = serde_json::from_str(&raw)?;
        Ok(Some(snap))
    }
}
