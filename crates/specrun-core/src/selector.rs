use crate::types::Stage;
use serde::{Serialize, Serializer};
use std::fmt;

/// A set of stages, stored as one bit per [`Stage`] variant.
///
/// Membership only: insertion order is not recorded, and iteration always
/// follows the canonical stage order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSelector {
    bits: u8,
}

impl StageSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(stage: Stage) -> Self {
        let mut s = Self::new();
        s.insert(stage);
        s
    }

    pub fn insert(&mut self, stage: Stage) {
        self.bits |= 1 << stage.index();
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.bits & (1 << stage.index()) != 0
    }

    /// Select the four core stages. Optional stages are left as they were.
    pub fn set_all(&mut self) {
        for stage in Stage::all().iter().filter(|s| s.is_core()) {
            self.insert(*stage);
        }
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn has_any_optional_stage(&self) -> bool {
        self.iter().any(|s| !s.is_core())
    }

    /// True when the selection is exactly `{constitution}`.
    pub fn is_constitution_only(&self) -> bool {
        *self == Self::only(Stage::Constitution)
    }

    /// Selected stages filtered from the fixed canonical order.
    pub fn canonical_order(&self) -> Vec<Stage> {
        self.iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::all().iter().copied().filter(|s| self.contains(*s))
    }
}

impl FromIterator<Stage> for StageSelector {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut s = Self::new();
        for stage in iter {
            s.insert(stage);
        }
        s
    }
}

impl fmt::Display for StageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl Serialize for StageSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
