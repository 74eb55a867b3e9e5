//! `DiscoveryLedger` and `RefreshLedger`: per-kind timestamps gating metric
//! dispatch (I5/I6) and full relists. Kept as plain maps guarded by the same
//! lock as the stores (see `state.rs`) rather than their own locks, since
//! every access that matters reads a ledger entry alongside a store snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::kinds::ResourceKind;

#[derive(Debug, Default)]
pub struct Ledger {
    entries: HashMap<ResourceKind, DateTime<Utc>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        self.entries.get(&kind).copied()
    }

    pub fn set(&mut self, kind: ResourceKind, at: DateTime<Utc>) {
        self.entries.insert(kind, at);
    }

    pub fn has_entry(&self, kind: ResourceKind) -> bool {
        self.entries.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_kind_has_no_entry() {
        let ledger = Ledger::new();
        assert!(!ledger.has_entry(ResourceKind::Pods));
        assert_eq!(ledger.get(ResourceKind::Pods), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut ledger = Ledger::new();
        let now = Utc::now();
        ledger.set(ResourceKind::Pods, now);
        assert_eq!(ledger.get(ResourceKind::Pods), Some(now));
        assert!(ledger.has_entry(ResourceKind::Pods));
    }
}
