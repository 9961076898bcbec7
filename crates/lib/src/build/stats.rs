//! Per-kind execution statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStatistics {
  pub count: usize,
  pub total: Duration,
}

/// How many builders of each kind ran and how long they took.
#[derive(Debug, Clone, Default)]
pub struct BuilderStatistics {
  kinds: BTreeMap<String, KindStatistics>,
}

impl BuilderStatistics {
  pub fn record(&mut self, kind: &str, elapsed: Duration) {
    let entry = self.kinds.entry(kind.to_string()).or_default();
    entry.count += 1;
    entry.total += elapsed;
  }

  pub fn get(&self, kind: &str) -> Option<KindStatistics> {
    self.kinds.get(kind).copied()
  }

  pub fn executed(&self) -> usize {
    self.kinds.values().map(|s| s.count).sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &KindStatistics)> {
    self.kinds.iter().map(|(kind, stats)| (kind.as_str(), stats))
  }

  pub fn log(&self) {
    for (kind, stats) in self.iter() {
      info!(
        kind,
        count = stats.count,
        total_ms = stats.total.as_millis() as u64,
        "builder statistics"
      );
    }
  }
}
