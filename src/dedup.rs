//! Transmission deduplication.
//!
//! Tracks when each plate was last sent. A plate seen for the first time is
//! always eligible. A known plate waits out the cooldown, measured either from
//! the most recent transmission of any plate (`Global`) or from its own last
//! transmission (`PerPlate`).
//!
//! The table is capped; once full, the least recently sent plate is evicted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ValidatedPlate;

pub const DEFAULT_DEDUP_CAPACITY: usize = 100;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// Known plates wait for the cooldown since the last send of any plate.
    #[default]
    Global,
    /// Known plates wait for the cooldown since their own last send.
    PerPlate,
}

impl std::str::FromStr for CooldownScope {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "global" => Ok(Self::Global),
            "per_plate" => Ok(Self::PerPlate),
            other => Err(anyhow::anyhow!(
                "unknown cooldown scope '{}' (expected global or per_plate)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentRecord {
    pub last_sent: Instant,
    pub send_count: u32,
}

pub struct Deduplicator {
    capacity: usize,
    cooldown: Duration,
    scope: CooldownScope,
    records: HashMap<ValidatedPlate, SentRecord>,
    last_sent: Option<Instant>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY, DEFAULT_COOLDOWN, CooldownScope::Global)
    }
}

impl Deduplicator {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize, cooldown: Duration, scope: CooldownScope) -> Self {
        Self {
            capacity: capacity.max(1),
            cooldown,
            scope,
            records: HashMap::new(),
            last_sent: None,
        }
    }

    pub fn scope(&self) -> CooldownScope {
        self.scope
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, plate: &ValidatedPlate) -> bool {
        self.records.contains_key(plate)
    }

    pub fn record(&self, plate: &ValidatedPlate) -> Option<&SentRecord> {
        self.records.get(plate)
    }

    /// Whether `plate` may be transmitted at `now`. The elapsed time must
    /// strictly exceed the cooldown.
    pub fn should_send(&self, plate: &ValidatedPlate, now: Instant) -> bool {
        let Some(record) = self.records.get(plate) else {
            return true;
        };
        let reference = match self.scope {
            CooldownScope::Global => self.last_sent.unwrap_or(record.last_sent),
            CooldownScope::PerPlate => record.last_sent,
        };
        now.saturating_duration_since(reference) > self.cooldown
    }

    /// Record a successful transmission of `plate` at `now`.
    pub fn record_sent(&mut self, plate: &ValidatedPlate, now: Instant) {
        match self.records.get_mut(plate) {
            Some(record) => {
                record.last_sent = now;
                record.send_count = record.send_count.saturating_add(1);
            }
            None => {
                if self.records.len() >= self.capacity {
                    self.evict_oldest();
                }
                self.records.insert(
                    plate.clone(),
                    SentRecord {
                        last_sent: now,
                        send_count: 1,
                    },
                );
            }
        }
        self.last_sent = Some(self.last_sent.map_or(now, |last| last.max(now)));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .records
            .iter()
            .min_by_key(|(_, record)| record.last_sent)
            .map(|(plate, _)| plate.clone());
        if let Some(plate) = oldest {
            self.records.remove(&plate);
            log::debug!("dedup table full; evicted {}", plate);
        }
    }
}
