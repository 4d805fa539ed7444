//! Resource pool: the consumable channels the actuator draws from.
//!
//! Every mutation checks `0 <= volume <= capacity` before it is applied,
//! so a rejected operation leaves the source untouched.

use std::collections::BTreeMap;

use gantry_core::{Position, SourceConfig, SourceId, Task};
use thiserror::Error;

/// Slack for float comparisons on volumes.
const VOLUME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("source {source_id}: invalid amount {amount}")]
    InvalidAmount { source_id: SourceId, amount: f64 },

    #[error("source {source_id}: needs {requested}, holds {available}")]
    Insufficient {
        source_id: SourceId,
        requested: f64,
        available: f64,
    },

    #[error("source {source_id}: {requested} would exceed capacity {capacity}")]
    OverCapacity {
        source_id: SourceId,
        requested: f64,
        capacity: f64,
    },

    #[error("duplicate source: {0}")]
    DuplicateSource(SourceId),

    #[error("source {0}: capacity must be positive")]
    InvalidCapacity(SourceId),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// One reagent channel (a syringe, a reservoir).
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub reagent: Option<String>,
    pub position: Position,
    /// Nozzle offset relative to the actuator head.
    pub offset: Position,
    capacity: f64,
    volume: f64,
    primed: bool,
}

impl Source {
    pub fn new(id: SourceId, capacity: f64, volume: f64) -> PoolResult<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(PoolError::InvalidCapacity(id));
        }
        let mut source = Self {
            id,
            reagent: None,
            position: Position::ORIGIN,
            offset: Position::ORIGIN,
            capacity,
            volume: 0.0,
            primed: false,
        };
        source.set_volume(volume)?;
        Ok(source)
    }

    pub fn from_config(config: &SourceConfig) -> PoolResult<Self> {
        let mut source = Self::new(config.id.clone(), config.capacity, config.volume)?;
        source.reagent = config.reagent.clone();
        source.position = config.position;
        source.offset = config.offset;
        Ok(source)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn headroom(&self) -> f64 {
        self.capacity - self.volume
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub(crate) fn set_primed(&mut self, primed: bool) {
        self.primed = primed;
    }

    /// Check that `amount` can be withdrawn without applying it.
    pub fn check_withdraw(&self, amount: f64) -> PoolResult<()> {
        self.check_amount(amount)?;
        if amount > self.volume + VOLUME_EPSILON {
            return Err(PoolError::Insufficient {
                source_id: self.id.clone(),
                requested: amount,
                available: self.volume,
            });
        }
        Ok(())
    }

    /// Check that `amount` can be added without applying it.
    pub fn check_deposit(&self, amount: f64) -> PoolResult<()> {
        self.check_amount(amount)?;
        if self.volume + amount > self.capacity + VOLUME_EPSILON {
            return Err(PoolError::OverCapacity {
                source_id: self.id.clone(),
                requested: self.volume + amount,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn withdraw(&mut self, amount: f64) -> PoolResult<()> {
        self.check_withdraw(amount)?;
        self.volume = (self.volume - amount).max(0.0);
        Ok(())
    }

    pub fn deposit(&mut self, amount: f64) -> PoolResult<()> {
        self.check_deposit(amount)?;
        self.volume = (self.volume + amount).min(self.capacity);
        Ok(())
    }

    /// Overwrite the fill level, e.g. when restoring a saved run.
    pub fn set_volume(&mut self, volume: f64) -> PoolResult<()> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(PoolError::InvalidAmount {
                source_id: self.id.clone(),
                amount: volume,
            });
        }
        if volume > self.capacity + VOLUME_EPSILON {
            return Err(PoolError::OverCapacity {
                source_id: self.id.clone(),
                requested: volume,
                capacity: self.capacity,
            });
        }
        self.volume = volume.min(self.capacity);
        Ok(())
    }

    fn check_amount(&self, amount: f64) -> PoolResult<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(PoolError::InvalidAmount {
                source_id: self.id.clone(),
                amount,
            });
        }
        Ok(())
    }

    pub fn view(&self) -> SourceView {
        SourceView {
            id: self.id.clone(),
            reagent: self.reagent.clone(),
            capacity: self.capacity,
            volume: self.volume,
            primed: self.primed,
            offset: self.offset,
        }
    }
}

/// All sources of an experiment, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    sources: BTreeMap<SourceId, Source>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[SourceConfig]) -> PoolResult<Self> {
        let mut pool = Self::new();
        for config in configs {
            pool.insert(Source::from_config(config)?)?;
        }
        Ok(pool)
    }

    pub fn insert(&mut self, source: Source) -> PoolResult<()> {
        if self.sources.contains_key(&source.id) {
            return Err(PoolError::DuplicateSource(source.id));
        }
        self.sources.insert(source.id.clone(), source);
        Ok(())
    }

    pub fn get(&self, id: &SourceId) -> PoolResult<&Source> {
        self.sources
            .get(id)
            .ok_or_else(|| PoolError::UnknownSource(id.clone()))
    }

    pub fn get_mut(&mut self, id: &SourceId) -> PoolResult<&mut Source> {
        self.sources
            .get_mut(id)
            .ok_or_else(|| PoolError::UnknownSource(id.clone()))
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.sources.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Current fill level of every source.
    pub fn levels(&self) -> BTreeMap<SourceId, f64> {
        self.sources
            .iter()
            .map(|(id, s)| (id.clone(), s.volume))
            .collect()
    }

    /// Per-source shortfall against `demand`, ignoring what a fill could add.
    pub fn deficits(&self, demand: &BTreeMap<SourceId, f64>) -> PoolResult<BTreeMap<SourceId, f64>> {
        let mut deficits = BTreeMap::new();
        for (id, needed) in demand {
            let source = self.get(id)?;
            let missing = needed - source.volume;
            if missing > VOLUME_EPSILON {
                deficits.insert(id.clone(), missing);
            }
        }
        Ok(deficits)
    }

    /// Fail with [`PoolError::Insufficient`] if any source holds less than
    /// its total demand. With `allow_fill`, capacity is the limit instead.
    pub fn check_demand(&self, demand: &BTreeMap<SourceId, f64>, allow_fill: bool) -> PoolResult<()> {
        for (id, needed) in demand {
            let source = self.get(id)?;
            let available = if allow_fill {
                source.capacity
            } else {
                source.volume
            };
            if *needed > available + VOLUME_EPSILON {
                return Err(PoolError::Insufficient {
                    source_id: id.clone(),
                    requested: *needed,
                    available,
                });
            }
        }
        Ok(())
    }

    pub fn view(&self) -> ResourceView {
        ResourceView {
            sources: self
                .sources
                .iter()
                .map(|(id, s)| (id.clone(), s.view()))
                .collect(),
        }
    }
}

/// Read-only copy of a source, handed to scheduling policies.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceView {
    pub id: SourceId,
    pub reagent: Option<String>,
    pub capacity: f64,
    pub volume: f64,
    pub primed: bool,
    pub offset: Position,
}

/// Read-only copy of the whole pool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceView {
    pub sources: BTreeMap<SourceId, SourceView>,
}

impl ResourceView {
    pub fn get(&self, id: &SourceId) -> Option<&SourceView> {
        self.sources.get(id)
    }

    /// Whether the task's source exists and holds enough for it.
    pub fn can_serve(&self, task: &Task) -> bool {
        self.get(&task.source_id)
            .is_some_and(|s| task.amount <= s.volume + VOLUME_EPSILON)
    }

    pub fn is_primed(&self, id: &SourceId) -> bool {
        self.get(id).is_some_and(|s| s.primed)
    }
}
