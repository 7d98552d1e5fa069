//! Fixed-size pool of solver engines.
//!
//! Engines are created once, up front, and leased out one per solve. The pool
//! lock guards only the slot bookkeeping; the solve itself runs on the lease
//! without holding it. A pool with no free engine fails immediately instead
//! of waiting.

use parking_lot::Mutex;
use tracing::trace;

use crate::engine::{LpSolution, SolveLimits, SolverEngine};
use crate::error::{LpError, Result};
use crate::model::LinearProgram;

/// Number of engines the pool is usually sized to.
pub const DEFAULT_POOL_SIZE: usize = 20;

/// Statistics for pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Leases handed out
    pub acquisitions: usize,
    /// Leases returned
    pub releases: usize,
    /// Acquire attempts that found no free engine
    pub exhaustions: usize,
    /// Most engines in use at once
    pub peak_in_use: usize,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Option<SolverEngine>>,
    stats: PoolStats,
}

impl PoolState {
    fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }
}

#[derive(Debug)]
pub struct EnginePool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl Default for EnginePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl EnginePool {
    /// Create a pool holding `size` engines.
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                slots: (0..size).map(|id| Some(SolverEngine::new(id))).collect(),
                stats: PoolStats::default(),
            }),
            capacity: size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Engines currently free.
    pub fn available(&self) -> usize {
        let state = self.state.lock();
        state.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    /// Take a free engine, or fail with [`LpError::PoolExhausted`].
    pub fn acquire(&self) -> Result<EngineLease<'_>> {
        let mut state = self.state.lock();
        let free = state
            .slots
            .iter_mut()
            .enumerate()
            .find_map(|(slot, engine)| engine.take().map(|engine| (slot, engine)));
        match free {
            Some((slot, engine)) => {
                state.stats.acquisitions += 1;
                let in_use = state.in_use();
                state.stats.peak_in_use = state.stats.peak_in_use.max(in_use);
                trace!(slot, in_use, "acquired solver engine");
                Ok(EngineLease {
                    pool: self,
                    slot,
                    engine: Some(engine),
                })
            }
            None => {
                state.stats.exhaustions += 1;
                Err(LpError::PoolExhausted {
                    size: self.capacity,
                })
            }
        }
    }

    fn release(&self, slot: usize, engine: SolverEngine) {
        let mut state = self.state.lock();
        if let Some(entry) = state.slots.get_mut(slot) {
            *entry = Some(engine);
        }
        state.stats.releases += 1;
        trace!(slot, "released solver engine");
    }
}

/// Exclusive use of one pooled engine, returned to the pool on drop.
#[derive(Debug)]
pub struct EngineLease<'a> {
    pool: &'a EnginePool,
    slot: usize,
    engine: Option<SolverEngine>,
}

impl EngineLease<'_> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn solve(&mut self, program: &LinearProgram, limits: &SolveLimits) -> Result<LpSolution> {
        match self.engine.as_mut() {
            Some(engine) => engine.solve(program, limits),
            None => Err(LpError::InvalidModel(format!(
                "engine of slot {} was already released",
                self.slot
            ))),
        }
    }
}

impl Drop for EngineLease<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(self.slot, engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Comparison, LinearExpr, VarKind};

    #[test]
    fn test_lease_returns_on_drop() {
        let pool = EnginePool::new(2);
        assert_eq!(pool.capacity(), 2);
        {
            let first = pool.acquire().unwrap();
            let second = pool.acquire().unwrap();
            assert_ne!(first.slot(), second.slot());
            assert_eq!(pool.available(), 0);
            assert_eq!(
                pool.acquire().unwrap_err(),
                LpError::PoolExhausted { size: 2 }
            );
        }
        assert_eq!(pool.available(), 2);

        let stats = pool.stats();
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.releases, 2);
        assert_eq!(stats.exhaustions, 1);
        assert_eq!(stats.peak_in_use, 2);
    }

    #[test]
    fn test_empty_pool_fails_immediately() {
        let pool = EnginePool::new(0);
        assert!(matches!(
            pool.acquire(),
            Err(LpError::PoolExhausted { size: 0 })
        ));
    }

    #[test]
    fn test_default_size() {
        assert_eq!(EnginePool::default().capacity(), DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_solve_through_lease() {
        let pool = EnginePool::new(1);
        let mut lp = LinearProgram::new();
        let x = lp.add_variable("x", VarKind::Binary);
        lp.add_objective_term(x, 1.0).unwrap();
        lp.add_constraint(LinearExpr::sum([x]), Comparison::LessEqual, 1.0)
            .unwrap();
        let mut lease = pool.acquire().unwrap();
        let solution = lease.solve(&lp, &SolveLimits::default()).unwrap();
        assert_eq!(solution.value(x), 1.0);
    }
}
