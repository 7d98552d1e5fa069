//! Dual decomposition: subgradient reparameterization of a query tree until
//! the local decodings of nodes and factors agree.

use tracing::{debug, debug_span, info};

use crate::error::Result;
use crate::node::CombinatorNode;

/// Where a solver is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DualDecompositionStatus {
    Pending,
    Iterating,
    /// Local and factor decodings agree everywhere.
    Converged,
    /// The iteration budget ran out with disagreements left.
    Exhausted,
}

/// Outcome of one run on one tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DualDecompositionReport {
    pub iterations: usize,
    pub disagreements: usize,
    pub status: DualDecompositionStatus,
}

impl DualDecompositionReport {
    pub fn converged(&self) -> bool {
        self.status == DualDecompositionStatus::Converged
    }
}

#[derive(Debug)]
pub struct DualDecompositionSolver {
    max_iterations: usize,
    status: DualDecompositionStatus,
}

impl DualDecompositionSolver {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            status: DualDecompositionStatus::Pending,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn status(&self) -> DualDecompositionStatus {
        self.status
    }

    /// Reparameterize `node` in place.
    ///
    /// Subtrees are reparameterized first, each with the full budget, which
    /// usually leaves little to do at the root. Step size at iteration `i`
    /// is `1 / sqrt(i + 1)`.
    pub fn run(&mut self, node: &mut CombinatorNode) -> Result<DualDecompositionReport> {
        let name = node.to_string();
        let span = debug_span!("dual_decomposition", node = %name);
        let _guard = span.enter();

        self.status = DualDecompositionStatus::Iterating;
        for subtree in node.subtrees_mut() {
            DualDecompositionSolver::new(self.max_iterations).run(subtree)?;
        }

        let mut disagreements = 1;
        let mut iteration = 0;
        while iteration < self.max_iterations && disagreements > 0 {
            let local = node.locally_decode_variables()?;
            let factors = node.locally_decode_factors()?;
            let step_size = 1.0 / ((iteration + 1) as f64).sqrt();
            disagreements = node.subgradient_update(&local, &factors, step_size)?;
            debug!(iteration, disagreements, step_size, "subgradient step");
            iteration += 1;
        }

        self.status = if disagreements == 0 {
            DualDecompositionStatus::Converged
        } else {
            DualDecompositionStatus::Exhausted
        };
        info!(
            iterations = iteration,
            disagreements,
            status = ?self.status,
            "dual decomposition finished"
        );
        Ok(DualDecompositionReport {
            iterations: iteration,
            disagreements,
            status: self.status,
        })
    }
}
