//! Numbered discrete variables, variable sets, relabelings and assignments.
//!
//! Every tensor dimension is identified by a [`VarNum`]. A [`VariableSet`]
//! attaches a [`DiscreteVariable`] (name + outcome labels) to each number, and
//! a [`Relabeling`] moves tensors between numbering schemes, e.g. from a
//! child node's variables onto the input slot of a truth table.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, TensorError};

/// Identifier of a tensor dimension.
pub type VarNum = usize;

/// Name of the `false` outcome of a boolean variable.
pub const FALSE_OUTCOME: &str = "F";
/// Name of the `true` outcome of a boolean variable.
pub const TRUE_OUTCOME: &str = "T";
/// Outcome index of `false` in a boolean variable.
pub const FALSE_INDEX: usize = 0;
/// Outcome index of `true` in a boolean variable.
pub const TRUE_INDEX: usize = 1;

/// A finite discrete variable: a name plus the labels of its outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DiscreteVariable {
    name: String,
    outcomes: Vec<String>,
}

impl DiscreteVariable {
    /// Create a variable with explicit outcome labels.
    pub fn new(name: impl Into<String>, outcomes: Vec<String>) -> Self {
        Self {
            name: name.into(),
            outcomes,
        }
    }

    /// A boolean variable with outcomes `F` (0) and `T` (1).
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(
            name,
            vec![FALSE_OUTCOME.to_string(), TRUE_OUTCOME.to_string()],
        )
    }

    /// An entity variable ranging over the given entity names.
    pub fn entity<S: AsRef<str>>(name: impl Into<String>, entities: &[S]) -> Self {
        Self::new(
            name,
            entities.iter().map(|e| e.as_ref().to_string()).collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Number of outcomes.
    pub fn size(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the outcomes are exactly `F`, `T` in that order.
    pub fn is_boolean(&self) -> bool {
        self.outcomes.len() == 2
            && self.outcomes[FALSE_INDEX] == FALSE_OUTCOME
            && self.outcomes[TRUE_INDEX] == TRUE_OUTCOME
    }

    /// Label of outcome `index`, if it exists.
    pub fn outcome(&self, index: usize) -> Option<&str> {
        self.outcomes.get(index).map(String::as_str)
    }
}

/// An ordered (by number) set of discrete variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableSet {
    vars: BTreeMap<VarNum, DiscreteVariable>,
}

impl VariableSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(num: VarNum, var: DiscreteVariable) -> Self {
        Self::empty().with(num, var)
    }

    /// Builder-style insertion.
    pub fn with(mut self, num: VarNum, var: DiscreteVariable) -> Self {
        self.vars.insert(num, var);
        self
    }

    pub fn insert(&mut self, num: VarNum, var: DiscreteVariable) {
        self.vars.insert(num, var);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn contains(&self, num: VarNum) -> bool {
        self.vars.contains_key(&num)
    }

    pub fn get(&self, num: VarNum) -> Option<&DiscreteVariable> {
        self.vars.get(&num)
    }

    /// Variable numbers in ascending order.
    pub fn nums(&self) -> Vec<VarNum> {
        self.vars.keys().copied().collect()
    }

    /// Variable sizes, in the same order as [`VariableSet::nums`].
    pub fn sizes(&self) -> Vec<usize> {
        self.vars.values().map(DiscreteVariable::size).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarNum, &DiscreteVariable)> {
        self.vars.iter().map(|(num, var)| (*num, var))
    }

    /// The only variable number of a singleton set.
    pub fn only_num(&self) -> Result<VarNum> {
        match self.nums().as_slice() {
            [num] => Ok(*num),
            nums => Err(TensorError::InvalidTable(format!(
                "expected exactly one variable, found {:?}",
                nums
            ))),
        }
    }

    pub fn min_num(&self) -> Option<VarNum> {
        self.vars.keys().next().copied()
    }

    pub fn max_num(&self) -> Option<VarNum> {
        self.vars.keys().next_back().copied()
    }

    /// Union of two sets; entries of `other` win on conflicting numbers.
    pub fn union(&self, other: &VariableSet) -> VariableSet {
        let mut vars = self.vars.clone();
        vars.extend(other.vars.iter().map(|(n, v)| (*n, v.clone())));
        VariableSet { vars }
    }

    /// The subset of variables whose numbers appear in `nums`.
    pub fn intersection(&self, nums: &[VarNum]) -> VariableSet {
        VariableSet {
            vars: self
                .vars
                .iter()
                .filter(|(n, _)| nums.contains(n))
                .map(|(n, v)| (*n, v.clone()))
                .collect(),
        }
    }

    /// The subset of variables whose numbers do not appear in `nums`.
    pub fn remove_all(&self, nums: &[VarNum]) -> VariableSet {
        VariableSet {
            vars: self
                .vars
                .iter()
                .filter(|(n, _)| !nums.contains(n))
                .map(|(n, v)| (*n, v.clone()))
                .collect(),
        }
    }

    /// Human-readable outcome labels for a key over this set, e.g. `[x, y]`.
    pub fn key_string(&self, key: &[usize]) -> String {
        let labels: Vec<String> = self
            .vars
            .values()
            .zip(key)
            .map(|(var, &idx)| {
                var.outcome(idx)
                    .map(str::to_string)
                    .unwrap_or_else(|| idx.to_string())
            })
            .collect();
        format!("[{}]", labels.join(", "))
    }
}

/// A partial renaming of variable numbers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Relabeling {
    map: BTreeMap<VarNum, VarNum>,
}

impl Relabeling {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (VarNum, VarNum)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
        }
    }

    /// Map every variable of `vars` to itself.
    pub fn identity(vars: &VariableSet) -> Self {
        Self::from_pairs(vars.nums().into_iter().map(|n| (n, n)))
    }

    /// Map the i-th variable of `from` onto the i-th variable of `to`.
    pub fn from_variables(from: &VariableSet, to: &VariableSet) -> Result<Self> {
        if from.len() != to.len() {
            return Err(TensorError::InvalidRelabeling(format!(
                "cannot map {} variables onto {}",
                from.len(),
                to.len()
            )));
        }
        for ((f, fv), (t, tv)) in from.iter().zip(to.iter()) {
            if fv.size() != tv.size() {
                return Err(TensorError::InvalidRelabeling(format!(
                    "variable {} has size {} but its target {} has size {}",
                    f,
                    fv.size(),
                    t,
                    tv.size()
                )));
            }
        }
        Ok(Self::from_pairs(from.nums().into_iter().zip(to.nums())))
    }

    /// Combine two relabelings; entries of `other` win on conflicts.
    pub fn union(&self, other: &Relabeling) -> Relabeling {
        let mut map = self.map.clone();
        map.extend(other.map.iter().map(|(k, v)| (*k, *v)));
        Relabeling { map }
    }

    pub fn inverse(&self) -> Result<Relabeling> {
        let mut map = BTreeMap::new();
        for (&from, &to) in &self.map {
            if map.insert(to, from).is_some() {
                return Err(TensorError::InvalidRelabeling(format!(
                    "relabeling is not injective at target {}",
                    to
                )));
            }
        }
        Ok(Relabeling { map })
    }

    pub fn get(&self, num: VarNum) -> Option<VarNum> {
        self.map.get(&num).copied()
    }

    /// Target number of `num`, leaving unmapped numbers unchanged.
    pub fn apply_num(&self, num: VarNum) -> VarNum {
        self.get(num).unwrap_or(num)
    }

    /// Renumber every variable of `vars`. All of them must be mapped.
    pub fn apply(&self, vars: &VariableSet) -> Result<VariableSet> {
        let mut result = VariableSet::empty();
        for (num, var) in vars.iter() {
            let target = self.get(num).ok_or_else(|| {
                TensorError::InvalidRelabeling(format!("variable {} is not mapped", num))
            })?;
            if result.contains(target) {
                return Err(TensorError::DuplicateDimension(target));
            }
            result.insert(target, var.clone());
        }
        Ok(result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarNum, VarNum)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }
}

impl fmt::Display for Relabeling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(a, b)| format!("{}->{}", a, b)).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// An assignment of outcome indices to variable numbers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Assignment {
    values: BTreeMap<VarNum, usize>,
}

impl Assignment {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Zip a list of variable numbers with a key of outcome indices.
    pub fn from_key(nums: &[VarNum], key: &[usize]) -> Result<Self> {
        if nums.len() != key.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![nums.len()],
                got: vec![key.len()],
            });
        }
        Ok(Self {
            values: nums.iter().copied().zip(key.iter().copied()).collect(),
        })
    }

    pub fn get(&self, num: VarNum) -> Option<usize> {
        self.values.get(&num).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn nums(&self) -> Vec<VarNum> {
        self.values.keys().copied().collect()
    }

    /// Union of two assignments; values of `other` win on conflicts.
    pub fn union(&self, other: &Assignment) -> Assignment {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (*k, *v)));
        Assignment { values }
    }

    /// Renumber the assigned variables, dropping those the relabeling does not map.
    pub fn map_variables(&self, relabeling: &Relabeling) -> Assignment {
        Assignment {
            values: self
                .values
                .iter()
                .filter_map(|(num, value)| relabeling.get(*num).map(|target| (target, *value)))
                .collect(),
        }
    }

    /// The values of `nums`, in order. Every number must be assigned.
    pub fn key_for(&self, nums: &[VarNum]) -> Result<Vec<usize>> {
        nums.iter()
            .map(|n| self.get(*n).ok_or(TensorError::UnknownDimension(*n)))
            .collect()
    }
}
