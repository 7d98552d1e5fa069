//! Immutable trees of per-node values, shaped like the query tree.

use std::fmt;

/// A value per query node, with children in the same order as the node's subtrees.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignmentTree<T> {
    value: T,
    children: Vec<AssignmentTree<T>>,
}

impl<T> AssignmentTree<T> {
    pub fn new(value: T, children: Vec<AssignmentTree<T>>) -> Self {
        Self { value, children }
    }

    pub fn leaf(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn children(&self) -> &[AssignmentTree<T>] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&AssignmentTree<T>> {
        self.children.get(index)
    }

    /// Values of the direct children.
    pub fn child_values(&self) -> Vec<&T> {
        self.children.iter().map(|c| &c.value).collect()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total number of nodes.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(AssignmentTree::size).sum::<usize>()
    }

    /// Same shape, values transformed by `f`.
    pub fn map<U, F>(&self, f: &F) -> AssignmentTree<U>
    where
        F: Fn(&T) -> U,
    {
        AssignmentTree {
            value: f(&self.value),
            children: self.children.iter().map(|c| c.map(f)).collect(),
        }
    }

    /// Values in pre-order.
    pub fn values(&self) -> Vec<&T> {
        let mut out = vec![&self.value];
        for child in &self.children {
            out.extend(child.values());
        }
        out
    }
}

impl<T: fmt::Display> fmt::Display for AssignmentTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if !self.children.is_empty() {
            write!(f, " (")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
