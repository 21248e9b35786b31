//! Identifiers and simple allocators for graph entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transform node inside a [`RigGraph`](crate::graph::RigGraph). Dense index, allocated in
/// insertion order, which is what makes topological tie-breaking reproducible.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Joint inside a caller-supplied [`JointHierarchy`](crate::joint::JointHierarchy).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl JointId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "joint#{}", self.0)
    }
}

/// Monotonic allocator for NodeId and JointId.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdAllocator {
    next_node: u32,
    next_joint: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node = self.next_node.wrapping_add(1);
        id
    }

    #[inline]
    pub fn alloc_joint(&mut self) -> JointId {
        let id = JointId(self.next_joint);
        self.next_joint = self.next_joint.wrapping_add(1);
        id
    }
}
