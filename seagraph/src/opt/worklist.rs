//! Deduplicating node worklist.

use std::collections::VecDeque;

use crate::ir::{BitSet, NodeId};

/// Order in which queued nodes are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PopOrder {
    /// Oldest first.
    #[default]
    Fifo,
    /// Newest first.
    Lifo,
}

/// A worklist that holds each node at most once.
#[derive(Debug, Clone, Default)]
pub struct NodeWorkList {
    queue: VecDeque<NodeId>,
    queued: BitSet,
    order: PopOrder,
}

impl NodeWorkList {
    pub fn new(order: PopOrder) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: BitSet::new(),
            order,
        }
    }

    /// Queue a node. Returns `false` if it was already queued.
    pub fn push(&mut self, node: NodeId) -> bool {
        if self.queued.insert(node.as_usize()) {
            self.queue.push_back(node);
            true
        } else {
            false
        }
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        for node in nodes {
            self.push(node);
        }
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        let node = match self.order {
            PopOrder::Fifo => self.queue.pop_front(),
            PopOrder::Lifo => self.queue.pop_back(),
        }?;
        self.queued.remove(node.as_usize());
        Some(node)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_and_order() {
        let mut fifo = NodeWorkList::new(PopOrder::Fifo);
        assert!(fifo.push(NodeId::new(1)));
        assert!(fifo.push(NodeId::new(2)));
        assert!(!fifo.push(NodeId::new(1)));
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.pop(), Some(NodeId::new(1)));
        assert!(fifo.push(NodeId::new(1)));

        let mut lifo = NodeWorkList::new(PopOrder::Lifo);
        lifo.extend([NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
        assert_eq!(lifo.pop(), Some(NodeId::new(3)));
        assert_eq!(lifo.pop(), Some(NodeId::new(2)));
    }
}
