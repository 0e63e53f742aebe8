//! Arena-backed doubly linked list of pending task nodes.
//!
//! Slot `0` is a permanent sentinel; the list is circular through it, so
//! `sentinel.next` is the newest node and `sentinel.prev` the oldest.
//! Nodes are addressed by [`NodeKey`], which stops resolving as soon as the
//! node is unlinked (the slot generation is bumped on every unlink).

use crate::message::Token;
use crate::registry::proxy::ProxyTask;
use crate::task::TaskRef;
use std::sync::Arc;

const SENTINEL: usize = 0;

/// Stable handle of one node. Acts as the weak side of node ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeKey {
    index: usize,
    generation: u64,
}

/// Strongly owned payload of a linked node.
pub(crate) struct NodeEntry {
    pub(crate) task: TaskRef,
    pub(crate) proxy: Arc<ProxyTask>,
}

impl NodeEntry {
    fn token(&self) -> Option<&Token> {
        self.proxy.token()
    }
}

struct Slot {
    generation: u64,
    prev: usize,
    next: usize,
    entry: Option<NodeEntry>,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            generation: 0,
            prev: SENTINEL,
            next: SENTINEL,
            entry: None,
        }
    }
}

pub(crate) struct TaskList {
    slots: Vec<Slot>,
    free: Vec<usize>,
    len: usize,
}

impl TaskList {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Slot::vacant()],
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Links a new node right after the sentinel.
    ///
    /// `build` receives the key of the node being created, so the proxy can
    /// carry its own back-reference.
    pub(crate) fn insert_after_head(
        &mut self,
        build: impl FnOnce(NodeKey) -> NodeEntry,
    ) -> NodeKey {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::vacant());
                self.slots.len() - 1
            }
        };
        let key = NodeKey {
            index,
            generation: self.slots[index].generation,
        };
        let entry = build(key);

        let old_first = self.slots[SENTINEL].next;
        {
            let slot = &mut self.slots[index];
            slot.entry = Some(entry);
            slot.prev = SENTINEL;
            slot.next = old_first;
        }
        self.slots[old_first].prev = index;
        self.slots[SENTINEL].next = index;
        self.len += 1;
        key
    }

    /// Unlinks the node behind `key`. Returns `None` when the key no longer
    /// resolves (already fired, already cancelled).
    pub(crate) fn unlink(&mut self, key: NodeKey) -> Option<NodeEntry> {
        if key.index == SENTINEL {
            return None;
        }
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation || slot.entry.is_none() {
            return None;
        }
        let entry = slot.entry.take();
        let (prev, next) = (slot.prev, slot.next);
        slot.generation = slot.generation.wrapping_add(1);
        slot.prev = SENTINEL;
        slot.next = SENTINEL;

        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.free.push(key.index);
        self.len -= 1;
        entry
    }

    /// Finds the first node, newest first, whose entry satisfies `predicate`.
    pub(crate) fn find(&self, mut predicate: impl FnMut(&NodeEntry) -> bool) -> Option<NodeKey> {
        let mut cursor = self.slots[SENTINEL].next;
        while cursor != SENTINEL {
            let slot = &self.slots[cursor];
            if let Some(entry) = slot.entry.as_ref() {
                if predicate(entry) {
                    return Some(NodeKey {
                        index: cursor,
                        generation: slot.generation,
                    });
                }
            }
            cursor = slot.next;
        }
        None
    }

    /// Unlinks every node whose proxy token matches `token` (`None` matches all).
    pub(crate) fn unlink_by_token(&mut self, token: Option<&Token>) -> Vec<NodeEntry> {
        let mut keys = Vec::new();
        let mut cursor = self.slots[SENTINEL].next;
        while cursor != SENTINEL {
            let slot = &self.slots[cursor];
            if let Some(entry) = slot.entry.as_ref() {
                if token.map_or(true, |wanted| entry.token() == Some(wanted)) {
                    keys.push(NodeKey {
                        index: cursor,
                        generation: slot.generation,
                    });
                }
            }
            cursor = slot.next;
        }
        keys.into_iter().filter_map(|key| self.unlink(key)).collect()
    }

    /// Tasks in posting order, oldest first.
    pub(crate) fn tasks_oldest_first(&self) -> Vec<TaskRef> {
        let mut tasks = Vec::with_capacity(self.len);
        let mut cursor = self.slots[SENTINEL].prev;
        while cursor != SENTINEL {
            let slot = &self.slots[cursor];
            if let Some(entry) = slot.entry.as_ref() {
                tasks.push(Arc::clone(&entry.task));
            }
            cursor = slot.prev;
        }
        tasks
    }

    /// Walks the list from the sentinel and checks reciprocal links.
    ///
    /// Returns the number of linked nodes.
    pub(crate) fn validate(&self) -> Result<usize, String> {
        let mut seen = vec![false; self.slots.len()];
        let mut count = 0usize;
        let mut previous = SENTINEL;
        let mut cursor = self.slots[SENTINEL].next;

        while cursor != SENTINEL {
            let Some(slot) = self.slots.get(cursor) else {
                return Err(format!("link points outside arena: {cursor}"));
            };
            if seen[cursor] {
                return Err(format!("cycle detected at slot {cursor}"));
            }
            seen[cursor] = true;
            if slot.entry.is_none() {
                return Err(format!("vacant slot {cursor} is linked"));
            }
            if slot.prev != previous {
                return Err(format!(
                    "slot {cursor} prev={} expected {previous}",
                    slot.prev
                ));
            }
            count += 1;
            previous = cursor;
            cursor = slot.next;
        }

        if self.slots[SENTINEL].prev != previous {
            return Err(format!(
                "sentinel prev={} expected {previous}",
                self.slots[SENTINEL].prev
            ));
        }
        if count != self.len {
            return Err(format!("linked count {count} != tracked len {}", self.len));
        }
        let occupied = self.slots.iter().filter(|slot| slot.entry.is_some()).count();
        if occupied != count {
            return Err(format!("{occupied} occupied slots but {count} reachable"));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeEntry, TaskList};
    use crate::registry::proxy::ProxyTask;
    use crate::task::{same_task, task, TaskRef};
    use std::sync::{Arc, Weak};

    fn entry_for(work: &TaskRef, key: super::NodeKey) -> NodeEntry {
        NodeEntry {
            task: Arc::clone(work),
            proxy: Arc::new(ProxyTask::new(work, Weak::new(), key, None)),
        }
    }

    #[test]
    fn insert_links_newest_after_sentinel() {
        let mut list = TaskList::new();
        let first = task(|| {});
        let second = task(|| {});
        list.insert_after_head(|key| entry_for(&first, key));
        list.insert_after_head(|key| entry_for(&second, key));

        let newest = list.find(|_| true).expect("list should have a first node");
        let entry = list.unlink(newest).expect("newest node should unlink");
        assert!(same_task(&entry.task, &second));
        assert_eq!(list.validate(), Ok(1));
    }

    #[test]
    fn stale_key_does_not_resolve_after_slot_reuse() {
        let mut list = TaskList::new();
        let first = task(|| {});
        let key = list.insert_after_head(|key| entry_for(&first, key));
        assert!(list.unlink(key).is_some());

        let second = task(|| {});
        let reused = list.insert_after_head(|key| entry_for(&second, key));
        assert_ne!(key, reused);
        assert!(list.unlink(key).is_none());
        assert_eq!(list.len(), 1);
        assert_eq!(list.validate(), Ok(1));
    }

    #[test]
    fn unlinking_middle_node_keeps_relative_order() {
        let mut list = TaskList::new();
        let a = task(|| {});
        let b = task(|| {});
        let c = task(|| {});
        list.insert_after_head(|key| entry_for(&a, key));
        let b_key = list.insert_after_head(|key| entry_for(&b, key));
        list.insert_after_head(|key| entry_for(&c, key));

        list.unlink(b_key).expect("b should unlink");
        let order = list.tasks_oldest_first();
        assert_eq!(order.len(), 2);
        assert!(same_task(&order[0], &a));
        assert!(same_task(&order[1], &c));
        assert_eq!(list.validate(), Ok(2));
    }
}
