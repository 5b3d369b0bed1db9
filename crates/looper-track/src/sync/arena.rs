//! Index-stable storage for sync points.
//!
//! Nodes live in a `Vec<Option<Node>>` and are doubly linked by index, so
//! insertion and removal are O(1), iteration follows insertion order, and a
//! freed slot is reused by the next insertion.

use serde::{Deserialize, Serialize};

/// A timing correspondence between two tracks.
///
/// When `source` restarts its loop, `target` should be at `time`, counted
/// from the start of the target's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub source: usize,
    pub target: usize,
    pub time: usize,
    /// Captured during a take that has not been committed yet.
    pub provisional: bool,
}

impl SyncPoint {
    pub fn involves(&self, track: usize) -> bool {
        self.source == track || self.target == track
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointId(usize);

#[derive(Debug)]
struct Node {
    point: SyncPoint,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
pub struct PointArena {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl PointArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the tail.
    pub fn push(&mut self, point: SyncPoint) -> PointId {
        let node = Node {
            point,
            prev: self.tail,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        match self.tail {
            Some(tail) => {
                if let Some(t) = self.nodes[tail].as_mut() {
                    t.next = Some(index);
                }
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        PointId(index)
    }

    pub fn get(&self, id: PointId) -> Option<&SyncPoint> {
        self.nodes.get(id.0)?.as_ref().map(|n| &n.point)
    }

    /// Unlink and free a point. Returns the id of the point that followed it.
    pub fn remove(&mut self, id: PointId) -> Option<PointId> {
        let node = self.nodes.get_mut(id.0)?.take()?;
        match node.prev {
            Some(prev) => {
                if let Some(p) = self.nodes[prev].as_mut() {
                    p.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.nodes[next].as_mut() {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        self.free.push(id.0);
        self.len -= 1;
        node.next.map(PointId)
    }

    /// Keep only the points for which `f` returns true. `f` may modify the
    /// points it keeps.
    pub fn retain_mut(&mut self, mut f: impl FnMut(&mut SyncPoint) -> bool) {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let Some(node) = self.nodes[index].as_mut() else {
                break;
            };
            if f(&mut node.point) {
                cursor = node.next;
            } else {
                cursor = self.remove(PointId(index)).map(|id| id.0);
            }
        }
    }

    pub fn retain(&mut self, mut f: impl FnMut(&SyncPoint) -> bool) {
        self.retain_mut(|p| f(p));
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Points in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncPoint> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(cursor?)?.as_ref()?;
            cursor = node.next;
            Some(&node.point)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(source: usize, target: usize, time: usize) -> SyncPoint {
        SyncPoint {
            source,
            target,
            time,
            provisional: false,
        }
    }

    fn times(arena: &PointArena) -> Vec<usize> {
        arena.iter().map(|p| p.time).collect()
    }

    #[test]
    fn test_insertion_order() {
        let mut arena = PointArena::new();
        for t in 0..4 {
            arena.push(point(0, 1, t));
        }
        assert_eq!(times(&arena), vec![0, 1, 2, 3]);
        assert_eq!(arena.len(), 4);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut arena = PointArena::new();
        let ids: Vec<_> = (0..5).map(|t| arena.push(point(0, 1, t))).collect();

        assert_eq!(arena.remove(ids[2]), Some(ids[3]));
        assert_eq!(times(&arena), vec![0, 1, 3, 4]);
        assert_eq!(arena.remove(ids[0]), Some(ids[1]));
        assert_eq!(arena.remove(ids[4]), None);
        assert_eq!(times(&arena), vec![1, 3]);

        // removed twice is a no-op
        assert_eq!(arena.remove(ids[4]), None);
        assert_eq!(arena.len(), 2);
        assert!(arena.get(ids[4]).is_none());
    }

    #[test]
    fn test_freed_slots_reused() {
        let mut arena = PointArena::new();
        let a = arena.push(point(0, 1, 10));
        arena.push(point(0, 1, 11));
        arena.remove(a);
        let c = arena.push(point(0, 1, 12));
        assert_eq!(c, a);
        // reuse does not disturb insertion order
        assert_eq!(times(&arena), vec![11, 12]);
    }

    #[test]
    fn test_retain_mut() {
        let mut arena = PointArena::new();
        for t in 0..6 {
            arena.push(SyncPoint {
                provisional: t % 2 == 0,
                ..point(0, 1, t)
            });
        }
        arena.retain_mut(|p| {
            if p.provisional {
                p.provisional = false;
                true
            } else {
                false
            }
        });
        assert_eq!(times(&arena), vec![0, 2, 4]);
        assert!(arena.iter().all(|p| !p.provisional));

        arena.retain(|_| false);
        assert!(arena.is_empty());
        arena.push(point(1, 0, 7));
        assert_eq!(times(&arena), vec![7]);
    }
}
