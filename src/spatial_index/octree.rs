use std::mem;

use super::SpatialIndexError;
use crate::world::{BoundingBox, ChunkPos};

const ROOT: u32 = 0;

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(Vec<ChunkPos>),
    /// Children, indexed by [`child_slot`]
    Branch([u32; 8]),
}

#[derive(Debug, Clone)]
struct Node {
    bounds: BoundingBox,
    depth: u32,
    kind: NodeKind,
}

impl Node {
    fn leaf(bounds: BoundingBox, depth: u32) -> Self {
        Self { bounds, depth, kind: NodeKind::Leaf(Vec::new()) }
    }
}

enum InsertStep {
    Descend(u32),
    Push,
    Split,
}

/// Arena-backed octree over chunk origins.
///
/// Nodes live in one `Vec` and refer to their children by index; freed
/// slots are recycled through `free`. Node 0 is always the root.
#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    max_depth: u32,
    node_capacity: usize,
    len: usize,
}

impl Octree {
    pub fn new(bounds: BoundingBox, max_depth: u32, node_capacity: usize) -> Self {
        Self {
            nodes: vec![Node::leaf(bounds, 0)],
            free: Vec::new(),
            max_depth,
            node_capacity: node_capacity.max(1),
            len: 0,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.nodes[ROOT as usize].bounds
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes currently allocated, the root included
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Insert `pos`. Returns `Ok(false)` when it was already present.
    pub fn insert(&mut self, pos: ChunkPos) -> Result<bool, SpatialIndexError> {
        let point = pos.world_origin();
        if !self.bounds().contains(point) {
            return Err(SpatialIndexError::OutOfBounds { pos });
        }

        let mut index = ROOT;
        loop {
            let node = &self.nodes[index as usize];
            let step = match &node.kind {
                NodeKind::Branch(children) => InsertStep::Descend(children[child_slot(&node.bounds, point)]),
                NodeKind::Leaf(items) if items.contains(&pos) => return Ok(false),
                NodeKind::Leaf(items) if items.len() < self.node_capacity => InsertStep::Push,
                NodeKind::Leaf(_) if node.depth >= self.max_depth => {
                    return Err(SpatialIndexError::DepthExceeded { depth: node.depth });
                }
                NodeKind::Leaf(_) => InsertStep::Split,
            };

            match step {
                InsertStep::Descend(child) => index = child,
                InsertStep::Push => {
                    if let NodeKind::Leaf(items) = &mut self.nodes[index as usize].kind {
                        items.push(pos);
                    }
                    self.len += 1;
                    return Ok(true);
                }
                // Re-examine the same node, now a branch
                InsertStep::Split => self.split(index),
            }
        }
    }

    /// Remove `pos`. Absent coordinates are a no-op returning `false`.
    pub fn remove(&mut self, pos: ChunkPos) -> bool {
        let point = pos.world_origin();
        if !self.bounds().contains(point) {
            return false;
        }

        let mut path = Vec::new();
        let mut index = ROOT;
        while let NodeKind::Branch(children) = &self.nodes[index as usize].kind {
            path.push(index);
            index = children[child_slot(&self.nodes[index as usize].bounds, point)];
        }

        let removed = match &mut self.nodes[index as usize].kind {
            NodeKind::Leaf(items) => match items.iter().position(|p| *p == pos) {
                Some(i) => {
                    items.swap_remove(i);
                    true
                }
                None => false,
            },
            NodeKind::Branch(_) => false,
        };
        if !removed {
            return false;
        }
        self.len -= 1;

        // Collapse emptied subtrees bottom-up
        for &branch in path.iter().rev() {
            if !self.try_merge(branch) {
                break;
            }
        }
        true
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        let point = pos.world_origin();
        if !self.bounds().contains(point) {
            return false;
        }
        let mut index = ROOT;
        loop {
            let node = &self.nodes[index as usize];
            match &node.kind {
                NodeKind::Branch(children) => index = children[child_slot(&node.bounds, point)],
                NodeKind::Leaf(items) => return items.contains(&pos),
            }
        }
    }

    /// Every stored coordinate whose origin lies inside `bbox`
    pub fn query_range(&self, bbox: &BoundingBox) -> Vec<ChunkPos> {
        let mut found = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.bounds.intersects(bbox) {
                continue;
            }
            match &node.kind {
                NodeKind::Branch(children) => stack.extend_from_slice(children),
                NodeKind::Leaf(items) => {
                    found.extend(items.iter().copied().filter(|p| bbox.contains(p.world_origin())));
                }
            }
        }
        found
    }

    /// Every stored coordinate within Chebyshev distance `radius` of `center`
    pub fn query_radius(&self, center: ChunkPos, radius: u32) -> Vec<ChunkPos> {
        let mut found = self.query_range(&BoundingBox::around_chunk(center, radius));
        found.retain(|p| p.chebyshev_distance(center) <= radius);
        found
    }

    fn split(&mut self, index: u32) {
        let (bounds, depth, items) = {
            let node = &mut self.nodes[index as usize];
            let items = match &mut node.kind {
                NodeKind::Leaf(items) => mem::take(items),
                NodeKind::Branch(_) => return,
            };
            (node.bounds, node.depth, items)
        };

        let mut children = [0u32; 8];
        for (slot, child) in children.iter_mut().enumerate() {
            *child = self.allocate(Node::leaf(child_bounds(&bounds, slot), depth + 1));
        }
        for pos in items {
            let child = children[child_slot(&bounds, pos.world_origin())];
            if let NodeKind::Leaf(child_items) = &mut self.nodes[child as usize].kind {
                child_items.push(pos);
            }
        }
        self.nodes[index as usize].kind = NodeKind::Branch(children);
    }

    /// Turn `index` back into a leaf when all its children are leaves that fit in one
    fn try_merge(&mut self, index: u32) -> bool {
        let children = match self.nodes[index as usize].kind {
            NodeKind::Branch(children) => children,
            NodeKind::Leaf(_) => return true,
        };

        let mut total = 0;
        for &child in &children {
            match &self.nodes[child as usize].kind {
                NodeKind::Leaf(items) => total += items.len(),
                NodeKind::Branch(_) => return false,
            }
        }
        if total > self.node_capacity {
            return false;
        }

        let mut merged = Vec::with_capacity(total);
        for &child in &children {
            if let NodeKind::Leaf(items) = &mut self.nodes[child as usize].kind {
                merged.append(items);
            }
            self.free.push(child);
        }
        self.nodes[index as usize].kind = NodeKind::Leaf(merged);
        true
    }

    fn allocate(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }
}

/// Octant of `point` within `bounds`: bit 0 = upper x, bit 1 = upper y, bit 2 = upper z
fn child_slot(bounds: &BoundingBox, point: [f64; 3]) -> usize {
    let mid = bounds.center();
    (0..3).fold(0, |slot, axis| if point[axis] >= mid[axis] { slot | (1 << axis) } else { slot })
}

fn child_bounds(bounds: &BoundingBox, slot: usize) -> BoundingBox {
    let mid = bounds.center();
    let mut min = bounds.min;
    let mut max = bounds.max;
    for axis in 0..3 {
        if slot & (1 << axis) != 0 {
            min[axis] = mid[axis];
        } else {
            max[axis] = mid[axis];
        }
    }
    BoundingBox::new(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(max_depth: u32, capacity: usize) -> Octree {
        Octree::new(BoundingBox::new([-1024.0; 3], [1024.0; 3]), max_depth, capacity)
    }

    #[test]
    fn test_split_and_merge() {
        let mut octree = tree(8, 2);
        let points: Vec<_> = (0..6).map(|i| ChunkPos::new(i, -i)).collect();
        for &p in &points {
            assert!(octree.insert(p).unwrap());
        }
        assert_eq!(octree.len(), 6);
        assert!(octree.node_count() > 1);

        for &p in &points {
            assert!(octree.remove(p));
        }
        assert!(octree.is_empty());
        assert_eq!(octree.node_count(), 1);
    }

    #[test]
    fn test_duplicate_insert_and_absent_remove() {
        let mut octree = tree(8, 4);
        assert!(octree.insert(ChunkPos::new(3, 3)).unwrap());
        assert!(!octree.insert(ChunkPos::new(3, 3)).unwrap());
        assert_eq!(octree.len(), 1);
        assert!(!octree.remove(ChunkPos::new(9, 9)));
        assert_eq!(octree.len(), 1);
    }

    #[test]
    fn test_depth_exceeded() {
        let mut octree = tree(0, 2);
        octree.insert(ChunkPos::new(0, 0)).unwrap();
        octree.insert(ChunkPos::new(1, 0)).unwrap();
        let err = octree.insert(ChunkPos::new(2, 0)).unwrap_err();
        assert_eq!(err, SpatialIndexError::DepthExceeded { depth: 0 });
        assert!(!octree.contains(ChunkPos::new(2, 0)));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut octree = tree(8, 2);
        assert!(matches!(
            octree.insert(ChunkPos::new(500, 0)),
            Err(SpatialIndexError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_query_range_boundaries_are_inclusive() {
        let mut octree = tree(8, 1);
        for x in -4..=4 {
            octree.insert(ChunkPos::new(x, 0)).unwrap();
        }
        let bbox = BoundingBox::new([-32.0, -1.0, 0.0], [32.0, 1.0, 0.0]);
        let mut found = octree.query_range(&bbox);
        found.sort();
        let expected: Vec<_> = (-2..=2).map(|x| ChunkPos::new(x, 0)).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_query_radius_is_chebyshev() {
        let mut octree = tree(8, 2);
        for x in -5..=5 {
            for z in -5..=5 {
                octree.insert(ChunkPos::new(x, z)).unwrap();
            }
        }
        let found = octree.query_radius(ChunkPos::new(1, 1), 2);
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|p| p.chebyshev_distance(ChunkPos::new(1, 1)) <= 2));
    }
}
