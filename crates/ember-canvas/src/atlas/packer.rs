use crate::coords::{IntPoint, IntRect, IntSize};

/// Binary-tree bin packer over a single fixed-size page.
///
/// Every node is a leaf (free or occupied region) or an internal node whose
/// two children come from one axis-aligned split. Each node caches
/// `available`: the largest `min(w, h)` of any free leaf below it, which lets
/// `insert` skip whole subtrees.
#[derive(Debug)]
pub struct RectPacker {
    root: Node,
}

#[derive(Debug)]
struct Node {
    bounds: IntRect,
    available: i32,
    children: Option<Box<[Node; 2]>>,
}

impl Node {
    fn leaf(bounds: IntRect, free: bool) -> Self {
        let available = if free { bounds.size().min_dim().max(0) } else { 0 };
        Self { bounds, available, children: None }
    }

    #[inline]
    fn is_free_leaf(&self) -> bool {
        self.children.is_none() && self.available > 0
    }

    fn refresh_available(&mut self) {
        if let Some(children) = &self.children {
            self.available = children[0].available.max(children[1].available);
        }
    }

    fn insert(&mut self, size: IntSize) -> Option<IntPoint> {
        if self.available < size.min_dim()
            || self.bounds.width < size.width
            || self.bounds.height < size.height
        {
            return None;
        }

        if let Some(children) = &mut self.children {
            let inserted = children[0].insert(size).or_else(|| children[1].insert(size));
            if inserted.is_some() {
                // Full subtrees keep their children so each allocation keeps
                // an exact leaf for remove.
                self.refresh_available();
            }
            return inserted;
        }

        if self.bounds.size() == size {
            self.available = 0;
            return Some(self.bounds.origin());
        }

        let b = self.bounds;
        let split = if b.width - size.width > b.height - size.height {
            [
                Node::leaf(IntRect::new(b.x, b.y, size.width, b.height), true),
                Node::leaf(IntRect::new(b.x + size.width, b.y, b.width - size.width, b.height), true),
            ]
        } else {
            [
                Node::leaf(IntRect::new(b.x, b.y, b.width, size.height), true),
                Node::leaf(IntRect::new(b.x, b.y + size.height, b.width, b.height - size.height), true),
            ]
        };
        let children = self.children.insert(Box::new(split));
        let inserted = children[0].insert(size);
        self.refresh_available();
        inserted
    }

    fn remove(&mut self, target: IntRect) -> bool {
        if self.children.is_none() {
            if self.available > 0 || !self.bounds.contains(target) {
                return false;
            }
            if self.bounds == target {
                self.available = self.bounds.size().min_dim();
                return true;
            }
            // Occupied leaf larger than the target: split around it so some
            // descendant matches exactly. Both halves stay occupied.
            // Leaves created by insert always match their allocation, so this
            // only runs for regions carved out of a larger allocation.
            let b = self.bounds;
            let split = if b.width - target.width > b.height - target.height {
                let at = if target.x - b.x > b.xmost() - target.xmost() {
                    target.x
                } else {
                    target.xmost()
                };
                [
                    Node::leaf(IntRect::new(b.x, b.y, at - b.x, b.height), false),
                    Node::leaf(IntRect::new(at, b.y, b.xmost() - at, b.height), false),
                ]
            } else {
                let at = if target.y - b.y > b.ymost() - target.ymost() {
                    target.y
                } else {
                    target.ymost()
                };
                [
                    Node::leaf(IntRect::new(b.x, b.y, b.width, at - b.y), false),
                    Node::leaf(IntRect::new(b.x, at, b.width, b.ymost() - at), false),
                ]
            };
            self.children = Some(Box::new(split));
        }

        let Some(children) = &mut self.children else { return false };
        let second = if children[0].bounds.x < children[1].bounds.x {
            target.x >= children[1].bounds.x
        } else {
            target.y >= children[1].bounds.y
        };
        let removed = children[usize::from(second)].remove(target);
        if removed {
            if children[0].is_free_leaf() && children[1].is_free_leaf() {
                self.children = None;
                self.available = self.bounds.size().min_dim();
            } else {
                self.refresh_available();
            }
        }
        removed
    }

    fn free_area(&self) -> usize {
        match &self.children {
            Some(children) => children[0].free_area() + children[1].free_area(),
            None if self.available > 0 => self.bounds.area(),
            None => 0,
        }
    }
}

impl RectPacker {
    pub fn new(size: IntSize) -> Self {
        Self { root: Node::leaf(IntRect::from_size(size), true) }
    }

    /// Allocates a region of exactly `size`; returns its top-left corner.
    pub fn insert(&mut self, size: IntSize) -> Option<IntPoint> {
        if size.is_empty() {
            return None;
        }
        self.root.insert(size)
    }

    /// Frees a region previously returned by [`insert`](Self::insert).
    ///
    /// Returns false (and changes nothing) for regions that were never
    /// allocated or were already freed.
    pub fn remove(&mut self, bounds: IntRect) -> bool {
        if bounds.is_empty() || !self.root.bounds.contains(bounds) {
            return false;
        }
        self.root.remove(bounds)
    }

    #[inline]
    pub fn bounds(&self) -> IntRect {
        self.root.bounds
    }

    /// Upper bound on the smaller side of any allocatable region.
    #[inline]
    pub fn available(&self) -> i32 {
        self.root.available
    }

    /// True when nothing is allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_free_leaf()
    }

    /// Total free texels.
    pub fn free_area(&self) -> usize {
        self.root.free_area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sz(w: i32, h: i32) -> IntSize { IntSize::new(w, h) }

    // ── insert ────────────────────────────────────────────────────────────

    #[test]
    fn fills_row_left_to_right() {
        let mut p = RectPacker::new(sz(256, 256));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(0, 0)));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(64, 0)));
    }

    #[test]
    fn removed_region_is_reused_first() {
        let mut p = RectPacker::new(sz(256, 256));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(0, 0)));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(64, 0)));
        assert!(p.remove(IntRect::new(0, 0, 64, 64)));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(0, 0)));
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut p = RectPacker::new(sz(128, 128));
        assert_eq!(p.insert(sz(129, 1)), None);
        assert_eq!(p.insert(sz(0, 4)), None);
        assert!(p.is_empty());
    }

    #[test]
    fn exact_page_fill_then_full() {
        let mut p = RectPacker::new(sz(64, 64));
        assert_eq!(p.insert(sz(64, 64)), Some(IntPoint::new(0, 0)));
        assert_eq!(p.available(), 0);
        assert_eq!(p.insert(sz(1, 1)), None);
    }

    // ── remove ────────────────────────────────────────────────────────────

    #[test]
    fn double_remove_is_noop() {
        let mut p = RectPacker::new(sz(256, 256));
        let a = p.insert(sz(32, 16)).unwrap();
        let b = p.insert(sz(16, 16)).unwrap();
        let ra = IntRect::from_origin_size(a, sz(32, 16));
        assert!(p.remove(ra));
        let free_after = p.free_area();
        assert!(!p.remove(ra));
        assert_eq!(p.free_area(), free_after);
        assert!(p.remove(IntRect::from_origin_size(b, sz(16, 16))));
    }

    #[test]
    fn remove_of_never_allocated_region_fails() {
        let mut p = RectPacker::new(sz(256, 256));
        assert!(!p.remove(IntRect::new(0, 0, 8, 8)));
        p.insert(sz(64, 64)).unwrap();
        assert!(!p.remove(IntRect::new(100, 100, 8, 8)));
    }

    #[test]
    fn remove_everything_coalesces_to_empty() {
        let mut p = RectPacker::new(sz(256, 256));
        let rects: Vec<IntRect> = [sz(64, 32), sz(10, 90), sz(128, 128), sz(7, 7)]
            .into_iter()
            .map(|s| IntRect::from_origin_size(p.insert(s).unwrap(), s))
            .collect();
        for r in rects.iter().rev() {
            assert!(p.remove(*r));
        }
        assert!(p.is_empty());
        assert_eq!(p.free_area(), 256 * 256);
    }

    #[test]
    fn full_page_frees_single_quadrant() {
        let mut p = RectPacker::new(sz(64, 64));
        let mut rects = Vec::new();
        for _ in 0..4 {
            rects.push(IntRect::from_origin_size(p.insert(sz(32, 32)).unwrap(), sz(32, 32)));
        }
        assert_eq!(p.available(), 0);
        assert!(p.remove(rects[2]));
        assert_eq!(p.free_area(), 32 * 32);
        assert_eq!(p.insert(sz(32, 32)), Some(rects[2].origin()));
    }

    #[test]
    fn insert_remove_restores_free_area() {
        let mut p = RectPacker::new(sz(512, 512));
        p.insert(sz(100, 30)).unwrap();
        let before = p.free_area();
        let at = p.insert(sz(40, 40)).unwrap();
        assert_eq!(p.free_area(), before - 1600);
        assert!(p.remove(IntRect::from_origin_size(at, sz(40, 40))));
        assert_eq!(p.free_area(), before);
        assert!(p.insert(sz(40, 40)).is_some());
    }

    // ── randomized ────────────────────────────────────────────────────────

    #[test]
    fn random_allocations_never_overlap() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let page = IntRect::new(0, 0, 1024, 1024);
        let mut p = RectPacker::new(page.size());
        let mut live: Vec<IntRect> = Vec::new();

        for step in 0..2000 {
            if !live.is_empty() && rng.gen_bool(0.35) {
                let r = live.swap_remove(rng.gen_range(0..live.len()));
                assert!(p.remove(r), "step {step}: failed to remove {r:?}");
                continue;
            }
            let s = sz(rng.gen_range(1..=96), rng.gen_range(1..=96));
            if let Some(at) = p.insert(s) {
                let r = IntRect::from_origin_size(at, s);
                assert!(page.contains(r), "step {step}: {r:?} escapes the page");
                for other in &live {
                    assert!(!r.intersects(*other), "step {step}: {r:?} overlaps {other:?}");
                }
                live.push(r);
            }
        }

        let used: usize = live.iter().map(|r| r.area()).sum();
        assert_eq!(p.free_area(), page.area() - used);
        for r in live.drain(..) {
            assert!(p.remove(r));
        }
        assert!(p.is_empty());
    }
}
