//! Rectangles and rectangle sets
//!
//! [`Rect`] is the axis-aligned rectangle used for window, client, monitor
//! and damage geometry. [`Region`] is a set of non-overlapping rectangles
//! used for accumulated damage and window clip shapes.
//!
//! # Example
//!
//! ```
//! use wlbridge::geometry::{Rect, Region};
//!
//! let mut damage = Region::new();
//! damage.union_rect(Rect::new(0, 0, 50, 50));
//! damage.union_rect(Rect::new(25, 25, 50, 50));
//!
//! assert_eq!(damage.area(), 50 * 50 * 2 - 25 * 25);
//! assert_eq!(damage.bounds(), Rect::new(0, 0, 75, 75));
//! ```

/// An axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// X coordinate (pixels)
    pub x: i32,
    /// Y coordinate (pixels)
    pub y: i32,
    /// Width (pixels)
    pub width: u32,
    /// Height (pixels)
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle from two corners, in any order
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let x = x1.min(x2);
        let y = y1.min(y2);
        let width = (x1.max(x2) - x) as u32;
        let height = (y1.max(y2) - y) as u32;

        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of the given size anchored at the origin
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Area in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Two rectangles intersect if they share any pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }

    /// Returns `None` if the rectangles don't intersect.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }

        Some(Rect::from_corners(
            self.x.max(other.x),
            self.y.max(other.y),
            self.right().min(other.right()),
            self.bottom().min(other.bottom()),
        ))
    }

    /// Smallest rectangle containing both. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Returns this rectangle moved by the given offset
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Checks if this rectangle completely contains another
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Splits `self` minus `other` into at most four disjoint pieces.
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let Some(cut) = self.intersection(other) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };

        let mut pieces = Vec::with_capacity(4);
        // Full-width bands above and below the cut
        if cut.y > self.y {
            pieces.push(Rect::from_corners(self.x, self.y, self.right(), cut.y));
        }
        if cut.bottom() < self.bottom() {
            pieces.push(Rect::from_corners(self.x, cut.bottom(), self.right(), self.bottom()));
        }
        // Left and right remainders within the cut's rows
        if cut.x > self.x {
            pieces.push(Rect::from_corners(self.x, cut.y, cut.x, cut.bottom()));
        }
        if cut.right() < self.right() {
            pieces.push(Rect::from_corners(cut.right(), cut.y, self.right(), cut.bottom()));
        }
        pieces
    }
}

/// A set of pixels described by non-overlapping rectangles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.union_rect(rect);
        region
    }

    pub fn from_rects<I: IntoIterator<Item = Rect>>(rects: I) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.union_rect(rect);
        }
        region
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Total number of pixels covered
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Bounding box, or an empty rectangle for an empty region
    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, rect| acc.union(rect))
    }

    /// Adds a rectangle, keeping the set non-overlapping
    pub fn union_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        let mut pieces = vec![rect];
        for existing in &self.rects {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| piece.subtract(existing))
                .collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    pub fn subtract_rect(&mut self, rect: &Rect) {
        self.rects = self
            .rects
            .iter()
            .flat_map(|existing| existing.subtract(rect))
            .collect();
    }

    pub fn intersect_rect(&self, rect: &Rect) -> Region {
        Region {
            rects: self
                .rects
                .iter()
                .filter_map(|existing| existing.intersection(rect))
                .collect(),
        }
    }

    /// Both operands are disjoint sets, so pairwise intersections stay disjoint.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(cut) = a.intersection(b) {
                    rects.push(cut);
                }
            }
        }
        Region { rects }
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for rect in &mut self.rects {
            *rect = rect.translate(dx, dy);
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|rect| rect.contains_point(x, y))
    }

    /// Whether the region is exactly one rectangle equal to `rect`
    pub fn is_rect(&self, rect: &Rect) -> bool {
        self.rects.len() == 1 && self.rects[0] == *rect
    }

    /// Collapses to the bounding box once more than `limit` rectangles pile up.
    ///
    /// Only valid for damage, where over-reporting is harmless.
    pub fn coalesce_if_over(&mut self, limit: usize) {
        if self.rects.len() > limit {
            let bounds = self.bounds();
            self.rects.clear();
            self.rects.push(bounds);
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rect_area_and_edges() {
        let rect = Rect::new(10, 20, 100, 50);
        assert_eq!(rect.area(), 5000);
        assert_eq!(rect.right(), 110);
        assert_eq!(rect.bottom(), 70);
    }

    #[test]
    fn test_rect_intersection() {
        let r1 = Rect::new(0, 0, 100, 100);
        let r2 = Rect::new(50, 50, 100, 100);

        assert!(r1.intersects(&r2));
        assert_eq!(r1.intersection(&r2), Some(Rect::new(50, 50, 50, 50)));

        let r3 = Rect::new(200, 200, 50, 50);
        assert!(r1.intersection(&r3).is_none());
    }

    #[test]
    fn test_touching_rects_do_not_intersect() {
        let left = Rect::new(0, 0, 10, 10);
        let right = Rect::new(10, 0, 10, 10);
        assert!(!left.intersects(&right));
    }

    #[test]
    fn test_empty_rect_never_intersects() {
        let empty = Rect::new(5, 5, 0, 10);
        assert!(!empty.intersects(&Rect::new(0, 0, 100, 100)));
    }

    #[test]
    fn test_rect_union_ignores_empty() {
        let rect = Rect::new(10, 10, 5, 5);
        assert_eq!(Rect::default().union(&rect), rect);
        assert_eq!(rect.union(&Rect::default()), rect);
        assert_eq!(
            rect.union(&Rect::new(0, 0, 1, 1)),
            Rect::new(0, 0, 15, 15)
        );
    }

    #[test]
    fn test_rect_from_corners_reversed() {
        let rect = Rect::from_corners(110, 70, 10, 20);
        assert_eq!(rect, Rect::new(10, 20, 100, 50));
    }

    #[test]
    fn test_rect_subtract_center_hole() {
        let outer = Rect::new(0, 0, 30, 30);
        let hole = Rect::new(10, 10, 10, 10);
        let pieces = outer.subtract(&hole);

        assert_eq!(pieces.len(), 4);
        let area: u64 = pieces.iter().map(Rect::area).sum();
        assert_eq!(area, 900 - 100);
        assert!(pieces.iter().all(|p| !p.intersects(&hole)));
    }

    #[test]
    fn test_region_union_is_disjoint() {
        let mut region = Region::new();
        region.union_rect(Rect::new(0, 0, 10, 10));
        region.union_rect(Rect::new(5, 5, 10, 10));
        region.union_rect(Rect::new(0, 0, 10, 10));

        assert_eq!(region.area(), 100 + 100 - 25);
        for (i, a) in region.rects().iter().enumerate() {
            for b in &region.rects()[i + 1..] {
                assert!(!a.intersects(b));
            }
        }
    }

    #[test]
    fn test_region_intersect_rect() {
        let region = Region::from_rects([Rect::new(0, 0, 10, 10), Rect::new(20, 0, 10, 10)]);
        let clipped = region.intersect_rect(&Rect::new(5, 0, 20, 5));
        assert_eq!(clipped.area(), 5 * 5 + 5 * 5);
    }

    #[test]
    fn test_region_subtract_rect() {
        let mut region = Region::from_rect(Rect::new(0, 0, 10, 10));
        region.subtract_rect(&Rect::new(0, 0, 10, 5));
        assert_eq!(region.bounds(), Rect::new(0, 5, 10, 5));
    }

    #[test]
    fn test_region_coalesce() {
        let mut region = Region::new();
        for i in 0..20 {
            region.union_rect(Rect::new(i * 20, 0, 10, 10));
        }
        region.coalesce_if_over(16);
        assert_eq!(region.rects().len(), 1);
        assert_eq!(region.bounds(), Rect::new(0, 0, 390, 10));
    }

    #[test]
    fn test_region_is_rect() {
        let rect = Rect::new(0, 0, 8, 8);
        assert!(Region::from_rect(rect).is_rect(&rect));
        assert!(!Region::new().is_rect(&rect));
    }

    fn arb_rect() -> impl Strategy<Value = Rect> {
        (-50i32..50, -50i32..50, 0u32..60, 0u32..60)
            .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }

    proptest! {
        #[test]
        fn prop_union_area_never_exceeds_sum(rects in prop::collection::vec(arb_rect(), 0..8)) {
            let region = Region::from_rects(rects.iter().copied());
            let sum: u64 = rects.iter().map(Rect::area).sum();
            prop_assert!(region.area() <= sum);
        }

        #[test]
        fn prop_union_covers_every_input_pixel(rects in prop::collection::vec(arb_rect(), 1..5), px in -50i32..110, py in -50i32..110) {
            let region = Region::from_rects(rects.iter().copied());
            let inside_any = rects.iter().any(|r| r.contains_point(px, py));
            prop_assert_eq!(region.contains_point(px, py), inside_any);
        }

        #[test]
        fn prop_intersection_is_commutative_in_area(a in arb_rect(), b in arb_rect()) {
            let ab = Region::from_rect(a).intersect(&Region::from_rect(b));
            let ba = Region::from_rect(b).intersect(&Region::from_rect(a));
            prop_assert_eq!(ab.area(), ba.area());
        }
    }
}
