use super::refinement::{HLevels, HRef};
use smallvec::SmallVec;

/// A Point in Real Space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle in Real Space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let eps = 1e-12 * (self.width() + self.height());
        x >= self.x0 - eps && x <= self.x1 + eps && y >= self.y0 - eps && y <= self.y1 + eps
    }

    /// Map parametric coordinates (u, v) in [0, 1]^2 to Real Space
    pub fn map(&self, u: f64, v: f64) -> Point {
        Point::new(self.x0 + u * self.width(), self.y0 + v * self.height())
    }
}

/// Side index of an [Elem]: South = 0, East = 1, North = 2, West = 3
///
/// ```text
///               N
///         2 --------- 3
///         |           |
///      W  |           |  E
///         |           |
///         0 --------- 1
///               S
/// ```
pub const NUM_SIDES: usize = 4;

/// `Elem`s are the basic geometric unit of the `Mesh`
///
/// `Elem`s keep track of:
/// * their corner vertex indices (SW, SE, NW, NE)
/// * their material marker and per-side boundary markers
/// * their parent `Elem` and child `Elem`s (h-refinement state)
/// * their polynomial expansion degree (p-refinement state)
///
/// Active `Elem`s are those without children.
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    /// Corner vertex indices: SW, SE, NW, NE
    pub vertices: [usize; 4],
    /// Material marker name (empty when the mesh has a single material)
    pub material: String,
    /// Boundary marker index on each side (S, E, N, W); `None` for interior sides
    pub side_markers: [Option<usize>; NUM_SIDES],
    pub h_levels: HLevels,
    /// Polynomial expansion degree; always >= 1
    pub degree: u8,
    pub parent: Option<usize>,
    children: Option<(HRef, SmallVec<[usize; 4]>)>,
}

impl Elem {
    pub fn new(
        id: usize,
        vertices: [usize; 4],
        material: String,
        side_markers: [Option<usize>; NUM_SIDES],
    ) -> Self {
        Self {
            id,
            vertices,
            material,
            side_markers,
            h_levels: HLevels::default(),
            degree: 1,
            parent: None,
            children: None,
        }
    }

    /// Construct a child Elem inheriting material, degree, and the applicable
    /// side markers from its parent
    pub(super) fn child_of(
        parent: &Elem,
        id: usize,
        vertices: [usize; 4],
        side_markers: [Option<usize>; NUM_SIDES],
        refinement: HRef,
    ) -> Self {
        Self {
            id,
            vertices,
            material: parent.material.clone(),
            side_markers,
            h_levels: parent.h_levels.refined(refinement),
            degree: parent.degree,
            parent: Some(parent.id),
            children: None,
        }
    }

    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> Option<&(HRef, SmallVec<[usize; 4]>)> {
        self.children.as_ref()
    }

    pub(super) fn set_children(&mut self, refinement: HRef, ids: SmallVec<[usize; 4]>) {
        self.children = Some((refinement, ids));
    }

    pub(super) fn clear_children(&mut self) {
        self.children = None;
    }

    /// Does any side of this Elem carry the given boundary marker index?
    pub fn touches_boundary(&self, marker_idx: usize) -> bool {
        self.side_markers.iter().any(|m| *m == Some(marker_idx))
    }
}
