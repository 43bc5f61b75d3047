/// Essential (Dirichlet) boundary conditions
pub mod essential_bc;
/// Lagrange shape functions and Gauss-Legendre quadrature
pub mod shape_fns;

use crate::mesh::elem::{Point, Rect};
use crate::mesh::{Mesh, MeshError, MAX_POLYNOMIAL_ORDER};
use essential_bc::EssentialBCs;
use nalgebra::DVector;
use shape_fns::lagrange_value;
use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn node_key(x: f64, y: f64) -> (i64, i64) {
    ((x * 1e9).round() as i64, (y * 1e9).round() as i64)
}

/// An active Elem as seen by an [H1Space]: its geometry, expansion degree, and
/// global node indices
///
/// Nodes are laid out row-major on the `(degree + 1)^2` uniform grid of the
/// Elem's rectangle: node `(i, j)` is at index `j * (degree + 1) + i`, with `i`
/// increasing along x and `j` along y.
#[derive(Debug, Clone)]
pub struct SpaceElem {
    /// The id of the corresponding Elem in the originating Mesh
    pub mesh_id: usize,
    pub rect: Rect,
    pub degree: u8,
    /// Material marker carried over from the Mesh, for material-aware assemblers
    pub material: String,
    pub nodes: Vec<usize>,
}

impl SpaceElem {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Classification of a global node in the DoF enumeration
#[derive(Debug, Clone)]
pub enum NodeClass {
    /// A free DoF with its index into the coefficient vector
    Unknown(usize),
    /// Fixed by an essential boundary condition; retains the prescribed value
    Fixed(f64),
    /// A hanging node: its value is a weighted combination of the nodes on the
    /// coarse side of the edge it hangs on
    Constrained(SmallVec<[(usize, f64); 4]>),
}

/// A global node: its position and classification
#[derive(Debug, Clone)]
pub struct SpaceNode {
    pub pos: Point,
    pub class: NodeClass,
}

/// The expansion of a node into free DoFs and a fixed contribution
///
/// `value(coeffs) = sum of coeffs[dof] * weight over dofs + fixed_value`.
/// `fixed_weight` is the total weight multiplying prescribed boundary values,
/// used by assemblers that need the time derivative of the constrained part.
#[derive(Debug, Clone, Default)]
pub struct NodeExpansion {
    pub dofs: SmallVec<[(usize, f64); 4]>,
    pub fixed_value: f64,
    pub fixed_weight: f64,
}

/// A continuous piecewise-polynomial function space over the active Elems of a
/// [Mesh]
///
/// An `H1Space` is an immutable snapshot: it owns copies of the geometry and
/// degree data it was built from and holds no reference back to the Mesh.
/// When the Mesh's topology changes, dependent spaces are discarded and
/// rebuilt. The one sanctioned in-place mutation is
/// [`update_essential_bc_values`](H1Space::update_essential_bc_values), which
/// re-evaluates time-dependent prescribed values without touching the DoF
/// enumeration.
#[derive(Clone)]
pub struct H1Space {
    pub elems: Vec<SpaceElem>,
    pub nodes: Vec<SpaceNode>,
    /// (node index, bc index) pairs for re-evaluating prescribed values
    fixed_nodes: Vec<(usize, usize)>,
    bcs: Arc<EssentialBCs>,
    ndof: usize,
}

impl H1Space {
    /// Construct a space over the active Elems of `mesh`, classifying DoFs
    /// against the essential conditions evaluated at `time`
    pub fn new(mesh: &Mesh, bcs: Arc<EssentialBCs>, time: f64) -> Result<Self, MeshError> {
        Self::build(mesh, bcs, 0, time)
    }

    /// Construct the reference companion space over an (independently created)
    /// reference mesh, with every Elem's degree raised by `order_increase`
    pub fn reference(
        ref_mesh: &Mesh,
        bcs: Arc<EssentialBCs>,
        order_increase: u8,
        time: f64,
    ) -> Result<Self, MeshError> {
        Self::build(ref_mesh, bcs, order_increase, time)
    }

    fn build(
        mesh: &Mesh,
        bcs: Arc<EssentialBCs>,
        order_increase: u8,
        time: f64,
    ) -> Result<Self, MeshError> {
        if mesh.num_active_elems() == 0 {
            return Err(MeshError::EmptyMesh);
        }

        let mut nodes: Vec<SpaceNode> = Vec::new();
        let mut lookup: BTreeMap<(i64, i64), usize> = BTreeMap::new();
        let mut elems: Vec<SpaceElem> = Vec::new();
        let mut elem_side_markers: Vec<[Option<usize>; 4]> = Vec::new();

        for active in mesh.active_elems() {
            let degree = active
                .degree
                .saturating_add(order_increase)
                .clamp(1, MAX_POLYNOMIAL_ORDER);
            let rect = mesh.elem_rect(active.id);
            let n = degree as usize + 1;

            let mut elem_nodes = Vec::with_capacity(n * n);
            for j in 0..n {
                for i in 0..n {
                    let pos = rect.map(i as f64 / degree as f64, j as f64 / degree as f64);
                    let key = node_key(pos.x, pos.y);
                    let node_idx = *lookup.entry(key).or_insert_with(|| {
                        nodes.push(SpaceNode {
                            pos,
                            class: NodeClass::Unknown(usize::MAX),
                        });
                        nodes.len() - 1
                    });
                    elem_nodes.push(node_idx);
                }
            }

            elems.push(SpaceElem {
                mesh_id: active.id,
                rect,
                degree,
                material: active.material.clone(),
                nodes: elem_nodes,
            });
            elem_side_markers.push(active.side_markers);
        }

        // classify boundary nodes fixed by essential conditions
        let mut fixed_nodes: Vec<(usize, usize)> = Vec::new();
        let mut is_fixed: BTreeSet<usize> = BTreeSet::new();
        for (elem, side_markers) in elems.iter().zip(elem_side_markers.iter()) {
            for (side, marker) in side_markers.iter().enumerate() {
                let bc_idx = marker
                    .and_then(|m| bcs.find(&mesh.boundary_markers[m]));
                if let Some(bc_idx) = bc_idx {
                    for node_idx in side_nodes(elem, side) {
                        if is_fixed.insert(node_idx) {
                            let pos = nodes[node_idx].pos;
                            let value = bcs.get(bc_idx).value(pos.x, pos.y, time);
                            nodes[node_idx].class = NodeClass::Fixed(value);
                            fixed_nodes.push((node_idx, bc_idx));
                        }
                    }
                }
            }
        }

        // classify hanging nodes: a node lying on a master side of an Elem it
        // does not belong to is constrained to that side's Lagrange trace
        let elem_node_keys: Vec<BTreeSet<(i64, i64)>> = elems
            .iter()
            .map(|elem| {
                elem.nodes
                    .iter()
                    .map(|idx| node_key(nodes[*idx].pos.x, nodes[*idx].pos.y))
                    .collect()
            })
            .collect();

        let mut node_owners: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); nodes.len()];
        for (elem_idx, elem) in elems.iter().enumerate() {
            for idx in &elem.nodes {
                if !node_owners[*idx].contains(&elem_idx) {
                    node_owners[*idx].push(elem_idx);
                }
            }
        }

        let mut constraints: Vec<(usize, SmallVec<[(usize, f64); 4]>)> = Vec::new();
        for (node_idx, node) in nodes.iter().enumerate() {
            if is_fixed.contains(&node_idx) {
                continue;
            }
            let key = node_key(node.pos.x, node.pos.y);

            'elem_search: for (elem_idx, elem) in elems.iter().enumerate() {
                for side in 0..4 {
                    let t = match side_param(elem, side, node.pos) {
                        Some(t) => t,
                        None => continue,
                    };
                    if !elem_node_keys[elem_idx].contains(&key)
                        && side_is_master(&elems, &node_owners[node_idx], elem_idx, side, node.pos)
                    {
                        let trace = side_nodes(elem, side);
                        let weights = trace
                            .iter()
                            .enumerate()
                            .map(|(k, trace_idx)| {
                                (*trace_idx, lagrange_value(elem.degree, k, t))
                            })
                            .collect();
                        constraints.push((node_idx, weights));
                        break 'elem_search;
                    }
                }
            }
        }
        for (node_idx, weights) in constraints {
            nodes[node_idx].class = NodeClass::Constrained(weights);
        }

        // remaining nodes are free DoFs, numbered in creation order
        let mut ndof = 0;
        for node in nodes.iter_mut() {
            if let NodeClass::Unknown(dof) = &mut node.class {
                *dof = ndof;
                ndof += 1;
            }
        }

        Ok(Self {
            elems,
            nodes,
            fixed_nodes,
            bcs,
            ndof,
        })
    }

    /// The number of free DoFs (unknowns) in this space
    pub fn num_dofs(&self) -> usize {
        self.ndof
    }

    /// Re-evaluate all time-dependent prescribed boundary values in place
    pub fn update_essential_bc_values(&mut self, time: f64) {
        for (node_idx, bc_idx) in &self.fixed_nodes {
            let pos = self.nodes[*node_idx].pos;
            let value = self.bcs.get(*bc_idx).value(pos.x, pos.y, time);
            self.nodes[*node_idx].class = NodeClass::Fixed(value);
        }
    }

    /// Resolve a node's value from a coefficient vector
    pub fn node_value(&self, node_idx: usize, coeffs: &DVector<f64>) -> f64 {
        match &self.nodes[node_idx].class {
            NodeClass::Unknown(dof) => coeffs[*dof],
            NodeClass::Fixed(value) => *value,
            NodeClass::Constrained(weights) => weights
                .iter()
                .map(|(idx, w)| w * self.node_value(*idx, coeffs))
                .sum(),
        }
    }

    /// Expand a node into free DoFs and its fixed contribution
    pub fn node_expansion(&self, node_idx: usize) -> NodeExpansion {
        match &self.nodes[node_idx].class {
            NodeClass::Unknown(dof) => NodeExpansion {
                dofs: smallvec![(*dof, 1.0)],
                fixed_value: 0.0,
                fixed_weight: 0.0,
            },
            NodeClass::Fixed(value) => NodeExpansion {
                dofs: SmallVec::new(),
                fixed_value: *value,
                fixed_weight: 1.0,
            },
            NodeClass::Constrained(weights) => {
                let mut expansion = NodeExpansion::default();
                for (idx, w) in weights {
                    let inner = self.node_expansion(*idx);
                    for (dof, inner_w) in inner.dofs {
                        expansion.dofs.push((dof, w * inner_w));
                    }
                    expansion.fixed_value += w * inner.fixed_value;
                    expansion.fixed_weight += w * inner.fixed_weight;
                }
                expansion
            }
        }
    }

    /// All local node values of an element, resolved from a coefficient vector
    pub fn element_values(&self, elem_idx: usize, coeffs: &DVector<f64>) -> Vec<f64> {
        self.elems[elem_idx]
            .nodes
            .iter()
            .map(|node_idx| self.node_value(*node_idx, coeffs))
            .collect()
    }

    /// The index of an active element containing the point, if any
    pub fn find_elem(&self, x: f64, y: f64) -> Option<usize> {
        self.elems.iter().position(|elem| elem.rect.contains(x, y))
    }
}

/// The global node indices along one side of an element, ordered by increasing
/// coordinate. Sides are indexed S = 0, E = 1, N = 2, W = 3.
fn side_nodes(elem: &SpaceElem, side: usize) -> Vec<usize> {
    let n = elem.degree as usize + 1;
    (0..n)
        .map(|k| match side {
            0 => elem.nodes[k],                 // j = 0
            1 => elem.nodes[k * n + (n - 1)],   // i = max
            2 => elem.nodes[(n - 1) * n + k],   // j = max
            _ => elem.nodes[k * n],             // i = 0
        })
        .collect()
}

/// Whether the given side of `elems[master_idx]` may constrain a node owned by
/// the elements in `owners`
///
/// Constraints run from fine sides to coarse: a side constrains a node only if
/// every collinear side of the node's own elements is strictly shorter, or of
/// equal length with a higher degree. The resulting strict ordering keeps
/// constraint chains finite, so mixed-degree neighbors cannot constrain each
/// other's edge nodes cyclically.
fn side_is_master(
    elems: &[SpaceElem],
    owners: &[usize],
    master_idx: usize,
    side: usize,
    pos: Point,
) -> bool {
    let eps = 1e-9;
    let master = &elems[master_idx];
    let master_extent = side_extent(master, side);

    let mut comparable = false;
    for owner_idx in owners {
        let owner = &elems[*owner_idx];
        for owner_side in 0..4 {
            if !sides_collinear(master, side, owner, owner_side)
                || side_param(owner, owner_side, pos).is_none()
            {
                continue;
            }
            comparable = true;
            let owner_extent = side_extent(owner, owner_side);
            let coarser = master_extent > owner_extent + eps;
            let same_extent = (master_extent - owner_extent).abs() < eps;
            if !coarser && !(same_extent && master.degree < owner.degree) {
                return false;
            }
        }
    }
    comparable
}

fn side_extent(elem: &SpaceElem, side: usize) -> f64 {
    match side {
        0 | 2 => elem.rect.x1 - elem.rect.x0,
        _ => elem.rect.y1 - elem.rect.y0,
    }
}

/// The orientation and fixed coordinate of the line a side lies on
fn side_line(elem: &SpaceElem, side: usize) -> (bool, f64) {
    match side {
        0 => (true, elem.rect.y0),
        2 => (true, elem.rect.y1),
        1 => (false, elem.rect.x1),
        _ => (false, elem.rect.x0),
    }
}

fn sides_collinear(a: &SpaceElem, a_side: usize, b: &SpaceElem, b_side: usize) -> bool {
    let (a_horiz, a_line) = side_line(a, a_side);
    let (b_horiz, b_line) = side_line(b, b_side);
    a_horiz == b_horiz && (a_line - b_line).abs() < 1e-9
}

/// If `pos` lies on the given side of `elem`, return its normalized parameter
/// along the side
fn side_param(elem: &SpaceElem, side: usize, pos: Point) -> Option<f64> {
    let rect = &elem.rect;
    let eps = 1e-9;
    let (fixed, coord, lo, hi) = match side {
        0 => (rect.y0, pos.x, rect.x0, rect.x1),
        1 => (rect.x1, pos.y, rect.y0, rect.y1),
        2 => (rect.y1, pos.x, rect.x0, rect.x1),
        _ => (rect.x0, pos.y, rect.y0, rect.y1),
    };
    let on_line = match side {
        0 | 2 => (pos.y - fixed).abs() < eps,
        _ => (pos.x - fixed).abs() < eps,
    };
    if on_line && coord > lo - eps && coord < hi + eps {
        Some((coord - lo) / (hi - lo))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::essential_bc::EssentialBC;
    use super::*;

    fn unit_mesh(n: usize) -> Mesh {
        Mesh::rectangle(0.0, 0.0, 1.0, 1.0, n, n, "Bdy")
    }

    #[test]
    fn dof_counts_without_boundary_conditions() {
        let space = H1Space::new(&unit_mesh(2), Arc::new(EssentialBCs::empty()), 0.0).unwrap();
        assert_eq!(space.num_dofs(), 9);

        let mut p2_mesh = unit_mesh(2);
        p2_mesh.set_uniform_order(2);
        let p2_space = H1Space::new(&p2_mesh, Arc::new(EssentialBCs::empty()), 0.0).unwrap();
        assert_eq!(p2_space.num_dofs(), 25);
    }

    #[test]
    fn essential_conditions_remove_boundary_dofs() {
        let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::constant("Bdy", 0.0)]));
        let space = H1Space::new(&unit_mesh(2), bcs.clone(), 0.0).unwrap();
        assert_eq!(space.num_dofs(), 1);

        let mut p2_mesh = unit_mesh(2);
        p2_mesh.set_uniform_order(2);
        let p2_space = H1Space::new(&p2_mesh, bcs, 0.0).unwrap();
        assert_eq!(p2_space.num_dofs(), 9);
    }

    #[test]
    fn hanging_nodes_are_constrained() {
        let mut mesh = unit_mesh(2);
        mesh.refine_elem(0, crate::mesh::refinement::HRef::T).unwrap();

        let space = H1Space::new(&mesh, Arc::new(EssentialBCs::empty()), 0.0).unwrap();
        let constrained = space
            .nodes
            .iter()
            .filter(|node| matches!(node.class, NodeClass::Constrained(_)))
            .count();
        assert_eq!(constrained, 2);
        assert_eq!(space.num_dofs(), 12);

        // hanging node values interpolate the coarse edge trace
        let coeffs = DVector::from_fn(space.num_dofs(), |dof, _| {
            let node = space
                .nodes
                .iter()
                .find(|n| matches!(n.class, NodeClass::Unknown(d) if d == dof))
                .unwrap();
            node.pos.x + node.pos.y
        });
        for (node_idx, node) in space.nodes.iter().enumerate() {
            if matches!(node.class, NodeClass::Constrained(_)) {
                let value = space.node_value(node_idx, &coeffs);
                assert!((value - (node.pos.x + node.pos.y)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn hanging_nodes_with_boundary_conditions() {
        let mut mesh = unit_mesh(2);
        mesh.refine_elem(0, crate::mesh::refinement::HRef::T).unwrap();

        let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::constant("Bdy", 0.0)]));
        let space = H1Space::new(&mesh, bcs, 0.0).unwrap();
        assert_eq!(space.num_dofs(), 2);
    }

    #[test]
    fn mixed_degree_neighbors_hang_on_the_lower_degree_trace() {
        let mut mesh = Mesh::rectangle(0.0, 0.0, 2.0, 1.0, 2, 1, "Bdy");
        mesh.set_elem_order(0, 3).unwrap();
        mesh.set_elem_order(1, 2).unwrap();

        let space = H1Space::new(&mesh, Arc::new(EssentialBCs::empty()), 0.0).unwrap();

        // only the p = 3 side's two extra edge nodes are constrained; the p = 2
        // mid-edge node stays a free DoF
        let constrained: Vec<usize> = space
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.class, NodeClass::Constrained(_)))
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(constrained.len(), 2);
        assert_eq!(space.num_dofs(), 21);

        let coeffs = DVector::from_fn(space.num_dofs(), |dof, _| {
            let node = space
                .nodes
                .iter()
                .find(|n| matches!(n.class, NodeClass::Unknown(d) if d == dof))
                .unwrap();
            node.pos.x + node.pos.y
        });
        for node_idx in constrained {
            let node = &space.nodes[node_idx];
            // resolution terminates and reproduces the linear trace
            let value = space.node_value(node_idx, &coeffs);
            assert!((value - (node.pos.x + node.pos.y)).abs() < 1e-12);
        }
    }

    #[test]
    fn time_dependent_values_update_in_place() {
        let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::time_dependent(
            "Bdy",
            |x, y, t| x + y + t,
        )]));
        let mut space = H1Space::new(&unit_mesh(2), bcs, 0.0).unwrap();

        let ndof_before = space.num_dofs();
        space.update_essential_bc_values(0.5);
        assert_eq!(space.num_dofs(), ndof_before);

        for node in &space.nodes {
            if let NodeClass::Fixed(value) = node.class {
                assert!((value - (node.pos.x + node.pos.y + 0.5)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn dof_count_round_trips_through_refinement() {
        let mut mesh = unit_mesh(2);
        let bcs = Arc::new(EssentialBCs::empty());
        let base_dofs = H1Space::new(&mesh, bcs.clone(), 0.0).unwrap().num_dofs();

        mesh.refine_all_elements(1).unwrap();
        let refined_dofs = H1Space::new(&mesh, bcs.clone(), 0.0).unwrap().num_dofs();
        assert!(refined_dofs > base_dofs);

        mesh.unrefine_all_elements();
        let restored_dofs = H1Space::new(&mesh, bcs, 0.0).unwrap().num_dofs();
        assert_eq!(restored_dofs, base_dofs);
    }

    #[test]
    fn reference_space_raises_degree() {
        let mut mesh = unit_mesh(2);
        mesh.set_uniform_order(2);
        let ref_mesh = mesh.create_reference_mesh().unwrap();
        let space = H1Space::reference(&ref_mesh, Arc::new(EssentialBCs::empty()), 1, 0.0).unwrap();

        for elem in &space.elems {
            assert_eq!(elem.degree, 3);
        }
        // 4x4 active elems at degree 3: a 13x13 conforming grid
        assert_eq!(space.num_dofs(), 169);
    }
}
