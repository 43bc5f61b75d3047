/// The basic geometric unit of a Mesh
pub mod elem;
/// Structures describing h-refinements and derefinement methods
pub mod refinement;

use elem::{Elem, Point, Rect, NUM_SIDES};
use refinement::HRef;

use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::read_to_string;

/// Minimum Elem edge length. h-Refinements will fail once edges are smaller than this value.
pub const MIN_EDGE_LENGTH: f64 = 3.0518e-5; // 15ish refinement layers with unit sized cells

/// Maximum polynomial expansion degree. Degree adjustments are clamped to this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 10;

/// Coordinate quantization for vertex deduplication
fn coord_key(x: f64, y: f64) -> (i64, i64) {
    ((x * 1e9).round() as i64, (y * 1e9).round() as i64)
}

/// Error type for Mesh construction and refinement operations
#[derive(Debug, Clone)]
pub enum MeshError {
    /// An operation was attempted on a Mesh with no Elems
    EmptyMesh,
    /// The named boundary marker is not defined on this Mesh
    UnknownMarker(String),
    ElemDoesntExist(usize),
    /// An h-refinement would produce edges below [MIN_EDGE_LENGTH]
    MinEdgeLength(usize),
    /// A mesh file could not be read or did not match the expected format
    FileError(String),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyMesh => write!(f, "Mesh has no Elems; Cannot execute operation!"),
            Self::UnknownMarker(name) => {
                write!(f, "Boundary marker '{}' is not defined on this Mesh!", name)
            }
            Self::ElemDoesntExist(id) => write!(f, "Elem {} does not exist; Cannot h-refine!", id),
            Self::MinEdgeLength(id) => write!(
                f,
                "h-refinement of Elem {} would produce edges below the minimum length!",
                id
            ),
            Self::FileError(msg) => write!(f, "Unable to parse Mesh file: {}", msg),
        }
    }
}

/// Information used to define the geometric structure and refinement state of
/// the computational domain
///
/// Elems form a refinement tree: refined Elems keep their children; the
/// *active* Elems (those without children) discretize the domain. Vertices are
/// deduplicated by coordinate so that coincident corners share one entry.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elems: Vec<Elem>,
    pub vertices: Vec<Point>,
    /// Boundary marker names; Elems reference these by index
    pub boundary_markers: Vec<String>,
    /// Maximum allowed hanging-node level across any edge. `None` permits
    /// arbitrary-level hanging nodes.
    pub regularity: Option<u8>,
    vertex_lookup: BTreeMap<(i64, i64), usize>,
}

impl Mesh {
    /// Construct a completely empty Mesh
    pub fn blank() -> Self {
        Self {
            elems: Vec::new(),
            vertices: Vec::new(),
            boundary_markers: Vec::new(),
            regularity: Some(1),
            vertex_lookup: BTreeMap::new(),
        }
    }

    /// Construct an `nx` by `ny` rectangular base Mesh over
    /// `(x0, y0) .. (x1, y1)` with a single boundary marker on all outer sides
    pub fn rectangle(
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        nx: usize,
        ny: usize,
        boundary_marker: &str,
    ) -> Self {
        let mut mesh = Self::blank();
        mesh.boundary_markers.push(boundary_marker.to_string());

        let dx = (x1 - x0) / nx as f64;
        let dy = (y1 - y0) / ny as f64;

        for j in 0..ny {
            for i in 0..nx {
                let sw = mesh.get_or_insert_vertex(x0 + i as f64 * dx, y0 + j as f64 * dy);
                let se = mesh.get_or_insert_vertex(x0 + (i + 1) as f64 * dx, y0 + j as f64 * dy);
                let nw = mesh.get_or_insert_vertex(x0 + i as f64 * dx, y0 + (j + 1) as f64 * dy);
                let ne =
                    mesh.get_or_insert_vertex(x0 + (i + 1) as f64 * dx, y0 + (j + 1) as f64 * dy);

                let side_markers = [
                    (j == 0).then(|| 0),
                    (i == nx - 1).then(|| 0),
                    (j == ny - 1).then(|| 0),
                    (i == 0).then(|| 0),
                ];

                let id = mesh.elems.len();
                mesh.elems
                    .push(Elem::new(id, [sw, se, nw, ne], String::new(), side_markers));
            }
        }

        mesh
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         { "material": "air", "node_ids": [0, 1, 3, 4] },
    ///         { "material": "teflon", "node_ids": [1, 2, 4, 5] }
    ///     ],
    ///     "Nodes": [
    ///         [0.0, 0.0], [1.0, 0.0], [2.0, 0.0],
    ///         [0.0, 0.5], [1.0, 0.5], [2.0, 0.5]
    ///     ],
    ///     "Boundaries": [
    ///         { "marker": "Bdy", "edges": [[0, 1], [1, 2], [0, 3], [2, 5], [3, 4], [4, 5]] }
    ///     ]
    /// }
    /// ```
    ///
    /// `node_ids` are ordered SW, SE, NW, NE and must describe an axis-aligned
    /// rectangle. Boundary edges are vertex-id pairs in either order.
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshError> {
        let contents =
            read_to_string(path.as_ref()).map_err(|err| MeshError::FileError(err.to_string()))?;
        let parsed = json::parse(&contents).map_err(|err| MeshError::FileError(err.to_string()))?;

        let mut mesh = Self::blank();

        for node in parsed["Nodes"].members() {
            let x = node[0]
                .as_f64()
                .ok_or_else(|| MeshError::FileError("non-numeric Node coordinate".to_string()))?;
            let y = node[1]
                .as_f64()
                .ok_or_else(|| MeshError::FileError("non-numeric Node coordinate".to_string()))?;
            mesh.get_or_insert_vertex(x, y);
        }
        let num_nodes = mesh.vertices.len();

        // boundary marker names and their (sorted) vertex-pair edge sets
        let mut boundary_edges: Vec<BTreeSet<(usize, usize)>> = Vec::new();
        for boundary in parsed["Boundaries"].members() {
            let marker = boundary["marker"]
                .as_str()
                .ok_or_else(|| MeshError::FileError("Boundary without marker".to_string()))?;
            mesh.boundary_markers.push(marker.to_string());

            let mut edges = BTreeSet::new();
            for edge in boundary["edges"].members() {
                let a = edge[0].as_usize().filter(|a| *a < num_nodes).ok_or_else(|| {
                    MeshError::FileError("invalid Boundary edge node id".to_string())
                })?;
                let b = edge[1].as_usize().filter(|b| *b < num_nodes).ok_or_else(|| {
                    MeshError::FileError("invalid Boundary edge node id".to_string())
                })?;
                edges.insert((a.min(b), a.max(b)));
            }
            boundary_edges.push(edges);
        }

        for element in parsed["Elements"].members() {
            let material = element["material"].as_str().unwrap_or("").to_string();

            let mut vertices = [0usize; 4];
            for (v, id_val) in vertices.iter_mut().zip(element["node_ids"].members()) {
                *v = id_val.as_usize().filter(|id| *id < num_nodes).ok_or_else(|| {
                    MeshError::FileError("invalid Element node id".to_string())
                })?;
            }

            let [sw, se, nw, ne] = vertices;
            let (p_sw, p_se, p_nw, p_ne) = (
                mesh.vertices[sw],
                mesh.vertices[se],
                mesh.vertices[nw],
                mesh.vertices[ne],
            );
            if p_sw.x >= p_se.x
                || p_sw.y >= p_nw.y
                || (p_sw.y - p_se.y).abs() > 1e-12
                || (p_nw.y - p_ne.y).abs() > 1e-12
                || (p_sw.x - p_nw.x).abs() > 1e-12
                || (p_se.x - p_ne.x).abs() > 1e-12
            {
                return Err(MeshError::FileError(format!(
                    "Element with node_ids {:?} is not an axis-aligned rectangle",
                    vertices
                )));
            }

            // match each side's vertex pair against the boundary edge sets
            let side_pairs = [(sw, se), (se, ne), (nw, ne), (sw, nw)];
            let mut side_markers = [None; NUM_SIDES];
            for (side, (a, b)) in side_pairs.iter().enumerate() {
                let key = (*a.min(b), *a.max(b));
                side_markers[side] = boundary_edges.iter().position(|edges| edges.contains(&key));
            }

            let id = mesh.elems.len();
            mesh.elems.push(Elem::new(id, vertices, material, side_markers));
        }

        if mesh.elems.is_empty() {
            return Err(MeshError::EmptyMesh);
        }

        Ok(mesh)
    }

    // ----------------------------------------------------------------------------------------------------
    // basic accessors
    // ----------------------------------------------------------------------------------------------------

    /// Iterate over the active (childless) Elems
    pub fn active_elems(&self) -> impl Iterator<Item = &Elem> {
        self.elems.iter().filter(|elem| !elem.has_children())
    }

    pub fn num_active_elems(&self) -> usize {
        self.active_elems().count()
    }

    /// The bounding rectangle of an Elem in Real Space
    pub fn elem_rect(&self, elem_id: usize) -> Rect {
        let elem = &self.elems[elem_id];
        let sw = self.vertices[elem.vertices[0]];
        let ne = self.vertices[elem.vertices[3]];
        Rect::new(sw.x, sw.y, ne.x, ne.y)
    }

    /// Resolve a boundary marker name to its index
    pub fn marker_index(&self, name: &str) -> Result<usize, MeshError> {
        self.boundary_markers
            .iter()
            .position(|marker| marker == name)
            .ok_or_else(|| MeshError::UnknownMarker(name.to_string()))
    }

    fn get_or_insert_vertex(&mut self, x: f64, y: f64) -> usize {
        let key = coord_key(x, y);
        if let Some(id) = self.vertex_lookup.get(&key) {
            *id
        } else {
            let id = self.vertices.len();
            self.vertices.push(Point::new(x, y));
            self.vertex_lookup.insert(key, id);
            id
        }
    }

    /// Active Elems sharing an edge segment of positive length with `elem_id`
    pub fn active_neighbors(&self, elem_id: usize) -> Vec<usize> {
        let rect = self.elem_rect(elem_id);
        let eps = 1e-12 * (rect.width() + rect.height());

        self.active_elems()
            .filter(|other| other.id != elem_id)
            .filter(|other| {
                let o = self.elem_rect(other.id);
                let x_touch = (rect.x1 - o.x0).abs() < eps || (rect.x0 - o.x1).abs() < eps;
                let y_touch = (rect.y1 - o.y0).abs() < eps || (rect.y0 - o.y1).abs() < eps;
                let x_overlap = rect.x1.min(o.x1) - rect.x0.max(o.x0) > eps;
                let y_overlap = rect.y1.min(o.y1) - rect.y0.max(o.y0) > eps;
                (x_touch && y_overlap) || (y_touch && x_overlap)
            })
            .map(|other| other.id)
            .collect()
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Apply `levels` passes of isotropic refinement to all active Elems
    pub fn refine_all_elements(&mut self, levels: usize) -> Result<(), MeshError> {
        if self.elems.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        for _ in 0..levels {
            let targets: Vec<usize> = self.active_elems().map(|elem| elem.id).collect();
            for elem_id in targets {
                self.refine_elem(elem_id, HRef::T)?;
            }
        }
        Ok(())
    }

    /// Apply `levels` passes of isotropic refinement to the active Elems
    /// satisfying `criterion` (e.g. membership in a material subdomain)
    ///
    /// Exactly `levels` passes are run, even if a pass refines nothing.
    pub fn refine_by_criterion<F>(&mut self, criterion: F, levels: usize) -> Result<(), MeshError>
    where
        F: Fn(&Elem) -> bool,
    {
        if self.elems.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        for _ in 0..levels {
            let targets: Vec<usize> = self
                .active_elems()
                .filter(|elem| criterion(elem))
                .map(|elem| elem.id)
                .collect();
            for elem_id in targets {
                self.refine_elem(elem_id, HRef::T)?;
            }
        }
        Ok(())
    }

    /// Apply `levels` passes of anisotropic refinement concentrated near the
    /// boundary entities carrying `marker_name`, for resolving boundary layers
    ///
    /// Each pass bisects the touching Elems parallel to the marked side, so
    /// successive passes produce progressively thinner layers against the
    /// boundary. An Elem touching the marker in both directions is refined
    /// isotropically.
    pub fn refine_towards_boundary(
        &mut self,
        marker_name: &str,
        levels: usize,
    ) -> Result<(), MeshError> {
        if self.elems.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        let marker_idx = self.marker_index(marker_name)?;

        for _ in 0..levels {
            let targets: Vec<(usize, HRef)> = self
                .active_elems()
                .filter(|elem| elem.touches_boundary(marker_idx))
                .map(|elem| {
                    let horizontal = elem.side_markers[0] == Some(marker_idx)
                        || elem.side_markers[2] == Some(marker_idx);
                    let vertical = elem.side_markers[1] == Some(marker_idx)
                        || elem.side_markers[3] == Some(marker_idx);
                    let refinement = match (horizontal, vertical) {
                        (true, true) => HRef::T,
                        (true, false) => HRef::V,
                        _ => HRef::U,
                    };
                    (elem.id, refinement)
                })
                .collect();

            for (elem_id, refinement) in targets {
                self.refine_elem(elem_id, refinement)?;
            }
        }
        Ok(())
    }

    /// Apply an [HRef] to a list of Elems by their id
    pub fn h_refine_elems(&mut self, elems: Vec<usize>, refinement: HRef) -> Result<(), MeshError> {
        for elem_id in elems {
            self.refine_elem(elem_id, refinement)?;
        }
        Ok(())
    }

    /// Execute one h-refinement, force-refining any active neighbors that
    /// would otherwise violate the regularity bound
    ///
    /// Refining an Elem that already has children is a no-op, so forced
    /// refinements and caller-requested refinements cannot conflict.
    pub fn refine_elem(&mut self, elem_id: usize, refinement: HRef) -> Result<(), MeshError> {
        if elem_id >= self.elems.len() {
            return Err(MeshError::ElemDoesntExist(elem_id));
        }
        if self.elems[elem_id].has_children() {
            return Ok(());
        }

        let rect = self.elem_rect(elem_id);
        let splits_u = matches!(refinement, HRef::T | HRef::U);
        let splits_v = matches!(refinement, HRef::T | HRef::V);
        if (splits_u && rect.width() * 0.5 < MIN_EDGE_LENGTH)
            || (splits_v && rect.height() * 0.5 < MIN_EDGE_LENGTH)
        {
            return Err(MeshError::MinEdgeLength(elem_id));
        }

        if let Some(max_hanging) = self.regularity {
            let new_level = self.elems[elem_id].h_levels.refined(refinement).max();
            loop {
                let too_coarse = self
                    .active_neighbors(elem_id)
                    .into_iter()
                    .find(|nb| new_level > self.elems[*nb].h_levels.max() + max_hanging);
                match too_coarse {
                    Some(neighbor_id) => self.refine_elem(neighbor_id, HRef::T)?,
                    None => break,
                }
            }
        }

        let parent = self.elems[elem_id].clone();
        let [sw, se, nw, ne] = parent.vertices;
        let xm = 0.5 * (rect.x0 + rect.x1);
        let ym = 0.5 * (rect.y0 + rect.y1);
        let [p_s, p_e, p_n, p_w] = parent.side_markers;

        let children: SmallVec<[([usize; 4], [Option<usize>; 4]); 4]> = match refinement {
            HRef::T => {
                let s = self.get_or_insert_vertex(xm, rect.y0);
                let w = self.get_or_insert_vertex(rect.x0, ym);
                let c = self.get_or_insert_vertex(xm, ym);
                let e = self.get_or_insert_vertex(rect.x1, ym);
                let n = self.get_or_insert_vertex(xm, rect.y1);
                smallvec![
                    ([sw, s, w, c], [p_s, None, None, p_w]),
                    ([s, se, c, e], [p_s, p_e, None, None]),
                    ([w, c, nw, n], [None, None, p_n, p_w]),
                    ([c, e, n, ne], [None, p_e, p_n, None]),
                ]
            }
            HRef::U => {
                let s = self.get_or_insert_vertex(xm, rect.y0);
                let n = self.get_or_insert_vertex(xm, rect.y1);
                smallvec![
                    ([sw, s, nw, n], [p_s, None, p_n, p_w]),
                    ([s, se, n, ne], [p_s, p_e, p_n, None]),
                ]
            }
            HRef::V => {
                let w = self.get_or_insert_vertex(rect.x0, ym);
                let e = self.get_or_insert_vertex(rect.x1, ym);
                smallvec![
                    ([sw, se, w, e], [p_s, p_e, None, p_w]),
                    ([w, e, nw, ne], [None, p_e, p_n, p_w]),
                ]
            }
        };

        let mut child_ids: SmallVec<[usize; 4]> = SmallVec::new();
        for (vertices, side_markers) in children {
            let id = self.elems.len();
            child_ids.push(id);
            self.elems
                .push(Elem::child_of(&parent, id, vertices, side_markers, refinement));
        }
        self.elems[elem_id].set_children(refinement, child_ids);

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // derefinement and reference-mesh methods
    // ----------------------------------------------------------------------------------------------------

    /// Strip one refinement layer: every Elem whose children are all active
    /// drops them and becomes active again
    ///
    /// Removed Elems are physically deleted and ids are compacted, so a
    /// refine/unrefine round trip restores the exact prior mesh state. No-op
    /// on a mesh at its coarsest state.
    pub fn unrefine_all_elements(&mut self) {
        let mut removed: BTreeSet<usize> = BTreeSet::new();
        let mut coarsened: Vec<usize> = Vec::new();
        for elem in &self.elems {
            if let Some((_, child_ids)) = elem.children() {
                if child_ids
                    .iter()
                    .all(|child_id| !self.elems[*child_id].has_children())
                {
                    removed.extend(child_ids.iter().copied());
                    coarsened.push(elem.id);
                }
            }
        }
        if removed.is_empty() {
            return;
        }

        for elem_id in coarsened {
            self.elems[elem_id].clear_children();
        }

        let mut id_map: Vec<Option<usize>> = vec![None; self.elems.len()];
        let mut new_elems: Vec<Elem> = Vec::with_capacity(self.elems.len() - removed.len());
        for elem in self.elems.drain(0..) {
            if !removed.contains(&elem.id) {
                id_map[elem.id] = Some(new_elems.len());
                new_elems.push(elem);
            }
        }
        for elem in new_elems.iter_mut() {
            elem.id = id_map[elem.id].unwrap();
            elem.parent = elem.parent.map(|p| id_map[p].unwrap());
            if let Some((refinement, child_ids)) = elem.children().cloned() {
                let remapped = child_ids.iter().map(|c| id_map[*c].unwrap()).collect();
                elem.set_children(refinement, remapped);
            }
        }
        self.elems = new_elems;
    }

    /// Return a uniformly-refined transient copy of this Mesh, used to compute
    /// reference solutions for error estimation. Never becomes the working mesh.
    pub fn create_reference_mesh(&self) -> Result<Mesh, MeshError> {
        let mut reference = self.clone();
        reference.refine_all_elements(1)?;
        Ok(reference)
    }

    // ----------------------------------------------------------------------------------------------------
    // p-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Set the polynomial degree of every Elem, clamped to `1..=MAX_POLYNOMIAL_ORDER`
    pub fn set_uniform_order(&mut self, degree: u8) {
        let degree = degree.clamp(1, MAX_POLYNOMIAL_ORDER);
        for elem in self.elems.iter_mut() {
            elem.degree = degree;
        }
    }

    /// Adjust every Elem's polynomial degree by `delta`, clamping the result
    /// to `1..=MAX_POLYNOMIAL_ORDER` (a degree is never driven below 1)
    pub fn adjust_element_order(&mut self, delta: i8) {
        for elem in self.elems.iter_mut() {
            let adjusted = (elem.degree as i16 + delta as i16)
                .clamp(1, MAX_POLYNOMIAL_ORDER as i16);
            elem.degree = adjusted as u8;
        }
    }

    /// Set one Elem's polynomial degree, clamped to `1..=MAX_POLYNOMIAL_ORDER`
    pub fn set_elem_order(&mut self, elem_id: usize, degree: u8) -> Result<(), MeshError> {
        if elem_id >= self.elems.len() {
            return Err(MeshError::ElemDoesntExist(elem_id));
        }
        self.elems[elem_id].degree = degree.clamp(1, MAX_POLYNOMIAL_ORDER);
        Ok(())
    }
}
