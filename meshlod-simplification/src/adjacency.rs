//! Vertex/edge/triangle graph of one simplification run
//!
//! Vertices are deduplicated by exact position across every vertex buffer of
//! the mesh, so a position used by several buffers (or several times in one
//! buffer) becomes a single graph vertex flagged as a seam. Triangles keep the
//! original per-buffer indices so LOD index buffers can be written back in the
//! source index space.

use log::{debug, trace, warn};
use meshlod_core::{
    normalize_or_zero, position_key, triangle_normal, Error, IndexStorage, IndexWidth,
    MeshBuffers, Point3f, ProfiledEdge, Result, Vector3f, VertexBuffer,
};
use std::collections::HashMap;

/// Cost of a collapse that must never happen.
pub const NEVER_COLLAPSE_COST: f32 = f32::MAX;
/// Cost of a vertex without any edge; such vertices are not queued.
pub const UNINITIALIZED_COLLAPSE_COST: f32 = f32::INFINITY;

/// Squared length below which an accumulated seam normal counts as zero
const ZERO_LENGTH_SQUARED: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriangleId(pub usize);

/// Directed edge stored on its source vertex.
#[derive(Debug, Clone)]
pub struct Edge {
    pub dst: VertexId,
    pub collapse_cost: f32,
    /// Number of live triangles containing both endpoints
    pub ref_count: u32,
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub position: Point3f,
    pub normal: Vector3f,
    pub seam: bool,
    pub outer_wall: bool,
    pub has_profile: bool,
    pub edges: Vec<Edge>,
    pub triangles: Vec<TriangleId>,
    pub collapse_to: Option<VertexId>,
    /// Cost the vertex is queued with
    pub collapse_cost: f32,
}

impl Vertex {
    fn new(position: Point3f, normal: Vector3f) -> Self {
        Self {
            position,
            normal,
            seam: false,
            outer_wall: false,
            has_profile: false,
            edges: Vec::new(),
            triangles: Vec::new(),
            collapse_to: None,
            collapse_cost: UNINITIALIZED_COLLAPSE_COST,
        }
    }

    pub fn edge(&self, dst: VertexId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.dst == dst)
    }

    /// A vertex is on a border when one of its edges is used by a single triangle.
    pub fn is_border(&self) -> bool {
        self.edges.iter().any(|e| e.ref_count == 1)
    }
}

#[derive(Debug, Clone)]
pub struct Triangle {
    pub vertices: [VertexId; 3],
    /// Indices into the submesh's source vertex buffer
    pub vertex_ids: [u32; 3],
    pub normal: Vector3f,
    pub submesh: usize,
    pub removed: bool,
    /// Touched by a collapse since the last merged bake snapshot
    pub vertex_changed: bool,
    /// Indices at the last merged bake snapshot
    pub prev_lod: Option<[u32; 3]>,
}

impl Triangle {
    pub fn has_vertex(&self, v: VertexId) -> bool {
        self.vertices.contains(&v)
    }

    /// Source index the triangle uses for `v`
    pub fn vertex_id_of(&self, v: VertexId) -> Option<u32> {
        self.vertices
            .iter()
            .position(|&x| x == v)
            .map(|i| self.vertex_ids[i])
    }

    fn is_malformed(&self) -> bool {
        let [a, b, c] = self.vertices;
        a == b || a == c || b == c
    }
}

/// Per-submesh index bookkeeping used while baking.
#[derive(Debug, Clone)]
pub struct IndexBufferInfo {
    pub width: IndexWidth,
    /// Indices of the live triangles
    pub index_count: usize,
    /// Live indices at the last merged bake snapshot
    pub prev_index_count: usize,
    /// Indices of snapshot triangles changed since the snapshot
    pub prev_only_index_count: usize,
}

/// Adjacency graph of one mesh.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub index_infos: Vec<IndexBufferInfo>,
    /// Cleared when any vertex buffer lacks normals
    pub use_vertex_normals: bool,
    profile: HashMap<VertexId, Vec<(VertexId, f32)>>,
}

impl MeshAdjacency {
    /// Build the graph from every submesh of `input`.
    pub fn build(
        input: &MeshBuffers,
        use_vertex_normals: bool,
        profile: &[ProfiledEdge],
    ) -> Result<Self> {
        let vertex_count = input.vertex_count();
        let mut builder = AdjacencyBuilder {
            adjacency: MeshAdjacency {
                vertices: Vec::with_capacity(vertex_count),
                triangles: Vec::with_capacity(input.index_count() / 3),
                index_infos: Vec::with_capacity(input.submeshes.len()),
                use_vertex_normals,
                profile: HashMap::new(),
            },
            unique: HashMap::with_capacity(vertex_count),
            shared_lookup: None,
            lookup: Vec::new(),
        };

        for (i, submesh) in input.submeshes.iter().enumerate() {
            let vertices = input.submesh_vertices(i).ok_or_else(|| {
                Error::InvalidData(format!("submesh {} has no vertex buffer", i))
            })?;
            builder.add_vertex_buffer(vertices, submesh.use_shared_vertices);
            builder.add_index_buffer(&submesh.indices, submesh.use_shared_vertices, i);
        }
        builder.inject_profile(profile);

        let adjacency = builder.adjacency;
        debug!(
            "adjacency built: {} unique vertices, {} triangles, {} submeshes",
            adjacency.vertices.len(),
            adjacency.live_triangle_count(),
            adjacency.index_infos.len()
        );
        Ok(adjacency)
    }

    /// Triangles not removed yet, summed over all submeshes
    pub fn live_triangle_count(&self) -> usize {
        self.index_infos.iter().map(|i| i.index_count / 3).sum()
    }

    /// Cost override for the directed edge `src -> dst`
    pub fn profiled_cost(&self, src: VertexId, dst: VertexId) -> Option<f32> {
        self.profile
            .get(&src)?
            .iter()
            .find(|(d, _)| *d == dst)
            .map(|&(_, cost)| cost)
    }

    /// Copy outside marker results onto the vertices
    pub fn set_outer_wall(&mut self, flags: &[bool]) {
        for (vertex, &flag) in self.vertices.iter_mut().zip(flags) {
            vertex.outer_wall = flag;
        }
    }

    pub(crate) fn add_edge(&mut self, v: VertexId, dst: VertexId) {
        let edges = &mut self.vertices[v.0].edges;
        match edges.iter_mut().find(|e| e.dst == dst) {
            Some(edge) => edge.ref_count += 1,
            None => edges.push(Edge {
                dst,
                collapse_cost: UNINITIALIZED_COLLAPSE_COST,
                ref_count: 1,
            }),
        }
    }

    pub(crate) fn remove_edge(&mut self, v: VertexId, dst: VertexId) {
        let edges = &mut self.vertices[v.0].edges;
        if let Some(i) = edges.iter().position(|e| e.dst == dst) {
            if edges[i].ref_count <= 1 {
                edges.swap_remove(i);
            } else {
                edges[i].ref_count -= 1;
            }
        }
    }

    fn add_triangle_to_edges(&mut self, t: TriangleId) {
        let vs = self.triangles[t.0].vertices;
        for v in vs {
            let triangles = &mut self.vertices[v.0].triangles;
            if !triangles.contains(&t) {
                triangles.push(t);
            }
        }
        for i in 0..3 {
            for n in 0..3 {
                if i != n {
                    self.add_edge(vs[i], vs[n]);
                }
            }
        }
    }

    /// Detach a triangle from its vertices. `skip` is left untouched so its
    /// lists can be iterated by the caller.
    pub(crate) fn remove_triangle_from_edges(&mut self, t: TriangleId, skip: VertexId) {
        let vs = self.triangles[t.0].vertices;
        for v in vs {
            if v != skip {
                let triangles = &mut self.vertices[v.0].triangles;
                if let Some(i) = triangles.iter().position(|&x| x == t) {
                    triangles.swap_remove(i);
                }
            }
        }
        for i in 0..3 {
            for n in 0..3 {
                if i != n && vs[i] != skip {
                    self.remove_edge(vs[i], vs[n]);
                }
            }
        }
    }

    /// Flag a triangle as changed since the last merged snapshot
    pub(crate) fn mark_changed(&mut self, t: TriangleId) {
        let tri = &mut self.triangles[t.0];
        if !tri.vertex_changed {
            tri.vertex_changed = true;
            self.index_infos[tri.submesh].prev_only_index_count += 3;
        }
    }

    /// Remove a live triangle from the mesh
    pub(crate) fn remove_triangle(&mut self, t: TriangleId, skip: VertexId) {
        let tri = &mut self.triangles[t.0];
        tri.removed = true;
        let info = &mut self.index_infos[tri.submesh];
        info.index_count = info.index_count.saturating_sub(3);
        self.remove_triangle_from_edges(t, skip);
        self.mark_changed(t);
    }

    /// Move the `src` corner of a triangle onto `dst`, using `dst_id` as its
    /// new source index.
    pub(crate) fn replace_vertex(
        &mut self,
        t: TriangleId,
        src: VertexId,
        dst: VertexId,
        dst_id: u32,
    ) {
        let dst_triangles = &mut self.vertices[dst.0].triangles;
        if !dst_triangles.contains(&t) {
            dst_triangles.push(t);
        }
        let vs = self.triangles[t.0].vertices;
        let Some(i) = vs.iter().position(|&v| v == src) else {
            return;
        };
        for n in 0..3 {
            if n != i {
                self.remove_edge(vs[n], src);
                self.add_edge(vs[n], dst);
                self.add_edge(dst, vs[n]);
            }
        }
        let tri = &mut self.triangles[t.0];
        tri.vertices[i] = dst;
        tri.vertex_ids[i] = dst_id;
    }

    pub(crate) fn compute_normal(&mut self, t: TriangleId) {
        let [a, b, c] = self.triangles[t.0].vertices;
        self.triangles[t.0].normal = triangle_normal(
            &self.vertices[a.0].position,
            &self.vertices[b.0].position,
            &self.vertices[c.0].position,
        );
    }

    /// Check that every live triangle and edge is consistent with the
    /// vertex lists.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (i, tri) in self.triangles.iter().enumerate() {
            if tri.removed {
                continue;
            }
            let t = TriangleId(i);
            assert!(!tri.is_malformed(), "live triangle {} is malformed", i);
            for v in tri.vertices {
                assert!(
                    self.vertices[v.0].triangles.contains(&t),
                    "vertex {:?} lost live triangle {}",
                    v,
                    i
                );
            }
        }
        for (i, vertex) in self.vertices.iter().enumerate() {
            let v = VertexId(i);
            for &t in &vertex.triangles {
                assert!(!self.triangles[t.0].removed, "vertex {} lists removed triangle", i);
            }
            for edge in &vertex.edges {
                let users = vertex
                    .triangles
                    .iter()
                    .filter(|t| self.triangles[t.0].has_vertex(edge.dst))
                    .count();
                assert!(edge.ref_count > 0);
                assert_eq!(
                    edge.ref_count as usize, users,
                    "edge {:?} -> {:?} refcount mismatch",
                    v, edge.dst
                );
            }
        }
        let counted: usize = self.triangles.iter().filter(|t| !t.removed).count();
        assert_eq!(counted, self.live_triangle_count());
    }
}

struct AdjacencyBuilder {
    adjacency: MeshAdjacency,
    unique: HashMap<[u32; 3], VertexId>,
    shared_lookup: Option<Vec<VertexId>>,
    lookup: Vec<VertexId>,
}

impl AdjacencyBuilder {
    fn add_vertex_buffer(&mut self, buffer: &VertexBuffer, shared: bool) {
        if shared && self.shared_lookup.is_some() {
            return;
        }
        let adjacency = &mut self.adjacency;
        adjacency.use_vertex_normals &= buffer.has_normals();
        let normals = buffer.normals.as_ref().filter(|_| adjacency.use_vertex_normals);

        let mut lookup = Vec::with_capacity(buffer.len());
        for (i, position) in buffer.positions.iter().enumerate() {
            let normal = normals.and_then(|n| n.get(i)).copied();
            let key = position_key(position);
            let id = match self.unique.get(&key) {
                Some(&id) => {
                    let vertex = &mut adjacency.vertices[id.0];
                    vertex.seam = true;
                    if let Some(n) = normal {
                        if vertex.normal != n {
                            let sum = vertex.normal + n;
                            vertex.normal = if sum.norm_squared() < ZERO_LENGTH_SQUARED {
                                Vector3f::x()
                            } else {
                                sum.normalize()
                            };
                        }
                    }
                    id
                }
                None => {
                    let id = VertexId(adjacency.vertices.len());
                    let normal = normal.map(normalize_or_zero).unwrap_or_else(Vector3f::zeros);
                    adjacency.vertices.push(Vertex::new(*position, normal));
                    self.unique.insert(key, id);
                    id
                }
            };
            lookup.push(id);
        }

        if shared {
            self.shared_lookup = Some(lookup);
        } else {
            self.lookup = lookup;
        }
    }

    fn add_index_buffer(&mut self, indices: &IndexStorage, shared: bool, submesh: usize) {
        let lookup = if shared {
            self.shared_lookup.as_deref().unwrap_or(&[])
        } else {
            &self.lookup
        };
        let adjacency = &mut self.adjacency;

        let usable = indices.len() / 3 * 3;
        if usable != indices.len() {
            warn!(
                "submesh {}: ignoring {} trailing indices of an incomplete triangle",
                submesh,
                indices.len() - usable
            );
        }
        adjacency.index_infos.push(IndexBufferInfo {
            width: indices.width(),
            index_count: usable,
            prev_index_count: 0,
            prev_only_index_count: 0,
        });

        let mut malformed = 0usize;
        let mut out_of_range = 0usize;
        for start in (0..usable).step_by(3) {
            let mut ids = [0u32; 3];
            let mut vertices = [VertexId(0); 3];
            let mut valid = true;
            for k in 0..3 {
                let id = indices.get(start + k).unwrap_or(u32::MAX);
                match lookup.get(id as usize) {
                    Some(&v) => {
                        ids[k] = id;
                        vertices[k] = v;
                    }
                    None => valid = false,
                }
            }
            if !valid {
                out_of_range += 1;
                let info = &mut adjacency.index_infos[submesh];
                info.index_count = info.index_count.saturating_sub(3);
                continue;
            }

            let t = TriangleId(adjacency.triangles.len());
            let mut tri = Triangle {
                vertices,
                vertex_ids: ids,
                normal: Vector3f::zeros(),
                submesh,
                removed: false,
                vertex_changed: false,
                prev_lod: None,
            };
            if tri.is_malformed() {
                malformed += 1;
                tri.removed = true;
                let info = &mut adjacency.index_infos[submesh];
                info.index_count = info.index_count.saturating_sub(3);
                adjacency.triangles.push(tri);
                continue;
            }
            adjacency.triangles.push(tri);
            adjacency.compute_normal(t);
            adjacency.add_triangle_to_edges(t);
        }

        if malformed > 0 {
            warn!(
                "submesh {}: {} malformed triangles excluded from LOD generation",
                submesh, malformed
            );
        }
        if out_of_range > 0 {
            warn!(
                "submesh {}: {} triangles reference vertices past the end of the vertex buffer",
                submesh, out_of_range
            );
        }
    }

    fn inject_profile(&mut self, profile: &[ProfiledEdge]) {
        for edge in profile {
            let src = self.unique.get(&position_key(&edge.src)).copied();
            let dst = self.unique.get(&position_key(&edge.dst)).copied();
            match (src, dst) {
                (Some(src), Some(dst)) if src != dst => {
                    self.adjacency.vertices[src.0].has_profile = true;
                    self.adjacency
                        .profile
                        .entry(src)
                        .or_default()
                        .push((dst, edge.cost));
                }
                _ => trace!(
                    "profiled edge {:?} -> {:?} does not match two mesh vertices",
                    edge.src,
                    edge.dst
                ),
            }
        }
    }
}
