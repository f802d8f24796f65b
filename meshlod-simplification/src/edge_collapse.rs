//! Progressive mesh edge collapse
//!
//! Every vertex is queued with the cost of its cheapest outgoing edge.
//! Collapsing pops the cheapest vertex and merges it into the destination of
//! that edge, then refreshes the costs around it. LOD levels are baked
//! between collapses whenever a requested reduction is reached.

use crate::adjacency::{
    MeshAdjacency, TriangleId, VertexId, NEVER_COLLAPSE_COST, UNINITIALIZED_COLLAPSE_COST,
};
use crate::bake::LodBaker;
use crate::outside_marker::OutsideMarker;
use crate::LodGenerator;
use log::{debug, trace, warn};
use meshlod_core::{
    normalize_or_zero, Bounded, Error, GeneratedLods, LodAdvancedConfig, LodConfig, MeshBuffers,
    Point3f, ReductionMethod, Result,
};
use priority_queue::PriorityQueue;
use std::cmp::Ordering;

/// Queue priority of a vertex
#[derive(Debug, Clone, Copy)]
pub struct CollapseCost {
    pub cost: f32,
    pub vertex: VertexId,
}

impl PartialEq for CollapseCost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for CollapseCost {}

impl PartialOrd for CollapseCost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CollapseCost {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest cost first, ties go to the lowest vertex id
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifierStage {
    Uninitialized,
    CostsComputed,
    Collapsing,
    LevelBaked,
    Done,
}

/// Source index remapping taken from a triangle removed by the current collapse
#[derive(Debug, Clone, Copy)]
struct CollapsedEdge {
    src_id: u32,
    dst_id: u32,
    submesh: usize,
}

/// Collapse state of one mesh.
pub struct ProgressiveMesh {
    adjacency: MeshAdjacency,
    queue: PriorityQueue<VertexId, CollapseCost>,
    cost_limit: f32,
    outside_weight: f32,
    use_compression: bool,
    collapsed_edges: Vec<CollapsedEdge>,
    stage: SimplifierStage,
    last_reduced: Option<VertexId>,
}

impl ProgressiveMesh {
    pub fn new(adjacency: MeshAdjacency, advanced: &LodAdvancedConfig) -> Self {
        let vertex_count = adjacency.vertices.len();
        Self {
            adjacency,
            queue: PriorityQueue::with_capacity(vertex_count),
            cost_limit: NEVER_COLLAPSE_COST,
            outside_weight: advanced.outside_weight,
            use_compression: advanced.use_compression,
            collapsed_edges: Vec::new(),
            stage: SimplifierStage::Uninitialized,
            last_reduced: None,
        }
    }

    pub fn adjacency(&self) -> &MeshAdjacency {
        &self.adjacency
    }

    pub fn stage(&self) -> SimplifierStage {
        self.stage
    }

    /// Number of vertices waiting in the cost queue
    pub fn queued_vertex_count(&self) -> usize {
        self.queue.len()
    }

    /// Cheapest queued vertex and its cost
    pub fn cheapest(&self) -> Option<(VertexId, f32)> {
        self.queue.peek().map(|(&v, c)| (v, c.cost))
    }

    /// Position of the last collapsed vertex and of the vertex it merged into
    pub fn last_reduced_vertex(&self) -> Option<(Point3f, Point3f)> {
        let src = &self.adjacency.vertices[self.last_reduced?.0];
        let dst = &self.adjacency.vertices[src.collapse_to?.0];
        Some((src.position, dst.position))
    }

    /// Queue every vertex that has at least one edge.
    pub fn compute_costs(&mut self) {
        self.queue.clear();
        for i in 0..self.adjacency.vertices.len() {
            let v = VertexId(i);
            if self.adjacency.vertices[i].edges.is_empty() {
                trace!(
                    "vertex {} at {:?} is never used and is excluded from LOD generation",
                    i,
                    self.adjacency.vertices[i].position
                );
                continue;
            }
            self.update_vertex_cost(v);
        }
        self.stage = SimplifierStage::CostsComputed;
        debug!(
            "collapse costs computed for {} of {} vertices",
            self.queue.len(),
            self.adjacency.vertices.len()
        );
    }

    /// Recompute the cheapest edge of `v` and requeue it.
    fn update_vertex_cost(&mut self, v: VertexId) {
        let (cost, target) = self.vertex_collapse_cost(v);
        let vertex = &mut self.adjacency.vertices[v.0];
        vertex.collapse_cost = cost;
        if cost == UNINITIALIZED_COLLAPSE_COST {
            vertex.collapse_to = None;
            self.queue.remove(&v);
        } else {
            vertex.collapse_to = target;
            self.queue.push(v, CollapseCost { cost, vertex: v });
        }
    }

    /// Cost every edge of `v` and return the cheapest one.
    fn vertex_collapse_cost(&mut self, v: VertexId) -> (f32, Option<VertexId>) {
        let vertex = &self.adjacency.vertices[v.0];
        let costs: Vec<f32> = vertex
            .edges
            .iter()
            .map(|edge| {
                let profiled = if vertex.has_profile {
                    self.adjacency.profiled_cost(v, edge.dst)
                } else {
                    None
                };
                match profiled {
                    Some(cost) if cost != UNINITIALIZED_COLLAPSE_COST => cost,
                    _ => self.edge_collapse_cost(v, edge.dst, edge.ref_count),
                }
            })
            .collect();

        let mut best = (UNINITIALIZED_COLLAPSE_COST, None);
        for (edge, cost) in self.adjacency.vertices[v.0].edges.iter_mut().zip(costs) {
            edge.collapse_cost = cost;
            if best.0 > cost {
                best = (cost, Some(edge.dst));
            }
        }
        best
    }

    /// Cost of moving `src` onto `dst`.
    pub fn edge_collapse_cost(&self, src: VertexId, dst: VertexId, ref_count: u32) -> f32 {
        let vertices = &self.adjacency.vertices;
        let triangles = &self.adjacency.triangles;
        let s = &vertices[src.0];
        let d = &vertices[dst.0];

        // A surviving neighbour face must not turn by more than 90 degrees.
        for t in &s.triangles {
            let tri = &triangles[t.0];
            if tri.has_vertex(dst) {
                continue;
            }
            let [p0, p1, p2] = tri.vertices.map(|v| {
                if v == src {
                    d.position
                } else {
                    vertices[v.0].position
                }
            });
            let new_normal = (p1 - p0).cross(&(p2 - p1));
            if new_normal.dot(&tri.normal) < 0.0 {
                return NEVER_COLLAPSE_COST;
            }
        }

        let mut cost = if s.is_border() {
            if ref_count > 1 {
                // collapsing inwards from a border
                1.0
            } else {
                // Along a border: the straighter the border stays, the cheaper.
                let collapse_edge = normalize_or_zero(s.position - d.position);
                let mut kink = -1.0f32;
                for edge in s.edges.iter().filter(|e| e.dst != dst && e.ref_count == 1) {
                    let other = normalize_or_zero(s.position - vertices[edge.dst.0].position);
                    kink = kink.max(other.dot(&collapse_edge));
                }
                (1.002 + kink) * 0.5
            }
        } else {
            let mut curvature = 1.0f32;
            for t in &s.triangles {
                let normal = triangles[t.0].normal;
                let mut min_curvature = -1.0f32;
                for t2 in s.triangles.iter().filter(|t2| triangles[t2.0].has_vertex(dst)) {
                    min_curvature = min_curvature.max(normal.dot(&triangles[t2.0].normal));
                }
                curvature = curvature.min(min_curvature);
            }
            (1.002 - curvature) * 0.5
        };

        if s.seam {
            if d.seam {
                cost = cost.max(0.005) * 8.0;
            } else {
                cost = cost.max(0.05) * 64.0;
            }
        }

        let dist = (s.position - d.position).norm();
        cost *= dist;

        if self.adjacency.use_vertex_normals {
            let diff = s.normal.dot(&d.normal) / 8.0;
            let mut normal_cost = 0.0f32;
            for edge in &s.edges {
                let n = &vertices[edge.dst.0];
                let before_dist = (n.position - s.position).norm();
                let after_dist = (n.position - d.position).norm();
                let before_dot = n.normal.dot(&s.normal);
                let after_dot = n.normal.dot(&d.normal);
                normal_cost = normal_cost.max(
                    diff.max((before_dot - after_dot).abs())
                        * (after_dist / 8.0).max(dist.max((before_dist - after_dist).abs())),
                );
            }
            cost = cost.max(normal_cost * 0.25);
        }

        if (s.outer_wall || d.outer_wall) && self.outside_weight != 0.0 {
            if self.outside_weight == 1.0 {
                return NEVER_COLLAPSE_COST;
            }
            cost *= (self.outside_weight * 8.0).max(0.0078125);
        }

        cost
    }

    /// Collapse the cheapest vertex if its cost is below the current limit.
    pub fn collapse_cheapest(&mut self) -> Option<VertexId> {
        let (v, cost) = self.cheapest()?;
        if cost < self.cost_limit && cost < NEVER_COLLAPSE_COST {
            self.collapse(v);
            Some(v)
        } else {
            None
        }
    }

    /// Merge `src` into its chosen destination.
    pub fn collapse(&mut self, src: VertexId) {
        let Some(dst) = self.adjacency.vertices[src.0].collapse_to else {
            self.queue.remove(&src);
            return;
        };
        self.stage = SimplifierStage::Collapsing;
        self.collapsed_edges.clear();
        let triangles: Vec<TriangleId> = self.adjacency.vertices[src.0].triangles.clone();

        // Triangles on the collapsed edge disappear.
        for &t in &triangles {
            let tri = &self.adjacency.triangles[t.0];
            if !tri.has_vertex(dst) {
                continue;
            }
            if let (Some(src_id), Some(dst_id)) = (tri.vertex_id_of(src), tri.vertex_id_of(dst)) {
                let submesh = tri.submesh;
                if !self
                    .collapsed_edges
                    .iter()
                    .any(|e| e.src_id == src_id && e.submesh == submesh)
                {
                    self.collapsed_edges.push(CollapsedEdge {
                        src_id,
                        dst_id,
                        submesh,
                    });
                }
            }
            self.adjacency.remove_triangle(t, src);
        }

        // The others move their src corner onto dst.
        for &t in &triangles {
            let tri = &self.adjacency.triangles[t.0];
            if tri.removed || tri.has_vertex(dst) {
                continue;
            }
            let submesh = tri.submesh;
            let dst_id = tri
                .vertex_id_of(src)
                .and_then(|src_id| self.find_dst_id(src_id, submesh));
            match dst_id {
                Some(dst_id) => {
                    self.adjacency.replace_vertex(t, src, dst, dst_id);
                    self.adjacency.mark_changed(t);
                    self.adjacency.compute_normal(t);
                }
                // No index of dst is known in this submesh.
                None => self.adjacency.remove_triangle(t, src),
            }
        }

        let src_seam = self.adjacency.vertices[src.0].seam;
        self.adjacency.vertices[dst.0].seam |= src_seam;

        let mut updatable: Vec<VertexId> = self.adjacency.vertices[src.0]
            .edges
            .iter()
            .chain(self.adjacency.vertices[dst.0].edges.iter())
            .map(|e| e.dst)
            .chain(std::iter::once(dst))
            .filter(|&v| v != src)
            .collect();
        updatable.sort_unstable();
        updatable.dedup();

        self.queue.remove(&src);
        let vertex = &mut self.adjacency.vertices[src.0];
        vertex.edges.clear();
        vertex.triangles.clear();
        self.last_reduced = Some(src);

        for v in updatable {
            self.update_vertex_cost(v);
        }
    }

    /// Index of dst to use for a moved triangle, exact source index match first
    fn find_dst_id(&self, src_id: u32, submesh: usize) -> Option<u32> {
        self.collapsed_edges
            .iter()
            .find(|e| e.src_id == src_id && e.submesh == submesh)
            .or_else(|| self.collapsed_edges.iter().find(|e| e.submesh == submesh))
            .map(|e| e.dst_id)
    }

    /// Vertex count a level reduces to; also sets the collapse cost limit
    fn target_vertex_count(&mut self, reduction: ReductionMethod, unique: usize) -> usize {
        self.cost_limit = NEVER_COLLAPSE_COST;
        match reduction {
            ReductionMethod::Proportional(ratio) => {
                unique - ((unique as f32 * ratio) as usize).min(unique)
            }
            ReductionMethod::Constant(count) => unique.saturating_sub(count),
            ReductionMethod::CollapseCost(limit) => {
                self.cost_limit = limit;
                0
            }
            ReductionMethod::TriangleCount(_) => 0,
        }
    }

    fn level_reached(
        &self,
        reduction: ReductionMethod,
        target: usize,
        vertex_count: usize,
    ) -> bool {
        match reduction {
            ReductionMethod::TriangleCount(count) => self.adjacency.live_triangle_count() <= count,
            _ => vertex_count <= target,
        }
    }

    /// Collapse through every level of `config` and bake the ones that changed.
    pub fn compute_lods(&mut self, config: &mut LodConfig) -> GeneratedLods {
        let unique = self.adjacency.vertices.len();
        let mut vertex_count = unique;
        let mut last_bake_vertex_count = unique;
        let level_count = config.levels.len();
        let mut first_pass = true;
        let mut baker = LodBaker::new(self.adjacency.index_infos.len());

        for (i, level) in config.levels.iter_mut().enumerate() {
            let target = self.target_vertex_count(level.reduction, unique);
            while !self.level_reached(level.reduction, target, vertex_count) {
                if self.collapse_cheapest().is_none() {
                    break;
                }
                vertex_count -= 1;
            }

            level.out_unique_vertex_count = vertex_count;
            level.out_skipped = last_bake_vertex_count == vertex_count;
            if level.out_skipped {
                debug!("LOD level {} skipped, nothing left to reduce", i + 1);
                continue;
            }
            last_bake_vertex_count = vertex_count;

            #[cfg(test)]
            self.adjacency.assert_consistent();

            if self.use_compression && (i + 1 != level_count || !first_pass) {
                baker.bake_merged_lods(&mut self.adjacency, first_pass);
                first_pass = !first_pass;
            } else {
                baker.bake_lods(&self.adjacency);
            }
            self.stage = SimplifierStage::LevelBaked;
            debug!(
                "LOD level {}: {} unique vertices, {} triangles",
                i + 1,
                vertex_count,
                self.adjacency.live_triangle_count()
            );
        }

        // The last level was skipped with half of a merged buffer pending.
        if !first_pass {
            baker.bake_lods(&self.adjacency);
        }
        self.stage = SimplifierStage::Done;
        baker.into_lods()
    }
}

/// Synchronous LOD generator.
#[derive(Debug, Clone, Default)]
pub struct ProgressiveMeshGenerator {
    last_reduced: Option<(Point3f, Point3f)>,
}

impl ProgressiveMeshGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last collapse of the previous run, as source and target positions
    pub fn last_reduced_vertex(&self) -> Option<(Point3f, Point3f)> {
        self.last_reduced
    }
}

impl LodGenerator for ProgressiveMeshGenerator {
    fn generate(&mut self, input: &MeshBuffers, config: &mut LodConfig) -> Result<GeneratedLods> {
        config.validate()?;
        let advanced = &config.advanced;
        let mut adjacency =
            MeshAdjacency::build(input, advanced.use_vertex_normals, &advanced.profile)?;

        if advanced.outside_weight != 0.0 {
            let radius = input.bounding_sphere_radius();
            if !(radius > 0.0) {
                return Err(Error::InvalidData(
                    "outside weight needs a mesh with a positive bounding radius".to_string(),
                ));
            }
            let marked = OutsideMarker::new(&adjacency, radius, advanced.outside_walk_angle)
                .and_then(|mut marker| marker.mark_outside());
            match marked {
                Ok(flags) => adjacency.set_outer_wall(&flags),
                Err(e) => warn!("outer wall detection skipped: {}", e),
            }
        }

        let mut mesh = ProgressiveMesh::new(adjacency, &config.advanced);
        mesh.compute_costs();
        let lods = mesh.compute_lods(config);

        config.advanced.use_vertex_normals = mesh.adjacency().use_vertex_normals;
        self.last_reduced = mesh.last_reduced_vertex();
        debug!(
            "generated {} LOD levels from {} requested",
            config.baked_level_count(),
            config.levels.len()
        );
        Ok(lods)
    }
}
