//! Convex hull based outer wall detection
//!
//! An incremental convex hull is grown over every vertex of the adjacency
//! graph. Vertices on the hull, and vertices reachable from a hull face over
//! mesh triangles facing roughly the same way, are flagged as outer wall so
//! the simplifier can keep the silhouette intact.

use crate::adjacency::{MeshAdjacency, VertexId};
use itertools::Itertools;
use log::debug;
use meshlod_core::{
    triangle_normal, Error, IndexStorage, IndexWidth, MeshBuffers, Point3f, Result,
    SubMeshBuffers, Vector3f, VertexBuffer,
};

/// Face of the convex hull
#[derive(Debug, Clone)]
pub struct HullTriangle {
    pub vertices: [VertexId; 3],
    /// Outward unit normal
    pub normal: Vector3f,
    pub removed: bool,
}

/// Marks the vertices that are visible from outside of the mesh.
pub struct OutsideMarker<'a> {
    adjacency: &'a MeshAdjacency,
    /// Tolerance for comparing positions and plane distances
    epsilon: f32,
    walk_angle: f32,
    hull: Vec<HullTriangle>,
    centroid: Point3f,
    inside_hull: Vec<bool>,
}

impl<'a> OutsideMarker<'a> {
    /// Create a marker for `adjacency`.
    ///
    /// `bounding_sphere_radius` scales the float tolerance and must be
    /// positive. `walk_angle` is the cosine of the largest angle between a
    /// hull face and a mesh triangle that the outside walk still crosses.
    pub fn new(
        adjacency: &'a MeshAdjacency,
        bounding_sphere_radius: f32,
        walk_angle: f32,
    ) -> Result<Self> {
        if adjacency.vertices.is_empty() {
            return Err(Error::InvalidData(
                "outside marker needs at least one vertex".to_string(),
            ));
        }
        if !(bounding_sphere_radius > 0.0) || !bounding_sphere_radius.is_finite() {
            return Err(Error::InvalidData(format!(
                "bounding sphere radius must be positive, got {}",
                bounding_sphere_radius
            )));
        }
        if !(-1.0001..=1.0001).contains(&walk_angle) {
            return Err(Error::Config(format!(
                "walk angle {} is not a valid cosine",
                walk_angle
            )));
        }

        Ok(Self {
            adjacency,
            epsilon: bounding_sphere_radius * f32::EPSILON * 4.0,
            walk_angle,
            hull: Vec::new(),
            centroid: Point3f::origin(),
            inside_hull: Vec::new(),
        })
    }

    /// Build the hull and return the outer wall flag of every vertex.
    pub fn mark_outside(&mut self) -> Result<Vec<bool>> {
        self.generate_hull()?;
        Ok(self.mark_vertices())
    }

    /// Faces of the last generated hull
    pub fn hull(&self) -> &[HullTriangle] {
        &self.hull
    }

    /// Grow the convex hull over all vertices.
    pub fn generate_hull(&mut self) -> Result<()> {
        self.init_hull()?;

        // Faces appended while adding vertices are visited by this loop too.
        let mut i = 0;
        while i < self.hull.len() {
            if !self.hull[i].removed {
                if let Some(v) = self.furthest_vertex(i) {
                    self.add_vertex(v);
                }
            }
            i += 1;
        }

        self.hull.retain(|t| !t.removed);
        debug!("convex hull generated with {} faces", self.hull.len());
        Ok(())
    }

    fn position(&self, v: VertexId) -> &Point3f {
        &self.adjacency.vertices[v.0].position
    }

    fn init_hull(&mut self) -> Result<()> {
        let adjacency = self.adjacency;
        let vertices = &adjacency.vertices;
        self.hull.clear();
        self.hull.reserve(vertices.len());
        self.inside_hull = vec![false; vertices.len()];

        let degenerate = || {
            Error::Algorithm("mesh is too flat to build a convex hull".to_string())
        };

        let mut min_y = f32::MAX;
        let mut seed0 = None;
        for (i, v) in vertices.iter().enumerate() {
            if v.position.y < min_y {
                min_y = v.position.y;
                seed0 = Some(VertexId(i));
            }
        }
        let seed0 = seed0.ok_or_else(degenerate)?;
        let p0 = *self.position(seed0);

        let seed1 = furthest_by(vertices.len(), |i| {
            (vertices[i].position - p0).norm_squared()
        })
        .ok_or_else(degenerate)?;
        let p1 = *self.position(seed1);

        let line = p1 - p0;
        let line_len = line.norm_squared();
        let seed2 = furthest_by(vertices.len(), |i| {
            line.cross(&(p0 - vertices[i].position)).norm_squared() / line_len
        })
        .ok_or_else(degenerate)?;
        let p2 = *self.position(seed2);

        let plane_normal = triangle_normal(&p0, &p1, &p2);
        let seed3 = furthest_by(vertices.len(), |i| {
            plane_normal.dot(&(vertices[i].position - p0)).abs()
        })
        .ok_or_else(degenerate)?;
        let p3 = *self.position(seed3);

        let volume = (p0 - p3).dot(&(p1 - p3).cross(&(p2 - p3))).abs() / 6.0;
        if volume <= self.epsilon {
            return Err(degenerate());
        }

        self.centroid = Point3f::from((p0.coords + p1.coords + p2.coords + p3.coords) / 4.0);
        for seed in [seed0, seed1, seed2, seed3] {
            self.inside_hull[seed.0] = true;
        }
        self.create_triangle(seed0, seed1, seed2);
        self.create_triangle(seed0, seed1, seed3);
        self.create_triangle(seed0, seed2, seed3);
        self.create_triangle(seed1, seed2, seed3);
        Ok(())
    }

    /// Push a hull face, flipped so the centroid is behind it
    fn create_triangle(&mut self, a: VertexId, b: VertexId, c: VertexId) {
        let mut tri = HullTriangle {
            vertices: [a, b, c],
            normal: self.face_normal([a, b, c]),
            removed: false,
        };
        if self.is_visible(&tri, &self.centroid) {
            tri.vertices.swap(0, 1);
            tri.normal = self.face_normal(tri.vertices);
        }
        self.hull.push(tri);
    }

    fn face_normal(&self, [a, b, c]: [VertexId; 3]) -> Vector3f {
        triangle_normal(self.position(a), self.position(b), self.position(c))
    }

    fn is_visible(&self, tri: &HullTriangle, point: &Point3f) -> bool {
        tri.normal.dot(&self.position(tri.vertices[0]).coords) < tri.normal.dot(&point.coords)
    }

    /// Vertex outside of the hull furthest in front of face `t`
    fn furthest_vertex(&self, t: usize) -> Option<VertexId> {
        let tri = &self.hull[t];
        let origin = *self.position(tri.vertices[0]);
        let mut furthest = None;
        let mut best = 0.0f32;
        for (i, v) in self.adjacency.vertices.iter().enumerate() {
            if self.inside_hull[i] {
                continue;
            }
            let dist = tri.normal.dot(&(v.position - origin));
            if dist > best {
                best = dist;
                furthest = Some(VertexId(i));
            }
        }
        furthest
    }

    fn add_vertex(&mut self, v: VertexId) {
        self.inside_hull[v.0] = true;
        let visible = self.visible_triangles(v);
        if visible.is_empty() {
            return;
        }

        let mut edges = Vec::with_capacity(visible.len() * 3);
        for &t in &visible {
            let [a, b, c] = self.hull[t].vertices;
            for (x, y) in [(a, b), (b, c), (c, a)] {
                edges.push(if x <= y { (x, y) } else { (y, x) });
            }
            self.hull[t].removed = true;
        }
        edges.sort_unstable();
        // Edges shared by two visible faces are interior to the removed region.
        let horizon: Vec<(VertexId, VertexId)> = edges
            .into_iter()
            .dedup_with_count()
            .filter(|(count, _)| *count == 1)
            .map(|(_, edge)| edge)
            .collect();

        for (a, b) in horizon {
            self.create_triangle(a, b, v);
        }
    }

    fn visible_triangles(&self, v: VertexId) -> Vec<usize> {
        let target = self.position(v);
        let mut visible = Vec::new();
        for (i, tri) in self.hull.iter().enumerate() {
            if tri.removed {
                continue;
            }
            let dot1 = tri.normal.dot(&self.position(tri.vertices[0]).coords);
            let dot2 = tri.normal.dot(&target.coords);
            if (dot2 - dot1).abs() <= self.epsilon {
                // On the face plane: inside the face means inside the hull.
                if self.is_inside_triangle(target, tri) {
                    return Vec::new();
                }
                visible.push(i);
            } else if dot1 < dot2 {
                visible.push(i);
            }
        }
        visible
    }

    /// Whether a point on the plane of `tri` lies inside it.
    fn is_inside_triangle(&self, target: &Point3f, tri: &HullTriangle) -> bool {
        let [p0, p1, p2] = tri.vertices.map(|v| *self.position(v));
        let n = tri.normal;

        let d0 = point_to_line_dir(target, &p0, &p1, &n);
        if d0.abs() <= self.epsilon {
            return self.is_inside_line(target, &p0, &p1);
        }
        let d1 = point_to_line_dir(target, &p1, &p2, &n);
        if d1.abs() <= self.epsilon {
            return self.is_inside_line(target, &p1, &p2);
        }
        if (d0 < 0.0) != (d1 < 0.0) {
            return false;
        }
        let d2 = point_to_line_dir(target, &p2, &p0, &n);
        if d2.abs() <= self.epsilon {
            return self.is_inside_line(target, &p2, &p0);
        }
        (d1 < 0.0) == (d2 < 0.0)
    }

    /// Whether `target`, assumed on the line `p0 p1`, lies between them.
    fn is_inside_line(&self, target: &Point3f, p0: &Point3f, p1: &Point3f) -> bool {
        let v1 = p1 - p0;
        let v2 = target - p0;
        self.is_same_position(target, p1)
            || (v1.dot(&v2) > 0.0 && v1.norm_squared() > v2.norm_squared())
    }

    fn is_same_position(&self, a: &Point3f, b: &Point3f) -> bool {
        (a.x - b.x).abs() <= self.epsilon
            && (a.y - b.y).abs() <= self.epsilon
            && (a.z - b.z).abs() <= self.epsilon
    }

    /// Flood the outer wall flag from every hull face over the mesh.
    pub fn mark_vertices(&self) -> Vec<bool> {
        let vertices = &self.adjacency.vertices;
        let triangles = &self.adjacency.triangles;
        let mut outer = vec![false; vertices.len()];
        let mut in_pass = vec![false; vertices.len()];
        let mut stack = Vec::new();

        for hull_tri in &self.hull {
            in_pass.iter_mut().for_each(|f| *f = false);
            stack.clear();
            push_unvisited(&hull_tri.vertices, &mut in_pass, &mut outer, &mut stack);

            while let Some(v) = stack.pop() {
                for t in &vertices[v.0].triangles {
                    let tri = &triangles[t.0];
                    if hull_tri.normal.dot(&tri.normal) > self.walk_angle {
                        push_unvisited(&tri.vertices, &mut in_pass, &mut outer, &mut stack);
                    }
                }
            }
        }

        debug!(
            "{} of {} vertices marked as outer wall",
            outer.iter().filter(|&&o| o).count(),
            outer.len()
        );
        outer
    }

    /// Hull as a standalone mesh with one unshared vertex per face corner.
    pub fn convex_hull_mesh(&mut self) -> Result<MeshBuffers> {
        self.generate_hull()?;

        let positions: Vec<Point3f> = self
            .hull
            .iter()
            .flat_map(|t| t.vertices)
            .map(|v| *self.position(v))
            .collect();
        let width = if positions.len() <= u16::MAX as usize + 1 {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        };
        let mut indices = IndexStorage::with_capacity(width, positions.len());
        for i in 0..positions.len() as u32 {
            indices.push(i);
        }

        Ok(MeshBuffers {
            shared_vertices: Some(VertexBuffer::new(positions)),
            submeshes: vec![SubMeshBuffers {
                use_shared_vertices: true,
                vertices: None,
                indices,
            }],
        })
    }
}

/// Index with the largest positive score
fn furthest_by(count: usize, score: impl Fn(usize) -> f32) -> Option<VertexId> {
    let mut best = 0.0f32;
    let mut found = None;
    for i in 0..count {
        let s = score(i);
        if s > best {
            best = s;
            found = Some(VertexId(i));
        }
    }
    found
}

/// Signed side of `target` relative to the edge `p0 p1` within a plane of normal `n`
fn point_to_line_dir(target: &Point3f, p0: &Point3f, p1: &Point3f, n: &Vector3f) -> f32 {
    n.cross(&(p1 - p0)).dot(&(target - p0))
}

fn push_unvisited(
    tri: &[VertexId; 3],
    in_pass: &mut [bool],
    outer: &mut [bool],
    stack: &mut Vec<VertexId>,
) {
    for &v in tri {
        if !in_pass[v.0] {
            in_pass[v.0] = true;
            outer[v.0] = true;
            stack.push(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use approx::assert_relative_eq;
    use meshlod_core::Bounded;

    fn marked(input: &MeshBuffers, walk_angle: f32) -> Vec<bool> {
        let adjacency = MeshAdjacency::build(input, true, &[]).unwrap();
        let radius = input.bounding_sphere_radius();
        OutsideMarker::new(&adjacency, radius, walk_angle)
            .unwrap()
            .mark_outside()
            .unwrap()
    }

    #[test]
    fn test_octahedron_hull() {
        let input = octahedron();
        let adjacency = MeshAdjacency::build(&input, true, &[]).unwrap();
        let mut marker = OutsideMarker::new(&adjacency, 1.0, 0.0).unwrap();
        marker.generate_hull().unwrap();

        assert_eq!(marker.hull().len(), 8);
        for tri in marker.hull() {
            assert!(!tri.removed);
            // every face of a regular octahedron points away from the origin
            let p = adjacency.vertices[tri.vertices[0].0].position;
            assert!(tri.normal.dot(&p.coords) > 0.0);
            assert_relative_eq!(tri.normal.norm(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_walk_angle_one_marks_only_hull_vertices() {
        let flags = marked(&octahedron_with_core(), 1.0);
        assert_eq!(flags.len(), 10);
        assert!(flags[..6].iter().all(|&f| f));
        assert!(flags[6..].iter().all(|&f| !f));
    }

    #[test]
    fn test_marked_count_grows_with_walk() {
        let input = split_octahedron();
        let counts: Vec<usize> = [1.0, 0.0, -1.0]
            .iter()
            .map(|&walk| marked(&input, walk).iter().filter(|&&f| f).count())
            .collect();
        assert_eq!(counts, vec![6, 7, 7]);
    }

    #[test]
    fn test_flat_mesh_is_rejected() {
        let input = plane_grid(4);
        let adjacency = MeshAdjacency::build(&input, true, &[]).unwrap();
        let mut marker = OutsideMarker::new(&adjacency, 5.0, 0.0).unwrap();
        assert!(matches!(marker.generate_hull(), Err(Error::Algorithm(_))));
    }

    #[test]
    fn test_invalid_parameters() {
        let input = octahedron();
        let adjacency = MeshAdjacency::build(&input, true, &[]).unwrap();
        assert!(OutsideMarker::new(&adjacency, 0.0, 0.0).is_err());
        assert!(OutsideMarker::new(&adjacency, 1.0, 1.5).is_err());
    }

    #[test]
    fn test_sphere_hull_contains_all_vertices() {
        let input = octahedron_sphere(2);
        let adjacency = MeshAdjacency::build(&input, true, &[]).unwrap();
        let mut marker = OutsideMarker::new(&adjacency, 1.0, 0.0).unwrap();
        let flags = marker.mark_outside().unwrap();
        assert!(flags.iter().all(|&f| f));
        for tri in marker.hull() {
            let origin = adjacency.vertices[tri.vertices[0].0].position;
            for v in &adjacency.vertices {
                assert!(tri.normal.dot(&(v.position - origin)) <= 1e-5);
            }
        }
    }

    #[test]
    fn test_convex_hull_mesh() {
        let input = octahedron_with_core();
        let adjacency = MeshAdjacency::build(&input, true, &[]).unwrap();
        let mut marker = OutsideMarker::new(&adjacency, 1.0, 0.0).unwrap();
        let hull = marker.convex_hull_mesh().unwrap();
        assert_eq!(hull.vertex_count(), 24);
        assert_eq!(hull.submeshes[0].indices.len(), 24);
        assert_eq!(hull.submeshes[0].indices.width(), IndexWidth::U16);
        assert_relative_eq!(hull.bounding_sphere_radius(), 1.0);
    }
}
