//! Core traits for meshlod

use crate::{
    buffer::{MeshBuffers, VertexBuffer},
    mesh::Mesh,
    point::*,
};

/// Trait for geometry with spatial bounds
pub trait Bounded {
    /// Get the axis aligned bounding box of the object
    fn bounding_box(&self) -> (Point3f, Point3f);

    /// Radius of the origin-centred sphere enclosing every position
    fn bounding_sphere_radius(&self) -> f32;

    /// Get the center point of the bounding box
    fn center(&self) -> Point3f {
        let (min, max) = self.bounding_box();
        Point3f::new(
            (min.x + max.x) / 2.0,
            (min.y + max.y) / 2.0,
            (min.z + max.z) / 2.0,
        )
    }
}

fn bounds_of<'a>(positions: impl Iterator<Item = &'a Point3f>) -> Option<(Point3f, Point3f)> {
    let mut bounds: Option<(Point3f, Point3f)> = None;
    for p in positions {
        let (min, max) = bounds.get_or_insert((*p, *p));
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);

        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }
    bounds
}

impl Bounded for VertexBuffer {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        bounds_of(self.positions.iter()).unwrap_or((Point3f::origin(), Point3f::origin()))
    }

    fn bounding_sphere_radius(&self) -> f32 {
        self.positions
            .iter()
            .map(|p| p.coords.norm())
            .fold(0.0, f32::max)
    }
}

impl Bounded for Mesh {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        bounds_of(self.vertex_buffers().flat_map(|vb| vb.positions.iter()))
            .unwrap_or((Point3f::origin(), Point3f::origin()))
    }

    fn bounding_sphere_radius(&self) -> f32 {
        self.vertex_buffers()
            .map(|vb| vb.bounding_sphere_radius())
            .fold(0.0, f32::max)
    }
}

impl Bounded for MeshBuffers {
    fn bounding_box(&self) -> (Point3f, Point3f) {
        bounds_of(self.vertex_buffers().flat_map(|vb| vb.positions.iter()))
            .unwrap_or((Point3f::origin(), Point3f::origin()))
    }

    fn bounding_sphere_radius(&self) -> f32 {
        self.vertex_buffers()
            .map(|vb| vb.bounding_sphere_radius())
            .fold(0.0, f32::max)
    }
}
