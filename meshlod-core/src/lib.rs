//! Core data structures for meshlod
//!
//! This crate provides the types shared by the simplifier and the background
//! generation pipeline: point aliases, raw index/vertex buffers, the live mesh
//! that LOD levels get installed into, and the LOD configuration.

pub mod point;
pub mod buffer;
pub mod mesh;
pub mod config;
pub mod traits;
pub mod error;

pub use point::*;
pub use buffer::*;
pub use mesh::*;
pub use config::*;
pub use traits::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3};
