//! LOD generation configuration

use crate::{Error, Point3f, Result};
use serde::{Deserialize, Serialize};

/// Highest number of LOD levels a mesh can carry.
pub const MAX_LOD_LEVELS: usize = 0xffff;

/// How the renderer picks a LOD level, which fixes the sort order of level values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LodStrategy {
    /// Camera distance; values must be ascending.
    Distance,
    /// Projected pixel count; values must be descending.
    PixelCount,
}

impl LodStrategy {
    /// Check that `values` are strictly ordered for this strategy.
    pub fn is_sorted(self, values: &[f32]) -> bool {
        values.windows(2).all(|w| match self {
            LodStrategy::Distance => w[0] < w[1],
            LodStrategy::PixelCount => w[0] > w[1],
        })
    }
}

/// How far a single LOD level is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReductionMethod {
    /// Remove this fraction (0..=1) of the unique vertices.
    Proportional(f32),
    /// Remove this many unique vertices.
    Constant(usize),
    /// Collapse while the cheapest collapse costs less than this.
    CollapseCost(f32),
    /// Collapse until at most this many triangles remain.
    TriangleCount(usize),
}

/// One requested LOD level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    /// Distance or pixel count at which the level becomes active
    pub distance: f32,
    pub reduction: ReductionMethod,
    /// Unique vertices left after generating this level
    #[serde(default)]
    pub out_unique_vertex_count: usize,
    /// Set when the level did not reduce anything and was not baked
    #[serde(default)]
    pub out_skipped: bool,
}

impl LodLevel {
    pub fn new(distance: f32, reduction: ReductionMethod) -> Self {
        Self {
            distance,
            reduction,
            out_unique_vertex_count: 0,
            out_skipped: false,
        }
    }
}

/// Collapse cost override for one directed edge, addressed by positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfiledEdge {
    pub src: Point3f,
    pub dst: Point3f,
    pub cost: f32,
}

/// Tuning knobs of the simplifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodAdvancedConfig {
    /// Bake adjacent levels into one shared index buffer
    pub use_compression: bool,
    /// Take vertex normals into account when computing collapse costs
    pub use_vertex_normals: bool,
    /// Cost weight of outer wall vertices; 0 disables the outside marker,
    /// 1 keeps outer wall vertices from ever collapsing
    pub outside_weight: f32,
    /// Cosine of the largest face angle the outside walk crosses
    pub outside_walk_angle: f32,
    /// Collapse cost overrides
    pub profile: Vec<ProfiledEdge>,
}

impl Default for LodAdvancedConfig {
    fn default() -> Self {
        Self {
            use_compression: true,
            use_vertex_normals: true,
            outside_weight: 0.0,
            outside_walk_angle: 0.0,
            profile: Vec::new(),
        }
    }
}

/// Full LOD request for one mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodConfig {
    pub strategy: LodStrategy,
    pub levels: Vec<LodLevel>,
    #[serde(default)]
    pub advanced: LodAdvancedConfig,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            strategy: LodStrategy::Distance,
            levels: Vec::new(),
            advanced: LodAdvancedConfig::default(),
        }
    }
}

impl LodConfig {
    pub fn new(strategy: LodStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Append a level
    pub fn with_level(mut self, distance: f32, reduction: ReductionMethod) -> Self {
        self.levels.push(LodLevel::new(distance, reduction));
        self
    }

    /// Enable or disable merged LOD buffers
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.advanced.use_compression = enabled;
        self
    }

    pub fn with_vertex_normals(mut self, enabled: bool) -> Self {
        self.advanced.use_vertex_normals = enabled;
        self
    }

    /// Set outside marker weight and walk angle
    pub fn with_outside_weight(mut self, weight: f32, walk_angle: f32) -> Self {
        self.advanced.outside_weight = weight;
        self.advanced.outside_walk_angle = walk_angle;
        self
    }

    pub fn with_profile(mut self, profile: Vec<ProfiledEdge>) -> Self {
        self.advanced.profile = profile;
        self
    }

    /// Four pixel-count levels with collapse cost thresholds scaled by the
    /// mesh radius. Early levels are close to the camera and barely reduced,
    /// the last one is far away and reduced aggressively.
    pub fn auto(bounding_sphere_radius: f32) -> Self {
        let mut config = Self::new(LodStrategy::PixelCount);
        for i in 2..6 {
            let i4 = (i * i * i * i) as f32;
            let i5 = i4 * i as f32;
            config.levels.push(LodLevel::new(
                3_388_608.0 / i4,
                ReductionMethod::CollapseCost(bounding_sphere_radius / 100_000.0 * i5),
            ));
        }
        config
    }

    /// Values the renderer switches levels at
    pub fn values(&self) -> Vec<f32> {
        self.levels.iter().map(|l| l.distance).collect()
    }

    /// Number of levels that were actually baked
    pub fn baked_level_count(&self) -> usize {
        self.levels.iter().filter(|l| !l.out_skipped).count()
    }

    /// Reject configurations that can not produce a valid LOD chain.
    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(Error::Config("no LOD levels requested".to_string()));
        }
        if self.levels.len() > MAX_LOD_LEVELS {
            return Err(Error::Config(format!(
                "{} LOD levels requested, at most {} are supported",
                self.levels.len(),
                MAX_LOD_LEVELS
            )));
        }
        if !self.strategy.is_sorted(&self.values()) {
            return Err(Error::Config(format!(
                "LOD values are not sorted for the {:?} strategy",
                self.strategy
            )));
        }
        for (i, level) in self.levels.iter().enumerate() {
            match level.reduction {
                ReductionMethod::Proportional(r) if !(0.0..=1.0).contains(&r) => {
                    return Err(Error::Config(format!(
                        "level {}: proportional reduction must be between 0.0 and 1.0",
                        i
                    )));
                }
                ReductionMethod::CollapseCost(c) if c.is_nan() || c < 0.0 => {
                    return Err(Error::Config(format!(
                        "level {}: collapse cost threshold must be non-negative",
                        i
                    )));
                }
                _ => {}
            }
        }
        let walk = self.advanced.outside_walk_angle;
        if !(-1.0001..=1.0001).contains(&walk) {
            return Err(Error::Config(format!(
                "outside walk angle {} is not a valid cosine",
                walk
            )));
        }
        Ok(())
    }
}
