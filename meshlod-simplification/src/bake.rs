//! Index buffer baking
//!
//! Plain baking writes one buffer per submesh holding the live triangles.
//! Merged baking runs in two passes: the first one snapshots the live
//! triangles, the second writes one buffer laid out as
//! `[previous level only | shared | current level only]` and reports two
//! overlapping spans into it.

use crate::adjacency::MeshAdjacency;
use log::debug;
use meshlod_core::{GeneratedIndexBuffer, GeneratedLods, IndexStorage};
use std::sync::Arc;

/// Indices written for a submesh without live triangles
const EMPTY_TRIANGLE: [u32; 3] = [0, 0, 0];

/// Collects the baked spans of every submesh.
#[derive(Debug, Clone, Default)]
pub struct LodBaker {
    lods: GeneratedLods,
}

impl LodBaker {
    pub fn new(submesh_count: usize) -> Self {
        Self {
            lods: vec![Vec::new(); submesh_count],
        }
    }

    /// Spans baked so far
    pub fn lods(&self) -> &GeneratedLods {
        &self.lods
    }

    pub fn into_lods(self) -> GeneratedLods {
        self.lods
    }

    /// Number of levels baked for each submesh
    pub fn level_count(&self) -> usize {
        self.lods.first().map_or(0, Vec::len)
    }

    /// Bake the live triangles into one buffer per submesh.
    pub fn bake_lods(&mut self, adjacency: &MeshAdjacency) {
        let mut buffers: Vec<IndexStorage> = adjacency
            .index_infos
            .iter()
            .map(|info| IndexStorage::with_capacity(info.width, info.index_count.max(3)))
            .collect();

        for tri in adjacency.triangles.iter().filter(|t| !t.removed) {
            for id in tri.vertex_ids {
                buffers[tri.submesh].push(id);
            }
        }

        for (submesh, mut buffer) in buffers.into_iter().enumerate() {
            if buffer.is_empty() {
                EMPTY_TRIANGLE.iter().for_each(|&i| buffer.push(i));
            }
            let count = buffer.len();
            self.lods[submesh].push(GeneratedIndexBuffer {
                start: 0,
                count,
                buffer: Arc::new(buffer),
            });
        }
        debug!("baked LOD level {}", self.level_count());
    }

    /// One half of a merged bake.
    ///
    /// With `first_pass` the live triangles are snapshotted and nothing is
    /// emitted. Otherwise the snapshot and the current triangles are written
    /// into one buffer per submesh and two spans are emitted.
    pub fn bake_merged_lods(&mut self, adjacency: &mut MeshAdjacency, first_pass: bool) {
        if first_pass {
            for info in &mut adjacency.index_infos {
                info.prev_index_count = info.index_count;
                info.prev_only_index_count = 0;
            }
            for tri in &mut adjacency.triangles {
                tri.vertex_changed = false;
                tri.prev_lod = (!tri.removed).then_some(tri.vertex_ids);
            }
            return;
        }

        let mut buffers: Vec<IndexStorage> = adjacency
            .index_infos
            .iter()
            .map(|info| {
                let len = info.index_count + info.prev_only_index_count;
                IndexStorage::with_capacity(info.width, len.max(3))
            })
            .collect();

        // previous level only
        for tri in adjacency.triangles.iter().filter(|t| t.vertex_changed) {
            if let Some(ids) = tri.prev_lod {
                ids.iter().for_each(|&i| buffers[tri.submesh].push(i));
            }
        }
        // shared
        for tri in adjacency
            .triangles
            .iter()
            .filter(|t| !t.removed && !t.vertex_changed)
        {
            tri.vertex_ids.iter().for_each(|&i| buffers[tri.submesh].push(i));
        }
        // current level only
        for tri in adjacency
            .triangles
            .iter()
            .filter(|t| !t.removed && t.vertex_changed)
        {
            tri.vertex_ids.iter().for_each(|&i| buffers[tri.submesh].push(i));
        }

        for (submesh, mut buffer) in buffers.into_iter().enumerate() {
            let info = &adjacency.index_infos[submesh];
            let current = info.index_count;
            if current == 0 {
                EMPTY_TRIANGLE.iter().for_each(|&i| buffer.push(i));
            }
            let total = buffer.len();
            let buffer = Arc::new(buffer);

            let prev = GeneratedIndexBuffer {
                start: 0,
                count: info.prev_index_count.max(3).min(total),
                buffer: Arc::clone(&buffer),
            };
            let cur = if current == 0 {
                GeneratedIndexBuffer {
                    start: total - 3,
                    count: 3,
                    buffer,
                }
            } else {
                GeneratedIndexBuffer {
                    start: total - current,
                    count: current,
                    buffer,
                }
            };
            self.lods[submesh].push(prev);
            self.lods[submesh].push(cur);
        }
        debug!("baked merged LOD levels {} and {}", self.level_count() - 1, self.level_count());
    }
}
