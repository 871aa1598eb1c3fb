//! `GraphEnv`: the explicit context threaded through construction instead of
//! process-wide module singletons (design note "Global state").

use crate::device::{GpuDevice, PipelineCache, ResidentTextures};
use crate::registry::NodeRegistry;

/// Registry + device + pipeline cache + resident-texture lookup, bundled so
/// every construction path takes one reference instead of four.
pub struct GraphEnv<'a> {
    pub registry: &'a NodeRegistry,
    pub device: &'a dyn GpuDevice,
    pub pipeline_cache: &'a dyn PipelineCache,
    pub resident_textures: &'a dyn ResidentTextures,
}
