//! Init Context: the façade given to a node's `init` callback, the one
//! lifecycle step that runs once at instantiation rather than every frame.

use crate::env::GraphEnv;

pub struct InitContext<'a> {
    env: &'a GraphEnv<'a>,
}

impl<'a> InitContext<'a> {
    pub fn new(env: &'a GraphEnv<'a>) -> Self {
        InitContext { env }
    }

    pub fn pipeline_cache(&self) -> &dyn crate::device::PipelineCache {
        self.env.pipeline_cache
    }

    pub fn device(&self) -> &dyn crate::device::GpuDevice {
        self.env.device
    }
}
