use strata_rhi::RenderPass;

use super::{InputScope, MaterialHandle, MaterialInputSet};

/// A material variant with its own local-scope inputs. Pipelines, global and per-kind inputs
/// come from the parent material.
#[derive(Debug)]
pub struct MaterialInstance {
    material: MaterialHandle,
    local: MaterialInputSet,
}

impl MaterialInstance {
    pub(crate) fn new(material: MaterialHandle, local: MaterialInputSet) -> Self {
        Self { material, local }
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn local_inputs(&self) -> &MaterialInputSet {
        &self.local
    }

    pub fn local_inputs_mut(&mut self) -> &mut MaterialInputSet {
        &mut self.local
    }

    pub fn cmd_bind_local_uniforms(&self, pass: &mut dyn RenderPass) {
        if let Some(set) = self.local.descriptor_set(None) {
            pass.bind_descriptor_set(InputScope::Local.set_index(), set, &[]);
        }
    }
}
