//! Owning registry for materials and material instances, addressed by stable handles.

use log::debug;
use slotmap::{new_key_type, SlotMap};
use strata_rhi::{Device, RenderPass};

use super::{InputScope, InputSlot, Material, MaterialDescriptor, MaterialInputSet, MaterialInstance};
use crate::error::{RenderError, Result};

new_key_type! {
    pub struct MaterialHandle;
    pub struct MaterialInstanceHandle;
}

#[derive(Debug, Default)]
pub struct MaterialRegistry {
    materials: SlotMap<MaterialHandle, Material>,
    instances: SlotMap<MaterialInstanceHandle, MaterialInstance>,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_material(
        &mut self,
        device: &dyn Device,
        desc: &MaterialDescriptor,
        per_kind_set_capacity: u32,
    ) -> Result<MaterialHandle> {
        let material = Material::new(device, desc, per_kind_set_capacity)?;
        Ok(self.materials.insert(material))
    }

    /// Create an instance of `material` with its own local inputs. The slots must describe the same
    /// bindings as the material's local scope.
    pub fn create_instance(
        &mut self,
        device: &dyn Device,
        material: MaterialHandle,
        local_inputs: Vec<InputSlot>,
    ) -> Result<MaterialInstanceHandle> {
        let parent = self.materials.get(material).ok_or(RenderError::UnknownMaterial)?;
        let local = MaterialInputSet::new(device, InputScope::Local, local_inputs, 1)?;
        if local.bindings() != parent.local_inputs().bindings() {
            return Err(RenderError::InvalidInputs(format!(
                "instance of {:?} does not match the material's local layout",
                parent.label()
            )));
        }
        Ok(self.instances.insert(MaterialInstance::new(material, local)))
    }

    pub fn material(&self, handle: MaterialHandle) -> Result<&Material> {
        self.materials.get(handle).ok_or(RenderError::UnknownMaterial)
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> Result<&mut Material> {
        self.materials.get_mut(handle).ok_or(RenderError::UnknownMaterial)
    }

    pub fn instance(&self, handle: MaterialInstanceHandle) -> Result<&MaterialInstance> {
        self.instances.get(handle).ok_or(RenderError::UnknownMaterialInstance)
    }

    pub fn instance_mut(&mut self, handle: MaterialInstanceHandle) -> Result<&mut MaterialInstance> {
        self.instances.get_mut(handle).ok_or(RenderError::UnknownMaterialInstance)
    }

    /// Check that `instance`, if any, was created from `material`.
    pub fn check_pair(&self, material: MaterialHandle, instance: Option<MaterialInstanceHandle>) -> Result<()> {
        self.material(material)?;
        if let Some(instance) = instance {
            if self.instance(instance)?.material() != material {
                return Err(RenderError::MaterialMismatch);
            }
        }
        Ok(())
    }

    /// Remove a material together with every instance created from it.
    pub fn remove_material(&mut self, handle: MaterialHandle) -> Option<Material> {
        let material = self.materials.remove(handle)?;
        self.instances.retain(|_, instance| instance.material() != handle);
        Some(material)
    }

    pub fn remove_instance(&mut self, handle: MaterialInstanceHandle) -> Option<MaterialInstance> {
        self.instances.remove(handle)
    }

    /// Drop every cached pipeline of every material.
    pub fn invalidate_all_pipelines(&mut self) {
        for (_, material) in self.materials.iter_mut() {
            material.invalidate_pipelines();
        }
        debug!("invalidated pipelines of {} materials", self.materials.len());
    }

    /// Bind the local scope: the instance's own set, or the material's when there is no instance.
    pub fn cmd_bind_local_uniforms(
        &self,
        pass: &mut dyn RenderPass,
        material: MaterialHandle,
        instance: Option<MaterialInstanceHandle>,
    ) -> Result<()> {
        match instance {
            Some(instance) => self.instance(instance)?.cmd_bind_local_uniforms(pass),
            None => self.material(material)?.cmd_bind_local_uniforms(pass),
        }
        Ok(())
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_descriptor, MockDevice};
    use strata_rhi::ShaderStages;

    #[test]
    fn instances_share_the_local_layout() {
        let device = MockDevice::new();
        let mut registry = MaterialRegistry::new();
        let material = registry.create_material(&device, &test_descriptor(), 4).unwrap();
        let ok = registry.create_instance(
            &device,
            material,
            vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0.5f32; 4])],
        );
        assert!(ok.is_ok());
        let mismatched = registry.create_instance(
            &device,
            material,
            vec![InputSlot::uniform(3, ShaderStages::FRAGMENT, &[0.5f32; 4])],
        );
        assert!(matches!(mismatched, Err(RenderError::InvalidInputs(_))));
    }

    #[test]
    fn pairs_must_match() {
        let device = MockDevice::new();
        let mut registry = MaterialRegistry::new();
        let a = registry.create_material(&device, &test_descriptor(), 4).unwrap();
        let b = registry.create_material(&device, &test_descriptor(), 4).unwrap();
        let instance_of_a = registry
            .create_instance(&device, a, vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0f32; 4])])
            .unwrap();
        assert!(registry.check_pair(a, Some(instance_of_a)).is_ok());
        assert!(matches!(
            registry.check_pair(b, Some(instance_of_a)),
            Err(RenderError::MaterialMismatch)
        ));
    }

    #[test]
    fn removing_a_material_removes_its_instances() {
        let device = MockDevice::new();
        let mut registry = MaterialRegistry::new();
        let material = registry.create_material(&device, &test_descriptor(), 4).unwrap();
        let instance = registry
            .create_instance(&device, material, vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0f32; 4])])
            .unwrap();
        assert!(registry.remove_material(material).is_some());
        assert!(matches!(registry.instance(instance), Err(RenderError::UnknownMaterialInstance)));
        assert!(matches!(registry.check_pair(material, None), Err(RenderError::UnknownMaterial)));
    }
}
