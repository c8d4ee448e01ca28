//! SPIR-Vから作成するShaderModuleを定義する。

use crate::{
    context::DeviceChild, utils::spirv_words, Context, Device, DeviceHandle, Error, Handle,
    Result,
};
use ash::vk;
use log::debug;

/// ShaderのHandle
pub type ShaderHandle = Handle<Shader>;

/// compute shaderのmodule
#[derive(Debug)]
pub struct Shader {
    device: DeviceHandle,
    shader_module: vk::ShaderModule,
}
impl Shader {
    // raw

    pub unsafe fn shader_module_raw(&self) -> vk::ShaderModule {
        self.shader_module
    }
}

impl DeviceChild for Shader {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_shader_module(self.shader_module, None);
    }
}

// create系
impl Context {
    /// SPIR-Vのbytesを与えてShaderを作成する
    pub fn create_shader(&mut self, device: DeviceHandle, bytes: &[u8]) -> Result<ShaderHandle> {
        let words = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let shader_module = unsafe {
            self.device(device)?
                .create_shader_module(&create_info, None)
                .map_err(Error::UnableToCreateShaderModule)?
        };
        debug!("created shader module: {} words", words.len());
        Ok(self.shaders.insert(Shader {
            device,
            shader_module,
        }))
    }

    /// Shaderを破棄する
    pub fn destroy_shader(&mut self, handle: ShaderHandle) -> Result<()> {
        let device = self.shaders.get(handle)?.device;
        self.device(device)?;
        let shader = self.shaders.remove(handle)?;
        unsafe { shader.destroy(self.device(device)?) };
        Ok(())
    }
}
