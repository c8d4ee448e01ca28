//! Bufferとそのmemoryを定義する。

use super::memory::DeviceMemory;
use crate::{
    context::DeviceChild, utils::resolve_range, BufferUsage, Context, Device, DeviceHandle, Error,
    Handle, MappedMemory, MemoryProperties, Result,
};
use ash::vk;
use log::debug;

/// BufferのHandle
pub type BufferHandle = Handle<Buffer>;

/// 線形なGPUメモリ領域
#[derive(Debug)]
pub struct Buffer {
    device: DeviceHandle,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: u64,
    usage: BufferUsage,
}
impl Buffer {
    fn new(
        device_handle: DeviceHandle,
        device: &Device,
        usage: BufferUsage,
        memory_properties: MemoryProperties,
        size: u64,
    ) -> Result<Self> {
        // bufferの作成
        let buffer_create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            device
                .create_buffer(&buffer_create_info, None)
                .map_err(Error::UnableToCreateBuffer)?
        };

        // memoryの確保とバインド
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match DeviceMemory::allocate(device, &requirements, memory_properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory.memory, 0) } {
            unsafe {
                memory.free(device);
                device.destroy_buffer(buffer, None);
            }
            return Err(Error::UnableToBindMemory(err));
        }

        Ok(Self {
            device: device_handle,
            buffer,
            memory,
            size,
            usage,
        })
    }

    /// Bufferのbyte数
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// 確保したmemoryのproperty
    pub fn memory_properties(&self) -> MemoryProperties {
        self.memory.properties
    }

    // raw

    pub unsafe fn buffer_raw(&self) -> vk::Buffer {
        self.buffer
    }
}

impl DeviceChild for Buffer {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_buffer(self.buffer, None);
        self.memory.free(device);
    }
}

// create系
impl Context {
    /// memory_propertiesを満たすmemoryにsize byteのBufferを作成する
    pub fn create_buffer(
        &mut self,
        device: DeviceHandle,
        usage: BufferUsage,
        memory_properties: MemoryProperties,
        size: u64,
    ) -> Result<BufferHandle> {
        let buffer = Buffer::new(device, self.device(device)?, usage, memory_properties, size)?;
        debug!(
            "created buffer: {} bytes, {:?}, {:?}",
            size, usage, buffer.memory.properties
        );
        Ok(self.buffers.insert(buffer))
    }

    /// Bufferを破棄する
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        let device = self.buffers.get(handle)?.device;
        self.device(device)?;
        let buffer = self.buffers.remove(handle)?;
        unsafe { buffer.destroy(self.device(device)?) };
        Ok(())
    }

    /// Bufferを取得する
    pub fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers.get(handle)
    }

    /// Bufferのbyte数を取得する
    pub fn buffer_size(&self, handle: BufferHandle) -> Result<u64> {
        Ok(self.buffers.get(handle)?.size)
    }

    /// host visibleなBufferの `offset` から `size` byteをmapする。
    /// sizeに `WHOLE_SIZE` を指定するとoffsetから末尾までをmapする。
    pub fn map_buffer(
        &self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<MappedMemory<'_>> {
        let buffer = self.buffers.get(handle)?;
        let size = resolve_range(buffer.size, offset, size)?;
        buffer
            .memory
            .map(self.device(buffer.device)?, offset, size)
    }
}
