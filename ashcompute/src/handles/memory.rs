//! BufferとImageが使うdevice memoryの確保と、host側へのmapを扱う。

use crate::{
    utils::{atom_aligned_range, find_memory_type, native_map_range},
    Device, Error, MemoryProperties, Result,
};
use ash::vk;
use std::{
    cell::Cell,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// memoryがmap中かどうかのフラグ。
/// 同じdevice memoryは同時に一つしかmapできない。
#[derive(Debug, Default)]
pub(crate) struct MapFlag(Cell<bool>);
impl MapFlag {
    /// map中にする。すでにmap中なら `AlreadyMapped`
    pub(crate) fn acquire(&self) -> Result<()> {
        if self.0.replace(true) {
            return Err(Error::AlreadyMapped);
        }
        Ok(())
    }

    pub(crate) fn release(&self) {
        self.0.set(false);
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.0.get()
    }
}

/// 確保したdevice memory
#[derive(Debug)]
pub(crate) struct DeviceMemory {
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) allocation_size: u64,
    /// 実際に選ばれたmemory typeのproperty
    pub(crate) properties: MemoryProperties,
    mapped: MapFlag,
}
impl DeviceMemory {
    /// requirementsを満たし、requestedのpropertyをすべて持つmemoryを確保する
    pub(crate) fn allocate(
        device: &Device,
        requirements: &vk::MemoryRequirements,
        requested: MemoryProperties,
    ) -> Result<Self> {
        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            requested.to_vk(),
        )?;
        let properties = MemoryProperties::from_vk(
            device.memory_properties.memory_types[memory_type_index as usize].property_flags,
        );

        let memory_allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe {
            device
                .allocate_memory(&memory_allocate_info, None)
                .map_err(Error::UnableToAllocateMemory)?
        };

        Ok(Self {
            memory,
            allocation_size: requirements.size,
            properties,
            mapped: MapFlag::default(),
        })
    }

    /// memoryの範囲をmapする。`size` は解決済みの長さ。
    /// 長さ0の場合はvkMapMemoryを呼ばずに空のMappedMemoryを返す。
    pub(crate) fn map<'a>(
        &'a self,
        device: &'a Device,
        offset: u64,
        size: u64,
    ) -> Result<MappedMemory<'a>> {
        if !self.properties.contains(MemoryProperties::HOST_VISIBLE) {
            return Err(Error::NotHostVisible);
        }
        let len = usize::try_from(size).map_err(|_| Error::RangeOutOfBounds {
            offset,
            size,
            capacity: self.allocation_size,
        })?;
        self.mapped.acquire()?;

        let ptr = if let Some((offset, size)) = native_map_range(offset, size) {
            let ptr = unsafe {
                device.map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
            };
            let ptr = match ptr {
                Ok(ptr) => ptr,
                Err(err) => {
                    self.mapped.release();
                    return Err(Error::UnableToMapMemory(err));
                }
            };
            match NonNull::new(ptr as *mut u8) {
                Some(ptr) => ptr,
                None => {
                    unsafe { device.unmap_memory(self.memory) };
                    self.mapped.release();
                    return Err(Error::UnableToMapMemory(
                        vk::Result::ERROR_MEMORY_MAP_FAILED,
                    ));
                }
            }
        } else {
            NonNull::dangling()
        };
        Ok(MappedMemory {
            device,
            memory: self.memory,
            mapped: &self.mapped,
            ptr,
            len,
            offset,
            allocation_size: self.allocation_size,
            coherent: self.properties.contains(MemoryProperties::HOST_COHERENT),
        })
    }

    pub(crate) unsafe fn free(&self, device: &Device) {
        device.free_memory(self.memory, None);
    }
}

/// mapされたhost visibleなmemoryの範囲。
/// Dropでunmapされる。
pub struct MappedMemory<'a> {
    device: &'a Device,
    memory: vk::DeviceMemory,
    mapped: &'a MapFlag,
    ptr: NonNull<u8>,
    len: usize,
    offset: u64,
    allocation_size: u64,
    coherent: bool,
}
impl<'a> MappedMemory<'a> {
    /// mapした範囲のbyte数
    pub fn size(&self) -> u64 {
        self.len as u64
    }

    /// host coherentなmemoryかどうか
    pub fn is_coherent(&self) -> bool {
        self.coherent
    }

    /// hostからの書き込みをdeviceに見えるようにする。
    /// coherentなmemoryでは何もしない。
    pub fn flush(&self) -> Result<()> {
        self.flush_range(0, self.len as u64)
    }

    /// map範囲の中の `offset` から `size` byteをflushする
    pub fn flush_range(&self, offset: u64, size: u64) -> Result<()> {
        if self.coherent || self.len == 0 {
            return Ok(());
        }
        let range = self.memory_range(offset, size)?;
        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(Error::UnableToFlushMemory)
        }
    }

    /// deviceからの書き込みをhostに見えるようにする。
    /// coherentなmemoryでは何もしない。
    pub fn invalidate(&self) -> Result<()> {
        self.invalidate_range(0, self.len as u64)
    }

    /// map範囲の中の `offset` から `size` byteをinvalidateする
    pub fn invalidate_range(&self, offset: u64, size: u64) -> Result<()> {
        if self.coherent || self.len == 0 {
            return Ok(());
        }
        let range = self.memory_range(offset, size)?;
        unsafe {
            self.device
                .invalidate_mapped_memory_ranges(&[range])
                .map_err(Error::UnableToInvalidateMemory)
        }
    }

    /// 明示的にunmapする
    pub fn unmap(self) {}

    fn memory_range(&self, offset: u64, size: u64) -> Result<vk::MappedMemoryRange> {
        let size = crate::utils::resolve_range(self.len as u64, offset, size)?;
        let (offset, size) = atom_aligned_range(
            self.offset + offset,
            size,
            self.device.limits().non_coherent_atom_size,
            self.allocation_size,
        );
        Ok(vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build())
    }
}

impl Deref for MappedMemory<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

// Drop時にunmapする
impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe { self.device.unmap_memory(self.memory) };
        }
        self.mapped.release();
    }
}

impl std::fmt::Debug for MappedMemory<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedMemory")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("coherent", &self.coherent)
            .finish()
    }
}
