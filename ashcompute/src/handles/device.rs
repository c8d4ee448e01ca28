//! logical deviceとcompute queue、command pool、limitsをまとめたDeviceを定義する。
//! 他のすべてのオブジェクトはちょうど一つのDeviceに属する。

use crate::{
    utils::{
        check_device_extensions, physical_device_name, query_device_limits,
        select_compute_queue_family,
    },
    Context, Error, Handle, Result,
};
use ash::vk;
use log::{debug, info};
use std::{ffi::CStr, ops::Deref};

/// DeviceのHandle
pub type DeviceHandle = Handle<Device>;

/// Deviceのハードウェア制限値のうち、computeで使うもの
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    pub subgroup_size: u32,
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_invocations: u32,
    pub min_storage_buffer_offset_alignment: u64,
    pub max_storage_buffer_range: u32,
    pub max_push_constants_size: u32,
    pub non_coherent_atom_size: u64,
    /// 1 tickあたりのナノ秒
    pub timestamp_period: f32,
    /// compute queue familyのtimestampの有効bit数。0ならtimestampは使えない
    pub timestamp_valid_bits: u32,
}
impl DeviceLimits {
    pub(crate) fn from_vk(
        limits: &vk::PhysicalDeviceLimits,
        subgroup_properties: &vk::PhysicalDeviceSubgroupProperties,
        timestamp_valid_bits: u32,
    ) -> Self {
        Self {
            subgroup_size: subgroup_properties.subgroup_size.max(1),
            max_compute_work_group_size: limits.max_compute_work_group_size,
            max_compute_work_group_count: limits.max_compute_work_group_count,
            max_compute_work_group_invocations: limits.max_compute_work_group_invocations,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment.max(1),
            max_storage_buffer_range: limits.max_storage_buffer_range,
            max_push_constants_size: limits.max_push_constants_size,
            non_coherent_atom_size: limits.non_coherent_atom_size.max(1),
            timestamp_period: limits.timestamp_period,
            timestamp_valid_bits,
        }
    }

    /// timestampを書き込めるかどうか
    pub fn supports_timestamps(&self) -> bool {
        self.timestamp_valid_bits > 0
    }

    /// 2つのtimestampの差をミリ秒に変換する
    pub fn elapsed_milliseconds(&self, start: u64, end: u64) -> f64 {
        let mask = if self.timestamp_valid_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.timestamp_valid_bits) - 1
        };
        let ticks = (end & mask).wrapping_sub(start & mask) & mask;
        ticks as f64 * self.timestamp_period as f64 / 1_000_000.0
    }
}

/// logical device
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    name: String,
    pub(crate) queue: vk::Queue,
    pub(crate) queue_family_index: u32,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
}
impl Device {
    fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        required_extensions: &[&CStr],
        limits: DeviceLimits,
    ) -> Result<Self> {
        // deviceの作成
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)
            .build()];
        let extension_names = required_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<_>>();
        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names);
        let device = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(Error::UnableToCreateDevice)?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        // command poolの作成
        let command_pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let command_pool = match unsafe { device.create_command_pool(&command_pool_create_info, None) } {
            Ok(command_pool) => command_pool,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(Error::UnableToCreateCommandPool(err));
            }
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let name = physical_device_name(instance, physical_device);

        Ok(Self {
            device,
            physical_device,
            name,
            queue,
            queue_family_index,
            command_pool,
            memory_properties,
            limits,
        })
    }

    /// physical deviceの名前
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    // raw

    pub unsafe fn physical_device_raw(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub unsafe fn queue_raw(&self) -> vk::Queue {
        self.queue
    }

    /// # Safety
    /// このdeviceに属するオブジェクトはすべて破棄済みである必要がある
    pub(crate) unsafe fn destroy(self) {
        self.device.destroy_command_pool(self.command_pool, None);
        self.device.destroy_device(None);
    }
}

// Deviceはash::DeviceにDerefする
impl Deref for Device {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("queue_family_index", &self.queue_family_index)
            .field("limits", &self.limits)
            .finish()
    }
}

// create系
impl Context {
    /// index番目のphysical deviceからDeviceを作成する
    pub fn create_device(
        &mut self,
        index: usize,
        required_extensions: &[&CStr],
    ) -> Result<DeviceHandle> {
        let instance = self.instance();
        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(Error::UnableToEnumerateDevices)?
        };
        let physical_device =
            *physical_devices
                .get(index)
                .ok_or(Error::NoDeviceAtIndex {
                    index,
                    count: physical_devices.len(),
                })?;

        check_device_extensions(instance, physical_device, required_extensions)?;

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index =
            select_compute_queue_family(&queue_families).ok_or(Error::NoComputeQueueFamily)?;
        let limits = query_device_limits(
            instance,
            physical_device,
            &queue_families[queue_family_index as usize],
        );

        let device = Device::new(
            instance,
            physical_device,
            queue_family_index,
            required_extensions,
            limits,
        )?;
        info!(
            "using device {} `{}` (queue family {}, subgroup size {})",
            index,
            device.name(),
            queue_family_index,
            device.limits().subgroup_size
        );
        debug!("{:?}", device.limits());

        Ok(self.devices.insert(device))
    }

    /// Deviceとそれに属するすべてのオブジェクトを破棄する
    pub fn destroy_device(&mut self, handle: DeviceHandle) -> Result<()> {
        let device = self.device(handle)?;
        unsafe {
            device
                .device_wait_idle()
                .map_err(Error::UnableToWaitIdle)?
        };
        self.destroy_device_children(Some(handle));
        let device = self.devices.remove(handle)?;
        unsafe { device.destroy() };
        Ok(())
    }

    /// Deviceのlimitsを取得する
    pub fn device_limits(&self, handle: DeviceHandle) -> Result<&DeviceLimits> {
        Ok(self.device(handle)?.limits())
    }

    /// Deviceの名前を取得する
    pub fn device_name(&self, handle: DeviceHandle) -> Result<&str> {
        Ok(self.device(handle)?.name())
    }
}
