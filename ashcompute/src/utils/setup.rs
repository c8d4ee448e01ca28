use crate::{DeviceLimits, Error, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::{CStr, CString};

/// physical deviceがサポートしていない拡張機能のうち最初のものを返す関数
pub fn first_missing_extension(
    available_extensions: &[CString],
    required_extensions: &[&CStr],
) -> Option<String> {
    let available = available_extensions
        .iter()
        .map(|name| name.as_c_str())
        .collect::<HashSet<_>>();
    required_extensions
        .iter()
        .find(|name| !available.contains(*name))
        .map(|name| name.to_string_lossy().into_owned())
}

/// ComputeをサポートしているQueueFamilyのうち最初のもののindexを返す関数
pub fn select_compute_queue_family(queue_families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    queue_families
        .iter()
        .position(|queue_family| {
            queue_family.queue_count > 0 && queue_family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

/// physical deviceの拡張機能のサポートを確認する関数
pub(crate) fn check_device_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    required_extensions: &[&CStr],
) -> Result<()> {
    // 列挙に失敗した場合はどの拡張もサポートしていないものとして扱う
    let device_extensions = unsafe {
        instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
    };
    let device_extension_names = device_extensions
        .iter()
        .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()).to_owned() })
        .collect::<Vec<_>>();
    match first_missing_extension(&device_extension_names, required_extensions) {
        Some(name) => Err(Error::ExtensionNotSupported(name)),
        None => Ok(()),
    }
}

/// physical deviceのlimitsを読み出してDeviceLimitsに変換する関数
pub(crate) fn query_device_limits(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: &vk::QueueFamilyProperties,
) -> DeviceLimits {
    let mut subgroup_properties = vk::PhysicalDeviceSubgroupProperties::builder().build();
    let mut properties2 = vk::PhysicalDeviceProperties2::builder()
        .push_next(&mut subgroup_properties)
        .build();
    unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };
    DeviceLimits::from_vk(
        &properties2.properties.limits,
        &subgroup_properties,
        queue_family.timestamp_valid_bits,
    )
}

/// physical deviceの名前を取得する関数
pub(crate) fn physical_device_name(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> String {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn picks_first_compute_queue_family() {
        let families = [
            queue_family(vk::QueueFlags::TRANSFER),
            queue_family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            queue_family(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(select_compute_queue_family(&families), Some(1));
    }

    #[test]
    fn no_compute_queue_family() {
        let families = [
            queue_family(vk::QueueFlags::TRANSFER),
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::COMPUTE,
                queue_count: 0,
                ..Default::default()
            },
        ];
        assert_eq!(select_compute_queue_family(&families), None);
    }

    #[test]
    fn reports_missing_extension() {
        let available = vec![
            CString::new("VK_KHR_storage_buffer_storage_class").unwrap(),
            CString::new("VK_KHR_shader_float16_int8").unwrap(),
        ];
        let present = CString::new("VK_KHR_shader_float16_int8").unwrap();
        let missing = CString::new("VK_KHR_ray_query").unwrap();
        assert_eq!(first_missing_extension(&available, &[present.as_c_str()]), None);
        assert_eq!(
            first_missing_extension(&available, &[present.as_c_str(), missing.as_c_str()]),
            Some("VK_KHR_ray_query".to_string())
        );
        assert_eq!(first_missing_extension(&[], &[]), None);
    }
}
