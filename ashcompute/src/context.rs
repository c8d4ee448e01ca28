//! すべてのGPUオブジェクトのStoreを所有するContextを定義する。
//!
//! ContextがDropされると、デバイスごとにidleを待ってから
//! fence → command buffer → pipeline → shader → image → buffer → device の順に、
//! 各種類の中では新しいものから破棄する。最後にdebug messengerとinstanceを破棄する。

use crate::{
    Buffer, CommandBuffer, Device, DeviceHandle, Error, Fence, HandleStore, Image, Pipeline,
    Result, Shader,
};
use ash::{extensions::ext::DebugUtils, vk};
use std::ffi::{c_void, CStr, CString};

#[cfg(feature = "validation")]
const ENABLE_VALIDATION_LAYERS: bool = true;
#[cfg(not(feature = "validation"))]
const ENABLE_VALIDATION_LAYERS: bool = false;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

// debug utilsのコールバック関数
unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    let types = if message_types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    };
    if !p_callback_data.is_null() && !(*p_callback_data).p_message.is_null() {
        let message = CStr::from_ptr((*p_callback_data).p_message);
        log::log!(target: "vulkan", level, "[{}] {}", types, message.to_string_lossy());
    }

    vk::FALSE
}

/// GPUオブジェクトのStoreをすべて所有するコンテキスト。
/// 1回のレンダリングで使うオブジェクトはすべてここに属する。
pub struct Context {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub(crate) devices: HandleStore<Device>,
    pub(crate) shaders: HandleStore<Shader>,
    pub(crate) buffers: HandleStore<Buffer>,
    pub(crate) images: HandleStore<Image>,
    pub(crate) pipelines: HandleStore<Pipeline>,
    pub(crate) command_buffers: HandleStore<CommandBuffer>,
    pub(crate) fences: HandleStore<Fence>,
}
impl Context {
    /// Vulkanをロードしてinstanceを作成する
    pub fn new(app_name: &str) -> Result<Self> {
        let entry = unsafe { ash::Entry::load().map_err(Error::UnableToLoadVulkan)? };

        // validation layerが無い環境ではlayer無しで作成する
        let enable_validation = ENABLE_VALIDATION_LAYERS && {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
            let available = layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
            if !available {
                log::warn!("{:?} is not available", VALIDATION_LAYER);
            }
            available
        };

        // instanceの作成とdebug utilsの設定
        let app_name = CString::new(app_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);
        let mut debug_utils_messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_utils_callback))
            .build();
        let extension_names = [DebugUtils::name().as_ptr()];
        let layer_names = [VALIDATION_LAYER.as_ptr()];
        let instance_create_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
        let instance_create_info = if enable_validation {
            instance_create_info
                .push_next(&mut debug_utils_messenger_create_info)
                .enabled_extension_names(&extension_names)
                .enabled_layer_names(&layer_names)
        } else {
            instance_create_info
        };
        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(Error::UnableToCreateInstance)?
        };

        // setup debug utils
        let debug_utils = if enable_validation {
            let loader = DebugUtils::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&debug_utils_messenger_create_info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    log::warn!("failed to create debug messenger: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
            devices: HandleStore::with_capacity("device", 1),
            shaders: HandleStore::with_capacity("shader", 16),
            buffers: HandleStore::with_capacity("buffer", 16),
            images: HandleStore::with_capacity("image", 64),
            pipelines: HandleStore::with_capacity("pipeline", 8),
            command_buffers: HandleStore::with_capacity("command buffer", 16),
            fences: HandleStore::with_capacity("fence", 8),
        })
    }

    /// physical deviceの数を取得する
    pub fn physical_device_count(&self) -> Result<usize> {
        let physical_devices = unsafe {
            self.instance
                .enumerate_physical_devices()
                .map_err(Error::UnableToEnumerateDevices)?
        };
        Ok(physical_devices.len())
    }

    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub(crate) fn device(&self, handle: DeviceHandle) -> Result<&Device> {
        self.devices.get(handle)
    }

    /// 指定したdeviceに属するオブジェクトをすべて破棄する。
    /// `None` の場合はすべてのdeviceのオブジェクトを破棄する。
    pub(crate) fn destroy_device_children(&mut self, device: Option<DeviceHandle>) {
        destroy_children(&mut self.fences, &self.devices, device);
        destroy_children(&mut self.command_buffers, &self.devices, device);
        destroy_children(&mut self.pipelines, &self.devices, device);
        destroy_children(&mut self.shaders, &self.devices, device);
        destroy_children(&mut self.images, &self.devices, device);
        destroy_children(&mut self.buffers, &self.devices, device);
    }
}

/// deviceに属するオブジェクト
pub(crate) trait DeviceChild {
    fn device(&self) -> DeviceHandle;

    /// # Safety
    /// GPUがこのオブジェクトを使い終わっている必要がある
    unsafe fn destroy(self, device: &Device);
}

fn destroy_children<T: DeviceChild>(
    store: &mut HandleStore<T>,
    devices: &HandleStore<Device>,
    device: Option<DeviceHandle>,
) {
    let children = store.drain_newest_first_where(|child| match device {
        Some(device) => child.device() == device,
        None => true,
    });
    for child in children {
        if let Ok(device) = devices.get(child.device()) {
            unsafe { child.destroy(device) };
        }
    }
}

// Drop時にすべてのオブジェクトを破棄する
impl Drop for Context {
    fn drop(&mut self) {
        for handle in self.devices.handles() {
            if let Ok(device) = self.devices.get(handle) {
                if let Err(err) = unsafe { device.device_wait_idle() } {
                    log::error!("failed to wait for device idle: {err}");
                }
            }
        }
        self.destroy_device_children(None);
        for device in self.devices.drain_newest_first() {
            unsafe { device.destroy() };
        }
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("devices", &self.devices)
            .field("shaders", &self.shaders)
            .field("buffers", &self.buffers)
            .field("images", &self.images)
            .field("pipelines", &self.pipelines)
            .field("command_buffers", &self.command_buffers)
            .field("fences", &self.fences)
            .finish()
    }
}
