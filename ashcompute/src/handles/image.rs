//! 2DのImageとそのImageView、memoryを定義する。

use super::memory::DeviceMemory;
use crate::{
    context::DeviceChild, Context, Device, DeviceHandle, Error, Handle, ImageFormat, ImageUsage,
    MappedMemory, MemoryProperties, Result,
};
use ash::vk;
use log::debug;

/// ImageのHandle
pub type ImageHandle = Handle<Image>;

/// Image作成時のパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
    pub memory_properties: MemoryProperties,
}
impl ImageDesc {
    /// transfer系のusageがある場合はhostから読み書きできるようにlinearにする
    pub fn tiling(&self) -> vk::ImageTiling {
        if self
            .usage
            .intersects(ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST)
        {
            vk::ImageTiling::LINEAR
        } else {
            vk::ImageTiling::OPTIMAL
        }
    }
}

/// 2DのImage
#[derive(Debug)]
pub struct Image {
    device: DeviceHandle,
    image: vk::Image,
    image_view: vk::ImageView,
    memory: DeviceMemory,
    desc: ImageDesc,
    row_pitch: Option<u64>,
}
impl Image {
    fn new(device_handle: DeviceHandle, device: &Device, desc: &ImageDesc) -> Result<Self> {
        let tiling = desc.tiling();

        // imageの作成
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format.to_vk())
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe {
            device
                .create_image(&image_create_info, None)
                .map_err(Error::UnableToCreateImage)?
        };

        // memoryの確保とバインド
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match DeviceMemory::allocate(device, &requirements, desc.memory_properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };
        if let Err(err) = unsafe { device.bind_image_memory(image, memory.memory, 0) } {
            unsafe {
                memory.free(device);
                device.destroy_image(image, None);
            }
            return Err(Error::UnableToBindMemory(err));
        }

        // storageやsampledで使う場合はimage viewを作成する
        let image_view = if desc
            .usage
            .intersects(ImageUsage::STORAGE | ImageUsage::SAMPLED)
        {
            let image_view_create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format.to_vk())
                .subresource_range(color_subresource_range());
            match unsafe { device.create_image_view(&image_view_create_info, None) } {
                Ok(image_view) => image_view,
                Err(err) => {
                    unsafe {
                        memory.free(device);
                        device.destroy_image(image, None);
                    }
                    return Err(Error::UnableToCreateImageView(err));
                }
            }
        } else {
            vk::ImageView::null()
        };

        let row_pitch = (tiling == vk::ImageTiling::LINEAR).then(|| {
            let layout = unsafe {
                device.get_image_subresource_layout(
                    image,
                    vk::ImageSubresource {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        array_layer: 0,
                    },
                )
            };
            layout.row_pitch
        });

        Ok(Self {
            device: device_handle,
            image,
            image_view,
            memory,
            desc: *desc,
            row_pitch,
        })
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    /// linearなImageの1行あたりのbyte数
    pub fn row_pitch(&self) -> Option<u64> {
        self.row_pitch
    }

    // raw

    pub unsafe fn image_raw(&self) -> vk::Image {
        self.image
    }

    pub unsafe fn image_view_raw(&self) -> vk::ImageView {
        self.image_view
    }
}

impl DeviceChild for Image {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        if self.image_view != vk::ImageView::null() {
            device.destroy_image_view(self.image_view, None);
        }
        device.destroy_image(self.image, None);
        self.memory.free(device);
    }
}

/// color imageのsubresource range
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

// create系
impl Context {
    /// Imageを作成する
    pub fn create_image(&mut self, device: DeviceHandle, desc: &ImageDesc) -> Result<ImageHandle> {
        let image = Image::new(device, self.device(device)?, desc)?;
        debug!("created image: {:?}", desc);
        Ok(self.images.insert(image))
    }

    /// Imageを破棄する
    pub fn destroy_image(&mut self, handle: ImageHandle) -> Result<()> {
        let device = self.images.get(handle)?.device;
        self.device(device)?;
        let image = self.images.remove(handle)?;
        unsafe { image.destroy(self.device(device)?) };
        Ok(())
    }

    /// Imageを取得する
    pub fn image(&self, handle: ImageHandle) -> Result<&Image> {
        self.images.get(handle)
    }

    /// host visibleなImageのmemory全体をmapする。
    /// 行のbyte数は `Image::row_pitch` で取得する。
    pub fn map_image(&self, handle: ImageHandle) -> Result<MappedMemory<'_>> {
        let image = self.images.get(handle)?;
        image.memory.map(
            self.device(image.device)?,
            0,
            image.memory.allocation_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(usage: ImageUsage) -> ImageDesc {
        ImageDesc {
            width: 4,
            height: 4,
            format: ImageFormat::R32G32B32A32Sfloat,
            usage,
            memory_properties: MemoryProperties::DEVICE_LOCAL,
        }
    }

    #[test]
    fn transfer_usage_selects_linear_tiling() {
        assert_eq!(
            desc(ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC).tiling(),
            vk::ImageTiling::LINEAR
        );
        assert_eq!(
            desc(ImageUsage::TRANSFER_DST).tiling(),
            vk::ImageTiling::LINEAR
        );
        assert_eq!(
            desc(ImageUsage::STORAGE | ImageUsage::SAMPLED).tiling(),
            vk::ImageTiling::OPTIMAL
        );
    }
}
