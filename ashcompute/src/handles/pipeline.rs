//! compute shaderとdescriptor setをまとめたPipelineを定義する。
//!
//! binding(slot → resource)は作成時に確定し、あとから変更はできない。
//! 作成の途中で失敗した場合は、それまでに作成したオブジェクトを
//! descriptor set → descriptor pool → pipeline → pipeline layout → descriptor set layout
//! の順に破棄してからエラーを返す。

use crate::{
    context::DeviceChild, utils::resolve_range, BufferHandle, Context, Device, DeviceHandle, Error,
    Handle, ImageHandle, Result, ShaderHandle,
};
use ash::vk;
use log::debug;
use std::ffi::CString;

/// PipelineのHandle
pub type PipelineHandle = Handle<Pipeline>;

/// storage bufferのbinding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub binding: u32,
    pub buffer: BufferHandle,
    /// `min_storage_buffer_offset_alignment` の倍数である必要がある
    pub offset: u64,
    /// `WHOLE_SIZE` を指定するとoffsetから末尾まで
    pub size: u64,
}

/// storage imageのbinding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBinding {
    pub binding: u32,
    pub image: ImageHandle,
}

/// specialization constantの値
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecializationValue {
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
}
impl SpecializationValue {
    fn to_ne_bytes(self) -> [u8; 4] {
        match self {
            Self::U32(value) => value.to_ne_bytes(),
            Self::I32(value) => value.to_ne_bytes(),
            Self::F32(value) => value.to_ne_bytes(),
            // VkBool32
            Self::Bool(value) => (value as u32).to_ne_bytes(),
        }
    }
}

/// specialization constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecializationConstant {
    pub constant_id: u32,
    pub value: SpecializationValue,
}

/// Pipeline作成時のパラメータ
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub shader: ShaderHandle,
    pub entry_point: &'a str,
    pub buffer_bindings: &'a [BufferBinding],
    pub image_bindings: &'a [ImageBinding],
    pub specialization_constants: &'a [SpecializationConstant],
    /// push constantのbyte数。0ならpush constantを使わない
    pub push_constants_size: u32,
}

/// specialization constantをmap entryとデータに詰める関数。
/// 値はすべて4byteで、指定した順に並べる。
pub fn pack_specialization_constants(
    constants: &[SpecializationConstant],
) -> (Vec<vk::SpecializationMapEntry>, Vec<u8>) {
    let mut entries = Vec::with_capacity(constants.len());
    let mut data = Vec::with_capacity(constants.len() * 4);
    for constant in constants {
        entries.push(vk::SpecializationMapEntry {
            constant_id: constant.constant_id,
            offset: data.len() as u32,
            size: 4,
        });
        data.extend_from_slice(&constant.value.to_ne_bytes());
    }
    (entries, data)
}

/// binding数ぴったりのdescriptor pool sizeを返す関数
pub fn descriptor_pool_sizes(buffer_count: u32, image_count: u32) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::STORAGE_BUFFER, buffer_count),
        (vk::DescriptorType::STORAGE_IMAGE, image_count),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    })
    .collect()
}

/// bufferのoffsetがalignmentの倍数であることを確認する関数
pub fn check_buffer_offset(offset: u64, alignment: u64) -> Result<()> {
    if alignment > 0 && offset % alignment != 0 {
        return Err(Error::BufferOffsetNotAligned { offset, alignment });
    }
    Ok(())
}

/// storage bufferのbinding範囲がdeviceの上限以下であることを確認する関数
pub fn check_buffer_range(range: u64, max_storage_buffer_range: u32) -> Result<()> {
    if range > max_storage_buffer_range as u64 {
        return Err(Error::StorageBufferRangeExceeded {
            range,
            limit: max_storage_buffer_range,
        });
    }
    Ok(())
}

// 作成途中のPipelineのオブジェクト。nullのものは未作成
#[derive(Debug, Default)]
struct PipelineObjects {
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
}
impl PipelineObjects {
    unsafe fn destroy(&self, device: &Device) {
        if self.descriptor_set != vk::DescriptorSet::null() {
            // 失敗しても続くpoolの破棄でまとめて解放される
            let _ = device.free_descriptor_sets(self.descriptor_pool, &[self.descriptor_set]);
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
        if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

// handleを解決したbinding
struct ResolvedBufferBinding {
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
}
struct ResolvedImageBinding {
    binding: u32,
    image_view: vk::ImageView,
}

/// compute pipeline
#[derive(Debug)]
pub struct Pipeline {
    device: DeviceHandle,
    objects: PipelineObjects,
    push_constants_size: u32,
}
impl Pipeline {
    fn new(
        device_handle: DeviceHandle,
        device: &Device,
        shader_module: vk::ShaderModule,
        desc: &PipelineDesc,
        buffers: &[ResolvedBufferBinding],
        images: &[ResolvedImageBinding],
    ) -> Result<Self> {
        let mut objects = PipelineObjects::default();
        match unsafe { Self::build(&mut objects, device, shader_module, desc, buffers, images) } {
            Ok(()) => Ok(Self {
                device: device_handle,
                objects,
                push_constants_size: desc.push_constants_size,
            }),
            Err(err) => {
                unsafe { objects.destroy(device) };
                Err(err)
            }
        }
    }

    unsafe fn build(
        objects: &mut PipelineObjects,
        device: &Device,
        shader_module: vk::ShaderModule,
        desc: &PipelineDesc,
        buffers: &[ResolvedBufferBinding],
        images: &[ResolvedImageBinding],
    ) -> Result<()> {
        // descriptor set layoutの作成
        let layout_bindings = buffers
            .iter()
            .map(|b| (b.binding, vk::DescriptorType::STORAGE_BUFFER))
            .chain(
                images
                    .iter()
                    .map(|i| (i.binding, vk::DescriptorType::STORAGE_IMAGE)),
            )
            .map(|(binding, descriptor_type)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build()
            })
            .collect::<Vec<_>>();
        objects.descriptor_set_layout = device
            .create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings),
                None,
            )
            .map_err(Error::UnableToCreateDescriptorSetLayout)?;

        // pipeline layoutの作成
        let set_layouts = [objects.descriptor_set_layout];
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: desc.push_constants_size,
        }];
        let pipeline_layout_create_info =
            vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let pipeline_layout_create_info = if desc.push_constants_size > 0 {
            pipeline_layout_create_info.push_constant_ranges(&push_constant_ranges)
        } else {
            pipeline_layout_create_info
        };
        objects.pipeline_layout = device
            .create_pipeline_layout(&pipeline_layout_create_info, None)
            .map_err(Error::UnableToCreatePipelineLayout)?;

        // compute pipelineの作成
        let entry_name = CString::new(desc.entry_point)
            .map_err(|_| Error::InvalidShaderCode("entry point contains a nul byte"))?;
        let (map_entries, data) = pack_specialization_constants(desc.specialization_constants);
        let specialization_info = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(&data);
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::COMPUTE)
                    .module(shader_module)
                    .name(entry_name.as_c_str())
                    .specialization_info(&specialization_info)
                    .build(),
            )
            .layout(objects.pipeline_layout)
            .build();
        objects.pipeline = device
            .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_, err)| Error::UnableToCreateComputePipeline(err))?
            .into_iter()
            .next()
            .ok_or(Error::UnableToCreateComputePipeline(
                vk::Result::ERROR_INITIALIZATION_FAILED,
            ))?;

        // descriptor poolの作成
        let pool_sizes = descriptor_pool_sizes(buffers.len() as u32, images.len() as u32);
        if pool_sizes.is_empty() {
            return Ok(());
        }
        objects.descriptor_pool = device
            .create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(1)
                    .pool_sizes(&pool_sizes),
                None,
            )
            .map_err(Error::UnableToCreateDescriptorPool)?;

        // descriptor setの確保
        objects.descriptor_set = device
            .allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(objects.descriptor_pool)
                    .set_layouts(&set_layouts),
            )
            .map_err(Error::UnableToAllocateDescriptorSet)?
            .into_iter()
            .next()
            .ok_or(Error::UnableToAllocateDescriptorSet(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            ))?;

        // descriptor setの書き込み
        let buffer_infos = buffers
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.buffer,
                offset: b.offset,
                range: b.range,
            })
            .collect::<Vec<_>>();
        let image_infos = images
            .iter()
            .map(|i| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: i.image_view,
                image_layout: vk::ImageLayout::GENERAL,
            })
            .collect::<Vec<_>>();
        let writes = buffers
            .iter()
            .zip(buffer_infos.iter())
            .map(|(b, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(objects.descriptor_set)
                    .dst_binding(b.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .chain(images.iter().zip(image_infos.iter()).map(|(i, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(objects.descriptor_set)
                    .dst_binding(i.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(info))
                    .build()
            }))
            .collect::<Vec<_>>();
        device.update_descriptor_sets(&writes, &[]);

        Ok(())
    }

    pub fn push_constants_size(&self) -> u32 {
        self.push_constants_size
    }

    // raw

    pub unsafe fn pipeline_raw(&self) -> vk::Pipeline {
        self.objects.pipeline
    }

    pub unsafe fn pipeline_layout_raw(&self) -> vk::PipelineLayout {
        self.objects.pipeline_layout
    }

    pub unsafe fn descriptor_set_raw(&self) -> vk::DescriptorSet {
        self.objects.descriptor_set
    }
}

impl DeviceChild for Pipeline {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        self.objects.destroy(device);
    }
}

// create系
impl Context {
    /// compute pipelineを作成する
    pub fn create_pipeline(
        &mut self,
        device_handle: DeviceHandle,
        desc: &PipelineDesc,
    ) -> Result<PipelineHandle> {
        let device = self.device(device_handle)?;
        let limits = device.limits();
        if desc.push_constants_size > limits.max_push_constants_size
            || desc.push_constants_size % 4 != 0
        {
            return Err(Error::PushConstantsSizeMismatch {
                expected: limits.max_push_constants_size,
                actual: desc.push_constants_size as usize,
            });
        }

        let shader_module = unsafe { self.shaders.get(desc.shader)?.shader_module_raw() };

        // bindingのhandleを解決して、native objectを作る前に検証する
        let buffers = desc
            .buffer_bindings
            .iter()
            .map(|binding| {
                let buffer = self.buffers.get(binding.buffer)?;
                check_buffer_offset(binding.offset, limits.min_storage_buffer_offset_alignment)?;
                let range = resolve_range(buffer.size(), binding.offset, binding.size)?;
                check_buffer_range(range, limits.max_storage_buffer_range)?;
                Ok(ResolvedBufferBinding {
                    binding: binding.binding,
                    buffer: unsafe { buffer.buffer_raw() },
                    offset: binding.offset,
                    range,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let images = desc
            .image_bindings
            .iter()
            .map(|binding| {
                let image = self.images.get(binding.image)?;
                let image_view = unsafe { image.image_view_raw() };
                if image_view == vk::ImageView::null() {
                    return Err(Error::InvalidHandle {
                        kind: "storage image",
                    });
                }
                Ok(ResolvedImageBinding {
                    binding: binding.binding,
                    image_view,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Pipeline::new(device_handle, device, shader_module, desc, &buffers, &images)?;
        debug!(
            "created pipeline `{}`: {} buffers, {} images, {} specialization constants",
            desc.entry_point,
            buffers.len(),
            images.len(),
            desc.specialization_constants.len()
        );
        Ok(self.pipelines.insert(pipeline))
    }

    /// Pipelineを破棄する
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> Result<()> {
        let device = self.pipelines.get(handle)?.device;
        self.device(device)?;
        let pipeline = self.pipelines.remove(handle)?;
        unsafe { pipeline.destroy(self.device(device)?) };
        Ok(())
    }
}
