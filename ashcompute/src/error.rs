//! ashcompute の各操作が返すエラーを定義する。
//!
//! Vulkan の呼び出しが失敗した場合は、元の `vk::Result` を source として保持する。

use ash::vk;

/// ashcompute の各操作の結果型
pub type Result<T> = std::result::Result<T, Error>;

/// Resource Layer / Command Layer のエラー
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // handle
    #[error("invalid {kind} handle")]
    InvalidHandle { kind: &'static str },

    // capability
    #[error("unable to load the Vulkan library")]
    UnableToLoadVulkan(#[source] ash::LoadingError),
    #[error("unable to enumerate physical devices")]
    UnableToEnumerateDevices(#[source] vk::Result),
    #[error("no physical device at index {index} ({count} available)")]
    NoDeviceAtIndex { index: usize, count: usize },
    #[error("device extension `{0}` is not supported")]
    ExtensionNotSupported(String),
    #[error("no queue family with compute support")]
    NoComputeQueueFamily,
    #[error("no memory type satisfies the requested properties {requested:?}")]
    NoSuitableMemoryType { requested: vk::MemoryPropertyFlags },

    // create
    #[error("unable to create instance")]
    UnableToCreateInstance(#[source] vk::Result),
    #[error("unable to create device")]
    UnableToCreateDevice(#[source] vk::Result),
    #[error("unable to create command pool")]
    UnableToCreateCommandPool(#[source] vk::Result),
    #[error("unable to create buffer")]
    UnableToCreateBuffer(#[source] vk::Result),
    #[error("unable to create image")]
    UnableToCreateImage(#[source] vk::Result),
    #[error("unable to create image view")]
    UnableToCreateImageView(#[source] vk::Result),
    #[error("unable to create shader module")]
    UnableToCreateShaderModule(#[source] vk::Result),
    #[error("unable to create descriptor set layout")]
    UnableToCreateDescriptorSetLayout(#[source] vk::Result),
    #[error("unable to create pipeline layout")]
    UnableToCreatePipelineLayout(#[source] vk::Result),
    #[error("unable to create compute pipeline")]
    UnableToCreateComputePipeline(#[source] vk::Result),
    #[error("unable to create descriptor pool")]
    UnableToCreateDescriptorPool(#[source] vk::Result),
    #[error("unable to create query pool")]
    UnableToCreateQueryPool(#[source] vk::Result),
    #[error("unable to create fence")]
    UnableToCreateFence(#[source] vk::Result),

    // allocate
    #[error("unable to allocate device memory")]
    UnableToAllocateMemory(#[source] vk::Result),
    #[error("unable to allocate command buffer")]
    UnableToAllocateCommandBuffer(#[source] vk::Result),
    #[error("unable to allocate descriptor set")]
    UnableToAllocateDescriptorSet(#[source] vk::Result),
    #[error("unable to bind device memory")]
    UnableToBindMemory(#[source] vk::Result),

    // operation
    #[error("storage buffer range {range} exceeds the device limit {limit}")]
    StorageBufferRangeExceeded { range: u64, limit: u32 },
    #[error("buffer offset {offset} is not a multiple of {alignment}")]
    BufferOffsetNotAligned { offset: u64, alignment: u64 },
    #[error("range {offset}+{size} is out of bounds of a {capacity} byte resource")]
    RangeOutOfBounds { offset: u64, size: u64, capacity: u64 },
    #[error("memory is not host visible")]
    NotHostVisible,
    #[error("memory is already mapped")]
    AlreadyMapped,
    #[error("unable to map memory")]
    UnableToMapMemory(#[source] vk::Result),
    #[error("unable to flush mapped memory")]
    UnableToFlushMemory(#[source] vk::Result),
    #[error("unable to invalidate mapped memory")]
    UnableToInvalidateMemory(#[source] vk::Result),
    #[error("invalid SPIR-V code: {0}")]
    InvalidShaderCode(&'static str),
    #[error("command buffer is {actual:?}, expected {expected:?}")]
    InvalidCommandBufferState {
        expected: crate::CommandBufferState,
        actual: crate::CommandBufferState,
    },
    #[error("unable to begin command buffer")]
    UnableToBeginCommandBuffer(#[source] vk::Result),
    #[error("unable to end command buffer")]
    UnableToEndCommandBuffer(#[source] vk::Result),
    #[error("push constants are {actual} bytes, pipeline declares {expected}")]
    PushConstantsSizeMismatch { expected: u32, actual: usize },
    #[error("work group count {count} exceeds the device limit {limit}")]
    WorkGroupCountExceeded { count: u32, limit: u32 },
    #[error("timestamp queries {first}..{end} exceed the {capacity} available")]
    TimestampQueryOutOfRange { first: u32, end: u32, capacity: u32 },
    #[error("fence is signaled or still tied to a pending submission")]
    FenceInUse,
    #[error("fence was reset but never submitted")]
    FenceNotSubmitted,
    #[error("unable to reset fence")]
    UnableToResetFence(#[source] vk::Result),
    #[error("unable to submit command buffer")]
    UnableToSubmit(#[source] vk::Result),
    #[error("unable to wait for fence")]
    UnableToWaitForFence(#[source] vk::Result),
    #[error("unable to wait for device idle")]
    UnableToWaitIdle(#[source] vk::Result),
}
