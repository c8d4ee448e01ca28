//! CommandBufferと、その記録・submitの状態管理を定義する。
//!
//! 状態は Initial → Recording → Executable → Pending と遷移する。
//! Pendingの間はbeginもsubmitもできず、submit時に渡したFenceをwaitするとExecutableに戻る。

use crate::{context::DeviceChild, Context, Device, DeviceHandle, Error, FenceHandle, Handle, Result};
use ash::vk;
use log::debug;

/// CommandBufferのHandle
pub type CommandBufferHandle = Handle<CommandBuffer>;

/// CommandBufferごとに用意するtimestamp queryの数
pub const MAX_TIMESTAMP_QUERIES: u32 = 32;

/// CommandBufferの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

/// compute queue用のCommandBuffer
#[derive(Debug)]
pub struct CommandBuffer {
    device: DeviceHandle,
    command_buffer: vk::CommandBuffer,
    pub(crate) query_pool: vk::QueryPool,
    pub(crate) state: CommandBufferState,
}
impl CommandBuffer {
    fn new(device_handle: DeviceHandle, device: &Device) -> Result<Self> {
        // command bufferの確保
        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&command_buffer_allocate_info)
                .map_err(Error::UnableToAllocateCommandBuffer)?
        }
        .into_iter()
        .next()
        .ok_or(Error::UnableToAllocateCommandBuffer(
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ))?;

        // timestamp用のquery poolの作成
        let query_pool_create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(MAX_TIMESTAMP_QUERIES);
        let query_pool = match unsafe { device.create_query_pool(&query_pool_create_info, None) } {
            Ok(query_pool) => query_pool,
            Err(err) => {
                unsafe { device.free_command_buffers(device.command_pool, &[command_buffer]) };
                return Err(Error::UnableToCreateQueryPool(err));
            }
        };

        Ok(Self {
            device: device_handle,
            command_buffer,
            query_pool,
            state: CommandBufferState::Initial,
        })
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// 記録中であることを確認する
    pub(crate) fn ensure_recording(&self) -> Result<()> {
        self.ensure_state(CommandBufferState::Recording)
    }

    pub(crate) fn ensure_state(&self, expected: CommandBufferState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidCommandBufferState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    // raw

    pub unsafe fn command_buffer_raw(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl DeviceChild for CommandBuffer {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_query_pool(self.query_pool, None);
        device.free_command_buffers(device.command_pool, &[self.command_buffer]);
    }
}

// create系
impl Context {
    /// CommandBufferを作成する
    pub fn create_command_buffer(&mut self, device: DeviceHandle) -> Result<CommandBufferHandle> {
        let command_buffer = CommandBuffer::new(device, self.device(device)?)?;
        Ok(self.command_buffers.insert(command_buffer))
    }

    /// CommandBufferを破棄する。Pendingのものは破棄できない
    pub fn destroy_command_buffer(&mut self, handle: CommandBufferHandle) -> Result<()> {
        let command_buffer = self.command_buffers.get(handle)?;
        if command_buffer.state == CommandBufferState::Pending {
            return Err(Error::InvalidCommandBufferState {
                expected: CommandBufferState::Executable,
                actual: CommandBufferState::Pending,
            });
        }
        let device = command_buffer.device;
        self.device(device)?;
        let command_buffer = self.command_buffers.remove(handle)?;
        unsafe { command_buffer.destroy(self.device(device)?) };
        Ok(())
    }

    /// CommandBufferの状態を取得する
    pub fn command_buffer_state(&self, handle: CommandBufferHandle) -> Result<CommandBufferState> {
        Ok(self.command_buffers.get(handle)?.state)
    }

    /// 一回だけsubmitする記録を開始する。以前の記録は破棄される
    pub fn begin_command_buffer(&mut self, handle: CommandBufferHandle) -> Result<()> {
        let command_buffer = self.command_buffers.get(handle)?;
        if command_buffer.state == CommandBufferState::Pending
            || command_buffer.state == CommandBufferState::Recording
        {
            return Err(Error::InvalidCommandBufferState {
                expected: CommandBufferState::Executable,
                actual: command_buffer.state,
            });
        }
        let device = self.device(command_buffer.device)?;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(command_buffer.command_buffer, &begin_info)
                .map_err(Error::UnableToBeginCommandBuffer)?
        };
        self.command_buffers.get_mut(handle)?.state = CommandBufferState::Recording;
        Ok(())
    }

    /// 記録を終了する
    pub fn end_command_buffer(&mut self, handle: CommandBufferHandle) -> Result<()> {
        let command_buffer = self.command_buffers.get(handle)?;
        command_buffer.ensure_recording()?;
        let device = self.device(command_buffer.device)?;
        unsafe {
            device
                .end_command_buffer(command_buffer.command_buffer)
                .map_err(Error::UnableToEndCommandBuffer)?
        };
        self.command_buffers.get_mut(handle)?.state = CommandBufferState::Executable;
        Ok(())
    }

    /// CommandBufferをdeviceのcompute queueにsubmitする。
    /// 完了はfenceで通知される。fenceはresetされている必要がある
    pub fn submit_command_buffer(
        &mut self,
        device_handle: DeviceHandle,
        command_buffer_handle: CommandBufferHandle,
        fence_handle: FenceHandle,
    ) -> Result<()> {
        let device = self.device(device_handle)?;
        let command_buffer = self.command_buffers.get(command_buffer_handle)?;
        let fence = self.fences.get(fence_handle)?;
        if command_buffer.device != device_handle || fence.device != device_handle {
            return Err(Error::InvalidHandle { kind: "device" });
        }
        command_buffer.ensure_state(CommandBufferState::Executable)?;
        if fence.signaled || fence.pending.is_some() {
            return Err(Error::FenceInUse);
        }

        let command_buffers = [command_buffer.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device
                .queue_submit(device.queue, &[submit_info.build()], fence.fence)
                .map_err(Error::UnableToSubmit)?
        };
        debug!("submitted command buffer {:?}", command_buffer_handle);

        self.command_buffers.get_mut(command_buffer_handle)?.state = CommandBufferState::Pending;
        self.fences.get_mut(fence_handle)?.pending = Some(command_buffer_handle);
        Ok(())
    }
}
