//! submitの完了を待つためのFenceを定義する。
//! Fenceはシグナル状態で作成され、submitに渡す前にresetする必要がある。

use crate::{
    context::DeviceChild, CommandBufferHandle, CommandBufferState, Context, Device, DeviceHandle,
    Error, Handle, Result,
};
use ash::vk;

/// FenceのHandle
pub type FenceHandle = Handle<Fence>;

/// binaryのFence
#[derive(Debug)]
pub struct Fence {
    pub(crate) device: DeviceHandle,
    pub(crate) fence: vk::Fence,
    pub(crate) signaled: bool,
    /// このFenceでsubmitされて完了待ちのCommandBuffer
    pub(crate) pending: Option<CommandBufferHandle>,
}
impl Fence {
    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    // raw

    pub unsafe fn fence_raw(&self) -> vk::Fence {
        self.fence
    }
}

impl DeviceChild for Fence {
    fn device(&self) -> DeviceHandle {
        self.device
    }

    unsafe fn destroy(self, device: &Device) {
        device.destroy_fence(self.fence, None);
    }
}

/// 待つことができるFenceかどうかを確認する関数。
/// resetされた後submitされていないFenceはシグナルされないので待てない。
pub fn check_fence_waitable(signaled: bool, submitted: bool) -> Result<()> {
    if !signaled && !submitted {
        return Err(Error::FenceNotSubmitted);
    }
    Ok(())
}

// create系
impl Context {
    /// シグナル状態のFenceを作成する
    pub fn create_fence(&mut self, device: DeviceHandle) -> Result<FenceHandle> {
        let create_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe {
            self.device(device)?
                .create_fence(&create_info, None)
                .map_err(Error::UnableToCreateFence)?
        };
        Ok(self.fences.insert(Fence {
            device,
            fence,
            signaled: true,
            pending: None,
        }))
    }

    /// Fenceを破棄する。完了待ちのsubmitがある場合は破棄できない
    pub fn destroy_fence(&mut self, handle: FenceHandle) -> Result<()> {
        let fence = self.fences.get(handle)?;
        if fence.pending.is_some() {
            return Err(Error::FenceInUse);
        }
        let device = fence.device;
        self.device(device)?;
        let fence = self.fences.remove(handle)?;
        unsafe { fence.destroy(self.device(device)?) };
        Ok(())
    }

    /// Fenceを非シグナル状態に戻す
    pub fn reset_fence(&mut self, handle: FenceHandle) -> Result<()> {
        let fence = self.fences.get(handle)?;
        if fence.pending.is_some() {
            return Err(Error::FenceInUse);
        }
        unsafe {
            self.device(fence.device)?
                .reset_fences(&[fence.fence])
                .map_err(Error::UnableToResetFence)?
        };
        self.fences.get_mut(handle)?.signaled = false;
        Ok(())
    }

    /// Fenceがシグナル状態になるまでタイムアウト無しで待つ。
    /// 完了したCommandBufferはExecutableに戻る。
    pub fn wait_for_fence(&mut self, handle: FenceHandle) -> Result<()> {
        let fence = self.fences.get(handle)?;
        check_fence_waitable(fence.signaled, fence.pending.is_some())?;
        unsafe {
            self.device(fence.device)?
                .wait_for_fences(&[fence.fence], true, u64::MAX)
                .map_err(Error::UnableToWaitForFence)?
        };

        let fence = self.fences.get_mut(handle)?;
        fence.signaled = true;
        if let Some(command_buffer) = fence.pending.take() {
            // PendingのCommandBufferは破棄できないので必ず見つかる
            if let Ok(command_buffer) = self.command_buffers.get_mut(command_buffer) {
                command_buffer.state = CommandBufferState::Executable;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_fence_without_submit_cannot_be_waited() {
        // 作成直後のシグナル状態
        assert!(check_fence_waitable(true, false).is_ok());
        // submit済み
        assert!(check_fence_waitable(false, true).is_ok());
        assert!(matches!(
            check_fence_waitable(false, false),
            Err(Error::FenceNotSubmitted)
        ));
    }
}
