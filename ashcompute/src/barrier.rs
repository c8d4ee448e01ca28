//! pipeline barrierに渡すmemory barrierの定義。
//!
//! stageはsrcとdstの両方ともcompute shaderとtransferをまとめて指定するので、
//! barrierで指定するのはアクセスの種類と範囲だけになる。

use crate::{AccessFlags, BufferHandle, ImageHandle, ImageLayout, WHOLE_SIZE};
use ash::vk;

/// barrierのsrcとdstに指定するpipeline stage
pub const BARRIER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COMPUTE_SHADER.as_raw() | vk::PipelineStageFlags::TRANSFER.as_raw(),
);

/// グローバルなmemory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// Bufferの範囲に対するmemory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMemoryBarrier {
    pub buffer: BufferHandle,
    pub offset: u64,
    /// `WHOLE_SIZE` でoffsetから末尾まで
    pub size: u64,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}
impl BufferMemoryBarrier {
    /// Buffer全体に対するbarrier
    pub fn whole(buffer: BufferHandle, src_access: AccessFlags, dst_access: AccessFlags) -> Self {
        Self {
            buffer,
            offset: 0,
            size: WHOLE_SIZE,
            src_access,
            dst_access,
        }
    }
}

/// Imageに対するmemory barrier。layoutの遷移も行う
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMemoryBarrier {
    pub image: ImageHandle,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}
