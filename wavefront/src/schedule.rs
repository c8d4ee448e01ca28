//! 1回のレンダリングで記録するパスの列。
//!
//! 総レイ数がいくつであっても、固定長のray poolをバッチごとに使い回す。
//! バッチごとにray generationで空いたスロットに新しいレイを詰め、
//! extend (交差判定) と shade を `bounces + 1` 回繰り返す。
//! 記録先は [`PassEncoder`] で抽象化していて、GPUが無くても記録される列を検証できる。

use ashcompute::AccessFlags;

/// レンダリング開始時のtimestampのindex
pub const TIMESTAMP_START: u32 = 0;
/// レンダリング終了時のtimestampのindex
pub const TIMESTAMP_END: u32 = 1;
/// 使うtimestampの数
pub const TIMESTAMP_COUNT: u32 = 2;

/// compute pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    RayGeneration,
    Extend,
    Shade,
}
impl Stage {
    pub const ALL: [Stage; 3] = [Stage::RayGeneration, Stage::Extend, Stage::Shade];

    /// shaderの名前
    pub fn name(&self) -> &'static str {
        match self {
            Stage::RayGeneration => "ray_gen",
            Stage::Extend => "extend",
            Stage::Shade => "shade",
        }
    }
}

/// パスが読み書きするバッファの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Output,
    PathSegments,
    HitInfo,
    Scene,
    Staging,
}

/// バッファ間のコピー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// staging → scene
    UploadScene,
    /// output → staging
    ReadbackOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferRole,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}
impl BufferBarrier {
    pub fn new(buffer: BufferRole, src_access: AccessFlags, dst_access: AccessFlags) -> Self {
        Self {
            buffer,
            src_access,
            dst_access,
        }
    }
}

/// ray generationのpush constant
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RayGenPushConstants {
    pub pixel_index_offset: u32,
    pub sample_index_offset: u32,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub stage: Stage,
    pub group_count: u32,
    pub push_constants: Option<RayGenPushConstants>,
}

/// パスの記録先
pub trait PassEncoder {
    fn reset_timestamps(&mut self) -> anyhow::Result<()>;
    fn write_timestamp(&mut self, index: u32) -> anyhow::Result<()>;
    fn copy(&mut self, transfer: Transfer) -> anyhow::Result<()>;
    fn barrier(&mut self, barriers: &[BufferBarrier]) -> anyhow::Result<()>;
    fn dispatch(&mut self, dispatch: Dispatch) -> anyhow::Result<()>;
    /// timestampをhostから読めるバッファへコピーする
    fn copy_timestamps(&mut self) -> anyhow::Result<()>;
}

/// ray poolに詰める1回分のレイ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub ray_offset: u64,
    pub pool_size: u32,
    pub pixel_index_offset: u32,
    pub sample_index_offset: u32,
}
impl Batch {
    pub fn push_constants(&self) -> RayGenPushConstants {
        RayGenPushConstants {
            pixel_index_offset: self.pixel_index_offset,
            sample_index_offset: self.sample_index_offset,
            pool_size: self.pool_size,
        }
    }
}

/// 総レイ数をpoolの容量ごとに区切るiterator
#[derive(Debug, Clone)]
pub struct Batches {
    ray_offset: u64,
    total_rays: u64,
    pool_capacity: u32,
    samples_per_pixel: u32,
}
impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.ray_offset >= self.total_rays || self.pool_capacity == 0 {
            return None;
        }
        let spp = self.samples_per_pixel.max(1) as u64;
        let batch = Batch {
            ray_offset: self.ray_offset,
            pool_size: (self.total_rays - self.ray_offset).min(self.pool_capacity as u64) as u32,
            pixel_index_offset: (self.ray_offset / spp) as u32,
            sample_index_offset: (self.ray_offset % spp) as u32,
        };
        self.ray_offset += self.pool_capacity as u64;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.pool_capacity == 0 {
            0
        } else {
            self.total_rays
                .saturating_sub(self.ray_offset)
                .div_ceil(self.pool_capacity as u64) as usize
        };
        (remaining, Some(remaining))
    }
}
impl ExactSizeIterator for Batches {}

pub fn batches(total_rays: u64, pool_capacity: u32, samples_per_pixel: u32) -> Batches {
    Batches {
        ray_offset: 0,
        total_rays,
        pool_capacity,
        samples_per_pixel,
    }
}

/// `count` 個のinvocationを覆うwork group数
pub fn group_count(count: u32, workgroup_width: u32) -> u32 {
    count.div_ceil(workgroup_width.max(1))
}

/// 記録するパスの列を決めるパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPlan {
    pub total_rays: u64,
    pub pool_capacity: u32,
    pub samples_per_pixel: u32,
    pub bounces: u32,
    pub workgroup_width: u32,
    pub timestamps: bool,
}
impl RenderPlan {
    pub fn batches(&self) -> Batches {
        batches(self.total_rays, self.pool_capacity, self.samples_per_pixel)
    }

    /// extendとshadeはpool全体に対してdispatchする
    pub fn pool_group_count(&self) -> u32 {
        group_count(self.pool_capacity, self.workgroup_width)
    }
}

/// レンダリング全体のパスを記録する
pub fn record_render<E: PassEncoder + ?Sized>(
    encoder: &mut E,
    plan: &RenderPlan,
) -> anyhow::Result<()> {
    let read_write = AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE;

    if plan.timestamps {
        encoder.reset_timestamps()?;
        encoder.write_timestamp(TIMESTAMP_START)?;
    }

    // sceneのupload
    encoder.copy(Transfer::UploadScene)?;
    encoder.barrier(&[BufferBarrier::new(
        BufferRole::Scene,
        AccessFlags::TRANSFER_WRITE,
        AccessFlags::SHADER_READ,
    )])?;

    for (index, batch) in plan.batches().enumerate() {
        // 前のバッチのshadeが書いたpath segmentとoutputをray generationが読み書きする
        if index > 0 {
            encoder.barrier(&[
                BufferBarrier::new(BufferRole::PathSegments, AccessFlags::SHADER_WRITE, read_write),
                BufferBarrier::new(BufferRole::Output, AccessFlags::SHADER_WRITE, read_write),
            ])?;
        }
        encoder.dispatch(Dispatch {
            stage: Stage::RayGeneration,
            group_count: group_count(batch.pool_size, plan.workgroup_width),
            push_constants: Some(batch.push_constants()),
        })?;

        for _ in 0..=plan.bounces {
            encoder.barrier(&[BufferBarrier::new(
                BufferRole::PathSegments,
                AccessFlags::SHADER_WRITE,
                AccessFlags::SHADER_READ,
            )])?;
            encoder.dispatch(Dispatch {
                stage: Stage::Extend,
                group_count: plan.pool_group_count(),
                push_constants: None,
            })?;

            encoder.barrier(&[
                BufferBarrier::new(
                    BufferRole::HitInfo,
                    AccessFlags::SHADER_WRITE,
                    AccessFlags::SHADER_READ,
                ),
                BufferBarrier::new(BufferRole::Output, AccessFlags::SHADER_WRITE, read_write),
                BufferBarrier::new(BufferRole::PathSegments, AccessFlags::SHADER_WRITE, read_write),
            ])?;
            encoder.dispatch(Dispatch {
                stage: Stage::Shade,
                group_count: plan.pool_group_count(),
                push_constants: None,
            })?;
        }
    }

    // readback
    encoder.barrier(&[BufferBarrier::new(
        BufferRole::Output,
        AccessFlags::SHADER_WRITE,
        AccessFlags::TRANSFER_READ,
    )])?;
    encoder.copy(Transfer::ReadbackOutput)?;

    if plan.timestamps {
        encoder.write_timestamp(TIMESTAMP_END)?;
        encoder.copy_timestamps()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_walk_the_pool() {
        let batches = batches(100, 40, 10).collect::<Vec<_>>();
        assert_eq!(
            batches,
            vec![
                Batch {
                    ray_offset: 0,
                    pool_size: 40,
                    pixel_index_offset: 0,
                    sample_index_offset: 0,
                },
                Batch {
                    ray_offset: 40,
                    pool_size: 40,
                    pixel_index_offset: 4,
                    sample_index_offset: 0,
                },
                Batch {
                    ray_offset: 80,
                    pool_size: 20,
                    pixel_index_offset: 8,
                    sample_index_offset: 0,
                },
            ]
        );
    }

    #[test]
    fn batches_split_samples_of_a_pixel() {
        let batches = batches(21, 8, 3).collect::<Vec<_>>();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].pixel_index_offset, 2);
        assert_eq!(batches[1].sample_index_offset, 2);
        assert_eq!(batches[2].pool_size, 5);
        assert_eq!(batches[2].pixel_index_offset, 5);
        assert_eq!(batches[2].sample_index_offset, 1);
    }

    #[test]
    fn batch_count_is_ceil_of_total_over_capacity() {
        for (total, capacity) in [(1, 1), (100, 40), (120, 40), (1_000_003, 1 << 16)] {
            let expected = (total as u64).div_ceil(capacity as u64) as usize;
            let iter = batches(total, capacity, 7);
            assert_eq!(iter.len(), expected);
            assert_eq!(iter.count(), expected);
        }
        assert_eq!(batches(0, 40, 1).count(), 0);
        assert_eq!(batches(10, 0, 1).count(), 0);
    }

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(group_count(0, 32), 0);
        assert_eq!(group_count(1, 32), 1);
        assert_eq!(group_count(64, 32), 2);
        assert_eq!(group_count(65, 32), 3);
        assert_eq!(group_count(5, 0), 5);
    }

    #[test]
    fn push_constants_are_three_words() {
        let batch = batches(100, 40, 10).nth(1).unwrap();
        let push_constants = batch.push_constants();
        assert_eq!(std::mem::size_of::<RayGenPushConstants>(), 12);
        assert_eq!(
            bytemuck::cast::<_, [u32; 3]>(push_constants),
            [4, 0, 40]
        );
    }
}
