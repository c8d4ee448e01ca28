//! CommandBufferへのコマンドの記録。
//! どのコマンドもCommandBufferがRecordingの状態である必要がある。

use crate::{
    barrier::BARRIER_STAGES, context::DeviceChild, handles::color_subresource_range, utils::resolve_range,
    BufferHandle, BufferMemoryBarrier, CommandBuffer, CommandBufferHandle, Context, Device,
    DeviceLimits, Error, ImageMemoryBarrier, MemoryBarrier, PipelineHandle, Result,
    MAX_TIMESTAMP_QUERIES,
};
use ash::vk;

/// dispatchのwork group数がdeviceの上限以下であることを確認する関数
pub fn check_work_group_count(group_count: [u32; 3], limits: &DeviceLimits) -> Result<()> {
    for (count, limit) in group_count
        .iter()
        .zip(limits.max_compute_work_group_count.iter())
    {
        if count > limit {
            return Err(Error::WorkGroupCountExceeded {
                count: *count,
                limit: *limit,
            });
        }
    }
    Ok(())
}

/// timestamp queryの範囲がquery poolに収まることを確認する関数
pub fn check_timestamp_range(first: u32, count: u32) -> Result<()> {
    match first.checked_add(count) {
        Some(end) if end <= MAX_TIMESTAMP_QUERIES => Ok(()),
        _ => Err(Error::TimestampQueryOutOfRange {
            first,
            end: first.saturating_add(count),
            capacity: MAX_TIMESTAMP_QUERIES,
        }),
    }
}

impl Context {
    // 記録中のCommandBufferとそのDeviceを取得する
    fn recording(&self, handle: CommandBufferHandle) -> Result<(&Device, &CommandBuffer)> {
        let command_buffer = self.command_buffers.get(handle)?;
        command_buffer.ensure_recording()?;
        let device = self.device(command_buffer.device())?;
        Ok((device, command_buffer))
    }

    /// compute pipelineとそのdescriptor setをbindする
    pub fn cmd_bind_pipeline(
        &self,
        command_buffer: CommandBufferHandle,
        pipeline: PipelineHandle,
    ) -> Result<()> {
        let (device, command_buffer) = self.recording(command_buffer)?;
        let pipeline = self.pipelines.get(pipeline)?;
        unsafe {
            let command_buffer = command_buffer.command_buffer_raw();
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline_raw(),
            );
            if pipeline.descriptor_set_raw() != vk::DescriptorSet::null() {
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline.pipeline_layout_raw(),
                    0,
                    &[pipeline.descriptor_set_raw()],
                    &[],
                );
            }
        }
        Ok(())
    }

    /// push constantを書き込む。サイズはpipelineで宣言したものと一致する必要がある
    pub fn cmd_push_constants<T: bytemuck::Pod>(
        &self,
        command_buffer: CommandBufferHandle,
        pipeline: PipelineHandle,
        data: &T,
    ) -> Result<()> {
        let (device, command_buffer) = self.recording(command_buffer)?;
        let pipeline = self.pipelines.get(pipeline)?;
        let bytes = bytemuck::bytes_of(data);
        if bytes.len() != pipeline.push_constants_size() as usize {
            return Err(Error::PushConstantsSizeMismatch {
                expected: pipeline.push_constants_size(),
                actual: bytes.len(),
            });
        }
        unsafe {
            device.cmd_push_constants(
                command_buffer.command_buffer_raw(),
                pipeline.pipeline_layout_raw(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytes,
            );
        }
        Ok(())
    }

    /// bindしたcompute pipelineをdispatchする
    pub fn cmd_dispatch(
        &self,
        command_buffer: CommandBufferHandle,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<()> {
        let (device, command_buffer) = self.recording(command_buffer)?;
        check_work_group_count(
            [group_count_x, group_count_y, group_count_z],
            device.limits(),
        )?;
        unsafe {
            device.cmd_dispatch(
                command_buffer.command_buffer_raw(),
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
        Ok(())
    }

    /// Buffer間のコピーを記録する。sizeに `WHOLE_SIZE` を指定するとsrcの残り全部
    pub fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let (device, command_buffer) = self.recording(command_buffer)?;
        let src = self.buffers.get(src)?;
        let dst = self.buffers.get(dst)?;
        let size = resolve_range(src.size(), src_offset, size)?;
        resolve_range(dst.size(), dst_offset, size)?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            device.cmd_copy_buffer(
                command_buffer.command_buffer_raw(),
                src.buffer_raw(),
                dst.buffer_raw(),
                &[region],
            );
        }
        Ok(())
    }

    /// compute shaderとtransferのstage間のpipeline barrierを記録する
    pub fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferHandle,
        memory_barriers: &[MemoryBarrier],
        buffer_memory_barriers: &[BufferMemoryBarrier],
        image_memory_barriers: &[ImageMemoryBarrier],
    ) -> Result<()> {
        let (device, command_buffer) = self.recording(command_buffer)?;

        let memory_barriers = memory_barriers
            .iter()
            .map(|barrier| {
                vk::MemoryBarrier::builder()
                    .src_access_mask(barrier.src_access.to_vk())
                    .dst_access_mask(barrier.dst_access.to_vk())
                    .build()
            })
            .collect::<Vec<_>>();
        let buffer_memory_barriers = buffer_memory_barriers
            .iter()
            .map(|barrier| {
                let buffer = self.buffers.get(barrier.buffer)?;
                let size = resolve_range(buffer.size(), barrier.offset, barrier.size)?;
                Ok(vk::BufferMemoryBarrier::builder()
                    .src_access_mask(barrier.src_access.to_vk())
                    .dst_access_mask(barrier.dst_access.to_vk())
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(unsafe { buffer.buffer_raw() })
                    .offset(barrier.offset)
                    .size(size)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;
        let image_memory_barriers = image_memory_barriers
            .iter()
            .map(|barrier| {
                let image = self.images.get(barrier.image)?;
                Ok(vk::ImageMemoryBarrier::builder()
                    .src_access_mask(barrier.src_access.to_vk())
                    .dst_access_mask(barrier.dst_access.to_vk())
                    .old_layout(barrier.old_layout.to_vk())
                    .new_layout(barrier.new_layout.to_vk())
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(unsafe { image.image_raw() })
                    .subresource_range(color_subresource_range())
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer.command_buffer_raw(),
                BARRIER_STAGES,
                BARRIER_STAGES,
                vk::DependencyFlags::empty(),
                &memory_barriers,
                &buffer_memory_barriers,
                &image_memory_barriers,
            );
        }
        Ok(())
    }

    /// timestamp queryの `first` から `count` 個をリセットする
    pub fn cmd_reset_timestamps(
        &self,
        command_buffer: CommandBufferHandle,
        first: u32,
        count: u32,
    ) -> Result<()> {
        check_timestamp_range(first, count)?;
        let (device, command_buffer) = self.recording(command_buffer)?;
        unsafe {
            device.cmd_reset_query_pool(
                command_buffer.command_buffer_raw(),
                command_buffer.query_pool,
                first,
                count,
            );
        }
        Ok(())
    }

    /// それまでのコマンドがすべて完了した時点のtimestampを書き込む
    pub fn cmd_write_timestamp(&self, command_buffer: CommandBufferHandle, index: u32) -> Result<()> {
        check_timestamp_range(index, 1)?;
        let (device, command_buffer) = self.recording(command_buffer)?;
        unsafe {
            device.cmd_write_timestamp(
                command_buffer.command_buffer_raw(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                command_buffer.query_pool,
                index,
            );
        }
        Ok(())
    }

    /// timestampを64bitの値としてbufferの先頭にコピーする。
    /// waitがtrueの場合は結果が利用可能になるまで待つ
    pub fn cmd_copy_timestamps(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        first: u32,
        count: u32,
        wait: bool,
    ) -> Result<()> {
        check_timestamp_range(first, count)?;
        let (device, command_buffer) = self.recording(command_buffer)?;
        let buffer = self.buffers.get(buffer)?;
        let stride = std::mem::size_of::<u64>() as u64;
        resolve_range(buffer.size(), 0, count as u64 * stride)?;
        let flags = if wait {
            vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT
        } else {
            vk::QueryResultFlags::TYPE_64
        };
        unsafe {
            device.cmd_copy_query_pool_results(
                command_buffer.command_buffer_raw(),
                command_buffer.query_pool,
                first,
                count,
                buffer.buffer_raw(),
                0,
                stride,
                flags,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            subgroup_size: 32,
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_count: [65535, 65535, 65535],
            max_compute_work_group_invocations: 1024,
            min_storage_buffer_offset_alignment: 256,
            max_storage_buffer_range: u32::MAX,
            max_push_constants_size: 128,
            non_coherent_atom_size: 64,
            timestamp_period: 1.0,
            timestamp_valid_bits: 64,
        }
    }

    #[test]
    fn work_group_count_within_limits() {
        assert!(check_work_group_count([65535, 1, 1], &limits()).is_ok());
        assert!(matches!(
            check_work_group_count([1, 65536, 1], &limits()),
            Err(Error::WorkGroupCountExceeded {
                count: 65536,
                limit: 65535
            })
        ));
    }

    #[test]
    fn timestamp_range() {
        assert!(check_timestamp_range(0, MAX_TIMESTAMP_QUERIES).is_ok());
        assert!(check_timestamp_range(31, 1).is_ok());
        assert!(matches!(
            check_timestamp_range(31, 2),
            Err(Error::TimestampQueryOutOfRange { first: 31, end: 33, .. })
        ));
        assert!(check_timestamp_range(u32::MAX, 2).is_err());
    }

    #[test]
    fn barrier_stages_cover_compute_and_transfer() {
        assert!(BARRIER_STAGES.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(BARRIER_STAGES.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(!BARRIER_STAGES.contains(vk::PipelineStageFlags::HOST));
    }
}
