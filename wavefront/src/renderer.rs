use crate::{
    layout::{RenderLayout, SceneLayout},
    output::RenderedImage,
    pipelines::{
        default_shader_dir, push_constants_size, shader_path, specialization_constants,
        workgroup_width, BINDING_FACES, BINDING_HIT_INFO, BINDING_MATERIALS, BINDING_NODES,
        BINDING_OUTPUT, BINDING_PATH_SEGMENTS, BINDING_VERTICES, ENTRY_POINT,
    },
    scene::{Scene, SceneHeader},
    schedule::{
        record_render, BufferBarrier, BufferRole, Dispatch, PassEncoder, RenderPlan, Stage,
        Transfer, TIMESTAMP_COUNT, TIMESTAMP_END, TIMESTAMP_START,
    },
    Parameters,
};
use anyhow::{bail, Context as _};
use ashcompute::{
    BufferBinding, BufferHandle, BufferMemoryBarrier, BufferUsage, CommandBufferHandle, Context,
    DeviceHandle, FenceHandle, MemoryProperties, PipelineDesc, PipelineHandle, WHOLE_SIZE,
};
use log::{debug, info, warn};

struct RenderBuffers {
    output: BufferHandle,
    path_segments: BufferHandle,
    hit_info: BufferHandle,
    scene: BufferHandle,
    staging: BufferHandle,
    timestamps: Option<BufferHandle>,
}
impl RenderBuffers {
    fn get(&self, role: BufferRole) -> BufferHandle {
        match role {
            BufferRole::Output => self.output,
            BufferRole::PathSegments => self.path_segments,
            BufferRole::HitInfo => self.hit_info,
            BufferRole::Scene => self.scene,
            BufferRole::Staging => self.staging,
        }
    }
}

struct Pipelines {
    ray_generation: PipelineHandle,
    extend: PipelineHandle,
    shade: PipelineHandle,
}
impl Pipelines {
    fn get(&self, stage: Stage) -> PipelineHandle {
        match stage {
            Stage::RayGeneration => self.ray_generation,
            Stage::Extend => self.extend,
            Stage::Shade => self.shade,
        }
    }
}

/// 1枚の画像をwavefront path tracingでレンダリングする。
/// GPUのオブジェクトはすべてContextが所有し、Rendererと一緒に破棄される。
pub struct Renderer {
    width: u32,
    height: u32,
    scene_header: SceneHeader,
    layout: RenderLayout,
    plan: RenderPlan,

    context: Context,
    device: DeviceHandle,
    buffers: RenderBuffers,
    pipelines: Pipelines,
    command_buffer: CommandBufferHandle,
    fence: FenceHandle,
}
impl Renderer {
    pub fn new(params: &Parameters, scene_header: &SceneHeader) -> anyhow::Result<Self> {
        params.validate()?;

        let mut context = Context::new("wavefront").context("failed to initialize Vulkan")?;
        let device = context
            .create_device(params.device_index, &[])
            .with_context(|| format!("failed to create device {}", params.device_index))?;
        let limits = context.device_limits(device)?.clone();

        // layout
        let scene_layout =
            SceneLayout::new(scene_header, limits.min_storage_buffer_offset_alignment);
        let layout = RenderLayout::new(
            scene_layout,
            params.width,
            params.height,
            params.samples_per_pixel,
            params.pool_ray_count,
        );
        let workgroup_width = workgroup_width(&limits);
        let timestamps = limits.supports_timestamps();
        if !timestamps {
            warn!("the compute queue family does not support timestamps");
        }
        let plan = RenderPlan {
            total_rays: layout.total_rays,
            pool_capacity: layout.pool_capacity,
            samples_per_pixel: params.samples_per_pixel,
            bounces: params.bounces,
            workgroup_width,
            timestamps,
        };
        let max_group_count = limits.max_compute_work_group_count[0];
        if plan.pool_group_count() > max_group_count {
            bail!(
                "ray pool of {} rays needs {} work groups, the device allows {}",
                layout.pool_capacity,
                plan.pool_group_count(),
                max_group_count
            );
        }
        info!(
            "{} rays in {} batches of up to {} rays, workgroup width {}",
            layout.total_rays,
            plan.batches().len(),
            layout.pool_capacity,
            workgroup_width
        );
        debug!("{:?}", layout);

        // buffers
        let device_local = MemoryProperties::DEVICE_LOCAL;
        let output = context
            .create_buffer(
                device,
                BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC,
                device_local,
                layout.output_size,
            )
            .context("failed to create output buffer")?;
        let path_segments = context
            .create_buffer(device, BufferUsage::STORAGE, device_local, layout.path_segment_size)
            .context("failed to create path-segment buffer")?;
        let hit_info = context
            .create_buffer(device, BufferUsage::STORAGE, device_local, layout.hit_info_size)
            .context("failed to create hit-info buffer")?;
        let scene = context
            .create_buffer(
                device,
                BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
                device_local,
                layout.scene.size,
            )
            .context("failed to create scene buffer")?;

        // host cachedが無い環境ではcoherentのみで作る
        let staging_usage = BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST;
        let host_memory = MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT;
        let staging = match context.create_buffer(
            device,
            staging_usage,
            host_memory | MemoryProperties::HOST_CACHED,
            layout.staging_size,
        ) {
            Ok(staging) => staging,
            Err(ashcompute::Error::NoSuitableMemoryType { .. }) => context
                .create_buffer(device, staging_usage, host_memory, layout.staging_size)
                .context("failed to create staging buffer")?,
            Err(err) => return Err(err).context("failed to create staging buffer"),
        };
        let timestamps = if timestamps {
            Some(
                context
                    .create_buffer(
                        device,
                        BufferUsage::TRANSFER_DST,
                        host_memory,
                        TIMESTAMP_COUNT as u64 * std::mem::size_of::<u64>() as u64,
                    )
                    .context("failed to create timestamp buffer")?,
            )
        } else {
            None
        };
        let buffers = RenderBuffers {
            output,
            path_segments,
            hit_info,
            scene,
            staging,
            timestamps,
        };

        // pipelines
        let bindings = [
            (BINDING_OUTPUT, output, 0, WHOLE_SIZE),
            (BINDING_PATH_SEGMENTS, path_segments, 0, WHOLE_SIZE),
            (BINDING_HIT_INFO, hit_info, 0, WHOLE_SIZE),
            (BINDING_NODES, scene, layout.scene.nodes.offset, layout.scene.nodes.size),
            (BINDING_FACES, scene, layout.scene.faces.offset, layout.scene.faces.size),
            (BINDING_VERTICES, scene, layout.scene.vertices.offset, layout.scene.vertices.size),
            (BINDING_MATERIALS, scene, layout.scene.materials.offset, layout.scene.materials.size),
        ]
        .map(|(binding, buffer, offset, size)| BufferBinding {
            binding,
            buffer,
            offset,
            size,
        });
        let shader_dir = match &params.shader_dir {
            Some(dir) => dir.clone(),
            None => default_shader_dir()?,
        };
        let mut create_pipeline = |stage: Stage| -> anyhow::Result<PipelineHandle> {
            let path = shader_path(&shader_dir, stage);
            let code = std::fs::read(&path)
                .with_context(|| format!("failed to read shader {}", path.display()))?;
            let shader = context
                .create_shader(device, &code)
                .with_context(|| format!("failed to create shader {}", path.display()))?;
            let constants = specialization_constants(
                stage,
                params,
                workgroup_width,
                scene_header.nodes.size,
                layout.pool_capacity,
            );
            let pipeline = context
                .create_pipeline(
                    device,
                    &PipelineDesc {
                        shader,
                        entry_point: ENTRY_POINT,
                        buffer_bindings: &bindings,
                        image_bindings: &[],
                        specialization_constants: &constants,
                        push_constants_size: push_constants_size(stage),
                    },
                )
                .with_context(|| format!("failed to create {} pipeline", stage.name()))?;
            // shader moduleはpipeline作成後は不要
            context.destroy_shader(shader)?;
            Ok(pipeline)
        };
        let pipelines = Pipelines {
            ray_generation: create_pipeline(Stage::RayGeneration)?,
            extend: create_pipeline(Stage::Extend)?,
            shade: create_pipeline(Stage::Shade)?,
        };

        let command_buffer = context
            .create_command_buffer(device)
            .context("failed to create command buffer")?;
        let fence = context
            .create_fence(device)
            .context("failed to create fence")?;

        Ok(Self {
            width: params.width,
            height: params.height,
            scene_header: *scene_header,
            layout,
            plan,
            context,
            device,
            buffers,
            pipelines,
            command_buffer,
            fence,
        })
    }

    pub fn layout(&self) -> &RenderLayout {
        &self.layout
    }

    pub fn plan(&self) -> &RenderPlan {
        &self.plan
    }

    /// シーンをuploadしてレンダリングし、結果を読み戻す
    pub fn render(&mut self, scene: &Scene) -> anyhow::Result<RenderedImage> {
        if scene.header() != &self.scene_header {
            bail!("the scene does not match the layout this renderer was built for");
        }
        self.upload(scene)?;

        // record
        self.context
            .begin_command_buffer(self.command_buffer)
            .context("failed to begin command buffer")?;
        {
            let mut encoder = GpuPassEncoder {
                context: &self.context,
                command_buffer: self.command_buffer,
                buffers: &self.buffers,
                pipelines: &self.pipelines,
                layout: &self.layout,
            };
            record_render(&mut encoder, &self.plan)?;
        }
        self.context
            .end_command_buffer(self.command_buffer)
            .context("failed to end command buffer")?;

        // submit
        self.context
            .reset_fence(self.fence)
            .context("failed to reset fence")?;
        self.context
            .submit_command_buffer(self.device, self.command_buffer, self.fence)
            .context("failed to submit command buffer")?;
        self.context
            .wait_for_fence(self.fence)
            .context("failed to wait for fence")?;

        let pixels = self.read_output()?;
        let elapsed_milliseconds = self.read_elapsed_milliseconds()?;
        if let Some(elapsed) = elapsed_milliseconds {
            info!("rendering took {:.3} ms", elapsed);
        }
        Ok(RenderedImage {
            width: self.width,
            height: self.height,
            pixels,
            elapsed_milliseconds,
        })
    }

    // stagingにシーンの各sub-rangeを配置する
    fn upload(&self, scene: &Scene) -> anyhow::Result<()> {
        let mut mapped = self
            .context
            .map_buffer(self.buffers.staging, 0, self.layout.scene.size)
            .context("failed to map staging buffer")?;
        for (source, destination) in self.layout.scene.placements(&self.scene_header) {
            let start = destination.offset as usize;
            mapped[start..start + source.size as usize].copy_from_slice(scene.bytes(source));
        }
        mapped.flush().context("failed to flush staging buffer")?;
        mapped.unmap();
        debug!("uploaded {} bytes of scene data", self.layout.scene.size);
        Ok(())
    }

    fn read_output(&self) -> anyhow::Result<Vec<f32>> {
        let mapped = self
            .context
            .map_buffer(self.buffers.staging, 0, self.layout.output_size)
            .context("failed to map staging buffer")?;
        mapped
            .invalidate()
            .context("failed to invalidate staging buffer")?;
        Ok(mapped
            .chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect())
    }

    fn read_elapsed_milliseconds(&self) -> anyhow::Result<Option<f64>> {
        let Some(buffer) = self.buffers.timestamps else {
            return Ok(None);
        };
        let mapped = self
            .context
            .map_buffer(buffer, 0, WHOLE_SIZE)
            .context("failed to map timestamp buffer")?;
        mapped
            .invalidate()
            .context("failed to invalidate timestamp buffer")?;
        let timestamp = |index: u32| {
            let start = index as usize * 8;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&mapped[start..start + 8]);
            u64::from_ne_bytes(bytes)
        };
        let limits = self.context.device_limits(self.device)?;
        Ok(Some(limits.elapsed_milliseconds(
            timestamp(TIMESTAMP_START),
            timestamp(TIMESTAMP_END),
        )))
    }
}

// RenderPlanのパスをCommandBufferに記録する
struct GpuPassEncoder<'a> {
    context: &'a Context,
    command_buffer: CommandBufferHandle,
    buffers: &'a RenderBuffers,
    pipelines: &'a Pipelines,
    layout: &'a RenderLayout,
}
impl PassEncoder for GpuPassEncoder<'_> {
    fn reset_timestamps(&mut self) -> anyhow::Result<()> {
        Ok(self
            .context
            .cmd_reset_timestamps(self.command_buffer, 0, TIMESTAMP_COUNT)?)
    }

    fn write_timestamp(&mut self, index: u32) -> anyhow::Result<()> {
        Ok(self.context.cmd_write_timestamp(self.command_buffer, index)?)
    }

    fn copy(&mut self, transfer: Transfer) -> anyhow::Result<()> {
        let (src, dst, size) = match transfer {
            Transfer::UploadScene => (
                self.buffers.staging,
                self.buffers.scene,
                self.layout.scene.size,
            ),
            Transfer::ReadbackOutput => (
                self.buffers.output,
                self.buffers.staging,
                self.layout.output_size,
            ),
        };
        self.context
            .cmd_copy_buffer(self.command_buffer, src, 0, dst, 0, size)
            .with_context(|| format!("failed to record {:?}", transfer))
    }

    fn barrier(&mut self, barriers: &[BufferBarrier]) -> anyhow::Result<()> {
        let barriers = barriers
            .iter()
            .map(|barrier| {
                BufferMemoryBarrier::whole(
                    self.buffers.get(barrier.buffer),
                    barrier.src_access,
                    barrier.dst_access,
                )
            })
            .collect::<Vec<_>>();
        Ok(self
            .context
            .cmd_pipeline_barrier(self.command_buffer, &[], &barriers, &[])?)
    }

    fn dispatch(&mut self, dispatch: Dispatch) -> anyhow::Result<()> {
        let pipeline = self.pipelines.get(dispatch.stage);
        self.context
            .cmd_bind_pipeline(self.command_buffer, pipeline)?;
        if let Some(push_constants) = &dispatch.push_constants {
            self.context
                .cmd_push_constants(self.command_buffer, pipeline, push_constants)?;
        }
        self.context
            .cmd_dispatch(self.command_buffer, dispatch.group_count, 1, 1)
            .with_context(|| format!("failed to dispatch {}", dispatch.stage.name()))
    }

    fn copy_timestamps(&mut self) -> anyhow::Result<()> {
        let buffer = self
            .buffers
            .timestamps
            .context("timestamps are not supported on this device")?;
        Ok(self.context.cmd_copy_timestamps(
            self.command_buffer,
            buffer,
            0,
            TIMESTAMP_COUNT,
            true,
        )?)
    }
}
