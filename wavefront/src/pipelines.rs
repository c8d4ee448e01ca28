//! ray generation / extend / shade のpipelineのパラメータ。
//!
//! 3つのpipelineは同じbindingを共有する。
//! 値の決まっているパラメータはspecialization constantとしてpipelineに焼き込む。

use crate::{layout::traversal_stack_size, schedule::Stage, Parameters, RayGenPushConstants};
use anyhow::Context as _;
use ashcompute::{DeviceLimits, SpecializationConstant, SpecializationValue};
use std::path::{Path, PathBuf};

/// shaderのentry point
pub const ENTRY_POINT: &str = "main";

pub const BINDING_OUTPUT: u32 = 0;
pub const BINDING_PATH_SEGMENTS: u32 = 1;
pub const BINDING_HIT_INFO: u32 = 2;
pub const BINDING_NODES: u32 = 3;
pub const BINDING_FACES: u32 = 4;
pub const BINDING_VERTICES: u32 = 5;
pub const BINDING_MATERIALS: u32 = 6;

/// `<dir>/<stage>.comp.spv`
pub fn shader_path(dir: &Path, stage: Stage) -> PathBuf {
    dir.join(format!("{}.comp.spv", stage.name()))
}

/// 実行ファイルと同じディレクトリの `shaders`
pub fn default_shader_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the executable")?;
    let dir = exe
        .parent()
        .context("the executable has no parent directory")?;
    Ok(dir.join("shaders"))
}

/// work groupの幅。subgroupの幅をwork groupの上限に収めたもの
pub fn workgroup_width(limits: &DeviceLimits) -> u32 {
    let max = limits.max_compute_work_group_size[0]
        .min(limits.max_compute_work_group_invocations)
        .max(1);
    limits.subgroup_size.clamp(1, max)
}

/// push constantのbyte数
pub fn push_constants_size(stage: Stage) -> u32 {
    match stage {
        Stage::RayGeneration => std::mem::size_of::<RayGenPushConstants>() as u32,
        Stage::Extend | Stage::Shade => 0,
    }
}

/// pipelineごとのspecialization constant
pub fn specialization_constants(
    stage: Stage,
    params: &Parameters,
    workgroup_width: u32,
    node_bytes: u64,
    pool_capacity: u32,
) -> Vec<SpecializationConstant> {
    use SpecializationValue::{F32, U32};

    let values = match stage {
        Stage::RayGeneration => vec![
            U32(workgroup_width),
            U32(params.width),
            U32(params.height),
            U32(params.samples_per_pixel),
            F32(params.camera_origin.x),
            F32(params.camera_origin.y),
            F32(params.camera_origin.z),
            F32(params.camera_target.x),
            F32(params.camera_target.y),
            F32(params.camera_target.z),
            F32(params.camera_fov),
        ],
        Stage::Extend => vec![
            U32(workgroup_width),
            U32(traversal_stack_size(node_bytes)),
            U32(pool_capacity),
        ],
        Stage::Shade => vec![
            U32(workgroup_width),
            U32(params.samples_per_pixel),
            U32(pool_capacity),
        ],
    };
    values
        .into_iter()
        .enumerate()
        .map(|(constant_id, value)| SpecializationConstant {
            constant_id: constant_id as u32,
            value,
        })
        .collect()
}
