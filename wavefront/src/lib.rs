//! GPUのcompute pipelineで動くwavefront path tracer。
//!
//! レイの状態は固定長のray poolに置き、ray generation → extend → shade のパスを
//! barrierを挟みながら繰り返す。GPUメモリの使用量は解像度、サンプル数、バウンス数に依存しない。

pub mod layout;
pub mod output;
pub mod pipelines;
mod renderer;
pub mod scene;
pub mod schedule;

pub use output::RenderedImage;
pub use renderer::Renderer;
pub use scene::{Scene, SceneError, SceneHeader};
pub use schedule::{
    record_render, BufferBarrier, BufferRole, Dispatch, PassEncoder, RayGenPushConstants,
    RenderPlan, Stage, Transfer,
};

use anyhow::Context as _;
use glam::Vec3;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParameterError {
    #[error("image size must not be zero: {width}x{height}")]
    ZeroImageSize { width: u32, height: u32 },
    #[error("image of {width}x{height} pixels is too large")]
    ImageTooLarge { width: u32, height: u32 },
    #[error("samples per pixel must not be zero")]
    ZeroSamples,
    #[error("ray pool size must not be zero")]
    ZeroPoolSize,
    #[error("field of view must be a positive finite angle: {0}")]
    InvalidFov(f32),
    #[error("camera origin and target must differ: {0}")]
    CameraTargetIsOrigin(Vec3),
}

/// レンダリングの設定
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u32,
    pub bounces: u32,
    /// ray poolに同時に置くレイの最大数
    pub pool_ray_count: u32,
    pub camera_origin: Vec3,
    pub camera_target: Vec3,
    /// 垂直方向の画角 (ラジアン)
    pub camera_fov: f32,
    pub device_index: usize,
    /// Noneなら実行ファイルの隣の `shaders`
    pub shader_dir: Option<PathBuf>,
}
impl Default for Parameters {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 1200,
            samples_per_pixel: 256,
            bounces: 4,
            pool_ray_count: 1_048_576,
            camera_origin: Vec3::new(0.0, 1.0, 3.1),
            camera_target: Vec3::new(0.0, 1.0, 0.0),
            camera_fov: 1.0,
            device_index: 0,
            shader_dir: None,
        }
    }
}
impl Parameters {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.width == 0 || self.height == 0 {
            return Err(ParameterError::ZeroImageSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.width.checked_mul(self.height).is_none() {
            return Err(ParameterError::ImageTooLarge {
                width: self.width,
                height: self.height,
            });
        }
        if self.samples_per_pixel == 0 {
            return Err(ParameterError::ZeroSamples);
        }
        if self.pool_ray_count == 0 {
            return Err(ParameterError::ZeroPoolSize);
        }
        if !self.camera_fov.is_finite() || self.camera_fov <= 0.0 {
            return Err(ParameterError::InvalidFov(self.camera_fov));
        }
        if self.camera_origin == self.camera_target {
            return Err(ParameterError::CameraTargetIsOrigin(self.camera_origin));
        }
        Ok(())
    }
}

/// シーンファイルを読み込んで1枚レンダリングする
pub fn render(params: &Parameters, scene_path: &Path) -> anyhow::Result<RenderedImage> {
    params.validate()?;
    let scene = Scene::open(scene_path)?;
    let mut renderer = Renderer::new(params, scene.header()).context("failed to set up renderer")?;
    renderer.render(&scene).context("failed to render")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        let params = Parameters::default();
        assert_eq!(params.validate(), Ok(()));
        assert_eq!((params.width, params.height), (1200, 1200));
        assert_eq!(params.pool_ray_count, 1 << 20);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let with = |f: fn(&mut Parameters)| {
            let mut params = Parameters::default();
            f(&mut params);
            params.validate()
        };
        assert_eq!(
            with(|p| p.height = 0),
            Err(ParameterError::ZeroImageSize {
                width: 1200,
                height: 0
            })
        );
        assert_eq!(
            with(|p| {
                p.width = 1 << 16;
                p.height = 1 << 16;
            }),
            Err(ParameterError::ImageTooLarge {
                width: 1 << 16,
                height: 1 << 16
            })
        );
        assert_eq!(with(|p| p.samples_per_pixel = 0), Err(ParameterError::ZeroSamples));
        assert_eq!(with(|p| p.pool_ray_count = 0), Err(ParameterError::ZeroPoolSize));
        assert!(matches!(
            with(|p| p.camera_fov = f32::NAN),
            Err(ParameterError::InvalidFov(_))
        ));
        assert_eq!(with(|p| p.camera_fov = -1.0), Err(ParameterError::InvalidFov(-1.0)));
        assert!(matches!(
            with(|p| p.camera_target = p.camera_origin),
            Err(ParameterError::CameraTargetIsOrigin(_))
        ));
    }

    #[test]
    fn zero_bounces_is_allowed() {
        let params = Parameters {
            bounces: 0,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
    }
}
