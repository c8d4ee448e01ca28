//! レンダリング結果の画像。

use anyhow::Context as _;
use log::info;
use std::path::Path;

const GAMMA: f32 = 2.2;

/// GPUから読み戻したRGBA f32の画像
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    /// 下の行から順に並んだRGBA
    pub pixels: Vec<f32>,
    /// GPUでの処理時間 (ミリ秒)。timestampが使えない場合はNone
    pub elapsed_milliseconds: Option<f64>,
}
impl RenderedImage {
    /// gamma補正して8bitに量子化する。行は上から順に並べ替える
    pub fn to_rgba8(&self) -> Vec<u8> {
        let row_len = self.width as usize * 4;
        if row_len == 0 {
            return Vec::new();
        }
        self.pixels
            .chunks_exact(row_len)
            .rev()
            .flat_map(|row| row.iter().map(|&value| quantize(value)))
            .collect()
    }

    /// PNGとして保存する
    pub fn save_png(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        image::save_buffer_with_format(
            path,
            &self.to_rgba8(),
            self.width,
            self.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {}x{} image to {}", self.width, self.height, path.display());
        Ok(())
    }
}

/// [0, 1] に切り詰めて `x^(1/2.2)` を8bitに丸める
pub fn quantize(value: f32) -> u8 {
    let value = value.clamp(0.0, 1.0).powf(1.0 / GAMMA);
    (value * 255.0 + 0.5) as u8
}
