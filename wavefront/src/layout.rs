//! GPUバッファのサイズとオフセットの計算。
//!
//! シーンのsub-rangeはdeviceの `min_storage_buffer_offset_alignment` に揃えて
//! 1つのstorage bufferに詰める。ray poolのバッファは総レイ数に依存しない。

use crate::scene::SceneHeader;

/// path segment 1本あたりのbyte数
pub const PATH_SEGMENT_STRIDE: u64 = 48;
/// hit info 1つあたりのbyte数
pub const HIT_INFO_STRIDE: u64 = 32;
/// path segment / hit info バッファ先頭のヘッダのbyte数
pub const POOL_HEADER_SIZE: u64 = 16;
/// 出力画像の1ピクセル (RGBA f32) のbyte数
pub const OUTPUT_TEXEL_SIZE: u64 = 16;
/// BVHノード1つのbyte数
pub const BVH_NODE_SIZE: u64 = 80;
/// 空のsub-rangeでもbindingとして有効になるように確保する最小のbyte数
pub const MIN_RANGE_SIZE: u64 = 4;

/// バッファ内のbyte範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}
impl ByteRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// 範囲の末尾。overflowする場合はNone
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// `total` の後ろに `alignment` で揃えた `size` byteの範囲を置く。
/// 新しい合計サイズは返り値の `end()` になる。
pub fn align(total: u64, alignment: u64, size: u64) -> ByteRange {
    let alignment = alignment.max(1);
    let offset = total.div_ceil(alignment) * alignment;
    ByteRange { offset, size }
}

/// device上のシーンバッファのレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneLayout {
    pub nodes: ByteRange,
    pub faces: ByteRange,
    pub vertices: ByteRange,
    pub materials: ByteRange,
    /// シーンバッファ全体のbyte数
    pub size: u64,
}
impl SceneLayout {
    /// ノード、面、頂点、マテリアルの順にalignmentを揃えて配置する
    pub fn new(header: &SceneHeader, alignment: u64) -> Self {
        let mut total = 0;
        let mut place = |size: u64| {
            let range = align(total, alignment, size.max(MIN_RANGE_SIZE));
            total = range.offset + range.size;
            range
        };
        let nodes = place(header.nodes.size);
        let faces = place(header.faces.size);
        let vertices = place(header.vertices.size);
        let materials = place(header.materials.size);
        Self {
            nodes,
            faces,
            vertices,
            materials,
            size: total,
        }
    }

    /// ファイル上のsub-rangeとdevice上の配置の組
    pub fn placements<'a>(
        &'a self,
        header: &'a SceneHeader,
    ) -> impl Iterator<Item = (ByteRange, ByteRange)> + 'a {
        [
            (header.nodes, self.nodes),
            (header.faces, self.faces),
            (header.vertices, self.vertices),
            (header.materials, self.materials),
        ]
        .into_iter()
    }
}

/// 1回のレンダリングで使うバッファのサイズ一式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLayout {
    pub scene: SceneLayout,
    pub total_rays: u64,
    pub pool_capacity: u32,
    pub path_segment_size: u64,
    pub hit_info_size: u64,
    pub output_size: u64,
    pub staging_size: u64,
}
impl RenderLayout {
    pub fn new(
        scene: SceneLayout,
        width: u32,
        height: u32,
        samples_per_pixel: u32,
        pool_ray_count: u32,
    ) -> Self {
        let pixel_count = width as u64 * height as u64;
        let total_rays = pixel_count * samples_per_pixel as u64;
        let pool_capacity = total_rays.min(pool_ray_count as u64) as u32;
        let output_size = pixel_count * OUTPUT_TEXEL_SIZE;
        Self {
            scene,
            total_rays,
            pool_capacity,
            path_segment_size: pool_capacity as u64 * PATH_SEGMENT_STRIDE + POOL_HEADER_SIZE,
            hit_info_size: pool_capacity as u64 * HIT_INFO_STRIDE + POOL_HEADER_SIZE,
            output_size,
            staging_size: output_size.max(scene.size),
        }
    }
}

/// BVHの走査に使うスタックの深さ。`max(1, floor(2 * log8(ノード数)))`
///
/// 浮動小数点の誤差を避けるため `8^k <= ノード数^2` となる最大のkを整数で求める。
pub fn traversal_stack_size(node_bytes: u64) -> u32 {
    let node_count = (node_bytes / BVH_NODE_SIZE) as u128;
    let squared = node_count * node_count;
    let mut depth = 0;
    let mut power: u128 = 8;
    while power <= squared {
        depth += 1;
        power *= 8;
    }
    depth.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sizes: [u64; 4]) -> SceneHeader {
        let mut offset = 88;
        let mut next = |size| {
            let range = ByteRange::new(offset, size);
            offset += size;
            range
        };
        SceneHeader {
            nodes: next(sizes[0]),
            faces: next(sizes[1]),
            vertices: next(sizes[2]),
            materials: next(sizes[3]),
            bounds: None,
        }
    }

    #[test]
    fn align_places_at_next_multiple() {
        let first = align(0, 256, 100);
        assert_eq!(first, ByteRange::new(0, 100));
        assert_eq!(first.end(), Some(100));

        let second = align(100, 256, 50);
        assert_eq!(second, ByteRange::new(256, 50));
        assert_eq!(second.end(), Some(306));

        assert_eq!(align(256, 256, 8).offset, 256);
        assert_eq!(align(7, 0, 8).offset, 7);
    }

    #[test]
    fn scene_layout_is_aligned_and_ordered() {
        let layout = SceneLayout::new(&header([800, 120, 320, 48]), 64);
        assert_eq!(layout.nodes, ByteRange::new(0, 800));
        assert_eq!(layout.faces, ByteRange::new(832, 120));
        assert_eq!(layout.vertices, ByteRange::new(960, 320));
        assert_eq!(layout.materials, ByteRange::new(1280, 48));
        assert_eq!(layout.size, 1328);
        for range in [layout.nodes, layout.faces, layout.vertices, layout.materials] {
            assert_eq!(range.offset % 64, 0);
        }
    }

    #[test]
    fn empty_sub_range_still_reserves_space() {
        let layout = SceneLayout::new(&header([160, 0, 32, 0]), 16);
        assert_eq!(layout.faces, ByteRange::new(160, MIN_RANGE_SIZE));
        assert_eq!(layout.vertices.offset, 176);
        assert_eq!(layout.materials, ByteRange::new(208, MIN_RANGE_SIZE));
    }

    #[test]
    fn pool_buffers_do_not_depend_on_ray_count() {
        let scene = SceneLayout::new(&header([800, 120, 320, 48]), 256);
        let small = RenderLayout::new(scene, 1200, 1200, 256, 1 << 20);
        let large = RenderLayout::new(scene, 4800, 4800, 4096, 1 << 20);
        assert_eq!(small.pool_capacity, 1 << 20);
        assert_eq!(small.path_segment_size, large.path_segment_size);
        assert_eq!(small.hit_info_size, large.hit_info_size);
        assert_eq!(small.path_segment_size, (1 << 20) * 48 + 16);
        assert_eq!(small.hit_info_size, (1 << 20) * 32 + 16);
        assert_eq!(large.total_rays, 4800 * 4800 * 4096);
    }

    #[test]
    fn pool_capacity_is_clamped_to_total_rays() {
        let scene = SceneLayout::new(&header([80, 0, 0, 0]), 256);
        let layout = RenderLayout::new(scene, 10, 1, 10, 1 << 20);
        assert_eq!(layout.total_rays, 100);
        assert_eq!(layout.pool_capacity, 100);
        assert_eq!(layout.path_segment_size, 100 * 48 + 16);
    }

    #[test]
    fn staging_serves_upload_and_readback() {
        let scene = SceneLayout::new(&header([1 << 20, 0, 0, 0]), 256);
        let layout = RenderLayout::new(scene, 16, 16, 1, 256);
        assert_eq!(layout.output_size, 16 * 16 * 16);
        assert_eq!(layout.staging_size, scene.size);

        let layout = RenderLayout::new(scene, 1024, 1024, 1, 256);
        assert_eq!(layout.staging_size, layout.output_size);
    }

    #[test]
    fn traversal_stack_grows_with_node_count() {
        assert_eq!(traversal_stack_size(0), 1);
        assert_eq!(traversal_stack_size(80), 1);
        assert_eq!(traversal_stack_size(8 * 80), 2);
        assert_eq!(traversal_stack_size(64 * 80), 4);
        assert_eq!(traversal_stack_size(100 * 80), 4);
    }
}
