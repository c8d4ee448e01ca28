//! シーンファイルの読み込み。
//!
//! ファイルの先頭はリトルエンディアンの `u64` 8個のヘッダで、
//! ノード、面、頂点、マテリアルの各sub-rangeの (offset, size) を表す。
//! ヘッダの直後にはbounding box (`f32` 6個) が続くことがある。
//! sub-rangeの中身は解釈せずにそのままGPUへ転送する。

use crate::layout::{ByteRange, BVH_NODE_SIZE};
use anyhow::Context as _;
use log::debug;
use memmap2::Mmap;
use std::{fs::File, path::Path};

/// ヘッダのbyte数
pub const HEADER_SIZE: usize = 64;
/// ヘッダ直後のbounding boxのbyte数
pub const BOUNDS_SIZE: usize = 24;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("scene file is truncated: {len} bytes, the header needs 64")]
    Truncated { len: usize },
    #[error("{name} range {offset}+{size} exceeds the scene file of {len} bytes")]
    RangeOutOfBounds {
        name: &'static str,
        offset: u64,
        size: u64,
        len: usize,
    },
}

/// 軸に平行なbounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: glam::Vec3,
    pub max: glam::Vec3,
}

/// シーンファイルのヘッダ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneHeader {
    pub nodes: ByteRange,
    pub faces: ByteRange,
    pub vertices: ByteRange,
    pub materials: ByteRange,
    pub bounds: Option<Aabb>,
}
impl SceneHeader {
    /// ファイルの先頭のbytesからヘッダを読む
    pub fn parse(bytes: &[u8]) -> Result<Self, SceneError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SceneError::Truncated { len: bytes.len() });
        }
        let u64_at = |index: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
            u64::from_le_bytes(word)
        };
        let range_at = |name: &'static str, index: usize| {
            let range = ByteRange::new(u64_at(index), u64_at(index + 1));
            match range.end() {
                Some(end) if end <= bytes.len() as u64 => Ok(range),
                _ => Err(SceneError::RangeOutOfBounds {
                    name,
                    offset: range.offset,
                    size: range.size,
                    len: bytes.len(),
                }),
            }
        };

        let nodes = range_at("node", 0)?;
        let faces = range_at("face", 2)?;
        let vertices = range_at("vertex", 4)?;
        let materials = range_at("material", 6)?;

        // bounding boxはどのsub-rangeとも重ならない場合だけ読む
        let bounds_end = (HEADER_SIZE + BOUNDS_SIZE) as u64;
        let has_bounds = bytes.len() >= HEADER_SIZE + BOUNDS_SIZE
            && [nodes, faces, vertices, materials]
                .iter()
                .all(|range| range.is_empty() || range.offset >= bounds_end);
        let bounds = has_bounds.then(|| {
            let f32_at = |index: usize| {
                let start = HEADER_SIZE + index * 4;
                let mut word = [0u8; 4];
                word.copy_from_slice(&bytes[start..start + 4]);
                f32::from_le_bytes(word)
            };
            Aabb {
                min: glam::Vec3::new(f32_at(0), f32_at(1), f32_at(2)),
                max: glam::Vec3::new(f32_at(3), f32_at(4), f32_at(5)),
            }
        });

        Ok(Self {
            nodes,
            faces,
            vertices,
            materials,
            bounds,
        })
    }

    /// BVHのノード数
    pub fn node_count(&self) -> u64 {
        self.nodes.size / BVH_NODE_SIZE
    }
}

/// memory mapしたシーンファイル
pub struct Scene {
    mmap: Mmap,
    header: SceneHeader,
}
impl Scene {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open scene file {}", path.display()))?;
        // ファイルはレンダリング中に書き換えられない前提
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map scene file {}", path.display()))?;
        let header = SceneHeader::parse(&mmap)
            .with_context(|| format!("failed to read scene file {}", path.display()))?;
        debug!("loaded scene {}: {:?}", path.display(), header);
        Ok(Self { mmap, header })
    }

    pub fn header(&self) -> &SceneHeader {
        &self.header
    }

    /// ヘッダで検証済みのsub-rangeのbytes
    pub fn bytes(&self, range: ByteRange) -> &[u8] {
        &self.mmap[range.offset as usize..(range.offset + range.size) as usize]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}
impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("len", &self.mmap.len())
            .field("header", &self.header)
            .finish()
    }
}
