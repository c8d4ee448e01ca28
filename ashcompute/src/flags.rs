//! ashcompute側のフラグとVulkanのフラグの対応表。
//!
//! フラグの種類ごとに一つの表を持ち、`to_vk` / `from_vk` の両方向の変換はその表だけを使う。

use ash::vk;

bitflags::bitflags! {
    /// Bufferの用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const UNIFORM_TEXEL = 1 << 4;
        const STORAGE_TEXEL = 1 << 5;
    }
}

bitflags::bitflags! {
    /// メモリの可視性などの性質
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL = 1 << 0;
        const HOST_VISIBLE = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED = 1 << 3;
        const LAZILY_ALLOCATED = 1 << 4;
        const PROTECTED = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Barrierで使うメモリアクセスの種類
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const UNIFORM_READ = 1 << 0;
        const SHADER_READ = 1 << 1;
        const SHADER_WRITE = 1 << 2;
        const TRANSFER_READ = 1 << 3;
        const TRANSFER_WRITE = 1 << 4;
        const HOST_READ = 1 << 5;
        const HOST_WRITE = 1 << 6;
        const MEMORY_READ = 1 << 7;
        const MEMORY_WRITE = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Imageの用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
    }
}

const BUFFER_USAGE_TABLE: &[(BufferUsage, vk::BufferUsageFlags)] = &[
    (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
    (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
    (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
    (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
    (
        BufferUsage::UNIFORM_TEXEL,
        vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
    ),
    (
        BufferUsage::STORAGE_TEXEL,
        vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
    ),
];

const MEMORY_PROPERTIES_TABLE: &[(MemoryProperties, vk::MemoryPropertyFlags)] = &[
    (
        MemoryProperties::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ),
    (
        MemoryProperties::HOST_VISIBLE,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
    ),
    (
        MemoryProperties::HOST_COHERENT,
        vk::MemoryPropertyFlags::HOST_COHERENT,
    ),
    (
        MemoryProperties::HOST_CACHED,
        vk::MemoryPropertyFlags::HOST_CACHED,
    ),
    (
        MemoryProperties::LAZILY_ALLOCATED,
        vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
    ),
    (MemoryProperties::PROTECTED, vk::MemoryPropertyFlags::PROTECTED),
];

const ACCESS_FLAGS_TABLE: &[(AccessFlags, vk::AccessFlags)] = &[
    (AccessFlags::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
    (AccessFlags::SHADER_READ, vk::AccessFlags::SHADER_READ),
    (AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
    (AccessFlags::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
    (AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
    (AccessFlags::HOST_READ, vk::AccessFlags::HOST_READ),
    (AccessFlags::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
    (AccessFlags::MEMORY_READ, vk::AccessFlags::MEMORY_READ),
    (AccessFlags::MEMORY_WRITE, vk::AccessFlags::MEMORY_WRITE),
];

const IMAGE_USAGE_TABLE: &[(ImageUsage, vk::ImageUsageFlags)] = &[
    (ImageUsage::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
    (ImageUsage::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
    (ImageUsage::SAMPLED, vk::ImageUsageFlags::SAMPLED),
    (ImageUsage::STORAGE, vk::ImageUsageFlags::STORAGE),
];

macro_rules! translate_flags {
    ($flags:ty, $vk:ty, $table:ident) => {
        impl $flags {
            /// Vulkanのフラグに変換する
            pub fn to_vk(self) -> $vk {
                $table
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .fold(<$vk>::empty(), |acc, (_, vk_flag)| acc | *vk_flag)
            }

            /// Vulkanのフラグから変換する。対応のないbitは無視される
            pub fn from_vk(flags: $vk) -> Self {
                $table
                    .iter()
                    .filter(|(_, vk_flag)| flags.contains(*vk_flag))
                    .fold(Self::empty(), |acc, (flag, _)| acc | *flag)
            }
        }
    };
}

translate_flags!(BufferUsage, vk::BufferUsageFlags, BUFFER_USAGE_TABLE);
translate_flags!(MemoryProperties, vk::MemoryPropertyFlags, MEMORY_PROPERTIES_TABLE);
translate_flags!(AccessFlags, vk::AccessFlags, ACCESS_FLAGS_TABLE);
translate_flags!(ImageUsage, vk::ImageUsageFlags, IMAGE_USAGE_TABLE);

/// Imageのフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    R8G8B8A8Unorm,
    R16G16B16A16Sfloat,
    R32Sfloat,
    R32G32B32A32Sfloat,
}

const IMAGE_FORMAT_TABLE: &[(ImageFormat, vk::Format, u32)] = &[
    (ImageFormat::R8G8B8A8Unorm, vk::Format::R8G8B8A8_UNORM, 4),
    (
        ImageFormat::R16G16B16A16Sfloat,
        vk::Format::R16G16B16A16_SFLOAT,
        8,
    ),
    (ImageFormat::R32Sfloat, vk::Format::R32_SFLOAT, 4),
    (
        ImageFormat::R32G32B32A32Sfloat,
        vk::Format::R32G32B32A32_SFLOAT,
        16,
    ),
];

impl ImageFormat {
    pub fn to_vk(self) -> vk::Format {
        IMAGE_FORMAT_TABLE
            .iter()
            .find(|(format, _, _)| *format == self)
            .map(|(_, vk_format, _)| *vk_format)
            .unwrap_or(vk::Format::UNDEFINED)
    }

    pub fn from_vk(format: vk::Format) -> Option<Self> {
        IMAGE_FORMAT_TABLE
            .iter()
            .find(|(_, vk_format, _)| *vk_format == format)
            .map(|(format, _, _)| *format)
    }

    /// 1ピクセルあたりのバイト数
    pub fn texel_size(self) -> u32 {
        IMAGE_FORMAT_TABLE
            .iter()
            .find(|(format, _, _)| *format == self)
            .map(|(_, _, size)| *size)
            .unwrap_or(0)
    }
}

/// Image Barrierで使うレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
}

const IMAGE_LAYOUT_TABLE: &[(ImageLayout, vk::ImageLayout)] = &[
    (ImageLayout::Undefined, vk::ImageLayout::UNDEFINED),
    (ImageLayout::General, vk::ImageLayout::GENERAL),
    (ImageLayout::TransferSrc, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
    (ImageLayout::TransferDst, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
    (
        ImageLayout::ShaderReadOnly,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ),
];

impl ImageLayout {
    pub fn to_vk(self) -> vk::ImageLayout {
        IMAGE_LAYOUT_TABLE
            .iter()
            .find(|(layout, _)| *layout == self)
            .map(|(_, vk_layout)| *vk_layout)
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    pub fn from_vk(layout: vk::ImageLayout) -> Option<Self> {
        IMAGE_LAYOUT_TABLE
            .iter()
            .find(|(_, vk_layout)| *vk_layout == layout)
            .map(|(layout, _)| *layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_usage_round_trip() {
        let usage = BufferUsage::STORAGE | BufferUsage::TRANSFER_DST;
        let vk_usage = usage.to_vk();
        assert_eq!(
            vk_usage,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(BufferUsage::from_vk(vk_usage), usage);
    }

    #[test]
    fn every_table_entry_is_distinct() {
        for table in [
            BUFFER_USAGE_TABLE.iter().map(|(f, _)| f.bits()).collect::<Vec<_>>(),
            MEMORY_PROPERTIES_TABLE.iter().map(|(f, _)| f.bits()).collect(),
            ACCESS_FLAGS_TABLE.iter().map(|(f, _)| f.bits()).collect(),
            IMAGE_USAGE_TABLE.iter().map(|(f, _)| f.bits()).collect(),
        ] {
            let all = table.iter().fold(0, |acc, bits| acc | bits);
            assert_eq!(all.count_ones() as usize, table.len());
        }
        assert_eq!(BUFFER_USAGE_TABLE.len(), BufferUsage::all().iter().count());
        assert_eq!(
            MEMORY_PROPERTIES_TABLE.len(),
            MemoryProperties::all().iter().count()
        );
        assert_eq!(ACCESS_FLAGS_TABLE.len(), AccessFlags::all().iter().count());
        assert_eq!(IMAGE_USAGE_TABLE.len(), ImageUsage::all().iter().count());
    }

    #[test]
    fn all_flags_round_trip() {
        assert_eq!(
            MemoryProperties::from_vk(MemoryProperties::all().to_vk()),
            MemoryProperties::all()
        );
        assert_eq!(
            AccessFlags::from_vk(AccessFlags::all().to_vk()),
            AccessFlags::all()
        );
        assert_eq!(
            ImageUsage::from_vk(ImageUsage::all().to_vk()),
            ImageUsage::all()
        );
    }

    #[test]
    fn unknown_vk_bits_are_ignored() {
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::from_raw(0x40);
        assert_eq!(
            MemoryProperties::from_vk(flags),
            MemoryProperties::HOST_VISIBLE
        );
    }

    #[test]
    fn image_format_and_layout_tables() {
        for format in [
            ImageFormat::R8G8B8A8Unorm,
            ImageFormat::R16G16B16A16Sfloat,
            ImageFormat::R32Sfloat,
            ImageFormat::R32G32B32A32Sfloat,
        ] {
            assert_eq!(ImageFormat::from_vk(format.to_vk()), Some(format));
            assert!(format.texel_size() > 0);
        }
        assert_eq!(ImageFormat::from_vk(vk::Format::D32_SFLOAT), None);
        assert_eq!(
            ImageLayout::from_vk(ImageLayout::General.to_vk()),
            Some(ImageLayout::General)
        );
    }
}
