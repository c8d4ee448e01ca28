use crate::{Error, Result, WHOLE_SIZE};
use ash::vk;

/// memory_type_bitsに含まれ、要求したpropertyをすべて持つ最初のmemory typeのindexを返す関数
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: u32,
    requested: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .position(|(i, memory_type)| {
            (memory_type_bits & (1 << i)) != 0 && memory_type.property_flags.contains(requested)
        })
        .map(|index| index as u32)
        .ok_or(Error::NoSuitableMemoryType { requested })
}

/// offsetとsizeで指定した範囲を解決してsizeを返す関数。
/// sizeに`WHOLE_SIZE`を指定するとoffsetから末尾までになる。
pub fn resolve_range(capacity: u64, offset: u64, size: u64) -> Result<u64> {
    let out_of_bounds = Error::RangeOutOfBounds {
        offset,
        size,
        capacity,
    };
    if offset > capacity {
        return Err(out_of_bounds);
    }
    if size == WHOLE_SIZE {
        return Ok(capacity - offset);
    }
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(size),
        _ => Err(out_of_bounds),
    }
}

/// vkMapMemoryに渡す範囲を返す関数。
/// 長さ0の範囲はmapできないのでNoneになる。
pub fn native_map_range(offset: u64, size: u64) -> Option<(u64, u64)> {
    (size > 0).then_some((offset, size))
}

/// non-coherentなメモリのflush/invalidateの範囲をatom sizeに揃える関数。
/// 返り値の範囲はallocation_sizeを超えない。
pub fn atom_aligned_range(
    offset: u64,
    size: u64,
    atom_size: u64,
    allocation_size: u64,
) -> (u64, u64) {
    let atom_size = atom_size.max(1);
    let start = offset / atom_size * atom_size;
    let end = (offset + size).div_ceil(atom_size) * atom_size;
    (start, end.min(allocation_size) - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = *flags;
        }
        properties
    }

    #[test]
    fn picks_first_matching_memory_type() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&properties, 0b111, host).unwrap(), 1);
        // type bitsで1番が除外されていれば2番
        assert_eq!(find_memory_type(&properties, 0b101, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn no_suitable_memory_type() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let result = find_memory_type(
            &properties,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        );
        assert!(matches!(result, Err(Error::NoSuitableMemoryType { .. })));
        // 範囲外のmemory typeは見ない
        let result = find_memory_type(&properties, 0b100, vk::MemoryPropertyFlags::empty());
        assert!(result.is_err());
    }

    #[test]
    fn whole_size_maps_exactly_the_buffer_size() {
        assert_eq!(resolve_range(100, 0, WHOLE_SIZE).unwrap(), 100);
        assert_eq!(resolve_range(100, 40, WHOLE_SIZE).unwrap(), 60);
        assert_eq!(resolve_range(100, 100, WHOLE_SIZE).unwrap(), 0);
    }

    #[test]
    fn empty_range_at_the_end_is_not_mapped() {
        let size = resolve_range(100, 100, WHOLE_SIZE).unwrap();
        assert_eq!(native_map_range(100, size), None);
        assert_eq!(native_map_range(96, 4), Some((96, 4)));
    }

    #[test]
    fn explicit_ranges_are_bounds_checked() {
        assert_eq!(resolve_range(100, 10, 90).unwrap(), 90);
        assert!(matches!(
            resolve_range(100, 10, 91),
            Err(Error::RangeOutOfBounds {
                offset: 10,
                size: 91,
                capacity: 100
            })
        ));
        assert!(resolve_range(100, 101, WHOLE_SIZE).is_err());
        assert!(resolve_range(100, u64::MAX - 1, 4).is_err());
    }

    #[test]
    fn atom_aligned_ranges() {
        assert_eq!(atom_aligned_range(0, 100, 64, 256), (0, 128));
        assert_eq!(atom_aligned_range(70, 10, 64, 256), (64, 64));
        assert_eq!(atom_aligned_range(200, 50, 64, 250), (192, 58));
        assert_eq!(atom_aligned_range(3, 5, 1, 16), (3, 5));
    }
}
