use crate::{Error, Result};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// SPIR-Vのbytesをu32のwordの列に変換する関数。
/// 先頭のmagic numberからendianを判定する。
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidShaderCode("length is not a multiple of 4"));
    }
    if bytes.len() < 4 {
        return Err(Error::InvalidShaderCode("missing magic number"));
    }
    let from_bytes: fn([u8; 4]) -> u32 = match bytes[0] {
        0x03 => u32::from_le_bytes,
        0x07 => u32::from_be_bytes,
        _ => return Err(Error::InvalidShaderCode("unknown endianness")),
    };
    let words = bytes
        .chunks_exact(4)
        .map(|x| from_bytes([x[0], x[1], x[2], x[3]]))
        .collect::<Vec<u32>>();
    if words[0] != SPIRV_MAGIC {
        return Err(Error::InvalidShaderCode("bad magic number"));
    }
    Ok(words)
}
