//! # Utility functions
//! Vulkanの本体には存在しないがあると便利なutilityの関数たち。
//! ここにある関数はGPUを使わずにテストできるようにしている。

mod setup;
pub use setup::*;
mod memory;
pub use memory::*;
mod shader;
pub use shader::*;

pub(crate) use setup::{check_device_extensions, physical_device_name, query_device_limits};
