mod buffer;
mod command_buffer;
mod device;
mod fence;
mod image;
mod memory;
mod pipeline;
mod shader;

pub use buffer::*;
pub use command_buffer::*;
pub use device::*;
pub use fence::*;
pub use image::*;
pub use memory::MappedMemory;
pub use pipeline::*;
pub use shader::*;

pub(crate) use image::color_subresource_range;
