//! compute専用の小さなVulkanラッパー。
//!
//! GPUオブジェクトはすべて [`Context`] が所有し、利用側には世代付きの [`Handle`] だけを渡す。
//! 破棄済みのHandleや別の種類のStoreのHandleを使うと `Error::InvalidHandle` が返る。

mod barrier;
mod commands;
mod context;
mod error;
mod flags;
mod handles;
mod store;
pub mod utils;

pub use barrier::*;
pub use commands::{check_timestamp_range, check_work_group_count};
pub use context::Context;
pub use error::{Error, Result};
pub use flags::*;
pub use handles::*;
pub use store::{Handle, HandleStore};

/// 範囲指定でoffsetから末尾までを表す値
pub const WHOLE_SIZE: u64 = ash::vk::WHOLE_SIZE;

pub use ash::vk;
