pub mod constants;
pub mod data_source;
pub mod error;
pub mod frame;
pub mod loop_count;
pub mod media_info;
