pub mod gif_layout;
pub mod loop_patcher;
pub mod patched_stream;
