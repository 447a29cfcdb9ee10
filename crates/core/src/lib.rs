pub mod gif_patch;
pub mod media;
pub mod pipeline;
pub mod processing;
pub mod shared;
