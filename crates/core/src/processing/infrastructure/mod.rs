pub mod auto_crop;
pub mod closure;
pub mod flip;
pub mod resize;
pub mod retime;
