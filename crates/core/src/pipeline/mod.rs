pub mod infrastructure;
pub mod process_media;
pub mod transcode_use_case;
pub mod transformed_reader;
