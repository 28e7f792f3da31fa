pub mod archive;
pub mod console_service;
pub mod format;
pub mod hierarchy;
pub mod path_codec;
pub mod refresher;
pub mod retry;
pub mod stats;
pub mod store;
