//! Helpers around external tools and temporary files

pub mod ffmpeg;
pub mod temp;
