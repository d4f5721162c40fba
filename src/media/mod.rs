//! Audio buffers, timeline assembly and final mixing

pub mod buffer;
pub mod combiner;
pub mod merge_buffer;
pub mod timeline;

pub use buffer::AudioBuffer;
pub use combiner::{AudioCombiner, Stems};
pub use merge_buffer::{MergeBuffer, MergeSummary};
pub use timeline::{assemble, AssemblyReport, SlotPlacement, TimelineAssembler, TimelineSink};
