//! Audio backends: the platform audio stack (CPAL) and a headless in-memory device.

mod cpal_host;
mod memory;

pub use cpal_host::CpalBackend;
pub use memory::MemoryBackend;
