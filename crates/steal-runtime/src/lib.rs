#![doc = "Stolen-time accounting engine: runstate sources, per-CPU delta-and-carry accumulation, and the background sampling loop."]

pub mod accumulator;
pub mod counter;
pub mod cpuset;
pub mod module;
pub mod runstate;
pub mod sampler;

pub use accumulator::*;
pub use counter::*;
pub use cpuset::*;
pub use module::*;
pub use runstate::*;
pub use sampler::*;
