pub mod batches;
pub mod bindings;
pub mod buffers;
pub mod context;
pub mod environment;
pub mod materials;
pub mod pipeline;
pub mod samplers;
pub mod shadows;
pub mod timer;
