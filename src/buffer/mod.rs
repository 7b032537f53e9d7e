//! Buffer plumbing shared by the pipeline stages

pub mod descriptor;
pub mod pool;

pub use descriptor::{BufferDescriptor, SampleBufferDescriptor};
pub use pool::{
    new_pool, AtomicBufferPool, BufferFactory, BufferPool, PoolKind, UnsynchronizedBufferPool,
};
