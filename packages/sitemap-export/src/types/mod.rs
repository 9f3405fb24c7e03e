//! Data types shared by the serving path and the regeneration job.

pub mod part;
pub mod range;
pub mod shard;
pub mod summary;
