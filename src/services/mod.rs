pub mod assets;
pub mod executor;
pub mod pipeline;
pub mod staging;
pub mod storage;
pub mod worker;
