pub mod bootstrap;
pub mod memory;
pub mod queue;
pub mod sink;
pub mod source;
pub mod status;
pub mod storage;
pub mod transform;
pub mod worker;
