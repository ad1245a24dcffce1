pub mod identity;
pub mod pipeline;
pub mod storage;
pub mod transport;
pub mod util;
