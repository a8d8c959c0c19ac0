pub mod clock;
pub mod config;
pub mod day_close;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod ordering;
pub mod storage;
pub mod summary;
pub mod sync;
pub mod task_api;
pub mod transfer;
