pub mod backend;
pub mod chain;
pub mod error;
pub mod event;
pub mod gear;
pub mod generate;
pub mod queue;
pub mod record;
pub mod source;
pub mod store;
