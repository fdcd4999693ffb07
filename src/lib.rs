pub mod comm;
pub mod command;
pub mod config;
pub mod consts;
pub mod error;
pub mod protocol;
pub mod remote;
pub mod supervisor;
pub mod sync;
pub mod timing;
