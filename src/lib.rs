pub mod download;
pub mod http;
pub mod install;
pub mod platform;
pub mod process;
pub mod runtime;
