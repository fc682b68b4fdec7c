//! Gateway execution for CGI scripts: identity drop, CGI/1.1 environment
//! and argument construction, and process image replacement, run inside
//! the per-request child process.

pub mod config;
pub mod error;
pub mod http;
pub mod launcher;
pub mod params;
pub mod privilege;
pub mod resolver;
pub mod sys;

pub const SERVER_SOFTWARE: &str = concat!("cgi-gateway/", env!("CARGO_PKG_VERSION"));
