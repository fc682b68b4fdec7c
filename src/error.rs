use crate::config::ServerConfig;
use crate::http::{Request, Response};
use nix::errno::Errno;
use std::collections::TryReserveError;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration has no controls")]
    NoControls,
}

/// Why a gateway launch stopped short of replacing the process image.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot run scripts without changing identity")]
    NoIdentityPolicy,
    #[error("identity change requested but the server is not running as root")]
    NotSuperuser,
    #[error("{0}: no such user")]
    UnknownUser(String),
    #[error("user lookup for {name} failed: {source}")]
    UserLookup { name: String, source: Errno },
    #[error("refusing to set uid to {0}")]
    DisallowedUid(u32),
    #[error("{call}: {source}")]
    Syscall { call: &'static str, source: Errno },
    #[error("cannot run scripts as the super-user")]
    StillSuperuser,
    #[error("script path {0} has no directory component")]
    NoDirectory(String),
    #[error("failed to change directory to {path}: {source}")]
    Chdir { path: String, source: Errno },
    #[error("out of memory building script parameters")]
    OutOfMemory(#[from] TryReserveError),
    #[error("parameter {0:?} contains a NUL byte")]
    InteriorNul(String),
    #[error("bad escape in query word {0:?}")]
    BadEscape(String),
    #[error("execve {path}: {source}")]
    Exec { path: String, source: Errno },
}

impl GatewayError {
    /// Status reported to the client. Identity and exec problems look
    /// like a missing script.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::NoIdentityPolicy
            | GatewayError::NotSuperuser
            | GatewayError::UnknownUser(_)
            | GatewayError::UserLookup { .. }
            | GatewayError::DisallowedUid(_)
            | GatewayError::Syscall { .. }
            | GatewayError::Exec { .. } => 404,
            GatewayError::StillSuperuser
            | GatewayError::NoDirectory(_)
            | GatewayError::Chdir { .. }
            | GatewayError::OutOfMemory(_)
            | GatewayError::InteriorNul(_)
            | GatewayError::BadEscape(_) => 500,
        }
    }
}

/// Turns a status code into the bytes written back to the client.
pub trait PrepareReply {
    fn prepare_reply(&self, request: &Request, status: u16) -> Option<Vec<u8>>;
}

/// Renders configured error pages, or a minimal HTML body.
pub struct ErrorPages<'a> {
    server_cfg: &'a ServerConfig,
}

impl<'a> ErrorPages<'a> {
    pub fn new(server_cfg: &'a ServerConfig) -> Self {
        ErrorPages { server_cfg }
    }
}

impl PrepareReply for ErrorPages<'_> {
    fn prepare_reply(&self, request: &Request, status: u16) -> Option<Vec<u8>> {
        let res = generate_error_response(status, self.server_cfg);
        Some(res.to_bytes(request.version))
    }
}

pub fn generate_error_response(status_code: u16, server_cfg: &ServerConfig) -> Response {
    let mut res = Response::new(status_code, server_cfg.software());

    let page = server_cfg
        .error_pages
        .as_ref()
        .and_then(|pages| pages.get(&status_code))
        .and_then(|path| fs::read(path).ok());

    res.body = match page {
        Some(content) => content,
        None => format!("<h1>{} {}</h1>\n", status_code, res.status_text()).into_bytes(),
    };
    res.headers.push(("Content-Type".to_string(), "text/html".to_string()));
    res.headers.push(("Content-Length".to_string(), res.body.len().to_string()));
    res
}
