use serde::Deserialize;
use std::fmt;
use std::net::SocketAddrV4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Addresses of the connection a request arrived on.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Connection {
    pub peer: SocketAddrV4,
    pub local: SocketAddrV4,
}

/// Filesystem owner of the script a request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScriptOwner {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestClass {
    /// The translated path is itself the executable.
    #[default]
    Cgi,
    /// The translated path is handed to an interpreter picked by content type.
    External { interpreter: String },
}

/// A parsed and authorized request, as handed over by the request layer.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    pub version: Option<Version>,
    pub url: String,
    pub path: String,
    pub path_translated: String,
    #[serde(default)]
    pub path_args: String,
    pub query: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    #[serde(default)]
    pub user: String,
    pub host: Option<String>,
    pub connection: Connection,
    #[serde(default)]
    pub class: RequestClass,
    pub owner: ScriptOwner,
}

impl Request {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

pub struct Response {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status_code: u16, server: &str) -> Self {
        Response {
            status_code,
            headers: vec![("Server".to_string(), server.to_string())],
            body: Vec::new(),
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self.status_code {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    /// Serializes the response. HTTP/0.9 peers get the bare body.
    pub fn to_bytes(&self, version: Option<Version>) -> Vec<u8> {
        let version = match version {
            Some(v) => v,
            None => return self.body.clone(),
        };

        let mut resp = format!("{} {} {}\r\n", version, self.status_code, self.status_text()).into_bytes();
        for (key, value) in &self.headers {
            resp.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        resp.extend_from_slice(b"\r\n");
        resp.extend_from_slice(&self.body);
        resp
    }
}
