//! CGI/1.1 environment and argument vectors.

use std::collections::HashMap;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;

use crate::config::{Control, ServerConfig};
use crate::error::GatewayError;
use crate::http::{Request, RequestClass};
use crate::resolver::{self, HostLookup};

/// The server's own environment, consulted for exported variables.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<OsString>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<OsString> {
        std::env::var_os(name)
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<OsString> {
        self.get(name).map(OsString::from)
    }
}

/// Maps a path-info segment to a filesystem path.
pub trait PathTranslator {
    fn translate(&self, path_args: &str) -> String;
}

pub struct DocumentRoot<'a> {
    root: &'a str,
}

impl<'a> DocumentRoot<'a> {
    pub fn new(control: &'a Control) -> Self {
        DocumentRoot { root: control.root.as_deref().unwrap_or("") }
    }
}

impl PathTranslator for DocumentRoot<'_> {
    fn translate(&self, path_args: &str) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), path_args.trim_start_matches('/'))
    }
}

/// Append-only list of NUL-terminated strings handed to execve.
#[derive(Debug, Default)]
pub struct ParamList {
    entries: Vec<CString>,
}

impl ParamList {
    pub fn new() -> Self {
        ParamList { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CString> {
        self.entries.iter()
    }

    /// Appends one entry. On error the list is left exactly as it was.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), GatewayError> {
        let entry = owned_cstring(bytes)?;
        self.entries.try_reserve(1)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Appends `NAME=value`.
    pub fn push_var(&mut self, name: &str, value: &[u8]) -> Result<(), GatewayError> {
        let mut entry = Vec::new();
        entry.try_reserve_exact(name.len() + value.len() + 2)?;
        entry.extend_from_slice(name.as_bytes());
        entry.push(b'=');
        entry.extend_from_slice(value);
        if entry.contains(&0) {
            return Err(GatewayError::InteriorNul(name.to_string()));
        }
        self.push_bytes(&entry)
    }

    /// Hands the entries over for execve, which adds the NULL sentinel.
    pub fn finish(self) -> Vec<CString> {
        self.entries
    }
}

fn owned_cstring(bytes: &[u8]) -> Result<CString, GatewayError> {
    let mut owned = Vec::new();
    owned.try_reserve_exact(bytes.len() + 1)?;
    owned.extend_from_slice(bytes);
    CString::new(owned)
        .map_err(|e| GatewayError::InteriorNul(String::from_utf8_lossy(&e.into_vec()).into_owned()))
}

/// `User-Agent` becomes `HTTP_USER_AGENT`.
pub fn header_var_name(name: &str) -> String {
    let mut var = String::with_capacity(name.len() + 5);
    var.push_str("HTTP_");
    for c in name.chars() {
        var.push(match c {
            '-' => '_',
            c => c.to_ascii_uppercase(),
        });
    }
    var
}

/// Decodes `%XY` escapes in one query word.
pub fn unescape(word: &str) -> Result<Vec<u8>, GatewayError> {
    let bytes = word.as_bytes();
    let mut out = Vec::new();
    out.try_reserve_exact(bytes.len())?;

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = bytes.get(i + 1..i + 3).and_then(|h| {
            let h = std::str::from_utf8(h).ok()?;
            u8::from_str_radix(h, 16).ok().filter(|_| h.bytes().all(|b| b.is_ascii_hexdigit()))
        });
        match hex {
            Some(b) if b != 0 => out.push(b),
            _ => return Err(GatewayError::BadEscape(word.to_string())),
        }
        i += 3;
    }
    Ok(out)
}

pub struct ParamBuilder<'a> {
    pub server: &'a ServerConfig,
    pub env: &'a dyn EnvSource,
    pub lookup: &'a dyn HostLookup,
    pub translator: &'a dyn PathTranslator,
}

impl ParamBuilder<'_> {
    /// Appends the CGI environment for `req` to `out`. Entries appended
    /// before a failure stay in `out`.
    pub fn environment(&self, req: &Request, control: &Control, out: &mut ParamList) -> Result<(), GatewayError> {
        for header in &req.headers {
            out.push_var(&header_var_name(&header.name), header.value.as_bytes())?;
        }
        out.push_var("GATEWAY_INTERFACE", b"CGI/1.1")?;
        if let Some(len) = &req.content_length {
            out.push_var("CONTENT_LENGTH", len.as_bytes())?;
        }
        if let Some(ty) = &req.content_type {
            out.push_var("CONTENT_TYPE", ty.as_bytes())?;
        }
        if !req.user.is_empty() {
            out.push_var("REMOTE_USER", req.user.as_bytes())?;
        }

        if matches!(req.class, RequestClass::External { .. }) {
            out.push_var("PATH_INFO", req.path.as_bytes())?;
            out.push_var("PATH_TRANSLATED", req.path_translated.as_bytes())?;
        } else if !req.path_args.is_empty() {
            let translated = self.translator.translate(&req.path_args);
            out.push_var("PATH_INFO", req.path_args.as_bytes())?;
            out.push_var("PATH_TRANSLATED", translated.as_bytes())?;
        }

        let query = req.query.as_deref();
        out.push_var("QUERY_STRING", query.unwrap_or("").as_bytes())?;
        match query {
            Some(q) => out.push_var("REQUEST_URI", format!("{}?{}", req.url, q).as_bytes())?,
            None => out.push_var("REQUEST_URI", req.url.as_bytes())?,
        }

        let peer = req.connection.peer;
        out.push_var("REMOTE_ADDR", peer.ip().to_string().as_bytes())?;
        out.push_var("REMOTE_PORT", peer.port().to_string().as_bytes())?;
        if control.dns {
            if let Some(name) = resolver::confirmed_name(self.lookup, *peer.ip()) {
                out.push_var("REMOTE_HOST", name.as_bytes())?;
            }
        }

        out.push_var("REQUEST_METHOD", req.method.as_bytes())?;
        out.push_var("SCRIPT_NAME", script_name(req))?;
        if let Some(name) = req.host.as_deref().or(self.server.name.as_deref()) {
            out.push_var("SERVER_NAME", name.as_bytes())?;
        }

        let local = req.connection.local;
        out.push_var("SERVER_ADDR", local.ip().to_string().as_bytes())?;
        out.push_var("SERVER_PORT", local.port().to_string().as_bytes())?;
        out.push_var("SERVER_SOFTWARE", self.server.software().as_bytes())?;
        match req.version {
            Some(v) => out.push_var("SERVER_PROTOCOL", v.to_string().as_bytes())?,
            None => out.push_var("SERVER_PROTOCOL", b"HTTP/0.9")?,
        }

        for name in &control.exports {
            if let Some(value) = self.env.var(name) {
                out.push_var(name, value.as_bytes())?;
            }
        }
        for raw in &control.putenvs {
            out.push_bytes(raw.as_bytes())?;
        }
        Ok(())
    }

    /// Appends the argument vector for `req` to `out`.
    pub fn arguments(&self, req: &Request, out: &mut ParamList) -> Result<(), GatewayError> {
        if let RequestClass::External { interpreter } = &req.class {
            out.push_bytes(interpreter.as_bytes())?;
        }
        out.push_bytes(req.path_translated.as_bytes())?;

        if let Some(query) = req.query.as_deref() {
            if !query.contains('=') {
                for word in query.split('+') {
                    out.push_bytes(&unescape(word)?)?;
                }
            }
        }
        Ok(())
    }
}

fn script_name(req: &Request) -> &[u8] {
    let path = req.path.as_bytes();
    let chop = req.path_args.len();
    if chop == 0 {
        path
    } else if chop < path.len() {
        &path[..path.len() - chop]
    } else {
        b""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::sample_request;
    use crate::http::{Header, ScriptOwner};
    use crate::resolver::tests::StaticLookup;

    struct Fixture {
        server: ServerConfig,
        env: HashMap<String, String>,
        lookup: StaticLookup,
        control: Control,
    }

    impl Fixture {
        fn new() -> Self {
            let mut env = HashMap::new();
            env.insert("TZ".to_string(), "UTC".to_string());
            Fixture {
                server: ServerConfig { software: Some("test/1.0".into()), ..ServerConfig::default() },
                env,
                lookup: StaticLookup { reverse: None, forward: None },
                control: Control::new("/cgi-bin", Some("/srv/www")),
            }
        }

        fn env_of(&self, req: &Request) -> Vec<String> {
            let mut out = ParamList::new();
            self.build_env(req, &mut out).unwrap();
            strings(&out)
        }

        fn build_env(&self, req: &Request, out: &mut ParamList) -> Result<(), GatewayError> {
            let translator = DocumentRoot::new(&self.control);
            let builder = ParamBuilder {
                server: &self.server,
                env: &self.env,
                lookup: &self.lookup,
                translator: &translator,
            };
            builder.environment(req, &self.control, out)
        }

        fn argv_of(&self, req: &Request) -> Result<Vec<String>, GatewayError> {
            let translator = DocumentRoot::new(&self.control);
            let builder = ParamBuilder {
                server: &self.server,
                env: &self.env,
                lookup: &self.lookup,
                translator: &translator,
            };
            let mut out = ParamList::new();
            builder.arguments(req, &mut out)?;
            Ok(strings(&out))
        }
    }

    fn strings(list: &ParamList) -> Vec<String> {
        list.iter().map(|c| c.to_string_lossy().into_owned()).collect()
    }

    fn header(name: &str, value: &str) -> Header {
        Header { name: name.into(), value: value.into() }
    }

    #[test]
    fn header_names_are_upper_snake_case() {
        assert_eq!(header_var_name("User-Agent"), "HTTP_USER_AGENT");
        assert_eq!(header_var_name("x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(header_var_name("Host"), "HTTP_HOST");
    }

    #[test]
    fn full_environment_in_order() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.headers.push(header("User-Agent", "x"));
        assert_eq!(
            fx.env_of(&req),
            vec![
                "HTTP_HOST=example.com",
                "HTTP_USER_AGENT=x",
                "GATEWAY_INTERFACE=CGI/1.1",
                "QUERY_STRING=",
                "REQUEST_URI=/cgi-bin/x",
                "REMOTE_ADDR=192.0.2.7",
                "REMOTE_PORT=51234",
                "REQUEST_METHOD=GET",
                "SCRIPT_NAME=/cgi-bin/x",
                "SERVER_NAME=example.com",
                "SERVER_ADDR=192.0.2.1",
                "SERVER_PORT=80",
                "SERVER_SOFTWARE=test/1.0",
                "SERVER_PROTOCOL=HTTP/1.1",
            ]
        );
    }

    #[test]
    fn duplicate_headers_are_kept_in_receipt_order() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.headers = vec![header("Cookie", "a=1"), header("Cookie", "b=2")];
        let env = fx.env_of(&req);
        assert_eq!(&env[..2], ["HTTP_COOKIE=a=1", "HTTP_COOKIE=b=2"]);
    }

    #[test]
    fn request_uri_carries_query() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.url = "/a/b".into();
        req.query = Some("c=d".into());
        let env = fx.env_of(&req);
        assert!(env.contains(&"REQUEST_URI=/a/b?c=d".to_string()));
        assert!(env.contains(&"QUERY_STRING=c=d".to_string()));
    }

    #[test]
    fn content_and_user_only_when_present() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.content_length = Some("12".into());
        req.content_type = Some("text/plain".into());
        req.user = "alice".into();
        let env = fx.env_of(&req);
        assert!(env.contains(&"CONTENT_LENGTH=12".to_string()));
        assert!(env.contains(&"CONTENT_TYPE=text/plain".to_string()));
        assert!(env.contains(&"REMOTE_USER=alice".to_string()));

        let env = fx.env_of(&sample_request());
        assert!(!env.iter().any(|e| e.starts_with("CONTENT_") || e.starts_with("REMOTE_USER=")));
    }

    #[test]
    fn path_info_is_translated_and_chopped_from_script_name() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.path = "/cgi-bin/x/docs/a.txt".into();
        req.path_args = "/docs/a.txt".into();
        let env = fx.env_of(&req);
        assert!(env.contains(&"PATH_INFO=/docs/a.txt".to_string()));
        assert!(env.contains(&"PATH_TRANSLATED=/srv/www/docs/a.txt".to_string()));
        assert!(env.contains(&"SCRIPT_NAME=/cgi-bin/x".to_string()));
    }

    #[test]
    fn script_name_chop_is_bytewise() {
        let mut req = sample_request();
        req.path = "/é/tail".into();
        req.path_args = "tail".into();
        assert_eq!(script_name(&req), "/é/".as_bytes());
        req.path_args = "longer-than-the-whole-path".into();
        assert_eq!(script_name(&req), b"");
    }

    #[test]
    fn external_class_uses_request_paths() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.class = RequestClass::External { interpreter: "/usr/bin/perl".into() };
        req.path = "/docs/page.pl".into();
        req.path_translated = "/srv/www/docs/page.pl".into();
        req.path_args = "/ignored".into();
        let env = fx.env_of(&req);
        assert!(env.contains(&"PATH_INFO=/docs/page.pl".to_string()));
        assert!(env.contains(&"PATH_TRANSLATED=/srv/www/docs/page.pl".to_string()));
    }

    #[test]
    fn simple_request_protocol() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.version = None;
        assert!(fx.env_of(&req).contains(&"SERVER_PROTOCOL=HTTP/0.9".to_string()));
    }

    #[test]
    fn server_name_falls_back_to_config() {
        let mut fx = Fixture::new();
        fx.server.name = Some("www.example.org".into());
        let mut req = sample_request();
        req.host = None;
        assert!(fx.env_of(&req).contains(&"SERVER_NAME=www.example.org".to_string()));
    }

    #[test]
    fn remote_host_only_when_dns_enabled_and_confirmed() {
        let mut fx = Fixture::new();
        let req = sample_request();
        fx.lookup = StaticLookup::confirming("client.example.net", *req.connection.peer.ip());
        assert!(!fx.env_of(&req).iter().any(|e| e.starts_with("REMOTE_HOST=")));

        fx.control.dns = true;
        assert!(fx.env_of(&req).contains(&"REMOTE_HOST=client.example.net".to_string()));

        fx.lookup.forward.as_mut().unwrap().addrs = vec![vec![1, 2, 3, 4]];
        assert!(!fx.env_of(&req).iter().any(|e| e.starts_with("REMOTE_HOST=")));
    }

    #[test]
    fn exports_and_putenvs_come_last() {
        let mut fx = Fixture::new();
        fx.control.exports = vec!["TZ".into(), "UNSET_VAR".into()];
        fx.control.putenvs = vec!["PATH=/usr/bin:/bin".into()];
        let env = fx.env_of(&sample_request());
        let n = env.len();
        assert_eq!(&env[n - 2..], ["TZ=UTC", "PATH=/usr/bin:/bin"]);
        assert!(!env.iter().any(|e| e.starts_with("UNSET_VAR")));
    }

    #[test]
    fn building_twice_is_identical() {
        let mut fx = Fixture::new();
        fx.control.exports = vec!["TZ".into()];
        let mut req = sample_request();
        req.headers.push(header("Accept", "*/*"));
        req.query = Some("q=1".into());
        assert_eq!(fx.env_of(&req), fx.env_of(&req));
    }

    #[test]
    fn nul_in_header_aborts_and_keeps_prior_entries() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.headers = vec![header("Accept", "*/*"), header("X-Bad", "a\0b"), header("X-Never", "z")];
        let mut out = ParamList::new();
        let err = fx.build_env(&req, &mut out).unwrap_err();
        assert!(matches!(err, GatewayError::InteriorNul(ref n) if n == "HTTP_X_BAD"));
        assert_eq!(err.status(), 500);
        assert_eq!(strings(&out), vec!["HTTP_ACCEPT=*/*"]);
    }

    #[test]
    fn isindex_query_becomes_arguments() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.query = Some("a+b+c".into());
        assert_eq!(fx.argv_of(&req).unwrap(), vec!["/srv/cgi-bin/x", "a", "b", "c"]);

        req.query = Some("hello%20world+%2B1".into());
        assert_eq!(fx.argv_of(&req).unwrap(), vec!["/srv/cgi-bin/x", "hello world", "+1"]);
    }

    #[test]
    fn form_query_adds_no_arguments() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.query = Some("a=b".into());
        assert_eq!(fx.argv_of(&req).unwrap(), vec!["/srv/cgi-bin/x"]);
        req.query = None;
        assert_eq!(fx.argv_of(&req).unwrap(), vec!["/srv/cgi-bin/x"]);
    }

    #[test]
    fn external_class_puts_interpreter_first() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.class = RequestClass::External { interpreter: "/usr/bin/perl".into() };
        req.query = Some("x".into());
        assert_eq!(fx.argv_of(&req).unwrap(), vec!["/usr/bin/perl", "/srv/cgi-bin/x", "x"]);
    }

    #[test]
    fn bad_escape_aborts_argument_build() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.query = Some("ok+%zz".into());
        assert!(matches!(fx.argv_of(&req), Err(GatewayError::BadEscape(ref w)) if w == "%zz"));
    }

    #[test]
    fn unescape_rules() {
        assert_eq!(unescape("a%41%62").unwrap(), b"aAb");
        assert!(unescape("%4").is_err());
        assert!(unescape("%").is_err());
        assert!(unescape("%+1").is_err());
        assert!(unescape("%00").is_err());
        assert_eq!(unescape("").unwrap(), b"");
    }

    #[test]
    fn push_failure_leaves_list_untouched() {
        let mut list = ParamList::new();
        list.push_var("A", b"1").unwrap();
        assert!(list.push_bytes(b"B=\0").is_err());
        assert!(list.push_var("C", b"\0").is_err());
        assert_eq!(list.len(), 1);
        assert_eq!(list.finish(), vec![CString::new("A=1").unwrap()]);
    }

    #[test]
    fn document_root_join() {
        let mut control = Control::new("/", Some("/srv/www/"));
        assert_eq!(DocumentRoot::new(&control).translate("/a/b"), "/srv/www/a/b");
        control.root = None;
        assert_eq!(DocumentRoot::new(&control).translate("/a/b"), "/a/b");
    }

    #[test]
    fn owner_is_not_part_of_environment() {
        let fx = Fixture::new();
        let mut req = sample_request();
        req.owner = ScriptOwner { uid: 4242, gid: 4242 };
        assert!(!fx.env_of(&req).iter().any(|e| e.contains("4242")));
    }
}
