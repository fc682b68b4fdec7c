//! Forward-confirmed reverse DNS for REMOTE_HOST.

use log::debug;
use std::ffi::{CStr, CString};
use std::mem;
use std::net::Ipv4Addr;
use std::ptr;

const IPV4_LEN: usize = 4;
const HOST_BUF: usize = 1025;

/// Result of a forward lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: Option<String>,
    pub family: i32,
    pub addr_len: usize,
    pub addrs: Vec<Vec<u8>>,
}

pub trait HostLookup {
    fn name_of(&self, addr: Ipv4Addr) -> Option<String>;
    fn host_by_name(&self, name: &str) -> Option<HostEntry>;
}

/// Returns the peer's name only if looking that name up again yields the
/// same address. Every mismatch is logged and treated as "no name".
pub fn confirmed_name(lookup: &dyn HostLookup, addr: Ipv4Addr) -> Option<String> {
    let name = lookup.name_of(addr)?;
    let octets = addr.octets();

    let message = match lookup.host_by_name(&name) {
        None => "host not found",
        Some(entry) => match entry.name.as_deref() {
            None => "no canonical name",
            Some(canon) if !canon.eq_ignore_ascii_case(&name) => "name not canonical",
            Some(_) if entry.family != libc::AF_INET => "address family is not AF_INET",
            Some(_) if entry.addr_len != IPV4_LEN => "address length mismatch",
            Some(_) if entry.addrs.iter().any(|a| a.as_slice() == octets) => return Some(name),
            Some(_) => "name does not match address",
        },
    };
    debug!("dnslookup: {}, address={}, name={}", message, addr, name);
    None
}

/// Resolves through the system resolver (getnameinfo/getaddrinfo).
pub struct SystemResolver;

impl HostLookup for SystemResolver {
    fn name_of(&self, addr: Ipv4Addr) -> Option<String> {
        let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(addr.octets()) };

        let mut host = [0 as libc::c_char; HOST_BUF];
        let rc = unsafe {
            libc::getnameinfo(
                &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                host.as_mut_ptr(),
                host.len() as libc::socklen_t,
                ptr::null_mut(),
                0,
                libc::NI_NAMEREQD,
            )
        };
        if rc != 0 {
            return None;
        }
        let name = unsafe { CStr::from_ptr(host.as_ptr()) };
        Some(name.to_string_lossy().into_owned())
    }

    fn host_by_name(&self, name: &str) -> Option<HostEntry> {
        let c_name = CString::new(name).ok()?;
        let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
        hints.ai_family = libc::AF_INET;
        hints.ai_socktype = libc::SOCK_STREAM;
        hints.ai_flags = libc::AI_CANONNAME;

        let mut res: *mut libc::addrinfo = ptr::null_mut();
        let rc = unsafe { libc::getaddrinfo(c_name.as_ptr(), ptr::null(), &hints, &mut res) };
        if rc != 0 || res.is_null() {
            return None;
        }

        let mut entry: Option<HostEntry> = None;
        let mut cur = res;
        while !cur.is_null() {
            let ai = unsafe { &*cur };
            let (len, bytes) = if ai.ai_family == libc::AF_INET && !ai.ai_addr.is_null() {
                let sin = unsafe { &*(ai.ai_addr as *const libc::sockaddr_in) };
                (IPV4_LEN, sin.sin_addr.s_addr.to_ne_bytes().to_vec())
            } else {
                (ai.ai_addrlen as usize, Vec::new())
            };
            let e = entry.get_or_insert_with(|| HostEntry {
                name: if ai.ai_canonname.is_null() {
                    None
                } else {
                    Some(unsafe { CStr::from_ptr(ai.ai_canonname) }.to_string_lossy().into_owned())
                },
                family: ai.ai_family,
                addr_len: len,
                addrs: Vec::new(),
            });
            if ai.ai_family == e.family && !bytes.is_empty() {
                e.addrs.push(bytes);
            }
            cur = ai.ai_next;
        }
        unsafe { libc::freeaddrinfo(res) };
        entry
    }
}
