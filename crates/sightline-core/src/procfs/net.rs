//! Connection tables from `/proc/net/{tcp,udp}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{PROC_ROOT, list_pids};
use crate::provider::{ConnectionProvider, ProviderHandle, RefreshScope};
use crate::record::{ConnectionState, Protocol, RawConnection};

/// One parsed table row before the owning pid is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketRow {
    local_addr: u32,
    local_port: u16,
    remote_addr: u32,
    remote_port: u16,
    state: ConnectionState,
    inode: u64,
}

fn tcp_state(code: u8) -> ConnectionState {
    match code {
        0x01 => ConnectionState::Established,
        0x02 => ConnectionState::SynSent,
        0x03 => ConnectionState::SynReceived,
        0x04 => ConnectionState::FinWait1,
        0x05 => ConnectionState::FinWait2,
        0x06 => ConnectionState::TimeWait,
        0x07 => ConnectionState::Closed,
        0x08 => ConnectionState::CloseWait,
        0x09 => ConnectionState::LastAck,
        0x0A => ConnectionState::Listen,
        0x0B => ConnectionState::Closing,
        _ => ConnectionState::Unknown,
    }
}

/// `0100007F:0050` into the raw address and the port.
///
/// The kernel prints the address as the in-memory word, so parsing it back
/// as a native integer reproduces network byte order.
fn parse_endpoint(field: &str) -> Option<(u32, u16)> {
    let (addr, port) = field.split_once(':')?;
    if addr.len() != 8 {
        // IPv6 rows live in tcp6/udp6 and are not read.
        return None;
    }
    let addr = u32::from_str_radix(addr, 16).ok()?;
    let port = u16::from_str_radix(port, 16).ok()?;
    Some((addr, port))
}

fn parse_table(text: &str, protocol: Protocol) -> Vec<SocketRow> {
    let mut rows = Vec::new();
    for line in text.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }
        let Some((local_addr, local_port)) = parse_endpoint(parts[1]) else {
            continue;
        };
        let Some((remote_addr, remote_port)) = parse_endpoint(parts[2]) else {
            continue;
        };
        let state = match protocol {
            Protocol::Tcp => u8::from_str_radix(parts[3], 16)
                .map(tcp_state)
                .unwrap_or(ConnectionState::Unknown),
            Protocol::Udp => ConnectionState::Unknown,
        };
        let inode = parts[9].parse().unwrap_or(0);
        rows.push(SocketRow {
            local_addr,
            local_port,
            remote_addr,
            remote_port,
            state,
            inode,
        });
    }
    rows
}

/// `socket:[12345]` link target into the inode.
fn socket_inode(target: &Path) -> Option<u64> {
    target
        .to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Socket inode to owning pid, from every readable `/proc/<pid>/fd`.
fn socket_owners(root: &Path) -> HashMap<u64, u32> {
    let mut owners = HashMap::new();
    for pid in list_pids(root) {
        let Ok(fds) = std::fs::read_dir(root.join(pid.to_string()).join("fd")) else {
            continue;
        };
        for fd in fds.filter_map(|e| e.ok()) {
            if let Some(inode) = std::fs::read_link(fd.path())
                .ok()
                .and_then(|t| socket_inode(&t))
            {
                owners.entry(inode).or_insert(pid);
            }
        }
    }
    owners
}

/// Connection provider over the procfs socket tables.
///
/// Each session keeps the rows from its last refresh until the next one.
#[derive(Debug)]
pub struct ProcfsConnections {
    root: PathBuf,
    next_handle: AtomicUsize,
    sessions: Mutex<HashMap<usize, Vec<RawConnection>>>,
}

impl Default for ProcfsConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsConnections {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_handle: AtomicUsize::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn read_table(&self, protocol: Protocol) -> Option<Vec<SocketRow>> {
        let file = match protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        let text = std::fs::read_to_string(self.root.join("net").join(file)).ok()?;
        Some(parse_table(&text, protocol))
    }

    fn sample(&self, scope: RefreshScope) -> Option<Vec<RawConnection>> {
        let protocols: &[Protocol] = match scope {
            RefreshScope::All => &[Protocol::Tcp, Protocol::Udp],
            RefreshScope::TcpOnly => &[Protocol::Tcp],
            RefreshScope::UdpOnly => &[Protocol::Udp],
        };
        let mut tables = Vec::with_capacity(protocols.len());
        for &protocol in protocols {
            tables.push((protocol, self.read_table(protocol)?));
        }
        let owners = socket_owners(&self.root);
        let rows = tables
            .into_iter()
            .flat_map(|(protocol, rows)| rows.into_iter().map(move |r| (protocol, r)))
            .map(|(protocol, row)| RawConnection {
                local_addr: row.local_addr,
                remote_addr: row.remote_addr,
                local_port: row.local_port,
                remote_port: row.remote_port,
                state: row.state.to_raw(),
                protocol: protocol.to_raw(),
                pid: owners.get(&row.inode).copied().unwrap_or(0),
                reserved: 0,
            })
            .collect();
        Some(rows)
    }
}

impl ConnectionProvider for ProcfsConnections {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn create(&self) -> Option<ProviderHandle> {
        if !self.root.join("net").join("tcp").exists() {
            return None;
        }
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = ProviderHandle::from_raw(raw)?;
        self.sessions.lock().ok()?.insert(raw, Vec::new());
        Some(handle)
    }

    fn destroy(&self, handle: ProviderHandle) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&handle.as_raw());
        }
    }

    fn refresh(&self, handle: ProviderHandle, scope: RefreshScope) -> bool {
        let Some(rows) = self.sample(scope) else {
            return false;
        };
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        match sessions.get_mut(&handle.as_raw()) {
            Some(slot) => {
                *slot = rows;
                true
            }
            None => false,
        }
    }

    fn record_count(&self, handle: ProviderHandle) -> usize {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(&handle.as_raw()).map(Vec::len))
            .unwrap_or(0)
    }

    fn copy_into(&self, handle: ProviderHandle, dst: &mut [RawConnection]) -> usize {
        let Ok(sessions) = self.sessions.lock() else {
            return 0;
        };
        let Some(rows) = sessions.get(&handle.as_raw()) else {
            return 0;
        };
        let n = rows.len().min(dst.len());
        dst[..n].copy_from_slice(&rows[..n]);
        n
    }

    fn record_size(&self) -> usize {
        std::mem::size_of::<RawConnection>()
    }

    fn set_interval(&self, _handle: ProviderHandle, _interval_ms: u32) -> bool {
        // Sampling happens on demand; there is no native cadence to adjust.
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   100        0 5001 1 0000000000000000 100 0 0 10 0
   1: 0F02000A:D2F0 5DB8D822:01BB 01 00000000:00000000 02:000A3B6F 00000000  1000        0 5002 2 0000000000000000 20 4 30 10 -1
   2: garbage
";

    const UDP: &str = "\
   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  411: 00000000:0044 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 6001 2 0000000000000000 0
";

    fn addr(raw: u32) -> Ipv4Addr {
        Ipv4Addr::from(raw.to_ne_bytes())
    }

    #[test]
    fn parses_tcp_rows() {
        let rows = parse_table(TCP, Protocol::Tcp);
        assert_eq!(rows.len(), 2);

        assert_eq!(addr(rows[0].local_addr), Ipv4Addr::LOCALHOST);
        assert_eq!(rows[0].local_port, 3306);
        assert_eq!(rows[0].state, ConnectionState::Listen);
        assert_eq!(rows[0].inode, 5001);

        assert_eq!(addr(rows[1].local_addr), Ipv4Addr::new(10, 0, 2, 15));
        assert_eq!(addr(rows[1].remote_addr), Ipv4Addr::new(34, 216, 184, 93));
        assert_eq!(rows[1].remote_port, 443);
        assert_eq!(rows[1].state, ConnectionState::Established);
    }

    #[test]
    fn udp_rows_have_no_state() {
        let rows = parse_table(UDP, Protocol::Udp);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_port, 68);
        assert_eq!(rows[0].state, ConnectionState::Unknown);
    }

    #[test]
    fn ipv6_endpoint_skipped() {
        assert_eq!(
            parse_endpoint("00000000000000000000000001000000:0016"),
            None
        );
        assert_eq!(parse_endpoint("0100007F:0016"), Some((0x0100_007F, 22)));
    }

    #[test]
    fn socket_link_targets() {
        assert_eq!(socket_inode(Path::new("socket:[4242]")), Some(4242));
        assert_eq!(socket_inode(Path::new("pipe:[4242]")), None);
        assert_eq!(socket_inode(Path::new("/dev/null")), None);
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("net/tcp"), TCP).unwrap();
        std::fs::write(dir.path().join("net/udp"), UDP).unwrap();
        let fd = dir.path().join("321/fd");
        std::fs::create_dir_all(&fd).unwrap();
        std::os::unix::fs::symlink("socket:[5002]", fd.join("7")).unwrap();
        dir
    }

    #[test]
    fn sessions_hold_their_own_rows() {
        let dir = fixture();
        let provider = ProcfsConnections::with_root(dir.path());
        let a = provider.create().unwrap();
        let b = provider.create().unwrap();
        assert_ne!(a, b);

        assert!(provider.refresh(a, RefreshScope::All));
        assert!(provider.refresh(b, RefreshScope::UdpOnly));
        assert_eq!(provider.record_count(a), 3);
        assert_eq!(provider.record_count(b), 1);

        let mut dst = [RawConnection::default(); 8];
        let n = provider.copy_into(a, &mut dst);
        let records: Vec<_> = dst[..n].iter().map(|r| r.decode().unwrap()).collect();
        let owned = records.iter().find(|r| r.remote_port == 443).unwrap();
        assert_eq!(owned.pid, 321);
        assert!(records.iter().filter(|r| r.remote_port != 443).all(|r| r.pid == 0));

        provider.destroy(a);
        assert_eq!(provider.record_count(a), 0);
        assert!(!provider.refresh(a, RefreshScope::All));
    }

    #[test]
    fn missing_tables_cannot_create() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProcfsConnections::with_root(dir.path()).create().is_none());
    }

    #[test]
    fn short_destination_truncates() {
        let dir = fixture();
        let provider = ProcfsConnections::with_root(dir.path());
        let h = provider.create().unwrap();
        assert!(provider.refresh(h, RefreshScope::TcpOnly));
        let mut dst = [RawConnection::default(); 1];
        assert_eq!(provider.copy_into(h, &mut dst), 1);
        assert_eq!(provider.record_count(h), 2);
    }
}
