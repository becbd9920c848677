//! Value records and the fixed-layout wire structs they are decoded from.
//!
//! Every `Raw*` struct mirrors the C layout a provider writes into a
//! [`TransferBuffer`](crate::TransferBuffer). Decoding validates enumerations
//! and floats; anything out of range is a [`TelemetryError::DecodeFailure`] and
//! the caller discards the whole sample.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

/// Maximum process name length, NUL terminator included.
pub const PROCESS_NAME_LEN: usize = 260;

/// Changes smaller than these are jitter and do not republish a process.
pub const CPU_SIGNIFICANCE: f64 = 0.1;
pub const MEMORY_SIGNIFICANCE_MB: f64 = 0.5;
pub const DISK_READ_SIGNIFICANCE_MB_S: f64 = 0.01;

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Transport protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Tcp),
            2 => Some(Self::Udp),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Tcp => 1,
            Self::Udp => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
        }
    }
}

/// TCP connection state. UDP endpoints report [`ConnectionState::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Unknown,
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    DeleteTcb,
}

impl ConnectionState {
    const ALL: [Self; 13] = [
        Self::Unknown,
        Self::Closed,
        Self::Listen,
        Self::SynSent,
        Self::SynReceived,
        Self::Established,
        Self::FinWait1,
        Self::FinWait2,
        Self::CloseWait,
        Self::Closing,
        Self::LastAck,
        Self::TimeWait,
        Self::DeleteTcb,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn to_raw(self) -> i32 {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) as i32
    }

    /// Human-readable label.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Closed => "Closed",
            Self::Listen => "Listening",
            Self::SynSent => "Syn Sent",
            Self::SynReceived => "Syn Received",
            Self::Established => "Established",
            Self::FinWait1 => "Fin Wait 1",
            Self::FinWait2 => "Fin Wait 2",
            Self::CloseWait => "Close Wait",
            Self::Closing => "Closing",
            Self::LastAck => "Last Ack",
            Self::TimeWait => "Time Wait",
            Self::DeleteTcb => "Delete TCB",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One decoded connection. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    pub protocol: Protocol,
    pub state: ConnectionState,
    pub pid: u32,
}

impl ConnectionRecord {
    pub fn local_endpoint(&self) -> String {
        format!("{}:{}", self.local_addr, self.local_port)
    }

    pub fn remote_endpoint(&self) -> String {
        format!("{}:{}", self.remote_addr, self.remote_port)
    }
}

/// Wire layout of one connection: 32 bytes, no padding.
///
/// Addresses are in network byte order, i.e. the in-memory bytes are the
/// dotted-quad octets. Ports are host order.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawConnection {
    pub local_addr: u32,
    pub remote_addr: u32,
    pub local_port: u16,
    pub remote_port: u16,
    pub state: i32,
    pub protocol: i32,
    pub pid: u32,
    pub reserved: u64,
}

const _: () = assert!(std::mem::size_of::<RawConnection>() == 32);

impl RawConnection {
    pub fn decode(&self) -> Result<ConnectionRecord> {
        let raw_state = self.state;
        let raw_protocol = self.protocol;
        let state = ConnectionState::from_raw(raw_state).ok_or_else(|| {
            TelemetryError::DecodeFailure(format!("connection state {raw_state} out of range"))
        })?;
        let protocol = Protocol::from_raw(raw_protocol).ok_or_else(|| {
            TelemetryError::DecodeFailure(format!("protocol {raw_protocol} out of range"))
        })?;
        Ok(ConnectionRecord {
            local_addr: Ipv4Addr::from(self.local_addr.to_ne_bytes()),
            local_port: self.local_port,
            remote_addr: Ipv4Addr::from(self.remote_addr.to_ne_bytes()),
            remote_port: self.remote_port,
            protocol,
            state,
            pid: self.pid,
        })
    }

    /// Encode a record the way a provider writes it.
    pub fn encode(record: &ConnectionRecord) -> Self {
        Self {
            local_addr: u32::from_ne_bytes(record.local_addr.octets()),
            remote_addr: u32::from_ne_bytes(record.remote_addr.octets()),
            local_port: record.local_port,
            remote_port: record.remote_port,
            state: record.state.to_raw(),
            protocol: record.protocol.to_raw(),
            pid: record.pid,
            reserved: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// One process as published to the live collection. Identity is `pid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub disk_read_mb_s: f64,
    pub disk_write_mb_s: f64,
    pub thread_count: u32,
    pub handle_count: u32,
    pub priority_class: i32,
}

impl ProcessRecord {
    /// Whether `newer` differs from `self` enough to be worth republishing.
    pub fn is_visually_different(&self, newer: &ProcessRecord) -> bool {
        (self.cpu_percent - newer.cpu_percent).abs() > CPU_SIGNIFICANCE
            || (self.memory_mb - newer.memory_mb).abs() > MEMORY_SIGNIFICANCE_MB
            || (self.disk_read_mb_s - newer.disk_read_mb_s).abs() > DISK_READ_SIGNIFICANCE_MB_S
    }
}

/// Wire layout of one process entry.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProcessDetail {
    pub pid: u32,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub disk_read_mb_s: f64,
    pub disk_write_mb_s: f64,
    pub thread_count: u32,
    pub handle_count: u32,
    pub priority_class: i32,
    pub name: [u8; PROCESS_NAME_LEN],
}

impl Default for RawProcessDetail {
    fn default() -> Self {
        Self {
            pid: 0,
            memory_mb: 0.0,
            cpu_percent: 0.0,
            disk_read_mb_s: 0.0,
            disk_write_mb_s: 0.0,
            thread_count: 0,
            handle_count: 0,
            priority_class: 0,
            name: [0; PROCESS_NAME_LEN],
        }
    }
}

impl RawProcessDetail {
    pub fn decode(&self) -> Result<ProcessRecord> {
        let floats = [
            self.memory_mb,
            self.cpu_percent,
            self.disk_read_mb_s,
            self.disk_write_mb_s,
        ];
        if floats.iter().any(|v| !v.is_finite()) {
            return Err(TelemetryError::DecodeFailure(format!(
                "non-finite metric for pid {}",
                self.pid
            )));
        }
        Ok(ProcessRecord {
            pid: self.pid,
            name: decode_c_string(&self.name),
            cpu_percent: self.cpu_percent,
            memory_mb: self.memory_mb,
            disk_read_mb_s: self.disk_read_mb_s,
            disk_write_mb_s: self.disk_write_mb_s,
            thread_count: self.thread_count,
            handle_count: self.handle_count,
            priority_class: self.priority_class,
        })
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; PROCESS_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(PROCESS_NAME_LEN - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }
}

fn decode_c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

// ---------------------------------------------------------------------------
// Whole-system values
// ---------------------------------------------------------------------------

/// Whole-system performance figures. Always replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub cpu_percent: f64,
    pub cpu_temperature: f64,
    pub memory_percent: f64,
    pub total_physical_mb: f64,
    pub available_physical_mb: f64,
    pub process_count: u32,
    pub thread_count: u32,
    pub handle_count: u32,
    pub committed_mb: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPerformanceSnapshot {
    pub cpu_percent: f64,
    pub cpu_temperature: f64,
    pub memory_percent: f64,
    pub total_physical_mb: f64,
    pub available_physical_mb: f64,
    pub process_count: u32,
    pub thread_count: u32,
    pub handle_count: u32,
    pub committed_mb: f64,
}

impl RawPerformanceSnapshot {
    pub fn decode(&self) -> Result<PerformanceSnapshot> {
        let floats = [
            self.cpu_percent,
            self.memory_percent,
            self.total_physical_mb,
            self.available_physical_mb,
            self.committed_mb,
        ];
        if floats.iter().any(|v| !v.is_finite()) {
            return Err(TelemetryError::DecodeFailure(
                "non-finite value in performance snapshot".into(),
            ));
        }
        Ok(PerformanceSnapshot {
            cpu_percent: self.cpu_percent,
            // Sensors that are missing report NaN or garbage; show zero.
            cpu_temperature: if self.cpu_temperature.is_finite() {
                self.cpu_temperature
            } else {
                0.0
            },
            memory_percent: self.memory_percent,
            total_physical_mb: self.total_physical_mb,
            available_physical_mb: self.available_physical_mb,
            process_count: self.process_count,
            thread_count: self.thread_count,
            handle_count: self.handle_count,
            committed_mb: self.committed_mb,
        })
    }
}

/// CPU load and disk throughput sampled by the fast stats feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub disk_read_mb_s: f64,
    pub disk_write_mb_s: f64,
}

impl SystemStats {
    /// Build from provider rates, which are reported in bytes per second.
    pub fn from_rates(cpu_percent: f64, read_bytes_s: f64, write_bytes_s: f64) -> Self {
        const MB: f64 = 1024.0 * 1024.0;
        Self {
            cpu_percent,
            disk_read_mb_s: read_bytes_s / MB,
            disk_write_mb_s: write_bytes_s / MB,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32, cpu: f64) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: format!("proc{pid}"),
            cpu_percent: cpu,
            memory_mb: 10.0,
            disk_read_mb_s: 0.0,
            disk_write_mb_s: 0.0,
            thread_count: 1,
            handle_count: 3,
            priority_class: 0x20,
        }
    }

    #[test]
    fn raw_connection_is_32_bytes() {
        assert_eq!(std::mem::size_of::<RawConnection>(), 32);
    }

    #[test]
    fn connection_decodes_network_order_address() {
        let raw = RawConnection {
            local_addr: u32::from_ne_bytes([127, 0, 0, 1]),
            remote_addr: u32::from_ne_bytes([10, 1, 2, 3]),
            local_port: 8080,
            remote_port: 443,
            state: 5,
            protocol: 1,
            pid: 42,
            reserved: 0,
        };
        let rec = raw.decode().unwrap();
        assert_eq!(rec.local_endpoint(), "127.0.0.1:8080");
        assert_eq!(rec.remote_endpoint(), "10.1.2.3:443");
        assert_eq!(rec.state, ConnectionState::Established);
        assert_eq!(rec.protocol, Protocol::Tcp);
        assert_eq!(rec.pid, 42);
    }

    #[test]
    fn out_of_range_state_is_decode_failure() {
        let raw = RawConnection {
            state: 13,
            protocol: 1,
            ..Default::default()
        };
        assert!(matches!(
            raw.decode(),
            Err(TelemetryError::DecodeFailure(_))
        ));
        let raw = RawConnection {
            state: 0,
            protocol: 7,
            ..Default::default()
        };
        assert!(matches!(
            raw.decode(),
            Err(TelemetryError::DecodeFailure(_))
        ));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(ConnectionState::Listen.display_name(), "Listening");
        assert_eq!(ConnectionState::FinWait1.to_string(), "Fin Wait 1");
        assert_eq!(ConnectionState::DeleteTcb.to_string(), "Delete TCB");
        assert_eq!(ConnectionState::from_raw(12), Some(ConnectionState::DeleteTcb));
        assert_eq!(ConnectionState::TimeWait.to_raw(), 11);
        assert_eq!(ConnectionState::from_raw(-1), None);
    }

    #[test]
    fn significance_thresholds() {
        let base = process(1, 5.0);
        assert!(!base.is_visually_different(&process(1, 5.05)));
        assert!(base.is_visually_different(&process(1, 5.2)));

        let mut mem = process(1, 5.0);
        mem.memory_mb = 10.4;
        assert!(!base.is_visually_different(&mem));
        mem.memory_mb = 10.6;
        assert!(base.is_visually_different(&mem));

        let mut disk = process(1, 5.0);
        disk.disk_read_mb_s = 0.02;
        assert!(base.is_visually_different(&disk));

        // Write rate and counters alone are not significant.
        let mut quiet = process(1, 5.0);
        quiet.disk_write_mb_s = 50.0;
        quiet.thread_count = 99;
        assert!(!base.is_visually_different(&quiet));
    }

    #[test]
    fn process_name_is_nul_terminated() {
        let mut raw = RawProcessDetail {
            pid: 7,
            ..Default::default()
        };
        raw.set_name("sshd");
        assert_eq!(raw.decode().unwrap().name, "sshd");

        let long = "x".repeat(400);
        raw.set_name(&long);
        assert_eq!(raw.decode().unwrap().name.len(), PROCESS_NAME_LEN - 1);
    }

    #[test]
    fn non_finite_process_metric_rejected() {
        let raw = RawProcessDetail {
            cpu_percent: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            raw.decode(),
            Err(TelemetryError::DecodeFailure(_))
        ));
    }

    #[test]
    fn stats_convert_bytes_to_megabytes() {
        let stats = SystemStats::from_rates(12.5, 2.0 * 1024.0 * 1024.0, 512.0 * 1024.0);
        assert_eq!(stats.disk_read_mb_s, 2.0);
        assert_eq!(stats.disk_write_mb_s, 0.5);
    }
}
