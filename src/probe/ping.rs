//! Ping probe implementation with native ICMP and command fallback.
//!
//! A check sends several echo requests and passes when a strict majority
//! of them are answered.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Smallest per-packet wait, however many packets share the budget.
const MIN_PACKET_TIMEOUT: Duration = Duration::from_millis(100);

fn next_sequence() -> u16 {
    PING_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Detect ICMP capability by attempting to create a socket.
fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Unprivileged on Linux with ping_group_range set, or macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// True when a strict majority of the sent packets were answered.
pub fn meets_threshold(replies: u32, sent: u32) -> bool {
    sent > 0 && replies * 2 > sent
}

/// Ping `address` with `count` echo requests sharing the `timeout` budget.
pub async fn run_ping_probe(address: &str, timeout: Duration, count: u32) -> Result<(), ProbeError> {
    let count = count.max(1);
    let per_packet = (timeout / count).max(MIN_PACKET_TIMEOUT);

    let replies = count_replies(address, timeout, per_packet, count).await?;
    if meets_threshold(replies, count) {
        Ok(())
    } else {
        Err(ProbeError::Network(format!(
            "{}/{} echo replies from {}",
            replies, count, address
        )))
    }
}

async fn count_replies(
    address: &str,
    timeout: Duration,
    per_packet: Duration,
    count: u32,
) -> Result<u32, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_address(address).await?;

        let result = tokio::task::spawn_blocking(move || run_blocking_pings(ip, per_packet, count))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        return match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping not permitted for {}, falling back to command: {}",
                    address,
                    msg
                );
                run_ping_command(address, timeout, per_packet, count).await
            }
            other => other,
        };
    }

    run_ping_command(address, timeout, per_packet, count).await
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// An open ICMP socket together with how replies must be matched.
struct EchoSocket {
    socket: Socket,
    v6: bool,
    /// RAW sockets see every reply on the host, so the identifier matters.
    /// DGRAM sockets get the identifier rewritten by the kernel.
    raw: bool,
}

fn open_socket(ip: IpAddr, per_packet: Duration) -> Result<EchoSocket, ProbeError> {
    let (domain, protocol, v6) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, false),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, true),
    };

    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(s) => (s, true),
        Err(_) => {
            let s = Socket::new(domain, Type::DGRAM, Some(protocol))
                .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?;
            (s, false)
        }
    };

    socket
        .set_read_timeout(Some(per_packet))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(per_packet))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    Ok(EchoSocket { socket, v6, raw })
}

/// Send `count` echo requests one after another and count the replies.
/// Runs on a blocking thread.
fn run_blocking_pings(ip: IpAddr, per_packet: Duration, count: u32) -> Result<u32, ProbeError> {
    let echo = open_socket(ip, per_packet)?;
    let identifier: u16 = rand::random();
    let mut replies = 0;

    for _ in 0..count {
        let sequence = next_sequence();
        let packet = build_echo_request(echo.v6, identifier, sequence);

        echo.socket.send(&packet).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ProbeError::Network(format!("Permission denied: {}", e))
            } else {
                ProbeError::Network(format!("Failed to send: {}", e))
            }
        })?;

        if await_reply(&echo, identifier, sequence, per_packet)? {
            replies += 1;
        }
    }

    Ok(replies)
}

/// Wait for the reply matching `sequence`. `Ok(false)` on timeout.
fn await_reply(
    echo: &EchoSocket,
    identifier: u16,
    sequence: u16,
    per_packet: Duration,
) -> Result<bool, ProbeError> {
    let start = Instant::now();
    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];

    loop {
        let len = match echo.socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(false);
            }
            Err(e) => return Err(ProbeError::Network(format!("Failed to receive: {}", e))),
        };
        // SAFETY: recv initialized `len` bytes
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if start.elapsed() >= per_packet {
            return Ok(false);
        }

        if is_matching_reply(data, echo.v6, echo.raw, identifier, sequence) {
            return Ok(true);
        }
    }
}

/// Check whether `data` is the echo reply for our request.
fn is_matching_reply(data: &[u8], v6: bool, raw: bool, identifier: u16, sequence: u16) -> bool {
    // IPv4 RAW sockets deliver the IP header too
    let offset = if !v6 && data.first().map_or(false, |b| b >> 4 == 4) {
        usize::from(data[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = data.get(offset..offset + 8) else {
        return false;
    };

    let reply_type = if v6 { 129 } else { 0 };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == reply_type && reply_seq == sequence && (!raw || reply_id == identifier)
}

/// Build an ICMP (type 8) or ICMPv6 (type 128) Echo Request.
fn build_echo_request(v6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = if v6 { 128 } else { 8 };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum
    if !v6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Smallest send interval an unprivileged `ping` accepts.
const MIN_COMMAND_INTERVAL_MS: u128 = 200;

/// Arguments for the `ping` command so that all packets go out inside the
/// check's budget: the send interval tracks the per-packet share and `-w`
/// ends the command before the outer timeout where possible.
fn ping_command_args(address: &str, timeout: Duration, per_packet: Duration, count: u32) -> Vec<String> {
    // Tenths of a second, between the unprivileged floor and ping's 1s default
    let interval_ms = (per_packet.as_millis() / 100 * 100).clamp(MIN_COMMAND_INTERVAL_MS, 1000);
    let wait_secs = per_packet.as_secs().max(1);
    let deadline_secs = timeout.as_secs().saturating_sub(1).max(1);

    vec![
        "-c".to_string(),
        count.to_string(),
        "-i".to_string(),
        format!("{}.{}", interval_ms / 1000, interval_ms % 1000 / 100),
        "-W".to_string(),
        wait_secs.to_string(),
        "-w".to_string(),
        deadline_secs.to_string(),
        address.to_string(),
    ]
}

/// Run ping via command execution (fallback).
async fn run_ping_command(
    address: &str,
    timeout: Duration,
    per_packet: Duration,
    count: u32,
) -> Result<u32, ProbeError> {
    let output = Command::new("ping")
        .args(ping_command_args(address, timeout, per_packet, count))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    // ping exits non-zero on partial loss too, so the summary line decides.
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_received(&stdout) {
        Some(received) => Ok(received),
        None if !output.status.success() => Err(ProbeError::Command(format!(
            "ping failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        None => Err(ProbeError::Command(format!(
            "failed to parse ping output: {}",
            stdout
        ))),
    }
}

/// Parse the received-packet count from a ping summary line.
fn parse_received(output: &str) -> Option<u32> {
    // Linux: "3 packets transmitted, 2 received"
    // macOS: "3 packets transmitted, 2 packets received"
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"packets transmitted,\s*(?P<rx>\d+)\s+(?:packets\s+)?received")
            .expect("static regex")
    });

    re.captures(output)?.name("rx")?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_threshold() {
        assert!(meets_threshold(2, 3));
        assert!(meets_threshold(3, 3));
        assert!(!meets_threshold(1, 3));
        assert!(!meets_threshold(2, 4));
        assert!(meets_threshold(1, 1));
        assert!(!meets_threshold(0, 1));
        assert!(!meets_threshold(0, 0));
    }

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_echo_request(false, 0x1234, 0x0001);
        // A packet carrying its own checksum sums to zero.
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_icmp_packet() {
        let packet = build_echo_request(false, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_echo_request(true, 0x1234, 0x0001);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_matching_reply() {
        let mut reply = vec![0u8; 8];
        reply[4..6].copy_from_slice(&7u16.to_be_bytes());
        reply[6..8].copy_from_slice(&42u16.to_be_bytes());

        assert!(is_matching_reply(&reply, false, false, 99, 42));
        assert!(!is_matching_reply(&reply, false, true, 99, 42));
        assert!(is_matching_reply(&reply, false, true, 7, 42));
        assert!(!is_matching_reply(&reply, false, false, 7, 43));

        // RAW IPv4 delivery with a 20 byte IP header in front
        let mut with_header = vec![0x45u8];
        with_header.extend_from_slice(&[0u8; 19]);
        with_header.extend_from_slice(&reply);
        assert!(is_matching_reply(&with_header, false, true, 7, 42));

        assert!(!is_matching_reply(&reply[..4], false, false, 7, 42));
    }

    #[test]
    fn test_command_args_fit_budget() {
        let timeout = Duration::from_secs(5);
        let per_packet = timeout / 6;
        let args = ping_command_args("example.com", timeout, per_packet, 6);

        assert_eq!(
            args,
            vec!["-c", "6", "-i", "0.8", "-W", "1", "-w", "4", "example.com"]
        );
        // Last packet leaves at 5 * 0.8s = 4.0s, before the 5s budget.
        let interval: f64 = args[3].parse().unwrap();
        assert!(5.0 * interval < timeout.as_secs_f64());
    }

    #[test]
    fn test_command_args_short_timeout() {
        let timeout = Duration::from_secs(2);
        let args = ping_command_args("10.0.0.1", timeout, timeout / 3, 3);
        assert_eq!(args[3], "0.6");
        assert_eq!(args[7], "1");
    }

    #[test]
    fn test_command_interval_is_clamped() {
        let timeout = Duration::from_secs(5);
        let many = ping_command_args("h", timeout, MIN_PACKET_TIMEOUT, 30);
        assert_eq!(many[3], "0.2");

        let few = ping_command_args("h", Duration::from_secs(10), Duration::from_secs(5), 2);
        assert_eq!(few[3], "1.0");
        assert_eq!(few[5], "5");
    }

    #[test]
    fn test_parse_received_linux() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms
64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=12.1 ms

--- 8.8.8.8 ping statistics ---
3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms
rtt min/avg/max/mdev = 12.100/12.200/12.300/0.100 ms"#;
        assert_eq!(parse_received(output), Some(2));
    }

    #[test]
    fn test_parse_received_macos() {
        let output = r#"--- google.com ping statistics ---
3 packets transmitted, 3 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        assert_eq!(parse_received(output), Some(3));
    }

    #[test]
    fn test_parse_received_garbage() {
        assert_eq!(parse_received("ping: unknown host nowhere.invalid"), None);
    }
}
