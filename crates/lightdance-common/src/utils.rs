//! Utility functions for Lightdance

use std::net::{IpAddr, Ipv4Addr};

use if_addrs::IfAddr;

/// Get the local IP address
///
/// Returns the first non-loopback IPv4 address found,
/// or `127.0.0.1` as fallback. Nodes send acknowledgments here.
///
/// # Examples
///
/// ```
/// use lightdance_common::local_ip;
///
/// let ip = local_ip();
/// assert!(ip.is_ipv4());
/// ```
pub fn local_ip() -> IpAddr {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .and_then(|iface| match iface.addr {
                    IfAddr::V4(addr) => Some(IpAddr::V4(addr.ip)),
                    _ => None,
                })
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
///
/// ```
/// use lightdance_common::utils::split_list;
///
/// assert_eq!(split_list(" ESP32_A, ESP32_B ,,"), vec!["ESP32_A", "ESP32_B"]);
/// ```
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
