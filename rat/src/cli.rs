//! Argument validation for the `rat` binary.
//!
//! The `check` functions answer yes/no; the `parse` functions wrap them as
//! clap value parsers with a diagnostic.

use std::net::Ipv4Addr;

/// A port in the open interval (0, 65535).
pub fn port_check(arg: &str) -> Option<u16> {
    let port: i64 = arg.trim().parse().ok()?;
    if port > 0 && port < i64::from(u16::MAX) {
        u16::try_from(port).ok()
    } else {
        None
    }
}

/// A dotted quad of exactly four octets, each in [0, 255].
pub fn address_check(arg: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = arg.trim().split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        let value: i64 = part.parse().ok()?;
        if value < 0 || value > 255 {
            return None;
        }
        *slot = value as u8;
    }
    Some(Ipv4Addr::from(octets))
}

pub fn parse_port(arg: &str) -> Result<u16, String> {
    port_check(arg).ok_or_else(|| format!("'{arg}' is not a port in 1..65534"))
}

/// Server ports must be odd.
pub fn parse_odd_port(arg: &str) -> Result<u16, String> {
    let port = parse_port(arg)?;
    if port % 2 == 1 {
        Ok(port)
    } else {
        Err(format!("server port {port} must be odd"))
    }
}

pub fn parse_address(arg: &str) -> Result<Ipv4Addr, String> {
    address_check(arg).ok_or_else(|| format!("'{arg}' is not a dotted-quad IPv4 address"))
}
