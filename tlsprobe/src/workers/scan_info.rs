//! Scan bookkeeping: target resolution and timing, without touching the
//! server.

use probe::caps::{Clock, RecordedClock};
use probe::error::Error;
use probe::registry::Worker;

use crate::profile::SPServer;
use crate::sock::Socket;
use crate::workers::ScanContext;

/// Elapsed scan time, rounded to milliseconds.
fn run_time(start: f64, stop: f64) -> f64 {
    ((stop - start) * 1000.0).round() / 1000.0
}

/// The server node of the profile: resolved addresses, with the first
/// IPv4 (then IPv6) address reported as the scan target.
fn server_info(
    host: &str,
    port: u16,
    sni: Option<String>,
    ipv4: Vec<String>,
    ipv6: Vec<String>,
) -> SPServer {
    let ip = ipv4
        .first()
        .or_else(|| ipv6.first())
        .cloned()
        .unwrap_or_else(|| host.to_string());
    SPServer {
        ip,
        name: Some(host.to_string()),
        sni,
        port,
        ipv4_addresses: ipv4,
        ipv6_addresses: ipv6,
    }
}

pub struct ScanStart;

impl Worker<ScanContext> for ScanStart {
    fn name(&self) -> &'static str {
        "scanstart"
    }

    fn descr(&self) -> &'static str {
        "collect basic scan and target information"
    }

    fn prio(&self) -> usize {
        0
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let mut clock = RecordedClock::new(ctx.recorder.clone());
        let scan_info = &mut ctx.server_profile.scan_info;
        scan_info.command = std::env::args().collect::<Vec<_>>().join(" ");
        scan_info.version = env!("CARGO_PKG_VERSION").to_string();
        scan_info.start_timestamp = clock.now()?;

        let host = ctx.client.host.clone();
        let port = ctx.client.port;
        let (ipv4, ipv6) = Socket::resolve(&host, port);
        ctx.server_profile.server = Some(server_info(
            &host,
            port,
            ctx.client.get_sni().map(|sni| sni.to_string()),
            ipv4,
            ipv6,
        ));
        Ok(())
    }
}

pub struct ScanEnd;

impl Worker<ScanContext> for ScanEnd {
    fn name(&self) -> &'static str {
        "scanend"
    }

    fn descr(&self) -> &'static str {
        "complement the scan information"
    }

    fn prio(&self) -> usize {
        1000
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let mut clock = RecordedClock::new(ctx.recorder.clone());
        let scan_info = &mut ctx.server_profile.scan_info;
        scan_info.stop_timestamp = clock.now()?;
        scan_info.run_time = run_time(scan_info.start_timestamp, scan_info.stop_timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_time_rounds_to_milliseconds() {
        assert_eq!(run_time(1_650_000_000.0, 1_650_000_001.2345), 1.235);
        assert_eq!(run_time(1_650_000_000.0, 1_650_000_000.0001), 0.0);
        assert_eq!(run_time(100.0, 103.5), 3.5);
    }

    #[test]
    fn server_info_prefers_ipv4() {
        let server = server_info(
            "example.com",
            443,
            Some("example.com".to_string()),
            vec!["192.0.2.1".to_string(), "192.0.2.2".to_string()],
            vec!["2001:db8::1".to_string()],
        );
        assert_eq!(server.ip, "192.0.2.1");
        assert_eq!(server.name.as_deref(), Some("example.com"));
        assert_eq!(server.port, 443);
        assert_eq!(server.ipv4_addresses.len(), 2);
        assert_eq!(server.ipv6_addresses.len(), 1);
    }

    #[test]
    fn server_info_falls_back_to_ipv6_then_the_name() {
        let v6_only = server_info(
            "example.com",
            8443,
            None,
            Vec::new(),
            vec!["2001:db8::1".to_string()],
        );
        assert_eq!(v6_only.ip, "2001:db8::1");

        let unresolved = server_info("host.invalid", 443, None, Vec::new(), Vec::new());
        assert_eq!(unresolved.ip, "host.invalid");
        assert!(unresolved.ipv4_addresses.is_empty());
    }
}
