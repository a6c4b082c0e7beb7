//! OCSP stapling: status_request and status_request_v2. Some stacks answer
//! the v2 request in the server hello only, so both probes just check for
//! the stapled response without evaluating it.

use probe::error::Error;
use probe::registry::Worker;

use crate::error::observation;
use crate::msgs::enums::{ExtensionType, Version};
use crate::profile::SPBool;
use crate::workers::{init_profile, ScanContext};

/// A finding needs a completed handshake; the stapled response itself is
/// the evidence.
fn stapling_finding(handshake_completed: bool, stapled: bool) -> SPBool {
    if !handshake_completed {
        SPBool::Undetermined
    } else {
        stapled.into()
    }
}

/// v2 is answered (if at all) in the server hello; without one there is
/// nothing to judge.
fn multi_stapling_finding(server_hello_ack: Option<bool>) -> SPBool {
    match server_hello_ack {
        None => SPBool::Undetermined,
        Some(acked) => acked.into(),
    }
}

pub struct ScanOcspStapling;

impl Worker<ScanContext> for ScanOcspStapling {
    fn name(&self) -> &'static str {
        "ocsp_stapling"
    }

    fn descr(&self) -> &'static str {
        "scan for OCSP stapling"
    }

    fn prio(&self) -> usize {
        32
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        self.scan_stapling(ctx)?;
        self.scan_multi_stapling(ctx)
    }
}

impl ScanOcspStapling {
    fn scan_stapling(&self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&Version::tls_only());
        let status = if values.versions.is_empty() {
            SPBool::Na
        } else {
            init_profile(&mut ctx.client, &values);
            ctx.client.profile.support_status_request = true;

            let mut status = SPBool::Undetermined;
            if let Some(mut conn) = observation(ctx.client.create_connection())? {
                observation(conn.handshake())?;
                status = stapling_finding(conn.handshake_completed, conn.stapling_status);
            }
            status
        };
        ctx.server_profile.features.ocsp_stapling = status;
        Ok(())
    }

    fn scan_multi_stapling(&self, ctx: &mut ScanContext) -> Result<(), Error> {
        let versions = [Version::Tls10, Version::Tls11, Version::Tls12];
        let values = ctx.server_profile.get_profile_values(&versions);
        let status = if values.versions.is_empty() {
            SPBool::Na
        } else {
            init_profile(&mut ctx.client, &values);
            ctx.client.profile.support_status_request_v2 = true;

            let mut status = SPBool::Undetermined;
            if let Some(mut conn) = observation(ctx.client.create_connection())? {
                observation(conn.handshake())?;
                let acked = conn.msg.server_hello.as_ref().map(|hello| {
                    hello
                        .get_extension(ExtensionType::StatusRequestV2)
                        .is_some()
                });
                status = multi_stapling_finding(acked);
            }
            status
        };
        ctx.server_profile.features.ocsp_multi_stapling = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stapled_response_on_a_completed_handshake() {
        assert_eq!(stapling_finding(true, true), SPBool::True);
    }

    #[test]
    fn completed_handshake_without_a_staple() {
        assert_eq!(stapling_finding(true, false), SPBool::False);
    }

    #[test]
    fn aborted_handshake_stays_undetermined() {
        // a staple seen before the abort still does not count
        assert_eq!(stapling_finding(false, true), SPBool::Undetermined);
        assert_eq!(stapling_finding(false, false), SPBool::Undetermined);
    }

    #[test]
    fn multi_stapling_follows_the_server_hello() {
        assert_eq!(multi_stapling_finding(Some(true)), SPBool::True);
        assert_eq!(multi_stapling_finding(Some(false)), SPBool::False);
        assert_eq!(multi_stapling_finding(None), SPBool::Undetermined);
    }
}
