//! Renegotiation probes: insecure, RFC 5746 secure, and the SCSV signal.
//! Three independent findings, one probe connection each.

use probe::error::Error;
use probe::registry::Worker;

use crate::error::observation;
use crate::msgs::enums::{ExtensionType, Version};
use crate::profile::{ProfileValues, SPBool};
use crate::workers::{init_profile, ScanContext};

const PRE_TLS13: [Version; 4] = [
    Version::Ssl30,
    Version::Tls10,
    Version::Tls11,
    Version::Tls12,
];

/// What the client offers on one probe connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegotiationOffer {
    /// Neither renegotiation_info nor the SCSV.
    Plain,
    /// The empty renegotiation_info extension (RFC 5746).
    RenegotiationInfo,
    /// The signalling cipher-suite value.
    Scsv,
}

/// What one probe connection observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenegotiationProbe {
    pub completed: bool,
    pub renegotiated: bool,
    pub renegotiation_info_acked: bool,
}

/// The three findings: a bare second hello accepted, a renegotiation
/// completed under acknowledged renegotiation_info, and the SCSV answered
/// with the extension.
pub fn scan_offers<P>(mut probe: P) -> Result<(SPBool, SPBool, SPBool), Error>
where
    P: FnMut(RenegotiationOffer) -> Result<RenegotiationProbe, Error>,
{
    let insecure = probe(RenegotiationOffer::Plain)?.renegotiated.into();
    let secure_probe = probe(RenegotiationOffer::RenegotiationInfo)?;
    let secure = (secure_probe.renegotiation_info_acked && secure_probe.renegotiated).into();
    let scsv = probe(RenegotiationOffer::Scsv)?
        .renegotiation_info_acked
        .into();
    Ok((insecure, secure, scsv))
}

pub struct ScanRenegotiation;

impl Worker<ScanContext> for ScanRenegotiation {
    fn name(&self) -> &'static str {
        "renegotiation"
    }

    fn descr(&self) -> &'static str {
        "scan for renegotiation support"
    }

    fn prio(&self) -> usize {
        45
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);
        if values.versions.is_empty() {
            ctx.server_profile.features.insecure_renegotiation = SPBool::Na;
            ctx.server_profile.features.secure_renegotiation = SPBool::Na;
            ctx.server_profile.features.scsv_renegotiation = SPBool::Na;
            return Ok(());
        }

        let (insecure, secure, scsv) = scan_offers(|offer| self.probe(ctx, &values, offer))?;
        ctx.server_profile.features.insecure_renegotiation = insecure;
        ctx.server_profile.features.secure_renegotiation = secure;
        ctx.server_profile.features.scsv_renegotiation = scsv;
        Ok(())
    }
}

impl ScanRenegotiation {
    /// Full handshake with the configured offer, then (except for the pure
    /// SCSV signal) a second hello on the same connection.
    fn probe(
        &self,
        ctx: &mut ScanContext,
        values: &ProfileValues,
        offer: RenegotiationOffer,
    ) -> Result<RenegotiationProbe, Error> {
        init_profile(&mut ctx.client, values);
        match offer {
            RenegotiationOffer::Plain => {}
            RenegotiationOffer::RenegotiationInfo => {
                ctx.client.profile.support_secure_renegotiation = true;
            }
            RenegotiationOffer::Scsv => {
                ctx.client.profile.support_scsv_renegotiation = true;
            }
        }

        let mut observed = RenegotiationProbe::default();
        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(observed),
        };
        if observation(conn.handshake())?.is_none() {
            return Ok(observed);
        }
        observed.completed = true;
        observed.renegotiation_info_acked = conn
            .msg
            .server_hello
            .as_ref()
            .map(|hello| {
                hello
                    .get_extension(ExtensionType::RenegotiationInfo)
                    .is_some()
            })
            .unwrap_or(false);
        if offer != RenegotiationOffer::Scsv {
            observed.renegotiated = observation(conn.renegotiate())?.is_some();
        }
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // an up-to-date stack: refuses the bare second hello, renegotiates
    // under RFC 5746 and answers the SCSV with the extension
    fn rfc5746_server(offer: RenegotiationOffer) -> Result<RenegotiationProbe, Error> {
        Ok(match offer {
            RenegotiationOffer::Plain => RenegotiationProbe {
                completed: true,
                renegotiated: false,
                renegotiation_info_acked: false,
            },
            RenegotiationOffer::RenegotiationInfo => RenegotiationProbe {
                completed: true,
                renegotiated: true,
                renegotiation_info_acked: true,
            },
            RenegotiationOffer::Scsv => RenegotiationProbe {
                completed: true,
                renegotiated: false,
                renegotiation_info_acked: true,
            },
        })
    }

    #[test]
    fn rfc5746_stack_findings() {
        let (insecure, secure, scsv) = scan_offers(rfc5746_server).unwrap();
        assert_eq!(insecure, SPBool::False);
        assert_eq!(secure, SPBool::True);
        assert_eq!(scsv, SPBool::True);
    }

    #[test]
    fn legacy_stack_renegotiates_without_the_extension() {
        let (insecure, secure, scsv) = scan_offers(|offer| {
            Ok(RenegotiationProbe {
                completed: true,
                // accepts any second hello, never speaks RFC 5746
                renegotiated: offer != RenegotiationOffer::Scsv,
                renegotiation_info_acked: false,
            })
        })
        .unwrap();
        assert_eq!(insecure, SPBool::True);
        assert_eq!(secure, SPBool::False);
        assert_eq!(scsv, SPBool::False);
    }

    #[test]
    fn acknowledgement_without_renegotiation_is_not_secure() {
        let (_, secure, _) = scan_offers(|_offer| {
            Ok(RenegotiationProbe {
                completed: true,
                renegotiated: false,
                renegotiation_info_acked: true,
            })
        })
        .unwrap();
        assert_eq!(secure, SPBool::False);
    }

    #[test]
    fn failed_probes_yield_false_findings() {
        let (insecure, secure, scsv) =
            scan_offers(|_offer| Ok(RenegotiationProbe::default())).unwrap();
        assert_eq!(insecure, SPBool::False);
        assert_eq!(secure, SPBool::False);
        assert_eq!(scsv, SPBool::False);
    }

    #[test]
    fn offers_are_probed_in_order() {
        let mut offers = Vec::new();
        scan_offers(|offer| {
            offers.push(offer);
            Ok(RenegotiationProbe::default())
        })
        .unwrap();
        assert_eq!(
            offers,
            vec![
                RenegotiationOffer::Plain,
                RenegotiationOffer::RenegotiationInfo,
                RenegotiationOffer::Scsv,
            ]
        );
    }

    #[test]
    fn probe_errors_abort_the_scan() {
        let err = scan_offers(|_offer| Err(Error::Replay("diverged".to_string()))).unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }
}
