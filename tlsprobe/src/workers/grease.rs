//! RFC 8701 tolerance: a reserved value in each slot family; an intolerant
//! server refuses the handshake.

use probe::error::Error;
use probe::registry::Worker;

use crate::client::ClientProfile;
use crate::error::observation;
use crate::msgs::enums::{PskKeyExchangeMode, Version};
use crate::profile::{SPBool, SPGrease};
use crate::workers::{init_profile, ScanContext};

/// The six reserved-value slot families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreaseSlot {
    CipherSuites,
    Extensions,
    Groups,
    SignatureAlgorithms,
    Versions,
    PskModes,
}

impl GreaseSlot {
    pub fn all() -> [GreaseSlot; 6] {
        [
            GreaseSlot::CipherSuites,
            GreaseSlot::Extensions,
            GreaseSlot::Groups,
            GreaseSlot::SignatureAlgorithms,
            GreaseSlot::Versions,
            GreaseSlot::PskModes,
        ]
    }
}

/// Reshape a freshly initialised profile to carry the reserved value for
/// one slot.
fn configure_slot(profile: &mut ClientProfile, slot: GreaseSlot) {
    match slot {
        GreaseSlot::CipherSuites => profile.grease.cipher_suites = true,
        GreaseSlot::Extensions => profile.grease.extensions = true,
        GreaseSlot::Groups => profile.grease.groups = true,
        GreaseSlot::SignatureAlgorithms => profile.grease.signature_algorithms = true,
        GreaseSlot::Versions => profile.grease.versions = true,
        GreaseSlot::PskModes => {
            // the modes extension only goes out with a TLS 1.3 offer
            profile.psk_key_exchange_modes = vec![PskKeyExchangeMode::PskDheKe];
            profile.grease.psk_modes = true;
        }
    }
}

/// One probe per slot; the PSK mode slot only exists under TLS 1.3.
pub fn scan_slots<P>(tls13: bool, mut probe: P) -> Result<SPGrease, Error>
where
    P: FnMut(GreaseSlot) -> Result<SPBool, Error>,
{
    let mut findings = SPGrease::default();
    for slot in GreaseSlot::all() {
        let state = if slot == GreaseSlot::PskModes && !tls13 {
            SPBool::Na
        } else {
            probe(slot)?
        };
        match slot {
            GreaseSlot::CipherSuites => findings.cipher_suite_tolerance = state,
            GreaseSlot::Extensions => findings.extension_tolerance = state,
            GreaseSlot::Groups => findings.group_tolerance = state,
            GreaseSlot::SignatureAlgorithms => findings.sig_algo_tolerance = state,
            GreaseSlot::Versions => findings.version_tolerance = state,
            GreaseSlot::PskModes => findings.psk_mode_tolerance = state,
        }
    }
    Ok(findings)
}

pub struct ScanGrease;

impl Worker<ScanContext> for ScanGrease {
    fn name(&self) -> &'static str {
        "grease"
    }

    fn descr(&self) -> &'static str {
        "check if the server tolerates reserved GREASE values"
    }

    fn prio(&self) -> usize {
        60
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&Version::all());
        if values.versions.is_empty() {
            return Err(Error::Scan("no full handshake parameters known".to_string()));
        }
        let tls13 = values.versions.contains(&Version::Tls13);

        let findings = scan_slots(tls13, |slot| self.probe(ctx, slot))?;
        ctx.server_profile.features.grease = findings;
        Ok(())
    }
}

impl ScanGrease {
    fn probe(&self, ctx: &mut ScanContext, slot: GreaseSlot) -> Result<SPBool, Error> {
        let values = ctx.server_profile.get_profile_values(&Version::all());
        init_profile(&mut ctx.client, &values);
        configure_slot(&mut ctx.client.profile, slot);

        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(SPBool::Undetermined),
        };
        let completed = observation(conn.handshake())?.is_some();
        Ok(completed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerant_server_passes_every_slot() {
        let mut probed = Vec::new();
        let findings = scan_slots(true, |slot| {
            probed.push(slot);
            Ok(SPBool::True)
        })
        .unwrap();
        assert_eq!(probed, GreaseSlot::all().to_vec());
        assert_eq!(findings.cipher_suite_tolerance, SPBool::True);
        assert_eq!(findings.extension_tolerance, SPBool::True);
        assert_eq!(findings.group_tolerance, SPBool::True);
        assert_eq!(findings.sig_algo_tolerance, SPBool::True);
        assert_eq!(findings.version_tolerance, SPBool::True);
        assert_eq!(findings.psk_mode_tolerance, SPBool::True);
    }

    #[test]
    fn psk_mode_slot_is_skipped_without_tls13() {
        let mut probed = Vec::new();
        let findings = scan_slots(false, |slot| {
            probed.push(slot);
            Ok(SPBool::True)
        })
        .unwrap();
        assert!(!probed.contains(&GreaseSlot::PskModes));
        assert_eq!(probed.len(), 5);
        assert_eq!(findings.psk_mode_tolerance, SPBool::Na);
        assert_eq!(findings.version_tolerance, SPBool::True);
    }

    #[test]
    fn intolerance_lands_in_the_right_slot() {
        let findings = scan_slots(true, |slot| {
            Ok(if slot == GreaseSlot::Versions {
                SPBool::False
            } else {
                SPBool::True
            })
        })
        .unwrap();
        assert_eq!(findings.version_tolerance, SPBool::False);
        assert_eq!(findings.cipher_suite_tolerance, SPBool::True);
        assert_eq!(findings.psk_mode_tolerance, SPBool::True);
    }

    #[test]
    fn slots_configure_their_own_knob() {
        for slot in GreaseSlot::all() {
            let mut profile = ClientProfile::interoperability();
            configure_slot(&mut profile, slot);
            assert_eq!(profile.grease.cipher_suites, slot == GreaseSlot::CipherSuites);
            assert_eq!(profile.grease.extensions, slot == GreaseSlot::Extensions);
            assert_eq!(profile.grease.groups, slot == GreaseSlot::Groups);
            assert_eq!(
                profile.grease.signature_algorithms,
                slot == GreaseSlot::SignatureAlgorithms
            );
            assert_eq!(profile.grease.versions, slot == GreaseSlot::Versions);
            assert_eq!(profile.grease.psk_modes, slot == GreaseSlot::PskModes);
        }
    }

    #[test]
    fn psk_mode_slot_adds_the_modes_offer() {
        let mut profile = ClientProfile::interoperability();
        configure_slot(&mut profile, GreaseSlot::PskModes);
        assert_eq!(
            profile.psk_key_exchange_modes,
            vec![PskKeyExchangeMode::PskDheKe]
        );
    }

    #[test]
    fn probe_errors_abort_the_scan() {
        let err = scan_slots(true, |_slot| Err(Error::Replay("diverged".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }
}
