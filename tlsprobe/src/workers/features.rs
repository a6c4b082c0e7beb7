//! Feature probes: encrypt_then_mac (gated on CBC suites) and
//! extended_master_secret.

use probe::error::Error;
use probe::registry::Worker;

use crate::error::observation;
use crate::msgs::enums::{ExtensionType, Version};
use crate::profile::SPBool;
use crate::suites::{filter_cipher_suites, CipherSuite, CipherType};
use crate::workers::{init_profile, ScanContext};

const PRE_TLS13: [Version; 3] = [Version::Tls10, Version::Tls11, Version::Tls12];

/// The finding is the server's extension acknowledgement on a completed
/// handshake.
fn extension_finding(handshake_completed: bool, acked: bool) -> SPBool {
    if handshake_completed {
        acked.into()
    } else {
        SPBool::Undetermined
    }
}

/// encrypt_then_mac only means anything for CBC suites.
fn cbc_suites(discovered: &[CipherSuite]) -> Vec<CipherSuite> {
    filter_cipher_suites(discovered, |desc| desc.bulk.typ == CipherType::Block)
}

pub struct ScanEncryptThenMac;

impl Worker<ScanContext> for ScanEncryptThenMac {
    fn name(&self) -> &'static str {
        "encrypt_then_mac"
    }

    fn descr(&self) -> &'static str {
        "check if the extension encrypt_then_mac is supported"
    }

    fn prio(&self) -> usize {
        30
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);
        let cipher_suites = cbc_suites(&values.cipher_suites);

        let state = if cipher_suites.is_empty() {
            // no CBC cipher suite supported
            SPBool::Na
        } else {
            init_profile(&mut ctx.client, &values);
            ctx.client.profile.cipher_suites = cipher_suites;
            ctx.client.profile.support_encrypt_then_mac = true;

            let mut state = SPBool::Undetermined;
            if let Some(mut conn) = observation(ctx.client.create_connection())? {
                observation(conn.handshake())?;
                let acked = conn
                    .msg
                    .server_hello
                    .as_ref()
                    .map(|hello| hello.get_extension(ExtensionType::EncryptThenMac).is_some())
                    .unwrap_or(false);
                state = extension_finding(conn.handshake_completed, acked);
            }
            state
        };
        ctx.server_profile.features.encrypt_then_mac = state;
        Ok(())
    }
}

pub struct ScanExtendedMasterSecret;

impl Worker<ScanContext> for ScanExtendedMasterSecret {
    fn name(&self) -> &'static str {
        "extended_master_secret"
    }

    fn descr(&self) -> &'static str {
        "check if the extension extended_master_secret is supported"
    }

    fn prio(&self) -> usize {
        31
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);

        let state = if values.versions.is_empty() {
            SPBool::Na
        } else {
            init_profile(&mut ctx.client, &values);
            ctx.client.profile.support_extended_master_secret = true;

            let mut state = SPBool::Undetermined;
            if let Some(mut conn) = observation(ctx.client.create_connection())? {
                observation(conn.handshake())?;
                let acked = conn
                    .msg
                    .server_hello
                    .as_ref()
                    .map(|hello| {
                        hello
                            .get_extension(ExtensionType::ExtendedMasterSecret)
                            .is_some()
                    })
                    .unwrap_or(false);
                state = extension_finding(conn.handshake_completed, acked);
            }
            state
        };
        ctx.server_profile.features.extended_master_secret = state;
        Ok(())
    }
}
