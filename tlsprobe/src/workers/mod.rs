//! The scan workers. Each one reshapes the shared client, opens
//! connections through the engine and writes its findings into the server
//! profile. The registry runs them in ascending priority.

pub mod ccs_injection;
pub mod enumerate;
pub mod features;
pub mod grease;
pub mod groups;
pub mod heartbleed;
pub mod ocsp_stapling;
pub mod renegotiation;
pub mod resumption;
pub mod scan_info;

use probe::config::Config;
use probe::error::Error;
use probe::recorder::SharedRecorder;
use probe::registry::WorkerFactory;

use crate::client::Client;
use crate::error::TlsError;
use crate::msgs::enums::{NamedGroup, Version};
use crate::profile::{ProfileValues, SPBool, ServerProfile};

pub struct ScanContext {
    pub client: Client,
    pub server_profile: ServerProfile,
    pub config: Config,
    pub recorder: SharedRecorder,
}

/// All workers in registration order; the registry sorts by priority.
pub const WORKERS: &[WorkerFactory<ScanContext>] = &[
    || Box::new(scan_info::ScanStart),
    || Box::new(scan_info::ScanEnd),
    || Box::new(enumerate::ScanCipherSuites),
    || Box::new(groups::ScanSupportedGroups),
    || Box::new(features::ScanEncryptThenMac),
    || Box::new(features::ScanExtendedMasterSecret),
    || Box::new(ocsp_stapling::ScanOcspStapling),
    || Box::new(resumption::ScanResumption),
    || Box::new(renegotiation::ScanRenegotiation),
    || Box::new(ccs_injection::ScanCcsInjection),
    || Box::new(heartbleed::ScanHeartbleed),
    || Box::new(grease::ScanGrease),
];

/// Configure the client for full handshakes with the parameters earlier
/// workers discovered.
pub fn init_profile(client: &mut Client, values: &ProfileValues) {
    client.reset_profile();
    client.profile.versions = values.versions.clone();
    client.profile.cipher_suites = values.cipher_suites.clone();
    if !values.supported_groups.is_empty() {
        client.profile.supported_groups = values.supported_groups.clone();
    }
    client.profile.signature_algorithms = values.signature_algorithms.clone();
    client.profile.support_supported_versions = true;
    if values.versions.contains(&Version::Tls13) {
        client.profile.key_shares = key_share_groups(&client.profile.supported_groups);
    }
}

/// The groups we can actually generate shares for, falling back to X25519.
pub fn key_share_groups(groups: &[NamedGroup]) -> Vec<NamedGroup> {
    let capable: Vec<NamedGroup> = groups
        .iter()
        .copied()
        .filter(|group| {
            matches!(
                group,
                NamedGroup::X25519 | NamedGroup::Secp256r1 | NamedGroup::Secp384r1
            )
        })
        .collect();
    if capable.is_empty() {
        vec![NamedGroup::X25519]
    } else {
        capable
    }
}

/// Settle a probe outcome at the worker boundary: framework failures
/// (replay divergence, catastrophic io) keep propagating, anything the
/// probe could not classify stays undetermined.
pub fn settle(outcome: Result<SPBool, TlsError>) -> Result<SPBool, Error> {
    match outcome {
        Ok(state) => Ok(state),
        Err(TlsError::Framework(err)) => Err(err),
        Err(err) => {
            log::debug!("probe not classified: {}", err);
            Ok(SPBool::Undetermined)
        }
    }
}
