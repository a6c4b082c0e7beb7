//! The structured artifact a scan produces. A plain in-memory tree; an
//! external encoder (serde_json at the CLI boundary) walks it.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::msgs::enums::{NamedGroup, SignatureScheme, Version};
use crate::suites::CipherSuite;

/// Tri-state findings plus "not yet probed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SPBool {
    #[serde(rename = "C_TRUE")]
    True,
    #[serde(rename = "C_FALSE")]
    False,
    #[serde(rename = "C_NA")]
    Na,
    #[serde(rename = "C_UNDETERMINED")]
    Undetermined,
}

impl Default for SPBool {
    fn default() -> Self {
        SPBool::Undetermined
    }
}

impl From<bool> for SPBool {
    fn from(value: bool) -> Self {
        if value {
            SPBool::True
        } else {
            SPBool::False
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPScanInfo {
    pub command: String,
    pub version: String,
    pub start_timestamp: f64,
    pub stop_timestamp: f64,
    pub run_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPServer {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    pub port: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ipv4_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ipv6_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SPCipherSuite {
    pub cipher_suite: CipherSuite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_chain_id: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPSupportedGroups {
    pub extension_supported: SPBool,
    pub server_preference: SPBool,
    pub groups_advertised: SPBool,
    pub groups: Vec<NamedGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SPVersion {
    pub version: Version,
    pub server_preference: SPBool,
    pub cipher_suites: Vec<SPCipherSuite>,
    pub supported_groups: SPSupportedGroups,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature_algorithms: Vec<SignatureScheme>,
    /// SSLv2 only: the accepted 3-byte cipher kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssl2_cipher_kinds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SPCertChain {
    pub id: usize,
    /// DER certificates as lowercase hex.
    pub cert_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPGrease {
    pub version_tolerance: SPBool,
    pub cipher_suite_tolerance: SPBool,
    pub extension_tolerance: SPBool,
    pub group_tolerance: SPBool,
    pub sig_algo_tolerance: SPBool,
    pub psk_mode_tolerance: SPBool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPFeatures {
    pub encrypt_then_mac: SPBool,
    pub extended_master_secret: SPBool,
    pub session_id: SPBool,
    pub session_ticket: SPBool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ticket_lifetime: Option<u32>,
    pub resumption_psk: SPBool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psk_lifetime: Option<u32>,
    pub heartbeat: SPBool,
    pub ocsp_stapling: SPBool,
    pub ocsp_multi_stapling: SPBool,
    pub insecure_renegotiation: SPBool,
    pub secure_renegotiation: SPBool,
    pub scsv_renegotiation: SPBool,
    pub grease: SPGrease,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SPVulnerabilities {
    pub ccs_injection: SPBool,
    pub heartbleed: SPBool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerProfile {
    pub scan_info: SPScanInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<SPServer>,
    pub versions: Vec<SPVersion>,
    pub cert_chains: Vec<SPCertChain>,
    pub features: SPFeatures,
    pub vulnerabilities: SPVulnerabilities,
}

/// Parameters earlier workers discovered, for later workers to reuse.
#[derive(Debug, Clone, Default)]
pub struct ProfileValues {
    pub versions: Vec<Version>,
    pub cipher_suites: Vec<CipherSuite>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_algorithms: Vec<SignatureScheme>,
}

impl ServerProfile {
    pub fn new() -> ServerProfile {
        ServerProfile::default()
    }

    pub fn new_version(&mut self, version: Version, server_preference: SPBool) {
        if let Some(vp) = self.version_profile_mut(version) {
            vp.server_preference = server_preference;
            return;
        }
        self.versions.push(SPVersion {
            version,
            server_preference,
            cipher_suites: Vec::new(),
            supported_groups: SPSupportedGroups::default(),
            signature_algorithms: Vec::new(),
            ssl2_cipher_kinds: Vec::new(),
        });
        self.versions.sort_by_key(|vp| vp.version);
    }

    pub fn version_profile(&self, version: Version) -> Option<&SPVersion> {
        self.versions.iter().find(|vp| vp.version == version)
    }

    pub fn version_profile_mut(&mut self, version: Version) -> Option<&mut SPVersion> {
        self.versions.iter_mut().find(|vp| vp.version == version)
    }

    pub fn supported_versions(&self) -> Vec<Version> {
        self.versions.iter().map(|vp| vp.version).collect()
    }

    pub fn add_cipher_suite(&mut self, version: Version, entry: SPCipherSuite) {
        if let Some(vp) = self.version_profile_mut(version) {
            vp.cipher_suites.push(entry);
        }
    }

    /// Deduplicated certificate chains, id-assigned in order of first
    /// appearance.
    pub fn get_cert_chain_id(&mut self, chain: &[Vec<u8>]) -> usize {
        let hex_chain: Vec<String> = chain.iter().map(hex::encode).collect();
        if let Some(existing) = self
            .cert_chains
            .iter()
            .find(|entry| entry.cert_chain == hex_chain)
        {
            return existing.id;
        }
        let id = self.cert_chains.len() + 1;
        let info = chain
            .first()
            .and_then(|leaf| crate::crypto::pubkey::parse_certificate(leaf).ok());
        self.cert_chains.push(SPCertChain {
            id,
            cert_chain: hex_chain,
            subject: info.as_ref().map(|info| info.subject.clone()),
            issuer: info.as_ref().map(|info| info.issuer.clone()),
        });
        id
    }

    /// The union of discovered parameters over `versions`, preserving the
    /// discovery order.
    pub fn get_profile_values(&self, versions: &[Version]) -> ProfileValues {
        let mut values = ProfileValues::default();
        for version in versions {
            let vp = match self.version_profile(*version) {
                Some(vp) => vp,
                None => continue,
            };
            if *version == Version::Ssl20 {
                continue;
            }
            values.versions.push(*version);
            values
                .cipher_suites
                .extend(vp.cipher_suites.iter().map(|entry| entry.cipher_suite));
            values
                .supported_groups
                .extend(vp.supported_groups.groups.iter().copied());
        }
        values.cipher_suites = values.cipher_suites.into_iter().unique().collect();
        values.supported_groups = values.supported_groups.into_iter().unique().collect();
        if values.signature_algorithms.is_empty() {
            values.signature_algorithms = crate::client::ClientProfile::legacy()
                .signature_algorithms;
        }
        values
    }
}
