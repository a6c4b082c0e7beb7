//! Per-version enumeration of FF-DH and EC groups, server preference and
//! (TLS 1.3) the groups advertised in EncryptedExtensions.

use probe::error::Error;
use probe::registry::Worker;

use crate::client::Client;
use crate::error::{observation, TlsError};
use crate::kx;
use crate::msgs::enums::{ExtensionType, NamedGroup, Version};
use crate::msgs::extensions::ServerExtension;
use crate::msgs::message::MessageKind;
use crate::profile::SPBool;
use crate::suites::{filter_cipher_suites, CipherSuite};
use crate::workers::{key_share_groups, ScanContext};

const MAX_GROUPS_PER_HELLO: usize = 20;

const TLS12_OFFERED_GROUPS: &[NamedGroup] = &[
    NamedGroup::X25519,
    NamedGroup::X448,
    NamedGroup::Sect163k1,
    NamedGroup::Sect163r2,
    NamedGroup::Sect233k1,
    NamedGroup::Sect233r1,
    NamedGroup::Sect283k1,
    NamedGroup::Sect283r1,
    NamedGroup::Sect409k1,
    NamedGroup::Sect409r1,
    NamedGroup::Sect571k1,
    NamedGroup::Sect571r1,
    NamedGroup::Secp224r1,
    NamedGroup::Secp256k1,
    NamedGroup::BrainpoolP256r1,
    NamedGroup::BrainpoolP384r1,
    NamedGroup::BrainpoolP512r1,
    NamedGroup::Secp256r1,
    NamedGroup::Secp384r1,
    NamedGroup::Secp521r1,
];

const TLS13_OFFERED_GROUPS: &[NamedGroup] = &[
    NamedGroup::Secp256r1,
    NamedGroup::Secp384r1,
    NamedGroup::Secp521r1,
    NamedGroup::X25519,
    NamedGroup::X448,
    NamedGroup::Ffdhe2048,
    NamedGroup::Ffdhe3072,
    NamedGroup::Ffdhe4096,
    NamedGroup::Ffdhe6144,
    NamedGroup::Ffdhe8192,
];

pub struct ScanSupportedGroups;

impl Worker<ScanContext> for ScanSupportedGroups {
    fn name(&self) -> &'static str {
        "groups"
    }

    fn descr(&self) -> &'static str {
        "check for FF-DH and EC groups"
    }

    fn prio(&self) -> usize {
        20
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let versions = ctx.server_profile.supported_versions();
        for version in versions {
            if version == Version::Ssl20 {
                continue;
            }
            if let Err(Error::Scan(message)) = scan_version(ctx, version) {
                log::info!("scan error in \"groups\": {}", message);
                if let Some(vp) = ctx.server_profile.version_profile_mut(version) {
                    vp.supported_groups.status = Some(message);
                }
            }
        }
        Ok(())
    }
}

fn scan_version(ctx: &mut ScanContext, version: Version) -> Result<(), Error> {
    let vp_suites: Vec<CipherSuite> = ctx
        .server_profile
        .version_profile(version)
        .map(|vp| vp.cipher_suites.iter().map(|entry| entry.cipher_suite).collect())
        .unwrap_or_default();

    let (cipher_suites, offered): (Vec<CipherSuite>, &[NamedGroup]) = if version == Version::Tls13
    {
        (vp_suites, TLS13_OFFERED_GROUPS)
    } else {
        (
            filter_cipher_suites(&vp_suites, |desc| desc.kx.is_ecdhe()),
            TLS12_OFFERED_GROUPS,
        )
    };
    if cipher_suites.is_empty() {
        return Err(Error::Scan("no (EC)DHE cipher suites supported".to_string()));
    }

    ctx.client.reset_profile();
    ctx.client.profile.versions = vec![version];
    ctx.client.profile.cipher_suites = cipher_suites;
    ctx.client.profile.signature_algorithms =
        crate::client::ClientProfile::legacy().signature_algorithms;
    ctx.client.profile.support_supported_versions = version >= Version::Tls12;

    let tls13 = version == Version::Tls13;
    let client = &mut ctx.client;
    let mut probe = |groups: &[NamedGroup]| -> Result<Option<NamedGroup>, Error> {
        client.profile.supported_groups = groups.to_vec();
        if tls13 {
            client.profile.key_shares = key_share_groups(groups);
            probe_group_tls13(client)
        } else {
            probe_group_tls12(client)
        }
    };

    let (groups, extension_supported) = determine_supported_groups(offered, &mut probe)?;
    let preference = if extension_supported == SPBool::True {
        group_preference(&groups, &mut probe)?
    } else {
        SPBool::Na
    };

    let advertised = if tls13 && !groups.is_empty() {
        determine_advertised_groups(&mut ctx.client, &groups)?
    } else {
        SPBool::Na
    };

    if let Some(vp) = ctx.server_profile.version_profile_mut(version) {
        vp.supported_groups.groups = groups;
        vp.supported_groups.extension_supported = extension_supported;
        vp.supported_groups.server_preference = preference;
        vp.supported_groups.groups_advertised = advertised;
    }
    Ok(())
}

/// TLS <= 1.2: the selected group is in the ServerKeyExchange.
fn probe_group_tls12(client: &Client) -> Result<Option<NamedGroup>, Error> {
    let mut conn = match observation(client.create_connection())? {
        Some(conn) => conn,
        None => return Ok(None),
    };
    let result: Result<Option<NamedGroup>, TlsError> = (|| {
        conn.send_client_hello()?;
        conn.wait(MessageKind::ServerHello)?;
        conn.wait_optional(MessageKind::Certificate)?;
        conn.wait_optional(MessageKind::CertificateStatus)?;
        conn.wait(MessageKind::ServerKeyExchange)?;
        let anonymous = conn
            .sec
            .suite
            .map(|desc| desc.kx.is_anonymous())
            .unwrap_or(false);
        let curve = conn
            .msg
            .server_key_exchange
            .as_ref()
            .and_then(|ske| kx::parse_ecdhe_params(ske, conn.sec.version, anonymous).ok())
            .map(|params| params.curve);
        Ok(curve)
    })();
    Ok(observation(result)?.flatten())
}

/// TLS 1.3: the selected group is in the key_share answer, or in the
/// HelloRetryRequest when we had no share for it.
fn probe_group_tls13(client: &Client) -> Result<Option<NamedGroup>, Error> {
    let mut conn = match observation(client.create_connection())? {
        Some(conn) => conn,
        None => return Ok(None),
    };
    let result: Result<(), TlsError> = (|| {
        conn.send_client_hello()?;
        conn.wait(MessageKind::ServerHello)?;
        Ok(())
    })();
    let hello = conn.msg.server_hello.clone();
    // a retry request aborts the handshake but still names the group
    observation(result)?;
    let hello = match hello {
        Some(hello) => hello,
        None => return Ok(None),
    };
    let group = match hello.get_extension(ExtensionType::KeyShare) {
        Some(ServerExtension::KeyShare(entry)) => Some(entry.group),
        Some(ServerExtension::KeyShareHelloRetry(group)) => Some(*group),
        _ => None,
    };
    Ok(group)
}

/// Batch the offered groups and collect everything the server picks. A
/// pick outside the offer means the extension is ignored.
pub fn determine_supported_groups<P>(
    offered: &[NamedGroup],
    mut probe: P,
) -> Result<(Vec<NamedGroup>, SPBool), Error>
where
    P: FnMut(&[NamedGroup]) -> Result<Option<NamedGroup>, Error>,
{
    let mut supported = Vec::new();
    let mut remaining = offered.to_vec();
    while !remaining.is_empty() {
        let take = remaining.len().min(MAX_GROUPS_PER_HELLO);
        let mut sub_set: Vec<NamedGroup> = remaining.drain(..take).collect();
        while !sub_set.is_empty() {
            let group = match probe(&sub_set)? {
                Some(group) => group,
                None => break,
            };
            if !sub_set.contains(&group) {
                supported.push(group);
                return Ok((supported, SPBool::False));
            }
            sub_set.retain(|candidate| *candidate != group);
            supported.push(group);
        }
    }
    let extension_supported = if supported.is_empty() {
        SPBool::Undetermined
    } else {
        SPBool::True
    };
    Ok((supported, extension_supported))
}

/// Move the favourite to the end; a server with its own order re-picks it.
pub fn group_preference<P>(groups: &[NamedGroup], mut probe: P) -> Result<SPBool, Error>
where
    P: FnMut(&[NamedGroup]) -> Result<Option<NamedGroup>, Error>,
{
    if groups.len() < 2 {
        return Ok(SPBool::Na);
    }
    let reference = groups[0];
    let mut rotated = groups.to_vec();
    rotated.rotate_left(1);
    match probe(&rotated)? {
        Some(group) if group == reference => Ok(SPBool::True),
        Some(_) => Ok(SPBool::False),
        None => Ok(SPBool::Undetermined),
    }
}

/// TLS 1.3 only: whether the server advertises its groups in
/// EncryptedExtensions.
fn determine_advertised_groups(
    client: &mut Client,
    groups: &[NamedGroup],
) -> Result<SPBool, Error> {
    let first = key_share_groups(groups);
    client.profile.supported_groups = first.clone();
    client.profile.key_shares = first;

    let mut conn = match observation(client.create_connection())? {
        Some(conn) => conn,
        None => return Ok(SPBool::Undetermined),
    };
    let result: Result<(), TlsError> = conn.handshake();
    let extensions = conn.msg.encrypted_extensions.clone();
    drop(conn);
    if observation(result)?.is_none() {
        return Ok(SPBool::Undetermined);
    }
    let extensions = match extensions {
        Some(extensions) => extensions,
        None => return Ok(SPBool::Undetermined),
    };
    let advertised = extensions
        .iter()
        .any(|ext| matches!(ext, ServerExtension::SupportedGroups(_)));
    Ok(advertised.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(accepted: Vec<NamedGroup>) -> impl FnMut(&[NamedGroup]) -> Result<Option<NamedGroup>, Error> {
        move |offered: &[NamedGroup]| {
            Ok(accepted.iter().find(|group| offered.contains(group)).copied())
        }
    }

    #[test]
    fn groups_are_binned_across_batches() {
        let accepted = vec![NamedGroup::Secp384r1, NamedGroup::X25519];
        let (groups, supported) =
            determine_supported_groups(TLS12_OFFERED_GROUPS, server(accepted)).unwrap();
        assert_eq!(supported, SPBool::True);
        assert!(groups.contains(&NamedGroup::X25519));
        assert!(groups.contains(&NamedGroup::Secp384r1));
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn pick_outside_the_offer_means_extension_ignored() {
        let (groups, supported) =
            determine_supported_groups(&[NamedGroup::X448], |_offered| {
                Ok(Some(NamedGroup::Secp256r1))
            })
            .unwrap();
        assert_eq!(supported, SPBool::False);
        assert_eq!(groups, vec![NamedGroup::Secp256r1]);
    }

    #[test]
    fn group_preference_two_probes() {
        // server insists on its favourite
        let groups = vec![NamedGroup::X25519, NamedGroup::Secp256r1];
        let pref = group_preference(&groups, server(vec![NamedGroup::X25519, NamedGroup::Secp256r1]))
            .unwrap();
        assert_eq!(pref, SPBool::True);

        // server follows the client order
        let pref = group_preference(&groups, |offered: &[NamedGroup]| Ok(offered.first().copied()))
            .unwrap();
        assert_eq!(pref, SPBool::False);
    }
}
