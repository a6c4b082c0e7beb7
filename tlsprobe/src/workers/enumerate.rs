//! Version and cipher-suite enumeration, including the SSLv2 probe and
//! the two-probe server-preference test.

use probe::caps::{RecordedRng, Rng};
use probe::error::Error;
use probe::registry::Worker;

use crate::client::Client;
use crate::error::{observation, TlsError};
use crate::msgs::enums::Version;
use crate::msgs::message::MessageKind;
use crate::msgs::ssl2::{Ssl2ClientHello, Ssl2ServerHello};
use crate::profile::{SPBool, SPCipherSuite};
use crate::sock::Socket;
use crate::suites::{suites_for_version, CipherSuite};
use crate::workers::{key_share_groups, ScanContext};

/// Cap per ClientHello; some servers drop oversized hellos.
const MAX_SUITES_PER_HELLO: usize = 32;

pub struct ScanCipherSuites;

impl Worker<ScanContext> for ScanCipherSuites {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn descr(&self) -> &'static str {
        "enumerate TLS versions and cipher suites"
    }

    fn prio(&self) -> usize {
        10
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        if version_enabled(ctx, "sslv2") {
            ssl2_probe(ctx)?;
        }
        for (option, version) in [
            ("sslv3", Version::Ssl30),
            ("tls10", Version::Tls10),
            ("tls11", Version::Tls11),
            ("tls12", Version::Tls12),
            ("tls13", Version::Tls13),
        ] {
            if version_enabled(ctx, option) {
                enum_version(ctx, version)?;
            }
        }
        Ok(())
    }
}

fn version_enabled(ctx: &ScanContext, option: &str) -> bool {
    match ctx.config.get(option) {
        Some(probe::config::ConfigValue::Bool(enabled)) => *enabled,
        _ => true,
    }
}

/// One ClientHello; the server's selected suite, or `None` for any kind of
/// refusal. The certificate chain is collected when it arrives in the
/// clear.
fn probe_selected_suite(
    client: &Client,
) -> Result<Option<(CipherSuite, Option<Vec<Vec<u8>>>)>, Error> {
    let mut conn = match observation(client.create_connection())? {
        Some(conn) => conn,
        None => return Ok(None),
    };
    let result: Result<(CipherSuite, Option<Vec<Vec<u8>>>), TlsError> = (|| {
        conn.send_client_hello()?;
        conn.wait(MessageKind::ServerHello)?;
        let selected = conn
            .msg
            .server_hello
            .as_ref()
            .map(|hello| hello.cipher_suite)
            .ok_or(TlsError::Closed)?;
        if conn.sec.version < Version::Tls13 {
            // a refusal after the hello still leaves the suite observation
            match conn.wait_optional(MessageKind::Certificate) {
                Err(err @ TlsError::Framework(_)) => return Err(err),
                _ => {}
            }
        }
        Ok((selected, conn.msg.server_certificate.clone()))
    })();
    observation(result)
}

/// Batch enumeration: offer up to 32 suites, drop the selected one, retry;
/// a refusal flushes the sub-batch.
pub fn enumerate_supported<P>(
    candidates: &[CipherSuite],
    mut probe: P,
) -> Result<Vec<CipherSuite>, Error>
where
    P: FnMut(&[CipherSuite]) -> Result<Option<CipherSuite>, Error>,
{
    let mut supported = Vec::new();
    let mut remaining = candidates.to_vec();
    while !remaining.is_empty() {
        let take = remaining.len().min(MAX_SUITES_PER_HELLO);
        let mut sub_set: Vec<CipherSuite> = remaining.drain(..take).collect();
        while !sub_set.is_empty() {
            match probe(&sub_set)? {
                Some(selected) if sub_set.contains(&selected) => {
                    sub_set.retain(|suite| *suite != selected);
                    supported.push(selected);
                }
                _ => break,
            }
        }
    }
    Ok(supported)
}

/// The two-probe preference test: move the first pick to the end and offer
/// again. A server enforcing its own order picks the same suite twice.
pub fn server_preference<P>(
    supported: &mut Vec<CipherSuite>,
    mut probe: P,
) -> Result<SPBool, Error>
where
    P: FnMut(&[CipherSuite]) -> Result<Option<CipherSuite>, Error>,
{
    if supported.len() < 2 {
        return Ok(SPBool::Na);
    }
    let mut rotated = supported.clone();
    rotated.rotate_left(1);
    let second_pick = match probe(&rotated)? {
        Some(pick) => pick,
        None => return Ok(SPBool::Undetermined),
    };
    if second_pick != rotated[0] {
        // server order wins: enumerate it completely
        let mut ordered = Vec::new();
        let mut remaining = supported.clone();
        while !remaining.is_empty() {
            match probe(&remaining)? {
                Some(pick) if remaining.contains(&pick) => {
                    remaining.retain(|suite| *suite != pick);
                    ordered.push(pick);
                }
                _ => break,
            }
        }
        ordered.extend(remaining);
        *supported = ordered;
        Ok(SPBool::True)
    } else {
        Ok(SPBool::False)
    }
}

fn enum_version(ctx: &mut ScanContext, version: Version) -> Result<(), Error> {
    log::info!("starting to enumerate {:?}", version);
    let candidates = suites_for_version(version);

    let mut legacy = crate::client::ClientProfile::legacy();
    ctx.client.reset_profile();
    ctx.client.profile.versions = vec![version];
    ctx.client.profile.supported_groups = std::mem::take(&mut legacy.supported_groups);
    ctx.client.profile.signature_algorithms = std::mem::take(&mut legacy.signature_algorithms);
    ctx.client.profile.support_supported_versions = version >= Version::Tls12;
    if version == Version::Tls13 {
        ctx.client.profile.key_shares = key_share_groups(&ctx.client.profile.supported_groups);
    }

    let mut chains: Vec<(CipherSuite, Vec<Vec<u8>>)> = Vec::new();
    let client = &mut ctx.client;
    let mut probe = |suites: &[CipherSuite]| -> Result<Option<CipherSuite>, Error> {
        client.profile.cipher_suites = suites.to_vec();
        match probe_selected_suite(client)? {
            Some((selected, chain)) => {
                if let Some(chain) = chain {
                    chains.push((selected, chain));
                }
                Ok(Some(selected))
            }
            None => Ok(None),
        }
    };

    let mut supported = enumerate_supported(&candidates, &mut probe)?;
    if supported.is_empty() {
        log::info!("enumeration for {:?} finished, nothing supported", version);
        return Ok(());
    }
    let preference = server_preference(&mut supported, &mut probe)?;

    ctx.server_profile.new_version(version, preference);
    for suite in supported {
        let cert_chain_id = chains
            .iter()
            .find(|(chain_suite, _)| *chain_suite == suite)
            .map(|(_, chain)| ctx.server_profile.get_cert_chain_id(chain));
        ctx.server_profile
            .add_cipher_suite(version, SPCipherSuite {
                cipher_suite: suite,
                cert_chain_id,
            });
    }
    log::info!("enumeration for {:?} finished", version);
    Ok(())
}

/// Send an SSLv2 ClientHello and dissect the answer; no handshake is ever
/// completed.
fn ssl2_probe(ctx: &mut ScanContext) -> Result<(), Error> {
    log::info!("probing for SSL 2.0");
    let mut rng = RecordedRng::new(ctx.recorder.clone());
    let challenge = rng.random_bytes("ssl2_challenge", 16)?;
    let hello = Ssl2ClientHello::new(challenge);

    let mut socket = Socket::new(ctx.client.host.clone(), ctx.client.port, ctx.recorder.clone());
    let result: Result<Option<Ssl2ServerHello>, TlsError> = (|| {
        socket.sendall(&hello.encode())?;
        let mut data = socket.recv(std::time::Duration::from_secs(5))?;
        match Ssl2ServerHello::read(&data) {
            Ok(answer) => Ok(answer),
            Err(_) => {
                // truncated: one more read, then give up
                let more = socket.recv(std::time::Duration::from_secs(5))?;
                data.extend_from_slice(&more);
                Ok(Ssl2ServerHello::read(&data).unwrap_or(None))
            }
        }
    })();
    socket.close();

    if let Some(Some(answer)) = observation(result)? {
        if !answer.cipher_kinds.is_empty() {
            ctx.server_profile.new_version(Version::Ssl20, SPBool::Na);
            if let Some(vp) = ctx.server_profile.version_profile_mut(Version::Ssl20) {
                vp.ssl2_cipher_kinds = answer
                    .cipher_kinds
                    .iter()
                    .map(|kind| format!("{:06x}", kind))
                    .collect();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated_server(
        accepted: Vec<CipherSuite>,
        honour_client_order: bool,
    ) -> impl FnMut(&[CipherSuite]) -> Result<Option<CipherSuite>, Error> {
        move |offered: &[CipherSuite]| {
            let pick = if honour_client_order {
                offered.iter().find(|suite| accepted.contains(suite))
            } else {
                accepted.iter().find(|suite| offered.contains(suite))
            };
            Ok(pick.copied())
        }
    }

    #[test]
    fn enumeration_finds_the_accepted_set() {
        let accepted = vec![
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
        ];
        let candidates = suites_for_version(Version::Tls12);
        let supported =
            enumerate_supported(&candidates, simulated_server(accepted.clone(), true)).unwrap();
        assert_eq!(supported.len(), 2);
        assert!(supported.contains(&accepted[0]));
        assert!(supported.contains(&accepted[1]));
    }

    #[test]
    fn enumeration_spans_batches() {
        // more than one 32-suite batch with picks in both
        let candidates = suites_for_version(Version::Tls12);
        assert!(candidates.len() > MAX_SUITES_PER_HELLO);
        let accepted = vec![candidates[0], candidates[candidates.len() - 1]];
        let supported =
            enumerate_supported(&candidates, simulated_server(accepted.clone(), true)).unwrap();
        assert_eq!(supported.len(), 2);
    }

    #[test]
    fn preference_detects_server_order() {
        let server_order = vec![
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
        ];
        // discovered in client order (binary order differs from server's)
        let mut supported = vec![
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ];
        let pref =
            server_preference(&mut supported, simulated_server(server_order.clone(), false))
                .unwrap();
        assert_eq!(pref, SPBool::True);
        assert_eq!(supported, server_order);
    }

    #[test]
    fn preference_detects_client_order() {
        let accepted = vec![
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ];
        let mut supported = accepted.clone();
        let pref = server_preference(&mut supported, simulated_server(accepted.clone(), true))
            .unwrap();
        assert_eq!(pref, SPBool::False);
        assert_eq!(supported, accepted);
    }

    // any two offer orders containing the preferred suite agree on the
    // outcome
    #[test]
    fn preference_outcome_is_order_independent() {
        let server_order = vec![
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
        ];
        let mut order_a = server_order.clone();
        let mut order_b = vec![server_order[2], server_order[0], server_order[1]];
        let pref_a =
            server_preference(&mut order_a, simulated_server(server_order.clone(), false))
                .unwrap();
        let pref_b =
            server_preference(&mut order_b, simulated_server(server_order.clone(), false))
                .unwrap();
        assert_eq!(pref_a, pref_b);
        assert_eq!(pref_a, SPBool::True);
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn single_suite_has_no_preference() {
        let mut supported = vec![CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA];
        let pref = server_preference(&mut supported, |_offered| {
            Ok(Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA))
        })
        .unwrap();
        assert_eq!(pref, SPBool::Na);
    }
}
