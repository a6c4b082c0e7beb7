//! CVE-2014-0160: a heartbeat request whose declared payload length
//! exceeds the carried payload. A vulnerable server echoes the declared
//! length back. Refer to https://heartbleed.com/

use std::time::Duration;

use probe::error::Error;
use probe::registry::Worker;

use crate::error::{observation, TlsError};
use crate::msgs::enums::{ExtensionType, HeartbeatMode, Version};
use crate::msgs::heartbeat::HeartbeatPayload;
use crate::msgs::message::MessageKind;
use crate::profile::SPBool;
use crate::workers::{init_profile, settle, ScanContext};

/// Declared payload length of the probe request; only three bytes are
/// actually carried.
const DECLARED_PAYLOAD_LENGTH: u16 = 4;

/// A vulnerable server echoes the declared length back; a patched one
/// answers with the real payload, alerts, or stays silent.
fn classify_echo(answer: Result<Option<u16>, TlsError>) -> Result<SPBool, TlsError> {
    match answer {
        Ok(Some(length)) => Ok((length == DECLARED_PAYLOAD_LENGTH).into()),
        Ok(None) => Ok(SPBool::False),
        Err(TlsError::Timeout) | Err(TlsError::PeerAlert { .. }) | Err(TlsError::Closed) => {
            Ok(SPBool::False)
        }
        Err(err) => Err(err),
    }
}

pub struct ScanHeartbleed;

impl Worker<ScanContext> for ScanHeartbleed {
    fn name(&self) -> &'static str {
        "heartbleed"
    }

    fn descr(&self) -> &'static str {
        "check if server is vulnerable to the Heartbleed vulnerability"
    }

    fn prio(&self) -> usize {
        51
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&Version::all());
        if values.versions.is_empty() {
            ctx.server_profile.features.heartbeat = SPBool::Na;
            ctx.server_profile.vulnerabilities.heartbleed = SPBool::Na;
            return Ok(());
        }
        init_profile(&mut ctx.client, &values);
        ctx.client.profile.heartbeat_mode = Some(HeartbeatMode::PeerAllowedToSend);

        let mut heartbeat = SPBool::Undetermined;
        let mut bleed = SPBool::Undetermined;

        if let Some(mut conn) = observation(ctx.client.create_connection())? {
            if observation(conn.handshake())?.is_some() {
                let advertised = conn
                    .msg
                    .server_hello
                    .as_ref()
                    .map(|hello| hello.get_extension(ExtensionType::Heartbeat).is_some())
                    .unwrap_or(false);
                heartbeat = advertised.into();

                if advertised {
                    let request = HeartbeatPayload::request(
                        b"abc".to_vec(),
                        DECLARED_PAYLOAD_LENGTH,
                        Vec::new(),
                    );
                    let answer: Result<Option<u16>, TlsError> = (|| {
                        conn.send_heartbeat_request(request)?;
                        conn.wait_timeout(MessageKind::HeartbeatResponse, Duration::from_secs(2))?;
                        Ok(conn
                            .msg
                            .heartbeat_response
                            .as_ref()
                            .map(|response| response.payload_length))
                    })();
                    bleed = settle(classify_echo(answer))?;
                } else {
                    bleed = SPBool::Na;
                }
            }
        }

        ctx.server_profile.features.heartbeat = heartbeat;
        ctx.server_profile.vulnerabilities.heartbleed = bleed;
        ctx.client.profile.heartbeat_mode = None;
        Ok(())
    }
}
