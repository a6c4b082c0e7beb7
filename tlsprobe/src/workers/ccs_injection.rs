//! CVE-2014-0224: servers accepting a ChangeCipherSpec before the key
//! exchange. A patched server answers the early CCS with an alert; a
//! vulnerable one swallows it.

use std::time::Duration;

use probe::error::Error;
use probe::registry::Worker;

use crate::error::{observation, TlsError};
use crate::msgs::enums::Version;
use crate::msgs::message::MessageKind;
use crate::profile::SPBool;
use crate::workers::{init_profile, settle, ScanContext};

const PRE_TLS13: [Version; 4] = [
    Version::Ssl30,
    Version::Tls10,
    Version::Tls11,
    Version::Tls12,
];

/// A patched server answers the early CCS with an alert (or hangs up); a
/// vulnerable one keeps quiet and waits for more input.
fn classify_early_ccs_answer(answer: Result<(), TlsError>) -> Result<SPBool, TlsError> {
    match answer {
        Ok(()) | Err(TlsError::Timeout) => Ok(SPBool::True),
        Err(TlsError::PeerAlert { .. }) | Err(TlsError::Closed) => Ok(SPBool::False),
        Err(err) => Err(err),
    }
}

pub struct ScanCcsInjection;

impl Worker<ScanContext> for ScanCcsInjection {
    fn name(&self) -> &'static str {
        "ccs_injection"
    }

    fn descr(&self) -> &'static str {
        "check if server is vulnerable to the CCS injection attack"
    }

    fn prio(&self) -> usize {
        50
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);
        if values.versions.is_empty() {
            ctx.server_profile.vulnerabilities.ccs_injection = SPBool::Na;
            return Ok(());
        }
        init_profile(&mut ctx.client, &values);

        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => {
                ctx.server_profile.vulnerabilities.ccs_injection = SPBool::Undetermined;
                return Ok(());
            }
        };

        let probe: Result<SPBool, TlsError> = (|| {
            conn.send_client_hello()?;
            conn.wait(MessageKind::ServerHello)?;
            loop {
                let message = conn.wait(MessageKind::Any)?;
                if message.kind() == MessageKind::ServerHelloDone {
                    break;
                }
            }
            conn.send_change_cipher_spec()?;
            classify_early_ccs_answer(
                conn.wait_timeout(MessageKind::Any, Duration::from_secs(2))
                    .map(|_| ()),
            )
        })();

        ctx.server_profile.vulnerabilities.ccs_injection = settle(probe)?;
        Ok(())
    }
}
