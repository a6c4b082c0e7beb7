//! Resumption probes: session id, session ticket and the TLS 1.3
//! resumption PSK, with the advertised lifetimes.

use std::time::Duration;

use probe::error::Error;
use probe::registry::Worker;

use crate::client::{SessionState, Tls13Psk};
use crate::error::observation;
use crate::msgs::enums::Version;
use crate::profile::SPBool;
use crate::workers::{init_profile, ScanContext};

const PRE_TLS13: [Version; 4] = [
    Version::Ssl30,
    Version::Tls10,
    Version::Tls11,
    Version::Tls12,
];

/// What one driver step reports back.
pub enum ResumptionOutcome {
    /// The priming handshake did not come up at all.
    NoConnection,
    /// The priming handshake's cacheable session, if the server handed one
    /// out.
    Cached(Option<SessionState>),
    /// Whether the resumption attempt was honoured.
    Resumed(bool),
}

/// The two-handshake pattern behind every resumption probe. The driver
/// runs once without a session (priming) and once with the cached one
/// (the resumption attempt).
pub fn probe_resumption<D>(mut driver: D) -> Result<(SPBool, Option<SessionState>), Error>
where
    D: FnMut(Option<&SessionState>) -> Result<ResumptionOutcome, Error>,
{
    let session = match driver(None)? {
        ResumptionOutcome::NoConnection => return Ok((SPBool::Undetermined, None)),
        ResumptionOutcome::Cached(None) => return Ok((SPBool::False, None)),
        ResumptionOutcome::Cached(Some(session)) => session,
        ResumptionOutcome::Resumed(_) => return Ok((SPBool::Undetermined, None)),
    };
    match driver(Some(&session))? {
        ResumptionOutcome::Resumed(resumed) => Ok((resumed.into(), Some(session))),
        _ => Ok((SPBool::Undetermined, Some(session))),
    }
}

/// The advertised lifetime, reported only for a confirmed finding.
fn confirmed_lifetime(state: SPBool, session: Option<&SessionState>) -> Option<u32> {
    if state != SPBool::True {
        return None;
    }
    match session {
        Some(SessionState::Ticket(ticket)) => Some(ticket.lifetime_hint),
        Some(SessionState::Psk(psk)) => Some(psk.lifetime),
        _ => None,
    }
}

enum FirstPsk {
    NoConnection,
    Ticket(Option<Tls13Psk>),
}

pub struct ScanResumption;

impl Worker<ScanContext> for ScanResumption {
    fn name(&self) -> &'static str {
        "resumption"
    }

    fn descr(&self) -> &'static str {
        "check if the server supports resumption"
    }

    fn prio(&self) -> usize {
        40
    }

    fn run(&mut self, ctx: &mut ScanContext) -> Result<(), Error> {
        self.scan_session_id(ctx)?;
        self.scan_session_ticket(ctx)?;
        self.scan_psk(ctx)
    }
}

impl ScanResumption {
    fn scan_session_id(&self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);
        if values.versions.is_empty() {
            ctx.server_profile.features.session_id = SPBool::Na;
            return Ok(());
        }
        init_profile(&mut ctx.client, &values);
        ctx.client.profile.support_session_id = true;
        // a ticket would shadow the session-id finding
        ctx.client.profile.support_session_ticket = false;
        ctx.client.profile.session_id_cache = None;

        let (state, _) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(
                    self.first_handshake(ctx)?
                        .filter(|session| matches!(session, SessionState::Id(_))),
                ),
                Some(session) => {
                    ctx.client.save_session(session.clone());
                    ResumptionOutcome::Resumed(self.second_handshake_resumed(ctx)?)
                }
            })
        })?;
        ctx.server_profile.features.session_id = state;
        ctx.client.profile.session_id_cache = None;
        Ok(())
    }

    fn scan_session_ticket(&self, ctx: &mut ScanContext) -> Result<(), Error> {
        let values = ctx.server_profile.get_profile_values(&PRE_TLS13);
        if values.versions.is_empty() {
            ctx.server_profile.features.session_ticket = SPBool::Na;
            return Ok(());
        }
        init_profile(&mut ctx.client, &values);
        ctx.client.profile.support_session_ticket = true;
        ctx.client.profile.session_id_cache = None;
        ctx.client.profile.ticket_cache = None;

        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(
                    self.first_handshake(ctx)?
                        .filter(|session| matches!(session, SessionState::Ticket(_))),
                ),
                Some(session) => {
                    ctx.client.save_session(session.clone());
                    ResumptionOutcome::Resumed(self.second_handshake_resumed(ctx)?)
                }
            })
        })?;
        ctx.server_profile.features.session_ticket = state;
        ctx.server_profile.features.session_ticket_lifetime =
            confirmed_lifetime(state, session.as_ref());
        ctx.client.profile.ticket_cache = None;
        Ok(())
    }

    fn scan_psk(&self, ctx: &mut ScanContext) -> Result<(), Error> {
        if ctx
            .server_profile
            .version_profile(Version::Tls13)
            .is_none()
        {
            ctx.server_profile.features.resumption_psk = SPBool::Na;
            return Ok(());
        }
        let values = ctx.server_profile.get_profile_values(&[Version::Tls13]);
        init_profile(&mut ctx.client, &values);
        ctx.client.profile.psk_cache = None;

        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => match self.first_psk(ctx)? {
                    FirstPsk::NoConnection => ResumptionOutcome::NoConnection,
                    FirstPsk::Ticket(psk) => {
                        ResumptionOutcome::Cached(psk.map(SessionState::Psk))
                    }
                },
                Some(session) => {
                    ctx.client.save_session(session.clone());
                    ctx.client.profile.support_psk = true;
                    ResumptionOutcome::Resumed(self.second_psk_accepted(ctx)?)
                }
            })
        })?;
        ctx.server_profile.features.resumption_psk = state;
        ctx.server_profile.features.psk_lifetime = confirmed_lifetime(state, session.as_ref());
        ctx.client.profile.support_psk = false;
        ctx.client.profile.psk_cache = None;
        Ok(())
    }

    fn first_handshake(&self, ctx: &mut ScanContext) -> Result<Option<SessionState>, Error> {
        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(None),
        };
        if observation(conn.handshake())?.is_none() {
            return Ok(None);
        }
        Ok(conn.take_new_session())
    }

    fn second_handshake_resumed(&self, ctx: &mut ScanContext) -> Result<bool, Error> {
        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(false),
        };
        if observation(conn.handshake())?.is_none() {
            return Ok(false);
        }
        Ok(conn.sec.resumed)
    }

    fn first_psk(&self, ctx: &mut ScanContext) -> Result<FirstPsk, Error> {
        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(FirstPsk::NoConnection),
        };
        if observation(conn.handshake())?.is_none() {
            return Ok(FirstPsk::NoConnection);
        }
        let psk = match conn.wait_tls13_ticket(Duration::from_secs(2)) {
            Ok(psk) => psk,
            Err(err) => {
                observation::<()>(Err(err))?;
                None
            }
        };
        Ok(FirstPsk::Ticket(psk))
    }

    fn second_psk_accepted(&self, ctx: &mut ScanContext) -> Result<bool, Error> {
        let mut conn = match observation(ctx.client.create_connection())? {
            Some(conn) => conn,
            None => return Ok(false),
        };
        if observation(conn.handshake())?.is_none() {
            return Ok(false);
        }
        Ok(conn.psk_accepted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::HashAlgorithm;
    use crate::suites::CipherSuite;

    fn id_session() -> SessionState {
        SessionState::id(
            vec![7; 32],
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
            Version::Tls12,
            vec![0; 48],
            false,
        )
    }

    fn ticket_session() -> SessionState {
        SessionState::ticket(
            vec![9; 16],
            7200,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            Version::Tls12,
            vec![0; 48],
            true,
        )
    }

    fn psk_session() -> SessionState {
        SessionState::Psk(Tls13Psk {
            psk: vec![1; 32],
            ticket: vec![2; 16],
            lifetime: 7200,
            age_add: 0x11223344,
            hash: HashAlgorithm::Sha256,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
        })
    }

    #[test]
    fn resumed_session_id_is_confirmed() {
        let mut second_saw = None;
        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(Some(id_session())),
                Some(session) => {
                    second_saw = Some(session.clone());
                    ResumptionOutcome::Resumed(true)
                }
            })
        })
        .unwrap();
        assert_eq!(state, SPBool::True);
        // the resumption attempt carries exactly the cached session
        assert_eq!(second_saw, Some(id_session()));
        assert_eq!(session, Some(id_session()));
    }

    #[test]
    fn refused_resumption_is_false() {
        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(Some(id_session())),
                Some(_) => ResumptionOutcome::Resumed(false),
            })
        })
        .unwrap();
        assert_eq!(state, SPBool::False);
        assert_eq!(confirmed_lifetime(state, session.as_ref()), None);
    }

    #[test]
    fn nothing_cacheable_is_false_after_one_step() {
        let mut calls = 0;
        let (state, session) = probe_resumption(|_cached| {
            calls += 1;
            Ok(ResumptionOutcome::Cached(None))
        })
        .unwrap();
        assert_eq!(state, SPBool::False);
        assert_eq!(session, None);
        assert_eq!(calls, 1);
    }

    #[test]
    fn no_connection_stays_undetermined() {
        let (state, session) =
            probe_resumption(|_cached| Ok(ResumptionOutcome::NoConnection)).unwrap();
        assert_eq!(state, SPBool::Undetermined);
        assert_eq!(session, None);
    }

    #[test]
    fn confirmed_ticket_carries_its_lifetime() {
        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(Some(ticket_session())),
                Some(_) => ResumptionOutcome::Resumed(true),
            })
        })
        .unwrap();
        assert_eq!(state, SPBool::True);
        assert_eq!(confirmed_lifetime(state, session.as_ref()), Some(7200));
    }

    #[test]
    fn confirmed_psk_carries_its_lifetime() {
        let (state, session) = probe_resumption(|cached| {
            Ok(match cached {
                None => ResumptionOutcome::Cached(Some(psk_session())),
                Some(_) => ResumptionOutcome::Resumed(true),
            })
        })
        .unwrap();
        assert_eq!(state, SPBool::True);
        assert_eq!(confirmed_lifetime(state, session.as_ref()), Some(7200));
    }

    #[test]
    fn lifetime_needs_a_confirmed_ticket_or_psk() {
        let ticket = ticket_session();
        assert_eq!(confirmed_lifetime(SPBool::False, Some(&ticket)), None);
        assert_eq!(confirmed_lifetime(SPBool::Undetermined, Some(&ticket)), None);
        assert_eq!(confirmed_lifetime(SPBool::True, None), None);
        // an id session has no lifetime to report
        assert_eq!(confirmed_lifetime(SPBool::True, Some(&id_session())), None);
    }

    #[test]
    fn driver_errors_abort_the_scan() {
        let err = probe_resumption(|_cached| Err(Error::Replay("diverged".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }
}
