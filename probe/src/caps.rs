//! Capability traits for the non-deterministic primitives. Production wires
//! them to the OS; both implementations here route through the recorder so
//! a replayed scan sees the exact bytes and timestamps of the recording.

use rand::RngCore;

use crate::error::Error;
use crate::recorder::SharedRecorder;

pub trait Rng {
    /// Fresh random bytes, traced under `name` so a replay can re-inject
    /// them.
    fn random_bytes(&mut self, name: &'static str, len: usize) -> Result<Vec<u8>, Error>;
}

pub trait Clock {
    /// Current time as floating-point Unix seconds.
    fn now(&mut self) -> Result<f64, Error>;
}

pub struct RecordedRng {
    recorder: SharedRecorder,
}

impl RecordedRng {
    pub fn new(recorder: SharedRecorder) -> Self {
        RecordedRng { recorder }
    }
}

impl Rng for RecordedRng {
    fn random_bytes(&mut self, name: &'static str, len: usize) -> Result<Vec<u8>, Error> {
        let mut fresh = vec![0u8; len];
        if !self.recorder.borrow().is_replaying() {
            rand::rngs::OsRng.fill_bytes(&mut fresh);
        }
        self.recorder.borrow_mut().inject_bytes(name, fresh)
    }
}

pub struct RecordedClock {
    recorder: SharedRecorder,
}

impl RecordedClock {
    pub fn new(recorder: SharedRecorder) -> Self {
        RecordedClock { recorder }
    }
}

impl Clock for RecordedClock {
    fn now(&mut self) -> Result<f64, Error> {
        let fresh = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.recorder.borrow_mut().inject_f64("timestamp", fresh)
    }
}
