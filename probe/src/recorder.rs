//! Record-and-replay interposition for every external effect: socket bytes,
//! generated randomness, timestamps and non-deterministic crypto outputs.
//!
//! When recording, all data passing the interposed interfaces is appended to
//! a per-name list and can be serialised to a file. When replaying, the
//! lists are drained in order: socket reads and injected values come from
//! the recording, while everything sent or traced is compared byte-exactly
//! against it. Any divergence is a regression and fails the scan.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
    Replaying,
}

/// Shared handle; one scan is driven by a single task, so `Rc<RefCell<..>>`
/// is the ownership model throughout.
pub type SharedRecorder = Rc<RefCell<Recorder>>;

#[derive(Debug)]
pub struct Recorder {
    state: RecorderState,
    data: BTreeMap<String, VecDeque<Value>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            state: RecorderState::Inactive,
            data: BTreeMap::new(),
        }
    }

    pub fn shared() -> SharedRecorder {
        Rc::new(RefCell::new(Recorder::new()))
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn deactivate(&mut self) {
        self.state = RecorderState::Inactive;
    }

    pub fn record(&mut self) {
        self.state = RecorderState::Recording;
    }

    pub fn replay(&mut self) {
        self.state = RecorderState::Replaying;
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn is_replaying(&self) -> bool {
        self.state == RecorderState::Replaying
    }

    fn store(&mut self, name: &str, value: Value) {
        self.data.entry(name.to_string()).or_default().push_back(value);
    }

    fn unstore(&mut self, name: &str) -> Result<Value, Error> {
        self.data
            .get_mut(name)
            .and_then(|list| list.pop_front())
            .ok_or_else(|| Error::Replay(format!("recording exhausted for \"{}\"", name)))
    }

    /// Trace a named value. Recording stores it, replaying checks it against
    /// the recorded twin.
    pub fn trace(&mut self, name: &str, value: Value) -> Result<(), Error> {
        match self.state {
            RecorderState::Inactive => Ok(()),
            RecorderState::Recording => {
                self.store(name, value);
                Ok(())
            }
            RecorderState::Replaying => {
                let recorded = self.unstore(name)?;
                if recorded != value {
                    return Err(Error::Replay(format!(
                        "trace \"{}\": got {} but recorded {}",
                        name, value, recorded
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn trace_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), Error> {
        self.trace(name, Value::String(hex::encode(value)))
    }

    pub fn trace_f64(&mut self, name: &str, value: f64) -> Result<(), Error> {
        self.trace(name, json_f64(value))
    }

    /// Inject a named value in place of a freshly computed non-deterministic
    /// result. Recording stores the fresh value and passes it through,
    /// replaying substitutes the recorded one.
    pub fn inject(&mut self, name: &str, fresh: Value) -> Result<Value, Error> {
        match self.state {
            RecorderState::Inactive => Ok(fresh),
            RecorderState::Recording => {
                self.store(name, fresh.clone());
                Ok(fresh)
            }
            RecorderState::Replaying => self.unstore(name),
        }
    }

    pub fn inject_bytes(&mut self, name: &str, fresh: Vec<u8>) -> Result<Vec<u8>, Error> {
        let value = self.inject(name, Value::String(hex::encode(&fresh)))?;
        decode_bytes(name, &value)
    }

    pub fn inject_f64(&mut self, name: &str, fresh: f64) -> Result<f64, Error> {
        let value = self.inject(name, json_f64(fresh))?;
        value
            .as_f64()
            .ok_or_else(|| Error::Replay(format!("\"{}\": recorded value is not a number", name)))
    }

    /// Hook for the socket send path. Returns whether the caller should
    /// actually emit the bytes on the wire (never while replaying).
    pub fn socket_sendall(&mut self, data: &[u8]) -> Result<bool, Error> {
        match self.state {
            RecorderState::Inactive => Ok(true),
            RecorderState::Recording => {
                self.store("msg_sendall", Value::String(hex::encode(data)));
                Ok(true)
            }
            RecorderState::Replaying => {
                let recorded = self.unstore("msg_sendall")?;
                let recorded = decode_bytes("msg_sendall", &recorded)?;
                if recorded != data {
                    return Err(Error::Replay(format!(
                        "send diverges: got {} but recorded {}",
                        hex::encode(data),
                        hex::encode(recorded)
                    )));
                }
                Ok(false)
            }
        }
    }

    /// Hook for the socket receive path; recording side. `None` records an
    /// expired timeout so the replay sees it at the same point.
    pub fn trace_socket_recv(&mut self, data: Option<&[u8]>) -> Result<(), Error> {
        if self.state == RecorderState::Recording {
            let value = match data {
                Some(data) => Value::String(hex::encode(data)),
                None => Value::Null,
            };
            self.store("msg_recv", value);
        }
        Ok(())
    }

    /// Hook for the socket receive path; replay side. The outer `None`
    /// means the caller has to read from the real socket, the inner one
    /// replays a recorded timeout.
    pub fn inject_socket_recv(&mut self) -> Result<Option<Option<Vec<u8>>>, Error> {
        if self.state != RecorderState::Replaying {
            return Ok(None);
        }
        match self.unstore("msg_recv")? {
            Value::Null => Ok(Some(None)),
            recorded => decode_bytes("msg_recv", &recorded).map(|data| Some(Some(data))),
        }
    }

    pub fn serialize(&self, path: &Path) -> Result<(), Error> {
        if path.exists() {
            log::warn!("recording {} exists, not overwritten", path.display());
            return Ok(());
        }
        let map: BTreeMap<&String, Vec<&Value>> = self
            .data
            .iter()
            .map(|(name, list)| (name, list.iter().collect()))
            .collect();
        let text = serde_json::to_string_pretty(&map)
            .map_err(|err| Error::Io(err.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn deserialize(&mut self, path: &Path) -> Result<(), Error> {
        let text = fs::read_to_string(path)?;
        let map: BTreeMap<String, Vec<Value>> =
            serde_json::from_str(&text).map_err(|err| Error::Io(err.to_string()))?;
        self.data = map
            .into_iter()
            .map(|(name, list)| (name, list.into_iter().collect()))
            .collect();
        Ok(())
    }
}

fn decode_bytes(name: &str, value: &Value) -> Result<Vec<u8>, Error> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Replay(format!("\"{}\": recorded value is not hex", name)))?;
    hex::decode(text).map_err(|_| Error::Replay(format!("\"{}\": recorded hex is invalid", name)))
}

fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_is_transparent() {
        let mut rec = Recorder::new();
        assert_eq!(rec.inject_bytes("pms_rsa", vec![1, 2, 3]).unwrap(), vec![1, 2, 3]);
        assert!(rec.socket_sendall(b"hello").unwrap());
        assert_eq!(rec.inject_socket_recv().unwrap(), None);
    }

    #[test]
    fn record_then_replay_round_trip() {
        let mut rec = Recorder::new();
        rec.record();
        rec.trace_bytes("client_random", &[0xaa; 32]).unwrap();
        let key = rec.inject_bytes("ec_seed", vec![7; 32]).unwrap();
        assert_eq!(key, vec![7; 32]);
        assert!(rec.socket_sendall(b"\x16\x03\x01").unwrap());
        rec.trace_socket_recv(Some(b"\x16\x03\x03")).unwrap();
        rec.trace_socket_recv(None).unwrap();

        rec.replay();
        rec.trace_bytes("client_random", &[0xaa; 32]).unwrap();
        assert_eq!(rec.inject_bytes("ec_seed", vec![9; 32]).unwrap(), vec![7; 32]);
        assert!(!rec.socket_sendall(b"\x16\x03\x01").unwrap());
        assert_eq!(
            rec.inject_socket_recv().unwrap(),
            Some(Some(b"\x16\x03\x03".to_vec()))
        );
        assert_eq!(rec.inject_socket_recv().unwrap(), Some(None));
    }

    #[test]
    fn replay_detects_divergence() {
        let mut rec = Recorder::new();
        rec.record();
        rec.trace_bytes("master_secret", &[1; 48]).unwrap();
        rec.replay();
        let err = rec.trace_bytes("master_secret", &[2; 48]).unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }

    #[test]
    fn replay_detects_send_divergence() {
        let mut rec = Recorder::new();
        rec.record();
        assert!(rec.socket_sendall(b"abc").unwrap());
        rec.replay();
        let err = rec.socket_sendall(b"abd").unwrap_err();
        assert!(matches!(err, Error::Replay(_)));
    }

    #[test]
    fn exhausted_recording_fails() {
        let mut rec = Recorder::new();
        rec.replay();
        assert!(matches!(rec.inject_socket_recv(), Err(Error::Replay(_))));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");

        let mut rec = Recorder::new();
        rec.record();
        rec.trace_bytes("server_random", &[0x5a; 32]).unwrap();
        rec.trace_f64("timestamp", 1_650_000_000.25).unwrap();
        rec.trace_socket_recv(Some(&[0x16, 0x03, 0x03, 0x00, 0x01, 0x02])).unwrap();
        rec.serialize(&path).unwrap();

        let mut twin = Recorder::new();
        twin.deserialize(&path).unwrap();
        twin.replay();
        twin.trace_bytes("server_random", &[0x5a; 32]).unwrap();
        twin.trace_f64("timestamp", 1_650_000_000.25).unwrap();
        assert_eq!(
            twin.inject_socket_recv().unwrap(),
            Some(Some(vec![0x16, 0x03, 0x03, 0x00, 0x01, 0x02]))
        );
    }
}
