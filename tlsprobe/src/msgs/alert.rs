use crate::codec::{Codec, DecodeError, Reader};
use crate::msgs::enums::{AlertDescription, AlertLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertMessagePayload {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Codec for AlertMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.level.encode(bytes);
        self.description.encode(bytes);
    }

    fn read(reader: &mut Reader) -> Result<Self, DecodeError> {
        let level = AlertLevel::read(reader)?;
        let description = AlertDescription::read(reader)?;
        Ok(AlertMessagePayload { level, description })
    }
}
