//! Raw records read from a logical replication slot.

use serde::Serialize;
use std::fmt;

/// A log sequence number as reported by the slot.
///
/// The token is opaque to the engine: it is only echoed back to the slot when
/// acknowledging. [`Lsn::position`] decodes the PostgreSQL `X/Y` notation for
/// callers that need to order positions themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Lsn(String);

impl Lsn {
    /// Wraps a textual LSN.
    pub fn new(lsn: impl Into<String>) -> Self {
        Self(lsn.into())
    }

    /// Builds the `X/Y` text form of a 64-bit WAL position.
    pub fn from_position(position: u64) -> Self {
        Self(format!("{:X}/{:X}", position >> 32, position & 0xFFFF_FFFF))
    }

    /// Returns the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the `X/Y` hexadecimal notation into a 64-bit position.
    ///
    /// Returns `None` if the token is not in that notation.
    pub fn position(&self) -> Option<u64> {
        let (hi, lo) = self.0.split_once('/')?;
        let hi = u32::from_str_radix(hi, 16).ok()?;
        let lo = u32::from_str_radix(lo, 16).ok()?;
        Some((u64::from(hi) << 32) | u64::from(lo))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One decoded-but-unconsumed record of a replication slot.
///
/// Identity is the full `(lsn, xid, data)` triple: several records of one
/// transaction may share an LSN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WalRecord {
    /// Position of the record in the WAL.
    pub lsn: Lsn,
    /// Transaction the record belongs to.
    pub xid: String,
    /// Raw text produced by the output plugin.
    pub data: String,
}

impl WalRecord {
    /// Creates a record.
    pub fn new(lsn: Lsn, xid: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            lsn,
            xid: xid.into(),
            data: data.into(),
        }
    }
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lsn, self.xid, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_position_roundtrip() {
        let lsn = Lsn::new("16/B374D848");
        assert_eq!(lsn.position(), Some(0x16_B374_D848));
        assert_eq!(Lsn::from_position(0x16_B374_D848), lsn);
    }

    #[test]
    fn lsn_position_rejects_other_notation() {
        assert_eq!(Lsn::new("12345").position(), None);
        assert_eq!(Lsn::new("zz/1").position(), None);
    }

    #[test]
    fn record_serializes_lsn_as_string() {
        let record = WalRecord::new(Lsn::new("0/1A"), "731", "BEGIN 731");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"lsn":"0/1A","xid":"731","data":"BEGIN 731"}"#);
    }
}
