pub mod baseline;
pub mod rfchain;
pub mod stepauth;
pub mod tracker;

use crate::error::{Result, TagTrailError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol mode label carried on every tag and keyfile.
///
/// Callers route generate/update/verify through this seam instead of
/// matching label strings themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Baseline,
    StepAuth,
    Tracker,
    RfChain,
}

impl Scheme {
    pub const ALL: [Scheme; 4] = [
        Scheme::Baseline,
        Scheme::StepAuth,
        Scheme::Tracker,
        Scheme::RfChain,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Scheme::Baseline => "baseline",
            Scheme::StepAuth => "stepauth",
            Scheme::Tracker => "tracker",
            Scheme::RfChain => "rfchain",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Scheme {
    type Err = TagTrailError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(Scheme::Baseline),
            "stepauth" => Ok(Scheme::StepAuth),
            "tracker" => Ok(Scheme::Tracker),
            "rfchain" => Ok(Scheme::RfChain),
            other => Err(TagTrailError::UnknownScheme(other.to_string())),
        }
    }
}

/// Big-endian identifier encoding at the keyfile's configured width.
pub(crate) fn id_to_bytes(id: u32, size: usize) -> Vec<u8> {
    let raw = id.to_be_bytes();
    if size >= raw.len() {
        let mut out = vec![0u8; size - raw.len()];
        out.extend_from_slice(&raw);
        out
    } else {
        raw[raw.len() - size..].to_vec()
    }
}

/// Readers are numbered 0..nr_readers in every keyfile.
pub(crate) fn check_reader_range(reader: u32, nr_readers: usize) -> Result<()> {
    if (reader as usize) < nr_readers {
        Ok(())
    } else {
        Err(TagTrailError::Keyfile(format!(
            "reader {} does not exist, keyfile has {} readers",
            reader, nr_readers
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_labels_round_trip() {
        for scheme in Scheme::ALL {
            assert_eq!(scheme.label().parse::<Scheme>().unwrap(), scheme);
        }
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let err = "blockchain".parse::<Scheme>().unwrap_err();
        assert!(matches!(err, TagTrailError::UnknownScheme(_)));
    }

    #[test]
    fn test_scheme_serde_lowercase() {
        let json = serde_json::to_string(&Scheme::RfChain).unwrap();
        assert_eq!(json, "\"rfchain\"");
        let back: Scheme = serde_json::from_str("\"stepauth\"").unwrap();
        assert_eq!(back, Scheme::StepAuth);
    }

    #[test]
    fn test_reader_range() {
        assert!(check_reader_range(2, 3).is_ok());
        assert!(check_reader_range(3, 3).is_err());
    }

    #[test]
    fn test_id_to_bytes_widths() {
        assert_eq!(id_to_bytes(7, 4), vec![0, 0, 0, 7]);
        assert_eq!(id_to_bytes(0x0102, 6), vec![0, 0, 0, 0, 1, 2]);
        assert_eq!(id_to_bytes(0x01020304, 2), vec![3, 4]);
    }
}
