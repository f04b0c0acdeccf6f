use crate::error::{Result, TagTrailError};
use num_bigint::BigUint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Serde helper: byte strings as lowercase hex, no prefix.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper: a list of hex byte strings.
pub mod hex_bytes_vec {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let strings = Vec::<String>::deserialize(d)?;
        strings
            .into_iter()
            .map(|s| hex::decode(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde helper: arbitrary-precision scalars as decimal strings.
///
/// JSON numbers would silently lose precision past 2^53; the keyfile
/// schema therefore fixes one representation per field (hex for raw
/// bytes, decimal strings for scalars).
pub mod dec_biguint {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &BigUint, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(d)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal scalar: {}", s)))
    }
}

fn keyfile_path(dir: &Path) -> PathBuf {
    dir.join("keyfile.json")
}

fn load_from<T: DeserializeOwned>(dir: &Path) -> Result<T> {
    let path = keyfile_path(dir);
    let json = fs::read(&path).map_err(|e| {
        TagTrailError::Keyfile(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_slice(&json)?)
}

fn save_to<T: Serialize>(cfg: &T, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(cfg)?;
    fs::write(keyfile_path(dir), json)?;
    Ok(())
}

/// Baseline deployment: one shared AES key for all readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaselineConfig {
    pub dir: PathBuf,
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
    pub reader_id_size: usize,
}

impl BaselineConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        let cfg: Self = load_from(dir)?;
        if cfg.key.len() != 32 {
            return Err(TagTrailError::Keyfile(format!(
                "baseline key must be 32 bytes, got {}",
                cfg.key.len()
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        save_to(self, &self.dir)
    }
}

/// StepAuth issuer key pair (ECDSA P-256, SEC1 public / raw scalar).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterKey {
    #[serde(with = "hex_bytes")]
    pub public: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub private: Vec<u8>,
}

/// StepAuth per-reader ECIES key pair (secp256k1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepAuthReader {
    pub id: u32,
    #[serde(with = "hex_bytes")]
    pub public: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub private: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepAuthConfig {
    pub dir: PathBuf,
    pub master: MasterKey,
    pub reader_id_size: usize,
    pub tag_id_size: usize,
    pub readers: Vec<StepAuthReader>,
}

impl StepAuthConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        load_from(dir)
    }

    pub fn save(&self) -> Result<()> {
        save_to(self, &self.dir)
    }
}

/// Affine coordinates, decimal-string encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordPair {
    #[serde(with = "dec_biguint")]
    pub x: BigUint,
    #[serde(with = "dec_biguint")]
    pub y: BigUint,
}

/// Published short-Weierstrass curve parameters (secp160r1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurveSection {
    pub name: String,
    #[serde(with = "dec_biguint")]
    pub a: BigUint,
    #[serde(with = "dec_biguint")]
    pub b: BigUint,
    #[serde(with = "dec_biguint")]
    pub p: BigUint,
    #[serde(with = "dec_biguint")]
    pub n: BigUint,
    #[serde(rename = "Gx", with = "dec_biguint")]
    pub gx: BigUint,
    #[serde(rename = "Gy", with = "dec_biguint")]
    pub gy: BigUint,
    pub size: usize,
    pub n_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerReader {
    pub id: u32,
    #[serde(with = "dec_biguint")]
    pub a: BigUint,
}

/// Precomputed evaluation point `e·P` for one sanctioned path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidPathPoint {
    pub label: String,
    #[serde(with = "dec_biguint")]
    pub x: BigUint,
    #[serde(with = "dec_biguint")]
    pub y: BigUint,
}

/// Tracker manager configuration. `k` stays hex-shaped ASCII because the
/// HMAC is keyed with the string as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    pub dir: PathBuf,
    pub public: CoordPair,
    #[serde(with = "dec_biguint")]
    pub private: BigUint,
    pub curve: CurveSection,
    pub k: String,
    #[serde(with = "dec_biguint")]
    pub x0: BigUint,
    #[serde(with = "dec_biguint")]
    pub a0: BigUint,
    #[serde(rename = "P")]
    pub p_point: CoordPair,
    pub readers: Vec<TrackerReader>,
    pub valid_paths: Vec<ValidPathPoint>,
}

impl TrackerConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        load_from(dir)
    }

    pub fn save(&self) -> Result<()> {
        save_to(self, &self.dir)
    }
}

/// RFChain per-reader signing key. The raw scalar and its PKCS#8 DER
/// rendering both travel in the keyfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RfChainReader {
    pub id: u32,
    #[serde(with = "hex_bytes")]
    pub public: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub private: Vec<u8>,
    #[serde(rename = "private-DER", with = "hex_bytes")]
    pub private_der: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RfChainConfig {
    pub dir: PathBuf,
    #[serde(with = "hex_bytes")]
    pub k: Vec<u8>,
    pub curve: String,
    pub curvebytes: usize,
    #[serde(rename = "hashBytes")]
    pub hash_bytes: usize,
    pub readers: Vec<RfChainReader>,
}

impl RfChainConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        let cfg: Self = load_from(dir)?;
        if cfg.k.len() != 32 {
            return Err(TagTrailError::Keyfile(format!(
                "rfchain shared key must be 32 bytes, got {}",
                cfg.k.len()
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        save_to(self, &self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_keyfile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BaselineConfig {
            dir: dir.path().to_path_buf(),
            key: vec![0xab; 32],
            reader_id_size: 4,
        };
        cfg.save().unwrap();

        let restored = BaselineConfig::load(dir.path()).unwrap();
        assert_eq!(restored.key, cfg.key);
        assert_eq!(restored.reader_id_size, 4);
    }

    #[test]
    fn test_baseline_key_length_checked() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BaselineConfig {
            dir: dir.path().to_path_buf(),
            key: vec![0xab; 16],
            reader_id_size: 4,
        };
        cfg.save().unwrap();
        assert!(BaselineConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_scalar_precision_preserved() {
        // 161-bit scalar, larger than any f64-exact integer.
        let n = BigUint::parse_bytes(b"1461501637330902918203684832716283019655932542975", 10)
            .unwrap();
        let reader = TrackerReader { id: 0, a: n.clone() };
        let json = serde_json::to_string(&reader).unwrap();
        let back: TrackerReader = serde_json::from_str(&json).unwrap();
        assert_eq!(back.a, n);
    }

    #[test]
    fn test_rfchain_der_field_name() {
        let reader = RfChainReader {
            id: 1,
            public: vec![4, 1, 2],
            private: vec![9; 32],
            private_der: vec![0x30, 0x81],
        };
        let json = serde_json::to_string(&reader).unwrap();
        assert!(json.contains("\"private-DER\""));
    }
}
