use crate::curve::{to_fixed_be, Point, WeierstrassCurve};
use crate::error::{Result, TagTrailError, VerifyFailure};
use crate::keyfile::{CoordPair, TrackerConfig, TrackerReader, ValidPathPoint};
use crate::protocols::Scheme;
use crate::tag::{Tag, TagLock};
use hmac::{Hmac, Mac};
use num_bigint::{BigUint, RandBigInt};
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Tracker: the traversed path is a polynomial evaluation over
/// secp160r1, advanced homomorphically by each reader on ElGamal
/// ciphertexts. The manager decrypts and compares against precomputed
/// evaluations of the sanctioned paths.
///
/// Tag secret: `(E(ID), E(d·P), E((d·a0)·P))` with `d = HMAC(k, ID)`.
pub struct Tracker {
    config: TrackerConfig,
    curve: WeierstrassCurve,
}

/// The six tag points: two ElGamal components each for ID, HMAC point
/// and polynomial point.
struct TagPoints {
    id: (Point, Point),
    hash: (Point, Point),
    poly: (Point, Point),
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let curve = WeierstrassCurve::from_section(&config.curve);
        Self { config, curve }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::new(TrackerConfig::load(dir)?))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Generates the ElGamal key pair, the HMAC key, the evaluation
    /// point x0, per-reader coefficients, and the evaluation of every
    /// sanctioned path: `e = (a0·x0^L + Σ a_i·x0^(L-1-i)) mod n`, stored
    /// as `e·P`.
    pub fn generate_reader_configs(
        nr_readers: usize,
        valid_paths: &[Vec<u32>],
        dir: &Path,
    ) -> Result<TrackerConfig> {
        let curve = WeierstrassCurve::secp160r1();
        let (pri_key, pub_key) = curve.gen_keypair();

        let mut k = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut k);

        // any x is a usable evaluation point except 0 and 1
        let two = BigUint::from(2u8);
        let x0 = rand::thread_rng().gen_biguint_range(&two, &curve.n);
        let a0 = rand::thread_rng().gen_biguint_below(&curve.n);
        let p_point = curve.generator();

        let mut readers = Vec::with_capacity(nr_readers);
        for id in 0..nr_readers {
            readers.push(TrackerReader {
                id: id as u32,
                a: rand::thread_rng().gen_biguint_below(&curve.n),
            });
        }

        let mut path_points = Vec::with_capacity(valid_paths.len());
        for path in valid_paths {
            for reader in path {
                super::check_reader_range(*reader, nr_readers)?;
            }
            let eval = eval_path(&a0, &x0, path, &readers, &curve.n);
            let point = curve.mul(&eval, &p_point);
            let (x, y) = point
                .coords()
                .ok_or_else(|| TagTrailError::Crypto("path evaluated to infinity".to_string()))?;
            path_points.push(ValidPathPoint {
                label: path_label(path),
                x: x.clone(),
                y: y.clone(),
            });
        }

        let (pub_x, pub_y) = pub_key
            .coords()
            .ok_or_else(|| TagTrailError::Crypto("public key at infinity".to_string()))?;
        let (gx, gy) = p_point
            .coords()
            .ok_or_else(|| TagTrailError::Crypto("generator at infinity".to_string()))?;

        let config = TrackerConfig {
            dir: dir.to_path_buf(),
            public: CoordPair {
                x: pub_x.clone(),
                y: pub_y.clone(),
            },
            private: pri_key,
            curve: curve.to_section(),
            k: hex::encode(k),
            x0,
            a0,
            p_point: CoordPair {
                x: gx.clone(),
                y: gy.clone(),
            },
            readers,
            valid_paths: path_points,
        };
        config.save()?;
        Ok(config)
    }

    /// Draws a fresh random ID point, derives `d = HMAC(k, ID)` and
    /// encrypts `(ID, d·P, (d·a0)·P)` to the manager's key.
    pub fn generate_tag_secret(&self, tag_id: u32) -> Result<Tag> {
        let (_, id_point) = self.curve.gen_keypair();
        let digest = self.hmac_digest(&id_point)?;

        let p_point = self.p_point();
        let hash_point = self.curve.mul(&digest, &p_point);
        let poly_scalar = (&digest * &self.config.a0) % &self.curve.n;
        let poly_point = self.curve.mul(&poly_scalar, &p_point);

        let pub_key = self.pub_key();
        let points = TagPoints {
            id: self.curve.elgamal_encrypt(&id_point, &pub_key),
            hash: self.curve.elgamal_encrypt(&hash_point, &pub_key),
            poly: self.curve.elgamal_encrypt(&poly_point, &pub_key),
        };

        let content = self.points_to_content(&points)?;
        log::debug!(
            "tag content length: {}, content: {}",
            content.len(),
            hex::encode(&content)
        );
        let tag = Tag::new(tag_id, content, Scheme::Tracker);
        tag.save(&self.config.dir)?;
        Ok(tag)
    }

    /// Homomorphic advance `Q ← x0·Q + a_i·H`, then rerandomization of
    /// all three ciphertexts against linking attacks.
    pub fn update_tag(&self, reader: u32, tag: &mut Tag) -> Result<()> {
        let _lock = TagLock::acquire(&self.config.dir, tag.id)?;
        let ai = &self
            .config
            .readers
            .iter()
            .find(|r| r.id == reader)
            .ok_or_else(|| {
                TagTrailError::Keyfile(format!("reader {} is not in the keyfile", reader))
            })?
            .a;

        let points = self.content_to_points(&tag.content)?;
        let x0 = &self.config.x0;

        let poly = (
            self.curve.add(
                &self.curve.mul(x0, &points.poly.0),
                &self.curve.mul(ai, &points.hash.0),
            ),
            self.curve.add(
                &self.curve.mul(x0, &points.poly.1),
                &self.curve.mul(ai, &points.hash.1),
            ),
        );

        let rerandomized = TagPoints {
            id: self.rerandomize(&points.id),
            hash: self.rerandomize(&points.hash),
            poly: self.rerandomize(&poly),
        };

        let content = self.points_to_content(&rerandomized)?;
        tag.update_content(reader, content);
        tag.save(&self.config.dir)
    }

    /// Decrypts the three points, recomputes the HMAC and matches the
    /// polynomial evaluation against every sanctioned path. Returns the
    /// first matching label.
    pub fn verify_tag(&self, tag: &Tag) -> Result<String> {
        let points = self.content_to_points(&tag.content)?;
        let pri = &self.config.private;

        let id_point = self.curve.elgamal_decrypt(pri, &points.id.0, &points.id.1);
        let hash_point = self.curve.elgamal_decrypt(pri, &points.hash.0, &points.hash.1);

        let digest = self.hmac_digest(&id_point)?;
        let expected_hash = self.curve.mul(&digest, &self.p_point());
        if hash_point != expected_hash {
            log::info!("HMAC could not be verified for tag {}", tag.id);
            return Err(TagTrailError::VerificationFailed(VerifyFailure::HmacMismatch));
        }

        let poly_point = self.curve.elgamal_decrypt(pri, &points.poly.0, &points.poly.1);
        for path in &self.config.valid_paths {
            let eval_point = Point::affine(path.x.clone(), path.y.clone());
            if self.curve.mul(&digest, &eval_point) == poly_point {
                log::info!("match found: tag {} followed path {}", tag.id, path.label);
                return Ok(path.label.clone());
            }
        }
        log::info!("no match found for tag {}", tag.id);
        Err(TagTrailError::VerificationFailed(VerifyFailure::NoPathMatch))
    }

    /// `d = HMAC_SHA256(k, ID.x || ID.y)` as an integer. The key is the
    /// hex-shaped ASCII string exactly as stored in the keyfile.
    fn hmac_digest(&self, id_point: &Point) -> Result<BigUint> {
        let (x, y) = id_point
            .coords()
            .ok_or_else(|| TagTrailError::Crypto("ID point at infinity".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(self.config.k.as_bytes())
            .map_err(|e| TagTrailError::Crypto(format!("HMAC key setup failed: {}", e)))?;
        mac.update(&to_fixed_be(x, self.curve.size)?);
        mac.update(&to_fixed_be(y, self.curve.size)?);
        Ok(BigUint::from_bytes_be(&mac.finalize().into_bytes()))
    }

    /// Fresh encryption of the identity added onto a ciphertext pair.
    fn rerandomize(&self, pair: &(Point, Point)) -> (Point, Point) {
        let r = self.curve.random_scalar();
        (
            self.curve.add(&self.curve.mul(&r, &self.p_point()), &pair.0),
            self.curve.add(&self.curve.mul(&r, &self.pub_key()), &pair.1),
        )
    }

    fn p_point(&self) -> Point {
        Point::affine(self.config.p_point.x.clone(), self.config.p_point.y.clone())
    }

    fn pub_key(&self) -> Point {
        Point::affine(self.config.public.x.clone(), self.config.public.y.clone())
    }

    fn points_to_content(&self, points: &TagPoints) -> Result<Vec<u8>> {
        let ordered = [
            &points.id.0,
            &points.id.1,
            &points.hash.0,
            &points.hash.1,
            &points.poly.0,
            &points.poly.1,
        ];
        let mut content = Vec::with_capacity(12 * self.curve.size);
        for point in ordered {
            content.extend_from_slice(&self.curve.point_to_bytes(point)?);
        }
        Ok(content)
    }

    fn content_to_points(&self, content: &[u8]) -> Result<TagPoints> {
        let expected = 12 * self.curve.size;
        if content.len() != expected {
            return Err(TagTrailError::TagContent(format!(
                "tag content should be {} bytes, but it is {}",
                expected,
                content.len()
            )));
        }
        let chunk = 2 * self.curve.size;
        let parse = |i: usize| self.curve.point_from_bytes(&content[i * chunk..(i + 1) * chunk]);
        Ok(TagPoints {
            id: (parse(0)?, parse(1)?),
            hash: (parse(2)?, parse(3)?),
            poly: (parse(4)?, parse(5)?),
        })
    }
}

fn eval_path(
    a0: &BigUint,
    x0: &BigUint,
    path: &[u32],
    readers: &[TrackerReader],
    n: &BigUint,
) -> BigUint {
    let path_len = BigUint::from(path.len());
    let mut eval = (a0 * x0.modpow(&path_len, n)) % n;
    for (i, reader) in path.iter().enumerate() {
        let exp = BigUint::from(path.len() - 1 - i);
        let ai = &readers[*reader as usize].a;
        eval = (eval + ai * x0.modpow(&exp, n)) % n;
    }
    eval
}

fn path_label(path: &[u32]) -> String {
    let ids: Vec<String> = path.iter().map(|r| r.to_string()).collect();
    format!("[{}]", ids.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(valid_paths: &[Vec<u32>]) -> (tempfile::TempDir, Tracker) {
        let dir = tempfile::tempdir().unwrap();
        let config = Tracker::generate_reader_configs(2, valid_paths, dir.path()).unwrap();
        (dir, Tracker::new(config))
    }

    #[test]
    fn test_sanctioned_paths_match() {
        let (_dir, engine) = engine(&[vec![0, 1], vec![1, 0]]);

        let mut tag = engine.generate_tag_secret(1).unwrap();
        engine.update_tag(0, &mut tag).unwrap();
        engine.update_tag(1, &mut tag).unwrap();
        assert_eq!(engine.verify_tag(&tag).unwrap(), "[0,1]");

        let mut tag = engine.generate_tag_secret(2).unwrap();
        engine.update_tag(1, &mut tag).unwrap();
        engine.update_tag(0, &mut tag).unwrap();
        assert_eq!(engine.verify_tag(&tag).unwrap(), "[1,0]");
    }

    #[test]
    fn test_unsanctioned_path_has_no_match() {
        let (_dir, engine) = engine(&[vec![0, 1], vec![1, 0]]);
        let mut tag = engine.generate_tag_secret(3).unwrap();
        engine.update_tag(0, &mut tag).unwrap();
        engine.update_tag(0, &mut tag).unwrap();

        let err = engine.verify_tag(&tag).unwrap_err();
        assert!(matches!(
            err,
            TagTrailError::VerificationFailed(VerifyFailure::NoPathMatch)
        ));
    }

    #[test]
    fn test_fresh_tag_matches_nothing() {
        let (_dir, engine) = engine(&[vec![0, 1]]);
        let tag = engine.generate_tag_secret(4).unwrap();
        assert!(engine.verify_tag(&tag).unwrap_err().is_verification_failure());
    }

    #[test]
    fn test_swapped_ciphertexts_fail_hmac() {
        let (_dir, engine) = engine(&[vec![0, 1]]);
        let mut tag = engine.generate_tag_secret(5).unwrap();

        // swap the ID and HMAC ciphertext pairs: still valid points,
        // but the recomputed digest no longer matches
        let pair = 2 * engine.curve.size * 2;
        let (left, right) = tag.content.split_at_mut(pair);
        left.swap_with_slice(&mut right[..pair]);

        let err = engine.verify_tag(&tag).unwrap_err();
        assert!(matches!(
            err,
            TagTrailError::VerificationFailed(VerifyFailure::HmacMismatch)
        ));
    }

    #[test]
    fn test_flipped_coordinate_is_fatal_or_rejected() {
        let (_dir, engine) = engine(&[vec![0, 1]]);
        let mut tag = engine.generate_tag_secret(6).unwrap();
        tag.content[7] ^= 0x20;

        assert!(engine.verify_tag(&tag).is_err());
    }

    #[test]
    fn test_content_length_checked() {
        let (_dir, engine) = engine(&[vec![0, 1]]);
        let mut tag = engine.generate_tag_secret(7).unwrap();
        tag.content.pop();

        let err = engine.verify_tag(&tag).unwrap_err();
        assert!(!err.is_verification_failure());
    }

    #[test]
    fn test_path_label_format() {
        assert_eq!(path_label(&[0, 1]), "[0,1]");
        assert_eq!(path_label(&[2]), "[2]");
    }

    #[test]
    fn test_eval_path_horner_form() {
        let curve = WeierstrassCurve::secp160r1();
        let readers = vec![
            TrackerReader { id: 0, a: BigUint::from(3u8) },
            TrackerReader { id: 1, a: BigUint::from(5u8) },
        ];
        let a0 = BigUint::from(7u8);
        let x0 = BigUint::from(2u8);
        // 7·2² + 3·2 + 5 = 39
        let eval = eval_path(&a0, &x0, &[0, 1], &readers, &curve.n);
        assert_eq!(eval, BigUint::from(39u8));
    }
}
