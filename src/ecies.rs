use crate::error::{Result, TagTrailError, VerifyFailure};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes::Aes256;
use hkdf::Hkdf;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;

type Aes256EcbEnc = ecb::Encryptor<Aes256>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;

/// ECIES parameter set over secp256k1, threaded explicitly through every
/// call instead of living in process-global state.
///
/// The deployed configuration is AES-256-ECB with uncompressed ephemeral
/// and KDF points; the flags exist so the wire format is stated at the
/// call site rather than implied.
#[derive(Debug, Clone, Copy)]
pub struct EciesParams {
    /// Format of the ephemeral public key prepended to the ciphertext.
    pub compress_ephemeral_key: bool,
    /// Format of the points fed into the HKDF master secret.
    pub compress_hkdf_key: bool,
}

impl Default for EciesParams {
    fn default() -> Self {
        Self {
            compress_ephemeral_key: false,
            compress_hkdf_key: false,
        }
    }
}

impl EciesParams {
    fn ephemeral_len(&self) -> usize {
        if self.compress_ephemeral_key {
            33
        } else {
            65
        }
    }
}

/// HKDF-SHA256 over `eph_pub || shared_point`, empty salt and info.
fn derive_key(
    eph_pub: &PublicKey,
    shared: &k256::AffinePoint,
    params: &EciesParams,
) -> Result<[u8; 32]> {
    let mut master = Vec::with_capacity(130);
    master.extend_from_slice(eph_pub.to_encoded_point(params.compress_hkdf_key).as_bytes());
    master.extend_from_slice(shared.to_encoded_point(params.compress_hkdf_key).as_bytes());

    let hk = Hkdf::<Sha256>::new(None, &master);
    let mut okm = [0u8; 32];
    hk.expand(&[], &mut okm)
        .map_err(|e| TagTrailError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// Encrypts `plaintext` to a SEC1-encoded secp256k1 public key.
///
/// Output: ephemeral public key (per `params`) followed by the
/// AES-256-ECB/PKCS#7 body.
pub fn encrypt(recipient_sec1: &[u8], plaintext: &[u8], params: &EciesParams) -> Result<Vec<u8>> {
    let recipient = PublicKey::from_sec1_bytes(recipient_sec1)
        .map_err(|e| TagTrailError::Crypto(format!("bad recipient key: {}", e)))?;

    let eph_sk = SecretKey::random(&mut OsRng);
    let eph_pub = eph_sk.public_key();
    let shared = (recipient.to_projective() * *eph_sk.to_nonzero_scalar()).to_affine();
    let key = derive_key(&eph_pub, &shared, params)?;

    let cipher = Aes256EcbEnc::new_from_slice(&key)
        .map_err(|e| TagTrailError::Crypto(format!("ECB key setup failed: {}", e)))?;
    let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = eph_pub
        .to_encoded_point(params.compress_ephemeral_key)
        .as_bytes()
        .to_vec();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypts an ECIES bundle with a raw 32-byte secp256k1 secret.
///
/// A padding failure is an attacker-visible verification outcome, not a
/// fatal error: it is exactly what decrypting with the wrong reader key
/// produces.
pub fn decrypt(secret: &[u8], data: &[u8], params: &EciesParams) -> Result<Vec<u8>> {
    let eph_len = params.ephemeral_len();
    if data.len() <= eph_len {
        return Err(TagTrailError::TagContent(format!(
            "ECIES bundle must exceed {} bytes, got {}",
            eph_len,
            data.len()
        )));
    }
    let sk = SecretKey::from_slice(secret)
        .map_err(|e| TagTrailError::Crypto(format!("bad ECIES secret: {}", e)))?;
    let eph_pub = PublicKey::from_sec1_bytes(&data[..eph_len])
        .map_err(|e| TagTrailError::Crypto(format!("bad ephemeral key: {}", e)))?;

    let shared = (eph_pub.to_projective() * *sk.to_nonzero_scalar()).to_affine();
    let key = derive_key(&eph_pub, &shared, params)?;

    let cipher = Aes256EcbDec::new_from_slice(&key)
        .map_err(|e| TagTrailError::Crypto(format!("ECB key setup failed: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&data[eph_len..])
        .map_err(|_| TagTrailError::VerificationFailed(VerifyFailure::BadPadding))
}

/// Fresh secp256k1 key pair as (raw 32-byte secret, SEC1 uncompressed
/// public).
pub fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
    let sk = SecretKey::random(&mut OsRng);
    let public = sk.public_key().to_encoded_point(false).as_bytes().to_vec();
    (sk.to_bytes().to_vec(), public)
}
