use crate::error::{Result, TagTrailError, VerifyFailure};
use crate::keyfile::{RfChainConfig, RfChainReader};
use crate::protocols::Scheme;
use crate::tag::{Tag, TagLock};
use crate::tagdb::TagDb;
use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyInit};
use aes::Aes256;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::Aead;
use aes_gcm::{AesGcm, Nonce};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;

// GCM with the protocol's 16-byte nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const ID_BYTES: usize = 4;
const F_BYTES: usize = 4;
const PWD_BYTES: usize = 8;
const R_BYTES: usize = 4;
const BLF_BYTES: usize = 4;
const INDEX_BYTES: usize = 2;
const H_BYTES: usize = ID_BYTES + F_BYTES + PWD_BYTES + R_BYTES + INDEX_BYTES; // 22
const M_BYTES: usize = 2 + ID_BYTES + BLF_BYTES; // 10
const SIG_BYTES: usize = 64;
const READER_MSG_BYTES: usize = H_BYTES + M_BYTES + SIG_BYTES; // 96
const NONCE_BYTES: usize = 16;
const GCM_TAG_BYTES: usize = 16;
const HASH_BYTES: usize = 32;
const CONTENT_BYTES: usize =
    ID_BYTES + NONCE_BYTES + GCM_TAG_BYTES + READER_MSG_BYTES + SIG_BYTES; // 196

/// Everything `verify_tag` recovers from a valid offline envelope.
#[derive(Debug, Clone)]
pub struct ChainPayload {
    pub id: Vec<u8>,
    pub h: Vec<u8>,
    pub m: Vec<u8>,
    pub s: Vec<u8>,
    pub a: Vec<u8>,
    pub index: u16,
}

/// RF-Chain: the tag carries an offline envelope
/// `ID || Enc_k(h_i, m, S) || a_i` whose `a_i` is a running ECDSA
/// signature chain, while each step's online secret
/// `b_i = a_{i-1} ⊕ SHA256(h_i)` lives in an external table keyed by
/// `ID_i = AES-ECB(SHA256(h_i), pad16(ID))`. Verification walks the
/// chain backward through the online records.
pub struct RfChain {
    config: RfChainConfig,
}

impl RfChain {
    pub fn new(config: RfChainConfig) -> Self {
        Self { config }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::new(RfChainConfig::load(dir)?))
    }

    pub fn config(&self) -> &RfChainConfig {
        &self.config
    }

    /// Shared 32-byte key plus one P-256 signing pair per reader; the
    /// online table is emptied for the new deployment.
    pub fn generate_reader_configs(
        nr_readers: usize,
        _valid_paths: &[Vec<u32>],
        dir: &Path,
        db: &TagDb,
    ) -> Result<RfChainConfig> {
        let mut k = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut k);

        let mut readers = Vec::with_capacity(nr_readers);
        for id in 0..nr_readers {
            let secret = p256::SecretKey::random(&mut OsRng);
            let signing = SigningKey::from(&secret);
            let verifying = VerifyingKey::from(&signing);
            let der = secret
                .to_pkcs8_der()
                .map_err(|e| TagTrailError::Crypto(format!("DER export failed: {}", e)))?;
            readers.push(RfChainReader {
                id: id as u32,
                public: verifying.to_encoded_point(false).as_bytes().to_vec(),
                private: signing.to_bytes().to_vec(),
                private_der: der.as_bytes().to_vec(),
            });
        }

        let config = RfChainConfig {
            dir: dir.to_path_buf(),
            k,
            curve: "p256".to_string(),
            curvebytes: 32,
            hash_bytes: HASH_BYTES,
            readers,
        };
        config.save()?;
        db.reset()?;
        Ok(config)
    }

    /// Initializes a tag: draws the secret fields, anchors the chain in
    /// `a_0 = SHA256(ID || f || pwd || r)` and signs it, seals the shared
    /// message and records the first online secret.
    pub fn generate_tag_secret(&self, db: &TagDb, reader: u32, tag_id: u32) -> Result<Tag> {
        super::check_reader_range(reader, self.config.readers.len())?;
        let signer = self.signing_key(reader)?;

        let mut pwd = [0u8; PWD_BYTES];
        let mut r = [0u8; R_BYTES];
        let mut id = [0u8; ID_BYTES];
        let mut f = [0u8; F_BYTES];
        let mut blf = [0u8; BLF_BYTES];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut pwd);
        rng.fill_bytes(&mut r);
        rng.fill_bytes(&mut id);
        rng.fill_bytes(&mut f);
        rng.fill_bytes(&mut blf);
        let index: u16 = 1;

        let mut h1 = Vec::with_capacity(H_BYTES);
        h1.extend_from_slice(&id);
        h1.extend_from_slice(&f);
        h1.extend_from_slice(&pwd);
        h1.extend_from_slice(&r);
        h1.extend_from_slice(&index.to_be_bytes());

        let mut m = Vec::with_capacity(M_BYTES);
        m.extend_from_slice(&(reader as u16).to_be_bytes());
        m.extend_from_slice(&id);
        m.extend_from_slice(&blf);
        let s: Signature = signer.sign(&m);

        log::debug!("generating a message for h: {}, m: {}", hex::encode(&h1), hex::encode(&m));

        // chain anchor and its first signature
        let a0: [u8; HASH_BYTES] = Sha256::digest(&h1[..H_BYTES - INDEX_BYTES]).into();
        let a1: Signature = signer.sign(&a0);
        let k1: [u8; HASH_BYTES] = Sha256::digest(&h1).into();

        let mut reader_msg = Vec::with_capacity(READER_MSG_BYTES);
        reader_msg.extend_from_slice(&h1);
        reader_msg.extend_from_slice(&m);
        reader_msg.extend_from_slice(&s.to_bytes());
        let (nonce, gcm_tag, ciphertext) = self.seal(&reader_msg)?;

        let b1 = hex::encode(xor_tail(&a0, &k1));
        let id1 = hex::encode(derive_online_id(&k1, &id)?);

        let mut content = Vec::with_capacity(CONTENT_BYTES);
        content.extend_from_slice(&id);
        content.extend_from_slice(&nonce);
        content.extend_from_slice(&gcm_tag);
        content.extend_from_slice(&ciphertext);
        content.extend_from_slice(&a1.to_bytes());

        let mut tag = Tag::new(tag_id, content, Scheme::RfChain);
        tag.update_online_storage(reader, &id1, b1.clone());
        tag.save(&self.config.dir)?;
        db.insert(&id1, &b1, reader)?;
        Ok(tag)
    }

    /// Extends the chain by one step: verifies the whole tag, signs the
    /// previous `a_i`, advances the index inside `h`, and stores the new
    /// online secret.
    pub fn update_tag(&self, db: &TagDb, reader: u32, tag: &mut Tag) -> Result<()> {
        super::check_reader_range(reader, self.config.readers.len())?;
        let _lock = TagLock::acquire(&self.config.dir, tag.id)?;
        let payload = self.verify_tag(db, tag, 0)?;

        let signer = self.signing_key(reader)?;
        let a_next: Signature = signer.sign(&payload.a);
        log::debug!("new a: {}", hex::encode(a_next.to_bytes()));

        let next_index = payload.index + 1;
        let mut h_next = payload.h[..H_BYTES - INDEX_BYTES].to_vec();
        h_next.extend_from_slice(&next_index.to_be_bytes());
        let k_next: [u8; HASH_BYTES] = Sha256::digest(&h_next).into();

        // a_i is 64 bytes, the key hash 32: the hash is zero-extended on
        // the high side, i.e. only the trailing half is masked. This
        // width mismatch is part of the scheme under study and is kept
        // verbatim.
        let b_next = hex::encode(xor_tail(&payload.a, &k_next));
        let id_next = hex::encode(derive_online_id(&k_next, &payload.id)?);

        let mut reader_msg = Vec::with_capacity(READER_MSG_BYTES);
        reader_msg.extend_from_slice(&h_next);
        reader_msg.extend_from_slice(&payload.m);
        reader_msg.extend_from_slice(&payload.s);
        let (nonce, gcm_tag, ciphertext) = self.seal(&reader_msg)?;

        let mut content = Vec::with_capacity(CONTENT_BYTES);
        content.extend_from_slice(&payload.id);
        content.extend_from_slice(&nonce);
        content.extend_from_slice(&gcm_tag);
        content.extend_from_slice(&ciphertext);
        content.extend_from_slice(&a_next.to_bytes());

        tag.update_online_storage(reader, &id_next, b_next.clone());
        tag.update_content(reader, content);
        tag.save(&self.config.dir)?;
        db.insert(&id_next, &b_next, reader)?;
        Ok(())
    }

    /// Verifies the offline envelope and walks the signature chain
    /// backward through the online table. `depth` 0 walks the full
    /// chain; `depth` d checks the most recent d steps.
    pub fn verify_tag(&self, db: &TagDb, tag: &Tag, depth: usize) -> Result<ChainPayload> {
        if tag.content.len() != CONTENT_BYTES {
            return Err(TagTrailError::TagContent(format!(
                "offline secret must be {} bytes, got {}",
                CONTENT_BYTES,
                tag.content.len()
            )));
        }
        let id = &tag.content[..ID_BYTES];
        let nonce = &tag.content[ID_BYTES..ID_BYTES + NONCE_BYTES];
        let gcm_tag = &tag.content[ID_BYTES + NONCE_BYTES..ID_BYTES + NONCE_BYTES + GCM_TAG_BYTES];
        let ciphertext = &tag.content
            [ID_BYTES + NONCE_BYTES + GCM_TAG_BYTES..CONTENT_BYTES - SIG_BYTES];
        let a = &tag.content[CONTENT_BYTES - SIG_BYTES..];

        let plaintext = self.open(nonce, gcm_tag, ciphertext)?;
        let h = &plaintext[..H_BYTES];
        let f = &plaintext[ID_BYTES..ID_BYTES + F_BYTES];
        let pwd = &plaintext[ID_BYTES + F_BYTES..ID_BYTES + F_BYTES + PWD_BYTES];
        let r = &plaintext[ID_BYTES + F_BYTES + PWD_BYTES..H_BYTES - INDEX_BYTES];
        let m = &plaintext[H_BYTES..H_BYTES + M_BYTES];
        let s = &plaintext[H_BYTES + M_BYTES..READER_MSG_BYTES];
        let index = u16::from_be_bytes([h[H_BYTES - 2], h[H_BYTES - 1]]);
        log::debug!(
            "found tag with index {}, h: {}, m: {}",
            index,
            hex::encode(h),
            hex::encode(m)
        );

        let lowest = if depth == 0 {
            1
        } else {
            std::cmp::max(1, index.saturating_sub(depth as u16 - 1))
        };

        let mut a_i = a.to_vec();
        for i in (lowest..=index).rev() {
            let mut h_i = h[..H_BYTES - INDEX_BYTES].to_vec();
            h_i.extend_from_slice(&i.to_be_bytes());
            let k_i: [u8; HASH_BYTES] = Sha256::digest(&h_i).into();
            let id_i = hex::encode(derive_online_id(&k_i, id)?);

            let secret = db.lookup(&id_i)?;
            let verifier = self.verifying_key(secret.reader)?;
            let width = if i == 1 { HASH_BYTES } else { SIG_BYTES };
            let a_prev = recover_chain_value(&secret.b, &k_i, width)?;

            let signature = Signature::from_slice(&a_i).map_err(|_| {
                TagTrailError::VerificationFailed(VerifyFailure::SignatureInvalid)
            })?;
            if verifier.verify(&a_prev, &signature).is_err() {
                log::info!("chain signature at step {} of tag {} is invalid", i, tag.id);
                return Err(TagTrailError::VerificationFailed(
                    VerifyFailure::SignatureInvalid,
                ));
            }

            if i == 1 {
                // the anchor must be the hash of the tag's secret fields
                let mut anchor = Vec::with_capacity(H_BYTES - INDEX_BYTES);
                anchor.extend_from_slice(id);
                anchor.extend_from_slice(f);
                anchor.extend_from_slice(pwd);
                anchor.extend_from_slice(r);
                let expected: [u8; HASH_BYTES] = Sha256::digest(&anchor).into();
                if a_prev != expected {
                    log::info!("could not verify the chain anchor of tag {}", tag.id);
                    return Err(TagTrailError::VerificationFailed(
                        VerifyFailure::ChainAnchorMismatch,
                    ));
                }
            } else {
                a_i = a_prev;
            }
        }

        // producer signature over m holds across all updates
        let producer = u16::from_be_bytes([m[0], m[1]]) as u32;
        let verifier = self.verifying_key(producer)?;
        let signature = Signature::from_slice(s).map_err(|_| {
            TagTrailError::VerificationFailed(VerifyFailure::SignatureInvalid)
        })?;
        if verifier.verify(m, &signature).is_err() {
            log::info!("producer signature of tag {} is invalid", tag.id);
            return Err(TagTrailError::VerificationFailed(
                VerifyFailure::SignatureInvalid,
            ));
        }

        log::debug!("successful verification of tag {}", tag.id);
        Ok(ChainPayload {
            id: id.to_vec(),
            h: h.to_vec(),
            m: m.to_vec(),
            s: s.to_vec(),
            a: a.to_vec(),
            index,
        })
    }

    fn seal(&self, reader_msg: &[u8]) -> Result<([u8; NONCE_BYTES], Vec<u8>, Vec<u8>)> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let cipher = Aes256Gcm16::new_from_slice(&self.config.k)
            .map_err(|e| TagTrailError::Crypto(format!("GCM key setup failed: {}", e)))?;
        let sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&nonce), reader_msg)
            .map_err(|e| TagTrailError::Crypto(format!("GCM encryption failed: {}", e)))?;
        let (ciphertext, gcm_tag) = sealed.split_at(sealed.len() - GCM_TAG_BYTES);
        Ok((nonce, gcm_tag.to_vec(), ciphertext.to_vec()))
    }

    fn open(&self, nonce: &[u8], gcm_tag: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm16::new_from_slice(&self.config.k)
            .map_err(|e| TagTrailError::Crypto(format!("GCM key setup failed: {}", e)))?;
        let mut sealed = ciphertext.to_vec();
        sealed.extend_from_slice(gcm_tag);
        cipher
            .decrypt(Nonce::<U16>::from_slice(nonce), sealed.as_ref())
            .map_err(|_| TagTrailError::VerificationFailed(VerifyFailure::AeadMismatch))
    }

    fn reader(&self, reader: u32) -> Result<&RfChainReader> {
        self.config
            .readers
            .iter()
            .find(|r| r.id == reader)
            .ok_or_else(|| {
                TagTrailError::VerificationFailed(VerifyFailure::UnknownReader { reader })
            })
    }

    fn signing_key(&self, reader: u32) -> Result<SigningKey> {
        SigningKey::from_slice(&self.reader(reader)?.private)
            .map_err(|e| TagTrailError::Keyfile(format!("bad private key: {}", e)))
    }

    fn verifying_key(&self, reader: u32) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.reader(reader)?.public)
            .map_err(|e| TagTrailError::Keyfile(format!("bad public key: {}", e)))
    }
}

/// `ID_i = AES-256-ECB(k_i, pkcs7_16(ID))`, a single block since the
/// padded identifier is exactly 16 bytes.
fn derive_online_id(key: &[u8; HASH_BYTES], id: &[u8]) -> Result<Vec<u8>> {
    let cipher = ecb::Encryptor::<Aes256>::new_from_slice(key)
        .map_err(|e| TagTrailError::Crypto(format!("ECB key setup failed: {}", e)))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(id))
}

/// XORs the 32-byte mask into the trailing 32 bytes of `value`,
/// zero-extending the mask on the high side when `value` is wider.
fn xor_tail(value: &[u8], mask: &[u8; HASH_BYTES]) -> Vec<u8> {
    let mut out = value.to_vec();
    let offset = out.len() - HASH_BYTES;
    for (byte, m) in out[offset..].iter_mut().zip(mask) {
        *byte ^= m;
    }
    out
}

/// Decodes an online `b` value and recovers `a_{i-1} = b ⊕ k_i`.
///
/// Stored values are fixed-width hex, but hex-integer renderings that
/// dropped leading zeros decode as well: the value is left-padded back
/// to `width` before the XOR.
fn recover_chain_value(b_hex: &str, k: &[u8; HASH_BYTES], width: usize) -> Result<Vec<u8>> {
    let normalized = if b_hex.len() % 2 == 1 {
        format!("0{}", b_hex)
    } else {
        b_hex.to_string()
    };
    let decoded = hex::decode(&normalized)
        .map_err(|e| TagTrailError::TagContent(format!("bad online secret hex: {}", e)))?;
    if decoded.len() > width {
        return Err(TagTrailError::TagContent(format!(
            "online secret is {} bytes, expected at most {}",
            decoded.len(),
            width
        )));
    }
    let mut value = vec![0u8; width - decoded.len()];
    value.extend_from_slice(&decoded);
    Ok(xor_tail(&value, k))
}
