use crate::error::{Result, TagTrailError, VerifyFailure};
use crate::keyfile::BaselineConfig;
use crate::protocols::Scheme;
use crate::tag::{Tag, TagLock};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use std::path::Path;

const NONCE_BYTES: usize = 12;
const GCM_TAG_BYTES: usize = 16;

/// The baseline scheme: one AES key shared by every reader, the tag
/// carrying `Enc_k(tag_id || r1 || … || rn)`. Each reader decrypts,
/// appends its own identifier and re-encrypts under a fresh nonce.
pub struct Baseline {
    config: BaselineConfig,
}

impl Baseline {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::new(BaselineConfig::load(dir)?))
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Generates the shared key and writes the keyfile. Baseline readers
    /// carry no individual key material.
    pub fn generate_reader_configs(
        _nr_readers: usize,
        _valid_paths: &[Vec<u32>],
        dir: &Path,
    ) -> Result<BaselineConfig> {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let config = BaselineConfig {
            dir: dir.to_path_buf(),
            key,
            reader_id_size: 4,
        };
        config.save()?;
        Ok(config)
    }

    /// Encrypts the tag identifier under the shared key and persists the
    /// fresh tag.
    pub fn generate_tag_secret(&self, tag_id: u32) -> Result<Tag> {
        let plaintext = super::id_to_bytes(tag_id, self.config.reader_id_size);
        log::debug!("plaintext message: {}", hex::encode(&plaintext));

        let content = self.seal(&plaintext)?;
        let tag = Tag::new(tag_id, content, Scheme::Baseline);
        tag.save(&self.config.dir)?;
        Ok(tag)
    }

    /// Decrypts, appends the reader's identifier and re-encrypts under a
    /// fresh nonce. Refuses the update if verification fails.
    pub fn update_tag(&self, reader: u32, tag: &mut Tag) -> Result<()> {
        let _lock = TagLock::acquire(&self.config.dir, tag.id)?;
        let mut plaintext = self.verify_tag(tag)?;
        plaintext.extend_from_slice(&super::id_to_bytes(reader, self.config.reader_id_size));
        log::debug!("new plaintext message: {}", hex::encode(&plaintext));

        let content = self.seal(&plaintext)?;
        tag.update_content(reader, content);
        tag.save(&self.config.dir)
    }

    /// Decrypts the trail and returns it; a failed GCM tag is the
    /// attacker-visible rejection.
    pub fn verify_tag(&self, tag: &Tag) -> Result<Vec<u8>> {
        let (nonce, gcm_tag, ciphertext) = parse_content(&tag.content)?;

        let cipher = Aes256Gcm::new_from_slice(&self.config.key)
            .map_err(|e| TagTrailError::Crypto(format!("GCM key setup failed: {}", e)))?;
        let mut sealed = ciphertext.to_vec();
        sealed.extend_from_slice(gcm_tag);

        match cipher.decrypt(Nonce::from_slice(nonce), sealed.as_ref()) {
            Ok(plaintext) => {
                log::debug!(
                    "message {} is authentic: {}",
                    hex::encode(&tag.content),
                    hex::encode(&plaintext)
                );
                Ok(plaintext)
            }
            Err(_) => {
                log::info!("key incorrect or message corrupted for tag {}", tag.id);
                Err(TagTrailError::VerificationFailed(VerifyFailure::AeadMismatch))
            }
        }
    }

    /// Encrypts with a fresh random nonce; layout is
    /// `len(2 BE) || nonce(12) || gcm_tag(16) || ciphertext`.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new_from_slice(&self.config.key)
            .map_err(|e| TagTrailError::Crypto(format!("GCM key setup failed: {}", e)))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| TagTrailError::Crypto(format!("GCM encryption failed: {}", e)))?;
        let (ciphertext, gcm_tag) = sealed.split_at(sealed.len() - GCM_TAG_BYTES);

        let body_len = NONCE_BYTES + GCM_TAG_BYTES + ciphertext.len();
        let mut content = Vec::with_capacity(2 + body_len);
        content.extend_from_slice(&(body_len as u16).to_be_bytes());
        content.extend_from_slice(&nonce);
        content.extend_from_slice(gcm_tag);
        content.extend_from_slice(ciphertext);
        Ok(content)
    }
}

fn parse_content(content: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    if content.len() < 2 {
        return Err(TagTrailError::TagContent(
            "content too short for length prefix".to_string(),
        ));
    }
    let body_len = u16::from_be_bytes([content[0], content[1]]) as usize;
    let body = &content[2..];
    if body.len() != body_len || body_len < NONCE_BYTES + GCM_TAG_BYTES {
        return Err(TagTrailError::TagContent(format!(
            "declared body length {} does not match {} bytes",
            body_len,
            body.len()
        )));
    }
    Ok((
        &body[..NONCE_BYTES],
        &body[NONCE_BYTES..NONCE_BYTES + GCM_TAG_BYTES],
        &body[NONCE_BYTES + GCM_TAG_BYTES..],
    ))
}
