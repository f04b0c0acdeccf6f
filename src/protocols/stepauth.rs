use crate::ecies::{self, EciesParams};
use crate::error::{Result, TagTrailError, VerifyFailure};
use crate::keyfile::{MasterKey, StepAuthConfig, StepAuthReader};
use crate::protocols::Scheme;
use crate::tag::{Tag, TagLock};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;

const SIGNATURE_BYTES: usize = 64;
const BLOCK: usize = 16;

/// StepAuth: the issuer compiles a recursive onion where each layer is
/// encrypted to the reader expected at that step and signed with the
/// master key. A reader that can decrypt peels its layer; the identifier
/// inside must be its own.
pub struct StepAuth {
    config: StepAuthConfig,
    params: EciesParams,
}

impl StepAuth {
    pub fn new(config: StepAuthConfig) -> Self {
        Self {
            config,
            params: EciesParams::default(),
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self::new(StepAuthConfig::load(dir)?))
    }

    pub fn config(&self) -> &StepAuthConfig {
        &self.config
    }

    /// Master key pair on P-256, per-reader ECIES pairs on secp256k1.
    pub fn generate_reader_configs(
        nr_readers: usize,
        _valid_paths: &[Vec<u32>],
        dir: &Path,
    ) -> Result<StepAuthConfig> {
        let master_sk = SigningKey::random(&mut OsRng);
        let master_pk = VerifyingKey::from(&master_sk);

        let mut readers = Vec::with_capacity(nr_readers);
        for id in 0..nr_readers {
            let (private, public) = ecies::generate_keypair();
            readers.push(StepAuthReader {
                id: id as u32,
                public,
                private,
            });
        }

        let config = StepAuthConfig {
            dir: dir.to_path_buf(),
            master: MasterKey {
                public: master_pk.to_encoded_point(false).as_bytes().to_vec(),
                private: master_sk.to_bytes().to_vec(),
            },
            reader_id_size: 4,
            tag_id_size: 4,
            readers,
        };
        config.save()?;
        Ok(config)
    }

    /// Builds the onion from the innermost layer outward:
    /// `M_n = pad16(r_n || r_n || t)`, `M_i = pad16(r_i || r_{i+1} || C_{i+1})`,
    /// each `C_i = ECIES(pub_i, M_i)[1..] || sig_master`.
    pub fn generate_tag_secret(&self, tag_id: u32, path: &[u32]) -> Result<Tag> {
        if path.is_empty() {
            return Err(TagTrailError::Keyfile("StepAuth needs a path".to_string()));
        }
        for reader in path {
            super::check_reader_range(*reader, self.config.readers.len())?;
        }
        let master_sk = self.master_signing_key()?;
        let rs = self.config.reader_id_size;

        let mut bundle: Vec<u8> = Vec::new();
        for (i, reader) in path.iter().enumerate().rev() {
            let mut message = super::id_to_bytes(*reader, rs);
            if i == path.len() - 1 {
                // the destination appears twice as the terminal sentinel
                message.extend_from_slice(&super::id_to_bytes(*reader, rs));
                message.extend_from_slice(&super::id_to_bytes(tag_id, self.config.tag_id_size));
            } else {
                message.extend_from_slice(&super::id_to_bytes(path[i + 1], rs));
                message.extend_from_slice(&bundle);
            }
            pad_block(&mut message);

            let public = &self.reader_keys(*reader)?.public;
            let sealed = ecies::encrypt(public, &message, &self.params)?;
            // the uncompressed-point marker is implied by the scheme
            let c = &sealed[1..];
            let signature: Signature = master_sk.sign(c);

            bundle = c.to_vec();
            bundle.extend_from_slice(&signature.to_bytes());
        }

        let mut content = Vec::with_capacity(2 + bundle.len());
        content.extend_from_slice(&(bundle.len() as u16).to_be_bytes());
        content.extend_from_slice(&bundle);
        log::debug!(
            "tag content length: {}, content: {}",
            content.len(),
            hex::encode(&content)
        );

        let tag = Tag::new(tag_id, content, Scheme::StepAuth);
        tag.save(&self.config.dir)?;
        Ok(tag)
    }

    /// Checks the issuer signature, decrypts the outer layer with the
    /// reader's key and matches the embedded identifier.
    pub fn verify_tag(&self, reader: u32, tag: &Tag) -> Result<Vec<u8>> {
        super::check_reader_range(reader, self.config.readers.len())?;
        let rs = self.config.reader_id_size;
        let cryptogram = parse_content(&tag.content)?;

        let (content, signature) = cryptogram.split_at(cryptogram.len() - SIGNATURE_BYTES);
        let master_pk = VerifyingKey::from_sec1_bytes(&self.config.master.public)
            .map_err(|e| TagTrailError::Keyfile(format!("bad master public key: {}", e)))?;
        let signature = Signature::from_slice(signature).map_err(|_| {
            TagTrailError::VerificationFailed(VerifyFailure::SignatureInvalid)
        })?;
        if master_pk.verify(content, &signature).is_err() {
            log::info!("issuer signature on tag {} is not authentic", tag.id);
            return Err(TagTrailError::VerificationFailed(
                VerifyFailure::SignatureInvalid,
            ));
        }

        // restore the uncompressed-point prefix stripped at build time
        let mut sealed = Vec::with_capacity(1 + content.len());
        sealed.push(0x04);
        sealed.extend_from_slice(content);

        let private = &self.reader_keys(reader)?.private;
        let padded = ecies::decrypt(private, &sealed, &self.params)?;
        let message = unpad_block(&padded)?;

        if message.len() < 2 * rs {
            return Err(TagTrailError::TagContent(
                "decrypted layer is shorter than two identifiers".to_string(),
            ));
        }
        if message[..rs] != super::id_to_bytes(reader, rs) {
            log::info!("tag {} is not addressed to reader {}", tag.id, reader);
            return Err(TagTrailError::VerificationFailed(
                VerifyFailure::ReaderIdMismatch { expected: reader },
            ));
        }
        log::debug!("tag {} verified by reader {}", tag.id, reader);
        Ok(message.to_vec())
    }

    /// Peels the verified layer: the remainder after the two leading
    /// identifiers is the next ciphertext bundle. Equal identifiers mean
    /// the tag has reached its destination; the update is still recorded.
    pub fn update_tag(&self, reader: u32, tag: &mut Tag) -> Result<()> {
        let _lock = TagLock::acquire(&self.config.dir, tag.id)?;
        let message = self.verify_tag(reader, tag)?;
        let rs = self.config.reader_id_size;

        let reader_id = &message[..rs];
        let next_reader_id = &message[rs..2 * rs];
        if reader_id == next_reader_id {
            log::info!("tag {} has finished its path", tag.id);
        }

        let rest = &message[2 * rs..];
        let mut content = Vec::with_capacity(2 + rest.len());
        content.extend_from_slice(&(rest.len() as u16).to_be_bytes());
        content.extend_from_slice(rest);

        tag.update_content(reader, content);
        tag.save(&self.config.dir)
    }

    fn master_signing_key(&self) -> Result<SigningKey> {
        SigningKey::from_slice(&self.config.master.private)
            .map_err(|e| TagTrailError::Keyfile(format!("bad master private key: {}", e)))
    }

    fn reader_keys(&self, reader: u32) -> Result<&StepAuthReader> {
        self.config
            .readers
            .iter()
            .find(|r| r.id == reader)
            .ok_or_else(|| {
                TagTrailError::Keyfile(format!("reader {} is not in the keyfile", reader))
            })
    }
}

fn parse_content(content: &[u8]) -> Result<&[u8]> {
    if content.len() < 2 {
        return Err(TagTrailError::TagContent(
            "content too short for length prefix".to_string(),
        ));
    }
    let declared = u16::from_be_bytes([content[0], content[1]]) as usize;
    let cryptogram = &content[2..];
    if cryptogram.len() != declared {
        return Err(TagTrailError::TagContent(format!(
            "declared length {} does not match {} bytes",
            declared,
            cryptogram.len()
        )));
    }
    if cryptogram.len() <= SIGNATURE_BYTES {
        return Err(TagTrailError::TagContent(
            "cryptogram too short to carry a signature".to_string(),
        ));
    }
    Ok(cryptogram)
}

fn pad_block(message: &mut Vec<u8>) {
    let pad = BLOCK - (message.len() % BLOCK);
    message.extend(std::iter::repeat(pad as u8).take(pad));
}

fn unpad_block(message: &[u8]) -> Result<&[u8]> {
    let pad = *message.last().ok_or_else(|| {
        TagTrailError::VerificationFailed(VerifyFailure::BadPadding)
    })? as usize;
    if pad == 0 || pad > BLOCK || message.len() < pad {
        return Err(TagTrailError::VerificationFailed(VerifyFailure::BadPadding));
    }
    if !message[message.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(TagTrailError::VerificationFailed(VerifyFailure::BadPadding));
    }
    Ok(&message[..message.len() - pad])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(nr_readers: usize) -> (tempfile::TempDir, StepAuth) {
        let dir = tempfile::tempdir().unwrap();
        let config = StepAuth::generate_reader_configs(nr_readers, &[], dir.path()).unwrap();
        (dir, StepAuth::new(config))
    }

    #[test]
    fn test_first_hop_verifies_only_for_first_reader() {
        let (_dir, engine) = engine(3);
        let tag = engine.generate_tag_secret(5, &[2, 0, 1]).unwrap();

        let message = engine.verify_tag(2, &tag).unwrap();
        assert_eq!(&message[..4], &[0, 0, 0, 2]);
        assert_eq!(&message[4..8], &[0, 0, 0, 0]);

        assert!(engine.verify_tag(0, &tag).unwrap_err().is_verification_failure());
        assert!(engine.verify_tag(1, &tag).unwrap_err().is_verification_failure());
    }

    #[test]
    fn test_update_walks_the_path() {
        let (_dir, engine) = engine(3);
        let mut tag = engine.generate_tag_secret(5, &[2, 0, 1]).unwrap();

        engine.update_tag(2, &mut tag).unwrap();
        let message = engine.verify_tag(0, &tag).unwrap();
        assert_eq!(&message[..4], &[0, 0, 0, 0]);

        engine.update_tag(0, &mut tag).unwrap();
        let message = engine.verify_tag(1, &tag).unwrap();
        // innermost layer: destination twice, then the tag id
        assert_eq!(&message[..4], &[0, 0, 0, 1]);
        assert_eq!(&message[4..8], &[0, 0, 0, 1]);
        assert_eq!(&message[8..12], &[0, 0, 0, 5]);

        engine.update_tag(1, &mut tag).unwrap();
        assert_eq!(tag.history.len(), 3);
        // peeled to the bare tag id, no further verification possible
        assert!(engine.verify_tag(1, &tag).is_err());
    }

    #[test]
    fn test_forged_signature_rejected() {
        let (_dir, engine) = engine(2);
        let mut tag = engine.generate_tag_secret(5, &[1, 0]).unwrap();
        let last = tag.content.len() - 1;
        tag.content[last] ^= 0x01;

        let err = engine.verify_tag(1, &tag).unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let (_dir, eng) = engine(2);
        let (_dir2, other) = engine(2);
        let tag = other.generate_tag_secret(5, &[1, 0]).unwrap();

        assert!(eng.verify_tag(1, &tag).unwrap_err().is_verification_failure());
    }

    #[test]
    fn test_empty_path_rejected() {
        let (_dir, engine) = engine(2);
        assert!(engine.generate_tag_secret(5, &[]).is_err());
    }

    #[test]
    fn test_out_of_range_reader_rejected() {
        let (_dir, engine) = engine(2);
        assert!(engine.generate_tag_secret(5, &[0, 7]).is_err());
    }

    #[test]
    fn test_padding_helpers() {
        let mut m = vec![1u8; 12];
        pad_block(&mut m);
        assert_eq!(m.len(), 16);
        assert_eq!(unpad_block(&m).unwrap(), &[1u8; 12][..]);

        let mut exact = vec![2u8; 16];
        pad_block(&mut exact);
        assert_eq!(exact.len(), 32);
        assert_eq!(unpad_block(&exact).unwrap().len(), 16);

        assert!(unpad_block(&[0u8; 4]).is_err());
    }
}
