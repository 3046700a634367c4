// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Signature verification of images stored in a zone.
//!
//! The digest covers, in order: the fixed header with its mutable fields
//! neutralised, the key material at the start of the signature block, and
//! the payload read in 4 KiB packages. The rest of the signature block
//! (digest or signature) is what the digest is checked against.
//!
//! The alignment bytes between the signature block and the payload are not
//! part of the digest. They must read as zero or the image is refused.

use subtle::ConstantTimeEq;

use crate::error::BootError;
use crate::header::{SignMode, HEADER_ALIGN, HEADER_FIXED_LEN};
use crate::hil::crypto::{sha256_parts, CryptoEngine, SHA256_LEN};
use crate::hil::efuse::Efuse;
use crate::hil::flash::FlashController;
use crate::padding::{ByteOrder, HashMode, PaddingConfig, PaddingMode};
use crate::util::{read_u32_le, reverse_bytes};
use crate::zone::{check_zone_crc, ZoneImage};

/// Payload is hashed in packages of this size.
pub const PACKAGE_SIZE: usize = 4096;

const MAX_SIGNATURE_BLOCK: usize = SignMode::Rsa2048.block_len();
const RSA2048_LEN: usize = 256;

/// Digest of the signed portion of `image`.
fn image_digest<F: FlashController + ?Sized, C: CryptoEngine + ?Sized>(
    flash: &F,
    crypto: &mut C,
    image: &ZoneImage,
    key_material: &[u8],
) -> Result<[u8; SHA256_LEN], BootError> {
    let region = image.entry.region();
    let mut digest = [0u8; SHA256_LEN];

    crypto
        .hash(&image.header.neutralized_for_signature(), &mut digest, false)
        .map_err(|_| BootError::HashError)?;
    crypto
        .hash(key_material, &mut digest, true)
        .map_err(|_| BootError::HashError)?;

    let mut package = [0u8; PACKAGE_SIZE];
    let base = image.payload_offset();
    let mut offset = 0;
    while offset < image.header.size {
        let n = core::cmp::min(PACKAGE_SIZE as u32, image.header.size - offset);
        let chunk = &mut package[..n as usize];
        region
            .read(flash, base + offset, chunk)
            .map_err(|_| BootError::FlashOperationFailed)?;
        crypto
            .hash(chunk, &mut digest, true)
            .map_err(|_| BootError::HashError)?;
        offset += n;
    }
    Ok(digest)
}

/// Check that the key embedded in the image hashes to the fused root of
/// trust.
fn check_root_of_trust<C: CryptoEngine + ?Sized, E: Efuse + ?Sized>(
    crypto: &mut C,
    efuse: &E,
    key_material: &[u8],
) -> Result<(), BootError> {
    let root = efuse.root_key_digest().ok_or_else(|| {
        log::error!("no root of trust fused");
        BootError::UntrustedKey
    })?;
    let key_digest = sha256_parts(crypto, &[key_material]).map_err(|_| BootError::HashError)?;
    if !bool::from(key_digest[..].ct_eq(&root[..])) {
        log::error!("embedded key does not match the root of trust");
        return Err(BootError::UntrustedKey);
    }
    Ok(())
}

/// Verify the image in a zone according to the zone's sign mode.
///
/// CRC-only zones fall back to [`check_zone_crc`]. Asymmetric modes first
/// bind the embedded public key to the efuse root of trust.
pub fn verify_flash_signature<F, C, E>(
    flash: &F,
    crypto: &mut C,
    efuse: &E,
    image: &ZoneImage,
) -> Result<(), BootError>
where
    F: FlashController + ?Sized,
    C: CryptoEngine + ?Sized,
    E: Efuse + ?Sized,
{
    let sign_mode = image.entry.sign_mode;
    if sign_mode == SignMode::Crc32 {
        return check_zone_crc(flash, image);
    }
    image.image_len()?;

    let mut tail = [0u8; MAX_SIGNATURE_BLOCK + HEADER_ALIGN as usize];
    let tail = &mut tail[..sign_mode.header_len() as usize - HEADER_FIXED_LEN];
    image
        .entry
        .region()
        .read(flash, HEADER_FIXED_LEN as u32, tail)
        .map_err(|_| BootError::FlashOperationFailed)?;
    let (block, gap) = tail.split_at(sign_mode.block_len());
    if gap.iter().any(|&b| b != 0) {
        log::error!("header alignment bytes are not zero");
        return Err(BootError::VerificationFailed);
    }
    let (key_material, signature) = block.split_at(sign_mode.key_material_len());

    crypto.power_on().map_err(|_| BootError::CryptoFailed)?;
    let digest = image_digest(flash, crypto, image, key_material)?;

    match sign_mode {
        SignMode::Crc32 => Ok(()),
        SignMode::Sha256 => {
            if bool::from(digest[..].ct_eq(signature)) {
                Ok(())
            } else {
                log::error!("image digest mismatch");
                Err(BootError::VerificationFailed)
            }
        }
        SignMode::EcdsaP256 => {
            check_root_of_trust(crypto, efuse, key_material)?;
            let mut key = [0u8; 64];
            key.copy_from_slice(key_material);
            let mut r = [0u8; 32];
            let mut s = [0u8; 32];
            r.copy_from_slice(&signature[..32]);
            s.copy_from_slice(&signature[32..64]);
            match crypto.ecc_verify(&key, &digest, &r, &s) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    log::error!("ecdsa signature rejected");
                    Err(BootError::VerificationFailed)
                }
                Err(_) => Err(BootError::CryptoFailed),
            }
        }
        SignMode::Rsa2048 => {
            check_root_of_trust(crypto, efuse, key_material)?;
            let exponent = read_u32_le(key_material, RSA2048_LEN);

            let mut modulus = [0u8; RSA2048_LEN];
            modulus.copy_from_slice(&key_material[..RSA2048_LEN]);
            reverse_bytes(&mut modulus);
            let mut input = [0u8; RSA2048_LEN];
            input.copy_from_slice(signature);
            reverse_bytes(&mut input);

            let mut recovered = [0u8; RSA2048_LEN];
            crypto
                .rsa_public(&modulus, exponent, &input, &mut recovered)
                .map_err(|_| BootError::CryptoFailed)?;

            let config = PaddingConfig::verifier(
                PaddingMode::Pss,
                HashMode::Sha256,
                RSA2048_LEN,
                ByteOrder::LittleEndian,
            )?;
            if config.verify(&mut recovered, &digest)? {
                Ok(())
            } else {
                log::error!("rsa-pss signature rejected");
                Err(BootError::VerificationFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ZoneFlags;
    use crate::soft::SoftCrypto;
    use crate::testutil::{slot, FakeEfuse, FakeFlash, ImageBuilder, APP_ZONE};
    use crate::zone::load_image;

    fn verify(flash: &FakeFlash, efuse: &FakeEfuse, mode: SignMode) -> Result<(), BootError> {
        let entry = slot(0, mode);
        let image = load_image(flash, &entry).unwrap();
        let mut crypto = SoftCrypto::new();
        let result = verify_flash_signature(flash, &mut crypto, efuse, &image);
        crypto.power_off();
        result
    }

    fn install(mode: SignMode, payload_len: usize) -> FakeFlash {
        let flash = FakeFlash::new();
        let entry = slot(0, mode);
        let image = ImageBuilder::new(APP_ZONE, 1)
            .sign_mode(mode)
            .payload_len(payload_len)
            .flags(ZoneFlags::SIGN)
            .build();
        flash.load(entry.address, &image);
        flash
    }

    #[test]
    fn every_sign_mode_accepts_a_good_image() {
        for mode in [
            SignMode::Crc32,
            SignMode::Sha256,
            SignMode::EcdsaP256,
            SignMode::Rsa2048,
        ] {
            // Spans several hash packages.
            let flash = install(mode, 3 * PACKAGE_SIZE + 100);
            let efuse = FakeEfuse::trusting(mode);
            assert_eq!(verify(&flash, &efuse, mode), Ok(()), "{:?}", mode);
        }
    }

    #[test]
    fn tampered_payload_is_rejected() {
        for mode in [SignMode::Sha256, SignMode::EcdsaP256, SignMode::Rsa2048] {
            let flash = install(mode, 5000);
            let entry = slot(0, mode);
            flash.flip_bit(entry.address + entry.header_len() + 4500, 7);
            let efuse = FakeEfuse::trusting(mode);
            assert_eq!(
                verify(&flash, &efuse, mode),
                Err(BootError::VerificationFailed),
                "{:?}",
                mode
            );
        }
    }

    #[test]
    fn tampered_header_is_rejected() {
        let mode = SignMode::EcdsaP256;
        let flash = install(mode, 100);
        let entry = slot(0, mode);
        // Load address.
        flash.flip_bit(entry.address + 0x24, 1);
        assert_eq!(
            verify(&flash, &FakeEfuse::trusting(mode), mode),
            Err(BootError::VerificationFailed)
        );
    }

    #[test]
    fn signature_ignores_validity_and_encrypt_bits() {
        let mode = SignMode::Rsa2048;
        let flash = FakeFlash::new();
        let entry = slot(0, mode);
        let image = ImageBuilder::new(APP_ZONE, 1)
            .sign_mode(mode)
            .flags(ZoneFlags::ENCRYPT)
            .build();
        flash.load(entry.address, &image);
        // Validity flag programmed after signing.
        flash.poke_u32(entry.address, 0x4F54_4153);
        assert_eq!(verify(&flash, &FakeEfuse::trusting(mode), mode), Ok(()));
    }

    #[test]
    fn data_in_the_alignment_gap_is_rejected() {
        for mode in [SignMode::Sha256, SignMode::EcdsaP256, SignMode::Rsa2048] {
            let flash = install(mode, 100);
            let entry = slot(0, mode);
            assert_eq!(
                verify(&flash, &FakeEfuse::trusting(mode), mode),
                Ok(()),
                "{:?}",
                mode
            );
            flash.poke(entry.address + entry.header_len() - 1, 0x5A);
            assert_eq!(
                verify(&flash, &FakeEfuse::trusting(mode), mode),
                Err(BootError::VerificationFailed),
                "{:?}",
                mode
            );
        }
    }

    #[test]
    fn untrusted_key_is_rejected() {
        for mode in [SignMode::EcdsaP256, SignMode::Rsa2048] {
            let flash = install(mode, 100);
            let mut efuse = FakeEfuse::trusting(mode);
            efuse.root_digest = Some([0xA5; 32]);
            assert_eq!(verify(&flash, &efuse, mode), Err(BootError::UntrustedKey));

            efuse.root_digest = None;
            assert_eq!(verify(&flash, &efuse, mode), Err(BootError::UntrustedKey));
        }
    }

    #[test]
    fn corrupted_rsa_signature_is_rejected() {
        let mode = SignMode::Rsa2048;
        let flash = install(mode, 100);
        let entry = slot(0, mode);
        // Last signature byte.
        flash.flip_bit(entry.address + 0x48 + 515, 0);
        assert_eq!(
            verify(&flash, &FakeEfuse::trusting(mode), mode),
            Err(BootError::VerificationFailed)
        );
    }

    #[test]
    fn oversized_payload_is_rejected_before_reading() {
        let mode = SignMode::Sha256;
        let flash = install(mode, 100);
        let entry = slot(0, mode);
        let mut image = load_image(&flash, &entry).unwrap();
        image.header.size = entry.size;
        let mut crypto = SoftCrypto::new();
        assert_eq!(
            verify_flash_signature(&flash, &mut crypto, &FakeEfuse::trusting(mode), &image),
            Err(BootError::InvalidZoneRegion)
        );
    }
}
