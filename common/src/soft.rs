// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Software crypto accelerator.
//!
//! Implements [`CryptoEngine`] with the RustCrypto crates, for host boards
//! and tests. Behaves like the hardware block: nothing works until it is
//! powered on, and powering off drops the AES key schedule.

use aes::cipher::{generic_array::GenericArray, BlockDecryptMut, KeyIvInit};
use p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use p256::EncodedPoint;
use rsa::BigUint;
use sha2::{Digest, Sha256};

use crate::hil::crypto::{
    CryptoEngine, AES_BLOCK_LEN, AES_KEY_LEN, P256_PUBLIC_KEY_LEN, P256_SCALAR_LEN, SHA256_LEN,
};
use crate::ErrorCode;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub struct SoftCrypto {
    powered: bool,
    sha: Sha256,
    aes: Option<Aes256CbcDec>,
}

impl SoftCrypto {
    pub fn new() -> Self {
        Self {
            powered: false,
            sha: Sha256::new(),
            aes: None,
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn check_powered(&self) -> Result<(), ErrorCode> {
        if self.powered {
            Ok(())
        } else {
            Err(ErrorCode::OFF)
        }
    }
}

impl CryptoEngine for SoftCrypto {
    fn power_on(&mut self) -> Result<(), ErrorCode> {
        self.powered = true;
        Ok(())
    }

    fn power_off(&mut self) {
        // The cipher state zeroizes itself on drop.
        self.aes = None;
        self.sha = Sha256::new();
        self.powered = false;
    }

    fn hash(
        &mut self,
        data: &[u8],
        digest: &mut [u8; SHA256_LEN],
        continue_flag: bool,
    ) -> Result<(), ErrorCode> {
        self.check_powered()?;
        if !continue_flag {
            self.sha = Sha256::new();
        }
        self.sha.update(data);
        digest.copy_from_slice(&self.sha.clone().finalize());
        Ok(())
    }

    fn aes_configure(
        &mut self,
        key: &[u8; AES_KEY_LEN],
        iv: &[u8; AES_BLOCK_LEN],
    ) -> Result<(), ErrorCode> {
        self.check_powered()?;
        let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| ErrorCode::INVAL)?;
        self.aes = Some(cipher);
        Ok(())
    }

    fn aes_decrypt(&mut self, buf: &mut [u8]) -> Result<(), ErrorCode> {
        self.check_powered()?;
        if buf.len() % AES_BLOCK_LEN != 0 {
            return Err(ErrorCode::SIZE);
        }
        let cipher = self.aes.as_mut().ok_or(ErrorCode::INVAL)?;
        for block in buf.chunks_exact_mut(AES_BLOCK_LEN) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn ecc_verify(
        &mut self,
        public_key: &[u8; P256_PUBLIC_KEY_LEN],
        digest: &[u8; SHA256_LEN],
        r: &[u8; P256_SCALAR_LEN],
        s: &[u8; P256_SCALAR_LEN],
    ) -> Result<bool, ErrorCode> {
        self.check_powered()?;
        let encoded_point = EncodedPoint::from_untagged_bytes(public_key.into());
        let verifying_key =
            VerifyingKey::from_encoded_point(&encoded_point).map_err(|_| ErrorCode::INVAL)?;

        let mut signature_bytes = [0u8; 64];
        signature_bytes[0..32].copy_from_slice(r);
        signature_bytes[32..64].copy_from_slice(s);
        let signature = match Signature::from_bytes(&signature_bytes.into()) {
            Ok(signature) => signature,
            // Zero or out of range scalars can never verify.
            Err(_) => return Ok(false),
        };
        Ok(verifying_key.verify_prehash(digest, &signature).is_ok())
    }

    fn rsa_public(
        &mut self,
        modulus_le: &[u8],
        exponent: u32,
        input_le: &[u8],
        output_le: &mut [u8],
    ) -> Result<(), ErrorCode> {
        self.check_powered()?;
        if input_le.len() != modulus_le.len() || output_le.len() != modulus_le.len() {
            return Err(ErrorCode::SIZE);
        }
        let modulus = BigUint::from_bytes_le(modulus_le);
        let input = BigUint::from_bytes_le(input_le);
        if modulus.bits() == 0 || input >= modulus {
            return Err(ErrorCode::INVAL);
        }
        let output = input.modpow(&BigUint::from(exponent), &modulus).to_bytes_le();
        output_le.fill(0);
        output_le[..output.len()].copy_from_slice(&output);
        Ok(())
    }
}
