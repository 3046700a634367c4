// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Interface to the crypto accelerator.
//!
//! The accelerator works on little-endian operands, the way the hardware
//! registers are laid out. Callers holding big-endian wire data convert it
//! with [`crate::util::reverse_bytes`] before crossing this boundary.
//!
//! Hardware completes operations asynchronously and signals an "operation
//! done" event. Implementations wait for that event internally, so every
//! method here returns once the operation has finished.

use crate::ErrorCode;

pub const SHA256_LEN: usize = 32;
pub const AES_BLOCK_LEN: usize = 16;
pub const AES_KEY_LEN: usize = 32;
pub const P256_PUBLIC_KEY_LEN: usize = 64;
pub const P256_SCALAR_LEN: usize = 32;

pub trait CryptoEngine {
    /// Power the accelerator on. Calling it again while powered is a no-op.
    fn power_on(&mut self) -> Result<(), ErrorCode>;

    /// Power the accelerator off and wipe any key material it holds.
    fn power_off(&mut self);

    /// Feed `data` into a SHA-256 computation and store the digest of
    /// everything fed so far in `digest`.
    ///
    /// With `continue_flag` clear, a new computation starts with `data`.
    fn hash(
        &mut self,
        data: &[u8],
        digest: &mut [u8; SHA256_LEN],
        continue_flag: bool,
    ) -> Result<(), ErrorCode>;

    /// Load an AES-256 key and the CBC initialisation vector.
    fn aes_configure(
        &mut self,
        key: &[u8; AES_KEY_LEN],
        iv: &[u8; AES_BLOCK_LEN],
    ) -> Result<(), ErrorCode>;

    /// Decrypt `buf` in place. The length must be a multiple of the block
    /// size. The CBC chain continues across calls until the next
    /// `aes_configure`.
    fn aes_decrypt(&mut self, buf: &mut [u8]) -> Result<(), ErrorCode>;

    /// Verify a P-256 ECDSA signature `(r, s)` over a prehashed `digest`.
    /// `public_key` is the uncompressed point `x || y`, all big-endian.
    fn ecc_verify(
        &mut self,
        public_key: &[u8; P256_PUBLIC_KEY_LEN],
        digest: &[u8; SHA256_LEN],
        r: &[u8; P256_SCALAR_LEN],
        s: &[u8; P256_SCALAR_LEN],
    ) -> Result<bool, ErrorCode>;

    /// Compute `input ^ exponent mod modulus`. `modulus_le`, `input_le` and
    /// `output_le` are little-endian and of the modulus length.
    fn rsa_public(
        &mut self,
        modulus_le: &[u8],
        exponent: u32,
        input_le: &[u8],
        output_le: &mut [u8],
    ) -> Result<(), ErrorCode>;
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256_parts<C: CryptoEngine + ?Sized>(
    crypto: &mut C,
    parts: &[&[u8]],
) -> Result<[u8; SHA256_LEN], ErrorCode> {
    let mut digest = [0u8; SHA256_LEN];
    // An empty first call still resets the running state.
    crypto.hash(&[], &mut digest, false)?;
    for part in parts {
        crypto.hash(part, &mut digest, true)?;
    }
    Ok(digest)
}
