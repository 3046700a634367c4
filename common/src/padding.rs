// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! RSA block padding: PKCS#1 v1.5, PSS, ANSI X9.31 and OAEP.
//!
//! Every transform works on a caller-owned buffer exactly one modulus long.
//! Blocks are big-endian unless the configuration says the buffer holds the
//! accelerator's little-endian order, in which case the buffer is reversed at
//! entry and, where the block is produced here, at exit.
//!
//! Not every mode implements every operation:
//!
//! | mode      | pad_input           | unpad_output | verify            |
//! |-----------|---------------------|--------------|-------------------|
//! | None      | zero fill           | strip zeros  | compare           |
//! | PKCS1 1.5 | type 2 (encryption) | type 2       | type 1 (signature)|
//! | PSS       | encode digest       | -            | EMSA-PSS verify   |
//! | X9.31     | 6A/6B .. BA .. CC   | yes          | compare           |
//! | OAEP      | encode              | decode       | -                 |
//!
//! Missing operations fail with [`PaddingError::Unsupported`].
//!
//! Mode `None` strips every trailing zero byte on `unpad_output`, so a
//! payload that itself ends in zeros comes back shorter.

use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use subtle::{Choice, ConstantTimeEq};

use crate::error::BootError;
use crate::util::reverse_bytes;

const MAX_DIGEST_LEN: usize = 64;

/// PKCS#1 v1.5 padding string minimum.
const PKCS1_MIN_PS_LEN: usize = 8;

const PSS_TRAILER: u8 = 0xBC;

const X931_MINIMAL: u8 = 0x6A;
const X931_HEADER: u8 = 0x6B;
const X931_FILLER: u8 = 0xBB;
const X931_END: u8 = 0xBA;
const X931_TRAILER: u8 = 0xCC;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PaddingMode {
    None,
    Pkcs1V15,
    Pss,
    X931,
    Oaep,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HashMode {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashMode {
    pub const fn digest_len(self) -> usize {
        match self {
            HashMode::Sha224 => 28,
            HashMode::Sha256 => 32,
            HashMode::Sha384 => 48,
            HashMode::Sha512 => 64,
        }
    }

    /// DER encoded DigestInfo header preceding the digest in a PKCS#1 v1.5
    /// signature block.
    pub const fn digest_info_prefix(self) -> &'static [u8] {
        match self {
            HashMode::Sha224 => &[
                0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x04, 0x05, 0x00, 0x04, 0x1c,
            ],
            HashMode::Sha256 => &[
                0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            HashMode::Sha384 => &[
                0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            HashMode::Sha512 => &[
                0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
                0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }

    /// Hash the concatenation of `parts` into `out`, returning the digest
    /// length.
    fn digest(self, parts: &[&[u8]], out: &mut [u8; MAX_DIGEST_LEN]) -> usize {
        fn run<D: Digest>(parts: &[&[u8]], out: &mut [u8; MAX_DIGEST_LEN]) -> usize {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            let result = hasher.finalize();
            out[..result.len()].copy_from_slice(&result);
            result.len()
        }
        match self {
            HashMode::Sha224 => run::<Sha224>(parts, out),
            HashMode::Sha256 => run::<Sha256>(parts, out),
            HashMode::Sha384 => run::<Sha384>(parts, out),
            HashMode::Sha512 => run::<Sha512>(parts, out),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PaddingError {
    /// Mode, operation or modulus length not supported.
    Unsupported,
    /// Parameters that cannot work together.
    InvalidConfig,
    /// Buffer or payload of the wrong length.
    Size,
    /// Block does not decode.
    Decode,
}

impl From<PaddingError> for BootError {
    fn from(err: PaddingError) -> BootError {
        match err {
            PaddingError::Unsupported | PaddingError::InvalidConfig => {
                BootError::UnsupportedAlgorithm
            }
            PaddingError::Size | PaddingError::Decode => BootError::VerificationFailed,
        }
    }
}

/// A validated padding configuration.
#[derive(Copy, Clone, Debug)]
pub struct PaddingConfig<'a> {
    mode: PaddingMode,
    hash: HashMode,
    modulus_len: usize,
    byte_order: ByteOrder,
    label: &'a [u8],
    salt_len: usize,
}

impl<'a> PaddingConfig<'a> {
    /// Check that `mode`, `hash` and `modulus_len` can work together.
    ///
    /// Supported modulus lengths are 1024, 2048, 3072 and 4096 bits. OAEP
    /// requires a non-empty label.
    pub fn new(
        mode: PaddingMode,
        hash: HashMode,
        modulus_len: usize,
        byte_order: ByteOrder,
        label: Option<&'a [u8]>,
    ) -> Result<Self, PaddingError> {
        if !matches!(modulus_len, 128 | 256 | 384 | 512) {
            return Err(PaddingError::Unsupported);
        }
        let h_len = hash.digest_len();
        let mut salt_len = 0;
        match mode {
            PaddingMode::None | PaddingMode::X931 => {}
            PaddingMode::Pkcs1V15 => {
                let prefix = hash.digest_info_prefix().len();
                if modulus_len < prefix + h_len + PKCS1_MIN_PS_LEN + 3 {
                    return Err(PaddingError::InvalidConfig);
                }
            }
            PaddingMode::Pss => {
                if modulus_len < h_len + 2 {
                    return Err(PaddingError::InvalidConfig);
                }
                salt_len = core::cmp::min(h_len, modulus_len - h_len - 2);
            }
            PaddingMode::Oaep => {
                match label {
                    Some(label) if !label.is_empty() => {}
                    _ => return Err(PaddingError::InvalidConfig),
                }
                if modulus_len < 2 * h_len + 2 {
                    return Err(PaddingError::InvalidConfig);
                }
            }
        }
        Ok(Self {
            mode,
            hash,
            modulus_len,
            byte_order,
            label: label.unwrap_or(&[]),
            salt_len,
        })
    }

    /// Configuration for checking signature blocks. Modes without a
    /// `verify` operation are refused here rather than at the first call.
    pub fn verifier(
        mode: PaddingMode,
        hash: HashMode,
        modulus_len: usize,
        byte_order: ByteOrder,
    ) -> Result<Self, PaddingError> {
        if mode == PaddingMode::Oaep {
            return Err(PaddingError::Unsupported);
        }
        Self::new(mode, hash, modulus_len, byte_order, None)
    }

    pub fn mode(&self) -> PaddingMode {
        self.mode
    }

    pub fn modulus_len(&self) -> usize {
        self.modulus_len
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    fn check_buffer(&self, buffer: &[u8]) -> Result<(), PaddingError> {
        if buffer.len() != self.modulus_len {
            return Err(PaddingError::Size);
        }
        Ok(())
    }

    /// Pad `payload` into `buffer`. For PSS the payload is the message
    /// digest.
    pub fn pad_input<R: RngCore + CryptoRng>(
        &self,
        payload: &[u8],
        buffer: &mut [u8],
        rng: &mut R,
    ) -> Result<(), PaddingError> {
        self.check_buffer(buffer)?;
        match self.mode {
            PaddingMode::None => pad_none(payload, buffer)?,
            PaddingMode::Pkcs1V15 => pad_pkcs1_type2(payload, buffer, rng)?,
            PaddingMode::Pss => pad_pss(self.hash, self.salt_len, payload, buffer, rng)?,
            PaddingMode::X931 => pad_x931(payload, buffer)?,
            PaddingMode::Oaep => pad_oaep(self.hash, self.label, payload, buffer, rng)?,
        }
        if self.byte_order == ByteOrder::LittleEndian {
            reverse_bytes(buffer);
        }
        Ok(())
    }

    /// Recover the payload from a decrypted block.
    ///
    /// A little-endian buffer is left in big-endian order on return.
    pub fn unpad_output<'b>(&self, buffer: &'b mut [u8]) -> Result<&'b [u8], PaddingError> {
        self.check_buffer(buffer)?;
        if self.mode == PaddingMode::Pss {
            return Err(PaddingError::Unsupported);
        }
        if self.byte_order == ByteOrder::LittleEndian {
            reverse_bytes(buffer);
        }
        match self.mode {
            PaddingMode::None => Ok(unpad_none(buffer)),
            PaddingMode::Pkcs1V15 => unpad_pkcs1_type2(buffer),
            PaddingMode::X931 => unpad_x931(buffer),
            PaddingMode::Oaep => unpad_oaep(self.hash, self.label, buffer),
            PaddingMode::Pss => Err(PaddingError::Unsupported),
        }
    }

    /// Check a recovered signature block against `expected` digest.
    ///
    /// `Ok(false)` means the block is well formed for this configuration but
    /// does not match. The buffer is restored to its original order.
    pub fn verify(&self, buffer: &mut [u8], expected: &[u8]) -> Result<bool, PaddingError> {
        self.check_buffer(buffer)?;
        let h_len = self.hash.digest_len();
        match self.mode {
            PaddingMode::Oaep => return Err(PaddingError::Unsupported),
            PaddingMode::Pkcs1V15 | PaddingMode::Pss if expected.len() != h_len => {
                return Err(PaddingError::Size)
            }
            _ => {}
        }
        if self.byte_order == ByteOrder::LittleEndian {
            reverse_bytes(buffer);
        }
        let result = match self.mode {
            PaddingMode::None => unpad_none(buffer).ct_eq(expected).into(),
            PaddingMode::Pkcs1V15 => verify_pkcs1_type1(self.hash, buffer, expected),
            PaddingMode::Pss => verify_pss(self.hash, self.salt_len, buffer, expected),
            PaddingMode::X931 => match unpad_x931(buffer) {
                Ok(payload) => payload.ct_eq(expected).into(),
                Err(_) => false,
            },
            PaddingMode::Oaep => false,
        };
        if self.byte_order == ByteOrder::LittleEndian {
            reverse_bytes(buffer);
        }
        Ok(result)
    }
}

/// XOR `out` with MGF1(`seed`) built on `hash`.
fn mgf1_xor(hash: HashMode, seed: &[u8], out: &mut [u8]) {
    let mut digest = [0u8; MAX_DIGEST_LEN];
    for (counter, chunk) in out.chunks_mut(hash.digest_len()).enumerate() {
        let c = (counter as u32).to_be_bytes();
        hash.digest(&[seed, &c], &mut digest);
        for (byte, mask) in chunk.iter_mut().zip(digest.iter()) {
            *byte ^= mask;
        }
    }
}

fn fill_nonzero<R: RngCore>(rng: &mut R, buf: &mut [u8]) {
    rng.fill_bytes(buf);
    for byte in buf.iter_mut() {
        while *byte == 0 {
            let mut b = [0u8; 1];
            rng.fill_bytes(&mut b);
            *byte = b[0];
        }
    }
}

fn pad_none(payload: &[u8], buffer: &mut [u8]) -> Result<(), PaddingError> {
    if payload.len() > buffer.len() {
        return Err(PaddingError::Size);
    }
    buffer[..payload.len()].copy_from_slice(payload);
    buffer[payload.len()..].fill(0);
    Ok(())
}

fn unpad_none(buffer: &[u8]) -> &[u8] {
    let end = buffer.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &buffer[..end]
}

/// `00 02 PS 00 M` with a non-zero random PS.
fn pad_pkcs1_type2<R: RngCore>(
    payload: &[u8],
    buffer: &mut [u8],
    rng: &mut R,
) -> Result<(), PaddingError> {
    let k = buffer.len();
    if payload.len() + PKCS1_MIN_PS_LEN + 3 > k {
        return Err(PaddingError::Size);
    }
    let ps_end = k - payload.len() - 1;
    buffer[0] = 0x00;
    buffer[1] = 0x02;
    fill_nonzero(rng, &mut buffer[2..ps_end]);
    buffer[ps_end] = 0x00;
    buffer[ps_end + 1..].copy_from_slice(payload);
    Ok(())
}

fn unpad_pkcs1_type2(buffer: &[u8]) -> Result<&[u8], PaddingError> {
    if buffer[0] != 0x00 || buffer[1] != 0x02 {
        return Err(PaddingError::Decode);
    }
    let separator = buffer[2..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| i + 2)
        .ok_or(PaddingError::Decode)?;
    if separator - 2 < PKCS1_MIN_PS_LEN {
        return Err(PaddingError::Decode);
    }
    Ok(&buffer[separator + 1..])
}

/// `00 01 FF..FF 00 DigestInfo digest`, compared as a whole.
fn verify_pkcs1_type1(hash: HashMode, buffer: &[u8], expected: &[u8]) -> bool {
    let prefix = hash.digest_info_prefix();
    let k = buffer.len();
    let t_len = prefix.len() + expected.len();
    let ps_end = k - t_len - 1;

    let framing = buffer[0] == 0x00
        && buffer[1] == 0x01
        && buffer[ps_end] == 0x00
        && buffer[2..ps_end].iter().all(|&b| b == 0xFF);
    let mut ok = Choice::from(framing as u8);
    ok &= buffer[ps_end + 1..ps_end + 1 + prefix.len()].ct_eq(prefix);
    ok &= buffer[k - expected.len()..].ct_eq(expected);
    ok.into()
}

/// EMSA-PSS encoding of the digest `m_hash` for a modulus of `8k` bits.
fn pad_pss<R: RngCore>(
    hash: HashMode,
    salt_len: usize,
    m_hash: &[u8],
    buffer: &mut [u8],
    rng: &mut R,
) -> Result<(), PaddingError> {
    let h_len = hash.digest_len();
    if m_hash.len() != h_len {
        return Err(PaddingError::Size);
    }
    let em_len = buffer.len();
    let db_len = em_len - h_len - 1;

    let mut salt = [0u8; MAX_DIGEST_LEN];
    rng.fill_bytes(&mut salt[..salt_len]);
    let salt = &salt[..salt_len];

    let mut h = [0u8; MAX_DIGEST_LEN];
    hash.digest(&[&[0u8; 8], m_hash, salt], &mut h);

    let (db, rest) = buffer.split_at_mut(db_len);
    db.fill(0);
    db[db_len - salt_len - 1] = 0x01;
    db[db_len - salt_len..].copy_from_slice(salt);
    mgf1_xor(hash, &h[..h_len], db);
    // emBits = 8k - 1
    db[0] &= 0x7F;

    rest[..h_len].copy_from_slice(&h[..h_len]);
    rest[h_len] = PSS_TRAILER;
    Ok(())
}

fn verify_pss(hash: HashMode, salt_len: usize, buffer: &[u8], m_hash: &[u8]) -> bool {
    let h_len = hash.digest_len();
    let em_len = buffer.len();
    let db_len = em_len - h_len - 1;

    if buffer[em_len - 1] != PSS_TRAILER || buffer[0] & 0x80 != 0 {
        return false;
    }

    // Unmask a copy, the caller's block stays untouched.
    let mut db_buf = [0u8; 512];
    let db = &mut db_buf[..db_len];
    db.copy_from_slice(&buffer[..db_len]);
    let h = &buffer[db_len..em_len - 1];
    mgf1_xor(hash, h, db);
    db[0] &= 0x7F;

    let ps_len = db_len - salt_len - 1;
    if db[..ps_len].iter().any(|&b| b != 0) || db[ps_len] != 0x01 {
        return false;
    }
    let salt = &db[db_len - salt_len..];

    let mut h_prime = [0u8; MAX_DIGEST_LEN];
    hash.digest(&[&[0u8; 8], m_hash, salt], &mut h_prime);
    h_prime[..h_len].ct_eq(h).into()
}

/// `6B BB..BB BA M CC`, or `6A M CC` when there is room for a single
/// padding byte only.
fn pad_x931(payload: &[u8], buffer: &mut [u8]) -> Result<(), PaddingError> {
    let k = buffer.len();
    if payload.len() + 2 > k {
        return Err(PaddingError::Size);
    }
    let pad_len = k - payload.len() - 1;
    if pad_len == 1 {
        buffer[0] = X931_MINIMAL;
    } else {
        buffer[0] = X931_HEADER;
        buffer[1..pad_len - 1].fill(X931_FILLER);
        buffer[pad_len - 1] = X931_END;
    }
    buffer[pad_len..k - 1].copy_from_slice(payload);
    buffer[k - 1] = X931_TRAILER;
    Ok(())
}

fn unpad_x931(buffer: &[u8]) -> Result<&[u8], PaddingError> {
    let k = buffer.len();
    if buffer[k - 1] != X931_TRAILER {
        return Err(PaddingError::Decode);
    }
    let start = match buffer[0] {
        X931_MINIMAL => 1,
        X931_HEADER => {
            let end = buffer[1..k - 1]
                .iter()
                .position(|&b| b != X931_FILLER)
                .map(|i| i + 1)
                .ok_or(PaddingError::Decode)?;
            if buffer[end] != X931_END {
                return Err(PaddingError::Decode);
            }
            end + 1
        }
        _ => return Err(PaddingError::Decode),
    };
    Ok(&buffer[start..k - 1])
}

/// EME-OAEP: `00 || maskedSeed || maskedDB`, DB = lHash || PS || 01 || M.
fn pad_oaep<R: RngCore>(
    hash: HashMode,
    label: &[u8],
    payload: &[u8],
    buffer: &mut [u8],
    rng: &mut R,
) -> Result<(), PaddingError> {
    let h_len = hash.digest_len();
    let k = buffer.len();
    if payload.len() + 2 * h_len + 2 > k {
        return Err(PaddingError::Size);
    }

    let mut l_hash = [0u8; MAX_DIGEST_LEN];
    hash.digest(&[label], &mut l_hash);

    let (head, db) = buffer.split_at_mut(1 + h_len);
    head[0] = 0x00;
    let seed = &mut head[1..];
    rng.fill_bytes(seed);

    let db_len = db.len();
    db.fill(0);
    db[..h_len].copy_from_slice(&l_hash[..h_len]);
    db[db_len - payload.len() - 1] = 0x01;
    db[db_len - payload.len()..].copy_from_slice(payload);

    mgf1_xor(hash, seed, db);
    mgf1_xor(hash, db, seed);
    Ok(())
}

fn unpad_oaep<'b>(
    hash: HashMode,
    label: &[u8],
    buffer: &'b mut [u8],
) -> Result<&'b [u8], PaddingError> {
    let h_len = hash.digest_len();
    let first = buffer[0];

    let (head, db) = buffer.split_at_mut(1 + h_len);
    let seed = &mut head[1..];
    mgf1_xor(hash, db, seed);
    mgf1_xor(hash, seed, db);

    let mut l_hash = [0u8; MAX_DIGEST_LEN];
    hash.digest(&[label], &mut l_hash);

    let mut ok = Choice::from((first == 0x00) as u8);
    ok &= db[..h_len].ct_eq(&l_hash[..h_len]);
    let separator = db[h_len..].iter().position(|&b| b != 0).map(|i| i + h_len);
    let separator = match separator {
        Some(i) if bool::from(ok) && db[i] == 0x01 => i,
        _ => return Err(PaddingError::Decode),
    };
    let db: &'b [u8] = db;
    Ok(&db[separator + 1..])
}
