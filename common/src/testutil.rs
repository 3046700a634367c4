// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Fakes and fixtures shared by the unit and scenario tests.

use core::cell::{Cell, RefCell};
use core::future::Future;
use std::collections::VecDeque;
use std::vec::Vec;

use aes::cipher::{generic_array::GenericArray, BlockEncryptMut, KeyIvInit};
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use rsa::pss::Pss;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::flash_worker::{FlashClient, FlashQueue, FlashWorker};
use crate::header::{
    PartitionHeader, SignMode, ValidityFlag, VersionRecord, ZoneFlags, HEADER_FIXED_LEN,
};
use crate::hil::efuse::{Efuse, SecureBootLevel};
use crate::hil::flash::{FlashController, Mapping};
use crate::hil::transport::Transport;
use crate::protocol::command::{data_checksum, DATA_HEADER_LEN, DIRECTION_COMMAND};
use crate::slip::{decode, encode_into, encoded_len, SlipEvent};
use crate::util::{read_u16_le, read_u32_le, write_u32_le};
use crate::zone::{checksum, image_crc, ZoneEntry, ZoneTable, ZONE_TABLE_MAX_LEN};
use crate::{BoardConfig, BootloaderIO, ErrorCode};

pub const FLASH_SIZE: u32 = 0x40_0000;
pub const SECTOR_SIZE: u32 = 0x1000;
pub const BOOT_HEADER_OFFSET: u32 = 0;
pub const ZONE_TABLE_OFFSET: u32 = 0x100;

pub const APP_ZONE: u8 = 1;
pub const SYS_ZONE: u8 = 2;
pub const OTA_ZONE: u8 = 0x0F;

pub const VENDOR_ID: u32 = 0x0000_1D50;
pub const DEVICE_ID: u32 = 0x0000_6018;

pub const TEST_AES_KEY: [u8; 32] = [
    0x60, 0x3D, 0xEB, 0x10, 0x15, 0xCA, 0x71, 0xBE, 0x2B, 0x73, 0xAE, 0xF0, 0x85, 0x7D, 0x77,
    0x81, 0x1F, 0x35, 0x2C, 0x07, 0x3B, 0x61, 0x08, 0xD7, 0x2D, 0x98, 0x10, 0xA3, 0x09, 0x14,
    0xDF, 0xF4,
];
pub const TEST_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
    0x0F,
];

const RSA_N: &str = "86461a57d2c674a91ec9840c7541bc039cce9c2d8279e162cd6854660bdb7a9762298dfcb2d1c94ad14106ce4a6aa4a1b3c60414af8569aef3eff0cf6c5ae729c106978d0ad22f51ddddf1ff75a0209268754acb75517075458987e4830f6cc2f4ac193966eaa6c7dd8c0b31a4f40a8e38a675dd47be154530937f7ed91ce5bcd87efec27b8a951994b4ac962a79976ab235b03006d6c3c60e3020f351d67ed46fe61b1e774878f982f489aacec816a258bbcaa931e2103813040dbd5c8f891d0a4b76381d8f9d22ad5ae1e94e31370e50fc37cc0dc6854bfabd85957f2367992c11c3ce1c9f640d1c0f746612ca06c1605c098126f5b09a64dc1b36dc980577";
const RSA_D: &str = "13d137e51b5a27f0a7f714f2a3c1b2669417984c4d3400d44cbda7ab31f7d025949ace766bcbf39a03bd45ac5fa652aafcf5ee37415a7ee90fdeab5b69c216d8fe40a3507136e93dfb715cdc97b72ce77edc44d0377df00b96da4000b5692ae3b129cf453e0fc6d2bbbb86116b278b814712265624d7049ba41a38d87761c0f4420063b54afee3dfbae1566a7c095d701352e83f061efa4238192663bd70a33326dbfdee8c7330f22752909f322f8745242d4754a511a955393a813716dbdd58c0141f53936e893fc2121739ee563c0cb9cb1d0bfb3ecc87044c14a525d36433614be6dea4261b825e05b43870cc4845187ba2921353a65ca76ee86298628db9";
const RSA_P: &str = "bd5220637837f9030956293bdc3e5cc64dadf3d229c5dcf312e672829a3d9ecd0708fece0975900bb8dd34f0a21138d1c9dc5faff64ef100171149644f41147a87a3124a343dc06be392cba2cfbf2de966150264a47c56b834bd3cccbb42e31ab024cd1a937e1c736a75a95d17a72723af86e82d04824df64d620a7ca85b2ac9";
const RSA_Q: &str = "b590bc4a52e3e710b709a0534b0bcd1fc983c39143fb69ef76b1535ef9c7d633bd6bd9fcc1e3a722f43f37c7666127aa6f20c03d044dcedaf70bc0cc7f866d6b6894000d3a5f107647ba51012cfd51f7f7c893d9219f9f6c5b1600788eedde8da9b146d410173e9d9562a140e0dcae895b8986c1cd6b92973bf90ecb92858e3f";
const RSA_E: u32 = 65537;

// Zone layout

pub const fn slot(index: u32, sign_mode: SignMode) -> ZoneEntry {
    ZoneEntry {
        id: APP_ZONE,
        encrypted: false,
        sign_mode,
        address: 0x1_0000 + index * 0x4_0000,
        size: 0x4_0000,
    }
}

pub const fn sys_zone(sign_mode: SignMode) -> ZoneEntry {
    ZoneEntry {
        id: SYS_ZONE,
        encrypted: false,
        sign_mode,
        address: 0x10_0000,
        size: 0x16_0000,
    }
}

pub const fn staging_zone(sign_mode: SignMode) -> ZoneEntry {
    ZoneEntry {
        id: OTA_ZONE,
        encrypted: false,
        sign_mode,
        address: 0x28_0000,
        size: 0x16_0000,
    }
}

pub const SLOT_A: ZoneEntry = slot(0, SignMode::Crc32);
pub const SLOT_B: ZoneEntry = slot(1, SignMode::Crc32);

/// Two application slots, one system zone and the staging zone, all
/// authenticated with `sign_mode`.
pub fn test_table_with(sign_mode: SignMode) -> ZoneTable {
    ZoneTable::new(
        &[
            slot(0, sign_mode),
            slot(1, sign_mode),
            sys_zone(sign_mode),
            staging_zone(sign_mode),
        ],
        OTA_ZONE,
    )
    .unwrap()
}

pub fn test_table() -> ZoneTable {
    test_table_with(SignMode::Crc32)
}

pub struct TestBoard;

impl BoardConfig for TestBoard {
    const VENDOR_ID: u32 = VENDOR_ID;
    const DEVICE_ID: u32 = DEVICE_ID;
    const BOOTLOADER_HEADER_OFFSET: u32 = BOOT_HEADER_OFFSET;
    const OTA_ZONE_ID: u8 = OTA_ZONE;
    const AES_IV: [u8; 16] = TEST_IV;
    const RECV_TIMEOUT_MS: u32 = 1;
    const MAX_RECV_RETRIES: u32 = 3;
}

// Flash

/// NOR flash in RAM: erase sets bytes to 0xFF, programming can only clear
/// bits. Both windows read the same bytes.
pub struct FakeFlash {
    mem: RefCell<Vec<u8>>,
    protected: Cell<bool>,
    erases: Cell<usize>,
    failing_write: Cell<Option<u32>>,
}

impl FakeFlash {
    pub fn new() -> Self {
        Self {
            mem: RefCell::new(std::vec![0xFF; FLASH_SIZE as usize]),
            protected: Cell::new(true),
            erases: Cell::new(0),
            failing_write: Cell::new(None),
        }
    }

    /// Write an executable bootloader header pointing at `table`, and the
    /// table itself. Returns the table offset.
    pub fn install_zone_table(&self, table: &ZoneTable) -> u32 {
        let header = PartitionHeader {
            validity: ValidityFlag::Executable,
            version: VersionRecord {
                vendor_id: VENDOR_ID,
                device_id: DEVICE_ID,
                ..Default::default()
            },
            flags: ZoneFlags::default(),
            address: 0,
            size: 0,
            entry_point: 0,
            reserved: [ZONE_TABLE_OFFSET, 0, 0, 0],
            checksum: 0,
            crc32: 0,
        };
        self.load(BOOT_HEADER_OFFSET, &header.to_bytes());
        let mut buf = [0u8; ZONE_TABLE_MAX_LEN];
        let len = table.serialize(&mut buf);
        self.load(ZONE_TABLE_OFFSET, &buf[..len]);
        ZONE_TABLE_OFFSET
    }

    /// Overwrite memory directly, bypassing NOR semantics.
    pub fn load(&self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.mem.borrow_mut()[start..start + data.len()].copy_from_slice(data);
    }

    pub fn poke(&self, address: u32, byte: u8) {
        self.mem.borrow_mut()[address as usize] = byte;
    }

    pub fn poke_u32(&self, address: u32, value: u32) {
        self.load(address, &value.to_le_bytes());
    }

    pub fn flip_bit(&self, address: u32, bit: u8) {
        self.mem.borrow_mut()[address as usize] ^= 1 << bit;
    }

    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let start = address as usize;
        self.mem.borrow()[start..start + len].to_vec()
    }

    pub fn peek_u32(&self, address: u32) -> u32 {
        read_u32_le(&self.mem.borrow(), address as usize)
    }

    pub fn erase_count(&self) -> usize {
        self.erases.get()
    }

    pub fn is_write_protected(&self) -> bool {
        self.protected.get()
    }

    /// Make every write covering `address` fail.
    pub fn fail_writes_at(&self, address: u32) {
        self.failing_write.set(Some(address));
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, ErrorCode> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(ErrorCode::SIZE)?;
        if end > FLASH_SIZE as usize {
            return Err(ErrorCode::SIZE);
        }
        Ok(start..end)
    }
}

impl FlashController for FakeFlash {
    fn size(&self) -> u32 {
        FLASH_SIZE
    }

    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn read(&self, _mapping: Mapping, offset: u32, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.mem.borrow()[range]);
        Ok(())
    }

    fn write(&self, offset: u32, buf: &[u8]) -> Result<(), ErrorCode> {
        if self.protected.get() {
            return Err(ErrorCode::OFF);
        }
        let range = self.range(offset, buf.len())?;
        if let Some(bad) = self.failing_write.get() {
            if range.contains(&(bad as usize)) {
                return Err(ErrorCode::FAIL);
            }
        }
        for (cell, byte) in self.mem.borrow_mut()[range].iter_mut().zip(buf) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn erase(&self, offset: u32, len: u32) -> Result<(), ErrorCode> {
        if self.protected.get() {
            return Err(ErrorCode::OFF);
        }
        if offset % SECTOR_SIZE != 0 || len % SECTOR_SIZE != 0 {
            return Err(ErrorCode::INVAL);
        }
        let range = self.range(offset, len as usize)?;
        self.mem.borrow_mut()[range].fill(0xFF);
        self.erases.set(self.erases.get() + 1);
        Ok(())
    }

    fn set_write_protect(&self, enabled: bool) -> Result<(), ErrorCode> {
        self.protected.set(enabled);
        Ok(())
    }
}

// Efuse and board I/O

pub struct FakeEfuse {
    pub root_digest: Option<[u8; 32]>,
    pub level: SecureBootLevel,
    pub secure_download: bool,
    pub aes_key: Option<[u8; 32]>,
    pub boot_options: u32,
}

impl FakeEfuse {
    /// Development part: secure boot off, only the transfer key fused.
    pub fn new() -> Self {
        Self {
            root_digest: None,
            level: SecureBootLevel::Disabled,
            secure_download: false,
            aes_key: Some(TEST_AES_KEY),
            boot_options: 0,
        }
    }

    /// Secure boot on, with the root of trust matching the test key of
    /// `sign_mode`.
    pub fn trusting(sign_mode: SignMode) -> Self {
        let root_digest = match sign_mode {
            SignMode::Crc32 | SignMode::Sha256 => None,
            SignMode::EcdsaP256 => Some(sha256(&ecdsa_test_public_key())),
            SignMode::Rsa2048 => Some(sha256(&rsa_key_material())),
        };
        Self {
            root_digest,
            level: SecureBootLevel::Enabled,
            ..Self::new()
        }
    }
}

impl Efuse for FakeEfuse {
    fn root_key_digest(&self) -> Option<[u8; 32]> {
        self.root_digest
    }

    fn secure_boot_level(&self) -> SecureBootLevel {
        self.level
    }

    fn secure_download(&self) -> bool {
        self.secure_download
    }

    fn aes_key(&self) -> Option<[u8; 32]> {
        self.aes_key
    }

    fn boot_options(&self) -> u32 {
        self.boot_options
    }
}

pub struct RecordingIO {
    successes: Cell<usize>,
    failures: Cell<usize>,
}

impl RecordingIO {
    pub fn new() -> Self {
        Self {
            successes: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    pub fn successes(&self) -> usize {
        self.successes.get()
    }

    pub fn failures(&self) -> usize {
        self.failures.get()
    }
}

impl BootloaderIO for RecordingIO {
    fn signal_success(&self) {
        self.successes.set(self.successes.get() + 1);
    }

    fn signal_failure(&self) {
        self.failures.set(self.failures.get() + 1);
    }

    fn debug(&self, _msg: &str) {}
}

// Keys

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Deterministic xorshift generator.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }
}

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for TestRng {}

fn big(hex_digits: &str) -> BigUint {
    BigUint::from_bytes_be(&hex::decode(hex_digits).unwrap())
}

/// Fixed RSA-2048 key, e = 65537.
pub fn rsa_test_key() -> (RsaPrivateKey, RsaPublicKey) {
    let private = RsaPrivateKey::from_components(
        big(RSA_N),
        BigUint::from(RSA_E),
        big(RSA_D),
        std::vec![big(RSA_P), big(RSA_Q)],
    )
    .unwrap();
    let public = private.to_public_key();
    (private, public)
}

/// Modulus (big-endian) followed by the exponent (little-endian u32), as
/// embedded in an RSA signature block.
pub fn rsa_key_material() -> [u8; 260] {
    let (_, public) = rsa_test_key();
    let mut material = [0u8; 260];
    material[..256].copy_from_slice(&public.n().to_bytes_be());
    material[256..].copy_from_slice(&RSA_E.to_le_bytes());
    material
}

/// RSASSA-PSS (SHA-256, 32 byte salt) over a prehashed `digest`, big-endian.
pub fn rsa_pss_sign(digest: &[u8; 32]) -> Vec<u8> {
    let (private, _) = rsa_test_key();
    private
        .sign_with_rng(&mut TestRng::new(99), Pss::new::<Sha256>(), digest)
        .unwrap()
}

fn ecdsa_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[0x11u8; 32].into()).unwrap()
}

/// Uncompressed `x || y` of the P-256 test key.
pub fn ecdsa_test_public_key() -> [u8; 64] {
    let point = VerifyingKey::from(&ecdsa_signing_key()).to_encoded_point(false);
    let mut key = [0u8; 64];
    key.copy_from_slice(&point.as_bytes()[1..]);
    key
}

pub fn ecdsa_sign(digest: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let signature: Signature = ecdsa_signing_key().sign_prehash(digest).unwrap();
    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    (r, s)
}

// Images

/// Builds a complete zone image: header, signature block and payload.
pub struct ImageBuilder {
    zone_id: u8,
    version: u32,
    sign_mode: SignMode,
    payload_len: usize,
    flags: u32,
    validity: ValidityFlag,
    vendor_id: u32,
    entry_point: u32,
    bad_signature: bool,
}

impl ImageBuilder {
    pub fn new(zone_id: u8, version: u32) -> Self {
        Self {
            zone_id,
            version,
            sign_mode: SignMode::Crc32,
            payload_len: 2000,
            flags: 0,
            validity: ValidityFlag::Executable,
            vendor_id: VENDOR_ID,
            entry_point: 0x2000_0100,
            bad_signature: false,
        }
    }

    pub fn sign_mode(mut self, sign_mode: SignMode) -> Self {
        self.sign_mode = sign_mode;
        self
    }

    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn validity(mut self, validity: ValidityFlag) -> Self {
        self.validity = validity;
        self
    }

    pub fn vendor(mut self, vendor_id: u32) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn entry_point(mut self, entry_point: u32) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Corrupt the signature block before the CRC is computed, so only the
    /// signature check can catch it.
    pub fn bad_signature(mut self) -> Self {
        self.bad_signature = true;
        self
    }

    pub fn record(&self) -> VersionRecord {
        VersionRecord {
            vendor_id: self.vendor_id,
            device_id: DEVICE_ID,
            flash_id: 0,
            zone_id: self.zone_id as u32,
            rom_version: 1,
            version: self.version,
            build_date: 0x2025_0601,
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        let seed = self.version.wrapping_mul(31).wrapping_add(self.zone_id as u32);
        (0..self.payload_len)
            .map(|i| (i as u32).wrapping_mul(7).wrapping_add(seed) as u8)
            .collect()
    }

    pub fn build(&self) -> Vec<u8> {
        let payload = self.payload_bytes();
        let header_len = self.sign_mode.header_len() as usize;
        let mut header = PartitionHeader {
            validity: self.validity,
            version: self.record(),
            flags: ZoneFlags::from_bits(self.flags),
            address: 0x2000_0000,
            size: payload.len() as u32,
            entry_point: self.entry_point,
            reserved: [0; 4],
            checksum: 0,
            crc32: 0,
        };
        header.checksum = checksum(&header, &payload);

        let mut block = std::vec![0u8; self.sign_mode.block_len()];
        let signed_digest = |key_material: &[u8]| {
            let mut hasher = Sha256::new();
            hasher.update(header.neutralized_for_signature());
            hasher.update(key_material);
            hasher.update(&payload);
            let digest: [u8; 32] = hasher.finalize().into();
            digest
        };
        match self.sign_mode {
            SignMode::Crc32 => {}
            SignMode::Sha256 => block.copy_from_slice(&signed_digest(&[])),
            SignMode::EcdsaP256 => {
                let key = ecdsa_test_public_key();
                let (r, s) = ecdsa_sign(&signed_digest(&key));
                block[..64].copy_from_slice(&key);
                block[64..96].copy_from_slice(&r);
                block[96..].copy_from_slice(&s);
            }
            SignMode::Rsa2048 => {
                let key = rsa_key_material();
                let signature = rsa_pss_sign(&signed_digest(&key));
                block[..260].copy_from_slice(&key);
                block[260..].copy_from_slice(&signature);
            }
        }
        if self.bad_signature {
            let last = block.len() - 1;
            block[last] ^= 0x01;
        }

        let mut image = std::vec![0u8; header_len + payload.len()];
        image[HEADER_FIXED_LEN..HEADER_FIXED_LEN + block.len()].copy_from_slice(&block);
        image[header_len..].copy_from_slice(&payload);
        let body_len = (image.len() - HEADER_FIXED_LEN) as u32;
        header.crc32 = image_crc(&header, body_len, |offset, buf| {
            let start = HEADER_FIXED_LEN + offset as usize;
            buf.copy_from_slice(&image[start..start + buf.len()]);
            Ok::<(), ()>(())
        })
        .unwrap();
        image[..HEADER_FIXED_LEN].copy_from_slice(&header.to_bytes());
        image
    }
}

/// AES-256-CBC encrypt everything past `header_len` with the test key,
/// the way a host prepares an encrypted transfer.
pub fn encrypt_payload(image: &mut [u8], header_len: usize) {
    let mut cipher = cbc::Encryptor::<aes::Aes256>::new_from_slices(&TEST_AES_KEY, &TEST_IV).unwrap();
    for block in image[header_len..].chunks_exact_mut(16) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

// Async plumbing

/// Run `fut` to completion while the flash worker serves its jobs.
pub fn drive<F: FlashController + ?Sized, R>(
    worker: &FlashWorker<'_, F>,
    fut: impl Future<Output = R>,
) -> R {
    block_on(async {
        match select(fut, worker.run()).await {
            Either::First(result) => result,
            Either::Second(()) => unreachable!("flash worker stopped"),
        }
    })
}

pub fn run_with_worker<'a, R, Fut>(
    flash: &'a FakeFlash,
    queue: &'a FlashQueue,
    body: impl FnOnce(FlashClient<'a>) -> Fut,
) -> R
where
    Fut: Future<Output = R>,
{
    let worker = FlashWorker::new(flash, queue);
    drive(&worker, body(FlashClient::new(queue)))
}

// Transport

/// Transport fed from a script. `None` entries are receive timeouts; an
/// exhausted script reads as a dead link.
pub struct ScriptTransport {
    input: VecDeque<Option<u8>>,
    output: Vec<u8>,
}

/// A decoded response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub op: u8,
    pub value: u32,
    pub payload: Vec<u8>,
    pub status: u8,
    pub error: u8,
}

impl ScriptTransport {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
        }
    }

    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().map(|&b| Some(b)));
    }

    pub fn push_timeouts(&mut self, count: usize) {
        self.input.extend(core::iter::repeat(None).take(count));
    }

    /// SLIP-frame `frame` and queue it.
    pub fn push_frame(&mut self, frame: &[u8]) {
        let mut out = std::vec![0u8; encoded_len(frame)];
        let n = encode_into(frame, &mut out).unwrap();
        self.push_raw(&out[..n]);
    }

    pub fn push_command(&mut self, op: u8, payload: &[u8]) {
        self.push_frame(&command_frame(op, 0, payload));
    }

    pub fn push_data_command(&mut self, op: u8, fields: [u32; 3], data: &[u8]) {
        self.push_frame(&data_command_frame(op, fields, data));
    }

    pub fn responses(&self) -> Vec<Response> {
        let mut frames = Vec::new();
        let mut current = Vec::new();
        for event in decode(&self.output) {
            match event {
                SlipEvent::FrameStart => current.clear(),
                SlipEvent::Byte(b) => current.push(b),
                SlipEvent::FrameEnd => frames.push(parse_response(&current)),
                SlipEvent::FramingError => panic!("bad escape in response"),
            }
        }
        frames
    }
}

impl Transport for ScriptTransport {
    async fn send_byte(&mut self, byte: u8) -> Result<(), ErrorCode> {
        self.output.push(byte);
        Ok(())
    }

    async fn recv_byte(&mut self) -> Result<u8, ErrorCode> {
        loop {
            match self.input.pop_front() {
                Some(Some(byte)) => return Ok(byte),
                Some(None) => {}
                None => return Err(ErrorCode::OFF),
            }
        }
    }

    async fn recv_byte_timeout(&mut self, _timeout_ms: u32) -> Result<Option<u8>, ErrorCode> {
        self.input.pop_front().ok_or(ErrorCode::OFF)
    }
}

pub fn command_frame(op: u8, checksum: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = std::vec![DIRECTION_COMMAND, op];
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// FLASH_DATA / OTA_WRITE_DATA frame: data length, the three `fields`,
/// then `data`, with the data checksum in the frame header.
pub fn data_command_frame(op: u8, fields: [u32; 3], data: &[u8]) -> Vec<u8> {
    let mut payload = std::vec![0u8; DATA_HEADER_LEN];
    write_u32_le(&mut payload, 0, data.len() as u32);
    write_u32_le(&mut payload, 4, fields[0]);
    write_u32_le(&mut payload, 8, fields[1]);
    write_u32_le(&mut payload, 12, fields[2]);
    payload.extend_from_slice(data);
    command_frame(op, data_checksum(data), &payload)
}

fn parse_response(frame: &[u8]) -> Response {
    assert_eq!(frame[0], 0x01, "response direction");
    let len = read_u16_le(frame, 2) as usize;
    assert_eq!(frame.len(), 8 + len, "response length");
    Response {
        op: frame[1],
        value: read_u32_le(frame, 4),
        payload: frame[8..8 + len - 2].to_vec(),
        status: frame[8 + len - 2],
        error: frame[8 + len - 1],
    }
}
