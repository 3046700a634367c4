// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Error types for the secure bootloader

/// Standard errors returned by the hardware collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 0,
    /// Underlying system is busy; retry
    BUSY = 1,
    /// The state requested is already set
    ALREADY = 2,
    /// The component is powered down
    OFF = 3,
    /// An invalid parameter was passed
    INVAL = 5,
    /// Parameter passed was too large
    SIZE = 6,
    /// Operation canceled by a call
    CANCEL = 7,
    /// Operation or command is unsupported
    NOSUPPORT = 9,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootError {
    /// Validity flag holds none of the known values
    InvalidHeader,

    /// Sparse header/payload checksum does not match
    ChecksumFailed,

    /// CRC over header and payload does not match
    CrcMismatch,

    /// Signature block is malformed
    InvalidSignature,

    /// Signature verification failed
    VerificationFailed,

    /// Embedded public key does not hash to the fused root of trust
    UntrustedKey,

    /// Sign mode or padding is not wired to a handler
    UnsupportedAlgorithm,

    /// Zone table missing, corrupted or inconsistent
    InvalidZoneTable,

    /// Zone region lies outside flash or is too small for its image
    InvalidZoneRegion,

    /// No zone matches the request
    ZoneNotFound,

    /// No verified image is available to boot
    NoValidImage,

    /// Hash computation failed
    HashError,

    /// Crypto accelerator failed
    CryptoFailed,

    /// Flash Operation Failed
    FlashOperationFailed,
}
