//! 6-bit transmission encoding.
//!
//! The radio PHY wants DC-balanced bytes with frequent transitions, so
//! raw fields are bit-packed into 6-bit groups and each group is mapped
//! to one of 64 transmission symbols, every one carrying exactly four
//! set bits. The start-of-frame byte is reserved out of the alphabet,
//! so no run of payload symbols can alias a frame boundary.
//!
//! Payload fields carry two extra leading bits for the encryption
//! method, which is why a payload of `n` raw bytes occupies
//! `ceil((8n + 2) / 6)` symbols on the wire.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::CodecError;
use crate::types::{Did, NetworkId};

/// The 64 transmission symbols, indexed by 6-bit value.
pub const ALPHABET: [u8; 64] = [
    0x0F, 0x17, 0x1B, 0x1D, 0x1E, 0x27, 0x2B, 0x2D, 0x2E, 0x33, 0x35, 0x36, 0x39, 0x3A, 0x3C,
    0x47, 0x4B, 0x4D, 0x4E, 0x53, 0x55, 0x56, 0x59, 0x5A, 0x5C, 0x63, 0x65, 0x66, 0x69, 0x6A,
    0x6C, 0x71, 0x72, 0x74, 0x78, 0x87, 0x8B, 0x8D, 0x8E, 0x93, 0x95, 0x96, 0x99, 0x9A, 0x9C,
    0xA3, 0xA5, 0xA6, 0xA9, 0xAA, 0xAC, 0xB1, 0xB2, 0xB4, 0xB8, 0xC3, 0xC5, 0xC6, 0xC9, 0xCA,
    0xCC, 0xD1, 0xD2, 0xD4,
];

/// Radio preamble, three alternating-bit bytes.
pub const PREAMBLE: [u8; 3] = [0x55, 0x55, 0x55];

/// Start-of-frame byte. Deliberately not a transmission symbol.
pub const SOF: u8 = 0xF0;

/// Preamble plus start-of-frame.
pub const HEADER: [u8; 4] = [0x55, 0x55, 0x55, SOF];

const INVALID: u8 = 0xFF;

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 64 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

const DECODE: [u8; 256] = build_decode_table();

fn decode_symbol(symbol: u8) -> Result<u8, CodecError> {
    match DECODE[symbol as usize] {
        INVALID => Err(CodecError::InvalidSymbol(symbol)),
        value => Ok(value),
    }
}

/// Number of symbols occupied by `prefix_bits` bits followed by
/// `raw_len` whole bytes.
const fn stream_len(prefix_bits: usize, raw_len: usize) -> usize {
    (prefix_bits + raw_len * 8 + 5) / 6
}

/// Encoded length of a payload of `raw_len` raw bytes.
#[must_use]
pub const fn encoded_payload_len(raw_len: usize) -> usize {
    stream_len(2, raw_len)
}

/// Pack `prefix_bits` low bits of `prefix`, then `raw`, MSB-first into
/// 6-bit symbols. The final symbol is zero-padded.
fn encode_stream(prefix: u8, prefix_bits: u32, raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(stream_len(prefix_bits as usize, raw.len()));
    let mut acc: u32 = u32::from(prefix) & ((1 << prefix_bits) - 1);
    let mut nbits = prefix_bits;

    for &byte in raw {
        acc = (acc << 8) | u32::from(byte);
        nbits += 8;
        while nbits >= 6 {
            nbits -= 6;
            out.push(ALPHABET[((acc >> nbits) & 0x3F) as usize]);
        }
    }
    if nbits > 0 {
        out.push(ALPHABET[((acc << (6 - nbits)) & 0x3F) as usize]);
    }
    out
}

/// Inverse of [`encode_stream`]. Pad bits in the final symbol are
/// ignored.
fn decode_stream(
    encoded: &[u8],
    prefix_bits: u32,
    raw_len: usize,
) -> Result<(u8, Vec<u8>), CodecError> {
    let expected = stream_len(prefix_bits as usize, raw_len);
    if encoded.len() != expected {
        return Err(CodecError::InvalidLength {
            expected,
            actual: encoded.len(),
        });
    }

    let mut raw = Vec::with_capacity(raw_len);
    let mut acc: u32 = 0;
    let mut nbits: u32 = 0;
    let mut prefix: u8 = 0;
    let mut prefix_taken = prefix_bits == 0;

    for &symbol in encoded {
        acc = (acc << 6) | u32::from(decode_symbol(symbol)?);
        nbits += 6;
        if !prefix_taken && nbits >= prefix_bits {
            nbits -= prefix_bits;
            prefix = ((acc >> nbits) & ((1 << prefix_bits) - 1)) as u8;
            acc &= (1 << nbits) - 1;
            prefix_taken = true;
        }
        while prefix_taken && nbits >= 8 && raw.len() < raw_len {
            nbits -= 8;
            raw.push(((acc >> nbits) & 0xFF) as u8);
        }
    }
    Ok((prefix, raw))
}

/// Encode a raw payload plus its 2-bit encryption-method field.
#[must_use]
pub fn encode_payload(method_bits: u8, raw: &[u8]) -> Vec<u8> {
    debug_assert!(method_bits < 4);
    encode_stream(method_bits, 2, raw)
}

/// Decode an encoded payload of known raw length. Returns the 2-bit
/// encryption-method field and the raw bytes.
pub fn decode_payload(encoded: &[u8], raw_len: usize) -> Result<(u8, Vec<u8>), CodecError> {
    decode_stream(encoded, 2, raw_len)
}

/// Encode a 12-bit device address as two symbols.
#[must_use]
pub fn encode_did(did: Did) -> [u8; 2] {
    let raw = did.raw();
    [
        ALPHABET[((raw >> 6) & 0x3F) as usize],
        ALPHABET[(raw & 0x3F) as usize],
    ]
}

/// Decode a 12-bit device address from two symbols.
pub fn decode_did(encoded: &[u8; 2]) -> Result<Did, CodecError> {
    let high = decode_symbol(encoded[0])?;
    let low = decode_symbol(encoded[1])?;
    let raw = (u16::from(high) << 6) | u16::from(low);
    Ok(Did::new_unchecked(raw))
}

/// Encode a 36-bit network identifier as six symbols.
#[must_use]
pub fn encode_nid(nid: NetworkId) -> [u8; 6] {
    let raw = nid.raw();
    let mut out = [0u8; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 30 - 6 * i;
        *slot = ALPHABET[((raw >> shift) & 0x3F) as usize];
    }
    out
}

/// Decode a 36-bit network identifier from six symbols.
pub fn decode_nid(encoded: &[u8; 6]) -> Result<NetworkId, CodecError> {
    let mut raw: u64 = 0;
    for &symbol in encoded {
        raw = (raw << 6) | u64::from(decode_symbol(symbol)?);
    }
    Ok(NetworkId::new_unchecked(raw))
}

/// Encode a raw 12-bit packet-type identifier as two symbols.
#[must_use]
pub fn encode_pid_field(raw_pid: u16) -> [u8; 2] {
    debug_assert!(raw_pid <= 0xFFF);
    [
        ALPHABET[((raw_pid >> 6) & 0x3F) as usize],
        ALPHABET[(raw_pid & 0x3F) as usize],
    ]
}

/// Decode a raw 12-bit packet-type identifier from two symbols.
pub fn decode_pid_field(encoded: &[u8; 2]) -> Result<u16, CodecError> {
    let high = decode_symbol(encoded[0])?;
    let low = decode_symbol(encoded[1])?;
    Ok((u16::from(high) << 6) | u16::from(low))
}

/// Encode the high 6 bits of a message CRC as one symbol.
#[must_use]
pub fn encode_msg_crc(crc: u8) -> u8 {
    ALPHABET[(crc >> 2) as usize]
}

/// Decode a message CRC symbol back to its high-6-bit form (low two
/// bits zero).
pub fn decode_msg_crc(symbol: u8) -> Result<u8, CodecError> {
    Ok(decode_symbol(symbol)? << 2)
}

/// Encode a hops field (3-bit hops taken, 3-bit hops allowed) as one
/// symbol.
#[must_use]
pub fn encode_hops(hops: u8, max_hops: u8) -> u8 {
    ALPHABET[(((hops & 0x7) << 3) | (max_hops & 0x7)) as usize]
}

/// Decode a hops symbol into (hops, max_hops).
pub fn decode_hops(symbol: u8) -> Result<(u8, u8), CodecError> {
    let value = decode_symbol(symbol)?;
    Ok((value >> 3, value & 0x7))
}
