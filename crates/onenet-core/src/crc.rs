//! Order-8 CRC used for payload and parameter-block checksums.
//!
//! Polynomial 0x07, MSB-first, no final XOR. The init value is a fixed
//! constant so a retransmitted payload always carries the same CRC.

const POLY: u8 = 0x07;

/// Init value for payload CRCs.
pub const PAYLOAD_CRC_INIT: u8 = 0xFF;

/// Init value for persisted parameter-block CRCs.
pub const PARAM_CRC_INIT: u8 = 0xFF;

/// Compute the order-8 CRC of `data`, continuing from `starting`.
#[must_use]
pub fn crc8(data: &[u8], starting: u8) -> u8 {
    let mut crc = starting;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_returns_init() {
        assert_eq!(crc8(&[], PAYLOAD_CRC_INIT), PAYLOAD_CRC_INIT);
    }

    #[test]
    fn deterministic_over_identical_bytes() {
        let data = b"onenet payload bytes";
        assert_eq!(crc8(data, PAYLOAD_CRC_INIT), crc8(data, PAYLOAD_CRC_INIT));
    }

    #[test]
    fn chained_computation_matches_one_shot() {
        let data = b"abcdefgh";
        let partial = crc8(&data[..3], PAYLOAD_CRC_INIT);
        assert_eq!(crc8(&data[3..], partial), crc8(data, PAYLOAD_CRC_INIT));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn single_bit_flip_changes_crc(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            byte_idx in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let idx = byte_idx.index(data.len());
            let mut corrupted = data.clone();
            corrupted[idx] ^= 1 << bit;

            prop_assert_ne!(
                crc8(&data, PAYLOAD_CRC_INIT),
                crc8(&corrupted, PAYLOAD_CRC_INIT)
            );
        }
    }
}
