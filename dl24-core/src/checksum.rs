//! DL24P checksum algorithm
//!
//! Both framed protocols protect their frames the same way:
//! 1. Sum every covered byte as an unsigned value
//! 2. XOR the sum with 0x44
//! 3. Mask to 8 bits
//!
//! The broadcast protocol covers message type through payload; the polling
//! protocol covers the type/sub-command pair through the report payload.

use tracing::trace;

/// Calculate the frame checksum over the covered bytes
///
/// # Examples
///
/// ```
/// use dl24_core::checksum;
///
/// assert_eq!(checksum::calculate(&[]), 0x44);
/// assert_eq!(checksum::calculate(&[0x44]), 0x00);
/// ```
pub fn calculate(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
    let checksum = ((sum ^ 0x44) & 0xFF) as u8;

    trace!(
        len = data.len(),
        checksum = format!("0x{:02X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify a received checksum
pub fn verify(data: &[u8], expected: u8) -> bool {
    calculate(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(calculate(&[]), 0x44);
    }

    #[test]
    fn test_checksum_single_byte() {
        assert_eq!(calculate(&[0x44]), 0x00);
    }

    #[test]
    fn test_checksum_verify() {
        let data = [0x11, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00];
        let checksum = calculate(&data);

        assert!(verify(&data, checksum));
        assert!(!verify(&data, checksum.wrapping_add(1)));
    }

    #[test]
    fn test_checksum_wraps_to_eight_bits() {
        let data = [0xFF; 1000];
        let sum: u32 = 0xFF * 1000;
        assert_eq!(calculate(&data), ((sum ^ 0x44) & 0xFF) as u8);
    }

    proptest! {
        #[test]
        fn checksum_matches_definition(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
            prop_assert_eq!(calculate(&data), ((sum ^ 0x44) & 0xFF) as u8);
        }
    }
}
