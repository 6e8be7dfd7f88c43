//! Shared CRC primitives.
//!
//! Three checksums appear on the wire:
//! - CRC-16-CCITT with init 0xFFFF and final XOR 0xFFFF (poly 0x1021),
//!   used by DAB for FIB, EOH and MST checksums and by EDI AF packets.
//! - CRC-32 MPEG-2, used by PSI/MPE sections.
//! - CRC-32 (ISO HDLC), used by GSE end fragments.

use crc::{Crc, CRC_16_GENIBUS, CRC_32_ISO_HDLC, CRC_32_MPEG_2};

const CRC16_DAB: Crc<u16> = Crc::<u16>::new(&CRC_16_GENIBUS);
const CRC32_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);
const CRC32_DVB: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16-CCITT over `data` with init 0xFFFF and final XOR 0xFFFF.
pub fn crc16_dab(data: &[u8]) -> u16 {
    CRC16_DAB.checksum(data)
}

/// Verify a buffer whose last two bytes are a big-endian CRC-16 over the
/// preceding bytes.
pub fn check_crc16_dab(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let (body, tail) = data.split_at(data.len() - 2);
    let stored = u16::from_be_bytes([tail[0], tail[1]]);
    crc16_dab(body) == stored
}

/// CRC-32 as used by MPEG-2 / DVB PSI sections.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    CRC32_MPEG2.checksum(data)
}

/// CRC-32 (ISO HDLC) as carried by GSE end fragments.
pub fn crc32_gse(data: &[u8]) -> u32 {
    CRC32_DVB.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_check_value() {
        // Catalog check value for CRC-16/GENIBUS.
        assert_eq!(crc16_dab(b"123456789"), 0xD64E);
    }

    #[test]
    fn crc16_roundtrip() {
        let mut buf = vec![0x05u8, 0x00, 0x10, 0x23, 0xAA, 0x55];
        let crc = crc16_dab(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        assert!(check_crc16_dab(&buf));

        // A single flipped bit must fail.
        buf[1] ^= 0x01;
        assert!(!check_crc16_dab(&buf));
    }

    #[test]
    fn crc16_too_short() {
        assert!(!check_crc16_dab(&[0xFF]));
    }

    #[test]
    fn crc32_check_values() {
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_E6E7);
        assert_eq!(crc32_gse(b"123456789"), 0xCBF4_3926);
    }
}
