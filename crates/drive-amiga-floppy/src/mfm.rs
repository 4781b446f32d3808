//! Amiga MFM track codec.
//!
//! A track holds 11 (DD) or 22 (HD) sectors in the AmigaDOS raw format. Each
//! longword of payload is split into its odd and even bit halves, and each
//! half is MFM-encoded separately: every data bit is preceded by a clock bit
//! that is set only between two zero data bits.
//!
//! Sector layout (HRM Appendix C):
//!   gap ($AAAA x2), sync ($4489 x2), info long (format/track/sector/to-gap),
//!   16 label bytes, header checksum, data checksum, 512 data bytes.

use format_adf::SECTOR_SIZE;

/// MFM bytes per encoded sector: 4 gap + 4 sync + 8 info + 32 label
/// + 8 header checksum + 8 data checksum + 1024 data.
pub const SECTOR_MFM_BYTES: usize = 1088;

/// Inter-sector gap filler appended after the last sector.
pub const TRACK_GAP_BYTES: usize = 700;

/// Raw MFM track length for a given sector count (12,668 bytes for DD).
#[must_use]
pub const fn track_len(sectors: usize) -> usize {
    sectors * SECTOR_MFM_BYTES + TRACK_GAP_BYTES
}

/// The MFM bit pattern of a sync mark ($A1 with a missing clock bit).
pub const SYNC_WORD: u16 = 0x4489;

/// Odd-position bits of a longword (31, 29, ..., 1), packed into 16 bits.
const fn odd_bits(val: u32) -> u16 {
    let mut out = 0u16;
    let mut i = 0;
    while i < 16 {
        out |= (((val >> (1 + i * 2)) & 1) as u16) << i;
        i += 1;
    }
    out
}

/// Even-position bits of a longword (30, 28, ..., 0), packed into 16 bits.
const fn even_bits(val: u32) -> u16 {
    let mut out = 0u16;
    let mut i = 0;
    while i < 16 {
        out |= (((val >> (i * 2)) & 1) as u16) << i;
        i += 1;
    }
    out
}

/// Rebuild a longword from its odd/even halves.
const fn interleave(odd: u16, even: u16) -> u32 {
    let mut out = 0u32;
    let mut i = 0;
    while i < 16 {
        out |= (((even >> i) & 1) as u32) << (i * 2);
        out |= (((odd >> i) & 1) as u32) << (i * 2 + 1);
        i += 1;
    }
    out
}

/// MFM-encode 16 data bits into a 32-bit cell stream, MSB first.
/// The clock bit ahead of the first data bit assumes a preceding zero.
fn mfm_encode(data: u16) -> u32 {
    let mut mfm = 0u32;
    for i in (0..16).rev() {
        let bit = (data >> i) & 1;
        let prev = if i < 15 { (data >> (i + 1)) & 1 } else { 0 };
        let clock = u32::from(prev == 0 && bit == 0);
        let cell = (15 - i) * 2;
        mfm |= clock << (31 - cell);
        mfm |= u32::from(bit) << (30 - cell);
    }
    mfm
}

/// Extract the 16 data bits from a 32-bit MFM cell stream.
fn mfm_decode(mfm: u32) -> u16 {
    let mut data = 0u16;
    for i in 0..16 {
        data |= (((mfm >> (30 - i * 2)) & 1) as u16) << (15 - i);
    }
    data
}

/// Encode one longword as odd half then even half.
fn encode_long(buf: &mut Vec<u8>, val: u32) -> (u32, u32) {
    let odd = mfm_encode(odd_bits(val));
    let even = mfm_encode(even_bits(val));
    buf.extend_from_slice(&odd.to_be_bytes());
    buf.extend_from_slice(&even.to_be_bytes());
    (odd, even)
}

fn read_be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Decode one odd/even longword pair starting at `at`.
fn decode_long(buf: &[u8], at: usize) -> u32 {
    let odd = mfm_decode(read_be32(buf, at));
    let even = mfm_decode(read_be32(buf, at + 4));
    interleave(odd, even)
}

/// Encode a full track of sector payloads into raw MFM.
///
/// `sectors` must hold `count * 512` bytes; `track_nr` is `cyl * 2 + head`.
#[must_use]
pub fn encode_track(sectors: &[u8], track_nr: u8, count: usize) -> Vec<u8> {
    assert_eq!(sectors.len(), count * SECTOR_SIZE);

    let mut buf = Vec::with_capacity(track_len(count));
    for sector in 0..count {
        let payload = &sectors[sector * SECTOR_SIZE..(sector + 1) * SECTOR_SIZE];
        encode_sector(&mut buf, track_nr, sector as u8, count as u8, payload);
    }
    buf.resize(track_len(count), 0xAA);
    buf
}

fn encode_sector(buf: &mut Vec<u8>, track: u8, sector: u8, count: u8, payload: &[u8]) {
    // Gap and sync marks
    buf.extend_from_slice(&[0xAA, 0xAA, 0xAA, 0xAA]);
    buf.extend_from_slice(&SYNC_WORD.to_be_bytes());
    buf.extend_from_slice(&SYNC_WORD.to_be_bytes());

    // Info long: format $FF, track, sector, sectors until gap
    let info = u32::from_be_bytes([0xFF, track, sector, count - sector - 1]);
    let mut hdr_cksum = 0u32;
    let (odd, even) = encode_long(buf, info);
    hdr_cksum ^= odd ^ even;

    // Sector label (unused, zero) still participates in the header checksum
    for _ in 0..4 {
        let (odd, even) = encode_long(buf, 0);
        hdr_cksum ^= odd ^ even;
    }
    encode_long(buf, hdr_cksum);

    // Data checksum is computed over the encoded halves, so encode the
    // payload into a scratch buffer first.
    let mut data = Vec::with_capacity(SECTOR_SIZE * 2);
    let mut data_cksum = 0u32;
    let mut odd_half = Vec::with_capacity(SECTOR_SIZE);
    let mut even_half = Vec::with_capacity(SECTOR_SIZE);
    for chunk in payload.chunks_exact(4) {
        let long = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let odd = mfm_encode(odd_bits(long));
        let even = mfm_encode(even_bits(long));
        data_cksum ^= odd ^ even;
        odd_half.extend_from_slice(&odd.to_be_bytes());
        even_half.extend_from_slice(&even.to_be_bytes());
    }
    data.extend_from_slice(&odd_half);
    data.extend_from_slice(&even_half);

    encode_long(buf, data_cksum);
    buf.extend_from_slice(&data);
}

/// Decode a raw MFM track back into ordered sector payloads.
///
/// Returns `None` if any sector is missing or fails its checksums.
#[must_use]
pub fn decode_track(mfm: &[u8], count: usize) -> Option<Vec<u8>> {
    let mut out = vec![0u8; count * SECTOR_SIZE];
    let mut seen = vec![false; count];

    let sync = SYNC_WORD.to_be_bytes();
    let mut at = 0;
    while at + 4 <= mfm.len() {
        if mfm[at..at + 2] != sync || mfm[at + 2..at + 4] != sync {
            at += 1;
            continue;
        }

        // Sector body starts after the double sync mark
        let body = at + 4;
        if body + SECTOR_MFM_BYTES - 8 > mfm.len() {
            break;
        }

        let info = decode_long(mfm, body);
        let [format, _track, sector, _to_gap] = info.to_be_bytes();
        if format != 0xFF || sector as usize >= count {
            at += 1;
            continue;
        }

        let mut hdr_cksum = 0u32;
        for i in 0..5 {
            hdr_cksum ^= read_be32(mfm, body + i * 8) ^ read_be32(mfm, body + i * 8 + 4);
        }
        if decode_long(mfm, body + 40) != hdr_cksum {
            return None;
        }

        let data_at = body + 56;
        let mut data_cksum = 0u32;
        for i in 0..256 {
            data_cksum ^= read_be32(mfm, data_at + i * 4);
        }
        if decode_long(mfm, body + 48) != data_cksum {
            return None;
        }

        let dst = &mut out[sector as usize * SECTOR_SIZE..(sector as usize + 1) * SECTOR_SIZE];
        for i in 0..128 {
            let odd = mfm_decode(read_be32(mfm, data_at + i * 4));
            let even = mfm_decode(read_be32(mfm, data_at + 512 + i * 4));
            dst[i * 4..i * 4 + 4].copy_from_slice(&interleave(odd, even).to_be_bytes());
        }
        seen[sector as usize] = true;

        at = body + SECTOR_MFM_BYTES - 8;
    }

    seen.iter().all(|&s| s).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_even_split_reconstructs() {
        for val in [0u32, 0xFFFF_FFFF, 0xDEAD_BEEF, 0x1234_5678, 0xAAAA_5555] {
            assert_eq!(interleave(odd_bits(val), even_bits(val)), val);
        }
    }

    #[test]
    fn mfm_cell_round_trip() {
        for data in [0x0000u16, 0xFFFF, 0xAAAA, 0x5555, 0xDEAD, 0x1234] {
            assert_eq!(mfm_decode(mfm_encode(data)), data, "${data:04X}");
        }
    }

    #[test]
    fn zero_data_is_all_clock_bits() {
        assert_eq!(mfm_encode(0x0000), 0xAAAA_AAAA);
        assert_eq!(mfm_encode(0xFFFF), 0x5555_5555);
    }

    #[test]
    fn encoded_track_has_one_sync_pair_per_sector() {
        let sectors = vec![0u8; 11 * SECTOR_SIZE];
        let mfm = encode_track(&sectors, 0, 11);
        assert_eq!(mfm.len(), track_len(11));

        let sync = [0x44u8, 0x89, 0x44, 0x89];
        let count = mfm.windows(4).filter(|w| *w == sync).count();
        assert_eq!(count, 11);
    }

    #[test]
    fn track_codec_round_trip() {
        let mut sectors = vec![0u8; 11 * SECTOR_SIZE];
        for (i, b) in sectors.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(31).wrapping_add((i >> 9) as u8);
        }
        let mfm = encode_track(&sectors, 37, 11);
        let decoded = decode_track(&mfm, 11).expect("all sectors recovered");
        assert_eq!(decoded, sectors);
    }

    #[test]
    fn corrupted_data_fails_checksum() {
        let sectors = vec![0x5Au8; 11 * SECTOR_SIZE];
        let mut mfm = encode_track(&sectors, 0, 11);
        // Flip a data bit in the first sector's payload area
        mfm[4 + 4 + 56 + 100] ^= 0x02;
        assert!(decode_track(&mfm, 11).is_none());
    }

    #[test]
    fn truncated_track_is_rejected() {
        let sectors = vec![0u8; 11 * SECTOR_SIZE];
        let mfm = encode_track(&sectors, 0, 11);
        assert!(decode_track(&mfm[..SECTOR_MFM_BYTES * 5], 11).is_none());
    }
}
