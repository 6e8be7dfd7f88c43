//! ETI-NA (E1/G.704) recovery into ETI-NI frames.
//!
//! The carrier delivers an E1 byte stream with unknown byte offset, bit
//! alignment and polarity. Recovery proceeds in four stages, each with its
//! own state: padding-offset detection, bit-level E1 sync acquisition,
//! multiframe sync, and deinterleaving into a 6144-byte ETI-NI frame.

use bytes::{Bytes, BytesMut};
use log::{debug, info};

use crate::eti::{EtiFrame, ETI_NI_FRAME_SIZE, PAD_BYTE};

/// One E1/G.704 frame is 32 bytes.
pub const E1_FRAME_SIZE: usize = 32;

/// The E1 sync value, carried in the low 7 bits of the frame's first byte.
const E1_SYNC_VAL: u8 = 0x1B;
const E1_SYNC_MASK: u8 = 0x7F;

/// Sync appears once every two frames.
const E1_SYNC_INTERVAL: usize = E1_FRAME_SIZE * 2;

/// Number of consecutive sync-interval samples required for lock.
const SYNC_CHECK_FRAMES: usize = 8;

/// Start positions scanned per sync attempt.
const SYNC_SEARCH_WINDOW: usize = 1024;

const FRAMES_IN_BLOCK: usize = 8;
const BLOCKS_IN_SUPERBLOCK: usize = 8;
const SUPERBLOCKS_IN_MULTIFRAME: usize = 3;

/// 192 E1 frames form one multiframe.
pub const FRAMES_IN_MULTIFRAME: usize =
    FRAMES_IN_BLOCK * BLOCKS_IN_SUPERBLOCK * SUPERBLOCKS_IN_MULTIFRAME;

const INTERLEAVE_ROWS: usize = 8;
const INTERLEAVE_COLS: usize = 240;

/// Payload samples taken before the padding offset is declared.
const OFFSET_DETECTION_PACKETS: u32 = 5;

/// Detection parameters discovered by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtiNaDetection {
    /// Leading 0xFF bytes stripped from every payload.
    pub padding_bytes: usize,
    /// Bit offset (0-7) at which E1 sync was found.
    pub sync_bit_offset: u8,
    /// True when the stream is bitwise inverted.
    pub inverted: bool,
}

/// Stage 1: leading-0xFF padding offset detection.
#[derive(Debug)]
struct OffsetState {
    packet_count: u32,
    min_ff_count: usize,
    detected: Option<usize>,
}

impl Default for OffsetState {
    fn default() -> Self {
        Self {
            packet_count: 0,
            min_ff_count: 255,
            detected: None,
        }
    }
}

impl OffsetState {
    /// Returns the stripped payload once the offset is known. Detection
    /// payloads themselves are consumed without output.
    fn strip<'a>(&mut self, payload: &'a [u8]) -> Option<&'a [u8]> {
        if let Some(offset) = self.detected {
            return payload.get(offset..);
        }

        let ff = payload.iter().take_while(|&&b| b == 0xFF).count();
        if ff < self.min_ff_count {
            self.min_ff_count = ff;
        }
        self.packet_count += 1;

        if self.packet_count >= OFFSET_DETECTION_PACKETS {
            let offset = self.min_ff_count;
            debug!("etina: padding offset detected at {offset} bytes");
            self.detected = Some(offset);
            return payload.get(offset..);
        }
        None
    }
}

/// Stage 2: bit-aligned E1 sync search and frame extraction.
#[derive(Debug, Default)]
struct E1State {
    buffer: BytesMut,
    synced: bool,
    bit_offset: u8,
    inverted: bool,
}

impl E1State {
    fn extract_byte(&self, pos: usize) -> u8 {
        let buf = &self.buffer;
        let mut result = if self.bit_offset == 0 {
            buf[pos]
        } else if pos + 1 < buf.len() {
            (buf[pos] << self.bit_offset) | (buf[pos + 1] >> (8 - self.bit_offset))
        } else {
            return 0;
        };
        if self.inverted {
            result ^= 0xFF;
        }
        result
    }

    fn byte_at(&self, pos: usize, bit_offset: u8, inverted: bool) -> u8 {
        let buf = &self.buffer;
        if pos + 1 >= buf.len() {
            return 0;
        }
        let mut result = if bit_offset == 0 {
            buf[pos]
        } else {
            (buf[pos] << bit_offset) | (buf[pos + 1] >> (8 - bit_offset))
        };
        if inverted {
            result ^= 0xFF;
        }
        result
    }

    /// Search all bit offsets and polarities for a run of
    /// `SYNC_CHECK_FRAMES` sync bytes at 64-byte spacing.
    fn search_sync(&mut self) -> bool {
        let bytes_needed = E1_SYNC_INTERVAL * SYNC_CHECK_FRAMES + 1;
        if self.buffer.len() < bytes_needed {
            return false;
        }

        for bit_offset in 0u8..8 {
            for inverted in [false, true] {
                let limit = self
                    .buffer
                    .len()
                    .saturating_sub(bytes_needed)
                    .min(SYNC_SEARCH_WINDOW);
                for start in 0..limit {
                    let hit = (0..SYNC_CHECK_FRAMES).all(|frame| {
                        let pos = start + frame * E1_SYNC_INTERVAL;
                        self.byte_at(pos, bit_offset, inverted) & E1_SYNC_MASK == E1_SYNC_VAL
                    });
                    if hit {
                        self.synced = true;
                        self.bit_offset = bit_offset;
                        self.inverted = inverted;
                        let _ = self.buffer.split_to(start);
                        info!(
                            "etina: E1 sync at bit offset {bit_offset}, inverted={inverted}"
                        );
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Extract the next aligned 32-byte frame, if buffered.
    fn next_frame(&mut self) -> Option<[u8; E1_FRAME_SIZE]> {
        if !self.synced || self.buffer.len() < E1_FRAME_SIZE + 1 {
            return None;
        }
        let mut frame = [0u8; E1_FRAME_SIZE];
        for (i, b) in frame.iter_mut().enumerate() {
            *b = self.extract_byte(i);
        }
        let _ = self.buffer.split_to(E1_FRAME_SIZE);
        Some(frame)
    }
}

/// Stage 3: multiframe accumulation and sync on the management byte.
#[derive(Debug, Default)]
struct MultiframeState {
    frame_buffer: BytesMut,
    synced: bool,
}

impl MultiframeState {
    fn push_frame(&mut self, frame: &[u8; E1_FRAME_SIZE]) {
        self.frame_buffer.extend_from_slice(frame);
    }

    /// Align the buffer on a multiframe boundary and return true when a
    /// full multiframe is available at the front.
    fn align(&mut self) -> bool {
        let frames_needed = FRAMES_IN_MULTIFRAME + FRAMES_IN_BLOCK;
        if self.frame_buffer.len() < frames_needed * E1_FRAME_SIZE {
            return false;
        }

        if !self.synced {
            let max_search = FRAMES_IN_BLOCK * BLOCKS_IN_SUPERBLOCK;
            let mut found = None;
            'offsets: for frame_offset in 0..max_search {
                for block in 0..BLOCKS_IN_SUPERBLOCK {
                    let idx = (frame_offset + block * FRAMES_IN_BLOCK) * E1_FRAME_SIZE + 1;
                    if idx >= self.frame_buffer.len() {
                        continue 'offsets;
                    }
                    let mgmt = self.frame_buffer[idx];
                    let block_num = (mgmt >> 5) & 0x07;
                    let superblock_num = (mgmt >> 3) & 0x03;
                    if block_num != block as u8 || superblock_num != 0 {
                        continue 'offsets;
                    }
                }
                found = Some(frame_offset);
                break;
            }

            match found {
                Some(offset) => {
                    if offset > 0 {
                        let _ = self.frame_buffer.split_to(offset * E1_FRAME_SIZE);
                    }
                    self.synced = true;
                    debug!("etina: multiframe sync at frame offset {offset}");
                }
                None => {
                    // Shed a block's worth of frames and keep looking.
                    if self.frame_buffer.len() > FRAMES_IN_BLOCK * E1_FRAME_SIZE * 2 {
                        let _ = self.frame_buffer.split_to(FRAMES_IN_BLOCK * E1_FRAME_SIZE);
                    }
                    return false;
                }
            }
        }

        self.frame_buffer.len() >= FRAMES_IN_MULTIFRAME * E1_FRAME_SIZE
    }

    fn consume_multiframe(&mut self) -> Bytes {
        self.frame_buffer
            .split_to(FRAMES_IN_MULTIFRAME * E1_FRAME_SIZE)
            .freeze()
    }
}

/// Pipeline statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtiNaStats {
    /// Payloads consumed.
    pub payloads: u64,
    /// ETI-NI frames produced.
    pub frames: u64,
    /// Bytes shed during failed sync searches.
    pub shed_bytes: u64,
}

/// The full ETI-NA recovery pipeline.
#[derive(Debug)]
pub struct EtiNaPipeline {
    offset: OffsetState,
    e1: E1State,
    multiframe: MultiframeState,
    even_frame: bool,
    stats: EtiNaStats,
}

impl Default for EtiNaPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EtiNaPipeline {
    pub fn new() -> Self {
        Self {
            offset: OffsetState::default(),
            e1: E1State::default(),
            multiframe: MultiframeState::default(),
            even_frame: true,
            stats: EtiNaStats::default(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn stats(&self) -> EtiNaStats {
        self.stats
    }

    /// Detection parameters, once E1 sync has been acquired.
    pub fn detection(&self) -> Option<EtiNaDetection> {
        if !self.e1.synced {
            return None;
        }
        Some(EtiNaDetection {
            padding_bytes: self.offset.detected.unwrap_or(0),
            sync_bit_offset: self.e1.bit_offset,
            inverted: self.e1.inverted,
        })
    }

    /// Bytes buffered while searching for E1 sync. The scanner abandons a
    /// PID once this exceeds its budget without a frame being produced.
    pub fn search_buffer_len(&self) -> usize {
        self.e1.buffer.len()
    }

    /// Feed one carrier payload; returns any ETI-NI frames recovered.
    pub fn feed_payload(&mut self, payload: &[u8]) -> Vec<EtiFrame> {
        self.stats.payloads += 1;
        let mut out = Vec::new();

        let stripped = match self.offset.strip(payload) {
            Some(s) if !s.is_empty() => s,
            _ => return out,
        };
        self.e1.buffer.extend_from_slice(stripped);

        if !self.e1.synced {
            if !self.e1.search_sync() {
                // Bound the search buffer.
                if self.e1.buffer.len() > 8192 {
                    let _ = self.e1.buffer.split_to(4096);
                    self.stats.shed_bytes += 4096;
                }
                return out;
            }
        }

        while let Some(frame) = self.e1.next_frame() {
            self.multiframe.push_frame(&frame);
            if self.multiframe.align() {
                let multiframe = self.multiframe.consume_multiframe();
                let eti = self.deinterleave(&multiframe);
                self.stats.frames += 1;
                out.push(eti);
            }
        }
        out
    }

    /// Deinterleave one 192-frame multiframe into an ETI-NI frame.
    fn deinterleave(&mut self, multiframe: &[u8]) -> EtiFrame {
        let mut eti = vec![PAD_BYTE; ETI_NI_FRAME_SIZE];

        // SYNC word, little-endian, alternating per emission.
        let sync: u32 = if self.even_frame { 0xB63A_07FF } else { 0x49C5_F8FF };
        eti[..4].copy_from_slice(&sync.to_le_bytes());
        self.even_frame = !self.even_frame;

        // Pull all three superblocks into one contiguous column-major
        // buffer, skipping a management byte at every 16-byte boundary.
        let mut deint = vec![0u8; INTERLEAVE_ROWS * INTERLEAVE_COLS * SUPERBLOCKS_IN_MULTIFRAME];
        let superblock_size = FRAMES_IN_BLOCK * BLOCKS_IN_SUPERBLOCK * E1_FRAME_SIZE;
        for sb in 0..SUPERBLOCKS_IN_MULTIFRAME {
            let superblock = &multiframe[sb * superblock_size..(sb + 1) * superblock_size];
            let dst = &mut deint[sb * INTERLEAVE_ROWS * INTERLEAVE_COLS..];
            let mut in_ptr = 0;
            for col in 0..INTERLEAVE_COLS {
                for row in 0..INTERLEAVE_ROWS {
                    if in_ptr % 16 == 0 {
                        in_ptr += 1;
                    }
                    dst[col + row * INTERLEAVE_COLS] = superblock[in_ptr];
                    in_ptr += 1;
                }
            }
        }

        // The M01 management byte selects the row span.
        let type_bit = (deint[30] >> 1) & 0x01;
        let max_read = if type_bit != 0 { 226 } else { 235 };

        let mut out_pos = 4;
        let total_rows = INTERLEAVE_ROWS * SUPERBLOCKS_IN_MULTIFRAME;
        for row in 0..total_rows {
            let row_data = &deint[row * INTERLEAVE_COLS..(row + 1) * INTERLEAVE_COLS];
            if row % INTERLEAVE_ROWS < 2 {
                // The first two rows of each superblock interleave a
                // management byte ahead of each 30-byte segment.
                let mut read_ptr = 0;
                while read_ptr < max_read {
                    let mut to_read = 29;
                    if read_ptr + to_read > max_read {
                        to_read = max_read - read_ptr - 1;
                    }
                    read_ptr += 1;
                    eti[out_pos..out_pos + to_read]
                        .copy_from_slice(&row_data[read_ptr..read_ptr + to_read]);
                    out_pos += to_read;
                    read_ptr += to_read;
                }
            } else {
                eti[out_pos..out_pos + max_read].copy_from_slice(&row_data[..max_read]);
                out_pos += max_read;
            }
        }

        Bytes::from(eti)
    }
}
