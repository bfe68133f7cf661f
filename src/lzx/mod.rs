/*!
# Wimpress: LZX.

LZX is an LZ77 and Huffman-code based format with a strong family
resemblance to DEFLATE, but WIM resources use a restricted form of it: the
window never slides (each buffer is one window), E8 call-instruction
preprocessing is applied unconditionally with a fixed magic file size, and
window sizes run from 2^15 to 2^21 bytes.

A compressed buffer is a sequence of blocks. Each block is verbatim,
aligned-offset, or uncompressed; the two compressed kinds carry their own
Huffman codes, with the main and length codeword lengths delta-encoded
against the previous block's via a 20-symbol precode. Offsets are encoded
through a slot table, with slots 0–2 standing for the three most recent
offsets. That queue is not a true LRU: using R1 or R2 swaps it with R0
rather than shifting.
*/

mod compress;
mod decompress;

pub(crate) use compress::LzxCompressor;
pub(crate) use decompress::LzxDecompressor;

/// # Number of Literals.
const LZX_NUM_CHARS: usize = 256;

/// # Minimum Match Length.
const LZX_MIN_MATCH_LEN: u32 = 2;

/// # Maximum Match Length.
const LZX_MAX_MATCH_LEN: u32 = 257;

/// # Number of Representable Match Lengths.
const LZX_NUM_LENS: usize = (LZX_MAX_MATCH_LEN - LZX_MIN_MATCH_LEN + 1) as usize;

/// # Lengths Not Needing a Length Symbol.
const LZX_NUM_PRIMARY_LENS: u32 = 7;

/// # Length Headers Per Offset Slot.
const LZX_NUM_LEN_HEADERS: usize = LZX_NUM_PRIMARY_LENS as usize + 1;

/// # Block Type: Verbatim.
const LZX_BLOCKTYPE_VERBATIM: u32 = 1;

/// # Block Type: Aligned Offset.
const LZX_BLOCKTYPE_ALIGNED: u32 = 2;

/// # Block Type: Uncompressed.
const LZX_BLOCKTYPE_UNCOMPRESSED: u32 = 3;

/// # Minimum Window Order.
const LZX_MIN_WINDOW_ORDER: u32 = 15;

/// # Maximum Window Order.
const LZX_MAX_WINDOW_ORDER: u32 = 21;

/// # Maximum Window Size.
pub(crate) const LZX_MAX_WINDOW_SIZE: usize = 1 << LZX_MAX_WINDOW_ORDER;

/// # Maximum Number of Offset Slots.
///
/// The actual number in use depends on the window size.
const LZX_MAX_OFFSET_SLOTS: usize = 50;

/// # Maximum Main Code Size.
const LZX_MAINCODE_MAX_NUM_SYMBOLS: usize =
	LZX_NUM_CHARS + LZX_MAX_OFFSET_SLOTS * LZX_NUM_LEN_HEADERS;

/// # Length Code Size.
const LZX_LENCODE_NUM_SYMBOLS: usize = LZX_NUM_LENS - LZX_NUM_PRIMARY_LENS as usize;

/// # Precode Size.
const LZX_PRECODE_NUM_SYMBOLS: usize = 20;

/// # Bits Per Precode Length.
const LZX_PRECODE_ELEMENT_SIZE: u32 = 4;

/// # Entropy-Coded Low Offset Bits (Aligned Blocks).
const LZX_NUM_ALIGNED_OFFSET_BITS: u32 = 3;

/// # Aligned Offset Code Size.
const LZX_ALIGNEDCODE_NUM_SYMBOLS: usize = 1 << LZX_NUM_ALIGNED_OFFSET_BITS;

/// # Aligned Offset Low-Bits Mask.
const LZX_ALIGNED_OFFSET_BITMASK: u32 = (1 << LZX_NUM_ALIGNED_OFFSET_BITS) - 1;

/// # Bits Per Aligned-Code Length.
const LZX_ALIGNEDCODE_ELEMENT_SIZE: u32 = 3;

/// # First Offset Slot Using the Aligned Code.
const LZX_MIN_ALIGNED_OFFSET_SLOT: usize = 8;

/// # Smallest Offset in an Aligned Slot.
const LZX_MIN_ALIGNED_OFFSET: u32 = 14;

/// # Maximum Codeword Length: Main Code.
const LZX_MAX_MAIN_CODEWORD_LEN: u32 = 16;

/// # Maximum Codeword Length: Length Code.
const LZX_MAX_LEN_CODEWORD_LEN: u32 = 16;

/// # Maximum Codeword Length: Precode.
const LZX_MAX_PRE_CODEWORD_LEN: u32 = (1 << LZX_PRECODE_ELEMENT_SIZE) - 1;

/// # Maximum Codeword Length: Aligned Code.
const LZX_MAX_ALIGNED_CODEWORD_LEN: u32 = (1 << LZX_ALIGNEDCODE_ELEMENT_SIZE) - 1;

/// # E8 Preprocessing Magic File Size.
///
/// Always used as the filesize parameter for call-instruction target
/// translation in WIM resources, whatever size the data actually is.
const LZX_WIM_MAGIC_FILESIZE: i32 = 12_000_000;

/// # Default Block Size.
///
/// Assumed when the encoded block size begins with a 1 bit.
const LZX_DEFAULT_BLOCK_SIZE: u32 = 32_768;

/// # Recent-Offsets Queue Depth.
const LZX_NUM_RECENT_OFFSETS: usize = 3;

/// # Recent-Offsets Queue Initializer.
const LZX_RECENT_OFFSETS_INIT: [u32; LZX_NUM_RECENT_OFFSETS] = [1; LZX_NUM_RECENT_OFFSETS];

/// # Offset Adjustment.
///
/// An offset of n bytes is encoded as n + 2, letting adjusted offsets 0–2
/// stand for the recent-offsets queue.
const LZX_OFFSET_ADJUSTMENT: u32 = LZX_NUM_RECENT_OFFSETS as u32 - 1;



/// # Offset Slot Bases.
///
/// The first adjusted match offset of each offset slot. The repeat-offset
/// slots map to "fake" offsets below one.
const LZX_OFFSET_SLOT_BASE: [i32; LZX_MAX_OFFSET_SLOTS + 1] = [
	-2     , -1     , 0      , 1      , 2      ,    // 0  --- 4
	4      , 6      , 10     , 14     , 22     ,    // 5  --- 9
	30     , 46     , 62     , 94     , 126    ,    // 10 --- 14
	190    , 254    , 382    , 510    , 766    ,    // 15 --- 19
	1022   , 1534   , 2046   , 3070   , 4094   ,    // 20 --- 24
	6142   , 8190   , 12286  , 16382  , 24574  ,    // 25 --- 29
	32766  , 49150  , 65534  , 98302  , 131070 ,    // 30 --- 34
	196606 , 262142 , 393214 , 524286 , 655358 ,    // 35 --- 39
	786430 , 917502 , 1048574, 1179646, 1310718,    // 40 --- 44
	1441790, 1572862, 1703934, 1835006, 1966078,    // 45 --- 49
	2097150                                         // extra
];

/// # Extra Offset Bits Per Slot.
///
/// How many bits follow the offset slot to complete the adjusted offset (in
/// verbatim blocks; aligned blocks entropy-code the low three of these for
/// slots eight and up).
const LZX_EXTRA_OFFSET_BITS: [u8; LZX_MAX_OFFSET_SLOTS] = [
	0 , 0 , 0 , 0 , 1 ,
	1 , 2 , 2 , 3 , 3 ,
	4 , 4 , 5 , 5 , 6 ,
	6 , 7 , 7 , 8 , 8 ,
	9 , 9 , 10, 10, 11,
	11, 12, 12, 13, 13,
	14, 14, 15, 15, 16,
	16, 17, 17, 17, 17,
	17, 17, 17, 17, 17,
	17, 17, 17, 17, 17,
];

/// # Window Order for a Buffer Size.
///
/// Round the buffer size up to the next valid LZX window size and return
/// its log2, or `None` if the size is zero or too large.
fn lzx_get_window_order(max_bufsize: usize) -> Option<u32> {
	if max_bufsize == 0 || max_bufsize > LZX_MAX_WINDOW_SIZE { return None; }

	let order = usize::BITS - (max_bufsize - 1).leading_zeros();
	Some(order.max(LZX_MIN_WINDOW_ORDER))
}

/// # Main Code Size for a Window Order.
fn lzx_get_num_main_syms(window_order: u32) -> usize {
	// One would expect the maximum match offset to be window_size minus the
	// minimum match length, but the format disallows a match whose first
	// two bytes are the window's first two, which shaves one slot off.
	let window_size = 1_u32 << window_order;
	let max_offset = (window_size - LZX_MIN_MATCH_LEN - 1) as i32;
	let mut num_offset_slots = 30;
	while max_offset >= LZX_OFFSET_SLOT_BASE[num_offset_slots] {
		num_offset_slots += 1;
	}

	LZX_NUM_CHARS + num_offset_slots * LZX_NUM_LEN_HEADERS
}

/// # Translate One Call Target (Compression Direction).
fn do_translate_target(data: &mut [u8], target: usize, input_pos: i32) {
	let rel_offset = i32::from_le_bytes([
		data[target], data[target + 1], data[target + 2], data[target + 3],
	]);
	if rel_offset >= -input_pos && rel_offset < LZX_WIM_MAGIC_FILESIZE {
		let abs_offset =
			if rel_offset < LZX_WIM_MAGIC_FILESIZE - input_pos {
				// "Good translation."
				rel_offset + input_pos
			}
			else {
				// "Compensating translation."
				rel_offset - LZX_WIM_MAGIC_FILESIZE
			};
		data[target..target + 4].copy_from_slice(&abs_offset.to_le_bytes());
	}
}

/// # Translate One Call Target (Decompression Direction).
fn undo_translate_target(data: &mut [u8], target: usize, input_pos: i32) {
	let abs_offset = i32::from_le_bytes([
		data[target], data[target + 1], data[target + 2], data[target + 3],
	]);
	if abs_offset >= 0 {
		if abs_offset < LZX_WIM_MAGIC_FILESIZE {
			// "Good translation."
			let rel_offset = abs_offset - input_pos;
			data[target..target + 4].copy_from_slice(&rel_offset.to_le_bytes());
		}
	}
	else if abs_offset >= -input_pos {
		// "Compensating translation."
		let rel_offset = abs_offset + LZX_WIM_MAGIC_FILESIZE;
		data[target..target + 4].copy_from_slice(&rel_offset.to_le_bytes());
	}
}

/// # E8 Filter.
///
/// Walk the data translating the 32-bit targets of x86 CALL instructions
/// (E8 opcode bytes) between relative and absolute form, skipping five
/// bytes past each one found. No call instruction may start in the last ten
/// bytes, and buffers of ten bytes or fewer pass through untouched.
///
/// This runs on any data, x86 machine code or not; WIM resources carry no
/// flag for it.
fn lzx_e8_filter(data: &mut [u8], forward: bool) {
	let size = data.len();
	if size <= 10 { return; }

	let mut p = 0;
	while p < size - 6 {
		if data[p] != 0xE8 {
			p += 1;
			continue;
		}
		if p < size - 10 {
			if forward { do_translate_target(data, p + 1, p as i32); }
			else { undo_translate_target(data, p + 1, p as i32); }
		}
		p += 5;
	}
}

/// # E8 Preprocess (Before Compression).
pub(crate) fn lzx_preprocess(data: &mut [u8]) { lzx_e8_filter(data, true); }

/// # E8 Postprocess (After Decompression).
pub(crate) fn lzx_postprocess(data: &mut [u8]) { lzx_e8_filter(data, false); }



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_window_order() {
		assert_eq!(lzx_get_window_order(0), None);
		assert_eq!(lzx_get_window_order(1), Some(15));
		assert_eq!(lzx_get_window_order(32_768), Some(15));
		assert_eq!(lzx_get_window_order(32_769), Some(16));
		assert_eq!(lzx_get_window_order(2_097_152), Some(21));
		assert_eq!(lzx_get_window_order(2_097_153), None);
	}

	#[test]
	fn t_num_main_syms() {
		// A 32 KiB window: max adjusted offset 32767 lands in slot 30, so
		// 31 slots exist.
		assert_eq!(lzx_get_num_main_syms(15), 256 + 31 * 8);
		assert_eq!(lzx_get_num_main_syms(21), 256 + 50 * 8);
	}

	#[test]
	fn t_e8_involution() {
		// Synthetic "code" with E8 bytes at various alignments.
		let mut data = vec![0_u8; 200];
		for i in [0_usize, 3, 17, 40, 41, 100, 150, 188, 195] {
			data[i] = 0xE8;
		}
		for (i, b) in data.iter_mut().enumerate() {
			if *b != 0xE8 { *b = (i * 7 + 1) as u8; }
		}
		let orig = data.clone();

		lzx_preprocess(&mut data);
		assert_ne!(data, orig);
		lzx_postprocess(&mut data);
		assert_eq!(data, orig);
	}

	#[test]
	fn t_e8_short_noop() {
		let mut data = *b"\xE8\x01\x02\x03\x04\x05\x06\x07\x08\x09";
		let orig = data;
		lzx_preprocess(&mut data);
		assert_eq!(data, orig);
	}
}
