/*!
# Wimpress: LZMS Decompression.
*/

use crate::bits::lz_copy;
use crate::error::{
	corrupt,
	WimError,
};
use crate::huffman::decode::{
	make_decode_table,
	DECODE_TABLE_LENGTH_MASK,
	DECODE_TABLE_SYMBOL_SHIFT,
	ENOUGH_LZMS_LEN,
	ENOUGH_LZMS_LITERAL,
	ENOUGH_LZMS_OFFSET,
	ENOUGH_LZMS_POWER,
};
use crate::huffman::make_canonical_code;
use super::{
	lzms_dilute_symbol_frequencies,
	lzms_get_num_offset_slots,
	lzms_x86_filter,
	LzmsProbabilities,
	ProbabilityEntry,
	LZMS_DELTA_OFFSET_CODE_REBUILD_FREQ,
	LZMS_DELTA_POWER_CODE_REBUILD_FREQ,
	LZMS_EXTRA_LENGTH_BITS,
	LZMS_EXTRA_OFFSET_BITS,
	LZMS_LENGTH_CODE_REBUILD_FREQ,
	LZMS_LENGTH_SLOT_BASE,
	LZMS_LITERAL_CODE_REBUILD_FREQ,
	LZMS_LZ_OFFSET_CODE_REBUILD_FREQ,
	LZMS_MAX_BUFFER_SIZE,
	LZMS_MAX_CODEWORD_LENGTH,
	LZMS_MAX_NUM_OFFSET_SYMS,
	LZMS_NUM_DELTA_POWER_SYMS,
	LZMS_NUM_DELTA_PROBS,
	LZMS_NUM_DELTA_REP_DECISIONS,
	LZMS_NUM_DELTA_REP_PROBS,
	LZMS_NUM_LENGTH_SYMS,
	LZMS_NUM_LITERAL_SYMS,
	LZMS_NUM_LZ_PROBS,
	LZMS_NUM_LZ_REP_DECISIONS,
	LZMS_NUM_LZ_REP_PROBS,
	LZMS_NUM_MAIN_PROBS,
	LZMS_NUM_MATCH_PROBS,
	LZMS_OFFSET_SLOT_BASE,
	LZMS_PROBABILITY_BITS,
};

/// # Root Table Bits: Literal Code.
///
/// The table-bits values only affect decoding speed, not correctness.
const LZMS_LITERAL_TABLEBITS: u32 = 10;

/// # Root Table Bits: Length Code.
const LZMS_LENGTH_TABLEBITS: u32 = 9;

/// # Root Table Bits: LZ Offset Code.
const LZMS_LZ_OFFSET_TABLEBITS: u32 = 11;

/// # Root Table Bits: Delta Offset Code.
const LZMS_DELTA_OFFSET_TABLEBITS: u32 = 11;

/// # Root Table Bits: Delta Power Code.
const LZMS_DELTA_POWER_TABLEBITS: u32 = 7;


/// # Little-Endian Sixteen Bits.
fn get_le16(data: &[u8], pos: usize) -> u16 {
	u16::from_le_bytes([data[pos], data[pos + 1]])
}



#[derive(Debug)]
/// # Range Decoder.
///
/// Consumes 16-bit units forward from the start of the compressed buffer,
/// decoding one probability-weighted binary decision at a time.
struct RangeDecoder<'a> {
	/// # Current Range Portion.
	///
	/// Only the high end of the logical range matters at any moment; it is
	/// renormalized (shifted up) whenever it shrinks below sixteen bits.
	range: u32,

	/// # Position Within the Range.
	code: u32,

	/// # Compressed Input.
	data: &'a [u8],

	/// # Next Unit to Read.
	next: usize,
}

impl<'a> RangeDecoder<'a> {
	/// # New Decoder.
	///
	/// The caller has already checked `data` holds at least four bytes.
	fn new(data: &'a [u8]) -> Self {
		Self {
			range: 0xFFFF_FFFF,
			code: u32::from(get_le16(data, 0)) << 16 | u32::from(get_le16(data, 2)),
			data,
			next: 4,
		}
	}

	/// # Decode One Binary Decision.
	///
	/// `state` selects the probability entry to consult; both are updated
	/// with the decoded outcome before returning it.
	fn decode_bit(
		&mut self,
		state: &mut usize,
		num_states: usize,
		probs: &mut [ProbabilityEntry],
	) -> u32 {
		let entry = &mut probs[*state];

		// Update the state early; a decoded 1 ORs itself in below.
		*state = (*state << 1) & (num_states - 1);

		let prob = entry.probability();

		if self.range & 0xFFFF_0000 == 0 {
			self.range <<= 16;
			self.code <<= 16;
			if self.next != self.data.len() {
				self.code |= u32::from(get_le16(self.data, self.next));
				self.next += 2;
			}
		}

		// Split the range proportionally to the zero-bit probability.
		let bound = (self.range >> LZMS_PROBABILITY_BITS) * prob;
		if self.code < bound {
			self.range = bound;
			entry.update(0);
			0
		}
		else {
			self.range -= bound;
			self.code -= bound;
			entry.update(1);
			*state |= 1;
			1
		}
	}
}



#[derive(Debug)]
/// # Backwards Input Bitstream.
///
/// Consumes 16-bit units backward from the end of the compressed buffer,
/// feeding the Huffman-coded half of the format. Bits are ordered high to
/// low within the 64-bit holding variable; exhausted input reads as zeroes.
struct InputBitstream<'a> {
	/// # Bit Holding Variable.
	bitbuf: u64,

	/// # Bits Currently Held.
	bitsleft: u32,

	/// # Compressed Input.
	data: &'a [u8],

	/// # One Past the Next Unit to Read.
	next: usize,
}

impl<'a> InputBitstream<'a> {
	/// # New Bitstream.
	///
	/// `data` must hold an even number of bytes.
	fn new(data: &'a [u8]) -> Self {
		Self {
			bitbuf: 0,
			bitsleft: 0,
			next: data.len(),
			data,
		}
	}

	/// # Ensure Bits.
	///
	/// Top the holding variable up to at least `num_bits` (at most 32).
	fn ensure_bits(&mut self, num_bits: u32) {
		if self.bitsleft >= num_bits { return; }

		let avail = 64 - self.bitsleft;
		if self.next != 0 {
			self.next -= 2;
			self.bitbuf |= u64::from(get_le16(self.data, self.next)) << (avail - 16);
		}
		if self.next != 0 {
			self.next -= 2;
			self.bitbuf |= u64::from(get_le16(self.data, self.next)) << (avail - 32);
		}
		self.bitsleft += 32;
	}

	/// # Peek Bits.
	fn peek_bits(&self, num_bits: u32) -> u32 {
		((self.bitbuf >> 1) >> (63 - num_bits)) as u32
	}

	/// # Remove Bits.
	fn remove_bits(&mut self, num_bits: u32) {
		self.bitbuf <<= num_bits;
		self.bitsleft -= num_bits;
	}

	/// # Pop Bits.
	fn pop_bits(&mut self, num_bits: u32) -> u32 {
		let bits = self.peek_bits(num_bits);
		self.remove_bits(num_bits);
		bits
	}

	/// # Read Bits.
	fn read_bits(&mut self, num_bits: u32) -> u32 {
		self.ensure_bits(num_bits);
		self.pop_bits(num_bits)
	}
}



#[derive(Debug)]
/// # An Adaptive Huffman Code.
///
/// The decode table, running symbol frequencies, and rebuild countdown for
/// one of the format's five Huffman codes. After every `rebuild_freq`
/// decoded symbols the code is rebuilt from the frequencies, which are then
/// halved so recent data dominates.
struct AdaptiveCode {
	/// # Decode Table.
	decode_table: Box<[u16]>,

	/// # Running Symbol Frequencies.
	freqs: Box<[u32]>,

	/// # Codeword Lengths (Rebuild Scratch).
	lens: Box<[u8]>,

	/// # Codewords (Rebuild Scratch).
	codewords: Box<[u32]>,

	/// # Active Alphabet Size.
	num_syms: usize,

	/// # Root Table Bits.
	table_bits: u32,

	/// # Symbols Between Rebuilds.
	rebuild_freq: u32,

	/// # Symbols Until the Next Rebuild.
	num_syms_until_rebuild: u32,
}

impl AdaptiveCode {
	/// # New Code.
	///
	/// Sized for up to `max_syms` symbols and a worst-case decode table of
	/// `enough` entries; `reset` picks the actual alphabet per buffer.
	fn new(max_syms: usize, table_bits: u32, rebuild_freq: u32, enough: usize) -> Self {
		Self {
			decode_table: vec![0; enough].into_boxed_slice(),
			freqs: vec![0; max_syms].into_boxed_slice(),
			// The canonical-code builder can synthesize a codeword at
			// index one even for a single-symbol alphabet.
			lens: vec![0; max_syms.max(2)].into_boxed_slice(),
			codewords: vec![0; max_syms.max(2)].into_boxed_slice(),
			num_syms: max_syms,
			table_bits,
			rebuild_freq,
			num_syms_until_rebuild: rebuild_freq,
		}
	}

	/// # Reset for a New Buffer.
	fn reset(&mut self, num_syms: usize) -> Result<(), WimError> {
		self.num_syms = num_syms;
		self.freqs[..num_syms].fill(1);
		self.build()
	}

	/// # (Re)build the Code From the Frequencies.
	fn build(&mut self) -> Result<(), WimError> {
		if self.num_syms != 0 {
			make_canonical_code(
				self.num_syms,
				LZMS_MAX_CODEWORD_LENGTH,
				&self.freqs,
				&mut self.lens,
				&mut self.codewords,
			);
		}
		make_decode_table(
			&mut self.decode_table,
			self.num_syms,
			self.table_bits,
			&self.lens,
			LZMS_MAX_CODEWORD_LENGTH,
		)?;
		self.num_syms_until_rebuild = self.rebuild_freq;
		Ok(())
	}

	/// # Decode One Symbol.
	///
	/// Reads a codeword from the bitstream, counts the symbol, and rebuilds
	/// the code when its interval comes due.
	fn decode_symbol(&mut self, is: &mut InputBitstream) -> Result<usize, WimError> {
		is.ensure_bits(LZMS_MAX_CODEWORD_LENGTH);

		let mut entry = self.decode_table[is.peek_bits(self.table_bits) as usize];
		let mut symbol = (entry >> DECODE_TABLE_SYMBOL_SHIFT) as usize;
		let mut length = u32::from(entry & DECODE_TABLE_LENGTH_MASK);

		if u32::from(entry) >= 1 << (self.table_bits + DECODE_TABLE_SYMBOL_SHIFT) {
			is.remove_bits(self.table_bits);
			entry = self.decode_table[symbol + is.peek_bits(length) as usize];
			symbol = (entry >> DECODE_TABLE_SYMBOL_SHIFT) as usize;
			length = u32::from(entry & DECODE_TABLE_LENGTH_MASK);
		}

		is.remove_bits(length);

		self.freqs[symbol] += 1;
		self.num_syms_until_rebuild -= 1;
		if self.num_syms_until_rebuild == 0 {
			self.build()?;
			lzms_dilute_symbol_frequencies(&mut self.freqs[..self.num_syms]);
		}
		Ok(symbol)
	}
}



#[derive(Debug)]
/// # LZMS Decompressor.
pub(crate) struct LzmsDecompressor {
	/// # Binary-Decision Probabilities.
	probs: LzmsProbabilities,

	/// # Literal Code.
	literal_code: AdaptiveCode,

	/// # LZ Offset Code.
	lz_offset_code: AdaptiveCode,

	/// # Length Code.
	length_code: AdaptiveCode,

	/// # Delta Offset Code.
	delta_offset_code: AdaptiveCode,

	/// # Delta Power Code.
	delta_power_code: AdaptiveCode,

	/// # x86 Filter Scratch.
	last_target_usages: Box<[i32]>,
}

impl LzmsDecompressor {
	/// # New Decompressor.
	pub(crate) fn new(max_bufsize: usize) -> Result<Self, WimError> {
		if max_bufsize > LZMS_MAX_BUFFER_SIZE {
			return Err(WimError::Param);
		}
		Ok(Self {
			probs: LzmsProbabilities::default(),
			literal_code: AdaptiveCode::new(
				LZMS_NUM_LITERAL_SYMS,
				LZMS_LITERAL_TABLEBITS,
				LZMS_LITERAL_CODE_REBUILD_FREQ,
				ENOUGH_LZMS_LITERAL,
			),
			lz_offset_code: AdaptiveCode::new(
				LZMS_MAX_NUM_OFFSET_SYMS,
				LZMS_LZ_OFFSET_TABLEBITS,
				LZMS_LZ_OFFSET_CODE_REBUILD_FREQ,
				ENOUGH_LZMS_OFFSET,
			),
			length_code: AdaptiveCode::new(
				LZMS_NUM_LENGTH_SYMS,
				LZMS_LENGTH_TABLEBITS,
				LZMS_LENGTH_CODE_REBUILD_FREQ,
				ENOUGH_LZMS_LEN,
			),
			delta_offset_code: AdaptiveCode::new(
				LZMS_MAX_NUM_OFFSET_SYMS,
				LZMS_DELTA_OFFSET_TABLEBITS,
				LZMS_DELTA_OFFSET_CODE_REBUILD_FREQ,
				ENOUGH_LZMS_OFFSET,
			),
			delta_power_code: AdaptiveCode::new(
				LZMS_NUM_DELTA_POWER_SYMS,
				LZMS_DELTA_POWER_TABLEBITS,
				LZMS_DELTA_POWER_CODE_REBUILD_FREQ,
				ENOUGH_LZMS_POWER,
			),
			last_target_usages: vec![0; 65_536].into_boxed_slice(),
		})
	}

	/// # Decode an LZ Match Offset.
	fn decode_lz_offset(&mut self, is: &mut InputBitstream) -> Result<u32, WimError> {
		let slot = self.lz_offset_code.decode_symbol(is)?;
		Ok(LZMS_OFFSET_SLOT_BASE[slot] +
			is.read_bits(u32::from(LZMS_EXTRA_OFFSET_BITS[slot])))
	}

	/// # Decode a Match Length.
	fn decode_length(&mut self, is: &mut InputBitstream) -> Result<u32, WimError> {
		let slot = self.length_code.decode_symbol(is)?;
		let mut length = LZMS_LENGTH_SLOT_BASE[slot];
		// Usually most lengths are short and have no extra bits.
		let num_extra_bits = u32::from(LZMS_EXTRA_LENGTH_BITS[slot]);
		if num_extra_bits != 0 {
			length += is.read_bits(num_extra_bits);
		}
		Ok(length)
	}

	/// # Decode a Delta Match Raw Offset.
	fn decode_delta_offset(&mut self, is: &mut InputBitstream) -> Result<u32, WimError> {
		let slot = self.delta_offset_code.decode_symbol(is)?;
		Ok(LZMS_OFFSET_SLOT_BASE[slot] +
			is.read_bits(u32::from(LZMS_EXTRA_OFFSET_BITS[slot])))
	}

	/// # Decompress.
	///
	/// Decompress `input` into `output`, which must be sized to exactly the
	/// expected uncompressed length.
	pub(crate) fn decompress(&mut self, input: &[u8], output: &mut [u8])
	-> Result<(), WimError> {
		// The compressed data is a series of 16-bit units, at least two of
		// them (the range decoder cannot even start with less).
		if input.len() & 1 != 0 || input.len() < 4 {
			return Err(corrupt!());
		}

		let mut rd = RangeDecoder::new(input);
		let mut is = InputBitstream::new(input);

		self.probs = LzmsProbabilities::default();

		let num_offset_slots = lzms_get_num_offset_slots(output.len());
		self.literal_code.reset(LZMS_NUM_LITERAL_SYMS)?;
		self.lz_offset_code.reset(num_offset_slots)?;
		self.length_code.reset(LZMS_NUM_LENGTH_SYMS)?;
		self.delta_offset_code.reset(num_offset_slots)?;
		self.delta_power_code.reset(LZMS_NUM_DELTA_POWER_SYMS)?;

		// Recent queues for match sources. Each holds one entry more than
		// is addressable so a delayed update can be read through.
		let mut recent_lz_offsets = [1_u32, 2, 3, 4];
		let mut recent_delta_pairs = [1_u64, 2, 3, 4];

		// Previous item type: 0 literal, 1 LZ match, 2 delta match. Queue
		// updates are delayed by one item; rather than actually delaying
		// them, a rep match whose kind matches the previous item reads its
		// source from slot `rep_idx + 1`.
		let mut prev_item_type = 0_usize;

		let mut main_state = 0_usize;
		let mut match_state = 0_usize;
		let mut lz_state = 0_usize;
		let mut delta_state = 0_usize;
		let mut lz_rep_states = [0_usize; LZMS_NUM_LZ_REP_DECISIONS];
		let mut delta_rep_states = [0_usize; LZMS_NUM_DELTA_REP_DECISIONS];

		let mut out_next = 0_usize;
		let out_end = output.len();

		while out_next != out_end {
			if rd.decode_bit(&mut main_state, LZMS_NUM_MAIN_PROBS, &mut self.probs.main) == 0 {
				// A literal.
				output[out_next] = self.literal_code.decode_symbol(&mut is)? as u8;
				out_next += 1;
				prev_item_type = 0;
			}
			else if rd.decode_bit(&mut match_state, LZMS_NUM_MATCH_PROBS, &mut self.probs.lz_or_delta) == 0 {
				// An LZ match.
				let offset =
					if rd.decode_bit(&mut lz_state, LZMS_NUM_LZ_PROBS, &mut self.probs.lz) == 0 {
						// Explicit offset.
						let offset = self.decode_lz_offset(&mut is)?;
						recent_lz_offsets[3] = recent_lz_offsets[2];
						recent_lz_offsets[2] = recent_lz_offsets[1];
						recent_lz_offsets[1] = recent_lz_offsets[0];
						offset
					}
					else {
						// Repeat offset. `delayed` is one when the queue
						// update from a previous LZ match is still pending.
						let delayed = prev_item_type & 1;
						if rd.decode_bit(&mut lz_rep_states[0], LZMS_NUM_LZ_REP_PROBS, &mut self.probs.lz_rep[0]) == 0 {
							let offset = recent_lz_offsets[delayed];
							recent_lz_offsets[delayed] = recent_lz_offsets[0];
							offset
						}
						else if rd.decode_bit(&mut lz_rep_states[1], LZMS_NUM_LZ_REP_PROBS, &mut self.probs.lz_rep[1]) == 0 {
							let offset = recent_lz_offsets[1 + delayed];
							recent_lz_offsets[1 + delayed] = recent_lz_offsets[1];
							recent_lz_offsets[1] = recent_lz_offsets[0];
							offset
						}
						else {
							let offset = recent_lz_offsets[2 + delayed];
							recent_lz_offsets[2 + delayed] = recent_lz_offsets[2];
							recent_lz_offsets[2] = recent_lz_offsets[1];
							recent_lz_offsets[1] = recent_lz_offsets[0];
							offset
						}
					};
				recent_lz_offsets[0] = offset;
				prev_item_type = 1;

				let length = self.decode_length(&mut is)?;
				lz_copy(output, out_next, length as usize, offset as usize)?;
				out_next += length as usize;
			}
			else {
				// A delta match.
				let pair =
					if rd.decode_bit(&mut delta_state, LZMS_NUM_DELTA_PROBS, &mut self.probs.delta) == 0 {
						// Explicit power and offset.
						let power = self.delta_power_code.decode_symbol(&mut is)? as u64;
						let raw_offset = self.decode_delta_offset(&mut is)?;
						let pair = power << 32 | u64::from(raw_offset);
						recent_delta_pairs[3] = recent_delta_pairs[2];
						recent_delta_pairs[2] = recent_delta_pairs[1];
						recent_delta_pairs[1] = recent_delta_pairs[0];
						pair
					}
					else {
						let delayed = prev_item_type >> 1;
						if rd.decode_bit(&mut delta_rep_states[0], LZMS_NUM_DELTA_REP_PROBS, &mut self.probs.delta_rep[0]) == 0 {
							let pair = recent_delta_pairs[delayed];
							recent_delta_pairs[delayed] = recent_delta_pairs[0];
							pair
						}
						else if rd.decode_bit(&mut delta_rep_states[1], LZMS_NUM_DELTA_REP_PROBS, &mut self.probs.delta_rep[1]) == 0 {
							let pair = recent_delta_pairs[1 + delayed];
							recent_delta_pairs[1 + delayed] = recent_delta_pairs[1];
							recent_delta_pairs[1] = recent_delta_pairs[0];
							pair
						}
						else {
							let pair = recent_delta_pairs[2 + delayed];
							recent_delta_pairs[2 + delayed] = recent_delta_pairs[2];
							recent_delta_pairs[2] = recent_delta_pairs[1];
							recent_delta_pairs[1] = recent_delta_pairs[0];
							pair
						}
					};
				recent_delta_pairs[0] = pair;
				prev_item_type = 2;

				let power = (pair >> 32) as u32;
				let raw_offset = pair as u32;

				let length = self.decode_length(&mut is)?;

				let span = 1_u32.wrapping_shl(power);
				let offset = raw_offset.wrapping_shl(power);

				// Guard the shift and sum against overflow, and the match
				// against running off either end of the output.
				if power > 31 || offset >> power != raw_offset {
					return Err(corrupt!());
				}
				let Some(reach) = offset.checked_add(span) else {
					return Err(corrupt!());
				};
				if reach as usize > out_next {
					return Err(corrupt!());
				}
				if length as usize > out_end - out_next {
					return Err(corrupt!());
				}

				let span = span as usize;
				let mut matchptr = out_next - offset as usize;
				for _ in 0..length {
					output[out_next] = output[matchptr]
						.wrapping_add(output[out_next - span])
						.wrapping_sub(output[matchptr - span]);
					out_next += 1;
					matchptr += 1;
				}
			}
		}

		lzms_x86_filter(output, &mut self.last_target_usages, true);
		Ok(())
	}
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_new_rejects_oversize() {
		assert!(LzmsDecompressor::new(1 << 30).is_ok());
		assert!(LzmsDecompressor::new((1 << 30) + 1).is_err());
	}

	#[test]
	fn t_bad_input_sizes() {
		let mut d = LzmsDecompressor::new(1 << 16).unwrap();
		let mut out = [0_u8; 16];

		// Odd sizes and anything under four bytes are malformed outright.
		assert!(d.decompress(&[0_u8; 5], &mut out).is_err());
		assert!(d.decompress(&[0_u8; 2], &mut out).is_err());
	}

	#[test]
	fn t_empty_output() {
		let mut d = LzmsDecompressor::new(1 << 16).unwrap();
		let mut out = [0_u8; 0];
		assert!(d.decompress(&[0_u8; 4], &mut out).is_ok());
	}

	#[test]
	fn t_backwards_bitstream() {
		// Units come off the tail first, high bits first within each.
		let data = [0x34, 0x12, 0xCD, 0xAB];
		let mut is = InputBitstream::new(&data);
		assert_eq!(is.read_bits(16), 0xABCD);
		assert_eq!(is.read_bits(16), 0x1234);

		// Exhausted input reads as zeroes.
		assert_eq!(is.read_bits(16), 0);
	}
}
