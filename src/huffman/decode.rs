/*!
# Wimpress: Huffman Decode Tables.

Decoding uses a flat lookup table indexed by the next `table_bits` bits of
input. Codewords no longer than `table_bits` resolve in one step; longer
ones land on a pointer entry that redirects into a subtable appended after
the root, indexed by the codeword's remaining bits.

Each table entry is sixteen bits split into two fields, `symbol << 4 | length`:

* Direct root entry: the decoded symbol and its codeword length;
* Subtable pointer: the subtable's start index and the number of bits it is
  indexed with (recognizable because the index field always exceeds any
  symbol value);
* Subtable entry: the decoded symbol and its codeword length minus
  `table_bits`.
*/

use crate::bits::InputBitstream;
use crate::error::{
	corrupt,
	WimError,
};
use super::{
	MAX_CODEWORD_LEN,
	MAX_NUM_SYMS,
};

/// # Symbol Field Shift.
pub(crate) const DECODE_TABLE_SYMBOL_SHIFT: u32 = 4;

/// # Length Field Mask.
pub(crate) const DECODE_TABLE_LENGTH_MASK: u16 = (1 << DECODE_TABLE_SYMBOL_SHIFT) - 1;

/// # Worst-Case Table Sizes.
///
/// The maximum number of entries, root plus all subtables, a decode table
/// can need, as computed by zlib's `enough` utility for each (alphabet size,
/// root bits, maximum codeword length) combination the codecs use.
pub(crate) const ENOUGH_XPRESS: usize = 2566;           // 512, 11, 15

/// # Worst-Case Size: LZX Main Code.
pub(crate) const ENOUGH_LZX_MAIN: usize = 2726;         // 656, 11, 16

/// # Worst-Case Size: LZX Length Code.
pub(crate) const ENOUGH_LZX_LEN: usize = 878;           // 249, 9, 16

/// # Worst-Case Size: LZX Aligned-Offset Code.
pub(crate) const ENOUGH_LZX_ALIGNED: usize = 128;       // 8, 7, 7

/// # Worst-Case Size: LZX Precode.
pub(crate) const ENOUGH_LZX_PRE: usize = 582;           // 20, 6, 15

/// # Worst-Case Size: LZMS Literal Code.
pub(crate) const ENOUGH_LZMS_LITERAL: usize = 1302;     // 256, 10, 15

/// # Worst-Case Size: LZMS Length Code.
pub(crate) const ENOUGH_LZMS_LEN: usize = 618;          // 54, 9, 15

/// # Worst-Case Size: LZMS Offset Codes.
pub(crate) const ENOUGH_LZMS_OFFSET: usize = 2854;      // 799, 11, 15

/// # Worst-Case Size: LZMS Delta Power Code.
pub(crate) const ENOUGH_LZMS_POWER: usize = 128;        // 8, 7, 15



/// # Pack a Decode Table Entry.
const fn entry(symbol: u16, length: u32) -> u16 {
	(symbol << DECODE_TABLE_SYMBOL_SHIFT) | length as u16
}

/// # Build a Huffman Decode Table.
///
/// Fill `decode_table` from the per-symbol codeword lengths in
/// `lens[..num_syms]`, where a zero length means the symbol is unused. The
/// table must be at least the "enough" size for its parameters.
///
/// Errors if the lengths over- or under-subscribe the code space. Two
/// incomplete codes are permitted anyway: the empty one, for which the root
/// table is zeroed so that any lookup yields symbol zero without consuming
/// bits (a stream that then actually requests a symbol is malformed and gets
/// caught downstream), and a lone one-bit codeword, whose symbol fills the
/// root table outright. Adaptive codes with a single-symbol alphabet
/// produce the latter.
pub(crate) fn make_decode_table(
	decode_table: &mut [u16],
	num_syms: usize,
	table_bits: u32,
	lens: &[u8],
	max_codeword_len: u32,
) -> Result<(), WimError> {
	debug_assert!(num_syms <= MAX_NUM_SYMS);
	debug_assert!(max_codeword_len as usize <= MAX_CODEWORD_LEN);
	debug_assert!(table_bits <= max_codeword_len);

	let mut len_counts = [0_u32; MAX_CODEWORD_LEN + 1];
	for &len in &lens[..num_syms] {
		len_counts[len as usize] += 1;
	}

	// A codeword of length n takes up 2^-n of the code space; the lengths
	// must fill it exactly.
	let mut remainder: i64 = 1;
	for len in 1..=max_codeword_len as usize {
		remainder = (remainder << 1) - i64::from(len_counts[len]);
		if remainder < 0 { return Err(corrupt!()); }
	}
	if remainder != 0 {
		// The empty code.
		if remainder == 1 << max_codeword_len {
			decode_table[..1 << table_bits].fill(0);
			return Ok(());
		}

		// A lone one-bit codeword.
		if remainder != 1 << (max_codeword_len - 1) || len_counts[1] != 1 {
			return Err(corrupt!());
		}
		let Some(sym) = lens[..num_syms].iter().position(|&len| len == 1) else {
			return Err(corrupt!());
		};
		decode_table[..1 << table_bits].fill(entry(sym as u16, 1));
		return Ok(());
	}

	// Sort the used symbols by (length, symbol). With a canonical code this
	// is also codeword order, so the root table fills contiguously.
	let mut offsets = [0_u32; MAX_CODEWORD_LEN + 1];
	for len in 1..max_codeword_len as usize {
		offsets[len + 1] = offsets[len] + len_counts[len];
	}
	let mut sorted_syms = [0_u16; MAX_NUM_SYMS];
	for sym in 0..num_syms {
		let len = lens[sym] as usize;
		if len != 0 {
			sorted_syms[offsets[len] as usize] = sym as u16;
			offsets[len] += 1;
		}
	}
	let num_used = offsets[max_codeword_len as usize] as usize;

	let mut remaining = len_counts;
	let mut codeword: u32 = 0;
	let mut len: u32 = 0;

	// Subtable bookkeeping: the prefix (root index) of the open subtable,
	// its start, its index width, and the next free slot past it.
	let mut cur_prefix = u32::MAX;
	let mut subtable_start = 0_usize;
	let mut subtable_bits = 0_u32;
	let mut next_subtable = 1_usize << table_bits;

	for i in 0..num_used {
		let sym = sorted_syms[i];
		let sym_len = u32::from(lens[sym as usize]);
		if sym_len != len {
			codeword <<= sym_len - len;
			len = sym_len;
		}

		if len <= table_bits {
			let count = 1_usize << (table_bits - len);
			let start = (codeword as usize) << (table_bits - len);
			decode_table[start..start + count].fill(entry(sym, len));
		}
		else {
			let prefix = codeword >> (len - table_bits);
			if prefix != cur_prefix {
				cur_prefix = prefix;
				subtable_start = next_subtable;

				// Size the subtable: if the first codeword exceeds the
				// root width by n bits, at least 2^n entries are needed,
				// widening until the remaining codewords fill it exactly.
				// (A complete code guarantees they eventually do.)
				subtable_bits = len - table_bits;
				let mut codespace_used = remaining[len as usize];
				while codespace_used < (1 << subtable_bits) {
					subtable_bits += 1;
					codespace_used = (codespace_used << 1) +
						remaining[(table_bits + subtable_bits) as usize];
				}
				next_subtable += 1 << subtable_bits;

				decode_table[prefix as usize] =
					entry(subtable_start as u16, subtable_bits);
			}

			let count = 1_usize << (table_bits + subtable_bits - len);
			let low = (codeword & ((1 << (len - table_bits)) - 1)) as usize;
			let start = subtable_start + (low << (table_bits + subtable_bits - len));
			decode_table[start..start + count].fill(entry(sym, len - table_bits));
		}

		remaining[len as usize] -= 1;
		codeword += 1;
	}

	Ok(())
}

/// # Read a Huffman Symbol.
///
/// Decode the next symbol from the bitstream using the given decode table.
/// Exhausted input decodes as if the missing bits were all zeroes.
pub(crate) fn read_huffsym(
	is: &mut InputBitstream,
	decode_table: &[u16],
	table_bits: u32,
	max_codeword_len: u32,
) -> u32 {
	// Preload enough bits to cover any codeword.
	is.ensure_bits(max_codeword_len);

	let mut entry = decode_table[is.peek_bits(table_bits) as usize];
	let mut symbol = entry >> DECODE_TABLE_SYMBOL_SHIFT;
	let mut length = u32::from(entry & DECODE_TABLE_LENGTH_MASK);

	// A pointer entry redirects into its subtable, indexed by the bits
	// after the root's.
	if max_codeword_len > table_bits &&
		u32::from(entry) >= (1 << (table_bits + DECODE_TABLE_SYMBOL_SHIFT)) {
		is.remove_bits(table_bits);
		entry = decode_table[symbol as usize + is.peek_bits(length) as usize];
		symbol = entry >> DECODE_TABLE_SYMBOL_SHIFT;
		length = u32::from(entry & DECODE_TABLE_LENGTH_MASK);
	}

	is.remove_bits(length);
	u32::from(symbol)
}



#[cfg(test)]
mod test {
	use super::*;
	use crate::huffman::make_canonical_code;

	/// # Pack Codewords Into a Bitstream.
	///
	/// Encode the given symbols MSB-first into little endian 16-bit units,
	/// the way the decoder expects to find them.
	fn pack(symbols: &[usize], lens: &[u8], codewords: &[u32]) -> Vec<u8> {
		let mut out = Vec::new();
		let mut bitbuf: u32 = 0;
		let mut bitcount: u32 = 0;
		for &sym in symbols {
			bitbuf = (bitbuf << lens[sym]) | codewords[sym];
			bitcount += u32::from(lens[sym]);
			while bitcount >= 16 {
				let unit = (bitbuf >> (bitcount - 16)) as u16;
				out.extend_from_slice(&unit.to_le_bytes());
				bitcount -= 16;
			}
		}
		if bitcount > 0 {
			let unit = (bitbuf << (16 - bitcount)) as u16;
			out.extend_from_slice(&unit.to_le_bytes());
		}
		out
	}

	#[test]
	fn t_decode_direct_and_subtable() {
		// Skewed frequencies produce codewords both shorter and longer
		// than the root width, exercising subtables.
		let mut freqs = [1_u32; 40];
		freqs[0] = 1000;
		freqs[1] = 400;
		freqs[2] = 150;
		let mut lens = [0_u8; 40];
		let mut codewords = [0_u32; 40];
		make_canonical_code(40, 15, &freqs, &mut lens, &mut codewords);
		assert!(lens.iter().any(|&l| u32::from(l) > 5));

		let mut table = vec![0_u16; 4096];
		make_decode_table(&mut table, 40, 5, &lens, 15).unwrap();

		let symbols: Vec<usize> = (0..40).chain([0, 0, 2, 39, 1]).collect();
		let data = pack(&symbols, &lens, &codewords);
		let mut is = crate::bits::InputBitstream::new(&data);
		for &want in &symbols {
			assert_eq!(read_huffsym(&mut is, &table, 5, 15), want as u32);
		}
	}

	#[test]
	fn t_decode_rejects_bad_lengths() {
		let mut table = vec![0_u16; 512];

		// Over-subscribed.
		let lens = [1_u8, 1, 1];
		assert!(make_decode_table(&mut table, 3, 5, &lens, 7).is_err());

		// Under-subscribed but not empty.
		let lens = [2_u8, 0, 0];
		assert!(make_decode_table(&mut table, 3, 5, &lens, 7).is_err());
	}

	#[test]
	fn t_decode_single_codeword() {
		// One used symbol: the root fills with it, one bit per decode.
		let mut table = vec![0_u16; 512];
		let mut lens = [0_u8; 8];
		lens[3] = 1;
		make_decode_table(&mut table, 8, 5, &lens, 7).unwrap();

		let mut is = crate::bits::InputBitstream::new(&[0x00, 0x00]);
		assert_eq!(read_huffsym(&mut is, &table, 5, 7), 3);
		assert_eq!(read_huffsym(&mut is, &table, 5, 7), 3);
	}

	#[test]
	fn t_decode_empty_code() {
		let mut table = vec![0xFFFF_u16; 512];
		let lens = [0_u8; 8];
		make_decode_table(&mut table, 8, 5, &lens, 7).unwrap();

		// Lookups decode symbol zero without consuming anything.
		let mut is = crate::bits::InputBitstream::new(&[0xAA, 0xAA]);
		assert_eq!(read_huffsym(&mut is, &table, 5, 7), 0);
	}
}
