/*!
# Wimpress: LZX Decompression.
*/

use crate::bits::{
	lz_copy,
	InputBitstream,
};
use crate::error::{
	corrupt,
	WimError,
};
use crate::huffman::decode::{
	make_decode_table,
	read_huffsym,
	ENOUGH_LZX_ALIGNED,
	ENOUGH_LZX_LEN,
	ENOUGH_LZX_MAIN,
	ENOUGH_LZX_PRE,
};
use super::{
	lzx_get_num_main_syms,
	lzx_get_window_order,
	lzx_postprocess,
	LZX_ALIGNEDCODE_ELEMENT_SIZE,
	LZX_ALIGNEDCODE_NUM_SYMBOLS,
	LZX_BLOCKTYPE_ALIGNED,
	LZX_BLOCKTYPE_UNCOMPRESSED,
	LZX_BLOCKTYPE_VERBATIM,
	LZX_DEFAULT_BLOCK_SIZE,
	LZX_EXTRA_OFFSET_BITS,
	LZX_LENCODE_NUM_SYMBOLS,
	LZX_MAINCODE_MAX_NUM_SYMBOLS,
	LZX_MAX_ALIGNED_CODEWORD_LEN,
	LZX_MAX_LEN_CODEWORD_LEN,
	LZX_MAX_MAIN_CODEWORD_LEN,
	LZX_MAX_PRE_CODEWORD_LEN,
	LZX_MIN_ALIGNED_OFFSET_SLOT,
	LZX_NUM_ALIGNED_OFFSET_BITS,
	LZX_NUM_CHARS,
	LZX_NUM_LEN_HEADERS,
	LZX_NUM_PRIMARY_LENS,
	LZX_OFFSET_SLOT_BASE,
	LZX_PRECODE_ELEMENT_SIZE,
	LZX_PRECODE_NUM_SYMBOLS,
	LZX_RECENT_OFFSETS_INIT,
};

/// # Decode Table Root Bits: Main Code.
const LZX_MAINCODE_TABLEBITS: u32 = 11;

/// # Decode Table Root Bits: Length Code.
const LZX_LENCODE_TABLEBITS: u32 = 9;

/// # Decode Table Root Bits: Precode.
const LZX_PRECODE_TABLEBITS: u32 = 6;

/// # Decode Table Root Bits: Aligned Code.
const LZX_ALIGNEDCODE_TABLEBITS: u32 = 7;

/// # Maximum Codeword-Length Overrun.
///
/// The precode's zero runs can write up to this many lengths past the
/// requested count before the loop notices, so the length arrays carry that
/// much extra room rather than bounds-checking every store.
const READ_LENS_MAX_OVERRUN: usize = 50;



#[derive(Debug)]
/// # LZX Decompressor.
pub(crate) struct LzxDecompressor {
	/// # Window Order.
	window_order: u32,

	/// # Main Code Size.
	num_main_syms: usize,

	/// # Main Codeword Lengths.
	///
	/// Persists across blocks; each block's lengths are deltas against the
	/// previous block's.
	maincode_lens: [u8; LZX_MAINCODE_MAX_NUM_SYMBOLS + READ_LENS_MAX_OVERRUN],

	/// # Length Codeword Lengths.
	lencode_lens: [u8; LZX_LENCODE_NUM_SYMBOLS + READ_LENS_MAX_OVERRUN],

	/// # Aligned Codeword Lengths.
	alignedcode_lens: [u8; LZX_ALIGNEDCODE_NUM_SYMBOLS],

	/// # Precode Codeword Lengths.
	precode_lens: [u8; LZX_PRECODE_NUM_SYMBOLS],

	/// # Main Decode Table.
	maincode_table: Box<[u16; ENOUGH_LZX_MAIN]>,

	/// # Length Decode Table.
	lencode_table: Box<[u16; ENOUGH_LZX_LEN]>,

	/// # Aligned Decode Table.
	alignedcode_table: [u16; ENOUGH_LZX_ALIGNED],

	/// # Precode Decode Table.
	precode_table: [u16; ENOUGH_LZX_PRE],
}

impl LzxDecompressor {
	/// # New Decompressor.
	pub(crate) fn new(max_bufsize: usize) -> Result<Self, WimError> {
		let window_order = lzx_get_window_order(max_bufsize)
			.ok_or(WimError::Param)?;
		Ok(Self {
			window_order,
			num_main_syms: lzx_get_num_main_syms(window_order),
			maincode_lens: [0; LZX_MAINCODE_MAX_NUM_SYMBOLS + READ_LENS_MAX_OVERRUN],
			lencode_lens: [0; LZX_LENCODE_NUM_SYMBOLS + READ_LENS_MAX_OVERRUN],
			alignedcode_lens: [0; LZX_ALIGNEDCODE_NUM_SYMBOLS],
			precode_lens: [0; LZX_PRECODE_NUM_SYMBOLS],
			maincode_table: Box::new([0; ENOUGH_LZX_MAIN]),
			lencode_table: Box::new([0; ENOUGH_LZX_LEN]),
			alignedcode_table: [0; ENOUGH_LZX_ALIGNED],
			precode_table: [0; ENOUGH_LZX_PRE],
		})
	}

	/// # Decompress.
	///
	/// Decompress `input` into `output`, which must be sized to exactly the
	/// expected uncompressed length.
	pub(crate) fn decompress(&mut self, input: &[u8], output: &mut [u8])
	-> Result<(), WimError> {
		if output.len() > 1 << self.window_order {
			return Err(WimError::Param);
		}

		let mut is = InputBitstream::new(input);
		let mut out_next = 0;
		let mut recent_offsets = LZX_RECENT_OFFSETS_INIT;
		let mut may_have_e8 = false;

		// The delta encoding starts from all-zero lengths.
		self.maincode_lens.fill(0);
		self.lencode_lens.fill(0);

		while out_next != output.len() {
			let (block_type, block_size) =
				self.read_block_header(&mut is, &mut recent_offsets)?;
			let block_size = block_size as usize;
			if block_size == 0 || block_size > output.len() - out_next {
				return Err(corrupt!());
			}

			if block_type == LZX_BLOCKTYPE_UNCOMPRESSED {
				is.read_bytes(&mut output[out_next..], block_size)?;

				// Odd-sized uncompressed blocks carry a padding byte.
				if block_size & 1 != 0 { is.read_byte(); }

				may_have_e8 = true;
			}
			else {
				self.decompress_block(
					block_type,
					block_size,
					&mut is,
					output,
					out_next,
					&mut recent_offsets,
				)?;
				may_have_e8 |= self.maincode_lens[0xE8] != 0;
			}
			out_next += block_size;
		}

		// Call-target translation only needs undoing if an E8 byte could
		// have been produced.
		if may_have_e8 { lzx_postprocess(output); }
		Ok(())
	}

	/// # Read a Block Header.
	///
	/// Return the block's type and uncompressed size, after absorbing the
	/// codeword lengths (compressed blocks) or the recent-offsets reload
	/// (uncompressed blocks).
	fn read_block_header(
		&mut self,
		is: &mut InputBitstream,
		recent_offsets: &mut [u32; 3],
	) -> Result<(u32, u32), WimError> {
		is.ensure_bits(4);
		let block_type = is.pop_bits(3);

		// A set bit means the default block size; otherwise the size
		// follows explicitly, gaining a third byte for the larger windows.
		let block_size =
			if is.pop_bits(1) != 0 { LZX_DEFAULT_BLOCK_SIZE }
			else {
				let mut block_size = is.read_bits(16);
				if self.window_order >= 16 {
					block_size = (block_size << 8) | is.read_bits(8);
				}
				block_size
			};

		match block_type {
			LZX_BLOCKTYPE_ALIGNED | LZX_BLOCKTYPE_VERBATIM => {
				if block_type == LZX_BLOCKTYPE_ALIGNED {
					for len in &mut self.alignedcode_lens {
						*len = is.read_bits(LZX_ALIGNEDCODE_ELEMENT_SIZE) as u8;
					}
				}

				// The main code's lengths come in two chunks, literals
				// first, each with its own precode.
				read_codeword_lens(
					&mut self.precode_lens,
					&mut self.precode_table,
					is,
					&mut self.maincode_lens[..LZX_NUM_CHARS + READ_LENS_MAX_OVERRUN],
					LZX_NUM_CHARS,
				)?;
				read_codeword_lens(
					&mut self.precode_lens,
					&mut self.precode_table,
					is,
					&mut self.maincode_lens[LZX_NUM_CHARS..self.num_main_syms + READ_LENS_MAX_OVERRUN],
					self.num_main_syms - LZX_NUM_CHARS,
				)?;
				read_codeword_lens(
					&mut self.precode_lens,
					&mut self.precode_table,
					is,
					&mut self.lencode_lens,
					LZX_LENCODE_NUM_SYMBOLS,
				)?;
			},
			LZX_BLOCKTYPE_UNCOMPRESSED => {
				// Realign to a coding-unit boundary, discarding a full unit
				// if already aligned, then reload the recent offsets.
				is.ensure_bits(1);
				is.align();

				for offset in recent_offsets.iter_mut() {
					*offset = is.read_u32();
					if *offset == 0 { return Err(corrupt!()); }
				}
			},
			_ => return Err(corrupt!()),
		}

		Ok((block_type, block_size))
	}

	#[expect(clippy::too_many_arguments, reason = "Everything here is needed.")]
	/// # Decompress One (Compressed) Block.
	fn decompress_block(
		&mut self,
		block_type: u32,
		block_size: usize,
		is: &mut InputBitstream,
		output: &mut [u8],
		mut out_next: usize,
		recent_offsets: &mut [u32; 3],
	) -> Result<(), WimError> {
		make_decode_table(
			self.maincode_table.as_mut_slice(),
			self.num_main_syms,
			LZX_MAINCODE_TABLEBITS,
			&self.maincode_lens,
			LZX_MAX_MAIN_CODEWORD_LEN,
		)?;
		make_decode_table(
			self.lencode_table.as_mut_slice(),
			LZX_LENCODE_NUM_SYMBOLS,
			LZX_LENCODE_TABLEBITS,
			&self.lencode_lens,
			LZX_MAX_LEN_CODEWORD_LEN,
		)?;

		let aligned = block_type == LZX_BLOCKTYPE_ALIGNED;
		if aligned {
			make_decode_table(
				&mut self.alignedcode_table,
				LZX_ALIGNEDCODE_NUM_SYMBOLS,
				LZX_ALIGNEDCODE_TABLEBITS,
				&self.alignedcode_lens,
				LZX_MAX_ALIGNED_CODEWORD_LEN,
			)?;
		}

		let block_end = out_next + block_size;
		while out_next != block_end {
			let mainsym = read_huffsym(
				is,
				self.maincode_table.as_slice(),
				LZX_MAINCODE_TABLEBITS,
				LZX_MAX_MAIN_CODEWORD_LEN,
			) as usize;

			if mainsym < LZX_NUM_CHARS {
				output[out_next] = mainsym as u8;
				out_next += 1;
				continue;
			}

			// The rest of the main alphabet packs an offset slot with a
			// length header, eight headers per slot.
			let mainsym = mainsym - LZX_NUM_CHARS;
			let mut length = (mainsym % LZX_NUM_LEN_HEADERS) as u32;
			let offset_slot = mainsym / LZX_NUM_LEN_HEADERS;

			if length == LZX_NUM_PRIMARY_LENS {
				length += read_huffsym(
					is,
					self.lencode_table.as_slice(),
					LZX_LENCODE_TABLEBITS,
					LZX_MAX_LEN_CODEWORD_LEN,
				);
			}
			length += 2;

			let offset =
				if offset_slot < recent_offsets.len() {
					// A repeat offset. Note this swaps with R0 rather than
					// bumping the whole queue.
					let offset = recent_offsets[offset_slot];
					recent_offsets[offset_slot] = recent_offsets[0];
					offset
				}
				else {
					let num_extra = u32::from(LZX_EXTRA_OFFSET_BITS[offset_slot]);
					let adjusted =
						if aligned && offset_slot >= LZX_MIN_ALIGNED_OFFSET_SLOT {
							let high = is.read_bits(
								num_extra - LZX_NUM_ALIGNED_OFFSET_BITS,
							) << LZX_NUM_ALIGNED_OFFSET_BITS;
							high | read_huffsym(
								is,
								&self.alignedcode_table,
								LZX_ALIGNEDCODE_TABLEBITS,
								LZX_MAX_ALIGNED_CODEWORD_LEN,
							)
						}
						else { is.read_bits(num_extra) };

					// The slot bases already fold in the repeat-offset
					// adjustment, so this is the real offset.
					let offset =
						(LZX_OFFSET_SLOT_BASE[offset_slot] + adjusted as i32) as u32;
					recent_offsets[2] = recent_offsets[1];
					recent_offsets[1] = recent_offsets[0];
					offset
				};
			recent_offsets[0] = offset;

			// Matches cannot cross a block boundary.
			if length as usize > block_end - out_next {
				return Err(corrupt!());
			}
			lz_copy(output, out_next, length as usize, offset as usize)?;
			out_next += length as usize;
		}

		Ok(())
	}
}

/// # Read Delta-Encoded Codeword Lengths.
///
/// Update `lens[..num_lens]` in place: read the 20-symbol precode, then use
/// it to decode the per-symbol deltas (mod 17) and zero runs. Runs may
/// overshoot `num_lens` by up to `READ_LENS_MAX_OVERRUN` entries, which the
/// slice must accommodate.
fn read_codeword_lens(
	precode_lens: &mut [u8; LZX_PRECODE_NUM_SYMBOLS],
	precode_table: &mut [u16],
	is: &mut InputBitstream,
	lens: &mut [u8],
	num_lens: usize,
) -> Result<(), WimError> {
	for len in precode_lens.iter_mut() {
		*len = is.read_bits(LZX_PRECODE_ELEMENT_SIZE) as u8;
	}

	make_decode_table(
		precode_table,
		LZX_PRECODE_NUM_SYMBOLS,
		LZX_PRECODE_TABLEBITS,
		precode_lens,
		LZX_MAX_PRE_CODEWORD_LEN,
	)?;

	let mut i = 0;
	while i < num_lens {
		let presym = read_huffsym(
			is,
			precode_table,
			LZX_PRECODE_TABLEBITS,
			LZX_MAX_PRE_CODEWORD_LEN,
		);
		match presym {
			0..=16 => {
				lens[i] = delta_len(lens[i], presym);
				i += 1;
			},
			// A short or long zero run.
			17 => {
				let run_len = 4 + is.read_bits(4) as usize;
				lens[i..i + run_len].fill(0);
				i += run_len;
			},
			18 => {
				let run_len = 20 + is.read_bits(5) as usize;
				lens[i..i + run_len].fill(0);
				i += run_len;
			},
			// A run of identical deltas.
			_ => {
				let run_len = 4 + is.read_bits(1) as usize;
				let presym = read_huffsym(
					is,
					precode_table,
					LZX_PRECODE_TABLEBITS,
					LZX_MAX_PRE_CODEWORD_LEN,
				);
				if presym > 16 { return Err(corrupt!()); }
				let len = delta_len(lens[i], presym);
				lens[i..i + run_len].fill(len);
				i += run_len;
			},
		}
	}

	Ok(())
}

/// # Apply a Length Delta.
///
/// The new length is the old minus the presym, mod 17.
const fn delta_len(old: u8, presym: u32) -> u8 {
	let len = old.wrapping_sub(presym as u8);
	if (len as i8) < 0 { len.wrapping_add(17) }
	else { len }
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_new_bounds() {
		assert!(LzxDecompressor::new(0).is_err());
		assert!(LzxDecompressor::new(1 << 21).is_ok());
		assert!(LzxDecompressor::new((1 << 21) + 1).is_err());
	}

	#[test]
	fn t_uncompressed_block() {
		// Handcrafted: type 3, explicit size 4, realignment, recent
		// offsets {1, 1, 1}, then the four raw bytes.
		let input: &[u8] = &[
			0x00, 0x60,             // 011 (type) + 0 (size flag) + high size bits
			0x00, 0x40,             // low size bits (total size = 4), then discarded
			0x01, 0x00, 0x00, 0x00, // R0 = 1
			0x01, 0x00, 0x00, 0x00, // R1 = 1
			0x01, 0x00, 0x00, 0x00, // R2 = 1
			b'a', b'b', b'c', b'd',
		];
		let mut d = LzxDecompressor::new(32_768).unwrap();
		let mut out = [0_u8; 4];
		d.decompress(input, &mut out).unwrap();
		assert_eq!(&out, b"abcd");
	}

	#[test]
	fn t_uncompressed_zero_offset() {
		// Same as above but with R1 zeroed, which is never valid.
		let input: &[u8] = &[
			0x00, 0x60,
			0x00, 0x40,
			0x01, 0x00, 0x00, 0x00,
			0x00, 0x00, 0x00, 0x00,
			0x01, 0x00, 0x00, 0x00,
			b'a', b'b', b'c', b'd',
		];
		let mut d = LzxDecompressor::new(32_768).unwrap();
		let mut out = [0_u8; 4];
		assert!(d.decompress(input, &mut out).is_err());
	}

	#[test]
	fn t_bad_block_type() {
		let mut d = LzxDecompressor::new(32_768).unwrap();
		let mut out = [0_u8; 4];
		assert!(d.decompress(&[0_u8; 8], &mut out).is_err());
	}

	#[test]
	fn t_oversized_output() {
		let mut d = LzxDecompressor::new(32_768).unwrap();
		let mut out = vec![0_u8; 32_769];
		assert!(d.decompress(&[0_u8; 8], &mut out).is_err());
	}
}
