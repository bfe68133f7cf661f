/*!
# Wimpress: XPRESS Decompression.
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
	ENOUGH_XPRESS,
};
use super::{
	XPRESS_MAX_CODEWORD_LEN,
	XPRESS_MAX_OFFSET,
	XPRESS_MIN_MATCH_LEN,
	XPRESS_NUM_CHARS,
	XPRESS_NUM_SYMBOLS,
	XPRESS_TABLEBITS,
};



#[derive(Debug)]
/// # XPRESS Decompressor.
pub(crate) struct XpressDecompressor {
	/// # Decode Table.
	decode_table: Box<[u16; ENOUGH_XPRESS]>,

	/// # Codeword Lengths.
	lens: [u8; XPRESS_NUM_SYMBOLS],
}

impl XpressDecompressor {
	/// # New Decompressor.
	pub(crate) fn new(max_bufsize: usize) -> Result<Self, WimError> {
		if max_bufsize > XPRESS_MAX_OFFSET as usize + 1 {
			return Err(WimError::Param);
		}
		Ok(Self {
			decode_table: Box::new([0; ENOUGH_XPRESS]),
			lens: [0; XPRESS_NUM_SYMBOLS],
		})
	}

	/// # Decompress.
	///
	/// Decompress `input` into `output`, which must be sized to exactly the
	/// expected uncompressed length.
	pub(crate) fn decompress(&mut self, input: &[u8], output: &mut [u8])
	-> Result<(), WimError> {
		// The first 256 bytes hold the codeword lengths, two per byte.
		if input.len() < XPRESS_NUM_SYMBOLS / 2 {
			return Err(corrupt!());
		}
		for i in 0..XPRESS_NUM_SYMBOLS / 2 {
			self.lens[2 * i] = input[i] & 0xF;
			self.lens[2 * i + 1] = input[i] >> 4;
		}

		make_decode_table(
			self.decode_table.as_mut_slice(),
			XPRESS_NUM_SYMBOLS,
			XPRESS_TABLEBITS,
			&self.lens,
			XPRESS_MAX_CODEWORD_LEN,
		)?;

		// Decode the matches and literals.
		let mut is = InputBitstream::new(&input[XPRESS_NUM_SYMBOLS / 2..]);
		let mut out_next = 0;
		while out_next != output.len() {
			let sym = read_huffsym(
				&mut is,
				self.decode_table.as_slice(),
				XPRESS_TABLEBITS,
				XPRESS_MAX_CODEWORD_LEN,
			) as usize;

			if sym < XPRESS_NUM_CHARS {
				output[out_next] = sym as u8;
				out_next += 1;
				continue;
			}

			let mut length = (sym & 0xF) as u32;
			let log2_offset = ((sym >> 4) & 0xF) as u32;

			is.ensure_bits(16);
			let offset = (1_u32 << log2_offset) | is.pop_bits(log2_offset);

			if length == 0xF {
				length += u32::from(is.read_byte());
				if length == 0xF + 0xFF {
					length = u32::from(is.read_u16());
				}
			}
			length += XPRESS_MIN_MATCH_LEN;

			lz_copy(output, out_next, length as usize, offset as usize)?;
			out_next += length as usize;
		}
		Ok(())
	}
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_new_rejects_oversize() {
		assert!(XpressDecompressor::new(65_537).is_err());
		assert!(XpressDecompressor::new(65_536).is_ok());
	}

	#[test]
	fn t_truncated_header() {
		let mut d = XpressDecompressor::new(4096).unwrap();
		let mut out = [0_u8; 16];
		assert!(d.decompress(&[0_u8; 100], &mut out).is_err());
	}
}
