/*!
# Wimpress: Bitstreams and LZ Helpers.

The XPRESS and LZX formats share a bit-packing convention: bits are stored in
little endian 16-bit coding units, ordered high to low, optionally with whole
literal bytes woven in between the units. This module provides the reader for
that convention, along with the match-copy and match-extension helpers used
by all three codecs.
*/

use crate::error::{
	corrupt,
	WimError,
};

/// # Multiplicative Hash Constant.
///
/// Batch multiplier for hashing the next few bytes at a position; the high
/// bits of the product are well mixed, so hashes are taken from the top.
const LZ_HASH_MULTIPLIER: u32 = 0x1E35_A7BD;



#[derive(Debug)]
/// # Input Bitstream.
///
/// A block of in-memory data interpreted as a stream of bits, with interwoven
/// literal bytes. The next bit is always bit 31 of `bitbuf`.
///
/// For performance reasons, the bit-reading methods do not report overruns of
/// the input buffer; they instead pretend the missing data is all zeroes.
/// This has no effect on well-formed compressed data, and malformed data
/// still gets caught by the output-size check at the end.
pub(crate) struct InputBitstream<'a> {
	/// # Left-Justified Bits.
	bitbuf: u32,

	/// # Number of Valid Bits in `bitbuf`.
	bitsleft: u32,

	/// # Remaining Input.
	data: &'a [u8],
}

impl<'a> InputBitstream<'a> {
	/// # New Bitstream.
	pub(crate) const fn new(data: &'a [u8]) -> Self {
		Self {
			bitbuf: 0,
			bitsleft: 0,
			data,
		}
	}

	/// # Ensure Bits.
	///
	/// Top up `bitbuf` so it holds at least `num_bits` bits, after which up
	/// to that many bits may be peeked or removed. Works for `num_bits` up
	/// to seventeen.
	pub(crate) fn ensure_bits(&mut self, num_bits: u32) {
		if self.bitsleft >= num_bits { return; }

		let Some(unit) = self.pull_unit() else {
			self.bitsleft = 32;
			return;
		};
		self.bitbuf |= u32::from(unit) << (16 - self.bitsleft);
		self.bitsleft += 16;

		if num_bits == 17 && self.bitsleft == 16 {
			let Some(unit) = self.pull_unit() else {
				self.bitsleft = 32;
				return;
			};
			self.bitbuf |= u32::from(unit);
			self.bitsleft = 32;
		}
	}

	/// # Peek Bits.
	///
	/// Return the next `num_bits` bits without removing them. The bits must
	/// already be present from a prior `ensure_bits`.
	pub(crate) const fn peek_bits(&self, num_bits: u32) -> u32 {
		(self.bitbuf >> 1) >> (31 - num_bits)
	}

	/// # Remove Bits.
	pub(crate) fn remove_bits(&mut self, num_bits: u32) {
		self.bitbuf <<= num_bits;
		self.bitsleft -= num_bits;
	}

	/// # Pop Bits.
	///
	/// Remove and return `num_bits` bits (already ensured).
	pub(crate) fn pop_bits(&mut self, num_bits: u32) -> u32 {
		let bits = self.peek_bits(num_bits);
		self.remove_bits(num_bits);
		bits
	}

	/// # Read Bits.
	pub(crate) fn read_bits(&mut self, num_bits: u32) -> u32 {
		self.ensure_bits(num_bits);
		self.pop_bits(num_bits)
	}

	/// # Read a Literal Byte.
	pub(crate) fn read_byte(&mut self) -> u8 {
		if let [first, rest @ ..] = self.data {
			let b = *first;
			self.data = rest;
			b
		}
		else { 0 }
	}

	/// # Read an Embedded `u16`.
	pub(crate) fn read_u16(&mut self) -> u16 {
		self.pull_unit().unwrap_or(0)
	}

	/// # Read an Embedded `u32`.
	pub(crate) fn read_u32(&mut self) -> u32 {
		if let [a, b, c, d, rest @ ..] = self.data {
			let v = u32::from_le_bytes([*a, *b, *c, *d]);
			self.data = rest;
			v
		}
		else { 0 }
	}

	/// # Read Literal Bytes.
	///
	/// Copy `count` embedded literal bytes into `dst`, or error out if the
	/// input doesn't have that many left.
	pub(crate) fn read_bytes(&mut self, dst: &mut [u8], count: usize)
	-> Result<(), WimError> {
		let (src, rest) = self.data.split_at_checked(count)
			.ok_or(corrupt!())?;
		dst[..count].copy_from_slice(src);
		self.data = rest;
		Ok(())
	}

	/// # Align to a Coding-Unit Boundary.
	///
	/// Any buffered bits are discarded.
	pub(crate) fn align(&mut self) {
		self.bitsleft = 0;
		self.bitbuf = 0;
	}

	/// # Pull the Next Coding Unit.
	fn pull_unit(&mut self) -> Option<u16> {
		let (unit, rest) = self.data.split_first_chunk::<2>()?;
		self.data = rest;
		Some(u16::from_le_bytes(*unit))
	}
}



/// # Copy an LZ77 Match.
///
/// Copy `length` bytes from `pos - offset` to `pos` within `out`. The source
/// and destination regions may overlap, in which case already-copied bytes
/// feed back into the copy.
///
/// This validates both ends: the match source must not start before the
/// buffer, and the match destination must not run past its end.
pub(crate) fn lz_copy(out: &mut [u8], pos: usize, length: usize, offset: usize)
-> Result<(), WimError> {
	if offset == 0 || offset > pos || length > out.len() - pos {
		return Err(corrupt!());
	}

	if offset == 1 {
		// Run-length encoding of the previous byte. This case is common if
		// the data contains many repeated bytes.
		let b = out[pos - 1];
		out[pos..pos + length].fill(b);
	}
	else if offset >= length {
		// No overlap.
		out.copy_within(pos - offset..pos - offset + length, pos);
	}
	else {
		for i in pos..pos + length {
			out[i] = out[i - offset];
		}
	}
	Ok(())
}

/// # Extend an LZ77 Match.
///
/// Return the full match length, given that the match is already known to
/// extend for `len` bytes when comparing positions `matchptr` and `strptr`.
/// The comparison never runs past `strptr + max_len`.
pub(crate) fn lz_extend(
	data: &[u8],
	matchptr: usize,
	strptr: usize,
	len: usize,
	max_len: usize,
) -> usize {
	let mut len = len;
	while len < max_len && data[matchptr + len] == data[strptr + len] {
		len += 1;
	}
	len
}

/// # Multiplicative Hash.
///
/// Mix `seq` and keep the top `num_bits` bits of the product.
pub(crate) const fn lz_hash(seq: u32, num_bits: u32) -> usize {
	(seq.wrapping_mul(LZ_HASH_MULTIPLIER) >> (32 - num_bits)) as usize
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_bitstream_bits() {
		// 0xABCD: bits come out high-to-low.
		let data = [0xCD_u8, 0xAB];
		let mut is = InputBitstream::new(&data);
		assert_eq!(is.read_bits(4), 0xA);
		assert_eq!(is.read_bits(8), 0xBC);
		assert_eq!(is.read_bits(4), 0xD);
	}

	#[test]
	fn t_bitstream_overrun_zeroes() {
		let mut is = InputBitstream::new(&[]);
		assert_eq!(is.read_bits(17), 0);
		assert_eq!(is.read_bits(16), 0);
		assert_eq!(is.read_byte(), 0);
		assert_eq!(is.read_u16(), 0);
		assert_eq!(is.read_u32(), 0);
	}

	#[test]
	fn t_bitstream_interleave() {
		// A 16-bit unit, then a raw byte, then another unit.
		let data = [0x00_u8, 0x80, 0x42, 0x01, 0x00];
		let mut is = InputBitstream::new(&data);
		assert_eq!(is.read_bits(1), 1);
		assert_eq!(is.read_byte(), 0x42);
		assert_eq!(is.read_bits(16), 0x0002);
	}

	#[test]
	fn t_bitstream_align() {
		let data = [0xFF_u8, 0xFF, 0x34, 0x12];
		let mut is = InputBitstream::new(&data);
		assert_eq!(is.read_bits(3), 0b111);
		is.align();
		assert_eq!(is.read_u16(), 0x1234);
	}

	#[test]
	fn t_lz_copy_overlap() {
		let mut buf = *b"abc\0\0\0\0\0\0";
		lz_copy(&mut buf, 3, 6, 2).unwrap();
		assert_eq!(&buf, b"abcbcbcbc");
	}

	#[test]
	fn t_lz_copy_rle() {
		let mut buf = [7_u8, 0, 0, 0, 0];
		lz_copy(&mut buf, 1, 4, 1).unwrap();
		assert_eq!(buf, [7, 7, 7, 7, 7]);
	}

	#[test]
	fn t_lz_copy_bad() {
		let mut buf = [0_u8; 8];
		// Offset reaches before the start of the buffer.
		assert!(lz_copy(&mut buf, 2, 3, 3).is_err());
		// Length runs off the end.
		assert!(lz_copy(&mut buf, 4, 5, 2).is_err());
		// Zero offset is never valid.
		assert!(lz_copy(&mut buf, 4, 2, 0).is_err());
	}

	#[test]
	fn t_lz_extend() {
		let data = b"abcdabcdabxx";
		assert_eq!(lz_extend(data, 0, 4, 2, 8), 6);
		assert_eq!(lz_extend(data, 0, 4, 2, 4), 4);
	}
}
