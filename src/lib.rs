/*!
# Wimpress

XPRESS, LZX, and LZMS compression codecs for WIM resources.

Each format gets a [`Compressor`] and [`Decompressor`] pair sized once at
creation, with matchfinder tables, decode tables, and parse scratch all
allocated up front, so a single pair can chew through any number of chunks
without further allocation.

Compressed WIM resources never record their uncompressed size; the caller
supplies it by sizing the output slice passed to
[`Decompressor::decompress`]. Likewise [`Compressor::compress`] reports
zero rather than writing output that would not actually save space.
*/

#![deny(unsafe_code)]

#![warn(
	clippy::filetype_is_file,
	clippy::integer_division,
	clippy::needless_borrow,
	clippy::nursery,
	clippy::pedantic,
	clippy::perf,
	clippy::suboptimal_flops,
	clippy::unneeded_field_pattern,
	macro_use_extern_crate,
	missing_copy_implementations,
	missing_debug_implementations,
	missing_docs,
	non_ascii_idents,
	trivial_casts,
	trivial_numeric_casts,
	unreachable_pub,
	unused_crate_dependencies,
	unused_extern_crates,
	unused_import_braces,
)]

#![allow(
	clippy::module_name_repetitions,
	clippy::redundant_pub_crate,
)]

mod bits;
mod error;
mod huffman;
mod lzms;
mod lzx;
mod matchfinder;
mod xpress;

pub use error::WimError;

use lzms::{
	LzmsCompressor,
	LzmsDecompressor,
};
use lzx::{
	LzxCompressor,
	LzxDecompressor,
};
use std::fmt;
use xpress::{
	XpressCompressor,
	XpressDecompressor,
};



/// # Default Compression Level.
///
/// Substituted when a level of zero is given.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 50;

/// # Highest Valid Compression Level.
const MAX_COMPRESSION_LEVEL: u32 = 0xFF_FFFF;



#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
/// # Compression Format.
///
/// The three codecs WIM resources use, from oldest and fastest to newest
/// and tightest.
pub enum Format {
	/// # XPRESS (Huffman Variant).
	///
	/// Buffers up to 64 KiB.
	Xpress,

	/// # LZX (WIM Variant).
	///
	/// Buffers up to 2 MiB.
	Lzx,

	/// # LZMS.
	///
	/// Buffers up to 1 GiB.
	Lzms,
}

impl Format {
	/// # Format Name.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Xpress => "XPRESS",
			Self::Lzx => "LZX",
			Self::Lzms => "LZMS",
		}
	}
}

impl fmt::Display for Format {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}



/// # Format-Specific Compressor State.
enum CompressorKind {
	/// # XPRESS.
	Xpress(XpressCompressor),

	/// # LZX.
	Lzx(LzxCompressor),

	/// # LZMS.
	Lzms(LzmsCompressor),
}


/// # One-Format Compressor.
///
/// Sized for a maximum buffer length at creation; any number of buffers up
/// to that length can then be compressed through it.
pub struct Compressor {
	/// # The Format.
	format: Format,

	/// # Codec State.
	inner: CompressorKind,
}

impl fmt::Debug for Compressor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Compressor")
			.field("format", &self.format)
			.finish_non_exhaustive()
	}
}

impl Compressor {
	/// # New Compressor.
	///
	/// `max_buf_size` caps the length of the buffers later fed to
	/// [`Compressor::compress`]. A `compression_level` of zero selects
	/// [`DEFAULT_COMPRESSION_LEVEL`]; the scale runs roughly ten (fast)
	/// through one hundred (thorough).
	///
	/// ## Errors
	///
	/// Returns an error if `max_buf_size` is zero or exceeds the format's
	/// limit, or if the level is out of range.
	pub fn new(format: Format, max_buf_size: usize, compression_level: u32)
	-> Result<Self, WimError> {
		if max_buf_size == 0 || MAX_COMPRESSION_LEVEL < compression_level {
			return Err(WimError::Param);
		}
		let compression_level =
			if compression_level == 0 { DEFAULT_COMPRESSION_LEVEL }
			else { compression_level };

		let inner = match format {
			Format::Xpress => CompressorKind::Xpress(
				XpressCompressor::new(max_buf_size, compression_level)?
			),
			Format::Lzx => CompressorKind::Lzx(
				LzxCompressor::new(max_buf_size, compression_level)?
			),
			Format::Lzms => CompressorKind::Lzms(
				LzmsCompressor::new(max_buf_size, compression_level)?
			),
		};
		Ok(Self { format, inner })
	}

	/// # The Format.
	#[must_use]
	pub const fn format(&self) -> Format { self.format }

	/// # Compress a Buffer.
	///
	/// Write the compressed rendition of `input` to the start of `output`
	/// and return its length. A return of zero means the result would not
	/// have fit `output`; compression is pointless unless it saves space,
	/// so callers typically pass an output buffer slightly smaller than
	/// the input and store the data raw when zero comes back.
	pub fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		match &mut self.inner {
			CompressorKind::Xpress(c) => c.compress(input, output),
			CompressorKind::Lzx(c) => c.compress(input, output),
			CompressorKind::Lzms(c) => c.compress(input, output),
		}
	}
}



/// # Format-Specific Decompressor State.
enum DecompressorKind {
	/// # XPRESS.
	Xpress(XpressDecompressor),

	/// # LZX.
	Lzx(LzxDecompressor),

	/// # LZMS.
	Lzms(LzmsDecompressor),
}


/// # One-Format Decompressor.
pub struct Decompressor {
	/// # The Format.
	format: Format,

	/// # Codec State.
	inner: DecompressorKind,
}

impl fmt::Debug for Decompressor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Decompressor")
			.field("format", &self.format)
			.finish_non_exhaustive()
	}
}

impl Decompressor {
	/// # New Decompressor.
	///
	/// `max_buf_size` caps the *uncompressed* length of the buffers later
	/// fed to [`Decompressor::decompress`].
	///
	/// ## Errors
	///
	/// Returns an error if `max_buf_size` is zero or exceeds the format's
	/// limit.
	pub fn new(format: Format, max_buf_size: usize) -> Result<Self, WimError> {
		if max_buf_size == 0 { return Err(WimError::Param); }

		let inner = match format {
			Format::Xpress => DecompressorKind::Xpress(XpressDecompressor::new(max_buf_size)?),
			Format::Lzx => DecompressorKind::Lzx(LzxDecompressor::new(max_buf_size)?),
			Format::Lzms => DecompressorKind::Lzms(LzmsDecompressor::new(max_buf_size)?),
		};
		Ok(Self { format, inner })
	}

	/// # The Format.
	#[must_use]
	pub const fn format(&self) -> Format { self.format }

	/// # Decompress a Buffer.
	///
	/// Decode `input` into `output`, filling it exactly. Compressed WIM
	/// resources do not record their uncompressed size, so the caller
	/// must size `output` to the known original length.
	///
	/// ## Errors
	///
	/// Returns an error if the compressed data is malformed or does not
	/// decode to exactly `output.len()` bytes.
	pub fn decompress(&mut self, input: &[u8], output: &mut [u8])
	-> Result<(), WimError> {
		match &mut self.inner {
			DecompressorKind::Xpress(d) => d.decompress(input, output),
			DecompressorKind::Lzx(d) => d.decompress(input, output),
			DecompressorKind::Lzms(d) => d.decompress(input, output),
		}
	}
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_new_param_checks() {
		assert!(Compressor::new(Format::Xpress, 0, 50).is_err());
		assert!(Compressor::new(Format::Xpress, 65_537, 50).is_err());
		assert!(Compressor::new(Format::Lzx, 1 << 22, 50).is_err());
		assert!(Compressor::new(Format::Lzms, (1 << 30) + 1, 50).is_err());
		assert!(Compressor::new(Format::Lzx, 32_768, 0x100_0000).is_err());
		assert!(Decompressor::new(Format::Lzms, 0).is_err());

		// Level zero means default.
		assert!(Compressor::new(Format::Lzx, 32_768, 0).is_ok());
	}

	#[test]
	fn t_format_labels() {
		assert_eq!(Format::Xpress.to_string(), "XPRESS");
		assert_eq!(Format::Lzx.to_string(), "LZX");
		assert_eq!(Format::Lzms.to_string(), "LZMS");
	}
}
