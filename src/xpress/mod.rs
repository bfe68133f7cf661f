/*!
# Wimpress: XPRESS.

The XPRESS format (the LZ77+Huffman variant used in WIM resources) is the
simplest of the three codecs. A single 512-symbol Huffman code covers both
literals and match headers for the whole buffer; its codeword lengths lead
the compressed data as 256 bytes of packed 4-bit integers, with no pretree.

Symbols 0–255 are literal bytes. Symbols 256–511 pack a match header: the
low four bits hold `min(length - 3, 15)` and the next four the log2 of the
offset, whose remaining bits follow inline in the bitstream. Lengths of
eighteen or more spill into one interwoven extra byte, and from 273 into a
full `u16`. Symbol 256 doubles as an end-of-data marker, which some
decompressors insist on finding after the actual data.

There is no sliding window and no way to reset the Huffman code, so buffers
are capped at 64 KiB.
*/

mod compress;
mod decompress;

pub(crate) use compress::XpressCompressor;
pub(crate) use decompress::XpressDecompressor;

/// # Literal Symbols.
const XPRESS_NUM_CHARS: usize = 256;

/// # Total Symbols.
const XPRESS_NUM_SYMBOLS: usize = 512;

/// # Maximum Codeword Length.
const XPRESS_MAX_CODEWORD_LEN: u32 = 15;

/// # End-of-Data Symbol.
const XPRESS_END_OF_DATA: usize = 256;

/// # Maximum Match Offset.
const XPRESS_MAX_OFFSET: u32 = 65_535;

/// # Minimum Match Length.
const XPRESS_MIN_MATCH_LEN: u32 = 3;

/// # Maximum Match Length.
const XPRESS_MAX_MATCH_LEN: u32 = 65_538;

/// # Maximum Buffer Size.
pub(crate) const XPRESS_MAX_BUFSIZE: usize = 65_536;

/// # Decode Table Root Bits.
const XPRESS_TABLEBITS: u32 = 11;
