/*!
# Wimpress: XPRESS Compression.

Three parsers share the output machinery, picked by compression level:
greedy below 30, lazy below 60, near-optimal from 60 up. The near-optimal
parser runs the whole buffer through a binary-tree matchfinder first,
caching every match, then iterates minimum-cost path searches over the
cache under a cost model refined from each pass's Huffman code.
*/

use crate::huffman::make_canonical_code;
use crate::matchfinder::{
	BtMatchFinder,
	HcMatchFinder,
	LzMatch,
};
use super::{
	XPRESS_END_OF_DATA,
	XPRESS_MAX_CODEWORD_LEN,
	XPRESS_MAX_BUFSIZE,
	XPRESS_MAX_MATCH_LEN,
	XPRESS_MIN_MATCH_LEN,
	XPRESS_NUM_CHARS,
	XPRESS_NUM_SYMBOLS,
};

/// # Lowest Near-Optimal Level.
const MIN_LEVEL_FOR_NEAR_OPTIMAL: u32 = 60;

/// # Match-Cache Entries Reserved Per Position.
///
/// High enough that virtually all of the time, every match found fits in
/// the cache; overflow falls back to literals for the remainder.
const CACHE_RESERVE_PER_POS: usize = 8;

/// # Offset Field Shift in an Optimum-Node Item.
const OPTIMUM_OFFSET_SHIFT: u32 = 16;

/// # Length Field Mask in an Optimum-Node Item.
const OPTIMUM_LEN_MASK: u32 = (1 << OPTIMUM_OFFSET_SHIFT) - 1;



#[derive(Debug, Clone, Copy, Default)]
/// # Graph Node for the Near-Optimal Parser.
///
/// One node per buffer position. `cost_to_end` is the minimum cost to reach
/// the end of the buffer from here; `item` is the literal or match taken to
/// do so, with the length (1 for a literal) in the low sixteen bits and the
/// offset (or literal byte) above them.
struct OptimumNode {
	/// # Minimum Cost to End-of-Buffer.
	cost_to_end: u32,

	/// # Chosen Literal/Match.
	item: u32,
}

#[derive(Debug, Clone, Copy)]
/// # An Intermediate Match or Literal.
///
/// Bits 0–8 hold the symbol, 9–24 the adjusted length, 25–28 the number of
/// extra offset bits, and 29 up the extra offset bits themselves.
struct XpressItem(u64);

#[derive(Debug)]
/// # Parser State.
enum Parser {
	/// # Greedy/Lazy.
	Fast {
		/// # Chosen Items.
		chosen_items: Vec<XpressItem>,

		/// # Hash-Chain Matchfinder.
		mf: HcMatchFinder<u16>,

		/// # Check the Next Position Before Committing?
		lazy: bool,
	},

	/// # Near-Optimal.
	NearOptimal {
		/// # Per-Position Graph Nodes.
		optimum_nodes: Vec<OptimumNode>,

		/// # Cached Matches, Plus a Trailer Entry Per Position.
		match_cache: Vec<LzMatch>,

		/// # Cache Cutoff.
		cache_overflow_mark: usize,

		/// # Optimization Passes.
		num_optim_passes: u32,

		/// # Per-Symbol Bit Costs.
		costs: [u32; XPRESS_NUM_SYMBOLS],

		/// # Binary-Tree Matchfinder.
		mf: BtMatchFinder<u16>,
	},
}

#[derive(Debug)]
/// # XPRESS Compressor.
pub(crate) struct XpressCompressor {
	/// # Symbol Frequencies.
	freqs: [u32; XPRESS_NUM_SYMBOLS],

	/// # Huffman Codewords.
	codewords: [u32; XPRESS_NUM_SYMBOLS],

	/// # Huffman Codeword Lengths.
	lens: [u8; XPRESS_NUM_SYMBOLS],

	/// # Nice Match Length.
	///
	/// A match this long gets chosen immediately, no further searching.
	nice_match_length: u32,

	/// # Maximum Search Depth.
	max_search_depth: u32,

	/// # Parser.
	parser: Parser,
}



/// # Output Bitstream.
///
/// XPRESS output interweaves 16-bit coding units with literal bytes: two
/// unit slots are always reserved ahead of the byte cursor, so bits land
/// *before* the bytes that were logically written after them.
///
/// Writes past the end of the buffer are dropped; `flush` then reports the
/// overflow by returning zero.
struct OutputBitstream<'a> {
	/// # Pending Bits.
	bitbuf: u32,

	/// # Number of Pending Bits.
	bitcount: u32,

	/// # Output Buffer.
	out: &'a mut [u8],

	/// # Position of the Next 16-Bit Unit.
	next_bits: usize,

	/// # Position of the Unit After That.
	next_bits2: usize,

	/// # Position of the Next Literal Byte.
	next_byte: usize,
}

impl<'a> OutputBitstream<'a> {
	/// # New Bitstream.
	///
	/// The buffer must be at least four bytes.
	fn new(out: &'a mut [u8]) -> Self {
		Self {
			bitbuf: 0,
			bitcount: 0,
			out,
			next_bits: 0,
			next_bits2: 2,
			next_byte: 4,
		}
	}

	/// # Write Bits.
	///
	/// At most sixteen at a time; higher-order bits of `bits` must be clear.
	fn write_bits(&mut self, bits: u32, num_bits: u32) {
		self.bitcount += num_bits;
		self.bitbuf = (self.bitbuf << num_bits) | bits;

		if self.bitcount > 16 {
			self.bitcount -= 16;
			if self.out.len() - self.next_byte >= 2 {
				let unit = (self.bitbuf >> self.bitcount) as u16;
				self.out[self.next_bits..self.next_bits + 2]
					.copy_from_slice(&unit.to_le_bytes());
				self.next_bits = self.next_bits2;
				self.next_bits2 = self.next_byte;
				self.next_byte += 2;
			}
		}
	}

	/// # Interweave a Literal Byte.
	fn write_byte(&mut self, byte: u8) {
		if self.next_byte < self.out.len() {
			self.out[self.next_byte] = byte;
			self.next_byte += 1;
		}
	}

	/// # Interweave Two Literal Bytes.
	fn write_u16(&mut self, v: u16) {
		if self.out.len() - self.next_byte >= 2 {
			self.out[self.next_byte..self.next_byte + 2]
				.copy_from_slice(&v.to_le_bytes());
			self.next_byte += 2;
		}
	}

	/// # Flush.
	///
	/// Write the last coding unit and return the total bytes used, or zero
	/// if the buffer overflowed along the way.
	fn flush(mut self) -> usize {
		if self.out.len() - self.next_byte < 2 { return 0; }

		let unit = (self.bitbuf << (16 - self.bitcount)) as u16;
		self.out[self.next_bits..self.next_bits + 2]
			.copy_from_slice(&unit.to_le_bytes());
		self.out[self.next_bits2] = 0;
		self.out[self.next_bits2 + 1] = 0;

		self.next_byte
	}

	/// # Extra Length Bytes.
	///
	/// Lengths of eighteen or more need one extra byte; 273 or more, three.
	fn write_extra_length_bytes(&mut self, adjusted_len: u32) {
		if adjusted_len >= 0xF {
			let byte1 = (adjusted_len - 0xF).min(0xFF) as u8;
			self.write_byte(byte1);
			if byte1 == 0xFF {
				self.write_u16(adjusted_len as u16);
			}
		}
	}
}



/// # Match Symbol.
const fn match_symbol(log2_offset: u32, len_hdr: u32) -> usize {
	XPRESS_NUM_CHARS + ((log2_offset << 4) | len_hdr) as usize
}

/// # Log2 of an Offset.
const fn log2_offset(offset: u32) -> u32 { 31 - offset.leading_zeros() }

/// # Record a Literal.
fn record_literal(freqs: &mut [u32; XPRESS_NUM_SYMBOLS], literal: u8) -> XpressItem {
	freqs[literal as usize] += 1;
	XpressItem(u64::from(literal))
}

/// # Record a Match.
fn record_match(freqs: &mut [u32; XPRESS_NUM_SYMBOLS], length: u32, offset: u32)
-> XpressItem {
	let adjusted_len = length - XPRESS_MIN_MATCH_LEN;
	let len_hdr = adjusted_len.min(0xF);
	let log2 = log2_offset(offset);
	let sym = match_symbol(log2, len_hdr);

	freqs[sym] += 1;

	XpressItem(
		(sym as u64)
			| u64::from(adjusted_len) << 9
			| u64::from(log2) << 25
			| u64::from(offset ^ (1 << log2)) << 29
	)
}

impl XpressCompressor {
	/// # New Compressor.
	///
	/// `max_bufsize` caps the buffers later fed to `compress`; it must not
	/// exceed 64 KiB. The level selects the parser and its thoroughness.
	pub(crate) fn new(max_bufsize: usize, compression_level: u32)
	-> Result<Self, crate::error::WimError> {
		if max_bufsize > XPRESS_MAX_BUFSIZE {
			return Err(crate::error::WimError::Param);
		}

		let (parser, mut max_search_depth, nice_match_length) =
			if compression_level < MIN_LEVEL_FOR_NEAR_OPTIMAL {
				let lazy = compression_level >= 30;
				let parser = Parser::Fast {
					chosen_items: Vec::with_capacity(max_bufsize),
					mf: HcMatchFinder::new(max_bufsize),
					lazy,
				};
				if lazy {
					// The lazy parser halves the depth for its second
					// look, so the depth can't drop below two.
					(
						parser,
						(compression_level * 30 / 32).max(2),
						compression_level * 60 / 32,
					)
				}
				else {
					(
						parser,
						compression_level * 30 / 16,
						compression_level * 60 / 16,
					)
				}
			}
			else {
				let cache_overflow_mark = max_bufsize * CACHE_RESERVE_PER_POS;
				let parser = Parser::NearOptimal {
					optimum_nodes: vec![OptimumNode::default(); max_bufsize + 1],
					match_cache: Vec::with_capacity(
						cache_overflow_mark +
							XPRESS_MAX_MATCH_LEN as usize +
							max_bufsize,
					),
					cache_overflow_mark,
					num_optim_passes: compression_level / 40,
					costs: [0; XPRESS_NUM_SYMBOLS],
					mf: BtMatchFinder::new(max_bufsize, false),
				};
				(
					parser,
					compression_level * 28 / 100,
					compression_level * 56 / 100,
				)
			};

		if max_search_depth < 1 { max_search_depth = 1; }

		Ok(Self {
			freqs: [0; XPRESS_NUM_SYMBOLS],
			codewords: [0; XPRESS_NUM_SYMBOLS],
			lens: [0; XPRESS_NUM_SYMBOLS],
			nice_match_length,
			max_search_depth,
			parser,
		})
	}

	/// # Compress.
	///
	/// Compress `input` into `output`, returning the number of bytes
	/// written, or zero if the input is too small to bother with or the
	/// result wouldn't fit.
	pub(crate) fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		// Don't bother trying to compress very small inputs.
		if input.len() < 25 { return 0; }

		if output.len() <= XPRESS_NUM_SYMBOLS / 2 + 4 { return 0; }

		self.freqs.fill(0);

		let lazy = matches!(self.parser, Parser::Fast { lazy: true, .. });
		if matches!(self.parser, Parser::NearOptimal { .. }) {
			self.compress_near_optimal(input, output)
		}
		else if lazy { self.compress_lazy(input, output) }
		else { self.compress_greedy(input, output) }
	}

	/// # Build the Huffman Code.
	fn make_huffman_code(&mut self) {
		make_canonical_code(
			XPRESS_NUM_SYMBOLS,
			XPRESS_MAX_CODEWORD_LEN,
			&self.freqs,
			&mut self.lens,
			&mut self.codewords,
		);
	}

	/// # Length-3 Offset Cutoff.
	///
	/// Length-3 matches with large offsets usually cost more than they
	/// save; pass them up.
	const fn len_3_too_far(in_nbytes: usize) -> u32 {
		if in_nbytes <= 8192 { 2048 } else { 4096 }
	}

	/// # Greedy Parse.
	///
	/// Always takes the longest match (except distant length-3 ones).
	fn compress_greedy(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		let len_3_too_far = Self::len_3_too_far(input.len());
		let Parser::Fast { ref mut chosen_items, ref mut mf, .. } = self.parser
			else { unreachable!(); };
		chosen_items.clear();
		mf.init();

		let mut pos = 0;
		while pos < input.len() {
			let remaining = (input.len() - pos) as u32;
			let m = mf.longest_match(
				input,
				pos,
				XPRESS_MIN_MATCH_LEN - 1,
				remaining,
				remaining.min(self.nice_match_length),
				self.max_search_depth,
			);

			if m.length >= XPRESS_MIN_MATCH_LEN &&
				!(m.length == XPRESS_MIN_MATCH_LEN && m.offset >= len_3_too_far) {
				chosen_items.push(record_match(&mut self.freqs, m.length, m.offset));
				mf.skip_bytes(input, pos + 1, m.length as usize - 1);
				pos += m.length as usize;
			}
			else {
				chosen_items.push(record_literal(&mut self.freqs, input[pos]));
				pos += 1;
			}
		}

		self.write_fast_output(output)
	}

	/// # Lazy Parse.
	///
	/// Before committing to a match, peek at the next position; a longer
	/// match there demotes this one to a literal.
	fn compress_lazy(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		let len_3_too_far = Self::len_3_too_far(input.len());
		let Parser::Fast { ref mut chosen_items, ref mut mf, .. } = self.parser
			else { unreachable!(); };
		chosen_items.clear();
		mf.init();

		let mut pos = 0;
		while pos < input.len() {
			let remaining = (input.len() - pos) as u32;
			let mut cur = mf.longest_match(
				input,
				pos,
				XPRESS_MIN_MATCH_LEN - 1,
				remaining,
				remaining.min(self.nice_match_length),
				self.max_search_depth,
			);
			pos += 1;

			if cur.length < XPRESS_MIN_MATCH_LEN ||
				(cur.length == XPRESS_MIN_MATCH_LEN && cur.offset >= len_3_too_far) {
				chosen_items.push(record_literal(&mut self.freqs, input[pos - 1]));
				continue;
			}

			loop {
				// A very long match is taken on the spot.
				if cur.length >= self.nice_match_length {
					chosen_items.push(record_match(&mut self.freqs, cur.length, cur.offset));
					mf.skip_bytes(input, pos, cur.length as usize - 1);
					pos += cur.length as usize - 1;
					break;
				}

				// Check the next position, at half depth: the initial
				// match deserves the deeper search, since the follow-up
				// often goes unused.
				let remaining = (input.len() - pos) as u32;
				let next = mf.longest_match(
					input,
					pos,
					cur.length,
					remaining,
					remaining.min(self.nice_match_length),
					self.max_search_depth / 2,
				);
				pos += 1;

				if next.length > cur.length {
					chosen_items.push(record_literal(&mut self.freqs, input[pos - 2]));
					cur = next;
				}
				else {
					chosen_items.push(record_match(&mut self.freqs, cur.length, cur.offset));
					mf.skip_bytes(input, pos, cur.length as usize - 2);
					pos += cur.length as usize - 2;
					break;
				}
			}
		}

		self.write_fast_output(output)
	}

	/// # Near-Optimal Parse.
	///
	/// Find all the matches up front, then iterate minimum-cost path
	/// searches: the first pass prices every symbol equally, and each
	/// further pass re-prices from the Huffman code the previous choice of
	/// items produced.
	fn compress_near_optimal(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		self.find_matches(input);

		let Parser::NearOptimal { ref mut costs, .. } = self.parser
			else { unreachable!(); };

		// Each Huffman symbol starts out equally probable, which makes
		// every cost -log2(1/512) = 9 bits.
		costs.fill(9);

		let mut passes_remaining =
			match self.parser { Parser::NearOptimal { num_optim_passes, .. } => num_optim_passes, _ => 0 };
		loop {
			self.find_min_cost_path(input.len());
			self.tally_item_list(input.len());
			passes_remaining -= 1;
			if passes_remaining == 0 { break; }

			self.freqs[XPRESS_END_OF_DATA] += 1;
			self.make_huffman_code();
			let Parser::NearOptimal { ref mut costs, .. } = self.parser
				else { unreachable!(); };
			for i in 0..XPRESS_NUM_SYMBOLS {
				costs[i] =
					if self.lens[i] == 0 { XPRESS_MAX_CODEWORD_LEN }
					else { u32::from(self.lens[i]) };
			}
			self.freqs.fill(0);
		}

		self.write_optimal_output(input.len(), output)
	}

	/// # Find and Cache Matches.
	///
	/// Run the whole buffer through the binary-tree matchfinder. Each
	/// position appends its matches to the cache followed by a trailer
	/// entry whose `length` is the match count and whose `offset` carries
	/// the literal byte at that position.
	fn find_matches(&mut self, input: &[u8]) {
		let Parser::NearOptimal {
			ref mut match_cache,
			cache_overflow_mark,
			ref mut mf,
			..
		} = self.parser else { unreachable!(); };

		match_cache.clear();
		mf.init();

		let mut pos = 0;
		let mut max_len = input.len() as u32;
		let mut nice_len = self.nice_match_length.min(max_len);

		loop {
			// Stop early if the cache is at risk of overflowing, or the
			// remaining bytes are too few to hash. (The tail loop below
			// covers whatever is left with literal-only trailers.)
			if match_cache.len() >= cache_overflow_mark || max_len < 5 { break; }

			let start = match_cache.len();
			let best_len = mf.get_matches(
				input,
				pos,
				max_len.min(XPRESS_MAX_MATCH_LEN),
				nice_len,
				self.max_search_depth,
				match_cache,
			);
			let num_matches = (match_cache.len() - start) as u32;
			match_cache.push(LzMatch {
				length: num_matches,
				offset: u32::from(input[pos]),
			});
			pos += 1;
			max_len -= 1;
			nice_len = nice_len.min(max_len);

			// After a very long match, skip the covered bytes without
			// caching anything: highly redundant data would otherwise
			// produce an enormous number of matches for no real gain.
			if best_len >= nice_len && best_len > 0 {
				if best_len + 5 >= max_len { break; }
				for _ in 0..best_len - 1 {
					mf.skip_position(
						input,
						pos,
						max_len.min(XPRESS_MAX_MATCH_LEN),
						nice_len,
						self.max_search_depth,
					);
					match_cache.push(LzMatch {
						length: 0,
						offset: u32::from(input[pos]),
					});
					pos += 1;
					max_len -= 1;
					nice_len = nice_len.min(max_len);
				}
			}
		}

		while pos < input.len() {
			match_cache.push(LzMatch {
				length: 0,
				offset: u32::from(input[pos]),
			});
			pos += 1;
		}
	}

	/// # Minimum-Cost Path Search.
	///
	/// Work backward from the end of the buffer, computing for each
	/// position the cheapest way to reach the end, considering a literal
	/// and, per available match length, the smallest offset providing it.
	/// (A larger offset could in principle price lower, but in practice
	/// this heuristic holds up very well.)
	fn find_min_cost_path(&mut self, in_nbytes: usize) {
		let Parser::NearOptimal {
			ref mut optimum_nodes,
			ref match_cache,
			ref costs,
			..
		} = self.parser else { unreachable!(); };

		optimum_nodes[in_nbytes].cost_to_end = 0;
		let mut cache_ptr = match_cache.len();
		for node_idx in (0..in_nbytes).rev() {
			cache_ptr -= 1;
			let trailer = match_cache[cache_ptr];
			let literal = trailer.offset;
			let num_matches = trailer.length as usize;

			let mut best_item = (literal << OPTIMUM_OFFSET_SHIFT) | 1;
			let mut best_cost_to_end = costs[literal as usize] +
				optimum_nodes[node_idx + 1].cost_to_end;

			if num_matches == 0 {
				optimum_nodes[node_idx].cost_to_end = best_cost_to_end;
				optimum_nodes[node_idx].item = best_item;
				continue;
			}

			let matches = &match_cache[cache_ptr - num_matches..cache_ptr];
			let mut len = XPRESS_MIN_MATCH_LEN;
			if matches[num_matches - 1].length < 0xF + XPRESS_MIN_MATCH_LEN {
				// All lengths are small; no extra length bytes to price.
				for m in matches {
					let log2 = log2_offset(m.offset);
					while len <= m.length {
						let len_hdr = len - XPRESS_MIN_MATCH_LEN;
						let sym = match_symbol(log2, len_hdr);
						let cost_to_end = log2 + costs[sym] +
							optimum_nodes[node_idx + len as usize].cost_to_end;
						if cost_to_end < best_cost_to_end {
							best_cost_to_end = cost_to_end;
							best_item = (m.offset << OPTIMUM_OFFSET_SHIFT) | len;
						}
						len += 1;
					}
				}
			}
			else {
				// Some lengths are big.
				for m in matches {
					let log2 = log2_offset(m.offset);
					while len <= m.length {
						let adjusted_len = len - XPRESS_MIN_MATCH_LEN;
						let len_hdr = adjusted_len.min(0xF);
						let sym = match_symbol(log2, len_hdr);
						let mut cost_to_end = log2 + costs[sym] +
							optimum_nodes[node_idx + len as usize].cost_to_end;
						if adjusted_len >= 0xF {
							cost_to_end += 8;
							if adjusted_len - 0xF >= 0xFF {
								cost_to_end += 16;
							}
						}
						if cost_to_end < best_cost_to_end {
							best_cost_to_end = cost_to_end;
							best_item = (m.offset << OPTIMUM_OFFSET_SHIFT) | len;
						}
						len += 1;
					}
				}
			}
			cache_ptr -= num_matches;
			optimum_nodes[node_idx].cost_to_end = best_cost_to_end;
			optimum_nodes[node_idx].item = best_item;
		}
	}

	/// # Tally the Chosen Path.
	///
	/// Walk the minimum-cost path and count the Huffman symbols it needs.
	fn tally_item_list(&mut self, in_nbytes: usize) {
		let Parser::NearOptimal { ref optimum_nodes, .. } = self.parser
			else { unreachable!(); };

		let mut i = 0;
		while i < in_nbytes {
			let length = optimum_nodes[i].item & OPTIMUM_LEN_MASK;
			let offset = optimum_nodes[i].item >> OPTIMUM_OFFSET_SHIFT;

			if length == 1 {
				self.freqs[offset as usize] += 1;
			}
			else {
				let adjusted_len = length - XPRESS_MIN_MATCH_LEN;
				let len_hdr = adjusted_len.min(0xF);
				let sym = match_symbol(log2_offset(offset), len_hdr);
				self.freqs[sym] += 1;
			}
			i += length as usize;
		}
	}

	/// # Codeword-Lengths Header.
	///
	/// The 512 codeword lengths, packed two per byte.
	fn write_lens_header(&self, output: &mut [u8]) {
		for i in 0..XPRESS_NUM_SYMBOLS / 2 {
			output[i] = (self.lens[2 * i + 1] << 4) | self.lens[2 * i];
		}
	}

	/// # Write Output (Greedy/Lazy).
	fn write_fast_output(&mut self, output: &mut [u8]) -> usize {
		// Account for the end-of-data symbol and build the code.
		self.freqs[XPRESS_END_OF_DATA] += 1;
		self.make_huffman_code();
		self.write_lens_header(output);

		let Parser::Fast { ref chosen_items, .. } = self.parser
			else { unreachable!(); };

		let mut os = OutputBitstream::new(&mut output[XPRESS_NUM_SYMBOLS / 2..]);
		for item in chosen_items {
			let data = item.0;
			let symbol = (data & 0x1FF) as usize;
			os.write_bits(self.codewords[symbol], u32::from(self.lens[symbol]));
			if symbol >= XPRESS_NUM_CHARS {
				os.write_extra_length_bytes(((data >> 9) & 0xFFFF) as u32);
				os.write_bits((data >> 29) as u32, ((data >> 25) & 0xF) as u32);
			}
		}

		// The end-of-data symbol, needed for interoperability.
		os.write_bits(
			self.codewords[XPRESS_END_OF_DATA],
			u32::from(self.lens[XPRESS_END_OF_DATA]),
		);

		let out_size = os.flush();
		if out_size == 0 { 0 }
		else { out_size + XPRESS_NUM_SYMBOLS / 2 }
	}

	/// # Write Output (Near-Optimal).
	fn write_optimal_output(&mut self, in_nbytes: usize, output: &mut [u8]) -> usize {
		self.freqs[XPRESS_END_OF_DATA] += 1;
		self.make_huffman_code();
		self.write_lens_header(output);

		let Parser::NearOptimal { ref optimum_nodes, .. } = self.parser
			else { unreachable!(); };

		let mut os = OutputBitstream::new(&mut output[XPRESS_NUM_SYMBOLS / 2..]);
		let mut i = 0;
		while i < in_nbytes {
			let length = optimum_nodes[i].item & OPTIMUM_LEN_MASK;
			let offset = optimum_nodes[i].item >> OPTIMUM_OFFSET_SHIFT;

			if length == 1 {
				let literal = offset as usize;
				os.write_bits(self.codewords[literal], u32::from(self.lens[literal]));
			}
			else {
				let adjusted_len = length - XPRESS_MIN_MATCH_LEN;
				let log2 = log2_offset(offset);
				let len_hdr = adjusted_len.min(0xF);
				let sym = match_symbol(log2, len_hdr);

				os.write_bits(self.codewords[sym], u32::from(self.lens[sym]));
				os.write_extra_length_bytes(adjusted_len);
				os.write_bits(offset - (1 << log2), log2);
			}
			i += length as usize;
		}

		os.write_bits(
			self.codewords[XPRESS_END_OF_DATA],
			u32::from(self.lens[XPRESS_END_OF_DATA]),
		);

		let out_size = os.flush();
		if out_size == 0 { 0 }
		else { out_size + XPRESS_NUM_SYMBOLS / 2 }
	}
}



#[cfg(test)]
mod test {
	use super::*;
	use crate::xpress::XpressDecompressor;

	/// # Round Trip at a Given Level.
	fn roundtrip(data: &[u8], level: u32) {
		let mut c = XpressCompressor::new(data.len(), level).unwrap();
		let mut compressed = vec![0_u8; data.len() + 512];
		let n = c.compress(data, &mut compressed);
		assert!(n != 0, "expected compressible input");

		let mut d = XpressDecompressor::new(data.len()).unwrap();
		let mut out = vec![0_u8; data.len()];
		d.decompress(&compressed[..n], &mut out).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn t_roundtrip_levels() {
		let mut data = Vec::new();
		while data.len() < 4000 {
			data.extend_from_slice(b"the quick brown fox jumps over the lazy dog. ");
		}
		for level in [1, 20, 35, 50, 60, 80, 100] {
			roundtrip(&data, level);
		}
	}

	#[test]
	fn t_roundtrip_zeroes() {
		roundtrip(&vec![0_u8; 10_000], 50);
		roundtrip(&vec![0_u8; 10_000], 80);
	}

	#[test]
	fn t_tiny_input_refused() {
		let mut c = XpressCompressor::new(1024, 50).unwrap();
		let mut out = [0_u8; 1024];
		assert_eq!(c.compress(b"too small", &mut out), 0);
	}

	#[test]
	fn t_incompressible_returns_zero() {
		// A pseudo-random buffer with a tight output budget can't win.
		let mut data = vec![0_u8; 2048];
		let mut state = 0x2545_F491_4F6C_DD1D_u64;
		for b in &mut data {
			state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
			*b = (state >> 56) as u8;
		}
		let mut c = XpressCompressor::new(data.len(), 50).unwrap();
		let mut out = vec![0_u8; 1024];
		assert_eq!(c.compress(&data, &mut out), 0);
	}
}
