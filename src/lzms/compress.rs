/*!
# Wimpress: LZMS Compression.

The compressor runs a near-optimal parse: an approximate minimum-cost path
search over positions, where the edges are the literals and matches
available at each position and the edge weights are estimated bit costs
drawn from the live range-coder probabilities and the current adaptive
Huffman codes. The path is committed in pieces, each piece ending where
there is no choice left to make (or when the node buffer fills), and
encoding a piece advances the adaptive state that the next piece's costs
are based on.

Explicit LZ matches come from a binary-tree matchfinder; delta matches
from a small hash table keyed on byte differences at power-of-two spans.

Output is written from both ends of the buffer at once: range-coded bits
forwards from the start, Huffman codewords and verbatim bits backwards
from the end, with the two halves butted together at the finish.
*/

use crate::bits::{
	lz_extend,
	lz_hash,
};
use crate::error::WimError;
use crate::huffman::make_canonical_code;
use crate::matchfinder::{
	BtMatchFinder,
	LzMatch,
	MfPos,
};
use std::mem;
use super::{
	lzms_dilute_symbol_frequencies,
	lzms_get_length_slot,
	lzms_get_num_offset_slots,
	lzms_update_state,
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
	LZMS_MAX_MATCH_OFFSET,
	LZMS_MAX_NUM_OFFSET_SYMS,
	LZMS_MIN_MATCH_LENGTH,
	LZMS_NUM_DELTA_POWER_SYMS,
	LZMS_NUM_DELTA_PROBS,
	LZMS_NUM_DELTA_REPS,
	LZMS_NUM_DELTA_REP_DECISIONS,
	LZMS_NUM_DELTA_REP_PROBS,
	LZMS_NUM_LENGTH_SYMS,
	LZMS_NUM_LITERAL_SYMS,
	LZMS_NUM_LZ_PROBS,
	LZMS_NUM_LZ_REPS,
	LZMS_NUM_LZ_REP_DECISIONS,
	LZMS_NUM_LZ_REP_PROBS,
	LZMS_NUM_MAIN_PROBS,
	LZMS_NUM_MATCH_PROBS,
	LZMS_OFFSET_SLOT_BASE,
	LZMS_PROBABILITY_BITS,
	LZMS_PROBABILITY_DENOMINATOR,
};



/// # Longest Length With a Cached Cost.
///
/// Also the longest length the parser will relax a node over; anything
/// longer is taken immediately.
const MAX_FAST_LENGTH: usize = 255;

/// # Cost-Path Step Limit.
///
/// Bounds how far the parser can look ahead before it must commit items,
/// which also bounds how stale its cost model can get.
const NUM_OPTIM_NODES: usize = 2048;

/// # Cost-Path Node Count.
///
/// Room past the step limit for one maximal multi-item arrival: a match,
/// a literal, and a rep0 match.
const OPTIMUM_NODES_LEN: usize = NUM_OPTIM_NODES + MAX_FAST_LENGTH + 1 + MAX_FAST_LENGTH;

/// # Cost Scale Shift.
///
/// Costs are bits scaled by `1 << COST_SHIFT`.
const COST_SHIFT: u32 = 6;

/// # Unreachable-Node Cost.
const INFINITE_COST: u32 = u32::MAX;

/// # Delta Hash Table Order.
const DELTA_HASH_ORDER: u32 = 17;

/// # Bytes Hashed For Delta Matches.
const NBYTES_HASHED_FOR_DELTA: usize = 3;

/// # Delta Spans Considered.
///
/// Spans are powers of two; only `1..=32` are searched for.
const NUM_POWERS_TO_CONSIDER: u32 = 6;

/// # Delta Source Flag.
///
/// Set in an item's source to mark it as a delta match.
const DELTA_SOURCE_TAG: u32 = 1 << 31;

/// # Delta Power Field Shift.
const DELTA_SOURCE_POWER_SHIFT: u32 = 28;

/// # Delta Raw-Offset Field Mask.
const DELTA_SOURCE_RAW_OFFSET_MASK: u32 = (1 << DELTA_SOURCE_POWER_SHIFT) - 1;

/// # First Offset Covered by the Second Slot Table.
const OFFSET_TAB_2_START: u32 = 0xE4A5;

/// # Span of the Second Slot Table.
const OFFSET_TAB_2_SPAN: u32 = 0x3D_0000;

/// # Scaled Bit Costs by Zero-Probability.
///
/// Indexed by the numerator of the probability (out of 64) that the next
/// bit is zero, giving `-log2(p)` scaled by `1 << COST_SHIFT` and rounded.
/// The impossible 0 and 64 entries duplicate their neighbors so the raw
/// zero-bit counts can index the table directly.
const LZMS_BIT_COSTS: [u32; LZMS_PROBABILITY_DENOMINATOR as usize + 1] = [
	384, 384, 320, 283, 256, 235, 219, 204,
	192, 181, 171, 163, 155, 147, 140, 134,
	128, 122, 117, 112, 107, 103,  99,  94,
	 91,  87,  83,  80,  76,  73,  70,  67,
	 64,  61,  58,  56,  53,  51,  48,  46,
	 43,  41,  39,  37,  35,  33,  30,  29,
	 27,  25,  23,  21,  19,  17,  16,  14,
	 12,  11,   9,   8,   6,   4,   3,   1,
	  1,
];



/// # Cost of a Zero Bit.
fn bit_0_cost(state: usize, probs: &[ProbabilityEntry]) -> u32 {
	LZMS_BIT_COSTS[probs[state].num_recent_zero_bits as usize]
}


/// # Cost of a One Bit.
fn bit_1_cost(state: usize, probs: &[ProbabilityEntry]) -> u32 {
	LZMS_BIT_COSTS[(LZMS_PROBABILITY_DENOMINATOR - probs[state].num_recent_zero_bits) as usize]
}


/// # Hash Three Delta Bytes.
///
/// Hash the byte differences at the given span for the three bytes
/// starting at `p`. The span and the position's low bits are folded in so
/// all spans can share one table without matching each other.
fn lzms_delta_hash(input: &[u8], p: usize, pos: u32, span: u32) -> usize {
	let s = span as usize;
	let d0 = input[p].wrapping_sub(input[p - s]);
	let d1 = input[p + 1].wrapping_sub(input[p + 1 - s]);
	let d2 = input[p + 2].wrapping_sub(input[p + 2 - s]);
	let v = ((span + (pos & (span - 1))) << 24) |
		(u32::from(d2) << 16) | (u32::from(d1) << 8) | u32::from(d0);
	lz_hash(v, DELTA_HASH_ORDER)
}


/// # Extend a Delta Match.
///
/// Extend a known `len`-byte delta match between `strpos` and `matchpos`
/// as far as the byte differences at `span` keep agreeing, up to
/// `max_len`.
fn lzms_extend_delta_match(
	input: &[u8],
	matchpos: usize,
	strpos: usize,
	len: u32,
	max_len: u32,
	span: u32,
) -> u32 {
	let s = span as usize;
	let mut len = len as usize;
	while (len as u32) < max_len &&
		input[strpos + len].wrapping_sub(input[strpos + len - s]) ==
		input[matchpos + len].wrapping_sub(input[matchpos + len - s])
	{
		len += 1;
	}
	len as u32
}



#[derive(Debug, Clone, Copy, Default)]
/// # One Chosen Item.
///
/// A literal (length one, source is the byte) or a match. LZ match sources
/// are the repeat index, or the offset plus two for explicit offsets.
/// Delta sources carry [`DELTA_SOURCE_TAG`] plus the repeat index or the
/// power/raw-offset pair plus two.
struct LzmsItem {
	/// # Item Length.
	length: u32,

	/// # Item Source.
	source: u32,
}


#[derive(Debug, Clone, Copy)]
/// # Adaptive State Snapshot.
///
/// Everything about the coder state that the parser must track per node:
/// the delayed LRU queues for LZ and delta match sources, and the decision
/// state machines. Queue updates lag one item behind so a source is not
/// promoted before the item using it has been coded.
struct AdaptiveState {
	/// # Recent LZ Offsets.
	recent_lz_offsets: [u32; LZMS_NUM_LZ_REPS + 1],

	/// # LZ Offset Awaiting Promotion.
	prev_lz_offset: u32,

	/// # LZ Offset From the Current Item.
	upcoming_lz_offset: u32,

	/// # Recent Delta Pairs.
	recent_delta_pairs: [u32; LZMS_NUM_DELTA_REPS + 1],

	/// # Delta Pair Awaiting Promotion.
	prev_delta_pair: u32,

	/// # Delta Pair From the Current Item.
	upcoming_delta_pair: u32,

	/// # Literal vs. Match State.
	main_state: usize,

	/// # LZ vs. Delta State.
	match_state: usize,

	/// # Explicit vs. Repeat LZ State.
	lz_state: usize,

	/// # LZ Repeat Index States.
	lz_rep_states: [usize; LZMS_NUM_LZ_REP_DECISIONS],

	/// # Explicit vs. Repeat Delta State.
	delta_state: usize,

	/// # Delta Repeat Index States.
	delta_rep_states: [usize; LZMS_NUM_DELTA_REP_DECISIONS],
}

impl Default for AdaptiveState {
	fn default() -> Self {
		Self {
			recent_lz_offsets: [1, 2, 3, 4],
			prev_lz_offset: 0,
			upcoming_lz_offset: 0,
			recent_delta_pairs: [1, 2, 3, 4],
			prev_delta_pair: 0,
			upcoming_delta_pair: 0,
			main_state: 0,
			match_state: 0,
			lz_state: 0,
			lz_rep_states: [0; LZMS_NUM_LZ_REP_DECISIONS],
			delta_state: 0,
			delta_rep_states: [0; LZMS_NUM_DELTA_REP_DECISIONS],
		}
	}
}

impl AdaptiveState {
	/// # Promote Pending Sources.
	///
	/// Rotate the item-before-last's source to the front of its queue and
	/// stage the last item's source for the next rotation.
	fn update_lru_queues(&mut self) {
		if self.prev_lz_offset != 0 {
			for i in (0..LZMS_NUM_LZ_REPS).rev() {
				self.recent_lz_offsets[i + 1] = self.recent_lz_offsets[i];
			}
			self.recent_lz_offsets[0] = self.prev_lz_offset;
		}
		self.prev_lz_offset = self.upcoming_lz_offset;

		if self.prev_delta_pair != 0 {
			for i in (0..LZMS_NUM_DELTA_REPS).rev() {
				self.recent_delta_pairs[i + 1] = self.recent_delta_pairs[i];
			}
			self.recent_delta_pairs[0] = self.prev_delta_pair;
		}
		self.prev_delta_pair = self.upcoming_delta_pair;
	}

	/// # Record a Literal/Match Decision.
	fn update_main_state(&mut self, is_match: u32) {
		self.main_state = lzms_update_state(self.main_state, is_match, LZMS_NUM_MAIN_PROBS);
	}

	/// # Record an LZ/Delta Decision.
	fn update_match_state(&mut self, is_delta: u32) {
		self.match_state = lzms_update_state(self.match_state, is_delta, LZMS_NUM_MATCH_PROBS);
	}

	/// # Record an Explicit/Repeat LZ Decision.
	fn update_lz_state(&mut self, is_rep: u32) {
		self.lz_state = lzms_update_state(self.lz_state, is_rep, LZMS_NUM_LZ_PROBS);
	}

	/// # Record an LZ Repeat Index.
	fn update_lz_rep_states(&mut self, rep_idx: usize) {
		for i in 0..rep_idx {
			self.lz_rep_states[i] =
				lzms_update_state(self.lz_rep_states[i], 1, LZMS_NUM_LZ_REP_PROBS);
		}
		if rep_idx < LZMS_NUM_LZ_REP_DECISIONS {
			self.lz_rep_states[rep_idx] =
				lzms_update_state(self.lz_rep_states[rep_idx], 0, LZMS_NUM_LZ_REP_PROBS);
		}
	}

	/// # Record an Explicit/Repeat Delta Decision.
	fn update_delta_state(&mut self, is_rep: u32) {
		self.delta_state = lzms_update_state(self.delta_state, is_rep, LZMS_NUM_DELTA_PROBS);
	}

	/// # Record a Delta Repeat Index.
	fn update_delta_rep_states(&mut self, rep_idx: usize) {
		for i in 0..rep_idx {
			self.delta_rep_states[i] =
				lzms_update_state(self.delta_rep_states[i], 1, LZMS_NUM_DELTA_REP_PROBS);
		}
		if rep_idx < LZMS_NUM_DELTA_REP_DECISIONS {
			self.delta_rep_states[rep_idx] =
				lzms_update_state(self.delta_rep_states[rep_idx], 0, LZMS_NUM_DELTA_REP_PROBS);
		}
	}
}


#[derive(Debug, Clone, Copy, Default)]
/// # One Cost-Path Node.
///
/// The cheapest known way to reach this position: its cost, the item (or
/// lookahead item chain) taken to arrive, and the adaptive state along
/// that path once finalized.
struct OptimumNode {
	/// # Cheapest Arrival Cost.
	cost: u32,

	/// # Final Item on the Arrival Path.
	item: LzmsItem,

	/// # Extra Arrival Items.
	///
	/// Lookahead heuristics can arrive via up to three items at once; the
	/// extras are stored last-to-first.
	num_extra_items: u32,

	/// # The Extra Items.
	extra_items: [LzmsItem; 2],

	/// # Adaptive State on Arrival.
	state: AdaptiveState,
}



/// # Two-Ended Output Writer.
///
/// Owns the output buffer for the duration of a compression run. The
/// range coder writes 16-bit units forwards from the start; the Huffman
/// bitstream writes 16-bit units backwards from the (even) end. Overruns
/// are detected at the end rather than as they happen: a stream that hits
/// its limit simply stops writing, and [`LzmsOutput::finalize`] reports
/// failure.
struct LzmsOutput<'a> {
	/// # Output Buffer.
	out: &'a mut [u8],

	/// # Usable (Even) Length.
	end: usize,

	/// # Range Coder Lower Bound.
	lower_bound: u64,

	/// # Range Coder Range Size.
	range_size: u32,

	/// # Pending Unit Awaiting Carry.
	cache: u16,

	/// # Pending Unit Count.
	cache_size: u32,

	/// # Next Forward Write Position.
	///
	/// Starts one unit before the buffer; the first unit shifted out is
	/// never stored, and the decoder knows not to expect it.
	rc_next: isize,

	/// # Backward Bit Buffer.
	bitbuf: u64,

	/// # Backward Bits Buffered.
	bitcount: u32,

	/// # Next Backward Write Position.
	os_next: usize,
}

impl<'a> LzmsOutput<'a> {
	/// # New Writer.
	fn new(out: &'a mut [u8]) -> Self {
		let end = out.len() & !1;
		Self {
			out,
			end,
			lower_bound: 0,
			range_size: 0xFFFF_FFFF,
			cache: 0,
			cache_size: 1,
			rc_next: -2,
			bitbuf: 0,
			bitcount: 0,
			os_next: end,
		}
	}

	/// # Shift Out a Range Coder Unit.
	///
	/// Writing is delayed through `cache` until any carry out of the low
	/// 32 bits has resolved; a run of maximal units extends the delay.
	fn shift_low(&mut self) {
		if (self.lower_bound as u32) < 0xFFFF_0000 || (self.lower_bound >> 32) != 0 {
			loop {
				if 0 <= self.rc_next {
					if (self.rc_next as usize) != self.end {
						let unit = self.cache.wrapping_add((self.lower_bound >> 32) as u16);
						let at = self.rc_next as usize;
						self.out[at..at + 2].copy_from_slice(&unit.to_le_bytes());
						self.rc_next += 2;
					}
				}
				else { self.rc_next += 2; }
				self.cache = 0xFFFF;
				self.cache_size -= 1;
				if self.cache_size == 0 { break; }
			}
			self.cache = (self.lower_bound >> 16) as u16;
		}
		self.cache_size += 1;
		self.lower_bound = (self.lower_bound & 0xFFFF) << 16;
	}

	/// # Range-Encode One Bit.
	///
	/// Advances the decision state machine and its probability entry,
	/// then narrows the range to the bit's subinterval.
	fn encode_bit(
		&mut self,
		bit: u32,
		state: &mut usize,
		num_states: usize,
		probs: &mut [ProbabilityEntry],
	) {
		let entry = &mut probs[*state];
		*state = lzms_update_state(*state, bit, num_states);
		let prob = entry.probability();
		entry.update(bit);

		if self.range_size <= 0xFFFF {
			self.range_size <<= 16;
			self.shift_low();
		}
		let bound = (self.range_size >> LZMS_PROBABILITY_BITS) * prob;
		if bit == 0 { self.range_size = bound; }
		else {
			self.lower_bound += u64::from(bound);
			self.range_size -= bound;
		}
	}

	/// # Write Bits Backwards.
	fn write_bits(&mut self, bits: u32, num_bits: u32) {
		self.bitcount += num_bits;
		self.bitbuf = (self.bitbuf << num_bits) | u64::from(bits);

		while 16 <= self.bitcount {
			self.bitcount -= 16;
			if self.os_next != 0 {
				self.os_next -= 2;
				let unit = (self.bitbuf >> self.bitcount) as u16;
				self.out[self.os_next..self.os_next + 2]
					.copy_from_slice(&unit.to_le_bytes());
			}
		}
	}

	/// # Flush and Join the Streams.
	///
	/// Flush both directions, verify neither overran and that they never
	/// crossed, then slide the backward data up against the forward data.
	/// Returns the total compressed size, or zero on overflow.
	fn finalize(mut self) -> usize {
		// The backward stream: an exhausted buffer means overflow even if
		// no bits are left over.
		if self.os_next == 0 { return 0; }
		if self.bitcount != 0 {
			self.os_next -= 2;
			let unit = (self.bitbuf << (16 - self.bitcount)) as u16;
			self.out[self.os_next..self.os_next + 2]
				.copy_from_slice(&unit.to_le_bytes());
		}

		// The forward stream drains its carry chain over four shifts.
		for _ in 0..4 { self.shift_low(); }
		debug_assert!(0 <= self.rc_next);
		let rc_next = self.rc_next.max(0) as usize;
		if rc_next == self.end { return 0; }

		if self.os_next < rc_next { return 0; }

		self.out.copy_within(self.os_next..self.end, rc_next);
		rc_next + (self.end - self.os_next)
	}
}



/// # One Adaptive Huffman Code, Encoder Side.
///
/// Canonical codewords rebuilt from running symbol frequencies every
/// `rebuild_freq` symbols, with the frequencies diluted at each rebuild so
/// old statistics decay.
struct HuffmanEncoder {
	/// # Canonical Codewords.
	codewords: Box<[u32]>,

	/// # Codeword Lengths.
	lens: Box<[u8]>,

	/// # Symbol Frequencies.
	freqs: Box<[u32]>,

	/// # Active Alphabet Size.
	num_syms: usize,

	/// # Symbols Between Rebuilds.
	rebuild_freq: u32,

	/// # Rebuild Countdown.
	num_syms_until_rebuild: u32,
}

impl HuffmanEncoder {
	/// # New Encoder.
	fn new(max_syms: usize, rebuild_freq: u32) -> Self {
		Self {
			codewords: vec![0; max_syms].into_boxed_slice(),
			lens: vec![0; max_syms].into_boxed_slice(),
			freqs: vec![0; max_syms].into_boxed_slice(),
			num_syms: 0,
			rebuild_freq,
			num_syms_until_rebuild: 0,
		}
	}

	/// # Reset for a New Buffer.
	///
	/// Start from uniform frequencies over the active alphabet.
	fn init(&mut self, num_syms: usize) {
		self.num_syms = num_syms;
		self.freqs[..num_syms].fill(1);
		self.build();
	}

	/// # Rebuild the Code From the Frequencies.
	fn build(&mut self) {
		make_canonical_code(
			self.num_syms,
			LZMS_MAX_CODEWORD_LENGTH,
			&self.freqs[..self.num_syms],
			&mut self.lens,
			&mut self.codewords,
		);
		self.num_syms_until_rebuild = self.rebuild_freq;
	}

	/// # Encode a Symbol.
	///
	/// The symbol is written with the current code before it bumps the
	/// frequencies; the decoder counts the same way. Returns `true` if
	/// this symbol triggered a rebuild.
	fn encode_symbol(&mut self, sym: usize, out: &mut LzmsOutput) -> bool {
		out.write_bits(self.codewords[sym], u32::from(self.lens[sym]));
		self.freqs[sym] += 1;
		self.num_syms_until_rebuild -= 1;
		if self.num_syms_until_rebuild == 0 {
			self.build();
			lzms_dilute_symbol_frequencies(&mut self.freqs[..self.num_syms]);
			true
		}
		else { false }
	}
}



/// # Position-Typed Compressor State.
struct LzmsState<P: MfPos> {
	/// # Working Copy of the Input.
	///
	/// The x86 filter rewrites call targets in place, so the caller's
	/// data cannot be used directly.
	in_buffer: Vec<u8>,

	/// # LZ Matchfinder.
	mf: BtMatchFinder<P>,

	/// # Match Scratch Buffer.
	matches: Vec<LzMatch>,

	/// # Good-Enough Match Length.
	nice_match_len: u32,

	/// # Matchfinder Search Depth.
	max_search_depth: u32,

	/// # Search for Delta Matches?
	use_delta_matches: bool,

	/// # Try Match + Literal + Rep0 Lookahead?
	try_lzmatch_lit_lzrep0: bool,

	/// # Try Literal + Rep0 Lookahead?
	try_lit_lzrep0: bool,

	/// # Try Rep + Literal + Rep0 Lookahead?
	try_lzrep_lit_lzrep0: bool,

	/// # Delta Match Hash Table.
	///
	/// Entries pack the power into the top four bits and the position
	/// into the rest; unused when delta matching is off.
	delta_hash_table: Box<[u32]>,

	/// # Next Hash per Power.
	///
	/// Each position's hash is computed one position early, giving the
	/// table lookup a head start.
	next_delta_hashes: [u32; NUM_POWERS_TO_CONSIDER as usize],

	/// # Cost-Path Nodes.
	optimum_nodes: Box<[OptimumNode]>,

	/// # Literal/Match Coder State.
	main_state: usize,

	/// # LZ/Delta Coder State.
	match_state: usize,

	/// # Explicit/Repeat LZ Coder State.
	lz_state: usize,

	/// # LZ Repeat Index Coder States.
	lz_rep_states: [usize; LZMS_NUM_LZ_REP_DECISIONS],

	/// # Explicit/Repeat Delta Coder State.
	delta_state: usize,

	/// # Delta Repeat Index Coder States.
	delta_rep_states: [usize; LZMS_NUM_DELTA_REP_DECISIONS],

	/// # Range Coder Probabilities.
	probs: LzmsProbabilities,

	/// # Literal Code.
	literal_code: HuffmanEncoder,

	/// # LZ Offset Slot Code.
	lz_offset_code: HuffmanEncoder,

	/// # Length Slot Code.
	length_code: HuffmanEncoder,

	/// # Delta Raw-Offset Slot Code.
	delta_offset_code: HuffmanEncoder,

	/// # Delta Power Code.
	delta_power_code: HuffmanEncoder,

	/// # Length Costs, Lengths 1 to 255.
	fast_length_cost_tab: [u32; MAX_FAST_LENGTH + 1],

	/// # Length Slots, Lengths 1 to 255.
	fast_length_slot_tab: [u8; MAX_FAST_LENGTH + 1],

	/// # Offset Slots, Offsets Below `0xE4A5`.
	offset_slot_tab_1: Box<[u8]>,

	/// # Offset Slots, 2 KiB Granules.
	offset_slot_tab_2: Box<[u16]>,

	/// # Offset Slots, 64 KiB Granules.
	offset_slot_tab_3: Box<[u16]>,

	/// # x86 Filter Scratch.
	last_target_usages: Box<[i32]>,
}

impl<P: MfPos> LzmsState<P> {
	/// # New State.
	fn new(max_bufsize: usize, compression_level: u32) -> Self {
		// Scale the good-enough length with the level, capped so length
		// costs always come from the fast table.
		let nice_match_len =
			((u64::from(compression_level) * 63) / 50).min(MAX_FAST_LENGTH as u64) as u32;
		let max_search_depth = ((compression_level * 24) / 50).max(1);
		let use_delta_matches = 35 <= compression_level;

		let mut state = Self {
			in_buffer: Vec::with_capacity(max_bufsize),
			mf: BtMatchFinder::new(max_bufsize, true),
			matches: Vec::with_capacity(64),
			nice_match_len,
			max_search_depth,
			use_delta_matches,
			try_lzmatch_lit_lzrep0: 45 <= compression_level,
			try_lit_lzrep0: 60 <= compression_level,
			try_lzrep_lit_lzrep0: 60 <= compression_level,
			delta_hash_table:
				if use_delta_matches {
					vec![u32::MAX; 1_usize << DELTA_HASH_ORDER].into_boxed_slice()
				}
				else { Vec::new().into_boxed_slice() },
			next_delta_hashes: [0; NUM_POWERS_TO_CONSIDER as usize],
			optimum_nodes: vec![OptimumNode::default(); OPTIMUM_NODES_LEN].into_boxed_slice(),
			main_state: 0,
			match_state: 0,
			lz_state: 0,
			lz_rep_states: [0; LZMS_NUM_LZ_REP_DECISIONS],
			delta_state: 0,
			delta_rep_states: [0; LZMS_NUM_DELTA_REP_DECISIONS],
			probs: LzmsProbabilities::default(),
			literal_code: HuffmanEncoder::new(
				LZMS_NUM_LITERAL_SYMS, LZMS_LITERAL_CODE_REBUILD_FREQ,
			),
			lz_offset_code: HuffmanEncoder::new(
				LZMS_MAX_NUM_OFFSET_SYMS, LZMS_LZ_OFFSET_CODE_REBUILD_FREQ,
			),
			length_code: HuffmanEncoder::new(
				LZMS_NUM_LENGTH_SYMS, LZMS_LENGTH_CODE_REBUILD_FREQ,
			),
			delta_offset_code: HuffmanEncoder::new(
				LZMS_MAX_NUM_OFFSET_SYMS, LZMS_DELTA_OFFSET_CODE_REBUILD_FREQ,
			),
			delta_power_code: HuffmanEncoder::new(
				LZMS_NUM_DELTA_POWER_SYMS, LZMS_DELTA_POWER_CODE_REBUILD_FREQ,
			),
			fast_length_cost_tab: [0; MAX_FAST_LENGTH + 1],
			fast_length_slot_tab: [0; MAX_FAST_LENGTH + 1],
			offset_slot_tab_1: vec![0; OFFSET_TAB_2_START as usize].into_boxed_slice(),
			offset_slot_tab_2: vec![0; (OFFSET_TAB_2_SPAN >> 11) as usize].into_boxed_slice(),
			offset_slot_tab_3: vec![
				0;
				((LZMS_MAX_MATCH_OFFSET as usize + 1) - OFFSET_TAB_2_START as usize) >> 16
			].into_boxed_slice(),
			last_target_usages: vec![0; 65_536].into_boxed_slice(),
		};
		state.init_fast_length_slot_tab();
		state.init_offset_slot_tabs();
		state
	}

	/// # Fill the Length Slot Table.
	fn init_fast_length_slot_tab(&mut self) {
		let mut slot = 0;
		for len in LZMS_MIN_MATCH_LENGTH..=MAX_FAST_LENGTH as u32 {
			if LZMS_LENGTH_SLOT_BASE[slot + 1] <= len { slot += 1; }
			self.fast_length_slot_tab[len as usize] = slot as u8;
		}
	}

	/// # Fill the Offset Slot Tables.
	///
	/// The granular tables work because every slot boundary past `0xE4A5`
	/// falls on a granule boundary (eleven or more extra bits per slot).
	fn init_offset_slot_tabs(&mut self) {
		let mut slot = 0;
		let mut offset: u32 = 1;
		while offset < OFFSET_TAB_2_START {
			if LZMS_OFFSET_SLOT_BASE[slot + 1] <= offset { slot += 1; }
			self.offset_slot_tab_1[offset as usize] = slot as u8;
			offset += 1;
		}
		while offset < OFFSET_TAB_2_START + OFFSET_TAB_2_SPAN {
			if LZMS_OFFSET_SLOT_BASE[slot + 1] <= offset { slot += 1; }
			self.offset_slot_tab_2[((offset - OFFSET_TAB_2_START) >> 11) as usize] =
				slot as u16;
			offset += 1 << 11;
		}
		while offset < LZMS_MAX_MATCH_OFFSET + 1 {
			if LZMS_OFFSET_SLOT_BASE[slot + 1] <= offset { slot += 1; }
			self.offset_slot_tab_3[((offset - OFFSET_TAB_2_START) >> 16) as usize] =
				slot as u16;
			offset += 1 << 16;
		}
	}

	/// # Length Slot.
	fn comp_get_length_slot(&self, length: u32) -> usize {
		if length <= MAX_FAST_LENGTH as u32 {
			usize::from(self.fast_length_slot_tab[length as usize])
		}
		else { lzms_get_length_slot(length) }
	}

	/// # Offset Slot.
	fn comp_get_offset_slot(&self, offset: u32) -> usize {
		if offset < OFFSET_TAB_2_START {
			return usize::from(self.offset_slot_tab_1[offset as usize]);
		}
		let offset = offset - OFFSET_TAB_2_START;
		if offset < OFFSET_TAB_2_SPAN {
			usize::from(self.offset_slot_tab_2[(offset >> 11) as usize])
		}
		else {
			usize::from(self.offset_slot_tab_3[(offset >> 16) as usize])
		}
	}

	/// # Refresh the Length Cost Table.
	fn update_fast_length_costs(&mut self) {
		let mut slot = 0;
		let mut cost = 0;
		for len in LZMS_MIN_MATCH_LENGTH..=MAX_FAST_LENGTH as u32 {
			if LZMS_LENGTH_SLOT_BASE[slot] <= len {
				cost = (u32::from(self.length_code.lens[slot]) +
					u32::from(LZMS_EXTRA_LENGTH_BITS[slot])) << COST_SHIFT;
				slot += 1;
			}
			self.fast_length_cost_tab[len as usize] = cost;
		}
	}

	/// # Length Cost.
	///
	/// Only valid for lengths up to [`MAX_FAST_LENGTH`].
	fn fast_length_cost(&self, length: u32) -> u32 {
		self.fast_length_cost_tab[length as usize]
	}

	/// # LZ Offset Cost.
	fn lz_offset_cost(&self, offset: u32) -> u32 {
		let slot = self.comp_get_offset_slot(offset);
		(u32::from(self.lz_offset_code.lens[slot]) +
			u32::from(LZMS_EXTRA_OFFSET_BITS[slot])) << COST_SHIFT
	}

	/// # Delta Power and Raw-Offset Cost.
	fn delta_source_cost(&self, power: u32, raw_offset: u32) -> u32 {
		let slot = self.comp_get_offset_slot(raw_offset);
		(u32::from(self.delta_power_code.lens[power as usize]) +
			u32::from(self.delta_offset_code.lens[slot]) +
			u32::from(LZMS_EXTRA_OFFSET_BITS[slot])) << COST_SHIFT
	}

	/// # Literal Cost, Main Bit Included.
	fn literal_cost(&self, main_state: usize, literal: u8) -> u32 {
		bit_0_cost(main_state, &self.probs.main) +
			(u32::from(self.literal_code.lens[usize::from(literal)]) << COST_SHIFT)
	}

	/// # Encode the Literal/Match Bit.
	fn encode_main_bit(&mut self, out: &mut LzmsOutput, bit: u32) {
		out.encode_bit(bit, &mut self.main_state, LZMS_NUM_MAIN_PROBS, &mut self.probs.main);
	}

	/// # Encode the LZ/Delta Bit.
	fn encode_match_bit(&mut self, out: &mut LzmsOutput, bit: u32) {
		out.encode_bit(
			bit, &mut self.match_state, LZMS_NUM_MATCH_PROBS, &mut self.probs.lz_or_delta,
		);
	}

	/// # Encode the Explicit/Repeat LZ Bit.
	fn encode_lz_bit(&mut self, out: &mut LzmsOutput, bit: u32) {
		out.encode_bit(bit, &mut self.lz_state, LZMS_NUM_LZ_PROBS, &mut self.probs.lz);
	}

	/// # Encode an LZ Repeat Index Bit.
	fn encode_lz_rep_bit(&mut self, out: &mut LzmsOutput, bit: u32, idx: usize) {
		out.encode_bit(
			bit, &mut self.lz_rep_states[idx], LZMS_NUM_LZ_REP_PROBS,
			&mut self.probs.lz_rep[idx],
		);
	}

	/// # Encode the Explicit/Repeat Delta Bit.
	fn encode_delta_bit(&mut self, out: &mut LzmsOutput, bit: u32) {
		out.encode_bit(bit, &mut self.delta_state, LZMS_NUM_DELTA_PROBS, &mut self.probs.delta);
	}

	/// # Encode a Delta Repeat Index Bit.
	fn encode_delta_rep_bit(&mut self, out: &mut LzmsOutput, bit: u32, idx: usize) {
		out.encode_bit(
			bit, &mut self.delta_rep_states[idx], LZMS_NUM_DELTA_REP_PROBS,
			&mut self.probs.delta_rep[idx],
		);
	}

	/// # Encode a Match Length.
	fn encode_length(&mut self, out: &mut LzmsOutput, length: u32) {
		let slot = self.comp_get_length_slot(length);
		if self.length_code.encode_symbol(slot, out) {
			// The parser's cached length costs follow the code.
			self.update_fast_length_costs();
		}
		out.write_bits(
			length - LZMS_LENGTH_SLOT_BASE[slot],
			u32::from(LZMS_EXTRA_LENGTH_BITS[slot]),
		);
	}

	/// # Encode an LZ Match Offset.
	fn encode_lz_offset(&mut self, out: &mut LzmsOutput, offset: u32) {
		let slot = self.comp_get_offset_slot(offset);
		self.lz_offset_code.encode_symbol(slot, out);
		out.write_bits(
			offset - LZMS_OFFSET_SLOT_BASE[slot],
			u32::from(LZMS_EXTRA_OFFSET_BITS[slot]),
		);
	}

	/// # Encode a Delta Match Raw Offset.
	fn encode_delta_raw_offset(&mut self, out: &mut LzmsOutput, raw_offset: u32) {
		let slot = self.comp_get_offset_slot(raw_offset);
		self.delta_offset_code.encode_symbol(slot, out);
		out.write_bits(
			raw_offset - LZMS_OFFSET_SLOT_BASE[slot],
			u32::from(LZMS_EXTRA_OFFSET_BITS[slot]),
		);
	}

	/// # Encode One Item.
	fn encode_item(&mut self, out: &mut LzmsOutput, length: u32, source: u32) {
		let main_bit = u32::from(1 < length);
		self.encode_main_bit(out, main_bit);

		if main_bit == 0 {
			self.literal_code.encode_symbol(source as usize, out);
			return;
		}

		let match_bit = u32::from(source & DELTA_SOURCE_TAG != 0);
		self.encode_match_bit(out, match_bit);

		if match_bit == 0 {
			let lz_bit = u32::from(source < LZMS_NUM_LZ_REPS as u32);
			self.encode_lz_bit(out, lz_bit);

			if lz_bit == 0 {
				let offset = source - (LZMS_NUM_LZ_REPS as u32 - 1);
				self.encode_lz_offset(out, offset);
			}
			else {
				let rep_idx = source as usize;
				for i in 0..rep_idx { self.encode_lz_rep_bit(out, 1, i); }
				if rep_idx < LZMS_NUM_LZ_REP_DECISIONS {
					self.encode_lz_rep_bit(out, 0, rep_idx);
				}
			}
		}
		else {
			let source = source & !DELTA_SOURCE_TAG;
			let delta_bit = u32::from(source < LZMS_NUM_DELTA_REPS as u32);
			self.encode_delta_bit(out, delta_bit);

			if delta_bit == 0 {
				let power = source >> DELTA_SOURCE_POWER_SHIFT;
				let raw_offset = (source & DELTA_SOURCE_RAW_OFFSET_MASK) -
					(LZMS_NUM_DELTA_REPS as u32 - 1);
				self.delta_power_code.encode_symbol(power as usize, out);
				self.encode_delta_raw_offset(out, raw_offset);
			}
			else {
				let rep_idx = source as usize;
				for i in 0..rep_idx { self.encode_delta_rep_bit(out, 1, i); }
				if rep_idx < LZMS_NUM_DELTA_REP_DECISIONS {
					self.encode_delta_rep_bit(out, 0, rep_idx);
				}
			}
		}

		self.encode_length(out, length);
	}

	/// # Encode a Finished Path Piece.
	///
	/// The parser stored at each node the item taken to reach it, so the
	/// path reads backwards. The first pass walks it back-to-front,
	/// relocating each item to its source node (reversing the list); the
	/// second walks front-to-back, encoding.
	fn encode_nonempty_item_list(&mut self, out: &mut LzmsOutput, end_node_idx: usize) {
		let mut cur = end_node_idx;
		let mut saved_item = self.optimum_nodes[cur].item;
		loop {
			let mut item = saved_item;
			let num_extra = self.optimum_nodes[cur].num_extra_items as usize;
			if 0 < num_extra {
				// A multi-item lookahead arrival unpacks into its pieces.
				let orig = cur;
				let mut i = 0;
				loop {
					cur -= item.length as usize;
					self.optimum_nodes[cur].item = item;
					item = self.optimum_nodes[orig].extra_items[i];
					i += 1;
					if i == num_extra || i == 2 { break; }
				}
			}
			cur -= item.length as usize;
			saved_item = self.optimum_nodes[cur].item;
			self.optimum_nodes[cur].item = item;
			if cur == 0 { break; }
		}

		loop {
			let item = self.optimum_nodes[cur].item;
			self.encode_item(out, item.length, item.source);
			cur += item.length as usize;
			if cur == end_node_idx { break; }
		}
	}

	/// # Advance the Delta Hash Table.
	///
	/// Insert `count` positions starting at `in_next` without searching.
	/// Positions too close to the end are never inserted (or searched),
	/// so the hash reads stay in bounds.
	fn delta_matchfinder_skip_bytes(&mut self, input: &[u8], in_next: usize, count: u32) {
		let mut pos = in_next;
		if input.len() - (pos + count as usize) <= NBYTES_HASHED_FOR_DELTA {
			return;
		}
		for _ in 0..count {
			for power in 0..NUM_POWERS_TO_CONSIDER {
				let span = 1_u32 << power;
				if pos < span as usize { continue; }
				let next_hash = lzms_delta_hash(input, pos + 1, (pos + 1) as u32, span);
				let hash = self.next_delta_hashes[power as usize] as usize;
				self.delta_hash_table[hash] =
					(power << DELTA_SOURCE_POWER_SHIFT) | pos as u32;
				self.next_delta_hashes[power as usize] = next_hash as u32;
			}
			pos += 1;
		}
	}

	/// # Skip Positions in Both Matchfinders.
	///
	/// Returns the position after the skipped range.
	fn skip_bytes(&mut self, input: &[u8], count: u32, in_next: usize) -> usize {
		let in_end = input.len();
		for pos in in_next..in_next + count as usize {
			let max_len = (in_end - pos) as u32;
			self.mf.skip_position(
				input, pos, max_len, self.nice_match_len.min(max_len),
				self.max_search_depth,
			);
		}
		if self.use_delta_matches {
			self.delta_matchfinder_skip_bytes(input, in_next, count);
		}
		in_next + count as usize
	}

	/// # Parse and Encode the Buffer.
	///
	/// Each pass of the outer loop commits one piece of the minimum-cost
	/// path: either a long match taken greedily, or the node chain built
	/// up until no path extends further (or the node buffer fills).
	fn near_optimal_parse(&mut self, input: &[u8], out: &mut LzmsOutput) {
		let in_end = input.len();
		let mut in_next = 0;
		let mut matches = mem::take(&mut self.matches);

		self.update_fast_length_costs();
		self.optimum_nodes[0].state = AdaptiveState::default();

		'begin: loop {
			let mut cur = 0;
			self.optimum_nodes[0].cost = 0;
			let mut end_node = 0;

			if in_next == in_end { break; }

			loop {
				let cur_state = self.optimum_nodes[cur].state;
				let cur_cost = self.optimum_nodes[cur].cost;

				// Repeat offset LZ matches.
				if LZMS_NUM_LZ_REPS <= in_next && 2 <= in_end - in_next {
					for rep_idx in 0..LZMS_NUM_LZ_REPS {
						let offset = cur_state.recent_lz_offsets[rep_idx];
						let matchptr = in_next - offset as usize;

						if input[in_next..in_next + 2] != input[matchptr..matchptr + 2] {
							continue;
						}
						let rep_len =
							lz_extend(input, matchptr, in_next, 2, in_end - in_next) as u32;

						// A long enough repeat is taken on the spot.
						if self.nice_match_len <= rep_len {
							in_next = self.skip_bytes(input, rep_len, in_next);

							if 0 < cur { self.encode_nonempty_item_list(out, cur); }
							self.encode_item(out, rep_len, rep_idx as u32);

							let mut state = cur_state;
							state.upcoming_lz_offset = state.recent_lz_offsets[rep_idx];
							state.upcoming_delta_pair = 0;
							for i in rep_idx..LZMS_NUM_LZ_REPS {
								state.recent_lz_offsets[i] = state.recent_lz_offsets[i + 1];
							}
							state.update_lru_queues();
							state.update_main_state(1);
							state.update_match_state(0);
							state.update_lz_state(1);
							state.update_lz_rep_states(rep_idx);
							self.optimum_nodes[0].state = state;
							continue 'begin;
						}

						while end_node < cur + rep_len as usize {
							end_node += 1;
							self.optimum_nodes[end_node].cost = INFINITE_COST;
						}

						let mut base_cost = cur_cost +
							bit_1_cost(cur_state.main_state, &self.probs.main) +
							bit_0_cost(cur_state.match_state, &self.probs.lz_or_delta) +
							bit_1_cost(cur_state.lz_state, &self.probs.lz);
						for i in 0..rep_idx {
							base_cost += bit_1_cost(
								cur_state.lz_rep_states[i], &self.probs.lz_rep[i],
							);
						}
						if rep_idx < LZMS_NUM_LZ_REP_DECISIONS {
							base_cost += bit_0_cost(
								cur_state.lz_rep_states[rep_idx], &self.probs.lz_rep[rep_idx],
							);
						}

						for len in 2..=rep_len {
							let cost = base_cost + self.fast_length_cost(len);
							let node = &mut self.optimum_nodes[cur + len as usize];
							if cost < node.cost {
								node.cost = cost;
								node.item = LzmsItem { length: len, source: rep_idx as u32 };
								node.num_extra_items = 0;
							}
						}

						// Rep match, then a literal, then a rep0 match.
						let rep = rep_len as usize;
						if self.try_lzrep_lit_lzrep0 &&
							3 <= in_end - (in_next + rep) &&
							input[in_next + rep + 1..in_next + rep + 3] ==
								input[matchptr + rep + 1..matchptr + rep + 3]
						{
							let rep0_len = lz_extend(
								input, matchptr + rep + 1, in_next + rep + 1, 2,
								(self.nice_match_len as usize)
									.min(in_end - (in_next + rep + 1)),
							) as u32;

							let mut main_state = cur_state.main_state;
							let match_state = lzms_update_state(
								cur_state.match_state, 0, LZMS_NUM_MATCH_PROBS,
							);
							let lz_state =
								lzms_update_state(cur_state.lz_state, 1, LZMS_NUM_LZ_PROBS);
							let lz_rep0_state = lzms_update_state(
								cur_state.lz_rep_states[0],
								u32::from(0 < rep_idx),
								LZMS_NUM_LZ_REP_PROBS,
							);
							main_state =
								lzms_update_state(main_state, 1, LZMS_NUM_MAIN_PROBS);

							let mut cost = base_cost + self.fast_length_cost(rep_len);
							cost += self.literal_cost(main_state, input[in_next + rep]);
							main_state =
								lzms_update_state(main_state, 0, LZMS_NUM_MAIN_PROBS);
							cost += bit_1_cost(main_state, &self.probs.main) +
								bit_0_cost(match_state, &self.probs.lz_or_delta) +
								bit_1_cost(lz_state, &self.probs.lz) +
								bit_0_cost(lz_rep0_state, &self.probs.lz_rep[0]) +
								self.fast_length_cost(rep0_len);

							let total_len = rep_len + 1 + rep0_len;
							while end_node < cur + total_len as usize {
								end_node += 1;
								self.optimum_nodes[end_node].cost = INFINITE_COST;
							}

							let node = &mut self.optimum_nodes[cur + total_len as usize];
							if cost < node.cost {
								node.cost = cost;
								node.item = LzmsItem { length: rep0_len, source: 0 };
								node.extra_items[0] = LzmsItem {
									length: 1,
									source: u32::from(input[in_next + rep]),
								};
								node.extra_items[1] = LzmsItem {
									length: rep_len,
									source: rep_idx as u32,
								};
								node.num_extra_items = 2;
							}
						}
					}
				}

				// Repeat offset delta matches.
				if self.use_delta_matches &&
					LZMS_NUM_DELTA_REPS + 1 <= in_next && 2 <= in_end - in_next
				{
					for rep_idx in 0..LZMS_NUM_DELTA_REPS {
						let pair = cur_state.recent_delta_pairs[rep_idx];
						let power = pair >> DELTA_SOURCE_POWER_SHIFT;
						let raw_offset = pair & DELTA_SOURCE_RAW_OFFSET_MASK;
						let span = (1_u32 << power) as usize;
						let offset = (raw_offset << power) as usize;
						let matchptr = in_next - offset;

						if input[in_next].wrapping_sub(input[in_next - span]) !=
							input[matchptr].wrapping_sub(input[matchptr - span]) ||
							input[in_next + 1].wrapping_sub(input[in_next + 1 - span]) !=
							input[matchptr + 1].wrapping_sub(input[matchptr + 1 - span])
						{
							continue;
						}
						let rep_len = lzms_extend_delta_match(
							input, matchptr, in_next, 2, (in_end - in_next) as u32,
							1 << power,
						);

						if self.nice_match_len <= rep_len {
							in_next = self.skip_bytes(input, rep_len, in_next);

							if 0 < cur { self.encode_nonempty_item_list(out, cur); }
							self.encode_item(out, rep_len, DELTA_SOURCE_TAG | rep_idx as u32);

							let mut state = cur_state;
							state.upcoming_delta_pair = pair;
							state.upcoming_lz_offset = 0;
							for i in rep_idx..LZMS_NUM_DELTA_REPS {
								state.recent_delta_pairs[i] = state.recent_delta_pairs[i + 1];
							}
							state.update_lru_queues();
							state.update_main_state(1);
							state.update_match_state(1);
							state.update_delta_state(1);
							state.update_delta_rep_states(rep_idx);
							self.optimum_nodes[0].state = state;
							continue 'begin;
						}

						while end_node < cur + rep_len as usize {
							end_node += 1;
							self.optimum_nodes[end_node].cost = INFINITE_COST;
						}

						let mut base_cost = cur_cost +
							bit_1_cost(cur_state.main_state, &self.probs.main) +
							bit_1_cost(cur_state.match_state, &self.probs.lz_or_delta) +
							bit_1_cost(cur_state.delta_state, &self.probs.delta);
						for i in 0..rep_idx {
							base_cost += bit_1_cost(
								cur_state.delta_rep_states[i], &self.probs.delta_rep[i],
							);
						}
						if rep_idx < LZMS_NUM_DELTA_REP_DECISIONS {
							base_cost += bit_0_cost(
								cur_state.delta_rep_states[rep_idx],
								&self.probs.delta_rep[rep_idx],
							);
						}

						for len in 2..=rep_len {
							let cost = base_cost + self.fast_length_cost(len);
							let node = &mut self.optimum_nodes[cur + len as usize];
							if cost < node.cost {
								node.cost = cost;
								node.item = LzmsItem {
									length: len,
									source: DELTA_SOURCE_TAG | rep_idx as u32,
								};
								node.num_extra_items = 0;
							}
						}
					}
				}

				// Explicit offset LZ matches.
				matches.clear();
				if 5 <= in_end - in_next {
					let max_len = (in_end - in_next) as u32;
					self.mf.get_matches(
						input, in_next, max_len, self.nice_match_len.min(max_len),
						self.max_search_depth, &mut matches,
					);
				}
				if let Some(longest) = matches.last().copied() {
					let mut best_len = longest.length;

					// A long enough match is taken on the spot.
					if self.nice_match_len <= best_len {
						let offset = longest.offset;
						best_len = lz_extend(
							input, in_next - offset as usize, in_next,
							best_len as usize, in_end - in_next,
						) as u32;

						// The matchfinder already advanced past this position.
						in_next = self.skip_bytes(input, best_len - 1, in_next + 1);

						if 0 < cur { self.encode_nonempty_item_list(out, cur); }
						self.encode_item(out, best_len, offset + LZMS_NUM_LZ_REPS as u32 - 1);

						let mut state = cur_state;
						state.upcoming_lz_offset = offset;
						state.upcoming_delta_pair = 0;
						state.update_lru_queues();
						state.update_main_state(1);
						state.update_match_state(0);
						state.update_lz_state(0);
						self.optimum_nodes[0].state = state;
						continue 'begin;
					}

					while end_node < cur + best_len as usize {
						end_node += 1;
						self.optimum_nodes[end_node].cost = INFINITE_COST;
					}

					let base_cost = cur_cost +
						bit_1_cost(cur_state.main_state, &self.probs.main) +
						bit_0_cost(cur_state.match_state, &self.probs.lz_or_delta) +
						bit_0_cost(cur_state.lz_state, &self.probs.lz);

					if self.try_lzmatch_lit_lzrep0 &&
						3 <= in_end - (in_next + best_len as usize)
					{
						// Match, then a literal, then a rep0 match.
						let mut l = 2;
						for m in &matches {
							let len = m.length;
							let lenu = len as usize;
							let offset = m.offset;
							let position_cost = base_cost + self.lz_offset_cost(offset);
							while l <= len {
								let cost = position_cost + self.fast_length_cost(l);
								let node = &mut self.optimum_nodes[cur + l as usize];
								if cost < node.cost {
									node.cost = cost;
									node.item = LzmsItem {
										length: l,
										source: offset + LZMS_NUM_LZ_REPS as u32 - 1,
									};
									node.num_extra_items = 0;
								}
								l += 1;
							}

							let matchptr = in_next - offset as usize;
							if input[matchptr + lenu + 1..matchptr + lenu + 3] !=
								input[in_next + lenu + 1..in_next + lenu + 3]
							{
								continue;
							}
							let rep0_len = lz_extend(
								input, matchptr + lenu + 1, in_next + lenu + 1, 2,
								(self.nice_match_len as usize)
									.min(in_end - (in_next + lenu + 1)),
							) as u32;

							let mut main_state = lzms_update_state(
								cur_state.main_state, 1, LZMS_NUM_MAIN_PROBS,
							);
							let match_state = lzms_update_state(
								cur_state.match_state, 0, LZMS_NUM_MATCH_PROBS,
							);
							let lz_state =
								lzms_update_state(cur_state.lz_state, 0, LZMS_NUM_LZ_PROBS);

							let mut cost = position_cost + self.fast_length_cost(len);
							cost += self.literal_cost(main_state, input[in_next + lenu]);
							main_state =
								lzms_update_state(main_state, 0, LZMS_NUM_MAIN_PROBS);
							cost += bit_1_cost(main_state, &self.probs.main) +
								bit_0_cost(match_state, &self.probs.lz_or_delta) +
								bit_1_cost(lz_state, &self.probs.lz) +
								bit_0_cost(cur_state.lz_rep_states[0], &self.probs.lz_rep[0]) +
								self.fast_length_cost(rep0_len);

							let total_len = len + 1 + rep0_len;
							while end_node < cur + total_len as usize {
								end_node += 1;
								self.optimum_nodes[end_node].cost = INFINITE_COST;
							}

							let node = &mut self.optimum_nodes[cur + total_len as usize];
							if cost < node.cost {
								node.cost = cost;
								node.item = LzmsItem { length: rep0_len, source: 0 };
								node.extra_items[0] = LzmsItem {
									length: 1,
									source: u32::from(input[in_next + lenu]),
								};
								node.extra_items[1] = LzmsItem {
									length: len,
									source: offset + LZMS_NUM_LZ_REPS as u32 - 1,
								};
								node.num_extra_items = 2;
							}
						}
					}
					else {
						let mut l = 2;
						for m in &matches {
							let position_cost = base_cost + self.lz_offset_cost(m.offset);
							while l <= m.length {
								let cost = position_cost + self.fast_length_cost(l);
								let node = &mut self.optimum_nodes[cur + l as usize];
								if cost < node.cost {
									node.cost = cost;
									node.item = LzmsItem {
										length: l,
										source: m.offset + LZMS_NUM_LZ_REPS as u32 - 1,
									};
									node.num_extra_items = 0;
								}
								l += 1;
							}
						}
					}
				}

				// Explicit offset delta matches, one candidate per span.
				if self.use_delta_matches &&
					NBYTES_HASHED_FOR_DELTA + 1 <= in_end - in_next
				{
					let pos = in_next;
					for power in 0..NUM_POWERS_TO_CONSIDER {
						let span = 1_u32 << power;
						if pos < span as usize { continue; }

						let next_hash =
							lzms_delta_hash(input, pos + 1, (pos + 1) as u32, span);
						let hash = self.next_delta_hashes[power as usize] as usize;
						let cur_match = self.delta_hash_table[hash];
						self.delta_hash_table[hash] =
							(power << DELTA_SOURCE_POWER_SHIFT) | pos as u32;
						self.next_delta_hashes[power as usize] = next_hash as u32;

						if power != cur_match >> DELTA_SOURCE_POWER_SHIFT { continue; }

						// Stale or colliding entries are weeded out here;
						// whatever survives is verified byte-for-byte below.
						let cand = (cur_match & DELTA_SOURCE_RAW_OFFSET_MASK) as usize;
						if pos <= cand { continue; }
						let offset = pos - cand;
						if offset & (span as usize - 1) != 0 { continue; }
						let matchptr = cand;
						if matchptr < span as usize { continue; }

						let sp = span as usize;
						if input[pos].wrapping_sub(input[pos - sp]) !=
							input[matchptr].wrapping_sub(input[matchptr - sp]) ||
							input[pos + 1].wrapping_sub(input[pos + 1 - sp]) !=
							input[matchptr + 1].wrapping_sub(input[matchptr + 1 - sp]) ||
							input[pos + 2].wrapping_sub(input[pos + 2 - sp]) !=
							input[matchptr + 2].wrapping_sub(input[matchptr + 2 - sp])
						{
							continue;
						}

						let len = lzms_extend_delta_match(
							input, matchptr, pos, NBYTES_HASHED_FOR_DELTA as u32,
							(in_end - pos) as u32, span,
						);

						let raw_offset = (offset >> power) as u32;
						if DELTA_SOURCE_RAW_OFFSET_MASK - (LZMS_NUM_DELTA_REPS as u32 - 1) <
							raw_offset
						{
							continue;
						}
						let pair = (power << DELTA_SOURCE_POWER_SHIFT) | raw_offset;
						let source = DELTA_SOURCE_TAG |
							(pair + LZMS_NUM_DELTA_REPS as u32 - 1);

						if self.nice_match_len <= len {
							// The hash table already advanced past this position.
							in_next = self.skip_bytes(input, len - 1, in_next + 1);

							if 0 < cur { self.encode_nonempty_item_list(out, cur); }
							self.encode_item(out, len, source);

							let mut state = cur_state;
							state.upcoming_lz_offset = 0;
							state.upcoming_delta_pair = pair;
							state.update_lru_queues();
							state.update_main_state(1);
							state.update_match_state(1);
							state.update_delta_state(0);
							self.optimum_nodes[0].state = state;
							continue 'begin;
						}

						while end_node < cur + len as usize {
							end_node += 1;
							self.optimum_nodes[end_node].cost = INFINITE_COST;
						}

						let base_cost = cur_cost +
							bit_1_cost(cur_state.main_state, &self.probs.main) +
							bit_1_cost(cur_state.match_state, &self.probs.lz_or_delta) +
							bit_0_cost(cur_state.delta_state, &self.probs.delta) +
							self.delta_source_cost(power, raw_offset);

						for l in NBYTES_HASHED_FOR_DELTA as u32..=len {
							let cost = base_cost + self.fast_length_cost(l);
							let node = &mut self.optimum_nodes[cur + l as usize];
							if cost < node.cost {
								node.cost = cost;
								node.item = LzmsItem { length: l, source };
								node.num_extra_items = 0;
							}
						}
					}
				}

				// Literal.
				if end_node < cur + 1 {
					end_node += 1;
					self.optimum_nodes[end_node].cost = INFINITE_COST;
				}
				let cur_and_lit_cost = cur_cost +
					self.literal_cost(cur_state.main_state, input[in_next]);
				if cur_and_lit_cost < self.optimum_nodes[cur + 1].cost {
					let node = &mut self.optimum_nodes[cur + 1];
					node.cost = cur_and_lit_cost;
					node.item = LzmsItem { length: 1, source: u32::from(input[in_next]) };
					node.num_extra_items = 0;
				}
				else if self.try_lit_lzrep0 && 2 <= in_end - (in_next + 1) {
					// Literal, then a rep0 match.
					let offset =
						if cur_state.prev_lz_offset != 0 { cur_state.prev_lz_offset }
						else { cur_state.recent_lz_offsets[0] };
					let matchptr = in_next + 1 - offset as usize;

					if input[in_next + 1..in_next + 3] == input[matchptr..matchptr + 2] {
						let rep0_len = lz_extend(
							input, matchptr, in_next + 1, 2,
							(in_end - (in_next + 1)).min(self.nice_match_len as usize),
						) as u32;

						let main_state = lzms_update_state(
							cur_state.main_state, 0, LZMS_NUM_MAIN_PROBS,
						);
						let cost = cur_and_lit_cost +
							bit_1_cost(main_state, &self.probs.main) +
							bit_0_cost(cur_state.match_state, &self.probs.lz_or_delta) +
							bit_1_cost(cur_state.lz_state, &self.probs.lz) +
							bit_0_cost(cur_state.lz_rep_states[0], &self.probs.lz_rep[0]) +
							self.fast_length_cost(rep0_len);

						let total_len = 1 + rep0_len;
						while end_node < cur + total_len as usize {
							end_node += 1;
							self.optimum_nodes[end_node].cost = INFINITE_COST;
						}

						let node = &mut self.optimum_nodes[cur + total_len as usize];
						if cost < node.cost {
							node.cost = cost;
							node.item = LzmsItem { length: rep0_len, source: 0 };
							node.extra_items[0] = LzmsItem {
								length: 1,
								source: u32::from(input[in_next]),
							};
							node.num_extra_items = 1;
						}
					}
				}

				in_next += 1;
				cur += 1;

				// The cheapest path to the new current node is now known;
				// replay its arrival items over the source node's state.
				let arrived = self.optimum_nodes[cur];
				let mut item_to_take = arrived.item;
				let mut source_node = cur - item_to_take.length as usize;
				let mut next_item_idx: i32 = -1;
				for i in 0..arrived.num_extra_items as usize {
					item_to_take = arrived.extra_items[i];
					source_node -= item_to_take.length as usize;
					next_item_idx += 1;
				}
				let mut state = self.optimum_nodes[source_node].state;
				loop {
					let length = item_to_take.length;
					let mut source = item_to_take.source;

					state.upcoming_lz_offset = 0;
					state.upcoming_delta_pair = 0;
					if 1 < length {
						state.update_main_state(1);

						if source & DELTA_SOURCE_TAG != 0 {
							state.update_match_state(1);
							source &= !DELTA_SOURCE_TAG;

							if LZMS_NUM_DELTA_REPS as u32 <= source {
								state.update_delta_state(0);
								state.upcoming_delta_pair =
									source - (LZMS_NUM_DELTA_REPS as u32 - 1);
							}
							else {
								let rep_idx = source as usize;
								state.update_delta_state(1);
								state.update_delta_rep_states(rep_idx);
								state.upcoming_delta_pair =
									state.recent_delta_pairs[rep_idx];
								for i in rep_idx..LZMS_NUM_DELTA_REPS {
									state.recent_delta_pairs[i] =
										state.recent_delta_pairs[i + 1];
								}
							}
						}
						else {
							state.update_match_state(0);

							if LZMS_NUM_LZ_REPS as u32 <= source {
								state.update_lz_state(0);
								state.upcoming_lz_offset =
									source - (LZMS_NUM_LZ_REPS as u32 - 1);
							}
							else {
								let rep_idx = source as usize;
								state.update_lz_state(1);
								state.update_lz_rep_states(rep_idx);
								state.upcoming_lz_offset =
									state.recent_lz_offsets[rep_idx];
								for i in rep_idx..LZMS_NUM_LZ_REPS {
									state.recent_lz_offsets[i] =
										state.recent_lz_offsets[i + 1];
								}
							}
						}
					}
					else {
						state.update_main_state(0);
					}
					state.update_lru_queues();

					if next_item_idx < 0 { break; }
					if next_item_idx == 0 { item_to_take = arrived.item; }
					else { item_to_take = arrived.extra_items[next_item_idx as usize - 1]; }
					next_item_idx -= 1;
				}
				self.optimum_nodes[cur].state = state;

				// Commit the piece once no path extends past the current
				// node, or once the node buffer is used up. End-of-buffer
				// always lands on the first condition.
				if cur == end_node || cur == NUM_OPTIM_NODES {
					self.encode_nonempty_item_list(out, cur);
					self.optimum_nodes[0].state = self.optimum_nodes[cur].state;
					continue 'begin;
				}
			}
		}

		self.matches = matches;
	}

	/// # Compress a Buffer.
	///
	/// Returns the compressed size, or zero if the data did not fit the
	/// output buffer (or was too small to bother with).
	fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		if input.len() < 4 { return 0; }

		self.in_buffer.clear();
		self.in_buffer.extend_from_slice(input);
		lzms_x86_filter(&mut self.in_buffer, &mut self.last_target_usages, false);

		self.mf.init();
		if self.use_delta_matches {
			self.delta_hash_table.fill(u32::MAX);
			self.next_delta_hashes = [0; NUM_POWERS_TO_CONSIDER as usize];
		}

		self.main_state = 0;
		self.match_state = 0;
		self.lz_state = 0;
		self.lz_rep_states = [0; LZMS_NUM_LZ_REP_DECISIONS];
		self.delta_state = 0;
		self.delta_rep_states = [0; LZMS_NUM_DELTA_REP_DECISIONS];
		self.probs = LzmsProbabilities::default();

		let num_offset_slots = lzms_get_num_offset_slots(input.len());
		self.literal_code.init(LZMS_NUM_LITERAL_SYMS);
		self.lz_offset_code.init(num_offset_slots);
		self.length_code.init(LZMS_NUM_LENGTH_SYMS);
		self.delta_offset_code.init(num_offset_slots);
		self.delta_power_code.init(LZMS_NUM_DELTA_POWER_SYMS);

		let mut out = LzmsOutput::new(output);
		let in_buffer = mem::take(&mut self.in_buffer);
		self.near_optimal_parse(&in_buffer, &mut out);
		self.in_buffer = in_buffer;

		out.finalize()
	}
}



/// # Position-Width Dispatch.
enum Inner {
	/// # Buffers to 64 KiB.
	Pos16(Box<LzmsState<u16>>),

	/// # Larger Buffers.
	Pos32(Box<LzmsState<u32>>),
}


/// # LZMS Compressor.
pub(crate) struct LzmsCompressor(Inner);

impl LzmsCompressor {
	/// # New Compressor.
	///
	/// `max_bufsize` must not exceed [`LZMS_MAX_BUFFER_SIZE`].
	pub(crate) fn new(max_bufsize: usize, compression_level: u32) -> Result<Self, WimError> {
		if LZMS_MAX_BUFFER_SIZE < max_bufsize { return Err(WimError::Param); }
		if max_bufsize <= 65_536 {
			Ok(Self(Inner::Pos16(Box::new(LzmsState::new(max_bufsize, compression_level)))))
		}
		else {
			Ok(Self(Inner::Pos32(Box::new(LzmsState::new(max_bufsize, compression_level)))))
		}
	}

	/// # Compress.
	///
	/// Returns the compressed size, or zero if the data did not fit the
	/// output buffer.
	pub(crate) fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		match &mut self.0 {
			Inner::Pos16(state) => state.compress(input, output),
			Inner::Pos32(state) => state.compress(input, output),
		}
	}
}



#[cfg(test)]
mod test {
	use super::*;
	use crate::lzms::LzmsDecompressor;

	/// # Round Trip at a Given Level.
	fn roundtrip(data: &[u8], level: u32) {
		let mut c = LzmsCompressor::new(data.len(), level).unwrap();
		let mut compressed = vec![0_u8; data.len() + 4096];
		let n = c.compress(data, &mut compressed);
		assert!(n != 0, "expected compressible input");

		let mut d = LzmsDecompressor::new(data.len()).unwrap();
		let mut out = vec![0_u8; data.len()];
		d.decompress(&compressed[..n], &mut out).unwrap();
		assert_eq!(out, data);
	}

	#[test]
	fn t_roundtrip_levels() {
		let mut data = Vec::new();
		while data.len() < 20_000 {
			data.extend_from_slice(b"she sells sea shells by the sea shore; ");
			data.extend_from_slice(b"the shells she sells are sea shells, I'm sure. ");
		}
		// Below and above each heuristic threshold.
		for level in [1, 20, 35, 50, 80] {
			roundtrip(&data, level);
		}
	}

	#[test]
	fn t_roundtrip_zeroes() {
		roundtrip(&vec![0_u8; 100_000], 50);
		roundtrip(&vec![0_u8; 100_000], 20);
	}

	#[test]
	fn t_roundtrip_delta() {
		// A rising ramp has constant byte differences at every span, so
		// delta matches dominate once the level turns them on.
		let data: Vec<u8> = (0..30_000_u32).map(|i| (i >> 2) as u8).collect();
		roundtrip(&data, 50);
		roundtrip(&data, 70);
	}

	#[test]
	fn t_roundtrip_small() {
		roundtrip(b"abracadabra abracadabra abracadabra", 50);
		roundtrip(&[0xAA_u8; 64], 50);
	}

	#[test]
	fn t_roundtrip_x86() {
		// Relative calls resolving to a common target trip the x86
		// filter; the decompressor has to undo it exactly.
		let mut data = Vec::new();
		while data.len() < 4096 {
			let pos = data.len() as u32;
			data.push(0xE8);
			data.extend_from_slice(&(0x8000_u32.wrapping_sub(pos)).to_le_bytes());
			data.extend_from_slice(b"filler bytes here ");
		}
		roundtrip(&data, 50);
	}

	#[test]
	fn t_tiny_input() {
		let mut c = LzmsCompressor::new(16, 50).unwrap();
		let mut out = [0_u8; 64];
		assert_eq!(c.compress(b"abc", &mut out), 0);
		assert_eq!(c.compress(b"", &mut out), 0);
	}

	#[test]
	fn t_output_too_small() {
		// Random-ish bytes cannot shrink; a half-size output buffer must
		// report failure rather than truncate.
		let mut state = 0x2545_F491_u32;
		let data: Vec<u8> = (0..4096)
			.map(|_| {
				state = state.wrapping_mul(747_796_405).wrapping_add(1);
				(state >> 24) as u8
			})
			.collect();
		let mut c = LzmsCompressor::new(data.len(), 50).unwrap();
		let mut out = vec![0_u8; data.len() / 2];
		assert_eq!(c.compress(&data, &mut out), 0);
	}

	#[test]
	fn t_new_rejects_oversize() {
		assert!(LzmsCompressor::new(LZMS_MAX_BUFFER_SIZE + 1, 50).is_err());
	}
}
