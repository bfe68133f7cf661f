/*!
# Wimpress: LZX Compression.

Two parsers share the block-output machinery here. Fast levels use a lazy
parser over a hash-chain matchfinder; higher levels run a near-optimal
parser that caches matches from a binary-tree matchfinder, then iterates a
minimum-cost path search over each block with costs refined from the
previous pass's Huffman codes.

Positions are parameterized over `u16`/`u32` so small buffers keep their
matchfinder tables compact.
*/

use crate::bits::lz_extend;
use crate::error::WimError;
use crate::huffman::make_canonical_code;
use crate::matchfinder::{
	BtMatchFinder,
	HcMatchFinder,
	LzMatch,
	MfPos,
};
use std::mem;
use super::{
	lzx_get_num_main_syms,
	lzx_get_window_order,
	lzx_preprocess,
	LZX_ALIGNEDCODE_ELEMENT_SIZE,
	LZX_ALIGNEDCODE_NUM_SYMBOLS,
	LZX_ALIGNED_OFFSET_BITMASK,
	LZX_BLOCKTYPE_ALIGNED,
	LZX_BLOCKTYPE_VERBATIM,
	LZX_DEFAULT_BLOCK_SIZE,
	LZX_EXTRA_OFFSET_BITS,
	LZX_LENCODE_NUM_SYMBOLS,
	LZX_MAINCODE_MAX_NUM_SYMBOLS,
	LZX_MAX_MATCH_LEN,
	LZX_MAX_OFFSET_SLOTS,
	LZX_MAX_WINDOW_SIZE,
	LZX_MIN_ALIGNED_OFFSET,
	LZX_MIN_ALIGNED_OFFSET_SLOT,
	LZX_MIN_MATCH_LEN,
	LZX_NUM_ALIGNED_OFFSET_BITS,
	LZX_NUM_CHARS,
	LZX_NUM_LENS,
	LZX_NUM_LEN_HEADERS,
	LZX_NUM_PRIMARY_LENS,
	LZX_NUM_RECENT_OFFSETS,
	LZX_OFFSET_ADJUSTMENT,
	LZX_OFFSET_SLOT_BASE,
	LZX_PRECODE_ELEMENT_SIZE,
	LZX_PRECODE_NUM_SYMBOLS,
	LZX_RECENT_OFFSETS_INIT,
};



/// # Highest Lazy-Parsing Level.
const MAX_FAST_LEVEL: u32 = 34;

/// # Main Codeword Length Limit.
///
/// The format allows 16-bit main codewords, and the compressor uses them
/// all; there is no performance shortcut to be had here.
const MAIN_CODEWORD_LIMIT: u32 = 16;

/// # Length Codeword Length Limit.
const LENGTH_CODEWORD_LIMIT: u32 = 12;

/// # Aligned Codeword Length Limit.
const ALIGNED_CODEWORD_LIMIT: u32 = 7;

/// # Precode Codeword Length Limit.
const PRE_CODEWORD_LIMIT: u32 = 7;

/// # Minimum Block Size.
const MIN_BLOCK_SIZE: usize = 6500;

/// # Soft Maximum Block Size.
///
/// Blocks may overshoot this by up to a match length minus one.
const SOFT_MAX_BLOCK_SIZE: usize = 100_000;

/// # Observations Between Block-Split Checks.
const NUM_OBSERVATIONS_PER_BLOCK_CHECK: u32 = 400;

/// # Match Cache Length.
///
/// The near-optimal parser ends the block early if its match cache fills
/// up. There is room at the end for one maximal position: up to the maximum
/// match count plus one header entry.
const CACHE_LENGTH: usize = 500_000;

/// # Scaled Cost of One Bit.
const BIT_COST: u32 = 64;

/// # Smallest Length Needing the Length Code.
const LZX_MIN_SECONDARY_LEN: u32 = LZX_MIN_MATCH_LEN + LZX_NUM_PRIMARY_LENS;

/// # Sequence Match-Length Bits.
const SEQ_MATCHLEN_BITS: u32 = 9;

/// # Sequence Match-Length Mask.
const SEQ_MATCHLEN_MASK: u32 = (1 << SEQ_MATCHLEN_BITS) - 1;

/// # Sequence Main-Symbol Bits.
const SEQ_MAINSYM_BITS: u32 = 10;

/// # Sequence Main-Symbol Mask.
const SEQ_MAINSYM_MASK: u32 = (1 << SEQ_MAINSYM_BITS) - 1;

/// # Optimum Item Length Shift.
const OPTIMUM_OFFSET_SHIFT: u32 = 9;

/// # Optimum Item Length Mask.
const OPTIMUM_LEN_MASK: u32 = (1 << OPTIMUM_OFFSET_SHIFT) - 1;

/// # Optimum Item Gap Flag.
const OPTIMUM_GAP_MATCH: u32 = 0x8000_0000;

/// # Cost-Path Node Count.
const NUM_OPTIM_NODES: usize = SOFT_MAX_BLOCK_SIZE + LZX_MAX_MATCH_LEN as usize + 1;

/// # Cost-Path Queue Ring Length.
///
/// Must cover at least two maximal match lengths so a queue is never
/// overwritten before the node that needs it is reached.
const OPTIMUM_QUEUE_LEN: usize = 512;

/// # Chosen Sequence Capacity.
///
/// Each sequence covers at least two positions (a literal run plus a match,
/// or a final run), plus slack for the terminator and block overshoot.
const NUM_SEQS: usize = (SOFT_MAX_BLOCK_SIZE + LZX_MAX_MATCH_LEN as usize) / 2 + 2;

/// # Scaled Literal Probabilities.
///
/// `LITERAL_SCALED_PROBS[n] / 6870` approximates the expected probability
/// mass a single literal carries when `n` distinct literals are in use,
/// from a fit over typical data. Used to seed the first-pass cost model.
const LITERAL_SCALED_PROBS: [u8; LZX_NUM_CHARS + 1] = [
	255, 253, 250, 247, 244, 242, 239, 237, 234, 232, 229, 227, 224, 222, 219, 217,
	215, 212, 210, 208, 206, 203, 201, 199, 197, 195, 193, 191, 189, 186, 184, 182,
	181, 179, 177, 175, 173, 171, 169, 167, 166, 164, 162, 160, 159, 157, 155, 153,
	152, 150, 149, 147, 145, 144, 142, 141, 139, 138, 136, 135, 133, 132, 130, 129,
	128, 126, 125, 124, 122, 121, 120, 118, 117, 116, 115, 113, 112, 111, 110, 109,
	107, 106, 105, 104, 103, 102, 101, 100,  98,  97,  96,  95,  94,  93,  92,  91,
	 90,  89,  88,  87,  86,  86,  85,  84,  83,  82,  81,  80,  79,  78,  78,  77,
	 76,  75,  74,  73,  73,  72,  71,  70,  70,  69,  68,  67,  67,  66,  65,  65,
	 64,  63,  62,  62,  61,  60,  60,  59,  59,  58,  57,  57,  56,  55,  55,  54,
	 54,  53,  53,  52,  51,  51,  50,  50,  49,  49,  48,  48,  47,  47,  46,  46,
	 45,  45,  44,  44,  43,  43,  42,  42,  41,  41,  40,  40,  40,  39,  39,  38,
	 38,  38,  37,  37,  36,  36,  36,  35,  35,  34,  34,  34,  33,  33,  33,  32,
	 32,  32,  31,  31,  31,  30,  30,  30,  29,  29,  29,  28,  28,  28,  27,  27,
	 27,  27,  26,  26,  26,  25,  25,  25,  25,  24,  24,  24,  24,  23,  23,  23,
	 23,  22,  22,  22,  22,  21,  21,  21,  21,  20,  20,  20,  20,  20,  19,  19,
	 19,  19,  19,  18,  18,  18,  18,  18,  17,  17,  17,  17,  17,  16,  16,  16,
	 16,
];

/// # Default Length-Symbol Costs.
///
/// Scaled costs for each length-code symbol, fit over typical data, used
/// until a real length code has been built for the block.
const DEFAULT_LEN_COSTS: [u16; LZX_LENCODE_NUM_SYMBOLS] = [
	300, 310, 320, 330, 360, 396, 399, 416, 451, 448, 463, 466, 505, 492, 503, 514,
	547, 531, 566, 561, 589, 563, 592, 586, 623, 602, 639, 627, 659, 643, 657, 650,
	685, 662, 661, 672, 685, 686, 696, 680, 657, 682, 666, 699, 674, 699, 679, 709,
	688, 712, 692, 714, 694, 716, 698, 712, 706, 727, 714, 727, 713, 723, 712, 718,
	719, 719, 720, 735, 725, 735, 728, 740, 727, 739, 727, 742, 716, 733, 733, 740,
	738, 746, 737, 747, 738, 745, 736, 748, 742, 749, 745, 749, 743, 748, 741, 752,
	745, 752, 747, 750, 747, 752, 748, 753, 750, 752, 753, 753, 749, 744, 752, 755,
	753, 756, 745, 748, 746, 745, 723, 757, 755, 758, 755, 758, 752, 757, 754, 757,
	755, 759, 755, 758, 753, 755, 755, 758, 757, 761, 755, 750, 758, 759, 759, 760,
	758, 751, 757, 757, 759, 759, 758, 759, 758, 761, 750, 761, 758, 760, 759, 761,
	758, 761, 760, 752, 759, 760, 759, 759, 757, 762, 760, 761, 761, 748, 761, 760,
	762, 763, 752, 762, 762, 763, 762, 762, 763, 763, 762, 763, 762, 763, 762, 763,
	763, 764, 763, 762, 763, 762, 762, 762, 764, 764, 763, 764, 763, 763, 763, 762,
	763, 763, 762, 764, 764, 763, 762, 763, 763, 763, 763, 762, 764, 763, 762, 764,
	764, 763, 763, 765, 764, 764, 762, 763, 764, 765, 763, 764, 763, 764, 762, 764,
	764, 754, 763, 764, 763, 763, 762, 763, 584,
];



/// # Output Bitstream.
///
/// Bits accumulate most-significant-first and leave as little-endian `u16`
/// units, matching the decoder's expectations. Overflowing the buffer is
/// remembered rather than fatal; `flush` reports it as zero bytes written.
struct OutputBitstream<'a> {
	/// # Bit Accumulator.
	bitbuf: u64,

	/// # Pending Bit Count.
	bitcount: u32,

	/// # Output Buffer.
	out: &'a mut [u8],

	/// # Usable End (Even).
	end: usize,

	/// # Write Position.
	pos: usize,

	/// # Ran Out of Room?
	overflow: bool,
}

impl<'a> OutputBitstream<'a> {
	/// # New Bitstream Over `out`.
	fn new(out: &'a mut [u8]) -> Self {
		let end = out.len() & !1;
		Self {
			bitbuf: 0,
			bitcount: 0,
			out,
			end,
			pos: 0,
			overflow: false,
		}
	}

	/// # Queue Bits.
	///
	/// The accumulator holds 64 bits; callers flush often enough that no
	/// single call can overflow it.
	fn add_bits(&mut self, bits: u32, num_bits: u32) {
		self.bitbuf = (self.bitbuf << num_bits) | u64::from(bits);
		self.bitcount += num_bits;
	}

	/// # Flush Whole Units.
	fn flush_bits(&mut self) {
		while 16 <= self.bitcount {
			self.bitcount -= 16;
			if 2 <= self.end - self.pos {
				let unit = (self.bitbuf >> self.bitcount) as u16;
				self.out[self.pos..self.pos + 2].copy_from_slice(&unit.to_le_bytes());
				self.pos += 2;
			}
			else { self.overflow = true; }
		}
	}

	/// # Write Bits.
	fn write_bits(&mut self, bits: u32, num_bits: u32) {
		self.add_bits(bits, num_bits);
		self.flush_bits();
	}

	/// # Finalize.
	///
	/// Pad out the final partial unit and return the number of bytes
	/// written, or zero if the buffer was too small.
	fn flush(mut self) -> usize {
		if self.bitcount != 0 {
			if 2 <= self.end - self.pos {
				let unit = (self.bitbuf << (16 - self.bitcount)) as u16;
				self.out[self.pos..self.pos + 2].copy_from_slice(&unit.to_le_bytes());
				self.pos += 2;
			}
			else { self.overflow = true; }
		}
		if self.overflow { 0 }
		else { self.pos }
	}
}



#[derive(Debug, Clone, Copy)]
/// # Recent-Offsets Queue.
///
/// The three recent adjusted offsets packed into 21-bit lanes of a `u64`,
/// cheap to copy around the cost-path queue ring. A push shifts the whole
/// thing left; garbage accumulating past bit 62 is never read.
struct LruQueue(u64);

impl LruQueue {
	/// # Initial Queue.
	fn new() -> Self {
		Self(1 | (1 << 21) | (1 << 42))
	}

	/// # Recent Offset `idx`.
	fn offset(self, idx: usize) -> u32 {
		((self.0 >> (idx * 21)) & 0x1F_FFFF) as u32
	}

	/// # Push a New Offset.
	fn push(self, offset: u32) -> Self {
		Self((self.0 << 21) | u64::from(offset))
	}

	/// # Swap Lane `idx` to the Front.
	fn swap(self, idx: usize) -> Self {
		let shift = idx * 21;
		let mask = 0x1F_FFFF_u64;
		let mask_high = mask << shift;
		Self(
			(self.0 & !(mask | mask_high)) |
			((self.0 & mask_high) >> shift) |
			((self.0 & mask) << shift)
		)
	}
}



#[derive(Debug, Clone, Copy, Default)]
/// # Chosen Sequence.
///
/// A run of literals followed by one match, packed: the literal run length
/// and match length share one word, the adjusted offset and main symbol the
/// other. A zero match length marks the final, match-less sequence.
struct LzxSequence {
	/// # Literal Run Length and Match Length.
	litrunlen_and_matchlen: u32,

	/// # Adjusted Offset and Main Symbol.
	adjusted_offset_and_mainsym: u32,
}



#[derive(Debug, Clone, Copy)]
/// # Cost-Path Node.
///
/// `item` packs the length taken to arrive here in the low nine bits and
/// the adjusted offset above them (the sign bit doubles as the gap flag);
/// literals store zero length with the byte value above.
struct OptimumNode {
	/// # Lowest Cost to Reach This Position.
	cost: u32,

	/// # Arrival Item.
	item: u32,
}



/// # Symbol Frequencies.
struct LzxFreqs {
	/// # Main Code.
	main: [u32; LZX_MAINCODE_MAX_NUM_SYMBOLS],

	/// # Length Code.
	len: [u32; LZX_LENCODE_NUM_SYMBOLS],

	/// # Aligned Offset Code.
	aligned: [u32; LZX_ALIGNEDCODE_NUM_SYMBOLS],
}

impl LzxFreqs {
	/// # Fresh (Zero) Frequencies.
	fn new() -> Self {
		Self {
			main: [0; LZX_MAINCODE_MAX_NUM_SYMBOLS],
			len: [0; LZX_LENCODE_NUM_SYMBOLS],
			aligned: [0; LZX_ALIGNEDCODE_NUM_SYMBOLS],
		}
	}

	/// # Reset to Zero.
	fn reset(&mut self) {
		self.main.fill(0);
		self.len.fill(0);
		self.aligned.fill(0);
	}
}



/// # Codeword Lengths.
struct LzxLens {
	/// # Main Code.
	main: [u8; LZX_MAINCODE_MAX_NUM_SYMBOLS],

	/// # Length Code.
	len: [u8; LZX_LENCODE_NUM_SYMBOLS],

	/// # Aligned Offset Code.
	aligned: [u8; LZX_ALIGNEDCODE_NUM_SYMBOLS],
}

impl LzxLens {
	/// # Fresh (Zero) Lengths.
	fn new() -> Self {
		Self {
			main: [0; LZX_MAINCODE_MAX_NUM_SYMBOLS],
			len: [0; LZX_LENCODE_NUM_SYMBOLS],
			aligned: [0; LZX_ALIGNEDCODE_NUM_SYMBOLS],
		}
	}
}



/// # Codewords.
struct LzxCodewords {
	/// # Main Code.
	main: [u32; LZX_MAINCODE_MAX_NUM_SYMBOLS],

	/// # Length Code.
	len: [u32; LZX_LENCODE_NUM_SYMBOLS],

	/// # Aligned Offset Code.
	aligned: [u32; LZX_ALIGNEDCODE_NUM_SYMBOLS],
}



/// # One Set of Huffman Codes.
struct LzxCodes {
	/// # Codeword Lengths.
	lens: LzxLens,

	/// # Codewords.
	codewords: LzxCodewords,
}

impl LzxCodes {
	/// # Fresh Codes.
	fn new() -> Self {
		Self {
			lens: LzxLens::new(),
			codewords: LzxCodewords {
				main: [0; LZX_MAINCODE_MAX_NUM_SYMBOLS],
				len: [0; LZX_LENCODE_NUM_SYMBOLS],
				aligned: [0; LZX_ALIGNEDCODE_NUM_SYMBOLS],
			},
		}
	}
}



/// # Cost Model.
///
/// All costs are in `BIT_COST` units. `match_cost` folds together, per
/// offset slot, the main symbol, length symbol, and extra offset bits for
/// each match length; the three aligned bits are excluded (and their fixed
/// cost subtracted for aligned slots) since they depend on the offset.
struct LzxCosts {
	/// # Total Match Cost by Slot and `length - LZX_MIN_MATCH_LEN`.
	match_cost: [[u16; LZX_NUM_LENS]; LZX_MAX_OFFSET_SLOTS],

	/// # Main Symbol Costs.
	main: [u32; LZX_MAINCODE_MAX_NUM_SYMBOLS],

	/// # Length Symbol Costs.
	len: [u32; LZX_LENCODE_NUM_SYMBOLS],

	/// # Aligned Symbol Costs.
	aligned: [u32; LZX_ALIGNEDCODE_NUM_SYMBOLS],
}

impl LzxCosts {
	/// # Fresh (Zero) Costs.
	fn new() -> Self {
		Self {
			match_cost: [[0; LZX_NUM_LENS]; LZX_MAX_OFFSET_SLOTS],
			main: [0; LZX_MAINCODE_MAX_NUM_SYMBOLS],
			len: [0; LZX_LENCODE_NUM_SYMBOLS],
			aligned: [0; LZX_ALIGNEDCODE_NUM_SYMBOLS],
		}
	}
}



/// # Offset Slot Lookup Tables.
///
/// Adjusted offsets below 32768 map through a direct byte table; larger
/// ones land in slots at least 16384 apart, so a 14-bit downshift suffices.
struct OffsetSlotTabs {
	/// # Small Offsets.
	tab1: Box<[u8; 32_768]>,

	/// # Large Offsets, Scaled Down.
	tab2: [u8; LZX_MAX_WINDOW_SIZE >> 14],
}

impl OffsetSlotTabs {
	/// # Build the Tables.
	fn new() -> Self {
		let mut tab1 = Box::new([0_u8; 32_768]);
		let mut tab2 = [0_u8; LZX_MAX_WINDOW_SIZE >> 14];
		let mut slot = 0_usize;
		for adjusted in 0..32_768_i32 {
			if LZX_OFFSET_SLOT_BASE[slot + 1] + LZX_OFFSET_ADJUSTMENT as i32 <= adjusted {
				slot += 1;
			}
			tab1[adjusted as usize] = slot as u8;
		}
		let mut adjusted = 32_768_i32;
		while adjusted < LZX_MAX_WINDOW_SIZE as i32 {
			if LZX_OFFSET_SLOT_BASE[slot + 1] + LZX_OFFSET_ADJUSTMENT as i32 <= adjusted {
				slot += 1;
			}
			tab2[(adjusted >> 14) as usize] = slot as u8;
			adjusted += 1 << 14;
		}
		Self { tab1, tab2 }
	}

	/// # Slot for an Adjusted Offset.
	fn get(&self, adjusted_offset: u32) -> usize {
		if (adjusted_offset as usize) < self.tab1.len() {
			self.tab1[adjusted_offset as usize] as usize
		}
		else {
			self.tab2[(adjusted_offset >> 14) as usize] as usize
		}
	}
}



#[derive(Debug)]
/// # Block-Split Statistics.
///
/// Literals are bucketed by three high/low bits, matches by short/long.
/// When the distribution of fresh observations drifts far enough from the
/// block's accumulated distribution, the block is ended early.
struct BlockSplitStats {
	/// # New Observations by Type.
	new_observations: [u32; Self::NUM_OBSERVATION_TYPES],

	/// # Accumulated Observations by Type.
	observations: [u32; Self::NUM_OBSERVATION_TYPES],

	/// # New Observation Count.
	num_new_observations: u32,

	/// # Accumulated Observation Count.
	num_observations: u32,
}

impl BlockSplitStats {
	/// # Observation Types.
	const NUM_OBSERVATION_TYPES: usize = 8 + 2;

	/// # Fresh Statistics.
	fn new() -> Self {
		Self {
			new_observations: [0; Self::NUM_OBSERVATION_TYPES],
			observations: [0; Self::NUM_OBSERVATION_TYPES],
			num_new_observations: 0,
			num_observations: 0,
		}
	}

	/// # Reset for a New Block.
	fn init(&mut self) {
		self.new_observations.fill(0);
		self.observations.fill(0);
		self.num_new_observations = 0;
		self.num_observations = 0;
	}

	/// # Note a Literal.
	fn observe_literal(&mut self, lit: u8) {
		let t = (((lit >> 5) & 0x6) | (lit & 1)) as usize;
		self.new_observations[t] += 1;
		self.num_new_observations += 1;
	}

	/// # Note a Match.
	fn observe_match(&mut self, length: u32) {
		let t = 8 + usize::from(5 <= length);
		self.new_observations[t] += 1;
		self.num_new_observations += 1;
	}

	/// # Should the Block End Here?
	///
	/// Compares the fresh observation distribution against the accumulated
	/// one; on a mismatch reports true, otherwise merges the fresh counts
	/// in and keeps going.
	fn should_end_block(&mut self) -> bool {
		if 0 < self.num_observations {
			// Cross-multiplied absolute distribution delta, in units of
			// num_new * num_observations.
			let mut total_delta = 0_u64;
			for i in 0..Self::NUM_OBSERVATION_TYPES {
				let expected = u64::from(self.observations[i]) * u64::from(self.num_new_observations);
				let actual = u64::from(self.new_observations[i]) * u64::from(self.num_observations);
				total_delta += expected.abs_diff(actual);
			}

			let threshold = u64::from(self.num_new_observations) * 7 / 8 *
				u64::from(self.num_observations);
			if threshold <= total_delta { return true; }
		}

		for i in 0..Self::NUM_OBSERVATION_TYPES {
			self.num_observations += self.new_observations[i];
			self.observations[i] += self.new_observations[i];
			self.new_observations[i] = 0;
		}
		self.num_new_observations = 0;
		false
	}
}


/// # Fast Base-2 Logarithm.
///
/// Polynomial approximation over the mantissa, good to a couple of
/// thousandths, which is plenty for cost modeling.
fn log2f_fast(x: f32) -> f32 {
	let bits = x.to_bits();
	let exponent = (((bits >> 23) & 0xFF) as i32 - 127) as f32;
	let mantissa = f32::from_bits((bits & !(0xFF << 23)) | (127 << 23));
	exponent - 1.653_124_f32 + mantissa * (1.994_181_2_f32 - mantissa * 0.334_749_02_f32)
}


/// # Scaled Cost of a Symbol With Probability `prob`.
///
/// Never less than one bit; fractional bits below that are unobtainable.
fn cost_for_probability(prob: f32) -> u32 {
	let cost = (-log2f_fast(prob) * BIT_COST as f32) as i32;
	cost.max(BIT_COST as i32) as u32
}


/// # Tally a Match's Main (and Maybe Length) Symbol.
///
/// Returns the main symbol so callers can stash it alongside the match.
fn tally_main_and_lensyms(
	freqs: &mut LzxFreqs,
	tabs: &OffsetSlotTabs,
	length: u32,
	adjusted_offset: u32,
) -> u32 {
	let offset_slot = tabs.get(adjusted_offset);
	let len_header =
		if LZX_MIN_SECONDARY_LEN <= length {
			freqs.len[(length - LZX_MIN_SECONDARY_LEN) as usize] += 1;
			LZX_NUM_PRIMARY_LENS
		}
		else { length - LZX_MIN_MATCH_LEN };
	let mainsym = LZX_NUM_CHARS as u32 + (LZX_NUM_LEN_HEADERS * offset_slot) as u32 + len_header;
	freqs.main[mainsym as usize] += 1;
	mainsym
}


/// # Longest Match at a Recent Offset.
///
/// Returns the length (zero if nothing of at least three bytes was found)
/// and the queue index it came from.
fn find_longest_repeat_offset_match(
	input: &[u8],
	pos: usize,
	recent_offsets: &[u32; LZX_NUM_RECENT_OFFSETS],
	max_len: u32,
) -> (u32, usize) {
	let mut best_len = 0_usize;
	let mut best_idx = 0_usize;
	if 3 <= max_len {
		for (idx, &offset) in recent_offsets.iter().enumerate() {
			let offset = offset as usize;
			if pos < offset { continue; }
			let m = pos - offset;
			if input[m..m + 3] != input[pos..pos + 3] { continue; }
			let len = lz_extend(input, m, pos, 3, max_len as usize);
			if best_len < len {
				best_len = len;
				best_idx = idx;
			}
		}
	}
	(best_len as u32, best_idx)
}


/// # Heuristic Score of an Explicit-Offset Match.
fn explicit_offset_match_score(len: u32, adjusted_offset: u32) -> u32 {
	len + u32::from(adjusted_offset < 4096) + u32::from(adjusted_offset < 256)
}


/// # Heuristic Score of a Repeat-Offset Match.
fn repeat_offset_match_score(rep_len: u32) -> u32 { rep_len + 3 }


/// # Compute Precode Items.
///
/// Turn `lens` into run-length-coded items over `prev_lens` deltas,
/// tallying precode symbol frequencies along the way. Each item holds the
/// precode symbol in its low five bits; symbols 17 and 18 carry a zero-run
/// extension above, and 19 a one-bit extension plus the delta symbol.
fn compute_precode_items(
	lens: &[u8],
	prev_lens: &[u8],
	precode_freqs: &mut [u32; LZX_PRECODE_NUM_SYMBOLS],
	precode_items: &mut [u32],
) -> usize {
	let num_lens = lens.len();
	let mut num_items = 0;
	let mut run_start = 0;
	while run_start != num_lens {
		let len = lens[run_start];
		let mut run_end = run_start;
		loop {
			run_end += 1;
			if run_end == num_lens || lens[run_end] != len { break; }
		}

		if len == 0 {
			while 20 <= run_end - run_start {
				let extra = (run_end - run_start - 20).min(0x1F) as u32;
				precode_freqs[18] += 1;
				precode_items[num_items] = 18 | (extra << 5);
				num_items += 1;
				run_start += 20 + extra as usize;
			}
			while 4 <= run_end - run_start {
				let extra = (run_end - run_start - 4).min(0xF) as u32;
				precode_freqs[17] += 1;
				precode_items[num_items] = 17 | (extra << 5);
				num_items += 1;
				run_start += 4 + extra as usize;
			}
		}
		else {
			while 4 <= run_end - run_start {
				let extra = u32::from(4 < run_end - run_start);
				let delta = u32::from(prev_lens[run_start].wrapping_sub(len)).wrapping_add(17) % 17;
				precode_freqs[19] += 1;
				precode_freqs[delta as usize] += 1;
				precode_items[num_items] = 19 | (extra << 5) | (delta << 6);
				num_items += 1;
				run_start += 4 + extra as usize;
			}
		}

		// Leftover positions become single delta symbols.
		while run_start != run_end {
			let delta = u32::from(prev_lens[run_start].wrapping_sub(len)).wrapping_add(17) % 17;
			precode_freqs[delta as usize] += 1;
			precode_items[num_items] = delta;
			num_items += 1;
			run_start += 1;
		}
	}
	num_items
}


/// # Write a Compressed Huffman Code.
///
/// Lengths go out delta-coded against `prev_lens` under a freshly built
/// precode, whose own 4-bit lengths lead.
fn write_compressed_code(os: &mut OutputBitstream, lens: &[u8], prev_lens: &[u8]) {
	let mut precode_freqs = [0_u32; LZX_PRECODE_NUM_SYMBOLS];
	let mut precode_items = [0_u32; LZX_MAINCODE_MAX_NUM_SYMBOLS];
	let num_items = compute_precode_items(lens, prev_lens, &mut precode_freqs, &mut precode_items);

	let mut precode_lens = [0_u8; LZX_PRECODE_NUM_SYMBOLS];
	let mut precode_codewords = [0_u32; LZX_PRECODE_NUM_SYMBOLS];
	make_canonical_code(
		LZX_PRECODE_NUM_SYMBOLS,
		PRE_CODEWORD_LIMIT,
		&precode_freqs,
		&mut precode_lens,
		&mut precode_codewords,
	);

	for &len in &precode_lens {
		os.write_bits(u32::from(len), LZX_PRECODE_ELEMENT_SIZE);
	}

	for &item in &precode_items[..num_items] {
		let presym = (item & 0x1F) as usize;
		os.write_bits(precode_codewords[presym], u32::from(precode_lens[presym]));
		if presym == 17 { os.write_bits(item >> 5, 4); }
		else if presym == 18 { os.write_bits(item >> 5, 5); }
		else if presym == 19 {
			os.write_bits((item >> 5) & 1, 1);
			let delta = (item >> 6) as usize;
			os.write_bits(precode_codewords[delta], u32::from(precode_lens[delta]));
		}
	}
}


/// # Write the Literal Runs and Matches.
fn write_sequences(
	os: &mut OutputBitstream,
	block_type: u32,
	block_data: &[u8],
	sequences: &[LzxSequence],
	codes: &LzxCodes,
) {
	let mut pos = 0;
	for seq in sequences {
		let litrunlen = (seq.litrunlen_and_matchlen >> SEQ_MATCHLEN_BITS) as usize;
		let matchlen = seq.litrunlen_and_matchlen & SEQ_MATCHLEN_MASK;

		for &lit in &block_data[pos..pos + litrunlen] {
			os.write_bits(
				codes.codewords.main[lit as usize],
				u32::from(codes.lens.main[lit as usize]),
			);
		}
		pos += litrunlen;

		// The final sequence carries no match.
		if matchlen == 0 { return; }

		let adjusted_offset = seq.adjusted_offset_and_mainsym >> SEQ_MAINSYM_BITS;
		let mainsym = (seq.adjusted_offset_and_mainsym & SEQ_MAINSYM_MASK) as usize;
		os.write_bits(codes.codewords.main[mainsym], u32::from(codes.lens.main[mainsym]));

		if LZX_MIN_SECONDARY_LEN <= matchlen {
			let lensym = (matchlen - LZX_MIN_SECONDARY_LEN) as usize;
			os.write_bits(codes.codewords.len[lensym], u32::from(codes.lens.len[lensym]));
		}

		let offset_slot = (mainsym - LZX_NUM_CHARS) / LZX_NUM_LEN_HEADERS;
		let num_extra_bits = u32::from(LZX_EXTRA_OFFSET_BITS[offset_slot]);
		let extra = adjusted_offset.wrapping_sub(
			(LZX_OFFSET_SLOT_BASE[offset_slot] + LZX_OFFSET_ADJUSTMENT as i32) as u32
		);
		if block_type == LZX_BLOCKTYPE_ALIGNED && LZX_NUM_ALIGNED_OFFSET_BITS <= num_extra_bits {
			// Everything but the aligned bits, then the aligned symbol.
			os.write_bits(
				extra >> LZX_NUM_ALIGNED_OFFSET_BITS,
				num_extra_bits - LZX_NUM_ALIGNED_OFFSET_BITS,
			);
			let sym = (adjusted_offset & LZX_ALIGNED_OFFSET_BITMASK) as usize;
			os.write_bits(codes.codewords.aligned[sym], u32::from(codes.lens.aligned[sym]));
		}
		else { os.write_bits(extra, num_extra_bits); }

		pos += matchlen as usize;
	}
}


/// # Write One Compressed Block.
#[expect(clippy::too_many_arguments, reason = "the alternative is a throwaway struct")]
fn write_compressed_block(
	os: &mut OutputBitstream,
	block_type: u32,
	block_data: &[u8],
	window_order: u32,
	num_main_syms: usize,
	sequences: &[LzxSequence],
	codes: &LzxCodes,
	prev_lens: &LzxLens,
) {
	os.write_bits(block_type, 3);

	// The default size gets a one-bit shorthand; anything else is spelled
	// out, 24 bits for the larger windows.
	let block_size = block_data.len() as u32;
	if block_size == LZX_DEFAULT_BLOCK_SIZE { os.write_bits(1, 1); }
	else {
		os.write_bits(0, 1);
		if 16 <= window_order { os.write_bits(block_size >> 16, 8); }
		os.write_bits(block_size & 0xFFFF, 16);
	}

	if block_type == LZX_BLOCKTYPE_ALIGNED {
		for &len in &codes.lens.aligned {
			os.write_bits(u32::from(len), LZX_ALIGNEDCODE_ELEMENT_SIZE);
		}
	}

	write_compressed_code(
		os,
		&codes.lens.main[..LZX_NUM_CHARS],
		&prev_lens.main[..LZX_NUM_CHARS],
	);
	write_compressed_code(
		os,
		&codes.lens.main[LZX_NUM_CHARS..num_main_syms],
		&prev_lens.main[LZX_NUM_CHARS..num_main_syms],
	);
	write_compressed_code(os, &codes.lens.len, &prev_lens.len);

	write_sequences(os, block_type, block_data, sequences, codes);
}


/// # Build the Block's Huffman Codes From Its Frequencies.
fn build_huffman_codes(freqs: &LzxFreqs, codes: &mut LzxCodes, num_main_syms: usize) {
	make_canonical_code(
		num_main_syms,
		MAIN_CODEWORD_LIMIT,
		&freqs.main[..num_main_syms],
		&mut codes.lens.main[..num_main_syms],
		&mut codes.codewords.main[..num_main_syms],
	);
	make_canonical_code(
		LZX_LENCODE_NUM_SYMBOLS,
		LENGTH_CODEWORD_LIMIT,
		&freqs.len,
		&mut codes.lens.len,
		&mut codes.codewords.len,
	);
	make_canonical_code(
		LZX_ALIGNEDCODE_NUM_SYMBOLS,
		ALIGNED_CODEWORD_LIMIT,
		&freqs.aligned,
		&mut codes.lens.aligned,
		&mut codes.codewords.aligned,
	);
}


/// # Verbatim or Aligned?
///
/// Aligned wins if the aligned code saves more on offset bits than its
/// eight transmitted lengths cost.
fn choose_verbatim_or_aligned(freqs: &LzxFreqs, codes: &LzxCodes) -> u32 {
	let mut verbatim_cost = 0;
	let mut aligned_cost = 0;
	for i in 0..LZX_ALIGNEDCODE_NUM_SYMBOLS {
		verbatim_cost += LZX_NUM_ALIGNED_OFFSET_BITS * freqs.aligned[i];
		aligned_cost += u32::from(codes.lens.aligned[i]) * freqs.aligned[i];
	}
	aligned_cost += LZX_ALIGNEDCODE_ELEMENT_SIZE * LZX_ALIGNEDCODE_NUM_SYMBOLS as u32;

	if aligned_cost < verbatim_cost { LZX_BLOCKTYPE_ALIGNED }
	else { LZX_BLOCKTYPE_VERBATIM }
}


/// # Finish and Write a Block.
#[expect(clippy::too_many_arguments, reason = "the alternative is a throwaway struct")]
fn flush_block(
	os: &mut OutputBitstream,
	codes: &mut [LzxCodes; 2],
	codes_index: &mut usize,
	freqs: &LzxFreqs,
	num_main_syms: usize,
	window_order: u32,
	block_data: &[u8],
	sequences: &[LzxSequence],
) {
	let [a, b] = codes;
	let (cur, prev) =
		if *codes_index == 0 { (a, b) }
		else { (b, a) };

	build_huffman_codes(freqs, cur, num_main_syms);
	let block_type = choose_verbatim_or_aligned(freqs, cur);
	write_compressed_block(
		os,
		block_type,
		block_data,
		window_order,
		num_main_syms,
		sequences,
		cur,
		&prev.lens,
	);

	// The code just used becomes the next block's "previous".
	*codes_index ^= 1;
}


/// # Seed the Cost Model Before Any Code Exists.
///
/// Literal costs blend each byte's observed frequency with a fitted prior;
/// match symbols share whatever probability mass the literals left behind.
fn set_default_costs(costs: &mut LzxCosts, freqs: &LzxFreqs, num_main_syms: usize) {
	let mut num_literals = 0_u32;
	let mut num_used_literals = 0_usize;
	for &f in &freqs.main[..LZX_NUM_CHARS] {
		num_literals += f;
		if f != 0 { num_used_literals += 1; }
	}
	let num_matches = freqs.main[LZX_NUM_CHARS];
	let inv_num_matches = 1.0 / num_matches as f32;
	let inv_num_items = 1.0 / (num_literals + num_matches) as f32;
	let base_literal_prob = f32::from(LITERAL_SCALED_PROBS[num_used_literals]) * (1.0 / 6870.0);

	let mut prob_match = 1.0_f32;
	for i in 0..LZX_NUM_CHARS {
		let freq = freqs.main[i];
		if freq == 0 { costs.main[i] = 11 * BIT_COST; }
		else {
			let prob = 0.5 * (freq as f32 * inv_num_items + base_literal_prob);
			costs.main[i] = cost_for_probability(prob);
			prob_match -= prob;
		}
	}
	prob_match = prob_match.max(0.15);

	let match_cost = cost_for_probability(
		prob_match / (num_main_syms - LZX_NUM_CHARS) as f32
	);
	for c in &mut costs.main[LZX_NUM_CHARS..num_main_syms] { *c = match_cost; }

	for i in 0..LZX_LENCODE_NUM_SYMBOLS {
		costs.len[i] = u32::from(DEFAULT_LEN_COSTS[i]);
	}

	// Aligned frequencies were tallied from un-adjusted offsets, two less
	// than the adjusted offsets these costs are indexed by.
	for i in 0..LZX_ALIGNEDCODE_NUM_SYMBOLS {
		let freq = freqs.aligned[
			(i + LZX_ALIGNEDCODE_NUM_SYMBOLS - LZX_OFFSET_ADJUSTMENT as usize) &
			LZX_ALIGNED_OFFSET_BITMASK as usize
		];
		costs.aligned[i] =
			if freq == 0 { 2 * LZX_NUM_ALIGNED_OFFSET_BITS * BIT_COST }
			else { cost_for_probability(freq as f32 * inv_num_matches) };
	}
}


/// # Update the Cost Model From Real Codeword Lengths.
///
/// Unused symbols are priced at the length limit rather than infinity so
/// the next pass may still discover them.
fn set_costs_from_codes(costs: &mut LzxCosts, lens: &LzxLens, num_main_syms: usize) {
	for i in 0..num_main_syms {
		let len = u32::from(lens.main[i]);
		costs.main[i] = BIT_COST * if len == 0 { MAIN_CODEWORD_LIMIT } else { len };
	}
	for i in 0..LZX_LENCODE_NUM_SYMBOLS {
		let len = u32::from(lens.len[i]);
		costs.len[i] = BIT_COST * if len == 0 { LENGTH_CODEWORD_LIMIT } else { len };
	}
	for i in 0..LZX_ALIGNEDCODE_NUM_SYMBOLS {
		let len = u32::from(lens.aligned[i]);
		costs.aligned[i] = BIT_COST * if len == 0 { ALIGNED_CODEWORD_LIMIT } else { len };
	}
}


/// # Fold Per-Length Match Costs.
///
/// For each offset slot, the total cost of a match of every length: main
/// symbol plus extra offset bits, plus the length symbol past the primary
/// lengths. Aligned slots exclude their three offset bits (the caller adds
/// the aligned symbol cost per offset).
fn compute_match_costs(costs: &mut LzxCosts, num_main_syms: usize) {
	let num_offset_slots = (num_main_syms - LZX_NUM_CHARS) / LZX_NUM_LEN_HEADERS;
	for slot in 0..num_offset_slots {
		let mut extra_cost = u32::from(LZX_EXTRA_OFFSET_BITS[slot]) * BIT_COST;
		if LZX_MIN_ALIGNED_OFFSET_SLOT <= slot {
			extra_cost -= LZX_NUM_ALIGNED_OFFSET_BITS * BIT_COST;
		}

		let main_base = LZX_NUM_CHARS + LZX_NUM_LEN_HEADERS * slot;
		for i in 0..LZX_NUM_PRIMARY_LENS as usize {
			costs.match_cost[slot][i] = (costs.main[main_base + i] + extra_cost) as u16;
		}
		extra_cost += costs.main[main_base + LZX_NUM_PRIMARY_LENS as usize];
		for i in LZX_NUM_PRIMARY_LENS as usize..LZX_NUM_LENS {
			costs.match_cost[slot][i] =
				(costs.len[i - LZX_NUM_PRIMARY_LENS as usize] + extra_cost) as u16;
		}
	}
}


/// # Minimum-Cost Path Through a Block.
///
/// Forward pass over the cached matches, relaxing the cheapest arrival at
/// every position. Repeat-offset arrivals win ties (`<=`) since they cost
/// fewer offset bits downstream; so do literals, which keep the queue
/// unchanged. Nodes may be written up to a match length past the block end;
/// those are never read back.
///
/// A "gap match" is also considered wherever the longest cached match can
/// resume at the same offset after one mismatching byte; the pre-gap match
/// is parked in `matches_before_gap` (and later in the preceding node's
/// spent `cost` field) for the backward walk to recover.
///
/// Returns the recent-offsets queue as of the end of the block.
#[expect(clippy::too_many_arguments, reason = "the alternative is a throwaway struct")]
fn find_min_cost_path(
	input: &[u8],
	block_begin: usize,
	block_size: usize,
	match_cache: &[LzMatch],
	costs: &LzxCosts,
	tabs: &OffsetSlotTabs,
	optimum_nodes: &mut [OptimumNode],
	initial_queue: LruQueue,
) -> LruQueue {
	let block_end = block_begin + block_size;

	for node in &mut optimum_nodes[..=block_size] {
		node.cost = u32::MAX;
		node.item = u32::MAX;
	}
	// Node zero keeps its all-ones item as the walk's terminator.
	optimum_nodes[0].cost = 0;

	let mut queues = [LruQueue(0); OPTIMUM_QUEUE_LEN];
	queues[0] = initial_queue;
	let mut matches_before_gap = [0_u32; OPTIMUM_QUEUE_LEN];

	let mut cp = 0;
	for cur in 0..block_size {
		let in_next = block_begin + cur;
		let cur_cost = optimum_nodes[cur].cost;
		let num_matches = match_cache[cp].length as usize;
		cp += 1;

		if 0 < num_matches {
			let end_matches = cp + num_matches;
			let max_len = (block_end - in_next).min(LZX_MAX_MATCH_LEN as usize) as u32;
			let mut next_len = LZX_MIN_MATCH_LEN;
			let queue = queues[cur % OPTIMUM_QUEUE_LEN];

			'done_matches: {
				// Repeat offsets, shortest first. Each queue slot only
				// needs to improve on the lengths already covered, so one
				// extra byte comparison per step suffices.
				'r0: {
					let r = queue.offset(0) as usize;
					if in_next < r { break 'r0; }
					let mp = in_next - r;
					if input[mp..mp + 2] != input[in_next..in_next + 2] { break 'r0; }
					loop {
						let cost = cur_cost + u32::from(
							costs.match_cost[0][(next_len - LZX_MIN_MATCH_LEN) as usize]
						);
						let node = &mut optimum_nodes[cur + next_len as usize];
						if cost <= node.cost {
							node.cost = cost;
							node.item = next_len;
						}
						next_len += 1;
						if max_len < next_len {
							cp = end_matches;
							break 'done_matches;
						}
						if input[mp + next_len as usize - 1] != input[in_next + next_len as usize - 1] {
							break;
						}
					}
				}
				'r1: {
					let r = queue.offset(1) as usize;
					if in_next < r { break 'r1; }
					let mp = in_next - r;
					if input[mp..mp + 2] != input[in_next..in_next + 2] { break 'r1; }
					if input[mp + next_len as usize - 1] != input[in_next + next_len as usize - 1] {
						break 'r1;
					}
					for len in 2..next_len as usize - 1 {
						if input[mp + len] != input[in_next + len] { break 'r1; }
					}
					loop {
						let cost = cur_cost + u32::from(
							costs.match_cost[1][(next_len - LZX_MIN_MATCH_LEN) as usize]
						);
						let node = &mut optimum_nodes[cur + next_len as usize];
						if cost <= node.cost {
							node.cost = cost;
							node.item = (1 << OPTIMUM_OFFSET_SHIFT) | next_len;
						}
						next_len += 1;
						if max_len < next_len {
							cp = end_matches;
							break 'done_matches;
						}
						if input[mp + next_len as usize - 1] != input[in_next + next_len as usize - 1] {
							break;
						}
					}
				}
				'r2: {
					let r = queue.offset(2) as usize;
					if in_next < r { break 'r2; }
					let mp = in_next - r;
					if input[mp..mp + 2] != input[in_next..in_next + 2] { break 'r2; }
					if input[mp + next_len as usize - 1] != input[in_next + next_len as usize - 1] {
						break 'r2;
					}
					for len in 2..next_len as usize - 1 {
						if input[mp + len] != input[in_next + len] { break 'r2; }
					}
					loop {
						let cost = cur_cost + u32::from(
							costs.match_cost[2][(next_len - LZX_MIN_MATCH_LEN) as usize]
						);
						let node = &mut optimum_nodes[cur + next_len as usize];
						if cost <= node.cost {
							node.cost = cost;
							node.item = (2 << OPTIMUM_OFFSET_SHIFT) | next_len;
						}
						next_len += 1;
						if max_len < next_len {
							cp = end_matches;
							break 'done_matches;
						}
						if input[mp + next_len as usize - 1] != input[in_next + next_len as usize - 1] {
							break;
						}
					}
				}

				// Explicit-offset matches no longer than the repeats have
				// nothing left to offer.
				while match_cache[cp].length < next_len {
					cp += 1;
					if cp == end_matches { break 'done_matches; }
				}

				loop {
					let offset = match_cache[cp].offset;
					let adjusted_offset = offset + LZX_OFFSET_ADJUSTMENT;
					let offset_slot = tabs.get(adjusted_offset);
					let mut base_cost = cur_cost;
					if LZX_MIN_ALIGNED_OFFSET <= offset {
						base_cost += costs.aligned[
							(adjusted_offset & LZX_ALIGNED_OFFSET_BITMASK) as usize
						];
					}
					let mut cost;
					loop {
						cost = base_cost + u32::from(
							costs.match_cost[offset_slot][(next_len - LZX_MIN_MATCH_LEN) as usize]
						);
						let node = &mut optimum_nodes[cur + next_len as usize];
						if cost < node.cost {
							node.cost = cost;
							node.item = (adjusted_offset << OPTIMUM_OFFSET_SHIFT) | next_len;
						}
						next_len += 1;
						if match_cache[cp].length < next_len { break; }
					}
					cp += 1;
					if cp != end_matches { continue; }

					// The longest match may resume at the same offset
					// after one mismatching byte.
					let remaining = (block_end - in_next) as i64 - i64::from(next_len);
					if 2 <= remaining {
						let strptr = in_next + next_len as usize;
						let mp = strptr - offset as usize;
						if input[mp..mp + 2] == input[strptr..strptr + 2] {
							let limit = (remaining as usize)
								.min(OPTIMUM_QUEUE_LEN - LZX_MAX_MATCH_LEN as usize - 2)
								.min(LZX_MAX_MATCH_LEN as usize);
							let rep0_len = lz_extend(input, mp, strptr, 2, limit) as u32;
							let lit = input[strptr - 1];
							let gap_cost = cost + costs.main[lit as usize] + u32::from(
								costs.match_cost[0][(rep0_len - LZX_MIN_MATCH_LEN) as usize]
							);
							let total = cur + (next_len + rep0_len) as usize;
							let node = &mut optimum_nodes[total];
							if gap_cost < node.cost {
								node.cost = gap_cost;
								node.item = OPTIMUM_GAP_MATCH |
									(u32::from(lit) << OPTIMUM_OFFSET_SHIFT) | rep0_len;
								matches_before_gap[total % OPTIMUM_QUEUE_LEN] =
									(adjusted_offset << OPTIMUM_OFFSET_SHIFT) | (next_len - 1);
							}
						}
					}
					break;
				}
			}
		}

		// A literal step; ties favor it, keeping the queue unchanged.
		let literal = input[in_next];
		let lit_cost = cur_cost + costs.main[literal as usize];
		let nxt = cur + 1;
		if lit_cost <= optimum_nodes[nxt].cost {
			optimum_nodes[nxt].cost = lit_cost;
			optimum_nodes[nxt].item = u32::from(literal) << OPTIMUM_OFFSET_SHIFT;
			queues[nxt % OPTIMUM_QUEUE_LEN] = queues[cur % OPTIMUM_QUEUE_LEN];
		}
		else {
			// A match arrives here instead; reconstruct its queue.
			let item = optimum_nodes[nxt].item;
			let len = (item & OPTIMUM_LEN_MASK) as usize;
			let adjusted_offset = (item as i32) >> OPTIMUM_OFFSET_SHIFT;
			if 3 <= adjusted_offset {
				queues[nxt % OPTIMUM_QUEUE_LEN] = queues[(nxt - len) % OPTIMUM_QUEUE_LEN]
					.push(adjusted_offset as u32 - LZX_OFFSET_ADJUSTMENT);
			}
			else if adjusted_offset < 0 {
				// Gap arrival. Park the pre-gap match where the walk will
				// look for it, and replay both pushes against the queue
				// from before the whole construct.
				let mbg = matches_before_gap[nxt % OPTIMUM_QUEUE_LEN];
				optimum_nodes[nxt - 1].cost = mbg;
				queues[nxt % OPTIMUM_QUEUE_LEN] = queues[
					(nxt - len - 1 - (mbg & OPTIMUM_LEN_MASK) as usize) % OPTIMUM_QUEUE_LEN
				].push((mbg >> OPTIMUM_OFFSET_SHIFT) - LZX_OFFSET_ADJUSTMENT);
			}
			else {
				queues[nxt % OPTIMUM_QUEUE_LEN] = queues[(nxt - len) % OPTIMUM_QUEUE_LEN]
					.swap(adjusted_offset as usize);
			}
		}
	}

	queues[block_size % OPTIMUM_QUEUE_LEN]
}


/// # Walk the Chosen Path Backward.
///
/// Tallies symbol frequencies along the minimum-cost path, and when
/// `record` is set also emits the sequences, filling `chosen_sequences`
/// from the back. Returns the index of the first sequence written.
fn walk_item_list(
	optimum_nodes: &[OptimumNode],
	block_size: usize,
	freqs: &mut LzxFreqs,
	tabs: &OffsetSlotTabs,
	chosen_sequences: &mut [LzxSequence],
	record: bool,
) -> usize {
	let mut si = chosen_sequences.len() - 1;
	let mut node_idx = block_size;
	let mut litrun_end = node_idx;
	if record {
		// The final sequence is a bare literal run.
		chosen_sequences[si].litrunlen_and_matchlen = 0;
	}

	loop {
		// Literals, until a match or the block start. Node zero's item is
		// all ones, which reads as a gap match.
		let mut item = optimum_nodes[node_idx].item;
		while item & OPTIMUM_LEN_MASK == 0 {
			freqs.main[(item >> OPTIMUM_OFFSET_SHIFT) as usize] += 1;
			node_idx -= 1;
			item = optimum_nodes[node_idx].item;
		}

		if item & OPTIMUM_GAP_MATCH != 0 {
			if node_idx == 0 { break; }

			// The repeat half of a gap match, then its bridging literal.
			let matchlen = item & OPTIMUM_LEN_MASK;
			let mainsym = tally_main_and_lensyms(freqs, tabs, matchlen, 0);
			if record {
				chosen_sequences[si].litrunlen_and_matchlen |=
					((litrun_end - node_idx) as u32) << SEQ_MATCHLEN_BITS;
				si -= 1;
				chosen_sequences[si].litrunlen_and_matchlen = matchlen;
				chosen_sequences[si].adjusted_offset_and_mainsym = mainsym;
				litrun_end = node_idx - matchlen as usize;
			}
			freqs.main[((item >> OPTIMUM_OFFSET_SHIFT) as u8) as usize] += 1;
			node_idx -= 1;

			// The pre-gap match was parked in this node's spent cost.
			item = optimum_nodes[node_idx].cost;
			node_idx -= matchlen as usize;
		}

		let matchlen = item & OPTIMUM_LEN_MASK;
		let adjusted_offset = item >> OPTIMUM_OFFSET_SHIFT;
		let mainsym = tally_main_and_lensyms(freqs, tabs, matchlen, adjusted_offset);
		if LZX_MIN_ALIGNED_OFFSET + LZX_OFFSET_ADJUSTMENT <= adjusted_offset {
			freqs.aligned[(adjusted_offset & LZX_ALIGNED_OFFSET_BITMASK) as usize] += 1;
		}
		if record {
			chosen_sequences[si].litrunlen_and_matchlen |=
				((litrun_end - node_idx) as u32) << SEQ_MATCHLEN_BITS;
			si -= 1;
			chosen_sequences[si].litrunlen_and_matchlen = matchlen;
			chosen_sequences[si].adjusted_offset_and_mainsym =
				(adjusted_offset << SEQ_MAINSYM_BITS) | mainsym;
			litrun_end = node_idx - matchlen as usize;
		}
		node_idx -= matchlen as usize;
	}

	if record {
		chosen_sequences[si].litrunlen_and_matchlen |=
			((litrun_end - node_idx) as u32) << SEQ_MATCHLEN_BITS;
	}
	si
}


/// # Lazy Parser: Choose a Literal.
fn lazy_choose_literal(
	literal: u8,
	freqs: &mut LzxFreqs,
	split_stats: &mut BlockSplitStats,
	litrunlen: &mut u32,
) {
	split_stats.observe_literal(literal);
	freqs.main[literal as usize] += 1;
	*litrunlen += 1;
}


/// # Lazy Parser: Choose a Match.
///
/// Tallies its symbols, appends the sequence, and rotates the recent
/// offsets queue.
#[expect(clippy::too_many_arguments, reason = "the alternative is a throwaway struct")]
fn lazy_choose_match(
	length: u32,
	adjusted_offset: u32,
	recent_offsets: &mut [u32; LZX_NUM_RECENT_OFFSETS],
	freqs: &mut LzxFreqs,
	split_stats: &mut BlockSplitStats,
	tabs: &OffsetSlotTabs,
	chosen_sequences: &mut [LzxSequence],
	seq_idx: &mut usize,
	litrunlen: &mut u32,
) {
	split_stats.observe_match(length);
	let mainsym = tally_main_and_lensyms(freqs, tabs, length, adjusted_offset);
	chosen_sequences[*seq_idx].litrunlen_and_matchlen =
		(*litrunlen << SEQ_MATCHLEN_BITS) | length;
	chosen_sequences[*seq_idx].adjusted_offset_and_mainsym =
		(adjusted_offset << SEQ_MAINSYM_BITS) | mainsym;
	*seq_idx += 1;

	if (adjusted_offset as usize) < LZX_NUM_RECENT_OFFSETS {
		recent_offsets.swap(0, adjusted_offset as usize);
	}
	else {
		if LZX_MIN_ALIGNED_OFFSET + LZX_OFFSET_ADJUSTMENT <= adjusted_offset {
			freqs.aligned[(adjusted_offset & LZX_ALIGNED_OFFSET_BITMASK) as usize] += 1;
		}
		recent_offsets[2] = recent_offsets[1];
		recent_offsets[1] = recent_offsets[0];
		recent_offsets[0] = adjusted_offset - LZX_OFFSET_ADJUSTMENT;
	}

	*litrunlen = 0;
}



/// # Parser Flavor (and Its Working Memory).
enum LzxParser<P: MfPos> {
	/// # Lazy, for the Fast Levels.
	Lazy {
		/// # Hash-Chain Matchfinder.
		mf: HcMatchFinder<P>,
	},

	/// # Near-Optimal, for the Rest.
	NearOptimal {
		/// # Binary-Tree Matchfinder.
		mf: BtMatchFinder<P>,

		/// # Cached Matches (Headers Interleaved).
		match_cache: Vec<LzMatch>,

		/// # Cost-Path Nodes.
		optimum_nodes: Vec<OptimumNode>,

		/// # Cost Model.
		costs: Box<LzxCosts>,
	},
}


/// # LZX Compressor State.
struct LzxState<P: MfPos> {
	/// # Preprocessed Input Copy.
	in_buffer: Vec<u8>,

	/// # Window Order.
	window_order: u32,

	/// # Main Code Size.
	num_main_syms: usize,

	/// # Stop Searching Past This Length.
	nice_match_length: u32,

	/// # Matchfinder Search Depth.
	max_search_depth: u32,

	/// # Cost-Refinement Passes Per Block.
	num_optim_passes: u32,

	/// # Block Symbol Frequencies.
	freqs: LzxFreqs,

	/// # Block-Split Statistics.
	split_stats: BlockSplitStats,

	/// # Current and Previous Huffman Codes.
	codes: Box<[LzxCodes; 2]>,

	/// # Which of `codes` Is Current.
	codes_index: usize,

	/// # Chosen Sequences.
	chosen_sequences: Box<[LzxSequence]>,

	/// # Offset Slot Lookup.
	offset_slot_tabs: OffsetSlotTabs,

	/// # Parser.
	parser: LzxParser<P>,
}

impl<P: MfPos> LzxState<P> {
	/// # New State.
	///
	/// `window_order` must already be validated against `max_bufsize`.
	fn new(max_bufsize: usize, window_order: u32, compression_level: u32) -> Self {
		let num_main_syms = lzx_get_num_main_syms(window_order);

		let (parser, nice_match_length, max_search_depth, num_optim_passes) =
			if compression_level <= MAX_FAST_LEVEL {
				(
					LzxParser::Lazy { mf: HcMatchFinder::new(max_bufsize) },
					(80 * compression_level) / 20,
					((60 * compression_level) / 20).max(2),
					1,
				)
			}
			else {
				let num_optim_passes = 1 +
					u32::from(45 <= compression_level) +
					u32::from(70 <= compression_level) +
					u32::from(100 <= compression_level) +
					u32::from(150 <= compression_level) +
					u32::from(200 <= compression_level) +
					u32::from(300 <= compression_level);
				(
					LzxParser::NearOptimal {
						mf: BtMatchFinder::new(max_bufsize, true),
						match_cache: Vec::with_capacity(
							CACHE_LENGTH + LZX_MAX_MATCH_LEN as usize + 1
						),
						optimum_nodes: vec![
							OptimumNode { cost: 0, item: 0 };
							NUM_OPTIM_NODES
						],
						costs: Box::new(LzxCosts::new()),
					},
					(48 * compression_level) / 50,
					((24 * compression_level) / 50).max(1),
					num_optim_passes,
				)
			};

		Self {
			in_buffer: Vec::with_capacity(max_bufsize),
			window_order,
			num_main_syms,
			nice_match_length,
			max_search_depth,
			num_optim_passes,
			freqs: LzxFreqs::new(),
			split_stats: BlockSplitStats::new(),
			codes: Box::new([LzxCodes::new(), LzxCodes::new()]),
			codes_index: 0,
			chosen_sequences: vec![LzxSequence::default(); NUM_SEQS].into_boxed_slice(),
			offset_slot_tabs: OffsetSlotTabs::new(),
			parser,
		}
	}

	/// # Compress.
	///
	/// Returns the compressed size, or zero if the data did not fit the
	/// output buffer (or was too short to be worth trying).
	fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
		if input.len() < 64 { return 0; }

		self.in_buffer.clear();
		self.in_buffer.extend_from_slice(input);
		lzx_preprocess(&mut self.in_buffer);

		// The first block's delta coding runs against all-zero lengths.
		self.codes_index = 0;
		self.codes[1].lens = LzxLens::new();

		let mut os = OutputBitstream::new(output);
		if matches!(self.parser, LzxParser::Lazy { .. }) {
			self.compress_lazy(&mut os);
		}
		else { self.compress_near_optimal(&mut os); }
		os.flush()
	}

	/// # Lazy Parse and Flush, Block by Block.
	///
	/// Chooses matches greedily but peeks one position ahead before
	/// committing, preferring repeat offsets throughout.
	fn compress_lazy(&mut self, os: &mut OutputBitstream) {
		let input = mem::take(&mut self.in_buffer);
		let LzxParser::Lazy { ref mut mf } = self.parser else { unreachable!(); };
		mf.init();

		let in_end = input.len();
		let mut in_next = 0;
		let mut max_len = LZX_MAX_MATCH_LEN;
		let mut nice_len = self.nice_match_length.min(max_len);
		let mut recent_offsets = LZX_RECENT_OFFSETS_INIT;

		while in_next != in_end {
			let in_block_begin = in_next;
			let in_max_block_end = in_next + SOFT_MAX_BLOCK_SIZE.min(in_end - in_next);
			let mut seq_idx = 0;
			let mut litrunlen = 0_u32;
			self.freqs.reset();
			self.split_stats.init();

			loop {
				if (in_end - in_next) < max_len as usize {
					max_len = (in_end - in_next) as u32;
					nice_len = nice_len.min(max_len);
				}

				// Length-2 matches aren't worth chasing here.
				let cur = mf.longest_match(
					&input, in_next, 2, max_len, nice_len, self.max_search_depth,
				);
				let mut cur_len = cur.length;
				let cur_offset = cur.offset;

				if cur_len < 3 ||
					(cur_len == 3 &&
					 8192 - LZX_OFFSET_ADJUSTMENT <= cur_offset &&
					 cur_offset != recent_offsets[0] &&
					 cur_offset != recent_offsets[1] &&
					 cur_offset != recent_offsets[2])
				{
					// Nothing found, or only a distant short match.
					lazy_choose_literal(
						input[in_next],
						&mut self.freqs, &mut self.split_stats, &mut litrunlen,
					);
					in_next += 1;
				}
				else {
					let mut cur_adjusted;
					let skip_len;

					'choose: {
						// The most recent offset gets taken on sight.
						if cur_offset == recent_offsets[0] {
							in_next += 1;
							cur_adjusted = 0;
							skip_len = cur_len - 1;
							break 'choose;
						}

						cur_adjusted = cur_offset + LZX_OFFSET_ADJUSTMENT;
						let mut cur_score =
							explicit_offset_match_score(cur_len, cur_adjusted);

						// A repeat match scoring at least as well wins.
						let (rep_len, rep_idx) = find_longest_repeat_offset_match(
							&input, in_next, &recent_offsets, max_len,
						);
						in_next += 1;
						if rep_len != 0 &&
							cur_score <= repeat_offset_match_score(rep_len)
						{
							cur_len = rep_len;
							cur_adjusted = rep_idx as u32;
							skip_len = cur_len - 1;
							break 'choose;
						}

						loop {
							// Long enough; stop second-guessing.
							if nice_len <= cur_len {
								skip_len = cur_len - 1;
								break 'choose;
							}

							if (in_end - in_next) < max_len as usize {
								max_len = (in_end - in_next) as u32;
								nice_len = nice_len.min(max_len);
							}

							// Peek ahead for something better.
							let next = mf.longest_match(
								&input, in_next, cur_len - 2,
								max_len, nice_len, self.max_search_depth / 2,
							);
							if next.length <= cur_len - 2 {
								in_next += 1;
								skip_len = cur_len - 2;
								break 'choose;
							}

							let next_adjusted = next.offset + LZX_OFFSET_ADJUSTMENT;
							let next_score =
								explicit_offset_match_score(next.length, next_adjusted);
							let (rep_len, rep_idx) = find_longest_repeat_offset_match(
								&input, in_next, &recent_offsets, max_len,
							);
							in_next += 1;
							if rep_len != 0 &&
								next_score <= repeat_offset_match_score(rep_len)
							{
								if cur_score < repeat_offset_match_score(rep_len) {
									// Better, and a repeat: literal, then it.
									lazy_choose_literal(
										input[in_next - 2],
										&mut self.freqs, &mut self.split_stats,
										&mut litrunlen,
									);
									cur_len = rep_len;
									cur_adjusted = rep_idx as u32;
									skip_len = cur_len - 1;
									break 'choose;
								}
							}
							else if cur_score < next_score {
								// Better, and explicit: literal, then
								// reconsider from the new position.
								lazy_choose_literal(
									input[in_next - 2],
									&mut self.freqs, &mut self.split_stats,
									&mut litrunlen,
								);
								cur_len = next.length;
								cur_adjusted = next_adjusted;
								cur_score = next_score;
								continue;
							}

							// The original match stands.
							skip_len = cur_len - 2;
							break 'choose;
						}
					}

					lazy_choose_match(
						cur_len, cur_adjusted, &mut recent_offsets,
						&mut self.freqs, &mut self.split_stats,
						&self.offset_slot_tabs,
						&mut self.chosen_sequences, &mut seq_idx, &mut litrunlen,
					);
					mf.skip_bytes(&input, in_next, skip_len as usize);
					in_next += skip_len as usize;
				}

				if in_max_block_end <= in_next { break; }
				if NUM_OBSERVATIONS_PER_BLOCK_CHECK <= self.split_stats.num_new_observations &&
					MIN_BLOCK_SIZE <= in_next - in_block_begin &&
					MIN_BLOCK_SIZE <= in_end - in_next &&
					self.split_stats.should_end_block()
				{ break; }
			}

			// The final, match-less sequence, then out it all goes.
			self.chosen_sequences[seq_idx].litrunlen_and_matchlen =
				litrunlen << SEQ_MATCHLEN_BITS;
			flush_block(
				os,
				&mut self.codes,
				&mut self.codes_index,
				&self.freqs,
				self.num_main_syms,
				self.window_order,
				&input[in_block_begin..in_next],
				&self.chosen_sequences[..=seq_idx],
			);
		}

		self.in_buffer = input;
	}

	/// # Near-Optimal Parse and Flush, Block by Block.
	///
	/// Streams the buffer through the matchfinder in pause-point intervals,
	/// caching everything found, then hands each finished block to the
	/// cost-path optimizer.
	fn compress_near_optimal(&mut self, os: &mut OutputBitstream) {
		let input = mem::take(&mut self.in_buffer);
		if let LzxParser::NearOptimal { mf, .. } = &mut self.parser { mf.init(); }

		let in_end = input.len();
		let mut in_next = 0;
		let mut max_len = LZX_MAX_MATCH_LEN;
		let mut nice_len = self.nice_match_length.min(max_len);
		let mut queue = LruQueue::new();

		while in_next != in_end {
			let in_block_begin = in_next;
			let in_max_block_end = in_next + SOFT_MAX_BLOCK_SIZE.min(in_end - in_next);
			let mut next_search_pos = in_next;
			let mut next_observation = in_next;
			let mut next_pause_point =
				(in_next + MIN_BLOCK_SIZE.min(in_max_block_end - in_next)).min(
					in_max_block_end -
					(LZX_MAX_MATCH_LEN as usize - 1).min(in_max_block_end - in_next)
				);

			self.split_stats.init();
			self.freqs.reset();

			{
				let LzxParser::NearOptimal { ref mut mf, ref mut match_cache, .. } =
					self.parser else { unreachable!(); };
				match_cache.clear();

				let mut first = true;
				loop {
					if !(first && next_pause_point <= in_next) {
						// Matchfind until the pause point.
						loop {
							if next_search_pos <= in_next {
								let header_idx = match_cache.len();
								match_cache.push(LzMatch { length: 0, offset: 0 });
								mf.get_matches(
									&input, in_next, max_len, nice_len,
									self.max_search_depth, match_cache,
								);
								let num = match_cache.len() - header_idx - 1;
								match_cache[header_idx].length = num as u32;
								let best_len =
									if 0 < num { match_cache[match_cache.len() - 1].length }
									else { 0 };

								// Statistics feed both the block splitter
								// and the initial cost model. Offset
								// adjustment and repeat detection wait
								// until the real tally.
								if next_observation <= in_next {
									if 3 <= best_len {
										let best = match_cache[match_cache.len() - 1];
										self.freqs.aligned[
											(best.offset & LZX_ALIGNED_OFFSET_BITMASK) as usize
										] += 1;
										self.freqs.main[LZX_NUM_CHARS] += 1;
										self.split_stats.observe_match(best_len);
										next_observation = in_next + best_len as usize;
									}
									else {
										self.freqs.main[input[in_next] as usize] += 1;
										self.split_stats.observe_literal(input[in_next]);
										next_observation = in_next + 1;
									}
								}

								// Skip the bytes a long match covers; the
								// data is compressible enough without them.
								if nice_len <= best_len {
									next_search_pos = in_next + best_len as usize;
								}
							}
							else {
								mf.skip_position(
									&input, in_next, max_len, nice_len,
									self.max_search_depth,
								);
								match_cache.push(LzMatch { length: 0, offset: 0 });
							}

							in_next += 1;
							if next_pause_point <= in_next ||
								CACHE_LENGTH <= match_cache.len()
							{ break; }
						}
					}
					first = false;

					// Pause: check for the end of the buffer, where the
					// last few unmatched positions get empty entries.
					if (in_end - in_next) < max_len as usize {
						max_len = (in_end - in_next) as u32;
						nice_len = nice_len.min(max_len);
						if max_len < 5 {
							while in_next != in_end {
								match_cache.push(LzMatch { length: 0, offset: 0 });
								in_next += 1;
							}
						}
					}

					if CACHE_LENGTH <= match_cache.len() { break; }
					if in_max_block_end <= in_next { break; }
					if NUM_OBSERVATIONS_PER_BLOCK_CHECK <=
							self.split_stats.num_new_observations &&
						MIN_BLOCK_SIZE <= in_max_block_end - in_next &&
						self.split_stats.should_end_block()
					{ break; }

					next_pause_point = (
						in_next +
						((NUM_OBSERVATIONS_PER_BLOCK_CHECK as usize * 2)
							.checked_sub(self.split_stats.num_new_observations as usize)
							.unwrap_or(usize::MAX))
							.min(in_max_block_end - in_next)
					).min(
						in_max_block_end -
						(LZX_MAX_MATCH_LEN as usize - 1).min(in_max_block_end - in_next)
					);
				}
			}

			queue = self.optimize_and_flush_block(
				os, &input, in_block_begin, in_next - in_block_begin, queue,
			);
		}

		self.in_buffer = input;
	}

	/// # Optimize and Flush One Block.
	///
	/// Iterates cost-path search and code rebuilding `num_optim_passes`
	/// times, then records the final path's sequences and writes the block.
	/// Returns the recent-offsets queue as of the block's end.
	fn optimize_and_flush_block(
		&mut self,
		os: &mut OutputBitstream,
		input: &[u8],
		block_begin: usize,
		block_size: usize,
		initial_queue: LruQueue,
	) -> LruQueue {
		let Self {
			ref mut parser,
			ref mut freqs,
			ref mut chosen_sequences,
			ref mut codes,
			ref mut codes_index,
			ref offset_slot_tabs,
			num_main_syms,
			window_order,
			num_optim_passes,
			..
		} = *self;
		let LzxParser::NearOptimal {
			ref match_cache,
			ref mut optimum_nodes,
			ref mut costs,
			..
		} = *parser else { unreachable!(); };

		set_default_costs(costs, freqs, num_main_syms);
		let mut passes = num_optim_passes;
		let new_queue = loop {
			compute_match_costs(costs, num_main_syms);
			let q = find_min_cost_path(
				input, block_begin, block_size, match_cache,
				costs, offset_slot_tabs, optimum_nodes, initial_queue,
			);
			passes -= 1;
			if passes == 0 { break q; }

			// Rebuild the codes from this path's symbol usage and try
			// again with the refined costs.
			freqs.reset();
			walk_item_list(
				optimum_nodes, block_size, freqs, offset_slot_tabs,
				chosen_sequences, false,
			);
			build_huffman_codes(freqs, &mut codes[*codes_index], num_main_syms);
			set_costs_from_codes(costs, &codes[*codes_index].lens, num_main_syms);
		};

		freqs.reset();
		let seq_idx = walk_item_list(
			optimum_nodes, block_size, freqs, offset_slot_tabs,
			chosen_sequences, true,
		);
		flush_block(
			os,
			codes,
			codes_index,
			freqs,
			num_main_syms,
			window_order,
			&input[block_begin..block_begin + block_size],
			&chosen_sequences[seq_idx..],
		);
		new_queue
	}
}



/// # Position-Width Dispatch.
enum Inner {
	/// # Buffers to 32 KiB.
	Pos16(Box<LzxState<u16>>),

	/// # Larger Buffers.
	Pos32(Box<LzxState<u32>>),
}


/// # LZX Compressor.
pub(crate) struct LzxCompressor(Inner);

impl LzxCompressor {
	/// # New Compressor.
	///
	/// `max_bufsize` must fit a valid window order (at most 2 MiB).
	pub(crate) fn new(max_bufsize: usize, compression_level: u32) -> Result<Self, WimError> {
		let window_order = lzx_get_window_order(max_bufsize).ok_or(WimError::Param)?;
		if max_bufsize <= 32_768 {
			Ok(Self(Inner::Pos16(Box::new(
				LzxState::new(max_bufsize, window_order, compression_level)
			))))
		}
		else {
			Ok(Self(Inner::Pos32(Box::new(
				LzxState::new(max_bufsize, window_order, compression_level)
			))))
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
	use crate::lzx::LzxDecompressor;

	/// # Round Trip at a Given Level.
	fn roundtrip(data: &[u8], level: u32) {
		let mut c = LzxCompressor::new(data.len(), level).unwrap();
		let mut compressed = vec![0_u8; data.len() + 4096];
		let n = c.compress(data, &mut compressed);
		assert!(n != 0, "expected compressible input");

		let mut d = LzxDecompressor::new(data.len()).unwrap();
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
		// Both sides of the lazy/near-optimal split, and a multi-pass level.
		for level in [1, 20, 35, 50, 80] {
			roundtrip(&data, level);
		}
	}

	#[test]
	fn t_roundtrip_zeroes() {
		// Large enough for 32-bit matchfinder positions and the wide
		// block-size field.
		roundtrip(&vec![0_u8; 100_000], 50);
		roundtrip(&vec![0_u8; 100_000], 20);
	}

	#[test]
	fn t_roundtrip_small_window() {
		let mut data = Vec::new();
		let mut state = 0x9E37_79B9_u32;
		while data.len() < 30_000 {
			state = state.wrapping_mul(747_796_405).wrapping_add(1);
			let chunk = [(state >> 24) as u8, (state >> 16) as u8];
			data.extend_from_slice(&chunk);
			data.extend_from_slice(b"abcabcabcabc");
		}
		roundtrip(&data, 40);
		roundtrip(&data, 70);
	}

	#[test]
	fn t_roundtrip_call_instructions() {
		// Exercise the E8 translation on both ends.
		let mut data = Vec::new();
		while data.len() < 10_000 {
			data.extend_from_slice(&[0x55, 0x89, 0xE5, 0xE8]);
			let target = (data.len() as u32).wrapping_mul(0x0101).to_le_bytes();
			data.extend_from_slice(&target);
			data.extend_from_slice(&[0x5D, 0xC3, 0x90, 0x90]);
		}
		roundtrip(&data, 50);
	}

	#[test]
	fn t_tiny_input_refused() {
		let mut c = LzxCompressor::new(32_768, 50).unwrap();
		let mut out = [0_u8; 1024];
		assert_eq!(c.compress(b"not worth the header overhead", &mut out), 0);
	}

	#[test]
	fn t_incompressible_returns_zero() {
		// A pseudo-random buffer with a tight output budget can't win.
		let mut data = vec![0_u8; 4096];
		let mut state = 0x2545_F491_4F6C_DD1D_u64;
		for b in &mut data {
			state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
			*b = (state >> 56) as u8;
		}
		let mut c = LzxCompressor::new(data.len(), 50).unwrap();
		let mut out = vec![0_u8; 2048];
		assert_eq!(c.compress(&data, &mut out), 0);
	}

	#[test]
	fn t_oversize_window_rejected() {
		assert!(LzxCompressor::new(LZX_MAX_WINDOW_SIZE + 1, 50).is_err());
		assert!(LzxCompressor::new(LZX_MAX_WINDOW_SIZE, 50).is_ok());
	}

	#[test]
	fn t_offset_slot_tabs() {
		let tabs = OffsetSlotTabs::new();
		// Adjusted offsets 0-2 are the repeat slots.
		assert_eq!(tabs.get(0), 0);
		assert_eq!(tabs.get(1), 1);
		assert_eq!(tabs.get(2), 2);
		// Spot checks against the slot bases.
		assert_eq!(tabs.get(3), 3);
		assert_eq!(tabs.get(4), 4);
		assert_eq!(tabs.get(5), 4);
		assert_eq!(tabs.get(6), 5);
		assert_eq!(tabs.get(95), 12);
		assert_eq!(tabs.get(96), 13);
		assert_eq!(tabs.get(2_097_151), 49);
	}

	#[test]
	fn t_lru_queue() {
		let q = LruQueue::new();
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [1, 1, 1]);

		let q = q.push(100);
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [100, 1, 1]);

		let q = q.push(7);
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [7, 100, 1]);

		let q = q.swap(2);
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [1, 100, 7]);

		let q = q.swap(1);
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [100, 1, 7]);

		// Swapping the front is a no-op.
		let q = q.swap(0);
		assert_eq!([q.offset(0), q.offset(1), q.offset(2)], [100, 1, 7]);
	}
}
