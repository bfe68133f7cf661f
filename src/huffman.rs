/*!
# Wimpress: Canonical Huffman Codes.

All three codecs entropy-code with length-limited canonical Huffman codes,
and two of them (LZX and LZMS) additionally require that the compressor and
decompressor derive the *same* code from the same frequencies. The
construction here is therefore pinned down to the last tie-break:

* Symbols are ordered primarily by frequency, secondarily by symbol value;
* During tree construction, leaves take precedence over non-leaves when
  frequencies tie, while two non-leaves combine only when strictly cheaper
  than the next leaf;
* Overlong codewords are clamped to the longest shorter length that still
  has codewords available. (This is not an optimal length-limiting method,
  but it is the one the formats require.)

Codewords are then assigned in (length, symbol) order, producing a canonical
code reconstructible from the lengths alone.
*/

pub(crate) mod decode;

/// # Symbol Bits.
///
/// Symbol and frequency share a `u32` during construction; the symbol keeps
/// the low bits, the frequency the rest.
const NUM_SYMBOL_BITS: u32 = 10;

/// # Symbol Mask.
const SYMBOL_MASK: u32 = (1 << NUM_SYMBOL_BITS) - 1;

/// # Frequency Mask.
const FREQ_MASK: u32 = !SYMBOL_MASK;

/// # Maximum Alphabet Size.
///
/// The largest alphabet any of the codecs uses (the LZMS offset codes).
pub(crate) const MAX_NUM_SYMS: usize = 799;

/// # Maximum Codeword Length.
///
/// The largest length limit any of the codecs uses (the LZX main code).
pub(crate) const MAX_CODEWORD_LEN: usize = 16;



/// # Build a Length-Limited Canonical Huffman Code.
///
/// Given the frequency of each symbol in `freqs`, fill `lens` with the
/// codeword length assigned to each symbol and `codewords` with the
/// right-justified codewords themselves.
///
/// Symbols with zero frequency receive length zero (no codeword); their
/// codeword slots are left unspecified. No length will exceed
/// `max_codeword_len`.
///
/// The frequencies must sum to less than `2^22`. (All call sites scale their
/// counts well below that.)
///
/// Edge cases: if no symbol has a nonzero frequency the code is empty, and
/// if exactly one does, a second one-bit codeword is synthesized (symbol
/// zero, or symbol one if the used symbol *is* zero) so the smallest
/// complete code results, with the lesser symbol taking codeword zero. The
/// synthesized codeword can land one past a single-symbol alphabet, so
/// `lens` and `codewords` must always reach index one.
pub(crate) fn make_canonical_code(
	num_syms: usize,
	max_codeword_len: u32,
	freqs: &[u32],
	lens: &mut [u8],
	codewords: &mut [u32],
) {
	debug_assert!(1 <= num_syms && num_syms <= MAX_NUM_SYMS);
	debug_assert!(max_codeword_len as usize <= MAX_CODEWORD_LEN);

	// Collect the used symbols, packed with their frequencies, sorted
	// primarily by frequency and secondarily by symbol value. The codeword
	// array doubles as scratch space for this, and later for the
	// stripped-down Huffman tree.
	let mut num_used = 0;
	for sym in 0..num_syms {
		if freqs[sym] == 0 { lens[sym] = 0; }
		else {
			codewords[num_used] = (sym as u32) | (freqs[sym] << NUM_SYMBOL_BITS);
			num_used += 1;
		}
	}
	codewords[..num_used].sort_unstable();

	// Zero or one used symbols cannot form a tree; handle them specially.
	if num_used == 0 { return; }
	if num_used == 1 {
		let sym = (codewords[0] & SYMBOL_MASK) as usize;
		let nonzero_idx = if sym == 0 { 1 } else { sym };
		codewords[0] = 0;
		lens[0] = 1;
		codewords[nonzero_idx] = 1;
		lens[nonzero_idx] = 1;
		return;
	}

	build_tree(codewords, num_used);

	let mut len_counts = [0_u32; MAX_CODEWORD_LEN + 1];
	compute_length_counts(
		codewords,
		num_used - 2,
		&mut len_counts,
		max_codeword_len,
	);

	gen_codewords(codewords, lens, &len_counts, max_codeword_len, num_syms);
}

/// # Build the Huffman Tree.
///
/// `a[..sym_count]` holds the used symbols with their frequencies, sorted in
/// increasing order; only the frequency halves matter here. On return, the
/// first `sym_count - 1` entries hold the *non-leaf* nodes of the Huffman
/// tree (each contains its parent's index in the frequency half, with
/// `a[sym_count - 2]` as the root) while the symbol halves pass through
/// untouched. Non-leaves suffice because canonical code generation only
/// needs to know how many leaves sit at each depth, never where.
fn build_tree(a: &mut [u32], sym_count: usize) {
	let last_idx = sym_count - 1;

	// Next lowest-frequency leaf still needing a parent.
	let mut i = 0;

	// Next lowest-frequency non-leaf still needing a parent, if b < e.
	let mut b = 0;

	// Next slot for a freshly-made non-leaf (overwrites a leaf).
	let mut e = 0;

	loop {
		// Pick the two cheapest parentless nodes from among leaves a[i..]
		// and non-leaves a[b..e], and parent them under a new node a[e].
		// Ties go to the leaves.
		let new_freq =
			if i + 1 <= last_idx &&
				(b == e || (a[i + 1] & FREQ_MASK) <= (a[b] & FREQ_MASK)) {
				// Two leaves.
				let f = (a[i] & FREQ_MASK) + (a[i + 1] & FREQ_MASK);
				i += 2;
				f
			}
			else if b + 2 <= e &&
				(i > last_idx || (a[b + 1] & FREQ_MASK) < (a[i] & FREQ_MASK)) {
				// Two non-leaves.
				let f = (a[b] & FREQ_MASK) + (a[b + 1] & FREQ_MASK);
				a[b] = ((e as u32) << NUM_SYMBOL_BITS) | (a[b] & SYMBOL_MASK);
				a[b + 1] = ((e as u32) << NUM_SYMBOL_BITS) | (a[b + 1] & SYMBOL_MASK);
				b += 2;
				f
			}
			else {
				// One of each.
				let f = (a[i] & FREQ_MASK) + (a[b] & FREQ_MASK);
				a[b] = ((e as u32) << NUM_SYMBOL_BITS) | (a[b] & SYMBOL_MASK);
				i += 1;
				b += 1;
				f
			};
		a[e] = new_freq | (a[e] & SYMBOL_MASK);

		// A tree with n leaves has n - 1 non-leaves.
		e += 1;
		if e >= last_idx { break; }
	}
}

/// # Count Codewords Per Length.
///
/// Walk the non-leaf tree from `build_tree` and fill `len_counts` with the
/// number of codewords at each length, applying the length limit.
///
/// Parents always have greater indices than their children, so one reverse
/// pass computes every node's depth, overwriting the parent indices as it
/// goes. Starting from the assumption that both children of the root are
/// leaves (two codewords of length one), each non-leaf visited converts one
/// codeword at its depth into two at the depth below. A depth at or past the
/// limit is clamped down to the longest length that still has codewords.
fn compute_length_counts(
	a: &mut [u32],
	root_idx: usize,
	len_counts: &mut [u32; MAX_CODEWORD_LEN + 1],
	max_codeword_len: u32,
) {
	len_counts[1] = 2;
	a[root_idx] &= SYMBOL_MASK;

	for node in (0..root_idx).rev() {
		let parent = (a[node] >> NUM_SYMBOL_BITS) as usize;
		let parent_depth = a[parent] >> NUM_SYMBOL_BITS;
		let depth = parent_depth + 1;
		a[node] = (a[node] & SYMBOL_MASK) | (depth << NUM_SYMBOL_BITS);

		let mut len = depth;
		if len >= max_codeword_len {
			len = max_codeword_len;
			loop {
				len -= 1;
				if len_counts[len as usize] != 0 { break; }
			}
		}

		len_counts[len as usize] -= 1;
		len_counts[len as usize + 1] += 2;
	}
}

/// # Generate the Codewords.
///
/// `a` initially holds the used symbols in its low bits, sorted by frequency
/// then value; lengths are handed out in decreasing order along that
/// ordering. Codewords are then assigned in (length, symbol) order, which is
/// what makes the code canonical.
fn gen_codewords(
	a: &mut [u32],
	lens: &mut [u8],
	len_counts: &[u32; MAX_CODEWORD_LEN + 1],
	max_codeword_len: u32,
	num_syms: usize,
) {
	let mut i = 0;
	for len in (1..=max_codeword_len).rev() {
		for _ in 0..len_counts[len as usize] {
			lens[(a[i] & SYMBOL_MASK) as usize] = len as u8;
			i += 1;
		}
	}

	// The lexicographically first codeword of each length…
	let mut next_codewords = [0_u32; MAX_CODEWORD_LEN + 1];
	for len in 2..=max_codeword_len as usize {
		next_codewords[len] =
			(next_codewords[len - 1] + len_counts[len - 1]) << 1;
	}

	// …then assignment in symbol order.
	for sym in 0..num_syms {
		a[sym] = next_codewords[lens[sym] as usize];
		next_codewords[lens[sym] as usize] += 1;
	}
}



#[cfg(test)]
mod test {
	use super::*;

	/// # Build Helper.
	fn build(freqs: &[u32], max_len: u32) -> (Vec<u8>, Vec<u32>) {
		let mut lens = vec![0_u8; freqs.len()];
		let mut codewords = vec![0_u32; freqs.len()];
		make_canonical_code(freqs.len(), max_len, freqs, &mut lens, &mut codewords);
		(lens, codewords)
	}

	/// # Kraft Sum (x 2^16).
	fn kraft(lens: &[u8]) -> u32 {
		lens.iter()
			.filter(|&&l| l != 0)
			.map(|&l| 1_u32 << (16 - u32::from(l)))
			.sum()
	}

	#[test]
	fn t_empty() {
		let (lens, _) = build(&[0; 8], 7);
		assert!(lens.iter().all(|&l| l == 0));
	}

	#[test]
	fn t_single_symbol() {
		let (lens, codewords) = build(&[0, 0, 0, 5, 0, 0, 0, 0], 7);
		assert_eq!(lens, [1, 0, 0, 1, 0, 0, 0, 0]);
		assert_eq!(codewords[0], 0);
		assert_eq!(codewords[3], 1);

		// If the used symbol is zero, the phantom goes to symbol one.
		let (lens, codewords) = build(&[9, 0, 0, 0], 7);
		assert_eq!(lens, [1, 1, 0, 0]);
		assert_eq!(codewords[0], 0);
		assert_eq!(codewords[1], 1);
	}

	#[test]
	fn t_complete_and_canonical() {
		let freqs = [10, 1, 1, 30, 1, 5, 0, 7, 20, 2];
		let (lens, codewords) = build(&freqs, 15);

		// The lengths always form a complete code.
		assert_eq!(kraft(&lens), 1 << 16);

		// More frequent symbols never get longer codewords.
		for a in 0..freqs.len() {
			for b in 0..freqs.len() {
				if freqs[a] > freqs[b] && freqs[b] != 0 {
					assert!(lens[a] <= lens[b]);
				}
			}
		}

		// Codewords of equal length increase with symbol value; across
		// lengths, padding each codeword out to the longest length keeps
		// the whole set strictly increasing.
		let max = lens.iter().copied().max().unwrap();
		let mut last = None;
		let mut order: Vec<usize> = (0..freqs.len()).filter(|&s| lens[s] != 0).collect();
		order.sort_by_key(|&s| (lens[s], s));
		for &s in &order {
			let padded = codewords[s] << (max - lens[s]);
			if let Some(prev) = last { assert!(padded > prev); }
			last = Some(padded);
		}
	}

	#[test]
	fn t_length_limit() {
		// Fibonacci-ish frequencies force long codewords without a limit.
		let freqs = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377];
		let (lens, _) = build(&freqs, 7);
		assert!(lens.iter().all(|&l| 0 < l && l <= 7));
		assert_eq!(kraft(&lens), 1 << 16);
	}

	#[test]
	fn t_leaf_tie_break() {
		// Four equal frequencies must come out perfectly balanced, not
		// skewed, because leaves beat non-leaves on ties.
		let (lens, _) = build(&[3, 3, 3, 3], 15);
		assert_eq!(lens, [2, 2, 2, 2]);
	}
}
