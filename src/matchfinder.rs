/*!
# Wimpress: LZ77 Matchfinders.

Two matchfinders cover the compressors' needs:

* A hash-chain finder for the greedy and lazy parsers, which only ever want
  the single longest match at a position;
* A binary-tree finder for the near-optimal parsers, which want *all*
  distinct match lengths at a position and search much deeper. The tree
  amortizes those deeper searches far better than chains do.

Both are generic over the stored position width: buffers no larger than
64 KiB get away with `u16` entries, halving the table memory, while larger
windows need `u32`.

Empty table buckets read as position zero. A stale zero is harmless: every
candidate is byte-verified against the data before use, and position zero is
itself a legal match source, so a false positive can only ever produce a
valid (if unhelpful) match.
*/

use crate::bits::{
	lz_extend,
	lz_hash,
};

/// # Hash-Chain 3-Byte Hash Order.
const HC_HASH3_ORDER: u32 = 15;

/// # Hash-Chain 4-Byte Hash Order.
const HC_HASH4_ORDER: u32 = 16;

/// # Binary-Tree 2-Byte Hash Order.
const BT_HASH2_ORDER: u32 = 12;

/// # Binary-Tree 3-Byte Hash Order.
const BT_HASH3_ORDER: u32 = 15;

/// # Binary-Tree 4-Byte Hash Order.
const BT_HASH4_ORDER: u32 = 16;



#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # An LZ77 Match.
pub(crate) struct LzMatch {
	/// # Match Length.
	pub(crate) length: u32,

	/// # Match Offset.
	pub(crate) offset: u32,
}

/// # Stored Match Position.
///
/// The width a matchfinder stores positions at. Sixteen bits suffice for
/// buffers up to 64 KiB because the last byte of such a buffer sits at
/// position 65,535.
pub(crate) trait MfPos: Copy + Default {
	/// # From Buffer Position.
	fn from_pos(pos: usize) -> Self;

	/// # To Buffer Position.
	fn to_pos(self) -> usize;
}

impl MfPos for u16 {
	#[inline]
	fn from_pos(pos: usize) -> Self { pos as Self }
	#[inline]
	fn to_pos(self) -> usize { usize::from(self) }
}

impl MfPos for u32 {
	#[inline]
	fn from_pos(pos: usize) -> Self { pos as Self }
	#[inline]
	fn to_pos(self) -> usize { self as usize }
}

/// # Three-Byte Sequence.
const fn load_seq3(data: &[u8], pos: usize) -> u32 {
	(data[pos] as u32)
		| (data[pos + 1] as u32) << 8
		| (data[pos + 2] as u32) << 16
}

/// # Four-Byte Sequence.
const fn load_seq4(data: &[u8], pos: usize) -> u32 {
	load_seq3(data, pos) | (data[pos + 3] as u32) << 24
}



#[derive(Debug)]
/// # Hash-Chain Matchfinder.
///
/// Positions with the same 4-byte hash are chained together, newest first;
/// a search walks the chain up to a depth cap, byte-verifying candidates. A
/// separate single-entry 3-byte hash table catches minimum-length matches
/// the 4-byte chains can't represent.
pub(crate) struct HcMatchFinder<P: MfPos> {
	/// # 3-Byte Hash Heads.
	hash3_tab: Vec<P>,

	/// # 4-Byte Hash Heads.
	hash4_tab: Vec<P>,

	/// # Per-Position Chain Links.
	next_tab: Vec<P>,
}

impl<P: MfPos> HcMatchFinder<P> {
	/// # New Matchfinder.
	pub(crate) fn new(max_bufsize: usize) -> Self {
		Self {
			hash3_tab: vec![P::default(); 1 << HC_HASH3_ORDER],
			hash4_tab: vec![P::default(); 1 << HC_HASH4_ORDER],
			next_tab: vec![P::default(); max_bufsize],
		}
	}

	/// # Reset for a New Buffer.
	pub(crate) fn init(&mut self) {
		self.hash3_tab.fill(P::default());
		self.hash4_tab.fill(P::default());
	}

	/// # Longest Match.
	///
	/// Find the longest match at `cur_pos`, longer than `best_len` bytes,
	/// capped at `max_len`. Searching stops early once a match of at least
	/// `nice_len` bytes turns up (after extending it as far as it goes), or
	/// after `max_search_depth` chain candidates.
	///
	/// The current position is inserted into the tables either way. Returns
	/// the best match found, with `length <= best_len` meaning none was.
	pub(crate) fn longest_match(
		&mut self,
		data: &[u8],
		cur_pos: usize,
		best_len: u32,
		max_len: u32,
		nice_len: u32,
		max_search_depth: u32,
	) -> LzMatch {
		let mut best = LzMatch { length: best_len, offset: 0 };

		// Too close to the end to hash; don't bother.
		if max_len < 5 {
			return best;
		}

		// Insert into the 3-byte table, keeping the old head as the
		// minimum-length candidate.
		let hash3 = lz_hash(load_seq3(data, cur_pos), HC_HASH3_ORDER);
		let cand3 = self.hash3_tab[hash3].to_pos();
		self.hash3_tab[hash3] = P::from_pos(cur_pos);

		// Insert into the 4-byte table, chaining the old head behind us.
		let hash4 = lz_hash(load_seq4(data, cur_pos), HC_HASH4_ORDER);
		let mut cand = self.hash4_tab[hash4].to_pos();
		self.hash4_tab[hash4] = P::from_pos(cur_pos);
		self.next_tab[cur_pos] = P::from_pos(cand);

		// Nothing here can improve on a match that already spans the
		// remaining input.
		if best.length >= max_len { return best; }

		// The 3-byte candidate only matters while no length-3 match has
		// been found yet.
		if best.length < 3 &&
			cand3 < cur_pos &&
			data[cand3..cand3 + 3] == data[cur_pos..cur_pos + 3] {
			let length = lz_extend(data, cand3, cur_pos, 3, max_len as usize) as u32;
			best = LzMatch { length, offset: (cur_pos - cand3) as u32 };
			if best.length >= nice_len { return best; }
		}

		for _ in 0..max_search_depth {
			if cand >= cur_pos { break; }

			// Check the byte that would make this candidate an
			// improvement before bothering with a full comparison.
			let bl = best.length as usize;
			if data[cand + bl] == data[cur_pos + bl] &&
				data[cand..cand + 3] == data[cur_pos..cur_pos + 3] {
				let length = lz_extend(data, cand, cur_pos, 3, max_len as usize) as u32;
				if length > best.length {
					best = LzMatch { length, offset: (cur_pos - cand) as u32 };
					if best.length >= nice_len { break; }
				}
			}

			// Chain positions always decrease; anything else is a stale
			// empty-bucket artifact.
			let next = self.next_tab[cand].to_pos();
			if next >= cand { break; }
			cand = next;
		}

		best
	}

	/// # Skip Bytes.
	///
	/// Advance through `count` positions starting at `cur_pos`, inserting
	/// each into the tables without searching. Used after a match has been
	/// chosen to register the positions it covers.
	pub(crate) fn skip_bytes(
		&mut self,
		data: &[u8],
		cur_pos: usize,
		count: usize,
	) {
		for pos in cur_pos..cur_pos + count {
			if data.len() - pos < 5 { break; }

			let hash3 = lz_hash(load_seq3(data, pos), HC_HASH3_ORDER);
			self.hash3_tab[hash3] = P::from_pos(pos);

			let hash4 = lz_hash(load_seq4(data, pos), HC_HASH4_ORDER);
			self.next_tab[pos] = self.hash4_tab[hash4];
			self.hash4_tab[hash4] = P::from_pos(pos);
		}
	}
}



#[derive(Debug)]
/// # Binary-Tree Matchfinder.
///
/// Positions with the same 4-byte hash form a binary search tree ordered by
/// the lexicographic order of the data following each position. A search
/// walks down from the root collecting matches of strictly increasing
/// length, then re-roots the tree at the current position, splitting the
/// visited nodes into its left and right subtrees.
///
/// Short matches below the trees' reach come from small direct-mapped 2-
/// and 3-byte hash tables.
pub(crate) struct BtMatchFinder<P: MfPos> {
	/// # 2-Byte Hash Heads.
	hash2_tab: Vec<P>,

	/// # 3-Byte Hash Heads.
	hash3_tab: Vec<P>,

	/// # 4-Byte Hash Heads (Tree Roots).
	hash4_tab: Vec<P>,

	/// # Tree Links, Two Per Position.
	///
	/// `children[2 * pos]` is the left child, `children[2 * pos + 1]` the
	/// right.
	children: Vec<P>,

	/// # Record Length-2 Matches?
	///
	/// Only formats whose minimum match length is two bother with the
	/// 2-byte table.
	want_len2: bool,
}

impl<P: MfPos> BtMatchFinder<P> {
	/// # New Matchfinder.
	pub(crate) fn new(max_bufsize: usize, want_len2: bool) -> Self {
		Self {
			hash2_tab:
				if want_len2 { vec![P::default(); 1 << BT_HASH2_ORDER] }
				else { Vec::new() },
			hash3_tab: vec![P::default(); 1 << BT_HASH3_ORDER],
			hash4_tab: vec![P::default(); 1 << BT_HASH4_ORDER],
			children: vec![P::default(); 2 * max_bufsize],
			want_len2,
		}
	}

	/// # Reset for a New Buffer.
	pub(crate) fn init(&mut self) {
		self.hash2_tab.fill(P::default());
		self.hash3_tab.fill(P::default());
		self.hash4_tab.fill(P::default());
	}

	/// # Get Matches.
	///
	/// Find matches at `cur_pos` and append them to `matches` in strictly
	/// increasing length order, then advance the finder past the position.
	/// Returns the longest length found (zero if none).
	///
	/// `nice_len` must not exceed `max_len`; reaching it ends the search.
	pub(crate) fn get_matches(
		&mut self,
		data: &[u8],
		cur_pos: usize,
		max_len: u32,
		nice_len: u32,
		max_search_depth: u32,
		matches: &mut Vec<LzMatch>,
	) -> u32 {
		self.advance(data, cur_pos, max_len, nice_len, max_search_depth, Some(matches))
	}

	/// # Skip a Position.
	///
	/// Advance the finder past `cur_pos` without collecting matches. The
	/// tree still gets updated, so later searches stay accurate.
	pub(crate) fn skip_position(
		&mut self,
		data: &[u8],
		cur_pos: usize,
		max_len: u32,
		nice_len: u32,
		max_search_depth: u32,
	) {
		self.advance(data, cur_pos, max_len, nice_len, max_search_depth, None);
	}

	/// # Advance One Position.
	///
	/// The combined search/insert walk behind `get_matches` and
	/// `skip_position`.
	fn advance(
		&mut self,
		data: &[u8],
		cur_pos: usize,
		max_len: u32,
		nice_len: u32,
		max_search_depth: u32,
		mut matches: Option<&mut Vec<LzMatch>>,
	) -> u32 {
		let mut best_len: u32 = 0;

		// Too close to the end to hash; leave the tables alone.
		if max_len < 5 {
			return 0;
		}

		if self.want_len2 {
			let hash2 = lz_hash(
				u32::from(data[cur_pos]) | u32::from(data[cur_pos + 1]) << 8,
				BT_HASH2_ORDER,
			);
			let cand2 = self.hash2_tab[hash2].to_pos();
			self.hash2_tab[hash2] = P::from_pos(cur_pos);
			if let Some(matches) = matches.as_deref_mut() {
				if cand2 < cur_pos &&
					data[cand2..cand2 + 2] == data[cur_pos..cur_pos + 2] {
					best_len = 2;
					matches.push(LzMatch {
						length: 2,
						offset: (cur_pos - cand2) as u32,
					});
				}
			}
		}

		let hash3 = lz_hash(load_seq3(data, cur_pos), BT_HASH3_ORDER);
		let cand3 = self.hash3_tab[hash3].to_pos();
		self.hash3_tab[hash3] = P::from_pos(cur_pos);
		if let Some(matches) = matches.as_deref_mut() {
			if cand3 < cur_pos &&
				data[cand3..cand3 + 3] == data[cur_pos..cur_pos + 3] &&
				best_len < 3 {
				best_len = 3;
				matches.push(LzMatch {
					length: 3,
					offset: (cur_pos - cand3) as u32,
				});
			}
		}

		let hash4 = lz_hash(load_seq4(data, cur_pos), BT_HASH4_ORDER);
		let mut node = self.hash4_tab[hash4].to_pos();
		self.hash4_tab[hash4] = P::from_pos(cur_pos);

		// Walk down the tree, re-rooting it at the current position as we
		// go: nodes that compare less than our data hang off our left
		// subtree, greater off our right. `pending_lt`/`pending_gt` are
		// the child slots waiting for their next occupant.
		let mut pending_lt = 2 * cur_pos;
		let mut pending_gt = 2 * cur_pos + 1;
		let mut best_lt_len: usize = 0;
		let mut best_gt_len: usize = 0;
		let mut depth = max_search_depth;

		loop {
			if node >= cur_pos || depth == 0 {
				self.children[pending_lt] = P::default();
				self.children[pending_gt] = P::default();
				break;
			}
			depth -= 1;

			// Everything shorter than both subtree prefixes is already
			// known equal.
			let mut len = best_lt_len.min(best_gt_len);
			len = lz_extend(data, node, cur_pos, len, max_len as usize);

			if len as u32 > best_len {
				best_len = len as u32;
				if let Some(matches) = matches.as_deref_mut() {
					matches.push(LzMatch {
						length: best_len,
						offset: (cur_pos - node) as u32,
					});
				}
				if best_len >= nice_len {
					// Good enough. The node drops out of the tree; its
					// subtrees take its place in ours.
					self.children[pending_lt] = self.children[2 * node];
					self.children[pending_gt] = self.children[2 * node + 1];
					break;
				}
			}

			if data[node + len] < data[cur_pos + len] {
				self.children[pending_lt] = P::from_pos(node);
				pending_lt = 2 * node + 1;
				best_lt_len = len;
				node = self.children[pending_lt].to_pos();
			}
			else {
				self.children[pending_gt] = P::from_pos(node);
				pending_gt = 2 * node;
				best_gt_len = len;
				node = self.children[pending_gt].to_pos();
			}
		}

		best_len
	}
}



#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn t_hc_finds_longest() {
		let data = b"abcdefgh_abcdefgh_abcdefghXYZ";
		let mut mf = HcMatchFinder::<u32>::new(data.len());
		mf.init();

		mf.skip_bytes(data, 0, 18);
		let max = (data.len() - 18) as u32;
		let m = mf.longest_match(data, 18, 2, max, max, 16);
		assert_eq!(m.length, 8);
		assert_eq!(m.offset, 9);
	}

	#[test]
	fn t_hc_no_match() {
		let data = b"abcdefghijklmnopqrstuvwxyz";
		let mut mf = HcMatchFinder::<u32>::new(data.len());
		mf.init();

		mf.skip_bytes(data, 0, 10);
		let m = mf.longest_match(data, 10, 2, 16, 16, 16);
		assert!(m.length <= 2);
	}

	#[test]
	fn t_bt_increasing_lengths() {
		// Repeats at several distances so multiple match lengths exist.
		let data = b"abcde_abcxx_abcdeyy_abcde_abcdeZZZZ";
		let mut mf = BtMatchFinder::<u32>::new(data.len(), true);
		mf.init();

		for pos in 0..26 {
			let max = (data.len() - pos) as u32;
			mf.skip_position(data, pos, max.min(255), max.min(255), 16);
		}

		let mut matches = Vec::new();
		let max = (data.len() - 26) as u32;
		let best = mf.get_matches(data, 26, max, max, 16, &mut matches);

		assert!(! matches.is_empty());
		for pair in matches.windows(2) {
			assert!(pair[0].length < pair[1].length);
		}
		let last = matches.last().unwrap();
		assert_eq!(best, last.length);
		assert_eq!(last.length, 5);
		assert_eq!(last.offset, 6);

		// And every reported match must actually hold.
		for m in &matches {
			let src = 26 - m.offset as usize;
			assert_eq!(
				&data[src..src + m.length as usize],
				&data[26..26 + m.length as usize],
			);
		}
	}

	#[test]
	fn t_bt_u16_positions() {
		let mut data = vec![0_u8; 1024];
		for (i, b) in data.iter_mut().enumerate() {
			*b = (i % 251) as u8;
		}
		let mut mf = BtMatchFinder::<u16>::new(data.len(), false);
		mf.init();

		for pos in 0..502 {
			let max = ((data.len() - pos) as u32).min(255);
			mf.skip_position(&data, pos, max, max, 16);
		}
		let mut matches = Vec::new();
		mf.get_matches(&data, 502, 255, 255, 16, &mut matches);
		let last = matches.last().unwrap();
		assert_eq!(last.offset, 251);
		assert_eq!(last.length, 255);
	}
}
