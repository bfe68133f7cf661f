/*!
# Wimpress: Roundtrips.

Push a variety of buffers through every format at several levels and make
sure the compressed renditions decode back to the originals.
*/

use wimpress::{
	Compressor,
	Decompressor,
	Format,
};



/// # Compression Levels Worth Sampling.
const LEVELS: [u32; 4] = [1, 20, 50, 80];

/// # All Three Formats.
const FORMATS: [Format; 3] = [Format::Xpress, Format::Lzx, Format::Lzms];



/// # Compress and Decompress.
///
/// Roundtrip `data` through `format` at `level`, returning the compressed
/// size, or `None` if the compressor declined (result would not fit).
fn roundtrip(format: Format, level: u32, data: &[u8], out_size: usize) -> Option<usize> {
	let mut c = Compressor::new(format, data.len().max(1), level)
		.expect("Compressor::new failed.");
	let mut compressed = vec![0_u8; out_size];
	let len = c.compress(data, &mut compressed);
	if len == 0 { return None; }
	assert!(len <= out_size);

	let mut d = Decompressor::new(format, data.len().max(1))
		.expect("Decompressor::new failed.");
	let mut restored = vec![0_u8; data.len()];
	d.decompress(&compressed[..len], &mut restored)
		.expect("Decompression failed.");
	assert_eq!(restored, data, "Roundtrip mismatch ({format}, level {level}).");
	Some(len)
}

/// # Roundtrip, Expecting Success.
fn roundtrip_ok(format: Format, level: u32, data: &[u8]) -> usize {
	roundtrip(format, level, data, data.len() + 4096)
		.expect("Compression unexpectedly declined.")
}

/// # A Page of Prose.
fn text_corpus() -> Vec<u8> {
	let mut data = Vec::with_capacity(40_000);
	while data.len() < 40_000 {
		data.extend_from_slice(
			b"She sells sea shells by the sea shore. The shells she sells \
			are surely seashells. So if she sells shells on the seashore, \
			I'm sure she sells seashore shells. "
		);
	}
	data
}

/// # Deterministic Junk.
///
/// A cheap LCG so the incompressible case stays reproducible.
fn random_bytes(len: usize) -> Vec<u8> {
	let mut state = 0x2545_F491_4F6C_DD1D_u64;
	(0..len)
		.map(|_| {
			state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
			(state >> 56) as u8
		})
		.collect()
}



#[test]
fn t_text() {
	let data = text_corpus();
	for format in FORMATS {
		for level in LEVELS {
			let len = roundtrip_ok(format, level, &data);
			assert!(
				len < data.len() / 2,
				"Prose barely compressed ({format}, level {level}): {len} bytes.",
			);
		}
	}
}

#[test]
fn t_zeroes() {
	// XPRESS tops out at 64 KiB per buffer; the other two go bigger.
	let data = vec![0_u8; 100_000];
	for format in [Format::Lzx, Format::Lzms] {
		let len = roundtrip_ok(format, 50, &data);
		assert!(
			len < 1024,
			"Zeroes barely compressed ({format}): {len} bytes.",
		);
	}

	let len = roundtrip_ok(Format::Xpress, 50, &data[..60_000]);
	assert!(len < 1024, "Zeroes barely compressed (XPRESS): {len} bytes.");
}

#[test]
fn t_short_strings() {
	let aaa = [b'a'; 300];
	let abra = b"abracadabra ".repeat(25);
	for format in FORMATS {
		for level in LEVELS {
			roundtrip_ok(format, level, &aaa);
			roundtrip_ok(format, level, &abra);
		}
	}
}

#[test]
fn t_ramp() {
	// Slowly-climbing bytes; LZMS picks this up with delta matches but it
	// roundtrips everywhere.
	let data: Vec<u8> = (0..30_000_u32).map(|i| (i >> 2) as u8).collect();
	for format in FORMATS {
		roundtrip_ok(format, 50, &data);
	}
}

#[test]
fn t_incompressible() {
	// Random bytes cannot shrink; the compressor must say so rather than
	// emit something bigger than the input.
	let data = random_bytes(8192);
	for format in FORMATS {
		assert!(
			roundtrip(format, 50, &data, data.len() - 64).is_none(),
			"Junk somehow compressed ({format}).",
		);
	}
}

#[test]
fn t_tiny() {
	// Nothing under a few bytes is worth compressing.
	for format in FORMATS {
		let mut c = Compressor::new(format, 64, 50).expect("Compressor::new failed.");
		let mut out = [0_u8; 64];
		assert_eq!(c.compress(&[], &mut out), 0);
		assert_eq!(c.compress(b"ab", &mut out), 0);
	}
}

#[test]
fn t_reuse() {
	// One compressor/decompressor pair, many buffers.
	let prose = text_corpus();
	let mut c = Compressor::new(Format::Lzx, prose.len(), 50)
		.expect("Compressor::new failed.");
	let mut d = Decompressor::new(Format::Lzx, prose.len())
		.expect("Decompressor::new failed.");

	for chunk in [&prose[..], &prose[..5000], &prose[100..20_100], &prose[..]] {
		let mut compressed = vec![0_u8; chunk.len() + 4096];
		let len = c.compress(chunk, &mut compressed);
		assert_ne!(len, 0);

		let mut restored = vec![0_u8; chunk.len()];
		d.decompress(&compressed[..len], &mut restored)
			.expect("Decompression failed.");
		assert_eq!(restored, chunk);
	}
}

#[test]
fn t_garbage_decode() {
	// Malformed input must never panic or hang. Detection is best-effort
	// in general, but an empty stream always gets caught.
	let junk = random_bytes(511);
	for format in FORMATS {
		let mut d = Decompressor::new(format, 65_536)
			.expect("Decompressor::new failed.");
		let mut out = vec![0_u8; 4096];
		assert!(d.decompress(&[], &mut out).is_err());
		let _res = d.decompress(&junk, &mut out);
	}

	// The LZMS stream is a series of 16-bit units; an odd length cannot
	// be one.
	let mut d = Decompressor::new(Format::Lzms, 65_536)
		.expect("Decompressor::new failed.");
	let mut out = vec![0_u8; 4096];
	assert!(d.decompress(&junk, &mut out).is_err());
}

#[test]
fn t_truncated() {
	// An XPRESS stream opens with 256 bytes of codeword lengths; anything
	// shorter cannot be valid.
	let data = text_corpus();
	let mut c = Compressor::new(Format::Xpress, data.len(), 50)
		.expect("Compressor::new failed.");
	let mut compressed = vec![0_u8; data.len()];
	let len = c.compress(&data[..30_000], &mut compressed);
	assert_ne!(len, 0);

	let mut d = Decompressor::new(Format::Xpress, data.len())
		.expect("Decompressor::new failed.");
	let mut out = vec![0_u8; 30_000];
	assert!(d.decompress(&compressed[..100], &mut out).is_err());
}
