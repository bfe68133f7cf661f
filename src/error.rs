/*!
# Wimpress: Errors.
*/

use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # Codec Error.
///
/// The error cases are deliberately coarse: either the caller handed over
/// something unusable, or the compressed data itself is unusable. Anything
/// finer-grained than that would just be noise; a damaged resource is a
/// damaged resource.
///
/// When compiled with `debug-assertions = true`, corruption errors carry the
/// offending source file and line number to aid investigation.
///
/// The macro `corrupt!` is used internally to populate the appropriate
/// details or not.
pub enum WimError {
	/// # Invalid Parameter.
	///
	/// A creation-time argument was out of range, e.g. a zero or oversized
	/// buffer size, or a compression level beyond the supported maximum.
	Param,

	/// # Corrupt Data.
	///
	/// The compressed data is malformed, or does not decompress to exactly
	/// the expected number of bytes.
	Corrupt {
		#[cfg(debug_assertions)]
		/// # Source File.
		file: &'static str,

		#[cfg(debug_assertions)]
		/// # Source Line.
		line: u32,
	},
}

impl WimError {
	#[cfg(debug_assertions)]
	/// # New Corruption Error.
	pub(crate) const fn corrupt(file: &'static str, line: u32) -> Self {
		Self::Corrupt { file, line }
	}

	#[cfg(not(debug_assertions))]
	/// # New Corruption Error.
	pub(crate) const fn corrupt() -> Self { Self::Corrupt {} }
}

impl fmt::Display for WimError {
	#[cfg(debug_assertions)]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Param => f.write_str("invalid parameter"),
			Self::Corrupt { file, line } => f.write_fmt(format_args!(
				"corrupt compressed data (detected at {file}:{line})",
			)),
		}
	}

	#[cfg(not(debug_assertions))]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Param => f.write_str("invalid parameter"),
			Self::Corrupt {} => f.write_str("corrupt compressed data"),
		}
	}
}

impl std::error::Error for WimError {}



#[cfg(debug_assertions)]
/// # Corruption Macro.
///
/// Initialize a new corruption error with the appropriate environmental
/// argument(s) according to `debug-assertions`.
macro_rules! corrupt {
	() => (crate::error::WimError::corrupt(file!(), line!()));
}

#[cfg(not(debug_assertions))]
/// # Corruption Macro.
///
/// Initialize a new corruption error with the appropriate environmental
/// argument(s) according to `debug-assertions`.
macro_rules! corrupt {
	() => (crate::error::WimError::corrupt());
}

/// # Expose it to the rest of the crate.
pub(crate) use corrupt;
