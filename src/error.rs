use thiserror::Error;

/// The master error type.
///
/// Constraint violations are deliberately absent: a failed field
/// constraint yields `validated = false` from the Validator, it is never
/// an `Err`.
#[derive(Debug, Error)]
pub enum HsError {
	#[error("address range escapes region bounds")]
	OutOfRegion,

	#[error("I/O error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("dump is corrupt: {0}")]
	CorruptDump(String),

	#[error("regions [{a_start:#x}, {a_end:#x}) and [{b_start:#x}, {b_end:#x}) overlap")]
	OverlappingRegion {
		a_start: u64,
		a_end: u64,
		b_start: u64,
		b_end: u64,
	},

	#[error("record type not registered: {0}")]
	UnknownRecordType(String),

	#[error("heap corruption: {0}")]
	HeapCorruption(String),

	#[error("access denied: {0}")]
	AccessDenied(String),

	#[error("{0}")]
	Custom(String),
}

impl HsError {
	#[inline(always)]
	pub fn custom<T, S: AsRef<str>>(msg: S) -> Result<T, Self> {
		Err(HsError::Custom(msg.as_ref().to_owned()))
	}
}

pub type HsResult<T> = Result<T, HsError>;
