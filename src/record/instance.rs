use std::collections::HashMap;

use super::ScalarValue;

/// A live decoding of a [`super::RecordType`] bound to a `(region, offset)`
/// pair. Caches decoded scalar fields and pointer targets; lifetime is the
/// analysis run that produced it.
#[derive(Debug, Clone, Default)]
pub struct RecordInstance {
	pub record_type_name: String,
	pub address: u64,
	pub scalars: HashMap<String, ScalarValue>,
	pub pointers: HashMap<String, u64>,
	pub pointer_arrays: HashMap<String, Vec<u64>>,
	pub raw: HashMap<String, Vec<u8>>,
	pub nested: HashMap<String, RecordInstance>,
	/// `false` once the first constraint failure is hit; decoding stops
	/// there rather than continuing into fields that follow it.
	pub validated: bool,
}

impl RecordInstance {
	pub fn new(record_type_name: String, address: u64) -> Self {
		Self { record_type_name, address, validated: true, ..Default::default() }
	}

	pub fn scalar(&self, name: &str) -> Option<ScalarValue> {
		self.scalars.get(name).copied()
	}

	pub fn scalar_u64(&self, name: &str) -> Option<u64> {
		self.scalar(name).and_then(|v| v.as_u64())
	}

	pub fn pointer(&self, name: &str) -> Option<u64> {
		self.pointers.get(name).copied()
	}

	pub fn pointer_array(&self, name: &str) -> Option<&[u64]> {
		self.pointer_arrays.get(name).map(|v| v.as_slice())
	}

	pub fn raw_bytes(&self, name: &str) -> Option<&[u8]> {
		self.raw.get(name).map(|v| v.as_slice())
	}

	pub fn nested(&self, name: &str) -> Option<&RecordInstance> {
		self.nested.get(name)
	}
}
