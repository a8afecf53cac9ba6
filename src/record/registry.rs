use std::collections::HashMap;

use crate::platform::PointerWidth;

use super::RecordType;

/// Record types are keyed by name *and* pointer width: the same logical
/// type (e.g. `win32.HEAP`) has a different byte layout on 32- and 64-bit
/// targets, so both get distinct registrations. Mirrors the teacher's
/// `BlockRegistry` keyed-lookup idiom, generalized to a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
	name: String,
	pointer_width: PointerWidth,
}

#[derive(Debug, Default)]
pub struct RecordRegistry {
	types: HashMap<RegistryKey, RecordType>,
}

impl RecordRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, pointer_width: PointerWidth, record_type: RecordType) {
		let key = RegistryKey { name: record_type.name.clone(), pointer_width };
		self.types.insert(key, record_type);
	}

	pub fn get(&self, name: &str, pointer_width: PointerWidth) -> Option<&RecordType> {
		self.types.get(&RegistryKey { name: name.to_owned(), pointer_width })
	}

	pub fn contains(&self, name: &str, pointer_width: PointerWidth) -> bool {
		self.get(name, pointer_width).is_some()
	}

	pub fn len(&self) -> usize {
		self.types.len()
	}

	pub fn is_empty(&self) -> bool {
		self.types.is_empty()
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.types.keys().map(|k| k.name.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::RecordTypeBuilder;

	#[test]
	fn register_and_lookup_by_pointer_width() {
		let mut registry = RecordRegistry::new();
		let rt32 = RecordTypeBuilder::new("demo.Thing").integer_u32("a").build();
		let rt64 = RecordTypeBuilder::new("demo.Thing").pointer("a", None, false).build();
		registry.register(PointerWidth::Bits32, rt32);
		registry.register(PointerWidth::Bits64, rt64);

		assert!(registry.contains("demo.Thing", PointerWidth::Bits32));
		assert!(registry.contains("demo.Thing", PointerWidth::Bits64));
		assert_eq!(registry.get("demo.Thing", PointerWidth::Bits32).unwrap().size, 4);
		assert_eq!(registry.get("demo.Thing", PointerWidth::Bits64).unwrap().size, 8);
		assert!(registry.get("demo.Other", PointerWidth::Bits32).is_none());
	}
}
