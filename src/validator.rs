//! Validator (spec.md component F): decodes a record at an address and
//! recursively chases its pointer fields, checking constraints as it goes
//! and stopping at the first failure rather than reporting every one.

use std::collections::HashSet;

use crate::error::{HsError, HsResult};
use crate::memory::MemoryHandler;
use crate::platform::PointerWidth;
use crate::record::{
	check_scalar, Constraint, FieldKind, RecordInstance, RecordRegistry, ScalarValue,
};

/// Default recursion bound for pointer chasing, chosen generously enough
/// to walk ordinary linked structures without risking a stack blow-up on
/// a corrupt or adversarial pointer graph.
pub const DEFAULT_DEPTH: u32 = 10;

pub struct Validator<'h> {
	handler: &'h MemoryHandler,
	registry: &'h RecordRegistry,
	pointer_width: PointerWidth,
}

impl<'h> Validator<'h> {
	pub fn new(handler: &'h MemoryHandler, registry: &'h RecordRegistry) -> Self {
		let pointer_width = handler.platform().pointer_width();
		Self { handler, registry, pointer_width }
	}

	/// Builds a validator that decodes records as if the target used
	/// `pointer_width`, regardless of the handler's own declared platform
	/// width. Used by the Heap Finder, which must try both a 32-bit and a
	/// 64-bit `win32.HEAP` layout against the same memory image.
	pub fn with_pointer_width(
		handler: &'h MemoryHandler,
		registry: &'h RecordRegistry,
		pointer_width: PointerWidth,
	) -> Self {
		Self { handler, registry, pointer_width }
	}

	/// Decodes and validates one instance of `type_name` at `addr`,
	/// chasing pointer fields up to `depth` levels deep.
	pub fn load(&self, addr: u64, type_name: &str, depth: u32) -> HsResult<RecordInstance> {
		let mut visited = HashSet::new();
		self.load_inner(addr, type_name, depth, &mut visited)
	}

	/// Convenience entry point using [`DEFAULT_DEPTH`].
	pub fn load_record(&self, addr: u64, type_name: &str) -> HsResult<RecordInstance> {
		self.load(addr, type_name, DEFAULT_DEPTH)
	}

	fn load_inner(
		&self,
		addr: u64,
		type_name: &str,
		depth: u32,
		visited: &mut HashSet<(u64, String)>,
	) -> HsResult<RecordInstance> {
		let pointer_width = self.pointer_width;
		let record_type = self
			.registry
			.get(type_name, pointer_width)
			.ok_or_else(|| HsError::UnknownRecordType(type_name.to_owned()))?;

		let mut instance = RecordInstance::new(type_name.to_owned(), addr);

		let key = (addr, type_name.to_owned());
		if !visited.insert(key) {
			// Revisiting the same (address, type) on this path means the
			// pointer graph cycles back on itself; stop here rather than
			// recursing forever, but don't call that a constraint failure.
			return Ok(instance);
		}

		let bytes = match self.handler.read_bytes(addr, record_type.size as usize) {
			Ok(b) => b,
			Err(e) => {
				instance.validated = false;
				log::debug!("failed to read {} bytes at {:#x}: {e}", record_type.size, addr);
				return Ok(instance);
			}
		};

		for field in &record_type.fields {
			let field_bytes = &bytes[field.offset as usize..(field.offset + field.width) as usize];
			match &field.kind {
				FieldKind::Integer { width, signed } => {
					let value = self.handler.platform().decode_integer(field_bytes, *width, *signed);
					instance.scalars.insert(field.name.clone(), value);
					if let Some(constraint) = &field.constraint {
						if !check_scalar(constraint, value) {
							instance.validated = false;
							break;
						}
					}
				}
				FieldKind::Bitfield { width, bit_offset, bit_width } => {
					let raw = self.handler.platform().decode_integer(field_bytes, *width, false);
					let extracted = crate::record::extract_bits(
						raw.as_u64().unwrap_or(0),
						*bit_offset,
						*bit_width,
					);
					instance.scalars.insert(field.name.clone(), ScalarValue::U64(extracted));
				}
				FieldKind::Pointer { pointee, weak } => {
					let ptr = match self.handler.platform().read_pointer_as(field_bytes, pointer_width) {
						Ok(p) => p,
						Err(_) => {
							instance.validated = false;
							break;
						}
					};
					instance.pointers.insert(field.name.clone(), ptr);

					if !self.check_pointer_constraint(field.constraint.as_ref(), ptr, depth, visited)? {
						instance.validated = false;
						break;
					}

					if let Some(pointee_type) = pointee {
						if ptr != 0 && depth > 0 {
							let nested = self.load_inner(ptr, pointee_type, depth - 1, visited)?;
							let pointee_failed = !nested.validated;
							instance.nested.insert(field.name.clone(), nested);
							if pointee_failed && !*weak {
								instance.validated = false;
								break;
							}
						}
					}
				}
				FieldKind::Inline(type_name) => {
					let nested = self.load_inner(addr + field.offset as u64, type_name, depth, visited)?;
					let nested_failed = !nested.validated;
					instance.nested.insert(field.name.clone(), nested);
					if nested_failed {
						instance.validated = false;
						break;
					}
				}
				FieldKind::Array { element_size, count } => {
					if *element_size as usize == pointer_width.as_bytes() {
						let mut pointers = Vec::with_capacity(*count as usize);
						let mut array_ok = true;
						for i in 0..*count {
							let start = (i * element_size) as usize;
							let end = start + *element_size as usize;
							match self.handler.platform().read_pointer_as(&field_bytes[start..end], pointer_width) {
								Ok(p) => pointers.push(p),
								Err(_) => {
									array_ok = false;
									break;
								}
							}
						}
						instance.pointer_arrays.insert(field.name.clone(), pointers);
						if !array_ok {
							instance.validated = false;
							break;
						}
					} else {
						instance.raw.insert(field.name.clone(), field_bytes.to_vec());
					}
				}
				FieldKind::Opaque { .. } => {
					instance.raw.insert(field.name.clone(), field_bytes.to_vec());
				}
			}
		}

		Ok(instance)
	}

	/// Evaluates a pointer-field constraint. `ValidInstanceOf` recursively
	/// loads the pointee as the named type and requires it to validate,
	/// distinct from `ValidPointer`'s region-only check (spec.md §3: "pointer
	/// must reference a valid instance of a given Record Type" is its own
	/// constraint, not a synonym for "pointer must reference a valid
	/// region"). Like the `pointee`-driven recursion above, a null pointer
	/// trivially satisfies the constraint and `depth == 0` skips the
	/// recursive instance check (but not the region check) rather than
	/// failing it, mirroring spec.md §4.F's depth-0 pre-filtering behavior.
	fn check_pointer_constraint(
		&self,
		constraint: Option<&Constraint>,
		ptr: u64,
		depth: u32,
		visited: &mut HashSet<(u64, String)>,
	) -> HsResult<bool> {
		match constraint {
			None => Ok(true),
			Some(Constraint::NotNull) => Ok(ptr != 0),
			Some(Constraint::ValidPointer) => {
				Ok(ptr == 0 || self.handler.is_valid_address(ptr).is_some())
			}
			Some(Constraint::ValidInstanceOf(type_name)) => {
				if ptr == 0 {
					return Ok(true);
				}
				if self.handler.is_valid_address(ptr).is_none() {
					return Ok(false);
				}
				if depth == 0 {
					return Ok(true);
				}
				let nested = self.load_inner(ptr, type_name, depth - 1, visited)?;
				Ok(nested.validated)
			}
			Some(other) => {
				// Scalar constraints applied to a pointer field are a
				// record-type authoring mistake; treat them as always
				// satisfied rather than panicking on untrusted data.
				log::warn!("scalar constraint {other:?} applied to pointer field, ignoring");
				Ok(true)
			}
		}
	}
}

/// Decodes one record without needing to construct a [`Validator`]
/// explicitly, for callers that only need a single one-shot load.
pub fn load_record(
	handler: &MemoryHandler,
	registry: &RecordRegistry,
	addr: u64,
	type_name: &str,
) -> HsResult<RecordInstance> {
	Validator::new(handler, registry).load_record(addr, type_name)
}
