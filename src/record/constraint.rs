use super::ScalarValue;

/// A declared constraint on a [`super::Field`]'s decoded value.
#[derive(Debug, Clone)]
pub enum Constraint {
	Equals(ScalarValue),
	OneOf(Vec<ScalarValue>),
	/// Inclusive range, compared by magnitude (`ScalarValue::as_i128`).
	Range(ScalarValue, ScalarValue),
	NotNull,
	/// The pointer must resolve to some region via `find_region`.
	ValidPointer,
	/// The pointer must resolve to a region and recursively validate as
	/// an instance of the named, registered record type.
	ValidInstanceOf(String),
}

/// Evaluates a scalar-valued constraint. Pointer-only constraint variants
/// are trivially satisfied here; they are evaluated against pointer
/// fields by the Validator instead.
pub fn check_scalar(constraint: &Constraint, value: ScalarValue) -> bool {
	match constraint {
		Constraint::Equals(expected) => value.as_i128() == expected.as_i128(),
		Constraint::OneOf(set) => set.iter().any(|v| v.as_i128() == value.as_i128()),
		Constraint::Range(lo, hi) => {
			let v = value.as_i128();
			v >= lo.as_i128() && v <= hi.as_i128()
		}
		Constraint::NotNull | Constraint::ValidPointer | Constraint::ValidInstanceOf(_) => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn equals_constraint() {
		let c = Constraint::Equals(ScalarValue::U32(0xDEAD_BEEF));
		assert!(check_scalar(&c, ScalarValue::U32(0xDEAD_BEEF)));
		assert!(!check_scalar(&c, ScalarValue::U32(0)));
	}

	#[test]
	fn range_constraint() {
		let c = Constraint::Range(ScalarValue::I32(0), ScalarValue::I32(10));
		assert!(check_scalar(&c, ScalarValue::U8(5)));
		assert!(!check_scalar(&c, ScalarValue::I32(11)));
	}

	#[test]
	fn one_of_constraint() {
		let c = Constraint::OneOf(vec![ScalarValue::U8(1), ScalarValue::U8(2)]);
		assert!(check_scalar(&c, ScalarValue::U8(2)));
		assert!(!check_scalar(&c, ScalarValue::U8(3)));
	}
}
