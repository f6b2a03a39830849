use std::fmt::{Display, Formatter};
use crate::tree::attribute::Attribute;

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub access: u16,
	pub name: String,
	pub descriptor: String,

	pub attributes: Vec<Attribute>,
}

impl Field {
	pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Field {
		Field {
			access,
			name: name.into(),
			descriptor: descriptor.into(),
			attributes: Vec::new(),
		}
	}
}

/// A reference to a field, as used by `getstatic`, `putstatic`, `getfield` and `putfield`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
	pub class: String,
	pub name: String,
	pub desc: String,
}

impl FieldRef {
	pub fn new(class: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> FieldRef {
		FieldRef { class: class.into(), name: name.into(), desc: desc.into() }
	}
}

impl Display for FieldRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}:{}", self.class, self.name, self.desc)
	}
}
