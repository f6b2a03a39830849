pub mod code;
pub mod instruction_list;

use std::fmt::{Display, Formatter};
use crate::class_constants::access;
use crate::tree::attribute::Attribute;
use crate::tree::method::code::Code;

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
	pub access: u16,
	pub name: String,
	pub descriptor: String,

	/// The decoded `Code` attribute, [`None`] for abstract and native methods.
	pub code: Option<Code>,

	pub attributes: Vec<Attribute>,
}

impl Method {
	pub fn new(access: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Method {
		Method {
			access,
			name: name.into(),
			descriptor: descriptor.into(),
			code: None,
			attributes: Vec::new(),
		}
	}

	pub fn is_static(&self) -> bool {
		self.access & access::STATIC != 0
	}
}

/// A reference to a method, as used by the invoke instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
	pub class: String,
	pub name: String,
	pub desc: String,
}

impl MethodRef {
	pub fn new(class: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> MethodRef {
		MethodRef { class: class.into(), name: name.into(), desc: desc.into() }
	}
}

impl Display for MethodRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}{}", self.class, self.name, self.desc)
	}
}
