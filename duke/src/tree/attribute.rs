/// An attribute that isn't interpreted, kept as its name and raw contents.
///
/// Pool indices inside `bytes` refer to the [`ConstantPool`](crate::pool::ConstantPool) of the class it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub bytes: Vec<u8>,
}

impl Attribute {
	pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Attribute {
		Attribute { name: name.into(), bytes }
	}
}
