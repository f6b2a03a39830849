use crate::class_constants::access;
use crate::pool::ConstantPool;
use crate::tree::attribute::Attribute;
use crate::tree::field::Field;
use crate::tree::method::Method;
use crate::tree::version::Version;

/// A class file.
///
/// Names are stored in internal form, like `java/lang/Object`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
	pub version: Version,
	pub access: u16,
	pub name: String,
	pub super_class: Option<String>,
	pub interfaces: Vec<String>,

	pub fields: Vec<Field>,
	pub methods: Vec<Method>,

	pub attributes: Vec<Attribute>,

	/// The constant pool the class was read with.
	///
	/// Kept so that pool indices in [`Attribute`]s stay valid. Writing only ever appends to (a copy of) it.
	pub pool: ConstantPool,
}

impl ClassFile {
	pub fn new(version: Version, access: u16, name: impl Into<String>, super_class: Option<String>) -> ClassFile {
		ClassFile {
			version,
			access,
			name: name.into(),
			super_class,
			interfaces: Vec::new(),

			fields: Vec::new(),
			methods: Vec::new(),

			attributes: Vec::new(),

			pool: ConstantPool::new(),
		}
	}

	pub fn is_interface(&self) -> bool {
		self.access & access::INTERFACE != 0
	}

	/// Finds the first method with the given name and descriptor.
	pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
		self.methods.iter().find(|method| method.name == name && method.descriptor == descriptor)
	}

	pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
		self.methods.iter_mut().find(|method| method.name == name && method.descriptor == descriptor)
	}
}
