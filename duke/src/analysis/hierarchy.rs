use std::collections::HashSet;
use anyhow::{bail, Result};
use indexmap::IndexMap;

pub(crate) const OBJECT: &str = "java/lang/Object";
pub(crate) const THROWABLE: &str = "java/lang/Throwable";

/// Answers questions about classes that aren't the one being written, for merging reference types.
pub trait TypeHierarchy {
	/// The super class of the named class, or [`None`] if it's unknown (or `java/lang/Object`).
	fn super_class(&self, name: &str) -> Option<&str>;

	/// Whether the named class is known to be an interface.
	fn is_interface(&self, _name: &str) -> bool {
		false
	}
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
	super_class: Option<String>,
	interface: bool,
}

/// A [`TypeHierarchy`] backed by a table of `class -> super class` entries.
///
/// The [`Default`] one knows the common classes of `java.lang`.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownHierarchy {
	classes: IndexMap<String, Entry>,
}

impl KnownHierarchy {
	/// Creates a hierarchy that doesn't know anything.
	pub fn empty() -> KnownHierarchy {
		KnownHierarchy { classes: IndexMap::new() }
	}

	pub fn insert(&mut self, name: impl Into<String>, super_class: Option<String>, interface: bool) {
		self.classes.insert(name.into(), Entry { super_class, interface });
	}

	pub fn contains(&self, name: &str) -> bool {
		self.classes.contains_key(name)
	}
}

impl Default for KnownHierarchy {
	fn default() -> Self {
		let mut hierarchy = KnownHierarchy::empty();
		hierarchy.insert(OBJECT, None, false);
		for (name, super_class) in [
			("java/lang/String", OBJECT),
			("java/lang/Class", OBJECT),
			("java/lang/Thread", OBJECT),
			("java/lang/Number", OBJECT),
			("java/lang/Boolean", OBJECT),
			("java/lang/Character", OBJECT),
			("java/lang/Byte", "java/lang/Number"),
			("java/lang/Short", "java/lang/Number"),
			("java/lang/Integer", "java/lang/Number"),
			("java/lang/Long", "java/lang/Number"),
			("java/lang/Float", "java/lang/Number"),
			("java/lang/Double", "java/lang/Number"),
			("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
			("java/lang/AbstractStringBuilder", OBJECT),
			(THROWABLE, OBJECT),
			("java/lang/Exception", THROWABLE),
			("java/lang/Error", THROWABLE),
			("java/lang/RuntimeException", "java/lang/Exception"),
			("java/lang/InterruptedException", "java/lang/Exception"),
			("java/lang/ReflectiveOperationException", "java/lang/Exception"),
			("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
			("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
			("java/lang/IllegalStateException", "java/lang/RuntimeException"),
			("java/lang/NullPointerException", "java/lang/RuntimeException"),
			("java/lang/ClassCastException", "java/lang/RuntimeException"),
			("java/lang/ArithmeticException", "java/lang/RuntimeException"),
			("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
			("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
			("java/lang/VirtualMachineError", "java/lang/Error"),
			("java/lang/LinkageError", "java/lang/Error"),
			("java/io/IOException", "java/lang/Exception"),
		] {
			hierarchy.insert(name, Some(super_class.to_owned()), false);
		}
		for name in ["java/lang/Runnable", "java/lang/Comparable", "java/lang/CharSequence", "java/lang/Iterable", "java/lang/AutoCloseable"] {
			hierarchy.insert(name, Some(OBJECT.to_owned()), true);
		}
		hierarchy
	}
}

impl TypeHierarchy for KnownHierarchy {
	fn super_class(&self, name: &str) -> Option<&str> {
		self.classes.get(name).and_then(|entry| entry.super_class.as_deref())
	}

	fn is_interface(&self, name: &str) -> bool {
		self.classes.get(name).is_some_and(|entry| entry.interface)
	}
}

/// Puts the class being written on top of another hierarchy.
pub(crate) struct WithClass<'a> {
	pub(crate) name: &'a str,
	pub(crate) super_class: Option<&'a str>,
	pub(crate) interface: bool,
	pub(crate) inner: &'a dyn TypeHierarchy,
}

impl TypeHierarchy for WithClass<'_> {
	fn super_class(&self, name: &str) -> Option<&str> {
		if name == self.name {
			self.super_class
		} else {
			self.inner.super_class(name)
		}
	}

	fn is_interface(&self, name: &str) -> bool {
		if name == self.name {
			self.interface
		} else {
			self.inner.is_interface(name)
		}
	}
}

/// Finds the most specific class both named classes (or array descriptors) can be assigned to.
///
/// Interfaces and arrays end up as `java/lang/Object`. Two classes without a known common ancestor are an error, since
/// picking `java/lang/Object` for them makes the verifier reject any later use as the actual common super class.
pub(crate) fn common_super_class(hierarchy: &dyn TypeHierarchy, a: &str, b: &str) -> Result<String> {
	if a == b {
		return Ok(a.to_owned());
	}
	if a == OBJECT || b == OBJECT || a.starts_with('[') || b.starts_with('[') || hierarchy.is_interface(a) || hierarchy.is_interface(b) {
		return Ok(OBJECT.to_owned());
	}

	let mut ancestors = HashSet::new();
	let mut current = a;
	ancestors.insert(current);
	while let Some(parent) = hierarchy.super_class(current) {
		if !ancestors.insert(parent) {
			bail!("cycle in the class hierarchy at {parent:?}");
		}
		current = parent;
	}

	let mut seen = HashSet::new();
	let mut current = b;
	loop {
		if ancestors.contains(current) {
			return Ok(current.to_owned());
		}
		if !seen.insert(current) {
			bail!("cycle in the class hierarchy at {current:?}");
		}
		match hierarchy.super_class(current) {
			Some(parent) => current = parent,
			None => bail!("no common super class of {a:?} and {b:?} is known, the class hierarchy ends at {current:?}"),
		}
	}
}
