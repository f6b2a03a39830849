//! The constant pool of a class file.
//!
//! The pool read from a class is kept as is, so that every index into it stays valid. Entries needed for writing are
//! looked up first, and only appended if there's no equal entry yet.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use anyhow::{anyhow, bail, Context, Result};
use java_string::{JavaStr, JavaString};
use crate::class_constants::pool;
use crate::{ClassRead, ClassWrite, jstring};
use crate::tree::field::FieldRef;
use crate::tree::method::code::{ConstantDynamic, InvokeDynamic, Loadable};
use crate::tree::method::MethodRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolEntry {
	Class { name_index: u16 },
	FieldRef { class_index: u16, name_and_type_index: u16 },
	MethodRef { class_index: u16, name_and_type_index: u16 },
	InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
	String { string_index: u16 },
	Integer { bytes: i32 },
	Float { bytes: u32 },
	Long { bytes: i64 },
	Double { bytes: u64 },
	NameAndType { name_index: u16, descriptor_index: u16 },
	Utf8 { string: JavaString },
	MethodHandle { reference_kind: u8, reference_index: u16 },
	MethodType { descriptor_index: u16 },
	Dynamic { bootstrap_method_attribute_index: u16, name_and_type_index: u16 },
	InvokeDynamic { bootstrap_method_attribute_index: u16, name_and_type_index: u16 },
	Module { name_index: u16 },
	Package { name_index: u16 },
}

impl PoolEntry {
	/// Long and double take up two pool slots.
	fn slots(&self) -> u16 {
		if matches!(self, PoolEntry::Long { .. } | PoolEntry::Double { .. }) { 2 } else { 1 }
	}
}

/// Helper for adding the pool index to errors.
trait PoolContext<T> {
	fn pool_context(self, index: u16) -> Result<T>;
}
impl<T> PoolContext<T> for Result<T> {
	fn pool_context(self, index: u16) -> Result<T> {
		self.with_context(|| anyhow!("for pool index {index}"))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
	/// We store a [`None`] for the zero index, as well as for the upper indices of [`PoolEntry::Double`] and [`PoolEntry::Long`].
	entries: Vec<Option<PoolEntry>>,
	/// Maps an entry to its index. For entries present multiple times, the first index is stored.
	map: HashMap<PoolEntry, u16>,
}

impl Default for ConstantPool {
	fn default() -> Self {
		ConstantPool::new()
	}
}

impl ConstantPool {
	/// Creates an empty pool. The element at index zero is occupied, but never written.
	pub fn new() -> ConstantPool {
		ConstantPool {
			entries: vec![None],
			map: HashMap::new(),
		}
	}

	/// The value written as `constant_pool_count` in the class file.
	pub fn count(&self) -> u16 {
		// can't overflow, `put` checks that
		self.entries.len() as u16
	}

	/// Reads the constant pool from the specified reader. The first thing read is an `u16` specifying the size of the constant pool.
	pub(crate) fn read(reader: &mut impl ClassRead) -> Result<ConstantPool> {
		let mut pool = ConstantPool::new();

		let constant_pool_count = reader.read_u16_as_usize()?;
		while pool.entries.len() < constant_pool_count {
			let index = pool.entries.len();
			let entry = match reader.read_u8()? {
				pool::UTF8 => {
					let length = reader.read_u16_as_usize()?;
					let vec = reader.read_u8_vec(length)?;
					let string = jstring::from_vec_to_string(vec)
						.with_context(|| anyhow!("at pool index {index}"))?;
					PoolEntry::Utf8 { string }
				},
				pool::INTEGER => PoolEntry::Integer { bytes: reader.read_i32()? },
				pool::FLOAT => PoolEntry::Float { bytes: reader.read_u32()? },
				pool::LONG => PoolEntry::Long { bytes: reader.read_i64()? },
				pool::DOUBLE => PoolEntry::Double { bytes: reader.read_u64()? },
				pool::CLASS => PoolEntry::Class { name_index: reader.read_u16()? },
				pool::STRING => PoolEntry::String { string_index: reader.read_u16()? },
				pool::FIELD_REF => PoolEntry::FieldRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::METHOD_REF => PoolEntry::MethodRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::INTERFACE_METHOD_REF => PoolEntry::InterfaceMethodRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::NAME_AND_TYPE => PoolEntry::NameAndType {
					name_index: reader.read_u16()?,
					descriptor_index: reader.read_u16()?,
				},
				pool::METHOD_HANDLE => PoolEntry::MethodHandle {
					reference_kind: reader.read_u8()?,
					reference_index: reader.read_u16()?,
				},
				pool::METHOD_TYPE => PoolEntry::MethodType { descriptor_index: reader.read_u16()? },
				pool::DYNAMIC => PoolEntry::Dynamic {
					bootstrap_method_attribute_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
					bootstrap_method_attribute_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::MODULE => PoolEntry::Module { name_index: reader.read_u16()? },
				pool::PACKAGE => PoolEntry::Package { name_index: reader.read_u16()? },
				tag => bail!("unknown constant pool tag {tag} at pool index {index}"),
			};

			pool.map.entry(entry.clone()).or_insert(index as u16);
			let slots = entry.slots();
			pool.entries.push(Some(entry));
			if slots == 2 {
				pool.entries.push(None);
			}
		}

		if pool.entries.len() != constant_pool_count {
			bail!("last pool entry is a long or double, but only takes one of its two slots in a pool of count {constant_pool_count}");
		}

		Ok(pool)
	}

	/// Writes the constant pool to the specified writer. The first thing written is an `u16` specifying the size of the constant pool.
	pub(crate) fn write(&self, writer: &mut impl ClassWrite) -> Result<()> {
		writer.write_u16(self.count())?;

		for entry in self.entries.iter().flatten() {
			match entry {
				PoolEntry::Utf8 { string } => {
					writer.write_u8(pool::UTF8)?;
					let vec = jstring::from_string_to_vec(string);
					writer.write_usize_as_u16(vec.len()).context("failed to write length of string")?;
					writer.write_u8_slice(&vec)?;
				},
				&PoolEntry::Integer { bytes } => {
					writer.write_u8(pool::INTEGER)?;
					writer.write_i32(bytes)?;
				},
				&PoolEntry::Float { bytes } => {
					writer.write_u8(pool::FLOAT)?;
					writer.write_u32(bytes)?;
				},
				&PoolEntry::Long { bytes } => {
					writer.write_u8(pool::LONG)?;
					writer.write_i64(bytes)?;
				},
				&PoolEntry::Double { bytes } => {
					writer.write_u8(pool::DOUBLE)?;
					writer.write_u64(bytes)?;
				},
				&PoolEntry::Class { name_index } => {
					writer.write_u8(pool::CLASS)?;
					writer.write_u16(name_index)?;
				},
				&PoolEntry::String { string_index } => {
					writer.write_u8(pool::STRING)?;
					writer.write_u16(string_index)?;
				},
				&PoolEntry::FieldRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::FIELD_REF)?;
					writer.write_u16(class_index)?;
					writer.write_u16(name_and_type_index)?;
				},
				&PoolEntry::MethodRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::METHOD_REF)?;
					writer.write_u16(class_index)?;
					writer.write_u16(name_and_type_index)?;
				},
				&PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::INTERFACE_METHOD_REF)?;
					writer.write_u16(class_index)?;
					writer.write_u16(name_and_type_index)?;
				},
				&PoolEntry::NameAndType { name_index, descriptor_index } => {
					writer.write_u8(pool::NAME_AND_TYPE)?;
					writer.write_u16(name_index)?;
					writer.write_u16(descriptor_index)?;
				},
				&PoolEntry::MethodHandle { reference_kind, reference_index } => {
					writer.write_u8(pool::METHOD_HANDLE)?;
					writer.write_u8(reference_kind)?;
					writer.write_u16(reference_index)?;
				},
				&PoolEntry::MethodType { descriptor_index } => {
					writer.write_u8(pool::METHOD_TYPE)?;
					writer.write_u16(descriptor_index)?;
				},
				&PoolEntry::Dynamic { bootstrap_method_attribute_index, name_and_type_index } => {
					writer.write_u8(pool::DYNAMIC)?;
					writer.write_u16(bootstrap_method_attribute_index)?;
					writer.write_u16(name_and_type_index)?;
				},
				&PoolEntry::InvokeDynamic { bootstrap_method_attribute_index, name_and_type_index } => {
					writer.write_u8(pool::INVOKE_DYNAMIC)?;
					writer.write_u16(bootstrap_method_attribute_index)?;
					writer.write_u16(name_and_type_index)?;
				},
				&PoolEntry::Module { name_index } => {
					writer.write_u8(pool::MODULE)?;
					writer.write_u16(name_index)?;
				},
				&PoolEntry::Package { name_index } => {
					writer.write_u8(pool::PACKAGE)?;
					writer.write_u16(name_index)?;
				},
			}
		}

		Ok(())
	}
}

impl ConstantPool {
	fn get(&self, index: u16) -> Result<&PoolEntry> {
		if let Some(Some(entry)) = self.entries.get(index as usize) {
			Ok(entry)
		} else {
			bail!("pool entry at index {index:?} is not there: either index too large or the upper half of long or double");
		}
	}

	/// Returns [`None`] if `index` is zero, otherwise returns [`Some`] of the result of the function `f`.
	pub(crate) fn get_optional<T>(&self, index: u16, f: impl Fn(&ConstantPool, u16) -> Result<T>) -> Result<Option<T>> {
		if index == 0 {
			Ok(None)
		} else {
			Ok(Some(f(self, index)?))
		}
	}

	pub fn get_utf8(&self, index: u16) -> Result<&JavaStr> {
		let PoolEntry::Utf8 { string } = self.get(index)? else {
			bail!("pool entry at index {index} not `Utf8`: {:?}", self.get(index)?);
		};
		Ok(&**string)
	}

	/// Gets an `Utf8` entry used as a name or descriptor.
	pub fn get_str(&self, index: u16) -> Result<String> {
		jstring::as_str(self.get_utf8(index)?)
			.map(str::to_owned)
			.pool_context(index)
	}

	pub fn get_class(&self, index: u16) -> Result<String> {
		let &PoolEntry::Class { name_index } = self.get(index)? else {
			bail!("pool entry at index {index} not `Class`: {:?}", self.get(index)?);
		};
		self.get_str(name_index).pool_context(index)
	}

	pub fn get_name_and_type(&self, index: u16) -> Result<(String, String)> {
		let &PoolEntry::NameAndType { name_index, descriptor_index } = self.get(index)? else {
			bail!("pool entry at index {index} not `NameAndType`: {:?}", self.get(index)?);
		};
		Ok((self.get_str(name_index)?, self.get_str(descriptor_index)?))
	}

	pub fn get_field_ref(&self, index: u16) -> Result<FieldRef> {
		let &PoolEntry::FieldRef { class_index, name_and_type_index } = self.get(index)? else {
			bail!("pool entry at index {index} not `FieldRef`: {:?}", self.get(index)?);
		};
		let class = self.get_class(class_index).pool_context(index)?;
		let (name, desc) = self.get_name_and_type(name_and_type_index).pool_context(index)?;
		Ok(FieldRef { class, name, desc })
	}

	/// Gets a `MethodRef` or an `InterfaceMethodRef`.
	///
	/// The `bool` is `true` if it's an `InterfaceMethodRef`.
	pub fn get_method_ref(&self, index: u16) -> Result<(MethodRef, bool)> {
		let (class_index, name_and_type_index, interface) = match *self.get(index)? {
			PoolEntry::MethodRef { class_index, name_and_type_index } => (class_index, name_and_type_index, false),
			PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => (class_index, name_and_type_index, true),
			ref entry => bail!("pool entry at index {index} neither `MethodRef` nor `InterfaceMethodRef`: {entry:?}"),
		};
		let class = self.get_class(class_index).pool_context(index)?;
		let (name, desc) = self.get_name_and_type(name_and_type_index).pool_context(index)?;
		Ok((MethodRef { class, name, desc }, interface))
	}

	pub fn get_invoke_dynamic(&self, index: u16) -> Result<InvokeDynamic> {
		let &PoolEntry::InvokeDynamic { bootstrap_method_attribute_index, name_and_type_index } = self.get(index)? else {
			bail!("pool entry at index {index} not `InvokeDynamic`: {:?}", self.get(index)?);
		};
		let (name, descriptor) = self.get_name_and_type(name_and_type_index).pool_context(index)?;
		Ok(InvokeDynamic { bootstrap_method: bootstrap_method_attribute_index, name, descriptor })
	}

	pub fn get_loadable(&self, index: u16) -> Result<Loadable> {
		Ok(match *self.get(index)? {
			PoolEntry::Integer { bytes } => Loadable::Integer(bytes),
			PoolEntry::Float { bytes } => Loadable::Float(f32::from_bits(bytes)),
			PoolEntry::Long { bytes } => Loadable::Long(bytes),
			PoolEntry::Double { bytes } => Loadable::Double(f64::from_bits(bytes)),
			PoolEntry::Class { .. } => Loadable::Class(self.get_class(index)?),
			PoolEntry::String { string_index } => Loadable::String(self.get_utf8(string_index).pool_context(index)?.to_owned()),
			PoolEntry::MethodHandle { .. } => Loadable::MethodHandle(index),
			PoolEntry::MethodType { descriptor_index } => Loadable::MethodType(self.get_str(descriptor_index).pool_context(index)?),
			PoolEntry::Dynamic { bootstrap_method_attribute_index, name_and_type_index } => {
				let (name, descriptor) = self.get_name_and_type(name_and_type_index).pool_context(index)?;
				Loadable::Dynamic(ConstantDynamic { bootstrap_method: bootstrap_method_attribute_index, name, descriptor })
			},
			ref entry => bail!("pool entry at index {index} is not loadable: {entry:?}"),
		})
	}
}

impl ConstantPool {
	fn put(&mut self, entry: PoolEntry) -> Result<u16> {
		match self.map.entry(entry) {
			Entry::Occupied(entry) => Ok(*entry.get()),
			Entry::Vacant(entry) => {
				let index = self.entries.len();
				let slots = entry.key().slots() as usize;

				// `constant_pool_count` is an u16, so the largest index is `u16::MAX - 1`
				if index + slots > u16::MAX as usize {
					bail!("pool count overflowed while adding pool entry {:?} to pool at index {}", entry.key(), index);
				}

				self.entries.push(Some(entry.key().clone()));
				if slots == 2 {
					self.entries.push(None);
				}
				Ok(*entry.insert(index as u16))
			},
		}
	}

	pub fn put_utf8(&mut self, value: &str) -> Result<u16> {
		self.put(PoolEntry::Utf8 { string: JavaString::from(value) })
	}

	pub fn put_java_utf8(&mut self, value: &JavaStr) -> Result<u16> {
		self.put(PoolEntry::Utf8 { string: value.to_owned() })
	}

	pub fn put_class(&mut self, name: &str) -> Result<u16> {
		let name_index = self.put_utf8(name)?;
		self.put(PoolEntry::Class { name_index })
	}

	pub fn put_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
		let name_index = self.put_utf8(name)?;
		let descriptor_index = self.put_utf8(descriptor)?;
		self.put(PoolEntry::NameAndType { name_index, descriptor_index })
	}

	pub fn put_field_ref(&mut self, value: &FieldRef) -> Result<u16> {
		let class_index = self.put_class(&value.class)?;
		let name_and_type_index = self.put_name_and_type(&value.name, &value.desc)?;
		self.put(PoolEntry::FieldRef { class_index, name_and_type_index })
	}

	/// `true` indicates it's put as an `InterfaceMethodRef`, `false` as a `MethodRef`.
	pub fn put_method_ref(&mut self, value: &MethodRef, interface: bool) -> Result<u16> {
		let class_index = self.put_class(&value.class)?;
		let name_and_type_index = self.put_name_and_type(&value.name, &value.desc)?;
		if interface {
			self.put(PoolEntry::InterfaceMethodRef { class_index, name_and_type_index })
		} else {
			self.put(PoolEntry::MethodRef { class_index, name_and_type_index })
		}
	}

	pub fn put_invoke_dynamic(&mut self, value: &InvokeDynamic) -> Result<u16> {
		let name_and_type_index = self.put_name_and_type(&value.name, &value.descriptor)?;
		self.put(PoolEntry::InvokeDynamic { bootstrap_method_attribute_index: value.bootstrap_method, name_and_type_index })
	}

	/// Stores a loadable constant pool entry.
	///
	/// A [`Loadable::MethodHandle`] is already an index, it's only checked to point to a method handle.
	pub fn put_loadable(&mut self, value: &Loadable) -> Result<u16> {
		match value {
			&Loadable::Integer(value) => self.put(PoolEntry::Integer { bytes: value }),
			&Loadable::Float(value) => self.put(PoolEntry::Float { bytes: value.to_bits() }),
			&Loadable::Long(value) => self.put(PoolEntry::Long { bytes: value }),
			&Loadable::Double(value) => self.put(PoolEntry::Double { bytes: value.to_bits() }),
			Loadable::Class(name) => self.put_class(name),
			Loadable::String(string) => {
				let string_index = self.put_java_utf8(string)?;
				self.put(PoolEntry::String { string_index })
			},
			&Loadable::MethodHandle(index) => {
				let PoolEntry::MethodHandle { .. } = self.get(index)? else {
					bail!("pool entry at index {index} not `MethodHandle`: {:?}", self.get(index)?);
				};
				Ok(index)
			},
			Loadable::MethodType(descriptor) => {
				let descriptor_index = self.put_utf8(descriptor)?;
				self.put(PoolEntry::MethodType { descriptor_index })
			},
			Loadable::Dynamic(dynamic) => {
				let name_and_type_index = self.put_name_and_type(&dynamic.name, &dynamic.descriptor)?;
				self.put(PoolEntry::Dynamic { bootstrap_method_attribute_index: dynamic.bootstrap_method, name_and_type_index })
			},
		}
	}
}
