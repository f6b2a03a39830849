use std::iter::Peekable;
use std::str::Chars;
use anyhow::{anyhow, bail, Context, Result};

/// Represents a field type, or a parameter or return type of a method.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Type {
	/// A `byte`. In rust, this is a `i8`.
	B,
	/// A `char`.
	C,
	/// A `double`. In rust, this is a `f64`.
	D,
	/// A `float`. In rust, this is a `f32`.
	F,
	/// An `int`. In rust, this is a `i32`.
	I,
	/// A `long`. In rust, this is a `i64`.
	J,
	/// A `short`. In rust, this is a `i16`.
	S,
	/// A `boolean`. In rust, this is a `bool`.
	Z,
	/// An instance of the class with that name.
	Object(String),
	/// An array type, stored as its descriptor (like `[[I`), which is also its class name.
	Array(String),
}

impl Type {
	/// The number of local variable slots, or operand stack slots, a value of this type takes.
	pub fn size(&self) -> u16 {
		match self {
			Type::D | Type::J => 2,
			_ => 1,
		}
	}
}

/// A parsed method descriptor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MethodDescriptor {
	pub parameters: Vec<Type>,
	/// [`None`] for `void`.
	pub return_type: Option<Type>,
}

impl MethodDescriptor {
	/// The number of local variable slots the arguments take, without an implicit `this`.
	pub fn arguments_size(&self) -> u16 {
		self.parameters.iter().map(Type::size).sum()
	}
}

// The grammar for descriptors is:
//   FieldDescriptor:
//     FieldType
//
//   MethodDescriptor:
//     "(" FieldType* ")" ReturnDescriptor
//
//   ReturnDescriptor:
//     FieldType | "V"
//
//   FieldType:
//     "B" | "C" | "D" | "F" | "I" | "J" | "S" | "Z" |
//     "L" ClassName ";" |
//     "[" FieldType
fn read_field_type(chars: &mut Peekable<Chars>) -> Result<Type> {
	let mut array = String::new();
	while chars.next_if_eq(&'[').is_some() {
		array.push('[');
	}
	if array.len() > 255 {
		bail!("array type with more than 255 dimensions");
	}

	let char = chars.next().ok_or_else(|| anyhow!("unexpected abrupt ending of descriptor"))?;
	let element = match char {
		'B' => Type::B,
		'C' => Type::C,
		'D' => Type::D,
		'F' => Type::F,
		'I' => Type::I,
		'J' => Type::J,
		'S' => Type::S,
		'Z' => Type::Z,
		'L' => {
			let mut name = String::new();
			loop {
				match chars.next() {
					Some(';') => break,
					Some(char) => name.push(char),
					None => bail!("unexpected abrupt ending of descriptor"),
				}
			}
			if name.is_empty() {
				bail!("empty class name in descriptor");
			}
			Type::Object(name)
		},
		x => bail!("unexpected char {x:?} in descriptor"),
	};

	if array.is_empty() {
		Ok(element)
	} else {
		write_field_type(&element, &mut array);
		Ok(Type::Array(array))
	}
}

fn write_field_type(t: &Type, string: &mut String) {
	match t {
		Type::B => string.push('B'),
		Type::C => string.push('C'),
		Type::D => string.push('D'),
		Type::F => string.push('F'),
		Type::I => string.push('I'),
		Type::J => string.push('J'),
		Type::S => string.push('S'),
		Type::Z => string.push('Z'),
		Type::Object(name) => {
			string.push('L');
			string.push_str(name);
			string.push(';');
		},
		Type::Array(descriptor) => string.push_str(descriptor),
	}
}

/// Parses a field descriptor, like `I` or `[Ljava/lang/String;`.
pub fn parse_field_descriptor(descriptor: &str) -> Result<Type> {
	let mut chars = descriptor.chars().peekable();
	let t = read_field_type(&mut chars)
		.with_context(|| anyhow!("failed to read field descriptor {descriptor:?}"))?;
	if chars.peek().is_some() {
		bail!("expected end of field descriptor {descriptor:?}, got {:?} remaining", chars.collect::<String>());
	}
	Ok(t)
}

/// Parses a method descriptor, like `(IJ)V`.
pub fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
	let mut chars = descriptor.chars().peekable();

	if chars.next_if_eq(&'(').is_none() {
		bail!("method descriptor {descriptor:?} doesn't start with '('");
	}

	let mut parameters = Vec::new();
	while chars.next_if_eq(&')').is_none() {
		let t = read_field_type(&mut chars)
			.with_context(|| anyhow!("failed to read parameter descriptor of {descriptor:?}"))?;
		parameters.push(t);
	}

	let return_type = if chars.next_if_eq(&'V').is_some() {
		None
	} else {
		let t = read_field_type(&mut chars)
			.with_context(|| anyhow!("failed to read return descriptor of {descriptor:?}"))?;
		Some(t)
	};

	if chars.peek().is_some() {
		bail!("expected end of method descriptor {descriptor:?}, got {:?} remaining", chars.collect::<String>());
	}

	Ok(MethodDescriptor { parameters, return_type })
}

/// Returns the argument size + 1 (for the implicit `this`), as used in the count byte of `invokeinterface`.
pub(crate) fn interface_arguments_count(descriptor: &str) -> Result<u8> {
	let size = parse_method_descriptor(descriptor)?.arguments_size() + 1;
	u8::try_from(size)
		.with_context(|| anyhow!("arguments of method descriptor {descriptor:?} take more than 255 slots"))
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::tree::descriptor::{interface_arguments_count, parse_field_descriptor, parse_method_descriptor, MethodDescriptor, Type};

	#[test]
	fn field() -> Result<()> {
		assert_eq!(parse_field_descriptor("J")?, Type::J);
		assert_eq!(parse_field_descriptor("Ljava/lang/Thread;")?, Type::Object("java/lang/Thread".to_owned()));
		assert_eq!(parse_field_descriptor("[[I")?, Type::Array("[[I".to_owned()));
		assert_eq!(parse_field_descriptor("[Ljava/lang/Object;")?, Type::Array("[Ljava/lang/Object;".to_owned()));
		Ok(())
	}

	#[test]
	fn field_err() {
		assert!(parse_field_descriptor("").is_err());
		assert!(parse_field_descriptor("V").is_err());
		assert!(parse_field_descriptor("[V").is_err());
		assert!(parse_field_descriptor("()V").is_err());
		assert!(parse_field_descriptor("L;").is_err());
		assert!(parse_field_descriptor("Ljava/lang/Object").is_err());
		assert!(parse_field_descriptor("II").is_err());
	}

	#[test]
	fn method() -> Result<()> {
		assert_eq!(parse_method_descriptor("()V")?, MethodDescriptor { parameters: vec![], return_type: None });
		assert_eq!(
			parse_method_descriptor("(IDLjava/lang/Thread;)Ljava/lang/Object;")?,
			MethodDescriptor {
				parameters: vec![Type::I, Type::D, Type::Object("java/lang/Thread".to_owned())],
				return_type: Some(Type::Object("java/lang/Object".to_owned())),
			}
		);
		assert_eq!(parse_method_descriptor("([JZ)[B")?.return_type, Some(Type::Array("[B".to_owned())));
		Ok(())
	}

	#[test]
	fn method_err() {
		assert!(parse_method_descriptor("").is_err());
		assert!(parse_method_descriptor("V").is_err());
		assert!(parse_method_descriptor("(").is_err());
		assert!(parse_method_descriptor("()").is_err());
		assert!(parse_method_descriptor("(V)V").is_err());
		assert!(parse_method_descriptor("()VV").is_err());
	}

	#[test]
	fn argument_sizes() -> Result<()> {
		assert_eq!(parse_method_descriptor("()V")?.arguments_size(), 0);
		assert_eq!(parse_method_descriptor("(JD)V")?.arguments_size(), 4);
		assert_eq!(parse_method_descriptor("(I[JLjava/lang/String;)J")?.arguments_size(), 3);
		assert_eq!(interface_arguments_count("()V")?, 1);
		assert_eq!(interface_arguments_count("(IJ)V")?, 4);
		Ok(())
	}
}
