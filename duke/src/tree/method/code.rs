use anyhow::{bail, Result};
use java_string::JavaString;
use crate::class_constants::array_type;
use crate::tree::attribute::Attribute;
use crate::tree::field::FieldRef;
use crate::tree::method::instruction_list::InstructionList;
use crate::tree::method::MethodRef;

/// Represents the code of a method.
///
/// All the parts are only reachable through accessors. Getting any of them mutably marks the code as modified,
/// which makes the writer re-encode it instead of copying the bytes it was read from.
#[derive(Debug, Clone)]
pub struct Code {
	max_stack: u16,
	max_locals: u16,

	instructions: InstructionList,
	exception_table: Vec<Exception>,

	line_numbers: Vec<(Label, u16)>,
	local_variables: Vec<Lv>,

	/// The frames of the `StackMapTable` this was read with, in the order of their offsets.
	stack_map: Vec<(Label, StackMapFrame)>,

	/// Attributes of the `Code` attribute that aren't interpreted.
	attributes: Vec<Attribute>,

	/// The contents of the `Code` attribute this was read from, if unmodified since.
	original: Option<Vec<u8>>,
}

impl Code {
	/// Creates new code, with `max_stack` and `max_locals` zero. They get computed on writing.
	pub fn new(instructions: InstructionList) -> Code {
		Code {
			max_stack: 0,
			max_locals: 0,
			instructions,
			exception_table: Vec::new(),
			line_numbers: Vec::new(),
			local_variables: Vec::new(),
			stack_map: Vec::new(),
			attributes: Vec::new(),
			original: None,
		}
	}

	#[allow(clippy::too_many_arguments)]
	pub(crate) fn from_parts(
		max_stack: u16,
		max_locals: u16,
		instructions: InstructionList,
		exception_table: Vec<Exception>,
		line_numbers: Vec<(Label, u16)>,
		local_variables: Vec<Lv>,
		stack_map: Vec<(Label, StackMapFrame)>,
		attributes: Vec<Attribute>,
		original: Vec<u8>,
	) -> Code {
		Code {
			max_stack,
			max_locals,
			instructions,
			exception_table,
			line_numbers,
			local_variables,
			stack_map,
			attributes,
			original: Some(original),
		}
	}

	/// The `max_stack` value read, or `0` for new code. Re-encoding computes a new one.
	pub fn max_stack(&self) -> u16 {
		self.max_stack
	}

	/// The declared `max_locals`. Re-encoding uses the larger of this and the highest local variable slot used.
	pub fn max_locals(&self) -> u16 {
		self.max_locals
	}

	pub fn set_max_locals(&mut self, max_locals: u16) {
		self.original = None;
		self.max_locals = max_locals;
	}

	pub fn instructions(&self) -> &InstructionList {
		&self.instructions
	}

	pub fn instructions_mut(&mut self) -> &mut InstructionList {
		self.original = None;
		&mut self.instructions
	}

	pub fn exception_table(&self) -> &[Exception] {
		&self.exception_table
	}

	pub fn exception_table_mut(&mut self) -> &mut Vec<Exception> {
		self.original = None;
		&mut self.exception_table
	}

	pub fn line_numbers(&self) -> &[(Label, u16)] {
		&self.line_numbers
	}

	pub fn line_numbers_mut(&mut self) -> &mut Vec<(Label, u16)> {
		self.original = None;
		&mut self.line_numbers
	}

	pub fn local_variables(&self) -> &[Lv] {
		&self.local_variables
	}

	pub fn local_variables_mut(&mut self) -> &mut Vec<Lv> {
		self.original = None;
		&mut self.local_variables
	}

	/// The stack map frames read. When re-encoding, they are taken as the frames at their labels instead of merging
	/// the frames coming in there, so that types the hierarchy doesn't know about stay as declared.
	pub fn stack_map(&self) -> &[(Label, StackMapFrame)] {
		&self.stack_map
	}

	/// Clear this after edits that change the types of the locals or the stack at any of the frames.
	pub fn stack_map_mut(&mut self) -> &mut Vec<(Label, StackMapFrame)> {
		self.original = None;
		&mut self.stack_map
	}

	pub fn attributes(&self) -> &[Attribute] {
		&self.attributes
	}

	/// Returns `true` if this code wasn't read from a class file, or was changed since.
	pub fn is_modified(&self) -> bool {
		self.original.is_none()
	}

	pub(crate) fn original(&self) -> Option<&[u8]> {
		self.original.as_deref()
	}
}

/// Compares the decoded contents, but not the bytes they were read from.
impl PartialEq for Code {
	fn eq(&self, other: &Self) -> bool {
		self.max_stack == other.max_stack &&
			self.max_locals == other.max_locals &&
			self.instructions == other.instructions &&
			self.exception_table == other.exception_table &&
			self.line_numbers == other.line_numbers &&
			self.local_variables == other.local_variables &&
			self.stack_map == other.stack_map &&
			self.attributes == other.attributes
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
	pub start: Label,
	pub end: Label,
	pub handler: Label,
	/// The class to catch, or [`None`] for catching anything (used for `finally`).
	pub catch: Option<String>,
}

/// Represents an index of a local variable.
///
/// If the local variable is of type `double` or `long`, it also occupies
/// the [`LvIndex`] with `index = index + 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LvIndex {
	pub index: u16,
}

/// An entry of the `LocalVariableTable` and/or the `LocalVariableTypeTable`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lv {
	pub range: LabelRange,
	pub name: String,
	pub descriptor: Option<String>,
	pub signature: Option<String>,
	pub index: LvIndex,
}

/// A `verification_type_info`, as found in a stack map frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameValue {
	Top,
	Integer,
	Float,
	Long,
	Double,
	Null,
	UninitializedThis,
	/// An instance of the named class, or an array given by its descriptor.
	Object(String),
	/// The value created by the `new` instruction at the label.
	Uninitialized(Label),
}

/// An entry of the `StackMapTable` attribute, given relative to the frame before it.
///
/// Locals are listed one per value, so a `long` or `double` is a single entry. The extended forms of the class file
/// are read into the same variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame {
	/// The locals of the previous frame and an empty stack.
	Same,
	/// The locals of the previous frame and a single value on the stack.
	SameLocals1StackItem(FrameValue),
	/// The locals of the previous frame without the last `1` to `3` of them, and an empty stack.
	Chop(u8),
	/// The locals of the previous frame with `1` to `3` added, and an empty stack.
	Append(Vec<FrameValue>),
	Full {
		locals: Vec<FrameValue>,
		stack: Vec<FrameValue>,
	},
}

/// Represents a bytecode offset using a method-local id.
///
/// Labels are created by the reader for every offset something refers to, or with
/// [`InstructionList::new_label`]. They are attached to an instruction (meaning the offset of that instruction),
/// or to the end of the code.
///
/// The id does **not** correspond to the bytecode offset in any way.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
	pub(crate) id: u32,
}

/// Represents a range of bytecode offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRange {
	/// The start label, inclusive.
	pub start: Label,
	/// The end label, exclusive.
	pub end: Label,
}

/// The dispatch kind of an invoke instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InvokeKind {
	Virtual,
	Special,
	Static,
	Interface,
}

/// A method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invoke {
	pub kind: InvokeKind,
	pub method: MethodRef,
	/// `true` iff the method is referenced with an `InterfaceMethodRef` constant pool entry.
	///
	/// Always `true` for [`InvokeKind::Interface`], always `false` for [`InvokeKind::Virtual`].
	pub interface: bool,
}

impl Invoke {
	/// Creates an invocation of a method of a class, or of an interface for [`InvokeKind::Interface`].
	pub fn new(kind: InvokeKind, method: MethodRef) -> Invoke {
		Invoke { kind, method, interface: kind == InvokeKind::Interface }
	}
}

/// An `invokedynamic` call site.
///
/// The bootstrap method is kept as the index into the `BootstrapMethods` attribute of the class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokeDynamic {
	pub bootstrap_method: u16,
	pub name: String,
	pub descriptor: String,
}

/// A `CONSTANT_Dynamic_info` constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantDynamic {
	pub bootstrap_method: u16,
	pub name: String,
	pub descriptor: String,
}

/// A value loadable with `ldc`, `ldc_w` or `ldc2_w`.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable {
	Integer(i32),
	Float(f32),
	Long(i64),
	Double(f64),
	Class(String),
	String(JavaString),
	/// The constant pool index of a `CONSTANT_MethodHandle_info`.
	MethodHandle(u16),
	MethodType(String),
	Dynamic(ConstantDynamic),
}

impl Loadable {
	/// Whether this takes two stack slots, and needs `ldc2_w`.
	pub fn is_wide(&self) -> bool {
		match self {
			Loadable::Long(_) | Loadable::Double(_) => true,
			Loadable::Dynamic(dynamic) => dynamic.descriptor == "J" || dynamic.descriptor == "D",
			_ => false,
		}
	}
}

/// Represents an instruction of the JVM.
///
/// Each instruction can either:
/// - hold no additional data, like [`Instruction::Nop`],
/// - hold some immediate value, like [`Instruction::BiPush`],
/// - hold a [local variable index][LvIndex], like [`Instruction::ILoad`] (this also represents `iload_0` and `wide iload`),
/// - hold a [`Label`] for jumps, like [`Instruction::IfEq`] (`goto` and `goto_w` are both [`Instruction::Goto`]),
/// - or hold other data the instruction needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
	Nop,
	AConstNull,
	IConstM1, IConst0, IConst1, IConst2, IConst3, IConst4, IConst5,
	LConst0, LConst1,
	FConst0, FConst1, FConst2,
	DConst0, DConst1,
	BiPush(i8),
	SiPush(i16),
	Ldc(Loadable),
	ILoad(LvIndex), LLoad(LvIndex), FLoad(LvIndex), DLoad(LvIndex), ALoad(LvIndex),
	IALoad, LALoad, FALoad, DALoad, AALoad, BALoad, CALoad, SALoad,
	IStore(LvIndex), LStore(LvIndex), FStore(LvIndex), DStore(LvIndex), AStore(LvIndex),
	IAStore, LAStore, FAStore, DAStore, AAStore, BAStore, CAStore, SAStore,
	Pop, Pop2,
	Dup, DupX1, DupX2,
	Dup2, Dup2X1, Dup2X2,
	Swap,
	IAdd, LAdd, FAdd, DAdd,
	ISub, LSub, FSub, DSub,
	IMul, LMul, FMul, DMul,
	IDiv, LDiv, FDiv, DDiv,
	IRem, LRem, FRem, DRem,
	INeg, LNeg, FNeg, DNeg,
	IShl, LShl,
	IShr, LShr,
	IUShr, LUShr,
	IAnd, LAnd,
	IOr, LOr,
	IXor, LXor,
	IInc(LvIndex, i16),
	I2L, I2F, I2D,
	L2I, L2F, L2D,
	F2I, F2L, F2D,
	D2I, D2L, D2F,
	I2B, I2C, I2S,
	LCmp,
	FCmpL, FCmpG,
	DCmpL, DCmpG,
	IfEq(Label), IfNe(Label), IfLt(Label), IfGe(Label), IfGt(Label), IfLe(Label),
	IfICmpEq(Label), IfICmpNe(Label), IfICmpLt(Label), IfICmpGe(Label), IfICmpGt(Label), IfICmpLe(Label),
	IfACmpEq(Label), IfACmpNe(Label),
	Goto(Label),
	Jsr(Label),
	Ret(LvIndex),
	TableSwitch {
		default: Label,
		low: i32,
		high: i32,
		table: Vec<Label>,
	},
	LookupSwitch {
		default: Label,
		/// Note that these must be ordered by key.
		pairs: Vec<(i32, Label)>,
	},
	IReturn, LReturn, FReturn, DReturn, AReturn,
	Return,
	GetStatic(FieldRef),
	PutStatic(FieldRef),
	GetField(FieldRef),
	PutField(FieldRef),
	Invoke(Invoke),
	InvokeDynamic(InvokeDynamic),
	New(String),
	NewArray(ArrayType),
	ANewArray(String),
	ArrayLength,
	AThrow,
	CheckCast(String),
	InstanceOf(String),
	MonitorEnter, MonitorExit,
	MultiANewArray(String, u8),
	IfNull(Label), IfNonNull(Label),
}

impl Instruction {
	/// All the labels this instruction may jump to.
	pub fn branch_targets(&self) -> Vec<Label> {
		match self {
			&Instruction::IfEq(label) | &Instruction::IfNe(label) | &Instruction::IfLt(label) |
			&Instruction::IfGe(label) | &Instruction::IfGt(label) | &Instruction::IfLe(label) |
			&Instruction::IfICmpEq(label) | &Instruction::IfICmpNe(label) | &Instruction::IfICmpLt(label) |
			&Instruction::IfICmpGe(label) | &Instruction::IfICmpGt(label) | &Instruction::IfICmpLe(label) |
			&Instruction::IfACmpEq(label) | &Instruction::IfACmpNe(label) |
			&Instruction::IfNull(label) | &Instruction::IfNonNull(label) |
			&Instruction::Goto(label) | &Instruction::Jsr(label) => vec![label],
			Instruction::TableSwitch { default, table, .. } => {
				let mut vec = Vec::with_capacity(table.len() + 1);
				vec.push(*default);
				vec.extend_from_slice(table);
				vec
			},
			Instruction::LookupSwitch { default, pairs } => {
				let mut vec = Vec::with_capacity(pairs.len() + 1);
				vec.push(*default);
				vec.extend(pairs.iter().map(|&(_, label)| label));
				vec
			},
			_ => Vec::new(),
		}
	}

	/// Returns `true` if execution never continues with the next instruction.
	pub fn is_unconditional_transfer(&self) -> bool {
		matches!(self,
			Instruction::Goto(_) | Instruction::Ret(_) |
			Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } |
			Instruction::IReturn | Instruction::LReturn | Instruction::FReturn | Instruction::DReturn |
			Instruction::AReturn | Instruction::Return |
			Instruction::AThrow
		)
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArrayType {
	Boolean,
	Char,
	Float,
	Double,
	Byte,
	Short,
	Int,
	Long,
}

impl ArrayType {
	pub(crate) fn from_atype(atype: u8) -> Result<ArrayType> {
		match atype {
			array_type::BOOLEAN => Ok(ArrayType::Boolean),
			array_type::CHAR    => Ok(ArrayType::Char),
			array_type::FLOAT   => Ok(ArrayType::Float),
			array_type::DOUBLE  => Ok(ArrayType::Double),
			array_type::BYTE    => Ok(ArrayType::Byte),
			array_type::SHORT   => Ok(ArrayType::Short),
			array_type::INT     => Ok(ArrayType::Int),
			array_type::LONG    => Ok(ArrayType::Long),
			_ => bail!("unknown array type {atype:x}"),
		}
	}

	pub(crate) fn to_atype(self) -> u8 {
		match self {
			ArrayType::Boolean => array_type::BOOLEAN,
			ArrayType::Char    => array_type::CHAR,
			ArrayType::Float   => array_type::FLOAT,
			ArrayType::Double  => array_type::DOUBLE,
			ArrayType::Byte    => array_type::BYTE,
			ArrayType::Short   => array_type::SHORT,
			ArrayType::Int     => array_type::INT,
			ArrayType::Long    => array_type::LONG,
		}
	}

	/// The descriptor of an array with this element type, like `[I`.
	pub fn array_descriptor(self) -> &'static str {
		match self {
			ArrayType::Boolean => "[Z",
			ArrayType::Char    => "[C",
			ArrayType::Float   => "[F",
			ArrayType::Double  => "[D",
			ArrayType::Byte    => "[B",
			ArrayType::Short   => "[S",
			ArrayType::Int     => "[I",
			ArrayType::Long    => "[J",
		}
	}
}
