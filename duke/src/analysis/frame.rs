use std::collections::{HashMap, HashSet};
use anyhow::{anyhow, bail, Context, Result};
use crate::analysis::hierarchy::{common_super_class, TypeHierarchy, WithClass, OBJECT, THROWABLE};
use crate::analysis::stack_map::{compact_locals, expand_locals};
use crate::tree::class::ClassFile;
use crate::tree::descriptor::{parse_field_descriptor, parse_method_descriptor, Type};
use crate::tree::method::code::{FrameValue, Instruction, InvokeKind, Label, Loadable, LvIndex, StackMapFrame};
use crate::tree::method::instruction_list::{InstructionList, NodeId};
use crate::tree::method::Method;

/// A verification type, as used in stack map frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
	Top,
	Integer,
	Float,
	Long,
	Double,
	Null,
	/// The receiver of a constructor before the super (or another) constructor got called.
	UninitializedThis,
	/// An instance of the named class, or an array given by its descriptor.
	Object(String),
	/// The result of the `new` instruction with that id, before a constructor got called on it.
	Uninitialized(NodeId),
}

impl VType {
	fn from_type(t: &Type) -> VType {
		match t {
			Type::B | Type::C | Type::I | Type::S | Type::Z => VType::Integer,
			Type::F => VType::Float,
			Type::J => VType::Long,
			Type::D => VType::Double,
			Type::Object(name) => VType::Object(name.clone()),
			Type::Array(descriptor) => VType::Object(descriptor.clone()),
		}
	}

	fn from_descriptor(descriptor: &str) -> Result<VType> {
		Ok(VType::from_type(&parse_field_descriptor(descriptor)?))
	}

	pub fn is_wide(&self) -> bool {
		matches!(self, VType::Long | VType::Double)
	}

	pub fn size(&self) -> usize {
		if self.is_wide() { 2 } else { 1 }
	}

	fn is_reference(&self) -> bool {
		matches!(self, VType::Null | VType::UninitializedThis | VType::Object(_) | VType::Uninitialized(_))
	}
}

/// The types of the local variables and the operand stack before an instruction.
///
/// Locals are stored per slot: a `long` or `double` at `i` is followed by a [`VType::Top`] at `i + 1`.
/// Stack entries are stored per value, a `long` being one entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
	pub locals: Vec<VType>,
	pub stack: Vec<VType>,
}

impl Frame {
	/// The number of stack slots used.
	pub fn stack_size(&self) -> usize {
		self.stack.iter().map(VType::size).sum()
	}

	fn push(&mut self, value: VType) {
		self.stack.push(value);
	}

	fn pop(&mut self) -> Result<VType> {
		self.stack.pop().context("operand stack underflow")
	}

	fn pop_n(&mut self, n: usize) -> Result<()> {
		for _ in 0..n {
			self.pop()?;
		}
		Ok(())
	}

	/// Pops a value taking one stack slot.
	fn pop_narrow(&mut self) -> Result<VType> {
		let value = self.pop()?;
		if value.is_wide() {
			bail!("expected a value taking one stack slot, got {value:?}");
		}
		Ok(value)
	}

	fn pop_reference(&mut self) -> Result<VType> {
		let value = self.pop()?;
		if !value.is_reference() {
			bail!("expected a reference on the stack, got {value:?}");
		}
		Ok(value)
	}

	fn load(&self, index: LvIndex) -> Result<&VType> {
		match self.locals.get(index.index as usize) {
			None | Some(VType::Top) => bail!("local variable {} is read before being set", index.index),
			Some(value) => Ok(value),
		}
	}

	fn store(&mut self, index: LvIndex, value: VType) {
		let index = index.index as usize;
		let end = index + value.size();
		if self.locals.len() < end {
			self.locals.resize(end, VType::Top);
		}
		// overwriting the upper half of a long or double invalidates it
		if index > 0 && self.locals[index - 1].is_wide() {
			self.locals[index - 1] = VType::Top;
		}
		if value.is_wide() {
			self.locals[index + 1] = VType::Top;
		}
		self.locals[index] = value;
	}

	fn replace_all(&mut self, old: &VType, new: &VType) {
		for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
			if value == old {
				*value = new.clone();
			}
		}
	}
}

/// The result of analysing a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
	pub max_stack: u16,
	/// The larger of the declared `max_locals` and the highest local variable slot used.
	pub max_locals: u16,
	/// The frame at the start of the method, given by its descriptor.
	pub initial: Frame,
	/// The frames at the instructions that need a stack map entry, in the order of the instructions.
	pub frames: Vec<(NodeId, Frame)>,
	/// The frames after conditional branches that aren't in `frames`. An `if` whose target is too far away for an `i16`
	/// is written as the opposite `if` jumping over a `goto_w`, which needs a frame at the next instruction.
	pub(crate) after_branches: HashMap<NodeId, Frame>,
}

/// Computes the stack and locals sizes and the stack map frames of the body of `method`, a method of `class`.
///
/// The class itself is always known to the hierarchy used for merging types, on top of the given `hierarchy`.
pub fn analyze(class: &ClassFile, method: &Method, hierarchy: &dyn TypeHierarchy) -> Result<Analysis> {
	let code = method.code.as_ref()
		.with_context(|| anyhow!("method {:?} {:?} has no code", method.name, method.descriptor))?;
	let list = code.instructions();

	let hierarchy = WithClass {
		name: &class.name,
		super_class: class.super_class.as_deref(),
		interface: class.is_interface(),
		inner: hierarchy,
	};

	let ids = list.ids();
	if ids.is_empty() {
		bail!("method has no instructions");
	}

	let mut label_positions: HashMap<Label, usize> = HashMap::new();
	for (pos, &id) in ids.iter().enumerate() {
		for &label in list.labels(id).unwrap_or_default() {
			label_positions.insert(label, pos);
		}
	}
	for &label in list.end_labels() {
		label_positions.insert(label, ids.len());
	}
	let position = |label: &Label| -> Result<usize> {
		label_positions.get(label).copied()
			.with_context(|| anyhow!("label {label:?} isn't bound to any position"))
	};
	let target = |label: &Label| -> Result<usize> {
		let pos = position(label)?;
		if pos >= ids.len() {
			bail!("label {label:?} is the end of the code, but used as a target");
		}
		Ok(pos)
	};

	struct Handler {
		start: usize,
		end: usize,
		handler: usize,
		catch: VType,
	}
	let handlers = code.exception_table().iter()
		.map(|exception| Ok(Handler {
			start: position(&exception.start)?,
			end: position(&exception.end)?,
			handler: target(&exception.handler)?,
			catch: VType::Object(exception.catch.clone().unwrap_or_else(|| THROWABLE.to_owned())),
		}))
		.collect::<Result<Vec<_>>>()
		.context("while resolving the exception table")?;

	let initial = initial_frame(class, method)?;
	// classes before version 50 have no stack maps, so only the sizes of the frames matter
	let exact = class.version.has_stack_map_table();

	let value = |value: &FrameValue| -> Result<VType> {
		Ok(match value {
			FrameValue::Top => VType::Top,
			FrameValue::Integer => VType::Integer,
			FrameValue::Float => VType::Float,
			FrameValue::Long => VType::Long,
			FrameValue::Double => VType::Double,
			FrameValue::Null => VType::Null,
			FrameValue::UninitializedThis => VType::UninitializedThis,
			FrameValue::Object(name) => VType::Object(name.clone()),
			FrameValue::Uninitialized(label) => {
				let id = ids[target(label)?];
				if !matches!(list.get(id), Some(Instruction::New(_))) {
					bail!("uninitialized value of label {label:?} doesn't come from a `new` instruction");
				}
				VType::Uninitialized(id)
			},
		})
	};

	// The frames the code was read with. These are used as they are instead of merging the frames coming in.
	let mut declared: HashMap<usize, Frame> = HashMap::new();
	let mut locals = compact_locals(&initial.locals);
	for (label, entry) in code.stack_map() {
		(|| {
			let pos = target(label)?;
			let stack = match entry {
				StackMapFrame::Same => Vec::new(),
				StackMapFrame::SameLocals1StackItem(item) => vec![value(item)?],
				&StackMapFrame::Chop(n) => {
					let len = locals.len().checked_sub(n as usize)
						.with_context(|| anyhow!("can't chop {n} locals off {locals:?}"))?;
					locals.truncate(len);
					Vec::new()
				},
				StackMapFrame::Append(values) => {
					for item in values {
						locals.push(value(item)?);
					}
					Vec::new()
				},
				StackMapFrame::Full { locals: full, stack } => {
					locals = full.iter().map(value).collect::<Result<_>>()?;
					stack.iter().map(value).collect::<Result<_>>()?
				},
			};
			let frame = Frame { locals: expand_locals(&locals), stack };
			if let Some(other) = declared.insert(pos, frame.clone()) {
				if other != frame {
					bail!("differing stack map frames {other:?} and {frame:?} at instruction {pos}");
				}
			}
			Ok(())
		})()
			.with_context(|| anyhow!("while reading the stack map frame {entry:?} at {label:?}"))?;
	}

	let mut needs_frame: HashSet<usize> = HashSet::new();
	for handler in &handlers {
		needs_frame.insert(handler.handler);
	}

	let mut frames: Vec<Option<Frame>> = vec![None; ids.len()];
	frames[0] = Some(initial.clone());
	let mut worklist = vec![0usize];
	let mut in_worklist = vec![false; ids.len()];
	in_worklist[0] = true;

	let mut max_stack = 0usize;
	let mut max_locals = initial.locals.len();

	while let Some(pos) = worklist.pop() {
		in_worklist[pos] = false;

		let id = ids[pos];
		let instruction = list.get(id)
			.with_context(|| anyhow!("instruction list lost node {id:?}"))?;
		let Some(frame) = frames[pos].clone() else {
			bail!("no frame computed for instruction {pos}");
		};

		max_stack = max_stack.max(frame.stack_size());
		max_locals = max_locals.max(frame.locals.len());

		let (out, successors) = (|| {
			let out = execute(class, list, id, instruction, frame.clone())?;

			let mut successors = Vec::new();
			for label in instruction.branch_targets() {
				let t = target(&label)?;
				needs_frame.insert(t);
				successors.push(t);
			}
			if !instruction.is_unconditional_transfer() {
				if pos + 1 >= ids.len() {
					bail!("execution falls off the end of the code");
				}
				successors.push(pos + 1);
			} else if pos + 1 < ids.len() {
				needs_frame.insert(pos + 1);
			}
			Ok((out, successors))
		})()
			.with_context(|| anyhow!("at instruction {pos}: {instruction:?}"))?;

		max_stack = max_stack.max(out.stack_size());
		max_locals = max_locals.max(out.locals.len());

		let mut incoming = Vec::with_capacity(successors.len() + 1);
		for successor in successors {
			incoming.push((successor, out.clone()));
		}
		for handler in handlers.iter().filter(|handler| handler.start <= pos && pos < handler.end) {
			let frame = Frame {
				locals: frame.locals.clone(),
				stack: vec![handler.catch.clone()],
			};
			incoming.push((handler.handler, frame));
		}

		for (successor, frame) in incoming {
			let changed = match (&frames[successor], declared.get(&successor)) {
				(existing, Some(declared)) => {
					check_declared(declared, &frame)
						.with_context(|| anyhow!("at the stack map frame of instruction {successor} coming from instruction {pos}"))?;
					let first = existing.is_none();
					if first {
						frames[successor] = Some(declared.clone());
					}
					first
				},
				(None, None) => {
					frames[successor] = Some(frame);
					true
				},
				(Some(existing), None) => {
					let merged = merge_frame(&hierarchy, existing, &frame, exact)
						.with_context(|| anyhow!("while merging the frames at instruction {successor} coming from instruction {pos}"))?;
					let changed = &merged != existing;
					frames[successor] = Some(merged);
					changed
				},
			};
			if changed && !in_worklist[successor] {
				in_worklist[successor] = true;
				worklist.push(successor);
			}
		}
	}

	if let Some(pos) = frames.iter().position(Option::is_none) {
		bail!("instruction {pos} is unreachable: {:?}", list.get(ids[pos]));
	}

	let mut after_branches = HashMap::new();
	for (pos, &id) in ids.iter().enumerate() {
		let conditional = list.get(id)
			.is_some_and(|instruction| !instruction.branch_targets().is_empty() && !instruction.is_unconditional_transfer());
		if conditional && pos + 1 < ids.len() && !needs_frame.contains(&(pos + 1)) {
			if let Some(frame) = &frames[pos + 1] {
				after_branches.insert(ids[pos + 1], frame.clone());
			}
		}
	}

	let mut needs_frame: Vec<usize> = needs_frame.into_iter().collect();
	needs_frame.sort_unstable();
	let frames = needs_frame.into_iter()
		.filter_map(|pos| frames[pos].take().map(|frame| (ids[pos], frame)))
		.collect();

	let max_stack = u16::try_from(max_stack)
		.with_context(|| anyhow!("operand stack of {max_stack} slots is too large"))?;
	let max_locals = u16::try_from(max_locals)
		.with_context(|| anyhow!("{max_locals} local variable slots are too many"))?
		.max(code.max_locals());

	Ok(Analysis { max_stack, max_locals, initial, frames, after_branches })
}

fn initial_frame(class: &ClassFile, method: &Method) -> Result<Frame> {
	let descriptor = parse_method_descriptor(&method.descriptor)?;

	let mut frame = Frame::default();
	if !method.is_static() {
		let this = if method.name == "<init>" && class.name != OBJECT {
			VType::UninitializedThis
		} else {
			VType::Object(class.name.clone())
		};
		frame.locals.push(this);
	}
	for parameter in &descriptor.parameters {
		let value = VType::from_type(parameter);
		let wide = value.is_wide();
		frame.locals.push(value);
		if wide {
			frame.locals.push(VType::Top);
		}
	}
	Ok(frame)
}

/// Merges two values. Two references whose common super class isn't known are an error.
///
/// With `exact` unset, such references merge to `java/lang/Object`, which is enough for the stack and locals sizes.
fn merge_type(hierarchy: &dyn TypeHierarchy, a: &VType, b: &VType, exact: bool) -> Result<VType> {
	if a == b {
		return Ok(a.clone());
	}
	Ok(match (a, b) {
		(VType::Null, VType::Object(name)) | (VType::Object(name), VType::Null) => VType::Object(name.clone()),
		(VType::Object(a), VType::Object(b)) => match common_super_class(hierarchy, a, b) {
			Ok(name) => VType::Object(name),
			Err(_) if !exact => VType::Object(OBJECT.to_owned()),
			Err(e) => return Err(e),
		},
		_ => VType::Top,
	})
}

fn merge_frame(hierarchy: &dyn TypeHierarchy, existing: &Frame, incoming: &Frame, exact: bool) -> Result<Frame> {
	if existing.stack.len() != incoming.stack.len() {
		bail!("operand stack heights differ: {:?} and {:?}", existing.stack, incoming.stack);
	}
	let stack = existing.stack.iter().zip(&incoming.stack)
		.map(|(a, b)| match merge_type(hierarchy, a, b, exact)? {
			VType::Top => Err(anyhow!("incompatible stack values {a:?} and {b:?}")),
			merged => Ok(merged),
		})
		.collect::<Result<Vec<_>>>()?;

	let len = existing.locals.len().max(incoming.locals.len());
	let mut locals: Vec<VType> = (0..len)
		.map(|i| match (existing.locals.get(i), incoming.locals.get(i)) {
			// a local that can't be merged can't be read afterwards either
			(Some(a), Some(b)) => merge_type(hierarchy, a, b, exact).unwrap_or(VType::Top),
			_ => VType::Top,
		})
		.collect();
	// a long or double whose upper half got lost is unusable
	for i in 0..locals.len() {
		if locals[i].is_wide() && locals.get(i + 1) != Some(&VType::Top) {
			locals[i] = VType::Top;
		}
	}
	trim_locals(&mut locals);

	Ok(Frame { locals, stack })
}

/// Checks that the frame coming in fits the declared one. Only the kinds of values are compared, not the classes.
fn check_declared(declared: &Frame, incoming: &Frame) -> Result<()> {
	if declared.stack.len() != incoming.stack.len() {
		bail!("operand stack heights differ: declared {:?}, got {:?}", declared.stack, incoming.stack);
	}
	for (declared, value) in declared.stack.iter().zip(&incoming.stack) {
		if !fits(value, declared) {
			bail!("stack value {value:?} doesn't fit the declared {declared:?}");
		}
	}
	for (index, declared) in declared.locals.iter().enumerate() {
		let value = incoming.locals.get(index).unwrap_or(&VType::Top);
		if !fits(value, declared) {
			bail!("local variable {index} is {value:?}, but declared as {declared:?}");
		}
	}
	Ok(())
}

fn fits(value: &VType, declared: &VType) -> bool {
	match declared {
		VType::Top => true,
		declared if declared.is_reference() => value.is_reference(),
		declared => value == declared,
	}
}

/// Removes trailing `Top`s, except the upper half of a long or double.
fn trim_locals(locals: &mut Vec<VType>) {
	while let [.., before, VType::Top] = locals.as_slice() {
		if before.is_wide() {
			break;
		}
		locals.pop();
	}
	if locals.as_slice() == [VType::Top] {
		locals.clear();
	}
}

/// Simulates the effect of an instruction on the frame before it, returning the frame after it.
fn execute(class: &ClassFile, list: &InstructionList, id: NodeId, instruction: &Instruction, mut frame: Frame) -> Result<Frame> {
	let f = &mut frame;
	match instruction {
		Instruction::Nop | Instruction::Goto(_) | Instruction::Return => {},
		Instruction::AConstNull => f.push(VType::Null),
		Instruction::IConstM1 | Instruction::IConst0 | Instruction::IConst1 | Instruction::IConst2 |
		Instruction::IConst3 | Instruction::IConst4 | Instruction::IConst5 |
		Instruction::BiPush(_) | Instruction::SiPush(_) => f.push(VType::Integer),
		Instruction::LConst0 | Instruction::LConst1 => f.push(VType::Long),
		Instruction::FConst0 | Instruction::FConst1 | Instruction::FConst2 => f.push(VType::Float),
		Instruction::DConst0 | Instruction::DConst1 => f.push(VType::Double),
		Instruction::Ldc(loadable) => f.push(match loadable {
			Loadable::Integer(_) => VType::Integer,
			Loadable::Float(_) => VType::Float,
			Loadable::Long(_) => VType::Long,
			Loadable::Double(_) => VType::Double,
			Loadable::Class(_) => VType::Object("java/lang/Class".to_owned()),
			Loadable::String(_) => VType::Object("java/lang/String".to_owned()),
			Loadable::MethodHandle(_) => VType::Object("java/lang/invoke/MethodHandle".to_owned()),
			Loadable::MethodType(_) => VType::Object("java/lang/invoke/MethodType".to_owned()),
			Loadable::Dynamic(dynamic) => VType::from_descriptor(&dynamic.descriptor)?,
		}),
		&Instruction::ILoad(index) => { load_expecting(f, index, VType::Integer)?; },
		&Instruction::LLoad(index) => { load_expecting(f, index, VType::Long)?; },
		&Instruction::FLoad(index) => { load_expecting(f, index, VType::Float)?; },
		&Instruction::DLoad(index) => { load_expecting(f, index, VType::Double)?; },
		&Instruction::ALoad(index) => {
			let value = f.load(index)?.clone();
			if !value.is_reference() {
				bail!("aload of local variable {} holding {value:?}", index.index);
			}
			f.push(value);
		},
		Instruction::IALoad | Instruction::BALoad | Instruction::CALoad | Instruction::SALoad => {
			f.pop_n(2)?;
			f.push(VType::Integer);
		},
		Instruction::LALoad => { f.pop_n(2)?; f.push(VType::Long); },
		Instruction::FALoad => { f.pop_n(2)?; f.push(VType::Float); },
		Instruction::DALoad => { f.pop_n(2)?; f.push(VType::Double); },
		Instruction::AALoad => {
			f.pop()?;
			let array = f.pop_reference()?;
			let element = match &array {
				VType::Object(descriptor) if descriptor.starts_with('[') => {
					let element = VType::from_descriptor(&descriptor[1..])?;
					if !element.is_reference() {
						bail!("aaload from array of primitives {descriptor:?}");
					}
					element
				},
				VType::Null => VType::Null,
				_ => VType::Object(OBJECT.to_owned()),
			};
			f.push(element);
		},
		&Instruction::IStore(index) => { f.pop()?; f.store(index, VType::Integer); },
		&Instruction::LStore(index) => { f.pop()?; f.store(index, VType::Long); },
		&Instruction::FStore(index) => { f.pop()?; f.store(index, VType::Float); },
		&Instruction::DStore(index) => { f.pop()?; f.store(index, VType::Double); },
		&Instruction::AStore(index) => {
			let value = f.pop_reference()?;
			f.store(index, value);
		},
		Instruction::IAStore | Instruction::LAStore | Instruction::FAStore | Instruction::DAStore |
		Instruction::AAStore | Instruction::BAStore | Instruction::CAStore | Instruction::SAStore => f.pop_n(3)?,
		Instruction::Pop => { f.pop_narrow()?; },
		Instruction::Pop2 => {
			if !f.pop()?.is_wide() {
				f.pop_narrow()?;
			}
		},
		Instruction::Dup => {
			let v1 = f.pop_narrow()?;
			f.push(v1.clone());
			f.push(v1);
		},
		Instruction::DupX1 => {
			let v1 = f.pop_narrow()?;
			let v2 = f.pop_narrow()?;
			f.push(v1.clone());
			f.push(v2);
			f.push(v1);
		},
		Instruction::DupX2 => {
			let v1 = f.pop_narrow()?;
			let v2 = f.pop()?;
			if v2.is_wide() {
				f.push(v1.clone());
				f.push(v2);
				f.push(v1);
			} else {
				let v3 = f.pop_narrow()?;
				f.push(v1.clone());
				f.push(v3);
				f.push(v2);
				f.push(v1);
			}
		},
		Instruction::Dup2 => {
			let v1 = f.pop()?;
			if v1.is_wide() {
				f.push(v1.clone());
				f.push(v1);
			} else {
				let v2 = f.pop_narrow()?;
				f.push(v2.clone());
				f.push(v1.clone());
				f.push(v2);
				f.push(v1);
			}
		},
		Instruction::Dup2X1 => {
			let v1 = f.pop()?;
			if v1.is_wide() {
				let v2 = f.pop_narrow()?;
				f.push(v1.clone());
				f.push(v2);
				f.push(v1);
			} else {
				let v2 = f.pop_narrow()?;
				let v3 = f.pop_narrow()?;
				f.push(v2.clone());
				f.push(v1.clone());
				f.push(v3);
				f.push(v2);
				f.push(v1);
			}
		},
		Instruction::Dup2X2 => {
			let v1 = f.pop()?;
			if v1.is_wide() {
				let v2 = f.pop()?;
				if v2.is_wide() {
					f.push(v1.clone());
					f.push(v2);
					f.push(v1);
				} else {
					let v3 = f.pop_narrow()?;
					f.push(v1.clone());
					f.push(v3);
					f.push(v2);
					f.push(v1);
				}
			} else {
				let v2 = f.pop_narrow()?;
				let v3 = f.pop()?;
				if v3.is_wide() {
					f.push(v2.clone());
					f.push(v1.clone());
					f.push(v3);
					f.push(v2);
					f.push(v1);
				} else {
					let v4 = f.pop_narrow()?;
					f.push(v2.clone());
					f.push(v1.clone());
					f.push(v4);
					f.push(v3);
					f.push(v2);
					f.push(v1);
				}
			}
		},
		Instruction::Swap => {
			let v1 = f.pop_narrow()?;
			let v2 = f.pop_narrow()?;
			f.push(v1);
			f.push(v2);
		},
		Instruction::IAdd | Instruction::ISub | Instruction::IMul | Instruction::IDiv | Instruction::IRem |
		Instruction::IShl | Instruction::IShr | Instruction::IUShr |
		Instruction::IAnd | Instruction::IOr | Instruction::IXor => {
			f.pop_n(2)?;
			f.push(VType::Integer);
		},
		Instruction::LAdd | Instruction::LSub | Instruction::LMul | Instruction::LDiv | Instruction::LRem |
		Instruction::LShl | Instruction::LShr | Instruction::LUShr |
		Instruction::LAnd | Instruction::LOr | Instruction::LXor => {
			f.pop_n(2)?;
			f.push(VType::Long);
		},
		Instruction::FAdd | Instruction::FSub | Instruction::FMul | Instruction::FDiv | Instruction::FRem => {
			f.pop_n(2)?;
			f.push(VType::Float);
		},
		Instruction::DAdd | Instruction::DSub | Instruction::DMul | Instruction::DDiv | Instruction::DRem => {
			f.pop_n(2)?;
			f.push(VType::Double);
		},
		Instruction::INeg | Instruction::LNeg | Instruction::FNeg | Instruction::DNeg => {
			let value = f.pop()?;
			f.push(value);
		},
		&Instruction::IInc(index, _) => {
			if f.load(index)? != &VType::Integer {
				bail!("iinc of local variable {} not holding an int", index.index);
			}
		},
		Instruction::L2I | Instruction::F2I | Instruction::D2I |
		Instruction::I2B | Instruction::I2C | Instruction::I2S => { f.pop()?; f.push(VType::Integer); },
		Instruction::I2L | Instruction::F2L | Instruction::D2L => { f.pop()?; f.push(VType::Long); },
		Instruction::I2F | Instruction::L2F | Instruction::D2F => { f.pop()?; f.push(VType::Float); },
		Instruction::I2D | Instruction::L2D | Instruction::F2D => { f.pop()?; f.push(VType::Double); },
		Instruction::LCmp | Instruction::FCmpL | Instruction::FCmpG | Instruction::DCmpL | Instruction::DCmpG => {
			f.pop_n(2)?;
			f.push(VType::Integer);
		},
		Instruction::IfEq(_) | Instruction::IfNe(_) | Instruction::IfLt(_) |
		Instruction::IfGe(_) | Instruction::IfGt(_) | Instruction::IfLe(_) |
		Instruction::IfNull(_) | Instruction::IfNonNull(_) |
		Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => { f.pop()?; },
		Instruction::IfICmpEq(_) | Instruction::IfICmpNe(_) | Instruction::IfICmpLt(_) |
		Instruction::IfICmpGe(_) | Instruction::IfICmpGt(_) | Instruction::IfICmpLe(_) |
		Instruction::IfACmpEq(_) | Instruction::IfACmpNe(_) => f.pop_n(2)?,
		Instruction::Jsr(_) | Instruction::Ret(_) => bail!("subroutines (`jsr` and `ret`) are not supported"),
		Instruction::IReturn | Instruction::LReturn | Instruction::FReturn | Instruction::DReturn | Instruction::AReturn => { f.pop()?; },
		Instruction::GetStatic(field) => f.push(VType::from_descriptor(&field.desc)?),
		Instruction::PutStatic(_) => { f.pop()?; },
		Instruction::GetField(field) => {
			f.pop_reference()?;
			f.push(VType::from_descriptor(&field.desc)?);
		},
		Instruction::PutField(_) => {
			f.pop()?;
			f.pop_reference()?;
		},
		Instruction::Invoke(invoke) => {
			let descriptor = parse_method_descriptor(&invoke.method.desc)?;
			f.pop_n(descriptor.parameters.len())?;
			if invoke.kind != InvokeKind::Static {
				let receiver = f.pop_reference()?;
				if invoke.kind == InvokeKind::Special && invoke.method.name == "<init>" {
					let initialized = match &receiver {
						VType::UninitializedThis => VType::Object(class.name.clone()),
						&VType::Uninitialized(new) => match list.get(new) {
							Some(Instruction::New(name)) => VType::Object(name.clone()),
							other => bail!("uninitialized value created by {other:?} instead of a `new`"),
						},
						_ => bail!("constructor called on initialized value {receiver:?}"),
					};
					f.replace_all(&receiver, &initialized);
				}
			}
			if let Some(return_type) = &descriptor.return_type {
				f.push(VType::from_type(return_type));
			}
		},
		Instruction::InvokeDynamic(invoke_dynamic) => {
			let descriptor = parse_method_descriptor(&invoke_dynamic.descriptor)?;
			f.pop_n(descriptor.parameters.len())?;
			if let Some(return_type) = &descriptor.return_type {
				f.push(VType::from_type(return_type));
			}
		},
		Instruction::New(_) => f.push(VType::Uninitialized(id)),
		Instruction::NewArray(array_type) => {
			f.pop()?;
			f.push(VType::Object(array_type.array_descriptor().to_owned()));
		},
		Instruction::ANewArray(class) => {
			f.pop()?;
			let descriptor = if class.starts_with('[') {
				format!("[{class}")
			} else {
				format!("[L{class};")
			};
			f.push(VType::Object(descriptor));
		},
		Instruction::ArrayLength => {
			f.pop_reference()?;
			f.push(VType::Integer);
		},
		Instruction::AThrow | Instruction::MonitorEnter | Instruction::MonitorExit => { f.pop_reference()?; },
		Instruction::CheckCast(class) => {
			f.pop_reference()?;
			let value = if class.starts_with('[') { VType::from_descriptor(class)? } else { VType::Object(class.clone()) };
			f.push(value);
		},
		Instruction::InstanceOf(_) => {
			f.pop_reference()?;
			f.push(VType::Integer);
		},
		&Instruction::MultiANewArray(ref class, dimensions) => {
			f.pop_n(dimensions as usize)?;
			f.push(VType::Object(class.clone()));
		},
	}
	Ok(frame)
}

fn load_expecting(frame: &mut Frame, index: LvIndex, expected: VType) -> Result<()> {
	let value = frame.load(index)?;
	if value != &expected {
		bail!("expected local variable {} to hold {expected:?}, but it holds {value:?}", index.index);
	}
	frame.push(expected);
	Ok(())
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::analysis::frame::{analyze, VType};
	use crate::analysis::hierarchy::KnownHierarchy;
	use crate::class_constants::access;
	use crate::tree::class::ClassFile;
	use crate::tree::field::FieldRef;
	use crate::tree::method::code::{Code, Exception, FrameValue, Instruction, Invoke, InvokeKind, Label, Loadable, LvIndex, StackMapFrame};
	use crate::tree::method::instruction_list::{InstructionList, NodeId};
	use crate::tree::method::{Method, MethodRef};
	use crate::tree::version::Version;

	fn class() -> ClassFile {
		ClassFile::new(Version::V1_8, access::PUBLIC, "a/Game", Some("java/lang/Object".to_owned()))
	}

	fn method(access: u16, name: &str, descriptor: &str, list: InstructionList) -> Method {
		let mut method = Method::new(access, name, descriptor);
		method.code = Some(Code::new(list));
		method
	}

	#[test]
	fn straight_line_long_arithmetic() -> Result<()> {
		let mut list = InstructionList::new();
		list.push_back(Instruction::Ldc(Loadable::Long(50)));
		list.push_back(Instruction::LLoad(LvIndex { index: 1 }));
		list.push_back(Instruction::LAdd);
		list.push_back(Instruction::LReturn);

		let analysis = analyze(&class(), &method(access::PUBLIC, "tick", "(J)J", list), &KnownHierarchy::default())?;
		assert_eq!(analysis.max_stack, 4);
		assert_eq!(analysis.max_locals, 3);
		assert_eq!(analysis.initial.locals, vec![VType::Object("a/Game".to_owned()), VType::Long, VType::Top]);
		assert!(analysis.frames.is_empty());
		Ok(())
	}

	#[test]
	fn branch_targets_get_frames() -> Result<()> {
		let mut list = InstructionList::new();
		let target = list.new_label();
		list.push_back(Instruction::ILoad(LvIndex { index: 0 }));
		list.push_back(Instruction::IfEq(target));
		list.push_back(Instruction::IConst1);
		list.push_back(Instruction::IStore(LvIndex { index: 1 }));
		let ret = list.push_back(Instruction::Return);
		list.bind_label(target, ret)?;

		let analysis = analyze(&class(), &method(access::STATIC, "f", "(I)V", list), &KnownHierarchy::default())?;
		assert_eq!(analysis.max_stack, 1);
		assert_eq!(analysis.max_locals, 2);
		assert_eq!(analysis.frames.len(), 1);
		let (id, frame) = &analysis.frames[0];
		assert_eq!(*id, ret);
		// the local 1 is only set on one path
		assert_eq!(frame.locals, vec![VType::Integer]);
		assert!(frame.stack.is_empty());
		Ok(())
	}

	#[test]
	fn constructor_initializes_this_and_new_values() -> Result<()> {
		let mut list = InstructionList::new();
		list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
		list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V"))));
		list.push_back(Instruction::New("java/lang/Thread".to_owned()));
		list.push_back(Instruction::Dup);
		list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Special, MethodRef::new("java/lang/Thread", "<init>", "()V"))));
		list.push_back(Instruction::AStore(LvIndex { index: 1 }));
		list.push_back(Instruction::Return);

		let analysis = analyze(&class(), &method(access::PUBLIC, "<init>", "()V", list), &KnownHierarchy::default())?;
		assert_eq!(analysis.initial.locals, vec![VType::UninitializedThis]);
		assert_eq!(analysis.max_stack, 2);
		assert_eq!(analysis.max_locals, 2);
		Ok(())
	}

	#[test]
	fn handlers_get_the_caught_type() -> Result<()> {
		let mut list = InstructionList::new();
		let start = list.new_label();
		let end = list.new_label();
		let handler = list.new_label();
		let call = list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("a/Game", "tick", "()V"))));
		let ret = list.push_back(Instruction::Return);
		let catch = list.push_back(Instruction::AStore(LvIndex { index: 0 }));
		list.push_back(Instruction::Return);
		list.bind_label(start, call)?;
		list.bind_label(end, ret)?;
		list.bind_label(handler, catch)?;

		let mut code = Code::new(list);
		code.exception_table_mut().push(Exception { start, end, handler, catch: Some("java/lang/InterruptedException".to_owned()) });
		let mut method = Method::new(access::STATIC, "run", "()V");
		method.code = Some(code);

		let analysis = analyze(&class(), &method, &KnownHierarchy::default())?;
		assert_eq!(analysis.frames.len(), 1);
		assert_eq!(analysis.frames[0].0, catch);
		assert_eq!(analysis.frames[0].1.stack, vec![VType::Object("java/lang/InterruptedException".to_owned())]);
		assert_eq!(analysis.max_stack, 1);
		Ok(())
	}

	#[test]
	fn merging_references_uses_the_hierarchy() -> Result<()> {
		// a ? Integer.valueOf(0) : Long.valueOf(0L), as a Number
		let mut list = InstructionList::new();
		let other = list.new_label();
		let join = list.new_label();
		list.push_back(Instruction::ILoad(LvIndex { index: 0 }));
		list.push_back(Instruction::IfEq(other));
		list.push_back(Instruction::IConst0);
		list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"))));
		list.push_back(Instruction::Goto(join));
		let lconst = list.push_back(Instruction::LConst0);
		list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Static, MethodRef::new("java/lang/Long", "valueOf", "(J)Ljava/lang/Long;"))));
		let areturn = list.push_back(Instruction::AReturn);
		list.bind_label(other, lconst)?;
		list.bind_label(join, areturn)?;

		let analysis = analyze(&class(), &method(access::STATIC, "f", "(Z)Ljava/lang/Number;", list), &KnownHierarchy::default())?;
		assert_eq!(analysis.frames.len(), 2);
		assert_eq!(analysis.frames[1].0, areturn);
		assert_eq!(analysis.frames[1].1.stack, vec![VType::Object("java/lang/Number".to_owned())]);
		assert_eq!(analysis.max_stack, 2);
		Ok(())
	}

	/// `(flag ? Game.menu : Game.hud).draw()`, with `Menu` and `Hud` extending `Screen`, which the hierarchy doesn't know.
	fn draw_either_screen() -> Result<(InstructionList, Label, Label, NodeId)> {
		let mut list = InstructionList::new();
		let other = list.new_label();
		let join = list.new_label();
		list.push_back(Instruction::ILoad(LvIndex { index: 0 }));
		list.push_back(Instruction::IfEq(other));
		list.push_back(Instruction::GetStatic(FieldRef::new("a/Game", "menu", "Lnet/minecraft/client/Menu;")));
		list.push_back(Instruction::Goto(join));
		let hud = list.push_back(Instruction::GetStatic(FieldRef::new("a/Game", "hud", "Lnet/minecraft/client/Hud;")));
		let draw = list.push_back(Instruction::Invoke(Invoke::new(InvokeKind::Virtual, MethodRef::new("net/minecraft/client/Screen", "draw", "()V"))));
		list.push_back(Instruction::Return);
		list.bind_label(other, hud)?;
		list.bind_label(join, draw)?;
		Ok((list, other, join, draw))
	}

	#[test]
	fn merging_unknown_classes_is_an_error() -> Result<()> {
		let (list, ..) = draw_either_screen()?;
		assert!(analyze(&class(), &method(access::STATIC, "draw", "(Z)V", list), &KnownHierarchy::default()).is_err());
		Ok(())
	}

	#[test]
	fn merging_unknown_classes_without_stack_maps_is_fine() -> Result<()> {
		let (list, ..) = draw_either_screen()?;
		let mut class = class();
		class.version = Version::V1_5;
		let analysis = analyze(&class, &method(access::STATIC, "draw", "(Z)V", list), &KnownHierarchy::default())?;
		assert_eq!(analysis.max_stack, 1);
		Ok(())
	}

	#[test]
	fn read_frames_are_taken_as_declared() -> Result<()> {
		let (list, other, join, draw) = draw_either_screen()?;
		let mut code = Code::new(list);
		code.stack_map_mut().push((other, StackMapFrame::Same));
		code.stack_map_mut().push((join, StackMapFrame::SameLocals1StackItem(FrameValue::Object("net/minecraft/client/Screen".to_owned()))));
		let mut method = Method::new(access::STATIC, "draw", "(Z)V");
		method.code = Some(code);

		let analysis = analyze(&class(), &method, &KnownHierarchy::default())?;
		assert_eq!(analysis.frames.len(), 2);
		assert_eq!(analysis.frames[1].0, draw);
		assert_eq!(analysis.frames[1].1.locals, vec![VType::Integer]);
		assert_eq!(analysis.frames[1].1.stack, vec![VType::Object("net/minecraft/client/Screen".to_owned())]);
		Ok(())
	}

	#[test]
	fn read_frames_not_fitting_the_code_are_an_error() -> Result<()> {
		let (list, other, join, _) = draw_either_screen()?;
		let mut code = Code::new(list);
		code.stack_map_mut().push((other, StackMapFrame::Same));
		// the stack isn't empty at the join
		code.stack_map_mut().push((join, StackMapFrame::Same));
		let mut method = Method::new(access::STATIC, "draw", "(Z)V");
		method.code = Some(code);

		assert!(analyze(&class(), &method, &KnownHierarchy::default()).is_err());
		Ok(())
	}

	#[test]
	fn read_frames_expand_wide_locals() -> Result<()> {
		// long x = 0; while (x == 0L) {}
		let mut list = InstructionList::new();
		let head = list.new_label();
		list.push_back(Instruction::LConst0);
		list.push_back(Instruction::LStore(LvIndex { index: 0 }));
		let load = list.push_back(Instruction::LLoad(LvIndex { index: 0 }));
		list.push_back(Instruction::LConst0);
		list.push_back(Instruction::LCmp);
		list.push_back(Instruction::IfEq(head));
		list.push_back(Instruction::Return);
		list.bind_label(head, load)?;

		let mut code = Code::new(list);
		code.stack_map_mut().push((head, StackMapFrame::Append(vec![FrameValue::Long])));
		let mut method = Method::new(access::STATIC, "spin", "()V");
		method.code = Some(code);

		let analysis = analyze(&class(), &method, &KnownHierarchy::default())?;
		assert_eq!(analysis.frames.len(), 1);
		assert_eq!(analysis.frames[0].0, load);
		assert_eq!(analysis.frames[0].1.locals, vec![VType::Long, VType::Top]);
		assert_eq!(analysis.max_locals, 2);
		Ok(())
	}

	#[test]
	fn unreachable_code_is_an_error() {
		let mut list = InstructionList::new();
		list.push_back(Instruction::Return);
		list.push_back(Instruction::Nop);
		list.push_back(Instruction::Return);
		assert!(analyze(&class(), &method(access::STATIC, "f", "()V", list), &KnownHierarchy::default()).is_err());
	}

	#[test]
	fn falling_off_the_end_is_an_error() {
		let mut list = InstructionList::new();
		list.push_back(Instruction::GetStatic(FieldRef::new("a/Game", "x", "J")));
		list.push_back(Instruction::Pop2);
		assert!(analyze(&class(), &method(access::STATIC, "f", "()V", list), &KnownHierarchy::default()).is_err());
	}

	#[test]
	fn subroutines_are_an_error() -> Result<()> {
		let mut list = InstructionList::new();
		let label = list.new_label();
		list.push_back(Instruction::Jsr(label));
		let ret = list.push_back(Instruction::Return);
		list.bind_label(label, ret)?;
		assert!(analyze(&class(), &method(access::STATIC, "f", "()V", list), &KnownHierarchy::default()).is_err());
		Ok(())
	}

	#[test]
	fn stack_underflow_is_an_error() {
		let mut list = InstructionList::new();
		list.push_back(Instruction::Pop);
		list.push_back(Instruction::Return);
		assert!(analyze(&class(), &method(access::STATIC, "f", "()V", list), &KnownHierarchy::default()).is_err());
	}
}
