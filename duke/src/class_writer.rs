use std::collections::HashSet;
use anyhow::{anyhow, bail, Context, Result};
use crate::analysis::frame::{analyze, Frame};
use crate::analysis::stack_map::write_stack_map_table;
use crate::class_constants::{attribute, opcode, MAGIC};
use crate::class_writer::labels::Labels;
use crate::pool::ConstantPool;
use crate::tree::attribute::Attribute;
use crate::tree::class::ClassFile;
use crate::tree::descriptor::interface_arguments_count;
use crate::tree::field::Field;
use crate::tree::method::code::{Code, Instruction, InvokeKind, Label, LvIndex};
use crate::tree::method::instruction_list::NodeId;
use crate::tree::method::Method;
use crate::{ClassWrite, WriteOptions};

mod labels;

fn write_attribute<F>(writer: &mut impl ClassWrite, pool: &mut ConstantPool, name: &str, f: F) -> Result<()>
where
	F: FnOnce(&mut Vec<u8>, &mut ConstantPool) -> Result<()>,
{
	let mut buffer = Vec::new();
	f(&mut buffer, pool)?;
	writer.write_u16(pool.put_utf8(name)?)?;
	writer.write_usize_as_u32(buffer.len()).with_context(|| anyhow!("attribute {name:?} is too large"))?;
	writer.write_u8_slice(&buffer)
}

fn write_raw_attribute(writer: &mut impl ClassWrite, pool: &mut ConstantPool, attribute: &Attribute) -> Result<()> {
	writer.write_u16(pool.put_utf8(&attribute.name)?)?;
	writer.write_usize_as_u32(attribute.bytes.len()).with_context(|| anyhow!("attribute {:?} is too large", attribute.name))?;
	writer.write_u8_slice(&attribute.bytes)
}

/// Writes the class. The constant pool of the class is extended by what the re-encoded method bodies need.
pub(crate) fn write(class_writer: &mut impl ClassWrite, class: &ClassFile, options: &WriteOptions) -> Result<()> {
	// Entries are only ever added, so all indices the verbatim parts refer to stay valid.
	let mut pool = class.pool.clone();
	// The buffer for the rest of the class file.
	let mut writer = Vec::new();

	writer.write_u16(class.access)?;
	writer.write_u16(pool.put_class(&class.name)?)?;
	match &class.super_class {
		Some(super_class) => writer.write_u16(pool.put_class(super_class)?)?,
		None => writer.write_u16(0)?,
	}
	writer.write_slice(
		&class.interfaces,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of interfaces of class {:?}", class.name)),
		|w, interface| w.write_u16(pool.put_class(interface)?)
	)?;

	writer.write_slice(
		&class.fields,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of fields of class {:?}", class.name)),
		|w, field| write_field(w, field, &mut pool)
			.with_context(|| anyhow!("failed to write field {:?} of class {:?}", field.name, class.name))
	)?;

	writer.write_slice(
		&class.methods,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of methods of class {:?}", class.name)),
		|w, method| write_method(w, class, method, &mut pool, options)
			.with_context(|| anyhow!("failed to write method {:?} {:?} of class {:?}", method.name, method.descriptor, class.name))
	)?;

	writer.write_usize_as_u16(class.attributes.len()).context("too many attributes on class")?;
	for attribute in &class.attributes {
		write_raw_attribute(&mut writer, &mut pool, attribute)?;
	}

	class_writer.write_u32(MAGIC)?;
	class_writer.write_u16(class.version.minor)?;
	class_writer.write_u16(class.version.major)?;
	// IMPORTANT: Write the pool after everything else got written, as any other writing can add pool entries.
	pool.write(class_writer)?;
	class_writer.write_u8_slice(&writer)
}

fn write_field(writer: &mut impl ClassWrite, field: &Field, pool: &mut ConstantPool) -> Result<()> {
	writer.write_u16(field.access)?;
	writer.write_u16(pool.put_utf8(&field.name)?)?;
	writer.write_u16(pool.put_utf8(&field.descriptor)?)?;

	writer.write_usize_as_u16(field.attributes.len()).context("too many attributes on field")?;
	for attribute in &field.attributes {
		write_raw_attribute(writer, pool, attribute)?;
	}
	Ok(())
}

fn write_method(writer: &mut impl ClassWrite, class: &ClassFile, method: &Method, pool: &mut ConstantPool, options: &WriteOptions) -> Result<()> {
	writer.write_u16(method.access)?;
	writer.write_u16(pool.put_utf8(&method.name)?)?;
	writer.write_u16(pool.put_utf8(&method.descriptor)?)?;

	let attribute_count = method.attributes.len() + usize::from(method.code.is_some());
	writer.write_usize_as_u16(attribute_count).context("too many attributes on method")?;

	if let Some(code) = &method.code {
		match code.original() {
			Some(original) if !options.reencode_all => {
				writer.write_u16(pool.put_utf8(attribute::CODE)?)?;
				writer.write_usize_as_u32(original.len()).context("`Code` attribute is too large")?;
				writer.write_u8_slice(original)?;
			},
			_ => {
				write_attribute(writer, pool, attribute::CODE, |w, pool| {
					write_code(w, class, method, code, pool, options)
						.context("failed to write `Code` attribute")
				})?;
			},
		}
	}
	for attribute in &method.attributes {
		write_raw_attribute(writer, pool, attribute)?;
	}
	Ok(())
}

fn align_to_4_byte_boundary(writer: &mut Vec<u8>) -> Result<()> {
	match writer.len() & 0b11 {
		1 => writer.write_u8_slice(&[0, 0, 0]),
		2 => writer.write_u8_slice(&[0, 0]),
		3 => writer.write_u8_slice(&[0]),
		_ => Ok(()),
	}
}

fn compute_signed_offset(opcode_pos: u16, target: u16) -> i32 {
	(target as i32) - (opcode_pos as i32)
}

/// A branch offset that's written once the offset of its label is known.
struct UnwrittenLabel {
	/// The bytecode position the branch offset is relative to.
	opcode_pos: u16,
	/// The instruction containing the branch.
	node: NodeId,
	label: Label,
	/// The position to put the resolved offset at.
	label_write_pos: usize,
	/// If true, use an [`i32`], if false use an [`i16`] for the offset.
	wide: bool,
}

/// The state of one attempt at writing the instructions.
#[derive(Default)]
struct Pending {
	unwritten: Vec<UnwrittenLabel>,
	/// The `if` instructions written as the opposite `if` jumping over a `goto_w`.
	widened_ifs: Vec<NodeId>,
}

/// Size of `if_not_x +8; goto_w offset`, which replaces an `if_x` whose offset doesn't fit an [`i16`].
const WIDENED_IF_LENGTH: i16 = 1 + 2 + 1 + 4;

#[allow(clippy::too_many_arguments)]
fn if_helper(
	w: &mut Vec<u8>,
	labels: &Labels,
	wide: &HashSet<NodeId>,
	pending: &mut Pending,
	opcode_pos: u16,
	node: NodeId,
	label: Label,
	opcode: u8,
	opposite_opcode: u8,
) -> Result<()> {
	// +1 for the opposite opcode, +2 for its offset
	let goto_pos = opcode_pos.checked_add(1 + 2).context("code too large")?;

	if let Some(target) = labels.get(&label) {
		let branch = compute_signed_offset(opcode_pos, target);

		if let Ok(branch) = i16::try_from(branch) {
			w.write_u8(opcode)?;
			w.write_i16(branch)?;
		} else {
			pending.widened_ifs.push(node);
			w.write_u8(opposite_opcode)?;
			w.write_i16(WIDENED_IF_LENGTH)?;
			w.write_u8(opcode::GOTO_W)?;
			w.write_i32(compute_signed_offset(goto_pos, target))?;
		}
	} else if wide.contains(&node) {
		pending.widened_ifs.push(node);
		pending.unwritten.push(UnwrittenLabel {
			opcode_pos: goto_pos,
			node,
			label,
			// +1 for the goto_w opcode
			label_write_pos: goto_pos as usize + 1,
			wide: true,
		});

		w.write_u8(opposite_opcode)?;
		w.write_i16(WIDENED_IF_LENGTH)?;
		w.write_u8(opcode::GOTO_W)?;
		w.write_i32(i32::MAX)?;
	} else {
		pending.unwritten.push(UnwrittenLabel {
			opcode_pos,
			node,
			label,
			label_write_pos: opcode_pos as usize + 1,
			wide: false,
		});

		w.write_u8(opcode)?;
		w.write_i16(i16::MAX)?;
	}
	Ok(())
}

#[allow(clippy::too_many_arguments)]
fn goto_helper(
	w: &mut Vec<u8>,
	labels: &Labels,
	wide: &HashSet<NodeId>,
	pending: &mut Pending,
	opcode_pos: u16,
	node: NodeId,
	label: Label,
	opcode: u8,
	wide_opcode: u8,
) -> Result<()> {
	if let Some(target) = labels.get(&label) {
		let branch = compute_signed_offset(opcode_pos, target);

		if let Ok(branch) = i16::try_from(branch) {
			w.write_u8(opcode)?;
			w.write_i16(branch)?;
		} else {
			w.write_u8(wide_opcode)?;
			w.write_i32(branch)?;
		}
	} else {
		let is_wide = wide.contains(&node);
		pending.unwritten.push(UnwrittenLabel {
			opcode_pos,
			node,
			label,
			label_write_pos: opcode_pos as usize + 1,
			wide: is_wide,
		});

		if is_wide {
			w.write_u8(wide_opcode)?;
			w.write_i32(i32::MAX)?;
		} else {
			w.write_u8(opcode)?;
			w.write_i16(i16::MAX)?;
		}
	}
	Ok(())
}

/// Writes a [`Label`] of a switch as an [`i32`], at the current end of `w`.
fn switch_helper(w: &mut Vec<u8>, labels: &Labels, pending: &mut Pending, opcode_pos: u16, node: NodeId, label: Label) -> Result<()> {
	let branch = if let Some(target) = labels.get(&label) {
		compute_signed_offset(opcode_pos, target)
	} else {
		pending.unwritten.push(UnwrittenLabel {
			opcode_pos,
			node,
			label,
			label_write_pos: w.len(),
			wide: true,
		});
		i32::MAX
	};
	w.write_i32(branch)
}

/// Writes a load or store, using the short forms (like `iload_0`) for the first four slots, and `wide` where the
/// index doesn't fit a byte.
fn local_variable_helper(w: &mut Vec<u8>, opcode: u8, first_opcode: u8, first_short_opcode: u8, index: LvIndex) -> Result<()> {
	let index = index.index;
	if index < 4 {
		w.write_u8(((opcode - first_opcode) << 2 | index as u8) + first_short_opcode)
	} else if let Ok(index) = u8::try_from(index) {
		w.write_u8(opcode)?;
		w.write_u8(index)
	} else {
		w.write_u8(opcode::WIDE)?;
		w.write_u8(opcode)?;
		w.write_u16(index)
	}
}

fn put_i16_at(writer: &mut [u8], pos: usize, value: i16) {
	writer[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_i32_at(writer: &mut [u8], pos: usize, value: i32) {
	writer[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

/// Writes the content of the `Code` attribute, computing `max_stack`, `max_locals` and the `StackMapTable`.
///
/// # Branch offsets
/// Instructions like `goto` or `ifeq` store their branch offset as an [`i16`], but code may be up to [`u16::MAX`] bytes
/// long. A `goto` that doesn't fit becomes a `goto_w`. There's no wide `if`, so an `if_x` that doesn't fit is written as
/// ```txt,ignore
///     if_not_x L
///     goto_w target
/// L:  ...
/// ```
/// where `if_not_x` is the `if` with the opposite condition.
///
/// Forward branches aren't known when writing the instruction, so space for an [`i16`] is reserved and filled in at the
/// end. If it doesn't fit there, the instruction is remembered as wide and the whole code is written again, as the
/// longer form shifts all later instructions. Each attempt marks at least one more instruction as wide, so this ends.
fn write_code(writer: &mut impl ClassWrite, class: &ClassFile, method: &Method, code: &Code, pool: &mut ConstantPool, options: &WriteOptions) -> Result<()> {
	let analysis = analyze(class, method, options.hierarchy)
		.context("failed to compute the stack map frames")?;
	let list = code.instructions();

	writer.write_u16(analysis.max_stack)?;
	writer.write_u16(analysis.max_locals)?;

	// The instructions that need to use the "wide" format. These stay the same over multiple write attempts.
	let mut wide: HashSet<NodeId> = HashSet::new();
	let mut labels = Labels::new();
	let mut w = Vec::new();

	let widened_ifs = 'a: loop {
		let mut pending = Pending::default();

		for (node, instruction) in list.iter() {
			let opcode_pos = u16::try_from(w.len())
				.with_context(|| anyhow!("code size exceeded u16::MAX: {}", w.len()))?;

			labels.add_instruction(node, opcode_pos);
			for &label in list.labels(node).unwrap_or_default() {
				labels.add_opcode_pos_label(label, opcode_pos);
			}

			(|| -> Result<()> {
				let labels = &labels;
				let wide = &wide;
				let pending = &mut pending;
				match instruction {
					Instruction::Nop => w.write_u8(opcode::NOP)?,
					Instruction::AConstNull => w.write_u8(opcode::ACONST_NULL)?,
					Instruction::IConstM1 => w.write_u8(opcode::ICONST_M1)?,
					Instruction::IConst0 => w.write_u8(opcode::ICONST_0)?,
					Instruction::IConst1 => w.write_u8(opcode::ICONST_1)?,
					Instruction::IConst2 => w.write_u8(opcode::ICONST_2)?,
					Instruction::IConst3 => w.write_u8(opcode::ICONST_3)?,
					Instruction::IConst4 => w.write_u8(opcode::ICONST_4)?,
					Instruction::IConst5 => w.write_u8(opcode::ICONST_5)?,
					Instruction::LConst0 => w.write_u8(opcode::LCONST_0)?,
					Instruction::LConst1 => w.write_u8(opcode::LCONST_1)?,
					Instruction::FConst0 => w.write_u8(opcode::FCONST_0)?,
					Instruction::FConst1 => w.write_u8(opcode::FCONST_1)?,
					Instruction::FConst2 => w.write_u8(opcode::FCONST_2)?,
					Instruction::DConst0 => w.write_u8(opcode::DCONST_0)?,
					Instruction::DConst1 => w.write_u8(opcode::DCONST_1)?,
					&Instruction::BiPush(byte) => {
						w.write_u8(opcode::BIPUSH)?;
						w.write_i8(byte)?;
					},
					&Instruction::SiPush(short) => {
						w.write_u8(opcode::SIPUSH)?;
						w.write_i16(short)?;
					},
					Instruction::Ldc(loadable) => {
						let index = pool.put_loadable(loadable)?;
						if loadable.is_wide() {
							w.write_u8(opcode::LDC2_W)?;
							w.write_u16(index)?;
						} else if let Ok(index) = u8::try_from(index) {
							w.write_u8(opcode::LDC)?;
							w.write_u8(index)?;
						} else {
							w.write_u8(opcode::LDC_W)?;
							w.write_u16(index)?;
						}
					},
					&Instruction::ILoad(index) => local_variable_helper(&mut w, opcode::ILOAD, opcode::ILOAD, opcode::ILOAD_0, index)?,
					&Instruction::LLoad(index) => local_variable_helper(&mut w, opcode::LLOAD, opcode::ILOAD, opcode::ILOAD_0, index)?,
					&Instruction::FLoad(index) => local_variable_helper(&mut w, opcode::FLOAD, opcode::ILOAD, opcode::ILOAD_0, index)?,
					&Instruction::DLoad(index) => local_variable_helper(&mut w, opcode::DLOAD, opcode::ILOAD, opcode::ILOAD_0, index)?,
					&Instruction::ALoad(index) => local_variable_helper(&mut w, opcode::ALOAD, opcode::ILOAD, opcode::ILOAD_0, index)?,
					Instruction::IALoad => w.write_u8(opcode::IALOAD)?,
					Instruction::LALoad => w.write_u8(opcode::LALOAD)?,
					Instruction::FALoad => w.write_u8(opcode::FALOAD)?,
					Instruction::DALoad => w.write_u8(opcode::DALOAD)?,
					Instruction::AALoad => w.write_u8(opcode::AALOAD)?,
					Instruction::BALoad => w.write_u8(opcode::BALOAD)?,
					Instruction::CALoad => w.write_u8(opcode::CALOAD)?,
					Instruction::SALoad => w.write_u8(opcode::SALOAD)?,
					&Instruction::IStore(index) => local_variable_helper(&mut w, opcode::ISTORE, opcode::ISTORE, opcode::ISTORE_0, index)?,
					&Instruction::LStore(index) => local_variable_helper(&mut w, opcode::LSTORE, opcode::ISTORE, opcode::ISTORE_0, index)?,
					&Instruction::FStore(index) => local_variable_helper(&mut w, opcode::FSTORE, opcode::ISTORE, opcode::ISTORE_0, index)?,
					&Instruction::DStore(index) => local_variable_helper(&mut w, opcode::DSTORE, opcode::ISTORE, opcode::ISTORE_0, index)?,
					&Instruction::AStore(index) => local_variable_helper(&mut w, opcode::ASTORE, opcode::ISTORE, opcode::ISTORE_0, index)?,
					Instruction::IAStore => w.write_u8(opcode::IASTORE)?,
					Instruction::LAStore => w.write_u8(opcode::LASTORE)?,
					Instruction::FAStore => w.write_u8(opcode::FASTORE)?,
					Instruction::DAStore => w.write_u8(opcode::DASTORE)?,
					Instruction::AAStore => w.write_u8(opcode::AASTORE)?,
					Instruction::BAStore => w.write_u8(opcode::BASTORE)?,
					Instruction::CAStore => w.write_u8(opcode::CASTORE)?,
					Instruction::SAStore => w.write_u8(opcode::SASTORE)?,
					Instruction::Pop     => w.write_u8(opcode::POP)?,
					Instruction::Pop2    => w.write_u8(opcode::POP2)?,
					Instruction::Dup     => w.write_u8(opcode::DUP)?,
					Instruction::DupX1   => w.write_u8(opcode::DUP_X1)?,
					Instruction::DupX2   => w.write_u8(opcode::DUP_X2)?,
					Instruction::Dup2    => w.write_u8(opcode::DUP2)?,
					Instruction::Dup2X1  => w.write_u8(opcode::DUP2_X1)?,
					Instruction::Dup2X2  => w.write_u8(opcode::DUP2_X2)?,
					Instruction::Swap    => w.write_u8(opcode::SWAP)?,
					Instruction::IAdd    => w.write_u8(opcode::IADD)?,
					Instruction::LAdd    => w.write_u8(opcode::LADD)?,
					Instruction::FAdd    => w.write_u8(opcode::FADD)?,
					Instruction::DAdd    => w.write_u8(opcode::DADD)?,
					Instruction::ISub    => w.write_u8(opcode::ISUB)?,
					Instruction::LSub    => w.write_u8(opcode::LSUB)?,
					Instruction::FSub    => w.write_u8(opcode::FSUB)?,
					Instruction::DSub    => w.write_u8(opcode::DSUB)?,
					Instruction::IMul    => w.write_u8(opcode::IMUL)?,
					Instruction::LMul    => w.write_u8(opcode::LMUL)?,
					Instruction::FMul    => w.write_u8(opcode::FMUL)?,
					Instruction::DMul    => w.write_u8(opcode::DMUL)?,
					Instruction::IDiv    => w.write_u8(opcode::IDIV)?,
					Instruction::LDiv    => w.write_u8(opcode::LDIV)?,
					Instruction::FDiv    => w.write_u8(opcode::FDIV)?,
					Instruction::DDiv    => w.write_u8(opcode::DDIV)?,
					Instruction::IRem    => w.write_u8(opcode::IREM)?,
					Instruction::LRem    => w.write_u8(opcode::LREM)?,
					Instruction::FRem    => w.write_u8(opcode::FREM)?,
					Instruction::DRem    => w.write_u8(opcode::DREM)?,
					Instruction::INeg    => w.write_u8(opcode::INEG)?,
					Instruction::LNeg    => w.write_u8(opcode::LNEG)?,
					Instruction::FNeg    => w.write_u8(opcode::FNEG)?,
					Instruction::DNeg    => w.write_u8(opcode::DNEG)?,
					Instruction::IShl    => w.write_u8(opcode::ISHL)?,
					Instruction::LShl    => w.write_u8(opcode::LSHL)?,
					Instruction::IShr    => w.write_u8(opcode::ISHR)?,
					Instruction::LShr    => w.write_u8(opcode::LSHR)?,
					Instruction::IUShr   => w.write_u8(opcode::IUSHR)?,
					Instruction::LUShr   => w.write_u8(opcode::LUSHR)?,
					Instruction::IAnd    => w.write_u8(opcode::IAND)?,
					Instruction::LAnd    => w.write_u8(opcode::LAND)?,
					Instruction::IOr     => w.write_u8(opcode::IOR)?,
					Instruction::LOr     => w.write_u8(opcode::LOR)?,
					Instruction::IXor    => w.write_u8(opcode::IXOR)?,
					Instruction::LXor    => w.write_u8(opcode::LXOR)?,
					&Instruction::IInc(index, value) => {
						if let (Ok(index), Ok(value)) = (u8::try_from(index.index), i8::try_from(value)) {
							w.write_u8(opcode::IINC)?;
							w.write_u8(index)?;
							w.write_i8(value)?;
						} else {
							w.write_u8(opcode::WIDE)?;
							w.write_u8(opcode::IINC)?;
							w.write_u16(index.index)?;
							w.write_i16(value)?;
						}
					},
					Instruction::I2L   => w.write_u8(opcode::I2L)?,
					Instruction::I2F   => w.write_u8(opcode::I2F)?,
					Instruction::I2D   => w.write_u8(opcode::I2D)?,
					Instruction::L2I   => w.write_u8(opcode::L2I)?,
					Instruction::L2F   => w.write_u8(opcode::L2F)?,
					Instruction::L2D   => w.write_u8(opcode::L2D)?,
					Instruction::F2I   => w.write_u8(opcode::F2I)?,
					Instruction::F2L   => w.write_u8(opcode::F2L)?,
					Instruction::F2D   => w.write_u8(opcode::F2D)?,
					Instruction::D2I   => w.write_u8(opcode::D2I)?,
					Instruction::D2L   => w.write_u8(opcode::D2L)?,
					Instruction::D2F   => w.write_u8(opcode::D2F)?,
					Instruction::I2B   => w.write_u8(opcode::I2B)?,
					Instruction::I2C   => w.write_u8(opcode::I2C)?,
					Instruction::I2S   => w.write_u8(opcode::I2S)?,
					Instruction::LCmp  => w.write_u8(opcode::LCMP)?,
					Instruction::FCmpL => w.write_u8(opcode::FCMPL)?,
					Instruction::FCmpG => w.write_u8(opcode::FCMPG)?,
					Instruction::DCmpL => w.write_u8(opcode::DCMPL)?,
					Instruction::DCmpG => w.write_u8(opcode::DCMPG)?,
					&Instruction::IfEq(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFEQ, opcode::IFNE)?,
					&Instruction::IfNe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFNE, opcode::IFEQ)?,
					&Instruction::IfLt(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFLT, opcode::IFGE)?,
					&Instruction::IfGe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFGE, opcode::IFLT)?,
					&Instruction::IfGt(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFGT, opcode::IFLE)?,
					&Instruction::IfLe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFLE, opcode::IFGT)?,
					&Instruction::IfICmpEq(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPEQ, opcode::IF_ICMPNE)?,
					&Instruction::IfICmpNe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPNE, opcode::IF_ICMPEQ)?,
					&Instruction::IfICmpLt(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPLT, opcode::IF_ICMPGE)?,
					&Instruction::IfICmpGe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPGE, opcode::IF_ICMPLT)?,
					&Instruction::IfICmpGt(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPGT, opcode::IF_ICMPLE)?,
					&Instruction::IfICmpLe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ICMPLE, opcode::IF_ICMPGT)?,
					&Instruction::IfACmpEq(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ACMPEQ, opcode::IF_ACMPNE)?,
					&Instruction::IfACmpNe(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IF_ACMPNE, opcode::IF_ACMPEQ)?,
					&Instruction::IfNull(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFNULL, opcode::IFNONNULL)?,
					&Instruction::IfNonNull(label) => if_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::IFNONNULL, opcode::IFNULL)?,
					&Instruction::Goto(label) => goto_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::GOTO, opcode::GOTO_W)?,
					&Instruction::Jsr(label) => goto_helper(&mut w, labels, wide, pending, opcode_pos, node, label, opcode::JSR, opcode::JSR_W)?,
					&Instruction::Ret(index) => {
						if let Ok(index) = u8::try_from(index.index) {
							w.write_u8(opcode::RET)?;
							w.write_u8(index)?;
						} else {
							w.write_u8(opcode::WIDE)?;
							w.write_u8(opcode::RET)?;
							w.write_u16(index.index)?;
						}
					},
					&Instruction::TableSwitch { default, low, high, ref table } => {
						if low > high {
							bail!("`low` must be lower or equal to `high`");
						}
						let n = (high as i64 - low as i64 + 1) as usize;
						if table.len() != n {
							bail!("`low` and `high` bounds don't span a range of the size of the table: table has {}, high and low define {n}", table.len());
						}

						w.write_u8(opcode::TABLESWITCH)?;
						align_to_4_byte_boundary(&mut w)?;
						switch_helper(&mut w, labels, pending, opcode_pos, node, default)?;
						w.write_i32(low)?;
						w.write_i32(high)?;
						for &entry in table {
							switch_helper(&mut w, labels, pending, opcode_pos, node, entry)?;
						}
					},
					Instruction::LookupSwitch { default, pairs } => {
						if !pairs.windows(2).all(|x| x[0].0 < x[1].0) {
							bail!("`pairs` must be sorted by key, without duplicates");
						}
						let n = i32::try_from(pairs.len())
							.with_context(|| anyhow!("`npairs` doesn't fit in i32, it's {:?}", pairs.len()))?;

						w.write_u8(opcode::LOOKUPSWITCH)?;
						align_to_4_byte_boundary(&mut w)?;
						switch_helper(&mut w, labels, pending, opcode_pos, node, *default)?;
						w.write_i32(n)?;
						for &(key, value) in pairs {
							w.write_i32(key)?;
							switch_helper(&mut w, labels, pending, opcode_pos, node, value)?;
						}
					},
					Instruction::IReturn => w.write_u8(opcode::IRETURN)?,
					Instruction::LReturn => w.write_u8(opcode::LRETURN)?,
					Instruction::FReturn => w.write_u8(opcode::FRETURN)?,
					Instruction::DReturn => w.write_u8(opcode::DRETURN)?,
					Instruction::AReturn => w.write_u8(opcode::ARETURN)?,
					Instruction::Return  => w.write_u8(opcode::RETURN)?,
					Instruction::GetStatic(field_ref) => {
						w.write_u8(opcode::GETSTATIC)?;
						w.write_u16(pool.put_field_ref(field_ref)?)?;
					},
					Instruction::PutStatic(field_ref) => {
						w.write_u8(opcode::PUTSTATIC)?;
						w.write_u16(pool.put_field_ref(field_ref)?)?;
					},
					Instruction::GetField(field_ref) => {
						w.write_u8(opcode::GETFIELD)?;
						w.write_u16(pool.put_field_ref(field_ref)?)?;
					},
					Instruction::PutField(field_ref) => {
						w.write_u8(opcode::PUTFIELD)?;
						w.write_u16(pool.put_field_ref(field_ref)?)?;
					},
					Instruction::Invoke(invoke) => {
						let opcode = match invoke.kind {
							InvokeKind::Virtual => opcode::INVOKEVIRTUAL,
							InvokeKind::Special => opcode::INVOKESPECIAL,
							InvokeKind::Static => opcode::INVOKESTATIC,
							InvokeKind::Interface => opcode::INVOKEINTERFACE,
						};
						w.write_u8(opcode)?;
						w.write_u16(pool.put_method_ref(&invoke.method, invoke.interface)?)?;
						if invoke.kind == InvokeKind::Interface {
							w.write_u8(interface_arguments_count(&invoke.method.desc)?)?;
							w.write_u8(0)?;
						}
					},
					Instruction::InvokeDynamic(invoke_dynamic) => {
						w.write_u8(opcode::INVOKEDYNAMIC)?;
						w.write_u16(pool.put_invoke_dynamic(invoke_dynamic)?)?;
						w.write_u8(0)?;
						w.write_u8(0)?;
					},
					Instruction::New(class) => {
						w.write_u8(opcode::NEW)?;
						w.write_u16(pool.put_class(class)?)?;
					},
					Instruction::NewArray(atype) => {
						w.write_u8(opcode::NEWARRAY)?;
						w.write_u8(atype.to_atype())?;
					},
					Instruction::ANewArray(class) => {
						w.write_u8(opcode::ANEWARRAY)?;
						w.write_u16(pool.put_class(class)?)?;
					},
					Instruction::ArrayLength => w.write_u8(opcode::ARRAYLENGTH)?,
					Instruction::AThrow      => w.write_u8(opcode::ATHROW)?,
					Instruction::CheckCast(class) => {
						w.write_u8(opcode::CHECKCAST)?;
						w.write_u16(pool.put_class(class)?)?;
					},
					Instruction::InstanceOf(class) => {
						w.write_u8(opcode::INSTANCEOF)?;
						w.write_u16(pool.put_class(class)?)?;
					},
					Instruction::MonitorEnter => w.write_u8(opcode::MONITORENTER)?,
					Instruction::MonitorExit  => w.write_u8(opcode::MONITOREXIT)?,
					&Instruction::MultiANewArray(ref class, dimensions) => {
						w.write_u8(opcode::MULTIANEWARRAY)?;
						w.write_u16(pool.put_class(class)?)?;
						w.write_u8(dimensions)?;
					},
				}
				Ok(())
			})()
				.with_context(|| anyhow!("at bytecode offset {opcode_pos}, while writing {instruction:?}"))?;
		}

		let end = u16::try_from(w.len())
			.with_context(|| anyhow!("code size exceeded u16::MAX: {}", w.len()))?;
		for &label in list.end_labels() {
			labels.add_opcode_pos_label(label, end);
		}

		for unwritten in &pending.unwritten {
			let target = labels.try_get(&unwritten.label).context("no instruction has the label")?;
			let branch = compute_signed_offset(unwritten.opcode_pos, target);

			if unwritten.wide {
				put_i32_at(&mut w, unwritten.label_write_pos, branch);
			} else if let Ok(branch) = i16::try_from(branch) {
				put_i16_at(&mut w, unwritten.label_write_pos, branch);
			} else {
				// Doesn't fit the space reserved, try again with this branch being wide.
				wide.insert(unwritten.node);

				labels.next_attempt();
				w = Vec::with_capacity(w.len());
				continue 'a;
			}
		}

		break pending.widened_ifs;
	};

	let code_length = w.len();
	if code_length == 0 || code_length > u16::MAX as usize {
		bail!("`code_length` must be greater than zero and less than 65536, got {code_length:?}");
	}
	writer.write_usize_as_u32(code_length)?;
	writer.write_u8_slice(&w)?;

	let mut exception_table = Vec::with_capacity(code.exception_table().len());
	for exception in code.exception_table() {
		let start = labels.try_get(&exception.start)?;
		let end = labels.try_get(&exception.end)?;
		// all the instructions it covered got removed
		if start == end {
			continue;
		}
		exception_table.push((start, end, labels.try_get(&exception.handler)?, &exception.catch));
	}
	writer.write_usize_as_u16(exception_table.len()).context("too many exception table entries")?;
	for (start, end, handler, catch) in exception_table {
		writer.write_u16(start)?;
		writer.write_u16(end)?;
		writer.write_u16(handler)?;
		match catch {
			Some(catch) => writer.write_u16(pool.put_class(catch)?)?,
			None => writer.write_u16(0)?,
		}
	}

	// We write the attributes into a buffer and count them.
	let mut attribute_count = 0;
	let mut buffer = Vec::new();

	let mut frames: Vec<(u16, &Frame)> = Vec::with_capacity(analysis.frames.len());
	for (node, frame) in &analysis.frames {
		frames.push((labels.node_offset(*node)?, frame));
	}
	for node in widened_ifs {
		if let Some(next) = list.next(node) {
			if let Some(frame) = analysis.after_branches.get(&next) {
				frames.push((labels.node_offset(next)?, frame));
			}
		}
	}
	frames.sort_by_key(|&(offset, _)| offset);
	frames.dedup_by_key(|&mut (offset, _)| offset);

	if class.version.has_stack_map_table() && !frames.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::STACK_MAP_TABLE, |w, pool| {
			write_stack_map_table(w, pool, &analysis.initial, &frames, |node| labels.node_offset(node))
		})?;
	}

	if !code.line_numbers().is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::LINE_NUMBER_TABLE, |w, _| {
			w.write_usize_as_u16(code.line_numbers().len()).context("too many line numbers")?;
			for (start, line_number) in code.line_numbers() {
				w.write_u16(labels.try_get(start)?)?;
				w.write_u16(*line_number)?;
			}
			Ok(())
		})?;
	}

	let local_variables = code.local_variables();
	let descriptors = local_variables.iter().filter(|lv| lv.descriptor.is_some()).count();
	let signatures = local_variables.iter().filter(|lv| lv.signature.is_some()).count();

	if descriptors > 0 {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::LOCAL_VARIABLE_TABLE, |w, pool| {
			w.write_usize_as_u16(descriptors).context("too many local variables")?;
			for lv in local_variables {
				if let Some(descriptor) = &lv.descriptor {
					let (start, length) = labels.try_get_range(&lv.range)?;
					w.write_u16(start)?;
					w.write_u16(length)?;
					w.write_u16(pool.put_utf8(&lv.name)?)?;
					w.write_u16(pool.put_utf8(descriptor)?)?;
					w.write_u16(lv.index.index)?;
				}
			}
			Ok(())
		})?;
	}
	if signatures > 0 {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::LOCAL_VARIABLE_TYPE_TABLE, |w, pool| {
			w.write_usize_as_u16(signatures).context("too many local variable signatures")?;
			for lv in local_variables {
				if let Some(signature) = &lv.signature {
					let (start, length) = labels.try_get_range(&lv.range)?;
					w.write_u16(start)?;
					w.write_u16(length)?;
					w.write_u16(pool.put_utf8(&lv.name)?)?;
					w.write_u16(pool.put_utf8(signature)?)?;
					w.write_u16(lv.index.index)?;
				}
			}
			Ok(())
		})?;
	}

	// Other attributes may refer to bytecode offsets that changed, so they are dropped.

	writer.write_u16(attribute_count)?;
	writer.write_u8_slice(&buffer)
}
