use std::collections::HashSet;
use std::io::Cursor;
use anyhow::{anyhow, bail, Context, Result};
use crate::class_constants::{attribute, frame_type, opcode, verification_type, MAGIC};
use crate::class_reader::labels::Labels;
use crate::pool::ConstantPool;
use crate::{ClassRead, OptionExpansion};
use crate::tree::attribute::Attribute;
use crate::tree::class::ClassFile;
use crate::tree::field::Field;
use crate::tree::method::code::{ArrayType, Code, Exception, FrameValue, Instruction, Invoke, InvokeKind, Label, Lv, LvIndex, StackMapFrame};
use crate::tree::method::Method;
use crate::tree::version::Version;

mod labels;

pub(crate) fn read(reader: &mut impl ClassRead) -> Result<ClassFile> {
	let magic = reader.read_u32()?;
	if magic != MAGIC {
		bail!("wrong magic, got {magic:#x} but expected {MAGIC:#x}");
	}

	let minor = reader.read_u16()?;
	let major = reader.read_u16()?;
	let version = Version::new(major, minor);

	let pool = ConstantPool::read(reader).context("while reading the constant pool")?;

	let access = reader.read_u16()?;
	let name = pool.get_class(reader.read_u16()?).context("while reading the class name")?;

	let (super_class, interfaces, fields, methods, attributes) = (|| {
		let super_class = pool.get_optional(reader.read_u16()?, ConstantPool::get_class)?;
		let interfaces = reader.read_vec(
			|r| r.read_u16_as_usize(),
			|r| pool.get_class(r.read_u16()?)
		)?;

		let fields = reader.read_vec(
			|r| r.read_u16_as_usize(),
			|r| read_field(r, &pool)
		)?;
		let methods = reader.read_vec(
			|r| r.read_u16_as_usize(),
			|r| read_method(r, &pool)
		)?;

		let attributes = read_attributes(reader, &pool)?;

		if reader.read_n::<1>().is_ok() {
			bail!("there are bytes left after the end of the class file");
		}

		Ok((super_class, interfaces, fields, methods, attributes))
	})()
		.with_context(|| anyhow!("while reading class {name:?}"))?;

	Ok(ClassFile { version, access, name, super_class, interfaces, fields, methods, attributes, pool })
}

fn read_attribute(reader: &mut impl ClassRead, pool: &ConstantPool) -> Result<Attribute> {
	let name = pool.get_str(reader.read_u16()?).context("while reading an attribute name")?;
	let length = reader.read_u32_as_usize()?;
	let bytes = reader.read_u8_vec(length)
		.with_context(|| anyhow!("while reading {length} bytes of attribute {name:?}"))?;
	Ok(Attribute { name, bytes })
}

fn read_attributes(reader: &mut impl ClassRead, pool: &ConstantPool) -> Result<Vec<Attribute>> {
	reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_attribute(r, pool)
	)
}

fn read_field(reader: &mut impl ClassRead, pool: &ConstantPool) -> Result<Field> {
	let access = reader.read_u16()?;
	let name = pool.get_str(reader.read_u16()?)?;
	let descriptor = pool.get_str(reader.read_u16()?)?;

	let attributes = read_attributes(reader, pool)
		.with_context(|| anyhow!("while reading field {name:?} {descriptor:?}"))?;

	Ok(Field { access, name, descriptor, attributes })
}

fn read_method(reader: &mut impl ClassRead, pool: &ConstantPool) -> Result<Method> {
	let access = reader.read_u16()?;
	let name = pool.get_str(reader.read_u16()?)?;
	let descriptor = pool.get_str(reader.read_u16()?)?;

	let (code, attributes) = (|| {
		let mut code = None;
		let mut attributes = Vec::new();

		for attr in read_attributes(reader, pool)? {
			if attr.name == attribute::CODE {
				code.insert_if_empty(read_code(attr.bytes, pool)?)
					.context("only one `Code` attribute is allowed")?;
			} else {
				attributes.push(attr);
			}
		}

		Ok::<_, anyhow::Error>((code, attributes))
	})()
		.with_context(|| anyhow!("while reading method {name:?} {descriptor:?}"))?;

	Ok(Method { access, name, descriptor, code, attributes })
}

/// A helper trait for the [`read_code`] method.
trait CodeReadHelper: ClassRead {
	fn read_u8_as_local_variable(&mut self) -> Result<LvIndex> {
		Ok(LvIndex { index: self.read_u8()? as u16 })
	}
	fn read_u16_as_local_variable(&mut self) -> Result<LvIndex> {
		Ok(LvIndex { index: self.read_u16()? })
	}

	fn read_i16_as_branch_target(&mut self, opcode_pos: u16) -> Result<u16> {
		let branch = self.read_i16()
			.with_context(|| anyhow!("couldn't read i16 for branch based on opcode {opcode_pos:?}"))?;
		let target = opcode_pos.checked_add_signed(branch)
			.with_context(|| anyhow!("can't add branch offset (i16) of {branch:?} to opcode position (u16) {opcode_pos:?}"))?;
		Ok(target)
	}

	fn read_i32_as_branch_target(&mut self, opcode_pos: u16) -> Result<u16> {
		let branch = self.read_i32()
			.with_context(|| anyhow!("couldn't read i32 for branch based on opcode {opcode_pos:?}"))?;
		let target = (opcode_pos as u32).checked_add_signed(branch)
			.with_context(|| anyhow!("can't add branch offset (i32) of {branch:?} to opcode position (u16) {opcode_pos:?}"))?;
		u16::try_from(target)
			.with_context(|| anyhow!("branch target {target:?} is out of the range of code offsets"))
	}
}

impl<T: ClassRead> CodeReadHelper for T {}

fn align_to_4_byte_boundary(reader: &mut impl ClassRead) -> Result<()> {
	match reader.marker()? & 0b11 {
		0 => {},
		1 => { reader.read_u8()?; reader.read_u8()?; reader.read_u8()?; },
		2 => { reader.read_u8()?; reader.read_u8()?; },
		3 => { reader.read_u8()?; },
		_ => unreachable!(),
	};
	Ok(())
}

/// Reads the contents of a `Code` attribute.
fn read_code(bytes: Vec<u8>, pool: &ConstantPool) -> Result<Code> {
	let mut cursor = Cursor::new(bytes.as_slice());
	let reader = &mut cursor;

	let max_stack = reader.read_u16()?;
	let max_locals = reader.read_u16()?;

	let code_length = reader.read_u32()?;

	// This limit is given by the class file format, and allows us to store bytecode offsets in an u16.
	if code_length == 0 || code_length > u16::MAX as u32 {
		bail!("`code_length` must be greater than zero and less than 65536, got {code_length:?}");
	}
	let code_length = code_length as u16; // can't fail, see checks above

	let mut labels = Labels::new(code_length);

	let bytecode = reader.read_u8_vec(code_length as usize)?;

	// Create all the labels referenced by any branching instruction.
	{
		// We do this so that we can't read more than the bytecode
		let mut r = Cursor::new(&bytecode);
		while (r.position() as usize) < bytecode.len() {
			// We may cast this to an u16, since we checked above that the length of the bytecode is less than 65536.
			let opcode_pos = r.position() as u16;

			(|| {
				match r.read_u8()? {
					opcode::NOP..=opcode::DCONST_1 |
					opcode::ILOAD_0..=opcode::SALOAD |
					opcode::ISTORE_0..=opcode::LXOR |
					opcode::I2L..=opcode::DCMPG |
					opcode::IRETURN..=opcode::RETURN |
					opcode::ARRAYLENGTH |
					opcode::ATHROW |
					opcode::MONITORENTER |
					opcode::MONITOREXIT => {},
					opcode::BIPUSH |
					opcode::LDC |
					opcode::ILOAD..=opcode::ALOAD |
					opcode::ISTORE..=opcode::ASTORE |
					opcode::RET |
					opcode::NEWARRAY => r.skip(1)?,
					opcode::SIPUSH |
					opcode::LDC_W |
					opcode::LDC2_W |
					opcode::IINC |
					opcode::GETSTATIC..=opcode::INVOKESTATIC |
					opcode::NEW |
					opcode::ANEWARRAY |
					opcode::CHECKCAST |
					opcode::INSTANCEOF => r.skip(2)?,
					opcode::MULTIANEWARRAY => r.skip(3)?,
					opcode::INVOKEINTERFACE |
					opcode::INVOKEDYNAMIC => r.skip(4)?,
					opcode::WIDE => {
						match r.read_u8()? {
							opcode::ILOAD..=opcode::ALOAD |
							opcode::ISTORE..=opcode::ASTORE |
							opcode::RET => r.skip(2)?,
							opcode::IINC => r.skip(4)?,
							wide_opcode => bail!("unknown wide opcode {wide_opcode:x?}"),
						}
					},
					opcode::IFEQ..=opcode::JSR |
					opcode::IFNULL |
					opcode::IFNONNULL => {
						labels.get_or_create(r.read_i16_as_branch_target(opcode_pos)?)?;
					},
					opcode::GOTO_W |
					opcode::JSR_W => {
						labels.get_or_create(r.read_i32_as_branch_target(opcode_pos)?)?;
					},
					opcode::TABLESWITCH => {
						align_to_4_byte_boundary(&mut r)?;

						labels.get_or_create(r.read_i32_as_branch_target(opcode_pos)?)?;

						let low = r.read_i32()?;
						let high = r.read_i32()?;

						if low > high { bail!("in tableswitch `low` must be lower or equal to `high`, it's low={low:?} and high={high:?}"); }

						let n = (high as i64 - low as i64 + 1) as u64; // always >= 1
						for _ in 0..n {
							labels.get_or_create(r.read_i32_as_branch_target(opcode_pos)?)?;
						}
					},
					opcode::LOOKUPSWITCH => {
						align_to_4_byte_boundary(&mut r)?;

						labels.get_or_create(r.read_i32_as_branch_target(opcode_pos)?)?;

						let n = r.read_i32()?;
						if n < 0 { bail!("in lookupswitch the `npairs` must be positive, it's npairs={n:?}"); }

						for _ in 0..n {
							let _key = r.read_i32()?;
							labels.get_or_create(r.read_i32_as_branch_target(opcode_pos)?)?;
						}
					},
					opcode::BREAKPOINT => bail!("reserved opcode breakpoint"),
					opcode::IMPDEP1 => bail!("reserved opcode impdep1"),
					opcode::IMPDEP2 => bail!("reserved opcode impdep2"),
					opcode => bail!("unknown opcode {opcode:x?}"),
				};
				Ok(())
			})()
				.with_context(|| anyhow!("at bytecode offset {}", opcode_pos))?;
		}
	}

	let exception_table = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| Ok(Exception {
			start: labels.get_or_create(r.read_u16()?)?,
			end: labels.get_or_create_exclusive(r.read_u16()?)?,
			handler: labels.get_or_create(r.read_u16()?)?,
			catch: pool.get_optional(r.read_u16()?, ConstantPool::get_class)?,
		})
	).context("while reading the exception table")?;

	let mut line_numbers = Vec::new();
	let mut local_variables: Vec<Lv> = Vec::new();
	let mut stack_map = None;
	let mut attributes = Vec::new();

	let attribute_count = reader.read_u16()?;
	for _ in 0..attribute_count {
		let attr = read_attribute(reader, pool)?;
		let mut r = Cursor::new(attr.bytes.as_slice());

		(|| {
			match attr.name.as_str() {
				attribute::LINE_NUMBER_TABLE => {
					let table = r.read_vec(
						|r| r.read_u16_as_usize(),
						|r| Ok((labels.get_or_create(r.read_u16()?)?, r.read_u16()?))
					)?;
					line_numbers.extend(table);
				},
				attribute::LOCAL_VARIABLE_TABLE => {
					let count = r.read_u16()?;
					for _ in 0..count {
						let range = labels.get_or_create_range(r.read_u16()?, r.read_u16()?)?;
						let name = pool.get_str(r.read_u16()?)?;
						let descriptor = pool.get_str(r.read_u16()?)?;
						let index = r.read_u16_as_local_variable()?;

						if let Some(lv) = local_variables.iter_mut().find(|lv| lv.range == range && lv.name == name && lv.index == index) {
							lv.descriptor.insert_if_empty(descriptor)?;
						} else {
							local_variables.push(Lv { range, name, descriptor: Some(descriptor), signature: None, index });
						}
					}
				},
				attribute::LOCAL_VARIABLE_TYPE_TABLE => {
					let count = r.read_u16()?;
					for _ in 0..count {
						let range = labels.get_or_create_range(r.read_u16()?, r.read_u16()?)?;
						let name = pool.get_str(r.read_u16()?)?;
						let signature = pool.get_str(r.read_u16()?)?;
						let index = r.read_u16_as_local_variable()?;

						if let Some(lv) = local_variables.iter_mut().find(|lv| lv.range == range && lv.name == name && lv.index == index) {
							lv.signature.insert_if_empty(signature)?;
						} else {
							local_variables.push(Lv { range, name, descriptor: None, signature: Some(signature), index });
						}
					}
				},
				attribute::STACK_MAP_TABLE => {
					stack_map.insert_if_empty(read_stack_map_table(&mut r, pool, &mut labels)?)
						.context("only one `StackMapTable` attribute is allowed")?;
				},
				// the old format of CLDC, recomputed when the code is re-encoded
				attribute::STACK_MAP => return Ok(()),
				_ => {
					attributes.push(attr.clone());
					return Ok(());
				},
			}

			if (r.position() as usize) != attr.bytes.len() {
				bail!("attribute is longer than its contents");
			}
			Ok(())
		})()
			.with_context(|| anyhow!("while reading code attribute {:?}", attr.name))?;
	}

	if (reader.position() as usize) != bytes.len() {
		bail!("`Code` attribute is longer than its contents");
	}

	// At this point all the labels are stored:
	let labels = labels; // remove the mutability

	let mut instructions = labels.new_instruction_list();
	let mut instruction_starts = HashSet::new();

	// We do this so that we can't read more than the bytecode
	let mut r = Cursor::new(&bytecode);

	while (r.position() as usize) < bytecode.len() {
		// See the comment above for why we may do this.
		let opcode_pos = r.position() as u16;
		instruction_starts.insert(opcode_pos);

		let instruction = (|| Ok(match r.read_u8()? {
			opcode::NOP         => Instruction::Nop,
			opcode::ACONST_NULL => Instruction::AConstNull,
			opcode::ICONST_M1   => Instruction::IConstM1,
			opcode::ICONST_0    => Instruction::IConst0,
			opcode::ICONST_1    => Instruction::IConst1,
			opcode::ICONST_2    => Instruction::IConst2,
			opcode::ICONST_3    => Instruction::IConst3,
			opcode::ICONST_4    => Instruction::IConst4,
			opcode::ICONST_5    => Instruction::IConst5,
			opcode::LCONST_0    => Instruction::LConst0,
			opcode::LCONST_1    => Instruction::LConst1,
			opcode::FCONST_0    => Instruction::FConst0,
			opcode::FCONST_1    => Instruction::FConst1,
			opcode::FCONST_2    => Instruction::FConst2,
			opcode::DCONST_0    => Instruction::DConst0,
			opcode::DCONST_1    => Instruction::DConst1,
			opcode::BIPUSH      => Instruction::BiPush(r.read_i8()?),
			opcode::SIPUSH      => Instruction::SiPush(r.read_i16()?),
			opcode::LDC         => Instruction::Ldc(pool.get_loadable(r.read_u8()? as u16)?),
			opcode::LDC_W       => Instruction::Ldc(pool.get_loadable(r.read_u16()?)?),
			opcode::LDC2_W      => Instruction::Ldc(pool.get_loadable(r.read_u16()?)?),
			opcode::ILOAD       => Instruction::ILoad(r.read_u8_as_local_variable()?),
			opcode::LLOAD       => Instruction::LLoad(r.read_u8_as_local_variable()?),
			opcode::FLOAD       => Instruction::FLoad(r.read_u8_as_local_variable()?),
			opcode::DLOAD       => Instruction::DLoad(r.read_u8_as_local_variable()?),
			opcode::ALOAD       => Instruction::ALoad(r.read_u8_as_local_variable()?),
			opcode @ opcode::ILOAD_0..=opcode::ALOAD_3 => { // 0x1a..=0x2d aka 26..=45
				let shifted = opcode - opcode::ILOAD_0; // 0..=19
				let index = LvIndex { index: (shifted & 0b11) as u16 }; // 0, 1, 2 or 3

				match opcode::ILOAD + (shifted >> 2) { // 21..=25
					opcode::ILOAD => Instruction::ILoad(index),
					opcode::LLOAD => Instruction::LLoad(index),
					opcode::FLOAD => Instruction::FLoad(index),
					opcode::DLOAD => Instruction::DLoad(index),
					_             => Instruction::ALoad(index),
				}
			},
			opcode::IALOAD => Instruction::IALoad,
			opcode::LALOAD => Instruction::LALoad,
			opcode::FALOAD => Instruction::FALoad,
			opcode::DALOAD => Instruction::DALoad,
			opcode::AALOAD => Instruction::AALoad,
			opcode::BALOAD => Instruction::BALoad,
			opcode::CALOAD => Instruction::CALoad,
			opcode::SALOAD => Instruction::SALoad,
			opcode::ISTORE => Instruction::IStore(r.read_u8_as_local_variable()?),
			opcode::LSTORE => Instruction::LStore(r.read_u8_as_local_variable()?),
			opcode::FSTORE => Instruction::FStore(r.read_u8_as_local_variable()?),
			opcode::DSTORE => Instruction::DStore(r.read_u8_as_local_variable()?),
			opcode::ASTORE => Instruction::AStore(r.read_u8_as_local_variable()?),
			opcode @ opcode::ISTORE_0..=opcode::ASTORE_3 => { // 0x3b..=0x4e aka 59..=78
				let shifted = opcode - opcode::ISTORE_0; // 0..=19
				let index = LvIndex { index: (shifted & 0b11) as u16 }; // 0, 1, 2 or 3

				match opcode::ISTORE + (shifted >> 2) { // 54..=58
					opcode::ISTORE => Instruction::IStore(index),
					opcode::LSTORE => Instruction::LStore(index),
					opcode::FSTORE => Instruction::FStore(index),
					opcode::DSTORE => Instruction::DStore(index),
					_              => Instruction::AStore(index),
				}
			},
			opcode::IASTORE => Instruction::IAStore,
			opcode::LASTORE => Instruction::LAStore,
			opcode::FASTORE => Instruction::FAStore,
			opcode::DASTORE => Instruction::DAStore,
			opcode::AASTORE => Instruction::AAStore,
			opcode::BASTORE => Instruction::BAStore,
			opcode::CASTORE => Instruction::CAStore,
			opcode::SASTORE => Instruction::SAStore,
			opcode::POP     => Instruction::Pop,
			opcode::POP2    => Instruction::Pop2,
			opcode::DUP     => Instruction::Dup,
			opcode::DUP_X1  => Instruction::DupX1,
			opcode::DUP_X2  => Instruction::DupX2,
			opcode::DUP2    => Instruction::Dup2,
			opcode::DUP2_X1 => Instruction::Dup2X1,
			opcode::DUP2_X2 => Instruction::Dup2X2,
			opcode::SWAP    => Instruction::Swap,
			opcode::IADD    => Instruction::IAdd,
			opcode::LADD    => Instruction::LAdd,
			opcode::FADD    => Instruction::FAdd,
			opcode::DADD    => Instruction::DAdd,
			opcode::ISUB    => Instruction::ISub,
			opcode::LSUB    => Instruction::LSub,
			opcode::FSUB    => Instruction::FSub,
			opcode::DSUB    => Instruction::DSub,
			opcode::IMUL    => Instruction::IMul,
			opcode::LMUL    => Instruction::LMul,
			opcode::FMUL    => Instruction::FMul,
			opcode::DMUL    => Instruction::DMul,
			opcode::IDIV    => Instruction::IDiv,
			opcode::LDIV    => Instruction::LDiv,
			opcode::FDIV    => Instruction::FDiv,
			opcode::DDIV    => Instruction::DDiv,
			opcode::IREM    => Instruction::IRem,
			opcode::LREM    => Instruction::LRem,
			opcode::FREM    => Instruction::FRem,
			opcode::DREM    => Instruction::DRem,
			opcode::INEG    => Instruction::INeg,
			opcode::LNEG    => Instruction::LNeg,
			opcode::FNEG    => Instruction::FNeg,
			opcode::DNEG    => Instruction::DNeg,
			opcode::ISHL    => Instruction::IShl,
			opcode::LSHL    => Instruction::LShl,
			opcode::ISHR    => Instruction::IShr,
			opcode::LSHR    => Instruction::LShr,
			opcode::IUSHR   => Instruction::IUShr,
			opcode::LUSHR   => Instruction::LUShr,
			opcode::IAND    => Instruction::IAnd,
			opcode::LAND    => Instruction::LAnd,
			opcode::IOR     => Instruction::IOr,
			opcode::LOR     => Instruction::LOr,
			opcode::IXOR    => Instruction::IXor,
			opcode::LXOR    => Instruction::LXor,
			opcode::IINC => {
				let index = r.read_u8_as_local_variable()?;
				let value = r.read_i8()?;
				Instruction::IInc(index, value as i16)
			},
			opcode::I2L   => Instruction::I2L,
			opcode::I2F   => Instruction::I2F,
			opcode::I2D   => Instruction::I2D,
			opcode::L2I   => Instruction::L2I,
			opcode::L2F   => Instruction::L2F,
			opcode::L2D   => Instruction::L2D,
			opcode::F2I   => Instruction::F2I,
			opcode::F2L   => Instruction::F2L,
			opcode::F2D   => Instruction::F2D,
			opcode::D2I   => Instruction::D2I,
			opcode::D2L   => Instruction::D2L,
			opcode::D2F   => Instruction::D2F,
			opcode::I2B   => Instruction::I2B,
			opcode::I2C   => Instruction::I2C,
			opcode::I2S   => Instruction::I2S,
			opcode::LCMP  => Instruction::LCmp,
			opcode::FCMPL => Instruction::FCmpL,
			opcode::FCMPG => Instruction::FCmpG,
			opcode::DCMPL => Instruction::DCmpL,
			opcode::DCMPG => Instruction::DCmpG,
			opcode::IFEQ      => Instruction::IfEq(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFNE      => Instruction::IfNe(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFLT      => Instruction::IfLt(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFGE      => Instruction::IfGe(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFGT      => Instruction::IfGt(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFLE      => Instruction::IfLe(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPEQ => Instruction::IfICmpEq(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPNE => Instruction::IfICmpNe(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPLT => Instruction::IfICmpLt(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPGE => Instruction::IfICmpGe(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPGT => Instruction::IfICmpGt(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ICMPLE => Instruction::IfICmpLe(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ACMPEQ => Instruction::IfACmpEq(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IF_ACMPNE => Instruction::IfACmpNe(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::GOTO      => Instruction::Goto(    labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::JSR       => Instruction::Jsr(     labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::RET       => Instruction::Ret(r.read_u8_as_local_variable()?),
			opcode::TABLESWITCH => {
				align_to_4_byte_boundary(&mut r)?;

				let default = labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?;
				let low = r.read_i32()?;
				let high = r.read_i32()?;

				if low > high { bail!("in tableswitch `low` must be lower or equal to `high`, it's low={low:?} and high={high:?}"); }

				let n = (high as i64 - low as i64 + 1) as usize; // always >= 1

				let mut table = Vec::with_capacity(n);
				for _ in 0..n {
					table.push(labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?);
				}

				Instruction::TableSwitch { default, low, high, table }
			},
			opcode::LOOKUPSWITCH => {
				align_to_4_byte_boundary(&mut r)?;

				let default = labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?;

				let n = r.read_i32()?;
				if n < 0 { bail!("in lookupswitch the `npairs` must be positive, it's npairs={n:?}"); }

				let mut pairs = Vec::with_capacity(n as usize);
				for _ in 0..n {
					let key = r.read_i32()?;
					let target = labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?;
					pairs.push((key, target));
				}

				Instruction::LookupSwitch { default, pairs }
			},
			opcode::IRETURN => Instruction::IReturn,
			opcode::LRETURN => Instruction::LReturn,
			opcode::FRETURN => Instruction::FReturn,
			opcode::DRETURN => Instruction::DReturn,
			opcode::ARETURN => Instruction::AReturn,
			opcode::RETURN  => Instruction::Return,
			opcode::GETSTATIC => Instruction::GetStatic(pool.get_field_ref(r.read_u16()?)?),
			opcode::PUTSTATIC => Instruction::PutStatic(pool.get_field_ref(r.read_u16()?)?),
			opcode::GETFIELD  => Instruction::GetField(pool.get_field_ref(r.read_u16()?)?),
			opcode::PUTFIELD  => Instruction::PutField(pool.get_field_ref(r.read_u16()?)?),
			opcode::INVOKEVIRTUAL => {
				let (method, interface) = pool.get_method_ref(r.read_u16()?)?;
				if interface {
					bail!("`invokevirtual` of interface method {method}");
				}
				Instruction::Invoke(Invoke { kind: InvokeKind::Virtual, method, interface })
			},
			opcode::INVOKESPECIAL => {
				let (method, interface) = pool.get_method_ref(r.read_u16()?)?;
				Instruction::Invoke(Invoke { kind: InvokeKind::Special, method, interface })
			},
			opcode::INVOKESTATIC => {
				let (method, interface) = pool.get_method_ref(r.read_u16()?)?;
				Instruction::Invoke(Invoke { kind: InvokeKind::Static, method, interface })
			},
			opcode::INVOKEINTERFACE => {
				let (method, interface) = pool.get_method_ref(r.read_u16()?)?;
				if !interface {
					bail!("`invokeinterface` of class method {method}");
				}
				let _count = r.read_u8()?; // computed from the descriptor when writing
				let _zero = r.read_u8()?;
				Instruction::Invoke(Invoke { kind: InvokeKind::Interface, method, interface })
			},
			opcode::INVOKEDYNAMIC => {
				let invoke_dynamic = pool.get_invoke_dynamic(r.read_u16()?)?;
				let _zero = r.read_u8()?;
				let _zero = r.read_u8()?;
				Instruction::InvokeDynamic(invoke_dynamic)
			},
			opcode::NEW          => Instruction::New(pool.get_class(r.read_u16()?)?),
			opcode::NEWARRAY     => Instruction::NewArray(ArrayType::from_atype(r.read_u8()?)?),
			opcode::ANEWARRAY    => Instruction::ANewArray(pool.get_class(r.read_u16()?)?),
			opcode::ARRAYLENGTH  => Instruction::ArrayLength,
			opcode::ATHROW       => Instruction::AThrow,
			opcode::CHECKCAST    => Instruction::CheckCast(pool.get_class(r.read_u16()?)?),
			opcode::INSTANCEOF   => Instruction::InstanceOf(pool.get_class(r.read_u16()?)?),
			opcode::MONITORENTER => Instruction::MonitorEnter,
			opcode::MONITOREXIT  => Instruction::MonitorExit,
			opcode::WIDE => {
				match r.read_u8()? {
					opcode::ILOAD  => Instruction::ILoad( r.read_u16_as_local_variable()?),
					opcode::LLOAD  => Instruction::LLoad( r.read_u16_as_local_variable()?),
					opcode::FLOAD  => Instruction::FLoad( r.read_u16_as_local_variable()?),
					opcode::DLOAD  => Instruction::DLoad( r.read_u16_as_local_variable()?),
					opcode::ALOAD  => Instruction::ALoad( r.read_u16_as_local_variable()?),
					opcode::ISTORE => Instruction::IStore(r.read_u16_as_local_variable()?),
					opcode::LSTORE => Instruction::LStore(r.read_u16_as_local_variable()?),
					opcode::FSTORE => Instruction::FStore(r.read_u16_as_local_variable()?),
					opcode::DSTORE => Instruction::DStore(r.read_u16_as_local_variable()?),
					opcode::ASTORE => Instruction::AStore(r.read_u16_as_local_variable()?),
					opcode::RET    => Instruction::Ret(   r.read_u16_as_local_variable()?),
					opcode::IINC => {
						let index = r.read_u16_as_local_variable()?;
						let value = r.read_i16()?;

						Instruction::IInc(index, value)
					},
					wide_opcode => bail!("unknown wide opcode {wide_opcode:x?}"),
				}
			},
			opcode::MULTIANEWARRAY => Instruction::MultiANewArray(pool.get_class(r.read_u16()?)?, r.read_u8()?),
			opcode::IFNULL    => Instruction::IfNull(   labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::IFNONNULL => Instruction::IfNonNull(labels.try_get(r.read_i16_as_branch_target(opcode_pos)?)?),
			opcode::GOTO_W    => Instruction::Goto(     labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?),
			opcode::JSR_W     => Instruction::Jsr(      labels.try_get(r.read_i32_as_branch_target(opcode_pos)?)?),

			opcode => bail!("unknown opcode {opcode:x?}"),
		}))()
			.with_context(|| anyhow!("at bytecode offset {}", opcode_pos))?;

		let id = instructions.push_back(instruction);
		if let Some(label) = labels.get(opcode_pos) {
			instructions.bind_label(label, id)?;
		}
	}
	if let Some(label) = labels.get(code_length) {
		instructions.bind_end_label(label)?;
	}

	labels.check_boundaries(&instruction_starts)?;

	let stack_map = stack_map.unwrap_or_default();
	Ok(Code::from_parts(max_stack, max_locals, instructions, exception_table, line_numbers, local_variables, stack_map, attributes, bytes))
}

fn read_stack_map_table(r: &mut impl ClassRead, pool: &ConstantPool, labels: &mut Labels) -> Result<Vec<(Label, StackMapFrame)>> {
	let count = r.read_u16()?;
	let mut frames = Vec::with_capacity(count as usize);
	let mut previous_offset: Option<u16> = None;

	for _ in 0..count {
		let tag = r.read_u8()?;
		let offset_delta = match tag {
			0..=63 => tag as u16,
			frame_type::SAME_LOCALS_1_STACK_ITEM..=127 => (tag - frame_type::SAME_LOCALS_1_STACK_ITEM) as u16,
			128..=246 => bail!("reserved stack map frame type {tag}"),
			_ => r.read_u16()?,
		};
		let frame = match tag {
			0..=63 | frame_type::SAME_FRAME_EXTENDED => StackMapFrame::Same,
			frame_type::SAME_LOCALS_1_STACK_ITEM..=127 | frame_type::SAME_LOCALS_1_STACK_ITEM_EXTENDED =>
				StackMapFrame::SameLocals1StackItem(read_frame_value(r, pool, labels)?),
			frame_type::CHOP_3..=frame_type::CHOP_1 => StackMapFrame::Chop(frame_type::SAME_FRAME_EXTENDED - tag),
			frame_type::APPEND_1..=frame_type::APPEND_3 => {
				let n = tag - frame_type::SAME_FRAME_EXTENDED;
				let locals = (0..n).map(|_| read_frame_value(r, pool, labels)).collect::<Result<_>>()?;
				StackMapFrame::Append(locals)
			},
			frame_type::FULL_FRAME => {
				let locals = r.read_vec(|r| r.read_u16_as_usize(), |r| read_frame_value(r, pool, labels))?;
				let stack = r.read_vec(|r| r.read_u16_as_usize(), |r| read_frame_value(r, pool, labels))?;
				StackMapFrame::Full { locals, stack }
			},
			_ => bail!("reserved stack map frame type {tag}"),
		};

		let offset = match previous_offset {
			None => Some(offset_delta),
			Some(previous) => previous.checked_add(offset_delta).and_then(|offset| offset.checked_add(1)),
		}.with_context(|| anyhow!("stack map frame offset overflows, delta {offset_delta} after {previous_offset:?}"))?;
		previous_offset = Some(offset);

		let label = labels.get_or_create(offset).context("while reading the offset of a stack map frame")?;
		frames.push((label, frame));
	}

	Ok(frames)
}

fn read_frame_value(r: &mut impl ClassRead, pool: &ConstantPool, labels: &mut Labels) -> Result<FrameValue> {
	Ok(match r.read_u8()? {
		verification_type::TOP => FrameValue::Top,
		verification_type::INTEGER => FrameValue::Integer,
		verification_type::FLOAT => FrameValue::Float,
		verification_type::DOUBLE => FrameValue::Double,
		verification_type::LONG => FrameValue::Long,
		verification_type::NULL => FrameValue::Null,
		verification_type::UNINITIALIZED_THIS => FrameValue::UninitializedThis,
		verification_type::OBJECT => FrameValue::Object(pool.get_class(r.read_u16()?)?),
		verification_type::UNINITIALIZED => FrameValue::Uninitialized(labels.get_or_create(r.read_u16()?)?),
		tag => bail!("unknown verification type tag {tag}"),
	})
}

#[cfg(test)]
mod testing {
	use anyhow::{Context, Result};
	use pretty_assertions::assert_eq;
	use crate::class_reader::read_code;
	use crate::pool::ConstantPool;
	use crate::tree::method::code::{FrameValue, Instruction, LvIndex, StackMapFrame};

	/// Wraps bytecode into the contents of a `Code` attribute without exceptions and attributes.
	fn code_attribute(bytecode: &[u8]) -> Vec<u8> {
		let mut vec = vec![0x00, 0x02, 0x00, 0x01];
		vec.extend_from_slice(&(bytecode.len() as u32).to_be_bytes());
		vec.extend_from_slice(bytecode);
		vec.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
		vec
	}

	/// Like [`code_attribute`], with a `StackMapTable` attribute of the given contents.
	fn code_attribute_with_stack_map(bytecode: &[u8], pool: &mut ConstantPool, table: &[u8]) -> Result<Vec<u8>> {
		let mut vec = code_attribute(bytecode);
		vec.truncate(vec.len() - 2);
		vec.extend_from_slice(&1u16.to_be_bytes());
		vec.extend_from_slice(&pool.put_utf8("StackMapTable")?.to_be_bytes());
		vec.extend_from_slice(&(table.len() as u32).to_be_bytes());
		vec.extend_from_slice(table);
		Ok(vec)
	}

	fn instructions(bytecode: &[u8]) -> Result<Vec<Instruction>> {
		let code = read_code(code_attribute(bytecode), &ConstantPool::new())?;
		Ok(code.instructions().iter().map(|(_, instruction)| instruction.clone()).collect())
	}

	fn table_switch(default: i32, target: i32) -> Vec<u8> {
		// iconst_0, then the tableswitch at 1, padded to 4
		let mut vec = vec![0x03, 0xaa, 0x00, 0x00];
		vec.extend_from_slice(&default.to_be_bytes());
		vec.extend_from_slice(&0i32.to_be_bytes());
		vec.extend_from_slice(&0i32.to_be_bytes());
		vec.extend_from_slice(&target.to_be_bytes());
		vec.push(0xb1);
		vec
	}

	#[test]
	fn short_and_wide_forms() -> Result<()> {
		// aload_0, iload 5, wide iinc 300 -2, lstore_2, return
		let bytecode = [0x2a, 0x15, 0x05, 0xc4, 0x84, 0x01, 0x2c, 0xff, 0xfe, 0x41, 0xb1];
		assert_eq!(instructions(&bytecode)?, vec![
			Instruction::ALoad(LvIndex { index: 0 }),
			Instruction::ILoad(LvIndex { index: 5 }),
			Instruction::IInc(LvIndex { index: 300 }, -2),
			Instruction::LStore(LvIndex { index: 2 }),
			Instruction::Return,
		]);
		Ok(())
	}

	#[test]
	fn branches_get_labels() -> Result<()> {
		// 0: iconst_0, 1: ifeq +4, 4: nop, 5: return
		let bytecode = [0x03, 0x99, 0x00, 0x04, 0x00, 0xb1];
		let code = read_code(code_attribute(&bytecode), &ConstantPool::new())?;
		let list = code.instructions();
		let ids = list.ids();

		let Some(&Instruction::IfEq(target)) = list.get(ids[1]) else {
			panic!("expected ifeq, got {:?}", list.get(ids[1]));
		};
		assert_eq!(list.labels(ids[3]), Some(&[target][..]));
		assert!(!code.is_modified());
		Ok(())
	}

	#[test]
	fn stack_map_frames_get_labels() -> Result<()> {
		let mut pool = ConstantPool::new();
		let game = pool.put_class("a/Game")?;

		// 0: iconst_0, 1: ifeq +4, 4: nop, 5: return
		let bytecode = [0x03, 0x99, 0x00, 0x04, 0x00, 0xb1];
		// append [a/Game] at 4, then chop 1 at 5
		let mut table = vec![0x00, 0x02, 252, 0x00, 0x04, 7];
		table.extend_from_slice(&game.to_be_bytes());
		table.extend_from_slice(&[250, 0x00, 0x00]);

		let code = read_code(code_attribute_with_stack_map(&bytecode, &mut pool, &table)?, &pool)?;
		let list = code.instructions();
		let ids = list.ids();
		let label = |i: usize| list.labels(ids[i]).and_then(|labels| labels.first().copied()).context("instruction has no label");

		assert_eq!(code.stack_map(), &[
			(label(2)?, StackMapFrame::Append(vec![FrameValue::Object("a/Game".to_owned())])),
			(label(3)?, StackMapFrame::Chop(1)),
		][..]);
		assert!(!code.is_modified());
		Ok(())
	}

	#[test]
	fn stack_map_frames_must_be_at_instructions() -> Result<()> {
		let mut pool = ConstantPool::new();
		// same frame at 2, inside the sipush
		let bytecode = [0x11, 0x00, 0x00, 0xb1];
		let bytes = code_attribute_with_stack_map(&bytecode, &mut pool, &[0x00, 0x01, 0x02])?;
		assert!(read_code(bytes, &pool).is_err());

		let bytes = code_attribute_with_stack_map(&bytecode, &mut pool, &[0x00, 0x01, 200])?;
		assert!(read_code(bytes, &pool).is_err());
		Ok(())
	}

	#[test]
	fn branch_into_an_instruction_is_an_error() {
		// 0: goto +4 (into the operand of the sipush), 3: sipush 0, 6: return
		let bytecode = [0xa7, 0x00, 0x04, 0x11, 0x00, 0x00, 0xb1];
		assert!(read_code(code_attribute(&bytecode), &ConstantPool::new()).is_err());
	}

	#[test]
	fn branch_out_of_code_is_an_error() {
		let bytecode = [0xa7, 0x00, 0x10, 0xb1];
		assert!(read_code(code_attribute(&bytecode), &ConstantPool::new()).is_err());
	}

	#[test]
	fn truncated_instruction_is_an_error() {
		// sipush with only one byte of operand
		let bytecode = [0x11, 0x00];
		assert!(read_code(code_attribute(&bytecode), &ConstantPool::new()).is_err());
	}

	#[test]
	fn table_switch_is_aligned() -> Result<()> {
		// the return is at offset 20
		let read = instructions(&table_switch(19, 19))?;
		assert_eq!(read.len(), 3);
		assert!(matches!(read[1], Instruction::TableSwitch { low: 0, high: 0, .. }));

		assert!(instructions(&table_switch(23, 19)).is_err());
		Ok(())
	}

	#[test]
	fn trailing_bytes_in_code_attribute_are_an_error() {
		let mut bytes = code_attribute(&[0xb1]);
		bytes.push(0x00);
		assert!(read_code(bytes, &ConstantPool::new()).is_err());
	}
}
