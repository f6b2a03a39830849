use anyhow::{anyhow, Context, Result};
use crate::analysis::frame::{Frame, VType};
use crate::class_constants::frame_type::{FULL_FRAME, SAME_FRAME_EXTENDED, SAME_LOCALS_1_STACK_ITEM, SAME_LOCALS_1_STACK_ITEM_EXTENDED};
use crate::class_constants::verification_type;
use crate::ClassWrite;
use crate::pool::ConstantPool;
use crate::tree::method::instruction_list::NodeId;

/// Drops the [`VType::Top`] following each `long` and `double`, and the trailing [`VType::Top`]s.
pub(crate) fn compact_locals(locals: &[VType]) -> Vec<VType> {
	let mut out = Vec::with_capacity(locals.len());
	let mut i = 0;
	while i < locals.len() {
		let value = &locals[i];
		out.push(value.clone());
		if value.is_wide() && locals.get(i + 1) == Some(&VType::Top) {
			i += 1;
		}
		i += 1;
	}
	while out.last() == Some(&VType::Top) {
		out.pop();
	}
	out
}

/// The opposite of [`compact_locals`]: adds a [`VType::Top`] after each `long` and `double`.
pub(crate) fn expand_locals(locals: &[VType]) -> Vec<VType> {
	let mut out = Vec::with_capacity(locals.len());
	for value in locals {
		out.push(value.clone());
		if value.is_wide() {
			out.push(VType::Top);
		}
	}
	out
}

fn write_verification_type(
	w: &mut Vec<u8>,
	pool: &mut ConstantPool,
	value: &VType,
	new_offset: &impl Fn(NodeId) -> Result<u16>,
) -> Result<()> {
	match value {
		VType::Top => w.write_u8(verification_type::TOP),
		VType::Integer => w.write_u8(verification_type::INTEGER),
		VType::Float => w.write_u8(verification_type::FLOAT),
		VType::Double => w.write_u8(verification_type::DOUBLE),
		VType::Long => w.write_u8(verification_type::LONG),
		VType::Null => w.write_u8(verification_type::NULL),
		VType::UninitializedThis => w.write_u8(verification_type::UNINITIALIZED_THIS),
		VType::Object(name) => {
			w.write_u8(verification_type::OBJECT)?;
			w.write_u16(pool.put_class(name)?)
		},
		&VType::Uninitialized(new) => {
			w.write_u8(verification_type::UNINITIALIZED)?;
			w.write_u16(new_offset(new)?)
		},
	}
}

fn write_verification_types(
	w: &mut Vec<u8>,
	pool: &mut ConstantPool,
	values: &[VType],
	new_offset: &impl Fn(NodeId) -> Result<u16>,
) -> Result<()> {
	for value in values {
		write_verification_type(w, pool, value, new_offset)?;
	}
	Ok(())
}

/// Writes the contents of a `StackMapTable` attribute, choosing the shortest encoding for each frame.
///
/// The `frames` must be ordered by their bytecode offset, and `new_offset` gives the offset of the `new` instruction
/// creating an uninitialized value.
pub(crate) fn write_stack_map_table(
	w: &mut Vec<u8>,
	pool: &mut ConstantPool,
	initial: &Frame,
	frames: &[(u16, &Frame)],
	new_offset: impl Fn(NodeId) -> Result<u16>,
) -> Result<()> {
	w.write_usize_as_u16(frames.len()).context("too many stack map frames")?;

	let mut previous_locals = compact_locals(&initial.locals);
	let mut previous_offset: Option<u16> = None;

	for &(offset, frame) in frames {
		let offset_delta = match previous_offset {
			None => offset,
			Some(previous) => offset.checked_sub(previous)
				.and_then(|delta| delta.checked_sub(1))
				.with_context(|| anyhow!("stack map frame at {offset} doesn't come after the one at {previous}"))?,
		};
		previous_offset = Some(offset);

		let locals = compact_locals(&frame.locals);
		let stack = &frame.stack;

		let same_locals = locals == previous_locals;
		let k = locals.len() as isize - previous_locals.len() as isize;

		if stack.is_empty() && same_locals {
			if offset_delta < 64 {
				w.write_u8(offset_delta as u8)?;
			} else {
				w.write_u8(SAME_FRAME_EXTENDED)?;
				w.write_u16(offset_delta)?;
			}
		} else if stack.len() == 1 && same_locals {
			if offset_delta < 64 {
				w.write_u8(SAME_LOCALS_1_STACK_ITEM + offset_delta as u8)?;
			} else {
				w.write_u8(SAME_LOCALS_1_STACK_ITEM_EXTENDED)?;
				w.write_u16(offset_delta)?;
			}
			write_verification_type(w, pool, &stack[0], &new_offset)?;
		} else if stack.is_empty() && (-3..0).contains(&k) && previous_locals.starts_with(&locals) {
			// chop
			w.write_u8((SAME_FRAME_EXTENDED as isize + k) as u8)?;
			w.write_u16(offset_delta)?;
		} else if stack.is_empty() && (1..=3).contains(&k) && locals.starts_with(&previous_locals) {
			// append
			w.write_u8((SAME_FRAME_EXTENDED as isize + k) as u8)?;
			w.write_u16(offset_delta)?;
			write_verification_types(w, pool, &locals[previous_locals.len()..], &new_offset)?;
		} else {
			w.write_u8(FULL_FRAME)?;
			w.write_u16(offset_delta)?;
			w.write_usize_as_u16(locals.len())?;
			write_verification_types(w, pool, &locals, &new_offset)?;
			w.write_usize_as_u16(stack.len())?;
			write_verification_types(w, pool, stack, &new_offset)?;
		}

		previous_locals = locals;
	}

	Ok(())
}
