use std::collections::{HashMap, HashSet};
use anyhow::{anyhow, bail, Context, Result};
use crate::tree::method::code::{Label, LabelRange};
use crate::tree::method::instruction_list::InstructionList;

/// A helper struct for reading bytecode offsets into [`Label`]s.
pub(crate) struct Labels {
	code_length: u16,
	labels: HashMap<u16, Label>,
	next_id: u32,
}

impl Labels {
	pub(crate) fn new(code_length: u16) -> Labels {
		Labels {
			code_length,
			labels: HashMap::with_capacity(code_length as usize / 3),
			next_id: 0,
		}
	}

	fn get_or_add_unchecked(&mut self, pc: u16) -> Label {
		*self.labels.entry(pc).or_insert_with(|| {
			let label = Label { id: self.next_id };
			self.next_id += 1;
			label
		})
	}

	/// Gets or creates the label for the opcode at `pc`.
	pub(crate) fn get_or_create(&mut self, pc: u16) -> Result<Label> {
		if pc >= self.code_length {
			bail!("label for bytecode offset {pc:?} out of bounds for code length {:?}", self.code_length);
		}

		Ok(self.get_or_add_unchecked(pc))
	}

	/// Like [`Labels::get_or_create`], but also allows the end of the code, for exclusive range ends.
	pub(crate) fn get_or_create_exclusive(&mut self, pc: u16) -> Result<Label> {
		if pc > self.code_length {
			bail!("label for bytecode offset {pc:?} out of bounds for code length {:?}", self.code_length);
		}

		Ok(self.get_or_add_unchecked(pc))
	}

	pub(crate) fn get_or_create_range(&mut self, start_pc: u16, length: u16) -> Result<LabelRange> {
		let end_pc = start_pc.checked_add(length)
			.with_context(|| anyhow!("range starting at {start_pc:?} with length {length:?} overflows"))?;
		Ok(LabelRange {
			start: self.get_or_create(start_pc)?,
			end: self.get_or_create_exclusive(end_pc)?,
		})
	}

	pub(crate) fn try_get(&self, pc: u16) -> Result<Label> {
		self.get(pc).with_context(|| anyhow!("no label at bytecode offset {pc:?}"))
	}

	pub(crate) fn get(&self, pc: u16) -> Option<Label> {
		self.labels.get(&pc).copied()
	}

	/// Creates the list the instructions are put in. Label ids it gives out don't collide with the ones given out here.
	pub(crate) fn new_instruction_list(&self) -> InstructionList {
		InstructionList::with_label_ids_from(self.next_id)
	}

	/// Checks that every label is at the start of an instruction, or at the end of the code.
	pub(crate) fn check_boundaries(&self, instruction_starts: &HashSet<u16>) -> Result<()> {
		for &pc in self.labels.keys() {
			if pc != self.code_length && !instruction_starts.contains(&pc) {
				bail!("bytecode offset {pc:?} is referenced, but doesn't start an instruction");
			}
		}
		Ok(())
	}
}
