use std::collections::HashMap;
use anyhow::{anyhow, Context, Result};
use crate::tree::method::code::{Label, LabelRange};
use crate::tree::method::instruction_list::NodeId;

/// A helper struct for writing [`Label`]s and instructions as bytecode offsets.
///
/// Filled while writing the instructions, and reset for every attempt at writing them.
pub(crate) struct Labels {
	/// From the instructions (which stay the same over the attempts) to their bytecode offset.
	node_to_offset: HashMap<NodeId, u16>,
	labels: HashMap<Label, u16>,
}

impl Labels {
	pub(crate) fn new() -> Labels {
		Labels {
			node_to_offset: HashMap::new(),
			labels: HashMap::new(),
		}
	}

	pub(crate) fn add_instruction(&mut self, id: NodeId, opcode_pos: u16) {
		self.node_to_offset.insert(id, opcode_pos);
	}

	/// Adds a known [`Label`] to opcode position mapping for this writing attempt.
	pub(crate) fn add_opcode_pos_label(&mut self, label: Label, opcode_pos: u16) {
		self.labels.insert(label, opcode_pos);
	}

	pub(crate) fn get(&self, target: &Label) -> Option<u16> {
		self.labels.get(target).copied()
	}

	pub(crate) fn try_get(&self, target: &Label) -> Result<u16> {
		self.get(target).with_context(|| anyhow!("no bytecode offset for label {target:?}"))
	}

	/// Returns the start offset and the length of the range.
	pub(crate) fn try_get_range(&self, range: &LabelRange) -> Result<(u16, u16)> {
		let start = self.try_get(&range.start)?;
		let end = self.try_get(&range.end)?;
		let length = end.checked_sub(start)
			.with_context(|| anyhow!("range ends at {end} before it starts at {start}"))?;
		Ok((start, length))
	}

	pub(crate) fn node_offset(&self, id: NodeId) -> Result<u16> {
		self.node_to_offset.get(&id).copied()
			.with_context(|| anyhow!("no bytecode offset for instruction {id:?}"))
	}

	pub(crate) fn next_attempt(&mut self) {
		self.node_to_offset = HashMap::with_capacity(self.node_to_offset.len());
		self.labels = HashMap::with_capacity(self.labels.len());
	}
}
