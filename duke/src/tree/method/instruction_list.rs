use std::collections::HashSet;
use anyhow::{anyhow, bail, Context, Result};
use crate::tree::method::code::{Instruction, Label};

/// Identifies a node of an [`InstructionList`].
///
/// Ids stay valid across edits of other nodes, and are never reused after their node got removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
	pub(crate) fn index(self) -> usize {
		self.0 as usize
	}
}

#[derive(Debug, Clone)]
struct Slot {
	/// [`None`] once removed.
	node: Option<Node>,
	prev: Option<NodeId>,
	next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
	labels: Vec<Label>,
	instruction: Instruction,
}

/// The instructions of a method body, as a doubly linked list in an arena.
///
/// Each node may carry [`Label`]s, meaning the bytecode offset of its instruction. Labels for the offset
/// right after the last instruction are kept separately, see [`InstructionList::end_labels`].
#[derive(Debug, Clone)]
pub struct InstructionList {
	slots: Vec<Slot>,
	head: Option<NodeId>,
	tail: Option<NodeId>,
	len: usize,

	end_labels: Vec<Label>,
	bound: HashSet<Label>,
	next_label: u32,
}

impl Default for InstructionList {
	fn default() -> Self {
		InstructionList::new()
	}
}

impl InstructionList {
	pub fn new() -> InstructionList {
		InstructionList::with_label_ids_from(0)
	}

	/// Creates a list that gives out label ids starting with `next_label`, the ones below are already in use.
	pub(crate) fn with_label_ids_from(next_label: u32) -> InstructionList {
		InstructionList {
			slots: Vec::new(),
			head: None,
			tail: None,
			len: 0,
			end_labels: Vec::new(),
			bound: HashSet::new(),
			next_label,
		}
	}

	/// Creates a new label, not yet bound to any position.
	pub fn new_label(&mut self) -> Label {
		let label = Label { id: self.next_label };
		self.next_label += 1;
		label
	}

	fn slot(&self, id: NodeId) -> Option<&Slot> {
		self.slots.get(id.index()).filter(|slot| slot.node.is_some())
	}

	fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
		self.slots.get_mut(id.index())
			.and_then(|slot| slot.node.as_mut())
			.with_context(|| anyhow!("no instruction with id {id:?} in list, it was removed or belongs to another list"))
	}

	/// Appends an instruction, returning its id.
	pub fn push_back(&mut self, instruction: Instruction) -> NodeId {
		let id = NodeId(self.slots.len() as u32);
		self.slots.push(Slot {
			node: Some(Node { labels: Vec::new(), instruction }),
			prev: self.tail,
			next: None,
		});

		if let Some(tail) = self.tail {
			self.slots[tail.index()].next = Some(id);
		} else {
			self.head = Some(id);
		}
		self.tail = Some(id);
		self.len += 1;

		id
	}

	fn check_unbound(&mut self, label: Label) -> Result<()> {
		if !self.bound.insert(label) {
			bail!("label {label:?} is already bound to a position");
		}
		Ok(())
	}

	/// Binds a label to the offset of the instruction with the given id.
	pub fn bind_label(&mut self, label: Label, id: NodeId) -> Result<()> {
		// check before marking the label as bound
		self.node_mut(id)?;
		self.check_unbound(label)?;
		self.node_mut(id)?.labels.push(label);
		Ok(())
	}

	/// Binds a label to the offset right after the last instruction.
	pub fn bind_end_label(&mut self, label: Label) -> Result<()> {
		self.check_unbound(label)?;
		self.end_labels.push(label);
		Ok(())
	}

	pub fn get(&self, id: NodeId) -> Option<&Instruction> {
		self.slot(id).and_then(|slot| slot.node.as_ref()).map(|node| &node.instruction)
	}

	pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Instruction> {
		self.node_mut(id).ok().map(|node| &mut node.instruction)
	}

	/// The labels bound to the instruction with the given id.
	pub fn labels(&self, id: NodeId) -> Option<&[Label]> {
		self.slot(id).and_then(|slot| slot.node.as_ref()).map(|node| node.labels.as_slice())
	}

	/// The labels bound to the offset right after the last instruction.
	pub fn end_labels(&self) -> &[Label] {
		&self.end_labels
	}

	/// Replaces an instruction in place, keeping its position and labels. Returns the old instruction.
	pub fn set(&mut self, id: NodeId, instruction: Instruction) -> Result<Instruction> {
		let node = self.node_mut(id)?;
		Ok(std::mem::replace(&mut node.instruction, instruction))
	}

	/// Removes an instruction, returning it.
	///
	/// The labels of the removed instruction move to the next one (or to the end of the code), so that everything
	/// referring to the removed position now refers to the position following it.
	pub fn remove(&mut self, id: NodeId) -> Result<Instruction> {
		let node = self.slots.get_mut(id.index())
			.and_then(|slot| slot.node.take())
			.with_context(|| anyhow!("cannot remove instruction with id {id:?}: not in list"))?;
		let Slot { prev, next, .. } = self.slots[id.index()];

		match prev {
			Some(prev) => self.slots[prev.index()].next = next,
			None => self.head = next,
		}
		match next {
			Some(next) => self.slots[next.index()].prev = prev,
			None => self.tail = prev,
		}
		self.len -= 1;

		let Node { mut labels, instruction } = node;
		if !labels.is_empty() {
			let target = match next {
				Some(next) => &mut self.node_mut(next)?.labels,
				None => &mut self.end_labels,
			};
			labels.append(target);
			*target = labels;
		}

		Ok(instruction)
	}

	pub fn prev(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).and_then(|slot| slot.prev)
	}

	pub fn next(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).and_then(|slot| slot.next)
	}

	pub fn first(&self) -> Option<NodeId> {
		self.head
	}

	pub fn last(&self) -> Option<NodeId> {
		self.tail
	}

	/// Iterates the instructions in order.
	pub fn iter(&self) -> Iter<'_> {
		Iter { list: self, current: self.head }
	}

	/// A snapshot of the ids of all instructions, in order.
	pub fn ids(&self) -> Vec<NodeId> {
		self.iter().map(|(id, _)| id).collect()
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

/// Compares the sequence of instructions and their labels, not how they are stored.
impl PartialEq for InstructionList {
	fn eq(&self, other: &Self) -> bool {
		self.len == other.len &&
			self.end_labels == other.end_labels &&
			self.iter().zip(other.iter())
				.all(|((a, x), (b, y))| x == y && self.labels(a) == other.labels(b))
	}
}

pub struct Iter<'a> {
	list: &'a InstructionList,
	current: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
	type Item = (NodeId, &'a Instruction);

	fn next(&mut self) -> Option<Self::Item> {
		let id = self.current?;
		let slot = self.list.slot(id)?;
		self.current = slot.next;
		slot.node.as_ref().map(|node| (id, &node.instruction))
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::tree::method::code::{Instruction, LvIndex};
	use crate::tree::method::instruction_list::InstructionList;

	fn instructions(list: &InstructionList) -> Vec<Instruction> {
		list.iter().map(|(_, instruction)| instruction.clone()).collect()
	}

	#[test]
	fn push_and_walk() {
		let mut list = InstructionList::new();
		let a = list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
		let b = list.push_back(Instruction::Pop);
		let c = list.push_back(Instruction::Return);

		assert_eq!(list.len(), 3);
		assert_eq!(list.first(), Some(a));
		assert_eq!(list.last(), Some(c));
		assert_eq!(list.next(a), Some(b));
		assert_eq!(list.prev(c), Some(b));
		assert_eq!(list.prev(a), None);
		assert_eq!(list.ids(), vec![a, b, c]);
	}

	#[test]
	fn remove_relinks_and_rejects_stale_ids() -> Result<()> {
		let mut list = InstructionList::new();
		let a = list.push_back(Instruction::Nop);
		let b = list.push_back(Instruction::IConst0);
		let c = list.push_back(Instruction::Return);

		assert_eq!(list.remove(b)?, Instruction::IConst0);
		assert_eq!(list.next(a), Some(c));
		assert_eq!(list.prev(c), Some(a));
		assert_eq!(list.len(), 2);

		assert!(list.get(b).is_none());
		assert!(list.remove(b).is_err());
		assert!(list.set(b, Instruction::Nop).is_err());

		let d = list.push_back(Instruction::Nop);
		assert_ne!(d, b);

		list.remove(a)?;
		assert_eq!(list.first(), Some(c));
		list.remove(d)?;
		assert_eq!(list.last(), Some(c));
		assert_eq!(instructions(&list), vec![Instruction::Return]);
		Ok(())
	}

	#[test]
	fn labels_move_to_successor() -> Result<()> {
		let mut list = InstructionList::new();
		let l0 = list.new_label();
		let l1 = list.new_label();
		let l2 = list.new_label();

		let a = list.push_back(Instruction::ALoad(LvIndex { index: 0 }));
		let b = list.push_back(Instruction::Pop);
		let c = list.push_back(Instruction::Return);
		list.bind_label(l0, a)?;
		list.bind_label(l1, b)?;
		list.bind_label(l2, c)?;

		list.remove(a)?;
		assert_eq!(list.labels(b), Some(&[l0, l1][..]));

		list.remove(c)?;
		assert_eq!(list.end_labels(), &[l2]);
		Ok(())
	}

	#[test]
	fn set_keeps_position_and_labels() -> Result<()> {
		let mut list = InstructionList::new();
		let label = list.new_label();
		let a = list.push_back(Instruction::LConst0);
		let b = list.push_back(Instruction::LReturn);
		list.bind_label(label, a)?;

		let old = list.set(a, Instruction::LConst1)?;
		assert_eq!(old, Instruction::LConst0);
		assert_eq!(list.labels(a), Some(&[label][..]));
		assert_eq!(list.next(a), Some(b));
		assert_eq!(instructions(&list), vec![Instruction::LConst1, Instruction::LReturn]);
		Ok(())
	}

	#[test]
	fn label_binds_only_once() -> Result<()> {
		let mut list = InstructionList::new();
		let label = list.new_label();
		let a = list.push_back(Instruction::Return);
		list.bind_label(label, a)?;
		assert!(list.bind_end_label(label).is_err());
		assert!(list.bind_label(label, a).is_err());
		Ok(())
	}

	#[test]
	fn equality_ignores_storage() -> Result<()> {
		let mut a = InstructionList::new();
		let x = a.push_back(Instruction::Nop);
		a.push_back(Instruction::Return);
		a.remove(x)?;

		let mut b = InstructionList::new();
		b.push_back(Instruction::Return);

		assert_eq!(a, b);
		Ok(())
	}
}
