use duke::tree::method::code::{Instruction, InvokeKind, Loadable};
use duke::tree::method::instruction_list::{InstructionList, NodeId};

/// A predicate over single instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
	/// A constant load of exactly this value. The category must match too, `Long(50)` isn't `Integer(50)`.
	Constant(Loadable),
	/// An invocation with this dispatch kind and callee name, and if given, callee descriptor.
	Invoke {
		kind: InvokeKind,
		name: String,
		descriptor: Option<String>,
	},
}

impl Pattern {
	pub fn matches(&self, instruction: &Instruction) -> bool {
		match (self, instruction) {
			(Pattern::Constant(expected), Instruction::Ldc(actual)) => expected == actual,
			(Pattern::Invoke { kind, name, descriptor }, Instruction::Invoke(invoke)) => {
				invoke.kind == *kind &&
					invoke.method.name == *name &&
					descriptor.as_ref().map_or(true, |descriptor| invoke.method.desc == *descriptor)
			},
			_ => false,
		}
	}
}

/// Returns the ids of all instructions matching the pattern, in order.
pub fn find_all(list: &InstructionList, pattern: &Pattern) -> Vec<NodeId> {
	list.iter()
		.filter(|(_, instruction)| pattern.matches(instruction))
		.map(|(id, _)| id)
		.collect()
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use duke::tree::field::FieldRef;
	use duke::tree::method::code::{Instruction, Invoke, InvokeKind, Loadable, LvIndex};
	use duke::tree::method::instruction_list::InstructionList;
	use duke::tree::method::MethodRef;
	use crate::matcher::{find_all, Pattern};

	fn update(kind: InvokeKind, name: &str, desc: &str) -> Instruction {
		Instruction::Invoke(Invoke::new(kind, MethodRef::new("a/Game", name, desc)))
	}

	#[test]
	fn constants_match_value_and_category() {
		let pattern = Pattern::Constant(Loadable::Long(50));
		assert!(pattern.matches(&Instruction::Ldc(Loadable::Long(50))));
		assert!(!pattern.matches(&Instruction::Ldc(Loadable::Long(51))));
		assert!(!pattern.matches(&Instruction::Ldc(Loadable::Integer(50))));
		assert!(!pattern.matches(&Instruction::Ldc(Loadable::Double(50.0))));
		assert!(!pattern.matches(&Instruction::BiPush(50)));
		assert!(!pattern.matches(&Instruction::GetStatic(FieldRef::new("a/B", "c", "J"))));
	}

	#[test]
	fn invokes_match_kind_name_and_descriptor() {
		let pattern = Pattern::Invoke { kind: InvokeKind::Virtual, name: "h".to_owned(), descriptor: Some("()V".to_owned()) };
		assert!(pattern.matches(&update(InvokeKind::Virtual, "h", "()V")));
		assert!(!pattern.matches(&update(InvokeKind::Static, "h", "()V")));
		assert!(!pattern.matches(&update(InvokeKind::Virtual, "h", "(I)V")));
		assert!(!pattern.matches(&update(InvokeKind::Virtual, "i", "()V")));

		let any_descriptor = Pattern::Invoke { kind: InvokeKind::Virtual, name: "h".to_owned(), descriptor: None };
		assert!(any_descriptor.matches(&update(InvokeKind::Virtual, "h", "(I)V")));
	}

	#[test]
	fn find_all_in_order() {
		let mut list = InstructionList::new();
		let first = list.push_back(Instruction::Ldc(Loadable::Long(50)));
		list.push_back(Instruction::LStore(LvIndex { index: 1 }));
		list.push_back(Instruction::Ldc(Loadable::Integer(50)));
		let second = list.push_back(Instruction::Ldc(Loadable::Long(50)));
		list.push_back(Instruction::Return);

		assert_eq!(find_all(&list, &Pattern::Constant(Loadable::Long(50))), vec![first, second]);
		assert_eq!(find_all(&list, &Pattern::Constant(Loadable::Long(20))), vec![]);
	}
}
