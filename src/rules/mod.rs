//! Declarative descriptions of the edits done to the host's classes.

mod display_update;
mod tick_length;

pub use display_update::display_update;
pub use tick_length::tick_length;

use anyhow::{anyhow, Context, Result};
use duke::tree::class::ClassFile;
use duke::tree::method::code::{Instruction, Invoke, InvokeKind, LvIndex};
use duke::tree::method::instruction_list::{InstructionList, NodeId};
use duke::tree::method::MethodRef;
use crate::config::MemberKey;
use crate::matcher::{find_all, Pattern};
use crate::observer::{Event, Observer};

/// What to do with a matched instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
	/// Put this instruction in the place of the matched one.
	Replace(Instruction),
	/// Make the matched invocation call `owner.name` with the same descriptor instead.
	Redirect {
		owner: String,
		name: String,
		kind: InvokeKind,
		/// Also remove the `aload_0` pushing the receiver of the original call.
		drop_receiver: bool,
	},
}

/// One edit, applied to every instruction matching `pattern` in the method `method`.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteSpec {
	/// The method to edit, with the name as it appears in the class.
	pub method: MemberKey,
	pub pattern: Pattern,
	pub edit: Edit,
}

impl RewriteSpec {
	/// Edits the class in place, returning the number of edited instructions.
	///
	/// A missing method or pattern isn't an error, it just results in zero edits.
	pub fn apply(&self, class: &mut ClassFile, observer: &mut dyn Observer) -> Result<usize> {
		let class_name = class.name.clone();
		let mut edits = 0;
		let mut found = false;

		for method in class.methods.iter_mut()
			.filter(|method| method.name == self.method.name && method.descriptor == self.method.descriptor)
		{
			found = true;
			observer.notify(&Event::TargetMethod { class: class_name.clone(), method: self.method.clone() });

			let is_static = method.is_static();
			let Some(code) = method.code.as_mut() else {
				observer.notify(&Event::PatternMissing { class: class_name.clone(), method: self.method.clone() });
				continue;
			};

			let matches = find_all(code.instructions(), &self.pattern);
			if matches.is_empty() {
				observer.notify(&Event::PatternMissing { class: class_name.clone(), method: self.method.clone() });
				continue;
			}

			let list = code.instructions_mut();
			for id in matches {
				let edited = self.edit_at(list, id, is_static)
					.with_context(|| anyhow!("failed to edit {class_name}.{}", self.method))?;
				match edited {
					Ok((before, after)) => {
						edits += 1;
						observer.notify(&Event::Edited {
							class: class_name.clone(),
							method: self.method.clone(),
							before,
							after,
						});
					},
					Err(reason) => observer.notify(&Event::Mismatch {
						class: class_name.clone(),
						method: self.method.clone(),
						reason,
					}),
				}
			}
		}

		if !found {
			observer.notify(&Event::MethodMissing { class: class_name, method: self.method.clone() });
		}

		Ok(edits)
	}

	/// Returns the instruction before and after the edit, or why this match was skipped.
	///
	/// A skipped match leaves the list unchanged.
	fn edit_at(&self, list: &mut InstructionList, id: NodeId, is_static: bool) -> Result<Result<(Instruction, Instruction), String>> {
		match &self.edit {
			Edit::Replace(replacement) => {
				let before = list.set(id, replacement.clone())?;
				Ok(Ok((before, replacement.clone())))
			},
			Edit::Redirect { owner, name, kind, drop_receiver } => {
				let Some(Instruction::Invoke(invoke)) = list.get(id) else {
					return Ok(Err("matched instruction isn't an invocation".to_owned()));
				};
				let descriptor = invoke.method.desc.clone();

				let receiver = if *drop_receiver {
					if is_static {
						return Ok(Err("no receiver to remove in a static method".to_owned()));
					}
					match list.prev(id) {
						Some(prev) if list.get(prev) == Some(&Instruction::ALoad(LvIndex { index: 0 })) => Some(prev),
						Some(prev) => return Ok(Err(format!("expected aload_0 before the call, got {:?}", list.get(prev)))),
						None => return Ok(Err("the call is the first instruction".to_owned())),
					}
				} else {
					None
				};

				let after = Instruction::Invoke(Invoke::new(*kind, MethodRef::new(owner.as_str(), name.as_str(), descriptor)));
				let before = list.set(id, after.clone())?;
				if let Some(receiver) = receiver {
					list.remove(receiver)?;
				}
				Ok(Ok((before, after)))
			},
		}
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use duke::class_constants::access;
	use duke::tree::class::ClassFile;
	use duke::tree::field::FieldRef;
	use duke::tree::method::code::{Code, Instruction, Invoke, InvokeKind, Loadable, LvIndex};
	use duke::tree::method::instruction_list::InstructionList;
	use duke::tree::method::{Method, MethodRef};
	use duke::tree::version::Version;
	use crate::config::MemberKey;
	use crate::matcher::Pattern;
	use crate::observer::Event;
	use crate::rules::{Edit, RewriteSpec};

	fn class_with(access: u16, instructions: Vec<Instruction>) -> ClassFile {
		let mut list = InstructionList::new();
		for instruction in instructions {
			list.push_back(instruction);
		}
		let mut method = Method::new(access, "loop", "()V");
		method.code = Some(Code::new(list));
		let mut class = ClassFile::new(Version::V1_8, access::PUBLIC, "a/Game", Some("java/lang/Object".to_owned()));
		class.methods.push(method);
		class
	}

	fn instructions(class: &ClassFile) -> Vec<Instruction> {
		class.method("loop", "()V")
			.and_then(|method| method.code.as_ref())
			.map(|code| code.instructions().iter().map(|(_, instruction)| instruction.clone()).collect())
			.unwrap_or_default()
	}

	fn call(kind: InvokeKind, owner: &str, name: &str) -> Instruction {
		Instruction::Invoke(Invoke::new(kind, MethodRef::new(owner, name, "()V")))
	}

	fn redirect() -> RewriteSpec {
		RewriteSpec {
			method: MemberKey::new("loop", "()V"),
			pattern: Pattern::Invoke { kind: InvokeKind::Virtual, name: "draw".to_owned(), descriptor: Some("()V".to_owned()) },
			edit: Edit::Redirect { owner: "a/Helper".to_owned(), name: "draw".to_owned(), kind: InvokeKind::Static, drop_receiver: true },
		}
	}

	#[test]
	fn replace_every_match() -> Result<()> {
		let mut class = class_with(access::PUBLIC, vec![
			Instruction::Ldc(Loadable::Long(7)),
			Instruction::Pop2,
			Instruction::Ldc(Loadable::Long(7)),
			Instruction::Pop2,
			Instruction::Return,
		]);
		let field = Instruction::GetStatic(FieldRef::new("a/Helper", "seven", "J"));
		let rule = RewriteSpec {
			method: MemberKey::new("loop", "()V"),
			pattern: Pattern::Constant(Loadable::Long(7)),
			edit: Edit::Replace(field.clone()),
		};

		let mut events = Vec::new();
		let edits = rule.apply(&mut class, &mut |event: &Event| events.push(event.clone()))?;

		assert_eq!(edits, 2);
		assert_eq!(instructions(&class), vec![field.clone(), Instruction::Pop2, field, Instruction::Pop2, Instruction::Return]);
		assert_eq!(events.iter().filter(|event| matches!(event, Event::Edited { .. })).count(), 2);
		Ok(())
	}

	#[test]
	fn redirect_drops_the_receiver() -> Result<()> {
		let mut class = class_with(access::PUBLIC, vec![
			Instruction::ALoad(LvIndex { index: 0 }),
			call(InvokeKind::Virtual, "a/Game", "draw"),
			Instruction::Return,
		]);
		assert_eq!(redirect().apply(&mut class, &mut |_: &Event| {})?, 1);
		assert_eq!(instructions(&class), vec![call(InvokeKind::Static, "a/Helper", "draw"), Instruction::Return]);
		Ok(())
	}

	#[test]
	fn redirect_skips_other_receivers() -> Result<()> {
		let original = vec![
			Instruction::ALoad(LvIndex { index: 1 }),
			call(InvokeKind::Virtual, "a/Game", "draw"),
			Instruction::Return,
		];
		let mut class = class_with(access::PUBLIC, original.clone());

		let mut events = Vec::new();
		assert_eq!(redirect().apply(&mut class, &mut |event: &Event| events.push(event.clone()))?, 0);
		assert_eq!(instructions(&class), original);
		assert!(events.iter().any(|event| matches!(event, Event::Mismatch { .. })), "{events:?}");
		Ok(())
	}

	#[test]
	fn redirect_skips_static_methods() -> Result<()> {
		let original = vec![
			Instruction::ALoad(LvIndex { index: 0 }),
			call(InvokeKind::Virtual, "a/Game", "draw"),
			Instruction::Return,
		];
		let mut class = class_with(access::PUBLIC | access::STATIC, original.clone());
		assert_eq!(redirect().apply(&mut class, &mut |_: &Event| {})?, 0);
		assert_eq!(instructions(&class), original);
		Ok(())
	}

	#[test]
	fn missing_method_and_pattern() -> Result<()> {
		let mut class = class_with(access::PUBLIC, vec![Instruction::Return]);

		let mut events = Vec::new();
		assert_eq!(redirect().apply(&mut class, &mut |event: &Event| events.push(event.clone()))?, 0);
		assert_eq!(events, vec![
			Event::TargetMethod { class: "a/Game".to_owned(), method: MemberKey::new("loop", "()V") },
			Event::PatternMissing { class: "a/Game".to_owned(), method: MemberKey::new("loop", "()V") },
		]);
		assert_eq!(instructions(&class), vec![Instruction::Return]);

		let mut rule = redirect();
		rule.method = MemberKey::new("tick", "()V");
		events.clear();
		assert_eq!(rule.apply(&mut class, &mut |event: &Event| events.push(event.clone()))?, 0);
		assert_eq!(events, vec![
			Event::MethodMissing { class: "a/Game".to_owned(), method: MemberKey::new("tick", "()V") },
		]);
		Ok(())
	}
}
