use std::fmt::{Display, Formatter};
use duke::tree::method::code::Instruction;
use log::{debug, info, warn};
use crate::config::MemberKey;

/// Something that happened while transforming a class.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	/// A class that some rule applies to was offered.
	TargetClass {
		class: String,
		obfuscated: bool,
	},
	/// The method a rule edits was found.
	TargetMethod {
		class: String,
		method: MemberKey,
	},
	/// The class doesn't have the method a rule edits.
	MethodMissing {
		class: String,
		method: MemberKey,
	},
	/// An instruction was rewritten.
	Edited {
		class: String,
		method: MemberKey,
		before: Instruction,
		after: Instruction,
	},
	/// The method doesn't contain any instruction the rule looks for.
	PatternMissing {
		class: String,
		method: MemberKey,
	},
	/// A matching instruction was left alone, as its surroundings have an unexpected shape.
	Mismatch {
		class: String,
		method: MemberKey,
		reason: String,
	},
	/// Transforming the class failed, it's returned unchanged.
	Failed {
		class: String,
		error: String,
	},
}

impl Display for Event {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Event::TargetClass { class, obfuscated: true } => write!(f, "found obfuscated target class {class}"),
			Event::TargetClass { class, obfuscated: false } => write!(f, "found target class {class}"),
			Event::TargetMethod { class, method } => write!(f, "found method {method} in {class}"),
			Event::MethodMissing { class, method } => write!(f, "no method {method} in {class}"),
			Event::Edited { class, method, before, after } => write!(f, "{class}.{method}: replaced {before:?} with {after:?}"),
			Event::PatternMissing { class, method } => write!(f, "{class}.{method}: nothing to rewrite"),
			Event::Mismatch { class, method, reason } => write!(f, "{class}.{method}: skipped a match: {reason}"),
			Event::Failed { class, error } => write!(f, "failed to transform {class}, leaving it unchanged: {error}"),
		}
	}
}

/// Receives the [`Event`]s of transforming classes.
pub trait Observer {
	fn notify(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> Observer for F {
	fn notify(&mut self, event: &Event) {
		self(event)
	}
}

/// Forwards events to the [`log`] facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
	fn notify(&mut self, event: &Event) {
		match event {
			Event::TargetClass { .. } | Event::TargetMethod { .. } | Event::Edited { .. } => info!("{event}"),
			Event::MethodMissing { .. } | Event::PatternMissing { .. } | Event::Mismatch { .. } => debug!("{event}"),
			Event::Failed { .. } => warn!("{event}"),
		}
	}
}
