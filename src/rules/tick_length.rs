use duke::tree::field::FieldRef;
use duke::tree::method::code::{Instruction, Loadable};
use crate::config::{Config, MemberKey};
use crate::matcher::Pattern;
use crate::rules::{Edit, RewriteSpec};

/// Replaces every `ldc2_w <tick length>L` in the server's tick method with a read of the helper's tick length field.
///
/// Both push a `long`, so the stack stays the same.
pub fn tick_length(config: &Config, obfuscated: bool) -> RewriteSpec {
	let method = &config.tick_method;
	let helper = &config.time_helper;
	RewriteSpec {
		method: MemberKey::new(config.symbols.resolve(&method.name, obfuscated), method.descriptor.as_str()),
		pattern: Pattern::Constant(Loadable::Long(config.tick_length)),
		edit: Edit::Replace(Instruction::GetStatic(FieldRef::new(helper.class.as_str(), helper.tick_length_field.as_str(), "J"))),
	}
}
