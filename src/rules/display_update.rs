use duke::tree::method::code::InvokeKind;
use crate::config::{Config, MemberKey};
use crate::matcher::Pattern;
use crate::rules::{Edit, RewriteSpec};

/// Turns the client's `this.updateDisplay()` in the game loop into a static call of the helper's method.
///
/// The helper's method is always called by its canonical name, only the call site it replaces is obfuscated.
pub fn display_update(config: &Config, obfuscated: bool) -> RewriteSpec {
	let method = &config.game_loop_method;
	let helper = &config.time_helper;
	RewriteSpec {
		method: MemberKey::new(config.symbols.resolve(&method.name, obfuscated), method.descriptor.as_str()),
		pattern: Pattern::Invoke {
			kind: InvokeKind::Virtual,
			name: config.symbols.resolve(&config.display_update_method, obfuscated).to_owned(),
			descriptor: Some("()V".to_owned()),
		},
		edit: Edit::Redirect {
			owner: helper.class.clone(),
			name: helper.display_update_method.clone(),
			kind: InvokeKind::Static,
			drop_receiver: true,
		},
	}
}
