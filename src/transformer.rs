use std::any::Any;
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use anyhow::{Context, Result};
use duke::analysis::hierarchy::KnownHierarchy;
use duke::WriteOptions;
use crate::config::Config;
use crate::observer::{Event, LogObserver, Observer};
use crate::rules::{display_update, tick_length, RewriteSpec};

/// The entry point for the class loading hook.
///
/// Holds no mutable state, so one instance can transform classes from many threads at once.
#[derive(Debug, Clone)]
pub struct Transformer {
	config: Config,
	hierarchy: KnownHierarchy,
}

impl Transformer {
	pub fn new(config: Config) -> Transformer {
		let mut hierarchy = KnownHierarchy::default();
		for (class, super_class) in &config.hierarchy {
			hierarchy.insert(class.as_str(), Some(super_class.clone()), false);
		}
		Transformer { config, hierarchy }
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Transforms a class, logging what happens.
	///
	/// `name` is the name the class has in the jar, `transformed_name` the logical name of it. They differ for
	/// obfuscated classes. Returns `bytes` unchanged if the class isn't a target, or if anything goes wrong.
	pub fn transform(&self, name: &str, transformed_name: &str, bytes: Vec<u8>) -> Vec<u8> {
		self.transform_observed(name, transformed_name, bytes, &mut LogObserver)
	}

	/// Like [`Transformer::transform`], but reports to the given observer.
	pub fn transform_observed(&self, name: &str, transformed_name: &str, bytes: Vec<u8>, observer: &mut dyn Observer) -> Vec<u8> {
		let obfuscated = name != transformed_name;
		let Some(rule) = self.rule_for(transformed_name, obfuscated) else {
			return bytes;
		};

		observer.notify(&Event::TargetClass { class: transformed_name.to_owned(), obfuscated });

		let result = catch_unwind(AssertUnwindSafe(|| self.rewrite(&bytes, &rule, observer)));
		let error = match result {
			Ok(Ok(Some(rewritten))) => return rewritten,
			Ok(Ok(None)) => return bytes,
			Ok(Err(error)) => format!("{error:#}"),
			Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
		};
		observer.notify(&Event::Failed { class: transformed_name.to_owned(), error });
		bytes
	}

	fn rule_for(&self, transformed_name: &str, obfuscated: bool) -> Option<RewriteSpec> {
		if transformed_name == self.config.server_class {
			Some(tick_length(&self.config, obfuscated))
		} else if transformed_name == self.config.client_class {
			Some(display_update(&self.config, obfuscated))
		} else {
			None
		}
	}

	/// Returns [`None`] if nothing was edited.
	fn rewrite(&self, bytes: &[u8], rule: &RewriteSpec, observer: &mut dyn Observer) -> Result<Option<Vec<u8>>> {
		let mut class = duke::read_class(&mut Cursor::new(bytes))
			.context("failed to read class")?;

		let edits = rule.apply(&mut class, observer)?;
		if edits == 0 {
			return Ok(None);
		}

		let mut rewritten = Vec::with_capacity(bytes.len() + 64);
		duke::write_class_with(&mut rewritten, &class, &WriteOptions::new(&self.hierarchy))?;
		Ok(Some(rewritten))
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	if let Some(message) = panic.downcast_ref::<&str>() {
		*message
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.as_str()
	} else {
		"unknown panic payload"
	}
}
