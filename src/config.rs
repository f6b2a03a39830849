use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use crate::mapping::SymbolTable;

/// A method, given by its canonical name and its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberKey {
	pub name: String,
	pub descriptor: String,
}

impl MemberKey {
	pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> MemberKey {
		MemberKey { name: name.into(), descriptor: descriptor.into() }
	}
}

impl Display for MemberKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.name, self.descriptor)
	}
}

/// The class whose static members the rewritten code uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeHelper {
	/// Internal name, like `com/microsoft/Malmo/Utils/TimeHelper`.
	pub class: String,
	/// A `static long` holding the tick length in milliseconds.
	pub tick_length_field: String,
	/// A `static void ()` deciding whether to forward the display update.
	pub display_update_method: String,
}

impl Default for TimeHelper {
	fn default() -> Self {
		TimeHelper {
			class: "com/microsoft/Malmo/Utils/TimeHelper".to_owned(),
			tick_length_field: "serverTickLength".to_owned(),
			display_update_method: "updateDisplay".to_owned(),
		}
	}
}

/// Everything the rewrites need to know about the host.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// The binary name (with dots) of the class running the server ticks.
	pub server_class: String,
	/// The binary name of the class running the client's game loop.
	pub client_class: String,

	/// The method of the server class containing the tick length literals.
	pub tick_method: MemberKey,
	/// The tick length literal (a `long`) replaced by the helper field.
	pub tick_length: i64,

	/// The method of the client class calling the display update.
	pub game_loop_method: MemberKey,
	/// The canonical name of the instance method updating the display.
	pub display_update_method: String,

	pub time_helper: TimeHelper,
	pub symbols: SymbolTable,

	/// Extra `class -> super class` entries (internal names), for merging types when recomputing frames.
	pub hierarchy: IndexMap<String, String>,
	/// Internal names of obfuscated classes to their logical binary names, used when patching whole jars.
	pub class_names: IndexMap<String, String>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			server_class: "net.minecraft.server.MinecraftServer".to_owned(),
			client_class: "net.minecraft.client.Minecraft".to_owned(),
			tick_method: MemberKey::new("run", "()V"),
			tick_length: 50,
			game_loop_method: MemberKey::new("runGameLoop", "()V"),
			display_update_method: "updateDisplay".to_owned(),
			time_helper: TimeHelper::default(),
			symbols: SymbolTable::default(),
			hierarchy: IndexMap::new(),
			class_names: IndexMap::new(),
		}
	}
}

impl Config {
	pub fn from_path(path: impl AsRef<Path>) -> Result<Config> {
		let path = path.as_ref();
		let file = File::open(path)
			.with_context(|| anyhow!("failed to open config file {path:?}"))?;
		serde_json::from_reader(BufReader::new(file))
			.with_context(|| anyhow!("failed to parse config file {path:?}"))
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::config::{Config, MemberKey};

	#[test]
	fn empty_is_default() -> Result<()> {
		let config: Config = serde_json::from_str("{}")?;
		assert_eq!(config, Config::default());
		assert_eq!(config.tick_method, MemberKey::new("run", "()V"));
		assert_eq!(config.time_helper.class, "com/microsoft/Malmo/Utils/TimeHelper");
		Ok(())
	}

	#[test]
	fn partial_overrides() -> Result<()> {
		let config: Config = serde_json::from_str(r#"{
			"tick_length": 25,
			"time_helper": { "class": "a/Helper" },
			"symbols": { "runGameLoop": "az" },
			"hierarchy": { "a/Screen": "a/Gui" }
		}"#)?;
		assert_eq!(config.tick_length, 25);
		assert_eq!(config.time_helper.class, "a/Helper");
		assert_eq!(config.time_helper.tick_length_field, "serverTickLength");
		assert_eq!(config.symbols.resolve("runGameLoop", true), "az");
		// replaced, not merged
		assert_eq!(config.symbols.resolve("updateDisplay", true), "updateDisplay");
		assert_eq!(config.hierarchy.get("a/Screen").map(String::as_str), Some("a/Gui"));
		Ok(())
	}

	#[test]
	fn unknown_member_key_shape_is_an_error() {
		assert!(serde_json::from_str::<Config>(r#"{ "tick_method": "run" }"#).is_err());
	}

	#[test]
	fn member_key_display() {
		assert_eq!(MemberKey::new("run", "()V").to_string(), "run()V");
	}
}
