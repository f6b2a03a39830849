use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Maps canonical member names of the host to the names they have in an obfuscated build.
///
/// Names without an entry are the same in both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolTable {
	names: IndexMap<String, String>,
}

impl SymbolTable {
	pub fn new() -> SymbolTable {
		SymbolTable { names: IndexMap::new() }
	}

	pub fn insert(&mut self, canonical: impl Into<String>, obfuscated: impl Into<String>) {
		self.names.insert(canonical.into(), obfuscated.into());
	}

	/// The name to look for in a class that is obfuscated or not.
	pub fn resolve<'a>(&'a self, canonical: &'a str, obfuscated: bool) -> &'a str {
		if obfuscated {
			self.names.get(canonical).map_or(canonical, String::as_str)
		} else {
			canonical
		}
	}
}

impl Default for SymbolTable {
	fn default() -> Self {
		let mut table = SymbolTable::new();
		table.insert("runGameLoop", "as");
		table.insert("updateDisplay", "h");
		table
	}
}
