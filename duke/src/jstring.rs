//! Conversion between the modified UTF-8 of `CONSTANT_Utf8_info` entries and rust strings.
//!
//! See <https://docs.oracle.com/javase/specs/jvms/se22/html/jvms-4.html#jvms-4.4.7> for the string format.

use std::borrow::Cow;
use anyhow::{anyhow, Context, Result};
use java_string::{JavaStr, JavaString};

/// Takes in the bytes of a `CONSTANT_Utf8_info` entry, tries to read them into a [`JavaString`].
pub(crate) fn from_vec_to_string(vec: Vec<u8>) -> Result<JavaString> {
	JavaString::from_modified_utf8(vec)
		.with_context(|| anyhow!("invalid java utf8 contents"))
}

/// Takes in a string and gives the bytes of a `CONSTANT_Utf8_info` entry.
pub(crate) fn from_string_to_vec(string: &JavaStr) -> Cow<'_, [u8]> {
	string.to_modified_utf8()
}

/// Views a [`JavaStr`] as a rust [`str`], failing for unpaired surrogates.
///
/// Names and descriptors never contain them, only `CONSTANT_String_info` contents may.
pub(crate) fn as_str(string: &JavaStr) -> Result<&str> {
	string.as_str()
		.map_err(|_| anyhow!("string {string:?} contains unpaired surrogates, can't be used as a name or descriptor"))
}
