use std::io::{Read, Seek, Write};
use anyhow::{anyhow, Context, Result};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};
use crate::transformer::Transformer;

/// Counts of what happened to the classes of a jar.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JarReport {
	pub classes: usize,
	pub patched: usize,
}

/// The names a class entry is offered to the transformer with: the binary name from the path, and the logical name
/// from [`Config::class_names`](crate::config::Config::class_names) (or the same name if there's none).
pub fn class_names(transformer: &Transformer, path: &str) -> Option<(String, String)> {
	let internal = path.strip_suffix(".class")?;
	let name = internal.replace('/', ".");
	let transformed_name = transformer.config().class_names.get(internal)
		.cloned()
		.unwrap_or_else(|| name.clone());
	Some((name, transformed_name))
}

/// Copies a jar, offering every class in it to the transformer.
///
/// Entries that stay the same are copied without recompressing them.
pub fn patch_jar<W: Write + Seek>(transformer: &Transformer, reader: impl Read + Seek, writer: W) -> Result<(W, JarReport)> {
	let mut zip = ZipArchive::new(reader).context("failed to open jar")?;
	let mut zip_out = ZipWriter::new(writer);
	let mut report = JarReport::default();

	for index in 0..zip.len() {
		let mut file = zip.by_index(index)?;
		let path = file.name().to_owned();

		let names = if file.is_dir() { None } else { class_names(transformer, &path) };
		let Some((name, transformed_name)) = names else {
			zip_out.raw_copy_file(file)
				.with_context(|| anyhow!("failed to copy jar entry {path:?}"))?;
			continue;
		};

		let mut bytes = Vec::new();
		file.read_to_end(&mut bytes)
			.with_context(|| anyhow!("failed to read jar entry {path:?}"))?;
		let compression = file.compression();
		drop(file);

		report.classes += 1;
		let patched = transformer.transform(&name, &transformed_name, bytes.clone());

		if patched == bytes {
			zip_out.raw_copy_file(zip.by_index(index)?)
				.with_context(|| anyhow!("failed to copy jar entry {path:?}"))?;
		} else {
			report.patched += 1;
			zip_out.start_file(path.as_str(), FileOptions::<()>::default().compression_method(compression))
				.with_context(|| anyhow!("failed to write jar entry {path:?}"))?;
			zip_out.write_all(&patched)?;
		}
	}

	let writer = zip_out.finish().context("failed to finish jar")?;
	Ok((writer, report))
}
