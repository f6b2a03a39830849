use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use overclock::archive::patch_jar;
use overclock::{Config, Transformer};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
	/// Be verbose.
	#[arg(short = 'v', long = "verbose")]
	verbose: bool,

	/// A JSON config file, everything not in it has the default value.
	#[arg(short = 'c', long = "config")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Patches a single class file
	Class {
		input: PathBuf,
		output: PathBuf,
		/// The binary name of the class, like `bsu`.
		#[arg(long = "name")]
		name: String,
		/// The logical binary name of the class, like `net.minecraft.client.Minecraft`. Defaults to `--name`.
		#[arg(long = "transformed-name")]
		transformed_name: Option<String>,
	},
	/// Patches every class in a jar, copying everything else
	Jar {
		input: PathBuf,
		output: PathBuf,
	},
}

fn setup_logger(verbose: bool) -> Result<()> {
	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!("[{} {}] {}", record.level(), record.target(), message))
		})
		.level(if verbose { LevelFilter::Debug } else { LevelFilter::Info })
		.chain(std::io::stderr())
		.apply()
		.context("failed to set up logging")
}

fn patch_class(transformer: &Transformer, input: &Path, output: &Path, name: &str, transformed_name: &str) -> Result<()> {
	let bytes = std::fs::read(input)
		.with_context(|| anyhow!("failed to read class file {input:?}"))?;
	let patched = transformer.transform(name, transformed_name, bytes);
	std::fs::write(output, patched)
		.with_context(|| anyhow!("failed to write class file {output:?}"))
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_logger(cli.verbose)?;

	let config = match &cli.config {
		Some(path) => Config::from_path(path)?,
		None => Config::default(),
	};
	let transformer = Transformer::new(config);

	match cli.command {
		Command::Class { input, output, name, transformed_name } => {
			let transformed_name = transformed_name.as_deref().unwrap_or(&name);
			patch_class(&transformer, &input, &output, &name, transformed_name)?;
		},
		Command::Jar { input, output } => {
			let reader = File::open(&input)
				.with_context(|| anyhow!("failed to open jar {input:?}"))?;
			let writer = File::create(&output)
				.with_context(|| anyhow!("failed to create jar {output:?}"))?;

			let (writer, report) = patch_jar(&transformer, BufReader::new(reader), BufWriter::new(writer))
				.with_context(|| anyhow!("failed to patch jar {input:?}"))?;
			writer.into_inner()
				.map_err(|error| error.into_error())
				.and_then(|mut file| file.flush())
				.with_context(|| anyhow!("failed to write jar {output:?}"))?;

			info!("patched {} of {} classes", report.patched, report.classes);
		},
	}

	Ok(())
}
