use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use isoview_core::session::{measure_tree, Extractor};
use isoview_core::{split_path, DirEntry, EntryKind, IsoImage, Record, SourceConfig, SuspEntry};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "isoview", version)]
#[command(about = "isoview - ISO 9660 / Rock Ridge image inspector")]
struct Cli {
	/// Log decoding details (RUST_LOG takes precedence)
	#[arg(short, long, global = true)]
	verbose: bool,
	/// Keep file content in the sector cache
	#[arg(long, global = true)]
	cache_content: bool,
	/// Minimum sectors fetched per metadata read
	#[arg(long, global = true, default_value_t = isoview_core::config::DEFAULT_MIN_FETCH)]
	min_fetch: u32,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Show volume descriptors and extension information
	Info {
		/// Path to image file
		image: String,
		#[arg(long)]
		json: bool,
	},
	/// List a directory
	Ls {
		image: String,
		/// Directory inside the image
		#[arg(default_value = "/")]
		path: String,
		/// Show type, mode, size and modification time
		#[arg(short, long)]
		long: bool,
		#[arg(long)]
		json: bool,
	},
	/// Print the directory tree
	Tree {
		image: String,
		#[arg(default_value = "/")]
		path: String,
	},
	/// Write a file's content to stdout
	Cat {
		image: String,
		path: String,
	},
	/// Dump the SUSP entries of a record
	Entries {
		image: String,
		path: String,
		#[arg(long)]
		json: bool,
	},
	/// Extract a file or directory tree
	Extract {
		image: String,
		#[arg(default_value = "/")]
		path: String,
		#[arg(long)]
		out: PathBuf,
		/// Do not apply Rock Ridge permission bits
		#[arg(long)]
		no_permissions: bool,
		/// Print the extraction report as JSON
		#[arg(long)]
		json: bool,
	},
}

#[derive(Serialize)]
struct EntryDump {
	signature: String,
	version: u8,
	extension: Option<String>,
	detail: String,
}

impl From<&SuspEntry> for EntryDump {
	fn from(entry: &SuspEntry) -> Self {
		let detail = match &entry.kind {
			EntryKind::Opaque(body) => format!("opaque ({} bytes)", body.len()),
			EntryKind::AlternateName(nm) => format!(
				"name {:?} flags {:#x}",
				String::from_utf8_lossy(&nm.name),
				nm.flags
			),
			EntryKind::SymbolicLink(sl) => format!(
				"link {:?} flags {:#x}",
				String::from_utf8_lossy(&sl.path),
				sl.flags
			),
			other => format!("{:?}", other),
		};
		Self {
			signature: entry.signature_str(),
			version: entry.version,
			extension: entry.extension.as_ref().map(ToString::to_string),
			detail,
		}
	}
}

fn open_image(location: &str, cli: &Cli) -> Result<IsoImage> {
	let config = SourceConfig::default()
		.with_cache_content(cli.cache_content)
		.with_min_fetch(cli.min_fetch);
	isoview_core::open(location, config).with_context(|| format!("failed to open {}", location))
}

fn lookup(image: &mut IsoImage, path: &str) -> Result<Record> {
	image
		.record(&split_path(path))
		.with_context(|| format!("cannot resolve {}", path))
}

fn format_entry(entry: &DirEntry, long: bool) -> String {
	let mut name = entry.name.clone();
	if entry.is_directory() {
		name.push('/');
	}
	if let Some(target) = &entry.symlink_target {
		name = format!("{} -> {}", name, target);
	}
	if !long {
		return name;
	}

	let mode = entry
		.mode
		.map(|m| format!("{:06o}", m))
		.unwrap_or_else(|| "------".to_string());
	let modified = entry
		.modified
		.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
		.unwrap_or_else(|| "-".repeat(16));
	format!(
		"{}{} {:>12} {} {}{}",
		entry.entry_type.tag(),
		mode,
		entry.size,
		modified,
		name,
		if entry.hidden { " (hidden)" } else { "" }
	)
}

fn print_tree(
	image: &mut IsoImage,
	directory: &Record,
	prefix: &str,
	visited: &mut HashSet<u32>,
) -> Result<()> {
	let children = image.children(directory)?;
	let count = children.len();

	for (i, child) in children.iter().enumerate() {
		let last = i + 1 == count;
		let entry = image.entry(child)?;
		let branch = if last { "└── " } else { "├── " };
		println!("{}{}{}", prefix, branch, format_entry(&entry, false));

		if entry.is_directory() {
			let nested = format!("{}{}", prefix, if last { "    " } else { "│   " });
			if visited.insert(child.location) {
				print_tree(image, child, &nested, visited)?;
			} else {
				println!("{}(directory loop)", nested);
			}
		}
	}
	Ok(())
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	// Initialize tracing; RUST_LOG overrides the default level
	let level = if cli.verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.init();

	match &cli.command {
		Commands::Info { image, json } => {
			let iso = open_image(image, &cli)?;
			let summary = iso.summary();

			if *json {
				println!("{}", serde_json::to_string_pretty(&summary)?);
			} else {
				println!("📀 Volume: {}", summary.volume_id);
				println!("🖥️  System: {}", summary.system_id);
				if !summary.publisher_id.is_empty() {
					println!("🏢 Publisher: {}", summary.publisher_id);
				}
				if !summary.application_id.is_empty() {
					println!("🧰 Application: {}", summary.application_id);
				}
				println!(
					"💾 Size: {} blocks of {} bytes",
					summary.volume_space_size, summary.logical_block_size
				);
				if let Some(created) = summary.created {
					println!("📅 Created: {}", created);
				}
				println!("📋 Descriptors: {}", summary.descriptors.join(", "));
				println!("📁 Path table directories: {}", summary.path_table_directories);
				println!("🔤 Joliet: {}", if summary.joliet { "yes" } else { "no" });
				if summary.susp_active {
					println!("🧩 SUSP extensions: {}", summary.extensions.join(", "));
				} else {
					println!("🧩 SUSP: not in use");
				}
				match &summary.rock_ridge {
					Some(identity) => println!("🪨 Rock Ridge: {}", identity),
					None => println!("🪨 Rock Ridge: no"),
				}
			}
			iso.close()?;
		}
		Commands::Ls { image, path, long, json } => {
			let mut iso = open_image(image, &cli)?;
			let directory = lookup(&mut iso, path)?;
			let entries = iso.list(&directory)?;

			if *json {
				println!("{}", serde_json::to_string_pretty(&entries)?);
			} else {
				for entry in &entries {
					println!("{}", format_entry(entry, *long));
				}
			}
		}
		Commands::Tree { image, path } => {
			let mut iso = open_image(image, &cli)?;
			let directory = lookup(&mut iso, path)?;
			println!("{}", path);
			let mut visited = HashSet::from([directory.location]);
			print_tree(&mut iso, &directory, "", &mut visited)?;
		}
		Commands::Cat { image, path } => {
			let mut iso = open_image(image, &cli)?;
			let record = lookup(&mut iso, path)?;
			let mut stream = iso.open_stream(&record)?;
			let stdout = io::stdout();
			let mut out = stdout.lock();
			io::copy(&mut stream, &mut out)?;
			out.flush()?;
		}
		Commands::Entries { image, path, json } => {
			let mut iso = open_image(image, &cli)?;
			let record = lookup(&mut iso, path)?;
			let dump: Vec<EntryDump> = iso
				.system_use_entries(&record)?
				.iter()
				.map(EntryDump::from)
				.collect();

			if *json {
				println!("{}", serde_json::to_string_pretty(&dump)?);
			} else if dump.is_empty() {
				println!("No system use entries");
			} else {
				for entry in &dump {
					let extension = entry.extension.as_deref().unwrap_or("core");
					println!(
						"{} v{} [{}] {}",
						entry.signature, entry.version, extension, entry.detail
					);
				}
			}
		}
		Commands::Extract { image, path, out, no_permissions, json } => {
			let mut iso = open_image(image, &cli)?;
			let record = lookup(&mut iso, path)?;

			let total_bytes = if record.is_directory {
				measure_tree(&mut iso, &record)?.bytes
			} else {
				u64::from(record.length)
			};

			let show_progress = !*json && atty::is(atty::Stream::Stderr);
			let bar = ProgressBar::new(total_bytes);
			if show_progress {
				let template = "{spinner} [{bar:40}] {bytes}/{total_bytes} {msg}";
				bar.set_style(ProgressStyle::with_template(template)?.progress_chars("=> "));
			} else {
				bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
			}

			let mut extractor = Extractor::new(&mut iso).with_permissions(!*no_permissions);
			let progress = bar.clone();
			extractor.set_progress_callback(move |p| {
				progress.set_position(p.bytes_done);
				progress.set_message(p.current.clone());
			});
			let report = extractor.run(&record, out)?;
			bar.finish_and_clear();

			if *json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				println!("✅ Extraction complete!");
				println!("📁 Output: {}", out.display());
				println!("📄 Files: {}", report.files);
				println!("📂 Directories: {}", report.directories);
				println!("🔗 Symlinks: {}", report.symlinks);
				println!("💾 Bytes: {}", report.total_bytes);
				if report.failed > 0 || report.skipped > 0 {
					println!("⚠️  Failed: {}, skipped: {}", report.failed, report.skipped);
				}
			}
		}
	}
	Ok(())
}
