use anyhow::{Context, Result};
use asar_core::{
    Archive, CrawlOptions, CreateOptions, DEFAULT_BLOCK_SIZE, IntegrityConfig, create_archive,
    extract_all,
};
use clap::{Parser, Subcommand};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod output;

use output::{
    EntryInfo, ExtractFileOutput, ExtractOutput, ExtractedCounts, FailureInfo, HeaderOutput,
    ListOutput, OutputWriter, PackOutput,
};

/// Result code for entries that failed during `extract`.
const PARTIAL_EXTRACTION: u8 = 2;

/// Asar - single-file archives with an unpacked sidecar
#[derive(Parser)]
#[command(name = "asar")]
#[command(about = "Create, inspect and extract asar archives", long_about = None)]
#[command(version)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug events to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into an archive
    Pack {
        /// Directory to pack
        src: PathBuf,

        /// Archive to write
        dest: PathBuf,

        /// Unpack files whose containing directory matches this regex
        #[arg(long, value_name = "REGEX")]
        unpack: Option<String>,

        /// Mark directories matching this regex force-unpack
        #[arg(long, value_name = "REGEX")]
        unpack_dir: Option<String>,

        /// Skip paths excluded by .gitignore / .ignore files
        #[arg(long)]
        respect_ignore_files: bool,

        /// Integrity block size in bytes
        #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,
    },

    /// List archive contents
    List {
        /// Archive to read
        archive: PathBuf,

        /// Show pack state, kind and size
        #[arg(short, long)]
        long: bool,
    },

    /// Extract every entry of an archive
    Extract {
        /// Archive to read
        archive: PathBuf,

        /// Destination directory
        dest: PathBuf,
    },

    /// Write one file's contents to stdout
    ExtractFile {
        /// Archive to read
        archive: PathBuf,

        /// Path inside the archive
        path: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the header JSON
    Header {
        /// Archive to read
        archive: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);
    let result = match cli.command {
        Commands::Pack {
            src,
            dest,
            unpack,
            unpack_dir,
            respect_ignore_files,
            block_size,
        } => {
            let options = PackOptions {
                unpack,
                unpack_dir,
                respect_ignore_files,
                block_size,
            };
            cmd_pack(&output, &src, &dest, options)
        }
        Commands::List { archive, long } => cmd_list(&output, &archive, long),
        Commands::Extract { archive, dest } => cmd_extract(&output, &archive, &dest),
        Commands::ExtractFile {
            archive,
            path,
            output: file,
        } => cmd_extract_file(&output, &archive, &path, file.as_deref()),
        Commands::Header { archive } => cmd_header(&output, &archive),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

struct PackOptions {
    unpack: Option<String>,
    unpack_dir: Option<String>,
    respect_ignore_files: bool,
    block_size: u32,
}

fn cmd_pack(output: &OutputWriter, src: &Path, dest: &Path, pack: PackOptions) -> Result<u8> {
    if pack.block_size == 0 {
        anyhow::bail!("Block size must be greater than zero");
    }

    let mut options = CreateOptions {
        integrity: IntegrityConfig {
            block_size: pack.block_size,
        },
        crawl: CrawlOptions {
            respect_ignore_files: pack.respect_ignore_files,
        },
        ..CreateOptions::default()
    };
    if let Some(pattern) = &pack.unpack {
        let re = Regex::new(pattern).with_context(|| format!("Invalid --unpack: {}", pattern))?;
        options = options.with_unpack(move |dir| re.is_match(dir));
    }
    if let Some(pattern) = &pack.unpack_dir {
        let re =
            Regex::new(pattern).with_context(|| format!("Invalid --unpack-dir: {}", pattern))?;
        options = options.with_unpack_dir(move |dir| re.is_match(dir));
    }

    let stats = create_archive(src, dest, options).with_context(|| {
        format!(
            "Failed to pack {} into {}",
            src.display(),
            dest.display()
        )
    })?;

    let data = PackOutput::new(
        src.display().to_string(),
        dest.display().to_string(),
        &stats,
    );
    output.write(&data, || {
        format!(
            "Packed {} into {}\nFiles: {} packed, {} unpacked\nBlob: {} bytes, header: {} bytes\n",
            src.display(),
            dest.display(),
            stats.files_packed,
            stats.files_unpacked,
            stats.blob_size,
            stats.header_size
        )
    })?;

    Ok(0)
}

fn open_archive(path: &Path) -> Result<Archive> {
    Archive::open(path).with_context(|| format!("Failed to open archive {}", path.display()))
}

fn cmd_list(output: &OutputWriter, archive_path: &Path, long: bool) -> Result<u8> {
    let archive = open_archive(archive_path)?;

    let entries: Vec<EntryInfo> = archive
        .list_entries()
        .map(|(path, node)| EntryInfo::new(path, node))
        .collect();

    let data = ListOutput {
        success: true,
        result_code: 0,
        archive: archive_path.display().to_string(),
        entries,
    };
    output.write(&data, || {
        let mut text = String::new();
        for entry in &data.entries {
            if long {
                text.push_str(&entry.long_line());
            } else {
                text.push_str(&entry.path);
            }
            text.push('\n');
        }
        text
    })?;

    Ok(0)
}

fn cmd_extract(output: &OutputWriter, archive_path: &Path, dest: &Path) -> Result<u8> {
    let archive = open_archive(archive_path)?;

    let (extracted, failures): (Option<ExtractedCounts>, Vec<FailureInfo>) =
        match extract_all(&archive, dest) {
            Ok(report) => (Some(report.into()), Vec::new()),
            Err(error) => (None, error.iter().map(FailureInfo::from).collect()),
        };
    let result_code = if failures.is_empty() {
        0
    } else {
        PARTIAL_EXTRACTION
    };

    let data = ExtractOutput {
        success: failures.is_empty(),
        result_code,
        archive: archive_path.display().to_string(),
        destination: dest.display().to_string(),
        extracted,
        failures,
    };
    output.write(&data, || match &data.extracted {
        Some(counts) => format!(
            "Extracted {} to {}\n{} directories, {} files, {} links\n",
            archive_path.display(),
            dest.display(),
            counts.directories,
            counts.files,
            counts.links
        ),
        None => {
            let mut text = format!(
                "Unable to extract {} entries of {}:\n",
                data.failures.len(),
                archive_path.display()
            );
            for failure in &data.failures {
                text.push_str(&format!("  {}: {}\n", failure.path, failure.error));
            }
            text
        }
    })?;

    Ok(result_code)
}

fn cmd_extract_file(
    output: &OutputWriter,
    archive_path: &Path,
    path: &str,
    file: Option<&Path>,
) -> Result<u8> {
    let archive = open_archive(archive_path)?;
    let data = archive
        .read_file(path)
        .with_context(|| format!("Failed to read {} from {}", path, archive_path.display()))?;

    let Some(file) = file else {
        if output.is_json() {
            anyhow::bail!("--json requires --output for extract-file");
        }
        output.write_raw(&data)?;
        return Ok(0);
    };

    std::fs::write(file, &data).with_context(|| format!("Failed to write {}", file.display()))?;

    let result = ExtractFileOutput {
        success: true,
        result_code: 0,
        path: path.to_string(),
        size: data.len() as u64,
        output: file.display().to_string(),
    };
    output.write(&result, || {
        format!("Wrote {} ({} bytes) to {}\n", path, data.len(), file.display())
    })?;

    Ok(0)
}

fn cmd_header(output: &OutputWriter, archive_path: &Path) -> Result<u8> {
    let archive = open_archive(archive_path)?;

    let data = HeaderOutput {
        success: true,
        result_code: 0,
        archive: archive_path.display().to_string(),
        header_size: archive.header_size(),
        header: serde_json::to_value(archive.root()).context("Failed to encode header")?,
    };
    let pretty = archive.header_json().context("Failed to encode header")?;
    output.write(&data, || {
        format!("Header size: {} bytes\n{}\n", archive.header_size(), pretty)
    })?;

    Ok(0)
}
