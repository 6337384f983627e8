//! CLI subcommands.
//!
//! Each module exposes an args struct and a `run` function; this module
//! holds the clap definition and dispatches to them.

mod archive;
mod common;
mod create;
mod elements;
mod info;
mod integrity;
mod lock;
mod merge;

use std::path::PathBuf;

use clap::Subcommand;
use mediabundle::{BundleConfig, Flavor, Reference};

use common::{CompressionArg, KindArg, MergeModeArg};

use crate::error::CliError;

/// Top level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create an empty bundle
    Create {
        /// Bundle directory (defaults to a new directory under the work dir)
        path: Option<PathBuf>,
    },

    /// Show the content of a bundle
    Info {
        /// Bundle directory
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Add a file to a bundle
    Add {
        /// Bundle directory
        path: PathBuf,

        /// File to add
        file: PathBuf,

        /// Flavor such as presenter/source (detected from the file if omitted)
        #[arg(long)]
        flavor: Option<Flavor>,

        /// Element kind, required with --flavor
        #[arg(long, value_enum, requires = "flavor")]
        kind: Option<KindArg>,

        /// Element identifier (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Track duration in milliseconds
        #[arg(long)]
        duration: Option<u64>,

        /// Reference to another element, as type:id
        #[arg(long, value_name = "REF")]
        reference: Option<Reference>,

        /// Move the file instead of copying it
        #[arg(long = "move")]
        move_file: bool,
    },

    /// Remove an element and its file
    Remove {
        /// Bundle directory
        path: PathBuf,

        /// Element identifier
        id: String,
    },

    /// Verify every element checksum
    Verify {
        /// Bundle directory
        path: PathBuf,
    },

    /// Recompute every element checksum
    Wrap {
        /// Bundle directory
        path: PathBuf,
    },

    /// Repair a bundle whose manifest references missing files
    Rebuild {
        /// Bundle directory
        path: PathBuf,

        /// Recompute checksums instead of verifying them
        #[arg(long)]
        ignore_checksums: bool,

        /// Skip checksum verification
        #[arg(long, conflicts_with = "ignore_checksums")]
        no_verify: bool,
    },

    /// Turn a directory of raw media files into a bundle
    Import {
        /// Directory holding the files
        dir: PathBuf,

        /// Leave unrecognised files in place instead of failing
        #[arg(long)]
        ignore_unknown: bool,
    },

    /// Write a bundle into a zip archive
    Pack {
        /// Bundle directory
        path: PathBuf,

        /// Archive to create
        output: PathBuf,

        /// Entry compression (defaults to the configured one)
        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,
    },

    /// Extract a zip archive into a bundle
    Unpack {
        /// Archive to read
        archive: PathBuf,

        /// Directory to extract into (defaults to the configured work dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Merge one bundle into another
    Merge {
        /// Bundle receiving the elements
        target: PathBuf,

        /// Bundle providing the elements
        source: PathBuf,

        /// What to do when both bundles hold the same identifier
        #[arg(long, value_enum, default_value_t = MergeModeArg::Merge)]
        mode: MergeModeArg,

        /// Move files and delete the source bundle afterwards
        #[arg(long = "move")]
        move_files: bool,
    },

    /// Lock a bundle
    Lock {
        /// Bundle directory
        path: PathBuf,

        /// Overwrite an existing lock
        #[arg(long)]
        force: bool,
    },

    /// Unlock a bundle
    Unlock {
        /// Bundle directory
        path: PathBuf,
    },
}

/// Run a subcommand.
pub fn run(command: Commands, config: &BundleConfig) -> Result<(), CliError> {
    match command {
        Commands::Create { path } => create::run_create(path, config),
        Commands::Info { path, json } => info::run(&path, json),
        Commands::Add {
            path,
            file,
            flavor,
            kind,
            id,
            duration,
            reference,
            move_file,
        } => elements::run_add(
            elements::AddArgs {
                path,
                file,
                flavor,
                kind,
                id,
                duration,
                reference,
                move_file,
            },
            config,
        ),
        Commands::Remove { path, id } => elements::run_remove(&path, &id),
        Commands::Verify { path } => integrity::run_verify(&path),
        Commands::Wrap { path } => integrity::run_wrap(&path),
        Commands::Rebuild {
            path,
            ignore_checksums,
            no_verify,
        } => integrity::run_rebuild(&path, ignore_checksums, !no_verify, config),
        Commands::Import {
            dir,
            ignore_unknown,
        } => create::run_import(&dir, ignore_unknown || config.ignore_unknown, config),
        Commands::Pack {
            path,
            output,
            compression,
        } => archive::run_pack(
            &path,
            &output,
            compression.map(Into::into).unwrap_or(config.compression),
        ),
        Commands::Unpack { archive, work_dir } => archive::run_unpack(
            &archive,
            work_dir.as_deref().unwrap_or(&config.work_dir),
            config,
        ),
        Commands::Merge {
            target,
            source,
            mode,
            move_files,
        } => merge::run(&target, &source, mode.into(), move_files),
        Commands::Lock { path, force } => lock::run_lock(&path, force),
        Commands::Unlock { path } => lock::run_unlock(&path),
    }
}
