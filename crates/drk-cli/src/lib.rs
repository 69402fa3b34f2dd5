//! drk - signed document packages for vessels
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Builds full and delta packages of a document tree, verifies and applies
//! them transactionally, and keeps a version registry that plans the
//! cheapest update path for each client.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.drk/
//! ├── packages/     # Built .drkpack / .drkdelta files
//! ├── drk.key       # Signing key written by `drk keygen`
//! ├── config.toml   # Optional settings
//! └── registry.db   # SQLite version registry
//! ```

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "drk")]
#[command(author, version, about = "drk - signed document packages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate an Ed25519 signing keypair
    Keygen {
        /// Where to write the secret key (default: ~/.drk/drk.key)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Build a full package from a document directory
    Create {
        /// Source directory
        source: PathBuf,
        /// Release version recorded in the manifest
        #[arg(long)]
        version: String,
        /// Output file (default: ~/.drk/packages/<version>.drkpack)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        meta: MetadataArgs,
    },
    /// Build a delta package against a base package
    Delta {
        /// Base package the clients already have
        base: PathBuf,
        /// Source directory of the new release
        source: PathBuf,
        /// Release version recorded in the manifest
        #[arg(long)]
        version: String,
        /// Output file (default: ~/.drk/packages/<base>-<version>.drkdelta)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        meta: MetadataArgs,
    },
    /// Check a package's signature and layout
    Verify {
        /// Package file
        package: PathBuf,
        /// Also decompress every file and check its hash
        #[arg(long)]
        deep: bool,
    },
    /// Verify a package and apply it to a directory
    Apply {
        /// Package file
        package: PathBuf,
        /// Document directory to update
        target: PathBuf,
    },
    /// Restore a directory from a backup taken by `apply`
    Rollback {
        /// Document directory to restore
        target: PathBuf,
        /// Backup to restore (default: the most recent one)
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Show a package's manifest without verifying it
    Inspect {
        /// Package file
        package: PathBuf,
        /// Print the raw manifest JSON
        #[arg(long)]
        json: bool,
    },
    /// List built packages
    List {
        /// Packages directory (default: ~/.drk/packages)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Summarize built packages
    Stats {
        /// Packages directory (default: ~/.drk/packages)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Version registry commands
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Descriptive manifest fields shared by `create` and `delta`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct MetadataArgs {
    /// Publishing company
    #[arg(long, default_value = "")]
    pub company: String,
    /// Target vessel
    #[arg(long)]
    pub vessel: Option<String>,
    /// Description
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Debug, Subcommand)]
pub enum RegistryCommands {
    /// Register a package
    AddPackage {
        /// Unique package name
        name: String,
        /// Category
        #[arg(long, default_value = "documents")]
        category: String,
        /// Description
        #[arg(long)]
        description: Option<String>,
        /// Maintainer
        #[arg(long)]
        maintainer: Option<String>,
        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List registered packages
    Packages,
    /// Register a package file as a version
    AddVersion {
        /// Package name
        package: String,
        /// Version string
        version: String,
        /// Package file
        file: PathBuf,
        /// Version the delta was built against (marks the file as a delta)
        #[arg(long)]
        parent: Option<String>,
        /// Version the delta brings clients to (marks the file as a delta)
        #[arg(long)]
        target: Option<String>,
        /// Description
        #[arg(long)]
        description: Option<String>,
        /// Change log as JSON
        #[arg(long)]
        changes: Option<String>,
        /// Publish immediately
        #[arg(long)]
        publish: bool,
    },
    /// Release a version to clients
    Publish {
        /// Package name
        package: String,
        /// Version string
        version: String,
    },
    /// Mark a version for cleanup
    Deprecate {
        /// Package name
        package: String,
        /// Version string
        version: String,
    },
    /// Show every version, newest first
    History {
        /// Package name
        package: String,
    },
    /// Show the versions registered between two versions
    Compare {
        /// Package name
        package: String,
        /// First version
        from: String,
        /// Second version
        to: String,
    },
    /// Plan the cheapest update from one version to another
    UpdatePath {
        /// Package name
        package: String,
        /// Version the client has
        current: String,
        /// Version the client needs
        target: String,
    },
    /// List deltas that land on a version
    DeltaChain {
        /// Package name
        package: String,
        /// Target version
        target: String,
    },
    /// Count a download
    Download {
        /// Package name
        package: String,
        /// Version string
        version: String,
    },
    /// Delete old deprecated versions
    Cleanup {
        /// Package name
        package: String,
        /// Deprecated versions to keep
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}
