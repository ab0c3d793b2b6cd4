//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "docker-registry-client")]
#[command(about = "Query and pull from Docker Registry v2 / OCI Distribution registries")]
#[command(version, author)]
pub struct Args {
    /// Registry base URL (falls back to REGISTRY_ADDRESS, then Docker Hub)
    #[arg(long = "registry", short = 'r', global = true)]
    pub registry: Option<String>,

    /// Registry username (falls back to REGISTRY_USERNAME)
    #[arg(long = "username", short = 'u', global = true)]
    pub username: Option<String>,

    /// Registry password (falls back to REGISTRY_PASSWORD)
    #[arg(long = "password", short = 'p', global = true)]
    pub password: Option<String>,

    /// Seconds to wait for a connection
    #[arg(long = "open-timeout", global = true)]
    pub open_timeout: Option<u64>,

    /// Seconds to wait for data
    #[arg(long = "read-timeout", global = true)]
    pub read_timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(long = "skip-tls", short = 'k', global = true)]
    pub skip_tls: bool,

    /// Enable verbose output
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Only print results and errors
    #[arg(long = "quiet", short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the registry answers on /v2/
    Ping,

    /// List catalog repositories matching a regular expression
    Search {
        #[arg(default_value = "")]
        query: String,
    },

    /// List the tags of a repository
    Tags {
        repository: String,
        /// Page size
        #[arg(long = "count", short = 'n')]
        count: Option<u32>,
        /// Start after this cursor
        #[arg(long = "last")]
        last: Option<String>,
        /// Include the manifest digest of every tag
        #[arg(long = "with-hashes")]
        with_hashes: bool,
        /// Follow pagination until all tags are listed
        #[arg(long = "all", short = 'a')]
        all: bool,
        /// Upper bound on pages fetched with --all
        #[arg(long = "max-pages")]
        max_pages: Option<usize>,
    },

    /// Print a manifest exactly as the registry returned it
    Manifest { repository: String, reference: String },

    /// Sum of the layer sizes of a schema 2 manifest
    ManifestSum { repository: String, reference: String },

    /// Resolve a reference to its digest, selecting a platform in manifest lists
    Digest {
        repository: String,
        reference: String,
        #[arg(long = "arch")]
        architecture: Option<String>,
        #[arg(long = "os")]
        os: Option<String>,
        #[arg(long = "variant")]
        variant: Option<String>,
    },

    /// Print the size of a blob
    BlobSize { repository: String, digest: String },

    /// Download a blob to a file, or to stdout without --output
    Blob {
        repository: String,
        digest: String,
        #[arg(long = "output", short = 'o')]
        output: Option<PathBuf>,
    },

    /// Download the layers of an image into a directory
    Pull {
        repository: String,
        reference: String,
        directory: PathBuf,
    },

    /// Copy a manifest to a new repository and tag
    Tag {
        repository: String,
        reference: String,
        new_repository: String,
        new_reference: String,
    },

    /// Delete a tag
    Rmtag { repository: String, tag: String },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_some() != self.password.is_some() {
            return Err("--username and --password must be given together".to_string());
        }
        if self.open_timeout == Some(0) || self.read_timeout == Some(0) {
            return Err("Timeouts must be greater than 0".to_string());
        }
        if let Command::Tags {
            max_pages: Some(0), ..
        } = self.command
        {
            return Err("--max-pages must be greater than 0".to_string());
        }
        Ok(())
    }
}
