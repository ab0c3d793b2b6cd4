//! Runner mapping parsed arguments onto registry operations

use crate::cli::args::{Args, Command};
use crate::config::{DEFAULT_REGISTRY, RegistryConfig};
use crate::error::{RegistryError, Result};
use crate::image::manifest::PlatformFilter;
use crate::logging::Logger;
use crate::registry::{Registry, RegistryClient, TagQuery};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::time::{Duration, Instant};

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Self { args, output }
    }

    pub fn logger(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        self.args.validate().map_err(RegistryError::Config)?;

        let registry = self.create_registry()?;
        self.execute(&registry).await?;

        self.output.verbose(&format!(
            "Completed in {}",
            self.output.format_duration(start_time.elapsed())
        ));
        Ok(())
    }

    /// Explicit arguments win over environment variables
    fn build_config(&self) -> Result<RegistryConfig> {
        let mut config = match &self.args.registry {
            Some(address) => RegistryConfig::new(address)?.with_env_overrides()?,
            None => RegistryConfig::from_env()?,
        };

        if let (Some(username), Some(password)) = (&self.args.username, &self.args.password) {
            config = config.with_credentials(username.clone(), password.clone());
        }
        if let Some(secs) = self.args.open_timeout {
            config = config.with_open_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.args.read_timeout {
            config = config.with_read_timeout(Duration::from_secs(secs));
        }
        if self.args.skip_tls {
            let mut options = config.transport_options().clone();
            options.accept_invalid_certs = true;
            config = config.with_transport_options(options);
        }

        config.validate()?;
        Ok(config)
    }

    fn create_registry(&self) -> Result<Registry> {
        let config = self.build_config()?;
        self.output.verbose(&format!(
            "Registry: {}{}",
            config.base_url(),
            if env::var("REGISTRY_ADDRESS").is_err() && self.args.registry.is_none() {
                format!(" (default {})", DEFAULT_REGISTRY)
            } else {
                String::new()
            }
        ));
        if let Some(credentials) = config.credentials() {
            self.output
                .verbose(&format!("Authenticating as {}", credentials.username));
        }

        let client = RegistryClient::builder(config)
            .with_logger(self.output.clone())
            .build()?;
        Ok(Registry::from_client(client))
    }

    async fn execute(&self, registry: &Registry) -> Result<()> {
        match &self.args.command {
            Command::Ping => {
                registry.ping().await?;
                self.output
                    .success(&format!("{} is a v2 registry", registry.config().base_url()));
            }
            Command::Search { query } => {
                print_json(&registry.search(query).await?)?;
            }
            Command::Tags {
                repository,
                count,
                last,
                with_hashes,
                all,
                max_pages,
            } => {
                let query = TagQuery {
                    count: *count,
                    last: last.clone(),
                    with_hashes: *with_hashes,
                    auto_paginate: *all,
                    max_pages: *max_pages,
                };
                print_json(&registry.tags(repository, &query).await?)?;
            }
            Command::Manifest { repository, reference } => {
                let manifest = registry.manifest(repository, reference).await?;
                write_stdout(manifest.body())?;
                write_stdout(b"\n")?;
            }
            Command::ManifestSum { repository, reference } => {
                print_json(&registry.manifest_sum(repository, reference).await?)?;
            }
            Command::Digest {
                repository,
                reference,
                architecture,
                os,
                variant,
            } => {
                let filter = PlatformFilter {
                    architecture: architecture.clone(),
                    os: os.clone(),
                    variant: variant.clone(),
                };
                print_json(&registry.digest(repository, reference, &filter).await?)?;
            }
            Command::BlobSize { repository, digest } => {
                print_json(&registry.blob_size(repository, digest).await?)?;
            }
            Command::Blob {
                repository,
                digest,
                output,
            } => match output {
                Some(path) => {
                    let path = registry.fetch_blob_to(repository, digest, path).await?;
                    self.output.success(&format!("Saved {} to {}", digest, path.display()));
                }
                None => {
                    let blob = registry.blob(repository, digest).await?;
                    write_stdout(&blob.body)?;
                }
            },
            Command::Pull {
                repository,
                reference,
                directory,
            } => {
                let files = registry.pull(repository, reference, directory).await?;
                print_json(&files)?;
            }
            Command::Tag {
                repository,
                reference,
                new_repository,
                new_reference,
            } => {
                let digest = registry
                    .tag(repository, reference, new_repository, new_reference)
                    .await?;
                print_json(&digest)?;
            }
            Command::Rmtag { repository, tag } => {
                print_json(&registry.rmtag(repository, tag).await?)?;
            }
        }
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    write_stdout(text.as_bytes())?;
    write_stdout(b"\n")
}

fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}
