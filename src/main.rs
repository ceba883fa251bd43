//! refstore - image tag and reference store
//!
//! This is the main CLI entry point for refstore.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use refstore::config::StoreConfig;
use refstore::container::ContainerStatus;
use refstore::image::{ImageSpec, ImageStore};
use refstore::reference::Reference;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// refstore - Docker-compatible image names and references
#[derive(Parser)]
#[command(name = "refstore")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Image tag and reference store for a Docker-compatible container service", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    /// Data directory (defaults to $REFSTORE_DATA_DIR or the user data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List images
    Images {
        /// Show all images, including intermediate ones
        #[arg(short, long)]
        all: bool,
        /// Only show image IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Create a tag TARGET that refers to SOURCE
    Tag {
        /// Source image name or ID
        source: String,
        /// Target name
        target: String,
    },

    /// Remove one or more images
    Rmi {
        /// Image names or IDs
        #[arg(required = true)]
        images: Vec<String>,
        /// Force removal of images used by containers
        #[arg(short, long)]
        force: bool,
    },

    /// Import a new base image
    Import {
        /// Name for the image
        name: String,
        /// Commit message
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Record an image built on top of a base image
    Build {
        /// Name for the built image
        #[arg(short, long)]
        tag: String,
        /// Base image name or ID
        base: String,
        /// Instruction summary recorded in history
        #[arg(long, default_value = "build")]
        created_by: String,
    },

    /// Create a new image from a container
    Commit {
        /// Container ID or name
        container: String,
        /// Name for the new image
        name: Option<String>,
        /// Commit message
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Show the history of an image
    History {
        /// Image name or ID
        image: String,
    },

    /// Display detailed information on an image
    Inspect {
        /// Image name or ID
        image: String,
    },

    /// Manage images
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// Run a container
    Run {
        /// Image to run
        image: String,
        /// Container name
        #[arg(long)]
        name: Option<String>,
        /// Run in detached mode
        #[arg(short, long)]
        detach: bool,
        /// Command to run
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Create a container without starting it
    Create {
        /// Image to use
        image: String,
        /// Container name
        #[arg(long)]
        name: Option<String>,
    },

    /// Start a container
    Start {
        /// Container ID or name
        container: String,
    },

    /// Stop a container
    Stop {
        /// Container ID or name
        container: String,
    },

    /// Remove a container
    #[command(name = "rm")]
    Remove {
        /// Container IDs or names
        #[arg(required = true)]
        containers: Vec<String>,
        /// Force removal of running containers
        #[arg(short, long)]
        force: bool,
    },

    /// List containers
    #[command(name = "ps")]
    Ps {
        /// Show all containers
        #[arg(short, long)]
        all: bool,
        /// Only show container IDs
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Remove unused images
    Prune,
}

/// Prefix of every failure reported to the user
const ERROR_PREFIX: &str = "Error response from daemon";

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so listings on stdout stay machine-readable
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", ERROR_PREFIX, e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match cli.data_dir {
        Some(dir) => StoreConfig::with_data_dir(dir),
        None => StoreConfig::default(),
    };
    let store = ImageStore::open(&config)
        .with_context(|| format!("failed to open image store in {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Images { all, quiet } => {
            let rows = store.list(all)?;
            if quiet {
                for row in rows {
                    println!("{}", row.id.short());
                }
            } else {
                println!(
                    "{:<32} {:<16} {:<14} {}",
                    "REPOSITORY", "TAG", "IMAGE ID", "CREATED"
                );
                for row in rows {
                    println!(
                        "{:<32} {:<16} {:<14} {}",
                        row.repository,
                        row.tag,
                        row.id.short(),
                        since(row.created)
                    );
                }
            }
        }

        Commands::Tag { source, target } => {
            store.tag(&source, &target)?;
        }

        Commands::Rmi { images, force } => {
            let mut failed = false;
            for image in images {
                match store.remove(&image, force) {
                    Ok(actions) => {
                        for action in actions {
                            println!("{}", action);
                        }
                    }
                    Err(e) => {
                        for action in e.completed_actions() {
                            println!("{}", action);
                        }
                        eprintln!("{}: {}", ERROR_PREFIX, e);
                        failed = true;
                    }
                }
            }
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Import { name, message } => {
            let tag = Reference::parse(&name)?;
            let record = store.create_image(
                ImageSpec::root(&format!("import {}", tag))
                    .comment(&message)
                    .tag(tag),
            )?;
            println!("{}", record.id);
        }

        Commands::Build {
            tag,
            base,
            created_by,
        } => {
            let tag = Reference::parse(&tag)?;
            let record = store.build(&base, tag, &created_by)?;
            println!("Successfully built {}", record.id.short());
        }

        Commands::Commit {
            container,
            name,
            message,
        } => {
            let tag = name.as_deref().map(Reference::parse).transpose()?;
            let record = store.commit(&container, tag, &message)?;
            println!("{}", record.id);
        }

        Commands::History { image } => {
            println!("{:<14} {:<16} {}", "IMAGE", "CREATED", "CREATED BY");
            for record in store.history(&image)? {
                println!(
                    "{:<14} {:<16} {}",
                    record.id.short(),
                    since(record.created),
                    record.created_by
                );
            }
        }

        Commands::Inspect { image } => {
            let record = store.get(&image)?;
            let tags: Vec<String> = store
                .tags_of(record.id.as_str())?
                .iter()
                .map(|t| t.to_string())
                .collect();
            let id = format!("sha256:{}", record.id);
            let parent = record
                .parent
                .as_ref()
                .map(|p| format!("sha256:{}", p))
                .unwrap_or_default();
            let value = serde_json::json!({
                "Id": id,
                "RepoTags": tags,
                "Parent": parent,
                "Created": record.created,
                "CreatedBy": record.created_by,
                "Comment": record.comment,
                "Author": record.author,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Commands::Image { command } => match command {
            ImageCommands::Prune => {
                let actions = store.prune()?;
                for action in &actions {
                    println!("{}", action);
                }
                println!("Total reclaimed images: {}", actions.len());
            }
        },

        Commands::Run {
            image,
            name,
            detach,
            command,
        } => {
            // The runtime executes the process; attached runs have exited by the time we return
            let status = if detach {
                ContainerStatus::Running
            } else {
                ContainerStatus::Exited
            };
            let container = store.create_container(
                &image,
                name.as_deref().unwrap_or(""),
                command,
                status,
            )?;
            if detach {
                println!("{}", container.id);
            }
        }

        Commands::Create { image, name } => {
            let container = store.create_container(
                &image,
                name.as_deref().unwrap_or(""),
                Vec::new(),
                ContainerStatus::Created,
            )?;
            println!("{}", container.id);
        }

        Commands::Start { container } => {
            store.set_container_status(&container, ContainerStatus::Running)?;
            println!("{}", container);
        }

        Commands::Stop { container } => {
            store.set_container_status(&container, ContainerStatus::Exited)?;
            println!("{}", container);
        }

        Commands::Remove { containers, force } => {
            let mut failed = false;
            for container in containers {
                match store.remove_container(&container, force) {
                    Ok(_) => println!("{}", container),
                    Err(e) => {
                        eprintln!("{}: {}", ERROR_PREFIX, e);
                        failed = true;
                    }
                }
            }
            if failed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Ps { all, quiet } => {
            let containers = store.containers(all)?;
            if quiet {
                for c in containers {
                    println!("{}", c.id);
                }
            } else {
                println!(
                    "{:<14} {:<24} {:<20} {:<16} {:<10} NAMES",
                    "CONTAINER ID", "IMAGE", "COMMAND", "CREATED", "STATUS"
                );
                for c in containers {
                    println!(
                        "{:<14} {:<24} {:<20} {:<16} {:<10} {}",
                        c.id,
                        c.image_name,
                        c.cmd.join(" "),
                        since(c.created),
                        c.status,
                        c.name
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Rough age of a timestamp, e.g. `5 minutes ago`
fn since(created: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - created).num_seconds().max(0);
    let (value, unit) = match seconds {
        0..=59 => (seconds, "second"),
        60..=3599 => (seconds / 60, "minute"),
        3600..=86399 => (seconds / 3600, "hour"),
        _ => (seconds / 86400, "day"),
    };
    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}
