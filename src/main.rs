//! bluestore -- command-line front end for the Blob Storage client.
//!
//! Every command loads the YAML configuration, validates credentials and
//! runs a single operation.  Failures exit non-zero with the request id of
//! the failing call in the message.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use bluestore::config::{Config, LoggingConfig};
use bluestore::{BlobClient, UploadOptions};

/// Command-line arguments for bluestore.
#[derive(Parser, Debug)]
#[command(
    name = "bluestore",
    version,
    about = "Azure Blob Storage block upload client"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bluestore.example.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file as a block blob.
    Upload {
        /// Local file to upload.
        file: PathBuf,

        /// Blob name; defaults to the file name.
        #[arg(short, long)]
        name: Option<String>,

        /// Content type recorded on the blob.
        #[arg(long, default_value = bluestore::upload::DEFAULT_CONTENT_TYPE)]
        content_type: String,

        /// Cache-Control recorded on the blob.
        #[arg(long)]
        cache_control: Option<String>,

        /// Expected MD5 of the file (hex or base64).
        #[arg(long)]
        content_md5: Option<String>,

        /// Pick a free name by suffixing a counter if the blob exists.
        #[arg(long)]
        unique: bool,
    },

    /// Report whether a blob exists.
    Exists {
        name: String,
    },

    /// Print the first free name derived from NAME.
    UniqueName {
        name: String,
    },

    /// Validate the credentials in the configuration file.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bluestore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    if config.observability.metrics {
        bluestore::metrics::init_metrics();
        bluestore::metrics::describe_metrics();
    }

    let result = run(cli.command, &config).await;

    if let Some(text) = bluestore::metrics::render() {
        eprintln!("{}", text);
    }
    result
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    if let Command::Validate = command {
        bluestore::validate_credentials(&config.azure)?;
        println!(
            "credentials valid: account={} container={} block_size={}",
            config.azure.account, config.azure.container, config.azure.block_size
        );
        return Ok(());
    }

    let client = BlobClient::from_config(config)?;

    match command {
        Command::Upload {
            file,
            name,
            content_type,
            cache_control,
            content_md5,
            unique,
        } => {
            let requested = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("cannot derive a blob name from {:?}", file))?,
            };
            let blob_name = if unique {
                client.resolve_unique_name(&requested).await?
            } else {
                requested
            };

            let options = UploadOptions {
                content_type,
                cache_control,
                content_md5,
            };
            let receipt = client.upload_file(&blob_name, &file, &options).await?;
            println!(
                "{} ({} bytes, {} blocks, md5 {})",
                client.blob_url(&receipt.blob_name),
                receipt.size,
                receipt.blocks.len(),
                receipt.content_md5
            );
        }
        Command::Exists { name } => {
            println!("{}", client.blob_exists(&name).await?);
        }
        Command::UniqueName { name } => {
            println!("{}", client.resolve_unique_name(&name).await?);
        }
        Command::Validate => {}
    }
    Ok(())
}

/// Initialize the tracing subscriber from the logging section.  `RUST_LOG`
/// overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
