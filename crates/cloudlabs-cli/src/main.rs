//! Runs the AWS labs from the command line.
//!
//! Run with `RUST_LOG=debug` to see the poller at work.
//!
//! ```sh
//! cargo run -p cloudlabs-cli -- validate
//! cargo run -p cloudlabs-cli -- --profile aws-labs dynamodb
//! cargo run -p cloudlabs-cli -- s3 --cleanup
//! cargo run -p cloudlabs-cli -- bucket && cargo run -p cloudlabs-cli -- deploy
//! cargo run -p cloudlabs-cli -- destroy --force
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use labs::{aws, LabConfig};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "labs", version, about = "Hands-on AWS SDK labs")]
struct Cli {
    /// TOML configuration file. Defaults to `cloudlabs.toml` if present.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// AWS region, overriding the configuration file.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Named AWS profile, overriding the configuration file.
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check credentials and permissions.
    Validate,
    /// Create a bucket, upload, list, download and verify a file.
    S3 {
        /// Delete the bucket and its objects at the end.
        #[clap(long, default_value = "false")]
        cleanup: bool,
    },
    /// Create a table, write, read and delete coffees, then drop the table.
    Dynamodb,
    /// Create the public bucket serving the ship photos.
    Bucket {
        /// Bucket name, overriding the configuration file.
        #[clap(long)]
        name: Option<String>,
    },
    /// Deploy the Ships REST API.
    Deploy,
    /// Tear down the Ships REST API.
    Destroy {
        #[clap(long, short, default_value = "false")]
        force: bool,
    },
    /// Classify an image with a one-off ECS task.
    Ecs {
        /// Image to classify, overriding the configuration file.
        #[clap(long)]
        image_url: Option<String>,
    },
}

impl Cli {
    fn lab_config(&self) -> anyhow::Result<LabConfig> {
        let mut cfg = LabConfig::load(self.config.as_deref())?;
        if let Some(region) = &self.region {
            cfg.region = region.clone();
        }
        if let Some(profile) = &self.profile {
            cfg.profile = Some(profile.clone());
        }
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = cli.lab_config()?;
    log::debug!("running in {} with profile {:?}", cfg.region, cfg.profile);
    let sdk = cfg.sdk_config().await;

    match cli.command {
        Command::Validate => {
            if !aws::validate::run(&cfg, &sdk).await {
                std::process::exit(1);
            }
        }
        Command::S3 { cleanup } => {
            aws::s3::run_sdk_lab(&cfg, &sdk, cleanup).await?;
        }
        Command::Dynamodb => {
            aws::dynamodb::run_lab(&cfg, &sdk).await?;
        }
        Command::Bucket { name } => {
            let bucket = name.unwrap_or_else(|| cfg.s3.capstone_bucket.clone());
            aws::s3::setup_capstone_bucket(&cfg, &sdk, &bucket).await?;
        }
        Command::Deploy => {
            aws::apigateway::deploy(&cfg, &sdk).await?;
        }
        Command::Destroy { force } => {
            let found = aws::apigateway::destroy(&cfg, &sdk, force).await?;
            if !force {
                println!();
                println!("Please call `destroy --force` to delete these resources.");
                return Ok(());
            }
            println!("Deleted {found} resource(s).");
        }
        Command::Ecs { image_url } => {
            aws::ecs::run_lab(&cfg, &sdk, image_url.as_deref()).await?;
        }
    }
    println!("\n{}", "Done.".green().bold());
    Ok(())
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "labs",
            "--region",
            "us-east-1",
            "--profile",
            "aws-labs",
            "ecs",
            "--image-url",
            "https://example.com/cat.jpg",
        ])
        .unwrap();
        let cfg = cli.lab_config().unwrap();
        assert_eq!("us-east-1", cfg.region);
        assert_eq!(Some("aws-labs".to_string()), cfg.profile);
        assert!(matches!(
            cli.command,
            Command::Ecs { image_url: Some(ref url) } if url == "https://example.com/cat.jpg"
        ));
    }
}
