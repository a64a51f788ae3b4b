//! Lab configuration.
//!
//! Every lab runs with sensible defaults. Any of them can be overridden with
//! a TOML file (by default `cloudlabs.toml` in the working directory), and the
//! command line overrides the file for region and profile.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use snafu::prelude::*;

use crate::{aws::dynamodb::BillingMode, poll::Poller};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cloudlabs.toml";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file '{path:?}': {source}"))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse config file '{path:?}': {source}"))]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Config value '{field}' must be greater than zero"))]
    Zero { field: &'static str },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub region: String,
    /// Named profile from the shared AWS config, eg `aws-labs`.
    pub profile: Option<String>,
    /// Where local files produced by the labs are written.
    pub work_dir: PathBuf,
    pub s3: S3Config,
    pub dynamodb: DynamoDbConfig,
    pub api: ApiConfig,
    pub ecs: EcsConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            region: "eu-west-1".to_string(),
            profile: None,
            work_dir: PathBuf::from("."),
            s3: S3Config::default(),
            dynamodb: DynamoDbConfig::default(),
            api: ApiConfig::default(),
            ecs: EcsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// The SDK lab bucket is named `{bucket_prefix}-{unique suffix}`.
    pub bucket_prefix: String,
    /// Bucket holding the capstone ship photos.
    pub capstone_bucket: String,
    pub assets_dir: PathBuf,
    pub assets: Vec<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            bucket_prefix: "s3-lab-sdk".to_string(),
            capstone_bucket: "ships-capstone-photos".to_string(),
            assets_dir: PathBuf::from("assets"),
            assets: vec!["fisher.jpg".to_string(), "tanker.jpg".to_string()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DynamoDbConfig {
    /// The lab table is named `{table_prefix}-{unique suffix}`.
    pub table_prefix: String,
    pub billing_mode: BillingMode,
    pub poll_interval_secs: u64,
    pub poll_attempts: u32,
}

impl Default for DynamoDbConfig {
    fn default() -> Self {
        // five minutes of waiting, as for any table finalization
        DynamoDbConfig {
            table_prefix: "starbucks-coffees".to_string(),
            billing_mode: BillingMode::PayPerRequest,
            poll_interval_secs: 3,
            poll_attempts: 100,
        }
    }
}

impl DynamoDbConfig {
    pub fn poller(&self, label: impl Into<String>) -> Poller {
        Poller::new(Duration::from_secs(self.poll_interval_secs), self.poll_attempts)
            .with_label(label)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub name: String,
    pub stage: String,
    /// Table scanned by `GET /ships`.
    pub table: String,
    /// Bucket read by `GET /ships/photo/{key}`.
    pub bucket: String,
    pub s3_role: String,
    pub dynamodb_role: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            name: "ships-api-capstone".to_string(),
            stage: "dev".to_string(),
            table: "ships".to_string(),
            bucket: "ships-capstone-photos".to_string(),
            s3_role: "APIGatewayS3ServiceRole".to_string(),
            dynamodb_role: "APIGatewayDynamoDBServiceRole".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EcsConfig {
    pub cluster: String,
    pub infrastructure_stack: String,
    pub iam_stack: String,
    pub image_url: String,
    pub log_group: String,
    pub poll_interval_secs: u64,
    pub poll_attempts: u32,
}

impl Default for EcsConfig {
    fn default() -> Self {
        EcsConfig {
            cluster: "ecs-lab-cluster".to_string(),
            infrastructure_stack: "ecs-lab-infrastructure".to_string(),
            iam_stack: "ecs-lab-iam-roles".to_string(),
            image_url: "https://huggingface.co/datasets/Xenova/transformers.js-docs/resolve/main/tiger.jpg"
                .to_string(),
            log_group: "/ecs/ecs-lab/image-classifier".to_string(),
            // 15 minutes
            poll_interval_secs: 30,
            poll_attempts: 30,
        }
    }
}

impl EcsConfig {
    pub fn poller(&self, label: impl Into<String>) -> Poller {
        Poller::new(Duration::from_secs(self.poll_interval_secs), self.poll_attempts)
            .with_label(label)
    }
}

impl LabConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml(path: impl AsRef<Path>, contents: &str) -> Result<Self, ConfigError> {
        let config: LabConfig = toml::from_str(contents).context(ParseSnafu {
            path: path.as_ref().to_path_buf(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// used if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    log::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
                    return Ok(LabConfig::default());
                }
                path
            }
        };
        log::debug!("reading config from {path:?}");
        let contents = std::fs::read_to_string(&path).context(ReadSnafu { path: &path })?;
        Self::from_toml(&path, &contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.dynamodb.poll_attempts > 0,
            ZeroSnafu {
                field: "dynamodb.poll_attempts"
            }
        );
        ensure!(
            self.ecs.poll_attempts > 0,
            ZeroSnafu {
                field: "ecs.poll_attempts"
            }
        );
        Ok(())
    }

    /// Loads the AWS SDK configuration for this lab's region and profile.
    pub async fn sdk_config(&self) -> SdkConfig {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        loader.load().await
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = LabConfig::from_toml("cloudlabs.toml", "").unwrap();
        assert_eq!(LabConfig::default(), config);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = LabConfig::from_toml(
            "cloudlabs.toml",
            r#"
            region = "us-east-1"
            profile = "aws-labs"

            [ecs]
            cluster = "my-cluster"
            poll_interval_secs = 5

            [api]
            table = "ENM-VerifMaritime"
            "#,
        )
        .unwrap();
        assert_eq!("us-east-1", config.region);
        assert_eq!(Some("aws-labs".to_string()), config.profile);
        assert_eq!("my-cluster", config.ecs.cluster);
        assert_eq!(30, config.ecs.poll_attempts);
        assert_eq!("ENM-VerifMaritime", config.api.table);
        assert_eq!("dev", config.api.stage);

        let poller = config.ecs.poller("task");
        assert_eq!(Duration::from_secs(5), poller.interval());
        assert_eq!(30, poller.max_attempts());
    }

    #[test]
    fn provisioned_billing_mode() {
        let config = LabConfig::from_toml(
            "cloudlabs.toml",
            r#"
            [dynamodb.billing_mode]
            mode = "provisioned"
            read_capacity_units = 5
            write_capacity_units = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            BillingMode::Provisioned {
                read_capacity_units: 5,
                write_capacity_units: 5
            },
            config.dynamodb.billing_mode
        );
        assert_eq!(
            BillingMode::PayPerRequest,
            LabConfig::default().dynamodb.billing_mode
        );
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = LabConfig::from_toml(
            "cloudlabs.toml",
            "[dynamodb]\npoll_attempts = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }), "{err}");
    }

    #[test]
    fn bad_toml_names_the_file() {
        let err = LabConfig::from_toml("lab.toml", "region = ").unwrap_err();
        assert!(err.to_string().contains("lab.toml"), "{err}");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "cloudlabs-missing-{}-{}.toml",
            std::process::id(),
            crate::utils::unique_suffix()
        ));
        let err = LabConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }), "{err}");
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "cloudlabs-{}-{}.toml",
            std::process::id(),
            crate::utils::unique_suffix()
        ));
        std::fs::write(&path, "region = \"eu-west-3\"\n").unwrap();
        let config = LabConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!("eu-west-3", config.region);
    }
}
