use std::time::Duration;

use crate::error::{ConplicityError, Result};
use crate::utils::cli::BackupArgs;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwiftCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_url: Option<String>,
    pub tenant_name: Option<String>,
    pub region_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicityOptions {
    pub target_url: String,
    pub full_if_older_than: String,
    pub remove_older_than: String,
}

/// Settings resolved once at startup and shared read-only by every component.
#[derive(Clone, Debug, Default)]
pub struct RunConfiguration {
    pub image: String,
    pub docker_endpoint: String,
    pub duplicity: DuplicityOptions,
    pub aws: AwsCredentials,
    pub swift: SwiftCredentials,
    /// Empty disables metric pushes.
    pub pushgateway_url: String,
    /// Sorted, so lookups can binary search.
    pub volumes_blacklist: Vec<String>,
    pub no_verify: bool,
    pub run_timeout: Option<Duration>,
    pub hostname: String,
}

impl RunConfiguration {
    pub fn from_args(args: &BackupArgs, hostname: impl Into<String>) -> Result<Self> {
        let mut validation_errors = Vec::new();
        if args.image.trim().is_empty() {
            validation_errors.push("the duplicity image must not be empty".to_string());
        }
        if args.duplicity.target_url.trim().is_empty() {
            validation_errors.push("DUPLICITY_TARGET_URL is not set".to_string());
        }
        if args.run_timeout == Some(0) {
            validation_errors.push("CONPLICITY_RUN_TIMEOUT must be positive".to_string());
        }
        if !validation_errors.is_empty() {
            return Err(ConplicityError::Config(validation_errors.join("; ")));
        }

        let mut volumes_blacklist: Vec<String> = args
            .volumes_blacklist
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        volumes_blacklist.sort();

        Ok(Self {
            image: args.image.clone(),
            docker_endpoint: args.docker_endpoint.clone(),
            duplicity: DuplicityOptions {
                target_url: args.duplicity.target_url.trim_end_matches('/').to_string(),
                full_if_older_than: args.duplicity.full_if_older_than.clone(),
                remove_older_than: args.duplicity.remove_older_than.clone(),
            },
            aws: AwsCredentials {
                access_key_id: args.aws.access_key_id.clone(),
                secret_access_key: args.aws.secret_access_key.clone(),
            },
            swift: SwiftCredentials {
                username: args.swift.username.clone(),
                password: args.swift.password.clone(),
                auth_url: args.swift.auth_url.clone(),
                tenant_name: args.swift.tenant_name.clone(),
                region_name: args.swift.region_name.clone(),
            },
            pushgateway_url: args.pushgateway_url.trim().to_string(),
            volumes_blacklist,
            no_verify: args.no_verify,
            run_timeout: args.run_timeout.map(Duration::from_secs),
            hostname: hostname.into(),
        })
    }

    pub fn is_blacklisted(&self, volume: &str) -> bool {
        self.volumes_blacklist
            .binary_search_by(|name| name.as_str().cmp(volume))
            .is_ok()
    }
}
