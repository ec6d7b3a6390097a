use clap::{Args, Parser, Subcommand};

use crate::volume::Volume;

#[derive(Parser, Debug)]
#[command(name = "conplicity", version, about = "Backup container volumes with duplicity", long_about = None)]
pub struct Cli {
    /// Set loglevel ('debug', 'info', 'warn', 'error', 'fatal', 'panic')
    #[arg(short, long, global = true, env = "CONPLICITY_LOG_LEVEL", default_value = "info")]
    pub loglevel: String,

    /// Log as JSON (to stderr)
    #[arg(short, long, global = true, env = "JSON_OUTPUT")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Back up the given volumes and push metrics")]
    Backup(BackupArgs),
    #[command(about = "List the volumes known to a remote instance")]
    Volumes(VolumesArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    /// Volumes to back up, as `name` or `name:/host/mountpoint`
    #[arg(value_name = "VOLUMES", value_parser = parse_volume)]
    pub volumes: Vec<Volume>,

    /// The duplicity docker image
    #[arg(short, long, env = "DUPLICITY_DOCKER_IMAGE", default_value = "camptocamp/duplicity:latest")]
    pub image: String,

    /// Volumes to blacklist in backups
    #[arg(short = 'b', long = "blacklist", env = "CONPLICITY_VOLUMES_BLACKLIST", value_delimiter = ',')]
    pub volumes_blacklist: Vec<String>,

    /// Do not verify backup
    #[arg(long, env = "CONPLICITY_NO_VERIFY")]
    pub no_verify: bool,

    /// Abort a single duplicity run after this many seconds
    #[arg(long, env = "CONPLICITY_RUN_TIMEOUT")]
    pub run_timeout: Option<u64>,

    #[command(flatten)]
    pub duplicity: DuplicityArgs,

    /// The prometheus push gateway URL to use
    #[arg(short = 'g', long = "gateway-url", env = "PUSHGATEWAY_URL", default_value = "")]
    pub pushgateway_url: String,

    #[command(flatten)]
    pub aws: AwsArgs,

    #[command(flatten)]
    pub swift: SwiftArgs,

    /// The Docker endpoint
    #[arg(short = 'e', long, env = "DOCKER_ENDPOINT", default_value = "unix:///var/run/docker.sock")]
    pub docker_endpoint: String,
}

#[derive(Args, Debug, Clone)]
pub struct DuplicityArgs {
    /// The duplicity target URL to push to
    #[arg(short = 'u', long = "url", env = "DUPLICITY_TARGET_URL", default_value = "")]
    pub target_url: String,

    /// The number of days after which a full backup must be performed
    #[arg(long, env = "CONPLICITY_FULL_IF_OLDER_THAN", default_value = "15D")]
    pub full_if_older_than: String,

    /// The number of days after which backups must be removed
    #[arg(long, env = "CONPLICITY_REMOVE_OLDER_THAN", default_value = "30D")]
    pub remove_older_than: String,
}

#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    /// The AWS access key ID
    #[arg(long = "aws-access-key-id", env = "AWS_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// The AWS secret access key
    #[arg(long = "aws-secret-key-id", env = "AWS_SECRET_ACCESS_KEY")]
    pub secret_access_key: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SwiftArgs {
    /// The Swift user name
    #[arg(long = "swift-username", env = "SWIFT_USERNAME")]
    pub username: Option<String>,

    /// The Swift password
    #[arg(long = "swift-password", env = "SWIFT_PASSWORD")]
    pub password: Option<String>,

    /// The Swift auth URL
    #[arg(long = "swift-auth-url", env = "SWIFT_AUTHURL")]
    pub auth_url: Option<String>,

    /// The Swift tenant name
    #[arg(long = "swift-tenant-name", env = "SWIFT_TENANTNAME")]
    pub tenant_name: Option<String>,

    /// The Swift region name
    #[arg(long = "swift-region-name", env = "SWIFT_REGIONNAME")]
    pub region_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct VolumesArgs {
    /// Address of the remote instance, e.g. http://backup.example.org:8182
    #[arg(long, env = "CONPLICITY_REMOTE_ADDRESS")]
    pub remote_address: String,

    /// Preshared key sent as bearer token
    #[arg(long, env = "CONPLICITY_PSK")]
    pub psk: String,
}

fn parse_volume(s: &str) -> Result<Volume, String> {
    let (name, mountpoint) = match s.split_once(':') {
        Some((name, mountpoint)) => (name, Some(mountpoint)),
        None => (s, None),
    };
    if name.is_empty() {
        return Err("volume name must not be empty".to_string());
    }
    match mountpoint {
        Some("") => Err(format!("volume `{name}` has an empty mountpoint")),
        Some(mountpoint) => Ok(Volume::new(name, mountpoint)),
        None => Ok(Volume::local(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume_with_mountpoint() {
        let vol = parse_volume("data:/srv/data").unwrap();
        assert_eq!(vol.name, "data");
        assert_eq!(vol.mountpoint, "/srv/data");
    }

    #[test]
    fn test_parse_volume_defaults_to_docker_volume_dir() {
        let vol = parse_volume("pgdata").unwrap();
        assert_eq!(vol.mountpoint, "/var/lib/docker/volumes/pgdata/_data");
    }

    #[test]
    fn test_parse_volume_rejects_empty_parts() {
        assert!(parse_volume(":/srv").is_err());
        assert!(parse_volume("data:").is_err());
    }

    #[test]
    fn test_cli_parses_backup_flags() {
        let cli = Cli::try_parse_from([
            "conplicity",
            "backup",
            "--url",
            "s3://bucket",
            "-b",
            "tmp,cache",
            "--no-verify",
            "vol1",
            "vol2:/mnt/vol2",
        ])
        .unwrap();
        let Commands::Backup(args) = cli.command else {
            panic!("expected backup subcommand");
        };
        assert_eq!(args.duplicity.target_url, "s3://bucket");
        assert_eq!(args.volumes_blacklist, vec!["tmp", "cache"]);
        assert!(args.no_verify);
        assert_eq!(args.volumes.len(), 2);
        assert_eq!(args.duplicity.full_if_older_than, "15D");
    }
}
