use crate::config::RunConfiguration;

/// Swift keystone auth version expected by the duplicity image.
const SWIFT_AUTH_VERSION: &str = "2";

/// Builds the storage-backend environment of a duplicity container.
///
/// Always returns the same eight keys in the same order. Unset credentials
/// become empty values because the image expects every variable to exist.
pub fn compose_environment(config: &RunConfiguration) -> Vec<String> {
    let entry = |key: &str, value: &Option<String>| {
        format!("{key}={}", value.as_deref().unwrap_or_default())
    };

    vec![
        entry("AWS_ACCESS_KEY_ID", &config.aws.access_key_id),
        entry("AWS_SECRET_ACCESS_KEY", &config.aws.secret_access_key),
        entry("SWIFT_USERNAME", &config.swift.username),
        entry("SWIFT_PASSWORD", &config.swift.password),
        entry("SWIFT_AUTHURL", &config.swift.auth_url),
        entry("SWIFT_TENANTNAME", &config.swift.tenant_name),
        entry("SWIFT_REGIONNAME", &config.swift.region_name),
        format!("SWIFT_AUTHVERSION={SWIFT_AUTH_VERSION}"),
    ]
}

/// The variable names only, for logging without leaking secrets.
pub fn environment_keys(env: &[String]) -> Vec<&str> {
    env.iter()
        .map(|entry| entry.split_once('=').map_or(entry.as_str(), |(key, _)| key))
        .collect()
}
