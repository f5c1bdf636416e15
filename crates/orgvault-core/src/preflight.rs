//! Prerequisite binaries for the configured backup cycle.

use orgvault_config::AppConfig;

/// Binaries the configuration needs, in check order.
pub fn required_binaries(config: &AppConfig) -> Vec<String> {
    let mut required = Vec::new();
    if let Some(command) = &config.supervisor.backup_command {
        if let Some(program) = command.first() {
            required.push(program.clone());
        }
        return required;
    }

    let targets = &config.backup_targets;
    if !targets.enabled_names().is_empty() {
        required.push("git".to_string());
    }
    if targets.radicle.enabled {
        required.push("rad".to_string());
    }
    if targets.dat.enabled {
        required.push("dat".to_string());
    }
    required
}

/// Required binaries that cannot be found on `PATH`.
pub fn missing_binaries(config: &AppConfig) -> Vec<String> {
    required_binaries(config)
        .into_iter()
        .filter(|bin| which::which(bin).is_err())
        .collect()
}
