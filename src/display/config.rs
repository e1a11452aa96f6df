//! Resolved configuration display

use crate::config::BackupConfig;
use crate::models::BackupMode;

/// Format the resolved configuration as aligned `key: value` lines
pub fn format_config(config: &BackupConfig) -> String {
    let retention = match &config.retention {
        Some(policy) => policy.to_string(),
        None => "disabled".to_string(),
    };
    let compression = if config.zstd_level == 0 {
        "none".to_string()
    } else {
        format!("zstd level {}", config.zstd_level)
    };
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    let rows = [
        ("Pool", config.pool.clone()),
        ("Mode", config.mode.to_string()),
        ("Filter", config.filter.to_string()),
        ("Retention", retention),
        ("Remote", config.remote.to_string()),
        ("Compression", compression),
        (
            "Key format",
            format!(
                "{}_<name>_<YYYYMMDD_HHMMSS>.{}",
                match config.mode {
                    BackupMode::Full => &config.naming.full_prefix,
                    BackupMode::Split => &config.naming.split_prefix,
                },
                config.naming.extension
            ),
        ),
        ("Storage class", optional(config.storage_class.clone())),
        ("Notify", optional(config.notify_command.clone())),
        (
            "Lock file",
            optional(config.lock_file.as_ref().map(|p| p.display().to_string())),
        ),
        ("zfs", config.zfs_bin.display().to_string()),
        ("aws", config.aws_bin.display().to_string()),
    ];

    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut output = String::from("zfs-s3-backup configuration\n");
    output.push_str(&format!("{:=<27}\n", ""));
    for (key, value) in rows {
        output.push_str(&format!("{:<width$}  {}\n", format!("{}:", key), value, width = width + 1));
    }
    output
}
