use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::storage::ArtifactPath;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    ArtifactPath::validate_segment(&config.environment)
        .map_err(|e| invalid(format!("environment: {}", e)))?;

    if config.storage_root.trim().is_empty() {
        return Err(invalid("storage_root must not be empty"));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }

    let limits = &config.limits;
    if limits.max_file_bytes == 0 || limits.max_submission_bytes == 0 {
        return Err(invalid("size limits must be greater than zero"));
    }
    if limits.max_file_bytes > limits.max_submission_bytes {
        return Err(invalid(
            "limits.max_file_bytes must not exceed limits.max_submission_bytes",
        ));
    }

    if config.extraction.timeout_secs == 0 {
        return Err(invalid("extraction.timeout_secs must be greater than zero"));
    }

    if config.preview.max_width == 0 || config.preview.max_height == 0 {
        return Err(invalid("preview box dimensions must be greater than zero"));
    }

    if config.ocr.enabled && config.ocr.languages.is_empty() {
        return Err(invalid("ocr.languages must not be empty when OCR is enabled"));
    }

    let valuation = &config.valuation;
    for (name, bounds) in valuation.bounds() {
        if !(0.0..=1.0).contains(&bounds.min)
            || !(0.0..=1.0).contains(&bounds.max)
            || bounds.min > bounds.max
        {
            return Err(invalid(format!(
                "valuation.{}: bounds must lie within [0, 1] with min <= max",
                name
            )));
        }
    }

    let tolerance = valuation.settings.weight_tolerance;
    if !(tolerance > 0.0 && tolerance < 0.5) {
        return Err(invalid(
            "valuation.weight_tolerance must be within (0, 0.5)",
        ));
    }

    if !(0.0..1.0).contains(&valuation.fair_band) {
        return Err(invalid("valuation.fair_band must be within [0, 1)"));
    }

    if !valuation.tax_rate_per_thousand.is_finite() || valuation.tax_rate_per_thousand < 0.0 {
        return Err(invalid(
            "valuation.tax_rate_per_thousand must be a non-negative number",
        ));
    }

    Ok(())
}
