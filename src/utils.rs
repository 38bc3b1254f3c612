use crate::error::HarvestError;
use std::time::Duration;
use url::Url;

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_rate(value: f64) -> String {
    format!("{value:.1}%")
}

/// Parse `address` and accept only http and https.
pub fn validate_url(address: &str) -> Result<Url, HarvestError> {
    let parsed =
        Url::parse(address).map_err(|e| HarvestError::InvalidUrl(format!("{address}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(HarvestError::InvalidUrl(format!(
            "{address}: unsupported scheme '{scheme}'"
        ))),
    }
}

pub fn extract_domain(address: &str) -> Option<String> {
    Url::parse(address)
        .ok()
        .and_then(|u| u.domain().map(|d| d.to_string()))
}

/// Parse a URL list: one address per line, blank lines and `#` comments skipped.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
