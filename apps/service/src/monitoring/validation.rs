//! Range checks for probe and schedule settings.

use anyhow::{Result, anyhow};

/// Validate a router target: an IP literal or a host name
pub fn validate_router_target(target: &str) -> Result<()> {
    if target.trim().is_empty() {
        return Err(anyhow!("Router target must not be empty"));
    }

    if target.chars().any(char::is_whitespace) {
        return Err(anyhow!("Router target contains whitespace: {:?}", target));
    }

    Ok(())
}

/// Validate the number of pings per router check
pub fn validate_ping_count(count: u32) -> Result<()> {
    const MIN_COUNT: u32 = 1;
    const MAX_COUNT: u32 = 100;

    if !(MIN_COUNT..=MAX_COUNT).contains(&count) {
        return Err(anyhow!(
            "Ping count out of range: {} (allowed: {}..={})",
            count,
            MIN_COUNT,
            MAX_COUNT
        ));
    }

    Ok(())
}

/// Validate check interval
pub fn validate_check_interval(interval_minutes: u64) -> Result<()> {
    const MIN_INTERVAL: u64 = 1;
    const MAX_INTERVAL: u64 = 1440; // 24 hours

    if interval_minutes < MIN_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} minutes (minimum: {})",
            interval_minutes,
            MIN_INTERVAL
        ));
    }

    if interval_minutes > MAX_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} minutes (maximum: {})",
            interval_minutes,
            MAX_INTERVAL
        ));
    }

    Ok(())
}

/// Validate timeout is reasonable
pub fn validate_timeout(name: &str, timeout_seconds: u64, max_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "{} too short: {} seconds (minimum: {})",
            name,
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > max_seconds {
        return Err(anyhow!(
            "{} too long: {} seconds (maximum: {})",
            name,
            timeout_seconds,
            max_seconds
        ));
    }

    Ok(())
}
