use super::types::{CheckResult, CheckType};

/// A single kind of network measurement.
///
/// Probes never fail past this boundary: every problem they run into is
/// folded into the returned `CheckResult` as `reachable = false` plus an
/// error message.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    /// Kind of check this probe produces
    fn check_type(&self) -> CheckType;

    /// Perform the measurement
    async fn probe(&self) -> CheckResult;
}
