use shared::protocol::DashboardSummary;
use tracing::info;

use crate::{catalog::endpoints::DASHBOARD, error::SyncError, transport::Transport};

/// One-shot read of the dashboard counters.
pub async fn fetch_summary(transport: &dyn Transport) -> Result<DashboardSummary, SyncError> {
    let raw = transport.get(DASHBOARD, &[]).await?;
    let summary: DashboardSummary =
        serde_json::from_value(raw).map_err(|e| SyncError::Decode {
            path: DASHBOARD.to_string(),
            reason: e.to_string(),
        })?;
    info!(
        users = summary.total_users,
        providers = summary.total_providers,
        jobs = summary.total_jobs,
        "dashboard: summary loaded"
    );
    Ok(summary)
}
