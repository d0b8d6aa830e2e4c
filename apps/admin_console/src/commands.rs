use std::io::Write;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use client_core::{
    dashboard::fetch_summary, ConfirmGate, DeleteOutcome, LoadOutcome, Resource,
    ResourceSynchronizer, SyncError, SyncEvent, Transport,
};
use dialoguer::Confirm;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Splits a `name=value` filter argument.
pub fn parse_filter(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("filter '{raw}' must look like name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("filter '{raw}' has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Asks on the terminal before anything is deleted.
pub struct PromptGate;

#[async_trait]
impl ConfirmGate for PromptGate {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await;
        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(err)) => {
                warn!(error = %err, "console: confirmation prompt failed");
                false
            }
            Err(err) => {
                warn!(error = %err, "console: confirmation prompt task failed");
                false
            }
        }
    }
}

pub fn log_events(mut events: broadcast::Receiver<SyncEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "console: sync event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "console: sync events lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn loaded<R: Resource>(outcome: LoadOutcome) -> Result<usize> {
    match outcome {
        LoadOutcome::Ready { records } => Ok(records),
        LoadOutcome::Failed(err) => {
            Err(err).with_context(|| format!("failed to load {}", R::NAME))
        }
        LoadOutcome::Superseded => bail!("{} load was superseded", R::NAME),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub json: bool,
    /// Also print the selectable values of each filter.
    pub domains: bool,
}

pub async fn list<R>(
    sync: &ResourceSynchronizer<R>,
    filters: &[(String, String)],
    options: ListOptions,
    out: &mut dyn Write,
) -> Result<()>
where
    R: Resource + Serialize,
{
    for (name, value) in filters {
        sync.set_filter(name, value).await.with_context(|| {
            format!(
                "{} filters are: {}",
                R::NAME,
                sync.filter_names().join(", ")
            )
        })?;
    }
    let total = loaded::<R>(sync.load().await?)?;
    let view = sync.derived_view().await;

    if options.json {
        serde_json::to_writer_pretty(&mut *out, &view)?;
        writeln!(out)?;
        return Ok(());
    }
    for record in &view {
        writeln!(out, "{}", record.label())?;
    }
    writeln!(out, "{} of {total} {}", view.len(), R::NAME)?;

    if options.domains {
        for domain in sync.domains().await {
            let values: Vec<String> = domain
                .options
                .iter()
                .map(|(value, label)| {
                    if value == label {
                        value.clone()
                    } else {
                        format!("{value} ({label})")
                    }
                })
                .collect();
            writeln!(out, "{}: {}", domain.filter, values.join(", "))?;
        }
    }
    Ok(())
}

fn report_write<R: Resource>(verb: &str, outcome: LoadOutcome, out: &mut dyn Write) -> Result<()> {
    match outcome {
        LoadOutcome::Ready { records } => {
            writeln!(out, "{} record {verb}; {records} now loaded", R::NAME)?
        }
        LoadOutcome::Failed(err) => {
            warn!(resource = R::NAME, error = %err, "console: reload after write failed");
            writeln!(
                out,
                "{} record {verb}, but reloading failed: {}",
                R::NAME,
                err.user_message()
            )?
        }
        LoadOutcome::Superseded => writeln!(out, "{} record {verb}", R::NAME)?,
    }
    Ok(())
}

pub async fn create<R: Resource>(
    sync: &ResourceSynchronizer<R>,
    data: &str,
    out: &mut dyn Write,
) -> Result<()> {
    if sync.endpoint().create_path().is_none() {
        return Err(SyncError::Unsupported {
            resource: R::NAME,
            operation: "create",
        }
        .into());
    }
    let payload: R::Payload = serde_json::from_str(data)
        .with_context(|| format!("invalid {} payload", R::NAME))?;
    let outcome = sync.create(&payload).await?;
    report_write::<R>("created", outcome, out)
}

pub async fn update<R: Resource>(
    sync: &ResourceSynchronizer<R>,
    id: i64,
    data: &str,
    out: &mut dyn Write,
) -> Result<()> {
    let key = R::Key::from(id);
    if sync.endpoint().update_path(key).is_none() {
        return Err(SyncError::Unsupported {
            resource: R::NAME,
            operation: "update",
        }
        .into());
    }
    let payload: R::Payload = serde_json::from_str(data)
        .with_context(|| format!("invalid {} payload", R::NAME))?;
    let outcome = sync.update(key, &payload).await?;
    report_write::<R>("updated", outcome, out)
}

/// Loads the collection so the key can be checked, then deletes behind `gate`.
pub async fn delete<R: Resource>(
    sync: &ResourceSynchronizer<R>,
    id: i64,
    gate: &dyn ConfirmGate,
    out: &mut dyn Write,
) -> Result<()> {
    loaded::<R>(sync.load().await?)?;
    match sync.remove(R::Key::from(id), gate).await? {
        DeleteOutcome::Deleted => writeln!(out, "deleted {} #{id}", R::NAME)?,
        DeleteOutcome::Cancelled => writeln!(out, "delete cancelled")?,
    }
    Ok(())
}

pub async fn dashboard(transport: &dyn Transport, json: bool, out: &mut dyn Write) -> Result<()> {
    let summary = fetch_summary(transport).await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &summary)?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "users:                {}", summary.total_users)?;
    writeln!(out, "providers:            {}", summary.total_providers)?;
    writeln!(out, "active providers:     {}", summary.total_active_providers)?;
    writeln!(out, "jobs:                 {}", summary.total_jobs)?;
    writeln!(out, "job requests:         {}", summary.total_job_requests)?;
    writeln!(out, "provider services:    {}", summary.total_provider_services)?;
    writeln!(out, "reviews:              {}", summary.total_reviews)?;
    writeln!(out, "active subscriptions: {}", summary.active_subscriptions)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
