//! Scheduled publishing
//!
//! A [`Scheduler`] sweep repairs credentials that are about to lapse, then
//! publishes every scheduled post that has fallen due. Each due post is
//! claimed with a conditional `scheduled -> publishing` update first, so
//! concurrent sweepers never publish the same post twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::service::events::Event;
use crate::service::posting::FanOutOrigin;
use crate::service::CrosspostService;
use crate::types::{Account, Post, PostStatus};

/// Accounts expiring within this margin are refreshed ahead of time
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Exchanges an account's refresh token for fresh credentials
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh and persist the account's tokens, returning the updated row
    async fn refresh(&self, account: &Account) -> Result<Account>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub due: usize,
    pub published: usize,
    pub partial: usize,
    pub failed: usize,
    /// Due posts another sweeper claimed first
    pub skipped: usize,
    pub refreshed: usize,
    pub expired: usize,
}

pub struct Scheduler {
    service: CrosspostService,
    refresher: Option<Arc<dyn TokenRefresher>>,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(service: CrosspostService) -> Self {
        Self {
            service,
            refresher: None,
            concurrency: 4,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Due posts published in parallel per sweep
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one sweep as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        self.repair_credentials(now, &mut report).await?;

        let due = self
            .service
            .database()
            .get_scheduled_posts_due(now.timestamp())
            .await?;
        report.due = due.len();
        if due.is_empty() {
            return Ok(report);
        }
        info!(count = due.len(), "Publishing due scheduled posts");

        let outcomes: Vec<Result<Option<(PostStatus, usize)>>> = stream::iter(due)
            .map(|post| self.publish_due(post))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(Some((status, expired))) => {
                    report.expired += expired;
                    match status {
                        PostStatus::Published => report.published += 1,
                        PostStatus::PartialSuccess => report.partial += 1,
                        _ => report.failed += 1,
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(error = %e, "Scheduled post could not be processed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Claim and publish one due post. `None` when the claim was lost.
    async fn publish_due(&self, post: Post) -> Result<Option<(PostStatus, usize)>> {
        let db = self.service.database();
        if !db.claim_scheduled_post(&post.id).await? {
            debug!(post_id = %post.id, "Scheduled post already claimed");
            return Ok(None);
        }
        let Some(mut post) = db.get_post_by_id(&post.id).await? else {
            return Ok(None);
        };

        let expired = match self
            .service
            .posting()
            .fan_out(&mut post, FanOutOrigin::Scheduled)
            .await
        {
            Ok(fan_out) => fan_out.expired_accounts.len(),
            Err(e) => {
                error!(post_id = %post.id, error = %e, "Scheduled publish failed");
                post.status = PostStatus::Failed;
                post.error_log = Some(e.to_string());
                0
            }
        };

        let touched = post.platforms.clone();
        self.service.context().save_step(&mut post, &touched).await?;
        Ok(Some((post.status, expired)))
    }

    /// Refresh credentials close to expiry; flag the ones that can't be
    async fn repair_credentials(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let accounts = self.service.accounts();
        let expiring = accounts
            .accounts_expiring_before(now.timestamp() + REFRESH_MARGIN_SECS)
            .await?;

        for account in expiring {
            let lapsed = account.expires_at.is_some_and(|at| at <= now.timestamp());

            match (&self.refresher, &account.refresh_token) {
                (Some(refresher), Some(_)) => match refresher.refresh(&account).await {
                    Ok(_) => {
                        info!(account_id = %account.id, platform = %account.platform, "Refreshed account token");
                        report.refreshed += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(account_id = %account.id, platform = %account.platform, error = %e, "Token refresh failed");
                    }
                },
                _ if !lapsed => continue,
                _ => {}
            }

            accounts.mark_expired(&account.id).await?;
            self.service.events().emit(Event::AccountExpired {
                account_id: account.id.clone(),
                platform: account.platform,
            });
            report.expired += 1;
        }
        Ok(())
    }

    /// Sweep every `interval` until `shutdown` flips to `true` or its
    /// sender is dropped. A failing sweep is logged and retried next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?interval, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(report) if report.due > 0 || report.expired > 0 || report.refreshed > 0 => {
                            info!(?report, "Sweep complete");
                        }
                        Ok(_) => debug!("Sweep complete, nothing due"),
                        Err(e) => error!(error = %e, "Sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}
