//! Background campaign dispatcher.
//!
//! One poll loop promotes due scheduled campaigns and makes sure every
//! `sending` campaign has exactly one runner task in this process. A runner
//! works through its campaign's delivery queue, pacing sends with a
//! `Throttle` and retrying temporary failures with a `RetryPolicy`.
//!
//! Runners re-read the campaign status before every send, so pause and
//! cancel take effect at the next message. Shutdown is signalled through a
//! `watch` channel; runners finish the send in progress and stop.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::{
        campaign::{Campaign, CampaignEvent, CampaignStatus, personalize},
        delivery::Delivery,
        smtp_account::SmtpAccount,
    },
    services::{
        campaign_service, delivery_service,
        mailer::{MailError, Mailer, MailerFactory, OutgoingEmail},
        throttle::{RetryPolicy, Throttle},
    },
};

/// What to do with a delivery whose send failed.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Retry { next_attempt_at: DateTime<Utc> },
    DeadLetter,
}

/// Temporary failures retry with backoff until attempts run out; anything
/// else is dead-lettered right away.
pub fn classify_failure(
    attempts: u32,
    error: &MailError,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> DeliveryOutcome {
    if !error.is_retryable() {
        return DeliveryOutcome::DeadLetter;
    }
    match policy.backoff(attempts) {
        Some(delay) => DeliveryOutcome::Retry {
            next_attempt_at: now + delay,
        },
        None => DeliveryOutcome::DeadLetter,
    }
}

/// Build the message for one delivery, merge tags applied.
pub fn compose(campaign: &Campaign, account: &SmtpAccount, delivery: &Delivery) -> OutgoingEmail {
    let name = delivery.name.as_deref();
    let render = |template: &str| personalize(template, &delivery.email, name);

    OutgoingEmail {
        from: account.from_email.clone(),
        from_name: account.from_name.clone(),
        to: delivery.email.clone(),
        to_name: delivery.name.clone(),
        subject: render(&campaign.subject),
        html: campaign.body_html.as_deref().map(render),
        text: campaign.body_text.as_deref().map(render),
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the caller should stop.
async fn sleep_or_shutdown(
    duration: std::time::Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let closed = tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err(),
    };
    closed || *shutdown.borrow()
}

fn bounded(wait: chrono::Duration, cap: std::time::Duration) -> std::time::Duration {
    wait.to_std().unwrap_or_default().min(cap)
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: DbPool,
    mailers: Arc<dyn MailerFactory>,
    retry: RetryPolicy,
    poll_interval: std::time::Duration,
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new(pool: DbPool, mailers: Arc<dyn MailerFactory>, config: &Config) -> Self {
        Self {
            pool,
            mailers,
            retry: RetryPolicy::new(config.dispatch_max_attempts, config.retry_base_secs()),
            poll_interval: config.dispatch_poll_interval(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until `shutdown` flips to `true`, then wait for the runners.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut runners = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(poll_interval = ?self.poll_interval, "dispatcher started");

        loop {
            let tick = tokio::select! {
                _ = ticker.tick() => true,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    false
                }
            };
            if *shutdown.borrow() {
                break;
            }
            if tick {
                if let Err(e) = self.poll(&mut runners, &shutdown).await {
                    tracing::error!("dispatcher poll failed: {:?}", e);
                }
            }

            while let Some(joined) = runners.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("campaign runner panicked: {:?}", e);
                }
            }
        }

        tracing::info!(runners = runners.len(), "dispatcher stopping");
        while runners.join_next().await.is_some() {}
        tracing::info!("dispatcher stopped");
    }

    async fn poll(
        &self,
        runners: &mut JoinSet<()>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        let promoted = campaign_service::promote_due_scheduled(&self.pool, Utc::now()).await?;
        if !promoted.is_empty() {
            tracing::info!(count = promoted.len(), "scheduled campaigns started");
        }

        for campaign_id in delivery_service::sending_campaign_ids(&self.pool).await? {
            if !self.active.lock().await.insert(campaign_id) {
                continue;
            }

            let runner = CampaignRunner {
                pool: self.pool.clone(),
                mailers: self.mailers.clone(),
                retry: self.retry,
                poll_interval: self.poll_interval,
                campaign_id,
                shutdown: shutdown.clone(),
            };
            let active = self.active.clone();

            runners.spawn(async move {
                if let Err(e) = runner.run().await {
                    tracing::error!(campaign_id = %campaign_id, "campaign runner failed: {:?}", e);
                }
                active.lock().await.remove(&campaign_id);
            });
        }

        Ok(())
    }
}

/// Sends the queue of a single campaign.
struct CampaignRunner {
    pool: DbPool,
    mailers: Arc<dyn MailerFactory>,
    retry: RetryPolicy,
    poll_interval: std::time::Duration,
    campaign_id: Uuid,
    shutdown: watch::Receiver<bool>,
}

impl CampaignRunner {
    async fn fail(&self, reason: &str) -> Result<(), AppError> {
        tracing::warn!(campaign_id = %self.campaign_id, reason, "campaign failed");
        delivery_service::close_campaign(
            &self.pool,
            self.campaign_id,
            CampaignEvent::Fail,
            Some(reason),
        )
        .await?;
        Ok(())
    }

    async fn run(mut self) -> Result<(), AppError> {
        let campaign = delivery_service::load_campaign(&self.pool, self.campaign_id).await?;
        if campaign.status != CampaignStatus::Sending {
            return Ok(());
        }

        let account = sqlx::query_as::<_, SmtpAccount>("SELECT * FROM smtp_accounts WHERE id = $1")
            .bind(campaign.smtp_account_id)
            .fetch_optional(&self.pool)
            .await?;
        let account = match account {
            Some(account) if account.is_active => account,
            _ => return self.fail("SMTP account is missing or inactive").await,
        };

        let mailer: Arc<dyn Mailer> = match account
            .settings()
            .map_err(|e| e.to_string())
            .and_then(|s| self.mailers.build(&s).map_err(|e| e.to_string()))
        {
            Ok(mailer) => mailer,
            Err(reason) => return self.fail(&reason).await,
        };

        let mut throttle = Throttle::new(campaign.delay_seconds, campaign.speed_limit_per_hour);
        throttle.seed(
            delivery_service::recent_sent_times(&self.pool, self.campaign_id, Utc::now()).await?,
        );

        tracing::info!(campaign_id = %self.campaign_id, "campaign runner started");

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let status = delivery_service::load_campaign(&self.pool, self.campaign_id)
                .await?
                .status;
            if status != CampaignStatus::Sending {
                tracing::info!(campaign_id = %self.campaign_id, %status, "campaign runner stopped");
                return Ok(());
            }

            let now = Utc::now();
            let wait = throttle.wait_time(now);
            if wait > chrono::Duration::zero() {
                if sleep_or_shutdown(bounded(wait, self.poll_interval), &mut self.shutdown).await {
                    return Ok(());
                }
                continue;
            }

            let Some(delivery) =
                delivery_service::claim_next_due(&self.pool, self.campaign_id, now).await?
            else {
                if delivery_service::outstanding_count(&self.pool, self.campaign_id).await? == 0 {
                    delivery_service::close_campaign(
                        &self.pool,
                        self.campaign_id,
                        CampaignEvent::Finish,
                        None,
                    )
                    .await?;
                    tracing::info!(campaign_id = %self.campaign_id, "campaign completed");
                    return Ok(());
                }

                let until_next = delivery_service::earliest_next_attempt(&self.pool, self.campaign_id)
                    .await?
                    .map(|at| at - now)
                    .unwrap_or_else(|| chrono::Duration::seconds(1));
                if sleep_or_shutdown(bounded(until_next, self.poll_interval), &mut self.shutdown)
                    .await
                {
                    return Ok(());
                }
                continue;
            };

            let email = compose(&campaign, &account, &delivery);
            let result = mailer.send(&email).await;
            let finished_at = Utc::now();
            throttle.record(finished_at);

            match result {
                Ok(receipt) => {
                    delivery_service::mark_sent(&self.pool, &delivery, &receipt.message_id, finished_at)
                        .await?;
                    tracing::debug!(
                        campaign_id = %self.campaign_id,
                        delivery_id = %delivery.id,
                        message_id = %receipt.message_id,
                        "delivery sent"
                    );
                }
                Err(err) if err.is_fatal_for_campaign() => {
                    delivery_service::release(&self.pool, &delivery).await?;
                    return self.fail(&err.to_string()).await;
                }
                Err(err) => {
                    let attempts = u32::try_from(delivery.attempts).unwrap_or(u32::MAX);
                    let reason = err.to_string();
                    match classify_failure(attempts, &err, &self.retry, finished_at) {
                        DeliveryOutcome::Retry { next_attempt_at } => {
                            tracing::warn!(
                                delivery_id = %delivery.id,
                                attempts,
                                %next_attempt_at,
                                "delivery failed, will retry: {}",
                                reason
                            );
                            delivery_service::schedule_retry(
                                &self.pool,
                                &delivery,
                                &reason,
                                next_attempt_at,
                            )
                            .await?;
                        }
                        DeliveryOutcome::DeadLetter => {
                            tracing::warn!(
                                delivery_id = %delivery.id,
                                attempts,
                                "delivery dead-lettered: {}",
                                reason
                            );
                            delivery_service::dead_letter(&self.pool, &delivery, &reason).await?;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::models::delivery::DeliveryStatus;
    use crate::models::smtp_account::SmtpEncryption;
    use crate::services::mailer::mock::MockMailerFactory;
    use crate::test_support;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_temporary_failure_retries_with_backoff() {
        let policy = RetryPolicy::new(3, 30);
        let err = MailError::Temporary("421 try again".into());

        assert_eq!(
            classify_failure(1, &err, &policy, now()),
            DeliveryOutcome::Retry {
                next_attempt_at: now() + Duration::seconds(30)
            }
        );
        assert_eq!(
            classify_failure(2, &err, &policy, now()),
            DeliveryOutcome::Retry {
                next_attempt_at: now() + Duration::seconds(60)
            }
        );
    }

    #[test]
    fn test_exhausted_attempts_dead_letter() {
        let policy = RetryPolicy::new(3, 30);
        let err = MailError::Temporary("421 try again".into());
        assert_eq!(
            classify_failure(3, &err, &policy, now()),
            DeliveryOutcome::DeadLetter
        );
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let policy = RetryPolicy::new(5, 30);
        for err in [
            MailError::Permanent("550 no such user".into()),
            MailError::InvalidAddress("bad".into()),
        ] {
            assert_eq!(
                classify_failure(1, &err, &policy, now()),
                DeliveryOutcome::DeadLetter
            );
        }
    }

    #[test]
    fn test_compose_personalizes_every_part() {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Launch".into(),
            subject: "Hi {{name}}".into(),
            body_html: Some("<p>Sent to {{email}}</p>".into()),
            body_text: None,
            recipient_list_id: Uuid::new_v4(),
            smtp_account_id: Uuid::new_v4(),
            scheduled_at: None,
            delay_seconds: 0,
            speed_limit_per_hour: None,
            status: CampaignStatus::Sending,
            sent_count: 0,
            failed_count: 0,
            last_error: None,
            started_at: Some(now()),
            completed_at: None,
            created_at: now(),
            updated_at: now(),
        };
        let account = SmtpAccount {
            id: campaign.smtp_account_id,
            user_id: campaign.user_id,
            name: "Relay".into(),
            host: "smtp.example.com".into(),
            port: 587,
            encryption: SmtpEncryption::Starttls,
            username: None,
            password: None,
            from_email: "news@example.com".into(),
            from_name: Some("News".into()),
            is_active: true,
            created_at: now(),
            updated_at: now(),
        };
        let delivery = Delivery {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            recipient_id: Uuid::new_v4(),
            email: "ann@example.org".into(),
            name: Some("Ann".into()),
            status: DeliveryStatus::Sending,
            attempts: 1,
            next_attempt_at: now(),
            last_error: None,
            message_id: None,
            sent_at: None,
            created_at: now(),
        };

        let email = compose(&campaign, &account, &delivery);
        assert_eq!(email.subject, "Hi Ann");
        assert_eq!(email.html.as_deref(), Some("<p>Sent to ann@example.org</p>"));
        assert_eq!(email.text, None);
        assert_eq!(email.from, "news@example.com");
        assert_eq!(email.to_name.as_deref(), Some("Ann"));
    }

    #[test]
    fn test_bounded_wait() {
        let cap = std::time::Duration::from_secs(5);
        assert_eq!(bounded(Duration::seconds(2), cap), std::time::Duration::from_secs(2));
        assert_eq!(bounded(Duration::minutes(10), cap), cap);
        assert_eq!(bounded(Duration::seconds(-3), cap), std::time::Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sleep_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(sleep_or_shutdown(std::time::Duration::from_secs(60), &mut rx).await);
    }

    /// Started campaign of an admin tenant, so plan limits stay out of the way.
    async fn started_campaign(pool: &DbPool, emails: &[&str]) -> Uuid {
        let auth = test_support::admin(pool).await;
        let smtp = test_support::smtp_account(pool, auth.user_id).await;
        let list = test_support::list_with(pool, auth.user_id, emails).await;
        let id = test_support::campaign(pool, auth.user_id, list, smtp).await;
        campaign_service::start_campaign(pool, &auth, id).await.unwrap();
        id
    }

    fn runner(
        pool: &DbPool,
        mailers: &MockMailerFactory,
        campaign_id: Uuid,
        retry: RetryPolicy,
    ) -> (CampaignRunner, watch::Sender<bool>) {
        let (stop, shutdown) = watch::channel(false);
        let runner = CampaignRunner {
            pool: pool.clone(),
            mailers: Arc::new(mailers.clone()),
            retry,
            poll_interval: std::time::Duration::from_millis(20),
            campaign_id,
            shutdown,
        };
        (runner, stop)
    }

    #[sqlx::test]
    async fn test_runner_sends_queue_and_completes(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org", "b@example.org"]).await;
        let mailers = MockMailerFactory::new();
        let (runner, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));

        runner.run().await.unwrap();

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent_count, 2);
        assert!(campaign.completed_at.is_some());

        let deliveries = test_support::deliveries(&pool, id).await;
        assert!(deliveries.iter().all(|d| d.status == DeliveryStatus::Sent));
        assert!(deliveries.iter().all(|d| d.message_id.is_some()));

        let mut to: Vec<String> = mailers.sent().into_iter().map(|e| e.to).collect();
        to.sort();
        assert_eq!(to, vec!["a@example.org", "b@example.org"]);
        assert_eq!(mailers.settings_seen()[0].host, "smtp.example.com");
    }

    #[sqlx::test]
    async fn test_runner_dead_letters_permanent_failure(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org", "b@example.org"]).await;
        let mailers = MockMailerFactory::new();
        mailers.fail_next(MailError::Permanent("550 no such user".into()));
        let (runner, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));

        runner.run().await.unwrap();

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent_count, 1);
        assert_eq!(campaign.failed_count, 1);

        let failed: Vec<_> = test_support::deliveries(&pool, id)
            .await
            .into_iter()
            .filter(|d| d.status == DeliveryStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
        assert!(failed[0].last_error.as_deref().unwrap().contains("550"));
    }

    #[sqlx::test]
    async fn test_runner_dead_letters_after_last_attempt(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org"]).await;
        let mailers = MockMailerFactory::new();
        mailers.fail_next(MailError::Temporary("421 busy".into()));
        let (runner, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(1, 30));

        runner.run().await.unwrap();

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.failed_count, 1);
        assert_eq!(
            test_support::deliveries(&pool, id).await[0].status,
            DeliveryStatus::Failed
        );
    }

    #[sqlx::test]
    async fn test_runner_schedules_retry_for_temporary_failure(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org"]).await;
        let mailers = MockMailerFactory::new();
        mailers.fail_next(MailError::Temporary("421 busy".into()));
        let (runner, stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 600));

        let before = Utc::now();
        let handle = tokio::spawn(runner.run());

        let mut retried = None;
        for _ in 0..200 {
            let delivery = test_support::deliveries(&pool, id).await.remove(0);
            if delivery.status == DeliveryStatus::Pending && delivery.last_error.is_some() {
                retried = Some(delivery);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let delivery = retried.expect("delivery was not rescheduled");
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.next_attempt_at >= before + Duration::seconds(599));
        assert!(delivery.last_error.unwrap().contains("421"));

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Sending);
        assert_eq!(campaign.failed_count, 0);
        assert!(mailers.sent().is_empty());
    }

    #[sqlx::test]
    async fn test_transport_error_fails_campaign_and_keeps_queue(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org", "b@example.org"]).await;
        let mailers = MockMailerFactory::new();
        mailers.fail_next(MailError::Configuration("STARTTLS refused".into()));
        let (runner, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));

        runner.run().await.unwrap();

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert!(campaign.last_error.as_deref().unwrap().contains("STARTTLS refused"));

        let deliveries = test_support::deliveries(&pool, id).await;
        assert!(
            deliveries
                .iter()
                .all(|d| d.status == DeliveryStatus::Pending && d.attempts == 0)
        );
    }

    #[sqlx::test]
    async fn test_inactive_account_fails_campaign(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org"]).await;
        sqlx::query("UPDATE smtp_accounts SET is_active = false")
            .execute(&pool)
            .await
            .unwrap();
        let mailers = MockMailerFactory::new();
        let (runner, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));

        runner.run().await.unwrap();

        let campaign = test_support::campaign_row(&pool, id).await;
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert_eq!(
            campaign.last_error.as_deref(),
            Some("SMTP account is missing or inactive")
        );
        assert!(mailers.sent().is_empty());
    }

    #[sqlx::test]
    async fn test_paused_campaign_waits_for_resume(pool: DbPool) {
        let id = started_campaign(&pool, &["a@example.org", "b@example.org"]).await;
        let owner = test_support::campaign_row(&pool, id).await.user_id;
        campaign_service::control_campaign(&pool, owner, id, CampaignEvent::Pause)
            .await
            .unwrap();

        let mailers = MockMailerFactory::new();
        let (paused, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));
        paused.run().await.unwrap();

        assert!(mailers.sent().is_empty());
        assert_eq!(
            test_support::campaign_row(&pool, id).await.status,
            CampaignStatus::Paused
        );

        campaign_service::control_campaign(&pool, owner, id, CampaignEvent::Resume)
            .await
            .unwrap();
        let (resumed, _stop) = runner(&pool, &mailers, id, RetryPolicy::new(3, 30));
        resumed.run().await.unwrap();

        assert_eq!(mailers.sent().len(), 2);
        assert_eq!(
            test_support::campaign_row(&pool, id).await.status,
            CampaignStatus::Completed
        );
    }
}
