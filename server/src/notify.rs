use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use trip_safety_data_management::SessionStore;
use trip_safety_lib::{emergency_alert::EmergencyAlert, error::TrackingError};

use crate::{broadcast::SessionEvent, engine::alerts::mark_contacts_notified};

/// One fan-out to the notification service. The service resolves the
/// recipients' emergency contact lists itself; the engine does not own
/// contact data.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyRequest {
    pub trip_id: i64,
    pub alert: EmergencyAlert,
    pub recipients: Vec<String>,
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, request: &NotifyRequest) -> impl Future<Output = Result<(), TrackingError>> + Send;
}

/// Production notifier: POSTs the alert to the notification service.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

impl Notifier for HttpNotifier {
    async fn notify(&self, request: &NotifyRequest) -> Result<(), TrackingError> {
        self.client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| TrackingError::Unavailable(format!("notification service: {err}")))?;
        Ok(())
    }
}

/// A dispatch that failed its inline attempt, parked for redelivery.
#[derive(Debug, Clone, Copy)]
pub struct NotifyJob {
    pub trip_id: i64,
    pub alert_id: i64,
}

/// Spawns the redelivery worker and hands back its queue. The worker owns
/// the slow path so a flaky notification service never slows down an SOS
/// request; the alert record itself is already durable by the time a job
/// lands here.
pub fn spawn_retry_worker<N: Notifier>(
    store: SessionStore,
    notifier: Arc<N>,
    events: broadcast::Sender<SessionEvent>,
    retry_limit: u32,
    base_delay: Duration,
) -> mpsc::UnboundedSender<NotifyJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<NotifyJob>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            redeliver(&store, notifier.as_ref(), &events, job, retry_limit, base_delay).await;
        }
        tracing::debug!("Notification retry queue closed");
    });

    tx
}

async fn redeliver<N: Notifier>(
    store: &SessionStore,
    notifier: &N,
    events: &broadcast::Sender<SessionEvent>,
    job: NotifyJob,
    retry_limit: u32,
    base_delay: Duration,
) {
    for attempt in 0..retry_limit {
        tokio::time::sleep(backoff_delay(base_delay, attempt)).await;

        let session = match store.get_session(job.trip_id).await {
            Ok(session) => session,
            // Trip deleted underneath us, nothing left to deliver.
            Err(TrackingError::NotFound(_)) => return,
            Err(err) => {
                tracing::warn!("Retry {} could not load trip {}: {}", attempt, job.trip_id, err);
                continue;
            }
        };

        let Ok(alert) = session.alert(job.alert_id) else {
            return;
        };
        if alert.resolved {
            // Incident was resolved before delivery went through.
            return;
        }
        let Ok(participant) = session.participant(&alert.raised_by) else {
            return;
        };
        if participant.emergency_contacts_notified {
            return;
        }

        let request = NotifyRequest {
            trip_id: job.trip_id,
            recipients: vec![session.organizer_id.clone(), alert.raised_by.clone()],
            alert: alert.clone(),
        };

        match notifier.notify(&request).await {
            Ok(()) => {
                if let Err(err) = mark_contacts_notified(store, events, job.trip_id, job.alert_id).await {
                    tracing::warn!(
                        "Delivered alert {} for trip {} but could not record it: {}",
                        job.alert_id, job.trip_id, err
                    );
                }
                return;
            }
            Err(err) => {
                tracing::warn!(
                    "Notification retry {} for alert {} on trip {} failed: {}",
                    attempt, job.alert_id, job.trip_id, err
                );
            }
        }
    }

    tracing::error!(
        "Giving up on notification delivery for alert {} on trip {} after {} attempts; the alert record remains",
        job.alert_id, job.trip_id, retry_limit
    );
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::rng().random_range(0..base.as_millis().max(1) as u64);
    base.saturating_mul(2u32.saturating_pow(attempt)) + Duration::from_millis(jitter_ms)
}
