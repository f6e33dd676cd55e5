//! Subscription workflow state machine.
//!
//! The controller owns the step, the selections, the token and the in-flight
//! marker. Remote calls happen with no lock held; their outcome is applied in a
//! single critical section together with releasing the in-flight marker.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Utc};
use shared::domain::{PostalCode, Step, SubscriptionToken};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    config::ApiBase,
    directory::{HttpPostalDirectory, PostalDirectory},
    error::{ConfigError, WorkflowError},
    subscription::{HttpSubscriptionClient, SubscriptionApi},
    transport::http_client,
};

/// How long a queued token stays redeemable on the service side.
pub const PENDING_TOKEN_TTL_MINUTES: i64 = 5;
/// How long a validated subscription stays active on the service side.
pub const ACTIVE_SUBSCRIPTION_TTL_HOURS: i64 = 24;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowAction {
    LoadPostalCodes,
    SelectPostal,
    SelectEmail,
    Queue,
    Validate,
    Remove,
    GoBack,
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowAction::LoadPostalCodes => "load_postal_codes",
            WorkflowAction::SelectPostal => "select_postal",
            WorkflowAction::SelectEmail => "select_email",
            WorkflowAction::Queue => "queue",
            WorkflowAction::Validate => "validate",
            WorkflowAction::Remove => "remove",
            WorkflowAction::GoBack => "go_back",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkflowState {
    pub step: Step,
    pub selected_postal: Option<PostalCode>,
    pub selected_email: String,
    pub token: Option<SubscriptionToken>,
    /// True strictly while a queue call is outstanding.
    pub is_submitting: bool,
    pub in_flight: Option<WorkflowAction>,
    /// Local estimate of when the token (pending) or subscription (active)
    /// lapses on the service side. Advisory only.
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    PostalCodesLoaded { count: usize },
    StepChanged { from: Step, to: Step },
    ActionSucceeded { action: WorkflowAction, detail: String },
    ActionFailed { action: WorkflowAction, message: String },
}

#[derive(Default)]
struct Session {
    step: Step,
    postal_codes: Vec<PostalCode>,
    selected_postal: Option<PostalCode>,
    selected_email: String,
    token: Option<SubscriptionToken>,
    in_flight: Option<WorkflowAction>,
    token_expires_at: Option<DateTime<Utc>>,
    last_detail: Option<String>,
}

impl Session {
    fn snapshot(&self) -> WorkflowState {
        WorkflowState {
            step: self.step,
            selected_postal: self.selected_postal.clone(),
            selected_email: self.selected_email.clone(),
            token: self.token.clone(),
            is_submitting: self.in_flight == Some(WorkflowAction::Queue),
            in_flight: self.in_flight,
            token_expires_at: self.token_expires_at,
            last_detail: self.last_detail.clone(),
        }
    }

    fn ensure_step(&self, action: WorkflowAction, step: Step) -> Result<(), WorkflowError> {
        if self.step != step {
            return Err(WorkflowError::InvalidStep {
                action,
                step: self.step,
            });
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), WorkflowError> {
        match self.in_flight {
            Some(current) => Err(WorkflowError::Busy(current)),
            None => Ok(()),
        }
    }

    fn held_token(&self) -> Result<SubscriptionToken, WorkflowError> {
        self.token.clone().ok_or(WorkflowError::MissingToken)
    }

    /// Moves to `Request` and forgets the previous selections, the way a fresh
    /// request form starts out.
    fn return_to_request(&mut self) {
        self.step = Step::Request;
        self.selected_postal = None;
        self.selected_email.clear();
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight marker when the owning action finishes, including when
/// its future is dropped before the remote call completes.
struct InFlight<'a> {
    session: &'a Mutex<Session>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a Mutex<Session>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    /// Releases the marker and returns the locked session so the outcome can be
    /// applied in the same critical section.
    fn settle(mut self) -> MutexGuard<'a, Session> {
        self.armed = false;
        let mut session = lock(self.session);
        session.in_flight = None;
        session
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.session).in_flight = None;
        }
    }
}

pub struct WorkflowController {
    directory: Arc<dyn PostalDirectory>,
    subscriptions: Arc<dyn SubscriptionApi>,
    session: Mutex<Session>,
    directory_load: tokio::sync::Mutex<()>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowController {
    pub fn new(
        directory: Arc<dyn PostalDirectory>,
        subscriptions: Arc<dyn SubscriptionApi>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            directory,
            subscriptions,
            session: Mutex::new(Session::default()),
            directory_load: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Builds a controller talking HTTP to the service at `base`.
    pub fn connect(base: &ApiBase) -> Result<Self, ConfigError> {
        let http = http_client()?;
        Ok(Self::new(
            Arc::new(HttpPostalDirectory::with_client(http.clone(), base)),
            Arc::new(HttpSubscriptionClient::with_client(http, base)),
        ))
    }

    pub fn state(&self) -> WorkflowState {
        self.session().snapshot()
    }

    pub fn postal_codes(&self) -> Vec<PostalCode> {
        self.session().postal_codes.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Fetches the postal directory unless a non-empty copy is already cached.
    ///
    /// An empty or failed fetch leaves the cache empty, so the next call hits
    /// the network again.
    pub async fn load_postal_codes(&self) -> Result<Vec<PostalCode>, WorkflowError> {
        let action = WorkflowAction::LoadPostalCodes;
        let cached = {
            let session = self.session();
            session
                .ensure_step(action, Step::Request)
                .map(|()| session.postal_codes.clone())
        };
        let cached = cached.map_err(|err| self.reject(action, err))?;
        if !cached.is_empty() {
            return Ok(cached);
        }

        let _load = self.directory_load.lock().await;
        let cached = self.postal_codes();
        if !cached.is_empty() {
            return Ok(cached);
        }

        let codes = self
            .directory
            .list()
            .await
            .map_err(|err| self.reject(action, err.into()))?;
        {
            let mut session = self.session();
            session.postal_codes = codes.clone();
            session.selected_postal = None;
        }
        info!(count = codes.len(), "postal directory loaded");
        self.emit(WorkflowEvent::PostalCodesLoaded { count: codes.len() });
        Ok(codes)
    }

    /// Selects a postal code from the loaded directory.
    pub fn select_postal(&self, code: &str) -> Result<PostalCode, WorkflowError> {
        let action = WorkflowAction::SelectPostal;
        let selected = {
            let mut session = self.session();
            session.ensure_step(action, Step::Request).and_then(|()| {
                let postal = session
                    .postal_codes
                    .iter()
                    .find(|postal| postal.code == code)
                    .cloned()
                    .ok_or_else(|| WorkflowError::UnknownPostalCode(code.to_string()))?;
                session.selected_postal = Some(postal.clone());
                Ok(postal)
            })
        };
        selected.map_err(|err| self.reject(action, err))
    }

    /// Stores the email verbatim. Format checks are left to the service.
    pub fn select_email(&self, email: &str) -> Result<(), WorkflowError> {
        let action = WorkflowAction::SelectEmail;
        let selected = {
            let mut session = self.session();
            session.ensure_step(action, Step::Request).map(|()| {
                session.selected_email = email.to_string();
            })
        };
        selected.map_err(|err| self.reject(action, err))
    }

    /// Queues the selected `(postal code, email)` pair and moves to
    /// `PendingValidation` with the issued token.
    pub async fn submit(&self) -> Result<SubscriptionToken, WorkflowError> {
        let action = WorkflowAction::Queue;
        let begun = {
            let mut session = self.session();
            begin_queue(&mut session)
        };
        let (postal, email) = begun.map_err(|err| self.reject(action, err))?;
        let flight = InFlight::new(&self.session);

        info!(action = %action, postal_code = %postal, "queueing subscription");
        let outcome = self.subscriptions.queue(&postal.code, &email).await;

        let mut session = flight.settle();
        match outcome {
            Ok(receipt) => {
                let from = session.step;
                session.step = Step::PendingValidation;
                session.token = Some(receipt.token.clone());
                session.token_expires_at =
                    Some(Utc::now() + Duration::minutes(PENDING_TOKEN_TTL_MINUTES));
                session.last_detail = Some(receipt.detail.clone());
                drop(session);
                self.succeed(action, from, Step::PendingValidation, receipt.detail);
                Ok(receipt.token)
            }
            Err(err) => {
                drop(session);
                Err(self.reject(action, err.into()))
            }
        }
    }

    /// Redeems the pending token, activating the subscription.
    pub async fn validate(&self) -> Result<(), WorkflowError> {
        let action = WorkflowAction::Validate;
        let begun = {
            let mut session = self.session();
            begin_token_call(&mut session, action, Step::PendingValidation)
        };
        let token = begun.map_err(|err| self.reject(action, err))?;
        let flight = InFlight::new(&self.session);

        info!(action = %action, token = %token, "validating subscription");
        let outcome = self.subscriptions.validate(&token).await;

        let mut session = flight.settle();
        match outcome {
            Ok(receipt) => {
                let from = session.step;
                session.step = Step::Active;
                session.token_expires_at =
                    Some(Utc::now() + Duration::hours(ACTIVE_SUBSCRIPTION_TTL_HOURS));
                session.last_detail = Some(receipt.detail.clone());
                drop(session);
                self.succeed(action, from, Step::Active, receipt.detail);
                Ok(())
            }
            Err(err) => {
                drop(session);
                Err(self.reject(action, err.into()))
            }
        }
    }

    /// Unsubscribes the active token and returns to `Request`.
    pub async fn remove(&self) -> Result<(), WorkflowError> {
        let action = WorkflowAction::Remove;
        let begun = {
            let mut session = self.session();
            begin_token_call(&mut session, action, Step::Active)
        };
        let token = begun.map_err(|err| self.reject(action, err))?;
        let flight = InFlight::new(&self.session);

        info!(action = %action, token = %token, "removing subscription");
        let outcome = self.subscriptions.remove(&token).await;

        let mut session = flight.settle();
        match outcome {
            Ok(receipt) => {
                let from = session.step;
                session.token = None;
                session.token_expires_at = None;
                session.last_detail = Some(receipt.detail.clone());
                session.return_to_request();
                drop(session);
                self.succeed(action, from, Step::Request, receipt.detail);
                Ok(())
            }
            Err(err) => {
                drop(session);
                Err(self.reject(action, err.into()))
            }
        }
    }

    /// Returns from `Active` to `Request` without a remote call. The token and
    /// its expiry hint are kept so the live subscription stays manageable.
    pub fn go_back(&self) -> Result<(), WorkflowError> {
        let action = WorkflowAction::GoBack;
        let moved = {
            let mut session = self.session();
            session
                .ensure_idle()
                .and_then(|()| session.ensure_step(action, Step::Active))
                .map(|()| session.return_to_request())
        };
        moved.map_err(|err| self.reject(action, err))?;
        info!(action = %action, "returned to request step");
        self.emit(WorkflowEvent::StepChanged {
            from: Step::Active,
            to: Step::Request,
        });
        Ok(())
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine; the snapshot stays authoritative.
        let _ = self.events.send(event);
    }

    fn succeed(&self, action: WorkflowAction, from: Step, to: Step, detail: String) {
        info!(action = %action, step = %to, detail = %detail, "workflow action succeeded");
        self.emit(WorkflowEvent::ActionSucceeded { action, detail });
        if from != to {
            self.emit(WorkflowEvent::StepChanged { from, to });
        }
    }

    fn reject(&self, action: WorkflowAction, err: WorkflowError) -> WorkflowError {
        warn!(action = %action, error = %err, "workflow action failed");
        self.emit(WorkflowEvent::ActionFailed {
            action,
            message: err.to_string(),
        });
        err
    }
}

fn begin_queue(session: &mut Session) -> Result<(PostalCode, String), WorkflowError> {
    session.ensure_idle()?;
    session.ensure_step(WorkflowAction::Queue, Step::Request)?;
    let postal = session
        .selected_postal
        .clone()
        .filter(|postal| !postal.code.is_empty())
        .ok_or(WorkflowError::MissingSelection)?;
    if session.selected_email.is_empty() {
        return Err(WorkflowError::MissingSelection);
    }
    session.in_flight = Some(WorkflowAction::Queue);
    Ok((postal, session.selected_email.clone()))
}

fn begin_token_call(
    session: &mut Session,
    action: WorkflowAction,
    step: Step,
) -> Result<SubscriptionToken, WorkflowError> {
    session.ensure_idle()?;
    session.ensure_step(action, step)?;
    let token = session.held_token()?;
    session.in_flight = Some(action);
    Ok(token)
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
