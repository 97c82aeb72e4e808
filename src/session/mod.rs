//! Client-side ad view session.
//!
//! ```text
//! Idle -> Loading -> LimitReached | NoAdsAvailable | Gating
//! Gating -> Ready -> Crediting -> Gating (next ad) | Exhausted
//! any -> Error, Error -> Loading on retry
//! ```
//!
//! An ad can only be credited once its dwell countdown has elapsed, and at
//! most one credit request per ad instance is ever sent. Quota checks here
//! are advisory; the server has the final word.

mod countdown;

pub use countdown::{Countdown, Tick};

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::client::RewardApi;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result, ValidationError};
use crate::model::{Ad, AdOption, User, new_id};
use crate::quota::QuotaManager;
use crate::reconcile::ProvisionalBalance;
use crate::reward::CreditReceipt;
use crate::security;
use crate::settings::PlatformSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    LimitReached,
    NoAdsAvailable,
    /// Current ad is on screen, countdown running.
    Gating,
    Ready,
    Crediting,
    Exhausted,
    /// Message fit for the user.
    Error(String),
}

pub struct AdViewSession {
    api: Arc<dyn RewardApi>,
    quota: QuotaManager,
    user_id: String,
    state: SessionState,
    user: Option<User>,
    settings: Option<PlatformSettings>,
    queue: Vec<Ad>,
    position: usize,
    /// Idempotency key of the ad instance on screen.
    view_id: Option<String>,
    run: u64,
    countdown: Countdown,
    balance: ProvisionalBalance,
}

impl AdViewSession {
    pub fn new(api: Arc<dyn RewardApi>, user_id: impl Into<String>, dwell: Duration) -> Self {
        Self::with_clock(api, user_id, dwell, Arc::new(SystemClock))
    }

    pub fn with_clock(
        api: Arc<dyn RewardApi>,
        user_id: impl Into<String>,
        dwell: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            quota: QuotaManager::new(clock),
            user_id: user_id.into(),
            state: SessionState::Idle,
            user: None,
            settings: None,
            queue: Vec::new(),
            position: 0,
            view_id: None,
            run: 0,
            countdown: Countdown::new(dwell),
            balance: ProvisionalBalance::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last known snapshot of the user.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Balance shown to the user, including a credit in flight.
    pub fn balance(&self) -> Decimal {
        self.balance.displayed()
    }

    pub fn current_ad(&self) -> Option<&Ad> {
        match self.state {
            SessionState::Gating | SessionState::Ready | SessionState::Crediting => self.queue.get(self.position),
            _ => None,
        }
    }

    /// Ads left in today's queue, the current one included.
    pub fn remaining_ads(&self) -> usize {
        self.queue.len().saturating_sub(self.position)
    }

    pub fn remaining_secs(&self) -> u64 {
        self.countdown.remaining_secs()
    }

    fn transition(&mut self, to: SessionState) {
        tracing::debug!(user_id = %self.user_id, from = ?self.state, to = ?to, "ad session transition");
        self.state = to;
    }

    fn fail(&mut self, err: &Error) {
        self.countdown.cancel();
        self.view_id = None;
        tracing::warn!(user_id = %self.user_id, error = %err, "ad session failed");
        self.transition(SessionState::Error(err.user_message()));
    }

    /// Fetches the user, the settings and the ad queue of the current tier.
    pub async fn load(&mut self) -> Result<&SessionState> {
        if matches!(
            self.state,
            SessionState::Gating | SessionState::Ready | SessionState::Crediting
        ) {
            return Err(Error::Conflict("an ad view is in progress".into()));
        }

        self.transition(SessionState::Loading);
        match self.fetch().await {
            Ok(()) => Ok(&self.state),
            Err(err) => {
                self.fail(&err);
                Err(err)
            },
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        let mut user = self.api.fetch_user(&self.user_id).await?.user;
        let settings = self.api.fetch_settings().await?;
        self.quota.roll_over(&mut user, &settings);
        security::ensure_allowed(&user)?;

        self.balance = ProvisionalBalance::new(user.balance);
        self.queue.clear();
        self.position = 0;

        if !self.quota.can_consume(&user, &settings) {
            self.user = Some(user);
            self.settings = Some(settings);
            self.transition(SessionState::LimitReached);
            return Ok(());
        }

        let mut ads = self.api.fetch_ads(user.ad_option).await?;
        ads.retain(|ad| ad.is_active && ad.kind == user.ad_option);
        self.queue = ads;
        self.user = Some(user);
        self.settings = Some(settings);

        if self.queue.is_empty() {
            self.transition(SessionState::NoAdsAvailable);
        } else {
            self.gate();
        }
        Ok(())
    }

    /// Puts the ad at `position` on screen with a fresh countdown.
    fn gate(&mut self) {
        self.view_id = Some(new_id());
        self.run = self.countdown.start();
        self.transition(SessionState::Gating);
    }

    /// Moves `Gating` to `Ready` once the countdown has elapsed.
    pub fn tick(&mut self) -> &SessionState {
        if self.state == SessionState::Gating && self.countdown.tick(self.run) == Tick::Elapsed {
            self.transition(SessionState::Ready);
        }
        &self.state
    }

    /// Waits for the current countdown, then ticks.
    pub async fn wait_ready(&mut self) -> &SessionState {
        if self.state == SessionState::Gating {
            self.countdown.elapsed().await;
        }
        self.tick()
    }

    /// Credits the ad on screen and moves to the next one.
    ///
    /// On failure the session goes back to `Ready` with the same view key,
    /// so a later attempt cannot be credited twice. A quota refusal ends in
    /// `LimitReached` and a blocked account in `Error`.
    pub async fn credit(&mut self) -> Result<CreditReceipt> {
        self.tick();
        match self.state {
            SessionState::Ready => {},
            SessionState::Gating => {
                return Err(ValidationError::DwellNotElapsed {
                    remaining_secs: self.countdown.remaining_secs(),
                }
                .into());
            },
            SessionState::Crediting => {
                return Err(Error::Conflict(
                    "a credit request for this ad is already in flight".into(),
                ));
            },
            _ => return Err(ValidationError::NotReady.into()),
        }

        let (Some(user), Some(settings), Some(ad), Some(view_id)) = (
            self.user.as_ref(),
            self.settings.as_ref(),
            self.queue.get(self.position).cloned(),
            self.view_id.clone(),
        ) else {
            return Err(ValidationError::NotReady.into());
        };

        if !self.quota.can_consume(user, settings) {
            let limit = user.daily_ads_limit;
            self.countdown.cancel();
            self.transition(SessionState::LimitReached);
            return Err(ValidationError::QuotaExhausted { limit }.into());
        }

        self.transition(SessionState::Crediting);
        self.balance.apply(&view_id, ad.earning_per_view);

        let api = Arc::clone(&self.api);
        let user_id = self.user_id.clone();
        let pending = PendingCredit {
            session: &mut *self,
            view_id: &view_id,
            armed: true,
        };
        let outcome = api.view_ad(&user_id, &ad.id, &view_id).await;
        pending.disarm();

        match outcome {
            Ok(receipt) => {
                self.balance.confirm(&view_id, receipt.new_balance);
                if let Some(user) = self.user.as_mut() {
                    user.balance = receipt.new_balance;
                    user.daily_ads_watched = receipt.daily_ads_watched;
                    user.daily_ads_limit = receipt.daily_ads_limit;
                }
                tracing::info!(user_id = %self.user_id, ad_id = %ad.id, %view_id, "ad view confirmed");
                self.advance();
                Ok(receipt)
            },
            Err(err) => {
                self.balance.rollback(&view_id);
                match err {
                    Error::Validation(ValidationError::QuotaExhausted { .. }) => {
                        self.countdown.cancel();
                        self.view_id = None;
                        self.transition(SessionState::LimitReached);
                        Err(err)
                    },
                    Error::Blocked => {
                        self.fail(&err);
                        Err(err)
                    },
                    // Replays are answered as duplicates, so a conflict means
                    // another request moved the quota first.
                    Error::Conflict(reason) => {
                        tracing::warn!(user_id = %self.user_id, %view_id, %reason, "ad view refused by a concurrent change");
                        self.transition(SessionState::Ready);
                        Err(ValidationError::Conflict(reason).into())
                    },
                    err => {
                        tracing::warn!(user_id = %self.user_id, %view_id, error = %err, "ad view not credited");
                        self.transition(SessionState::Ready);
                        Err(err)
                    },
                }
            },
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        let exhausted = self
            .user
            .as_ref()
            .is_some_and(|user| user.daily_ads_watched >= user.daily_ads_limit);

        if exhausted || self.position >= self.queue.len() {
            self.countdown.cancel();
            self.view_id = None;
            self.transition(SessionState::Exhausted);
        } else {
            self.gate();
        }
    }

    /// Switches tier and reloads the queue. Refused outside `Idle` and
    /// `Loading`, and once an ad was viewed today.
    pub async fn select_option(&mut self, option: AdOption) -> Result<&SessionState> {
        if !matches!(self.state, SessionState::Idle | SessionState::Loading) {
            return Err(ValidationError::OptionLocked.into());
        }
        if self
            .user
            .as_ref()
            .is_some_and(|user| user.daily_ads_watched > 0 && user.ad_option != option)
        {
            return Err(ValidationError::OptionLocked.into());
        }

        let view = self.api.select_ad_option(&self.user_id, option).await?;
        self.user = Some(view.user);
        self.transition(SessionState::Idle);
        self.load().await
    }

    /// Stops the countdown and drops the queue. Nothing is credited.
    pub fn cancel(&mut self) {
        self.countdown.cancel();
        if let Some(view_id) = self.view_id.take() {
            self.balance.rollback(&view_id);
        }
        self.queue.clear();
        self.position = 0;
        self.transition(SessionState::Idle);
    }

    /// Reloads after an error. Other states are left untouched.
    pub async fn retry(&mut self) -> Result<&SessionState> {
        if matches!(self.state, SessionState::Error(_)) {
            self.load().await
        } else {
            Ok(&self.state)
        }
    }
}

/// Puts a session back to `Ready` when its credit request is dropped
/// before an answer arrived.
struct PendingCredit<'a> {
    session: &'a mut AdViewSession,
    view_id: &'a str,
    armed: bool,
}

impl PendingCredit<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingCredit<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(user_id = %self.session.user_id, view_id = %self.view_id, "ad view request abandoned");
        self.session.balance.rollback(self.view_id);
        self.session.transition(SessionState::Ready);
    }
}
