// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Cancelable periodic trigger for the sweeper.

use std::{sync::Mutex, time::Duration};

use tokio_util::sync::CancellationToken;

use super::sweeper::Sweeper;

/// Defines how often, if at all, this server sweeps automatically.
///
/// Reconfiguring cancels the previous schedule and installs a new one;
/// a sweep that is already running is never interrupted. Cancellation is
/// idempotent, so a schedule can be torn down from any number of places.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    cancel: Mutex<Option<CancellationToken>>,
}

impl Schedule {
    /// Replaces the current schedule with one firing every `period`.
    pub fn update(&self, period: Duration, sweeper: Sweeper) {
        let token = CancellationToken::new();
        {
            let mut slot = self.lock();
            if let Some(previous) = slot.replace(token.clone()) {
                previous.cancel();
            }
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately; the
            // schedule must only fire after a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper.sweep(),
                    _ = token.cancelled() => return,
                }
            }
        });
    }

    /// Cancels the current schedule, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().take() {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().expect("schedule lock is never poisoned")
    }
}
