// ── Render state store ──
//
// Latest known value per channel. The whole map lives behind a `watch`
// channel as an `Arc<ChannelMap>`: readers take an `Arc` clone under the
// channel's read lock, writers mutate under its write lock with
// `Arc::make_mut`. A snapshot is therefore always a fully-applied state,
// and it stays valid (unchanged) however long the reader holds it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::catalog::{ChannelCatalog, ChannelId};
use crate::model::{ChannelMap, ChannelState, DecodedSample, RenderFrame};
use crate::stream::StateStream;

/// Weight of the newest inter-arrival interval in the smoothed rate.
const RATE_SMOOTHING: f64 = 0.2;

pub struct RenderStateStore {
    catalog: Arc<ChannelCatalog>,
    default_stale_after: Duration,
    state: watch::Sender<Arc<ChannelMap>>,
    sequence: AtomicU64,
}

impl RenderStateStore {
    pub fn new(catalog: Arc<ChannelCatalog>, default_stale_after: Duration) -> Self {
        let (state, _) = watch::channel(Arc::new(ChannelMap::new()));
        Self {
            catalog,
            default_stale_after,
            state,
            sequence: AtomicU64::new(0),
        }
    }

    /// Apply a decoded sample that arrived at `received_at`.
    ///
    /// Returns `false` (and leaves the store untouched) when the sample is
    /// strictly older, by source timestamp, than the stored value. Equal
    /// timestamps replace: the later arrival wins.
    pub fn apply(&self, sample: DecodedSample, received_at: DateTime<Utc>) -> bool {
        let stale_after = self
            .catalog
            .stale_after_for(&sample.channel_id, self.default_stale_after);

        let applied = self.state.send_if_modified(|map| {
            if let Some(existing) = map.get(&sample.channel_id) {
                if sample.source_ts < existing.source_ts {
                    return false;
                }
            }

            let map = Arc::make_mut(map);
            match map.get_mut(&sample.channel_id) {
                Some(existing) => {
                    let interval = (received_at - existing.last_updated).to_std().ok();
                    existing.rate_hz = smoothed_rate(existing.rate_hz, interval);
                    existing.latest_value = sample.value.clone();
                    existing.source_ts = sample.source_ts;
                    existing.last_updated = received_at;
                    existing.stale_after = stale_after;
                    existing.stale = false;
                    existing.update_count += 1;
                }
                None => {
                    map.insert(
                        sample.channel_id.clone(),
                        ChannelState {
                            channel_id: sample.channel_id.clone(),
                            latest_value: sample.value.clone(),
                            source_ts: sample.source_ts,
                            last_updated: received_at,
                            stale_after,
                            stale: false,
                            update_count: 1,
                            rate_hz: 0.0,
                        },
                    );
                }
            }
            true
        });

        if applied {
            trace!(channel = %sample.channel_id, "sample applied");
        } else {
            debug!(
                channel = %sample.channel_id,
                source_ts = %sample.source_ts,
                "discarding out-of-order sample"
            );
        }
        applied
    }

    /// Point-in-time copy of every channel.
    pub fn snapshot(&self) -> RenderFrame {
        let snapshot = self.state.borrow().clone();
        RenderFrame {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            snapshot,
            generated_at: Utc::now(),
        }
    }

    /// Flag channels whose `last_updated + stale_after` lies before `now`.
    /// Values are retained. Returns how many channels newly turned stale.
    pub fn mark_stale_if_expired(&self, now: DateTime<Utc>) -> usize {
        let mut flagged = 0;
        self.state.send_if_modified(|map| {
            let expired: Vec<ChannelId> = map
                .values()
                .filter(|s| !s.stale && is_expired(s, now))
                .map(|s| s.channel_id.clone())
                .collect();
            if expired.is_empty() {
                return false;
            }

            let map = Arc::make_mut(map);
            for id in &expired {
                if let Some(state) = map.get_mut(id) {
                    state.stale = true;
                }
            }
            flagged = expired.len();
            true
        });

        if flagged > 0 {
            debug!(count = flagged, "channels marked stale");
        }
        flagged
    }

    pub fn get(&self, id: &ChannelId) -> Option<ChannelState> {
        self.state.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Subscribe to every applied change.
    pub fn subscribe(&self) -> StateStream {
        StateStream::new(self.state.subscribe())
    }
}

fn is_expired(state: &ChannelState, now: DateTime<Utc>) -> bool {
    TimeDelta::from_std(state.stale_after)
        .ok()
        .and_then(|ttl| state.last_updated.checked_add_signed(ttl))
        .is_some_and(|deadline| deadline < now)
}

fn smoothed_rate(previous: f64, interval: Option<Duration>) -> f64 {
    let Some(interval) = interval.filter(|d| !d.is_zero()) else {
        return previous;
    };
    let instant = 1.0 / interval.as_secs_f64();
    if previous <= 0.0 {
        instant
    } else {
        previous + RATE_SMOOTHING * (instant - previous)
    }
}
