//! Prefetch window and per-entry resource-lifecycle state machines.
//!
//! The manager makes the hold/release decisions and emits commands; the
//! platform layer (or the [`Prefetcher`]) executes them and reports back.
//! A preload that resolves after its entry was released is discarded via
//! the per-hold epoch, so a torn-down handle is never touched.

use api_client::{ApiClientError, StorageClient};
use feed::{FeedState, MediaKind};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPhase {
    Released,
    Preloading,
    Ready,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoPhase {
    NotRequested,
    Loaded,
}

/// Whether resources are torn down when an entry leaves the prefetch
/// window. Device-class tunable, not a correctness requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePolicy {
    ReleaseOutsideWindow,
    RetainOutsideWindow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    PreloadMetadata { index: usize, epoch: u64 },
    DecodePhoto { index: usize, url: String },
    Play { index: usize },
    Pause { index: usize, reset: bool },
    Release { index: usize },
}

#[derive(Debug, Clone)]
struct EntrySlot {
    id: String,
    kind: MediaKind,
    url: String,
    consumed: bool,
}

pub struct PlaybackManager {
    prefetch_ahead: usize,
    policy: ReleasePolicy,
    entries: Vec<EntrySlot>,
    video_phase: Vec<VideoPhase>,
    photo_phase: Vec<PhotoPhase>,
    /// Locators a decode was already issued for. Decode requests are
    /// idempotent per locator, never per index.
    requested_locators: HashSet<String>,
    epochs: Vec<u64>,
    active: usize,
}

impl PlaybackManager {
    pub fn new(state: &FeedState, prefetch_ahead: usize, policy: ReleasePolicy) -> Self {
        let entries: Vec<EntrySlot> = state
            .entries
            .iter()
            .map(|e| EntrySlot {
                id: e.id.clone(),
                kind: e.kind,
                url: state.url(&e.id).unwrap_or_default().to_string(),
                consumed: state.is_consumed(&e.id),
            })
            .collect();
        let n = entries.len();
        PlaybackManager {
            prefetch_ahead,
            policy,
            entries,
            video_phase: vec![VideoPhase::Released; n],
            photo_phase: vec![PhotoPhase::NotRequested; n],
            requested_locators: HashSet::new(),
            epochs: vec![0; n],
            active: 0,
        }
    }

    pub fn video_phase(&self, index: usize) -> VideoPhase {
        self.video_phase.get(index).copied().unwrap_or(VideoPhase::Released)
    }

    pub fn photo_phase(&self, index: usize) -> PhotoPhase {
        self.photo_phase.get(index).copied().unwrap_or(PhotoPhase::NotRequested)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The active entry plus the K entries ahead of it hold resources.
    fn in_window(&self, index: usize) -> bool {
        index >= self.active && index <= self.active.saturating_add(self.prefetch_ahead)
    }

    /// Recompute the prefetch window after the active index advanced.
    /// Idempotent; repeated calls with the same index emit nothing new.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub fn on_active_index(&mut self, index: usize) -> Vec<PlayerCommand> {
        self.active = self.active.max(index);
        let mut commands = Vec::new();

        for i in 0..self.entries.len() {
            let slot = &self.entries[i];
            let in_window = self.in_window(i) && !slot.consumed;
            match slot.kind {
                MediaKind::Video => {
                    if in_window {
                        if self.video_phase[i] == VideoPhase::Released {
                            self.epochs[i] += 1;
                            self.video_phase[i] = VideoPhase::Preloading;
                            commands.push(PlayerCommand::PreloadMetadata {
                                index: i,
                                epoch: self.epochs[i],
                            });
                        }
                    } else if self.video_phase[i] != VideoPhase::Released {
                        match self.policy {
                            ReleasePolicy::ReleaseOutsideWindow => {
                                self.release(i, &mut commands);
                            }
                            ReleasePolicy::RetainOutsideWindow => {
                                // keep the handle, just stop playback
                                if self.video_phase[i] == VideoPhase::Playing {
                                    self.video_phase[i] = VideoPhase::Paused;
                                    commands.push(PlayerCommand::Pause { index: i, reset: true });
                                }
                            }
                        }
                    }
                }
                MediaKind::Photo => {
                    if in_window
                        && self.photo_phase[i] == PhotoPhase::NotRequested
                        && !self.requested_locators.contains(&slot.url)
                    {
                        self.requested_locators.insert(slot.url.clone());
                        self.photo_phase[i] = PhotoPhase::Loaded;
                        commands.push(PlayerCommand::DecodePhoto { index: i, url: slot.url.clone() });
                    }
                    // photos have no release path; the surface goes away
                    // only when the entry is consumed
                }
            }
        }
        commands
    }

    fn release(&mut self, index: usize, commands: &mut Vec<PlayerCommand>) {
        self.video_phase[index] = VideoPhase::Released;
        self.epochs[index] += 1;
        commands.push(PlayerCommand::Release { index });
    }

    /// A metadata preload finished. Stale results (entry released or
    /// re-acquired since) are discarded.
    pub fn preload_finished(&mut self, index: usize, epoch: u64) {
        if index >= self.entries.len() {
            return;
        }
        if self.epochs[index] != epoch || self.video_phase[index] != VideoPhase::Preloading {
            tracing::debug!(index, epoch, "discarding stale preload result");
            return;
        }
        self.video_phase[index] = VideoPhase::Ready;
    }

    /// React to the strict-viewport playability signal for a video entry.
    /// Pausing always resets the position; re-entry restarts from zero.
    pub fn on_playable(&mut self, index: usize, playable: bool) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        let Some(slot) = self.entries.get(index) else {
            return commands;
        };
        if slot.kind != MediaKind::Video || slot.consumed {
            return commands;
        }

        if playable {
            match self.video_phase[index] {
                VideoPhase::Playing => {}
                VideoPhase::Released => {
                    // scrolled into view without a preload (e.g. backwards
                    // past an already-released entry): acquire and play
                    self.epochs[index] += 1;
                    self.video_phase[index] = VideoPhase::Playing;
                    commands.push(PlayerCommand::Play { index });
                }
                _ => {
                    self.video_phase[index] = VideoPhase::Playing;
                    commands.push(PlayerCommand::Play { index });
                }
            }
        } else if self.video_phase[index] == VideoPhase::Playing {
            self.video_phase[index] = VideoPhase::Paused;
            commands.push(PlayerCommand::Pause { index, reset: true });
            // outside the hold window the pause immediately becomes a
            // release under the default policy
            if !self.in_window(index) && self.policy == ReleasePolicy::ReleaseOutsideWindow {
                self.release(index, &mut commands);
            }
        }
        commands
    }

    /// An entry was consumed: its payload is never rendered again this
    /// session, so tear down whatever it holds.
    pub fn on_consumed(&mut self, index: usize) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        let Some(slot) = self.entries.get_mut(index) else {
            return commands;
        };
        slot.consumed = true;
        if slot.kind == MediaKind::Video && self.video_phase[index] != VideoPhase::Released {
            self.release(index, &mut commands);
        }
        commands
    }
}

/// Executes metadata preloads against the object storage. The result is
/// reported back through [`PlaybackManager::preload_finished`] with the
/// epoch from the originating command.
#[derive(Debug, Clone)]
pub struct Prefetcher {
    storage: StorageClient,
}

impl Prefetcher {
    pub fn new(storage: StorageClient) -> Self {
        Prefetcher { storage }
    }

    pub async fn preload(&self, url: &str) -> Result<(), ApiClientError> {
        self.storage.head_probe(url).await.map(|_| ())
    }
}
