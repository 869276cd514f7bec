//! Viewport intersection tracking for the feed.
//!
//! The platform layer measures intersection ratios and feeds them in; this
//! crate only consumes the stream. Two observation margins exist on
//! purpose: a wide one so prefetch anticipates scrolling, and a strict one
//! so playback never starts far outside the viewport.

use tokio::sync::mpsc;

/// Margin and threshold for one observer.
#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    /// Extra observed region above and below the viewport, in pixels.
    pub margin: f64,
    /// Minimum intersection ratio before the signal fires.
    pub threshold: f64,
}

impl ObserverConfig {
    /// Wide observer used to advance the active index.
    pub fn prefetch() -> Self {
        ObserverConfig { margin: 300.0, threshold: 0.01 }
    }

    /// Strict observer used for video play/pause decisions.
    pub fn playback() -> Self {
        ObserverConfig { margin: 200.0, threshold: 0.25 }
    }
}

/// Fraction of an item inside the (margin-expanded) viewport along the
/// scroll axis. Helper for simulated intersection sources and tests.
pub fn intersection_ratio(
    viewport_top: f64,
    viewport_height: f64,
    item_top: f64,
    item_height: f64,
    margin: f64,
) -> f64 {
    if item_height <= 0.0 {
        return 0.0;
    }
    let top = viewport_top - margin;
    let bottom = viewport_top + viewport_height + margin;
    let overlap = (bottom.min(item_top + item_height) - top.max(item_top)).max(0.0);
    (overlap / item_height).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// The entry crossed the wide prefetch threshold; carries the new
    /// (monotonic) active index.
    Crossed(usize),
    /// The entry's strict-viewport playability changed.
    Playable { index: usize, playable: bool },
}

/// Consumes per-entry intersection ratios and emits prefetch/playback
/// signals. All callbacks are idempotent; `active_index` only moves
/// forward, so signal ordering cannot regress the prefetch window.
pub struct VisibilityTracker {
    prefetch: ObserverConfig,
    playback: ObserverConfig,
    active_index: usize,
    playable: Vec<bool>,
    subscribers: Vec<mpsc::UnboundedSender<Signal>>,
}

impl VisibilityTracker {
    pub fn new(entry_count: usize, prefetch: ObserverConfig, playback: ObserverConfig) -> Self {
        VisibilityTracker {
            prefetch,
            playback,
            active_index: 0,
            playable: vec![false; entry_count],
            subscribers: Vec::new(),
        }
    }

    pub fn with_defaults(entry_count: usize) -> Self {
        Self::new(entry_count, ObserverConfig::prefetch(), ObserverConfig::playback())
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Stream of signals for consumers that do not own the tracker.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Report one entry's current intersection ratios, as seen by the wide
    /// and the strict observer. Returns the signals this observation
    /// produced (also fanned out to subscribers).
    pub fn observe(&mut self, index: usize, wide_ratio: f64, strict_ratio: f64) -> Vec<Signal> {
        let mut signals = Vec::new();

        if wide_ratio >= self.prefetch.threshold && index > self.active_index {
            self.active_index = index;
            signals.push(Signal::Crossed(index));
            tracing::trace!(index, "active index advanced");
        }

        if index < self.playable.len() {
            let playable = strict_ratio >= self.playback.threshold;
            if playable != self.playable[index] {
                self.playable[index] = playable;
                signals.push(Signal::Playable { index, playable });
            }
        }

        for signal in &signals {
            self.subscribers.retain(|tx| tx.send(*signal).is_ok());
        }
        signals
    }

    /// Convenience for simulated scroll positions: computes both observer
    /// ratios from scroll-axis geometry and forwards to `observe`.
    pub fn observe_geometry(
        &mut self,
        index: usize,
        viewport_top: f64,
        viewport_height: f64,
        item_top: f64,
        item_height: f64,
    ) -> Vec<Signal> {
        let wide = intersection_ratio(
            viewport_top,
            viewport_height,
            item_top,
            item_height,
            self.prefetch.margin,
        );
        let strict = intersection_ratio(
            viewport_top,
            viewport_height,
            item_top,
            item_height,
            self.playback.margin,
        );
        self.observe(index, wide, strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_index_is_monotonic() {
        let mut tracker = VisibilityTracker::with_defaults(10);
        tracker.observe(3, 0.5, 0.0);
        tracker.observe(6, 0.5, 0.0);
        tracker.observe(1, 1.0, 1.0);
        assert_eq!(tracker.active_index(), 6);
    }

    #[test]
    fn crossed_fires_once_per_advance() {
        let mut tracker = VisibilityTracker::with_defaults(10);
        let first = tracker.observe(2, 0.5, 0.0);
        assert_eq!(first, vec![Signal::Crossed(2)]);
        // repeat observation is idempotent
        let second = tracker.observe(2, 0.5, 0.0);
        assert!(second.is_empty());
    }

    #[test]
    fn playable_uses_strict_threshold() {
        let mut tracker = VisibilityTracker::with_defaults(4);
        let signals = tracker.observe(0, 1.0, 0.1);
        assert!(!signals.contains(&Signal::Playable { index: 0, playable: true }));

        let signals = tracker.observe(0, 1.0, 0.3);
        assert!(signals.contains(&Signal::Playable { index: 0, playable: true }));

        let signals = tracker.observe(0, 1.0, 0.2);
        assert!(signals.contains(&Signal::Playable { index: 0, playable: false }));
    }

    #[test]
    fn below_threshold_never_advances() {
        let mut tracker = VisibilityTracker::with_defaults(4);
        let signals = tracker.observe(3, 0.005, 0.0);
        assert!(signals.is_empty());
        assert_eq!(tracker.active_index(), 0);
    }

    #[test]
    fn geometry_margins_differ_between_observers() {
        // item sits 250px below the viewport bottom: inside the 300px
        // prefetch margin, outside the 200px playback margin.
        let ratio_wide = intersection_ratio(0.0, 800.0, 1050.0, 440.0, 300.0);
        let ratio_strict = intersection_ratio(0.0, 800.0, 1050.0, 440.0, 200.0);
        assert!(ratio_wide > 0.0);
        assert_eq!(ratio_strict, 0.0);

        let mut tracker = VisibilityTracker::with_defaults(4);
        let signals = tracker.observe_geometry(2, 0.0, 800.0, 1050.0, 440.0);
        assert_eq!(signals, vec![Signal::Crossed(2)]);
    }

    #[tokio::test]
    async fn subscribers_receive_signals() {
        let mut tracker = VisibilityTracker::with_defaults(4);
        let mut rx = tracker.subscribe();
        tracker.observe(1, 1.0, 1.0);
        assert_eq!(rx.recv().await, Some(Signal::Crossed(1)));
        assert_eq!(
            rx.recv().await,
            Some(Signal::Playable { index: 1, playable: true })
        );
    }
}
