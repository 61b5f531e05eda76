/// Recovered-anomaly counters. Nothing here ever halts the simulation; the
/// counts exist so the owner can react (grow capacity, fix a collider, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnomalyCounters {
    /// Spawn requests dropped because the particle buffer was full.
    pub spawns_dropped: u64,
    /// Collider/bounds skips due to zero or non-finite extents (per substep).
    pub degenerate_colliders_skipped: u64,
    /// Attachments whose boundary index no longer existed.
    pub invalid_attachments: u64,
    /// Particles found with a non-finite position or velocity.
    pub non_finite: u64,
    /// Collision events dropped by the per-frame cap.
    pub collision_events_dropped: u64,
}

impl AnomalyCounters {
    fn accumulate(&mut self, other: &AnomalyCounters) {
        self.spawns_dropped += other.spawns_dropped;
        self.degenerate_colliders_skipped += other.degenerate_colliders_skipped;
        self.invalid_attachments += other.invalid_attachments;
        self.non_finite += other.non_finite;
        self.collision_events_dropped += other.collision_events_dropped;
    }

    pub fn is_clean(&self) -> bool {
        *self == AnomalyCounters::default()
    }
}

/// Summary of a single simulated frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub substeps: u32,
    pub iterations: u32,
    pub active_count: u32,
    pub spawned: u32,
    pub despawned: u32,
    pub attached: u32,
    pub detached: u32,
    pub average_density: f32,
    pub max_neighbor_count: u32,
    pub collision_events: u32,
    /// Wall time of the frame, when the caller measured one.
    pub elapsed_ms: f32,
}

/// Explicitly owned collector passed into every frame.
///
/// `begin_frame` / `end_frame` bracket one simulation frame; counters recorded
/// in between belong to that frame and are folded into lifetime totals when
/// the frame ends.
#[derive(Debug, Default)]
pub struct FrameDiagnostics {
    frame: u64,
    in_frame: bool,
    current: AnomalyCounters,
    totals: AnomalyCounters,
    stats: FrameStats,
    last: Option<FrameStats>,
    /// Exponential moving average of `elapsed_ms`.
    ema_ms: f32,
}

impl FrameDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        debug_assert!(!self.in_frame, "begin_frame called twice without end_frame");
        self.frame += 1;
        self.in_frame = true;
        self.current = AnomalyCounters::default();
        self.stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };
    }

    pub fn end_frame(&mut self) -> FrameStats {
        debug_assert!(self.in_frame, "end_frame called without begin_frame");
        self.in_frame = false;
        self.totals.accumulate(&self.current);
        let stats = self.stats;
        self.last = Some(stats);

        log::debug!(
            "frame {}: active={} spawned={} despawned={} avg_density={:.1} max_neighbors={}",
            stats.frame,
            stats.active_count,
            stats.spawned,
            stats.despawned,
            stats.average_density,
            stats.max_neighbor_count
        );
        if !self.current.is_clean() {
            log::warn!("frame {}: recovered anomalies {:?}", stats.frame, self.current);
        }
        stats
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    /// Current (or most recently finished) frame number, starting at 1.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }

    pub fn record_spawns_dropped(&mut self, n: usize) {
        self.current.spawns_dropped += n as u64;
    }

    pub fn record_degenerate_colliders(&mut self, n: usize) {
        self.current.degenerate_colliders_skipped += n as u64;
    }

    pub fn record_invalid_attachment(&mut self) {
        self.current.invalid_attachments += 1;
    }

    pub fn record_non_finite(&mut self, n: usize) {
        self.current.non_finite += n as u64;
    }

    pub fn record_collision_events_dropped(&mut self, n: usize) {
        self.current.collision_events_dropped += n as u64;
    }

    /// Attach a measured frame time to the last finished frame.
    pub fn record_elapsed_ms(&mut self, elapsed_ms: f32) {
        if let Some(last) = self.last.as_mut() {
            last.elapsed_ms = elapsed_ms;
        }
        // EMA with alpha=0.3 for responsiveness
        self.ema_ms = if self.ema_ms == 0.0 {
            elapsed_ms
        } else {
            self.ema_ms * 0.7 + elapsed_ms * 0.3
        };
    }

    pub fn average_frame_ms(&self) -> f32 {
        self.ema_ms
    }

    /// Counters of the frame in progress.
    pub fn frame_counters(&self) -> &AnomalyCounters {
        &self.current
    }

    /// Counters accumulated over every finished frame.
    pub fn totals(&self) -> &AnomalyCounters {
        &self.totals
    }

    pub fn last_frame(&self) -> Option<&FrameStats> {
        self.last.as_ref()
    }
}
