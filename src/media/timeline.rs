//! Drift-aware timeline assembly
//!
//! Clips are laid out on the original subtitle timeline. A clip longer than
//! its slot is never cut: the excess becomes debt, which is repaid from the
//! gaps between slots and from the slack of shorter clips. The playhead
//! follows the nominal slot ends, so at any point
//! `assembled length = playhead + debt`.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{DubSyncError, Result};
use crate::progress::ProgressTracker;
use crate::subtitle::Slot;
use crate::tts::SynthesizedClip;

/// Destination of the assembled audio
pub trait TimelineSink {
    /// Append `duration_ms` of silence
    fn append_silence(&mut self, duration_ms: u64) -> Result<()>;

    /// Append a clip unmodified and return the whole milliseconds it took
    /// up on the track, any partial last millisecond included.
    ///
    /// On error nothing may have been appended.
    fn append_clip(&mut self, clip: &SynthesizedClip) -> Result<u64>;

    /// Called once after every slot; errors here abort the run
    fn end_slot(&mut self) -> Result<()>;
}

/// Running state of one assembly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimelineState {
    /// Position on the nominal subtitle timeline
    pub current_time_ms: u64,
    /// Overrun not yet absorbed by gaps or slack
    pub accumulated_overrun_ms: u64,
}

/// What happened to one slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotPlacement {
    pub slot_index: usize,
    /// Nominal slot duration
    pub nominal_ms: u64,
    /// Duration of the audio actually placed for the slot
    pub clip_ms: u64,
    /// Distance from the playhead to the slot start
    pub gap_ms: u64,
    /// Part of the gap used to repay debt
    pub repaid_from_gap_ms: u64,
    /// Silence inserted before the clip
    pub gap_silence_ms: u64,
    /// Part of the slack used to repay debt
    pub repaid_from_slack_ms: u64,
    /// Silence inserted after the clip
    pub padding_ms: u64,
    /// Debt added by this slot (clip overrun and slot overlap)
    pub overrun_ms: u64,
    /// Debt after the slot
    pub debt_after_ms: u64,
    /// Set when the clip could not be placed and silence stands in for it
    pub fallback: Option<String>,
}

/// Summary of a finished assembly
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub placements: Vec<SlotPlacement>,
    /// Silence inserted before the first slot
    pub leading_silence_ms: u64,
    /// Final playhead position
    pub nominal_end_ms: u64,
    /// Total audio appended to the sink
    pub assembled_ms: u64,
    /// Debt no remaining slot could absorb
    pub residual_overrun_ms: u64,
}

impl AssemblyReport {
    /// Slots whose clip was replaced by silence during assembly
    pub fn fallback_slots(&self) -> Vec<usize> {
        self.placements
            .iter()
            .filter(|p| p.fallback.is_some())
            .map(|p| p.slot_index)
            .collect()
    }
}

/// Sequential fold of clips onto the slot timeline
#[derive(Debug, Default)]
pub struct TimelineAssembler {
    state: TimelineState,
    report: AssemblyReport,
    started: bool,
}

impl TimelineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TimelineState {
        self.state
    }

    /// Place one slot. Slots must arrive in ascending start order.
    ///
    /// A slot starting before the playhead adds the overlap to the debt, and
    /// the playhead moves to the later of its position and the slot end.
    pub fn place<S: TimelineSink>(
        &mut self,
        slot_index: usize,
        slot: &Slot,
        clip: &SynthesizedClip,
        sink: &mut S,
    ) -> Result<SlotPlacement> {
        if !self.started {
            self.started = true;
            if slot.start_ms > 0 {
                sink.append_silence(slot.start_ms)?;
                self.report.leading_silence_ms = slot.start_ms;
                self.report.assembled_ms += slot.start_ms;
            }
            self.state.current_time_ms = slot.start_ms;
        }

        let previous_time = self.state.current_time_ms;
        let nominal = slot.duration_ms();
        let mut debt = self.state.accumulated_overrun_ms;
        let mut placement = SlotPlacement {
            slot_index,
            nominal_ms: nominal,
            ..Default::default()
        };

        // Gap: repay debt first, the remainder becomes silence
        let gap = slot.start_ms.saturating_sub(previous_time);
        placement.gap_ms = gap;
        if gap > 0 {
            let deduction = debt.min(gap);
            debt -= deduction;
            placement.repaid_from_gap_ms = deduction;
            placement.gap_silence_ms = gap - deduction;
            if placement.gap_silence_ms > 0 {
                sink.append_silence(placement.gap_silence_ms)?;
            }
        }

        // A slot starting before the playhead starts late by the overlap
        let overlap = previous_time.saturating_sub(slot.start_ms);
        debt += overlap;

        let duration = match sink.append_clip(clip) {
            Ok(span_ms) => span_ms,
            Err(e) => {
                log::warn!(
                    "Slot {}: clip could not be placed ({}), substituting silence",
                    slot_index,
                    e
                );
                placement.fallback = Some(e.to_string());
                0
            }
        };
        placement.clip_ms = duration;

        if duration > nominal {
            debt += duration - nominal;
            placement.overrun_ms = overlap + duration - nominal;
        } else {
            placement.overrun_ms = overlap;
            let slack = nominal - duration;
            let deduction = debt.min(slack);
            debt -= deduction;
            placement.repaid_from_slack_ms = deduction;
            placement.padding_ms = slack - deduction;
            if placement.padding_ms > 0 {
                sink.append_silence(placement.padding_ms)?;
            }
        }

        // Playhead follows the nominal end and never moves back; a slot nested
        // inside the previous one hands its unused span back to the ledger
        let new_time = previous_time.max(slot.end_ms);
        debt -= new_time - slot.end_ms;
        self.state.current_time_ms = new_time;
        self.state.accumulated_overrun_ms = debt;
        placement.debt_after_ms = debt;

        self.report.assembled_ms +=
            placement.gap_silence_ms + placement.clip_ms + placement.padding_ms;

        log::debug!(
            "Slot {}: nominal {}ms, clip {}ms, gap {}ms (-{}), padding {}ms (-{}), debt {}ms",
            slot_index,
            nominal,
            placement.clip_ms,
            placement.gap_ms,
            placement.repaid_from_gap_ms,
            placement.padding_ms,
            placement.repaid_from_slack_ms,
            debt
        );

        sink.end_slot()?;

        self.report.placements.push(placement.clone());
        Ok(placement)
    }

    /// Close the assembly; residual debt is reported, not corrected
    pub fn finish(mut self) -> AssemblyReport {
        self.report.nominal_end_ms = self.state.current_time_ms;
        self.report.residual_overrun_ms = self.state.accumulated_overrun_ms;
        if self.report.residual_overrun_ms > 0 {
            log::warn!(
                "Speech track ends {}ms after the last subtitle",
                self.report.residual_overrun_ms
            );
        }
        self.report
    }
}

/// Assemble every slot in order.
///
/// `clips[i]` must belong to `slots[i]`. Cancellation is honoured between
/// slots only.
pub fn assemble<S: TimelineSink>(
    slots: &[Slot],
    clips: &[SynthesizedClip],
    sink: &mut S,
    cancel: &CancellationToken,
    tracker: Option<&ProgressTracker>,
) -> Result<AssemblyReport> {
    if slots.len() != clips.len() {
        return Err(DubSyncError::Other(format!(
            "{} slots but {} clips",
            slots.len(),
            clips.len()
        )));
    }

    let mut assembler = TimelineAssembler::new();
    for (i, (slot, clip)) in slots.iter().zip(clips).enumerate() {
        if clip.slot_index != i {
            return Err(DubSyncError::Other(format!(
                "clip for slot {} found at position {}",
                clip.slot_index, i
            )));
        }
        if cancel.is_cancelled() {
            log::info!("Assembly cancelled before slot {}", i);
            return Err(DubSyncError::Cancelled(i));
        }

        assembler.place(i, slot, clip, sink)?;

        if let Some(t) = tracker {
            t.update_step_progress(
                (i + 1) as f32 / slots.len() as f32 * 100.0,
                Some(format!("Assembled slot {}/{}", i + 1, slots.len())),
            );
        }
    }

    Ok(assembler.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::ClipAudio;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Silence(u64),
        Clip(usize, u64),
        EndSlot,
    }

    #[derive(Default)]
    struct RecordingSink {
        ops: Vec<Op>,
        failing_slots: Vec<usize>,
    }

    impl RecordingSink {
        fn total_ms(&self) -> u64 {
            self.ops
                .iter()
                .map(|op| match op {
                    Op::Silence(ms) | Op::Clip(_, ms) => *ms,
                    Op::EndSlot => 0,
                })
                .sum()
        }

        fn without_end_markers(&self) -> Vec<Op> {
            self.ops.iter().filter(|op| **op != Op::EndSlot).cloned().collect()
        }
    }

    impl TimelineSink for RecordingSink {
        fn append_silence(&mut self, duration_ms: u64) -> Result<()> {
            self.ops.push(Op::Silence(duration_ms));
            Ok(())
        }

        fn append_clip(&mut self, clip: &SynthesizedClip) -> Result<u64> {
            if self.failing_slots.contains(&clip.slot_index) {
                return Err(DubSyncError::AudioProcessing("corrupt clip".into()));
            }
            self.ops.push(Op::Clip(clip.slot_index, clip.audio_duration_ms));
            Ok(clip.audio_duration_ms)
        }

        fn end_slot(&mut self) -> Result<()> {
            self.ops.push(Op::EndSlot);
            Ok(())
        }
    }

    fn slot(start: u64, end: u64) -> Slot {
        Slot::new(0, start, end, "text")
    }

    fn clips(durations: &[u64]) -> Vec<SynthesizedClip> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| SynthesizedClip::new(i, *d, ClipAudio::Silence))
            .collect()
    }

    fn run(slots: &[Slot], durations: &[u64]) -> (AssemblyReport, RecordingSink) {
        let mut sink = RecordingSink::default();
        let report = assemble(slots, &clips(durations), &mut sink, &CancellationToken::new(), None)
            .unwrap();
        (report, sink)
    }

    #[test]
    fn test_overrun_repaid_by_next_slack() {
        let (report, sink) = run(&[slot(0, 1000), slot(1000, 2000)], &[1500, 500]);

        assert_eq!(report.leading_silence_ms, 0);
        assert_eq!(report.placements[0].gap_silence_ms, 0);
        assert_eq!(report.placements[0].debt_after_ms, 500);
        assert_eq!(report.placements[1].repaid_from_slack_ms, 500);
        assert_eq!(report.placements[1].padding_ms, 0);
        assert_eq!(report.residual_overrun_ms, 0);
        assert_eq!(sink.without_end_markers(), vec![Op::Clip(0, 1500), Op::Clip(1, 500)]);
        assert_eq!(report.assembled_ms, 2000);
    }

    #[test]
    fn test_leading_silence() {
        let (report, sink) = run(&[slot(2000, 3000)], &[1000]);
        assert_eq!(report.leading_silence_ms, 2000);
        assert_eq!(sink.ops[0], Op::Silence(2000));
        assert_eq!(sink.ops[1], Op::Clip(0, 1000));
        assert_eq!(report.nominal_end_ms, 3000);
    }

    #[test]
    fn test_gap_silence_and_slack_padding() {
        let (report, sink) = run(&[slot(0, 1000), slot(3000, 4000)], &[400, 1000]);
        assert_eq!(
            sink.without_end_markers(),
            vec![Op::Clip(0, 400), Op::Silence(600), Op::Silence(2000), Op::Clip(1, 1000)]
        );
        assert_eq!(report.residual_overrun_ms, 0);
        assert_eq!(report.assembled_ms, 4000);
    }

    #[test]
    fn test_debt_repaid_from_gap() {
        let (report, sink) = run(&[slot(0, 1000), slot(1500, 2500)], &[1800, 1000]);
        // 800ms debt, 500ms gap fully absorbed, 300ms left over
        assert_eq!(report.placements[1].repaid_from_gap_ms, 500);
        assert_eq!(report.placements[1].gap_silence_ms, 0);
        assert_eq!(report.residual_overrun_ms, 300);
        assert_eq!(sink.without_end_markers(), vec![Op::Clip(0, 1800), Op::Clip(1, 1000)]);
    }

    #[test]
    fn test_residual_debt_is_reported() {
        let (report, sink) = run(&[slot(500, 1000), slot(1000, 1200)], &[900, 700]);
        assert_eq!(report.residual_overrun_ms, 400 + 500);
        assert_eq!(report.nominal_end_ms, 1200);
        assert_eq!(sink.total_ms(), report.nominal_end_ms + report.residual_overrun_ms);
    }

    #[test]
    fn test_clips_are_never_truncated() {
        let slots = [slot(0, 300), slot(300, 600), slot(600, 5000)];
        let durations = [1200, 900, 100];
        let (report, sink) = run(&slots, &durations);
        for (i, d) in durations.iter().enumerate() {
            assert!(sink.ops.contains(&Op::Clip(i, *d)));
            assert_eq!(report.placements[i].clip_ms, *d);
        }
        assert_eq!(sink.ops.iter().filter(|op| **op == Op::EndSlot).count(), 3);
    }

    #[test]
    fn test_length_equals_playhead_plus_debt() {
        // Deterministic pseudo-random timelines, including overlapping and nested slots
        let mut seed = 0x2545_f491_u64;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for _ in 0..200 {
            let count = 1 + next(30) as usize;
            let mut start = next(3000);
            let mut slots = Vec::new();
            let mut durations = Vec::new();
            for _ in 0..count {
                let length = next(4000);
                slots.push(slot(start, start + length));
                durations.push(next(5000));
                start += next(3000);
                start = start.saturating_sub(next(800));
            }
            slots.sort_by_key(|s| s.start_ms);

            let (report, sink) = run(&slots, &durations);
            assert_eq!(report.placements.len(), slots.len());
            assert_eq!(sink.total_ms(), report.assembled_ms);
            assert_eq!(
                report.assembled_ms,
                report.nominal_end_ms + report.residual_overrun_ms
            );

            let mut previous_debt = 0;
            let mut playhead = 0;
            for (placement, s) in report.placements.iter().zip(&slots) {
                assert!(placement.repaid_from_slack_ms <= s.duration_ms());
                assert!(placement.repaid_from_gap_ms <= placement.gap_ms);
                assert!(placement.repaid_from_gap_ms + placement.repaid_from_slack_ms <= previous_debt + placement.overrun_ms);
                previous_debt = placement.debt_after_ms;
                playhead = playhead.max(s.end_ms);
            }
            assert_eq!(report.nominal_end_ms, playhead);
        }
    }

    #[test]
    fn test_overlapping_slot_counts_as_lateness() {
        let (report, sink) = run(&[slot(0, 1000), slot(800, 1500)], &[1000, 500]);
        // Second slot starts 200ms late, its 200ms slack absorbs exactly that
        assert_eq!(report.placements[1].overrun_ms, 200);
        assert_eq!(report.placements[1].repaid_from_slack_ms, 200);
        assert_eq!(report.residual_overrun_ms, 0);
        assert_eq!(sink.total_ms(), 1500);
    }

    #[test]
    fn test_nested_slot_keeps_playhead() {
        let (report, _) = run(&[slot(0, 3000), slot(500, 1000)], &[3000, 500]);
        assert_eq!(report.nominal_end_ms, 3000);
        assert_eq!(report.residual_overrun_ms, 500);
        assert_eq!(report.assembled_ms, 3500);
    }

    #[test]
    fn test_failed_clip_becomes_nominal_silence() {
        let mut sink = RecordingSink {
            failing_slots: vec![1],
            ..Default::default()
        };
        let slots = [slot(0, 1000), slot(1000, 2000), slot(2000, 2500)];
        let report = assemble(
            &slots,
            &clips(&[1300, 800, 500]),
            &mut sink,
            &CancellationToken::new(),
            None,
        )
        .unwrap();

        // 300ms debt is repaid from the 1000ms of substituted silence
        assert_eq!(report.placements[1].padding_ms, 700);
        assert_eq!(report.fallback_slots(), vec![1]);
        assert_eq!(report.residual_overrun_ms, 0);
        assert_eq!(report.placements.len(), 3);
    }

    #[test]
    fn test_cancellation_between_slots() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sink = RecordingSink::default();
        let result = assemble(&[slot(0, 100)], &clips(&[100]), &mut sink, &token, None);
        assert!(matches!(result, Err(DubSyncError::Cancelled(0))));
        assert!(sink.ops.is_empty());
    }

    #[test]
    fn test_mismatched_clip_count() {
        let mut sink = RecordingSink::default();
        let result = assemble(
            &[slot(0, 100), slot(100, 200)],
            &clips(&[100]),
            &mut sink,
            &CancellationToken::new(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_slot_with_minimal_clip() {
        let (report, _) = run(&[slot(1000, 1000), slot(1000, 2000)], &[100, 400]);
        assert_eq!(report.placements[0].overrun_ms, 100);
        assert_eq!(report.placements[1].repaid_from_slack_ms, 100);
        assert_eq!(report.placements[1].padding_ms, 500);
    }
}
