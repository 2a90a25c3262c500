//! Offline replay of recorded detections.
//!
//! Streaming mode prints each result as soon as it is computed. Zero-phase mode runs the
//! session without its causal filter, buffers the whole recording, then smooths every
//! person's keypoint and angle series forward and backward before printing.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::analysis::{registry, AngleDefinition, AngleKind, AngleSet};
use crate::config::{Config, FilterConfig};
use crate::frame::{FrameInput, FrameResult, PersonResult};
use crate::pose::{Keypoint, Landmark};
use crate::protocol;
use crate::rom::RomReport;
use crate::session::AnalysisSession;
use crate::tracker::{smooth_series, PersonId};

/// One output line
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    FrameResult(FrameResult),
    Rom(RomReport),
    FrameRejected {
        frame_index: Option<u64>,
        error: String,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: usize,
    pub rejected: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ReplayOptions {
    pub test: Option<String>,
    pub zero_phase: bool,
}

/// Reads one `FrameInput` JSON object per line and writes one record per line.
///
/// Lines that fail to decode or that the session rejects produce `frame_rejected`
/// and the replay continues. Only I/O errors abort.
pub fn run<R: BufRead, W: Write>(
    config: &Config,
    options: &ReplayOptions,
    input: R,
    mut out: W,
) -> Result<ReplaySummary> {
    config.validate().context("invalid configuration")?;
    let mut session_config = config.clone();
    let offline = if options.zero_phase {
        Some(std::mem::replace(&mut session_config.filter, FilterConfig::None))
    } else {
        None
    };
    let mut session = AnalysisSession::new(&session_config).context("invalid configuration")?;
    if let Some(test) = &options.test {
        session.start_test(test)?;
    }

    let mut summary = ReplaySummary::default();
    let mut buffered = Vec::new();
    let mut emit = |record: ReplayRecord, out: &mut W| -> Result<()> {
        if offline.is_some() {
            buffered.push(record);
        } else {
            write_record(out, &record)?;
        }
        Ok(())
    };

    for (line_no, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.frames += 1;
        let frame: FrameInput = match protocol::decode_message(line.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                summary.rejected += 1;
                tracing::warn!("line {}: {}", line_no + 1, e);
                let record = ReplayRecord::FrameRejected {
                    frame_index: e.frame_index,
                    error: format!("line {}: {}", line_no + 1, e),
                };
                emit(record, &mut out)?;
                continue;
            }
        };
        match session.process_frame(&frame) {
            Ok(processed) => {
                emit(ReplayRecord::FrameResult(processed.result), &mut out)?;
                if let Some(rom) = processed.rom {
                    emit(ReplayRecord::Rom(rom), &mut out)?;
                }
            }
            Err(e) => {
                summary.rejected += 1;
                tracing::warn!("{}", e);
                let record = ReplayRecord::FrameRejected {
                    frame_index: Some(frame.frame_index),
                    error: e.to_string(),
                };
                emit(record, &mut out)?;
            }
        }
    }

    if let Some(filter) = &offline {
        smooth_sequence(
            buffered.iter_mut().filter_map(|r| match r {
                ReplayRecord::FrameResult(frame) => Some(frame),
                _ => None,
            }),
            filter,
        );
        for record in &buffered {
            write_record(&mut out, record)?;
        }
    }
    out.flush()?;
    Ok(summary)
}

fn write_record<W: Write>(out: &mut W, record: &ReplayRecord) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    writeln!(out)?;
    Ok(())
}

/// Smooths each person's keypoint and angle series over the whole recording.
///
/// Series are built per `person_id` from the frames the person appears in. Angles skip
/// null entries. Confidences and metrics are left as computed.
pub fn smooth_sequence<'a, I>(frames: I, filter: &FilterConfig)
where
    I: IntoIterator<Item = &'a mut FrameResult>,
{
    let mut frames: Vec<&mut FrameResult> = frames.into_iter().collect();
    let ids: BTreeSet<PersonId> = frames
        .iter()
        .flat_map(|f| f.persons.iter().map(|p| p.person_id))
        .collect();

    for id in ids {
        let mut track: Vec<&mut PersonResult> = frames
            .iter_mut()
            .filter_map(|f| f.persons.iter_mut().find(|p| p.person_id == id))
            .collect();
        smooth_keypoints(&mut track, filter);
        for def in registry() {
            smooth_angle(&mut track, def, filter);
        }
        tracing::debug!(person_id = id, frames = track.len(), "zero-phase smoothing applied");
    }
}

fn smooth_keypoints(track: &mut [&mut PersonResult], filter: &FilterConfig) {
    for landmark in Landmark::ALL {
        let series: Vec<(usize, Keypoint)> = track
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.keypoints.get(landmark).map(|kp| (i, *kp)))
            .collect();
        if series.is_empty() {
            continue;
        }
        let xs: Vec<f32> = series.iter().map(|(_, kp)| kp.x).collect();
        let ys: Vec<f32> = series.iter().map(|(_, kp)| kp.y).collect();
        let xs = smooth_series(filter, &xs);
        let ys = smooth_series(filter, &ys);
        for (((i, kp), x), y) in series.into_iter().zip(xs).zip(ys) {
            track[i]
                .keypoints
                .insert(landmark, Keypoint::new(x, y, kp.confidence));
        }
    }
}

fn smooth_angle(track: &mut [&mut PersonResult], def: &AngleDefinition, filter: &FilterConfig) {
    let series: Vec<(usize, f32)> = track
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.angles.get(def.name).map(|v| (i, v)))
        .collect();
    if series.is_empty() {
        return;
    }

    let values: Vec<f32> = series.iter().map(|(_, v)| *v).collect();
    let smoothed: Vec<f32> = match def.kind {
        AngleKind::Joint => smooth_series(filter, &values)
            .into_iter()
            .map(|v| v.clamp(0.0, 180.0))
            .collect(),
        // unwrap across ±180 first so a wrap does not read as a jump
        AngleKind::Segment => smooth_series(filter, &unwrap_degrees(&values))
            .into_iter()
            .map(wrap_degrees)
            .collect(),
    };
    for ((i, _), v) in series.into_iter().zip(smoothed) {
        if let Some(slot) = angle_slot(&mut track[i].angles, def) {
            *slot = Some(v);
        }
    }
}

fn angle_slot<'a>(angles: &'a mut AngleSet, def: &AngleDefinition) -> Option<&'a mut Option<f32>> {
    match def.kind {
        AngleKind::Joint => angles.joint_angles.get_mut(def.name),
        AngleKind::Segment => angles.segment_angles.get_mut(def.name),
    }
}

fn unwrap_degrees(values: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len());
    let mut offset = 0.0f32;
    let mut prev: Option<f32> = None;
    for &v in values {
        if let Some(p) = prev {
            let jump = v - p;
            if jump > 180.0 {
                offset -= 360.0;
            } else if jump < -180.0 {
                offset += 360.0;
            }
        }
        prev = Some(v);
        out.push(v + offset);
    }
    out
}

/// (-180, 180]
fn wrap_degrees(v: f32) -> f32 {
    let w = (v + 180.0).rem_euclid(360.0) - 180.0;
    if w <= -180.0 {
        w + 360.0
    } else {
        w
    }
}
