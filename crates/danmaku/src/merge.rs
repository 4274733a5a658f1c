//! Duplicate-burst merging and high-energy promotion.
//!
//! Comments with identical text are grouped. Groups with at least
//! `min_group_size` members are "repetitive" and scored by
//! `count + weight_factor * max_weight`. The best `high_energy_slots`
//! groups are promoted: their densest burst becomes a single count-up
//! announcement in the screen center. Bursts of the remaining repetitive
//! groups are compacted into one `"text ×N"` comment.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use crate::event::{
    AdvancedCommentEvent, CommentEvent, MergedResult, STANDARD_FONT_SIZE, sort_advanced,
    sort_standard,
};

/// Tuning constants for the merge pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Run the merge pass at all
    pub enabled: bool,
    /// Smallest group considered repetitive
    pub min_group_size: usize,
    /// Number of groups promoted to high-energy announcements
    pub high_energy_slots: usize,
    /// Multiplier applied to the group's maximum weight when scoring
    pub weight_factor: f64,
    /// Largest gap between consecutive members of one burst
    pub batch_gap_ms: i64,
    /// Lower bound for the count-up window
    pub min_accumulation_ms: i64,
    /// Time an announcement stays after its count-up window
    pub hold_ms: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_group_size: 3,
            high_energy_slots: 2,
            weight_factor: 0.5,
            batch_gap_ms: 500,
            min_accumulation_ms: 1500,
            hold_ms: 3000,
        }
    }
}

/// Comments sharing one text, members in time order.
struct Group<'a> {
    text: &'a str,
    members: Vec<&'a CommentEvent>,
}

impl Group<'_> {
    fn score(&self, weight_factor: f64) -> f64 {
        let max_weight = self.members.iter().map(|e| e.weight).max().unwrap_or(0);
        self.members.len() as f64 + weight_factor * f64::from(max_weight)
    }

    fn first_ms(&self) -> i64 {
        self.members.first().map(|e| e.show_at_ms).unwrap_or(0)
    }

    /// Split members into bursts where consecutive gaps stay within `gap_ms`.
    fn batches(&self, gap_ms: i64) -> Vec<&[&CommentEvent]> {
        let mut batches = Vec::new();
        let mut start = 0;
        for i in 1..self.members.len() {
            if self.members[i].show_at_ms - self.members[i - 1].show_at_ms > gap_ms {
                batches.push(&self.members[start..i]);
                start = i;
            }
        }
        if start < self.members.len() {
            batches.push(&self.members[start..]);
        }
        batches
    }
}

/// Collapse duplicate bursts in a decoded event list.
///
/// Singletons and groups below `min_group_size` pass through unchanged. At
/// most `high_energy_slots` advanced events are produced. Both output lists
/// are sorted by time.
pub fn merge(events: &[CommentEvent], config: &MergeConfig) -> MergedResult {
    if !config.enabled {
        let mut standard = events.to_vec();
        sort_standard(&mut standard);
        return MergedResult {
            standard,
            advanced: Vec::new(),
        };
    }

    let groups = group_by_text(events);

    let min_group_size = config.min_group_size.max(2);
    let mut ranked: Vec<(usize, f64)> = groups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.members.len() >= min_group_size)
        .map(|(i, g)| (i, g.score(config.weight_factor)))
        .collect();
    ranked.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| groups[*a].first_ms().cmp(&groups[*b].first_ms()))
            .then_with(|| groups[*a].text.cmp(groups[*b].text))
    });

    let mut roles = vec![Role::Plain; groups.len()];
    for (rank, (index, _)) in ranked.iter().enumerate() {
        roles[*index] = if rank < config.high_energy_slots {
            Role::HighEnergy
        } else {
            Role::Repetitive
        };
    }

    let mut standard = Vec::with_capacity(events.len());
    let mut advanced = Vec::new();

    for (group, role) in groups.iter().zip(&roles) {
        if *role == Role::Plain {
            standard.extend(group.members.iter().map(|e| (*e).clone()));
            continue;
        }

        let batches = group.batches(config.batch_gap_ms);
        let promoted = if *role == Role::HighEnergy {
            densest_batch(&batches)
        } else {
            None
        };

        for (batch_index, batch) in batches.iter().enumerate() {
            if batch.len() < 2 {
                standard.extend(batch.iter().map(|e| (*e).clone()));
            } else if promoted == Some(batch_index) {
                advanced.push(high_energy_event(group.text, batch, config));
            } else {
                standard.push(compacted_event(group.text, batch));
            }
        }
    }

    sort_standard(&mut standard);
    sort_advanced(&mut advanced);

    debug!(
        input = events.len(),
        standard = standard.len(),
        advanced = advanced.len(),
        repetitive_groups = ranked.len(),
        "Merged danmaku"
    );

    MergedResult { standard, advanced }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Plain,
    Repetitive,
    HighEnergy,
}

fn group_by_text(events: &[CommentEvent]) -> Vec<Group<'_>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    for event in events {
        let slot = *index.entry(event.text.as_str()).or_insert_with(|| {
            groups.push(Group {
                text: event.text.as_str(),
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].members.push(event);
    }
    for group in &mut groups {
        group.members.sort_by_key(|e| e.show_at_ms);
    }
    groups
}

/// Index of the largest burst with at least two members, earliest on ties.
fn densest_batch(batches: &[&[&CommentEvent]]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, batch) in batches.iter().enumerate() {
        if batch.len() < 2 {
            continue;
        }
        match best {
            Some(b) if batches[b].len() >= batch.len() => {}
            _ => best = Some(i),
        }
    }
    best
}

/// The `"text ×N"` label used for compacted bursts.
pub fn compacted_text(text: &str, count: usize) -> String {
    format!("{} ×{}", text, count)
}

fn compacted_event(text: &str, batch: &[&CommentEvent]) -> CommentEvent {
    let first = batch[0];
    CommentEvent {
        text: compacted_text(text, batch.len()),
        ..first.clone()
    }
}

fn high_energy_event(
    text: &str,
    batch: &[&CommentEvent],
    config: &MergeConfig,
) -> AdvancedCommentEvent {
    let first = batch[0];
    let last = batch[batch.len() - 1];
    let span = last.show_at_ms - first.show_at_ms;
    let accumulation_ms = span.max(config.min_accumulation_ms);

    AdvancedCommentEvent {
        id: format!("high-energy-{}-{}", first.id, first.show_at_ms),
        content: text.to_string(),
        start_ms: first.show_at_ms,
        duration_ms: accumulation_ms + config.hold_ms,
        start_pos: (0.5, 0.5),
        end_pos: (0.5, 0.5),
        font_size: STANDARD_FONT_SIZE * first.font_scale,
        color_rgb: first.color_rgb(),
        alpha: 1.0,
        rotate_z: 0.0,
        rotate_y: 0.0,
        max_count: batch.len() as i32,
        accumulation_ms,
    }
}
