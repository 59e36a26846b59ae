//! Data Quality Score.
//!
//! A 0.1–1.0 reliability estimate for a fixture's current snapshot built from
//! three weighted components:
//!
//! | component          | full weight                         | partial              |
//! |--------------------|-------------------------------------|----------------------|
//! | latency            | latency < fast bound (5 s)          | ½ below threshold    |
//! | stats availability | SOG *and* dangerous attacks present | 0.7 if only one      |
//! | freshness          | match minute > 0                    | –                    |
//!
//! plus +0.10 for provider xG, +0.05 for corner data and −0.10 for a partial
//! fixture. Rounded to two decimals, then clamped.

use crate::config::DqsConfig;
use crate::db::models::{DataQuality, FeedFixture};

pub const DQS_MIN: f64 = 0.1;
pub const DQS_MAX: f64 = 1.0;

const XG_BONUS: f64 = 0.1;
const CORNER_BONUS: f64 = 0.05;
const PARTIAL_PENALTY: f64 = 0.1;
const SINGLE_STAT_FACTOR: f64 = 0.7;

pub fn score(fixture: &FeedFixture, cfg: &DqsConfig) -> f64 {
    let mut score = 0.0;

    if fixture.latency_ms < cfg.fast_latency_ms {
        score += cfg.weight_latency;
    } else if fixture.latency_ms < cfg.latency_threshold_ms {
        score += cfg.weight_latency * 0.5;
    }

    let stats = &fixture.stats;
    let has_sog = stats.shots_on_target.is_present();
    let has_attacks = stats.dangerous_attacks.is_present();
    if has_sog && has_attacks {
        score += cfg.weight_stats;
    } else if has_sog || has_attacks {
        score += cfg.weight_stats * SINGLE_STAT_FACTOR;
    }

    if fixture.minute.elapsed() > 0 {
        score += cfg.weight_freshness;
    }

    if stats.xg.map(|xg| xg.is_present()).unwrap_or(false) {
        score += XG_BONUS;
    }
    if stats.corners.is_present() {
        score += CORNER_BONUS;
    }
    if fixture.is_partial {
        score -= PARTIAL_PENALTY;
    }

    ((score * 100.0).round() / 100.0).clamp(DQS_MIN, DQS_MAX)
}

pub fn quality_label(dqs: f64, cfg: &DqsConfig) -> DataQuality {
    if dqs >= cfg.threshold {
        DataQuality::Ok
    } else {
        DataQuality::Low
    }
}
