// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent output parser.
//!
//! The agent only prints human-readable summary lines such as
//!
//! ```text
//! [#2089b0 SIZE:12MiB/100MiB(12%) CN:8 DL:3.2MiB/s ETA:0:00:27]
//! ```
//!
//! so progress is scraped with three patterns. Every field has a sentinel
//! value; unmatched input never fails. The parser is a pure function over
//! the input and may be called from any task concurrently.

use std::sync::LazyLock;
use regex::Regex;

use super::types::ProgressSnapshot;

/// Rate reported when the chunk carries no rate.
pub const RATE_SENTINEL: &str = "0 KB/s";

/// Remaining time reported when the chunk carries no ETA.
pub const REMAINING_SENTINEL: &str = "--:--:--";

// Static regex patterns - compiled once at first use
static PERCENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)%")
        .expect("PERCENT_PATTERN is a valid regex")
});

static RATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9.]+[KMGT]?i?B/s)")
        .expect("RATE_PATTERN is a valid regex")
});

static REMAINING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+:[0-9]+:[0-9]+)")
        .expect("REMAINING_PATTERN is a valid regex")
});

/// Parse one chunk of agent stdout into a progress snapshot.
///
/// Each field takes the first match in the chunk. Percentages above 100
/// are clamped; a digit run too long for `u8` also clamps to 100.
pub fn parse_agent_output(chunk: &str) -> ProgressSnapshot {
    let progress_percent = PERCENT_PATTERN
        .captures(chunk)
        .and_then(|caps| caps.get(1))
        .map(|m| parse_percent(m.as_str()))
        .unwrap_or(0);

    let transfer_rate = RATE_PATTERN
        .captures(chunk)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| RATE_SENTINEL.to_string());

    let estimated_remaining = REMAINING_PATTERN
        .captures(chunk)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| REMAINING_SENTINEL.to_string());

    ProgressSnapshot {
        progress_percent,
        transfer_rate,
        estimated_remaining,
    }
}

fn parse_percent(digits: &str) -> u8 {
    match digits.parse::<u64>() {
        Ok(value) => value.min(100) as u8,
        // only digits reach here, so the sole failure is overflow
        Err(_) => 100,
    }
}
