// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Thread priority helpers.
//!
//! The audio collaborator calls [`promote_audio_thread`] from the thread
//! that will drive [`Engine::render`](crate::engine::Engine::render). The
//! disk thread demotes itself so streaming never competes with rendering.

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, info};

/// Default priority for the audio thread when POLYSAMPLER_THREAD_PRIORITY is
/// unset.
const DEFAULT_AUDIO_THREAD_PRIORITY: u8 = 70;

/// Reads POLYSAMPLER_THREAD_PRIORITY (0-99) once; call before entering the
/// render loop so the env var is never touched on the hot path.
pub fn audio_thread_priority() -> ThreadPriorityValue {
    std::env::var("POLYSAMPLER_THREAD_PRIORITY")
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_AUDIO_THREAD_PRIORITY).unwrap())
}

/// Attempts to give the calling thread real-time priority. Failure is
/// logged and otherwise ignored; the engine works (with weaker latency
/// guarantees) without it.
pub fn promote_audio_thread() {
    let priority = audio_thread_priority();
    match set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
        Ok(()) => info!(?priority, "Audio thread promoted to real-time priority"),
        Err(e) => debug!(error = ?e, "Could not promote audio thread"),
    }
}

/// Keeps the disk thread at a modest priority so it never preempts the
/// audio thread.
pub(crate) fn demote_disk_thread() {
    let _ = set_current_thread_priority(ThreadPriority::Min);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_thread_priority_ignores_bad_values() {
        std::env::set_var("POLYSAMPLER_THREAD_PRIORITY", "not-a-number");
        let _ = audio_thread_priority();
        std::env::set_var("POLYSAMPLER_THREAD_PRIORITY", "250");
        let _ = audio_thread_priority();
        std::env::remove_var("POLYSAMPLER_THREAD_PRIORITY");
    }
}
