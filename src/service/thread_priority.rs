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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Environment variable that overrides the service thread priority (0-99).
pub const PRIORITY_ENV: &str = "MIDIMUX_THREAD_PRIORITY";

/// Default priority for the service thread when MIDIMUX_THREAD_PRIORITY is unset.
const DEFAULT_SERVICE_THREAD_PRIORITY: u8 = 70;

/// Reads MIDIMUX_THREAD_PRIORITY once, before the service thread starts.
/// Invalid values fall back to the default.
pub fn service_thread_priority() -> Option<ThreadPriorityValue> {
    let requested = std::env::var(PRIORITY_ENV)
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_SERVICE_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(requested).ok()
}

/// Raises the calling thread's priority. Failure is logged and otherwise
/// ignored; the engine still runs, just with more jitter.
pub fn configure_service_thread_priority(priority: Option<ThreadPriorityValue>) {
    let Some(priority) = priority else {
        return;
    };
    match set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
        Ok(()) => info!(priority = u8::from(priority), "Raised service thread priority."),
        Err(e) => warn!(error = %e, "Failed to raise service thread priority."),
    }
}
