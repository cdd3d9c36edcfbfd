// SPDX-License-Identifier: MIT OR Apache-2.0
//! Title-based meeting status parser (§4.1 "Status parser").

use engagic_core::MeetingStatus;

/// Scan `title` for disposition keywords in priority order and return the
/// first match: CANCEL → [`MeetingStatus::Cancelled`], POSTPONE →
/// [`MeetingStatus::Postponed`], RESCHEDULE → [`MeetingStatus::Rescheduled`],
/// REVISED|AMENDMENT|UPDATED → [`MeetingStatus::Revised`]. `None` when the
/// title carries no such marker.
pub fn parse_status_from_title(title: &str) -> Option<MeetingStatus> {
    let upper = title.to_uppercase();
    if upper.contains("CANCEL") {
        Some(MeetingStatus::Cancelled)
    } else if upper.contains("POSTPONE") {
        Some(MeetingStatus::Postponed)
    } else if upper.contains("RESCHEDULE") {
        Some(MeetingStatus::Rescheduled)
    } else if upper.contains("REVISED") || upper.contains("AMENDMENT") || upper.contains("UPDATED") {
        Some(MeetingStatus::Revised)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cancellation() {
        assert_eq!(parse_status_from_title("City Council Meeting - CANCELLED"), Some(MeetingStatus::Cancelled));
    }

    #[test]
    fn detects_postponement_case_insensitively() {
        assert_eq!(parse_status_from_title("Planning Commission (postponed)"), Some(MeetingStatus::Postponed));
    }

    #[test]
    fn detects_reschedule() {
        assert_eq!(parse_status_from_title("Budget Workshop - RESCHEDULED to March 5"), Some(MeetingStatus::Rescheduled));
    }

    #[test]
    fn detects_revision_via_amendment() {
        assert_eq!(parse_status_from_title("Agenda AMENDMENT #2"), Some(MeetingStatus::Revised));
    }

    #[test]
    fn detects_revision_via_updated() {
        assert_eq!(parse_status_from_title("UPDATED Agenda"), Some(MeetingStatus::Revised));
    }

    #[test]
    fn cancel_takes_priority_over_reschedule() {
        let title = "Meeting CANCELLED, will be RESCHEDULED";
        assert_eq!(parse_status_from_title(title), Some(MeetingStatus::Cancelled));
    }

    #[test]
    fn plain_title_has_no_status() {
        assert_eq!(parse_status_from_title("Regular City Council Meeting"), None);
    }
}
