//! Notification recipient computation.

use std::collections::BTreeSet;

use crate::config::NotifyPolicy;
use crate::event::Attendee;
use crate::itip::SchedulingAction;

/// Compute who gets notified for a mutation.
///
/// Returns `(request, cancel)` recipient lists:
/// - remove: every previous attendee receives a CANCEL;
/// - other actions: attendees dropped from the list receive a CANCEL,
///   everyone on the new list receives a REQUEST (invitation or update),
///   unless their opt-out flag is set and the policy honors it.
///
/// The acting identity's own addresses are always excluded.
pub fn compute_recipients(
    action: SchedulingAction,
    old_attendees: &[Attendee],
    new_attendees: &[Attendee],
    actor_emails: &BTreeSet<String>,
    policy: &NotifyPolicy,
) -> (Vec<Attendee>, Vec<Attendee>) {
    if !policy.enabled {
        return (Vec::new(), Vec::new());
    }

    let is_actor =
        |a: &Attendee| actor_emails.iter().any(|e| a.matches_email(e));
    let in_new = |a: &Attendee| {
        new_attendees
            .iter()
            .any(|n| n.matches_email(&a.email))
    };

    if action == SchedulingAction::Remove {
        let cancel = old_attendees
            .iter()
            .filter(|a| !is_actor(a))
            .cloned()
            .collect();
        return (Vec::new(), cancel);
    }

    let cancel: Vec<Attendee> = old_attendees
        .iter()
        .filter(|a| !in_new(a) && !is_actor(a))
        .cloned()
        .collect();

    let request: Vec<Attendee> = new_attendees
        .iter()
        .filter(|a| !is_actor(a))
        .filter(|a| !(policy.honor_opt_out && a.noreply))
        .cloned()
        .collect();

    (request, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Attendee;

    fn actor() -> BTreeSet<String> {
        BTreeSet::from(["boss@example.com".to_string()])
    }

    fn attendees(emails: &[&str]) -> Vec<Attendee> {
        emails.iter().map(|e| Attendee::new(*e)).collect()
    }

    #[test]
    fn test_edit_requests_everyone_but_the_actor() {
        let old = attendees(&["boss@example.com", "a@example.com", "b@example.com"]);
        let (request, cancel) = compute_recipients(
            SchedulingAction::Edit,
            &old,
            &old,
            &actor(),
            &NotifyPolicy::default(),
        );
        let emails: Vec<&str> = request.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, ["a@example.com", "b@example.com"]);
        assert!(cancel.is_empty());
    }

    #[test]
    fn test_dropped_attendee_receives_cancel() {
        let old = attendees(&["boss@example.com", "a@example.com", "b@example.com"]);
        let new = attendees(&["boss@example.com", "a@example.com"]);
        let (request, cancel) = compute_recipients(
            SchedulingAction::Edit,
            &old,
            &new,
            &actor(),
            &NotifyPolicy::default(),
        );
        assert_eq!(request.len(), 1);
        assert_eq!(cancel.len(), 1);
        assert_eq!(cancel[0].email, "b@example.com");
    }

    #[test]
    fn test_remove_cancels_all_previous_attendees() {
        let old = attendees(&["boss@example.com", "a@example.com", "b@example.com"]);
        let (request, cancel) = compute_recipients(
            SchedulingAction::Remove,
            &old,
            &[],
            &actor(),
            &NotifyPolicy::default(),
        );
        assert!(request.is_empty());
        let emails: Vec<&str> = cancel.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, ["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_opt_out_is_honored_when_policy_allows() {
        let mut new = attendees(&["a@example.com", "b@example.com"]);
        new[1].noreply = true;

        let (request, _) = compute_recipients(
            SchedulingAction::Edit,
            &new,
            &new,
            &actor(),
            &NotifyPolicy::default(),
        );
        assert_eq!(request.len(), 1, "opted-out attendee is skipped");

        let strict = NotifyPolicy {
            enabled: true,
            honor_opt_out: false,
        };
        let (request, _) =
            compute_recipients(SchedulingAction::Edit, &new, &new, &actor(), &strict);
        assert_eq!(request.len(), 2, "opt-out ignored when policy says so");
    }

    #[test]
    fn test_disabled_policy_notifies_nobody() {
        let new = attendees(&["a@example.com"]);
        let policy = NotifyPolicy {
            enabled: false,
            honor_opt_out: true,
        };
        let (request, cancel) =
            compute_recipients(SchedulingAction::Edit, &[], &new, &actor(), &policy);
        assert!(request.is_empty() && cancel.is_empty());
    }

    #[test]
    fn test_actor_matching_is_case_insensitive() {
        let new = attendees(&["Boss@Example.com", "a@example.com"]);
        let (request, _) = compute_recipients(
            SchedulingAction::Edit,
            &new,
            &new,
            &actor(),
            &NotifyPolicy::default(),
        );
        assert_eq!(request.len(), 1);
        assert_eq!(request[0].email, "a@example.com");
    }
}
