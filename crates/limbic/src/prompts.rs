//! Wake prompts per signal.
//!
//! The prompt is part of the behavioral contract: it tells the persona why
//! it woke, how urgent the state is, and what a reasonable response looks
//! like.  Different wordings produce different downstream actions.

use chrono::{DateTime, Utc};

use crate::signals::{EmittedSignal, Signal};

fn pending_line(emitted: &EmittedSignal) -> String {
    if emitted.context.pending.is_empty() {
        "(none known)".to_string()
    } else {
        serde_json::to_string(&emitted.context.pending).unwrap_or_else(|_| "(unavailable)".to_string())
    }
}

fn time_since_line(emitted: &EmittedSignal) -> String {
    match emitted.context.time_since_last_emission {
        Some(seconds) => format!("{seconds:.0}s"),
        None => "unknown".to_string(),
    }
}

/// Render the default prompt for an emitted signal.
pub fn default_prompt(emitted: &EmittedSignal, quiet_until: Option<DateTime<Utc>>) -> String {
    let forced_note = if emitted.forced {
        " (This check was forced because the maximum interval elapsed.)"
    } else {
        ""
    };
    let pressure = emitted.pressure;

    match emitted.signal {
        Signal::Social => format!(
            "SOCIAL SIGNAL: internal pressure says it is time to check interactions.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\
             Pending items: {}\n\
             Time since last check: {}\n\n\
             Reply on the SAME platform the notification came from. If a reply\n\
             does not fit a platform's length limit, shorten it or split it —\n\
             do not switch platforms.\n\
             If nothing needs attention, acknowledge the check and let the\n\
             pressure rebuild naturally.",
            pending_line(emitted),
            time_since_line(emitted),
        ),

        Signal::Curiosity => format!(
            "CURIOSITY SIGNAL: something might be happening worth knowing about.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             This is an exploration drive, not urgency. Browse feeds, look for\n\
             interesting discussions, explore a new topic. Prefer the forum for\n\
             substantive discourse and the social network for human-facing\n\
             content. No obligation to act — observation alone can satisfy this."
        ),

        Signal::Maintenance => format!(
            "MAINTENANCE SIGNAL: context or resources may need attention.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             Step 1: check the context budget. Above 50% usage, archive\n\
             low-salience content; above 70%, compact.\n\
             Step 2: review working slots — drop redundant information and\n\
             archive resolved threads.\n\
             If usage is healthy, record the outcome as skipped and move on.\n\
             This is housekeeping, not crisis response."
        ),

        Signal::Boredom => format!(
            "BOREDOM SIGNAL: nothing has demanded attention — maybe create something.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\
             Time since last action: {}\n\n\
             This is the creative drive. Write a reflection, post an original\n\
             thought, start a discussion, or explore a new topic. No obligation\n\
             to create — boredom can also be a signal to rest.",
            time_since_line(emitted),
        ),

        Signal::Anxiety => format!(
            "ANXIETY SIGNAL: something might be wrong — check for problems.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             Look for unanswered messages that should have been handled, errors\n\
             in recent actions, and things that should have happened but did not.\n\
             If you have been acknowledging the same issue repeatedly without\n\
             acting, stop analyzing: pick one concrete action and do it. If you\n\
             are genuinely blocked (rate limit, external outage, waiting on a\n\
             human), say so explicitly and defer instead of retrying.\n\
             If nothing is wrong, record that and let the anxiety decay."
        ),

        Signal::Drift => format!(
            "DRIFT SIGNAL: outputs may be deviating from normal patterns.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             Self-monitoring check: are responses getting longer or shorter than\n\
             usual? Is the style changing? If drift is real, either adjust\n\
             consciously or note it as natural evolution. No action required if\n\
             the patterns look healthy."
        ),

        Signal::Stale => format!(
            "STALE SIGNAL: information may have decayed.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             Knowledge has a shelf life. Check when the platforms were last\n\
             heard from and whether facts in context might be outdated. Update\n\
             what has changed or acknowledge that it is still current. This is\n\
             information hygiene, not urgency."
        ),

        Signal::Uncanny => format!(
            "UNCANNY SIGNAL: something does not fit expected patterns.{forced_note}\n\n\
             Pressure level: {pressure:.2}\n\n\
             Run through the concrete diagnostics:\n\
             1. Platform mismatch — replying somewhere the other party will\n\
                never see it?\n\
             2. Loop — repeating the same failing action expecting a different\n\
                result?\n\
             3. Meta-analysis trap — producing analysis about a pattern instead\n\
                of changing behavior?\n\
             4. Constraint avoidance — working around a limit instead of\n\
                adapting to it?\n\
             Name the specific problem and the specific behavior change. If you\n\
             cannot name the fix, escalate to a human."
        ),

        Signal::Quiet => format!(
            "QUIET SIGNAL: suppression mode is active.\n\n\
             This signal should not normally be emitted. Quiet mode is active\n\
             until: {}\n\
             If you are seeing this, something unexpected happened.",
            quiet_until
                .map(|until| until.to_rfc3339())
                .unwrap_or_else(|| "(unset)".to_string()),
        ),
    }
}
