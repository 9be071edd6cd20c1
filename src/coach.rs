//! Canned coping replies for the chat panel.
//!
//! A keyword lookup, checked in order. No text is generated.

use crate::core::metrics::StressLevel;
use rand::seq::SliceRandom;
use rand::Rng;

const EXAM_REPLY: &str = "Exams can be overwhelming. Remember to take breaks. Try the \
    25-minute study, 5-minute break method. You've got this.";

const TIRED_REPLY: &str = "Rest is productive too. If you're feeling drained, a 20-minute \
    power nap might be more effective than pushing through.";

const ANXIETY_REPLY: &str = "I hear you. Anxiety is tough, but it passes. Let's focus on your \
    exhale. Make it longer than your inhale to calm your nervous system.";

const FOCUS_REPLY: &str = "To improve focus, try clearing your physical workspace and doing a \
    1-minute box breathing exercise to reset your mind.";

const GREETING_REPLY: &str = "Hello! I'm here to help you monitor your stress and stay \
    balanced. How are you feeling right now?";

/// Replies used when nothing matches.
pub const DEFAULT_REPLIES: [&str; 4] = [
    "I'm listening. Tell me more about how that feels.",
    "That sounds challenging. Taking a deep breath can sometimes help reset the perspective.",
    "I'm here to support you. Remember to check your breathing.",
    "Identifying these feelings is the first step to managing them.",
];

/// Keyword groups and their replies, in priority order.
const TOPICS: &[(&[&str], &str)] = &[
    (&["exam", "test", "study"], EXAM_REPLY),
    (&["tired", "sleep", "exhausted"], TIRED_REPLY),
    (&["anxio", "panic", "scared"], ANXIETY_REPLY),
    (&["focus", "concentrate"], FOCUS_REPLY),
    (&["hello", "hi"], GREETING_REPLY),
];

/// Reply to `input` given the user's current readings.
pub fn respond(input: &str, bpm: u32, stress: StressLevel) -> String {
    respond_with(input, bpm, stress, &mut rand::thread_rng())
}

/// Like [`respond`], drawing the fallback reply from `rng`.
pub fn respond_with<R: Rng + ?Sized>(
    input: &str,
    bpm: u32,
    stress: StressLevel,
    rng: &mut R,
) -> String {
    let input = input.to_lowercase();

    if stress == StressLevel::High && (input.contains("stress") || input.contains("help")) {
        return format!(
            "I notice your heart rate is high ({bpm} BPM). Let's try to ground ourselves \
             first. Can you name 3 things you see around you?"
        );
    }

    // Plain substring match: "hi" also fires on "this" or "chill".
    for (keywords, reply) in TOPICS {
        if keywords.iter().any(|k| input.contains(k)) {
            return (*reply).to_string();
        }
    }

    DEFAULT_REPLIES
        .choose(rng)
        .copied()
        .unwrap_or(DEFAULT_REPLIES[0])
        .to_string()
}
