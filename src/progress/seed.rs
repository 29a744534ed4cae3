//! Built-in question sequence.
//!
//! Seeded on startup with `INSERT OR IGNORE`, so operators can edit rows
//! in place without them being clobbered on restart.

use crate::progress::model::Question;

/// The default ten-question sequence, in answer order.
pub fn default_questions() -> Vec<Question> {
    [
        "What is your favorite color and why do you like it?",
        "If you could have dinner with any historical figure, who would it be and what would you talk about?",
        "What's the most challenging thing you've ever learned?",
        "Describe your ideal weekend in three words.",
        "What's a skill you've always wanted to learn but haven't had the time for?",
        "If you could travel anywhere in the world right now, where would you go?",
        "What's the best piece of advice you've ever received?",
        "What's something that always makes you smile?",
        "If you could solve one world problem, what would it be?",
        "What's your biggest accomplishment so far?",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Question::text_question(i as i64 + 1, *text, i as i64 + 1))
    .collect()
}
