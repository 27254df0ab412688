//! Message wording: check-in questions, answer feedback, re-prompts and the
//! morning summary.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::checkins::TypeTrend;
use crate::conversation::RepromptReason;
use crate::domains::checkin::CheckInType;

/// Fewer check-ins than this in the window is not worth a trend report.
pub const MIN_TREND_CHECKINS: usize = 3;

fn templates(check_in_type: CheckInType) -> &'static [&'static str] {
    match check_in_type {
        CheckInType::Mood => &[
            "😊 How are you feeling right now? (1-10)",
            "😊 What's your mood at the moment? (1-10)",
            "🌟 How would you rate your mood? (1-10)",
        ],
        CheckInType::Focus => &[
            "🎯 What's your focus level? (1-10)",
            "🎯 Are you concentrated right now? (1-10)",
            "🔍 How would you rate your ability to focus at the moment? (1-10)",
        ],
        CheckInType::Motivation => &[
            "🔥 What's your motivation level? (1-10)",
            "💪 Do you feel motivated right now? (1-10)",
            "🚀 How is your motivation today? (1-10)",
        ],
        CheckInType::Energy => &[
            "⚡ What's your energy level? (1-10)",
            "⚡ How are you doing energy-wise? (1-10)",
            "🔋 Rate your current energy level (1-10)",
        ],
        CheckInType::Stress => &[
            "😰 What's your stress level? (1-10)",
            "😌 Do you feel stressed? (1-10)",
            "💆 How would you rate your stress right now? (1-10)",
        ],
    }
}

/// Picks check-in types and phrasings. The random source is injectable so
/// tests can seed it.
pub struct QuestionComposer {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Default for QuestionComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionComposer {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    fn pick_index(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        }
    }

    /// Random pick when `randomize` is set, otherwise the slot's types are
    /// asked in turn, one per day. `None` only for an empty slot.
    pub fn pick_type(
        &self,
        types: &[CheckInType],
        randomize: bool,
        day_ordinal: u32,
    ) -> Option<CheckInType> {
        if types.is_empty() {
            return None;
        }
        let index = if randomize {
            self.pick_index(types.len())
        } else {
            day_ordinal as usize % types.len()
        };
        types.get(index).copied()
    }

    pub fn question(&self, check_in_type: CheckInType) -> String {
        let options = templates(check_in_type);
        options[self.pick_index(options.len())].to_string()
    }

    pub fn feedback(&self, check_in_type: CheckInType, value: i32) -> String {
        let emoji = check_in_type.emoji();
        if value >= 8 {
            format!("{emoji} Great! {value}/10, keep it up! 🎉")
        } else if value >= 5 {
            format!("{emoji} OK, {value}/10 recorded. You can do even better! 💪")
        } else {
            format!("{emoji} {value}/10... Take care of yourself! 🫂\n\nMaybe time for a break?")
        }
    }

    pub fn reprompt(&self, reason: RepromptReason) -> String {
        match reason {
            RepromptReason::NotANumber => "🤔 Just reply with a number from 1 to 10!".to_string(),
            RepromptReason::OutOfRange => {
                "📊 The number must be between 1 and 10. Try again!".to_string()
            }
        }
    }

    pub fn trends_message(&self, trends: &[TypeTrend], days: u32) -> String {
        let total: usize = trends.iter().map(|trend| trend.count).sum();
        if total < MIN_TREND_CHECKINS {
            return "📊 Not enough data yet to show trends. Keep answering the check-ins!"
                .to_string();
        }
        let mut message = format!("📈 *Your trends over {days} days*\n\n");
        for trend in trends {
            message.push_str(&trend_line(trend));
            message.push('\n');
        }
        message
    }

    pub fn morning_message(&self, trends: &[TypeTrend], days: u32) -> String {
        let mut message = String::from("🌅 *Good morning!*\n\n");
        if trends.is_empty() {
            message.push_str("Answer a few check-ins today and I'll share your trends tomorrow.\n");
        } else {
            message.push_str(&format!("Here is how your last {days} days looked:\n"));
            for trend in trends {
                message.push_str(&trend_line(trend));
                message.push('\n');
            }
        }
        message.push_str("\n✨ Have a productive day! 💪");
        message
    }
}

fn trend_line(trend: &TypeTrend) -> String {
    let arrow = match trend.delta {
        d if d > 0 => "📈",
        d if d < 0 => "📉",
        _ => "➡️",
    };
    format!(
        "{} *{}*: {:.1}/10 {}",
        trend.check_in_type.emoji(),
        trend.check_in_type.label(),
        trend.average,
        arrow
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_type_stays_within_slot() {
        let composer = QuestionComposer::seeded(7);
        let slot = [CheckInType::Mood, CheckInType::Energy];
        for day in 0..50 {
            let picked = composer.pick_type(&slot, true, day).unwrap();
            assert!(slot.contains(&picked));
        }
        assert_eq!(composer.pick_type(&[], true, 0), None);
    }

    #[test]
    fn rotation_is_deterministic_without_randomize() {
        let composer = QuestionComposer::seeded(1);
        let slot = [CheckInType::Focus, CheckInType::Motivation];
        assert_eq!(composer.pick_type(&slot, false, 10), Some(CheckInType::Focus));
        assert_eq!(composer.pick_type(&slot, false, 11), Some(CheckInType::Motivation));
    }

    #[test]
    fn same_seed_same_wording() {
        let a = QuestionComposer::seeded(42);
        let b = QuestionComposer::seeded(42);
        for _ in 0..5 {
            assert_eq!(a.question(CheckInType::Stress), b.question(CheckInType::Stress));
        }
        assert!(templates(CheckInType::Stress).contains(&a.question(CheckInType::Stress).as_str()));
    }

    #[test]
    fn feedback_bands() {
        let composer = QuestionComposer::seeded(0);
        assert!(composer.feedback(CheckInType::Energy, 9).contains("Great"));
        assert!(composer.feedback(CheckInType::Energy, 5).contains("OK"));
        assert!(composer.feedback(CheckInType::Energy, 2).contains("Take care"));
    }

    #[test]
    fn morning_message_lists_trends() {
        let composer = QuestionComposer::seeded(0);
        let trends = vec![TypeTrend {
            check_in_type: CheckInType::Mood,
            average: 6.5,
            count: 2,
            delta: -1,
        }];
        let message = composer.morning_message(&trends, 7);
        assert!(message.contains("Mood"));
        assert!(message.contains("6.5/10"));
        assert!(message.contains("📉"));
    }

    #[test]
    fn trends_need_three_check_ins() {
        let composer = QuestionComposer::seeded(0);
        let mut trends = vec![TypeTrend {
            check_in_type: CheckInType::Focus,
            average: 7.0,
            count: 2,
            delta: 2,
        }];
        assert!(composer.trends_message(&trends, 7).contains("Not enough data"));

        trends.push(TypeTrend {
            check_in_type: CheckInType::Stress,
            average: 3.0,
            count: 1,
            delta: 0,
        });
        let message = composer.trends_message(&trends, 7);
        assert!(message.contains("Focus"));
        assert!(message.contains("3.0/10"));
    }
}
