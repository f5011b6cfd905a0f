//! Offline batch generation of scenario/worksheet pairs, written as JSONL.
//!
//! The lesson plan is every (language, level, scenario, grammar topic)
//! combination, shuffled with a fixed seed and truncated, so repeated runs
//! with the same arguments request the same lessons in the same order.

use std::io::Write;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use thiserror::Error;

use crate::schema::{Difficulty, Language, Worksheet};
use crate::services::worksheet::{WorksheetGenerator, WorksheetRequest};

pub const DEFAULT_SEED: u64 = 42;

const LANGUAGES: [Language; 3] = [Language::Fr, Language::Es, Language::En];
const LEVELS: [Difficulty; 6] = [
    Difficulty::A1,
    Difficulty::A2,
    Difficulty::B1,
    Difficulty::B2,
    Difficulty::C1,
    Difficulty::C2,
];

pub const SCENARIOS: [&str; 30] = [
    "Ordering food at a restaurant",
    "Checking into a hotel",
    "Asking for directions in the city",
    "Shopping at a clothing store",
    "Visiting a doctor's office",
    "Making a phone reservation",
    "Introducing yourself at a party",
    "Negotiating at a flea market",
    "Taking public transportation",
    "Renting an apartment",
    "Opening a bank account",
    "Attending a job interview",
    "Complaining about a product",
    "Planning a weekend trip",
    "Discussing the weather",
    "Describing your daily routine",
    "Talking about hobbies",
    "Explaining a recipe",
    "Discussing a movie you watched",
    "Asking about someone's family",
    "Describing childhood memories",
    "Making plans for the evening",
    "Reporting a lost item to police",
    "Getting a haircut at the salon",
    "Booking a flight at a travel agency",
    "Returning an item at a store",
    "Discussing current events",
    "Applying for a library card",
    "Enrolling in a language class",
    "Describing your hometown",
];

pub fn grammar_topics(level: Difficulty) -> &'static [&'static str] {
    match level {
        Difficulty::A1 => &[
            "present tense regular verbs",
            "articles and gender",
            "basic adjective agreement",
            "subject pronouns",
            "common prepositions",
            "numbers and time",
        ],
        Difficulty::A2 => &[
            "past tense (passé composé / pretérito)",
            "reflexive verbs",
            "possessive adjectives",
            "comparative adjectives",
            "negation",
            "direct object pronouns",
        ],
        Difficulty::B1 => &[
            "imperfect tense",
            "future tense",
            "conditional mood",
            "relative pronouns",
            "indirect object pronouns",
            "adverbs of frequency",
        ],
        Difficulty::B2 => &[
            "subjunctive mood (present)",
            "past subjunctive",
            "passive voice",
            "reported speech",
            "compound tenses",
            "idiomatic expressions",
        ],
        Difficulty::C1 => &[
            "literary tenses (passé simple / pretérito anterior)",
            "advanced subjunctive uses",
            "nominalization",
            "discourse connectors",
            "register and formality",
            "complex relative clauses",
        ],
        Difficulty::C2 => &[
            "stylistic inversion",
            "archaic and literary forms",
            "nuanced modal verbs",
            "complex conditional chains",
            "rhetorical devices",
            "professional and technical register",
        ],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LessonSpec {
    pub scenario: &'static str,
    pub language: Language,
    pub level: Difficulty,
    pub grammar_focus: &'static str,
}

impl LessonSpec {
    fn request(&self) -> WorksheetRequest {
        WorksheetRequest {
            scenario: self.scenario.to_string(),
            target_language: self.language,
            difficulty: self.level,
            grammar_focus: Some(self.grammar_focus.to_string()),
        }
    }
}

/// One JSONL line.
#[derive(Debug, Serialize)]
pub struct SyntheticLesson<'a> {
    pub scenario: &'a str,
    pub language: Language,
    pub level: Difficulty,
    pub grammar_focus: &'a str,
    pub worksheet: Worksheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub generated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub every: usize,
    pub pause: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self { every: 5, pause: Duration::from_secs(1) }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to write lesson: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode lesson: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The first `count` lessons of the seeded shuffle over every combination.
pub fn lesson_plan(count: usize, seed: u64) -> Vec<LessonSpec> {
    let mut combos = Vec::new();
    for language in LANGUAGES {
        for level in LEVELS {
            for scenario in SCENARIOS {
                for &grammar_focus in grammar_topics(level) {
                    combos.push(LessonSpec { scenario, language, level, grammar_focus });
                }
            }
        }
    }

    combos.shuffle(&mut StdRng::seed_from_u64(seed));
    combos.truncate(count);
    combos
}

/// Generates each planned lesson in turn. A failed lesson is logged and
/// skipped; only output errors stop the batch.
pub async fn generate_batch<W: Write>(
    generator: &WorksheetGenerator,
    plan: &[LessonSpec],
    throttle: Throttle,
    out: &mut W,
) -> Result<BatchSummary, BatchError> {
    let mut summary = BatchSummary::default();

    for (i, spec) in plan.iter().enumerate() {
        tracing::info!(
            index = i + 1,
            total = plan.len(),
            language = %spec.language,
            level = %spec.level,
            scenario = spec.scenario,
            grammar = spec.grammar_focus,
            "generating lesson"
        );

        match generator.generate(&spec.request()).await {
            Ok(worksheet) => {
                let line = SyntheticLesson {
                    scenario: spec.scenario,
                    language: spec.language,
                    level: spec.level,
                    grammar_focus: spec.grammar_focus,
                    worksheet,
                };
                serde_json::to_writer(&mut *out, &line)?;
                out.write_all(b"\n")?;
                summary.generated += 1;
            }
            Err(err) => {
                tracing::warn!(language = %spec.language, level = %spec.level, scenario = spec.scenario, error = %err, "lesson skipped");
                summary.failed += 1;
            }
        }

        if throttle.every > 0 && (i + 1) % throttle.every == 0 && !throttle.pause.is_zero() {
            tokio::time::sleep(throttle.pause).await;
        }
    }

    out.flush()?;
    Ok(summary)
}
