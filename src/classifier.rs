use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

/// Messages shorter than this (in characters) are never alerts.
pub const MIN_ALERT_LENGTH: usize = 80;

/// Distinct content patterns needed before a message counts as an alert.
pub const MIN_PATTERN_MATCHES: usize = 3;

/// Structural markers of an InPlayGuru alert, matched case-insensitively
/// with `^` anchoring at any line start.
const CONTENT_PATTERNS: &[(&str, &str)] = &[
    ("strike_rate", r"Strike Rate %:\s*\d+"),
    ("pre_match_odds", r"1X2 Pre-Match Odds:\s*[\d.]+"),
    ("over_under_odds", r"Over/Under\s+[\d.]+\s+Odds:"),
    ("timer", r"Timer:\s*\d+'"),
    ("kickoff", r"Kickoff:\s*In\s*\d+"),
    ("goals", r"Goals:\s*\d+\s*[-–]\s*\d+"),
    ("btts", r"^BTTS\s*:\s*(yes|no)"),
    ("draw_histo", r"^DRAW\s*\[HISTO\].*\d+%"),
    ("home_win_histo", r"^H\s*win\s*\[HISTO\].*\d+%"),
    ("away_win_histo", r"^A\s*win\s*\[HISTO\].*\d+%"),
    (
        "competition",
        r"Europe Friendlies|Premier League|Championship|Liga|Serie A|Bundesliga|Cosafa",
    ),
    ("versus", r"\w+\s+vs\s+\w+"),
    ("ht_score", r"HT Score:\s*\d+-\d+"),
    ("ft_score", r"FT Score:\s*\d+-\d+"),
    ("last_goal", r"Last Goal:\s*\w+\s*at\s*\d+"),
    ("outcome", r"Hit|Miss"),
];

/// Conversational or administrative noise. Any hit overrides a positive
/// classification. `^` only anchors at the start of the whole message.
const EXCLUSION_PATTERNS: &[(&str, &str)] = &[
    ("greeting", r"^(good\s+morning|hello|hi|thanks|thank\s+you)"),
    ("help_request", r"(question|help|how.*work|settings|admin)"),
    ("bot_command", r"^/\w+"),
    ("welcome", r"^(welcome|bienvenue)"),
    ("subscription", r"(subscribe|unsubscribe|subscription)"),
];

struct NamedPattern {
    name: &'static str,
    regex: Regex,
}

fn compile(patterns: &[(&'static str, &str)], multi_line: bool) -> Result<Vec<NamedPattern>> {
    patterns
        .iter()
        .map(|&(name, source)| {
            let regex = RegexBuilder::new(source)
                .case_insensitive(true)
                .multi_line(multi_line)
                .build()
                .with_context(|| format!("Invalid pattern '{}': {}", name, source))?;
            Ok(NamedPattern { name, regex })
        })
        .collect()
}

/// Outcome of running the heuristic over one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Analysis {
    /// Names of the content patterns that matched, in pattern order
    pub matched: Vec<&'static str>,
    /// First exclusion pattern that matched, if any
    pub excluded_by: Option<&'static str>,
    /// True when the message was rejected on length before matching
    pub too_short: bool,
}

impl Analysis {
    pub fn match_count(&self) -> usize {
        self.matched.len()
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded_by.is_some()
    }

    pub fn is_alert(&self) -> bool {
        !self.too_short && self.match_count() >= MIN_PATTERN_MATCHES && !self.is_excluded()
    }
}

/// Pattern-count heuristic separating alerts from chatter. Holds only
/// compiled patterns, so one instance can be reused for every message.
pub struct Classifier {
    content: Vec<NamedPattern>,
    exclusions: Vec<NamedPattern>,
}

impl Classifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            content: compile(CONTENT_PATTERNS, true)?,
            exclusions: compile(EXCLUSION_PATTERNS, false)?,
        })
    }

    /// Run every pattern over `text` without logging.
    pub fn analyze(&self, text: &str) -> Analysis {
        if text.chars().count() < MIN_ALERT_LENGTH {
            return Analysis {
                too_short: true,
                ..Analysis::default()
            };
        }

        let matched = self
            .content
            .iter()
            .filter(|p| p.regex.is_match(text))
            .map(|p| p.name)
            .collect();

        let excluded_by = self
            .exclusions
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.name);

        Analysis {
            matched,
            excluded_by,
            too_short: false,
        }
    }

    /// Classify `text`, logging the analysis. Empty text is never an alert.
    pub fn is_alert(&self, text: &str) -> bool {
        let analysis = self.analyze(text);
        if analysis.too_short {
            debug!("Message too short to be an alert ({} chars)", text.chars().count());
            return false;
        }

        info!(
            "Message analysis: {} patterns matched, excluded: {}",
            analysis.match_count(),
            analysis.is_excluded()
        );
        debug!(
            "Matching patterns: {:?}, exclusion: {:?}",
            analysis.matched, analysis.excluded_by
        );
        debug!("Message preview: {}...", preview(text, 150));

        analysis.is_alert()
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
