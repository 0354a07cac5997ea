//! Parsing of model replies into fenced blocks.
//!
//! For each declared tag the parser extracts zero or
//! one fenced block (the first one carrying that tag) and reports absence as
//! `None`. Fences follow the CommonMark backtick rules closely enough for model
//! output: an opening line of three or more backticks followed by an info
//! string, closed by a line of at least as many backticks and nothing else.

/// Maximum length of a strategy line derived from a command block.
pub const STRATEGY_FALLBACK_CHARS: usize = 80;

/// Tags the loop understands in model replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Shell commands to execute.
    Commands,
    /// One-line description of what the commands attempt.
    Strategy,
    /// Steps the human must perform by hand.
    Manual,
    /// Summary of the finished work, persisted on completion.
    DoneSummary,
}

impl BlockTag {
    /// Info strings accepted for this tag (matched case-insensitively).
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            BlockTag::Commands => &["bash", "sh", "shell"],
            BlockTag::Strategy => &["strategy"],
            BlockTag::Manual => &["manual"],
            BlockTag::DoneSummary => &["done", "summary"],
        }
    }

    fn matches(self, info: &str) -> bool {
        self.aliases()
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(info))
    }
}

/// A closed fenced block found in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// First word of the info string, lowercased. Empty for bare fences.
    pub info: String,
    pub body: String,
}

/// All closed fenced blocks in `text`, in order of appearance.
///
/// An opening fence without a matching close is dropped along with the rest of
/// the text.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let ticks = leading_backticks(trimmed);

        let Some((open_ticks, _, body)) = open.as_mut() else {
            if ticks >= 3 {
                let info = trimmed[ticks..]
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if !info.contains('`') {
                    open = Some((ticks, info, Vec::new()));
                }
            }
            continue;
        };

        let closes = ticks >= *open_ticks && trimmed.trim_end().len() == ticks;
        if !closes {
            body.push(line);
            continue;
        }
        if let Some((_, info, body)) = open.take() {
            blocks.push(FencedBlock {
                info,
                body: body.join("\n").trim().to_string(),
            });
        }
    }

    blocks
}

fn leading_backticks(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b'`').count()
}

/// Extract zero or one block per declared tag. The result has one slot per
/// entry of `tags`, in the same order.
pub fn extract_blocks(text: &str, tags: &[BlockTag]) -> Vec<Option<String>> {
    let blocks = fenced_blocks(text);
    tags.iter()
        .map(|tag| {
            blocks
                .iter()
                .find(|block| tag.matches(&block.info))
                .map(|block| block.body.clone())
        })
        .collect()
}

/// Classified model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The reply starts with the completion marker.
    Done {
        manual: Option<String>,
        summary: Option<String>,
    },
    /// The reply carries a non-empty command block.
    Commands { commands: String, strategy: String },
    /// Neither a completion marker nor a command block.
    Malformed,
}

/// Classify a reply. The completion marker wins over any command block.
pub fn classify_reply(text: &str, completion_marker: &str) -> Reply {
    if starts_with_marker(text, completion_marker) {
        let mut slots =
            extract_blocks(text, &[BlockTag::Manual, BlockTag::DoneSummary]).into_iter();
        let manual = slots.next().flatten().filter(|s| !s.is_empty());
        let summary = slots.next().flatten().filter(|s| !s.is_empty());
        return Reply::Done { manual, summary };
    }

    let mut slots = extract_blocks(text, &[BlockTag::Commands, BlockTag::Strategy]).into_iter();
    let commands = slots.next().flatten().filter(|s| !s.is_empty());
    let strategy = slots.next().flatten().filter(|s| !s.is_empty());
    match commands {
        Some(commands) => {
            let strategy = strategy.unwrap_or_else(|| strategy_from_commands(&commands));
            Reply::Commands { commands, strategy }
        }
        None => Reply::Malformed,
    }
}

fn starts_with_marker(text: &str, marker: &str) -> bool {
    let marker = marker.trim();
    if marker.is_empty() {
        return false;
    }
    let head =
        text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '#'));
    head.get(..marker.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(marker))
}

/// First non-empty line of a command block, truncated for display.
pub fn strategy_from_commands(commands: &str) -> String {
    let first = commands
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first.chars().count() <= STRATEGY_FALLBACK_CHARS {
        return first.to_string();
    }
    let mut out: String = first.chars().take(STRATEGY_FALLBACK_CHARS).collect();
    out.push_str("...");
    out
}
