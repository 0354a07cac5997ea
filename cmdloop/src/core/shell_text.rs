//! Lightweight textual analysis of shell command blocks.
//!
//! This is not a shell parser. It recognizes enough structure (heredoc bodies,
//! quoting, redirections, command separators) to watch the files a block is
//! likely to touch and to check command names against the allow-list.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static HEREDOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<<-?\s*(?:'([^']+)'|"([^"]+)"|\\?([A-Za-z_][A-Za-z0-9_]*))"#)
        .expect("heredoc regex should be valid")
});

/// Lines of a command block that the shell interprets as commands.
///
/// Heredoc bodies (and their terminators) are skipped, as are blank lines and
/// `#` comments.
pub fn command_lines(block: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut terminators: Vec<(String, bool)> = Vec::new();

    for line in block.lines() {
        if let Some((terminator, strip_tabs)) = terminators.first() {
            let candidate = if *strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line
            };
            if candidate.trim_end() == terminator {
                terminators.remove(0);
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push(trimmed);

        for caps in HEREDOC_RE.captures_iter(trimmed) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            // `<<<` is a here-string, not a heredoc.
            if trimmed[..whole.start()].ends_with('<') {
                continue;
            }
            let word = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string());
            if let Some(word) = word {
                let strip_tabs = whole.as_str().starts_with("<<-");
                terminators.push((word, strip_tabs));
            }
        }
    }

    lines
}

/// Split a command line into words, honoring single and double quotes.
///
/// Quotes are removed from the returned words. Unterminated quotes run to the
/// end of the line.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Individual simple commands of a line, split on `&&`, `||`, `;` and `|`.
///
/// Separators inside single or double quotes are ignored.
pub fn simple_commands(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'&' | b'|' if bytes.get(i + 1) == Some(&b) => {
                    parts.push(&line[start..i]);
                    i += 2;
                    start = i;
                    continue;
                }
                b';' | b'|' => {
                    parts.push(&line[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(&line[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Reserved words that can precede the command they apply to.
const LEADING_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "while", "until", "do", "done", "esac", "time", "{", "}",
    "!",
];

/// Name of the program a simple command runs.
///
/// Skips `VAR=value` prefixes, leading reserved words such as `if`, `do` or
/// `!`, subshell parentheses and `case` patterns. `for` and `select` headers
/// run no program.
pub fn program_name(command: &str) -> Option<String> {
    let words = split_words(command);
    let mut idx = 0;
    while let Some(word) = words.get(idx) {
        idx += 1;
        let word = word.trim_start_matches('(');
        match word {
            "for" | "select" => return None,
            "case" => {
                // subject words up to `in`
                while let Some(next) = words.get(idx) {
                    idx += 1;
                    if next == "in" {
                        break;
                    }
                }
            }
            w if w.is_empty() || LEADING_KEYWORDS.contains(&w) || is_assignment(w) => {}
            // `a)` or `*)` followed by the pattern's command
            w if w.ends_with(')') && idx < words.len() => {}
            w => {
                let name = w.trim_end_matches(')');
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Whether a bare token looks like a filesystem path.
pub fn looks_like_path(token: &str) -> bool {
    if token.is_empty() || token == "." || token == ".." {
        return false;
    }
    if token.starts_with('-') || token.contains("://") || token.starts_with('$') {
        return false;
    }
    token.contains('/') || token.contains('.')
}

fn strip_token(token: &str) -> &str {
    // `>out.txt`, `2>>err.log`: keep the redirection target.
    let token = match token.rfind(['>', '<']) {
        Some(idx) => &token[idx + 1..],
        None => token,
    };
    token
        .trim_start_matches(['&', '('])
        .trim_end_matches([';', ')', '&'])
}

/// Paths that textually appear in the command lines of a block, in order of
/// first appearance and without duplicates.
///
/// After a `cd`, relative paths are watched both as written and resolved
/// against the new directory. A `cd` whose target is not literal (`cd`,
/// `cd ~`, `cd $DIR`, `cd -`) stops the resolution for the rest of the block.
pub fn watched_paths(block: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut cwd = Some(PathBuf::new());
    for line in command_lines(block) {
        for command in simple_commands(line) {
            let words = split_words(command);
            for word in &words {
                let token = strip_token(word);
                if !looks_like_path(token) {
                    continue;
                }
                let resolved = cwd
                    .as_deref()
                    .filter(|dir| !dir.as_os_str().is_empty() && !Path::new(token).is_absolute())
                    .map(|dir| join_lexically(dir, token).to_string_lossy().into_owned());
                for path in resolved.into_iter().chain([token.to_string()]) {
                    if !seen.contains(&path) {
                        seen.push(path);
                    }
                }
            }
            cwd = dir_after(cwd, &words);
        }
    }
    seen
}

/// Working directory after running `words`, relative to the block's workdir.
fn dir_after(cwd: Option<PathBuf>, words: &[String]) -> Option<PathBuf> {
    let mut args = words.iter().skip_while(|w| is_assignment(w));
    if args.next().map(|w| w.trim_start_matches('(')) != Some("cd") {
        return cwd;
    }
    let target = args
        .map(|w| strip_token(w))
        .find(|w| !w.starts_with('-') || *w == "-");
    match target {
        Some(dir) if dir != "-" && !dir.starts_with(['~', '$']) => {
            let dir = Path::new(dir);
            if dir.is_absolute() {
                Some(dir.to_path_buf())
            } else {
                cwd.map(|base| join_lexically(&base, dir))
            }
        }
        _ => None,
    }
}

fn join_lexically(base: &Path, relative: impl AsRef<Path>) -> PathBuf {
    let mut out = base.to_path_buf();
    for part in relative.as_ref().components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir if out.file_name().is_some() => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Candidate tokens for the file a failed block was working on, most
/// plausible first.
///
/// The heuristic scans the raw block text from the end: the last
/// whitespace-delimited token that looks like a path. Callers pick the first
/// candidate that exists on disk.
pub fn focus_file_candidates(block: &str) -> Vec<String> {
    block
        .split_whitespace()
        .rev()
        .filter(|part| !matches!(*part, "-c" | "-e" | "<<"))
        .map(|part| strip_token(part.trim_matches(['\'', '"'])).to_string())
        .filter(|part| looks_like_path(part))
        .collect()
}
