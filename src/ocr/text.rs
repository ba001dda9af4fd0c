use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

const EDGE_ARTIFACTS: &[char] = &['<', '>', '|', '`', '~'];
const SINGLE_CHAR_WORDS: &[&str] = &["a", "i"];
const SHORT_TEXT_CHARS: usize = 10;

/// ASCII form and its full-width CJK counterpart.
const PUNCTUATION_PAIRS: &[(char, char)] = &[
    (',', '，'),
    ('.', '。'),
    (':', '：'),
    (';', '；'),
    ('!', '！'),
    ('?', '？'),
    ('(', '（'),
    (')', '）'),
];

/// Known recognizer confusions, matched as whole words case-insensitively.
const CORRECTIONS: &[(&str, &str)] = &[
    ("tbe", "the"),
    ("tlie", "the"),
    ("thc", "the"),
    ("wlth", "with"),
    ("witb", "with"),
    ("frorn", "from"),
    ("fiom", "from"),
    ("rnay", "may"),
    ("rnore", "more"),
    ("tirne", "time"),
    ("cornpany", "company"),
    ("infonnation", "information"),
    ("rnenu", "menu"),
    ("c1ose", "close"),
    ("0pen", "open"),
];

static CORRECTION_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    CORRECTIONS
        .iter()
        .map(|(wrong, right)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(wrong));
            (Regex::new(&pattern).expect("static regex"), *right)
        })
        .collect()
});

static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(A|a|An|an|AN|The|the|THE)([A-Z][a-z]+)\b").expect("static regex")
});

static HORIZONTAL_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("static regex"));

static DICTIONARY: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    include_str!("words.txt")
        .lines()
        .map(str::trim)
        .filter(|word| !word.is_empty() && !word.starts_with('#'))
        .collect()
});

/// Cleans one recognized string: whitespace and edge artifacts, single-character
/// noise, script-aware punctuation, known confusions, glued articles, and finally
/// over-segmented short words.
pub fn normalize_text(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    let lines = collapsed
        .lines()
        .map(strip_edge_artifacts)
        .filter(|line| keep_line(line))
        .map(|line| normalize_punctuation(&line))
        .collect::<Vec<_>>();
    let text = repair_words(&lines.join("\n"));
    if text.chars().count() < SHORT_TEXT_CHARS {
        // Gluing fragments back together can form a known confusion ("t be").
        repair_words(&text.replace(' ', ""))
    } else {
        text
    }
}

fn repair_words(text: &str) -> String {
    text.lines()
        .map(|line| split_article_runs(&apply_corrections(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = HORIZONTAL_SPACE_RE.replace_all(&normalized, " ");
    collapsed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_edge_artifacts(line: &str) -> String {
    line.trim_matches(|ch: char| ch.is_whitespace() || EDGE_ARTIFACTS.contains(&ch))
        .to_string()
}

fn keep_line(line: &str) -> bool {
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (None, _) => false,
        (Some(ch), None) => {
            let lower = ch.to_lowercase().to_string();
            SINGLE_CHAR_WORDS.contains(&lower.as_str())
        }
        _ => true,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cjk,
    Other,
}

fn classify(ch: char) -> Script {
    if ch.is_ascii_alphanumeric() {
        Script::Latin
    } else if is_cjk(ch) {
        Script::Cjk
    } else {
        Script::Other
    }
}

pub(crate) fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xF900..=0xFAFF
    )
}

fn punctuation_pair(ch: char) -> Option<(char, char)> {
    PUNCTUATION_PAIRS
        .iter()
        .copied()
        .find(|(ascii, wide)| *ascii == ch || *wide == ch)
}

fn normalize_punctuation(line: &str) -> String {
    let chars = line.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(line.len());
    for (idx, ch) in chars.iter().copied().enumerate() {
        let Some((ascii, wide)) = punctuation_pair(ch) else {
            out.push(ch);
            continue;
        };
        let left = chars[..idx]
            .iter()
            .rev()
            .find(|c| !c.is_whitespace())
            .map(|c| classify(*c));
        let right = chars[idx + 1..]
            .iter()
            .find(|c| !c.is_whitespace())
            .map(|c| classify(*c));
        let context = [left, right]
            .into_iter()
            .flatten()
            .filter(|script| *script != Script::Other)
            .collect::<Vec<_>>();
        let replacement = if context.is_empty() {
            ch
        } else if context.iter().all(|script| *script == Script::Latin) {
            ascii
        } else if context.iter().all(|script| *script == Script::Cjk) {
            wide
        } else {
            ch
        };
        out.push(replacement);
    }
    out
}

fn apply_corrections(line: &str) -> String {
    let mut text = line.to_string();
    for (re, replacement) in CORRECTION_RES.iter() {
        if !re.is_match(&text) {
            continue;
        }
        text = re
            .replace_all(&text, |caps: &Captures<'_>| match_case(&caps[0], replacement))
            .into_owned();
    }
    text
}

fn match_case(original: &str, replacement: &str) -> String {
    let letters = original
        .chars()
        .filter(|ch| ch.is_alphabetic())
        .collect::<Vec<_>>();
    if letters.len() > 1 && letters.iter().all(|ch| ch.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if letters.first().is_some_and(|ch| ch.is_uppercase()) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_lowercase()
}

fn split_article_runs(line: &str) -> String {
    ARTICLE_RE
        .replace_all(line, |caps: &Captures<'_>| {
            let article = &caps[1];
            let word = &caps[2];
            if DICTIONARY.contains(word.to_lowercase().as_str()) {
                format!("{} {}", article, word)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
