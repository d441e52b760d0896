use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub title: String,
    pub start_position: usize,
    pub end_position: usize,
    pub index: usize,
    pub level: u8,
}

impl Chapter {
    pub fn len(&self) -> usize {
        self.end_position - self.start_position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, position: usize) -> bool {
        (self.start_position..self.end_position).contains(&position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterOptions {
    pub min_chapter_length: usize,
    pub max_title_length: usize,
    pub smart_detection: bool,
}

impl Default for ChapterOptions {
    fn default() -> Self {
        Self {
            min_chapter_length: 100,
            max_title_length: 50,
            smart_detection: true,
        }
    }
}

struct TitlePattern {
    name: &'static str,
    regex: Regex,
    level: u8,
}

fn pattern(name: &'static str, source: &str, level: u8) -> TitlePattern {
    TitlePattern {
        name,
        regex: Regex::new(source).expect("valid chapter pattern"),
        level,
    }
}

/// Tried in order; the first one that yields at least two chapters wins.
static TITLE_PATTERNS: Lazy<Vec<TitlePattern>> = Lazy::new(|| {
    vec![
        pattern("numbered-chapter", r"^第[零一二三四五六七八九十百千万\d]+[章回节]", 1),
        pattern("numbered-volume", r"^第[零一二三四五六七八九十百千万\d]+卷", 1),
        pattern("english-chapter", r"(?i)^chapter\s+\d+", 1),
        pattern("english-part", r"(?i)^(volume|part|book)\s+(\d+|[ivxlc]+)\b", 1),
        pattern("arabic-list", r"^\d+[.、]", 1),
        pattern("chinese-list", r"^[一二三四五六七八九十百千万]+[、．]", 1),
        pattern("markdown-heading", r"^#{1,6}\s+.+$", 1),
        pattern("volume-marker", r"^[卷部][零一二三四五六七八九十百千万\d]+", 1),
        pattern("short-line", r"^.{1,20}$", 2),
    ]
});

static ARABIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.、]").expect("valid regex"));
static CHINESE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[一二三四五六七八九十百千万]+[、．]").expect("valid regex"));
static ORDINAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^第[零一二三四五六七八九十百千万\d]+").expect("valid regex"));

const TITLE_KEYWORDS: &[&str] = &[
    "章", "节", "部", "卷", "篇", "序", "尾声", "结局", "开始", "chapter", "prologue", "epilogue",
];
const TERMINAL_PUNCTUATION: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';'];
const HEURISTIC_THRESHOLD: f64 = 0.5;

/// How likely a line is to be a title, in `[0, 1]`. Missing neighbours
/// count as blank lines.
pub fn title_score(line: &str, prev: Option<&str>, next: Option<&str>) -> f64 {
    let line = line.trim();
    let length = line.chars().count();
    let mut score = 0.0;

    if length <= 20 {
        score += 0.3;
    } else if length <= 50 {
        score += 0.1;
    }

    let prev = prev.map(str::trim).unwrap_or("");
    let next = next.map(str::trim).unwrap_or("");
    if prev.chars().count() < 10 {
        score += 0.2;
    }
    if next.is_empty() {
        score += 0.1;
    }

    let lowered = line.to_lowercase();
    if TITLE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        score += 0.3;
    }

    if ARABIC_PREFIX.is_match(line) {
        score += 0.2;
    }
    if CHINESE_PREFIX.is_match(line) {
        score += 0.2;
    }
    if ORDINAL_PREFIX.is_match(line) {
        score += 0.4;
    }

    if !line.ends_with(TERMINAL_PUNCTUATION) {
        score += 0.1;
    }

    f64::min(score, 1.0)
}

struct Line<'a> {
    text: &'a str,
    position: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    title: String,
    position: usize,
    score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterIndexer {
    options: ChapterOptions,
}

impl ChapterIndexer {
    pub fn new(options: ChapterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChapterOptions {
        &self.options
    }

    /// Splits `content` into contiguous chapter spans. Returns an empty list
    /// when nothing looks like a title.
    pub fn index(&self, content: &str) -> Vec<Chapter> {
        let total_length = content.chars().count();
        let lines = split_lines(content);

        for pattern in TITLE_PATTERNS.iter() {
            let matches: Vec<Candidate> = lines
                .iter()
                .filter_map(|line| {
                    let title = line.text.trim();
                    (!title.is_empty()
                        && title.chars().count() <= self.options.max_title_length
                        && pattern.regex.is_match(title))
                    .then(|| Candidate {
                        title: title.to_string(),
                        position: line.position,
                        score: 1.0,
                    })
                })
                .collect();
            if matches.len() < 2 {
                continue;
            }
            let kept = self.drop_short(matches, total_length);
            if kept.len() >= 2 {
                debug!(pattern = pattern.name, chapters = kept.len(), "chapter pattern accepted");
                return build_chapters(kept, total_length, pattern.level);
            }
        }

        if !self.options.smart_detection {
            return Vec::new();
        }
        let candidates = self.heuristic_candidates(&lines);
        debug!(candidates = candidates.len(), "falling back to heuristic chapter detection");
        build_chapters(candidates, total_length, 1)
    }

    /// Drops matches whose span is shorter than the minimum, except the last
    /// one. A dropped span is absorbed by the chapter before it.
    fn drop_short(&self, matches: Vec<Candidate>, total_length: usize) -> Vec<Candidate> {
        let count = matches.len();
        let ends: Vec<usize> = matches
            .iter()
            .skip(1)
            .map(|next| next.position)
            .chain(std::iter::once(total_length))
            .collect();
        matches
            .into_iter()
            .zip(ends)
            .enumerate()
            .filter(|(i, (candidate, end))| {
                *i == count - 1 || end - candidate.position >= self.options.min_chapter_length
            })
            .map(|(_, (candidate, _))| candidate)
            .collect()
    }

    fn heuristic_candidates(&self, lines: &[Line<'_>]) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| {
                let title = line.text.trim();
                if title.is_empty() || title.chars().count() > self.options.max_title_length {
                    return None;
                }
                let prev = i.checked_sub(1).map(|p| lines[p].text);
                let next = lines.get(i + 1).map(|l| l.text);
                let score = title_score(title, prev, next);
                (score > HEURISTIC_THRESHOLD).then(|| Candidate {
                    title: title.to_string(),
                    position: line.position,
                    score,
                })
            })
            .collect();

        // Stable, so equal scores keep document order.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            let too_close = kept.iter().any(|existing| {
                existing.position.abs_diff(candidate.position) < self.options.min_chapter_length
            });
            if !too_close {
                kept.push(candidate);
            }
        }
        kept.sort_by_key(|candidate| candidate.position);
        kept
    }
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    let mut position = 0;
    content
        .split('\n')
        .map(|text| {
            let line = Line { text, position };
            position += text.chars().count() + 1;
            line
        })
        .collect()
}

fn build_chapters(starts: Vec<Candidate>, total_length: usize, level: u8) -> Vec<Chapter> {
    let ends: Vec<usize> = starts
        .iter()
        .skip(1)
        .map(|next| next.position)
        .chain(std::iter::once(total_length))
        .collect();
    starts
        .into_iter()
        .zip(ends)
        .enumerate()
        .map(|(index, (candidate, end_position))| Chapter {
            id: Uuid::new_v4(),
            title: candidate.title,
            start_position: candidate.position,
            end_position,
            index,
            level,
        })
        .collect()
}

/// The chapter containing `position`. The end of the document belongs to
/// the last chapter.
pub fn find_chapter_by_position(chapters: &[Chapter], position: usize) -> Option<&Chapter> {
    chapters
        .iter()
        .find(|chapter| chapter.contains(position))
        .or_else(|| {
            chapters
                .last()
                .filter(|last| position == last.end_position && position > last.start_position)
        })
}

/// First 100 body characters of a chapter, title line excluded.
pub fn chapter_summary(content: &str, chapter: &Chapter) -> String {
    let body: String = content
        .chars()
        .skip(chapter.start_position)
        .take(chapter.len())
        .collect();
    let joined: String = body
        .split('\n')
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let summary: String = joined.chars().take(100).collect();
    if summary.chars().count() >= 100 {
        format!("{summary}...")
    } else {
        summary
    }
}
