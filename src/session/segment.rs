use crate::config::RunConfig;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No usable text after normalization")]
    EmptyInput,
}

#[derive(Debug, Clone, Copy)]
pub struct SegmenterOptions {
    /// Upper bound on characters (not bytes) per segment
    pub max_segment_chars: usize,
    pub secs_per_char: f32,
}

impl SegmenterOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_segment_chars: config.max_segment_chars,
            secs_per_char: config.placeholder_secs_per_char,
        }
    }
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            max_segment_chars: 200,
            secs_per_char: 0.12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub text: String,
    pub estimated_duration_hint: Option<f32>,
}

impl Segment {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Length of silence that stands in for this segment if synthesis gives up
    pub fn estimated_duration(&self, secs_per_char: f32) -> f32 {
        self.estimated_duration_hint
            .unwrap_or_else(|| self.char_count() as f32 * secs_per_char)
    }
}

/// Ordered, read-only list of segments for one run
#[derive(Debug, Clone)]
pub struct SegmentQueue {
    segments: Vec<Segment>,
}

impl SegmentQueue {
    /// Normalize `text` and cut it into sentence-sized segments
    pub fn build(text: &str, options: &SegmenterOptions) -> Result<Self, QueueError> {
        let normalized = normalize_text(text);
        let max_chars = options.max_segment_chars.max(1);

        let segments: Vec<Segment> = split_sentences(&normalized)
            .into_iter()
            .flat_map(|sentence| split_long(sentence, max_chars))
            .enumerate()
            .map(|(index, text)| {
                let hint = text.chars().count() as f32 * options.secs_per_char;
                Segment {
                    index,
                    text,
                    estimated_duration_hint: Some(hint),
                }
            })
            .collect();

        if segments.is_empty() {
            return Err(QueueError::EmptyInput);
        }

        tracing::debug!(
            "Segment queue built: {} segments from {} chars",
            segments.len(),
            normalized.chars().count()
        );

        Ok(Self { segments })
    }

    /// Queue from pre-cut texts; blank entries are skipped
    pub fn from_texts<I, S>(texts: I) -> Result<Self, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<Segment> = texts
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.trim().is_empty())
            .enumerate()
            .map(|(index, text)| Segment {
                index,
                text,
                estimated_duration_hint: None,
            })
            .collect();

        if segments.is_empty() {
            return Err(QueueError::EmptyInput);
        }

        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

/// Collapse every whitespace run (page breaks and line breaks included) into one space
pub fn normalize_text(text: &str) -> String {
    static WS_RE: OnceLock<Regex> = OnceLock::new();
    let re = WS_RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));
    re.replace_all(text, " ").trim().to_string()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '。' | '．' | '！' | '？' | '!' | '?' | '.')
}

fn is_closing(c: char) -> bool {
    matches!(
        c,
        '」' | '』' | '）' | ')' | '】' | '"' | '\'' | '”' | '’'
    )
}

fn is_soft_break(c: char) -> bool {
    matches!(c, '、' | '，' | ',' | ';' | '；' | ':' | '：' | ' ')
}

/// Punctuation that cannot be voiced on its own
fn is_mark(c: char) -> bool {
    is_terminator(c) || is_closing(c) || is_soft_break(c)
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if !is_terminator(ch) {
            continue;
        }

        let mut end = i + ch.len_utf8();
        let mut period_only = ch == '.';
        while let Some(&(j, next)) = chars.peek() {
            if !(is_terminator(next) || is_closing(next)) {
                break;
            }
            if is_terminator(next) && next != '.' {
                period_only = false;
            }
            end = j + next.len_utf8();
            chars.next();
        }

        // "3.14" and "e.g.x" are not boundaries
        if period_only {
            if let Some(&(_, next)) = chars.peek() {
                if !next.is_whitespace() {
                    continue;
                }
            }
        }

        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

fn split_long(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = sentence;

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());

        let mut cut = rest[..limit]
            .char_indices()
            .filter(|&(_, c)| is_soft_break(c))
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(limit);

        // Never leave a piece that is only trailing punctuation; carry the last word over with it
        if rest[cut..].chars().all(is_mark) {
            if let Some((i, _)) = rest[..cut].char_indices().rev().find(|&(_, c)| !is_mark(c)) {
                if i > 0 {
                    cut = i;
                }
            }
        }

        let (head, tail) = rest.split_at(cut);
        let head = head.trim();
        if !head.is_empty() {
            pieces.push(head.to_string());
        }
        rest = tail.trim_start();
    }

    let rest = rest.trim();
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_segment_chars: usize) -> SegmenterOptions {
        SegmenterOptions {
            max_segment_chars,
            secs_per_char: 0.1,
        }
    }

    fn texts(queue: &SegmentQueue) -> Vec<&str> {
        queue.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_japanese_sentences_keep_their_full_stop() {
        let queue = SegmentQueue::build("今日は晴れ。\n明日は雨。\x0c明後日は、曇り。", &options(200)).unwrap();
        assert_eq!(texts(&queue), vec!["今日は晴れ。", "明日は雨。", "明後日は、曇り。"]);
        assert_eq!(
            queue.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_concatenation_reconstructs_normalized_text() {
        let source = "第一章\n\nむかしむかし、あるところに。おじいさんと「おばあさん」がいました！\x0cそれから？";
        let queue = SegmentQueue::build(source, &options(8)).unwrap();

        let joined: String = queue.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, normalize_text(source).replace(' ', ""));
        assert!(queue.iter().all(|s| s.char_count() <= 8));
    }

    #[test]
    fn test_english_decimals_are_not_boundaries() {
        let queue = SegmentQueue::build("Pi is 3.14 roughly. Next one! Done", &options(200)).unwrap();
        assert_eq!(texts(&queue), vec!["Pi is 3.14 roughly.", "Next one!", "Done"]);
    }

    #[test]
    fn test_closing_quotes_stay_with_sentence() {
        let queue = SegmentQueue::build("「はい。」と言った。", &options(200)).unwrap();
        assert_eq!(texts(&queue), vec!["「はい。」", "と言った。"]);
    }

    #[test]
    fn test_long_sentence_splits_at_soft_break() {
        let queue = SegmentQueue::build("あいうえお、かきくけこさしすせそ。", &options(10)).unwrap();
        assert_eq!(texts(&queue), vec!["あいうえお、", "かきくけこさしすせ", "そ。"]);
    }

    #[test]
    fn test_hard_split_keeps_terminator_with_a_word() {
        let queue = SegmentQueue::build("abcdefgh.", &options(4)).unwrap();
        assert_eq!(texts(&queue), vec!["abcd", "efg", "h."]);

        let queue = SegmentQueue::build("あいうえお、。", &options(6)).unwrap();
        assert_eq!(texts(&queue), vec!["あいうえ", "お、。"]);
    }

    #[test]
    fn test_run_of_punctuation_still_terminates() {
        let queue = SegmentQueue::build("あ。。。。。", &options(2)).unwrap();
        assert_eq!(texts(&queue), vec!["あ。", "。。", "。。"]);
    }

    #[test]
    fn test_long_run_without_breaks_is_hard_split() {
        let queue = SegmentQueue::build("abcdefghij", &options(4)).unwrap();
        assert_eq!(texts(&queue), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_duration_hint_tracks_length() {
        let queue = SegmentQueue::build("あいう。", &options(200)).unwrap();
        let segment = queue.get(0).unwrap();
        assert_eq!(segment.char_count(), 4);
        assert!((segment.estimated_duration(0.5) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert!(matches!(
            SegmentQueue::build(" \n\x0c\t ", &options(200)),
            Err(QueueError::EmptyInput)
        ));
        assert!(matches!(
            SegmentQueue::from_texts(Vec::<String>::new()),
            Err(QueueError::EmptyInput)
        ));
    }

    #[test]
    fn test_build_is_deterministic() {
        let text = "一。二、三。四！".repeat(50);
        let a = SegmentQueue::build(&text, &options(5)).unwrap();
        let b = SegmentQueue::build(&text, &options(5)).unwrap();
        assert_eq!(a.segments, b.segments);
    }

    #[test]
    fn test_from_texts_skips_blank_entries() {
        let queue = SegmentQueue::from_texts(["a", " ", "b"]).unwrap();
        assert_eq!(texts(&queue), vec!["a", "b"]);
        assert_eq!(queue.get(1).unwrap().index, 1);
        let segment = queue.get(0).unwrap();
        assert!((segment.estimated_duration(0.5) - 0.5).abs() < 1e-6);
    }
}
