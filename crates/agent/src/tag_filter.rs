//! Streaming extractor for bracketed regions such as `<think>...</think>`.
//!
//! A [`TagFilter`] consumes model output fragments as they arrive and splits
//! them into visible text and region text. Tags may be split across any
//! fragment boundary: feeding a string in pieces yields the same
//! concatenated output as feeding it whole.
//!
//! One state machine serves every configuration:
//! - [`TagFilter::reasoning`] captures `<think>`/`<thinking>` blocks
//! - [`TagFilter::tool_calls`] hides tool-call markup from the display
//! - [`TagFilter::custom`] captures any single tag pair

/// What happens to text inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMode {
    /// Region text is returned in [`FilterOutput::captured`].
    Capture,
    /// Region text is dropped.
    Suppress,
}

/// Tag spellings and behaviour for a filter. `opens[i]` is closed only by
/// `closes[i]`. Spellings must be ASCII; matching ignores ASCII case.
#[derive(Debug, Clone)]
pub struct TagSpec {
    pub opens: Vec<String>,
    pub closes: Vec<String>,
    pub mode: RegionMode,
    /// Non-whitespace characters within which the first tag must start.
    /// Text is held back until then. A close tag seen before any open tag
    /// captures everything before it (the chat template opened the region).
    /// A stream with no tag and no `<` in the budget passes through for good.
    pub detection_budget: Option<usize>,
}

/// Output of one `push` or `finish` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutput {
    pub visible: String,
    pub captured: String,
}

impl FilterOutput {
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.captured.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    /// No tag decision yet; the text so far waits in `pending`.
    Undecided,
    Normal,
    /// `pending` starts with `<` and may still become an open tag.
    Buffering,
    /// Inside the region opened by `opens[idx]`.
    Capturing(usize),
    PassThrough,
}

#[derive(Debug, Clone)]
pub struct TagFilter {
    spec: TagSpec,
    state: FilterState,
    pending: String,
    captured: String,
}

enum OpenMatch {
    Full(usize),
    Partial,
    None,
}

/// First-tag decision for an undecided stream.
enum Detection {
    Open(usize),
    /// Position and length of a close tag with no open before it.
    Close(usize, usize),
    /// Budget spent without a tag; holds the cut position.
    Exhausted(usize),
    Wait,
}

impl TagFilter {
    pub fn new(spec: TagSpec) -> Self {
        let state = match spec.detection_budget {
            Some(_) => FilterState::Undecided,
            None => FilterState::Normal,
        };
        Self {
            spec,
            state,
            pending: String::new(),
            captured: String::new(),
        }
    }

    /// Reasoning split with the default detection budget.
    pub fn reasoning() -> Self {
        Self::reasoning_with_budget(256)
    }

    pub fn reasoning_with_budget(budget: usize) -> Self {
        Self::new(TagSpec {
            opens: vec!["<think>".into(), "<thinking>".into()],
            closes: vec!["</think>".into(), "</thinking>".into()],
            mode: RegionMode::Capture,
            detection_budget: Some(budget),
        })
    }

    /// Hides tool-call markup. The caller keeps the raw text for parsing.
    pub fn tool_calls() -> Self {
        Self::new(TagSpec {
            opens: vec![
                "<tool_call>".into(),
                "<|tool_call|>".into(),
                "<|tool_call_start|>".into(),
                "<function_call>".into(),
            ],
            closes: vec![
                "</tool_call>".into(),
                "<|/tool_call|>".into(),
                "<|tool_call_end|>".into(),
                "</function_call>".into(),
            ],
            mode: RegionMode::Suppress,
            detection_budget: None,
        })
    }

    /// Capture an arbitrary tag pair.
    pub fn custom(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self::new(TagSpec {
            opens: vec![open.into()],
            closes: vec![close.into()],
            mode: RegionMode::Capture,
            detection_budget: None,
        })
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &str) -> FilterOutput {
        let mut out = FilterOutput::default();
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(fragment);
        self.run(input, &mut out);
        out
    }

    /// Flush at end of stream. A partial open tag becomes visible text; an
    /// unterminated region is treated as ending here.
    pub fn finish(&mut self) -> FilterOutput {
        let mut out = FilterOutput::default();
        let rest = std::mem::take(&mut self.pending);
        match self.state {
            FilterState::Capturing(_) => self.region(&rest, &mut out),
            _ => out.visible.push_str(&rest),
        }
        if matches!(self.state, FilterState::Buffering | FilterState::Capturing(_)) {
            self.state = FilterState::Normal;
        }
        out
    }

    /// Everything captured so far.
    pub fn captured_text(&self) -> &str {
        &self.captured
    }

    pub fn is_inside_region(&self) -> bool {
        matches!(self.state, FilterState::Capturing(_))
    }

    fn region(&mut self, text: &str, out: &mut FilterOutput) {
        if self.spec.mode == RegionMode::Capture && !text.is_empty() {
            out.captured.push_str(text);
            self.captured.push_str(text);
        }
    }

    fn run(&mut self, mut input: String, out: &mut FilterOutput) {
        loop {
            match self.state {
                FilterState::PassThrough => {
                    out.visible.push_str(&input);
                    return;
                }
                FilterState::Undecided => match self.detect(&input) {
                    Detection::Open(pos) => {
                        out.visible.push_str(&input[..pos]);
                        input.drain(..pos);
                        self.state = FilterState::Normal;
                    }
                    Detection::Close(pos, len) => {
                        let inner = input[..pos].to_string();
                        self.region(&inner, out);
                        input.drain(..pos + len);
                        self.state = FilterState::Normal;
                    }
                    Detection::Exhausted(cut) => {
                        if input[..cut].contains('<') {
                            self.state = FilterState::Normal;
                        } else {
                            out.visible.push_str(&input[..cut]);
                            input.drain(..cut);
                            self.state = FilterState::PassThrough;
                        }
                    }
                    Detection::Wait => {
                        self.pending = input;
                        return;
                    }
                },
                FilterState::Normal => match input.find('<') {
                    None => {
                        out.visible.push_str(&input);
                        return;
                    }
                    Some(idx) => {
                        out.visible.push_str(&input[..idx]);
                        input.drain(..idx);
                        self.state = FilterState::Buffering;
                    }
                },
                FilterState::Buffering => match self.match_open(&input) {
                    OpenMatch::Full(i) => {
                        input.drain(..self.spec.opens[i].len());
                        self.state = FilterState::Capturing(i);
                    }
                    OpenMatch::Partial => {
                        self.pending = input;
                        return;
                    }
                    OpenMatch::None => {
                        // The '<' is plain text; a tag may still start later in the buffer.
                        out.visible.push('<');
                        input.drain(..1);
                        self.state = FilterState::Normal;
                    }
                },
                FilterState::Capturing(i) => {
                    let close_len = self.spec.closes[i].len();
                    match find_ignore_ascii_case(&input, &self.spec.closes[i]) {
                        Some(pos) => {
                            let inner = input[..pos].to_string();
                            self.region(&inner, out);
                            input.drain(..pos + close_len);
                            self.state = FilterState::Normal;
                        }
                        None => {
                            let mut split = input.len().saturating_sub(close_len);
                            while !input.is_char_boundary(split) {
                                split -= 1;
                            }
                            let inner = input[..split].to_string();
                            self.region(&inner, out);
                            input.drain(..split);
                            self.pending = input;
                            return;
                        }
                    }
                }
            }
        }
    }

    fn detect(&self, input: &str) -> Detection {
        let budget = self.spec.detection_budget.unwrap_or(usize::MAX);
        let cut = input
            .char_indices()
            .filter(|(_, c)| !c.is_whitespace())
            .nth(budget.saturating_sub(1))
            .map(|(idx, c)| idx + c.len_utf8());
        let limit = cut.unwrap_or(input.len());

        let open = self
            .spec
            .opens
            .iter()
            .filter_map(|tag| find_ignore_ascii_case(input, tag))
            .min();
        let close = self
            .spec
            .closes
            .iter()
            .filter_map(|tag| find_ignore_ascii_case(input, tag).map(|pos| (pos, tag.len())))
            .min();
        match (open, close) {
            (Some(o), c) if o < limit && c.is_none_or(|(c, _)| o < c) => return Detection::Open(o),
            (_, Some((c, len))) if c < limit => return Detection::Close(c, len),
            _ => {}
        }

        match cut {
            Some(cut) if self.partial_tag_start(input).is_none_or(|p| p >= cut) => {
                Detection::Exhausted(cut)
            }
            _ => Detection::Wait,
        }
    }

    /// Start of a trailing fragment that may still grow into a tag.
    fn partial_tag_start(&self, input: &str) -> Option<usize> {
        let bytes = input.as_bytes();
        input.match_indices('<').map(|(p, _)| p).find(|&p| {
            let tail = &bytes[p..];
            self.spec.opens.iter().chain(&self.spec.closes).any(|tag| {
                let tag = tag.as_bytes();
                tail.len() < tag.len() && tag[..tail.len()].eq_ignore_ascii_case(tail)
            })
        })
    }

    fn match_open(&self, buf: &str) -> OpenMatch {
        let bytes = buf.as_bytes();
        let mut partial = false;
        for (i, open) in self.spec.opens.iter().enumerate() {
            let open = open.as_bytes();
            if bytes.len() >= open.len() {
                if bytes[..open.len()].eq_ignore_ascii_case(open) {
                    return OpenMatch::Full(i);
                }
            } else if open[..bytes.len()].eq_ignore_ascii_case(bytes) {
                partial = true;
            }
        }
        if partial {
            OpenMatch::Partial
        } else {
            OpenMatch::None
        }
    }
}

/// Byte offset of the first ASCII-case-insensitive match of `needle`.
pub(crate) fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Byte offset of the last ASCII-case-insensitive match of `needle`.
pub(crate) fn rfind_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whole(mut filter: TagFilter, text: &str) -> FilterOutput {
        let mut out = filter.push(text);
        let tail = filter.finish();
        out.visible.push_str(&tail.visible);
        out.captured.push_str(&tail.captured);
        out
    }

    fn pieces(mut filter: TagFilter, parts: &[&str]) -> FilterOutput {
        let mut out = FilterOutput::default();
        for part in parts {
            let o = filter.push(part);
            out.visible.push_str(&o.visible);
            out.captured.push_str(&o.captured);
        }
        let tail = filter.finish();
        out.visible.push_str(&tail.visible);
        out.captured.push_str(&tail.captured);
        out
    }

    fn char_by_char(filter: TagFilter, text: &str) -> FilterOutput {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        pieces(filter, &refs)
    }

    /// Every split of `text` into three pieces at char boundaries.
    fn assert_split_invariant(make: fn() -> TagFilter, text: &str) {
        let expected = whole(make(), text);
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        for (ai, &a) in bounds.iter().enumerate() {
            for &b in &bounds[ai..] {
                let got = pieces(make(), &[&text[..a], &text[a..b], &text[b..]]);
                assert_eq!(got, expected, "split at {a},{b} of {text:?}");
            }
        }
        assert_eq!(char_by_char(make(), text), expected);
    }

    #[test]
    fn reasoning_example_char_by_char() {
        let text = "Let me check.\n<think>reasoning</think>Done.";
        let out = char_by_char(TagFilter::reasoning(), text);
        assert_eq!(out.visible, "Let me check.\nDone.");
        assert_eq!(out.captured, "reasoning");
        assert_eq!(out, whole(TagFilter::reasoning(), text));
    }

    #[test]
    fn split_invariance_reasoning() {
        for text in [
            "Let me check.\n<think>reasoning</think>Done.",
            "  <THINKING>a < b</thinking>x<think>y",
            "<thi no tag here <t",
            "a<<think>>b</think>>c",
            "ünïcödé <think>ß</think> é",
            "plan plan</think>answer",
            "step < two</THINKING>done <think>more</think>",
        ] {
            assert_split_invariant(TagFilter::reasoning, text);
        }
    }

    #[test]
    fn split_invariance_tool_calls() {
        for text in [
            "Reading.<tool_call>{\"name\":\"read_file\"}</tool_call> ok",
            "<|tool_call|>{}<|/tool_call|><|tool_call_start|>{}<|tool_call_end|>",
            "x <function_call>{}</function_call> <tool_call>unterminated",
        ] {
            assert_split_invariant(TagFilter::tool_calls, text);
        }
    }

    #[test]
    fn split_invariance_budget_edge() {
        fn small() -> TagFilter {
            TagFilter::reasoning_with_budget(5)
        }
        for text in [
            "  abcd<think>x</think>",
            "abcde<think>x</think>",
            "ab cd\te <think>",
            "abc</think>d",
            "abcdef</think>g",
        ] {
            assert_split_invariant(small, text);
        }
    }

    #[test]
    fn case_insensitive_tags() {
        let out = whole(TagFilter::reasoning(), "<Think>deep</THINK>answer");
        assert_eq!(out.captured, "deep");
        assert_eq!(out.visible, "answer");
    }

    #[test]
    fn close_must_match_opened_spelling() {
        let out = whole(TagFilter::reasoning(), "<thinking>a</think>b</thinking>c");
        assert_eq!(out.captured, "a</think>b");
        assert_eq!(out.visible, "c");
    }

    #[test]
    fn non_tag_angle_brackets_stay_visible() {
        let out = whole(TagFilter::reasoning(), "if a < b && c <d> then <thin");
        assert_eq!(out.visible, "if a < b && c <d> then <thin");
        assert!(out.captured.is_empty());
    }

    #[test]
    fn detection_budget_switches_to_pass_through() {
        let mut filter = TagFilter::reasoning_with_budget(4);
        let out = filter.push("   abcd<think>x</think>");
        assert_eq!(out.visible, "   abcd<think>x</think>");
        assert!(out.captured.is_empty());
    }

    #[test]
    fn close_without_open_captures_prefix() {
        let out = whole(TagFilter::reasoning(), "plan plan</think>answer");
        assert_eq!(out.captured, "plan plan");
        assert_eq!(out.visible, "answer");

        // Past the budget a lone close tag is ordinary text.
        let out = whole(TagFilter::reasoning_with_budget(3), "abcdef</think>g");
        assert_eq!(out.visible, "abcdef</think>g");
        assert!(out.captured.is_empty());
    }

    #[test]
    fn undecided_text_is_held_until_a_tag_or_the_budget() {
        let mut filter = TagFilter::reasoning_with_budget(8);
        assert!(filter.push("Sure, ").is_empty());
        let out = filter.push("here it is");
        assert_eq!(out.visible, "Sure, here it is");
    }

    #[test]
    fn leading_whitespace_is_free() {
        let out = whole(TagFilter::reasoning_with_budget(2), "\n\n   \t<think>r</think>ok");
        assert_eq!(out.captured, "r");
        assert_eq!(out.visible, "\n\n   \tok");
    }

    #[test]
    fn unterminated_region_captured_at_finish() {
        let mut filter = TagFilter::reasoning();
        let out = filter.push("<think>still going");
        assert!(filter.is_inside_region());
        // All but the close-tag length is released early
        assert_eq!(out.captured, "sti");
        let tail = filter.finish();
        assert_eq!(tail.captured, "ll going");
        assert_eq!(filter.captured_text(), "still going");
        assert!(!filter.is_inside_region());
    }

    #[test]
    fn partial_open_flushed_at_finish() {
        let mut filter = TagFilter::tool_calls();
        assert_eq!(filter.push("text <tool_").visible, "text ");
        assert_eq!(filter.finish().visible, "<tool_");
    }

    #[test]
    fn suppress_mode_hides_region() {
        let out = whole(
            TagFilter::tool_calls(),
            "Let me read it.\n<tool_call>{\"name\":\"read_file\",\"arguments\":{\"path\":\"README.md\"}}</tool_call>",
        );
        assert_eq!(out.visible, "Let me read it.\n");
        assert!(out.captured.is_empty());
    }

    #[test]
    fn custom_tag_capture() {
        let out = whole(TagFilter::custom("<plan>", "</plan>"), "a<plan>1. read</plan>b");
        assert_eq!(out.captured, "1. read");
        assert_eq!(out.visible, "ab");
    }

    #[test]
    fn case_insensitive_search_helpers() {
        assert_eq!(find_ignore_ascii_case("ab</THINK>", "</think>"), Some(2));
        assert_eq!(rfind_ignore_ascii_case("<a><A>", "<a>"), Some(3));
        assert_eq!(find_ignore_ascii_case("ab", "abc"), None);
    }
}
