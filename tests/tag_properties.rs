use tagproxy_rs::tags::{
    parse_complete_text, AssembledMessage, DeltaAssembler, DeltaMerger, ExtractorLimits,
    MessageDelta, TagExtractor, ToolStreaming,
};

const SAMPLES: &[&str] = &[
    "plain text with no tags at all",
    "<think>step one</think>The answer is 4.",
    "a<tool_call>{\"name\":\"f\",\"arguments\":{}}</tool_call>b<tool_call>{\"name\":\"g\",\"arguments\":{\"x\":1}}</tool_call>c",
    "<think>first</think>mid<think>second</think>tail",
    "x < y and <thin air> and <tool_cal> are not tags",
    "<tool_call>{ bad json </tool_call> after",
    "<tool_call>{\"arguments\": {}}</tool_call>",
    "<tool_call>{\"arguments\": {\"q\": \"late\"}, \"name\": \"search\"}</tool_call>",
    "before <think>partial",
    "text then <tool_call>{\"name\":\"open\",\"arguments\":{\"a\":",
    "héllo <think>naïve ünïcode ✓</think> wörld <tool_call>{\"name\":\"ü\",\"arguments\":{\"k\":\"日本\"}}</tool_call>",
    "<<think>>x</think><</tool_call>",
    "trailing lone <",
    "trailing prefix <tool_ca",
];

#[derive(Debug, PartialEq, Eq)]
struct Comparable {
    content: String,
    reasoning_content: Option<String>,
    calls: Vec<(String, String)>,
    finish_reason: Option<String>,
}

/// Tool-call ids are random per call; compare everything else.
fn comparable(message: AssembledMessage) -> Comparable {
    Comparable {
        content: message.content,
        reasoning_content: message.reasoning_content,
        calls: message
            .tool_calls
            .into_iter()
            .map(|call| (call.name, call.arguments))
            .collect(),
        finish_reason: message.finish_reason,
    }
}

fn batch(text: &str) -> Comparable {
    batch_with(text, ExtractorLimits::default())
}

fn batch_with(text: &str, limits: ExtractorLimits) -> Comparable {
    comparable(parse_complete_text(text, Some("stop"), limits))
}

fn stream_deltas(fragments: &[&str], streaming: ToolStreaming) -> Vec<MessageDelta> {
    stream_deltas_with(fragments, streaming, ExtractorLimits::default())
}

fn stream_deltas_with(
    fragments: &[&str],
    streaming: ToolStreaming,
    limits: ExtractorLimits,
) -> Vec<MessageDelta> {
    let mut extractor = TagExtractor::with_limits(limits);
    let mut assembler = DeltaAssembler::new(streaming);
    let mut deltas = Vec::new();
    for fragment in fragments {
        deltas.extend(assembler.on_events(extractor.ingest(fragment)));
    }
    deltas.extend(assembler.on_events(extractor.flush()));
    deltas.extend(assembler.finish(Some("stop")));
    deltas
}

fn streamed(fragments: &[&str], streaming: ToolStreaming) -> Comparable {
    streamed_with(fragments, streaming, ExtractorLimits::default())
}

fn streamed_with(fragments: &[&str], streaming: ToolStreaming, limits: ExtractorLimits) -> Comparable {
    let mut merger = DeltaMerger::new();
    for delta in stream_deltas_with(fragments, streaming, limits) {
        merger.apply(&delta);
    }
    comparable(merger.into_message())
}

fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(offset, _)| offset).skip(1).collect()
}

fn split_at_all<'a>(text: &'a str, cuts: &[usize]) -> Vec<&'a str> {
    let mut fragments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        fragments.push(&text[start..cut]);
        start = cut;
    }
    fragments.push(&text[start..]);
    fragments
}

fn assert_split_matches_batch(text: &str, fragments: &[&str]) {
    let expected = batch(text);
    for streaming in [ToolStreaming::Buffered, ToolStreaming::Incremental] {
        assert_eq!(
            streamed(fragments, streaming),
            expected,
            "mode {streaming:?}, fragments {fragments:?}"
        );
    }
}

#[test]
fn every_two_way_split_matches_batch() {
    for text in SAMPLES {
        for cut in char_boundaries(text) {
            assert_split_matches_batch(text, &split_at_all(text, &[cut]));
        }
    }
}

#[test]
fn char_by_char_matches_batch() {
    for text in SAMPLES {
        let cuts = char_boundaries(text);
        assert_split_matches_batch(text, &split_at_all(text, &cuts));
    }
}

#[test]
fn random_splits_match_batch() {
    let mut rng = fastrand::Rng::with_seed(0x7a67_5f70_726f_7879);
    for text in SAMPLES {
        let boundaries = char_boundaries(text);
        for _ in 0..64 {
            let mut cuts: Vec<usize> = boundaries
                .iter()
                .copied()
                .filter(|_| rng.u8(..) < 48)
                .collect();
            cuts.dedup();
            assert_split_matches_batch(text, &split_at_all(text, &cuts));
        }
    }
}

#[test]
fn content_keeps_order_with_tag_regions_excised() {
    let text = "one<think>r</think>two<tool_call>{\"name\":\"f\",\"arguments\":{}}</tool_call>three";
    let cuts = char_boundaries(text);
    let deltas = stream_deltas(&split_at_all(text, &cuts), ToolStreaming::Buffered);
    let content: String = deltas
        .iter()
        .filter_map(|delta| delta.content.as_deref())
        .collect();
    assert_eq!(content, "onetwothree");
}

#[test]
fn malformed_json_degrades_to_literal() {
    let message = parse_complete_text(
        "<tool_call>{ bad json </tool_call>",
        Some("stop"),
        ExtractorLimits::default(),
    );
    assert!(message.tool_calls.is_empty());
    assert_eq!(message.content, "<tool_call>{ bad json </tool_call>");
    assert_eq!(message.finish_reason.as_deref(), Some("stop"));
}

#[test]
fn missing_name_degrades_like_malformed_json() {
    let message = parse_complete_text(
        r#"<tool_call>{"arguments": {}}</tool_call>"#,
        Some("length"),
        ExtractorLimits::default(),
    );
    assert!(message.tool_calls.is_empty());
    assert_eq!(message.content, r#"<tool_call>{"arguments": {}}</tool_call>"#);
    assert_eq!(message.finish_reason.as_deref(), Some("length"));
}

#[test]
fn multiple_tool_calls_keep_order_and_indices() {
    let text = SAMPLES[2];
    let message = batch(text);
    assert_eq!(message.content, "abc");
    assert_eq!(
        message.calls,
        vec![
            ("f".to_string(), "{}".to_string()),
            ("g".to_string(), r#"{"x":1}"#.to_string()),
        ]
    );
    assert_eq!(message.finish_reason.as_deref(), Some("tool_calls"));

    let mut merger = DeltaMerger::new();
    for delta in stream_deltas(&[text], ToolStreaming::Buffered) {
        merger.apply(&delta);
    }
    assert_eq!(merger.tool_call_indices(), vec![0, 1]);
}

#[test]
fn split_open_delimiter_is_recognized() {
    let message = streamed(&["<thi", "nk>hello</think> world"], ToolStreaming::Buffered);
    assert_eq!(message.reasoning_content.as_deref(), Some("hello"));
    assert_eq!(message.content, " world");
}

#[test]
fn unterminated_tag_is_released_on_flush() {
    let message = streamed(&["before <think>partial"], ToolStreaming::Buffered);
    assert_eq!(message.content, "before <think>partial");
    assert_eq!(message.reasoning_content, None);
}

#[test]
fn content_never_contains_recognized_delimiters() {
    let text = "<think>a</think>b<tool_call>{\"name\":\"f\",\"arguments\":{}}</tool_call>";
    let message = batch(text);
    for delimiter in ["<think>", "</think>", "<tool_call>", "</tool_call>"] {
        assert!(!message.content.contains(delimiter), "{delimiter} leaked");
    }
}

#[test]
fn payload_overflow_degrades_to_literal() {
    let limits = ExtractorLimits {
        max_payload_bytes: 16,
    };
    let text = "x<think>this reasoning is far too long for the cap</think>";
    let message = parse_complete_text(text, Some("stop"), limits);
    assert_eq!(message.reasoning_content, None);
    assert!(message.content.starts_with("x<think>this reasoning"));
}

#[test]
fn overflowed_tags_match_batch_under_any_split() {
    let limits = ExtractorLimits {
        max_payload_bytes: 30,
    };
    let long = "a".repeat(40);
    let samples = [
        format!("<think>{long}<tool_call>{{\"name\":\"f\",\"arguments\":{{}}}}</tool_call></think>after"),
        format!("x<tool_call>{{\"name\":\"f\",\"arguments\":{{\"a\":\"{long}\"}}}}</tool_call>tail"),
        format!("<think>{long}<think>inner</think>rest"),
        format!("head <think>{long} never closed </thi"),
    ];
    for text in &samples {
        let expected = batch_with(text, limits);
        assert!(expected.calls.is_empty(), "{text}");
        assert_eq!(expected.reasoning_content, None, "{text}");

        let mut splits = vec![split_at_all(text, &char_boundaries(text))];
        for cut in char_boundaries(text) {
            splits.push(split_at_all(text, &[cut]));
        }
        for fragments in &splits {
            for streaming in [ToolStreaming::Buffered, ToolStreaming::Incremental] {
                assert_eq!(
                    streamed_with(fragments, streaming, limits),
                    expected,
                    "mode {streaming:?}, fragments {fragments:?}"
                );
            }
        }
    }
}

#[test]
fn tag_after_overflowed_region_is_recognized() {
    let limits = ExtractorLimits {
        max_payload_bytes: 8,
    };
    let text = "<think>far too long</think><think>ok</think>";
    let expected = batch_with(text, limits);
    assert_eq!(expected.content, "<think>far too long</think>");
    assert_eq!(expected.reasoning_content.as_deref(), Some("ok"));
    let cuts = char_boundaries(text);
    assert_eq!(
        streamed_with(&split_at_all(text, &cuts), ToolStreaming::Buffered, limits),
        expected
    );
}
