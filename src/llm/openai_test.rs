use super::*;
use futures::executor::block_on;

const SAMPLING: Sampling = Sampling { max_tokens: 1000, temperature: 0.7 };

fn analysis_schema() -> OutputSchema {
    OutputSchema {
        name: "tax_document_analysis".into(),
        description: "Analysis".into(),
        schema: serde_json::json!({ "type": "object" }),
    }
}

fn collect(stream: ChunkStream) -> Vec<Result<String, LlmError>> {
    block_on(stream.collect::<Vec<_>>())
}

fn byte_stream(parts: &[&str]) -> BoxStream<'static, Result<Vec<u8>, LlmError>> {
    let owned: Vec<Result<Vec<u8>, LlmError>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
    futures::stream::iter(owned).boxed()
}

// ===== request bodies =====

#[test]
fn cc_request_plain_omits_format_and_stream() {
    let messages = build_messages("sys", "hola");
    let body = serde_json::to_value(CcRequest::new("gpt-4o-mini", SAMPLING, &messages, None, false)).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["max_tokens"], 1000);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1], serde_json::json!({ "role": "user", "content": "hola" }));
    assert!(body.get("response_format").is_none());
    assert!(body.get("stream").is_none());
}

#[test]
fn cc_request_structured_sends_strict_json_schema() {
    let messages = build_messages("sys", "doc");
    let schema = analysis_schema();
    let body =
        serde_json::to_value(CcRequest::new("gpt-4o-mini", SAMPLING, &messages, Some(&schema), false)).unwrap();
    assert_eq!(body["response_format"]["type"], "json_schema");
    assert_eq!(body["response_format"]["json_schema"]["name"], "tax_document_analysis");
    assert_eq!(body["response_format"]["json_schema"]["strict"], true);
}

#[test]
fn cc_request_stream_flag() {
    let messages = build_messages("", "hola");
    let body = serde_json::to_value(CcRequest::new("m", SAMPLING, &messages, None, true)).unwrap();
    assert_eq!(body["stream"], true);
    // Blank system prompt is dropped.
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[test]
fn resp_request_structured_uses_text_format() {
    let schema = analysis_schema();
    let body = serde_json::to_value(RespRequest::new("m", SAMPLING, "sys", "doc", Some(&schema), false)).unwrap();
    assert_eq!(body["instructions"], "sys");
    assert_eq!(body["input"], "doc");
    assert_eq!(body["max_output_tokens"], 1000);
    assert_eq!(body["text"]["format"]["type"], "json_schema");
    assert_eq!(body["text"]["format"]["name"], "tax_document_analysis");
    assert_eq!(body["text"]["format"]["strict"], true);
}

// ===== chat completions =====

#[test]
fn cc_parse_text_response() {
    let json = serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "¡Hola!" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
    })
    .to_string();
    let resp = parse_chat_completions_response(&json).unwrap();
    assert_eq!(resp.text, "¡Hola!");
    assert_eq!(resp.stop_reason, "end_turn");
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 5);
    assert!(resp.refusal.is_none());
}

#[test]
fn cc_parse_length_finish_is_max_tokens() {
    let json = serde_json::json!({
        "model": "m",
        "choices": [{ "message": { "content": "{\"a\":" }, "finish_reason": "length" }]
    })
    .to_string();
    let resp = parse_chat_completions_response(&json).unwrap();
    assert_eq!(resp.stop_reason, "max_tokens");
    assert!(parse_structured_output(&resp, "x").is_err());
}

#[test]
fn cc_parse_missing_choices() {
    let json = serde_json::json!({ "model": "gpt-4o", "choices": [] }).to_string();
    assert!(matches!(parse_chat_completions_response(&json), Err(LlmError::ApiParse(_))));
}

#[test]
fn cc_parse_refusal_fails_structured() {
    let json = serde_json::json!({
        "model": "m",
        "choices": [{ "message": { "content": null, "refusal": "No puedo ayudar" }, "finish_reason": "stop" }]
    })
    .to_string();
    let resp = parse_chat_completions_response(&json).unwrap();
    let err = parse_structured_output(&resp, "tax_document_analysis").unwrap_err();
    assert!(err.to_string().contains("refused"));
}

#[test]
fn structured_output_parses_json_text() {
    let json = serde_json::json!({
        "model": "m",
        "choices": [{ "message": { "content": "{\"compliance_status\":\"compliant\"}" }, "finish_reason": "stop" }]
    })
    .to_string();
    let resp = parse_chat_completions_response(&json).unwrap();
    let value = parse_structured_output(&resp, "tax_document_analysis").unwrap();
    assert_eq!(value["compliance_status"], "compliant");
}

// ===== responses API =====

#[test]
fn resp_parse_text_response_concatenates_parts() {
    let json = serde_json::json!({
        "model": "gpt-4o",
        "output": [{
            "type": "message",
            "content": [
                { "type": "output_text", "text": "Puedes " },
                { "type": "output_text", "text": "deducir." }
            ]
        }],
        "usage": { "input_tokens": 15, "output_tokens": 8 }
    })
    .to_string();
    let resp = parse_responses_response(&json).unwrap();
    assert_eq!(resp.text, "Puedes deducir.");
    assert_eq!(resp.stop_reason, "end_turn");
    assert_eq!(resp.input_tokens, 15);
}

#[test]
fn resp_parse_output_text_fallback() {
    let json = serde_json::json!({ "model": "gpt-4o", "output_text": "Fallback text" }).to_string();
    let resp = parse_responses_response(&json).unwrap();
    assert_eq!(resp.text, "Fallback text");
}

#[test]
fn resp_parse_refusal_part() {
    let json = serde_json::json!({
        "model": "gpt-4o",
        "output": [{ "type": "message", "content": [{ "type": "refusal", "refusal": "no" }] }]
    })
    .to_string();
    let resp = parse_responses_response(&json).unwrap();
    assert_eq!(resp.refusal.as_deref(), Some("no"));
}

// ===== moderation =====

#[test]
fn moderation_parse_first_result() {
    let json = serde_json::json!({
        "id": "modr-1",
        "model": "omni-moderation-latest",
        "results": [{
            "flagged": true,
            "categories": { "harassment": true, "violence": false },
            "category_scores": { "harassment": 0.8, "violence": 0.01 }
        }]
    })
    .to_string();
    let result = parse_moderation_response(&json).unwrap();
    assert!(result.flagged);
    assert_eq!(result.flagged_categories(), vec!["harassment"]);
}

#[test]
fn moderation_parse_missing_results() {
    let json = serde_json::json!({ "id": "modr-1", "results": [] }).to_string();
    assert!(parse_moderation_response(&json).is_err());
}

// ===== stream events =====

fn sse(data: &str) -> SseEvent {
    SseEvent { event: None, data: data.to_string() }
}

#[test]
fn cc_stream_event_delta() {
    let ev = sse(r#"{"choices":[{"index":0,"delta":{"content":"Pue"}}]}"#);
    assert!(matches!(parse_stream_event(&ev, OpenAiApiMode::ChatCompletions), StreamEvent::Delta(t) if t == "Pue"));
}

#[test]
fn cc_stream_event_role_only_is_skip() {
    let ev = sse(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#);
    assert!(matches!(parse_stream_event(&ev, OpenAiApiMode::ChatCompletions), StreamEvent::Skip));
}

#[test]
fn cc_stream_event_done() {
    assert!(matches!(parse_stream_event(&sse("[DONE]"), OpenAiApiMode::ChatCompletions), StreamEvent::Done));
}

#[test]
fn stream_error_payload_carries_status() {
    let ev = sse(r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded","code":null}}"#);
    match parse_stream_event(&ev, OpenAiApiMode::ChatCompletions) {
        StreamEvent::Error(err) => {
            assert_eq!(err.status(), Some(429));
            assert!(err.to_string().contains("Rate limit reached"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[test]
fn resp_stream_event_delta_and_completed() {
    let delta = sse(r#"{"type":"response.output_text.delta","delta":"des dedu"}"#);
    assert!(matches!(parse_stream_event(&delta, OpenAiApiMode::Responses), StreamEvent::Delta(t) if t == "des dedu"));
    let done = sse(r#"{"type":"response.completed","response":{}}"#);
    assert!(matches!(parse_stream_event(&done, OpenAiApiMode::Responses), StreamEvent::Done));
}

#[test]
fn resp_stream_event_failed() {
    let ev = sse(r#"{"type":"response.failed","response":{"error":{"code":"server_error","message":"boom"}}}"#);
    assert!(matches!(
        parse_stream_event(&ev, OpenAiApiMode::Responses),
        StreamEvent::Error(e) if e.status() == Some(500)
    ));
}

#[test]
fn resp_stream_top_level_error_event() {
    let ev = SseEvent {
        event: Some("error".into()),
        data: r#"{"type":"error","code":"rate_limit_exceeded","message":"Slow down","param":null}"#.into(),
    };
    match parse_stream_event(&ev, OpenAiApiMode::Responses) {
        StreamEvent::Error(err) => {
            assert_eq!(err.status(), Some(429));
            assert!(err.to_string().contains("Slow down"));
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[test]
fn cc_stream_error_category_in_code() {
    let ev = sse(r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#);
    assert!(matches!(
        parse_stream_event(&ev, OpenAiApiMode::ChatCompletions),
        StreamEvent::Error(e) if e.status() == Some(429)
    ));
}

#[test]
fn stream_error_unknown_category_has_no_status() {
    let ev = sse(r#"{"error":{"message":"odd","type":"invalid_request_error","code":"context_length_exceeded"}}"#);
    assert!(matches!(
        parse_stream_event(&ev, OpenAiApiMode::ChatCompletions),
        StreamEvent::Error(e) if e.status().is_none()
    ));
}

// ===== delta stream =====

#[test]
fn delta_stream_yields_chunks_in_order_and_stops_at_done() {
    let bytes = byte_stream(&[
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Pue\"}}]}\n\ndata: {\"choi",
        "ces\":[{\"delta\":{\"content\":\"des dedu\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"cir hasta $15,000.\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    ]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::ChatCompletions));
    let chunks: Vec<String> = items.into_iter().map(Result::unwrap).collect();
    assert_eq!(chunks, vec!["Pue", "des dedu", "cir hasta $15,000."]);
}

#[test]
fn delta_stream_ends_after_error_item() {
    let bytes = byte_stream(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"parcial\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"overloaded\",\"type\":\"server_error\"}}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
    ]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::ChatCompletions));
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(t) if t == "parcial"));
    assert!(matches!(&items[1], Err(e) if e.status() == Some(500)));
}

#[test]
fn delta_stream_transport_error_propagates() {
    let parts: Vec<Result<Vec<u8>, LlmError>> = vec![
        Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
        Err(LlmError::ApiRequest("connection reset".into())),
    ];
    let items = collect(delta_stream(futures::stream::iter(parts).boxed(), OpenAiApiMode::ChatCompletions));
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[1], Err(LlmError::ApiRequest(_))));
}

#[test]
fn delta_stream_flushes_unterminated_tail_on_close() {
    let bytes = byte_stream(&["data: {\"type\":\"response.output_text.delta\",\"delta\":\"fin\"}"]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::Responses));
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(t) if t == "fin"));
    assert!(matches!(&items[1], Err(LlmError::Stream { status: None, .. })));
}

#[test]
fn delta_stream_close_before_done_is_an_error() {
    let bytes = byte_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"Pue\"}}]}\n\n"]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::ChatCompletions));
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(t) if t == "Pue"));
    assert!(matches!(&items[1], Err(e) if e.to_string().contains("closed before completion")));
}

#[test]
fn delta_stream_completed_then_close_is_clean() {
    let bytes = byte_stream(&[
        "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"ok\"}\n\n",
        "event: response.completed\ndata: {\"type\":\"response.completed\",\"response\":{}}\n\n",
    ]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::Responses));
    assert_eq!(items.len(), 1);
    assert!(matches!(&items[0], Ok(t) if t == "ok"));
}

#[test]
fn delta_stream_surfaces_responses_error_event() {
    let bytes = byte_stream(&[
        "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"parcial\"}\n\n",
        "event: error\ndata: {\"type\":\"error\",\"code\":\"rate_limit_exceeded\",\"message\":\"Slow down\"}\n\n",
    ]);
    let items = collect(delta_stream(bytes, OpenAiApiMode::Responses));
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(t) if t == "parcial"));
    assert!(matches!(&items[1], Err(e) if e.status() == Some(429)));
}

// ===== timeouts =====

#[test]
fn streams_have_no_total_deadline() {
    let timeouts = LlmTimeouts { request_secs: 120, connect_secs: 10 };
    let client =
        OpenAiClient::new("sk-test".into(), OpenAiApiMode::ChatCompletions, "http://localhost".into(), timeouts)
            .unwrap();
    assert_eq!(client.total_timeout(false), Some(Duration::from_secs(120)));
    assert_eq!(client.total_timeout(true), None);
}
