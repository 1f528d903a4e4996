//! End-to-end scenarios driving `Bifrost` against `wiremock`-mocked
//! upstreams. No test in this file issues a request to a real provider.

use std::collections::BTreeMap;

use bifrost_gateway::config::{CredentialConfig, GatewayConfig, ProviderMeta};
use bifrost_gateway::schema::{
    ContentBlock, FallbackTarget, Message, MessageContent, Provider, RequestEnvelope,
    RequestInput, RequestParams, Tool, ToolParameters,
};
use bifrost_gateway::{Bifrost, CancellationToken};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_with(provider: Provider, base_url: String) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.credentials.insert(
        provider,
        CredentialConfig {
            api_key: "test-key".to_string(),
            extra: BTreeMap::new(),
        },
    );
    config.meta.insert(
        provider,
        ProviderMeta {
            base_url: Some(base_url),
            ..ProviderMeta::default()
        },
    );
    config
}

#[tokio::test]
async fn simple_chat_dual_api_mentions_paris_not_other_capitals() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-4o",
        "created": 1,
        "choices": [{
            "index": 0,
            "message": {"content": "The capital of France is Paris."},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18},
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let config = config_with(Provider::OpenAI, server.uri());
    let gateway = Bifrost::new(config).unwrap();

    for op in [OpKind::Chat, OpKind::Responses] {
        let request = RequestEnvelope::new(
            Provider::OpenAI,
            "gpt-4o",
            RequestInput::ChatCompletion {
                messages: vec![Message::user("Hello! What's the capital of France?")],
            },
        );
        let response = match op {
            OpKind::Chat => gateway
                .chat_completion(&request, CancellationToken::new())
                .await
                .unwrap(),
            OpKind::Responses => gateway
                .responses(&request, CancellationToken::new())
                .await
                .unwrap(),
        };
        let content = bifrost_gateway::schema::get_chat_content(&response.choices[0].message)
            .to_lowercase();
        assert!(content.contains("paris"));
        for wrong in ["berlin", "london", "madrid"] {
            assert!(!content.contains(wrong));
        }
    }
}

enum OpKind {
    Chat,
    Responses,
}

#[tokio::test]
async fn tool_call_names_get_weather_with_new_york_argument() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "id": "chatcmpl-2",
        "object": "chat.completion",
        "model": "gpt-4o",
        "created": 1,
        "choices": [{
            "index": 0,
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "function": {
                        "name": "get_weather",
                        "arguments": "{\"location\":\"New York, NY\"}",
                    },
                }],
            },
            "finish_reason": "tool_calls",
        }],
        "usage": {"prompt_tokens": 20, "completion_tokens": 10, "total_tokens": 30},
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let config = config_with(Provider::OpenAI, server.uri());
    let gateway = Bifrost::new(config).unwrap();

    let tool = Tool {
        name: "get_weather".to_string(),
        description: Some("Look up current weather for a city".to_string()),
        parameters: ToolParameters {
            properties: BTreeMap::from([(
                "location".to_string(),
                serde_json::json!({"type": "string"}),
            )]),
            required: vec!["location".to_string()],
        },
    };
    let request = RequestEnvelope::new(
        Provider::OpenAI,
        "gpt-4o",
        RequestInput::ChatCompletion {
            messages: vec![Message::user("What's the weather in NYC right now?")],
        },
    )
    .with_params(RequestParams {
        tools: Some(vec![tool]),
        ..RequestParams::default()
    });

    let response = gateway
        .chat_completion(&request, CancellationToken::new())
        .await
        .unwrap();

    let calls = bifrost_gateway::schema::extract_tool_calls(&response);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "get_weather");
    let parsed = calls[0].parsed_arguments().unwrap();
    let location = parsed["location"].as_str().unwrap().to_lowercase();
    assert!(location.contains("new york") || location.contains("nyc"));
}

#[tokio::test]
async fn multi_image_compare_yields_substantial_comparison_text() {
    let server = MockServer::start().await;
    let text = "Both images show a cat; the first is a tabby lounging outdoors, \
                the second is a black cat indoors, so the comparison is breed and setting.";
    let body = serde_json::json!({
        "id": "chatcmpl-3",
        "object": "chat.completion",
        "model": "gpt-4o",
        "created": 1,
        "choices": [{
            "index": 0,
            "message": {"content": text},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 30, "total_tokens": 70},
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let config = config_with(Provider::OpenAI, server.uri());
    let gateway = Bifrost::new(config).unwrap();

    let message = Message::new(
        bifrost_gateway::schema::Role::User,
        MessageContent::Blocks(vec![
            ContentBlock::text("Compare these two pictures."),
            ContentBlock::image_url("https://example.com/cat1.png"),
            ContentBlock::image_base64("Zm9vYmFy", "image/png"),
        ]),
    );
    let request = RequestEnvelope::new(
        Provider::OpenAI,
        "gpt-4o",
        RequestInput::ChatCompletion {
            messages: vec![message],
        },
    );

    let response = gateway
        .chat_completion(&request, CancellationToken::new())
        .await
        .unwrap();
    let content = bifrost_gateway::schema::get_chat_content(&response.choices[0].message);
    assert!(content.len() >= 50);
    let lower = content.to_lowercase();
    assert!(lower.contains("cat"));
    assert!(lower.contains("comparison") || lower.contains("both"));
}

#[tokio::test]
async fn speech_round_trip_preserves_most_words() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let sentence = "the quick brown fox jumps over the lazy dog near the riverbank";
    let audio_bytes = vec![7u8; 1200];

    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/primary"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio_bytes.clone()))
        .mount(&server)
        .await;

    let transcript_body = serde_json::json!({ "text": sentence });
    Mock::given(method("POST"))
        .and(path("/v1/speech-to-text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&transcript_body))
        .mount(&server)
        .await;

    let config = config_with(Provider::ElevenLabs, server.uri());
    let gateway = Bifrost::new(config)?;

    let speech_request = RequestEnvelope::new(
        Provider::ElevenLabs,
        "eleven_multilingual_v2",
        RequestInput::Speech {
            text: sentence.to_string(),
            voice: "primary".to_string(),
            format: "mp3".to_string(),
        },
    );
    let speech_response = gateway
        .speech(&speech_request, CancellationToken::new())
        .await?;
    let MessageContent::Blocks(blocks) = &speech_response.choices[0].message.content else {
        anyhow::bail!("expected a content-block message");
    };
    let ContentBlock::Audio { audio } = &blocks[0] else {
        anyhow::bail!("expected an audio content block");
    };
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD.decode(&audio.data)?;
    assert!(decoded.len() >= 1000);

    let transcription_request = RequestEnvelope::new(
        Provider::ElevenLabs,
        "scribe_v1",
        RequestInput::Transcription {
            audio_base64: audio.data.clone(),
            format: "mp3".to_string(),
        },
    );
    let transcription_response = gateway
        .transcription(&transcription_request, CancellationToken::new())
        .await?;
    let transcript =
        bifrost_gateway::schema::get_chat_content(&transcription_response.choices[0].message);

    let original_words: std::collections::HashSet<&str> = sentence
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .collect();
    let transcript_words: std::collections::HashSet<&str> = transcript
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .collect();
    let overlap = original_words.intersection(&transcript_words).count();
    assert!(overlap as f64 >= 0.5 * original_words.len() as f64);
    Ok(())
}

#[tokio::test]
async fn image_generation_stream_emits_partial_then_completed() {
    let server = MockServer::start().await;
    let sse = "data: {\"type\":\"response.image_generation_call.partial_image\",\"partial_image_b64\":\"AAAA\"}\n\n\
               data: {\"type\":\"response.image_generation_call.completed\",\"b64_json\":\"ZZZZ\"}\n\n\
               data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/images/generations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let config = config_with(Provider::OpenAI, server.uri());
    let gateway = Bifrost::new(config).unwrap();

    let request = RequestEnvelope::new(
        Provider::OpenAI,
        "gpt-image-1",
        RequestInput::ImageGeneration {
            prompt: "a red bicycle".to_string(),
            size: "1024x1024".to_string(),
        },
    );
    let mut handle = gateway
        .image_generation_stream(&request, CancellationToken::new())
        .await
        .unwrap();

    let mut saw_partial = false;
    let mut completions = 0;
    while let Some(element) = handle.recv().await {
        match element.kind {
            bifrost_gateway::schema::StreamElementKind::ImagePartial { ref partial_b64 } => {
                assert!(!partial_b64.is_empty());
                saw_partial = true;
            }
            bifrost_gateway::schema::StreamElementKind::ImageGenerationCompleted { .. } => {
                completions += 1;
            }
            _ => {}
        }
    }
    assert!(saw_partial);
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn fallback_walks_to_the_next_provider_on_failure() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&primary)
        .await;

    let fallback = MockServer::start().await;
    let body = serde_json::json!({
        "id": "msg_1",
        "model": "claude-3-haiku",
        "content": [{"type": "text", "text": "ok"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 1},
    });
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&fallback)
        .await;

    let mut config = config_with(Provider::OpenAI, primary.uri());
    config.credentials.insert(
        Provider::Anthropic,
        CredentialConfig {
            api_key: "anthropic-key".to_string(),
            extra: BTreeMap::new(),
        },
    );
    config.meta.insert(
        Provider::Anthropic,
        ProviderMeta {
            base_url: Some(fallback.uri()),
            ..ProviderMeta::default()
        },
    );
    let gateway = Bifrost::new(config).unwrap();

    let request = RequestEnvelope::new(
        Provider::OpenAI,
        "gpt-4o",
        RequestInput::ChatCompletion {
            messages: vec![Message::user("hi")],
        },
    )
    .with_fallbacks(vec![FallbackTarget {
        provider: Provider::Anthropic,
        model: "claude-3-haiku".to_string(),
    }]);

    let response = gateway
        .chat_completion(&request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.extra_fields.provider, Provider::Anthropic);
    let content = bifrost_gateway::schema::get_chat_content(&response.choices[0].message);
    assert_eq!(content, "ok");
}

#[tokio::test]
async fn azure_missing_deployment_is_a_configuration_error_with_no_network_call() {
    let server = MockServer::start().await;
    // No mock registered: a network call here would fail the test via
    // wiremock's unmatched-request panic, proving none was made.

    let mut config = GatewayConfig::default();
    config.credentials.insert(
        Provider::Azure,
        CredentialConfig {
            api_key: "azure-key".to_string(),
            extra: BTreeMap::new(),
        },
    );
    config.meta.insert(
        Provider::Azure,
        ProviderMeta {
            azure_endpoint: Some(server.uri()),
            azure_api_version: Some("2024-02-01".to_string()),
            azure_deployments: BTreeMap::new(),
            ..ProviderMeta::default()
        },
    );
    let gateway = Bifrost::new(config).unwrap();

    let request = RequestEnvelope::new(
        Provider::Azure,
        "gpt-4o",
        RequestInput::ChatCompletion {
            messages: vec![Message::user("hi")],
        },
    );
    let err = gateway
        .chat_completion(&request, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        bifrost_gateway::GatewayError::Configuration { .. }
    ));
}

#[tokio::test]
async fn bedrock_invoke_request_carries_sigv4_authorization_header() {
    use bifrost_gateway::transport::sigv4::SigV4Signer;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/anthropic.claude-3-sonnet/invoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "signed ok"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        })))
        .mount(&server)
        .await;

    let body = serde_json::json!({"anthropic_version": "bedrock-2023-05-31", "max_tokens": 16, "messages": []});
    let body_bytes = serde_json::to_vec(&body).unwrap();
    let url = format!("{}/model/anthropic.claude-3-sonnet/invoke", server.uri());

    let signer = SigV4Signer::new("AKIDEXAMPLE", "secret", None, "us-east-1");
    let signed = signer
        .sign_request(
            "POST",
            &url,
            &BTreeMap::new(),
            &body_bytes,
            chrono::Utc::now(),
        )
        .unwrap();

    assert!(signed.contains_key("Authorization"));
    assert!(signed["Authorization"].starts_with("AWS4-HMAC-SHA256"));
    assert!(signed.contains_key("x-amz-date"));

    let client = reqwest::Client::new();
    let mut builder = client.post(&url).body(body_bytes);
    for (name, value) in &signed {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder.send().await.unwrap();
    assert!(response.status().is_success());
}
