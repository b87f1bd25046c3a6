use servelm_core::{GenerationEngine, Message, TemplateOptions, TemplateOutput};

use super::*;

/// Resolve and load the small default model. Downloads on first use.
fn load_test_engine() -> CandleEngine {
    let source = ModelSource {
        model: "bartowski/Qwen2.5-0.5B-Instruct-GGUF".into(),
        model_file: Some("Qwen2.5-0.5B-Instruct-Q4_K_M.gguf".into()),
        tokenizer: Some("Qwen/Qwen2.5-0.5B-Instruct".into()),
    };
    let files = source.resolve().expect("failed to resolve model files");
    CandleEngine::load(&files, SamplingConfig::default()).expect("failed to load model")
}

#[test]
#[ignore = "downloads a model from the Hugging Face Hub"]
fn templated_prompt_round_trips_through_the_tokenizer() {
    let engine = load_test_engine();
    let messages = vec![Message::new("user", "Hi")];

    let TemplateOutput::Tokens(ids) = engine
        .apply_template(&messages, TemplateOptions::default())
        .expect("template failed")
    else {
        panic!("expected token ids");
    };
    let ids: Vec<u32> = ids.into_iter().map(|id| id as u32).collect();
    let prompt = engine.decode(&ids).expect("decode failed");

    assert!(prompt.contains("<|im_start|>assistant"));
    assert_eq!(engine.encode(&prompt).expect("encode failed"), ids);
}

#[test]
#[ignore = "downloads a model from the Hugging Face Hub"]
fn greedy_generation_respects_the_token_budget() {
    let mut engine = load_test_engine();
    let TemplateOutput::Text(prompt) = engine
        .apply_template(
            &[Message::new("user", "Count from one to twenty.")],
            TemplateOptions {
                tokenize: false,
                add_generation_prompt: true,
            },
        )
        .expect("template failed")
    else {
        panic!("expected text");
    };

    let first = engine.generate(&prompt, 8).expect("generation failed");
    let second = engine.generate(&prompt, 8).expect("generation failed");

    println!("Generated: {first}");
    assert!(!first.is_empty());
    assert_eq!(first, second, "greedy decoding with a fresh cache is deterministic");
}
