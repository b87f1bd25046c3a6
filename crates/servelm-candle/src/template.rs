//! Jinja chat templates as shipped in `tokenizer_config.json`.

use std::path::Path;

use minijinja::{Environment, Error, ErrorKind, context};
use serde::Deserialize;
use serde::Serialize;
use servelm_core::Message;

use crate::error::CandleEngineError;

const TEMPLATE_NAME: &str = "chat";

/// ChatML layout, used when the tokenizer config carries no template.
const CHATML: &str = r#"{% for message in messages %}{{ '<|im_start|>' + message['role'] + '\n' + message['content'] + '<|im_end|>' + '\n' }}{% endfor %}{% if add_generation_prompt %}{{ '<|im_start|>assistant\n' }}{% endif %}"#;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTemplate {
    Single(String),
    Named(Vec<NamedTemplate>),
}

#[derive(Debug, Deserialize)]
struct NamedTemplate {
    name: String,
    template: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawToken {
    Plain(String),
    Added { content: String },
}

impl RawToken {
    fn into_content(self) -> String {
        match self {
            RawToken::Plain(s) | RawToken::Added { content: s } => s,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfig {
    chat_template: Option<RawTemplate>,
    bos_token: Option<RawToken>,
    eos_token: Option<RawToken>,
}

#[derive(Serialize)]
struct TemplateMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// A compiled chat template plus the special tokens it may reference.
#[derive(Debug)]
pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

impl ChatTemplate {
    pub fn new(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self, CandleEngineError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_function("raise_exception", raise_exception);
        env.add_template_owned(TEMPLATE_NAME, source.into())?;
        Ok(Self {
            env,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        })
    }

    pub fn chatml() -> Result<Self, CandleEngineError> {
        Self::new(CHATML, "", "<|im_end|>")
    }

    /// Read `chat_template`, `bos_token` and `eos_token` from a
    /// `tokenizer_config.json`. Falls back to ChatML when no template is set.
    pub fn from_tokenizer_config(path: &Path) -> Result<Self, CandleEngineError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CandleEngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_tokenizer_config_str(&raw)
    }

    pub fn from_tokenizer_config_str(raw: &str) -> Result<Self, CandleEngineError> {
        let config: TokenizerConfig = serde_json::from_str(raw)?;
        let bos = config.bos_token.map(RawToken::into_content).unwrap_or_default();
        let eos = config.eos_token.map(RawToken::into_content).unwrap_or_default();

        let source = match config.chat_template {
            Some(RawTemplate::Single(source)) => source,
            Some(RawTemplate::Named(mut named)) if !named.is_empty() => {
                let index = named.iter().position(|t| t.name == "default").unwrap_or(0);
                named.swap_remove(index).template
            }
            _ => {
                tracing::warn!("tokenizer config has no chat_template, using ChatML");
                return Self::chatml();
            }
        };
        Self::new(source, bos, eos)
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    pub fn render(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<String, CandleEngineError> {
        let messages: Vec<TemplateMessage<'_>> = messages
            .iter()
            .map(|m| TemplateMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();
        let template = self.env.get_template(TEMPLATE_NAME)?;
        Ok(template.render(context! {
            messages => messages,
            add_generation_prompt => add_generation_prompt,
            bos_token => self.bos_token,
            eos_token => self.eos_token,
        })?)
    }
}

fn raise_exception(message: String) -> Result<String, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hi() -> Vec<Message> {
        vec![Message::new("user", "Hi")]
    }

    #[test]
    fn chatml_renders_generation_prompt() {
        let template = ChatTemplate::chatml().unwrap();
        assert_eq!(
            template.render(&hi(), true).unwrap(),
            "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n"
        );
        assert_eq!(
            template.render(&hi(), false).unwrap(),
            "<|im_start|>user\nHi<|im_end|>\n"
        );
    }

    #[test]
    fn reads_template_and_token_objects_from_config() {
        let config = r#"{
            "bos_token": {"content": "<s>", "lstrip": false},
            "eos_token": "</s>",
            "chat_template": "{{ bos_token }}{% for m in messages %}[{{ m.role }}] {{ m.content }}{{ eos_token }}{% endfor %}"
        }"#;
        let template = ChatTemplate::from_tokenizer_config_str(config).unwrap();
        assert_eq!(template.eos_token(), "</s>");
        assert_eq!(template.render(&hi(), true).unwrap(), "<s>[user] Hi</s>");
    }

    #[test]
    fn prefers_default_named_template() {
        let config = r#"{
            "chat_template": [
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "plain"}
            ]
        }"#;
        let template = ChatTemplate::from_tokenizer_config_str(config).unwrap();
        assert_eq!(template.render(&hi(), true).unwrap(), "plain");
    }

    #[test]
    fn missing_template_falls_back_to_chatml() {
        let template = ChatTemplate::from_tokenizer_config_str("{}").unwrap();
        assert!(template.render(&hi(), true).unwrap().starts_with("<|im_start|>user"));
    }

    #[test]
    fn raise_exception_fails_the_render() {
        let template =
            ChatTemplate::new("{{ raise_exception('roles must alternate') }}", "", "").unwrap();
        let err = template.render(&hi(), true).unwrap_err();
        assert!(err.to_string().contains("invalid chat template"));
    }

    #[test]
    fn syntax_errors_surface_at_construction() {
        assert!(matches!(
            ChatTemplate::new("{% for %}", "", ""),
            Err(CandleEngineError::Template(_))
        ));
    }
}
