//! services/api/src/adapters/generation_llm.rs
//!
//! This module contains the adapter for the answer-generating LLM. It
//! implements the `Generator` port from the `core` crate on top of the
//! OpenAI chat completions API, in both batch and streaming form.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::StreamExt;
use rag_agent_core::context::GenerationRequest;
use rag_agent_core::domain::{Role, TokenUsage};
use rag_agent_core::ports::{
    ChatError, ChatResult, GenerationOutput, GenerationStream, Generator,
};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `Generator` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    /// Creates a new `OpenAiGenerator`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> ChatResult<CreateChatCompletionRequest> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);

        messages.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()
                .map_err(generation)?,
        ));

        for turn in &request.history {
            let message = match turn.role {
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(generation)?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(generation)?,
                ),
            };
            messages.push(message);
        }

        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.question.clone())
                .build()
                .map_err(generation)?,
        ));

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(stream)
            .build()
            .map_err(generation)
    }
}

fn generation(e: impl std::fmt::Display) -> ChatError {
    ChatError::Generation(e.to_string())
}

//=========================================================================================
// `Generator` Trait Implementation
//=========================================================================================

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> ChatResult<GenerationOutput> {
        let body = self.build_request(request, false)?;

        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(generation)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        // Counters the API did not report stay unknown.
        let usage = response
            .usage
            .map(|usage| TokenUsage {
                input_tokens: Some(i64::from(usage.prompt_tokens)),
                output_tokens: Some(i64::from(usage.completion_tokens)),
                total_tokens: Some(i64::from(usage.total_tokens)),
                rag_tokens: None,
            })
            .unwrap_or_default();

        Ok(GenerationOutput { text, usage })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> ChatResult<GenerationStream> {
        let body = self.build_request(request, true)?;

        let mut chunks = self
            .client
            .chat()
            .create_stream(body)
            .await
            .map_err(generation)?;

        Ok(Box::pin(async_stream::stream! {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(response) => {
                        let delta = response
                            .choices
                            .first()
                            .and_then(|choice| choice.delta.content.clone());
                        if let Some(delta) = delta {
                            if !delta.is_empty() {
                                yield Ok(delta);
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(generation(e));
                        return;
                    }
                }
            }
        }))
    }
}
