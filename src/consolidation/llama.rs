use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::Path;

use super::{SUMMARY_PROMPT, Summarizer};

const CONTEXT_TOKENS: u32 = 4096;
const MAX_NEW_TOKENS: i32 = 256;

fn summarization_error(e: impl std::fmt::Display) -> crate::Error {
    crate::Error::Summarization(e.to_string())
}

/// Summarizer backed by a local GGUF model through llama.cpp.
///
/// Decoding is greedy, so the same descriptions give the same bullets.
pub struct LlamaSummarizer {
    backend: LlamaBackend,
    model: LlamaModel,
}

impl LlamaSummarizer {
    pub fn load(path: &Path) -> Result<Self, crate::Error> {
        let backend = LlamaBackend::init().map_err(summarization_error)?;
        let model = LlamaModel::load_from_file(&backend, path, &LlamaModelParams::default())
            .map_err(summarization_error)?;
        tracing::info!("Loaded summarization model {}", path.display());
        Ok(Self { backend, model })
    }

    fn generate(&self, prompt: &str) -> Result<String, crate::Error> {
        let context_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(CONTEXT_TOKENS));
        let mut context = self
            .model
            .new_context(&self.backend, context_params)
            .map_err(summarization_error)?;

        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(summarization_error)?;
        if tokens.len() as u32 + MAX_NEW_TOKENS as u32 > CONTEXT_TOKENS {
            return Err(crate::Error::Summarization(format!(
                "prompt of {} tokens does not fit the context",
                tokens.len()
            )));
        }

        let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
        let last = tokens.len() as i32 - 1;
        for (position, token) in (0_i32..).zip(tokens) {
            batch
                .add(token, position, &[0], position == last)
                .map_err(summarization_error)?;
        }
        context.decode(&mut batch).map_err(summarization_error)?;

        let mut sampler = LlamaSampler::greedy();
        let mut output = String::new();
        let mut position = batch.n_tokens();
        let end = position + MAX_NEW_TOKENS;

        while position < end {
            let token = sampler.sample(&context, batch.n_tokens() - 1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                break;
            }

            let piece = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(summarization_error)?;
            output.push_str(&String::from_utf8_lossy(&piece));

            batch.clear();
            batch
                .add(token, position, &[0], true)
                .map_err(summarization_error)?;
            position += 1;
            context.decode(&mut batch).map_err(summarization_error)?;
        }

        Ok(output)
    }
}

impl Summarizer for LlamaSummarizer {
    fn summarize(&self, descriptions: &[&str]) -> Result<String, crate::Error> {
        let prompt = format!("{SUMMARY_PROMPT}{}", descriptions.join("\n"));
        self.generate(&prompt)
    }
}
