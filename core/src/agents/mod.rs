pub mod adapters;
pub mod cloud;
pub mod ollama;
pub mod registry;

pub use cloud::{CloudGenerator, CloudRequest, GeminiClient};
pub use ollama::OllamaRegistry;
pub use registry::{
    NullRegistry, PromptOptions, ProviderRegistry, RewriteLength, RewriteTone, RewriterOptions,
    SessionRequest, SummarizerOptions, SummaryKind, SummaryLength, TextFormat, TextSession,
    TranslatorOptions, WriterOptions, WriterTone,
};
