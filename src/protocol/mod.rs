pub mod anthropic;
pub mod canonical;
pub mod gemini;
pub mod mapping;
pub mod ollama;
pub mod openai_chat;
