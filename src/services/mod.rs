pub mod authoring;
pub mod fetch;
pub mod graph;
pub mod image;
pub mod llm;
pub mod pdf;
pub mod prompts;
pub mod tts;
pub mod video;
pub mod workflow;
