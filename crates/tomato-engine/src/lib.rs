pub mod codec;
pub mod endpoint;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod settings;
pub mod specialists;

pub use codec::{ImageBlob, ImageKind};
pub use endpoint::{ChatEndpoint, ChatRequest, DryrunEndpoint, OpenAiChatEndpoint};
pub use error::AnalysisError;
pub use orchestrator::TomatoAnalyzer;
pub use parser::{BalancedObjectParser, BraceSpanParser, ReplyParser};
pub use settings::{AnalyzerSettings, ExecutionMode, ParserKind, ProviderKind};
