pub mod chat;
pub mod classifier;
pub mod pool;
pub mod realtime;
mod sse;
pub mod stt;
pub mod traits;
pub mod tts;
mod util;

pub use chat::OpenAiChatClient;
pub use classifier::IntentClassifier;
pub use pool::{ClientFactory, ClientPool, Lease};
pub use realtime::WsRealtimeVoice;
pub use stt::{WsRecognizer, WsRecognizerFactory};
pub use traits::{
    ChatClient, ChatRequest, RealtimeStream, RealtimeVoice, Recognizer, RecognizerStream,
    SynthesisStream, Synthesizer,
};
pub use tts::{WsSynthesizer, WsSynthesizerFactory};
