use super::ChatExchange;
use super::GenerationError;
use super::UsageSnapshot;

pub enum Event {
    GenerationCompleted(Option<ChatExchange>),
    GenerationFailed(GenerationError),
    GenerationStarted(String),
    GenerationText(String),
    Notice(String),
    Ready(),
    UsageUpdated(UsageSnapshot),
    VerificationRequested(),
}
