use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::UsageSnapshot;

pub const MIN_INPUT_CHARS: usize = 10;
pub const MAX_INPUT_CHARS: usize = 1000;

/// Returns a reason when the prompt falls outside the accepted length.
pub fn validate_input(input_text: &str) -> Option<String> {
    let count = input_text.chars().count();
    if count < MIN_INPUT_CHARS {
        return Some(format!(
            "Prompt must be at least {MIN_INPUT_CHARS} characters, got {count}."
        ));
    }
    if count > MAX_INPUT_CHARS {
        return Some(format!(
            "Prompt must be at most {MAX_INPUT_CHARS} characters, got {count}."
        ));
    }

    return None;
}

/// JSON body posted to the generation endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationBody {
    #[serde(rename = "textStr")]
    pub text_str: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(rename = "turnstileToken", default)]
    pub turnstile_token: String,
    #[serde(rename = "modelId", default)]
    pub model_id: String,
}

/// A generation request as the endpoint sees it once the caller's network
/// address is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub input_text: String,
    pub model_id: String,
    pub identity: Option<String>,
    pub client_network_address: String,
    pub verification_token: String,
}

impl GenerationRequest {
    pub fn from_body(body: GenerationBody, client_network_address: &str) -> GenerationRequest {
        let identity = body.user_id.filter(|id| return !id.trim().is_empty());
        return GenerationRequest {
            input_text: body.text_str,
            model_id: body.model_id,
            identity,
            client_network_address: client_network_address.to_string(),
            verification_token: body.turnstile_token,
        };
    }

    pub fn quota_key(&self) -> String {
        return quota_key(self.identity.as_deref(), &self.client_network_address);
    }
}

/// Per-caller key for quota and flood tracking: the identity when one is
/// given, otherwise the network address.
pub fn quota_key(identity: Option<&str>, client_network_address: &str) -> String {
    if let Some(identity) = identity.filter(|id| return !id.trim().is_empty()) {
        return format!("user:{identity}");
    }

    return format!("ip:{client_network_address}");
}

/// Error payload returned with every non-2xx generation response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(
        rename = "requiresUpgrade",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub requires_upgrade: Option<bool>,
    #[serde(rename = "modelId", skip_serializing_if = "Option::is_none", default)]
    pub model_id: Option<String>,
    #[serde(rename = "usageInfo", skip_serializing_if = "Option::is_none", default)]
    pub usage_info: Option<UsageSnapshot>,
}

impl ErrorBody {
    pub fn message(error: &str) -> ErrorBody {
        return ErrorBody {
            error: error.to_string(),
            ..ErrorBody::default()
        };
    }
}

/// One completed prompt and answer pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatExchange {
    pub id: String,
    pub input_text: String,
    pub output_text: String,
    pub identity: Option<String>,
}

impl ChatExchange {
    pub fn new(input_text: &str, output_text: &str, identity: Option<String>) -> ChatExchange {
        return ChatExchange {
            id: Uuid::new_v4().to_string(),
            input_text: input_text.to_string(),
            output_text: output_text.to_string(),
            identity,
        };
    }

    pub fn is_empty(&self) -> bool {
        return self.input_text.trim().is_empty() || self.output_text.trim().is_empty();
    }

    pub fn to_body(&self) -> ExchangeBody {
        return ExchangeBody {
            input_text: self.input_text.to_string(),
            output_text: self.output_text.to_string(),
            user_id: self.identity.clone(),
        };
    }
}

/// JSON body posted to the save exchange collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeBody {
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub output_text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// State of a single in-flight generation. Dropped once the request
/// resolves, fails or is cancelled.
pub struct StreamSession {
    pub text: String,
    pub usage: Option<UsageSnapshot>,
    pub cancel: CancellationToken,
    pub completed: bool,
}

impl StreamSession {
    pub fn new(cancel: CancellationToken) -> StreamSession {
        return StreamSession {
            text: "".to_string(),
            usage: None,
            cancel,
            completed: false,
        };
    }
}
