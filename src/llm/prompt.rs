//! Draft prompt construction.

use crate::pipeline::types::SourceFields;

/// Persona preamble used when none is configured.
pub const DEFAULT_PERSONA: &str = "You are an assistant helping a small business owner \
     (AuroraSkin, a skincare brand) draft responses.";

/// Closing instructions appended after the message details.
pub const DEFAULT_INSTRUCTIONS: &str = "Draft a brief, professional response. Be helpful and \
     on-brand for a skincare company. Keep it concise.";

/// Fixed persona and instructions wrapped around each message's details.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub persona: String,
    pub instructions: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Build the draft prompt for one message. Deterministic for a given input.
    pub fn render(&self, source: &SourceFields) -> String {
        let order_id = source
            .order_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or("N/A");

        format!(
            "{persona}\n\n\
             Message details:\n\
             - From: {sender_name} ({sender_handle})\n\
             - Subject: {subject}\n\
             - Message: {snippet}\n\
             - Source: {source_system} / {channel}\n\
             - Category: {category}\n\
             - Order ID: {order_id}\n\n\
             {instructions}",
            persona = self.persona,
            sender_name = source.sender_name,
            sender_handle = source.sender_handle_or_email,
            subject = source.subject_or_topic,
            snippet = source.message_snippet,
            source_system = source.source_system,
            channel = source.channel_name,
            category = source.category,
            order_id = order_id,
            instructions = self.instructions,
        )
    }
}
