use async_trait::async_trait;
use parley_core::Result;
use parley_core::message::Message;
use parley_core::operation::{ModelParameters, OperationInput};
use serde_json::json;

use super::{Strategy, StrategyPayload, assemble, split_turn};

pub(super) const NAME: &str = "device_diagnostic";

const SYSTEM_PROMPT: &str = "You are an expert device diagnostics specialist. Provide clear, actionable \
diagnostic steps that users can perform themselves. Include specific commands, button combinations, and \
built-in diagnostic tools.";

/// Structured diagnostic steps for a device.
///
/// Input attributes: `device_type` (printer, phone, pc, console, ...),
/// `device_info` (make and model) and `operating_system`. The input text is
/// the problem description.
pub struct DeviceDiagnosticStrategy {
    system_prompt: String,
}

impl DeviceDiagnosticStrategy {
    pub fn new() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.into(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        if let Some(prompt) = prompt {
            self.system_prompt = prompt;
        }
        self
    }
}

impl Default for DeviceDiagnosticStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn diagnostic_prompt(device_type: &str, device_info: Option<&str>, os: Option<&str>, problem: Option<&str>) -> String {
    format!(
        "Generate comprehensive diagnostic steps for:
Device Type: {device_type}
Device: {}
Operating System: {}
Problem: {}

Provide:
1. **Quick Checks** (things to verify immediately)
2. **Diagnostic Commands** (specific commands or tests to run)
3. **Built-in Diagnostic Tools** (how to access the device's own diagnostics)
4. **What to Look For** (error messages, indicators, patterns)
5. **Safety Warnings** (if any)

Format the response as clear steps the user can follow.",
        device_info.unwrap_or("Not specified"),
        os.unwrap_or("Not specified"),
        problem.unwrap_or("General diagnostics"),
    )
}

#[async_trait]
impl Strategy for DeviceDiagnosticStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn defaults(&self) -> ModelParameters {
        ModelParameters::new(0.3, 1200)
    }

    async fn build_payload(&self, context: &[Message], input: &OperationInput) -> Result<StrategyPayload> {
        let device_type = input.attribute_str("device_type").unwrap_or("device");
        let device_info = input.attribute_str("device_info");
        let problem = Some(input.text.trim()).filter(|t| !t.is_empty());
        let prompt = diagnostic_prompt(device_type, device_info, input.attribute_str("operating_system"), problem);

        let (history, _) = split_turn(context);
        let messages = assemble(&self.system_prompt, history, Message::user(prompt));

        let mut metadata = serde_json::Map::new();
        metadata.insert("device_type".into(), json!(device_type));
        if let Some(info) = device_info {
            metadata.insert("device_info".into(), json!(info));
        }

        Ok(StrategyPayload {
            messages,
            parameters: self.defaults(),
            metadata,
        })
    }
}
