use council_core::Message;

/// Builds continuation prompts. Every prompt ends with the configured
/// directives, one per line, exactly as configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptBuilder {
    directives: Vec<String>,
}

impl PromptBuilder {
    pub fn new(directives: Vec<String>) -> Self {
        Self { directives }
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// Operator text, byte for byte.
    pub fn manual(&self, text: &str) -> String {
        self.finish(text.to_owned())
    }

    /// Ask the orchestrator to pick whoever should answer `trigger`.
    pub fn auto(&self, trigger: &Message) -> String {
        let actor = if trigger.actor_name.trim().is_empty() {
            "An unnamed participant"
        } else {
            trigger.actor_name.trim()
        };
        let body = format!(
            "{actor} just said:\n\n{content}\n\nSelect the next appropriate agent to respond to this and have them continue the conversation.",
            content = trigger.content.trim(),
        );
        self.finish(body)
    }

    fn finish(&self, mut body: String) -> String {
        if self.directives.is_empty() {
            return body;
        }
        body.push_str("\n\n");
        body.push_str(&self.directives.join("\n"));
        body
    }
}
