//! Bounded conversation context.
//!
//! Pruning happens only when assembling a request. Stored history is never
//! modified.

use parley_config::ContextConfig;
use parley_core::message::{Message, Role};

/// Selects the most recent messages to send upstream.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    max_history: usize,
}

impl ContextBuilder {
    pub fn new(max_history: usize) -> Self {
        Self { max_history }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.max_conversation_history)
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// A builder that keeps at most `cap` messages, never more than this one.
    pub fn capped(self, cap: usize) -> Self {
        Self::new(self.max_history.min(cap))
    }

    /// Keep the newest `max_history` messages in chronological order.
    ///
    /// A leading `system` message is always kept and does not count toward
    /// the limit. A history of exactly `max_history` messages is returned whole.
    pub fn build(&self, history: &[Message]) -> Vec<Message> {
        let (pinned, rest) = match history.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first), rest),
            _ => (None, history),
        };

        let skip = rest.len().saturating_sub(self.max_history);
        let mut context = Vec::with_capacity(rest.len() - skip + usize::from(pinned.is_some()));
        context.extend(pinned.cloned());
        context.extend(rest[skip..].iter().cloned());
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("m{i}"))
                } else {
                    Message::assistant(format!("m{i}"))
                }
            })
            .collect()
    }

    fn contents(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn empty_history_yields_empty_context() {
        assert!(ContextBuilder::new(50).build(&[]).is_empty());
    }

    #[test]
    fn short_history_is_untouched() {
        let history = numbered(10);
        assert_eq!(ContextBuilder::new(50).build(&history), history);
    }

    #[test]
    fn history_at_limit_is_kept_whole() {
        let history = numbered(50);
        assert_eq!(ContextBuilder::new(50).build(&history), history);
    }

    #[test]
    fn keeps_most_recent_suffix_in_order() {
        let history = numbered(60);
        let context = ContextBuilder::new(50).build(&history);
        assert_eq!(context.len(), 50);
        assert_eq!(context.first().unwrap().content, "m10");
        assert_eq!(context.last().unwrap().content, "m59");
        assert_eq!(context, history[10..].to_vec());
    }

    #[test]
    fn leading_system_message_survives_and_is_not_counted() {
        let mut history = vec![Message::system("Be brief")];
        history.extend(numbered(60));

        let context = ContextBuilder::new(50).build(&history);
        assert_eq!(context.len(), 51);
        assert_eq!(context[0].role, Role::System);
        assert_eq!(context[1].content, "m10");
        assert_eq!(context[50].content, "m59");
    }

    #[test]
    fn non_leading_system_message_is_ordinary() {
        let mut history = numbered(3);
        history.push(Message::system("late"));
        history.extend(numbered(3));

        let context = ContextBuilder::new(2).build(&history);
        assert_eq!(contents(&context), vec!["m1", "m2"]);
    }

    #[test]
    fn absent_system_message_frees_no_extra_slot() {
        let history = numbered(5);
        let context = ContextBuilder::new(3).build(&history);
        assert_eq!(contents(&context), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn cap_only_ever_lowers_the_limit() {
        let builder = ContextBuilder::new(50);
        assert_eq!(builder.capped(10).max_history(), 10);
        assert_eq!(builder.capped(80).max_history(), 50);

        let context = builder.capped(10).build(&numbered(60));
        assert_eq!(context.len(), 10);
        assert_eq!(context[0].content, "m50");
    }

    #[test]
    fn zero_history_keeps_only_system() {
        let mut history = vec![Message::system("rules")];
        history.extend(numbered(4));
        let context = ContextBuilder::new(0).build(&history);
        assert_eq!(contents(&context), vec!["rules"]);
    }
}
