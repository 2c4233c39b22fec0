// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Control Commands
//!
//! Hash-prefixed tokens inside a message body steer the receiving agent:
//!
//! * `#pause` / `#stop` — pause indefinitely. Mentions in the same text stay
//!   visible to other agents.
//! * `#done` — pause for a cool-down, purge the remaining backlog (the loop
//!   break), and strip `@mentions` from the outgoing reply so the pause does
//!   not provoke further traffic.
//!
//! Parsing is literal and case-sensitive. Tokens inside ``` fenced code are
//! literal text and never trigger commands. Unknown `#tokens` pass through
//! unchanged.

/// Commands recognised in one message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedCommands {
    /// `#pause` or `#stop` was present.
    pub pause: bool,
    /// `#done` was present.
    pub done: bool,
}

impl ParsedCommands {
    pub fn any(&self) -> bool {
        self.pause || self.done
    }
}

pub fn parse_commands(content: &str) -> ParsedCommands {
    let mut commands = ParsedCommands::default();
    for segment in visible_segments(content) {
        for token in segment.split_whitespace() {
            match token {
                "#pause" | "#stop" => commands.pause = true,
                "#done" => commands.done = true,
                _ => {}
            }
        }
    }
    commands
}

/// Segments of `content` outside ``` fences. An unclosed fence swallows the
/// rest of the text, matching how chat clients render it.
fn visible_segments(content: &str) -> impl Iterator<Item = &str> {
    content.split("```").step_by(2)
}

/// Remove `#done` tokens from an outgoing reply, fenced code untouched.
pub fn strip_done_tokens(text: &str) -> String {
    strip_tokens(text, |token| token == "#done")
}

/// Remove every `@mention` token from an outgoing reply, fenced code
/// untouched. Applied only on `#done` replies.
pub fn strip_mentions(text: &str) -> String {
    strip_tokens(text, |token| token.len() > 1 && token.starts_with('@'))
}

/// Remove leading `@agent` tokens referring to the publishing agent itself.
/// A reply opening with its own name would mention the agent back into its
/// own queue on the next poll.
pub fn strip_leading_self_mentions(text: &str, agent: &str) -> String {
    let own = format!("@{agent}");
    let mut rest = text.trim_start();
    loop {
        let Some(after) = rest.strip_prefix(own.as_str()) else {
            break;
        };
        // Only a full token counts: "@alpha2" is another agent.
        if !after.is_empty() && !after.starts_with(char::is_whitespace) {
            break;
        }
        rest = after.trim_start();
    }
    rest.to_string()
}

fn strip_tokens(text: &str, drop: impl Fn(&str) -> bool) -> String {
    let mut out = String::new();
    for (i, segment) in text.split("```").enumerate() {
        if i > 0 {
            out.push_str("```");
        }
        if i % 2 == 1 || !segment.split_whitespace().any(&drop) {
            // inside a fence, or nothing to remove: verbatim
            out.push_str(segment);
            continue;
        }
        let filtered = segment
            .lines()
            .map(|line| {
                line.split_whitespace()
                    .filter(|token| !drop(token))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str(&filtered);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_the_three_commands() {
        assert!(parse_commands("@bot #pause").pause);
        assert!(parse_commands("@bot please #stop now").pause);
        assert!(parse_commands("all wrapped up #done").done);
        let both = parse_commands("#stop #done");
        assert!(both.pause && both.done);
    }

    #[test]
    fn parsing_is_literal_and_case_sensitive() {
        assert!(!parse_commands("#Pause").any());
        assert!(!parse_commands("#DONE").any());
        assert!(!parse_commands("#donezo").any());
        assert!(!parse_commands("word#done").any());
        // unknown tokens are inert
        assert!(!parse_commands("#retry #ship-it").any());
    }

    #[test]
    fn fenced_code_is_inert() {
        let text = "look at this:\n```\n#pause\n#done\n```\nno command here";
        assert!(!parse_commands(text).any());
        // but a command outside the fence still counts
        let text = "```\n#pause\n``` #done";
        let commands = parse_commands(text);
        assert!(commands.done);
        assert!(!commands.pause);
    }

    #[test]
    fn strips_done_token_from_reply() {
        assert_eq!(strip_done_tokens("done. #done"), "done.");
        assert_eq!(strip_done_tokens("#done all finished"), "all finished");
    }

    #[test]
    fn strips_mentions_but_not_inside_fences() {
        assert_eq!(strip_mentions("done @bob @carol"), "done");
        let fenced = "see ```@bob``` later";
        assert_eq!(strip_mentions(fenced), "see ```@bob``` later");
    }

    #[test]
    fn strips_only_leading_self_mentions() {
        assert_eq!(strip_leading_self_mentions("@alpha @alpha hi", "alpha"), "hi");
        assert_eq!(
            strip_leading_self_mentions("@alpha2 hi", "alpha"),
            "@alpha2 hi"
        );
        assert_eq!(
            strip_leading_self_mentions("hello @alpha", "alpha"),
            "hello @alpha"
        );
    }
}
