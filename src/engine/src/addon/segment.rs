//! Splits RUN shell text into install sets.

use addontrace_core::CommandSet;

use super::text::{split_fragments, trim_quotes};
use super::verb::Verb;
use crate::dockerfile::parser::CONTINUATION;

const AND_SEPARATOR: &str = "&&";

/// Split a RUN command into command sets, each opened by a fetch anchor
/// (`curl`, `wget` or `git clone`).
///
/// Fragments before the first anchor are dropped. A command without any
/// anchor yields no sets.
pub fn segment(run_text: &str) -> Vec<CommandSet> {
    let semicolon_separator = format!(";{}", CONTINUATION);
    let separator = if !run_text.contains(AND_SEPARATOR) && run_text.contains(&semicolon_separator)
    {
        semicolon_separator.as_str()
    } else {
        AND_SEPARATOR
    };

    let mut sets: Vec<CommandSet> = Vec::new();
    for fragment in split_fragments(run_text, separator) {
        let fragment = trim_quotes(&fragment).to_string();
        if starts_with_anchor(&fragment) {
            sets.push(CommandSet {
                commands: vec![fragment],
            });
        } else if let Some(current) = sets.last_mut() {
            current.commands.push(fragment);
        }
    }

    tracing::trace!(sets = sets.len(), separator, "Segmented RUN command");
    sets
}

fn starts_with_anchor(fragment: &str) -> bool {
    let tokens: Vec<String> = fragment
        .split_whitespace()
        .take(2)
        .map(String::from)
        .collect();
    Verb::classify(&tokens).is_some_and(|verb| verb.is_anchor())
}
