//! ARG/ENV variable scope and `$NAME` / `${NAME}` substitution.

use std::collections::BTreeMap;

use super::text::trim_quotes;

/// Variable bindings visible at one point of a build stage.
///
/// A scope is an immutable snapshot: binding a variable returns a new scope
/// and leaves the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableScope {
    vars: BTreeMap<String, String>,
}

impl VariableScope {
    /// Seed a scope from global build arguments.
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Return a new scope with `name` bound to `value`.
    pub fn bind(&self, name: &str, value: &str) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value.to_string());
        Self { vars }
    }

    /// Apply the pairs of an `ARG` instruction.
    ///
    /// A value only replaces the current binding when it is non-empty after
    /// substitution, so `ARG NAME` keeps a value seeded by a global arg.
    pub fn apply_arg(&self, pairs: &[(String, String)]) -> Self {
        pairs.iter().fold(self.clone(), |scope, (name, value)| {
            let value = substitute(value, &scope);
            if value.is_empty() {
                scope
            } else {
                scope.bind(name, &value)
            }
        })
    }

    /// Apply the pairs of an `ENV` instruction.
    ///
    /// Returns the new scope and the substituted bindings, which also belong
    /// to the stage's exported environment.
    pub fn apply_env(&self, pairs: &[(String, String)]) -> (Self, Vec<(String, String)>) {
        let mut scope = self.clone();
        let mut exported = Vec::with_capacity(pairs.len());
        for (name, value) in pairs {
            let value = substitute(value, &scope);
            scope = scope.bind(name, &value);
            exported.push((name.clone(), value));
        }
        (scope, exported)
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.vars
    }
}

/// Replace `$NAME` and `${NAME}` references bound to non-empty values, then
/// strip one layer of surrounding quotes.
///
/// References to unknown or empty variables are left verbatim.
pub fn substitute(text: &str, scope: &VariableScope) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match scope.get(name).filter(|v| !name.is_empty() && !v.is_empty()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);

    trim_quotes(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(pairs: &[(&str, &str)]) -> VariableScope {
        VariableScope::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_plain_and_braced() {
        let s = scope(&[("VERSION", "1.2"), ("NAME", "tool")]);
        assert_eq!(
            substitute("http://x/$NAME-${VERSION}.tgz", &s),
            "http://x/tool-1.2.tgz"
        );
    }

    #[test]
    fn test_substitute_keeps_empty_placeholder() {
        let s = scope(&[("VERSION", "")]);
        assert_eq!(substitute("/opt/tool-$VERSION", &s), "/opt/tool-$VERSION");
        assert_eq!(substitute("/opt/tool-${VERSION}", &s), "/opt/tool-${VERSION}");
    }

    #[test]
    fn test_substitute_keeps_unknown_placeholder() {
        let s = VariableScope::default();
        assert_eq!(substitute("$HOME/bin", &s), "$HOME/bin");
    }

    #[test]
    fn test_substitute_longest_name_wins() {
        let s = scope(&[("A", "short"), ("AB", "long")]);
        assert_eq!(substitute("$AB-$A", &s), "long-short");
    }

    #[test]
    fn test_substitute_strips_quotes() {
        let s = scope(&[("DIR", "/opt")]);
        assert_eq!(substitute("\"$DIR/app\"", &s), "/opt/app");
    }

    #[test]
    fn test_substitute_lone_dollar_and_unclosed_brace() {
        let s = scope(&[("A", "1")]);
        assert_eq!(substitute("cost $ 5", &s), "cost $ 5");
        assert_eq!(substitute("${A", &s), "${A");
    }

    #[test]
    fn test_apply_arg_keeps_seeded_value() {
        let global = scope(&[("VERSION", "2.0")]);
        let next = global.apply_arg(&pairs(&[("VERSION", "")]));
        assert_eq!(next.get("VERSION"), Some("2.0"));
    }

    #[test]
    fn test_apply_arg_overwrites_with_non_empty() {
        let global = scope(&[("VERSION", "2.0")]);
        let next = global.apply_arg(&pairs(&[("VERSION", "3.0"), ("NAME", "tool")]));
        assert_eq!(next.get("VERSION"), Some("3.0"));
        assert_eq!(next.get("NAME"), Some("tool"));
        assert_eq!(global.get("VERSION"), Some("2.0"));
    }

    #[test]
    fn test_apply_env_substitutes_and_exports() {
        let base = scope(&[("VERSION", "1.0")]);
        let (next, exported) =
            base.apply_env(&pairs(&[("HOME_DIR", "/opt/tool-$VERSION"), ("EMPTY", "")]));
        assert_eq!(next.get("HOME_DIR"), Some("/opt/tool-1.0"));
        assert_eq!(next.get("EMPTY"), Some(""));
        assert_eq!(
            exported,
            pairs(&[("HOME_DIR", "/opt/tool-1.0"), ("EMPTY", "")])
        );
    }

    #[test]
    fn test_apply_env_sees_earlier_pairs_on_same_line() {
        let (next, _) =
            VariableScope::default().apply_env(&pairs(&[("A", "/a"), ("B", "$A/b")]));
        assert_eq!(next.get("B"), Some("/a/b"));
    }
}
