//! Recognized shell and Dockerfile verbs.

use std::fmt;

/// Every operation the discovery engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Curl,
    Wget,
    GitClone,
    GitCheckout,
    Tar,
    Unzip,
    Cp,
    Mv,
    Cd,
    Copy,
    Add,
}

impl Verb {
    /// Verbs handled by shell operation handlers, in dispatch order.
    pub const SHELL: [Verb; 9] = [
        Verb::Curl,
        Verb::Wget,
        Verb::GitClone,
        Verb::GitCheckout,
        Verb::Tar,
        Verb::Unzip,
        Verb::Cp,
        Verb::Mv,
        Verb::Cd,
    ];

    /// Label recorded in `Trace::command`.
    pub fn label(&self) -> &'static str {
        match self {
            Verb::Curl => "curl",
            Verb::Wget => "wget",
            Verb::GitClone => "git clone",
            Verb::GitCheckout => "git checkout",
            Verb::Tar => "tar",
            Verb::Unzip => "unzip",
            Verb::Cp => "cp",
            Verb::Mv => "mv",
            Verb::Cd => "cd",
            Verb::Copy => "COPY",
            Verb::Add => "ADD",
        }
    }

    /// Classify the tokens of one shell sub-command.
    pub fn classify(tokens: &[String]) -> Option<Verb> {
        let first = tokens.first()?.as_str();
        match first {
            "curl" => Some(Verb::Curl),
            "wget" => Some(Verb::Wget),
            "tar" => Some(Verb::Tar),
            "unzip" => Some(Verb::Unzip),
            "cp" => Some(Verb::Cp),
            "mv" => Some(Verb::Mv),
            "cd" => Some(Verb::Cd),
            "git" => match tokens.get(1).map(String::as_str) {
                Some("clone") => Some(Verb::GitClone),
                Some("checkout") => Some(Verb::GitCheckout),
                _ => None,
            },
            _ => None,
        }
    }

    /// Recover the verb from a (possibly decorated) trace label such as
    /// `git clone -b main`.
    pub fn from_label(label: &str) -> Option<Verb> {
        match label {
            "COPY" => return Some(Verb::Copy),
            "ADD" => return Some(Verb::Add),
            _ => {}
        }
        let tokens: Vec<String> = label.split_whitespace().take(2).map(String::from).collect();
        Self::classify(&tokens)
    }

    /// Whether the verb fetches content from the network or a VCS.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Verb::Curl | Verb::Wget | Verb::GitClone | Verb::GitCheckout
        )
    }

    /// Whether the verb starts a new install set in a RUN command.
    pub fn is_anchor(&self) -> bool {
        matches!(self, Verb::Curl | Verb::Wget | Verb::GitClone)
    }

    /// Whether the verb's result needs manual review (archive members unknown).
    pub fn is_extraction(&self) -> bool {
        matches!(self, Verb::Tar | Verb::Unzip)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(Verb::classify(&tokens("curl -O x")), Some(Verb::Curl));
        assert_eq!(Verb::classify(&tokens("git clone x")), Some(Verb::GitClone));
        assert_eq!(Verb::classify(&tokens("git checkout v1")), Some(Verb::GitCheckout));
        assert_eq!(Verb::classify(&tokens("git pull")), None);
        assert_eq!(Verb::classify(&tokens("apt-get install")), None);
        assert_eq!(Verb::classify(&[]), None);
    }

    #[test]
    fn test_from_label_decorated() {
        assert_eq!(Verb::from_label("git clone -b main"), Some(Verb::GitClone));
        assert_eq!(Verb::from_label("tar"), Some(Verb::Tar));
        assert_eq!(Verb::from_label("COPY"), Some(Verb::Copy));
        assert_eq!(Verb::from_label("RUN"), None);
    }

    #[test]
    fn test_labels_roundtrip() {
        for verb in Verb::SHELL {
            assert_eq!(Verb::from_label(verb.label()), Some(verb));
        }
    }

    #[test]
    fn test_fetch_and_anchor() {
        assert!(Verb::GitCheckout.is_fetch());
        assert!(!Verb::GitCheckout.is_anchor());
        assert!(Verb::Wget.is_anchor());
        assert!(!Verb::Tar.is_fetch());
        assert!(Verb::Unzip.is_extraction());
    }
}
