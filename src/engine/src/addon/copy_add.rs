//! COPY and ADD instructions.

use addontrace_core::error::{DiscoverError, Result};
use addontrace_core::{InstallTrace, Trace};
use sha2::{Digest, Sha256};

use super::scope::{substitute, VariableScope};
use super::text::join_path;
use super::verb::Verb;

/// Prefix of origins that refer back to another build stage.
pub const BUILDSTAGE_PREFIX: &str = "buildstage:";

/// Hex SHA-256 of an origin identity.
pub fn identity_hash(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

/// Split a `buildstage:<stage>:<sources>` origin into stage and sources.
pub fn parse_buildstage_origin(origin: &str) -> Option<(&str, Vec<&str>)> {
    let rest = origin.strip_prefix(BUILDSTAGE_PREFIX)?;
    let (stage, sources) = rest.split_once(':')?;
    Some((stage, sources.split(',').filter(|s| !s.is_empty()).collect()))
}

/// Build the install trace of one COPY/ADD instruction.
///
/// `identity` is the origin of files taken from the local build context.
/// Fails with [`DiscoverError::NoTrace`] when the arguments hold fewer than a
/// source and a destination.
pub fn handle(
    verb: Verb,
    args: &[String],
    workdir: &str,
    identity: &str,
    scope: &VariableScope,
) -> Result<InstallTrace> {
    let (flags, positionals): (Vec<&String>, Vec<&String>) =
        args.iter().partition(|a| a.starts_with("--"));

    let positionals: Vec<String> = positionals.iter().map(|a| substitute(a, scope)).collect();
    let Some((destination, sources)) = positionals.split_last().filter(|(_, s)| !s.is_empty())
    else {
        return Err(DiscoverError::NoTrace(format!(
            "{} {}",
            verb.label(),
            args.join(" ")
        )));
    };

    let destination = if destination == "./" {
        format!("{}/.", workdir.trim_end_matches('/'))
    } else {
        join_path(workdir, destination.trim())
    };

    let from_stage = flags.iter().find_map(|f| f.strip_prefix("--from="));
    let (origin, origin_hash) = match from_stage {
        Some(stage) => (
            format!("{}{}:{}", BUILDSTAGE_PREFIX, substitute(stage, scope), sources.join(",")),
            None,
        ),
        None if sources[0].starts_with("http") => (sources[0].clone(), None),
        None => (identity.to_string(), Some(identity_hash(identity))),
    };

    let traces = sources
        .iter()
        .map(|source| Trace {
            command: verb.label().to_string(),
            source: source.clone(),
            destination: destination.clone(),
            workdir: workdir.to_string(),
            link: None,
        })
        .collect();

    Ok(InstallTrace {
        origin,
        origin_hash,
        traces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_copy_from_stage() {
        let install = handle(
            Verb::Copy,
            &args("--from=build --chown=app:app /out/app /out/lib /usr/local/bin/"),
            "/",
            "context:abc",
            &VariableScope::default(),
        )
        .unwrap();
        assert_eq!(install.origin, "buildstage:build:/out/app,/out/lib");
        assert!(install.origin.starts_with("buildstage:build:"));
        assert_eq!(install.origin_hash, None);
        assert_eq!(install.traces.len(), 2);
        assert_eq!(install.traces[1].source, "/out/lib");
        assert_eq!(install.traces[1].destination, "/usr/local/bin/");
        assert_eq!(install.traces[0].command, "COPY");
    }

    #[test]
    fn test_add_url_origin() {
        let install = handle(
            Verb::Add,
            &args("http://example.com/tool.tgz /opt/"),
            "/",
            "context:abc",
            &VariableScope::default(),
        )
        .unwrap();
        assert_eq!(install.origin, "http://example.com/tool.tgz");
        assert_eq!(install.origin_hash, None);
        assert_eq!(install.traces[0].command, "ADD");
    }

    #[test]
    fn test_copy_local_context() {
        let install = handle(
            Verb::Copy,
            &args("requirements.txt ./"),
            "/app/",
            "https://github.com/org/repo",
            &VariableScope::default(),
        )
        .unwrap();
        assert_eq!(install.origin, "https://github.com/org/repo");
        assert_eq!(
            install.origin_hash.as_deref(),
            Some(identity_hash("https://github.com/org/repo").as_str())
        );
        assert_eq!(install.traces[0].destination, "/app/.");
        assert_eq!(install.traces[0].workdir, "/app/");
    }

    #[test]
    fn test_copy_relative_destination_and_substitution() {
        let scope = VariableScope::default().bind("APP", "svc");
        let install = handle(
            Verb::Copy,
            &args("bin/$APP lib/"),
            "/opt",
            "ns",
            &scope,
        )
        .unwrap();
        assert_eq!(install.traces[0].source, "bin/svc");
        assert_eq!(install.traces[0].destination, "/opt/lib/");
    }

    #[test]
    fn test_copy_without_pair() {
        let result = handle(
            Verb::Copy,
            &args("--chown=a:b onlysource"),
            "/",
            "ns",
            &VariableScope::default(),
        );
        assert!(matches!(result, Err(DiscoverError::NoTrace(_))));
    }

    #[test]
    fn test_identity_hash() {
        assert_eq!(
            identity_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_buildstage_origin() {
        let (stage, sources) = parse_buildstage_origin("buildstage:build:/a,/b").unwrap();
        assert_eq!(stage, "build");
        assert_eq!(sources, vec!["/a", "/b"]);
        assert!(parse_buildstage_origin("http://x").is_none());
    }
}
