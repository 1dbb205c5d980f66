//! Data-plane authorization files
//!
//! The external storage server reads two generated files: a line-oriented
//! authfile (`u <subject> <path> <perms>`, with `\` line continuations) and
//! a scitokens INI describing the trusted token issuers. Both are rendered
//! from the administrator's input plus the server's namespace configuration,
//! written to a sibling temp path, and renamed into place so the storage
//! server's periodic reload never observes a half-written file.

use std::fs;
use std::io::Write;
use std::path::Path;

use url::Url;

use pelican_core::config::OriginConfig;
use pelican_core::{NamespaceAd, PelicanError, Result, ServerRole};

/// Split input into logical lines, honoring `\` line continuations. A
/// backslash swallows the whitespace up to and including the following
/// newline; any other character after it is an error. Trailing carriage
/// returns are dropped.
pub fn scan_lines_with_continuations(input: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => loop {
                match chars.peek() {
                    None => break,
                    Some('\n') => {
                        chars.next();
                        break;
                    }
                    Some(ch) if ch.is_whitespace() => {
                        chars.next();
                    }
                    Some(ch) => {
                        return Err(PelicanError::Protocol(format!(
                            "invalid character after line continuation: {}",
                            ch
                        )));
                    }
                }
            },
            '\n' => {
                let line = current.strip_suffix('\r').unwrap_or(&current).to_string();
                lines.push(line);
                current.clear();
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        let line = current.strip_suffix('\r').unwrap_or(&current).to_string();
        lines.push(line);
    }
    Ok(lines)
}

/// Merge the administrator's input authfile with the entries this server
/// requires. Origins always expose `/.well-known` for public reads, plus the
/// exported namespace when public reads are enabled; caches append every
/// public namespace they serve.
pub fn render_authfile(
    role: ServerRole,
    input: &str,
    origin: &OriginConfig,
    namespace_ads: &[NamespaceAd],
) -> Result<String> {
    let mut output = String::new();
    let mut found_public_line = false;

    for line in scan_lines_with_continuations(input)? {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() >= 2 && words[0] == "u" && words[1] == "*" {
            found_public_line = true;
            match role {
                ServerRole::Origin => {
                    let mut entry = String::from("u * /.well-known lr ");
                    if origin.enable_public_reads {
                        entry.push_str(&origin.namespace_prefix);
                        entry.push_str(" lr ");
                    }
                    entry.push_str(&words[2..].join(" "));
                    output.push_str(entry.trim_end());
                    output.push('\n');
                }
                ServerRole::Cache => {
                    // The cache's public namespaces are appended below.
                    output.push_str(&line);
                    output.push(' ');
                }
            }
        } else {
            output.push_str(&line);
            output.push('\n');
        }
    }

    if !found_public_line && role == ServerRole::Origin {
        let mut entry = String::from("u * /.well-known lr");
        if origin.enable_public_reads {
            entry.push(' ');
            entry.push_str(&origin.namespace_prefix);
            entry.push_str(" lr");
        }
        output.push_str(&entry);
        output.push('\n');
    }

    if role == ServerRole::Cache {
        let mut entry = if found_public_line {
            String::new()
        } else {
            String::from("u * ")
        };
        for ad in namespace_ads {
            if ad.public_read && !ad.prefix.is_empty() {
                entry.push_str(&ad.prefix);
                entry.push_str(" lr ");
            }
        }
        if entry.trim_end() != "u *" && !entry.trim_end().is_empty() {
            output.push_str(entry.trim_end());
            output.push('\n');
        }
    }

    Ok(output)
}

/// Scitokens server-wide settings.
#[derive(Debug, Clone, Default)]
pub struct ScitokensGlobal {
    pub audience: Vec<String>,
}

/// One trusted token issuer for the data plane.
#[derive(Debug, Clone)]
pub struct ScitokensIssuer {
    pub name: String,
    pub issuer: Url,
    pub base_paths: Vec<String>,
    pub restricted_paths: Vec<String>,
}

/// Top-level scitokens configuration rendered to INI.
#[derive(Debug, Clone, Default)]
pub struct ScitokensConfig {
    pub global: ScitokensGlobal,
    pub issuers: Vec<ScitokensIssuer>,
}

impl ScitokensConfig {
    /// Build the configuration for a server exporting `namespace_ads`.
    pub fn for_namespaces(audience: &str, namespace_ads: &[NamespaceAd]) -> Self {
        let mut config = ScitokensConfig {
            global: ScitokensGlobal {
                audience: vec![audience.to_string()],
            },
            issuers: Vec::new(),
        };
        for ad in namespace_ads {
            for issuer in &ad.issuers {
                config.issuers.push(ScitokensIssuer {
                    name: ad.prefix.clone(),
                    issuer: issuer.issuer_url.clone(),
                    base_paths: issuer.base_paths.clone(),
                    restricted_paths: issuer.restricted_paths.clone(),
                });
            }
        }
        config
    }
}

/// Render the scitokens INI the data-plane server consumes.
pub fn render_scitokens(config: &ScitokensConfig) -> String {
    let mut output = String::from("[Global]\n");
    output.push_str(&format!("audience = {}\n", config.global.audience.join(", ")));

    for issuer in &config.issuers {
        output.push('\n');
        output.push_str(&format!("[Issuer {}]\n", issuer.name));
        output.push_str(&format!("issuer = {}\n", issuer.issuer.as_str().trim_end_matches('/')));
        output.push_str(&format!("base_path = {}\n", issuer.base_paths.join(", ")));
        if !issuer.restricted_paths.is_empty() {
            output.push_str(&format!(
                "restricted_path = {}\n",
                issuer.restricted_paths.join(", ")
            ));
        }
    }
    output
}

/// Write `contents` to `path` atomically: temp sibling, optional group
/// change, then rename. The data-plane daemon's periodic reload only ever
/// sees complete files.
pub fn write_atomic(path: &Path, contents: &str, daemon_gid: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("generated.tmp");
    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    if let Some(gid) = daemon_gid {
        std::os::unix::fs::chown(&tmp, None, Some(gid))?;
    }
    #[cfg(not(unix))]
    let _ = daemon_gid;
    fs::rename(&tmp, path)?;
    Ok(())
}
