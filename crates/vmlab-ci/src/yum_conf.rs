//! Sanitizing the host package-manager configuration before it goes into the guest.
//!
//! Two things are removed:
//! - `reposdir` settings, so the guest keeps its default repository directory;
//! - exclude entries matching the package glob, so the guest is allowed to
//!   install that package from the locally served repository.

use regex::Regex;

use crate::error::{HarnessError, Result};

const REPOSDIR_KEY: &str = "reposdir";
const EXCLUDE_KEYS: [&str; 2] = ["exclude", "excludepkgs"];

/// What an indented continuation line belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Continuation {
    None,
    /// Exclude list; `emitted` is false while every entry so far was removed.
    Exclude {
        key: String,
        separator: char,
        emitted: bool,
    },
    Dropped,
}

/// Rewrites yum/dnf configuration text.
#[derive(Debug, Clone)]
pub struct PackageConfigSanitizer {
    pattern: Regex,
}

impl PackageConfigSanitizer {
    /// `glob` supports `*` and `?`; everything else matches literally.
    pub fn new(glob: &str) -> Result<Self> {
        let pattern =
            Regex::new(&glob_to_regex(glob)).map_err(|source| HarnessError::InvalidGlob {
                glob: glob.to_string(),
                source,
            })?;
        Ok(Self { pattern })
    }

    /// Whether `package` matches the excluded glob.
    pub fn matches(&self, package: &str) -> bool {
        self.pattern.is_match(package)
    }

    /// Settings are `key=value` or `key: value`. An indented line continues
    /// the previous reposdir or exclude value; anywhere else it is read as a
    /// setting of its own.
    pub fn sanitize(&self, content: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut continuation = Continuation::None;

        for line in content.lines() {
            let is_continuation = line.starts_with([' ', '\t']) && !line.trim().is_empty();
            if is_continuation && continuation != Continuation::None {
                if let Continuation::Exclude {
                    key,
                    separator,
                    emitted,
                } = &mut continuation
                {
                    let kept = self.kept_entries(line);
                    if !kept.is_empty() {
                        if *emitted {
                            let indent = &line[..line.len() - line.trim_start().len()];
                            out.push(format!("{}{}", indent, kept.join(" ")));
                        } else {
                            out.push(render(key, *separator, &kept));
                            *emitted = true;
                        }
                    }
                }
                continue;
            }
            continuation = Continuation::None;

            let Some((key, separator, value)) = setting(line) else {
                out.push(line.to_string());
                continue;
            };

            let key_lower = key.to_ascii_lowercase();
            if key_lower == REPOSDIR_KEY {
                continuation = Continuation::Dropped;
                continue;
            }
            if EXCLUDE_KEYS.contains(&key_lower.as_str()) {
                let kept = self.kept_entries(value);
                let emitted = !kept.is_empty();
                if emitted {
                    out.push(render(key, separator, &kept));
                }
                continuation = Continuation::Exclude {
                    key: key.to_string(),
                    separator,
                    emitted,
                };
                continue;
            }
            out.push(line.to_string());
        }

        let mut text = out.join("\n");
        if content.ends_with('\n') && !text.is_empty() {
            text.push('\n');
        }
        text
    }

    fn kept_entries<'a>(&self, value: &'a str) -> Vec<&'a str> {
        value
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|entry| !entry.is_empty() && !self.matches(entry))
            .collect()
    }
}

/// Split `key=value` or `key: value` at the first separator. Comments and
/// section headers are not settings.
fn setting(line: &str) -> Option<(&str, char, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(['#', ';', '[']) {
        return None;
    }
    let at = trimmed.find(['=', ':'])?;
    let separator = if trimmed[at..].starts_with(':') { ':' } else { '=' };
    let key = trimmed[..at].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, separator, trimmed[at + 1..].trim()))
}

fn render(key: &str, separator: char, entries: &[&str]) -> String {
    match separator {
        ':' => format!("{}: {}", key, entries.join(" ")),
        _ => format!("{}={}", key, entries.join(" ")),
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut re = String::with_capacity(glob.len() + 8);
    re.push('^');
    for c in glob.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> PackageConfigSanitizer {
        PackageConfigSanitizer::new("vdsm*").expect("glob")
    }

    #[test]
    fn test_glob_matching() {
        let s = sanitizer();
        assert!(s.matches("vdsm"));
        assert!(s.matches("vdsm-network"));
        assert!(!s.matches("python-vdsm"));
        assert!(!s.matches("kernel"));

        let q = PackageConfigSanitizer::new("lib?.so").expect("glob");
        assert!(q.matches("libc.so"));
        assert!(!q.matches("libcc.so"));
        assert!(!q.matches("libcXso"));
    }

    #[test]
    fn test_reposdir_removed() {
        let input = "[main]\ncachedir=/var/cache/yum\nreposdir=/etc/mock/repos\ngpgcheck=1\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, "[main]\ncachedir=/var/cache/yum\ngpgcheck=1\n");
    }

    #[test]
    fn test_reposdir_key_case_and_spacing() {
        let out = sanitizer().sanitize("[main]\nRepOsDir = /x\nkeep=1");
        assert_eq!(out, "[main]\nkeep=1");
    }

    #[test]
    fn test_matching_exclude_entries_removed() {
        let input = "[main]\nexclude=vdsm* kernel vdsm-hook-vhostmd,libvirt\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, "[main]\nexclude=kernel libvirt\n");
    }

    #[test]
    fn test_exclude_line_dropped_when_empty() {
        let input = "[main]\nexcludepkgs=vdsm vdsm-client\nkeepcache=0\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, "[main]\nkeepcache=0\n");
    }

    #[test]
    fn test_continuation_lines() {
        let input = "[main]\nexclude=kernel\n  vdsm-api\n  qemu*\nreposdir=/a\n  /b\nlast=1\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, "[main]\nexclude=kernel\n  qemu*\nlast=1\n");
    }

    #[test]
    fn test_comments_and_other_sections_kept() {
        let input = "# reposdir=/commented\n[repo]\nname=vdsm repo\nbaseurl=http://x/vdsm\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitizer().sanitize(""), "");
    }

    #[test]
    fn test_output_never_contains_forbidden_lines() {
        let input = concat!(
            "[main]\nreposdir=/r\nexclude=vdsm-x\n  vdsm-y kernel\n",
            "exclude=a,vdsm-z,b\n[extra]\nReposDir=/q\n",
        );
        let s = sanitizer();
        let out = s.sanitize(input);
        assert_eq!(out, "[main]\nexclude=kernel\nexclude=a b\n[extra]\n");
        assert!(!out.to_ascii_lowercase().contains("reposdir"));
        assert!(!out.contains("vdsm"));
    }

    fn assert_clean(out: &str) {
        assert!(!out.to_ascii_lowercase().contains("reposdir"), "{:?}", out);
        assert!(!out.contains("vdsm"), "{:?}", out);
    }

    #[test]
    fn test_colon_separated_settings() {
        let input = "[main]\nreposdir: /etc/mock/repos\nexclude: vdsm* kernel\n";
        let out = sanitizer().sanitize(input);
        assert_eq!(out, "[main]\nexclude: kernel\n");
        assert_clean(&out);

        let out = sanitizer().sanitize("[main]\nexclude: vdsm-api\n  vdsm-client\nkeep: 1\n");
        assert_eq!(out, "[main]\nkeep: 1\n");
    }

    #[test]
    fn test_indented_settings_after_section_header() {
        let out = sanitizer().sanitize("[main]\n  reposdir=/etc/mock/repos\n");
        assert_eq!(out, "[main]\n");

        let out = sanitizer().sanitize("[main]\n\texclude = vdsm* libvirt\ncachedir=/c\n");
        assert_eq!(out, "[main]\nexclude=libvirt\ncachedir=/c\n");
    }

    #[test]
    fn test_first_separator_wins() {
        let input = "[repo]\nbaseurl=http://mirror/vdsm\nmirrorlist: http://m/list?a=b\n";
        assert_eq!(sanitizer().sanitize(input), input);
    }

    #[test]
    fn test_no_layout_leaks_forbidden_content() {
        let layouts = [
            "reposdir=/r\nexclude=vdsm*\n",
            "reposdir: /r\nexclude: vdsm*\n",
            "  reposdir=/r\n  exclude=vdsm*\n",
            "\tReposDir : /r\n\tExcludePkgs : vdsm-x,vdsm-y\n",
            "exclude=kernel\n  vdsm-a\nreposdir=/r\n  /more\n",
            "exclude: vdsm-a\n  vdsm-b kernel\n",
        ];
        let s = sanitizer();
        for layout in layouts {
            let input = format!("[main]\n{}[repo]\nname=x\n", layout);
            assert_clean(&s.sanitize(&input));
        }
    }
}
